//! Approval workflow for sales and expenses.
//!
//! Both entities share one lifecycle: records are created `pending`
//! and a manager-or-above decides them `approved` or `rejected`. Both
//! outcomes are terminal — re-deciding a decided record fails with
//! `InvalidState` rather than silently succeeding, so a financial
//! entry can never be double-processed.
//!
//! **Rules:**
//! - The transition is one conditional UPDATE gated on
//!   `approval_status = 'pending'`; two concurrent approvals of the
//!   same record cannot both succeed
//! - The acting user's store scope must include the record's store
//! - Bulk decide attempts each id independently and reports a
//!   per-record outcome; one failure never rolls back other successes

use chrono::Utc;
use rusqlite::{params, Connection};
use serde_json::Value;
use tracing::{info, warn};

use crate::access::{self, Actor};
use crate::db::DbState;
use crate::errors::DomainError;

// ---------------------------------------------------------------------------
// Entity / decision vocabulary
// ---------------------------------------------------------------------------

/// The two record kinds carrying the approval workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalEntity {
    Sale,
    Expense,
}

impl ApprovalEntity {
    pub fn parse(s: &str) -> Option<ApprovalEntity> {
        match s {
            "sale" | "sales" => Some(ApprovalEntity::Sale),
            "expense" | "expenses" => Some(ApprovalEntity::Expense),
            _ => None,
        }
    }

    fn table(&self) -> &'static str {
        match self {
            ApprovalEntity::Sale => "sales",
            ApprovalEntity::Expense => "expenses",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ApprovalEntity::Sale => "sale",
            ApprovalEntity::Expense => "expense",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approved,
    Rejected,
}

impl Decision {
    pub fn parse(s: &str) -> Option<Decision> {
        match s {
            "approved" | "approve" => Some(Decision::Approved),
            "rejected" | "reject" => Some(Decision::Rejected),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Decision::Approved => "approved",
            Decision::Rejected => "rejected",
        }
    }
}

// ---------------------------------------------------------------------------
// Decide
// ---------------------------------------------------------------------------

/// Decide a single pending record.
///
/// Payload: `{ entityType, recordId, decision, actingUserId }`.
pub fn decide(db: &DbState, payload: &Value) -> Result<Value, DomainError> {
    let conn = db.conn.lock().map_err(|e| DomainError::Storage(e.to_string()))?;

    let (entity, decision, actor) = parse_decide_payload(&conn, payload)?;
    let record_id = crate::value_str(payload, &["recordId", "record_id", "id"])
        .ok_or_else(|| DomainError::validation("Missing recordId"))?;

    let result = decide_one(&conn, entity, &record_id, decision, &actor)?;

    info!(
        entity = entity.label(),
        record_id = %record_id,
        decision = decision.as_str(),
        acting_user = %actor.id,
        "Approval decision recorded"
    );

    Ok(result)
}

/// Decide a set of records, one conditional update per id.
///
/// Payload: `{ entityType, recordIds, decision, actingUserId }`.
/// Returns per-record outcomes; records targeting disjoint rows, so
/// ordering between them is irrelevant and no cross-record transaction
/// is taken.
pub fn bulk_decide(db: &DbState, payload: &Value) -> Result<Value, DomainError> {
    let conn = db.conn.lock().map_err(|e| DomainError::Storage(e.to_string()))?;

    let (entity, decision, actor) = parse_decide_payload(&conn, payload)?;

    let ids: Vec<String> = payload
        .get("recordIds")
        .or_else(|| payload.get("record_ids"))
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    if ids.is_empty() {
        return Err(DomainError::validation("recordIds must not be empty"));
    }

    let mut results = Vec::with_capacity(ids.len());
    let mut decided = 0usize;

    for id in &ids {
        match decide_one(&conn, entity, id, decision, &actor) {
            Ok(_) => {
                decided += 1;
                results.push(serde_json::json!({
                    "recordId": id,
                    "success": true,
                    "approvalStatus": decision.as_str(),
                }));
            }
            Err(e) => {
                warn!(
                    entity = entity.label(),
                    record_id = %id,
                    error = %e,
                    "Bulk decision skipped record"
                );
                results.push(serde_json::json!({
                    "recordId": id,
                    "success": false,
                    "error": { "kind": e.kind(), "message": e.to_string() },
                }));
            }
        }
    }

    info!(
        entity = entity.label(),
        decision = decision.as_str(),
        decided = decided,
        failed = ids.len() - decided,
        "Bulk approval decision completed"
    );

    Ok(serde_json::json!({
        "success": true,
        "decidedCount": decided,
        "failedCount": ids.len() - decided,
        "results": results,
    }))
}

/// Shared payload parsing: entity, decision, and a role-checked actor.
fn parse_decide_payload(
    conn: &Connection,
    payload: &Value,
) -> Result<(ApprovalEntity, Decision, Actor), DomainError> {
    let entity_str = crate::value_str(payload, &["entityType", "entity_type"])
        .ok_or_else(|| DomainError::validation("Missing entityType"))?;
    let entity = ApprovalEntity::parse(&entity_str)
        .ok_or_else(|| DomainError::validation(format!("Unknown entityType: {entity_str}")))?;

    let decision_str = crate::value_str(payload, &["decision"])
        .ok_or_else(|| DomainError::validation("Missing decision"))?;
    let decision = Decision::parse(&decision_str)
        .ok_or_else(|| DomainError::validation(format!("Unknown decision: {decision_str}")))?;

    let user_id = crate::value_str(payload, &["actingUserId", "acting_user_id"])
        .ok_or_else(|| DomainError::validation("Missing actingUserId"))?;
    let actor = access::load_actor(conn, &user_id)?;

    if !access::can_decide(actor.role) {
        return Err(DomainError::forbidden(format!(
            "Role {} may not approve or reject entries",
            actor.role.as_str()
        )));
    }

    Ok((entity, decision, actor))
}

/// Apply one decision: scope check, then a conditional update gated on
/// the record still being pending.
fn decide_one(
    conn: &Connection,
    entity: ApprovalEntity,
    record_id: &str,
    decision: Decision,
    actor: &Actor,
) -> Result<Value, DomainError> {
    let table = entity.table();

    let store_id: String = conn
        .query_row(
            &format!("SELECT store_id FROM {table} WHERE id = ?1"),
            params![record_id],
            |row| row.get(0),
        )
        .map_err(|_| {
            DomainError::not_found(format!("{} not found: {record_id}", entity.label()))
        })?;

    let scope = access::visible_store_scope(actor);
    access::authorize_store(&scope, &store_id)?;

    let now = Utc::now().to_rfc3339();
    let updated = conn.execute(
        &format!(
            "UPDATE {table} SET approval_status = ?1, approved_by = ?2, updated_at = ?3
             WHERE id = ?4 AND approval_status = 'pending'"
        ),
        params![decision.as_str(), actor.id, now, record_id],
    )?;

    if updated == 0 {
        // Lost to an earlier decision; report the state it settled in.
        let current: String = conn.query_row(
            &format!("SELECT approval_status FROM {table} WHERE id = ?1"),
            params![record_id],
            |row| row.get(0),
        )?;
        return Err(DomainError::invalid_state(format!(
            "{} {record_id} is already {current}",
            entity.label()
        )));
    }

    Ok(serde_json::json!({
        "success": true,
        "recordId": record_id,
        "approvalStatus": decision.as_str(),
        "approvedBy": actor.id,
    }))
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use rusqlite::Connection;
    use std::path::PathBuf;
    use std::sync::Mutex;

    fn test_db() -> DbState {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        conn.execute_batch("PRAGMA foreign_keys = ON;").expect("pragma");
        db::run_migrations_for_test(&conn);
        conn.execute_batch(
            "INSERT INTO stores (id, store_code, name) VALUES ('st-a', 'BLR01', 'Indiranagar');
             INSERT INTO stores (id, store_code, name) VALUES ('st-b', 'BLR02', 'Koramangala');
             INSERT INTO users (id, name, email, role, store_id)
                 VALUES ('u-cash', 'Asha', 'asha@example.com', 'cashier', 'st-a');
             INSERT INTO users (id, name, email, role, store_id)
                 VALUES ('u-mgr', 'Ravi', 'ravi@example.com', 'store_manager', 'st-a');
             INSERT INTO users (id, name, email, role)
                 VALUES ('u-acc', 'Meera', 'meera@example.com', 'accounts_incharge');",
        )
        .expect("seed");
        DbState {
            conn: Mutex::new(conn),
            db_path: PathBuf::from(":memory:"),
        }
    }

    fn seed_sale(db: &DbState, id: &str, store_id: &str) {
        let conn = db.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO sales (id, store_id, sale_date, tender_type, amount, entered_by)
             VALUES (?1, ?2, '2026-08-01', 'cash', 100.0, 'u-cash')",
            params![id, store_id],
        )
        .expect("insert sale");
    }

    fn sale_status(db: &DbState, id: &str) -> (String, Option<String>) {
        let conn = db.conn.lock().unwrap();
        conn.query_row(
            "SELECT approval_status, approved_by FROM sales WHERE id = ?1",
            params![id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap()
    }

    #[test]
    fn test_decide_approves_pending_sale() {
        let db = test_db();
        seed_sale(&db, "s-1", "st-a");

        let result = decide(
            &db,
            &serde_json::json!({
                "entityType": "sale",
                "recordId": "s-1",
                "decision": "approved",
                "actingUserId": "u-mgr",
            }),
        )
        .unwrap();

        assert_eq!(result["success"], true);
        assert_eq!(result["approvalStatus"], "approved");
        let (status, approved_by) = sale_status(&db, "s-1");
        assert_eq!(status, "approved");
        assert_eq!(approved_by.as_deref(), Some("u-mgr"));
    }

    #[test]
    fn test_double_decide_rejected_without_mutation() {
        let db = test_db();
        seed_sale(&db, "s-2", "st-a");

        let payload = serde_json::json!({
            "entityType": "sale",
            "recordId": "s-2",
            "decision": "approved",
            "actingUserId": "u-mgr",
        });
        decide(&db, &payload).unwrap();

        // Second decision — even a different one — must fail
        let reject = serde_json::json!({
            "entityType": "sale",
            "recordId": "s-2",
            "decision": "rejected",
            "actingUserId": "u-acc",
        });
        let err = decide(&db, &reject).unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
        assert!(err.to_string().contains("already approved"));

        // State unchanged by the failed attempt
        let (status, approved_by) = sale_status(&db, "s-2");
        assert_eq!(status, "approved");
        assert_eq!(approved_by.as_deref(), Some("u-mgr"));
    }

    #[test]
    fn test_cashier_cannot_decide() {
        let db = test_db();
        seed_sale(&db, "s-3", "st-a");

        let err = decide(
            &db,
            &serde_json::json!({
                "entityType": "sale",
                "recordId": "s-3",
                "decision": "approved",
                "actingUserId": "u-cash",
            }),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Forbidden(_)));
        assert_eq!(sale_status(&db, "s-3").0, "pending");
    }

    #[test]
    fn test_manager_of_other_store_forbidden() {
        let db = test_db();
        seed_sale(&db, "s-4", "st-b");

        // u-mgr manages st-a; the sale belongs to st-b
        let err = decide(
            &db,
            &serde_json::json!({
                "entityType": "sale",
                "recordId": "s-4",
                "decision": "approved",
                "actingUserId": "u-mgr",
            }),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Forbidden(_)));
        assert_eq!(sale_status(&db, "s-4").0, "pending");
    }

    #[test]
    fn test_accounts_incharge_decides_any_store() {
        let db = test_db();
        seed_sale(&db, "s-5", "st-b");

        let result = decide(
            &db,
            &serde_json::json!({
                "entityType": "sale",
                "recordId": "s-5",
                "decision": "rejected",
                "actingUserId": "u-acc",
            }),
        )
        .unwrap();
        assert_eq!(result["approvalStatus"], "rejected");
        assert_eq!(sale_status(&db, "s-5").0, "rejected");
    }

    #[test]
    fn test_decide_missing_record() {
        let db = test_db();
        let err = decide(
            &db,
            &serde_json::json!({
                "entityType": "sale",
                "recordId": "s-nope",
                "decision": "approved",
                "actingUserId": "u-mgr",
            }),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));
    }

    #[test]
    fn test_decide_expense() {
        let db = test_db();
        {
            let conn = db.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO expenses (id, store_id, expense_date, category, amount, description, requested_by)
                 VALUES ('e-1', 'st-a', '2026-08-01', 'freight', 250.0, 'Courier charges', 'u-cash')",
                [],
            )
            .unwrap();
        }

        let result = decide(
            &db,
            &serde_json::json!({
                "entityType": "expense",
                "recordId": "e-1",
                "decision": "approved",
                "actingUserId": "u-mgr",
            }),
        )
        .unwrap();
        assert_eq!(result["success"], true);

        let conn = db.conn.lock().unwrap();
        let status: String = conn
            .query_row(
                "SELECT approval_status FROM expenses WHERE id = 'e-1'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(status, "approved");
    }

    #[test]
    fn test_bulk_decide_independent_outcomes() {
        let db = test_db();
        seed_sale(&db, "s-b1", "st-a");
        seed_sale(&db, "s-b2", "st-a");
        seed_sale(&db, "s-b3", "st-a");

        // Pre-decide s-b2 so the bulk attempt on it fails
        decide(
            &db,
            &serde_json::json!({
                "entityType": "sale",
                "recordId": "s-b2",
                "decision": "rejected",
                "actingUserId": "u-mgr",
            }),
        )
        .unwrap();

        let result = bulk_decide(
            &db,
            &serde_json::json!({
                "entityType": "sale",
                "recordIds": ["s-b1", "s-b2", "s-b3", "s-missing"],
                "decision": "approved",
                "actingUserId": "u-mgr",
            }),
        )
        .unwrap();

        assert_eq!(result["decidedCount"], 2);
        assert_eq!(result["failedCount"], 2);

        let outcomes = result["results"].as_array().unwrap();
        assert_eq!(outcomes.len(), 4);
        assert_eq!(outcomes[0]["success"], true);
        assert_eq!(outcomes[1]["success"], false);
        assert_eq!(outcomes[1]["error"]["kind"], "invalid_state_error");
        assert_eq!(outcomes[2]["success"], true);
        assert_eq!(outcomes[3]["error"]["kind"], "not_found_error");

        // The failure on s-b2 must not roll back s-b1/s-b3
        assert_eq!(sale_status(&db, "s-b1").0, "approved");
        assert_eq!(sale_status(&db, "s-b2").0, "rejected");
        assert_eq!(sale_status(&db, "s-b3").0, "approved");
    }

    #[test]
    fn test_bulk_decide_empty_ids_rejected() {
        let db = test_db();
        let err = bulk_decide(
            &db,
            &serde_json::json!({
                "entityType": "sale",
                "recordIds": [],
                "decision": "approved",
                "actingUserId": "u-mgr",
            }),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }
}
