//! Daily expense entry for Store Daybook.
//!
//! Mirrors the sales grid: seven fixed category slots submitted
//! together for one store and date. A slot survives only with a
//! positive amount and a non-empty description (expenses require a
//! paper trail). Surviving slots become independent `expenses` rows,
//! created `pending`, in one transaction.
//!
//! If the batch pushes the day's expense total past the store's petty
//! cash limit, the submission still succeeds but the response flags
//! it for the approver.

use chrono::Utc;
use rusqlite::params;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::access;
use crate::batch_entry;
use crate::db::DbState;
use crate::errors::DomainError;
use crate::sales::{parse_entry_date, resolve_target_store};

/// The fixed slot order of the daily expense grid.
pub const EXPENSE_CATEGORIES: &[&str] = &[
    "staff_welfare",
    "freight",
    "stationery",
    "repairs",
    "cleaning",
    "fuel",
    "misc",
];

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

/// Submit one day's expense grid for a store.
///
/// Payload: `{ actingUserId, storeId?, expenseDate, slots: [{ category,
/// amount, description, notes? }] }`.
pub fn submit_daily_expenses(db: &DbState, payload: &Value) -> Result<Value, DomainError> {
    let conn = db.conn.lock().map_err(|e| DomainError::Storage(e.to_string()))?;

    let user_id = crate::value_str(payload, &["actingUserId", "acting_user_id"])
        .ok_or_else(|| DomainError::validation("Missing actingUserId"))?;
    let actor = access::load_actor(&conn, &user_id)?;

    let store_id = resolve_target_store(&conn, &actor, payload)?;
    let expense_date = parse_entry_date(payload, &["expenseDate", "expense_date"])?;

    let slots = payload
        .get("slots")
        .and_then(Value::as_array)
        .ok_or_else(|| DomainError::validation("Missing slots"))?;
    let entries = batch_entry::reduce_entries(slots, &["category"], true)?;

    for entry in &entries {
        if !EXPENSE_CATEGORIES.contains(&entry.key.as_str()) {
            return Err(DomainError::validation(format!(
                "Unknown expense category: {}",
                entry.key
            )));
        }
    }

    let batch_total: f64 = entries.iter().map(|e| e.amount).sum();

    // Same-day total so far (pending + approved both count against the limit)
    let prior_total: f64 = conn
        .query_row(
            "SELECT COALESCE(SUM(amount), 0.0) FROM expenses
             WHERE store_id = ?1 AND expense_date = ?2 AND approval_status != 'rejected'",
            params![store_id, expense_date],
            |row| row.get(0),
        )
        .unwrap_or(0.0);
    let petty_cash_limit: f64 = conn
        .query_row(
            "SELECT petty_cash_limit FROM stores WHERE id = ?1",
            params![store_id],
            |row| row.get(0),
        )
        .unwrap_or(0.0);
    let limit_exceeded = petty_cash_limit > 0.0 && prior_total + batch_total > petty_cash_limit;

    let now = Utc::now().to_rfc3339();
    let mut expense_ids = Vec::with_capacity(entries.len());

    conn.execute_batch("BEGIN IMMEDIATE")
        .map_err(|e| DomainError::Storage(format!("begin transaction: {e}")))?;

    let result = (|| -> Result<(), DomainError> {
        for entry in &entries {
            let expense_id = Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO expenses (
                    id, store_id, expense_date, category, amount,
                    description, requested_by, approval_status, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'pending', ?8, ?8)",
                params![
                    expense_id,
                    store_id,
                    expense_date,
                    entry.key,
                    entry.amount,
                    entry.description,
                    actor.id,
                    now,
                ],
            )
            .map_err(|e| DomainError::Storage(format!("insert expense: {e}")))?;
            expense_ids.push(expense_id);
        }
        Ok(())
    })();

    match result {
        Ok(()) => {
            conn.execute_batch("COMMIT")
                .map_err(|e| DomainError::Storage(format!("commit: {e}")))?;
        }
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            return Err(e);
        }
    }

    if limit_exceeded {
        warn!(
            store_id = %store_id,
            expense_date = %expense_date,
            day_total = prior_total + batch_total,
            petty_cash_limit = petty_cash_limit,
            "Daily expenses exceed the store petty cash limit"
        );
    }

    info!(
        store_id = %store_id,
        expense_date = %expense_date,
        entries = expense_ids.len(),
        requested_by = %actor.id,
        "Daily expense batch recorded"
    );

    Ok(serde_json::json!({
        "success": true,
        "storeId": store_id,
        "expenseDate": expense_date,
        "createdCount": expense_ids.len(),
        "expenseIds": expense_ids,
        "batchTotal": batch_total,
        "pettyCashLimitExceeded": limit_exceeded,
    }))
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

/// List expenses visible to the acting user, optionally filtered by
/// store, date, and approval status.
pub fn list_expenses(db: &DbState, payload: &Value) -> Result<Value, DomainError> {
    let conn = db.conn.lock().map_err(|e| DomainError::Storage(e.to_string()))?;

    let user_id = crate::value_str(payload, &["actingUserId", "acting_user_id"])
        .ok_or_else(|| DomainError::validation("Missing actingUserId"))?;
    let actor = access::load_actor(&conn, &user_id)?;

    let requested = crate::value_str(payload, &["storeId", "store_id"]);
    let scope = access::resolve_scope(&conn, &actor, requested.as_deref())?;

    let mut sql = String::from(
        "SELECT id, store_id, expense_date, category, amount, description,
                requested_by, approval_status, approved_by, created_at
         FROM expenses WHERE 1=1",
    );
    let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    if let Some(ref sid) = scope.store_id {
        sql.push_str(" AND store_id = ?");
        args.push(Box::new(sid.clone()));
    }
    if let Some(date) = crate::value_str(payload, &["expenseDate", "expense_date"]) {
        sql.push_str(" AND expense_date = ?");
        args.push(Box::new(date));
    }
    if let Some(status) = crate::value_str(payload, &["approvalStatus", "approval_status"]) {
        sql.push_str(" AND approval_status = ?");
        args.push(Box::new(status));
    }
    sql.push_str(" ORDER BY expense_date DESC, created_at DESC");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), |row| {
        Ok(serde_json::json!({
            "id": row.get::<_, String>(0)?,
            "storeId": row.get::<_, String>(1)?,
            "expenseDate": row.get::<_, String>(2)?,
            "category": row.get::<_, String>(3)?,
            "amount": row.get::<_, f64>(4)?,
            "description": row.get::<_, String>(5)?,
            "requestedBy": row.get::<_, String>(6)?,
            "approvalStatus": row.get::<_, String>(7)?,
            "approvedBy": row.get::<_, Option<String>>(8)?,
            "createdAt": row.get::<_, Option<String>>(9)?,
        }))
    })?;

    let expenses: Vec<Value> = rows.flatten().collect();
    Ok(serde_json::json!({ "success": true, "expenses": expenses }))
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
            "INSERT INTO stores (id, store_code, name, petty_cash_limit)
                 VALUES ('st-a', 'BLR01', 'Indiranagar', 1000.0);
             INSERT INTO users (id, name, email, role, store_id)
                 VALUES ('u-mgr', 'Ravi', 'ravi@example.com', 'store_manager', 'st-a');",
        )
        .expect("seed");
        DbState {
            conn: Mutex::new(conn),
            db_path: PathBuf::from(":memory:"),
        }
    }

    #[test]
    fn test_submit_requires_description() {
        let db = test_db();
        let result = submit_daily_expenses(
            &db,
            &serde_json::json!({
                "actingUserId": "u-mgr",
                "expenseDate": "2026-08-28",
                "slots": [
                    { "category": "freight", "amount": 250.0, "description": "Courier charges" },
                    { "category": "misc", "amount": 40.0 },
                ],
            }),
        )
        .unwrap();

        // The description-less misc slot is filtered, not persisted
        assert_eq!(result["createdCount"], 1);
        assert_eq!(result["batchTotal"], 250.0);

        let conn = db.conn.lock().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM expenses", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_unknown_category_rejected() {
        let db = test_db();
        let err = submit_daily_expenses(
            &db,
            &serde_json::json!({
                "actingUserId": "u-mgr",
                "expenseDate": "2026-08-28",
                "slots": [
                    { "category": "entertainment", "amount": 99.0, "description": "Movie" },
                ],
            }),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn test_petty_cash_limit_flagged_not_blocked() {
        let db = test_db();

        // First batch within the 1000.0 limit
        let result = submit_daily_expenses(
            &db,
            &serde_json::json!({
                "actingUserId": "u-mgr",
                "expenseDate": "2026-08-28",
                "slots": [
                    { "category": "repairs", "amount": 800.0, "description": "AC service" },
                ],
            }),
        )
        .unwrap();
        assert_eq!(result["pettyCashLimitExceeded"], false);

        // Second batch pushes the day total past the limit; still recorded
        let result = submit_daily_expenses(
            &db,
            &serde_json::json!({
                "actingUserId": "u-mgr",
                "expenseDate": "2026-08-28",
                "slots": [
                    { "category": "fuel", "amount": 300.0, "description": "Generator diesel" },
                ],
            }),
        )
        .unwrap();
        assert_eq!(result["success"], true);
        assert_eq!(result["pettyCashLimitExceeded"], true);

        let conn = db.conn.lock().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM expenses", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_list_filters_by_status() {
        let db = test_db();
        submit_daily_expenses(
            &db,
            &serde_json::json!({
                "actingUserId": "u-mgr",
                "expenseDate": "2026-08-28",
                "slots": [
                    { "category": "freight", "amount": 100.0, "description": "Inbound stock" },
                    { "category": "cleaning", "amount": 60.0, "description": "Deep clean" },
                ],
            }),
        )
        .unwrap();

        let result = list_expenses(
            &db,
            &serde_json::json!({ "actingUserId": "u-mgr", "approvalStatus": "pending" }),
        )
        .unwrap();
        assert_eq!(result["expenses"].as_array().unwrap().len(), 2);

        let result = list_expenses(
            &db,
            &serde_json::json!({ "actingUserId": "u-mgr", "approvalStatus": "approved" }),
        )
        .unwrap();
        assert_eq!(result["expenses"].as_array().unwrap().len(), 0);
    }
}
