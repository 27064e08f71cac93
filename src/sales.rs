//! Daily sales entry for Store Daybook.
//!
//! Sales arrive as a grid: one slot per tender type (cash, credit,
//! card, UPI, hand bill, return, gift voucher), submitted together for
//! one store and date. Non-zero slots become independent `sales` rows,
//! all created `pending` and persisted in a single transaction.

use chrono::{NaiveDate, Utc};
use rusqlite::params;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::access;
use crate::batch_entry;
use crate::db::DbState;
use crate::errors::DomainError;

/// The fixed slot order of the daily sales grid.
pub const TENDER_TYPES: &[&str] = &[
    "cash",
    "credit",
    "credit_card",
    "upi",
    "hand_bill",
    "return",
    "gift_voucher",
];

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

/// Submit one day's sales grid for a store.
///
/// Payload: `{ actingUserId, storeId?, saleDate, slots: [{ tenderType,
/// amount, notes? }] }`. Cashiers and managers submit for their own
/// store; all-store roles must name the target store explicitly.
/// Either every surviving slot is persisted or none.
pub fn submit_daily_sales(db: &DbState, payload: &Value) -> Result<Value, DomainError> {
    let conn = db.conn.lock().map_err(|e| DomainError::Storage(e.to_string()))?;

    let user_id = crate::value_str(payload, &["actingUserId", "acting_user_id"])
        .ok_or_else(|| DomainError::validation("Missing actingUserId"))?;
    let actor = access::load_actor(&conn, &user_id)?;

    let store_id = resolve_target_store(&conn, &actor, payload)?;
    let sale_date = parse_entry_date(payload, &["saleDate", "sale_date"])?;

    let slots = payload
        .get("slots")
        .and_then(Value::as_array)
        .ok_or_else(|| DomainError::validation("Missing slots"))?;
    let entries = batch_entry::reduce_entries(slots, &["tenderType", "tender_type"], false)?;

    for entry in &entries {
        if !TENDER_TYPES.contains(&entry.key.as_str()) {
            return Err(DomainError::validation(format!(
                "Unknown tender type: {}",
                entry.key
            )));
        }
    }

    let now = Utc::now().to_rfc3339();
    let mut sale_ids = Vec::with_capacity(entries.len());

    conn.execute_batch("BEGIN IMMEDIATE")
        .map_err(|e| DomainError::Storage(format!("begin transaction: {e}")))?;

    let result = (|| -> Result<(), DomainError> {
        for entry in &entries {
            let sale_id = Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO sales (
                    id, store_id, sale_date, tender_type, amount,
                    entered_by, approval_status, notes, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7, ?8, ?8)",
                params![
                    sale_id,
                    store_id,
                    sale_date,
                    entry.key,
                    entry.amount,
                    actor.id,
                    entry.notes,
                    now,
                ],
            )
            .map_err(|e| DomainError::Storage(format!("insert sale: {e}")))?;
            sale_ids.push(sale_id);
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

    info!(
        store_id = %store_id,
        sale_date = %sale_date,
        entries = sale_ids.len(),
        entered_by = %actor.id,
        "Daily sales batch recorded"
    );

    Ok(serde_json::json!({
        "success": true,
        "storeId": store_id,
        "saleDate": sale_date,
        "createdCount": sale_ids.len(),
        "saleIds": sale_ids,
    }))
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

/// List sales visible to the acting user, optionally filtered by
/// store, date, and approval status.
pub fn list_sales(db: &DbState, payload: &Value) -> Result<Value, DomainError> {
    let conn = db.conn.lock().map_err(|e| DomainError::Storage(e.to_string()))?;

    let user_id = crate::value_str(payload, &["actingUserId", "acting_user_id"])
        .ok_or_else(|| DomainError::validation("Missing actingUserId"))?;
    let actor = access::load_actor(&conn, &user_id)?;

    let requested = crate::value_str(payload, &["storeId", "store_id"]);
    let scope = access::resolve_scope(&conn, &actor, requested.as_deref())?;

    let mut sql = String::from(
        "SELECT id, store_id, sale_date, tender_type, amount, entered_by,
                approval_status, approved_by, notes, created_at
         FROM sales WHERE 1=1",
    );
    let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    if let Some(ref sid) = scope.store_id {
        sql.push_str(" AND store_id = ?");
        args.push(Box::new(sid.clone()));
    }
    if let Some(date) = crate::value_str(payload, &["saleDate", "sale_date"]) {
        sql.push_str(" AND sale_date = ?");
        args.push(Box::new(date));
    }
    if let Some(status) = crate::value_str(payload, &["approvalStatus", "approval_status"]) {
        sql.push_str(" AND approval_status = ?");
        args.push(Box::new(status));
    }
    sql.push_str(" ORDER BY sale_date DESC, created_at DESC");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), |row| {
        Ok(serde_json::json!({
            "id": row.get::<_, String>(0)?,
            "storeId": row.get::<_, String>(1)?,
            "saleDate": row.get::<_, String>(2)?,
            "tenderType": row.get::<_, String>(3)?,
            "amount": row.get::<_, f64>(4)?,
            "enteredBy": row.get::<_, String>(5)?,
            "approvalStatus": row.get::<_, String>(6)?,
            "approvedBy": row.get::<_, Option<String>>(7)?,
            "notes": row.get::<_, Option<String>>(8)?,
            "createdAt": row.get::<_, Option<String>>(9)?,
        }))
    })?;

    let sales: Vec<Value> = rows.flatten().collect();
    Ok(serde_json::json!({ "success": true, "sales": sales }))
}

// ---------------------------------------------------------------------------
// Shared helpers (also used by expenses and convertibles)
// ---------------------------------------------------------------------------

/// Resolve the store a creation payload targets.
///
/// Single-store roles always write to their own store; an explicit
/// `storeId` naming any other store is Forbidden. All-store roles must
/// name the target store (store-selection flow) and it must be active.
pub(crate) fn resolve_target_store(
    conn: &rusqlite::Connection,
    actor: &access::Actor,
    payload: &Value,
) -> Result<String, DomainError> {
    let requested = crate::value_str(payload, &["storeId", "store_id"]);

    if actor.role.has_all_store_scope() {
        let store_id = requested
            .ok_or_else(|| DomainError::validation("storeId is required for all-store roles"))?;
        access::require_active_store(conn, &store_id)?;
        return Ok(store_id);
    }

    let own = actor
        .store_id
        .clone()
        .ok_or_else(|| DomainError::forbidden("User has no assigned store"))?;
    if let Some(req) = requested {
        if req != own {
            return Err(DomainError::forbidden(format!(
                "Store {req} is outside the user's scope"
            )));
        }
    }
    access::require_active_store(conn, &own)?;
    Ok(own)
}

/// Parse and validate a `YYYY-MM-DD` entry date from the payload.
pub(crate) fn parse_entry_date(payload: &Value, keys: &[&str]) -> Result<String, DomainError> {
    let raw = crate::value_str(payload, keys)
        .ok_or_else(|| DomainError::validation(format!("Missing {}", keys[0])))?;
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
        .map_err(|_| DomainError::validation(format!("Invalid date: {raw} (expected YYYY-MM-DD)")))?;
    Ok(raw)
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
             INSERT INTO stores (id, store_code, name, is_active)
                 VALUES ('st-closed', 'BLR99', 'Old Outlet', 0);
             INSERT INTO users (id, name, email, role, store_id)
                 VALUES ('u-cash', 'Asha', 'asha@example.com', 'cashier', 'st-a');
             INSERT INTO users (id, name, email, role)
                 VALUES ('u-acc', 'Meera', 'meera@example.com', 'accounts_incharge');",
        )
        .expect("seed");
        DbState {
            conn: Mutex::new(conn),
            db_path: PathBuf::from(":memory:"),
        }
    }

    #[test]
    fn test_submit_filters_zero_slots() {
        let db = test_db();
        let result = submit_daily_sales(
            &db,
            &serde_json::json!({
                "actingUserId": "u-cash",
                "saleDate": "2026-08-28",
                "slots": [
                    { "tenderType": "cash", "amount": 100.0 },
                    { "tenderType": "credit", "amount": 0.0 },
                    { "tenderType": "upi", "amount": 50.0 },
                ],
            }),
        )
        .unwrap();

        assert_eq!(result["createdCount"], 2);
        assert_eq!(result["storeId"], "st-a");

        let conn = db.conn.lock().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM sales", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 2);

        // Every created record starts pending, credited to the cashier
        let pending: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sales WHERE approval_status = 'pending' AND entered_by = 'u-cash'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(pending, 2);
    }

    #[test]
    fn test_submit_all_zero_rejected() {
        let db = test_db();
        let err = submit_daily_sales(
            &db,
            &serde_json::json!({
                "actingUserId": "u-cash",
                "saleDate": "2026-08-28",
                "slots": [
                    { "tenderType": "cash", "amount": 0.0 },
                    { "tenderType": "upi", "amount": 0.0 },
                ],
            }),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        let conn = db.conn.lock().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM sales", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0, "no records on a rejected batch");
    }

    #[test]
    fn test_all_store_role_must_name_store() {
        let db = test_db();
        let err = submit_daily_sales(
            &db,
            &serde_json::json!({
                "actingUserId": "u-acc",
                "saleDate": "2026-08-28",
                "slots": [{ "tenderType": "cash", "amount": 10.0 }],
            }),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        // Naming an inactive store is also a validation failure
        let err = submit_daily_sales(
            &db,
            &serde_json::json!({
                "actingUserId": "u-acc",
                "storeId": "st-closed",
                "saleDate": "2026-08-28",
                "slots": [{ "tenderType": "cash", "amount": 10.0 }],
            }),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        // Active store works
        let result = submit_daily_sales(
            &db,
            &serde_json::json!({
                "actingUserId": "u-acc",
                "storeId": "st-b",
                "saleDate": "2026-08-28",
                "slots": [{ "tenderType": "cash", "amount": 10.0 }],
            }),
        )
        .unwrap();
        assert_eq!(result["storeId"], "st-b");
    }

    #[test]
    fn test_cashier_cannot_submit_for_other_store() {
        let db = test_db();
        let err = submit_daily_sales(
            &db,
            &serde_json::json!({
                "actingUserId": "u-cash",
                "storeId": "st-b",
                "saleDate": "2026-08-28",
                "slots": [{ "tenderType": "cash", "amount": 10.0 }],
            }),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Forbidden(_)));
    }

    #[test]
    fn test_unknown_tender_type_rejected() {
        let db = test_db();
        let err = submit_daily_sales(
            &db,
            &serde_json::json!({
                "actingUserId": "u-cash",
                "saleDate": "2026-08-28",
                "slots": [{ "tenderType": "cheque", "amount": 10.0 }],
            }),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn test_bad_date_rejected() {
        let db = test_db();
        let err = submit_daily_sales(
            &db,
            &serde_json::json!({
                "actingUserId": "u-cash",
                "saleDate": "28/08/2026",
                "slots": [{ "tenderType": "cash", "amount": 10.0 }],
            }),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn test_list_scoped_by_role() {
        let db = test_db();
        submit_daily_sales(
            &db,
            &serde_json::json!({
                "actingUserId": "u-cash",
                "saleDate": "2026-08-28",
                "slots": [{ "tenderType": "cash", "amount": 100.0 }],
            }),
        )
        .unwrap();
        submit_daily_sales(
            &db,
            &serde_json::json!({
                "actingUserId": "u-acc",
                "storeId": "st-b",
                "saleDate": "2026-08-28",
                "slots": [{ "tenderType": "upi", "amount": 75.0 }],
            }),
        )
        .unwrap();

        // Cashier sees only their own store
        let result = list_sales(
            &db,
            &serde_json::json!({ "actingUserId": "u-cash" }),
        )
        .unwrap();
        let sales = result["sales"].as_array().unwrap();
        assert_eq!(sales.len(), 1);
        assert_eq!(sales[0]["storeId"], "st-a");

        // Accounts in-charge with no filter sees every store
        let result = list_sales(&db, &serde_json::json!({ "actingUserId": "u-acc" })).unwrap();
        assert_eq!(result["sales"].as_array().unwrap().len(), 2);

        // Same user narrowed to st-b sees one record
        let result = list_sales(
            &db,
            &serde_json::json!({ "actingUserId": "u-acc", "storeId": "st-b" }),
        )
        .unwrap();
        let sales = result["sales"].as_array().unwrap();
        assert_eq!(sales.len(), 1);
        assert_eq!(sales[0]["tenderType"], "upi");
    }
}
