//! Sales return recording.
//!
//! Returns are final on creation: the refund has already happened at
//! the counter by the time it reaches the daybook, so there is no
//! approval workflow and no status column. They feed the daily summary
//! as a deduction against the day's takings.

use chrono::Utc;
use rusqlite::params;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::access;
use crate::db::DbState;
use crate::errors::DomainError;
use crate::sales::{parse_entry_date, resolve_target_store, TENDER_TYPES};

/// Record a sales return.
///
/// Payload: `{ actingUserId, storeId?, returnDate, amount,
/// paymentMethod, rrnNumber?, reason?, customerId? }`.
pub fn create_return(db: &DbState, payload: &Value) -> Result<Value, DomainError> {
    let conn = db.conn.lock().map_err(|e| DomainError::Storage(e.to_string()))?;

    let user_id = crate::value_str(payload, &["actingUserId", "acting_user_id"])
        .ok_or_else(|| DomainError::validation("Missing actingUserId"))?;
    let actor = access::load_actor(&conn, &user_id)?;

    let store_id = resolve_target_store(&conn, &actor, payload)?;
    let return_date = parse_entry_date(payload, &["returnDate", "return_date"])?;

    let amount = crate::value_f64(payload, &["amount"]).unwrap_or(0.0);
    if amount <= 0.0 {
        return Err(DomainError::validation("Return amount must be positive"));
    }

    let payment_method = crate::value_str(payload, &["paymentMethod", "payment_method"])
        .ok_or_else(|| DomainError::validation("Payment method is required"))?;
    if !TENDER_TYPES.contains(&payment_method.as_str()) {
        return Err(DomainError::validation(format!(
            "Unknown payment method: {payment_method}"
        )));
    }

    let customer_id = crate::value_str(payload, &["customerId", "customer_id"]);
    if let Some(ref cid) = customer_id {
        let exists: Option<String> = conn
            .query_row(
                "SELECT id FROM customers WHERE id = ?1",
                params![cid],
                |row| row.get(0),
            )
            .ok();
        if exists.is_none() {
            return Err(DomainError::validation(format!("Customer not found: {cid}")));
        }
    }

    let rrn_number = crate::value_str(payload, &["rrnNumber", "rrn_number"]);
    let reason = crate::value_str(payload, &["reason"]);

    let id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO returns (
            id, store_id, customer_id, return_date, return_amount, payment_method,
            rrn, reason, entered_by, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
        params![
            id,
            store_id,
            customer_id,
            return_date,
            amount,
            payment_method,
            rrn_number,
            reason,
            actor.id,
            now,
        ],
    )
    .map_err(|e| DomainError::Storage(format!("insert return: {e}")))?;

    info!(
        return_id = %id,
        store_id = %store_id,
        amount = amount,
        payment_method = %payment_method,
        "Sales return recorded"
    );

    Ok(serde_json::json!({
        "success": true,
        "returnId": id,
        "storeId": store_id,
        "amount": amount,
    }))
}

/// List returns visible to the acting user, optionally filtered by
/// store and date.
pub fn list_returns(db: &DbState, payload: &Value) -> Result<Value, DomainError> {
    let conn = db.conn.lock().map_err(|e| DomainError::Storage(e.to_string()))?;

    let user_id = crate::value_str(payload, &["actingUserId", "acting_user_id"])
        .ok_or_else(|| DomainError::validation("Missing actingUserId"))?;
    let actor = access::load_actor(&conn, &user_id)?;

    let requested = crate::value_str(payload, &["storeId", "store_id"]);
    let scope = access::resolve_scope(&conn, &actor, requested.as_deref())?;

    let mut sql = String::from(
        "SELECT id, store_id, customer_id, return_date, return_amount, payment_method,
                rrn, reason, entered_by, created_at
         FROM returns WHERE 1=1",
    );
    let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    if let Some(ref sid) = scope.store_id {
        sql.push_str(" AND store_id = ?");
        args.push(Box::new(sid.clone()));
    }
    if let Some(date) = crate::value_str(payload, &["returnDate", "return_date"]) {
        sql.push_str(" AND return_date = ?");
        args.push(Box::new(date));
    }
    sql.push_str(" ORDER BY return_date DESC, created_at DESC");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), |row| {
        Ok(serde_json::json!({
            "id": row.get::<_, String>(0)?,
            "storeId": row.get::<_, String>(1)?,
            "customerId": row.get::<_, Option<String>>(2)?,
            "returnDate": row.get::<_, String>(3)?,
            "amount": row.get::<_, f64>(4)?,
            "paymentMethod": row.get::<_, String>(5)?,
            "rrnNumber": row.get::<_, Option<String>>(6)?,
            "reason": row.get::<_, Option<String>>(7)?,
            "enteredBy": row.get::<_, String>(8)?,
            "createdAt": row.get::<_, Option<String>>(9)?,
        }))
    })?;

    let returns: Vec<Value> = rows.flatten().collect();
    Ok(serde_json::json!({ "success": true, "returns": returns }))
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
             INSERT INTO users (id, name, email, role, store_id)
                 VALUES ('u-cash', 'Asha', 'asha@example.com', 'cashier', 'st-a');",
        )
        .expect("seed");
        DbState {
            conn: Mutex::new(conn),
            db_path: PathBuf::from(":memory:"),
        }
    }

    #[test]
    fn test_create_return() {
        let db = test_db();
        let result = create_return(
            &db,
            &serde_json::json!({
                "actingUserId": "u-cash",
                "returnDate": "2026-08-28",
                "amount": 450.0,
                "paymentMethod": "cash",
                "reason": "Size exchange refused",
            }),
        )
        .unwrap();
        assert_eq!(result["success"], true);
        assert_eq!(result["amount"], 450.0);
    }

    #[test]
    fn test_unknown_payment_method_rejected() {
        let db = test_db();
        let err = create_return(
            &db,
            &serde_json::json!({
                "actingUserId": "u-cash",
                "returnDate": "2026-08-28",
                "amount": 450.0,
                "paymentMethod": "barter",
            }),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn test_zero_amount_rejected() {
        let db = test_db();
        let err = create_return(
            &db,
            &serde_json::json!({
                "actingUserId": "u-cash",
                "returnDate": "2026-08-28",
                "amount": 0.0,
                "paymentMethod": "cash",
            }),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn test_list_filters_by_date() {
        let db = test_db();
        for (date, amount) in [("2026-08-27", 100.0), ("2026-08-28", 200.0)] {
            create_return(
                &db,
                &serde_json::json!({
                    "actingUserId": "u-cash",
                    "returnDate": date,
                    "amount": amount,
                    "paymentMethod": "upi",
                }),
            )
            .unwrap();
        }

        let result = list_returns(
            &db,
            &serde_json::json!({ "actingUserId": "u-cash", "returnDate": "2026-08-28" }),
        )
        .unwrap();
        let returns = result["returns"].as_array().unwrap();
        assert_eq!(returns.len(), 1);
        assert_eq!(returns[0]["amount"], 200.0);
    }
}
