//! Hand bill recording.
//!
//! A hand bill is a manually written sales slip recorded before ERP
//! entry; it stays `pending` until reconciled with an ERP bill number
//! (see `convertibles`). Pending bills older than a day show as
//! overdue in listings.

use chrono::Utc;
use rusqlite::params;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::access;
use crate::convertibles::{is_overdue, Convertible};
use crate::db::DbState;
use crate::errors::DomainError;
use crate::sales::{parse_entry_date, resolve_target_store};

/// Record a new hand bill.
///
/// Payload: `{ actingUserId, storeId?, customerId?, saleDate, amount,
/// notes? }`. Customer is optional for hand bills.
pub fn create_hand_bill(db: &DbState, payload: &Value) -> Result<Value, DomainError> {
    let conn = db.conn.lock().map_err(|e| DomainError::Storage(e.to_string()))?;

    let user_id = crate::value_str(payload, &["actingUserId", "acting_user_id"])
        .ok_or_else(|| DomainError::validation("Missing actingUserId"))?;
    let actor = access::load_actor(&conn, &user_id)?;

    let store_id = resolve_target_store(&conn, &actor, payload)?;
    let sale_date = parse_entry_date(payload, &["saleDate", "sale_date"])?;

    let amount = crate::value_f64(payload, &["amount"]).unwrap_or(0.0);
    if amount <= 0.0 {
        return Err(DomainError::validation("Amount must be positive"));
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

    let id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO hand_bills (
            id, store_id, customer_id, sale_date, amount,
            status, entered_by, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6, ?7, ?7)",
        params![id, store_id, customer_id, sale_date, amount, actor.id, now],
    )
    .map_err(|e| DomainError::Storage(format!("insert hand bill: {e}")))?;

    info!(
        hand_bill_id = %id,
        store_id = %store_id,
        amount = amount,
        "Hand bill recorded"
    );

    Ok(serde_json::json!({
        "success": true,
        "handBillId": id,
        "storeId": store_id,
        "status": "pending",
    }))
}

/// List hand bills in scope, with the derived overdue flag.
pub fn list_hand_bills(db: &DbState, payload: &Value) -> Result<Value, DomainError> {
    let conn = db.conn.lock().map_err(|e| DomainError::Storage(e.to_string()))?;

    let user_id = crate::value_str(payload, &["actingUserId", "acting_user_id"])
        .ok_or_else(|| DomainError::validation("Missing actingUserId"))?;
    let actor = access::load_actor(&conn, &user_id)?;

    let requested = crate::value_str(payload, &["storeId", "store_id"]);
    let scope = access::resolve_scope(&conn, &actor, requested.as_deref())?;

    let mut sql = String::from(
        "SELECT id, store_id, customer_id, sale_date, amount, status,
                erp_sale_bill_number, cancellation_reason, created_at
         FROM hand_bills WHERE 1=1",
    );
    let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    if let Some(ref sid) = scope.store_id {
        sql.push_str(" AND store_id = ?");
        args.push(Box::new(sid.clone()));
    }
    if let Some(status) = crate::value_str(payload, &["status"]) {
        sql.push_str(" AND status = ?");
        args.push(Box::new(status));
    }
    sql.push_str(" ORDER BY sale_date DESC, created_at DESC");

    let threshold = Convertible::HandBill.overdue_threshold_days();
    let now = Utc::now();

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), |row| {
        let sale_date: String = row.get(3)?;
        let status: String = row.get(5)?;
        let overdue = status == "pending" && is_overdue(&sale_date, threshold, now);
        Ok(serde_json::json!({
            "id": row.get::<_, String>(0)?,
            "storeId": row.get::<_, String>(1)?,
            "customerId": row.get::<_, Option<String>>(2)?,
            "saleDate": sale_date,
            "amount": row.get::<_, f64>(4)?,
            "status": status,
            "erpSaleBillNumber": row.get::<_, Option<String>>(6)?,
            "cancellationReason": row.get::<_, Option<String>>(7)?,
            "createdAt": row.get::<_, Option<String>>(8)?,
            "isOverdue": overdue,
        }))
    })?;

    let hand_bills: Vec<Value> = rows.flatten().collect();
    Ok(serde_json::json!({ "success": true, "handBills": hand_bills }))
}

// ===========================================================================
// Tests
// ===========================================================================
