//! Sales order recording.
//!
//! A sales order is a customer commitment taken before billing, with
//! an optional advance payment. Unlike hand bills, the customer is
//! mandatory. Orders stay `pending` until converted against an ERP
//! bill or cancelled (see `convertibles`); pending orders older than a
//! week show as overdue.

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

/// Record a new sales order.
///
/// Payload: `{ actingUserId, storeId?, customerId, orderDate,
/// totalAmount, advancePaid? }`.
pub fn create_sales_order(db: &DbState, payload: &Value) -> Result<Value, DomainError> {
    let conn = db.conn.lock().map_err(|e| DomainError::Storage(e.to_string()))?;

    let user_id = crate::value_str(payload, &["actingUserId", "acting_user_id"])
        .ok_or_else(|| DomainError::validation("Missing actingUserId"))?;
    let actor = access::load_actor(&conn, &user_id)?;

    let store_id = resolve_target_store(&conn, &actor, payload)?;
    let order_date = parse_entry_date(payload, &["orderDate", "order_date"])?;

    let customer_id = crate::value_str(payload, &["customerId", "customer_id"])
        .ok_or_else(|| DomainError::validation("Customer is required for a sales order"))?;
    let exists: Option<String> = conn
        .query_row(
            "SELECT id FROM customers WHERE id = ?1",
            params![customer_id],
            |row| row.get(0),
        )
        .ok();
    if exists.is_none() {
        return Err(DomainError::validation(format!(
            "Customer not found: {customer_id}"
        )));
    }

    let total_amount = crate::value_f64(payload, &["totalAmount", "total_amount"]).unwrap_or(0.0);
    if total_amount <= 0.0 {
        return Err(DomainError::validation("Total amount must be positive"));
    }
    let advance_paid = crate::value_f64(payload, &["advancePaid", "advance_paid"]).unwrap_or(0.0);
    if advance_paid < 0.0 {
        return Err(DomainError::validation("Advance paid cannot be negative"));
    }
    if advance_paid > total_amount {
        return Err(DomainError::validation(
            "Advance paid cannot exceed the total amount",
        ));
    }

    let id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO sales_orders (
            id, store_id, customer_id, order_date, total_amount, advance_paid,
            status, entered_by, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7, ?8, ?8)",
        params![
            id,
            store_id,
            customer_id,
            order_date,
            total_amount,
            advance_paid,
            actor.id,
            now,
        ],
    )
    .map_err(|e| DomainError::Storage(format!("insert sales order: {e}")))?;

    info!(
        sales_order_id = %id,
        store_id = %store_id,
        total_amount = total_amount,
        advance_paid = advance_paid,
        "Sales order recorded"
    );

    Ok(serde_json::json!({
        "success": true,
        "salesOrderId": id,
        "storeId": store_id,
        "status": "pending",
        "balanceDue": total_amount - advance_paid,
    }))
}

/// List sales orders in scope, with the derived overdue flag and
/// balance due.
pub fn list_sales_orders(db: &DbState, payload: &Value) -> Result<Value, DomainError> {
    let conn = db.conn.lock().map_err(|e| DomainError::Storage(e.to_string()))?;

    let user_id = crate::value_str(payload, &["actingUserId", "acting_user_id"])
        .ok_or_else(|| DomainError::validation("Missing actingUserId"))?;
    let actor = access::load_actor(&conn, &user_id)?;

    let requested = crate::value_str(payload, &["storeId", "store_id"]);
    let scope = access::resolve_scope(&conn, &actor, requested.as_deref())?;

    let mut sql = String::from(
        "SELECT id, store_id, customer_id, order_date, total_amount, advance_paid,
                status, erp_sale_bill_number, created_at
         FROM sales_orders WHERE 1=1",
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
    sql.push_str(" ORDER BY order_date DESC, created_at DESC");

    let threshold = Convertible::SalesOrder.overdue_threshold_days();
    let now = Utc::now();

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), |row| {
        let order_date: String = row.get(3)?;
        let total_amount: f64 = row.get(4)?;
        let advance_paid: f64 = row.get(5)?;
        let status: String = row.get(6)?;
        let overdue = status == "pending" && is_overdue(&order_date, threshold, now);
        Ok(serde_json::json!({
            "id": row.get::<_, String>(0)?,
            "storeId": row.get::<_, String>(1)?,
            "customerId": row.get::<_, String>(2)?,
            "orderDate": order_date,
            "totalAmount": total_amount,
            "advancePaid": advance_paid,
            "balanceDue": total_amount - advance_paid,
            "status": status,
            "erpSaleBillNumber": row.get::<_, Option<String>>(7)?,
            "createdAt": row.get::<_, Option<String>>(8)?,
            "isOverdue": overdue,
        }))
    })?;

    let orders: Vec<Value> = rows.flatten().collect();
    Ok(serde_json::json!({ "success": true, "salesOrders": orders }))
}

// ===========================================================================
// Tests
// ===========================================================================
