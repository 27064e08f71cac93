//! Daily summary and cash reconciliation.
//!
//! One store, one date. Only approved records count toward the money
//! figures; pending work is surfaced as counts so the approver can see
//! what still blocks the day's close. Expected cash in the drawer is
//! approved cash takings minus approved expenses (petty cash is paid
//! from the drawer) minus cash refunds.

use rusqlite::params;
use serde_json::Value;

use crate::access;
use crate::db::DbState;
use crate::errors::DomainError;
use crate::sales::{parse_entry_date, TENDER_TYPES};

/// Build the daily summary for one store and date.
///
/// Payload: `{ actingUserId, storeId?, date }`. Single-store roles get
/// their own store; all-store roles must name one.
pub fn daily_summary(db: &DbState, payload: &Value) -> Result<Value, DomainError> {
    let conn = db.conn.lock().map_err(|e| DomainError::Storage(e.to_string()))?;

    let user_id = crate::value_str(payload, &["actingUserId", "acting_user_id"])
        .ok_or_else(|| DomainError::validation("Missing actingUserId"))?;
    let actor = access::load_actor(&conn, &user_id)?;

    let store_id = crate::sales::resolve_target_store(&conn, &actor, payload)?;
    let date = parse_entry_date(payload, &["date", "summaryDate", "summary_date"])?;

    // Approved sales, broken out per tender type
    let mut sales_by_tender = serde_json::Map::new();
    let mut total_sales = 0.0;
    for tender in TENDER_TYPES {
        let amount: f64 = conn
            .query_row(
                "SELECT COALESCE(SUM(amount), 0.0) FROM sales
                 WHERE store_id = ?1 AND sale_date = ?2
                   AND tender_type = ?3 AND approval_status = 'approved'",
                params![store_id, date, tender],
                |row| row.get(0),
            )
            .unwrap_or(0.0);
        total_sales += amount;
        sales_by_tender.insert((*tender).to_string(), serde_json::json!(amount));
    }

    let approved_expenses: f64 = conn
        .query_row(
            "SELECT COALESCE(SUM(amount), 0.0) FROM expenses
             WHERE store_id = ?1 AND expense_date = ?2 AND approval_status = 'approved'",
            params![store_id, date],
            |row| row.get(0),
        )
        .unwrap_or(0.0);

    let (returns_total, cash_returns): (f64, f64) = conn
        .query_row(
            "SELECT COALESCE(SUM(return_amount), 0.0),
                    COALESCE(SUM(CASE WHEN payment_method = 'cash' THEN return_amount ELSE 0 END), 0.0)
             FROM returns WHERE store_id = ?1 AND return_date = ?2",
            params![store_id, date],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap_or((0.0, 0.0));

    let vouchers_issued: f64 = conn
        .query_row(
            "SELECT COALESCE(SUM(original_amount), 0.0) FROM gift_vouchers
             WHERE store_id = ?1 AND issue_date = ?2",
            params![store_id, date],
            |row| row.get(0),
        )
        .unwrap_or(0.0);
    let vouchers_redeemed: f64 = conn
        .query_row(
            "SELECT COALESCE(SUM(original_amount), 0.0) FROM gift_vouchers
             WHERE store_id = ?1 AND status = 'redeemed'
               AND substr(redeemed_at, 1, 10) = ?2",
            params![store_id, date],
            |row| row.get(0),
        )
        .unwrap_or(0.0);

    let pending_sales: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sales
             WHERE store_id = ?1 AND sale_date = ?2 AND approval_status = 'pending'",
            params![store_id, date],
            |row| row.get(0),
        )
        .unwrap_or(0);
    let pending_expenses: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM expenses
             WHERE store_id = ?1 AND expense_date = ?2 AND approval_status = 'pending'",
            params![store_id, date],
            |row| row.get(0),
        )
        .unwrap_or(0);
    let pending_hand_bills: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM hand_bills
             WHERE store_id = ?1 AND status = 'pending'",
            params![store_id],
            |row| row.get(0),
        )
        .unwrap_or(0);
    let pending_sales_orders: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sales_orders
             WHERE store_id = ?1 AND status = 'pending'",
            params![store_id],
            |row| row.get(0),
        )
        .unwrap_or(0);

    let cash_sales = sales_by_tender
        .get("cash")
        .and_then(Value::as_f64)
        .unwrap_or(0.0);
    let expected_cash = cash_sales - approved_expenses - cash_returns;

    Ok(serde_json::json!({
        "success": true,
        "storeId": store_id,
        "date": date,
        "sales": {
            "byTenderType": Value::Object(sales_by_tender),
            "total": total_sales,
        },
        "expenses": { "approvedTotal": approved_expenses },
        "returns": { "total": returns_total, "cash": cash_returns },
        "vouchers": { "issued": vouchers_issued, "redeemed": vouchers_redeemed },
        "pending": {
            "sales": pending_sales,
            "expenses": pending_expenses,
            "handBills": pending_hand_bills,
            "salesOrders": pending_sales_orders,
        },
        "expectedCash": expected_cash,
    }))
}

// ===========================================================================
// Tests
// ===========================================================================
