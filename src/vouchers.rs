//! Gift voucher lifecycle.
//!
//! Vouchers are issued `active` and settle in exactly one terminal
//! state: `redeemed`, `expired`, or `cancelled`. Redemption is always
//! for the full remaining balance — the schema carries
//! `current_balance` but no partial-redemption path exists, matching
//! the recorded limitation of the reporting system. `expired` is also
//! reachable through a batch sweep over lapsed expiry dates.
//!
//! Every transition is one conditional UPDATE gated on
//! `status = 'active'`. Whether an expiry date has lapsed is always
//! judged against the server clock (plus the configured grace period),
//! never against anything the caller supplies.

use chrono::{Duration, NaiveDate, Utc};
use rusqlite::params;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::access;
use crate::db::{self, DbState};
use crate::errors::DomainError;
use crate::sales::{parse_entry_date, resolve_target_store};

// ---------------------------------------------------------------------------
// Issue
// ---------------------------------------------------------------------------

/// Issue a new gift voucher.
///
/// Payload: `{ actingUserId, storeId?, voucherNumber, amount,
/// issueDate, expiryDate }`.
pub fn issue_voucher(db: &DbState, payload: &Value) -> Result<Value, DomainError> {
    let conn = db.conn.lock().map_err(|e| DomainError::Storage(e.to_string()))?;

    let user_id = crate::value_str(payload, &["actingUserId", "acting_user_id"])
        .ok_or_else(|| DomainError::validation("Missing actingUserId"))?;
    let actor = access::load_actor(&conn, &user_id)?;

    let store_id = resolve_target_store(&conn, &actor, payload)?;

    let voucher_number = crate::value_str(payload, &["voucherNumber", "voucher_number"])
        .ok_or_else(|| DomainError::validation("Voucher number is required"))?;
    let amount = crate::value_f64(payload, &["amount", "originalAmount", "original_amount"])
        .unwrap_or(0.0);
    if amount <= 0.0 {
        return Err(DomainError::validation("Voucher amount must be positive"));
    }

    let issue_date = parse_entry_date(payload, &["issueDate", "issue_date"])?;
    let expiry_date = parse_entry_date(payload, &["expiryDate", "expiry_date"])?;
    if expiry_date <= issue_date {
        return Err(DomainError::validation(
            "Expiry date must be after the issue date",
        ));
    }

    let duplicate: Option<String> = conn
        .query_row(
            "SELECT id FROM gift_vouchers WHERE voucher_number = ?1",
            params![voucher_number],
            |row| row.get(0),
        )
        .ok();
    if duplicate.is_some() {
        return Err(DomainError::validation(format!(
            "Voucher number already exists: {voucher_number}"
        )));
    }

    let id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO gift_vouchers (
            id, voucher_number, store_id, original_amount, current_balance,
            issue_date, expiry_date, status, issued_by, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?4, ?5, ?6, 'active', ?7, ?8, ?8)",
        params![
            id,
            voucher_number,
            store_id,
            amount,
            issue_date,
            expiry_date,
            actor.id,
            now,
        ],
    )
    .map_err(|e| DomainError::Storage(format!("insert voucher: {e}")))?;

    info!(
        voucher_number = %voucher_number,
        store_id = %store_id,
        amount = amount,
        "Gift voucher issued"
    );

    Ok(serde_json::json!({
        "success": true,
        "voucherId": id,
        "voucherNumber": voucher_number,
        "status": "active",
        "currentBalance": amount,
    }))
}

// ---------------------------------------------------------------------------
// Redeem / cancel
// ---------------------------------------------------------------------------

/// Redeem a voucher for its full remaining balance.
///
/// Payload: `{ actingUserId, voucherNumber }`. Requires the voucher to
/// be `active` with `expiry_date` not lapsed as of today on the server
/// clock; balance drops to exactly 0 in the same update that flips the
/// status.
pub fn redeem_voucher(db: &DbState, payload: &Value) -> Result<Value, DomainError> {
    let conn = db.conn.lock().map_err(|e| DomainError::Storage(e.to_string()))?;

    let user_id = crate::value_str(payload, &["actingUserId", "acting_user_id"])
        .ok_or_else(|| DomainError::validation("Missing actingUserId"))?;
    let actor = access::load_actor(&conn, &user_id)?;

    let voucher_number = crate::value_str(payload, &["voucherNumber", "voucher_number"])
        .ok_or_else(|| DomainError::validation("Missing voucherNumber"))?;

    let (store_id, balance): (String, f64) = conn
        .query_row(
            "SELECT store_id, current_balance FROM gift_vouchers WHERE voucher_number = ?1",
            params![voucher_number],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .map_err(|_| DomainError::not_found(format!("Voucher not found: {voucher_number}")))?;

    let scope = access::visible_store_scope(&actor);
    access::authorize_store(&scope, &store_id)?;

    let cutoff = expiry_cutoff(&conn, Utc::now().date_naive());
    let now = Utc::now().to_rfc3339();
    let updated = conn.execute(
        "UPDATE gift_vouchers SET
            status = 'redeemed', current_balance = 0, redeemed_at = ?1, updated_at = ?1
         WHERE voucher_number = ?2 AND status = 'active' AND expiry_date >= ?3",
        params![now, voucher_number, cutoff],
    )?;

    if updated == 0 {
        let (status, expiry): (String, String) = conn.query_row(
            "SELECT status, expiry_date FROM gift_vouchers WHERE voucher_number = ?1",
            params![voucher_number],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        if status != "active" {
            return Err(DomainError::invalid_state(format!(
                "Voucher {voucher_number} is already {status}"
            )));
        }
        return Err(DomainError::invalid_state(format!(
            "Voucher {voucher_number} expired on {expiry}"
        )));
    }

    info!(
        voucher_number = %voucher_number,
        redeemed_amount = balance,
        "Gift voucher redeemed"
    );

    Ok(serde_json::json!({
        "success": true,
        "voucherNumber": voucher_number,
        "status": "redeemed",
        "redeemedAmount": balance,
        "currentBalance": 0.0,
    }))
}

/// Cancel an active voucher.
///
/// Payload: `{ actingUserId, voucherNumber, reason? }`.
pub fn cancel_voucher(db: &DbState, payload: &Value) -> Result<Value, DomainError> {
    let conn = db.conn.lock().map_err(|e| DomainError::Storage(e.to_string()))?;

    let user_id = crate::value_str(payload, &["actingUserId", "acting_user_id"])
        .ok_or_else(|| DomainError::validation("Missing actingUserId"))?;
    let actor = access::load_actor(&conn, &user_id)?;

    let voucher_number = crate::value_str(payload, &["voucherNumber", "voucher_number"])
        .ok_or_else(|| DomainError::validation("Missing voucherNumber"))?;
    let reason = crate::value_str(payload, &["reason", "cancellationReason"]);

    let store_id: String = conn
        .query_row(
            "SELECT store_id FROM gift_vouchers WHERE voucher_number = ?1",
            params![voucher_number],
            |row| row.get(0),
        )
        .map_err(|_| DomainError::not_found(format!("Voucher not found: {voucher_number}")))?;

    let scope = access::visible_store_scope(&actor);
    access::authorize_store(&scope, &store_id)?;

    let now = Utc::now().to_rfc3339();
    let updated = conn.execute(
        "UPDATE gift_vouchers SET status = 'cancelled', cancellation_reason = ?1, updated_at = ?2
         WHERE voucher_number = ?3 AND status = 'active'",
        params![reason, now, voucher_number],
    )?;

    if updated == 0 {
        let status: String = conn.query_row(
            "SELECT status FROM gift_vouchers WHERE voucher_number = ?1",
            params![voucher_number],
            |row| row.get(0),
        )?;
        return Err(DomainError::invalid_state(format!(
            "Voucher {voucher_number} is already {status}"
        )));
    }

    info!(voucher_number = %voucher_number, "Gift voucher cancelled");

    Ok(serde_json::json!({
        "success": true,
        "voucherNumber": voucher_number,
        "status": "cancelled",
    }))
}

// ---------------------------------------------------------------------------
// Expiry sweep
// ---------------------------------------------------------------------------

/// Batch job: expire every active voucher whose expiry date (plus the
/// grace period) has lapsed.
///
/// Payload: `{ asOf? }` — defaults to today. The override exists for
/// the scheduled end-of-day job, which sweeps for the trading date
/// being closed rather than the calendar date it happens to run on.
pub fn update_expired(db: &DbState, payload: &Value) -> Result<Value, DomainError> {
    let conn = db.conn.lock().map_err(|e| DomainError::Storage(e.to_string()))?;

    let as_of = match crate::value_str(payload, &["asOf", "as_of"]) {
        Some(_) => parse_entry_date(payload, &["asOf", "as_of"])?,
        None => Utc::now().date_naive().format("%Y-%m-%d").to_string(),
    };
    let as_of_date = NaiveDate::parse_from_str(&as_of, "%Y-%m-%d")
        .map_err(|_| DomainError::validation(format!("Invalid date: {as_of}")))?;
    let cutoff = expiry_cutoff(&conn, as_of_date);

    let now = Utc::now().to_rfc3339();
    let expired = conn.execute(
        "UPDATE gift_vouchers SET status = 'expired', updated_at = ?1
         WHERE status = 'active' AND expiry_date < ?2",
        params![now, cutoff],
    )?;

    info!(expired = expired, as_of = %as_of, "Expired lapsed gift vouchers");

    Ok(serde_json::json!({
        "success": true,
        "expiredCount": expired,
        "asOf": as_of,
    }))
}

/// Look up a voucher by number.
///
/// Payload: `{ actingUserId, voucherNumber }`. The voucher's store
/// must be inside the acting user's scope.
pub fn get_voucher(db: &DbState, payload: &Value) -> Result<Value, DomainError> {
    let conn = db.conn.lock().map_err(|e| DomainError::Storage(e.to_string()))?;

    let user_id = crate::value_str(payload, &["actingUserId", "acting_user_id"])
        .ok_or_else(|| DomainError::validation("Missing actingUserId"))?;
    let actor = access::load_actor(&conn, &user_id)?;

    let voucher_number = crate::value_str(payload, &["voucherNumber", "voucher_number"])
        .ok_or_else(|| DomainError::validation("Missing voucherNumber"))?;

    let voucher = conn
        .query_row(
            "SELECT id, voucher_number, store_id, original_amount, current_balance,
                    issue_date, expiry_date, status, redeemed_at
             FROM gift_vouchers WHERE voucher_number = ?1",
            params![voucher_number],
            |row| {
                Ok(serde_json::json!({
                    "id": row.get::<_, String>(0)?,
                    "voucherNumber": row.get::<_, String>(1)?,
                    "storeId": row.get::<_, String>(2)?,
                    "originalAmount": row.get::<_, f64>(3)?,
                    "currentBalance": row.get::<_, f64>(4)?,
                    "issueDate": row.get::<_, String>(5)?,
                    "expiryDate": row.get::<_, String>(6)?,
                    "status": row.get::<_, String>(7)?,
                    "redeemedAt": row.get::<_, Option<String>>(8)?,
                }))
            },
        )
        .map_err(|_| DomainError::not_found(format!("Voucher not found: {voucher_number}")))?;

    let scope = access::visible_store_scope(&actor);
    access::authorize_store(&scope, voucher["storeId"].as_str().unwrap_or_default())?;

    Ok(voucher)
}

/// Earliest expiry date still honored at `as_of`.
///
/// Vouchers stay redeemable for a configurable number of days past
/// their printed expiry (`vouchers/expiry_grace_days` setting,
/// default 0).
fn expiry_cutoff(conn: &rusqlite::Connection, as_of: NaiveDate) -> String {
    let grace_days = db::get_setting(conn, "vouchers", "expiry_grace_days")
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(0);
    (as_of - Duration::days(grace_days))
        .format("%Y-%m-%d")
        .to_string()
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
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
                 VALUES ('u-other', 'Kiran', 'kiran@example.com', 'cashier', 'st-b');",
        )
        .expect("seed");
        DbState {
            conn: Mutex::new(conn),
            db_path: PathBuf::from(":memory:"),
        }
    }

    fn issue(db: &DbState, number: &str, issue_date: &str, expiry_date: &str) {
        issue_voucher(
            db,
            &serde_json::json!({
                "actingUserId": "u-cash",
                "voucherNumber": number,
                "amount": 500.0,
                "issueDate": issue_date,
                "expiryDate": expiry_date,
            }),
        )
        .unwrap();
    }

    fn fetch(db: &DbState, number: &str) -> Value {
        get_voucher(
            db,
            &serde_json::json!({ "actingUserId": "u-cash", "voucherNumber": number }),
        )
        .unwrap()
    }

    #[test]
    fn test_issue_and_redeem_full_balance() {
        let db = test_db();
        issue(&db, "GV-1001", "2026-08-01", "2099-12-31");

        let result = redeem_voucher(
            &db,
            &serde_json::json!({
                "actingUserId": "u-cash",
                "voucherNumber": "GV-1001",
            }),
        )
        .unwrap();
        assert_eq!(result["redeemedAmount"], 500.0);
        assert_eq!(result["currentBalance"], 0.0);

        let voucher = fetch(&db, "GV-1001");
        assert_eq!(voucher["status"], "redeemed");
        assert_eq!(voucher["currentBalance"], 0.0);
        assert!(voucher["redeemedAt"].as_str().is_some());
    }

    #[test]
    fn test_redeem_twice_rejected() {
        let db = test_db();
        issue(&db, "GV-1002", "2026-08-01", "2099-12-31");

        let payload = serde_json::json!({
            "actingUserId": "u-cash",
            "voucherNumber": "GV-1002",
        });
        redeem_voucher(&db, &payload).unwrap();

        let err = redeem_voucher(&db, &payload).unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
        assert!(err.to_string().contains("already redeemed"));
    }

    #[test]
    fn test_redeem_past_expiry_rejected_without_mutation() {
        let db = test_db();
        issue(&db, "GV-1003", "2020-01-01", "2020-06-30");

        // A backdated asOf in the payload must not move the clock
        let err = redeem_voucher(
            &db,
            &serde_json::json!({
                "actingUserId": "u-cash",
                "voucherNumber": "GV-1003",
                "asOf": "2020-02-01",
            }),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
        assert!(err.to_string().contains("expired on 2020-06-30"));

        // Balance untouched by the failed redemption
        let voucher = fetch(&db, "GV-1003");
        assert_eq!(voucher["status"], "active");
        assert_eq!(voucher["currentBalance"], 500.0);
    }

    #[test]
    fn test_expiry_grace_period_setting() {
        let db = test_db();
        issue(&db, "GV-1004", "2020-01-01", "2020-06-30");

        let payload = serde_json::json!({
            "actingUserId": "u-cash",
            "voucherNumber": "GV-1004",
        });
        let err = redeem_voucher(&db, &payload).unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));

        // A generous grace period keeps the old expiry honored
        {
            let conn = db.conn.lock().unwrap();
            db::set_setting(&conn, "vouchers", "expiry_grace_days", "100000").unwrap();
        }
        let result = redeem_voucher(&db, &payload).unwrap();
        assert_eq!(result["status"], "redeemed");
    }

    #[test]
    fn test_duplicate_number_rejected() {
        let db = test_db();
        issue(&db, "GV-1005", "2026-08-01", "2099-12-31");

        let err = issue_voucher(
            &db,
            &serde_json::json!({
                "actingUserId": "u-cash",
                "voucherNumber": "GV-1005",
                "amount": 200.0,
                "issueDate": "2026-08-02",
                "expiryDate": "2099-12-31",
            }),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn test_expiry_before_issue_rejected() {
        let db = test_db();
        let err = issue_voucher(
            &db,
            &serde_json::json!({
                "actingUserId": "u-cash",
                "voucherNumber": "GV-1006",
                "amount": 200.0,
                "issueDate": "2026-08-01",
                "expiryDate": "2026-08-01",
            }),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn test_cancel_only_from_active() {
        let db = test_db();
        issue(&db, "GV-1007", "2026-08-01", "2099-12-31");

        cancel_voucher(
            &db,
            &serde_json::json!({
                "actingUserId": "u-cash",
                "voucherNumber": "GV-1007",
                "reason": "Issued in error",
            }),
        )
        .unwrap();

        let err = redeem_voucher(
            &db,
            &serde_json::json!({
                "actingUserId": "u-cash",
                "voucherNumber": "GV-1007",
            }),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
    }

    #[test]
    fn test_get_voucher_scope_enforced() {
        let db = test_db();
        issue(&db, "GV-1008", "2026-08-01", "2099-12-31");

        // Own-store cashier reads it
        assert_eq!(fetch(&db, "GV-1008")["voucherNumber"], "GV-1008");

        // Cashier of another store may not
        let err = get_voucher(
            &db,
            &serde_json::json!({ "actingUserId": "u-other", "voucherNumber": "GV-1008" }),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Forbidden(_)));

        // No acting user, no lookup
        let err = get_voucher(&db, &serde_json::json!({ "voucherNumber": "GV-1008" }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn test_update_expired_sweep() {
        let db = test_db();
        issue(&db, "GV-A", "2026-01-01", "2026-06-30");
        issue(&db, "GV-B", "2026-01-01", "2026-12-31");
        issue(&db, "GV-C", "2026-01-01", "2099-12-31");

        // Redeemed vouchers are left alone by the sweep
        redeem_voucher(
            &db,
            &serde_json::json!({
                "actingUserId": "u-cash",
                "voucherNumber": "GV-C",
            }),
        )
        .unwrap();

        let result = update_expired(&db, &serde_json::json!({ "asOf": "2026-08-28" })).unwrap();
        assert_eq!(result["expiredCount"], 1);

        assert_eq!(fetch(&db, "GV-A")["status"], "expired");
        assert_eq!(fetch(&db, "GV-B")["status"], "active");
        assert_eq!(fetch(&db, "GV-C")["status"], "redeemed");
    }

    #[test]
    fn test_sweep_honors_grace_period() {
        let db = test_db();
        issue(&db, "GV-G", "2026-01-01", "2026-08-20");
        {
            let conn = db.conn.lock().unwrap();
            db::set_setting(&conn, "vouchers", "expiry_grace_days", "10").unwrap();
        }

        // Expired 8 days before the sweep date: still inside grace
        let result = update_expired(&db, &serde_json::json!({ "asOf": "2026-08-28" })).unwrap();
        assert_eq!(result["expiredCount"], 0);

        let result = update_expired(&db, &serde_json::json!({ "asOf": "2026-09-01" })).unwrap();
        assert_eq!(result["expiredCount"], 1);
    }
}
