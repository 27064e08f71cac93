//! Conversion lifecycle shared by hand bills and sales orders.
//!
//! Both start `pending` and end in exactly one of two terminal states:
//! `converted` (reconciled against an ERP bill number) or `cancelled`.
//! The transition is one conditional UPDATE gated on `status =
//! 'pending'`, so a record can never be both converted and cancelled.
//!
//! "Overdue" is a derived classification, never stored: a pending hand
//! bill older than 1 day, or a pending sales order older than 7 days,
//! counts as overdue at read time.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::params;
use serde_json::Value;
use tracing::info;

use crate::access;
use crate::db::DbState;
use crate::errors::DomainError;

// ---------------------------------------------------------------------------
// Entity vocabulary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Convertible {
    HandBill,
    SalesOrder,
}

impl Convertible {
    pub fn parse(s: &str) -> Option<Convertible> {
        match s {
            "hand_bill" | "hand_bills" | "handBill" => Some(Convertible::HandBill),
            "sales_order" | "sales_orders" | "salesOrder" => Some(Convertible::SalesOrder),
            _ => None,
        }
    }

    fn table(&self) -> &'static str {
        match self {
            Convertible::HandBill => "hand_bills",
            Convertible::SalesOrder => "sales_orders",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Convertible::HandBill => "hand bill",
            Convertible::SalesOrder => "sales order",
        }
    }

    /// Days a record may stay pending before it reads as overdue.
    pub fn overdue_threshold_days(&self) -> i64 {
        match self {
            Convertible::HandBill => 1,
            Convertible::SalesOrder => 7,
        }
    }
}

/// Whether a pending record dated `record_date` is overdue at `now`.
///
/// Pure; evaluated at read time, never persisted. Unparseable dates
/// read as not overdue.
pub fn is_overdue(record_date: &str, threshold_days: i64, now: DateTime<Utc>) -> bool {
    match NaiveDate::parse_from_str(record_date, "%Y-%m-%d") {
        Ok(date) => (now.date_naive() - date).num_days() > threshold_days,
        Err(_) => false,
    }
}

// ---------------------------------------------------------------------------
// Transitions
// ---------------------------------------------------------------------------

/// Convert a pending record against an ERP bill number.
///
/// Payload: `{ entityType, recordId, erpSaleBillNumber, notes?,
/// actingUserId }`.
pub fn convert(db: &DbState, payload: &Value) -> Result<Value, DomainError> {
    let conn = db.conn.lock().map_err(|e| DomainError::Storage(e.to_string()))?;

    let (entity, record_id, actor) = parse_transition_payload(&conn, payload)?;

    let erp_bill_number = crate::value_str(
        payload,
        &["erpSaleBillNumber", "erp_sale_bill_number", "erpBillNumber"],
    )
    .ok_or_else(|| DomainError::validation("ERP bill number is required for conversion"))?;
    let notes = crate::value_str(payload, &["notes", "conversionNotes", "conversion_notes"]);

    authorize_record_store(&conn, entity, &record_id, &actor)?;

    let now = Utc::now().to_rfc3339();
    let updated = conn.execute(
        &format!(
            "UPDATE {} SET status = 'converted', erp_sale_bill_number = ?1,
                    conversion_notes = ?2, updated_at = ?3
             WHERE id = ?4 AND status = 'pending'",
            entity.table()
        ),
        params![erp_bill_number, notes, now, record_id],
    )?;

    if updated == 0 {
        return Err(already_settled(&conn, entity, &record_id)?);
    }

    info!(
        entity = entity.label(),
        record_id = %record_id,
        erp_bill_number = %erp_bill_number,
        "Converted against ERP bill"
    );

    Ok(serde_json::json!({
        "success": true,
        "recordId": record_id,
        "status": "converted",
        "erpSaleBillNumber": erp_bill_number,
    }))
}

/// Cancel a pending record with an optional reason.
///
/// Payload: `{ entityType, recordId, reason?, actingUserId }`.
pub fn cancel(db: &DbState, payload: &Value) -> Result<Value, DomainError> {
    let conn = db.conn.lock().map_err(|e| DomainError::Storage(e.to_string()))?;

    let (entity, record_id, actor) = parse_transition_payload(&conn, payload)?;
    let reason = crate::value_str(payload, &["reason", "cancellationReason", "cancellation_reason"]);

    authorize_record_store(&conn, entity, &record_id, &actor)?;

    let now = Utc::now().to_rfc3339();
    let updated = conn.execute(
        &format!(
            "UPDATE {} SET status = 'cancelled', cancellation_reason = ?1, updated_at = ?2
             WHERE id = ?3 AND status = 'pending'",
            entity.table()
        ),
        params![reason, now, record_id],
    )?;

    if updated == 0 {
        return Err(already_settled(&conn, entity, &record_id)?);
    }

    info!(
        entity = entity.label(),
        record_id = %record_id,
        "Cancelled"
    );

    Ok(serde_json::json!({
        "success": true,
        "recordId": record_id,
        "status": "cancelled",
    }))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_transition_payload(
    conn: &rusqlite::Connection,
    payload: &Value,
) -> Result<(Convertible, String, access::Actor), DomainError> {
    let entity_str = crate::value_str(payload, &["entityType", "entity_type"])
        .ok_or_else(|| DomainError::validation("Missing entityType"))?;
    let entity = Convertible::parse(&entity_str)
        .ok_or_else(|| DomainError::validation(format!("Unknown entityType: {entity_str}")))?;

    let record_id = crate::value_str(payload, &["recordId", "record_id", "id"])
        .ok_or_else(|| DomainError::validation("Missing recordId"))?;

    let user_id = crate::value_str(payload, &["actingUserId", "acting_user_id"])
        .ok_or_else(|| DomainError::validation("Missing actingUserId"))?;
    let actor = access::load_actor(conn, &user_id)?;

    Ok((entity, record_id, actor))
}

fn authorize_record_store(
    conn: &rusqlite::Connection,
    entity: Convertible,
    record_id: &str,
    actor: &access::Actor,
) -> Result<(), DomainError> {
    let store_id: String = conn
        .query_row(
            &format!("SELECT store_id FROM {} WHERE id = ?1", entity.table()),
            params![record_id],
            |row| row.get(0),
        )
        .map_err(|_| {
            DomainError::not_found(format!("{} not found: {record_id}", entity.label()))
        })?;

    let scope = access::visible_store_scope(actor);
    access::authorize_store(&scope, &store_id)
}

/// Build the `InvalidState` error for a record that is no longer pending.
fn already_settled(
    conn: &rusqlite::Connection,
    entity: Convertible,
    record_id: &str,
) -> Result<DomainError, DomainError> {
    let current: String = conn.query_row(
        &format!("SELECT status FROM {} WHERE id = ?1", entity.table()),
        params![record_id],
        |row| row.get(0),
    )?;
    Ok(DomainError::invalid_state(format!(
        "{} {record_id} is already {current}",
        entity.label()
    )))
}

// ===========================================================================
// Tests
// ===========================================================================
