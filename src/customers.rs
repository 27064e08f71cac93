//! Customer master data.
//!
//! Customers are shared across the chain and looked up by phone
//! number, which is unique. Any active user may create or edit them;
//! there is no approval workflow on master data.

use chrono::Utc;
use rusqlite::params;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::access;
use crate::db::DbState;
use crate::errors::DomainError;

/// Create a customer.
///
/// Payload: `{ actingUserId, name, phone, email?, address? }`.
pub fn create_customer(db: &DbState, payload: &Value) -> Result<Value, DomainError> {
    let conn = db.conn.lock().map_err(|e| DomainError::Storage(e.to_string()))?;

    let user_id = crate::value_str(payload, &["actingUserId", "acting_user_id"])
        .ok_or_else(|| DomainError::validation("Missing actingUserId"))?;
    let actor = access::load_actor(&conn, &user_id)?;

    let name = crate::value_str(payload, &["name"])
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| DomainError::validation("Customer name is required"))?;
    let phone = normalize_phone(
        &crate::value_str(payload, &["phone"])
            .ok_or_else(|| DomainError::validation("Phone number is required"))?,
    )?;

    let duplicate: Option<String> = conn
        .query_row(
            "SELECT id FROM customers WHERE phone = ?1",
            params![phone],
            |row| row.get(0),
        )
        .ok();
    if duplicate.is_some() {
        return Err(DomainError::validation(format!(
            "A customer with phone {phone} already exists"
        )));
    }

    let email = crate::value_str(payload, &["email"]);
    let address = crate::value_str(payload, &["address"]);

    let id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO customers (id, name, phone, email, address, store_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
        params![id, name, phone, email, address, actor.store_id, now],
    )
    .map_err(|e| DomainError::Storage(format!("insert customer: {e}")))?;

    info!(customer_id = %id, created_by = %actor.id, "Customer created");

    Ok(serde_json::json!({
        "success": true,
        "customerId": id,
        "phone": phone,
    }))
}

/// Update a customer's name, phone, email, or address.
pub fn update_customer(db: &DbState, payload: &Value) -> Result<Value, DomainError> {
    let conn = db.conn.lock().map_err(|e| DomainError::Storage(e.to_string()))?;

    let user_id = crate::value_str(payload, &["actingUserId", "acting_user_id"])
        .ok_or_else(|| DomainError::validation("Missing actingUserId"))?;
    access::load_actor(&conn, &user_id)?;

    let customer_id = crate::value_str(payload, &["customerId", "customer_id"])
        .ok_or_else(|| DomainError::validation("Missing customerId"))?;

    let mut sets: Vec<&str> = Vec::new();
    let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    if let Some(name) = crate::value_str(payload, &["name"]) {
        if name.trim().is_empty() {
            return Err(DomainError::validation("Customer name cannot be empty"));
        }
        sets.push("name = ?");
        args.push(Box::new(name));
    }
    if let Some(raw_phone) = crate::value_str(payload, &["phone"]) {
        let phone = normalize_phone(&raw_phone)?;
        let taken: Option<String> = conn
            .query_row(
                "SELECT id FROM customers WHERE phone = ?1 AND id != ?2",
                params![phone, customer_id],
                |row| row.get(0),
            )
            .ok();
        if taken.is_some() {
            return Err(DomainError::validation(format!(
                "A customer with phone {phone} already exists"
            )));
        }
        sets.push("phone = ?");
        args.push(Box::new(phone));
    }
    if let Some(email) = crate::value_str(payload, &["email"]) {
        sets.push("email = ?");
        args.push(Box::new(email));
    }
    if let Some(address) = crate::value_str(payload, &["address"]) {
        sets.push("address = ?");
        args.push(Box::new(address));
    }

    if sets.is_empty() {
        return Err(DomainError::validation("Nothing to update"));
    }

    let sql = format!(
        "UPDATE customers SET {}, updated_at = ? WHERE id = ?",
        sets.join(", ")
    );
    args.push(Box::new(Utc::now().to_rfc3339()));
    args.push(Box::new(customer_id.clone()));

    let updated = conn.execute(&sql, rusqlite::params_from_iter(args.iter()))?;
    if updated == 0 {
        return Err(DomainError::not_found(format!(
            "Customer not found: {customer_id}"
        )));
    }

    info!(customer_id = %customer_id, "Customer updated");
    Ok(serde_json::json!({ "success": true, "customerId": customer_id }))
}

/// List customers, optionally matching a name or phone search term.
pub fn list_customers(db: &DbState, payload: &Value) -> Result<Value, DomainError> {
    let conn = db.conn.lock().map_err(|e| DomainError::Storage(e.to_string()))?;

    let user_id = crate::value_str(payload, &["actingUserId", "acting_user_id"])
        .ok_or_else(|| DomainError::validation("Missing actingUserId"))?;
    access::load_actor(&conn, &user_id)?;

    let mut sql = String::from(
        "SELECT id, name, phone, email, address FROM customers WHERE 1=1",
    );
    let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    if let Some(term) = crate::value_str(payload, &["search"]) {
        sql.push_str(" AND (name LIKE ? OR phone LIKE ?)");
        let pattern = format!("%{}%", term.trim());
        args.push(Box::new(pattern.clone()));
        args.push(Box::new(pattern));
    }
    sql.push_str(" ORDER BY name");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), |row| {
        Ok(serde_json::json!({
            "id": row.get::<_, String>(0)?,
            "name": row.get::<_, String>(1)?,
            "phone": row.get::<_, String>(2)?,
            "email": row.get::<_, Option<String>>(3)?,
            "address": row.get::<_, Option<String>>(4)?,
        }))
    })?;

    let customers: Vec<Value> = rows.flatten().collect();
    Ok(serde_json::json!({ "success": true, "customers": customers }))
}

/// Strip separators and validate the remaining digits.
fn normalize_phone(raw: &str) -> Result<String, DomainError> {
    let digits: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-' && *c != '(' && *c != ')')
        .collect();
    let bare = digits.strip_prefix('+').unwrap_or(&digits);
    if bare.len() < 7 || !bare.chars().all(|c| c.is_ascii_digit()) {
        return Err(DomainError::validation(format!(
            "Invalid phone number: {raw}"
        )));
    }
    Ok(digits)
}

// ===========================================================================
// Tests
// ===========================================================================
