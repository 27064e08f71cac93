//! Store master data and the in-process store cache.
//!
//! Store CRUD is super-user only. Stores are deactivated, never
//! deleted: transactional records keep referencing them for reporting.
//! Store codes are short uppercase alphanumerics (e.g. `BLR01`) and
//! unique across the chain.
//!
//! The store list changes rarely but is read constantly (every scope
//! resolution, every store selector), so callers hold a [`StoreCache`]
//! and refresh it when stale. Freshness is judged against an injected
//! clock so the expiry rule itself needs no wall time.

use chrono::{DateTime, Duration, Utc};
use rusqlite::params;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::access;
use crate::db::DbState;
use crate::errors::DomainError;

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

/// Default cache lifetime. Store master data moves slowly.
pub const STORE_CACHE_TTL_SECS: i64 = 300;

/// A snapshot of the store list with the instant it was fetched.
#[derive(Debug, Clone)]
pub struct StoreCache {
    pub data: Vec<Value>,
    pub fetched_at: DateTime<Utc>,
}

impl StoreCache {
    /// Whether the snapshot is still usable at `now`.
    pub fn is_fresh(&self, now: DateTime<Utc>, ttl_secs: i64) -> bool {
        now - self.fetched_at < Duration::seconds(ttl_secs)
    }

    /// Load a fresh snapshot of active stores.
    pub fn refresh(db: &DbState, now: DateTime<Utc>) -> Result<StoreCache, DomainError> {
        let conn = db.conn.lock().map_err(|e| DomainError::Storage(e.to_string()))?;
        let data = query_stores(&conn, true)?;
        Ok(StoreCache {
            data,
            fetched_at: now,
        })
    }
}

// ---------------------------------------------------------------------------
// CRUD
// ---------------------------------------------------------------------------

/// Create a new store.
///
/// Payload: `{ actingUserId, storeCode, name, address?,
/// pettyCashLimit? }`. Super-user only.
pub fn create_store(db: &DbState, payload: &Value) -> Result<Value, DomainError> {
    let conn = db.conn.lock().map_err(|e| DomainError::Storage(e.to_string()))?;

    let actor = require_store_admin(&conn, payload)?;

    let store_code = crate::value_str(payload, &["storeCode", "store_code"])
        .ok_or_else(|| DomainError::validation("Store code is required"))?
        .trim()
        .to_uppercase();
    validate_store_code(&store_code)?;

    let name = crate::value_str(payload, &["name"])
        .ok_or_else(|| DomainError::validation("Store name is required"))?;
    if name.trim().is_empty() {
        return Err(DomainError::validation("Store name is required"));
    }

    let petty_cash_limit =
        crate::value_f64(payload, &["pettyCashLimit", "petty_cash_limit"]).unwrap_or(0.0);
    if petty_cash_limit < 0.0 {
        return Err(DomainError::validation("Petty cash limit cannot be negative"));
    }

    let duplicate: Option<String> = conn
        .query_row(
            "SELECT id FROM stores WHERE store_code = ?1",
            params![store_code],
            |row| row.get(0),
        )
        .ok();
    if duplicate.is_some() {
        return Err(DomainError::validation(format!(
            "Store code already exists: {store_code}"
        )));
    }

    let address = crate::value_str(payload, &["address"]);
    let id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO stores (id, store_code, name, address, petty_cash_limit,
                             is_active, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?6)",
        params![id, store_code, name, address, petty_cash_limit, now],
    )
    .map_err(|e| DomainError::Storage(format!("insert store: {e}")))?;

    info!(store_id = %id, store_code = %store_code, created_by = %actor.id, "Store created");

    Ok(serde_json::json!({
        "success": true,
        "storeId": id,
        "storeCode": store_code,
    }))
}

/// Update a store's mutable fields (name, address, petty cash limit,
/// manager). Super-user only; the store code is immutable.
pub fn update_store(db: &DbState, payload: &Value) -> Result<Value, DomainError> {
    let conn = db.conn.lock().map_err(|e| DomainError::Storage(e.to_string()))?;

    require_store_admin(&conn, payload)?;

    let store_id = crate::value_str(payload, &["storeId", "store_id"])
        .ok_or_else(|| DomainError::validation("Missing storeId"))?;

    let mut sets: Vec<&str> = Vec::new();
    let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    if let Some(name) = crate::value_str(payload, &["name"]) {
        if name.trim().is_empty() {
            return Err(DomainError::validation("Store name cannot be empty"));
        }
        sets.push("name = ?");
        args.push(Box::new(name));
    }
    if let Some(address) = crate::value_str(payload, &["address"]) {
        sets.push("address = ?");
        args.push(Box::new(address));
    }
    if let Some(limit) = crate::value_f64(payload, &["pettyCashLimit", "petty_cash_limit"]) {
        if limit < 0.0 {
            return Err(DomainError::validation("Petty cash limit cannot be negative"));
        }
        sets.push("petty_cash_limit = ?");
        args.push(Box::new(limit));
    }
    if let Some(manager_id) = crate::value_str(payload, &["managerId", "manager_id"]) {
        let exists: Option<String> = conn
            .query_row(
                "SELECT id FROM users WHERE id = ?1",
                params![manager_id],
                |row| row.get(0),
            )
            .ok();
        if exists.is_none() {
            return Err(DomainError::validation(format!(
                "Manager not found: {manager_id}"
            )));
        }
        sets.push("manager_id = ?");
        args.push(Box::new(manager_id));
    }

    if sets.is_empty() {
        return Err(DomainError::validation("Nothing to update"));
    }

    let sql = format!(
        "UPDATE stores SET {}, updated_at = ? WHERE id = ?",
        sets.join(", ")
    );
    args.push(Box::new(Utc::now().to_rfc3339()));
    args.push(Box::new(store_id.clone()));

    let updated = conn.execute(&sql, rusqlite::params_from_iter(args.iter()))?;
    if updated == 0 {
        return Err(DomainError::not_found(format!("Store not found: {store_id}")));
    }

    info!(store_id = %store_id, "Store updated");
    Ok(serde_json::json!({ "success": true, "storeId": store_id }))
}

/// Deactivate a store. Its records remain; it just stops accepting new
/// entries and disappears from selectors.
pub fn deactivate_store(db: &DbState, payload: &Value) -> Result<Value, DomainError> {
    set_store_active(db, payload, false)
}

/// Reactivate a previously deactivated store.
pub fn reactivate_store(db: &DbState, payload: &Value) -> Result<Value, DomainError> {
    set_store_active(db, payload, true)
}

fn set_store_active(db: &DbState, payload: &Value, active: bool) -> Result<Value, DomainError> {
    let conn = db.conn.lock().map_err(|e| DomainError::Storage(e.to_string()))?;

    require_store_admin(&conn, payload)?;

    let store_id = crate::value_str(payload, &["storeId", "store_id"])
        .ok_or_else(|| DomainError::validation("Missing storeId"))?;

    let updated = conn.execute(
        "UPDATE stores SET is_active = ?1, updated_at = ?2 WHERE id = ?3",
        params![active as i64, Utc::now().to_rfc3339(), store_id],
    )?;
    if updated == 0 {
        return Err(DomainError::not_found(format!("Store not found: {store_id}")));
    }

    info!(store_id = %store_id, active = active, "Store active flag changed");
    Ok(serde_json::json!({
        "success": true,
        "storeId": store_id,
        "isActive": active,
    }))
}

/// List stores visible to the acting user. Single-store roles see
/// their own store; all-store roles see everything, with inactive
/// stores included only when `includeInactive` is set.
pub fn list_stores(db: &DbState, payload: &Value) -> Result<Value, DomainError> {
    let conn = db.conn.lock().map_err(|e| DomainError::Storage(e.to_string()))?;

    let user_id = crate::value_str(payload, &["actingUserId", "acting_user_id"])
        .ok_or_else(|| DomainError::validation("Missing actingUserId"))?;
    let actor = access::load_actor(&conn, &user_id)?;
    let scope = access::visible_store_scope(&actor);

    let include_inactive = payload
        .get("includeInactive")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let stores = if scope.all_stores {
        query_stores(&conn, !include_inactive)?
    } else {
        let own = scope
            .store_id
            .ok_or_else(|| DomainError::forbidden("User has no assigned store"))?;
        query_stores(&conn, true)?
            .into_iter()
            .filter(|s| s["id"].as_str() == Some(own.as_str()))
            .collect()
    };

    Ok(serde_json::json!({ "success": true, "stores": stores }))
}

fn query_stores(conn: &rusqlite::Connection, active_only: bool) -> Result<Vec<Value>, DomainError> {
    let sql = if active_only {
        "SELECT id, store_code, name, address, manager_id, petty_cash_limit, is_active
         FROM stores WHERE is_active = 1 ORDER BY store_code"
    } else {
        "SELECT id, store_code, name, address, manager_id, petty_cash_limit, is_active
         FROM stores ORDER BY store_code"
    };

    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map([], |row| {
        Ok(serde_json::json!({
            "id": row.get::<_, String>(0)?,
            "storeCode": row.get::<_, String>(1)?,
            "name": row.get::<_, String>(2)?,
            "address": row.get::<_, Option<String>>(3)?,
            "managerId": row.get::<_, Option<String>>(4)?,
            "pettyCashLimit": row.get::<_, f64>(5)?,
            "isActive": row.get::<_, i64>(6)? != 0,
        }))
    })?;
    Ok(rows.flatten().collect())
}

fn require_store_admin(
    conn: &rusqlite::Connection,
    payload: &Value,
) -> Result<access::Actor, DomainError> {
    let user_id = crate::value_str(payload, &["actingUserId", "acting_user_id"])
        .ok_or_else(|| DomainError::validation("Missing actingUserId"))?;
    let actor = access::load_actor(conn, &user_id)?;
    if !access::can_manage_stores(actor.role) {
        return Err(DomainError::forbidden(
            "Only super users can manage stores",
        ));
    }
    Ok(actor)
}

fn validate_store_code(code: &str) -> Result<(), DomainError> {
    if code.is_empty() || code.len() > 10 || !code.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(DomainError::validation(format!(
            "Invalid store code: {code} (expected short uppercase alphanumeric)"
        )));
    }
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
