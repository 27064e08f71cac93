//! User administration.
//!
//! Store managers and above manage users; role assignment beyond
//! cashier is super-user only. Two structural rules hold at all times:
//!
//! - cashiers authenticate locally and always belong to a store;
//! - only accounts in-charge and super users may be left without a
//!   store assignment (their scope spans all stores anyway).
//!
//! Users are deactivated, never deleted, so `entered_by` references on
//! historical records stay intact.

use chrono::Utc;
use rusqlite::params;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::access::{self, Role};
use crate::db::DbState;
use crate::errors::DomainError;

const AUTH_TYPES: &[&str] = &["local", "google_sso"];

/// Create a user.
///
/// Payload: `{ actingUserId, name, email, role?, storeId?,
/// authenticationType? }`. Role defaults to cashier; assigning any
/// other role requires a super user.
pub fn create_user(db: &DbState, payload: &Value) -> Result<Value, DomainError> {
    let conn = db.conn.lock().map_err(|e| DomainError::Storage(e.to_string()))?;

    let actor = require_user_admin(&conn, payload)?;

    let name = crate::value_str(payload, &["name"])
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| DomainError::validation("User name is required"))?;
    let email = crate::value_str(payload, &["email"])
        .filter(|e| e.contains('@'))
        .ok_or_else(|| DomainError::validation("A valid email is required"))?
        .to_lowercase();

    let role_str =
        crate::value_str(payload, &["role"]).unwrap_or_else(|| "cashier".to_string());
    let role = Role::parse(&role_str)
        .ok_or_else(|| DomainError::validation(format!("Unknown role: {role_str}")))?;
    if role != Role::Cashier && !access::can_reassign_roles(actor.role) {
        return Err(DomainError::forbidden(
            "Only super users can assign roles above cashier",
        ));
    }

    let auth_type = crate::value_str(payload, &["authenticationType", "authentication_type"])
        .unwrap_or_else(|| "local".to_string());
    if !AUTH_TYPES.contains(&auth_type.as_str()) {
        return Err(DomainError::validation(format!(
            "Unknown authentication type: {auth_type}"
        )));
    }

    let store_id = resolve_user_store(&conn, &actor, payload)?;
    validate_role_constraints(role, &auth_type, store_id.as_deref())?;

    let duplicate: Option<String> = conn
        .query_row(
            "SELECT id FROM users WHERE email = ?1",
            params![email],
            |row| row.get(0),
        )
        .ok();
    if duplicate.is_some() {
        return Err(DomainError::validation(format!(
            "Email already in use: {email}"
        )));
    }

    let id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO users (id, name, email, role, store_id, authentication_type,
                            is_active, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7, ?7)",
        params![id, name, email, role.as_str(), store_id, auth_type, now],
    )
    .map_err(|e| DomainError::Storage(format!("insert user: {e}")))?;

    info!(user_id = %id, role = role.as_str(), created_by = %actor.id, "User created");

    Ok(serde_json::json!({
        "success": true,
        "userId": id,
        "role": role.as_str(),
        "storeId": store_id,
    }))
}

/// Update a user's name, email, store, or role.
///
/// Payload: `{ actingUserId, userId, name?, email?, storeId?, role? }`.
/// Role changes are super-user only and re-checked against the
/// structural rules.
pub fn update_user(db: &DbState, payload: &Value) -> Result<Value, DomainError> {
    let conn = db.conn.lock().map_err(|e| DomainError::Storage(e.to_string()))?;

    let actor = require_user_admin(&conn, payload)?;

    let user_id = crate::value_str(payload, &["userId", "user_id"])
        .ok_or_else(|| DomainError::validation("Missing userId"))?;

    let (current_role_str, current_store, current_auth): (String, Option<String>, String) = conn
        .query_row(
            "SELECT role, store_id, authentication_type FROM users WHERE id = ?1",
            params![user_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .map_err(|_| DomainError::not_found(format!("User not found: {user_id}")))?;
    let current_role = Role::parse(&current_role_str)
        .ok_or_else(|| DomainError::Storage(format!("unknown role in users table: {current_role_str}")))?;

    // Single-store admins may only touch users in their own store
    if !actor.role.has_all_store_scope() && current_store != actor.store_id {
        return Err(DomainError::forbidden(
            "User is outside the acting user's store",
        ));
    }

    let new_role = match crate::value_str(payload, &["role"]) {
        Some(role_str) => {
            let role = Role::parse(&role_str)
                .ok_or_else(|| DomainError::validation(format!("Unknown role: {role_str}")))?;
            if role != current_role && !access::can_reassign_roles(actor.role) {
                return Err(DomainError::forbidden(
                    "Only super users can change a user's role",
                ));
            }
            role
        }
        None => current_role,
    };

    let new_store = match crate::value_str(payload, &["storeId", "store_id"]) {
        Some(sid) => {
            access::require_active_store(&conn, &sid)?;
            if !actor.role.has_all_store_scope() && actor.store_id.as_deref() != Some(sid.as_str()) {
                return Err(DomainError::forbidden(format!(
                    "Store {sid} is outside the acting user's scope"
                )));
            }
            Some(sid)
        }
        None => current_store,
    };

    validate_role_constraints(new_role, &current_auth, new_store.as_deref())?;

    let mut sets: Vec<&str> = vec!["role = ?", "store_id = ?"];
    let mut args: Vec<Box<dyn rusqlite::ToSql>> = vec![
        Box::new(new_role.as_str().to_string()),
        Box::new(new_store.clone()),
    ];

    if let Some(name) = crate::value_str(payload, &["name"]) {
        if name.trim().is_empty() {
            return Err(DomainError::validation("User name cannot be empty"));
        }
        sets.push("name = ?");
        args.push(Box::new(name));
    }
    if let Some(email) = crate::value_str(payload, &["email"]) {
        if !email.contains('@') {
            return Err(DomainError::validation("A valid email is required"));
        }
        let email = email.to_lowercase();
        let taken: Option<String> = conn
            .query_row(
                "SELECT id FROM users WHERE email = ?1 AND id != ?2",
                params![email, user_id],
                |row| row.get(0),
            )
            .ok();
        if taken.is_some() {
            return Err(DomainError::validation(format!(
                "Email already in use: {email}"
            )));
        }
        sets.push("email = ?");
        args.push(Box::new(email));
    }

    let sql = format!(
        "UPDATE users SET {}, updated_at = ? WHERE id = ?",
        sets.join(", ")
    );
    args.push(Box::new(Utc::now().to_rfc3339()));
    args.push(Box::new(user_id.clone()));
    conn.execute(&sql, rusqlite::params_from_iter(args.iter()))?;

    info!(user_id = %user_id, role = new_role.as_str(), "User updated");
    Ok(serde_json::json!({ "success": true, "userId": user_id }))
}

/// Deactivate a user. Historical records keep their reference.
pub fn deactivate_user(db: &DbState, payload: &Value) -> Result<Value, DomainError> {
    let conn = db.conn.lock().map_err(|e| DomainError::Storage(e.to_string()))?;

    let actor = require_user_admin(&conn, payload)?;

    let user_id = crate::value_str(payload, &["userId", "user_id"])
        .ok_or_else(|| DomainError::validation("Missing userId"))?;
    if user_id == actor.id {
        return Err(DomainError::validation("Cannot deactivate yourself"));
    }

    let store_id: Option<String> = conn
        .query_row(
            "SELECT store_id FROM users WHERE id = ?1",
            params![user_id],
            |row| row.get(0),
        )
        .map_err(|_| DomainError::not_found(format!("User not found: {user_id}")))?;
    if !actor.role.has_all_store_scope() && store_id != actor.store_id {
        return Err(DomainError::forbidden(
            "User is outside the acting user's store",
        ));
    }

    conn.execute(
        "UPDATE users SET is_active = 0, updated_at = ?1 WHERE id = ?2",
        params![Utc::now().to_rfc3339(), user_id],
    )?;

    info!(user_id = %user_id, deactivated_by = %actor.id, "User deactivated");
    Ok(serde_json::json!({ "success": true, "userId": user_id }))
}

/// List users visible to the acting user.
pub fn list_users(db: &DbState, payload: &Value) -> Result<Value, DomainError> {
    let conn = db.conn.lock().map_err(|e| DomainError::Storage(e.to_string()))?;

    let actor = require_user_admin(&conn, payload)?;

    let mut sql = String::from(
        "SELECT id, name, email, role, store_id, authentication_type, is_active
         FROM users WHERE 1=1",
    );
    let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    if !actor.role.has_all_store_scope() {
        sql.push_str(" AND store_id = ?");
        args.push(Box::new(actor.store_id.clone()));
    } else if let Some(sid) = crate::value_str(payload, &["storeId", "store_id"]) {
        sql.push_str(" AND store_id = ?");
        args.push(Box::new(sid));
    }
    sql.push_str(" ORDER BY name");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), |row| {
        Ok(serde_json::json!({
            "id": row.get::<_, String>(0)?,
            "name": row.get::<_, String>(1)?,
            "email": row.get::<_, String>(2)?,
            "role": row.get::<_, String>(3)?,
            "storeId": row.get::<_, Option<String>>(4)?,
            "authenticationType": row.get::<_, String>(5)?,
            "isActive": row.get::<_, i64>(6)? != 0,
        }))
    })?;

    let users: Vec<Value> = rows.flatten().collect();
    Ok(serde_json::json!({ "success": true, "users": users }))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn require_user_admin(
    conn: &rusqlite::Connection,
    payload: &Value,
) -> Result<access::Actor, DomainError> {
    let user_id = crate::value_str(payload, &["actingUserId", "acting_user_id"])
        .ok_or_else(|| DomainError::validation("Missing actingUserId"))?;
    let actor = access::load_actor(conn, &user_id)?;
    if !access::can_manage_users(actor.role) {
        return Err(DomainError::forbidden(
            "Only store managers and above can manage users",
        ));
    }
    Ok(actor)
}

/// The store a new user is assigned to: single-store admins always
/// assign to their own store; all-store admins may name any active
/// store or leave it unset.
fn resolve_user_store(
    conn: &rusqlite::Connection,
    actor: &access::Actor,
    payload: &Value,
) -> Result<Option<String>, DomainError> {
    let requested = crate::value_str(payload, &["storeId", "store_id"]);

    if actor.role.has_all_store_scope() {
        if let Some(ref sid) = requested {
            access::require_active_store(conn, sid)?;
        }
        return Ok(requested);
    }

    let own = actor
        .store_id
        .clone()
        .ok_or_else(|| DomainError::forbidden("User has no assigned store"))?;
    if let Some(req) = requested {
        if req != own {
            return Err(DomainError::forbidden(format!(
                "Store {req} is outside the acting user's scope"
            )));
        }
    }
    Ok(Some(own))
}

/// Enforce the role/auth/store structural rules.
fn validate_role_constraints(
    role: Role,
    auth_type: &str,
    store_id: Option<&str>,
) -> Result<(), DomainError> {
    if role == Role::Cashier && auth_type != "local" {
        return Err(DomainError::validation(
            "Cashiers must use local authentication",
        ));
    }
    if store_id.is_none() && !role.has_all_store_scope() {
        return Err(DomainError::validation(format!(
            "Role {} requires a store assignment",
            role.as_str()
        )));
    }
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
