//! Role-scoped access policy for Store Daybook.
//!
//! Centralizes every role/scope decision so entity handlers never
//! re-implement their own role branching. Two kinds of checks:
//!
//! - **Store scope**: which store(s) a user may read or mutate.
//!   Cashiers and store managers see their own store only. Accounts
//!   in-charge and super users see all stores, optionally narrowed to
//!   one by an explicit per-request filter (a filter, not an
//!   escalation — the supplied store must still be a valid active one).
//! - **Action permissions**: who may approve, manage stores, manage
//!   users, or reassign roles.
//!
//! A mutation whose computed scope excludes the target record's store
//! fails with `Forbidden` — it is rejected, never silently filtered.

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

// ---------------------------------------------------------------------------
// Roles
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Cashier,
    StoreManager,
    AccountsIncharge,
    SuperUser,
}

impl Role {
    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "cashier" => Some(Role::Cashier),
            "store_manager" => Some(Role::StoreManager),
            "accounts_incharge" => Some(Role::AccountsIncharge),
            "super_user" => Some(Role::SuperUser),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Cashier => "cashier",
            Role::StoreManager => "store_manager",
            Role::AccountsIncharge => "accounts_incharge",
            Role::SuperUser => "super_user",
        }
    }

    /// Roles whose store scope spans every store.
    pub fn has_all_store_scope(&self) -> bool {
        matches!(self, Role::AccountsIncharge | Role::SuperUser)
    }
}

/// The authenticated user a request acts as. Loaded from the `users`
/// table; session/JWT handling lives outside this core.
#[derive(Debug, Clone)]
pub struct Actor {
    pub id: String,
    pub role: Role,
    pub store_id: Option<String>,
}

/// Load an active user as an [`Actor`].
pub fn load_actor(conn: &Connection, user_id: &str) -> Result<Actor, DomainError> {
    let (role_str, store_id, is_active): (String, Option<String>, i64) = conn
        .query_row(
            "SELECT role, store_id, is_active FROM users WHERE id = ?1",
            params![user_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .map_err(|_| DomainError::not_found(format!("User not found: {user_id}")))?;

    if is_active == 0 {
        return Err(DomainError::forbidden("User account is deactivated"));
    }

    let role = Role::parse(&role_str)
        .ok_or_else(|| DomainError::Storage(format!("unknown role in users table: {role_str}")))?;

    Ok(Actor {
        id: user_id.to_string(),
        role,
        store_id,
    })
}

// ---------------------------------------------------------------------------
// Store scope
// ---------------------------------------------------------------------------

/// The set of stores a request may touch: either every store, or
/// exactly one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreScope {
    pub all_stores: bool,
    pub store_id: Option<String>,
}

impl StoreScope {
    pub fn all() -> Self {
        StoreScope {
            all_stores: true,
            store_id: None,
        }
    }

    pub fn single(store_id: impl Into<String>) -> Self {
        StoreScope {
            all_stores: false,
            store_id: Some(store_id.into()),
        }
    }

    /// Whether the scope includes the given store.
    pub fn includes(&self, store_id: &str) -> bool {
        self.all_stores || self.store_id.as_deref() == Some(store_id)
    }
}

/// Compute the store scope for a user, ignoring any per-request filter.
///
/// Pure: cashier/store_manager map to their own store; accounts
/// in-charge and super users map to all stores.
pub fn visible_store_scope(actor: &Actor) -> StoreScope {
    if actor.role.has_all_store_scope() {
        StoreScope::all()
    } else {
        StoreScope {
            all_stores: false,
            store_id: actor.store_id.clone(),
        }
    }
}

/// Compute the effective scope for a request, applying an optional
/// explicit `store_id` filter.
///
/// All-store roles may narrow to one store; the supplied store must
/// reference a valid active store (`Validation` otherwise). Single-store
/// roles may only pass a filter matching their own store — anything else
/// is `Forbidden`.
pub fn resolve_scope(
    conn: &Connection,
    actor: &Actor,
    requested_store_id: Option<&str>,
) -> Result<StoreScope, DomainError> {
    let base = visible_store_scope(actor);

    let requested = match requested_store_id {
        Some(s) if !s.trim().is_empty() => s.trim(),
        _ => {
            if !base.all_stores && base.store_id.is_none() {
                return Err(DomainError::forbidden(
                    "User has no assigned store and no all-store scope",
                ));
            }
            return Ok(base);
        }
    };

    if base.all_stores {
        require_active_store(conn, requested)?;
        return Ok(StoreScope::single(requested));
    }

    if base.store_id.as_deref() == Some(requested) {
        return Ok(base);
    }

    Err(DomainError::forbidden(format!(
        "Store {requested} is outside the user's scope"
    )))
}

/// Reject the request unless the scope includes the target store.
pub fn authorize_store(scope: &StoreScope, target_store_id: &str) -> Result<(), DomainError> {
    if scope.includes(target_store_id) {
        Ok(())
    } else {
        Err(DomainError::forbidden(format!(
            "Store {target_store_id} is outside the user's scope"
        )))
    }
}

/// Fail with `Validation` unless the store exists and is active.
pub fn require_active_store(conn: &Connection, store_id: &str) -> Result<(), DomainError> {
    let is_active: Option<i64> = conn
        .query_row(
            "SELECT is_active FROM stores WHERE id = ?1",
            params![store_id],
            |row| row.get(0),
        )
        .ok();

    match is_active {
        Some(1) => Ok(()),
        Some(_) => Err(DomainError::validation(format!(
            "Store {store_id} is deactivated"
        ))),
        None => Err(DomainError::validation(format!(
            "Store not found: {store_id}"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Action permissions
// ---------------------------------------------------------------------------

/// The two approval surfaces: the inline per-page action and the
/// cross-store approvals queue. Both funnel into the same `decide`
/// precondition; only who sees the button differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalSurface {
    Inline,
    Queue,
}

/// Whether the role may execute `decide` at all (manager-or-above).
pub fn can_decide(role: Role) -> bool {
    matches!(
        role,
        Role::StoreManager | Role::AccountsIncharge | Role::SuperUser
    )
}

/// Whether the role may approve on the given surface.
pub fn can_approve(role: Role, surface: ApprovalSurface) -> bool {
    match surface {
        ApprovalSurface::Inline => {
            matches!(role, Role::StoreManager | Role::AccountsIncharge)
        }
        ApprovalSurface::Queue => {
            matches!(role, Role::AccountsIncharge | Role::SuperUser)
        }
    }
}

/// Store CRUD is restricted to super users.
pub fn can_manage_stores(role: Role) -> bool {
    matches!(role, Role::SuperUser)
}

/// User CRUD: store managers and above.
pub fn can_manage_users(role: Role) -> bool {
    matches!(
        role,
        Role::StoreManager | Role::AccountsIncharge | Role::SuperUser
    )
}

/// Changing another user's role is super-user only.
pub fn can_reassign_roles(role: Role) -> bool {
    matches!(role, Role::SuperUser)
}

// ===========================================================================
// Tests
// ===========================================================================
