//! Local SQLite database layer for Store Daybook.
//!
//! Uses rusqlite with WAL mode. Provides schema migrations, settings
//! helpers, and the shared connection state consumed by every entity
//! module. The database is the storage collaborator for all state
//! transitions: each transition is one conditional UPDATE gated on the
//! current state, so two concurrent approvals of the same record can
//! never both succeed.

use rusqlite::{params, Connection};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{error, info, warn};

/// Shared state holding the database connection.
pub struct DbState {
    pub conn: Mutex<Connection>,
    pub db_path: PathBuf,
}

/// Current schema version. Bump when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 4;

/// Initialize the database at `{data_dir}/daybook.db`.
///
/// Creates the directory if needed, opens the connection, sets pragmas,
/// and runs any pending migrations. On corruption or open failure,
/// deletes the file and retries once.
pub fn init(data_dir: &Path) -> Result<DbState, String> {
    fs::create_dir_all(data_dir).map_err(|e| format!("Failed to create data dir: {e}"))?;

    let db_path = data_dir.join("daybook.db");
    info!("Opening database at {}", db_path.display());

    let conn = match open_and_configure(&db_path) {
        Ok(c) => c,
        Err(first_err) => {
            warn!(
                "Database open failed ({}), deleting and retrying once",
                first_err
            );
            if db_path.exists() {
                let _ = fs::remove_file(&db_path);
                // Also remove WAL/SHM files if present
                let wal = db_path.with_extension("db-wal");
                let shm = db_path.with_extension("db-shm");
                let _ = fs::remove_file(&wal);
                let _ = fs::remove_file(&shm);
            }
            open_and_configure(&db_path)
                .map_err(|e| format!("Database open failed after retry: {e}"))?
        }
    };

    run_migrations(&conn)?;

    info!("Database initialized (schema v{CURRENT_SCHEMA_VERSION})");

    Ok(DbState {
        conn: Mutex::new(conn),
        db_path,
    })
}

/// Open the database file and apply pragmas.
fn open_and_configure(path: &Path) -> Result<Connection, String> {
    let conn = Connection::open(path).map_err(|e| format!("sqlite open: {e}"))?;

    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )
    .map_err(|e| format!("pragma setup: {e}"))?;

    Ok(conn)
}

/// Run all pending migrations up to `CURRENT_SCHEMA_VERSION`.
fn run_migrations(conn: &Connection) -> Result<(), String> {
    // Ensure schema_version table exists first
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )
    .map_err(|e| format!("create schema_version: {e}"))?;

    let current: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current >= CURRENT_SCHEMA_VERSION {
        info!("Database schema up to date (v{current})");
        return Ok(());
    }

    info!("Migrating database from v{current} to v{CURRENT_SCHEMA_VERSION}");

    if current < 1 {
        migrate_v1(conn)?;
    }
    if current < 2 {
        migrate_v2(conn)?;
    }
    if current < 3 {
        migrate_v3(conn)?;
    }
    if current < 4 {
        migrate_v4(conn)?;
    }

    Ok(())
}

/// Migration v1: settings plus the master-data tables (stores, users,
/// customers) that every transactional record references.
fn migrate_v1(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "
        -- local_settings (category/key/value store)
        CREATE TABLE IF NOT EXISTS local_settings (
            id TEXT PRIMARY KEY DEFAULT (lower(hex(randomblob(16)))),
            setting_category TEXT NOT NULL,
            setting_key TEXT NOT NULL,
            setting_value TEXT NOT NULL,
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now')),
            UNIQUE(setting_category, setting_key)
        );

        -- stores (deactivated, never hard-deleted)
        CREATE TABLE IF NOT EXISTS stores (
            id TEXT PRIMARY KEY,
            store_code TEXT UNIQUE NOT NULL,
            name TEXT NOT NULL,
            address TEXT,
            manager_id TEXT,
            petty_cash_limit REAL NOT NULL DEFAULT 0,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now'))
        );

        -- users
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT UNIQUE NOT NULL,
            role TEXT NOT NULL CHECK(role IN (
                'cashier', 'store_manager', 'accounts_incharge', 'super_user'
            )),
            store_id TEXT REFERENCES stores(id),
            authentication_type TEXT NOT NULL DEFAULT 'local'
                CHECK(authentication_type IN ('local', 'google_sso')),
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now'))
        );

        -- customers
        CREATE TABLE IF NOT EXISTS customers (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            phone TEXT UNIQUE NOT NULL,
            email TEXT,
            address TEXT,
            store_id TEXT REFERENCES stores(id),
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now'))
        );

        -- Indexes
        CREATE INDEX IF NOT EXISTS idx_users_store ON users(store_id);
        CREATE INDEX IF NOT EXISTS idx_users_role ON users(role);
        CREATE INDEX IF NOT EXISTS idx_customers_store ON customers(store_id);

        -- Record migration
        INSERT INTO schema_version (version) VALUES (1);
        ",
    )
    .map_err(|e| {
        error!("Migration v1 failed: {e}");
        format!("migration v1: {e}")
    })?;

    info!("Applied migration v1 (settings, stores, users, customers)");
    Ok(())
}

/// Migration v2: transactional records with the approval workflow
/// (sales and expenses).
fn migrate_v2(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS sales (
            id TEXT PRIMARY KEY,
            store_id TEXT NOT NULL REFERENCES stores(id),
            sale_date TEXT NOT NULL,
            tender_type TEXT NOT NULL CHECK(tender_type IN (
                'cash', 'credit', 'credit_card', 'upi',
                'hand_bill', 'return', 'gift_voucher'
            )),
            amount REAL NOT NULL CHECK(amount > 0),
            entered_by TEXT NOT NULL REFERENCES users(id),
            approval_status TEXT NOT NULL DEFAULT 'pending'
                CHECK(approval_status IN ('pending', 'approved', 'rejected')),
            approved_by TEXT REFERENCES users(id),
            notes TEXT,
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS expenses (
            id TEXT PRIMARY KEY,
            store_id TEXT NOT NULL REFERENCES stores(id),
            expense_date TEXT NOT NULL,
            category TEXT NOT NULL CHECK(category IN (
                'staff_welfare', 'freight', 'stationery', 'repairs',
                'cleaning', 'fuel', 'misc'
            )),
            amount REAL NOT NULL CHECK(amount > 0),
            description TEXT NOT NULL,
            requested_by TEXT NOT NULL REFERENCES users(id),
            approval_status TEXT NOT NULL DEFAULT 'pending'
                CHECK(approval_status IN ('pending', 'approved', 'rejected')),
            approved_by TEXT REFERENCES users(id),
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_sales_store_date ON sales(store_id, sale_date);
        CREATE INDEX IF NOT EXISTS idx_sales_status ON sales(approval_status);
        CREATE INDEX IF NOT EXISTS idx_expenses_store_date ON expenses(store_id, expense_date);
        CREATE INDEX IF NOT EXISTS idx_expenses_status ON expenses(approval_status);

        INSERT INTO schema_version (version) VALUES (2);
        ",
    )
    .map_err(|e| {
        error!("Migration v2 failed: {e}");
        format!("migration v2: {e}")
    })?;

    info!("Applied migration v2 (sales, expenses)");
    Ok(())
}

/// Migration v3: convertible records (hand bills, sales orders).
fn migrate_v3(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS hand_bills (
            id TEXT PRIMARY KEY,
            store_id TEXT NOT NULL REFERENCES stores(id),
            customer_id TEXT REFERENCES customers(id),
            sale_date TEXT NOT NULL,
            amount REAL NOT NULL CHECK(amount > 0),
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK(status IN ('pending', 'converted', 'cancelled')),
            erp_sale_bill_number TEXT,
            conversion_notes TEXT,
            cancellation_reason TEXT,
            entered_by TEXT NOT NULL REFERENCES users(id),
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS sales_orders (
            id TEXT PRIMARY KEY,
            store_id TEXT NOT NULL REFERENCES stores(id),
            customer_id TEXT NOT NULL REFERENCES customers(id),
            order_date TEXT NOT NULL,
            total_amount REAL NOT NULL CHECK(total_amount > 0),
            advance_paid REAL NOT NULL DEFAULT 0 CHECK(advance_paid >= 0),
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK(status IN ('pending', 'converted', 'cancelled')),
            erp_sale_bill_number TEXT,
            conversion_notes TEXT,
            cancellation_reason TEXT,
            entered_by TEXT NOT NULL REFERENCES users(id),
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_hand_bills_store_status ON hand_bills(store_id, status);
        CREATE INDEX IF NOT EXISTS idx_sales_orders_store_status ON sales_orders(store_id, status);

        INSERT INTO schema_version (version) VALUES (3);
        ",
    )
    .map_err(|e| {
        error!("Migration v3 failed: {e}");
        format!("migration v3: {e}")
    })?;

    info!("Applied migration v3 (hand_bills, sales_orders)");
    Ok(())
}

/// Migration v4: gift vouchers and returns.
fn migrate_v4(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS gift_vouchers (
            id TEXT PRIMARY KEY,
            voucher_number TEXT UNIQUE NOT NULL,
            store_id TEXT NOT NULL REFERENCES stores(id),
            original_amount REAL NOT NULL CHECK(original_amount > 0),
            current_balance REAL NOT NULL CHECK(current_balance >= 0),
            issue_date TEXT NOT NULL,
            expiry_date TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active'
                CHECK(status IN ('active', 'redeemed', 'expired', 'cancelled')),
            redeemed_at TEXT,
            cancellation_reason TEXT,
            issued_by TEXT NOT NULL REFERENCES users(id),
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS returns (
            id TEXT PRIMARY KEY,
            store_id TEXT NOT NULL REFERENCES stores(id),
            customer_id TEXT REFERENCES customers(id),
            return_date TEXT NOT NULL,
            return_amount REAL NOT NULL CHECK(return_amount > 0),
            payment_method TEXT NOT NULL,
            rrn TEXT,
            reason TEXT,
            entered_by TEXT NOT NULL REFERENCES users(id),
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_vouchers_status ON gift_vouchers(status);
        CREATE INDEX IF NOT EXISTS idx_vouchers_store ON gift_vouchers(store_id);
        CREATE INDEX IF NOT EXISTS idx_returns_store_date ON returns(store_id, return_date);

        INSERT INTO schema_version (version) VALUES (4);
        ",
    )
    .map_err(|e| {
        error!("Migration v4 failed: {e}");
        format!("migration v4: {e}")
    })?;

    info!("Applied migration v4 (gift_vouchers, returns)");
    Ok(())
}

// ---------------------------------------------------------------------------
// Settings helpers
// ---------------------------------------------------------------------------

/// Get a single setting value.
pub fn get_setting(conn: &Connection, category: &str, key: &str) -> Option<String> {
    conn.query_row(
        "SELECT setting_value FROM local_settings WHERE setting_category = ?1 AND setting_key = ?2",
        params![category, key],
        |row| row.get(0),
    )
    .ok()
}

/// Insert or update a setting.
pub fn set_setting(
    conn: &Connection,
    category: &str,
    key: &str,
    value: &str,
) -> Result<(), String> {
    conn.execute(
        "INSERT INTO local_settings (setting_category, setting_key, setting_value, updated_at)
         VALUES (?1, ?2, ?3, datetime('now'))
         ON CONFLICT(setting_category, setting_key) DO UPDATE SET
            setting_value = excluded.setting_value,
            updated_at = excluded.updated_at",
        params![category, key, value],
    )
    .map_err(|e| format!("set_setting: {e}"))?;
    Ok(())
}

/// Run all migrations on the given connection (test helper, not public API).
#[cfg(test)]
pub fn run_migrations_for_test(conn: &Connection) {
    run_migrations(conn).expect("run_migrations should succeed in test");
}

// ===========================================================================
// Tests
// ===========================================================================
