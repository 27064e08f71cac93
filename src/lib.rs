//! Store Daybook - daily reporting core for a retail chain.
//!
//! Each store records its day (sales grid, expense grid, hand bills,
//! sales orders, gift vouchers, returns) into a local SQLite database;
//! managers and accounts staff approve or reject what was entered.
//! Every operation takes a JSON payload with camelCase keys
//! (snake_case accepted as a fallback) and returns a JSON value with
//! `"success": true` on the happy path.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod access;
pub mod approvals;
pub mod batch_entry;
pub mod convertibles;
pub mod customers;
pub mod db;
pub mod errors;
pub mod expenses;
pub mod handbills;
pub mod returns;
pub mod sales;
pub mod sales_orders;
pub mod stores;
pub mod summary;
pub mod users;
pub mod vouchers;

/// Initialize tracing from `RUST_LOG` (default `info`). Call once at
/// process start; a second call is a no-op.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init();
}

pub(crate) fn value_str(v: &serde_json::Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(s) = v.get(*key).and_then(|x| x.as_str()) {
            let trimmed = s.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

pub(crate) fn value_f64(v: &serde_json::Value, keys: &[&str]) -> Option<f64> {
    for key in keys {
        if let Some(n) = v.get(*key).and_then(|x| x.as_f64()) {
            return Some(n);
        }
    }
    None
}
