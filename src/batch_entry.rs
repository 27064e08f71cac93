//! Batch entry reducer for daily grid submissions.
//!
//! Daily sales and expense entry both follow the same pattern: the
//! form presents a fixed ordered list of slots (one per tender type or
//! expense category), the user fills in some of them, and the whole
//! grid is submitted as one logical batch. The reducer filters the
//! grid down to the slots that actually carry an entry and hands back
//! typed rows; the caller persists them as N independent records
//! inside a single transaction.
//!
//! The reducer is pure — no I/O, no clock. Partial-failure handling at
//! the storage boundary is the caller's concern (all-or-nothing per
//! batch).

use serde_json::Value;

use crate::errors::DomainError;

/// One surviving slot from a submitted grid.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchEntry {
    /// Slot key: tender type for sales, category for expenses.
    pub key: String,
    pub amount: f64,
    pub description: Option<String>,
    pub notes: Option<String>,
}

/// Reduce a submitted slot grid to the entries worth persisting.
///
/// Keeps slots with `amount > 0`; when `require_description` is set
/// (expense grids), a slot additionally needs a non-empty description
/// to survive. An empty result fails with `Validation` ("enter at
/// least one entry") rather than producing an empty batch.
///
/// A negative amount is stricter than the keep/drop rule: it fails the
/// whole grid with `Validation` instead of being dropped.
pub fn reduce_entries(
    slots: &[Value],
    key_field: &[&str],
    require_description: bool,
) -> Result<Vec<BatchEntry>, DomainError> {
    let mut entries = Vec::new();

    for slot in slots {
        let key = crate::value_str(slot, key_field).ok_or_else(|| {
            DomainError::validation("Each slot must name its category or tender type")
        })?;

        let amount = crate::value_f64(slot, &["amount"]).unwrap_or(0.0);
        if amount < 0.0 {
            return Err(DomainError::validation(format!(
                "Amount for {key} cannot be negative"
            )));
        }
        if amount == 0.0 {
            continue;
        }

        let description = crate::value_str(slot, &["description", "reference"]);
        if require_description && description.is_none() {
            continue;
        }

        entries.push(BatchEntry {
            key,
            amount,
            description,
            notes: crate::value_str(slot, &["notes"]),
        });
    }

    if entries.is_empty() {
        return Err(DomainError::validation("Enter at least one entry"));
    }

    Ok(entries)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_zero_amount_slots_dropped() {
        let slots = vec![
            json!({ "tenderType": "cash", "amount": 100.0 }),
            json!({ "tenderType": "credit", "amount": 0.0 }),
            json!({ "tenderType": "upi", "amount": 50.0 }),
        ];

        let entries = reduce_entries(&slots, &["tenderType", "tender_type"], false).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].key, "cash");
        assert_eq!(entries[0].amount, 100.0);
        assert_eq!(entries[1].key, "upi");
        assert_eq!(entries[1].amount, 50.0);
    }

    #[test]
    fn test_all_zero_grid_rejected() {
        let slots = vec![
            json!({ "tenderType": "cash", "amount": 0.0 }),
            json!({ "tenderType": "credit" }),
            json!({ "tenderType": "upi", "amount": 0 }),
        ];

        let err = reduce_entries(&slots, &["tenderType"], false).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
        assert_eq!(err.to_string(), "Enter at least one entry");
    }

    #[test]
    fn test_negative_amount_rejected() {
        let slots = vec![json!({ "tenderType": "cash", "amount": -5.0 })];
        let err = reduce_entries(&slots, &["tenderType"], false).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn test_expense_slot_without_description_filtered() {
        let slots = vec![
            json!({ "category": "freight", "amount": 250.0, "description": "Courier charges" }),
            json!({ "category": "misc", "amount": 40.0 }),
        ];

        let entries = reduce_entries(&slots, &["category"], true).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, "freight");
        assert_eq!(entries[0].description.as_deref(), Some("Courier charges"));
    }

    #[test]
    fn test_expense_grid_all_missing_descriptions_rejected() {
        let slots = vec![
            json!({ "category": "fuel", "amount": 100.0 }),
            json!({ "category": "misc", "amount": 40.0, "description": "  " }),
        ];

        let err = reduce_entries(&slots, &["category"], true).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn test_slot_without_key_rejected() {
        let slots = vec![json!({ "amount": 10.0 })];
        let err = reduce_entries(&slots, &["tenderType"], false).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn test_snake_case_fallback_and_notes() {
        let slots = vec![json!({
            "tender_type": "hand_bill",
            "amount": 900.0,
            "notes": "HB-204",
        })];

        let entries = reduce_entries(&slots, &["tenderType", "tender_type"], false).unwrap();
        assert_eq!(entries[0].key, "hand_bill");
        assert_eq!(entries[0].notes.as_deref(), Some("HB-204"));
    }
}
