//! Field-level diff between two snapshots
//!
//! A key is changed when it is present on only one side or its values
//! differ under deep comparison. `null` and `""` are different values.
//! Nested objects and arrays that compare equal are not reported.

use std::collections::BTreeSet;

use crate::model::FieldMap;

/// Sorted list of top-level keys whose values differ
pub fn changed_fields(old: Option<&FieldMap>, new: Option<&FieldMap>) -> Vec<String> {
    let empty = FieldMap::new();
    let old = old.unwrap_or(&empty);
    let new = new.unwrap_or(&empty);

    let keys: BTreeSet<&String> = old.keys().chain(new.keys()).collect();

    keys.into_iter()
        .filter(|key| old.get(key.as_str()) != new.get(key.as_str()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: serde_json::Value) -> FieldMap {
        match value {
            serde_json::Value::Object(m) => m,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_identical_snapshots_have_no_changes() {
        let a = map(json!({"status": "open", "household": {"adults": 2}}));
        assert!(changed_fields(Some(&a), Some(&a.clone())).is_empty());
    }

    #[test]
    fn test_null_to_empty_string_is_a_change() {
        let a = map(json!({"notes": null, "title": "x"}));
        let b = map(json!({"notes": "", "title": "x"}));
        assert_eq!(changed_fields(Some(&a), Some(&b)), vec!["notes"]);
    }

    #[test]
    fn test_unchanged_nested_values_excluded() {
        let a = map(json!({
            "household": {"adults": 2, "languages": ["he", "en"]},
            "status": "open"
        }));
        let b = map(json!({
            "household": {"adults": 2, "languages": ["he", "en"]},
            "status": "completed"
        }));
        assert_eq!(changed_fields(Some(&a), Some(&b)), vec!["status"]);

        let c = map(json!({
            "household": {"adults": 2, "languages": ["he"]},
            "status": "open"
        }));
        assert_eq!(changed_fields(Some(&a), Some(&c)), vec!["household"]);
    }

    #[test]
    fn test_one_sided_keys_are_changes() {
        let a = map(json!({"a": 1, "b": 2}));
        let b = map(json!({"b": 2, "c": 3}));
        assert_eq!(changed_fields(Some(&a), Some(&b)), vec!["a", "c"]);
    }

    #[test]
    fn test_create_and_delete_report_every_key() {
        let row = map(json!({"id": 1, "title": "t"}));
        assert_eq!(changed_fields(None, Some(&row)), vec!["id", "title"]);
        assert_eq!(changed_fields(Some(&row), None), vec!["id", "title"]);
    }

    #[test]
    fn test_diff_is_symmetric() {
        let a = map(json!({"x": 1, "y": [1, 2], "z": null}));
        let b = map(json!({"x": 2, "y": [1, 2], "w": false}));
        assert_eq!(
            changed_fields(Some(&a), Some(&b)),
            changed_fields(Some(&b), Some(&a))
        );
    }
}
