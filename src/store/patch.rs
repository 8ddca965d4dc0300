//! JSON merge patches (RFC 7386).

use serde_json::Value as JsonValue;

/// Build the merge patch that turns `base` into `target`.
///
/// Removed object keys become `null`, nested objects are diffed recursively
/// and every other changed value (arrays included) is replaced whole.
/// Returns an empty object when nothing changed.
pub fn create_merge_patch(base: &JsonValue, target: &JsonValue) -> JsonValue {
    match (base, target) {
        (JsonValue::Object(base), JsonValue::Object(target)) => {
            let mut patch = serde_json::Map::new();
            for key in base.keys() {
                if !target.contains_key(key) {
                    patch.insert(key.clone(), JsonValue::Null);
                }
            }
            for (key, value) in target {
                match base.get(key) {
                    Some(old) if old == value => {}
                    Some(old @ JsonValue::Object(_)) if value.is_object() => {
                        patch.insert(key.clone(), create_merge_patch(old, value));
                    }
                    _ => {
                        patch.insert(key.clone(), value.clone());
                    }
                }
            }
            JsonValue::Object(patch)
        }
        (_, target) => target.clone(),
    }
}

/// Apply a merge patch in place.
pub fn apply_merge_patch(target: &mut JsonValue, patch: &JsonValue) {
    let JsonValue::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = JsonValue::Object(serde_json::Map::new());
    }
    if let JsonValue::Object(map) = target {
        for (key, value) in patch {
            if value.is_null() {
                map.remove(key);
            } else {
                apply_merge_patch(map.entry(key.clone()).or_insert(JsonValue::Null), value);
            }
        }
    }
}

/// Whether a patch changes nothing
pub fn is_empty_patch(patch: &JsonValue) -> bool {
    matches!(patch, JsonValue::Object(m) if m.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_create_patch() {
        let base = json!({"phase": "Running", "count": 1, "meta": {"a": 1, "b": 2}});
        let target = json!({"phase": "Failed", "meta": {"a": 1, "c": 3}, "list": [1]});
        let patch = create_merge_patch(&base, &target);
        assert_eq!(
            patch,
            json!({"phase": "Failed", "count": null, "meta": {"b": null, "c": 3}, "list": [1]})
        );
    }

    #[test]
    fn test_apply_rfc_examples() {
        let mut doc = json!({"a": "b", "c": {"d": "e", "f": "g"}});
        apply_merge_patch(&mut doc, &json!({"a": "z", "c": {"f": null}}));
        assert_eq!(doc, json!({"a": "z", "c": {"d": "e"}}));

        let mut doc = json!({"a": [1, 2]});
        apply_merge_patch(&mut doc, &json!({"a": [3]}));
        assert_eq!(doc, json!({"a": [3]}));

        let mut doc = json!("scalar");
        apply_merge_patch(&mut doc, &json!({"a": {"b": 1}}));
        assert_eq!(doc, json!({"a": {"b": 1}}));
    }

    #[test]
    fn test_unchanged_is_empty() {
        let doc = json!({"a": 1});
        assert!(is_empty_patch(&create_merge_patch(&doc, &doc)));
    }

    fn small_object() -> impl Strategy<Value = JsonValue> {
        prop::collection::btree_map(
            "[a-d]",
            prop_oneof![
                any::<i64>().prop_map(JsonValue::from),
                "[a-z]{0,4}".prop_map(JsonValue::from),
                prop::collection::btree_map("[x-z]", any::<bool>().prop_map(JsonValue::from), 0..3)
                    .prop_map(|m| JsonValue::Object(m.into_iter().collect())),
            ],
            0..4,
        )
        .prop_map(|m| JsonValue::Object(m.into_iter().collect()))
    }

    proptest! {
        #[test]
        fn prop_patch_reaches_target(base in small_object(), target in small_object()) {
            let patch = create_merge_patch(&base, &target);
            let mut doc = base.clone();
            apply_merge_patch(&mut doc, &patch);
            prop_assert_eq!(doc, target);
        }
    }
}
