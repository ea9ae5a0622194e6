//! Vendor result sanitization.
//!
//! Applied to results returned inline by immediate-completion vendors before
//! they are stored. Walks the whole value tree:
//! - every string is trimmed
//! - every value under a key that looks like personal data is replaced with
//!   [`REDACTED`], whatever its type

use serde_json::{Map, Value as JsonValue};

/// Replacement written in place of redacted values.
pub const REDACTED: &str = "[REDACTED]";

/// Lowercase key fragments that mark a field as personal data.
const PII_KEY_FRAGMENTS: [&str; 4] = ["email", "phone", "ssn", "password"];

/// Whether a mapping key names personal data.
pub fn is_pii_key(key: &str) -> bool {
    let key = key.to_lowercase();
    PII_KEY_FRAGMENTS.iter().any(|frag| key.contains(frag))
}

/// Return a sanitized copy of `value`.
pub fn sanitize(value: &JsonValue) -> JsonValue {
    match value {
        JsonValue::String(s) => JsonValue::String(s.trim().to_string()),
        JsonValue::Array(items) => JsonValue::Array(items.iter().map(sanitize).collect()),
        JsonValue::Object(map) => JsonValue::Object(sanitize_map(map)),
        other => other.clone(),
    }
}

fn sanitize_map(map: &Map<String, JsonValue>) -> Map<String, JsonValue> {
    map.iter()
        .map(|(key, value)| {
            let cleaned = if is_pii_key(key) {
                JsonValue::String(REDACTED.to_string())
            } else {
                sanitize(value)
            };
            (key.clone(), cleaned)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn redacts_email_and_trims_strings() {
        let cleaned = sanitize(&json!({"email": " a@b.com ", "name": "  John Doe  "}));
        assert_eq!(cleaned, json!({"email": REDACTED, "name": "John Doe"}));
    }

    #[test]
    fn key_match_is_case_insensitive_and_substring() {
        assert!(is_pii_key("Email"));
        assert!(is_pii_key("contact_phone_number"));
        assert!(is_pii_key("user_SSN"));
        assert!(is_pii_key("passwordHash"));
        assert!(!is_pii_key("name"));
    }

    #[test]
    fn recurses_into_nested_objects_and_arrays() {
        let raw = json!({
            "result": {
                "user_info": {"email": "x@y.z", "phone": "555", "name": " n "},
                "tags": ["  a ", {"password": "hunter2"}, 3]
            }
        });

        let cleaned = sanitize(&raw);
        assert_eq!(
            cleaned,
            json!({
                "result": {
                    "user_info": {"email": REDACTED, "phone": REDACTED, "name": "n"},
                    "tags": ["a", {"password": REDACTED}, 3]
                }
            })
        );
    }

    #[test]
    fn non_string_pii_values_are_redacted_too() {
        let cleaned = sanitize(&json!({"phone": 5551234, "emails": ["a@b.c"]}));
        assert_eq!(cleaned, json!({"phone": REDACTED, "emails": REDACTED}));
    }

    #[test]
    fn scalars_pass_through() {
        assert_eq!(sanitize(&json!(42)), json!(42));
        assert_eq!(sanitize(&json!(null)), json!(null));
        assert_eq!(sanitize(&json!(" top ")), json!("top"));
    }

    fn arb_json() -> impl Strategy<Value = JsonValue> {
        let key = prop_oneof![
            Just("email".to_string()),
            Just("Phone".to_string()),
            Just("ssn".to_string()),
            Just("name".to_string()),
            "[a-z]{1,8}",
        ]
        .boxed();
        let leaf = prop_oneof![
            Just(JsonValue::Null),
            any::<bool>().prop_map(JsonValue::Bool),
            any::<i64>().prop_map(|n| json!(n)),
            "[ ]{0,3}[a-z@.]{0,8}[ ]{0,3}".prop_map(JsonValue::String),
        ];
        leaf.prop_recursive(4, 64, 6, move |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..6).prop_map(JsonValue::Array),
                prop::collection::vec((key.clone(), inner), 0..6)
                    .prop_map(|pairs| JsonValue::Object(pairs.into_iter().collect())),
            ]
        })
    }

    fn assert_clean(value: &JsonValue) {
        match value {
            JsonValue::String(s) => assert_eq!(s, s.trim()),
            JsonValue::Array(items) => items.iter().for_each(assert_clean),
            JsonValue::Object(map) => {
                for (key, value) in map {
                    if is_pii_key(key) {
                        assert_eq!(value, &json!(REDACTED));
                    } else {
                        assert_clean(value);
                    }
                }
            }
            _ => {}
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: no personal-data field survives and every string is trimmed.
        #[test]
        fn sanitized_values_are_clean(value in arb_json()) {
            assert_clean(&sanitize(&value));
        }

        /// Property: sanitizing twice changes nothing.
        #[test]
        fn sanitize_is_idempotent(value in arb_json()) {
            let once = sanitize(&value);
            prop_assert_eq!(sanitize(&once), once);
        }
    }
}
