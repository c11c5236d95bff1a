//! Property-based test generators using proptest.

use kvsync_store::Value;
use proptest::prelude::*;
use std::collections::BTreeMap;

/// Strategy for generating key names the remote store accepts.
pub fn key_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,15}").expect("Invalid regex")
}

/// Strategy for generating key names that break a naming rule.
pub fn invalid_key_name_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(String::new()),
        key_name_strategy().prop_map(|name| format!("@{name}")),
        (key_name_strategy(), key_name_strategy()).prop_map(|(a, b)| format!("{a}.{b}")),
        key_name_strategy().prop_map(|name| format!("{name}é")),
    ]
}

/// Strategy for generating scalar store values.
pub fn scalar_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        prop::collection::vec(any::<u8>(), 0..16).prop_map(Value::Bytes),
        "[a-zA-Z0-9 ]{0,12}".prop_map(Value::Text),
    ]
}

/// Strategy for generating arbitrary store values, nested up to three levels.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    scalar_value_strategy().prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                .prop_map(|map: BTreeMap<String, Value>| Value::Map(map)),
        ]
    })
}

/// One local write in a generated script: which key, and the value written
/// (`None` removes the key).
#[derive(Debug, Clone)]
pub struct ScriptedWrite {
    /// Index into the script's key list.
    pub key: usize,
    /// The value written, or `None` for a removal.
    pub value: Option<Value>,
}

/// Strategy for a sequence of local writes over `keys` keys.
pub fn write_script_strategy(keys: usize, len: usize) -> impl Strategy<Value = Vec<ScriptedWrite>> {
    let value = prop::option::weighted(0.85, scalar_value_strategy());
    let write = (0..keys, value).prop_map(|(key, value)| ScriptedWrite { key, value });
    prop::collection::vec(write, 1..=len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvsync_engine::validate_key_name;

    proptest! {
        #[test]
        fn generated_names_are_valid(name in key_name_strategy()) {
            prop_assert!(validate_key_name(&name).is_ok());
        }

        #[test]
        fn generated_invalid_names_are_rejected(name in invalid_key_name_strategy()) {
            prop_assert!(validate_key_name(&name).is_err());
        }

        #[test]
        fn scripts_stay_in_range(script in write_script_strategy(3, 20)) {
            prop_assert!(!script.is_empty());
            prop_assert!(script.iter().all(|write| write.key < 3));
        }
    }
}
