//! JSON deep merge used by body overrides.

use serde_json::Value;

/// Merge `patch` into `target`.
///
/// Objects merge recursively; every other patch value (scalars and arrays)
/// replaces the target value. Keys absent from the patch are untouched.
pub fn deep_merge(target: &mut Value, patch: Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                match target.get_mut(&key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        deep_merge(existing, value);
                    }
                    _ => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (target, patch) => *target = patch,
    }
}
