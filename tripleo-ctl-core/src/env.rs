//! Environment fallbacks for settings that were historically passed through
//! environment variables, some of them under older names.

use tracing::warn;

/// Returns `key` from the environment, else the first set name in
/// `deprecated` (with a warning), else `default`.
pub fn env_var(key: &str, default: &str, deprecated: &[&str]) -> String {
    if let Ok(value) = std::env::var(key) {
        return value;
    }
    for old in deprecated {
        if let Ok(value) = std::env::var(old) {
            warn!(
                deprecated = %old,
                replacement = %key,
                "Found deprecated environment variable '{}', please use '{}' instead",
                old,
                key
            );
            return value;
        }
    }
    default.to_owned()
}
