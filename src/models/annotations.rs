//! Annotation and label keys
//!
//! All keys live under the `kapply.dev/` prefix.

/// Ownership label stamped on every resource of an app
pub const APP_LABEL: &str = "kapply.dev/app";

/// Marks the ConfigMap holding an app record
pub const IS_APP_LABEL: &str = "kapply.dev/is-app";
/// Marks a ConfigMap holding one history entry
pub const IS_APP_CHANGE_LABEL: &str = "kapply.dev/is-app-change";
/// Name of the app a history entry belongs to
pub const APP_CHANGE_APP_LABEL: &str = "kapply.dev/app-change-app";

/// Resource is owned for deletion by something else; never delete it
pub const OWNED_FOR_DELETION: &str = "kapply.dev/owned-for-deletion";
/// Diffs of the resource are computed but not applied
pub const IGNORE_CHANGES: &str = "kapply.dev/ignore-changes";
/// Last-applied desired state, as JSON
pub const ORIGINAL: &str = "kapply.dev/original";

pub const CHANGE_GROUP: &str = "kapply.dev/change-group";
pub const CHANGE_RULE: &str = "kapply.dev/change-rule";

pub const UPDATE_STRATEGY: &str = "kapply.dev/update-strategy";

/// Whether `key` is `base` or `base.<suffix>`
///
/// Change groups and rules can be declared several times on one resource by
/// suffixing the key, e.g. `kapply.dev/change-rule.0`.
pub fn matches_key(key: &str, base: &str) -> bool {
    match key.strip_prefix(base) {
        Some("") => true,
        Some(rest) => rest.starts_with('.') && rest.len() > 1,
        None => false,
    }
}
