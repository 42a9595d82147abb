use ulid::Ulid;

/// Builds a sortable, prefixed identifier such as `ws_01J...`.
///
/// # Examples
/// ```
/// let id = iqraa_common::id::prefixed_ulid("dsc");
/// assert!(id.starts_with("dsc_"));
/// ```
pub fn prefixed_ulid(prefix: &str) -> String {
    format!("{prefix}_{}", Ulid::new())
}

/// Prefixes used across services.
pub mod prefix {
    pub const USER: &str = "usr";
    pub const DISCUSSION: &str = "dsc";
    /// One live gateway connection.
    pub const CONNECTION: &str = "ws";
}
