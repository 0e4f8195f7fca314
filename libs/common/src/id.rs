use ulid::Ulid;

/// Generates a new ULID-based ID with the given prefix.
///
/// The result never contains `:`, so it is safe to use as the left half of a
/// namespaced subscription key.
///
/// # Examples
/// ```
/// let id = bouncer_common::id::prefixed_ulid("cl");
/// assert!(id.starts_with("cl_"));
/// ```
pub fn prefixed_ulid(prefix: &str) -> String {
    format!("{}_{}", prefix, Ulid::new())
}

/// Well-known ID prefixes.
pub mod prefix {
    /// Downstream client connection.
    pub const CLIENT: &str = "cl";
    /// Authentication challenge issued to a client.
    pub const CHALLENGE: &str = "chl";
}
