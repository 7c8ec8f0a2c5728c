//! Host protocol version.
//!
//! Extensions declare the minimum SDK version they need in their catalog
//! entry; the host refuses to install anything that requires a newer protocol
//! than the one it speaks.

/// Protocol version spoken by this host.
///
/// Bumped whenever the wire messages in [`crate::protocol`] change in a way an
/// older extension could not understand.
pub const SDK_VERSION: u32 = 2;

/// Check whether an extension requiring `min_sdk_version` can run against a
/// host speaking `host_version`.
///
/// # Example
///
/// ```
/// use shipwright_plugin_sdk::is_sdk_compatible;
///
/// assert!(is_sdk_compatible(1, 2));
/// assert!(is_sdk_compatible(2, 2));
/// assert!(!is_sdk_compatible(3, 2));
/// ```
pub fn is_sdk_compatible(min_sdk_version: u32, host_version: u32) -> bool {
    min_sdk_version <= host_version
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unversioned_extension_is_compatible() {
        assert!(is_sdk_compatible(0, SDK_VERSION));
    }

    #[test]
    fn test_newer_requirement_is_incompatible() {
        assert!(!is_sdk_compatible(SDK_VERSION + 1, SDK_VERSION));
    }
}
