//! Property-based tests for `path::resolve`, complementing the `path_resolve`
//! fuzz target with the same invariants checked against the `proptest`
//! shrinker instead of raw fuzzer input.

use proptest::prelude::*;
use respak::path::{self, Resolved, MAX_PATH_LENGTH};

/// Generates path-like strings built from `/`-separated alphanumeric
/// components, matching the shape `resolve` is meant to handle (no NUL
/// bytes, no pathological lengths).
fn path_strategy() -> impl Strategy<Value = String> {
    proptest::collection::vec("[a-zA-Z0-9_.-]{1,12}", 1..6).prop_map(|parts| parts.join("/"))
}

proptest! {
    /// A path accepted by `resolve` never loses or gains bytes outside of
    /// the matched prefix: a `Package` resolution's `intra_path` is always
    /// a suffix of the (host-prefix-stripped) input, and a `Filesystem`
    /// resolution's `path` is always a suffix of it too.
    #[test]
    fn resolved_remainder_is_always_a_suffix(path in path_strategy()) {
        let prefixes = vec!["assets/".to_string(), "assets/sounds/".to_string()];
        if let Ok(resolved) = path::resolve(&path, &prefixes, None) {
            let stripped = path.strip_prefix("host:").unwrap_or(&path);
            match resolved {
                Resolved::Package { intra_path, .. } => {
                    prop_assert!(stripped.ends_with(&intra_path));
                }
                Resolved::Filesystem { path: fs_path } => {
                    prop_assert!(stripped.ends_with(&fs_path));
                }
            }
        }
    }

    /// Paths over `MAX_PATH_LENGTH` are always rejected, regardless of
    /// content.
    #[test]
    fn oversized_paths_are_always_rejected(extra in 1usize..256) {
        let path = "a".repeat(MAX_PATH_LENGTH + extra);
        let result = path::resolve(&path, &[], None);
        prop_assert!(result.is_err());
    }

    /// Paths containing a NUL byte anywhere are always rejected.
    #[test]
    fn nul_byte_anywhere_is_rejected(prefix in "[a-zA-Z0-9/]{0,20}", suffix in "[a-zA-Z0-9/]{0,20}") {
        let path = format!("{prefix}\0{suffix}");
        let result = path::resolve(&path, &[], None);
        prop_assert!(result.is_err());
    }

    /// A path that matches a registered prefix case-insensitively always
    /// resolves to that package, never to the filesystem.
    #[test]
    fn matching_prefix_always_routes_to_package(
        component in "[a-zA-Z0-9]{1,8}",
        rest in "[a-zA-Z0-9/]{0,20}"
    ) {
        let prefixes = vec![format!("{component}/")];
        let path = format!("{}/{}", component.to_uppercase(), rest);
        let resolved = path::resolve(&path, &prefixes, None).unwrap();
        prop_assert!(matches!(resolved, Resolved::Package { .. }));
    }

    /// `resolve` never panics on arbitrary UTF-8 input, whatever it
    /// decides to return.
    #[test]
    fn never_panics_on_arbitrary_input(path in ".*") {
        let _ = path::resolve(&path, &["pkg/".to_string()], Some("host-prefix/"));
    }
}
