//! Logical path resolution: choosing a package or the host filesystem for a
//! caller-supplied path, ahead of any I/O.
//!
//! Resolution is deterministic, pure, and performs no I/O: it is purely a
//! function of the path string and the currently registered package
//! prefixes (see [`crate::package::Registry`]).

use crate::error::{Error, Result};

/// Paths longer than this are rejected with [`Error::BufferOverflow`]
/// regardless of where they resolve to.
pub const MAX_PATH_LENGTH: usize = 4096;

/// Where a resolved path should be read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    /// Route to the package registered under `prefix`; `intra_path` is the
    /// remainder of the path passed verbatim to the package module.
    Package {
        /// The registered prefix that matched.
        prefix: String,
        /// The path remainder, passed to the package module unmodified.
        intra_path: String,
    },
    /// Route to the host filesystem at `path` (host `resource_path_prefix`
    /// override, if any, already applied).
    Filesystem {
        /// The filesystem-relative path to open.
        path: String,
    },
}

/// Strips an optional `host:` prefix reserved for test harnesses, returning
/// the remainder unchanged if the prefix was not present.
fn strip_host_prefix(path: &str) -> &str {
    path.strip_prefix("host:").unwrap_or(path)
}

/// Strips `prefix` from `path` if `path` starts with it, case-sensitively;
/// `resource_path_prefix` is a configuration override (§6), not subject to
/// case-folding since it is supplied by the embedding application rather
/// than discovered from package/archive content.
fn strip_filesystem_prefix<'a>(path: &'a str, prefix: Option<&str>) -> &'a str {
    match prefix {
        Some(p) if !p.is_empty() => path.strip_prefix(p).unwrap_or(path),
        _ => path,
    }
}

/// Compares `path` against `prefix` component-by-component, case-insensitive,
/// returning the byte length of the prefix match in `path` if every
/// component of `prefix` matched, or `None` otherwise. A `prefix` with or
/// without a trailing slash is accepted.
fn match_prefix(path: &str, prefix: &str) -> Option<usize> {
    let prefix = prefix.strip_suffix('/').unwrap_or(prefix);
    if prefix.is_empty() {
        return None;
    }
    let mut path_components = path.split('/');
    let mut matched_len = 0usize;
    for prefix_component in prefix.split('/') {
        let path_component = path_components.next()?;
        if !path_component.eq_ignore_ascii_case(prefix_component) {
            return None;
        }
        matched_len += path_component.len() + 1; // + '/' separator
    }
    Some(matched_len.min(path.len()))
}

/// Resolves a logical path against the registered package prefixes,
/// returning whether the path should be routed to a package or the host
/// filesystem.
///
/// `package_prefixes` is the ordered list of currently registered prefixes;
/// the longest case-insensitive component match wins (ties broken by
/// registration order, i.e. the first-registered prefix of the longest
/// matching length).
pub fn resolve(
    path: &str,
    package_prefixes: &[String],
    resource_path_prefix: Option<&str>,
) -> Result<Resolved> {
    if path.is_empty() {
        return Err(Error::InvalidPath("empty path".into()));
    }
    if path.len() > MAX_PATH_LENGTH {
        return Err(Error::BufferOverflow(format!(
            "path exceeds maximum length of {MAX_PATH_LENGTH} bytes"
        )));
    }
    if path.contains('\0') {
        return Err(Error::InvalidPath("contains NUL byte".into()));
    }

    let path = strip_host_prefix(path);

    let mut best: Option<(usize, &str)> = None;
    for prefix in package_prefixes {
        if let Some(len) = match_prefix(path, prefix) {
            match best {
                Some((best_len, _)) if best_len >= len => {}
                _ => best = Some((len, prefix.as_str())),
            }
        }
    }

    if let Some((matched_len, prefix)) = best {
        let intra_path = &path[matched_len..];
        return Ok(Resolved::Package {
            prefix: prefix.to_string(),
            intra_path: intra_path.to_string(),
        });
    }

    let fs_path = strip_filesystem_prefix(path, resource_path_prefix);
    if fs_path.is_empty() {
        return Err(Error::InvalidPath("empty path after prefix strip".into()));
    }
    Ok(Resolved::Filesystem {
        path: fs_path.to_string(),
    })
}
