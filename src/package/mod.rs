//! The package module interface (component H): a pluggable archive reader
//! exposing list/lookup/streaming-read operations, plus the global registry
//! of overlaid packages the path resolver routes against.

pub mod pkg;

use std::sync::{Arc, RwLock};

use crate::error::{Error, Result};

/// Information about one file inside a package, returned by
/// [`PackageModule::file_info`].
#[derive(Debug, Clone, Copy)]
pub struct FileInfo {
    /// Opaque per-package file reference, passed back to `read_at`.
    pub file_ref: u64,
    /// Byte offset of the file's data within the package.
    pub offset: u64,
    /// On-disk (possibly compressed) length.
    pub length: u64,
    /// Whether the entry is compressed.
    pub compressed: bool,
    /// Size after decompression (equal to `length` when not compressed).
    pub uncompressed_size: u64,
}

/// A pluggable archive reader. All methods are fallible; `list_files_*`
/// hold their iterator state internally so multiple listings can be
/// in-flight on different threads only if the implementation chooses to
/// make that safe (the registry itself only requires `Send + Sync` for
/// concurrent `file_info`/read access, which is the hot path).
pub trait PackageModule: Send + Sync {
    /// One-time setup after registration.
    fn init(&self) -> Result<()>;

    /// Looks up `intra_path` case-insensitively, returning its file info if
    /// present.
    fn file_info(&self, intra_path: &str) -> Result<Option<FileInfo>>;

    /// Reads `buf.len()` bytes (or fewer, at end of file) starting at
    /// `offset` within the package file identified by `file_ref`, as
    /// returned by [`Self::file_info`].
    fn read_at(&self, file_ref: u64, offset: u64, buf: &mut [u8]) -> Result<usize>;

    /// Lists every intra-package pathname. Used for existence checks and
    /// directory-style enumeration; returned in the module's native order
    /// (the PKG reader returns path-hash order).
    fn list_files(&self) -> Vec<String>;

    /// Codec identifier this module's compressed entries use, resolved
    /// against the crate's [`crate::codec::Registry`].
    fn codec_id(&self) -> u32;
}

/// The global ordered list of registered package modules, keyed by a
/// distinct, non-empty prefix.
///
/// Lookup strategy lives in [`crate::path`]; this registry only owns
/// registration bookkeeping (duplicate-prefix rejection, idempotent
/// unregistration).
#[derive(Default)]
pub struct Registry {
    inner: RwLock<Vec<(String, Arc<dyn PackageModule>)>>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Registry::default()
    }

    /// Registers `module` under `prefix`. Fails if `prefix` is empty or
    /// already registered; on failure, global state is unchanged.
    pub fn register(&self, prefix: &str, module: Arc<dyn PackageModule>) -> Result<()> {
        if prefix.is_empty() {
            return Err(Error::InvalidArgument("package prefix must not be empty".into()));
        }
        let mut modules = self.inner.write().expect("poisoned");
        if modules.iter().any(|(p, _)| p.eq_ignore_ascii_case(prefix)) {
            return Err(Error::InvalidArgument(format!(
                "prefix '{prefix}' is already registered"
            )));
        }
        module.init()?;
        modules.push((prefix.to_string(), module));
        Ok(())
    }

    /// Unregisters the module at `prefix`. Idempotent: unregistering an
    /// unknown prefix is a no-op rather than an error.
    pub fn unregister(&self, prefix: &str) {
        let mut modules = self.inner.write().expect("poisoned");
        modules.retain(|(p, _)| !p.eq_ignore_ascii_case(prefix));
    }

    /// Snapshot of currently registered prefixes, in registration order;
    /// used by the path resolver's longest-prefix-match search.
    pub fn prefixes(&self) -> Vec<String> {
        self.inner
            .read()
            .expect("poisoned")
            .iter()
            .map(|(p, _)| p.clone())
            .collect()
    }

    /// The module registered at `prefix`, if any.
    pub fn get(&self, prefix: &str) -> Option<Arc<dyn PackageModule>> {
        self.inner
            .read()
            .expect("poisoned")
            .iter()
            .find(|(p, _)| p.eq_ignore_ascii_case(prefix))
            .map(|(_, m)| Arc::clone(m))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EmptyModule;
    impl PackageModule for EmptyModule {
        fn init(&self) -> Result<()> {
            Ok(())
        }
        fn file_info(&self, _intra_path: &str) -> Result<Option<FileInfo>> {
            Ok(None)
        }
        fn read_at(&self, _file_ref: u64, _offset: u64, _buf: &mut [u8]) -> Result<usize> {
            Ok(0)
        }
        fn list_files(&self) -> Vec<String> {
            Vec::new()
        }
        fn codec_id(&self) -> u32 {
            0
        }
    }

    #[test]
    fn duplicate_prefix_registration_fails_and_leaves_state_unchanged() {
        let registry = Registry::new();
        registry.register("data/", Arc::new(EmptyModule)).unwrap();
        let err = registry.register("data/", Arc::new(EmptyModule));
        assert!(err.is_err());
        assert_eq!(registry.prefixes(), vec!["data/".to_string()]);
    }

    #[test]
    fn unregister_is_idempotent() {
        let registry = Registry::new();
        registry.unregister("nothing/");
        registry.register("data/", Arc::new(EmptyModule)).unwrap();
        registry.unregister("data/");
        registry.unregister("data/");
        assert!(registry.prefixes().is_empty());
    }

    #[test]
    fn empty_prefix_is_rejected() {
        let registry = Registry::new();
        assert!(registry.register("", Arc::new(EmptyModule)).is_err());
    }
}
