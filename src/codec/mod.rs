//! The decompressor registry (component C): a pluggable callback set per
//! package, dispatched by a codec identifier the package module supplies.
//!
//! Concrete decompressors are out of scope for the core except for one: a
//! deflate adapter (behind the `deflate` feature) ships in
//! [`deflate`] since PKG packages need at least one working codec to be
//! exercised end-to-end.

#[cfg(feature = "deflate")]
pub mod deflate;

use crate::error::Result;

/// The outcome of one `decompress` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecompressOutcome {
    /// All input has been consumed and all output produced; no further
    /// calls are needed for this stream.
    Done,
    /// More input is needed to produce more output; the caller should feed
    /// the next chunk.
    Continue,
}

/// A per-package (or per-type) decompressor, matching the callback set in
/// the resource manager's decompression contract:
/// `get_stack_hint`/`init`/`decompress`/`finish`.
///
/// Implementations are expected to be cheap to construct; `init` performs
/// any expensive setup (e.g. allocating a window buffer), so a pool can
/// reuse a `Box<dyn Decompressor>` across many loads by recreating it with
/// `init` rather than reallocating the trait object.
pub trait Decompressor: Send {
    /// A hint for how many bytes of scratch space this decompressor needs,
    /// used by callers that want to preallocate a stack-like buffer.
    fn get_stack_hint(&self) -> usize;

    /// Performs setup. Called once before the first `decompress` call.
    fn init(&mut self) -> Result<()>;

    /// Consumes (up to) all of `input`, writing decompressed bytes into
    /// `out`, and returns how many bytes of input were consumed, how many
    /// bytes of output were written, and whether more input is required.
    fn decompress(&mut self, input: &[u8], out: &mut [u8]) -> Result<(usize, usize, DecompressOutcome)>;

    /// Releases any resources held by the decompressor. Called exactly
    /// once, whether or not decompression completed successfully.
    fn finish(self: Box<Self>) -> Result<()>;
}

/// A registry mapping a package-supplied codec identifier to a factory for
/// fresh [`Decompressor`] instances.
///
/// Grounded on the dispatch-by-method-id pattern used to pick an archive
/// codec at read time: each package registers the identifiers its entries
/// may use, and the registry hands back a fresh decompressor instance per
/// load (never shared across concurrent loads, since a `Decompressor` is
/// not `Sync`).
#[derive(Default)]
pub struct Registry {
    factories: std::collections::HashMap<u32, Box<dyn Fn() -> Box<dyn Decompressor> + Send + Sync>>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Registry::default()
    }

    /// Registers a factory for codec `id`, replacing any existing
    /// registration for that id.
    pub fn register(
        &mut self,
        id: u32,
        factory: impl Fn() -> Box<dyn Decompressor> + Send + Sync + 'static,
    ) {
        self.factories.insert(id, Box::new(factory));
    }

    /// Builds a fresh decompressor for `id`, or `None` if no codec is
    /// registered for it.
    pub fn build(&self, id: u32) -> Option<Box<dyn Decompressor>> {
        self.factories.get(&id).map(|f| f())
    }

    /// True if a codec is registered for `id`.
    pub fn contains(&self, id: u32) -> bool {
        self.factories.contains_key(&id)
    }
}

/// Well-known codec identifiers used by the bundled PKG reader.
pub mod method {
    /// Stored, uncompressed.
    pub const STORE: u32 = 0;
    /// Deflate (RFC 1951).
    pub const DEFLATE: u32 = 1;
}

/// The trivial stored/copy codec: output equals input. Registered under
/// [`method::STORE`] by every manager regardless of which optional codec
/// features are compiled in, since a PKG reader with no codec at all
/// couldn't even serve its own uncompressed entries through the same
/// decompress-dispatch path as compressed ones.
///
/// Grounded on the teacher's plain-copy codec: no window, no state, a
/// single pass that reports `Done` immediately.
pub struct StoreDecompressor;

impl Decompressor for StoreDecompressor {
    fn get_stack_hint(&self) -> usize {
        0
    }

    fn init(&mut self) -> Result<()> {
        Ok(())
    }

    fn decompress(
        &mut self,
        input: &[u8],
        out: &mut [u8],
    ) -> Result<(usize, usize, DecompressOutcome)> {
        let n = input.len().min(out.len());
        out[..n].copy_from_slice(&input[..n]);
        Ok((n, n, DecompressOutcome::Done))
    }

    fn finish(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingDecompressor {
        inited: bool,
    }

    impl Decompressor for CountingDecompressor {
        fn get_stack_hint(&self) -> usize {
            64
        }
        fn init(&mut self) -> Result<()> {
            self.inited = true;
            Ok(())
        }
        fn decompress(
            &mut self,
            input: &[u8],
            out: &mut [u8],
        ) -> Result<(usize, usize, DecompressOutcome)> {
            let n = input.len().min(out.len());
            out[..n].copy_from_slice(&input[..n]);
            Ok((n, n, DecompressOutcome::Done))
        }
        fn finish(self: Box<Self>) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn registry_builds_registered_codec() {
        let mut registry = Registry::new();
        registry.register(method::STORE, || Box::new(CountingDecompressor { inited: false }));
        assert!(registry.contains(method::STORE));
        assert!(!registry.contains(method::DEFLATE));
        let mut d = registry.build(method::STORE).unwrap();
        d.init().unwrap();
        let mut out = [0u8; 4];
        let (consumed, produced, outcome) = d.decompress(b"abcd", &mut out).unwrap();
        assert_eq!(consumed, 4);
        assert_eq!(produced, 4);
        assert_eq!(outcome, DecompressOutcome::Done);
        assert_eq!(&out, b"abcd");
    }

    #[test]
    fn unregistered_codec_returns_none() {
        let registry = Registry::new();
        assert!(registry.build(42).is_none());
    }
}
