//! A deflate [`Decompressor`] implementation, used by the bundled PKG
//! reader for entries flagged compressed.
//!
//! The implementation runs the whole input through `flate2`'s streaming
//! `Decompress` state in one `decompress` call (the "inline" mode of
//! §4.3); the background/streaming mode feeds successive chunks through the
//! same `flate2::Decompress` state across multiple `decompress` calls,
//! which is why the codec keeps its state across calls rather than
//! decompressing eagerly in `init`.

use flate2::{Decompress, FlushDecompress, Status};

use crate::codec::{DecompressOutcome, Decompressor};
use crate::error::{Error, Result};

/// Deflate decompressor backed by `flate2`.
pub struct DeflateDecompressor {
    inner: Option<Decompress>,
}

impl Default for DeflateDecompressor {
    fn default() -> Self {
        DeflateDecompressor { inner: None }
    }
}

impl DeflateDecompressor {
    /// Creates a new, uninitialized deflate decompressor.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decompressor for DeflateDecompressor {
    fn get_stack_hint(&self) -> usize {
        32 * 1024
    }

    fn init(&mut self) -> Result<()> {
        self.inner = Some(Decompress::new(false));
        Ok(())
    }

    fn decompress(
        &mut self,
        input: &[u8],
        out: &mut [u8],
    ) -> Result<(usize, usize, DecompressOutcome)> {
        let state = self
            .inner
            .as_mut()
            .ok_or_else(|| Error::DecompressionError("decompressor not initialized".into()))?;

        let before_in = state.total_in();
        let before_out = state.total_out();
        let status = state
            .decompress(input, out, FlushDecompress::None)
            .map_err(|e| Error::DecompressionError(e.to_string()))?;
        let consumed = (state.total_in() - before_in) as usize;
        let produced = (state.total_out() - before_out) as usize;

        let outcome = match status {
            Status::StreamEnd => DecompressOutcome::Done,
            Status::Ok | Status::BufError => DecompressOutcome::Continue,
        };
        Ok((consumed, produced, outcome))
    }

    fn finish(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::DeflateEncoder;
    use flate2::Compression;
    use std::io::Write;

    #[test]
    fn round_trips_through_deflate() {
        let original = b"foobar foobar foobar";
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(original).unwrap();
        let compressed = encoder.finish().unwrap();

        let mut decompressor = DeflateDecompressor::new();
        decompressor.init().unwrap();
        let mut out = vec![0u8; original.len() + 64];
        let (consumed, produced, outcome) =
            decompressor.decompress(&compressed, &mut out).unwrap();
        assert_eq!(consumed, compressed.len());
        assert_eq!(&out[..produced], original);
        assert_eq!(outcome, DecompressOutcome::Done);
        Box::new(decompressor).finish().unwrap();
    }

    #[test]
    fn uninitialized_decompressor_errors() {
        let mut decompressor = DeflateDecompressor::new();
        let mut out = [0u8; 4];
        assert!(decompressor.decompress(b"x", &mut out).is_err());
    }
}
