//! Asset decode callbacks: the opaque, type-specific `bytes -> handle`
//! collaborators the core invokes during [`crate::load::Phase::Finalizing`]
//! (§1, §6).
//!
//! The core never parses image, font, or sound formats itself; every
//! `load_texture`/`load_bitmap_font`/`load_freetype_font`/`load_sound` call
//! is given an [`AssetDecoder`] by the caller, and the load state machine
//! calls it exactly once, from the thread that drove the load to
//! `Finalizing` (never an I/O or decompression worker thread).

use crate::error::Result;
use crate::slot::Handle;

/// A pure decode function from raw (already-decompressed) bytes to an
/// opaque payload handle. The resource manager never interprets the
/// returned handle; it only stores it in the slot and drops it (callers
/// are responsible for freeing the underlying graphics/audio resource
/// through whatever `Drop` glue they attach, outside this crate) once the
/// slot is freed.
pub trait AssetDecoder: Send + Sync {
    /// Decodes `bytes` into a handle, or fails with
    /// [`crate::error::Error::DecodeError`].
    fn decode(&self, bytes: &[u8]) -> Result<Handle>;
}

/// A decoder that captures a streamed-sound's backing file range instead of
/// decoding bytes eagerly; used by `open_sound`/`open_sound_from_file`
/// (§4.5), which construct a [`crate::slot::Slot::StreamedSound`] payload
/// without reading the file's contents.
pub trait StreamedSoundOpener: Send + Sync {
    /// Constructs a streamed-sound handle from a file range. Called once,
    /// from the finalizing thread.
    fn open(&self, file: &crate::file::FileRef, offset: u64, length: u64) -> Result<Handle>;
}

/// A trivial [`AssetDecoder`] that requires its input to decode to itself:
/// useful only in tests, where "decoding" a texture/font/sound is just
/// proving the finalizer ran with the right bytes.
#[cfg(any(test, feature = "test-util"))]
pub struct IdentityDecoder;

#[cfg(any(test, feature = "test-util"))]
impl AssetDecoder for IdentityDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<Handle> {
        Ok(bytes.iter().fold(0u64, |acc, &b| acc.wrapping_mul(31).wrapping_add(b as u64)))
    }
}

/// A fault-injecting [`AssetDecoder`] that always fails, used by the
/// no-leak-on-failure test (§8 Property 8).
#[cfg(any(test, feature = "test-util"))]
pub struct FailingDecoder;

#[cfg(any(test, feature = "test-util"))]
impl AssetDecoder for FailingDecoder {
    fn decode(&self, _bytes: &[u8]) -> Result<Handle> {
        Err(crate::error::Error::OutOfMemory)
    }
}
