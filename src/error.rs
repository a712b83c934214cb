//! Error types returned by the resource manager.
//!
//! Every fallible operation in this crate returns [`Result<T>`], an alias for
//! `std::result::Result<T, Error>`. [`Error`] is a flat enum rather than a
//! hierarchy of error types per subsystem: callers that only care about the
//! recovery story (retry, surface as a failed slot, or reject the call
//! synchronously) can match on [`Error::is_recoverable`],
//! [`Error::is_slot_failure`], or [`Error::is_sync_rejection`] without
//! needing to know which component raised the error.

use std::fmt;

/// The error type for all fallible operations in this crate.
///
/// Marked `#[non_exhaustive]` so new variants can be added without a major
/// version bump; match arms must include a wildcard.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// An argument was invalid independent of any I/O or archive state
    /// (e.g. a zero-length buffer passed where one byte is required).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A logical path failed validation in the path resolver (empty path,
    /// NUL byte, path or combined-path length overflow).
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// No file or package entry exists at the resolved location.
    #[error("not found: {0}")]
    NotFound(String),

    /// The underlying file layer reported an I/O failure.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// An async read completed with fewer bytes than requested.
    #[error("short read: expected {expected} bytes, got {actual}")]
    ShortRead {
        /// Bytes requested.
        expected: usize,
        /// Bytes actually delivered.
        actual: usize,
    },

    /// A registered decompressor rejected its input or failed mid-stream.
    #[error("decompression error: {0}")]
    DecompressionError(String),

    /// A type-specific finalizer (image decode, font parse, ...) failed.
    #[error("decode error: {0}")]
    DecodeError(String),

    /// An allocation failed during any phase of a load.
    #[error("out of memory")]
    OutOfMemory,

    /// The async read coordinator's request table was full at submission
    /// time.
    ///
    /// This variant is always recovered internally: [`sync`](crate::manager::ResourceManager::sync)
    /// and [`wait`](crate::manager::ResourceManager::wait) retry the
    /// submission on every call as long as the owning load remains in
    /// `Opened`. Callers should never need to match on this variant
    /// directly; it is public only because [`Error::is_recoverable`] must
    /// be able to report on it from outside the crate too.
    #[error("async read queue is full")]
    AsyncQueueFull,

    /// A PKG (or other package format) header or index failed structural
    /// validation: wrong magic, a declared struct size that does not match
    /// the reader's own size, or a file shorter than the header promises.
    #[error("package format error: {0}")]
    PackageFormat(String),

    /// Data that passed format validation was nonetheless internally
    /// inconsistent (e.g. a pathname pool offset pointing past the end of
    /// the pool, or a ring with no reachable anchor).
    #[error("corrupted: {0}")]
    Corrupted(String),

    /// A caller-provided or internally computed buffer would overflow its
    /// bound (e.g. a combined path longer than the resolver's maximum).
    #[error("buffer overflow: {0}")]
    BufferOverflow(String),
}

impl Error {
    /// True for errors the crate itself retries or falls back from without
    /// ever surfacing a failure to the caller.
    ///
    /// - `AsyncQueueFull`: retried by `sync`/`wait` on every call while the
    ///   owning load is still `Opened`.
    /// - A transient `IoError` (one whose [`std::io::ErrorKind`] is
    ///   [`Interrupted`](std::io::ErrorKind::Interrupted) or
    ///   [`WouldBlock`](std::io::ErrorKind::WouldBlock)) is retried once at
    ///   the same offset/length before being treated as permanent.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::AsyncQueueFull => true,
            Error::IoError(e) => {
                matches!(
                    e.kind(),
                    std::io::ErrorKind::Interrupted | std::io::ErrorKind::WouldBlock
                )
            }
            _ => false,
        }
    }

    /// True for errors that transition a load to `Failed` rather than being
    /// returned synchronously to the call that triggered them.
    ///
    /// After any of these, `get_*` on the owning slot returns `None`
    /// forever; the slot is never re-promoted to `Ready`.
    pub fn is_slot_failure(&self) -> bool {
        matches!(
            self,
            Error::NotFound(_)
                | Error::IoError(_)
                | Error::ShortRead { .. }
                | Error::DecompressionError(_)
                | Error::DecodeError(_)
                | Error::OutOfMemory
        )
    }

    /// True for errors surfaced as a synchronous `0`/`false`/`None` return
    /// from the call that detected them, rather than as a failed slot.
    pub fn is_sync_rejection(&self) -> bool {
        matches!(
            self,
            Error::InvalidArgument(_)
                | Error::InvalidPath(_)
                | Error::BufferOverflow(_)
                | Error::PackageFormat(_)
                | Error::Corrupted(_)
        )
    }
}

/// The result type used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;

// Helper used by modules that want a one-line `Display`-driven error without
// pulling in `format!` noise at every call site.
pub(crate) fn invalid_argument(msg: impl fmt::Display) -> Error {
    Error::InvalidArgument(msg.to_string())
}

pub(crate) fn invalid_path(msg: impl fmt::Display) -> Error {
    Error::InvalidPath(msg.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn error_is_send_sync() {
        assert_send_sync::<Error>();
    }

    #[test]
    fn async_queue_full_is_recoverable() {
        assert!(Error::AsyncQueueFull.is_recoverable());
        assert!(!Error::AsyncQueueFull.is_slot_failure());
        assert!(!Error::AsyncQueueFull.is_sync_rejection());
    }

    #[test]
    fn transient_io_error_is_recoverable() {
        let e = Error::IoError(std::io::Error::new(std::io::ErrorKind::WouldBlock, "x"));
        assert!(e.is_recoverable());
        let e = Error::IoError(std::io::Error::new(std::io::ErrorKind::Other, "x"));
        assert!(!e.is_recoverable());
    }

    #[test]
    fn slot_failure_variants() {
        assert!(Error::NotFound("x".into()).is_slot_failure());
        assert!(
            Error::ShortRead {
                expected: 4,
                actual: 2
            }
            .is_slot_failure()
        );
        assert!(Error::DecompressionError("x".into()).is_slot_failure());
        assert!(Error::DecodeError("x".into()).is_slot_failure());
        assert!(Error::OutOfMemory.is_slot_failure());
        assert!(!Error::InvalidArgument("x".into()).is_slot_failure());
    }

    #[test]
    fn sync_rejection_variants() {
        assert!(Error::InvalidArgument("x".into()).is_sync_rejection());
        assert!(Error::InvalidPath("x".into()).is_sync_rejection());
        assert!(Error::BufferOverflow("x".into()).is_sync_rejection());
        assert!(Error::PackageFormat("x".into()).is_sync_rejection());
        assert!(Error::Corrupted("x".into()).is_sync_rejection());
        assert!(!Error::OutOfMemory.is_sync_rejection());
    }

    #[test]
    fn display_messages_are_readable() {
        assert_eq!(
            Error::ShortRead {
                expected: 10,
                actual: 3
            }
            .to_string(),
            "short read: expected 10 bytes, got 3"
        );
        assert_eq!(Error::OutOfMemory.to_string(), "out of memory");
    }
}
