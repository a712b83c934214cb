//! The load state machine (component D): drives one outstanding load from
//! `Opened` through `Reading`/`Decompressing`/`Finalizing` to a terminal
//! state.
//!
//! Ownership discipline (§5): background threads (the async read
//! coordinator, the decompression pool) write only into the [`LoadState`]
//! owned by the load they service, and transfer ownership back to the main
//! thread at phase boundaries via [`LoadState::phase`], an atomic. Nothing
//! about slot-table or link-ring state is touched from a worker thread.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use crate::async_read::Ticket;
use crate::codec::Decompressor;
use crate::decode::{AssetDecoder, StreamedSoundOpener};
use crate::error::Error;
use crate::file::FileRef;
use crate::mark::Mark;
use crate::package::PackageModule;

/// Where a load's raw (possibly compressed) bytes come from, set once at
/// submission and read by the pump step while in `Opened`/`ReadingRaw`.
#[derive(Clone)]
pub enum RawSource {
    /// Read through the async read coordinator against a host file.
    Filesystem(FileRef),
    /// Read synchronously through a package module's own `read_at` (§4.8
    /// gives packages no async contract, only a fallible sync call).
    Package {
        module: Arc<dyn PackageModule>,
        file_ref: u64,
    },
}

/// A phase in the lifecycle of one load, matching §4.4 verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Phase {
    /// Path resolved, file handle obtained, sizes known, buffer allocated.
    Opened = 0,
    /// One or more async reads in flight covering the compressed span.
    ReadingRaw = 1,
    /// All raw bytes in RAM; the decode callback runs once.
    DecompressingInline = 2,
    /// A worker has partial compressed bytes and produces partial
    /// uncompressed output; may re-enter `ReadingRaw` for the next chunk.
    DecompressingStream = 3,
    /// Bytes handed to the type-specific finalizer. Always run from the
    /// thread calling `sync`/`wait`, never from a worker thread.
    Finalizing = 4,
    /// Result stored in the slot.
    Ready = 5,
    /// Result is an error; the slot's payload pointer is cleared.
    Failed = 6,
    /// The slot was freed before finalization completed.
    Cancelled = 7,
}

impl Phase {
    fn from_u8(v: u8) -> Phase {
        match v {
            0 => Phase::Opened,
            1 => Phase::ReadingRaw,
            2 => Phase::DecompressingInline,
            3 => Phase::DecompressingStream,
            4 => Phase::Finalizing,
            5 => Phase::Ready,
            6 => Phase::Failed,
            7 => Phase::Cancelled,
            _ => unreachable!("invalid phase encoding"),
        }
    }

    /// True for `Ready`, `Failed`, and `Cancelled` — the three states
    /// `sync`/`wait` treat as "done" for fence purposes.
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Ready | Phase::Failed | Phase::Cancelled)
    }
}

/// The result of a finished load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    /// Still running.
    Pending,
    /// Finished successfully.
    Ok,
    /// Finished with an error.
    Error,
}

/// Type-specific parameters a load carries so the right finalizer runs on
/// `Finalizing`. The finalizer itself is an external collaborator (§1); the
/// core only needs to know which one to call and with what inline
/// parameters.
#[derive(Debug, Clone)]
pub enum LoadKind {
    /// Finalizes to a `Data` slot: no decoding, the raw (decompressed)
    /// bytes are the payload.
    Data,
    /// Finalizes through an externally supplied texture decoder.
    Texture,
    /// Finalizes through an externally supplied bitmap-font decoder.
    BitmapFont,
    /// Finalizes through an externally supplied FreeType-style font
    /// decoder.
    FreetypeFont,
    /// Finalizes through an externally supplied sound decoder.
    Sound,
    /// Finalizes to a `StreamedSound` slot: decoding is deferred to first
    /// playback, the load only needs the file range.
    StreamedSound,
    /// Finalizes to a `File` slot: no decode, the finalizer only needs the
    /// resolved file handle and byte range (`open_file`).
    File,
}

/// Everything [`LoadState::new`] needs, grouped so call sites don't have to
/// track ten positional arguments (mirrors the builder-of-plain-fields shape
/// used by [`crate::config::ConfigBuilder`]).
pub struct LoadRequest {
    pub path: String,
    pub mark_at_submit: Mark,
    pub source: RawSource,
    pub offset: u64,
    pub compressed: bool,
    pub compressed_length: u64,
    pub uncompressed_size_hint: u64,
    pub codec_id: u32,
    pub kind: LoadKind,
    pub decoder: Option<Arc<dyn AssetDecoder>>,
    pub streamed_opener: Option<Arc<dyn StreamedSoundOpener>>,
}

/// Heap-lived state for one outstanding load, referenced by at most one
/// slot plus at most one pending async-read or decompress ticket at a time.
pub struct LoadState {
    /// Logical path this load was submitted for (debug/diagnostic only).
    pub path: String,
    /// Mark recorded at submission time (§4.6: `load_*` increments the
    /// manager's mark and records it here).
    pub mark_at_submit: Mark,
    /// Where to read the raw bytes from.
    pub source: RawSource,
    /// Byte offset within `source` the read starts at.
    pub offset: u64,
    /// Whether the source data is compressed.
    pub compressed: bool,
    /// Compressed length on disk/in the package.
    pub compressed_length: u64,
    /// Hint for the uncompressed size, used to preallocate the output
    /// buffer.
    pub uncompressed_size_hint: u64,
    /// Codec identifier to decompress with, when `compressed`.
    pub codec_id: u32,
    /// What finalizer to run in `Finalizing`.
    pub kind: LoadKind,
    /// The decode callback to invoke in `Finalizing`, for kinds that need
    /// one (absent for `Data`, `StreamedSound`, and `File`, which finalize
    /// without calling out to an external collaborator).
    pub decoder: Option<Arc<dyn AssetDecoder>>,
    /// The streamed-sound opener to invoke in `Finalizing`, for
    /// `LoadKind::StreamedSound` only.
    pub streamed_opener: Option<Arc<dyn StreamedSoundOpener>>,
    /// Grows/shrinks during the lifecycle; `None` before the first read
    /// completes, `Some` with the accumulated raw or decompressed bytes
    /// thereafter.
    pub buffer: Mutex<Option<Vec<u8>>>,
    /// Holds the shared buffer an in-flight async read writes into, so the
    /// pump step can retrieve it once the read coordinator reports the
    /// ticket done.
    pub pending_buffer: Mutex<Option<Arc<Mutex<Vec<u8>>>>>,
    /// The phase, stored atomically so a worker thread can observe/publish
    /// it without taking any lock the main thread might be holding.
    phase: AtomicU8,
    /// Ticket for the in-flight async read, if any.
    pub read_ticket: Mutex<Option<Ticket>>,
    /// How many compressed-source bytes have been read so far. Advances by
    /// one chunk per `Opened` → `ReadingRaw` round trip in background/
    /// streaming mode (§4.3); equals `compressed_length` after a single
    /// round trip in inline mode.
    pub bytes_consumed: Mutex<u64>,
    /// Length requested by the in-flight (or just-completed) raw read,
    /// checked against the actual bytes read to detect short reads.
    pub chunk_request_len: Mutex<u64>,
    /// Whether this load decided, once and for all at its first `Opened`
    /// step, to run in background/streaming mode (chunked reads feeding an
    /// incremental decompressor) rather than inline (whole buffer, one
    /// `decompress` call). Decided once so a `set_background_params` call
    /// mid-load can't change a load's behavior partway through (§4.3).
    pub background_mode: AtomicBool,
    /// Whether `background_mode` has been decided yet.
    pub mode_decided: AtomicBool,
    /// The persistent decompressor instance fed one chunk at a time in
    /// background/streaming mode. `None` until the first chunk arrives;
    /// consumed (via `finish`) when the stream reaches `Done` or errors.
    pub decompressor: Mutex<Option<Box<dyn Decompressor>>>,
    /// Decompressed output accumulated across chunks in background/
    /// streaming mode, moved into `buffer` once the stream completes.
    pub stream_output: Mutex<Vec<u8>>,
    /// Set once a load is cancelled (slot freed mid-load); workers check
    /// this after completing their unit of work and avoid publishing
    /// results for a cancelled load.
    aborted: std::sync::atomic::AtomicBool,
    /// Final result classification.
    result: Mutex<ResultCode>,
    /// The terminal error, if `result == Error`.
    pub error: Mutex<Option<Error>>,
}

impl LoadState {
    /// Creates a fresh load state in the `Opened` phase.
    pub fn new(req: LoadRequest) -> Self {
        LoadState {
            path: req.path,
            mark_at_submit: req.mark_at_submit,
            source: req.source,
            offset: req.offset,
            compressed: req.compressed,
            compressed_length: req.compressed_length,
            uncompressed_size_hint: req.uncompressed_size_hint,
            codec_id: req.codec_id,
            kind: req.kind,
            decoder: req.decoder,
            streamed_opener: req.streamed_opener,
            buffer: Mutex::new(None),
            pending_buffer: Mutex::new(None),
            phase: AtomicU8::new(Phase::Opened as u8),
            read_ticket: Mutex::new(None),
            bytes_consumed: Mutex::new(0),
            chunk_request_len: Mutex::new(0),
            background_mode: AtomicBool::new(false),
            mode_decided: AtomicBool::new(false),
            decompressor: Mutex::new(None),
            stream_output: Mutex::new(Vec::new()),
            aborted: std::sync::atomic::AtomicBool::new(false),
            result: Mutex::new(ResultCode::Pending),
            error: Mutex::new(None),
        }
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Acquire))
    }

    /// Publishes a new phase. Called by whichever thread (main or worker)
    /// completes the transition.
    pub fn set_phase(&self, phase: Phase) {
        self.phase.store(phase as u8, Ordering::Release);
    }

    /// True if the load has been cancelled (its slot was freed before
    /// finalization).
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// Marks the load cancelled. Any in-flight read/decompress MAY still
    /// run to completion against the (now-orphaned) buffer; the terminal
    /// handler, not the freeing thread, reaps the `LoadState` per §5.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::Release);
    }

    /// Records the terminal result and transitions to the matching phase.
    pub fn complete_ok(&self) {
        *self.result.lock().expect("poisoned") = ResultCode::Ok;
        self.set_phase(Phase::Ready);
    }

    /// Records a terminal error and transitions to `Failed`.
    pub fn complete_error(&self, error: Error) {
        *self.error.lock().expect("poisoned") = Some(error);
        *self.result.lock().expect("poisoned") = ResultCode::Error;
        self.set_phase(Phase::Failed);
    }

    /// Current result classification.
    pub fn result(&self) -> ResultCode {
        *self.result.lock().expect("poisoned")
    }
}

/// A shared handle to a [`LoadState`], held by the owning slot and by the
/// pending-load index the mark/sync machinery uses to drive finalization.
pub type LoadHandle = std::sync::Arc<LoadState>;

#[cfg(test)]
mod tests {
    use super::*;

    fn test_request() -> LoadRequest {
        use crate::file::{FileLayer, StdFileLayer};
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let file = StdFileLayer.open(tmp.path().to_str().unwrap()).unwrap();
        LoadRequest {
            path: "x".into(),
            mark_at_submit: Mark::for_test(1),
            source: RawSource::Filesystem(file),
            offset: 0,
            compressed: false,
            compressed_length: 0,
            uncompressed_size_hint: 0,
            codec_id: 0,
            kind: LoadKind::Data,
            decoder: None,
            streamed_opener: None,
        }
    }

    #[test]
    fn new_load_starts_opened_and_pending() {
        let load = LoadState::new(test_request());
        assert_eq!(load.phase(), Phase::Opened);
        assert_eq!(load.result(), ResultCode::Pending);
        assert!(!load.phase().is_terminal());
    }

    #[test]
    fn complete_ok_reaches_ready() {
        let load = LoadState::new(test_request());
        load.complete_ok();
        assert_eq!(load.phase(), Phase::Ready);
        assert_eq!(load.result(), ResultCode::Ok);
        assert!(load.phase().is_terminal());
    }

    #[test]
    fn complete_error_reaches_failed_with_error_stored() {
        let load = LoadState::new(test_request());
        load.complete_error(Error::NotFound("x".into()));
        assert_eq!(load.phase(), Phase::Failed);
        assert_eq!(load.result(), ResultCode::Error);
        assert!(load.error.lock().unwrap().is_some());
    }

    #[test]
    fn abort_sets_flag_without_changing_phase() {
        let load = LoadState::new(test_request());
        load.abort();
        assert!(load.is_aborted());
        assert_eq!(load.phase(), Phase::Opened);
    }
}
