//! The resource manager façade (component A): owns one manager's slot
//! table, mark counter, configuration, package registry, codec registry,
//! file layer, async read coordinator, and decompression pool, and exposes
//! every public operation in terms of them.
//!
//! Link resolution (`get_*`, `link`, `link_weak`, `free`) can cross manager
//! boundaries (§4.5: `link(src_mgr, src_id)` aliases a resource owned by a
//! *different* manager), so this module also keeps a process-wide registry
//! mapping [`ManagerId`] to a weak handle on the owning manager's shared
//! state, consulted by [`GlobalAccess`] one method call at a time (never
//! holding one manager's slot-table lock while calling into another's).

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock, Weak};

use crate::async_read::{AsyncReadCoordinator, Completion};
use crate::codec::{self, DecompressOutcome};
use crate::config::Config;
use crate::decode::{AssetDecoder, StreamedSoundOpener};
use crate::error::{Error, Result};
use crate::file::{FileLayer, FileRef, StdFileLayer};
use crate::link::{self, RingLink, RingShape, SlotAccess};
use crate::load::{LoadHandle, LoadKind, LoadRequest, LoadState, Phase, RawSource};
use crate::mark::{Mark, MarkState};
use crate::package::{self, PackageModule};
use crate::path::{self, Resolved};
use crate::pool::ManagedPool;
use crate::slot::{Handle, ManagerId, ResourceId, Slot, SlotRef, SlotTable};

fn next_manager_id() -> ManagerId {
    static COUNTER: AtomicU32 = AtomicU32::new(1);
    ManagerId(COUNTER.fetch_add(1, Ordering::Relaxed))
}

type Registry = Mutex<Vec<(ManagerId, Weak<ManagerShared>)>>;

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(Vec::new()))
}

fn register_manager(id: ManagerId, shared: &Arc<ManagerShared>) {
    let mut reg = registry().lock().expect("poisoned");
    reg.retain(|(_, w)| w.strong_count() > 0);
    reg.push((id, Arc::downgrade(shared)));
}

/// Looks up the live manager for `id` and runs `f` against it, dropping the
/// registry lock before `f` runs so nested lookups (e.g. a cross-manager
/// `promote_to_anchor`) never deadlock on it.
fn with_manager<R>(id: ManagerId, f: impl FnOnce(&ManagerShared) -> R) -> Option<R> {
    let shared = {
        let reg = registry().lock().expect("poisoned");
        reg.iter().find(|(mid, _)| *mid == id).and_then(|(_, w)| w.upgrade())
    }?;
    Some(f(&shared))
}

fn index_of(id: ResourceId) -> u32 {
    id.get() - 1
}

fn id_of(index: u32) -> Option<ResourceId> {
    ResourceId::new(index + 1)
}

/// Entry in a manager's raw-file table, backing `File`/`StreamedSound`
/// slots. Reuses [`SlotRef`]'s `(ManagerId, index)` shape as an opaque
/// pointer into this side array rather than the slot table itself: file
/// handles and package file references aren't resources in their own right
/// (no mark, no get_*), so giving them a real slot would need a whole extra
/// family of no-op slot variants just to carry two fields.
enum RawFile {
    Filesystem(FileRef),
    Package {
        module: Arc<dyn PackageModule>,
        file_ref: u64,
    },
}

impl Clone for RawFile {
    fn clone(&self) -> Self {
        match self {
            RawFile::Filesystem(f) => RawFile::Filesystem(f.clone()),
            RawFile::Package { module, file_ref } => RawFile::Package {
                module: Arc::clone(module),
                file_ref: *file_ref,
            },
        }
    }
}

impl From<RawSource> for RawFile {
    fn from(source: RawSource) -> Self {
        match source {
            RawSource::Filesystem(f) => RawFile::Filesystem(f),
            RawSource::Package { module, file_ref } => RawFile::Package { module, file_ref },
        }
    }
}

struct PendingLoad {
    slot_index: u32,
    load: LoadHandle,
}

struct ManagerShared {
    id: ManagerId,
    slots: Mutex<SlotTable>,
    mark: MarkState,
    config: RwLock<Config>,
    packages: package::Registry,
    codecs: RwLock<codec::Registry>,
    file_layer: Arc<dyn FileLayer>,
    async_read: AsyncReadCoordinator,
    pool: ManagedPool,
    pending: Mutex<BTreeMap<u32, PendingLoad>>,
    raw_files: Mutex<Vec<RawFile>>,
}

/// Where a resolved path's bytes live, ahead of any load being submitted.
enum Source {
    Package {
        module: Arc<dyn PackageModule>,
        info: package::FileInfo,
    },
    Filesystem {
        file: FileRef,
        size: u64,
    },
}

/// One namespace of resources: a slot table plus the machinery (path
/// resolution, async reads, background decompression, mark/sync) that
/// drives asynchronous loads to completion.
///
/// Cloning a `ResourceManager` is cheap and shares the same underlying
/// state (it is a thin `Arc` wrapper); every clone observes the same slots,
/// marks, and pending loads.
#[derive(Clone)]
pub struct ResourceManager {
    shared: Arc<ManagerShared>,
}

impl ResourceManager {
    /// Creates a manager with the given initial slot capacity and default
    /// configuration, backed by the real filesystem.
    pub fn new(capacity: usize) -> Self {
        Self::with_config(capacity, Config::default())
    }

    /// Creates a manager with explicit configuration, backed by the real
    /// filesystem.
    pub fn with_config(capacity: usize, config: Config) -> Self {
        Self::with_file_layer(capacity, config, Arc::new(StdFileLayer))
    }

    /// Creates a manager against a caller-supplied [`FileLayer`], for
    /// embedding applications that sandbox or virtualize file access.
    pub fn with_file_layer(capacity: usize, config: Config, file_layer: Arc<dyn FileLayer>) -> Self {
        let id = next_manager_id();
        let worker_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let async_read = AsyncReadCoordinator::new(Arc::clone(&file_layer), worker_count, capacity.max(8));
        let pool = ManagedPool::new(config.pool_size(), config.chunk_size(), config.read_ahead());

        let mut codecs = codec::Registry::new();
        codecs.register(codec::method::STORE, || Box::new(codec::StoreDecompressor));
        #[cfg(feature = "deflate")]
        codecs.register(codec::method::DEFLATE, || {
            Box::new(codec::deflate::DeflateDecompressor::new())
        });

        let shared = Arc::new(ManagerShared {
            id,
            slots: Mutex::new(SlotTable::new(capacity)),
            mark: MarkState::new(),
            config: RwLock::new(config),
            packages: package::Registry::new(),
            codecs: RwLock::new(codecs),
            file_layer,
            async_read,
            pool,
            pending: Mutex::new(BTreeMap::new()),
            raw_files: Mutex::new(Vec::new()),
        });
        register_manager(id, &shared);
        log::debug!("resource manager {:?} created, capacity {capacity}", id);
        ResourceManager { shared }
    }

    /// This manager's process-wide identifier, used as the first half of a
    /// cross-manager link target.
    pub fn id(&self) -> ManagerId {
        self.shared.id
    }

    /// A snapshot of the current configuration.
    pub fn config(&self) -> Config {
        self.shared.config.read().expect("poisoned").clone()
    }

    /// Registers a package module under `prefix` (§4.2). Fails if `prefix`
    /// is already registered or empty; global state is unchanged on
    /// failure.
    pub fn register_package(&self, prefix: &str, module: Arc<dyn PackageModule>) -> Result<()> {
        self.shared.packages.register(prefix, module)
    }

    /// Unregisters the package module at `prefix`, if any (idempotent).
    pub fn unregister_package(&self, prefix: &str) {
        self.shared.packages.unregister(prefix);
    }

    /// Reconfigures background decompression parameters at runtime (§4.6):
    /// rebuilds the worker pool only if `pool_size` actually changes.
    pub fn set_background_params(&self, enabled: bool, chunk_size: usize, read_ahead: usize, pool_size: usize) {
        {
            let mut config = self.shared.config.write().expect("poisoned");
            let prefix = config.resource_path_prefix().map(|s| s.to_string());
            let mut builder = Config::builder()
                .background_decompression(enabled)
                .chunk_size(chunk_size)
                .read_ahead(read_ahead)
                .pool_size(pool_size);
            if let Some(prefix) = prefix {
                builder = builder.resource_path_prefix(prefix);
            }
            *config = builder.build();
        }
        self.shared.pool.reconfigure(pool_size, chunk_size, read_ahead);
        log::debug!(
            "manager {:?} background params updated: enabled={enabled} chunk_size={chunk_size} read_ahead={read_ahead} pool_size={pool_size}",
            self.shared.id
        );
    }

    /// True if `path` currently resolves to a package entry or host file,
    /// without performing a load.
    pub fn exists(&self, path: &str) -> bool {
        self.resolve_source(path).is_ok()
    }

    fn resolve_source(&self, path: &str) -> Result<Source> {
        let prefixes = self.shared.packages.prefixes();
        let resource_prefix = self.shared.config.read().expect("poisoned").resource_path_prefix().map(|s| s.to_string());
        match path::resolve(path, &prefixes, resource_prefix.as_deref())? {
            Resolved::Package { prefix, intra_path } => {
                let module = self
                    .shared
                    .packages
                    .get(&prefix)
                    .ok_or_else(|| Error::NotFound(prefix.clone()))?;
                let info = module
                    .file_info(&intra_path)?
                    .ok_or_else(|| Error::NotFound(intra_path))?;
                Ok(Source::Package { module, info })
            }
            Resolved::Filesystem { path } => {
                let file = self.shared.file_layer.open(&path)?;
                let size = self.shared.file_layer.size(&file)?;
                Ok(Source::Filesystem { file, size })
            }
        }
    }

    // ---- §4.5 immediate creation operations ----------------------------

    fn new_data(&self, bytes: Vec<u8>) -> Option<ResourceId> {
        let idx = {
            let mut slots = self.shared.slots.lock().expect("poisoned");
            slots.allocate()
        };
        let mark = self.shared.mark.next();
        {
            let mut slots = self.shared.slots.lock().expect("poisoned");
            slots.set(
                idx,
                Slot::Data {
                    bytes: Arc::new(bytes),
                    mark_created: mark.value(),
                },
            );
        }
        self.shared.mark.complete(mark);
        id_of(idx)
    }

    fn new_handle(&self, handle: Handle, make: impl FnOnce(Handle, u32) -> Slot) -> Option<ResourceId> {
        let idx = {
            let mut slots = self.shared.slots.lock().expect("poisoned");
            slots.allocate()
        };
        let mark = self.shared.mark.next();
        {
            let mut slots = self.shared.slots.lock().expect("poisoned");
            slots.set(idx, make(handle, mark.value()));
        }
        self.shared.mark.complete(mark);
        id_of(idx)
    }

    /// Creates a `Data` resource from a borrowed byte slice, copying it.
    pub fn create_data(&self, bytes: &[u8]) -> Option<ResourceId> {
        self.new_data(bytes.to_vec())
    }

    /// Creates a `Data` resource, taking ownership of `bytes` without a
    /// copy.
    pub fn take_data(&self, bytes: Vec<u8>) -> Option<ResourceId> {
        self.new_data(bytes)
    }

    /// Creates a new `Data` resource holding a copy of `id`'s current
    /// bytes.
    pub fn copy_data(&self, id: ResourceId) -> Option<ResourceId> {
        let bytes = self.get_data(id)?;
        self.new_data((*bytes).clone())
    }

    /// Creates a `Data` resource holding `s`'s bytes plus a trailing NUL,
    /// matching C string duplication semantics.
    pub fn strdup(&self, s: &str) -> Option<ResourceId> {
        let mut bytes = Vec::with_capacity(s.len() + 1);
        bytes.extend_from_slice(s.as_bytes());
        bytes.push(0);
        self.new_data(bytes)
    }

    /// Wraps an externally constructed texture handle.
    pub fn new_texture(&self, handle: Handle) -> Option<ResourceId> {
        self.new_handle(handle, |h, m| Slot::Texture {
            handle: h,
            mark_created: m,
        })
    }

    /// Wraps a texture handle sourced from an existing display surface
    /// rather than a freshly decoded image. The slot representation is
    /// identical to [`Self::new_texture`]; only the caller's provenance for
    /// the handle differs.
    pub fn new_texture_from_display(&self, handle: Handle) -> Option<ResourceId> {
        self.new_texture(handle)
    }

    /// Wraps an externally constructed texture handle (alias of
    /// [`Self::new_texture`], matching the take/new naming pair used by the
    /// data operations).
    pub fn take_texture(&self, handle: Handle) -> Option<ResourceId> {
        self.new_texture(handle)
    }

    /// Wraps an externally constructed sound handle.
    pub fn take_sound(&self, handle: Handle) -> Option<ResourceId> {
        self.new_handle(handle, |h, m| Slot::Sound {
            handle: h,
            mark_created: m,
        })
    }

    // ---- §4.5 async load operations -------------------------------------

    fn submit_load(
        &self,
        path: &str,
        kind: LoadKind,
        decoder: Option<Arc<dyn AssetDecoder>>,
        streamed_opener: Option<Arc<dyn StreamedSoundOpener>>,
    ) -> Option<ResourceId> {
        let source = self.resolve_source(path).ok()?;
        let (raw_source, offset, compressed, compressed_length, uncompressed_size_hint, codec_id) = match source {
            Source::Filesystem { file, size } => (RawSource::Filesystem(file), 0, false, size, size, 0u32),
            Source::Package { module, info } => {
                if matches!(kind, LoadKind::File) && info.compressed {
                    // §4.9: compressed package entries cannot back a File
                    // slot; `open_file` must fail rather than hand back a
                    // cursor over bytes nobody will ever decompress.
                    return None;
                }
                let codec_id = module.codec_id();
                (
                    RawSource::Package {
                        module,
                        file_ref: info.file_ref,
                    },
                    info.offset,
                    info.compressed,
                    info.length,
                    info.uncompressed_size,
                    codec_id,
                )
            }
        };

        let idx = {
            let mut slots = self.shared.slots.lock().expect("poisoned");
            slots.allocate()
        };
        let mark = self.shared.mark.next();
        let skip_raw_read = matches!(kind, LoadKind::File | LoadKind::StreamedSound);
        let load = Arc::new(LoadState::new(LoadRequest {
            path: path.to_string(),
            mark_at_submit: mark,
            source: raw_source,
            offset,
            compressed,
            compressed_length,
            uncompressed_size_hint,
            codec_id,
            kind,
            decoder,
            streamed_opener,
        }));
        if skip_raw_read {
            // `File`/`StreamedSound` loads never need the bytes themselves,
            // only the resolved range; finalize commits that range without
            // ever reading it.
            load.set_phase(Phase::Finalizing);
        }
        {
            let mut slots = self.shared.slots.lock().expect("poisoned");
            slots.set(
                idx,
                Slot::Pending {
                    load: Arc::clone(&load),
                    mark_created: mark.value(),
                },
            );
        }
        self.shared
            .pending
            .lock()
            .expect("poisoned")
            .insert(mark.value(), PendingLoad { slot_index: idx, load });
        id_of(idx)
    }

    /// Begins an asynchronous load of a `Data` resource from `path`.
    pub fn load_data(&self, path: &str) -> Option<ResourceId> {
        self.submit_load(path, LoadKind::Data, None, None)
    }

    /// Begins an asynchronous load of a texture, decoded by `decoder` once
    /// the raw bytes are ready.
    pub fn load_texture(&self, path: &str, decoder: Arc<dyn AssetDecoder>) -> Option<ResourceId> {
        self.submit_load(path, LoadKind::Texture, Some(decoder), None)
    }

    /// Begins an asynchronous load of a bitmap font.
    pub fn load_bitmap_font(&self, path: &str, decoder: Arc<dyn AssetDecoder>) -> Option<ResourceId> {
        self.submit_load(path, LoadKind::BitmapFont, Some(decoder), None)
    }

    /// Begins an asynchronous load of a FreeType-style font.
    pub fn load_freetype_font(&self, path: &str, decoder: Arc<dyn AssetDecoder>) -> Option<ResourceId> {
        self.submit_load(path, LoadKind::FreetypeFont, Some(decoder), None)
    }

    /// Begins an asynchronous load of a fully-decoded sound.
    pub fn load_sound(&self, path: &str, decoder: Arc<dyn AssetDecoder>) -> Option<ResourceId> {
        self.submit_load(path, LoadKind::Sound, Some(decoder), None)
    }

    /// Begins an asynchronous open of a streamed sound: the file range is
    /// captured at `Finalizing`, decoding is deferred to first playback via
    /// `opener`.
    pub fn open_sound(&self, path: &str, opener: Arc<dyn StreamedSoundOpener>) -> Option<ResourceId> {
        self.submit_load(path, LoadKind::StreamedSound, None, Some(opener))
    }

    /// Opens a streamed sound over an already-open `File` resource's byte
    /// range, without re-resolving a path.
    pub fn open_sound_from_file(&self, file_id: ResourceId, opener: Arc<dyn StreamedSoundOpener>) -> Option<ResourceId> {
        let file_idx = index_of(file_id);
        let (raw_idx, base_offset, length) = {
            let slots = self.shared.slots.lock().expect("poisoned");
            match slots.get(file_idx) {
                Some(Slot::File {
                    file_ref,
                    base_offset,
                    length,
                    ..
                }) => (file_ref.index, *base_offset, *length),
                _ => return None,
            }
        };
        let raw_source = {
            let raw_files = self.shared.raw_files.lock().expect("poisoned");
            match raw_files.get(raw_idx as usize)?.clone() {
                RawFile::Filesystem(f) => RawSource::Filesystem(f),
                RawFile::Package { module, file_ref } => RawSource::Package { module, file_ref },
            }
        };

        let idx = {
            let mut slots = self.shared.slots.lock().expect("poisoned");
            slots.allocate()
        };
        let mark = self.shared.mark.next();
        let load = Arc::new(LoadState::new(LoadRequest {
            path: String::new(),
            mark_at_submit: mark,
            source: raw_source,
            offset: base_offset,
            compressed: false,
            compressed_length: length,
            uncompressed_size_hint: length,
            codec_id: 0,
            kind: LoadKind::StreamedSound,
            decoder: None,
            streamed_opener: Some(opener),
        }));
        load.set_phase(Phase::Finalizing);
        {
            let mut slots = self.shared.slots.lock().expect("poisoned");
            slots.set(
                idx,
                Slot::Pending {
                    load: Arc::clone(&load),
                    mark_created: mark.value(),
                },
            );
        }
        self.shared
            .pending
            .lock()
            .expect("poisoned")
            .insert(mark.value(), PendingLoad { slot_index: idx, load });
        id_of(idx)
    }

    /// Opens a file cursor over `path`. Returns `None` if `path` resolves
    /// to a compressed package entry (§4.9: compressed files cannot be
    /// opened this way).
    pub fn open_file(&self, path: &str) -> Option<ResourceId> {
        self.submit_load(path, LoadKind::File, None, None)
    }

    // ---- §4.6 mark / sync / wait -----------------------------------------

    /// Issues and immediately completes a mark, for call sites that need a
    /// fence value without an outstanding load behind it.
    pub fn mark(&self) -> Mark {
        let m = self.shared.mark.next();
        self.shared.mark.complete(m);
        m
    }

    /// Drives the pump loop once and reports whether every load at or
    /// before `mark` has reached a terminal state.
    pub fn sync(&self, mark: Mark) -> bool {
        pump(&self.shared);
        self.shared.mark.sync(mark)
    }

    /// Blocks, cooperatively pumping the load machinery, until every load
    /// at or before `mark` has reached a terminal state.
    pub fn wait(&self, mark: Mark) {
        loop {
            pump(&self.shared);
            if self.shared.mark.sync(mark) {
                return;
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
    }

    // ---- §4.5 get_*, is_stale, free, free_all -----------------------------

    fn resolve_payload(&self, id: ResourceId) -> Option<Slot> {
        let idx = index_of(id);
        let self_ref = SlotRef {
            manager: self.shared.id,
            index: idx,
        };

        let is_link = {
            let slots = self.shared.slots.lock().expect("poisoned");
            match slots.get(idx) {
                None | Some(Slot::Unused { .. }) | Some(Slot::Pending { .. }) | Some(Slot::FailedLoad { .. }) => {
                    return None;
                }
                Some(Slot::WeakLink { stale: true, .. }) => return None,
                Some(Slot::Link { .. }) | Some(Slot::WeakLink { .. }) => true,
                Some(_) => false,
            }
        };

        if !is_link {
            let slots = self.shared.slots.lock().expect("poisoned");
            return slots.get(idx).map(clone_anchor_slot);
        }

        match link::walk(&GlobalAccess, self_ref) {
            Ok(RingShape::Ring { anchor, .. }) => {
                with_manager(anchor.manager, |shared| {
                    shared.slots.lock().expect("poisoned").get(anchor.index).map(clone_anchor_slot)
                })
                .flatten()
            }
            _ => None,
        }
    }

    /// Returns the bytes of a `Data` resource (or the resolved payload of a
    /// link/weak-link aliasing one).
    pub fn get_data(&self, id: ResourceId) -> Option<Arc<Vec<u8>>> {
        match self.resolve_payload(id)? {
            Slot::Data { bytes, .. } => Some(bytes),
            _ => None,
        }
    }

    /// Returns the handle of a `Texture` resource.
    pub fn get_texture(&self, id: ResourceId) -> Option<Handle> {
        match self.resolve_payload(id)? {
            Slot::Texture { handle, .. } => Some(handle),
            _ => None,
        }
    }

    /// Returns the handle of a `Font` resource.
    pub fn get_font(&self, id: ResourceId) -> Option<Handle> {
        match self.resolve_payload(id)? {
            Slot::Font { handle, .. } => Some(handle),
            _ => None,
        }
    }

    /// Returns the handle of a `Sound` resource.
    pub fn get_sound(&self, id: ResourceId) -> Option<Handle> {
        match self.resolve_payload(id)? {
            Slot::Sound { handle, .. } => Some(handle),
            _ => None,
        }
    }

    /// Returns the handle of a `StreamedSound` resource.
    pub fn get_streamed_sound(&self, id: ResourceId) -> Option<Handle> {
        match self.resolve_payload(id)? {
            Slot::StreamedSound { handle, .. } => Some(handle),
            _ => None,
        }
    }

    /// True if `id` is a weak link whose last strong reference is gone.
    pub fn is_stale(&self, id: ResourceId) -> bool {
        let idx = index_of(id);
        let slots = self.shared.slots.lock().expect("poisoned");
        matches!(slots.get(idx), Some(Slot::WeakLink { stale: true, .. }))
    }

    /// Creates a strong alias in this manager to `src_id` in `src_mgr`
    /// (which may be `self`). Returns `None` if `src_id` does not currently
    /// name a live resource.
    pub fn link(&self, src_mgr: &ResourceManager, src_id: ResourceId) -> Option<ResourceId> {
        self.link_internal(src_mgr, src_id, false)
    }

    /// Creates a weak alias in this manager to `src_id` in `src_mgr`.
    pub fn link_weak(&self, src_mgr: &ResourceManager, src_id: ResourceId) -> Option<ResourceId> {
        self.link_internal(src_mgr, src_id, true)
    }

    fn link_internal(&self, src_mgr: &ResourceManager, src_id: ResourceId, weak: bool) -> Option<ResourceId> {
        let src_idx = index_of(src_id);
        let src_ref = SlotRef {
            manager: src_mgr.shared.id,
            index: src_idx,
        };
        {
            let slots = src_mgr.shared.slots.lock().expect("poisoned");
            match slots.get(src_idx) {
                None | Some(Slot::Unused { .. }) => return None,
                Some(Slot::WeakLink { stale: true, .. }) => return None,
                _ => {}
            }
        }

        let anchor = match link::walk(&GlobalAccess, src_ref) {
            Ok(RingShape::SingleAnchor) => src_ref,
            Ok(RingShape::Ring { anchor, .. }) => anchor,
            Err(_) => return None,
        };

        let idx = {
            let mut slots = self.shared.slots.lock().expect("poisoned");
            slots.allocate()
        };
        let new_ref = SlotRef {
            manager: self.shared.id,
            index: idx,
        };
        let mark = self.shared.mark.next();
        let placeholder = RingLink {
            target: anchor,
            prev: anchor,
            next: anchor,
        };
        {
            let mut slots = self.shared.slots.lock().expect("poisoned");
            slots.set(
                idx,
                if weak {
                    Slot::WeakLink {
                        ring: placeholder,
                        stale: false,
                        mark_created: mark.value(),
                    }
                } else {
                    Slot::Link {
                        ring: placeholder,
                        mark_created: mark.value(),
                    }
                },
            );
        }
        link::insert(&mut GlobalAccess, anchor, new_ref, weak);
        self.shared.mark.complete(mark);
        id_of(idx)
    }

    /// Frees `id`. Idempotent: freeing an unused/already-freed id is a
    /// no-op and returns `false`. Freeing a resource still loading aborts
    /// the load; freeing an anchor re-anchors the ring (or marks surviving
    /// weak links stale if no strong link remains).
    pub fn free(&self, id: ResourceId) -> bool {
        let idx = index_of(id);
        let self_ref = SlotRef {
            manager: self.shared.id,
            index: idx,
        };

        enum Disposition {
            Absent,
            AbortPending,
            RingNode,
            MaybeAnchor,
        }

        let disposition = {
            let slots = self.shared.slots.lock().expect("poisoned");
            match slots.get(idx) {
                None | Some(Slot::Unused { .. }) => Disposition::Absent,
                Some(Slot::Pending { .. }) => Disposition::AbortPending,
                Some(Slot::Link { .. }) | Some(Slot::WeakLink { .. }) => Disposition::RingNode,
                Some(_) => Disposition::MaybeAnchor,
            }
        };

        match disposition {
            Disposition::Absent => return false,
            Disposition::AbortPending => {
                let slots = self.shared.slots.lock().expect("poisoned");
                if let Some(Slot::Pending { load, .. }) = slots.get(idx) {
                    load.abort();
                }
            }
            Disposition::RingNode => {
                remove_ring_node(&self.shared, self_ref);
            }
            Disposition::MaybeAnchor => {
                let _ = link::remove_anchor(&mut GlobalAccess, self_ref);
            }
        }

        let mut slots = self.shared.slots.lock().expect("poisoned");
        slots.free(idx);
        true
    }

    /// Frees every currently allocated resource in this manager.
    pub fn free_all(&self) {
        let capacity = {
            let slots = self.shared.slots.lock().expect("poisoned");
            slots.capacity()
        };
        for idx in 0..capacity as u32 {
            if let Some(id) = id_of(idx) {
                self.free(id);
            }
        }
    }

    // ---- §4.9 file reads ---------------------------------------------------

    fn read_raw_file_at(&self, raw_idx: u32, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let entry = {
            let raw_files = self.shared.raw_files.lock().expect("poisoned");
            raw_files
                .get(raw_idx as usize)
                .cloned()
                .ok_or_else(|| Error::InvalidArgument("file handle no longer valid".into()))?
        };
        match entry {
            RawFile::Filesystem(f) => self.shared.file_layer.read_at(&f, offset, buf),
            RawFile::Package { module, file_ref } => module.read_at(file_ref, offset, buf),
        }
    }

    /// Reads from the current position of file resource `id`, advancing it
    /// by the number of bytes read. A read past the end of the file's
    /// range returns fewer bytes rather than an error.
    pub fn read_file(&self, id: ResourceId, buf: &mut [u8]) -> Result<usize> {
        let idx = index_of(id);
        let (raw_idx, base_offset, length, pos) = {
            let slots = self.shared.slots.lock().expect("poisoned");
            match slots.get(idx) {
                Some(Slot::File {
                    file_ref,
                    base_offset,
                    length,
                    current_position,
                    ..
                }) => (file_ref.index, *base_offset, *length, *current_position),
                _ => return Err(Error::InvalidArgument("not an open file handle".into())),
            }
        };
        let remaining = length.saturating_sub(pos);
        let want = (buf.len() as u64).min(remaining) as usize;
        let n = self.read_raw_file_at(raw_idx, base_offset + pos, &mut buf[..want])?;
        let mut slots = self.shared.slots.lock().expect("poisoned");
        if let Some(Slot::File { current_position, .. }) = slots.get_mut(idx) {
            *current_position = pos + n as u64;
        }
        Ok(n)
    }

    /// Reads `buf.len()` bytes (or fewer, clamped to the file's range)
    /// starting at `at`, without touching the resource's current position.
    pub fn read_file_at(&self, id: ResourceId, at: u64, buf: &mut [u8]) -> Result<usize> {
        let idx = index_of(id);
        let (raw_idx, base_offset, length) = {
            let slots = self.shared.slots.lock().expect("poisoned");
            match slots.get(idx) {
                Some(Slot::File {
                    file_ref,
                    base_offset,
                    length,
                    ..
                }) => (file_ref.index, *base_offset, *length),
                _ => return Err(Error::InvalidArgument("not an open file handle".into())),
            }
        };
        let clamped_at = at.min(length);
        let remaining = length - clamped_at;
        let want = (buf.len() as u64).min(remaining) as usize;
        self.read_raw_file_at(raw_idx, base_offset + clamped_at, &mut buf[..want])
    }

    /// Seeks file resource `id` to `pos`, clamped to `[0, length]`, and
    /// returns the resulting position. Returns `0` if `id` is not an open
    /// file.
    pub fn seek_file(&self, id: ResourceId, pos: u64) -> u64 {
        let idx = index_of(id);
        let mut slots = self.shared.slots.lock().expect("poisoned");
        match slots.get_mut(idx) {
            Some(Slot::File {
                length,
                current_position,
                ..
            }) => {
                *current_position = pos.min(*length);
                *current_position
            }
            _ => 0,
        }
    }
}

/// Splices a `Link`/`WeakLink` node out of its ring without disturbing the
/// anchor, used by `free()` when the freed slot is not itself the anchor.
fn remove_ring_node(shared: &Arc<ManagerShared>, r: SlotRef) {
    let Some(ring) = GlobalAccess.ring(r) else { return };
    if GlobalAccess.is_weak(r) {
        // A lone weak link carries no ring obligations to anyone else.
    }
    let prev = ring.prev;
    let next = ring.next;
    let mut access = GlobalAccess;
    if let Some(mut prev_ring) = access.ring(prev) {
        prev_ring.next = next;
        access.set_ring(prev, prev_ring);
    }
    if let Some(mut next_ring) = access.ring(next) {
        next_ring.prev = prev;
        access.set_ring(next, next_ring);
    }
    let _ = shared;
}

fn clone_anchor_slot(slot: &Slot) -> Slot {
    match slot {
        Slot::Data { bytes, mark_created } => Slot::Data {
            bytes: Arc::clone(bytes),
            mark_created: *mark_created,
        },
        Slot::Texture { handle, mark_created } => Slot::Texture {
            handle: *handle,
            mark_created: *mark_created,
        },
        Slot::Font { handle, mark_created } => Slot::Font {
            handle: *handle,
            mark_created: *mark_created,
        },
        Slot::Sound { handle, mark_created } => Slot::Sound {
            handle: *handle,
            mark_created: *mark_created,
        },
        Slot::StreamedSound {
            handle,
            file_ref,
            offset,
            length,
            mark_created,
        } => Slot::StreamedSound {
            handle: *handle,
            file_ref: *file_ref,
            offset: *offset,
            length: *length,
            mark_created: *mark_created,
        },
        Slot::File {
            file_ref,
            base_offset,
            length,
            current_position,
            mark_created,
        } => Slot::File {
            file_ref: *file_ref,
            base_offset: *base_offset,
            length: *length,
            current_position: *current_position,
            mark_created: *mark_created,
        },
        other => Slot::FailedLoad {
            mark_created: other.mark_created().unwrap_or(0),
        },
    }
}

fn register_raw_file(shared: &ManagerShared, source: RawSource) -> SlotRef {
    let mut raw_files = shared.raw_files.lock().expect("poisoned");
    let idx = raw_files.len() as u32;
    raw_files.push(RawFile::from(source));
    SlotRef {
        manager: shared.id,
        index: idx,
    }
}

fn decompress_all(registry: &codec::Registry, codec_id: u32, input: &[u8], size_hint: usize) -> Result<Vec<u8>> {
    let mut decompressor = registry
        .build(codec_id)
        .ok_or_else(|| Error::DecompressionError(format!("no codec registered for id {codec_id}")))?;
    decompressor.init()?;

    let mut out = vec![0u8; size_hint.max(input.len()).max(1)];
    let mut consumed = 0usize;
    let mut produced = 0usize;
    loop {
        let (c, p, outcome) = decompressor.decompress(&input[consumed..], &mut out[produced..])?;
        consumed += c;
        produced += p;
        match outcome {
            DecompressOutcome::Done => break,
            DecompressOutcome::Continue => {
                if c == 0 && p == 0 {
                    return Err(Error::DecompressionError("decompressor made no progress".into()));
                }
                if produced == out.len() {
                    out.resize(out.len() * 2, 0);
                }
            }
        }
    }
    out.truncate(produced);
    decompressor.finish()?;
    Ok(out)
}

/// Feeds one chunk of compressed bytes to a persistent decompressor
/// (background/streaming mode, §4.3), appending whatever it produces to
/// `output`. Returns `Done` once the decompressor reports the whole stream
/// finished, or `Continue` once this chunk's bytes are fully consumed and
/// more input is needed from the next chunk.
///
/// A `Continue` with zero bytes consumed *and* input remaining is a stuck
/// decompressor, not a chunk boundary, and is reported as an error exactly
/// like `decompress_all`'s equivalent check.
fn decompress_chunk(decompressor: &mut dyn codec::Decompressor, input: &[u8], output: &mut Vec<u8>) -> Result<DecompressOutcome> {
    let mut scratch = vec![0u8; input.len().max(1) * 2];
    let mut consumed = 0usize;
    let mut produced = 0usize;
    loop {
        let (c, p, outcome) = decompressor.decompress(&input[consumed..], &mut scratch[produced..])?;
        consumed += c;
        produced += p;
        match outcome {
            DecompressOutcome::Done => {
                output.extend_from_slice(&scratch[..produced]);
                return Ok(DecompressOutcome::Done);
            }
            DecompressOutcome::Continue => {
                if c == 0 && p == 0 {
                    if consumed < input.len() {
                        return Err(Error::DecompressionError("decompressor made no progress".into()));
                    }
                    output.extend_from_slice(&scratch[..produced]);
                    return Ok(DecompressOutcome::Continue);
                }
                if produced == scratch.len() {
                    scratch.resize(scratch.len() * 2, 0);
                }
            }
        }
    }
}

/// Runs on the background pool (or inline, if the pool is saturated): feeds
/// one chunk to this load's persistent decompressor and decides whether the
/// stream is done, needs another chunk (re-entering `Opened`), or has
/// failed.
fn run_stream_chunk(shared: &Arc<ManagerShared>, load: &LoadHandle, chunk_bytes: Vec<u8>) {
    let mut guard = load.decompressor.lock().expect("poisoned");
    if guard.is_none() {
        match shared.codecs.read().expect("poisoned").build(load.codec_id) {
            Some(mut d) => {
                if let Err(e) = d.init() {
                    drop(guard);
                    load.complete_error(e);
                    return;
                }
                *guard = Some(d);
            }
            None => {
                drop(guard);
                load.complete_error(Error::DecompressionError(format!("no codec registered for id {}", load.codec_id)));
                return;
            }
        }
    }

    let outcome = {
        let decompressor = guard.as_mut().expect("just initialized").as_mut();
        let mut output = load.stream_output.lock().expect("poisoned");
        decompress_chunk(decompressor, &chunk_bytes, &mut output)
    };

    match outcome {
        Ok(DecompressOutcome::Done) => {
            if let Some(d) = guard.take() {
                let _ = d.finish();
            }
            drop(guard);
            let out = std::mem::take(&mut *load.stream_output.lock().expect("poisoned"));
            *load.buffer.lock().expect("poisoned") = Some(out);
            load.set_phase(Phase::Finalizing);
        }
        Ok(DecompressOutcome::Continue) => {
            drop(guard);
            let remaining = load.compressed_length.saturating_sub(*load.bytes_consumed.lock().expect("poisoned"));
            if remaining > 0 {
                // §4.3/§4.4: re-enter the read path for the next chunk.
                load.set_phase(Phase::Opened);
            } else {
                load.complete_error(Error::DecompressionError(
                    "compressed stream ended before the decompressor reported completion".into(),
                ));
            }
        }
        Err(e) => {
            if let Some(d) = guard.take() {
                let _ = d.finish();
            }
            drop(guard);
            load.complete_error(e);
        }
    }
}

/// Decides (once, on a load's first `Opened` step) whether it runs inline
/// or in background/streaming mode, and returns the decision. A load that
/// is never compressed is never background/streaming, since there is
/// nothing to feed a decompressor chunk by chunk.
fn ensure_mode_decided(shared: &Arc<ManagerShared>, load: &LoadHandle) -> bool {
    if !load.mode_decided.swap(true, Ordering::AcqRel) {
        let enabled = load.compressed && shared.config.read().expect("poisoned").background_decompression();
        load.background_mode.store(enabled, Ordering::Release);
    }
    load.background_mode.load(Ordering::Acquire)
}

/// Drives every pending load's phase machine one step forward. Called from
/// both `sync` and `wait`, the single place that turns the crank (§5: the
/// "progress pump").
fn pump(shared: &Arc<ManagerShared>) {
    let marks: Vec<u32> = shared.pending.lock().expect("poisoned").keys().copied().collect();
    for mark_val in marks {
        let entry = shared
            .pending
            .lock()
            .expect("poisoned")
            .get(&mark_val)
            .map(|p| (p.slot_index, Arc::clone(&p.load)));
        let Some((slot_index, load)) = entry else { continue };

        if load.is_aborted() {
            if let Some(ticket) = load.read_ticket.lock().expect("poisoned").take() {
                shared.async_read.cancel(ticket);
            }
            shared.mark.complete(Mark::from_raw(mark_val));
            shared.pending.lock().expect("poisoned").remove(&mark_val);
            continue;
        }

        match load.phase() {
            Phase::Opened => pump_opened(shared, &load),
            Phase::ReadingRaw => pump_reading_raw(shared, &load),
            Phase::DecompressingInline | Phase::DecompressingStream => {}
            Phase::Finalizing => finalize(shared, mark_val, slot_index, &load),
            Phase::Ready | Phase::Failed | Phase::Cancelled => {
                shared.mark.complete(Mark::from_raw(mark_val));
                shared.pending.lock().expect("poisoned").remove(&mark_val);
            }
        }
    }
}

/// Submits the next raw read for a load that is either starting fresh or
/// re-entering the read path for its next chunk (§4.3/§4.4): inline mode
/// always requests the whole remaining span in one read; background/
/// streaming mode requests at most `chunk_size` bytes at a time.
fn pump_opened(shared: &Arc<ManagerShared>, load: &LoadHandle) {
    let background = ensure_mode_decided(shared, load);
    let bytes_consumed = *load.bytes_consumed.lock().expect("poisoned");
    let remaining = load.compressed_length.saturating_sub(bytes_consumed);

    if remaining == 0 {
        // Nothing left to read: an uncompressed load finalizes directly;
        // a (possibly zero-length) compressed load still has to let its
        // decompressor confirm the stream is actually finished.
        if load.compressed {
            advance_after_raw_read(shared, load, Vec::new());
        } else {
            load.set_phase(Phase::Finalizing);
        }
        return;
    }

    let chunk_len = if background {
        remaining.min(shared.pool.chunk_size().max(1) as u64)
    } else {
        remaining
    };
    *load.chunk_request_len.lock().expect("poisoned") = chunk_len;
    let read_offset = load.offset + bytes_consumed;

    match &load.source {
        RawSource::Filesystem(file) => {
            let buf = Arc::new(Mutex::new(Vec::new()));
            match shared
                .async_read
                .submit_read(file.clone(), read_offset, chunk_len as usize, Arc::clone(&buf))
            {
                Ok(ticket) => {
                    *load.pending_buffer.lock().expect("poisoned") = Some(buf);
                    *load.read_ticket.lock().expect("poisoned") = Some(ticket);
                    load.set_phase(Phase::ReadingRaw);
                }
                Err(Error::AsyncQueueFull) => {
                    // Retried on the next pump while still `Opened`.
                }
                Err(e) => load.complete_error(e),
            }
        }
        RawSource::Package { module, file_ref } => {
            let mut buf = vec![0u8; chunk_len as usize];
            match module.read_at(*file_ref, read_offset, &mut buf) {
                Ok(n) if n as u64 == chunk_len => advance_after_raw_read(shared, load, buf),
                Ok(n) => load.complete_error(Error::ShortRead {
                    expected: chunk_len as usize,
                    actual: n,
                }),
                Err(e) => load.complete_error(e),
            }
        }
    }
}

fn pump_reading_raw(shared: &Arc<ManagerShared>, load: &LoadHandle) {
    let ticket = *load.read_ticket.lock().expect("poisoned");
    let Some(ticket) = ticket else { return };
    let Some(completion) = shared.async_read.poll(ticket) else {
        return;
    };
    *load.read_ticket.lock().expect("poisoned") = None;

    match completion {
        Completion::Done { bytes_read } => {
            let buf = load.pending_buffer.lock().expect("poisoned").take();
            let bytes = buf.map(|b| b.lock().expect("poisoned").clone()).unwrap_or_default();
            let expected = *load.chunk_request_len.lock().expect("poisoned");
            if bytes_read as u64 != expected {
                load.complete_error(Error::ShortRead {
                    expected: expected as usize,
                    actual: bytes_read,
                });
            } else {
                advance_after_raw_read(shared, load, bytes);
            }
        }
        Completion::Error(msg) => load.complete_error(Error::IoError(std::io::Error::other(msg))),
        Completion::Cancelled => load.complete_error(Error::IoError(std::io::Error::other("read cancelled"))),
    }
}

/// A chunk (the whole span, in inline mode) has just been read; advances
/// `bytes_consumed` and either finalizes directly (uncompressed), runs the
/// single-shot decompressor (inline), or feeds the persistent streaming
/// decompressor and possibly loops back for the next chunk (background).
fn advance_after_raw_read(shared: &Arc<ManagerShared>, load: &LoadHandle, chunk_bytes: Vec<u8>) {
    let chunk_len = chunk_bytes.len() as u64;
    *load.bytes_consumed.lock().expect("poisoned") += chunk_len;

    if !load.compressed {
        *load.buffer.lock().expect("poisoned") = Some(chunk_bytes);
        load.set_phase(Phase::Finalizing);
        return;
    }

    if load.background_mode.load(Ordering::Acquire) {
        load.set_phase(Phase::DecompressingStream);
        let pool = shared.pool.current();
        let shared2 = Arc::clone(shared);
        let load2 = Arc::clone(load);
        pool.submit_or_inline(move || run_stream_chunk(&shared2, &load2, chunk_bytes));
    } else {
        load.set_phase(Phase::DecompressingInline);
        let codec_id = load.codec_id;
        let hint = load.uncompressed_size_hint as usize;
        match decompress_all(&shared.codecs.read().expect("poisoned"), codec_id, &chunk_bytes, hint) {
            Ok(out) => {
                *load.buffer.lock().expect("poisoned") = Some(out);
                load.set_phase(Phase::Finalizing);
            }
            Err(e) => load.complete_error(e),
        }
    }
}

fn finalize_decoder(load: &LoadHandle, bytes: &[u8]) -> Result<Handle> {
    match &load.decoder {
        Some(d) => d.decode(bytes),
        None => Err(Error::DecodeError("no decoder supplied for this load".into())),
    }
}

fn finalize(shared: &Arc<ManagerShared>, mark_val: u32, slot_index: u32, load: &LoadHandle) {
    let bytes = load.buffer.lock().expect("poisoned").take().unwrap_or_default();

    let result: Result<Slot> = match &load.kind {
        LoadKind::Data => Ok(Slot::Data {
            bytes: Arc::new(bytes),
            mark_created: mark_val,
        }),
        LoadKind::Texture => finalize_decoder(load, &bytes).map(|h| Slot::Texture {
            handle: h,
            mark_created: mark_val,
        }),
        LoadKind::BitmapFont | LoadKind::FreetypeFont => finalize_decoder(load, &bytes).map(|h| Slot::Font {
            handle: h,
            mark_created: mark_val,
        }),
        LoadKind::Sound => finalize_decoder(load, &bytes).map(|h| Slot::Sound {
            handle: h,
            mark_created: mark_val,
        }),
        LoadKind::StreamedSound => match (&load.streamed_opener, &load.source) {
            (Some(opener), RawSource::Filesystem(file)) => opener
                .open(file, load.offset, load.compressed_length)
                .map(|h| {
                    let file_ref = register_raw_file(shared, load.source.clone());
                    Slot::StreamedSound {
                        handle: h,
                        file_ref,
                        offset: load.offset,
                        length: load.compressed_length,
                        mark_created: mark_val,
                    }
                }),
            (Some(_), RawSource::Package { .. }) => Err(Error::InvalidArgument(
                "streamed sound over a package entry is not supported".into(),
            )),
            (None, _) => Err(Error::InvalidArgument("no streamed sound opener supplied".into())),
        },
        LoadKind::File => {
            let file_ref = register_raw_file(shared, load.source.clone());
            Ok(Slot::File {
                file_ref,
                base_offset: load.offset,
                length: load.compressed_length,
                current_position: 0,
                mark_created: mark_val,
            })
        }
    };

    match result {
        Ok(slot) => {
            shared.slots.lock().expect("poisoned").set(slot_index, slot);
            load.complete_ok();
        }
        Err(e) => {
            log::warn!("load of '{}' failed to finalize: {e}", load.path);
            shared.slots.lock().expect("poisoned").set(
                slot_index,
                Slot::FailedLoad {
                    mark_created: mark_val,
                },
            );
            load.complete_error(e);
        }
    }

    shared.mark.complete(Mark::from_raw(mark_val));
    shared.pending.lock().expect("poisoned").remove(&mark_val);
}

/// A [`SlotAccess`] implementation that resolves any [`SlotRef`] by looking
/// up its owning manager in the process-wide registry, one method call at a
/// time. Never holds one manager's slot lock while acquiring another's,
/// since [`link::insert`]/[`link::remove_anchor`] interleave calls against
/// refs from potentially different managers.
struct GlobalAccess;

impl SlotAccess for GlobalAccess {
    fn is_link_node(&self, r: SlotRef) -> bool {
        with_manager(r.manager, |shared| {
            let slots = shared.slots.lock().expect("poisoned");
            matches!(slots.get(r.index), Some(Slot::Link { .. }) | Some(Slot::WeakLink { .. }))
        })
        .unwrap_or(false)
    }

    fn is_weak(&self, r: SlotRef) -> bool {
        with_manager(r.manager, |shared| {
            let slots = shared.slots.lock().expect("poisoned");
            matches!(slots.get(r.index), Some(Slot::WeakLink { .. }))
        })
        .unwrap_or(false)
    }

    fn ring(&self, r: SlotRef) -> Option<RingLink> {
        with_manager(r.manager, |shared| {
            let slots = shared.slots.lock().expect("poisoned");
            match slots.get(r.index) {
                Some(Slot::Link { ring, .. }) | Some(Slot::WeakLink { ring, .. }) => Some(*ring),
                Some(_) => slots.anchor_ring(r.index),
                None => None,
            }
        })
        .flatten()
    }

    fn set_ring(&mut self, r: SlotRef, ring: RingLink) {
        with_manager(r.manager, |shared| {
            let mut slots = shared.slots.lock().expect("poisoned");
            match slots.get_mut(r.index) {
                Some(Slot::Link { ring: old, .. }) | Some(Slot::WeakLink { ring: old, .. }) => *old = ring,
                Some(_) => slots.set_anchor_ring(r.index, Some(ring)),
                None => {}
            }
        });
    }

    fn mark_stale(&mut self, r: SlotRef) {
        with_manager(r.manager, |shared| {
            let mut slots = shared.slots.lock().expect("poisoned");
            if let Some(Slot::WeakLink { stale, .. }) = slots.get_mut(r.index) {
                *stale = true;
            }
        });
    }

    fn slot_count_of(&self, r: SlotRef) -> usize {
        with_manager(r.manager, |shared| shared.slots.lock().expect("poisoned").slot_count()).unwrap_or(1)
    }

    fn promote_to_anchor(&mut self, r: SlotRef, payload_source: SlotRef) {
        let payload = with_manager(payload_source.manager, |shared| {
            shared
                .slots
                .lock()
                .expect("poisoned")
                .get(payload_source.index)
                .map(clone_anchor_slot)
        })
        .flatten();
        if let Some(payload) = payload {
            with_manager(r.manager, |shared| {
                shared.slots.lock().expect("poisoned").set(r.index, payload);
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::IdentityDecoder;
    use std::io::Write;

    fn manager() -> ResourceManager {
        ResourceManager::new(4)
    }

    #[test]
    fn strdup_round_trips_and_grows() {
        let mgr = ResourceManager::new(1);
        let id = mgr.strdup("testing").unwrap();
        let data = mgr.get_data(id).unwrap();
        assert_eq!(&**data, b"testing\0");
        // Capacity-1 manager: allocating a second resource must grow rather
        // than fail.
        let id2 = mgr.strdup("more").unwrap();
        assert_ne!(id, id2);
        assert!(mgr.free(id));
        assert!(!mgr.free(id)); // idempotent
    }

    #[test]
    fn load_data_from_filesystem_round_trips() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"hello world").unwrap();
        tmp.flush().unwrap();

        let mgr = manager();
        let id = mgr.open_file(tmp.path().to_str().unwrap());
        assert!(id.is_some()); // open_file uses submit_load too; exercised below instead.

        let id = mgr.load_data(tmp.path().to_str().unwrap()).unwrap();
        let m = mgr.mark();
        // load_data's own mark is earlier than `m`; sync(m) must not be
        // satisfied until the pump has actually run.
        assert!(!mgr.sync(m));
        mgr.wait(m);
        let bytes = mgr.get_data(id).unwrap();
        assert_eq!(&**bytes, b"hello world");
    }

    #[test]
    fn get_before_ready_returns_none() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"data").unwrap();
        tmp.flush().unwrap();

        let mgr = manager();
        let id = mgr.load_data(tmp.path().to_str().unwrap()).unwrap();
        // Before any pump, the slot is Pending: get_data must not observe a
        // half-finalized payload.
        assert!(mgr.get_data(id).is_none());
        let m = mgr.mark();
        mgr.wait(m);
        assert!(mgr.get_data(id).is_some());
    }

    #[test]
    fn open_file_rejects_nothing_resolved() {
        let mgr = manager();
        assert!(mgr.open_file("/does/not/exist").is_none());
    }

    #[test]
    fn strong_link_is_transparent_to_get() {
        let mgr_a = manager();
        let mgr_b = manager();
        let id = mgr_a.strdup("shared").unwrap();
        let linked = mgr_b.link(&mgr_a, id).unwrap();
        assert_eq!(&**mgr_b.get_data(linked).unwrap(), b"shared\0");
    }

    #[test]
    fn weak_link_goes_stale_after_anchor_freed_with_no_strong_survivor() {
        let mgr = manager();
        let id = mgr.strdup("x").unwrap();
        let weak = mgr.link_weak(&mgr, id).unwrap();
        assert!(!mgr.is_stale(weak));
        mgr.free(id);
        assert!(mgr.is_stale(weak));
        assert!(mgr.get_data(weak).is_none());
    }

    #[test]
    fn strong_link_survives_anchor_free_by_reanchoring() {
        let mgr = manager();
        let id = mgr.strdup("reanchor me").unwrap();
        let strong = mgr.link(&mgr, id).unwrap();
        mgr.free(id);
        assert_eq!(&**mgr.get_data(strong).unwrap(), b"reanchor me\0");
    }

    #[test]
    fn texture_handles_round_trip_through_new_and_take() {
        let mgr = manager();
        let id = mgr.new_texture(42).unwrap();
        assert_eq!(mgr.get_texture(id), Some(42));
        let id2 = mgr.take_texture(7).unwrap();
        assert_eq!(mgr.get_texture(id2), Some(7));
    }

    #[test]
    fn load_texture_runs_decoder_at_finalize() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"abc").unwrap();
        tmp.flush().unwrap();

        let mgr = manager();
        let id = mgr
            .load_texture(tmp.path().to_str().unwrap(), Arc::new(IdentityDecoder))
            .unwrap();
        let m = mgr.mark();
        mgr.wait(m);
        let expected = b"abc".iter().fold(0u64, |acc, &b| acc.wrapping_mul(31).wrapping_add(b as u64));
        assert_eq!(mgr.get_texture(id), Some(expected));
    }

    #[test]
    fn free_all_clears_every_live_resource() {
        let mgr = manager();
        let a = mgr.strdup("a").unwrap();
        let b = mgr.strdup("b").unwrap();
        mgr.free_all();
        assert!(mgr.get_data(a).is_none());
        assert!(mgr.get_data(b).is_none());
    }

    #[test]
    fn file_read_clamps_past_end_instead_of_erroring() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"hi").unwrap();
        tmp.flush().unwrap();

        let mgr = manager();
        let id = mgr.open_file(tmp.path().to_str().unwrap()).unwrap();
        let m = mgr.mark();
        mgr.wait(m);
        let mut buf = [0u8; 16];
        let n = mgr.read_file(id, &mut buf).unwrap();
        assert_eq!(n, 2);
        assert_eq!(&buf[..2], b"hi");
        // Position is now at EOF; a further read returns 0, not an error.
        let n2 = mgr.read_file(id, &mut buf).unwrap();
        assert_eq!(n2, 0);
    }

    #[test]
    fn seek_file_clamps_to_length() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"hello").unwrap();
        tmp.flush().unwrap();

        let mgr = manager();
        let id = mgr.open_file(tmp.path().to_str().unwrap()).unwrap();
        let m = mgr.mark();
        mgr.wait(m);
        assert_eq!(mgr.seek_file(id, 1000), 5);
        assert_eq!(mgr.seek_file(id, 2), 2);
    }

    #[test]
    fn background_decompression_with_deflate_package_round_trips() {
        #[cfg(feature = "deflate")]
        {
            use crate::package::pkg::PkgBuilder;
            let bytes = PkgBuilder::new().add("a.txt", b"hello".to_vec()).build();
            let mut tmp = tempfile::NamedTempFile::new().unwrap();
            tmp.write_all(&bytes).unwrap();
            tmp.flush().unwrap();

            let mgr = manager();
            mgr.set_background_params(true, 4096, 2, 2);
            let module = Arc::new(
                crate::package::pkg::PkgModule::open(
                    Arc::new(StdFileLayer),
                    tmp.path().to_str().unwrap(),
                    codec::method::STORE,
                )
                .unwrap(),
            );
            mgr.register_package("pkg/", module).unwrap();
            let id = mgr.load_data("pkg/a.txt").unwrap();
            let m = mgr.mark();
            mgr.wait(m);
            assert_eq!(&**mgr.get_data(id).unwrap(), b"hello");
        }
    }

    #[test]
    fn mark_zero_and_invalid_manager_sync_trivially() {
        let mgr = manager();
        assert!(mgr.sync(Mark::from_raw(0)));
    }
}
