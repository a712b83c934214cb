//! An async facade over [`ResourceManager`], for callers running inside a
//! Tokio runtime that would rather `.await` a mark than block a task thread
//! on [`ResourceManager::wait`].
//!
//! The synchronous core already does its own threading (the async read
//! coordinator's worker pool, the background decompression pool); this
//! module doesn't re-implement any of that. It only wraps the handful of
//! calls that can block — [`wait`](AsyncResourceManager::wait) and
//! [`sync`](AsyncResourceManager::sync) are the two that matter in
//! practice — in [`tokio::task::spawn_blocking`], so they yield the
//! executor instead of parking a worker thread.
//!
//! Every other method mirrors the core one-for-one and is `async fn` only
//! for a uniform call surface; none of them actually suspend.

use std::sync::Arc;

use crate::decode::{AssetDecoder, StreamedSoundOpener};
use crate::error::Result;
use crate::file::FileLayer;
use crate::mark::Mark;
use crate::package::PackageModule;
use crate::slot::{Handle, ManagerId, ResourceId};
use crate::{Config, ResourceManager};

/// An async-friendly wrapper around [`ResourceManager`].
///
/// Cheap to clone, like the manager it wraps; every clone shares the same
/// underlying state.
#[derive(Clone)]
pub struct AsyncResourceManager {
    inner: ResourceManager,
}

impl AsyncResourceManager {
    /// Wraps an existing synchronous manager.
    pub fn new(inner: ResourceManager) -> Self {
        Self { inner }
    }

    /// Creates a manager with the given initial slot capacity and default
    /// configuration, backed by the real filesystem.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(ResourceManager::new(capacity))
    }

    /// Creates a manager with an explicit [`Config`] and file layer.
    pub fn with_file_layer(
        capacity: usize,
        config: Config,
        file_layer: Arc<dyn FileLayer>,
    ) -> Self {
        Self::new(ResourceManager::with_file_layer(capacity, config, file_layer))
    }

    /// Returns the underlying synchronous manager.
    ///
    /// Useful for call sites that need a blocking operation this facade
    /// doesn't wrap, without giving up the shared state.
    pub fn sync_handle(&self) -> &ResourceManager {
        &self.inner
    }

    /// This manager's process-unique identity.
    pub fn id(&self) -> ManagerId {
        self.inner.id()
    }

    /// Snapshot of the manager's current configuration.
    pub fn config(&self) -> Config {
        self.inner.config()
    }

    /// Mounts a package module under a path prefix.
    pub fn register_package(&self, prefix: &str, module: Arc<dyn PackageModule>) -> Result<()> {
        self.inner.register_package(prefix, module)
    }

    /// Unmounts the package module registered under a path prefix, if any.
    pub fn unregister_package(&self, prefix: &str) {
        self.inner.unregister_package(prefix)
    }

    /// Reconfigures background decompression.
    pub fn set_background_params(
        &self,
        enabled: bool,
        chunk_size: usize,
        read_ahead: usize,
        pool_size: usize,
    ) {
        self.inner
            .set_background_params(enabled, chunk_size, read_ahead, pool_size)
    }

    /// Creates a resource from a byte slice, copying it into the slot.
    pub fn create_data(&self, bytes: &[u8]) -> Option<ResourceId> {
        self.inner.create_data(bytes)
    }

    /// Creates a resource by taking ownership of an already-allocated buffer.
    pub fn take_data(&self, bytes: Vec<u8>) -> Option<ResourceId> {
        self.inner.take_data(bytes)
    }

    /// Creates a resource holding a copy of another resource's bytes.
    pub fn copy_data(&self, id: ResourceId) -> Option<ResourceId> {
        self.inner.copy_data(id)
    }

    /// Creates a resource holding a NUL-terminated copy of a string.
    pub fn strdup(&self, s: &str) -> Option<ResourceId> {
        self.inner.strdup(s)
    }

    /// Creates a texture resource wrapping an already-constructed handle.
    pub fn new_texture(&self, handle: Handle) -> Option<ResourceId> {
        self.inner.new_texture(handle)
    }

    /// Creates a display-backed texture resource wrapping an already
    /// constructed handle.
    pub fn new_texture_from_display(&self, handle: Handle) -> Option<ResourceId> {
        self.inner.new_texture_from_display(handle)
    }

    /// Creates a texture resource by taking ownership of a handle.
    pub fn take_texture(&self, handle: Handle) -> Option<ResourceId> {
        self.inner.take_texture(handle)
    }

    /// Creates a sound resource by taking ownership of a handle.
    pub fn take_sound(&self, handle: Handle) -> Option<ResourceId> {
        self.inner.take_sound(handle)
    }

    /// Begins an asynchronous raw-data load for a path.
    pub fn load_data(&self, path: &str) -> Option<ResourceId> {
        self.inner.load_data(path)
    }

    /// Begins an asynchronous texture load, decoded by `decoder` once the
    /// raw bytes are in hand.
    pub fn load_texture(&self, path: &str, decoder: Arc<dyn AssetDecoder>) -> Option<ResourceId> {
        self.inner.load_texture(path, decoder)
    }

    /// Begins an asynchronous bitmap font load.
    pub fn load_bitmap_font(
        &self,
        path: &str,
        decoder: Arc<dyn AssetDecoder>,
    ) -> Option<ResourceId> {
        self.inner.load_bitmap_font(path, decoder)
    }

    /// Begins an asynchronous FreeType font load.
    pub fn load_freetype_font(
        &self,
        path: &str,
        decoder: Arc<dyn AssetDecoder>,
    ) -> Option<ResourceId> {
        self.inner.load_freetype_font(path, decoder)
    }

    /// Begins an asynchronous sound load.
    pub fn load_sound(&self, path: &str, decoder: Arc<dyn AssetDecoder>) -> Option<ResourceId> {
        self.inner.load_sound(path, decoder)
    }

    /// Begins an asynchronous streamed-sound open.
    pub fn open_sound(
        &self,
        path: &str,
        opener: Arc<dyn StreamedSoundOpener>,
    ) -> Option<ResourceId> {
        self.inner.open_sound(path, opener)
    }

    /// Begins an asynchronous streamed-sound open from an already-open raw
    /// file resource.
    pub fn open_sound_from_file(
        &self,
        file_id: ResourceId,
        opener: Arc<dyn StreamedSoundOpener>,
    ) -> Option<ResourceId> {
        self.inner.open_sound_from_file(file_id, opener)
    }

    /// Opens a raw file resource for later reads and seeks.
    pub fn open_file(&self, path: &str) -> Option<ResourceId> {
        self.inner.open_file(path)
    }

    /// Stamps and returns a new mark.
    pub fn mark(&self) -> Mark {
        self.inner.mark()
    }

    /// Reports whether a mark has finished without blocking.
    pub async fn sync(&self, mark: Mark) -> bool {
        let inner = self.inner.clone();
        match tokio::task::spawn_blocking(move || inner.sync(mark)).await {
            Ok(done) => done,
            Err(_) => false,
        }
    }

    /// Awaits a mark, yielding the executor instead of blocking a worker
    /// thread.
    pub async fn wait(&self, mark: Mark) {
        let inner = self.inner.clone();
        let _ = tokio::task::spawn_blocking(move || inner.wait(mark)).await;
    }

    /// Reads a resource's current bytes, if it has one and has reached
    /// `Ready`.
    pub fn get_data(&self, id: ResourceId) -> Option<Arc<Vec<u8>>> {
        self.inner.get_data(id)
    }

    /// Reads a resource's texture handle, if it has one and has reached
    /// `Ready`.
    pub fn get_texture(&self, id: ResourceId) -> Option<Handle> {
        self.inner.get_texture(id)
    }

    /// Reads a resource's font handle, if it has one and has reached
    /// `Ready`.
    pub fn get_font(&self, id: ResourceId) -> Option<Handle> {
        self.inner.get_font(id)
    }

    /// Reads a resource's sound handle, if it has one and has reached
    /// `Ready`.
    pub fn get_sound(&self, id: ResourceId) -> Option<Handle> {
        self.inner.get_sound(id)
    }

    /// Reads a resource's streamed-sound handle, if it has one and has
    /// reached `Ready`.
    pub fn get_streamed_sound(&self, id: ResourceId) -> Option<Handle> {
        self.inner.get_streamed_sound(id)
    }

    /// Reports whether a weak link's anchor has been freed.
    pub fn is_stale(&self, id: ResourceId) -> bool {
        self.inner.is_stale(id)
    }

    /// Creates a strong link to a resource, possibly owned by another
    /// manager.
    pub fn link(&self, src_mgr: &AsyncResourceManager, src_id: ResourceId) -> Option<ResourceId> {
        self.inner.link(&src_mgr.inner, src_id)
    }

    /// Creates a weak link to a resource, possibly owned by another
    /// manager.
    pub fn link_weak(
        &self,
        src_mgr: &AsyncResourceManager,
        src_id: ResourceId,
    ) -> Option<ResourceId> {
        self.inner.link_weak(&src_mgr.inner, src_id)
    }

    /// Frees a resource slot.
    pub fn free(&self, id: ResourceId) -> bool {
        self.inner.free(id)
    }

    /// Frees every slot currently held by this manager.
    pub fn free_all(&self) {
        self.inner.free_all()
    }

    /// Awaits completion of an asynchronous load, then reads its raw bytes
    /// in one step.
    ///
    /// Equivalent to stamping a mark, awaiting it, and calling
    /// [`get_data`](Self::get_data) — a convenience for the common
    /// load-then-await-then-read sequence that has no equivalent on the
    /// synchronous core, since there a caller is expected to batch several
    /// loads behind one mark.
    pub async fn load_data_and_wait(&self, path: &str) -> Option<Arc<Vec<u8>>> {
        let id = self.load_data(path)?;
        let mark = self.mark();
        self.wait(mark).await;
        self.get_data(id)
    }

    /// Reads from a raw file resource's current seek position.
    pub fn read_file(&self, id: ResourceId, buf: &mut [u8]) -> Result<usize> {
        self.inner.read_file(id, buf)
    }

    /// Reads from a raw file resource at an explicit offset, without
    /// disturbing its seek position.
    pub fn read_file_at(&self, id: ResourceId, at: u64, buf: &mut [u8]) -> Result<usize> {
        self.inner.read_file_at(id, at, buf)
    }

    /// Repositions a raw file resource's seek position, clamped to its
    /// length.
    pub fn seek_file(&self, id: ResourceId, pos: u64) -> u64 {
        self.inner.seek_file(id, pos)
    }
}

impl From<ResourceManager> for AsyncResourceManager {
    fn from(inner: ResourceManager) -> Self {
        Self::new(inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn wait_resolves_a_pending_load() {
        let manager = AsyncResourceManager::with_capacity(8);
        let id = manager.strdup("hello").unwrap();
        let mark = manager.mark();
        assert!(manager.sync(mark).await);
        assert_eq!(&**manager.get_data(id).unwrap(), b"hello\0");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn load_data_and_wait_reads_a_real_file() {
        let manager = AsyncResourceManager::with_capacity(8);
        let bytes = manager
            .load_data_and_wait("Cargo.toml")
            .await
            .expect("Cargo.toml should load");
        assert!(bytes.starts_with(b"[package]"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn linking_between_two_async_managers() {
        let a = AsyncResourceManager::with_capacity(4);
        let b = AsyncResourceManager::with_capacity(4);
        let id = a.strdup("shared").unwrap();
        let linked = b.link(&a, id).expect("cross-manager link");
        assert_eq!(&**b.get_data(linked).unwrap(), b"shared\0");
    }
}
