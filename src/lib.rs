//! # respak
//!
//! A resource manager for a games/multimedia runtime: loads, caches,
//! decompresses, and hands out typed assets (raw byte blobs, textures,
//! fonts, sounds, streamed audio, raw file handles) from a hierarchical
//! namespace that may be backed by the host filesystem and/or one or more
//! overlaid PKG package archives.
//!
//! The crate is the concurrency-and-lifecycle engine underneath such a
//! runtime, not the runtime itself: it never parses an image, font, or
//! sound format — every typed load takes an [`AssetDecoder`] supplied by
//! the caller and invokes it exactly once, from the thread that drove the
//! load to completion.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use respak::ResourceManager;
//!
//! let manager = ResourceManager::new(64);
//! let id = manager.strdup("hello").unwrap();
//! assert_eq!(&**manager.get_data(id).unwrap(), b"hello\0");
//!
//! // Asynchronous loads are observable immediately, but their payload only
//! // arrives at a mark boundary:
//! let id = manager.load_data("Cargo.toml").unwrap();
//! let mark = manager.mark();
//! manager.wait(mark);
//! assert!(manager.get_data(id).is_some());
//! ```
//!
//! ## Packages
//!
//! ```rust,no_run
//! use respak::ResourceManager;
//! use respak::package::pkg::PkgModule;
//! use std::sync::Arc;
//!
//! let manager = ResourceManager::new(16);
//! let module = Arc::new(PkgModule::open(
//!     Arc::new(respak::file::StdFileLayer),
//!     "assets.pkg",
//!     respak::codec::method::STORE,
//! ).unwrap());
//! manager.register_package("assets/", module).unwrap();
//! let id = manager.load_data("assets/sprite.png").unwrap();
//! let mark = manager.mark();
//! manager.wait(mark);
//! ```
//!
//! ## Links and weak links
//!
//! Strong links keep a payload alive as long as any strong reference (the
//! anchor or a [`ResourceManager::link`]) survives; weak links
//! ([`ResourceManager::link_weak`]) observe the payload only while a strong
//! reference exists, and report [`ResourceManager::is_stale`] once the last
//! one is dropped. See the crate's [`link`] module for the ring topology
//! this is built on.
//!
//! ## Background decompression
//!
//! [`ResourceManager::set_background_params`] enables streaming
//! decompression on a bounded worker pool; a saturated pool falls back to
//! inline decompression on the thread that drives the load forward, so a
//! load never blocks waiting for a pool slot. See [`pool`] and [`codec`].
//!
//! ## Feature flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `deflate` | Yes | Deflate decompressor for compressed PKG entries, via `flate2` |
//! | `async` | No | An async facade over the synchronous core, via Tokio |
//!
//! ## What this crate does not do
//!
//! Per its scope, this crate never: decodes images/fonts/sounds (callers
//! supply an [`AssetDecoder`]); performs raw platform file I/O beyond the
//! [`file::FileLayer`] contract; implements a compression *algorithm*
//! (packages register a [`codec::Decompressor`]); exposes a CLI, reads
//! environment variables, or initializes a logger. It also never supports
//! writing/saving packages, transactional multi-resource rollback, or
//! packages larger than 4 GiB (the PKG format's offsets are 32-bit).

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_op_in_unsafe_fn)]

mod async_read;
pub mod codec;
pub mod config;
pub mod decode;
pub mod error;
pub mod file;
pub mod link;
pub mod load;
pub mod manager;
pub mod mark;
pub mod package;
pub mod path;
pub mod pool;
pub mod slot;

#[cfg(feature = "async")]
#[cfg_attr(docsrs, doc(cfg(feature = "async")))]
pub mod async_api;

pub use config::{Config, ConfigBuilder};
pub use decode::{AssetDecoder, StreamedSoundOpener};
pub use error::{Error, Result};
pub use manager::ResourceManager;
pub use mark::Mark;
pub use slot::{Handle, ManagerId, ResourceId};

#[cfg(feature = "async")]
pub use async_api::AsyncResourceManager;
