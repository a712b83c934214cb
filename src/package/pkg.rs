//! The PKG on-disk archive format (component I): a concrete
//! [`PackageModule`](super::PackageModule) implementation.
//!
//! Bit-exact layout (all multi-byte integers big-endian):
//!
//! ```text
//! offset  size  field
//! 0       4     magic = "PKG\n"
//! 4       2     header_size (must equal this reader's own header size)
//! 6       2     entry_size  (must equal this reader's own entry size)
//! 8       4     entry_count
//! 12      4     name_size (bytes in the pathname pool)
//! 16      entry_size * entry_count   index entries, ascending by path_hash
//! ...     name_size                  NUL-terminated pathname pool
//! ...     (file data, referenced by each entry's data_offset/data_length)
//! ```
//!
//! Grounded on the teacher's `format/header.rs` "read fixed header, validate
//! magic, validate declared struct sizes against our own `size_of`
//! constants, reject on mismatch" control flow, substituted with the PKG
//! magic/field layout; unlike the teacher's 7z start header this format has
//! no header CRC field, so that validation step is dropped (see DESIGN.md).
//! Binary search over the hash-sorted index plus a linear scan across the
//! equal-hash run has no teacher precedent (the teacher's `streaming/pool.rs`
//! `SolidEntryLocator` is a plain `HashMap` keyed by entry index, not a
//! sorted search); it follows directly from this format's own
//! ascending-by-`path_hash` index ordering (see DESIGN.md).

use std::sync::Arc;

use crate::codec::method;
use crate::error::{Error, Result};
use crate::file::{FileLayer, FileRef};
use crate::package::{FileInfo, PackageModule};

/// Size of the fixed header, in bytes.
pub const HEADER_SIZE: u16 = 16;
/// Size of one index entry, in bytes.
pub const ENTRY_SIZE: u16 = 20;
/// The four-byte magic every PKG file starts with.
pub const MAGIC: [u8; 4] = *b"PKG\n";

/// Bit 24 of `name_offset_and_flags`: the entry is compressed with the
/// module's registered codec.
const FLAG_COMPRESSED: u32 = 0x01;

/// Computes the path hash used to index the PKG file table: a 32-bit
/// rotate-right(5)-XOR fold over the pathname's ASCII-lowercased bytes
/// (only `A..Z` are folded; non-ASCII bytes pass through unchanged).
///
/// `pkg_hash(path) == pkg_hash(lowercase(path))` for all ASCII paths (§8
/// Property 6), since folding is idempotent.
pub fn path_hash(path: &str) -> u32 {
    let mut h: u32 = 0;
    for &byte in path.as_bytes() {
        h = h.rotate_right(5) ^ u32::from(byte.to_ascii_lowercase());
    }
    h
}

#[derive(Debug, Clone)]
struct IndexEntry {
    path_hash: u32,
    compressed: bool,
    data_offset: u64,
    data_length: u32,
    uncompressed_size: u32,
    name: String,
}

/// A PKG archive opened for reading, implementing [`PackageModule`].
///
/// The underlying file handle is shared (via [`FileRef`]'s cheap clone)
/// across every read this module serves; all reads are explicit-offset, so
/// concurrent reads of different entries from the same package are safe
/// without any lock held across I/O (§5).
pub struct PkgModule {
    file_layer: Arc<dyn FileLayer>,
    file: FileRef,
    entries: Vec<IndexEntry>,
    codec_id: u32,
}

fn read_u16_be(buf: &[u8]) -> u16 {
    u16::from_be_bytes(buf.try_into().expect("2-byte slice"))
}

fn read_u32_be(buf: &[u8]) -> u32 {
    u32::from_be_bytes(buf.try_into().expect("4-byte slice"))
}

fn read_exact_at(
    file_layer: &dyn FileLayer,
    file: &FileRef,
    offset: u64,
    len: usize,
) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    let n = file_layer.read_at(file, offset, &mut buf)?;
    if n != len {
        return Err(Error::PackageFormat(format!(
            "file shorter than required: wanted {len} bytes at offset {offset}, got {n}"
        )));
    }
    Ok(buf)
}

impl PkgModule {
    /// Opens and validates the PKG file at `path` through `file_layer`.
    ///
    /// `codec_id` is the codec identifier (see [`crate::codec::method`])
    /// used to decompress entries flagged compressed; the format itself
    /// carries no codec identifier, since a PKG module registers exactly
    /// one codec for all of its compressed entries (§4.3/§4.8).
    ///
    /// Fails with [`Error::PackageFormat`] on wrong magic, a mismatched
    /// declared header/entry size, a file shorter than the header promises,
    /// or a pathname pool entry with no terminating NUL.
    pub fn open(file_layer: Arc<dyn FileLayer>, path: &str, codec_id: u32) -> Result<Self> {
        let file = file_layer.open(path)?;
        let header = read_exact_at(file_layer.as_ref(), &file, 0, HEADER_SIZE as usize)?;

        if header[0..4] != MAGIC {
            return Err(Error::PackageFormat("wrong magic".into()));
        }
        let declared_header_size = read_u16_be(&header[4..6]);
        let declared_entry_size = read_u16_be(&header[6..8]);
        if declared_header_size != HEADER_SIZE {
            return Err(Error::PackageFormat(format!(
                "header size mismatch: file declares {declared_header_size}, reader expects {HEADER_SIZE}"
            )));
        }
        if declared_entry_size != ENTRY_SIZE {
            return Err(Error::PackageFormat(format!(
                "entry size mismatch: file declares {declared_entry_size}, reader expects {ENTRY_SIZE}"
            )));
        }
        let entry_count = read_u32_be(&header[8..12]) as usize;
        let name_size = read_u32_be(&header[12..16]) as usize;

        let file_size = file_layer.size(&file)?;
        let required = HEADER_SIZE as u64
            + (entry_count as u64) * (ENTRY_SIZE as u64)
            + name_size as u64;
        if file_size < required {
            return Err(Error::PackageFormat(format!(
                "file shorter than header promises: need at least {required} bytes, file is {file_size}"
            )));
        }

        let index_offset = HEADER_SIZE as u64;
        let index_bytes = read_exact_at(
            file_layer.as_ref(),
            &file,
            index_offset,
            entry_count * ENTRY_SIZE as usize,
        )?;
        let pool_offset = index_offset + (entry_count * ENTRY_SIZE as usize) as u64;
        let pool = read_exact_at(file_layer.as_ref(), &file, pool_offset, name_size)?;

        let mut entries = Vec::with_capacity(entry_count);
        for i in 0..entry_count {
            let raw = &index_bytes[i * ENTRY_SIZE as usize..(i + 1) * ENTRY_SIZE as usize];
            let path_hash = read_u32_be(&raw[0..4]);
            let name_offset_and_flags = read_u32_be(&raw[4..8]);
            let name_offset = (name_offset_and_flags & 0x00FF_FFFF) as usize;
            let compressed = (name_offset_and_flags >> 24) & FLAG_COMPRESSED != 0;
            let data_offset = read_u32_be(&raw[8..12]) as u64;
            let data_length = read_u32_be(&raw[12..16]);
            let uncompressed_size = read_u32_be(&raw[16..20]);

            let name = read_pool_name(&pool, name_offset)?;

            entries.push(IndexEntry {
                path_hash,
                compressed,
                data_offset,
                data_length,
                uncompressed_size,
                name,
            });
        }

        Ok(PkgModule {
            file_layer,
            file,
            entries,
            codec_id,
        })
    }
}

fn read_pool_name(pool: &[u8], offset: usize) -> Result<String> {
    let slice = pool.get(offset..).ok_or_else(|| {
        Error::PackageFormat(format!(
            "pathname offset {offset} is past the end of the {}-byte pool",
            pool.len()
        ))
    })?;
    let nul = slice.iter().position(|&b| b == 0).ok_or_else(|| {
        Error::PackageFormat("pathname pool entry is not null-terminated".into())
    })?;
    String::from_utf8(slice[..nul].to_vec())
        .map_err(|e| Error::PackageFormat(format!("pathname is not valid UTF-8: {e}")))
}

impl PackageModule for PkgModule {
    fn init(&self) -> Result<()> {
        // Parsing and validation already happened in `open`; nothing left
        // to do at registration time.
        Ok(())
    }

    fn file_info(&self, intra_path: &str) -> Result<Option<FileInfo>> {
        let target = path_hash(intra_path);
        let start = self.entries.partition_point(|e| e.path_hash < target);
        let mut i = start;
        while i < self.entries.len() && self.entries[i].path_hash == target {
            if self.entries[i].name.eq_ignore_ascii_case(intra_path) {
                let e = &self.entries[i];
                return Ok(Some(FileInfo {
                    file_ref: 0,
                    offset: e.data_offset,
                    length: e.data_length as u64,
                    compressed: e.compressed,
                    uncompressed_size: e.uncompressed_size as u64,
                }));
            }
            i += 1;
        }
        Ok(None)
    }

    fn read_at(&self, _file_ref: u64, offset: u64, buf: &mut [u8]) -> Result<usize> {
        self.file_layer.read_at(&self.file, offset, buf)
    }

    fn list_files(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.name.clone()).collect()
    }

    fn codec_id(&self) -> u32 {
        self.codec_id
    }
}

/// An in-memory PKG image builder, used only by tests that need a
/// reference archive without shipping one as a binary fixture.
#[cfg(any(test, feature = "test-util"))]
pub struct PkgBuilder {
    entries: Vec<(String, Vec<u8>, bool, u32)>,
}

#[cfg(any(test, feature = "test-util"))]
impl PkgBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        PkgBuilder {
            entries: Vec::new(),
        }
    }

    /// Adds an uncompressed entry.
    pub fn add(mut self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        let bytes = bytes.into();
        self.entries.push((name.into(), bytes, false, 0));
        self
    }

    /// Adds an entry whose on-disk bytes are pre-compressed with codec
    /// `codec_id`; `uncompressed_len` records the size after decompression.
    pub fn add_compressed(
        mut self,
        name: impl Into<String>,
        compressed_bytes: impl Into<Vec<u8>>,
        uncompressed_len: u32,
    ) -> Self {
        let bytes = compressed_bytes.into();
        self.entries.push((name.into(), bytes, true, uncompressed_len));
        self
    }

    /// Serializes the image, sorted by path hash (ties broken by
    /// ASCII-lowercased pathname ascending), per §4.8 index ordering.
    pub fn build(mut self) -> Vec<u8> {
        self.entries.sort_by(|a, b| {
            let ha = path_hash(&a.0);
            let hb = path_hash(&b.0);
            ha.cmp(&hb).then_with(|| a.0.to_ascii_lowercase().cmp(&b.0.to_ascii_lowercase()))
        });

        let entry_count = self.entries.len() as u32;
        let mut pool = Vec::new();
        let mut name_offsets = Vec::with_capacity(self.entries.len());
        for (name, ..) in &self.entries {
            name_offsets.push(pool.len() as u32);
            pool.extend_from_slice(name.as_bytes());
            pool.push(0);
        }
        let name_size = pool.len() as u32;

        let mut data = Vec::new();
        let mut data_offsets = Vec::with_capacity(self.entries.len());
        let data_start =
            HEADER_SIZE as u32 + entry_count * ENTRY_SIZE as u32 + name_size;
        for (_, bytes, ..) in &self.entries {
            data_offsets.push(data_start + data.len() as u32);
            data.extend_from_slice(bytes);
        }

        let mut out = Vec::new();
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&HEADER_SIZE.to_be_bytes());
        out.extend_from_slice(&ENTRY_SIZE.to_be_bytes());
        out.extend_from_slice(&entry_count.to_be_bytes());
        out.extend_from_slice(&name_size.to_be_bytes());

        for (i, (name, bytes, compressed, uncompressed_len)) in self.entries.iter().enumerate() {
            let hash = path_hash(name);
            let flags = if *compressed { FLAG_COMPRESSED } else { 0 };
            let name_offset_and_flags = (name_offsets[i] & 0x00FF_FFFF) | (flags << 24);
            let data_length = bytes.len() as u32;
            let uncompressed_size = if *compressed { *uncompressed_len } else { data_length };

            out.extend_from_slice(&hash.to_be_bytes());
            out.extend_from_slice(&name_offset_and_flags.to_be_bytes());
            out.extend_from_slice(&data_offsets[i].to_be_bytes());
            out.extend_from_slice(&data_length.to_be_bytes());
            out.extend_from_slice(&uncompressed_size.to_be_bytes());
        }

        out.extend_from_slice(&pool);
        out.extend_from_slice(&data);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::StdFileLayer;
    use std::io::Write;

    fn open_image(bytes: &[u8]) -> (tempfile::NamedTempFile, PkgModule) {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(bytes).unwrap();
        tmp.flush().unwrap();
        let module = PkgModule::open(
            Arc::new(StdFileLayer),
            tmp.path().to_str().unwrap(),
            method::STORE,
        )
        .unwrap();
        (tmp, module)
    }

    #[test]
    fn path_hash_is_lowercase_invariant() {
        assert_eq!(path_hash("Data/1.TXT"), path_hash("data/1.txt"));
        assert_eq!(path_hash("ABC"), path_hash("abc"));
    }

    #[test]
    fn path_hash_matches_reference_formula() {
        // h = 0; for each byte: h = rotate_right(h, 5) ^ c
        let mut h: u32 = 0;
        for c in b"abc" {
            h = h.rotate_right(5) ^ u32::from(*c);
        }
        assert_eq!(path_hash("abc"), h);
    }

    #[test]
    fn lookup_and_read_roundtrip() {
        let image = PkgBuilder::new()
            .add("data/1.txt", b"hello".to_vec())
            .add("other/0.txt", b"foobar".to_vec())
            .build();
        let (_tmp, module) = open_image(&image);

        let info = module.file_info("data/1.txt").unwrap().unwrap();
        assert_eq!(info.length, 5);
        assert!(!info.compressed);
        let mut buf = vec![0u8; 5];
        let n = module.read_at(info.file_ref, info.offset, &mut buf).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let image = PkgBuilder::new().add("Data/1.txt", b"hello".to_vec()).build();
        let (_tmp, module) = open_image(&image);
        assert!(module.file_info("DATA/1.TXT").unwrap().is_some());
        assert!(module.file_info("data/1.txt").unwrap().is_some());
    }

    #[test]
    fn missing_file_returns_none() {
        let image = PkgBuilder::new().add("data/1.txt", b"hello".to_vec()).build();
        let (_tmp, module) = open_image(&image);
        assert!(module.file_info("nope.txt").unwrap().is_none());
    }

    #[test]
    fn wrong_magic_is_rejected() {
        let mut image = PkgBuilder::new().add("a", b"x".to_vec()).build();
        image[0] = b'X';
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&image).unwrap();
        tmp.flush().unwrap();
        let result = PkgModule::open(Arc::new(StdFileLayer), tmp.path().to_str().unwrap(), 0);
        assert!(matches!(result, Err(Error::PackageFormat(_))));
    }

    #[test]
    fn truncated_file_is_rejected() {
        let image = PkgBuilder::new().add("a", b"hello".to_vec()).build();
        let truncated = &image[..image.len() - 3];
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(truncated).unwrap();
        tmp.flush().unwrap();
        let result = PkgModule::open(Arc::new(StdFileLayer), tmp.path().to_str().unwrap(), 0);
        assert!(matches!(result, Err(Error::PackageFormat(_))));
    }

    #[test]
    fn compressed_flag_round_trips_through_builder() {
        let image = PkgBuilder::new()
            .add_compressed("other/0.txt", b"compressed-bytes".to_vec(), 6)
            .build();
        let (_tmp, module) = open_image(&image);
        let info = module.file_info("other/0.txt").unwrap().unwrap();
        assert!(info.compressed);
        assert_eq!(info.uncompressed_size, 6);
    }
}
