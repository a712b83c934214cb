//! Fuzz target for `PkgModule::open` with arbitrary byte input.
//!
//! Exercises header validation, index parsing, and pathname pool decoding
//! against adversarial input. The goal is to find panics or hangs, not to
//! check any particular error is returned — malformed input is expected to
//! be rejected with `Error::PackageFormat`, never to panic.
//!
//! Run with: cargo +nightly fuzz run pkg_open

#![no_main]

use std::io::Write;
use std::sync::Arc;

use libfuzzer_sys::fuzz_target;
use respak::file::StdFileLayer;
use respak::package::pkg::PkgModule;
use respak::package::PackageModule as _;

fuzz_target!(|data: &[u8]| {
    let mut file = match tempfile::NamedTempFile::new() {
        Ok(f) => f,
        Err(_) => return,
    };
    if file.write_all(data).is_err() {
        return;
    }
    let path = file.path().to_str().expect("tempfile path is UTF-8").to_string();

    // We don't care about the result - we're looking for panics or hangs.
    if let Ok(module) = PkgModule::open(Arc::new(StdFileLayer), &path, respak::codec::method::DEFLATE) {
        // A successful open claims every entry's metadata is internally
        // consistent; exercise the lookup path for each to catch any
        // invariant the binary search over the hash index might violate.
        for name in module.list_files() {
            let _ = module.file_info(&name);
        }
    }
});
