use std::fs;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use flate2::bufread::MultiGzDecoder;

pub fn is_gzipped(header: &[u8]) -> bool {
    header.starts_with(b"\x1f\x8b")
}

/// Whether the path ends in `.gz`, and the path with that extension removed
pub fn is_gzipped_extension<P: AsRef<Path>>(path: P) -> (bool, PathBuf) {
    let path = path.as_ref();
    match path.extension() {
        Some(ext) if ext.eq_ignore_ascii_case("gz") => (true, path.with_extension("")),
        _ => (false, path.to_path_buf()),
    }
}

/// Open a file for buffered reading, decompressing it on the fly if it starts with the
/// gzip magic bytes. Returns whether the file was compressed.
pub fn open_maybe_gzipped<P: AsRef<Path>>(path: P) -> io::Result<(Box<dyn BufRead>, bool)> {
    let mut handle = BufReader::new(fs::File::open(path)?);
    let gzipped = is_gzipped(handle.fill_buf()?);
    if gzipped {
        Ok((Box::new(BufReader::new(MultiGzDecoder::new(handle))), true))
    } else {
        Ok((Box::new(handle), false))
    }
}
