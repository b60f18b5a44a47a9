//! Read the `evidence.txt`, `msms.txt` and mzTab files of a MaxQuant export directory.
use std::path::Path;

mod reader;

pub use reader::{
    find_mztab, read_msms, ChemModTable, MaxQuantParser, MsmsEntry, EVIDENCE_FILE,
    EVIDENCE_SCORE_COLUMNS, MSMS_FILE,
};

/// Whether `path` is a directory holding a MaxQuant evidence table
pub fn is_maxquant_dir<P: AsRef<Path>>(path: P) -> bool {
    let path = path.as_ref();
    path.is_dir() && path.join(EVIDENCE_FILE).is_file()
}
