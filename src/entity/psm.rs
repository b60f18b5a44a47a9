use indexmap::IndexSet;

use crate::quant::{Amount, QuantRatio, Score};

use super::key::KeyPolicy;
use super::sequence::{clean_sequence, extract_ptms, strip_flanking, Ptm};
use super::traits::impl_capabilities;

/**
A peptide-spectrum match.

A PSM belongs to exactly one [`Peptide`](super::Peptide), referenced by key, and to any
number of proteins. Its key combines raw file, scan number and annotated sequence,
with the charge appended according to the [`KeyPolicy`].
*/
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Psm {
    pub key: String,
    pub scan_number: String,
    pub full_sequence: String,
    pub sequence: String,
    pub charge: Option<i32>,
    pub raw_files: IndexSet<String>,
    pub peptide: Option<String>,
    pub proteins: IndexSet<String>,
    pub ratios: Vec<QuantRatio>,
    pub amounts: Vec<Amount>,
    pub scores: Vec<Score>,
    pub ptms: Vec<Ptm>,
    /// Whether only one of the labeled forms was observed
    pub singleton: bool,
    pub discarded: bool,
}

impl_capabilities!(Psm, key: key);

impl Psm {
    pub fn new(
        policy: &KeyPolicy,
        raw_file: &str,
        scan_number: &str,
        full_sequence: &str,
        charge: Option<i32>,
    ) -> Self {
        let full_sequence = strip_flanking(full_sequence.trim()).to_string();
        let raw_file = raw_file.trim();
        let mut raw_files = IndexSet::new();
        if !raw_file.is_empty() {
            raw_files.insert(raw_file.to_string());
        }
        Self {
            key: policy.psm_key(raw_file, scan_number, &full_sequence, charge),
            scan_number: scan_number.trim().to_string(),
            sequence: clean_sequence(&full_sequence),
            ptms: extract_ptms(&full_sequence),
            full_sequence,
            charge,
            raw_files,
            ..Default::default()
        }
    }

    pub fn singleton(mut self, singleton: bool) -> Self {
        self.singleton = singleton;
        self
    }

    /// The first raw file this PSM was observed in
    pub fn raw_file(&self) -> Option<&str> {
        self.raw_files.first().map(|s| s.as_str())
    }
}
