use indexmap::IndexSet;

use crate::quant::{Amount, QuantRatio, Score};

use super::key::KeyPolicy;
use super::sequence::{clean_sequence, extract_ptms, strip_flanking, Ptm};
use super::traits::impl_capabilities;

/// A peptide, shared by every PSM whose sequence maps to the same key under the active
/// [`KeyPolicy`]
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Peptide {
    pub key: String,
    pub sequence: String,
    pub full_sequence: String,
    pub charge: Option<i32>,
    pub psms: IndexSet<String>,
    pub proteins: IndexSet<String>,
    pub raw_files: IndexSet<String>,
    pub ratios: Vec<QuantRatio>,
    pub amounts: Vec<Amount>,
    pub scores: Vec<Score>,
    pub ptms: Vec<Ptm>,
    pub discarded: bool,
}

impl_capabilities!(Peptide, key: key);

impl Peptide {
    pub fn new(policy: &KeyPolicy, full_sequence: &str, charge: Option<i32>) -> Self {
        let full_sequence = strip_flanking(full_sequence.trim()).to_string();
        Self {
            key: policy.peptide_key(&full_sequence, charge),
            sequence: clean_sequence(&full_sequence),
            ptms: extract_ptms(&full_sequence),
            full_sequence,
            charge,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::entity::HasKey;

    #[test]
    fn test_create() {
        let policy = KeyPolicy::default();
        let pep = Peptide::new(&policy, "K.PEPS(79.966)TIDEK.A", Some(2));
        assert_eq!(pep.key(), "PEPSTIDEK");
        assert_eq!(pep.sequence, "PEPSTIDEK");
        assert_eq!(pep.full_sequence, "PEPS(79.966)TIDEK");
        assert_eq!(pep.ptms.len(), 1);
    }
}
