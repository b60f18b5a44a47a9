//! The identity-bearing entities of a quantitative analysis: proteins, peptides and
//! peptide-spectrum matches, related to one another by key rather than by reference.
pub mod key;
pub mod peptide;
pub mod protein;
pub mod psm;
pub mod sequence;
pub mod traits;

pub use key::KeyPolicy;
pub use peptide::Peptide;
pub use protein::{taxonomy_from_description, Protein};
pub use psm::Psm;
pub use sequence::{clean_sequence, extract_ptms, is_modified, strip_flanking, Ptm};
pub use traits::{HasAmounts, HasKey, HasRatios, HasScores};
