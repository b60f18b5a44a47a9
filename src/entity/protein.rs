use indexmap::IndexSet;
use lazy_static::lazy_static;
use regex::Regex;

use crate::quant::{Amount, QuantRatio, Score};

use super::traits::impl_capabilities;

lazy_static! {
    static ref ORGANISM: Regex = Regex::new(r"OS=(.+?)(?:\s+[A-Z]{2}=|$)").unwrap();
}

/// Extract the organism name from a UniProt style `OS=` description field
pub fn taxonomy_from_description(description: &str) -> Option<String> {
    ORGANISM
        .captures(description)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

/**
A protein identified by its accession.

The accession is the canonical key. It is only ever rewritten by protein consolidation,
which records the previous accession in [`Protein::secondary_accessions`].
*/
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Protein {
    pub accession: String,
    pub description: String,
    pub taxonomies: IndexSet<String>,
    /// Keys of the peptides of this protein
    pub peptides: IndexSet<String>,
    /// Keys of the PSMs of this protein
    pub psms: IndexSet<String>,
    pub ratios: Vec<QuantRatio>,
    pub amounts: Vec<Amount>,
    pub scores: Vec<Score>,
    pub secondary_accessions: Vec<String>,
    pub discarded: bool,
}

impl_capabilities!(Protein, key: accession);

impl Protein {
    pub fn new<S: Into<String>>(accession: S) -> Self {
        Self {
            accession: accession.into().trim().to_string(),
            ..Default::default()
        }
    }

    /// Set the description, picking up the taxonomy from it when present
    pub fn with_description<S: Into<String>>(mut self, description: S) -> Self {
        self.set_description(description);
        self
    }

    pub fn set_description<S: Into<String>>(&mut self, description: S) {
        self.description = description.into();
        if let Some(taxonomy) = taxonomy_from_description(&self.description) {
            self.taxonomies.insert(taxonomy);
        }
    }

    /// Absorb the membership and measurements of another protein, as when it turns out
    /// to be the same protein under a different accession.
    pub(crate) fn absorb(&mut self, donor: Protein) {
        self.peptides.extend(donor.peptides);
        self.psms.extend(donor.psms);
        self.taxonomies.extend(donor.taxonomies);
        if self.description.is_empty() {
            self.description = donor.description;
        }
        for acc in std::iter::once(donor.accession).chain(donor.secondary_accessions) {
            if acc != self.accession && !self.secondary_accessions.contains(&acc) {
                self.secondary_accessions.push(acc);
            }
        }
        for ratio in donor.ratios {
            crate::entity::HasRatios::add_ratio(self, ratio);
        }
        for amount in donor.amounts {
            crate::entity::HasAmounts::add_amount(self, amount);
        }
        for score in donor.scores {
            if !self.scores.iter().any(|s| s.name == score.name) {
                self.scores.push(score);
            }
        }
    }
}
