use std::io;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use regex::Regex;
use thiserror::Error;

use crate::entity::KeyPolicy;
use crate::quant::{LabelMap, RatioDescriptor, RatioError};
use crate::store::IdentityStore;

use super::columns::ColumnError;
use super::tmt::TmtError;

/**
All the ways that reading quantitative results can go wrong
*/
#[derive(Debug, Error)]
pub enum QuantParserError {
    #[error("Malformed record at line {line_number}: {source}")]
    MalformedRecord {
        line_number: usize,
        #[source]
        source: ColumnError,
    },
    #[error("Peptide {0} was not found in the sequence index")]
    PeptideNotFoundInIndex(String),
    #[error("Invalid configuration: {0}")]
    ConfigurationError(String),
    #[error("None of the {0} configured inputs yielded any record")]
    NoValidInput(usize),
    #[error("The parser has not been run, call process() first")]
    NotProcessed,
    #[error("An XML error was encountered: {0}")]
    XMLError(
        #[from]
        #[source]
        quick_xml::Error,
    ),
    #[error("An IO error was encountered: {0}")]
    IOError(
        #[from]
        #[source]
        io::Error,
    ),
    #[error("Failed to resolve accessions: {0}")]
    AccessionResolution(String),
    #[error("Invalid ratio: {0}")]
    InvalidRatio(
        #[from]
        #[source]
        RatioError,
    ),
}

impl QuantParserError {
    pub fn malformed(line_number: usize, source: ColumnError) -> Self {
        Self::MalformedRecord {
            line_number,
            source,
        }
    }

    /// Whether the error concerns one record only, so that the rest of the input could
    /// still be read
    pub fn is_record_level(&self) -> bool {
        matches!(self, Self::MalformedRecord { .. })
    }
}

impl From<TmtError> for QuantParserError {
    fn from(value: TmtError) -> Self {
        Self::ConfigurationError(value.to_string())
    }
}

impl From<QuantParserError> for io::Error {
    fn from(value: QuantParserError) -> Self {
        match value {
            QuantParserError::IOError(e) => e,
            _ => io::Error::new(io::ErrorKind::InvalidData, value),
        }
    }
}

/// A protein known to contain a peptide sequence
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexedProtein {
    pub accession: String,
    pub description: String,
    pub taxonomy: Option<String>,
}

impl IndexedProtein {
    pub fn new<S: Into<String>>(accession: S, description: S) -> Self {
        Self {
            accession: accession.into(),
            description: description.into(),
            taxonomy: None,
        }
    }
}

/// Maps peptide sequences to the proteins containing them, for inputs that carry no
/// protein column
pub trait SequenceIndex: Send + Sync {
    /// The proteins containing `sequence`, a clean (unmodified) peptide sequence
    fn proteins_for_sequence(&self, sequence: &str) -> Vec<IndexedProtein>;
}

impl SequenceIndex for IndexMap<String, Vec<IndexedProtein>> {
    fn proteins_for_sequence(&self, sequence: &str) -> Vec<IndexedProtein> {
        self.get(sequence).cloned().unwrap_or_default()
    }
}

/// The canonical form of an accession
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedAccession {
    pub primary: String,
    pub secondary: Vec<String>,
}

/// Resolves protein accessions to their primary accession, such as a UniProt client
pub trait AccessionResolver: Send + Sync {
    fn resolve(
        &self,
        accessions: &[String],
        version: Option<&str>,
    ) -> Result<IndexMap<String, ResolvedAccession>, QuantParserError>;
}

impl AccessionResolver for IndexMap<String, ResolvedAccession> {
    fn resolve(
        &self,
        accessions: &[String],
        _version: Option<&str>,
    ) -> Result<IndexMap<String, ResolvedAccession>, QuantParserError> {
        Ok(accessions
            .iter()
            .filter_map(|acc| self.get(acc).map(|r| (acc.clone(), r.clone())))
            .collect())
    }
}

/**
Everything a [`FormatParser`] needs to know about the input it is reading and the graph
it is reading into.
*/
#[derive(Clone)]
pub struct ParseContext {
    pub store: IdentityStore,
    pub labels: LabelMap,
    pub descriptors: Vec<RatioDescriptor>,
    pub key_policy: KeyPolicy,
    pub decoy_pattern: Option<Regex>,
    pub sequence_index: Option<Arc<dyn SequenceIndex>>,
    pub ignore_missing_peptides: bool,
    pub skip_malformed_records: bool,
    pub one_spectrum_per_peak: bool,
    /// A name for the input, used when a record does not name its raw file
    pub source_name: String,
}

impl std::fmt::Debug for ParseContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParseContext")
            .field("labels", &self.labels)
            .field("descriptors", &self.descriptors)
            .field("key_policy", &self.key_policy)
            .field("decoy_pattern", &self.decoy_pattern)
            .field("has_sequence_index", &self.sequence_index.is_some())
            .field("ignore_missing_peptides", &self.ignore_missing_peptides)
            .field("skip_malformed_records", &self.skip_malformed_records)
            .field("one_spectrum_per_peak", &self.one_spectrum_per_peak)
            .field("source_name", &self.source_name)
            .finish()
    }
}

impl ParseContext {
    pub fn new(store: IdentityStore) -> Self {
        Self {
            store,
            labels: LabelMap::default(),
            descriptors: Vec::new(),
            key_policy: KeyPolicy::default(),
            decoy_pattern: None,
            sequence_index: None,
            ignore_missing_peptides: false,
            skip_malformed_records: false,
            one_spectrum_per_peak: false,
            source_name: String::new(),
        }
    }

    pub fn with_labels(mut self, labels: LabelMap) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_descriptors(mut self, descriptors: Vec<RatioDescriptor>) -> Self {
        self.descriptors = descriptors;
        self
    }

    pub fn with_decoy_pattern(mut self, pattern: Regex) -> Self {
        self.decoy_pattern = Some(pattern);
        self
    }

    pub fn with_sequence_index(mut self, index: Arc<dyn SequenceIndex>) -> Self {
        self.sequence_index = Some(index);
        self
    }

    pub fn with_source_name<S: Into<String>>(mut self, name: S) -> Self {
        self.source_name = name.into();
        self
    }

    /// The ratios to read. Without explicit descriptors, a two-label input reports the
    /// ratio of its first declared label to its second.
    pub fn effective_descriptors(&self) -> Vec<RatioDescriptor> {
        if !self.descriptors.is_empty() {
            return self.descriptors.clone();
        }
        let labels: Vec<_> = self.labels.labels().copied().collect();
        match labels.as_slice() {
            [num, den] => vec![RatioDescriptor::new(*num, *den)],
            _ => Vec::new(),
        }
    }

    pub fn is_decoy(&self, accession: &str) -> bool {
        self.decoy_pattern
            .as_ref()
            .is_some_and(|p| p.is_match(accession))
    }
}

/// What one [`FormatParser::parse`] call contributed to the graph
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseResult {
    /// The number of records accepted
    pub records: usize,
    pub decoys_rejected: usize,
    pub malformed_skipped: usize,
    pub proteins: IndexSet<String>,
    pub peptides: IndexSet<String>,
    pub psms: IndexSet<String>,
}

impl ParseResult {
    pub fn merge(&mut self, other: ParseResult) {
        self.records += other.records;
        self.decoys_rejected += other.decoys_rejected;
        self.malformed_skipped += other.malformed_skipped;
        self.proteins.extend(other.proteins);
        self.peptides.extend(other.peptides);
        self.psms.extend(other.psms);
    }

    /// Forget a PSM that was removed from the graph
    pub(crate) fn forget_psm(&mut self, key: &str) {
        self.psms.shift_remove(key);
    }

    /// Forget a peptide that was removed from the graph
    pub(crate) fn forget_peptide(&mut self, key: &str) {
        self.peptides.shift_remove(key);
    }
}

/// The outcome of decoding one input record
#[derive(Debug, Clone, PartialEq)]
pub enum LineOutcome<T> {
    Accepted(T),
    DecoyRejected,
    Malformed(ColumnError),
}

/// A reader for one source format that streams records into an [`IdentityStore`]
pub trait FormatParser {
    fn parse<R: io::BufRead>(
        &mut self,
        stream: R,
        ctx: &ParseContext,
    ) -> Result<ParseResult, QuantParserError>;
}
