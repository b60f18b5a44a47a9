//! Reading quantitative proteomics result formats into an
//! [`IdentityStore`](crate::store::IdentityStore).
//!
//! Every format has a [`FormatParser`] that streams its records, decodes them with a
//! [`ColumnMapper`] (or an XML event loop) and wires the resulting proteins, peptides
//! and PSMs into the store through the shared assembly helpers.

pub(crate) mod assembly;
pub mod census_chro;
pub mod census_out;
pub mod columns;
pub(crate) mod compression;
pub mod delimited;
mod infer_format;
pub mod maxquant;
pub mod replicates;
pub mod tmt;
pub mod traits;

pub use crate::io::assembly::{REGRESSION_FACTOR, XCORR};
pub use crate::io::census_chro::{is_chro, ChroParser};
pub use crate::io::census_out::{is_census_out, CensusOutParser};
pub use crate::io::columns::{
    ColumnError, ColumnMapper, Record, Recovery, MISSING_MARKER, UNIQUE_COLUMN,
};
pub use crate::io::compression::{is_gzipped, open_maybe_gzipped};
pub use crate::io::delimited::DelimitedParser;
pub use crate::io::infer_format::{
    infer_format, infer_from_bytes, infer_from_path, infer_from_stream, QuantFormat,
};
pub use crate::io::maxquant::{is_maxquant_dir, ChemModTable, MaxQuantParser};
pub use crate::io::replicates::ReplicateParser;
pub use crate::io::tmt::{IntensityKind, TmtChannelResolver, TmtError};
pub use crate::io::traits::{
    AccessionResolver, FormatParser, IndexedProtein, LineOutcome, ParseContext, ParseResult,
    QuantParserError, ResolvedAccession, SequenceIndex,
};
