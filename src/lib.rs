pub mod consolidate;
pub mod entity;
pub mod io;
pub mod parser;
pub mod quant;
pub mod store;

pub use crate::quant::{
    Amount, AmountType, LabelMap, QuantCondition, QuantRatio, QuantificationLabel,
    RatioDescriptor, Score,
};

pub use crate::entity::{KeyPolicy, Peptide, Protein, Psm};
pub use crate::store::{IdentityStore, QuantGraph};

pub use crate::io::{FormatParser, ParseContext, QuantFormat, QuantParserError};
pub use crate::io::{CensusOutParser, ChroParser, DelimitedParser, MaxQuantParser, ReplicateParser};

pub use crate::consolidate::ProteinConsolidator;
pub use crate::parser::{InputFile, ParsedGraph, QuantParser, QuantParserBuilder};
