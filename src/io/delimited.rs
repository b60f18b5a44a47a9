//! A minimal delimited format with one PSM per row and a fixed column order:
//! `id`, `sequence`, `ratio`, `weight`, `accession`.
use std::io;

use log::debug;

use crate::entity::{clean_sequence, HasRatios};
use crate::quant::{AggregationLevel, QuantRatio, RatioSide, Score};

use super::assembly::{split_accessions, Assembler, PsmObservation};
use super::columns::{ColumnMapper, Record};
use super::traits::{FormatParser, LineOutcome, ParseContext, ParseResult, QuantParserError};

pub const DELIMITED_COLUMNS: [&str; 5] = ["id", "sequence", "ratio", "weight", "accession"];

/// The score name given to the weight column
pub const RATIO_WEIGHT: &str = "WEIGHT";

/**
Reads rows of `id`, `sequence`, `ratio`, `weight` and `accession` split on a caller
chosen separator. A leading row whose first field is `id` is taken as a header and
skipped. When the accession is empty the proteins are looked up in the context's
sequence index instead.

The ratio is reported for the first ratio descriptor of the context.
*/
#[derive(Debug, Clone)]
pub struct DelimitedParser {
    mapper: ColumnMapper,
    log_ratios: bool,
    line_number: usize,
}

impl Default for DelimitedParser {
    fn default() -> Self {
        Self::new('\t')
    }
}

impl DelimitedParser {
    pub fn new(separator: char) -> Self {
        Self {
            mapper: ColumnMapper::new(&DELIMITED_COLUMNS)
                .with_separator(separator)
                .with_blank_column("accession"),
            log_ratios: false,
            line_number: 0,
        }
    }

    /// Treat the ratio column as log2 values
    pub fn with_log_ratios(mut self, log_ratios: bool) -> Self {
        self.log_ratios = log_ratios;
        self
    }

    fn decode(&self, line: &str, ctx: &ParseContext) -> LineOutcome<Record> {
        let record = match self.mapper.map_line(line) {
            Ok(record) => record,
            Err(e) => return LineOutcome::Malformed(e),
        };
        if let Err(e) = record.require("sequence") {
            return LineOutcome::Malformed(e);
        }
        let listed = record
            .get("accession")
            .map(split_accessions)
            .unwrap_or_default();
        if !listed.is_empty() && listed.iter().all(|a| ctx.is_decoy(a)) {
            return LineOutcome::DecoyRejected;
        }
        LineOutcome::Accepted(record)
    }

    fn handle_record(
        &self,
        record: Record,
        sides: &(RatioSide, RatioSide),
        ctx: &ParseContext,
        assembler: &mut Assembler<'_>,
    ) -> Result<(), QuantParserError> {
        let sequence = record.get("sequence").unwrap_or_default();
        let id = record.get("id").unwrap_or_default();
        let listed = record
            .get("accession")
            .map(split_accessions)
            .unwrap_or_default();
        let accessions: Vec<&str> = listed.into_iter().filter(|a| !ctx.is_decoy(a)).collect();

        let mut ratio = QuantRatio::new(
            record.get_f64("ratio"),
            self.log_ratios,
            sides.0.clone(),
            sides.1.clone(),
            "ratio",
            AggregationLevel::Psm,
        )?;
        if let Some(weight) = record.get_f64("weight") {
            ratio.set_score(Some(Score::new(RATIO_WEIGHT, weight)));
        }
        let hits = if accessions.is_empty() {
            assembler.index_lookup(&clean_sequence(sequence))?
        } else {
            Vec::new()
        };

        let mut graph = ctx.store.write();
        let handle = assembler.psm(
            &mut graph,
            PsmObservation {
                scan: id,
                full_sequence: sequence,
                ..Default::default()
            },
        );
        for accession in accessions {
            let accession = assembler.protein(&mut graph, accession, None);
            assembler.link(&mut graph, &handle, &accession);
        }
        assembler.link_indexed(&mut graph, &handle, &hits);
        if let Some(psm) = graph.psms.get_mut(&handle.psm) {
            psm.add_ratio(ratio);
        }
        drop(graph);
        assembler.accept();
        Ok(())
    }
}

impl FormatParser for DelimitedParser {
    fn parse<R: io::BufRead>(
        &mut self,
        stream: R,
        ctx: &ParseContext,
    ) -> Result<ParseResult, QuantParserError> {
        let mut assembler = Assembler::new(ctx);
        let descriptor = ctx.effective_descriptors().into_iter().next().ok_or_else(|| {
            QuantParserError::ConfigurationError(
                "delimited files need two labels or a ratio descriptor".to_string(),
            )
        })?;
        let sides = assembler.descriptor_sides(&descriptor)?;
        self.line_number = 0;

        for line in stream.lines() {
            let line = line?;
            self.line_number += 1;
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            if self.line_number == 1 {
                let first = line.split(self.mapper.separator()).next().unwrap_or_default();
                if first.trim().eq_ignore_ascii_case("id") {
                    debug!("Skipping header row of {}", ctx.source_name);
                    continue;
                }
            }
            match self.decode(line, ctx) {
                LineOutcome::Accepted(record) => {
                    if let Err(e) = self.handle_record(record, &sides, ctx, &mut assembler) {
                        assembler.skip_or_fail(e)?;
                    }
                }
                LineOutcome::DecoyRejected => assembler.reject_decoy(),
                LineOutcome::Malformed(e) => {
                    assembler.skip_or_fail(QuantParserError::malformed(self.line_number, e))?
                }
            }
        }
        Ok(assembler.finish())
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use indexmap::IndexMap;
    use regex::Regex;

    use super::*;
    use crate::io::traits::IndexedProtein;
    use crate::quant::{LabelMap, QuantificationLabel};
    use crate::store::IdentityStore;

    fn context() -> ParseContext {
        ParseContext::new(IdentityStore::new())
            .with_labels(
                LabelMap::new()
                    .with(QuantificationLabel::Light, "control")
                    .with(QuantificationLabel::Heavy, "treated"),
            )
            .with_decoy_pattern(Regex::new("^REV_").unwrap())
            .with_source_name("ratios.csv")
    }

    #[test]
    fn test_read_rows() {
        let text = "id,sequence,ratio,weight,accession\n\
                    1,K.PEPTIDEK.A,2.5,0.9,P1;P2\n\
                    2,LVNEVTEFAK,NA,,REV_P3\n\
                    3,AEFAEVSK,0.5,1.0\n";
        let index: IndexMap<String, Vec<IndexedProtein>> = [(
            "AEFAEVSK".to_string(),
            vec![IndexedProtein::new("P02768", "Serum albumin OS=Homo sapiens")],
        )]
        .into_iter()
        .collect();
        let ctx = context().with_sequence_index(Arc::new(index));
        let result = DelimitedParser::new(',').parse(text.as_bytes(), &ctx).unwrap();
        assert_eq!(result.records, 2);
        assert_eq!(result.decoys_rejected, 1);

        let graph = ctx.store.read();
        let psm = graph.psms.get("ratios.csv-1-PEPTIDEK").unwrap();
        assert_eq!(psm.proteins.len(), 2);
        assert_eq!(psm.ratios()[0].value(), 2.5);
        assert_eq!(psm.ratios()[0].score().unwrap().value, 0.9);

        let indexed = graph.psms.get("ratios.csv-3-AEFAEVSK").unwrap();
        assert!(indexed.proteins.contains("P02768"));
    }

    #[test]
    fn test_missing_index_entry() {
        let index: IndexMap<String, Vec<IndexedProtein>> = IndexMap::new();
        let ctx = context().with_sequence_index(Arc::new(index));
        let text = "1\tPEPTIDEK\t1.0\t1.0\t\n";
        let err = DelimitedParser::default().parse(text.as_bytes(), &ctx).unwrap_err();
        assert!(matches!(err, QuantParserError::PeptideNotFoundInIndex(_)));

        let mut ctx = ctx;
        ctx.ignore_missing_peptides = true;
        let result = DelimitedParser::default().parse(text.as_bytes(), &ctx).unwrap();
        assert_eq!(result.records, 1);
        assert!(ctx.store.missing_peptides().contains("PEPTIDEK"));
    }
}
