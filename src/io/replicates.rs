//! The wide replicate comparison format, one row per peptide with a block of columns
//! per replicate.
//!
//! ```text
//! SLINE  SEQUENCE  CS  PVALUE  QVALUE  PROTEIN  PROTEIN DESCRIPTION  EXP_1  RATIO_1  INTENSITY_1  ...
//! S      PEPTIDEK  2   0.01    0.05    P1;P2    ...                  run1   1.5      1000         ...
//! ```
use std::io;

use indexmap::IndexMap;
use lazy_static::lazy_static;
use log::debug;
use regex::Regex;

use crate::entity::{clean_sequence, HasAmounts, HasRatios, HasScores};
use crate::quant::{
    AggregationLevel, Amount, AmountType, QuantCondition, QuantRatio, RatioSide, Score,
};

use super::assembly::{split_accessions, Assembler, PsmObservation};
use super::columns::{ColumnError, ColumnMapper, Record};
use super::traits::{FormatParser, LineOutcome, ParseContext, ParseResult, QuantParserError};

lazy_static! {
    static ref REPLICATE_COLUMN: Regex = Regex::new(r"^(.+)_(\d+)$").unwrap();
}

/// Row level metrics attached to the peptide rather than to each replicate's PSM
pub const PEPTIDE_SCORE_COLUMNS: [&str; 2] = ["PVALUE", "QVALUE"];

const EXPERIMENT: &str = "EXP";
const SCAN: &str = "SCAN";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplicateMetric {
    Ratio,
    Amount(AmountType),
    Scan,
    Score,
}

impl ReplicateMetric {
    fn from_name(name: &str) -> Self {
        match name {
            "RATIO" => Self::Ratio,
            "INTENSITY" => Self::Amount(AmountType::Intensity),
            "AREA" => Self::Amount(AmountType::Area),
            SCAN => Self::Scan,
            _ => Self::Score,
        }
    }
}

/// The columns belonging to one replicate, `EXP_<n>` and its `<metric>_<n>` siblings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplicateColumns {
    pub index: usize,
    pub experiment: Option<String>,
    /// Metric name and column name pairs
    pub metrics: Vec<(String, String)>,
}

impl ReplicateColumns {
    fn column_for(&self, metric: &str) -> Option<&str> {
        self.metrics
            .iter()
            .find(|(m, _)| m == metric)
            .map(|(_, c)| c.as_str())
    }
}

/// Group replicate columns by their numeric suffix, in the order first seen
pub fn replicate_columns<S: AsRef<str>>(headers: &[S]) -> Vec<ReplicateColumns> {
    let mut groups: IndexMap<usize, ReplicateColumns> = IndexMap::new();
    for header in headers {
        let header = header.as_ref().trim();
        let Some(caps) = REPLICATE_COLUMN.captures(header) else {
            continue;
        };
        let Ok(index) = caps[2].parse::<usize>() else {
            continue;
        };
        let group = groups.entry(index).or_insert_with(|| ReplicateColumns {
            index,
            ..Default::default()
        });
        if &caps[1] == EXPERIMENT {
            group.experiment = Some(header.to_string());
        } else {
            group.metrics.push((caps[1].to_string(), header.to_string()));
        }
    }
    groups.into_values().collect()
}

#[derive(Debug)]
struct PeptideRow {
    record: Record,
    accessions: Vec<String>,
    descriptions: Vec<String>,
}

/**
Reads the wide replicate comparison format. The `SLINE` row declares the columns and
every `S` row reports one peptide, with a PSM per replicate whose `EXP_<n>` column names
it. `RATIO_<n>` becomes a ratio for the context's first ratio descriptor,
`INTENSITY_<n>` and `AREA_<n>` become amounts of the replicate's condition, `SCAN_<n>`
gives the scan number (the row number otherwise) and every other numeric metric
becomes a PSM score. `PVALUE` and `QVALUE` are scores of the peptide.
*/
#[derive(Debug, Default)]
pub struct ReplicateParser {
    header: Option<ColumnMapper>,
    replicates: Vec<ReplicateColumns>,
    line_number: usize,
    row_number: usize,
}

impl ReplicateParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replicates(&self) -> &[ReplicateColumns] {
        &self.replicates
    }

    fn handle_header(&mut self, tokens: &[&str]) {
        let names = &tokens[1..];
        self.replicates = replicate_columns(names);
        debug!("Found {} replicates in the SLINE header", self.replicates.len());
        self.header = Some(ColumnMapper::new(names));
    }

    fn decode(&self, tokens: &[&str], line: &str, ctx: &ParseContext) -> LineOutcome<PeptideRow> {
        let mapper = match self.header.as_ref() {
            Some(mapper) => mapper,
            None => return LineOutcome::Malformed(ColumnError::MissingHeader(line.to_string())),
        };
        let record = match mapper.map_tokens(tokens[1..].to_vec(), line) {
            Ok(record) => record,
            Err(e) => return LineOutcome::Malformed(e),
        };
        if let Err(e) = record.require("SEQUENCE") {
            return LineOutcome::Malformed(e);
        }
        let listed: Vec<String> = record
            .get("PROTEIN")
            .map(|p| split_accessions(p).into_iter().map(String::from).collect())
            .unwrap_or_default();
        if !listed.is_empty() && listed.iter().all(|a| ctx.is_decoy(a)) {
            return LineOutcome::DecoyRejected;
        }
        let descriptions: Vec<String> = record
            .get_any(&["PROTEIN DESCRIPTION", "DESCRIPTION"])
            .map(|d| d.split(';').map(|s| s.trim().to_string()).collect())
            .unwrap_or_default();
        LineOutcome::Accepted(PeptideRow {
            accessions: listed,
            descriptions,
            record,
        })
    }

    fn handle_row(
        &self,
        row: PeptideRow,
        sides: Option<&(RatioSide, RatioSide)>,
        ctx: &ParseContext,
        assembler: &mut Assembler<'_>,
    ) -> Result<usize, QuantParserError> {
        let record = &row.record;
        let sequence = record.get("SEQUENCE").unwrap_or_default();
        let charge = record.get_i32("CS").or_else(|| record.get_i32("CState"));
        let peptide_scores: Vec<Score> = PEPTIDE_SCORE_COLUMNS
            .iter()
            .filter_map(|c| record.get_f64(c).map(|v| Score::new(*c, v)))
            .collect();
        let hits = if row.accessions.is_empty() {
            assembler.index_lookup(&clean_sequence(sequence))?
        } else {
            Vec::new()
        };
        let row_scan = self.row_number.to_string();

        let mut observed = Vec::new();
        for replicate in self.replicates.iter() {
            let experiment = match replicate
                .experiment
                .as_deref()
                .and_then(|c| record.get_nonempty(c))
            {
                Some(experiment) => experiment,
                None => continue,
            };
            let condition = QuantCondition::new(experiment);
            let mut ratios = Vec::new();
            let mut amounts = Vec::new();
            let mut scores = Vec::new();
            for (metric, column) in replicate.metrics.iter() {
                let Some(value) = record.get_f64(column) else {
                    continue;
                };
                match ReplicateMetric::from_name(metric) {
                    ReplicateMetric::Ratio => {
                        if let Some((num, den)) = sides {
                            ratios.push(QuantRatio::new(
                                Some(value),
                                false,
                                num.clone(),
                                den.clone(),
                                metric.as_str(),
                                AggregationLevel::Psm,
                            )?);
                        }
                    }
                    ReplicateMetric::Amount(kind) => {
                        amounts.push(Amount::new(value, kind, condition.clone()))
                    }
                    ReplicateMetric::Scan => {}
                    ReplicateMetric::Score => scores.push(Score::new(metric.as_str(), value)),
                }
            }
            if ratios.is_empty() && amounts.is_empty() && scores.is_empty() {
                debug!(
                    "Replicate {} has no measurements at line {}",
                    replicate.index, self.line_number
                );
                continue;
            }
            let scan = replicate
                .column_for(SCAN)
                .and_then(|c| record.get_nonempty(c))
                .unwrap_or(row_scan.as_str())
                .to_string();
            observed.push((experiment, scan, ratios, amounts, scores));
        }
        if observed.is_empty() {
            return Ok(0);
        }

        let mut graph = ctx.store.write();
        let mut accessions = Vec::with_capacity(row.accessions.len());
        for (i, accession) in row.accessions.iter().enumerate() {
            let description = if row.descriptions.len() == row.accessions.len() {
                row.descriptions.get(i)
            } else if i == 0 && row.descriptions.len() == 1 {
                row.descriptions.first()
            } else {
                None
            };
            if ctx.is_decoy(accession) {
                continue;
            }
            let description = description.map(|s| s.as_str());
            accessions.push(assembler.protein(&mut graph, accession, description));
        }
        let count = observed.len();
        for (experiment, scan, ratios, amounts, scores) in observed {
            let handle = assembler.psm(
                &mut graph,
                PsmObservation {
                    raw_file: experiment,
                    scan: &scan,
                    full_sequence: sequence,
                    charge,
                    singleton: false,
                },
            );
            for accession in accessions.iter() {
                assembler.link(&mut graph, &handle, accession);
            }
            assembler.link_indexed(&mut graph, &handle, &hits);
            if let Some(psm) = graph.psms.get_mut(&handle.psm) {
                for ratio in ratios {
                    psm.add_ratio(ratio);
                }
                for amount in amounts {
                    psm.add_amount(amount);
                }
                for score in scores {
                    psm.set_score(score);
                }
            }
            if let Some(peptide) = graph.peptides.get_mut(&handle.peptide) {
                for score in peptide_scores.iter() {
                    peptide.set_score(score.clone());
                }
            }
        }
        Ok(count)
    }
}

impl FormatParser for ReplicateParser {
    fn parse<R: io::BufRead>(
        &mut self,
        stream: R,
        ctx: &ParseContext,
    ) -> Result<ParseResult, QuantParserError> {
        let mut assembler = Assembler::new(ctx);
        let sides = match ctx.effective_descriptors().first() {
            Some(descriptor) => Some(assembler.descriptor_sides(descriptor)?),
            None => None,
        };
        self.header = None;
        self.replicates.clear();
        self.line_number = 0;
        self.row_number = 0;

        for line in stream.lines() {
            let line = line?;
            self.line_number += 1;
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            let tokens: Vec<&str> = line.split('\t').collect();
            match tokens[0].trim() {
                "SLINE" => self.handle_header(&tokens),
                "S" => {
                    self.row_number += 1;
                    match self.decode(&tokens, line, ctx) {
                        LineOutcome::Accepted(row) => {
                            match self.handle_row(row, sides.as_ref(), ctx, &mut assembler) {
                                Ok(0) => {}
                                Ok(_) => assembler.accept(),
                                Err(e) => assembler.skip_or_fail(e)?,
                            }
                        }
                        LineOutcome::DecoyRejected => assembler.reject_decoy(),
                        LineOutcome::Malformed(e) => assembler
                            .skip_or_fail(QuantParserError::malformed(self.line_number, e))?,
                    }
                }
                other => debug!("Ignoring line of type {other:?} at line {}", self.line_number),
            }
        }
        Ok(assembler.finish())
    }
}

#[cfg(test)]
mod test {
    use regex::Regex;

    use super::*;
    use crate::quant::{LabelMap, QuantificationLabel};
    use crate::store::IdentityStore;

    const TEXT: &str = "SLINE\tSEQUENCE\tCS\tPVALUE\tQVALUE\tPROTEIN\tPROTEIN DESCRIPTION\tEXP_1\tRATIO_1\tINTENSITY_1\tREGRESSION_FACTOR_1\tEXP_2\tRATIO_2\tAREA_2\tSCAN_2\n\
        S\tPEPTIDEK\t2\t0.01\t0.05\tP1;P2\tfirst OS=Homo sapiens;second\trun1\t1.5\t1000\t0.9\trun2\t2.5\t300\t4455\n\
        S\tLVNEVTEFAK\t3\t0.2\t0.3\tREV_P9\t\trun1\t1.0\t10\t0.1\trun2\t1.0\t10\t1\n\
        S\tAEFAEVSK\t2\tNA\tNA\tP1\tfirst\trun1\tNA\tNA\tNA\t\tNA\tNA\tNA\n";

    #[test]
    fn test_replicate_columns() {
        let headers = ["SEQUENCE", "EXP_1", "RATIO_1", "REGRESSION_FACTOR_1", "EXP_2", "RATIO_2"];
        let groups = replicate_columns(&headers);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].experiment.as_deref(), Some("EXP_1"));
        assert_eq!(groups[0].column_for("REGRESSION_FACTOR"), Some("REGRESSION_FACTOR_1"));
        assert_eq!(groups[1].metrics.len(), 1);
    }

    #[test_log::test]
    fn test_read_replicates() {
        let ctx = ParseContext::new(IdentityStore::new())
            .with_labels(
                LabelMap::new()
                    .with(QuantificationLabel::Light, "control")
                    .with(QuantificationLabel::Heavy, "treated"),
            )
            .with_decoy_pattern(Regex::new("^REV_").unwrap());
        let mut parser = ReplicateParser::new();
        let result = parser.parse(TEXT.as_bytes(), &ctx).unwrap();
        assert_eq!(parser.replicates().len(), 2);
        assert_eq!(result.records, 1);
        assert_eq!(result.decoys_rejected, 1);
        assert_eq!(result.psms.len(), 2);

        let graph = ctx.store.read();
        let first = graph.psms.get("run1-1-PEPTIDEK-2").unwrap();
        assert_eq!(first.ratios_described_as("RATIO")[0].value(), 1.5);
        assert_eq!(first.score_value("REGRESSION_FACTOR"), Some(0.9));
        assert_eq!(
            first.amounts_of(AmountType::Intensity, &QuantCondition::new("run1"))[0].value,
            1000.0
        );
        let second = graph.psms.get("run2-4455-PEPTIDEK-2").unwrap();
        assert_eq!(second.amounts()[0].kind, AmountType::Area);

        let peptide = graph.peptides.get("PEPTIDEK").unwrap();
        assert_eq!(peptide.score_value("QVALUE"), Some(0.05));
        assert_eq!(peptide.psms.len(), 2);
        assert!(graph
            .proteins
            .get("P1")
            .unwrap()
            .taxonomies
            .contains("Homo sapiens"));
        assert_eq!(graph.proteins.get("P2").unwrap().description, "second");
        assert!(!graph.peptides.contains("AEFAEVSK"));
    }
}
