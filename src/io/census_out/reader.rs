use std::io;

use log::{debug, warn};

use crate::entity::{clean_sequence, HasAmounts, HasRatios, HasScores};
use crate::quant::{
    AggregationLevel, Amount, AmountType, QuantRatio, QuantificationLabel, RatioDescriptor,
    RatioError, RatioSide, Score,
};

use crate::io::assembly::{
    keep_one_spectrum_per_peak, Assembler, PsmObservation, REGRESSION_FACTOR,
};
use crate::io::columns::{ColumnError, ColumnMapper, Record};
use crate::io::tmt::{IntensityKind, TmtChannelResolver};
use crate::io::traits::{FormatParser, LineOutcome, ParseContext, ParseResult, QuantParserError};

/// Search engine and quantification scores copied onto PSMs when present
pub const PSM_SCORE_COLUMNS: [&str; 8] = [
    "XCorr",
    "deltaCN",
    "TMT_purity",
    "Signal-noise",
    "Localization_Score",
    "PVALUE",
    "PROFILE_SCORE",
    "PROBABILITY_SCORE",
];

/// Spectrum level ratio columns and the column scoring each of them
const PSM_RATIO_COLUMNS: [(&str, Option<&str>); 3] = [
    ("RATIO", Some(REGRESSION_FACTOR)),
    ("AREA_RATIO", Some("DET_FACTOR")),
    ("NORM_RATIO", None),
];

const PROTEIN_RATIO_COLUMNS: [(&str, Option<&str>); 3] = [
    ("AVERAGE_RATIO", Some("STANDARD_DEVIATION")),
    ("COMPOSITE_RATIO", None),
    ("AREA_RATIO", None),
];

const REPORTER_ION_RATIO: &str = "REPORTER_ION_RATIO";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CensusOutParserState {
    #[default]
    Start,
    Header,
    Protein,
    Spectrum,
    /// Inside the spectrum block of a rejected decoy protein
    DecoyGroup,
    /// Spectrum lines seen with no protein to attach them to
    Orphan,
    Done,
}

/// The header sections a census out file declares
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CensusSection {
    Protein,
    Spectrum,
    SingletonSpectrum,
}

impl CensusSection {
    pub fn from_token(token: &str) -> Option<Self> {
        match token.trim() {
            "PLINE" => Some(Self::Protein),
            "SLINE" => Some(Self::Spectrum),
            "&SLINE" => Some(Self::SingletonSpectrum),
            _ => None,
        }
    }
}

/// A protein line that has been decoded but not yet registered
#[derive(Debug, Clone, PartialEq)]
pub struct ProteinEntry {
    pub accession: String,
    pub description: String,
    record: Record,
}

#[derive(Debug)]
struct OpenGroup {
    entry: ProteinEntry,
    registered: Option<String>,
}

#[derive(Debug, Default)]
struct SpectrumQuant {
    ratios: Vec<QuantRatio>,
    amounts: Vec<Amount>,
    scores: Vec<Score>,
}

type ResolvedRatio = (RatioDescriptor, RatioSide, RatioSide);

fn ratios_from_columns(
    record: &Record,
    resolved: &[ResolvedRatio],
    columns: &[(&str, Option<&str>)],
    level: AggregationLevel,
) -> Result<Vec<QuantRatio>, RatioError> {
    let mut ratios = Vec::new();
    for (descriptor, num, den) in resolved {
        for (base, score_column) in columns {
            let column = descriptor.column(base);
            let value = match record.get_f64(&column) {
                Some(value) => value,
                None => continue,
            };
            let mut ratio = QuantRatio::new(
                Some(value),
                false,
                num.clone(),
                den.clone(),
                column.as_str(),
                level,
            )?;
            if let Some(score_column) = score_column {
                if let Some(score) = record.get_f64(&descriptor.column(score_column)) {
                    ratio.set_score(Some(Score::new(*score_column, score)));
                }
            }
            ratios.push(ratio);
        }
    }
    Ok(ratios)
}

/**
Reads the tab separated "out" report of the Census quantification tool.

Each line starts with its type: `H` declares the headers of the `PLINE`, `SLINE` and
`&SLINE` sections, `P` opens a protein, `S` and `&S` report a (singleton) spectrum of
the most recent protein. Proteins are only registered once one of their spectra is
accepted, so a protein line directly followed by another protein line is dropped. A
protein matching the decoy pattern is rejected along with its spectra.
*/
#[derive(Debug, Default)]
pub struct CensusOutParser {
    pub state: CensusOutParserState,
    protein_header: Option<ColumnMapper>,
    spectrum_header: Option<ColumnMapper>,
    singleton_header: Option<ColumnMapper>,
    tmt: Option<TmtChannelResolver>,
    line_number: usize,
}

impl CensusOutParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// The reporter ion channels found in the spectrum header, if any
    pub fn tmt_channels(&self) -> Option<&TmtChannelResolver> {
        self.tmt.as_ref()
    }

    fn handle_header(
        &mut self,
        tokens: &[&str],
        ctx: &ParseContext,
    ) -> Result<(), QuantParserError> {
        let section_at = match tokens.get(1) {
            Some(t) if t.trim().is_empty() => 2,
            _ => 1,
        };
        let section = match tokens.get(section_at).and_then(|t| CensusSection::from_token(t)) {
            Some(section) => section,
            None => return Ok(()),
        };
        let names = &tokens[section_at + 1..];
        let mapper = ColumnMapper::new(names);
        match section {
            CensusSection::Protein => self.protein_header = Some(mapper),
            CensusSection::Spectrum => {
                self.tmt = TmtChannelResolver::resolve(names, &ctx.labels)?;
                if let Some(tmt) = self.tmt.as_ref() {
                    debug!("Found {} reporter channels", tmt.plex());
                }
                self.spectrum_header = Some(mapper);
            }
            CensusSection::SingletonSpectrum => self.singleton_header = Some(mapper),
        }
        self.state = CensusOutParserState::Header;
        Ok(())
    }

    fn decode_protein(
        &self,
        tokens: &[&str],
        line: &str,
        ctx: &ParseContext,
    ) -> LineOutcome<ProteinEntry> {
        let mapper = match self.protein_header.as_ref() {
            Some(mapper) => mapper,
            None => return LineOutcome::Malformed(ColumnError::MissingHeader(line.to_string())),
        };
        let record = match mapper.map_tokens(tokens[1..].to_vec(), line) {
            Ok(record) => record,
            Err(e) => return LineOutcome::Malformed(e),
        };
        let accession = match record.require("LOCUS") {
            Ok(accession) => accession.to_string(),
            Err(e) => return LineOutcome::Malformed(e),
        };
        if ctx.is_decoy(&accession) {
            debug!("Rejecting decoy protein {accession}");
            return LineOutcome::DecoyRejected;
        }
        LineOutcome::Accepted(ProteinEntry {
            description: record.get("DESCRIPTION").unwrap_or_default().to_string(),
            accession,
            record,
        })
    }

    fn spectrum_quant(
        &self,
        record: &Record,
        resolved: &[ResolvedRatio],
        ctx: &ParseContext,
        singleton: bool,
    ) -> Result<SpectrumQuant, RatioError> {
        let mut quant = SpectrumQuant {
            ratios: ratios_from_columns(
                record,
                resolved,
                &PSM_RATIO_COLUMNS,
                AggregationLevel::Psm,
            )?,
            ..Default::default()
        };

        if let Some((_, num, den)) = resolved.iter().find(|(d, _, _)| !d.is_isobaric()) {
            for (column, side) in [("SAM_INT", num), ("REF_INT", den)] {
                if let Some(value) = record.get_f64(column) {
                    quant.amounts.push(
                        Amount::new(value, AmountType::Intensity, side.condition.clone())
                            .singleton(singleton),
                    );
                }
            }
        }

        if let Some(tmt) = self.tmt.as_ref() {
            for (label, columns) in tmt.iter() {
                let condition = match ctx.labels.condition(label) {
                    Some(condition) => condition,
                    None => continue,
                };
                for (kind, header) in columns.iter() {
                    if let Some(value) = record.get_f64(header) {
                        quant.amounts.push(
                            Amount::new(value, kind.amount_type(), condition.clone())
                                .singleton(singleton),
                        );
                    }
                }
            }
            for (descriptor, num, den) in resolved.iter().filter(|(d, _, _)| d.is_isobaric()) {
                let intensity = |label: &QuantificationLabel| {
                    tmt.columns(label)
                        .and_then(|c| c.get(IntensityKind::Raw))
                        .and_then(|h| record.get_f64(h))
                };
                quant.ratios.push(QuantRatio::isobaric(
                    intensity(&descriptor.numerator),
                    intensity(&descriptor.denominator),
                    num.clone(),
                    den.clone(),
                    REPORTER_ION_RATIO,
                    AggregationLevel::Psm,
                )?);
            }
        }

        for column in PSM_SCORE_COLUMNS {
            if let Some(value) = record.get_f64(column) {
                quant.scores.push(Score::new(column, value));
            }
        }
        Ok(quant)
    }

    fn handle_spectrum(
        &self,
        record: Record,
        singleton: bool,
        group: &mut OpenGroup,
        resolved: &[ResolvedRatio],
        ctx: &ParseContext,
        assembler: &mut Assembler<'_>,
    ) -> Result<(), QuantParserError> {
        let line_number = self.line_number;
        let sequence = record
            .require("SEQUENCE")
            .map_err(|e| QuantParserError::malformed(line_number, e))?;
        let scan = record.get_any(&["SCAN", "ScanNum"]).unwrap_or_default();
        let charge = ["CS", "CState"].iter().find_map(|c| record.get_i32(c));
        let raw_file = record.get("FILE_NAME").unwrap_or_default();

        let quant = self.spectrum_quant(&record, resolved, ctx, singleton)?;
        let protein_ratios = if group.registered.is_none() {
            ratios_from_columns(
                &group.entry.record,
                resolved,
                &PROTEIN_RATIO_COLUMNS,
                AggregationLevel::Protein,
            )?
        } else {
            Vec::new()
        };
        let hits = assembler.index_lookup(&clean_sequence(sequence))?;

        let mut graph = ctx.store.write();
        let accession = match group.registered.as_ref() {
            Some(accession) => accession.clone(),
            None => {
                let accession = assembler.protein(
                    &mut graph,
                    &group.entry.accession,
                    Some(&group.entry.description),
                );
                if let Some(protein) = graph.proteins.get_mut(&accession) {
                    for ratio in protein_ratios {
                        protein.add_ratio(ratio);
                    }
                }
                group.registered = Some(accession.clone());
                accession
            }
        };

        let handle = assembler.psm(
            &mut graph,
            PsmObservation {
                raw_file,
                scan,
                full_sequence: sequence,
                charge,
                singleton,
            },
        );
        assembler.link(&mut graph, &handle, &accession);
        assembler.link_indexed(&mut graph, &handle, &hits);
        if let Some(psm) = graph.psms.get_mut(&handle.psm) {
            for ratio in quant.ratios {
                psm.add_ratio(ratio);
            }
            for amount in quant.amounts {
                psm.add_amount(amount);
            }
            for score in quant.scores {
                psm.set_score(score);
            }
        }
        drop(graph);
        assembler.accept();
        Ok(())
    }
}

impl FormatParser for CensusOutParser {
    fn parse<R: io::BufRead>(
        &mut self,
        stream: R,
        ctx: &ParseContext,
    ) -> Result<ParseResult, QuantParserError> {
        let mut assembler = Assembler::new(ctx);
        let resolved = ctx
            .effective_descriptors()
            .into_iter()
            .map(|d| assembler.descriptor_sides(&d).map(|(num, den)| (d, num, den)))
            .collect::<Result<Vec<_>, _>>()?;

        let mut group: Option<OpenGroup> = None;
        self.state = CensusOutParserState::Start;
        self.line_number = 0;

        for line in stream.lines() {
            let line = line?;
            self.line_number += 1;
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            let tokens: Vec<&str> = line.split('\t').collect();
            match tokens[0].trim() {
                "H" => self.handle_header(&tokens, ctx)?,
                "P" => match self.decode_protein(&tokens, line, ctx) {
                    LineOutcome::Accepted(entry) => {
                        if let Some(previous) = group.take() {
                            if previous.registered.is_none() {
                                debug!(
                                    "Protein {} has no spectra, dropping it",
                                    previous.entry.accession
                                );
                            }
                        }
                        group = Some(OpenGroup {
                            entry,
                            registered: None,
                        });
                        self.state = CensusOutParserState::Protein;
                    }
                    LineOutcome::DecoyRejected => {
                        group = None;
                        assembler.reject_decoy();
                        self.state = CensusOutParserState::DecoyGroup;
                    }
                    LineOutcome::Malformed(e) => {
                        group = None;
                        self.state = CensusOutParserState::Orphan;
                        assembler.skip_or_fail(QuantParserError::malformed(self.line_number, e))?;
                    }
                },
                kind @ ("S" | "&S") => {
                    if self.state == CensusOutParserState::DecoyGroup {
                        continue;
                    }
                    let open = match group.as_mut() {
                        Some(open) => open,
                        None => {
                            debug!("Dropping orphan spectrum at line {}", self.line_number);
                            self.state = CensusOutParserState::Orphan;
                            continue;
                        }
                    };
                    let singleton = kind == "&S";
                    let mapper = if singleton {
                        self.singleton_header.as_ref().or(self.spectrum_header.as_ref())
                    } else {
                        self.spectrum_header.as_ref()
                    };
                    let decoded = match mapper {
                        Some(mapper) => mapper.map_tokens(tokens[1..].to_vec(), line),
                        None => Err(ColumnError::MissingHeader(line.to_string())),
                    };
                    let outcome = match decoded {
                        Ok(record) => self.handle_spectrum(
                            record,
                            singleton,
                            open,
                            &resolved,
                            ctx,
                            &mut assembler,
                        ),
                        Err(e) => Err(QuantParserError::malformed(self.line_number, e)),
                    };
                    if let Err(e) = outcome {
                        assembler.skip_or_fail(e)?;
                    }
                    self.state = CensusOutParserState::Spectrum;
                }
                other => {
                    debug!("Ignoring line of type {other:?} at line {}", self.line_number);
                }
            }
        }

        if let Some(open) = group {
            if open.registered.is_none() {
                debug!("Protein {} has no spectra, dropping it", open.entry.accession);
            }
        }
        if self.protein_header.is_none() && self.spectrum_header.is_none() {
            warn!("No census header declarations were found in {}", ctx.source_name);
        }

        let mut result = assembler.finish();
        if ctx.one_spectrum_per_peak {
            let mut graph = ctx.store.write();
            let removed = keep_one_spectrum_per_peak(&mut graph, &mut result);
            if removed > 0 {
                debug!("Removed {removed} redundant spectra of already measured peaks");
            }
        }
        self.state = CensusOutParserState::Done;
        Ok(result)
    }
}
