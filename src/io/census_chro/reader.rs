use std::io;

use indexmap::IndexMap;
use log::{debug, warn};
use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::Reader;

use crate::entity::{clean_sequence, HasRatios};
use crate::quant::{average_ratio, parse_optional_f64, AggregationLevel, QuantRatio, RatioSide};

use crate::io::assembly::{Assembler, PsmObservation};
use crate::io::traits::{FormatParser, ParseContext, ParseResult, QuantParserError};

/// The only chro document version this reader was written against
pub const CHRO_VERSION: &str = "1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChroParserState {
    #[default]
    Start,
    Chro,
    Protein,
    /// Inside a protein rejected as a decoy
    DecoyProtein,
    Peptide,
    Done,
}

/// One `<ions>` element: an ion series with its light and heavy intensities
#[derive(Debug, Clone, PartialEq)]
pub struct IonSeries {
    pub ion_type: String,
    pub light: Vec<Option<f64>>,
    pub heavy: Vec<Option<f64>>,
}

impl IonSeries {
    fn parse_intensities(value: &str) -> Vec<Option<f64>> {
        if value.trim().is_empty() {
            return Vec::new();
        }
        value
            .split(',')
            .map(|v| parse_optional_f64(v).filter(|x| *x != 0.0))
            .collect()
    }

    /// Pair up the light and heavy intensity of each ion number, skipping ions seen in
    /// neither channel
    pub fn pairs(&self) -> impl Iterator<Item = (usize, Option<f64>, Option<f64>)> + '_ {
        let n = self.light.len().max(self.heavy.len());
        (0..n).filter_map(move |i| {
            let light = self.light.get(i).copied().flatten();
            let heavy = self.heavy.get(i).copied().flatten();
            (light.is_some() || heavy.is_some()).then_some((i + 1, light, heavy))
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
struct PeptideBuilder {
    scan: String,
    sequence: String,
    charge: Option<i32>,
    raw_file: String,
    ions: Vec<IonSeries>,
}

#[derive(Debug, Clone, Default)]
struct ProteinBuilder {
    accession: String,
    description: String,
    registered: Option<String>,
}

fn attributes(event: &BytesStart) -> Result<IndexMap<String, String>, QuantParserError> {
    let mut values = IndexMap::new();
    for attr in event.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
        let value = attr.unescape_value()?.to_string();
        values.insert(key, value);
    }
    Ok(values)
}

/**
Reads the chro XML dialect, in which each peptide of each protein reports the light and
heavy intensities of its fragment ion series.

Every fragment ion observed in either channel yields an isobaric light/heavy ratio on
the PSM, and the PSM also receives the average of its finite fragment ratios.
*/
#[derive(Debug, Default)]
pub struct ChroParser {
    pub state: ChroParserState,
    version: Option<String>,
    buffer: Vec<u8>,
}

impl ChroParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// The version declared by the last document read
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    fn start_element(
        &mut self,
        event: &BytesStart,
        ctx: &ParseContext,
        protein: &mut Option<ProteinBuilder>,
        peptide: &mut Option<PeptideBuilder>,
        assembler: &mut Assembler<'_>,
    ) -> Result<(), QuantParserError> {
        match event.name().as_ref() {
            b"chro" => {
                let attrs = attributes(event)?;
                let version = attrs.get("version").cloned().unwrap_or_default();
                if version != CHRO_VERSION {
                    warn!(
                        "Expected chro version {CHRO_VERSION}, found {version:?}, reading anyway"
                    );
                }
                self.version = Some(version);
                self.state = ChroParserState::Chro;
            }
            b"protein" => {
                let mut attrs = attributes(event)?;
                let accession = attrs.swap_remove("locus").unwrap_or_default();
                if ctx.is_decoy(&accession) {
                    debug!("Rejecting decoy protein {accession}");
                    assembler.reject_decoy();
                    *protein = None;
                    self.state = ChroParserState::DecoyProtein;
                } else {
                    *protein = Some(ProteinBuilder {
                        accession,
                        description: attrs.swap_remove("desc").unwrap_or_default(),
                        registered: None,
                    });
                    self.state = ChroParserState::Protein;
                }
            }
            b"peptide" if self.state == ChroParserState::Protein => {
                let attrs = attributes(event)?;
                let get = |k: &str| attrs.get(k).cloned().unwrap_or_default();
                *peptide = Some(PeptideBuilder {
                    scan: get("scan"),
                    sequence: get("seq"),
                    charge: attrs.get("charge").and_then(|c| c.trim().parse().ok()),
                    raw_file: get("file"),
                    ions: Vec::new(),
                });
                self.state = ChroParserState::Peptide;
            }
            b"ions" => {
                if let Some(peptide) = peptide.as_mut() {
                    let attrs = attributes(event)?;
                    let get = |k: &str| attrs.get(k).map(|s| s.as_str()).unwrap_or_default();
                    peptide.ions.push(IonSeries {
                        ion_type: get("type").to_string(),
                        light: IonSeries::parse_intensities(get("light")),
                        heavy: IonSeries::parse_intensities(get("heavy")),
                    });
                }
            }
            _ => {}
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn end_element(
        &mut self,
        event: &BytesEnd,
        ctx: &ParseContext,
        sides: &(RatioSide, RatioSide),
        protein: &mut Option<ProteinBuilder>,
        peptide: &mut Option<PeptideBuilder>,
        assembler: &mut Assembler<'_>,
    ) -> Result<(), QuantParserError> {
        match event.name().as_ref() {
            b"peptide" => {
                if let (Some(built), Some(open)) = (peptide.take(), protein.as_mut()) {
                    Self::finish_peptide(built, open, sides, ctx, assembler)?;
                }
                if self.state == ChroParserState::Peptide {
                    self.state = ChroParserState::Protein;
                }
            }
            b"protein" => {
                if let Some(open) = protein.take() {
                    if open.registered.is_none() {
                        debug!("Protein {} has no peptides, dropping it", open.accession);
                    }
                }
                self.state = ChroParserState::Chro;
            }
            b"chro" => self.state = ChroParserState::Done,
            _ => {}
        }
        Ok(())
    }

    fn finish_peptide(
        built: PeptideBuilder,
        protein: &mut ProteinBuilder,
        sides: &(RatioSide, RatioSide),
        ctx: &ParseContext,
        assembler: &mut Assembler<'_>,
    ) -> Result<(), QuantParserError> {
        let (num, den) = sides;
        let mut ratios = Vec::new();
        for series in built.ions.iter() {
            for (number, light, heavy) in series.pairs() {
                ratios.push(QuantRatio::isobaric(
                    light,
                    heavy,
                    num.clone(),
                    den.clone(),
                    format!("{}{number}", series.ion_type),
                    AggregationLevel::Psm,
                )?);
            }
        }
        let average =
            average_ratio(&ratios, &num.condition, &den.condition, AggregationLevel::Psm)?;
        let hits = assembler.index_lookup(&clean_sequence(&built.sequence))?;

        let mut graph = ctx.store.write();
        let accession = match protein.registered.as_ref() {
            Some(accession) => accession.clone(),
            None => {
                let accession =
                    assembler.protein(&mut graph, &protein.accession, Some(&protein.description));
                protein.registered = Some(accession.clone());
                accession
            }
        };
        let handle = assembler.psm(
            &mut graph,
            PsmObservation {
                raw_file: &built.raw_file,
                scan: &built.scan,
                full_sequence: &built.sequence,
                charge: built.charge,
                singleton: false,
            },
        );
        assembler.link(&mut graph, &handle, &accession);
        assembler.link_indexed(&mut graph, &handle, &hits);
        if let Some(psm) = graph.psms.get_mut(&handle.psm) {
            for ratio in ratios {
                psm.add_ratio(ratio);
            }
            psm.add_ratio(average);
        }
        drop(graph);
        assembler.accept();
        Ok(())
    }
}

impl FormatParser for ChroParser {
    fn parse<R: io::BufRead>(
        &mut self,
        stream: R,
        ctx: &ParseContext,
    ) -> Result<ParseResult, QuantParserError> {
        let mut assembler = Assembler::new(ctx);
        let descriptor = ctx.effective_descriptors().into_iter().next().ok_or_else(|| {
            QuantParserError::ConfigurationError(
                "chro files need a light and a heavy label mapped to conditions".to_string(),
            )
        })?;
        let sides = assembler.descriptor_sides(&descriptor)?;

        let mut reader = Reader::from_reader(stream);
        reader.trim_text(true);
        self.state = ChroParserState::Start;
        self.version = None;
        let mut protein = None;
        let mut peptide = None;
        let mut buffer = std::mem::take(&mut self.buffer);

        loop {
            buffer.clear();
            match reader.read_event_into(&mut buffer) {
                Ok(Event::Start(ref e)) => {
                    self.start_element(e, ctx, &mut protein, &mut peptide, &mut assembler)?;
                }
                Ok(Event::Empty(ref e)) => {
                    self.start_element(e, ctx, &mut protein, &mut peptide, &mut assembler)?;
                    self.end_element(
                        &e.to_end(),
                        ctx,
                        &sides,
                        &mut protein,
                        &mut peptide,
                        &mut assembler,
                    )?;
                }
                Ok(Event::End(ref e)) => {
                    self.end_element(e, ctx, &sides, &mut protein, &mut peptide, &mut assembler)?;
                }
                Ok(Event::Eof) => break,
                Err(e) => return Err(e.into()),
                _ => {}
            }
        }
        self.buffer = buffer;
        if self.version.is_none() {
            warn!("No chro element found in {}", ctx.source_name);
        }
        self.state = ChroParserState::Done;
        Ok(assembler.finish())
    }
}
