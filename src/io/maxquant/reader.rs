use std::fs;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use lazy_static::lazy_static;
use log::{debug, warn};
use regex::Regex;

use crate::entity::sequence::end_of_enclosure;
use crate::entity::{clean_sequence, HasAmounts, HasRatios, HasScores};
use crate::quant::{AggregationLevel, Amount, AmountType, QuantRatio, RatioSide, Score};

use crate::io::assembly::{split_accessions, Assembler, PsmObservation};
use crate::io::columns::{ColumnError, ColumnMapper, Record};
use crate::io::traits::{FormatParser, LineOutcome, ParseContext, ParseResult, QuantParserError};

pub const EVIDENCE_FILE: &str = "evidence.txt";
pub const MSMS_FILE: &str = "msms.txt";

/// Scores copied from evidence rows onto each of their PSMs
pub const EVIDENCE_SCORE_COLUMNS: [&str; 2] = ["PEP", "Score"];

lazy_static! {
    static ref CHEMMOD: Regex = Regex::new(r"CHEMMOD:([+-]?\d+(?:\.\d+)?),\s*([^,\]]+)").unwrap();
}

/**
The modification name to mass shift table mined from the `COM` comment lines of an
mzTab file written next to a MaxQuant export.
*/
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChemModTable(IndexMap<String, f64>);

impl ChemModTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<S: Into<String>>(&mut self, name: S, mass_shift: f64) {
        self.0.insert(name.into(), mass_shift);
    }

    pub fn mass_shift(&self, name: &str) -> Option<f64> {
        self.0.get(name.trim()).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Collect every `CHEMMOD:<mass>, <name>` declaration on the stream's comment lines
    pub fn from_reader<R: BufRead>(stream: R) -> io::Result<Self> {
        let mut table = Self::new();
        for line in stream.lines() {
            let line = line?;
            if !line.starts_with("COM") {
                continue;
            }
            for caps in CHEMMOD.captures_iter(&line) {
                if let Ok(mass) = caps[1].parse::<f64>() {
                    table.insert(caps[2].trim(), mass);
                }
            }
        }
        Ok(table)
    }

    /**
    Rewrite a MaxQuant modified sequence such as `_(Acetyl (Protein N-term))M(Oxidation (M))K_`
    so that each named modification with a known mass reads as a bracketed mass shift,
    `[+42.0106]M[+15.9949]K`. Unknown names are kept in brackets.
    */
    pub fn annotate(&self, modified_sequence: &str) -> String {
        let core = modified_sequence.trim().trim_matches('_');
        let bytes = core.as_bytes();
        let mut out = String::with_capacity(core.len());
        let mut i = 0;
        while i < bytes.len() {
            let b = bytes[i];
            let close = match b {
                b'(' => Some(b')'),
                b'[' => Some(b']'),
                _ => None,
            };
            if let Some(close) = close {
                match end_of_enclosure(core, i + 1, b, close) {
                    Some(end) => {
                        let name = core[i + 1..end].trim();
                        match self.mass_shift(name) {
                            Some(mass) => out.push_str(&format!("[{mass:+}]")),
                            None => {
                                out.push('[');
                                out.push_str(name);
                                out.push(']');
                            }
                        }
                        i = end + 1;
                    }
                    None => {
                        out.push_str(&core[i..]);
                        break;
                    }
                }
                continue;
            }
            out.push(b as char);
            i += 1;
        }
        out
    }
}

/// Where one MS/MS spectrum was acquired, from `msms.txt`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MsmsEntry {
    pub raw_file: String,
    pub scan_number: String,
    pub charge: Option<i32>,
}

/// Read the `id`, `Raw file`, `Scan number` and `Charge` columns of `msms.txt`
pub fn read_msms<R: BufRead>(stream: R) -> Result<IndexMap<String, MsmsEntry>, QuantParserError> {
    let mut entries = IndexMap::new();
    let mut mapper: Option<ColumnMapper> = None;
    for (i, line) in stream.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        if mapper.is_none() {
            let headers: Vec<&str> = line.trim_end_matches('\r').split('\t').collect();
            mapper = Some(ColumnMapper::new(&headers));
            continue;
        }
        let Some(mapper) = mapper.as_ref() else {
            continue;
        };
        let record = mapper
            .map_line(&line)
            .map_err(|e| QuantParserError::malformed(i + 1, e))?;
        let id = record
            .require("id")
            .map_err(|e| QuantParserError::malformed(i + 1, e))?;
        entries.insert(
            id.to_string(),
            MsmsEntry {
                raw_file: record.get("Raw file").unwrap_or_default().to_string(),
                scan_number: record.get("Scan number").unwrap_or_default().to_string(),
                charge: record.get_i32("Charge"),
            },
        );
    }
    Ok(entries)
}

#[derive(Debug, Clone)]
struct EvidenceRow {
    record: Record,
    accessions: Vec<String>,
    sequence: String,
    spectra: Vec<MsmsEntry>,
}

/**
Reads the `evidence.txt` table of a MaxQuant export.

Each evidence row names the MS/MS spectra supporting it in its `MS/MS IDs` column, and
those ids are looked up in the `msms.txt` table to find the raw file, scan number and
charge of each PSM. Modification names are rewritten to mass shifts using the CHEMMOD
comments of the export's mzTab file when one is present.
*/
#[derive(Debug, Default)]
pub struct MaxQuantParser {
    msms: IndexMap<String, MsmsEntry>,
    modifications: ChemModTable,
    header: Option<ColumnMapper>,
    line_number: usize,
}

impl MaxQuantParser {
    pub fn new(msms: IndexMap<String, MsmsEntry>, modifications: ChemModTable) -> Self {
        Self {
            msms,
            modifications,
            ..Default::default()
        }
    }

    /// Load the `msms.txt` table and the mzTab modification table of an export directory
    pub fn from_directory<P: AsRef<Path>>(path: P) -> Result<Self, QuantParserError> {
        let path = path.as_ref();
        let msms = read_msms(BufReader::new(fs::File::open(path.join(MSMS_FILE))?))?;
        let modifications = match find_mztab(path)? {
            Some(mztab) => ChemModTable::from_reader(BufReader::new(fs::File::open(mztab)?))?,
            None => {
                warn!(
                    "No mzTab file found in {}, modifications keep their names",
                    path.display()
                );
                ChemModTable::new()
            }
        };
        debug!(
            "Loaded {} MS/MS entries and {} modifications from {}",
            msms.len(),
            modifications.len(),
            path.display()
        );
        Ok(Self::new(msms, modifications))
    }

    pub fn modifications(&self) -> &ChemModTable {
        &self.modifications
    }

    pub fn msms(&self) -> &IndexMap<String, MsmsEntry> {
        &self.msms
    }

    fn decode(&self, line: &str, ctx: &ParseContext) -> LineOutcome<EvidenceRow> {
        let mapper = match self.header.as_ref() {
            Some(mapper) => mapper,
            None => return LineOutcome::Malformed(ColumnError::MissingHeader(line.to_string())),
        };
        let record = match mapper.map_line(line) {
            Ok(record) => record,
            Err(e) => return LineOutcome::Malformed(e),
        };
        if record.get("Reverse") == Some("+") {
            return LineOutcome::DecoyRejected;
        }
        let listed: Vec<String> = record
            .get("Proteins")
            .map(|p| split_accessions(p).into_iter().map(String::from).collect())
            .unwrap_or_default();
        let accessions: Vec<String> = listed.iter().filter(|a| !ctx.is_decoy(a)).cloned().collect();
        if !listed.is_empty() && accessions.is_empty() {
            return LineOutcome::DecoyRejected;
        }
        let sequence = match record
            .get_nonempty("Modified sequence")
            .or_else(|| record.get_nonempty("Sequence"))
        {
            Some(sequence) => self.modifications.annotate(sequence),
            None => {
                return LineOutcome::Malformed(ColumnError::MissingValue {
                    column: "Sequence".to_string(),
                    line: line.to_string(),
                })
            }
        };
        let spectra = self.spectra_for(&record);
        LineOutcome::Accepted(EvidenceRow {
            record,
            accessions,
            sequence,
            spectra,
        })
    }

    fn spectra_for(&self, record: &Record) -> Vec<MsmsEntry> {
        let mut spectra: Vec<MsmsEntry> = record
            .get("MS/MS IDs")
            .map(|ids| {
                ids.split(';')
                    .filter_map(|id| {
                        let found = self.msms.get(id.trim());
                        if found.is_none() && !id.trim().is_empty() {
                            debug!("MS/MS id {id} is not in {MSMS_FILE}");
                        }
                        found.cloned()
                    })
                    .collect()
            })
            .unwrap_or_default();
        if spectra.is_empty() {
            let scan = record
                .get_nonempty("MS/MS scan number")
                .or_else(|| record.get_nonempty("MS/MS Scan Number"))
                .or_else(|| record.get_nonempty("id"));
            if let Some(scan) = scan {
                spectra.push(MsmsEntry {
                    raw_file: record.get("Raw file").unwrap_or_default().to_string(),
                    scan_number: scan.to_string(),
                    charge: record.get_i32("Charge"),
                });
            }
        }
        spectra
    }

    fn ratios(
        record: &Record,
        sides: &[(String, String, RatioSide, RatioSide)],
    ) -> Result<Vec<QuantRatio>, QuantParserError> {
        let mut ratios = Vec::new();
        for (num, den, num_side, den_side) in sides {
            for suffix in ["", " normalized"] {
                let forward = format!("Ratio {num}/{den}{suffix}");
                let reverse = format!("Ratio {den}/{num}{suffix}");
                if let Some(value) = record.get_f64(&forward) {
                    ratios.push(QuantRatio::new(
                        Some(value),
                        false,
                        num_side.clone(),
                        den_side.clone(),
                        forward,
                        AggregationLevel::Psm,
                    )?);
                } else if let Some(value) = record.get_f64(&reverse) {
                    ratios.push(QuantRatio::new(
                        Some(value),
                        false,
                        den_side.clone(),
                        num_side.clone(),
                        reverse,
                        AggregationLevel::Psm,
                    )?);
                }
            }
        }
        Ok(ratios)
    }

    fn handle_row(
        &self,
        row: EvidenceRow,
        sides: &[(String, String, RatioSide, RatioSide)],
        ctx: &ParseContext,
        assembler: &mut Assembler<'_>,
    ) -> Result<(), QuantParserError> {
        let ratios = Self::ratios(&row.record, sides)?;
        let mut amounts = Vec::new();
        for (label, condition) in ctx.labels.iter().filter(|(l, _)| !l.is_tmt()) {
            let column = format!("Intensity {}", label.abbreviation());
            if let Some(value) = row.record.get_f64(&column) {
                amounts.push(Amount::new(value, AmountType::Intensity, condition.clone()));
            }
        }
        let scores: Vec<Score> = EVIDENCE_SCORE_COLUMNS
            .iter()
            .filter_map(|c| row.record.get_f64(c).map(|v| Score::new(*c, v)))
            .collect();
        let hits = if row.accessions.is_empty() {
            assembler.index_lookup(&clean_sequence(&row.sequence))?
        } else {
            Vec::new()
        };

        let mut graph = ctx.store.write();
        let accessions: Vec<String> = row
            .accessions
            .iter()
            .map(|acc| assembler.protein(&mut graph, acc, None))
            .collect();
        let charge = row.record.get_i32("Charge");
        for spectrum in row.spectra.iter() {
            let handle = assembler.psm(
                &mut graph,
                PsmObservation {
                    raw_file: &spectrum.raw_file,
                    scan: &spectrum.scan_number,
                    full_sequence: &row.sequence,
                    charge: spectrum.charge.or(charge),
                    singleton: false,
                },
            );
            for accession in accessions.iter() {
                assembler.link(&mut graph, &handle, accession);
            }
            assembler.link_indexed(&mut graph, &handle, &hits);
            if let Some(psm) = graph.psms.get_mut(&handle.psm) {
                for ratio in ratios.iter() {
                    psm.add_ratio(ratio.clone());
                }
                for amount in amounts.iter() {
                    psm.add_amount(amount.clone());
                }
                for score in scores.iter() {
                    psm.set_score(score.clone());
                }
            }
        }
        Ok(())
    }
}

/// Find the first `.mztab` file in `path`, in name order
pub fn find_mztab(path: &Path) -> io::Result<Option<PathBuf>> {
    let mut candidates: Vec<PathBuf> = fs::read_dir(path)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.extension()
                .is_some_and(|ext| ext.to_string_lossy().eq_ignore_ascii_case("mztab"))
        })
        .collect();
    candidates.sort();
    Ok(candidates.into_iter().next())
}

impl FormatParser for MaxQuantParser {
    fn parse<R: BufRead>(
        &mut self,
        stream: R,
        ctx: &ParseContext,
    ) -> Result<ParseResult, QuantParserError> {
        let mut assembler = Assembler::new(ctx);
        let sides = ctx
            .effective_descriptors()
            .iter()
            .filter(|d| !d.is_isobaric())
            .map(|d| {
                assembler.descriptor_sides(d).map(|(num, den)| {
                    (
                        d.numerator.abbreviation(),
                        d.denominator.abbreviation(),
                        num,
                        den,
                    )
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.header = None;
        self.line_number = 0;

        for line in stream.lines() {
            let line = line?;
            self.line_number += 1;
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            if self.header.is_none() {
                let headers: Vec<&str> = line.split('\t').collect();
                self.header = Some(ColumnMapper::new(&headers));
                continue;
            }
            match self.decode(line, ctx) {
                LineOutcome::Accepted(row) => {
                    if row.spectra.is_empty() {
                        debug!("Evidence at line {} has no MS/MS spectra", self.line_number);
                        continue;
                    }
                    match self.handle_row(row, &sides, ctx, &mut assembler) {
                        Ok(()) => assembler.accept(),
                        Err(e) => assembler.skip_or_fail(e)?,
                    }
                }
                LineOutcome::DecoyRejected => assembler.reject_decoy(),
                LineOutcome::Malformed(e) => {
                    assembler.skip_or_fail(QuantParserError::malformed(self.line_number, e))?
                }
            }
        }
        if self.header.is_none() {
            warn!("{} has no header row", ctx.source_name);
        }
        Ok(assembler.finish())
    }
}
