//! Orchestrates parsing a set of input files into one shared [`IdentityStore`], then
//! pruning decoys and consolidating protein accessions.
use std::path::PathBuf;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use log::{debug, error, info, warn};
use regex::Regex;

use crate::consolidate::ProteinConsolidator;
use crate::entity::{KeyPolicy, Peptide, Protein, Psm};
use crate::io::compression::{is_gzipped_extension, open_maybe_gzipped};
use crate::io::maxquant::EVIDENCE_FILE;
use crate::io::{
    infer_format, AccessionResolver, CensusOutParser, ChroParser, DelimitedParser,
    FormatParser, MaxQuantParser, ParseContext, ParseResult, QuantFormat, QuantParserError,
    ReplicateParser, SequenceIndex,
};
use crate::quant::{LabelMap, RatioDescriptor};
use crate::store::IdentityStore;

/// One input of a parsing run and how to read it
#[derive(Debug, Clone, Default)]
pub struct InputFile {
    pub path: PathBuf,
    /// The format, inferred from the path and content when not given
    pub format: Option<QuantFormat>,
    pub labels: LabelMap,
    pub descriptors: Vec<RatioDescriptor>,
    /// The separator of the generic delimited format
    pub separator: Option<char>,
}

impl InputFile {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn format(mut self, format: QuantFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn labels(mut self, labels: LabelMap) -> Self {
        self.labels = labels;
        self
    }

    pub fn descriptors(mut self, descriptors: Vec<RatioDescriptor>) -> Self {
        self.descriptors = descriptors;
        self
    }

    pub fn separator(mut self, separator: char) -> Self {
        self.separator = Some(separator);
        self
    }

    /// A name for the input, the file name without its format and compression extensions
    pub fn source_name(&self) -> String {
        let (_, path) = is_gzipped_extension(&self.path);
        path.file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

/**
A read-only snapshot of the entities a parsing run produced, keyed by their canonical
keys, along with the relationships between them.
*/
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ParsedGraph {
    pub proteins: IndexMap<String, Protein>,
    pub peptides: IndexMap<String, Peptide>,
    pub psms: IndexMap<String, Psm>,
    pub taxonomies: IndexSet<String>,
    pub protein_peptides: IndexMap<String, IndexSet<String>>,
    pub peptide_psms: IndexMap<String, IndexSet<String>>,
    pub missing_peptides: IndexSet<String>,
}

impl ParsedGraph {
    /// Copy the entities named by `result` out of the store
    pub fn snapshot(store: &IdentityStore, result: &ParseResult) -> Self {
        let graph = store.read();
        let proteins: IndexMap<String, Protein> = result
            .proteins
            .iter()
            .filter_map(|k| graph.proteins.get(k).map(|p| (k.clone(), p.clone())))
            .collect();
        let peptides: IndexMap<String, Peptide> = result
            .peptides
            .iter()
            .filter_map(|k| graph.peptides.get(k).map(|p| (k.clone(), p.clone())))
            .collect();
        let psms: IndexMap<String, Psm> = result
            .psms
            .iter()
            .filter_map(|k| graph.psms.get(k).map(|p| (k.clone(), p.clone())))
            .collect();
        let taxonomies = proteins
            .values()
            .flat_map(|p| p.taxonomies.iter().cloned())
            .collect();
        let protein_peptides = proteins
            .iter()
            .map(|(k, p)| (k.clone(), p.peptides.clone()))
            .collect();
        let peptide_psms = peptides
            .iter()
            .map(|(k, p)| (k.clone(), p.psms.clone()))
            .collect();
        Self {
            proteins,
            peptides,
            psms,
            taxonomies,
            protein_peptides,
            peptide_psms,
            missing_peptides: graph.missing_peptides.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.psms.is_empty()
    }

    #[cfg(feature = "serde")]
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    #[cfg(feature = "serde")]
    pub fn write_json<W: std::io::Write>(&self, writer: W) -> serde_json::Result<()> {
        serde_json::to_writer_pretty(writer, self)
    }
}

/// Configures a [`QuantParser`]
#[derive(Clone, Default)]
pub struct QuantParserBuilder {
    inputs: Vec<InputFile>,
    store: Option<IdentityStore>,
    clear_store_on_start: bool,
    decoy_pattern: Option<Regex>,
    key_policy: KeyPolicy,
    ignore_missing_peptides: bool,
    skip_malformed_records: bool,
    one_spectrum_per_peak: bool,
    sequence_index: Option<Arc<dyn SequenceIndex>>,
    resolver: Option<Arc<dyn AccessionResolver>>,
    resolver_version: Option<String>,
}

impl QuantParserBuilder {
    pub fn input(mut self, input: InputFile) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn inputs<I: IntoIterator<Item = InputFile>>(mut self, inputs: I) -> Self {
        self.inputs.extend(inputs);
        self
    }

    /// Parse into this store rather than the process-wide one
    pub fn store(mut self, store: IdentityStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Empty the store before the run starts instead of accumulating into it
    pub fn clear_store_on_start(mut self, clear: bool) -> Self {
        self.clear_store_on_start = clear;
        self
    }

    pub fn decoy_pattern(mut self, pattern: Regex) -> Self {
        self.decoy_pattern = Some(pattern);
        self
    }

    pub fn key_policy(mut self, key_policy: KeyPolicy) -> Self {
        self.key_policy = key_policy;
        self
    }

    pub fn ignore_missing_peptides(mut self, ignore: bool) -> Self {
        self.ignore_missing_peptides = ignore;
        self
    }

    pub fn skip_malformed_records(mut self, skip: bool) -> Self {
        self.skip_malformed_records = skip;
        self
    }

    pub fn one_spectrum_per_chromatographic_peak(mut self, one: bool) -> Self {
        self.one_spectrum_per_peak = one;
        self
    }

    pub fn sequence_index(mut self, index: Arc<dyn SequenceIndex>) -> Self {
        self.sequence_index = Some(index);
        self
    }

    pub fn accession_resolver(mut self, resolver: Arc<dyn AccessionResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn resolver_version<S: Into<String>>(mut self, version: S) -> Self {
        self.resolver_version = Some(version.into());
        self
    }

    pub fn build(self) -> QuantParser {
        QuantParser {
            store: self.store.unwrap_or_else(IdentityStore::global),
            inputs: self.inputs,
            clear_store_on_start: self.clear_store_on_start,
            decoy_pattern: self.decoy_pattern,
            key_policy: self.key_policy,
            ignore_missing_peptides: self.ignore_missing_peptides,
            skip_malformed_records: self.skip_malformed_records,
            one_spectrum_per_peak: self.one_spectrum_per_peak,
            sequence_index: self.sequence_index,
            resolver: self.resolver,
            resolver_version: self.resolver_version,
            result: None,
            graph: None,
        }
    }
}

/**
Reads a set of inputs into an [`IdentityStore`] and exposes what they produced.

Parsing is explicit: [`QuantParser::process`] must have completed before any of the
accessors return data, and they fail with [`QuantParserError::NotProcessed`] otherwise.
*/
pub struct QuantParser {
    store: IdentityStore,
    inputs: Vec<InputFile>,
    clear_store_on_start: bool,
    decoy_pattern: Option<Regex>,
    key_policy: KeyPolicy,
    ignore_missing_peptides: bool,
    skip_malformed_records: bool,
    one_spectrum_per_peak: bool,
    sequence_index: Option<Arc<dyn SequenceIndex>>,
    resolver: Option<Arc<dyn AccessionResolver>>,
    resolver_version: Option<String>,
    result: Option<ParseResult>,
    graph: Option<ParsedGraph>,
}

impl std::fmt::Debug for QuantParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuantParser")
            .field("inputs", &self.inputs)
            .field("clear_store_on_start", &self.clear_store_on_start)
            .field("decoy_pattern", &self.decoy_pattern)
            .field("key_policy", &self.key_policy)
            .field("processed", &self.is_processed())
            .finish()
    }
}

impl QuantParser {
    pub fn builder() -> QuantParserBuilder {
        QuantParserBuilder::default()
    }

    pub fn store(&self) -> &IdentityStore {
        &self.store
    }

    pub fn inputs(&self) -> &[InputFile] {
        &self.inputs
    }

    pub fn is_processed(&self) -> bool {
        self.graph.is_some()
    }

    fn context_for(&self, input: &InputFile) -> ParseContext {
        ParseContext {
            store: self.store.clone(),
            labels: input.labels.clone(),
            descriptors: input.descriptors.clone(),
            key_policy: self.key_policy,
            decoy_pattern: self.decoy_pattern.clone(),
            sequence_index: self.sequence_index.clone(),
            ignore_missing_peptides: self.ignore_missing_peptides,
            skip_malformed_records: self.skip_malformed_records,
            one_spectrum_per_peak: self.one_spectrum_per_peak,
            source_name: input.source_name(),
        }
    }

    fn parse_input(&self, input: &InputFile) -> Result<ParseResult, QuantParserError> {
        let format = match input.format {
            Some(format) => format,
            None => infer_format(&input.path)?.0,
        };
        let ctx = self.context_for(input);
        debug!("Reading {} as {format}", input.path.display());
        match format {
            QuantFormat::MaxQuant => {
                let mut parser = MaxQuantParser::from_directory(&input.path)?;
                let (stream, _) = open_maybe_gzipped(input.path.join(EVIDENCE_FILE))?;
                parser.parse(stream, &ctx)
            }
            QuantFormat::CensusChro => {
                let (stream, _) = open_maybe_gzipped(&input.path)?;
                ChroParser::new().parse(stream, &ctx)
            }
            QuantFormat::CensusOut => {
                let (stream, _) = open_maybe_gzipped(&input.path)?;
                CensusOutParser::new().parse(stream, &ctx)
            }
            QuantFormat::Replicates => {
                let (stream, _) = open_maybe_gzipped(&input.path)?;
                ReplicateParser::new().parse(stream, &ctx)
            }
            QuantFormat::Delimited => {
                let (stream, _) = open_maybe_gzipped(&input.path)?;
                DelimitedParser::new(input.separator.unwrap_or('\t')).parse(stream, &ctx)
            }
        }
    }

    /// Remove decoy proteins this run produced, then the PSMs left without a protein
    /// and the peptides left without a PSM
    fn prune_decoys(&self, result: &mut ParseResult) {
        let pattern = match self.decoy_pattern.as_ref() {
            Some(pattern) => pattern,
            None => return,
        };
        let mut graph = self.store.write();
        let decoys: Vec<String> = result
            .proteins
            .iter()
            .filter(|acc| pattern.is_match(acc))
            .cloned()
            .collect();
        for accession in decoys.iter() {
            graph.remove::<Protein>(accession);
            result.proteins.shift_remove(accession);
        }
        let orphan_psms: Vec<String> = result
            .psms
            .iter()
            .filter(|k| graph.psms.get(k).is_some_and(|p| p.proteins.is_empty()))
            .cloned()
            .collect();
        for key in orphan_psms.iter() {
            graph.remove::<Psm>(key);
            result.forget_psm(key);
        }
        let orphan_peptides: Vec<String> = result
            .peptides
            .iter()
            .filter(|k| graph.peptides.get(k).map_or(true, |p| p.psms.is_empty()))
            .cloned()
            .collect();
        for key in orphan_peptides.iter() {
            graph.remove::<Peptide>(key);
            result.peptides.shift_remove(key);
        }
        if !decoys.is_empty() || !orphan_psms.is_empty() {
            info!(
                "Pruned {} decoy proteins, {} PSMs and {} peptides",
                decoys.len(),
                orphan_psms.len(),
                orphan_peptides.len()
            );
        }
    }

    /**
    Parse every input into the store, prune decoys and consolidate accessions.

    An input that cannot be opened or read is logged and skipped, any other error
    aborts the run. If no input yielded an accepted record the run fails with
    [`QuantParserError::NoValidInput`]. Calling this again re-runs the whole parse.
    */
    pub fn process(&mut self) -> Result<&ParsedGraph, QuantParserError> {
        self.graph = None;
        self.result = None;
        if self.clear_store_on_start {
            self.store.clear();
        }

        let mut total = ParseResult::default();
        let mut failed = 0;
        for input in self.inputs.iter() {
            match self.parse_input(input) {
                Ok(result) => {
                    info!(
                        "Read {} records from {} ({} decoys rejected, {} malformed skipped)",
                        result.records,
                        input.path.display(),
                        result.decoys_rejected,
                        result.malformed_skipped
                    );
                    if result.records == 0 {
                        warn!("{} yielded no records", input.path.display());
                    }
                    total.merge(result);
                }
                Err(QuantParserError::IOError(e)) => {
                    error!("Failed to read {}: {e}", input.path.display());
                    failed += 1;
                }
                Err(e) => return Err(e),
            }
        }
        if total.records == 0 {
            return Err(QuantParserError::NoValidInput(self.inputs.len()));
        }
        if failed > 0 {
            warn!("{failed} of {} inputs could not be read", self.inputs.len());
        }

        self.prune_decoys(&mut total);
        if let Some(resolver) = self.resolver.as_ref() {
            let report = ProteinConsolidator::new(resolver.clone())
                .with_version(self.resolver_version.as_deref())
                .consolidate(&self.store, &mut total.proteins)?;
            info!(
                "Consolidation renamed {} and merged {} proteins",
                report.renamed, report.merged
            );
        }

        let graph = ParsedGraph::snapshot(&self.store, &total);
        self.result = Some(total);
        Ok(self.graph.insert(graph))
    }

    pub fn graph(&self) -> Result<&ParsedGraph, QuantParserError> {
        self.graph.as_ref().ok_or(QuantParserError::NotProcessed)
    }

    /// The counters of the last run
    pub fn result(&self) -> Result<&ParseResult, QuantParserError> {
        self.result.as_ref().ok_or(QuantParserError::NotProcessed)
    }

    pub fn proteins(&self) -> Result<&IndexMap<String, Protein>, QuantParserError> {
        self.graph().map(|g| &g.proteins)
    }

    pub fn peptides(&self) -> Result<&IndexMap<String, Peptide>, QuantParserError> {
        self.graph().map(|g| &g.peptides)
    }

    pub fn psms(&self) -> Result<&IndexMap<String, Psm>, QuantParserError> {
        self.graph().map(|g| &g.psms)
    }

    pub fn taxonomies(&self) -> Result<&IndexSet<String>, QuantParserError> {
        self.graph().map(|g| &g.taxonomies)
    }

    pub fn protein_peptides(
        &self,
    ) -> Result<&IndexMap<String, IndexSet<String>>, QuantParserError> {
        self.graph().map(|g| &g.protein_peptides)
    }

    pub fn peptide_psms(&self) -> Result<&IndexMap<String, IndexSet<String>>, QuantParserError> {
        self.graph().map(|g| &g.peptide_psms)
    }

    pub fn missing_peptides(&self) -> Result<&IndexSet<String>, QuantParserError> {
        self.graph().map(|g| &g.missing_peptides)
    }
}

#[cfg(test)]
mod test {
    use std::fs;
    use std::io;

    use indexmap::IndexMap;

    use super::*;
    use crate::io::ResolvedAccession;
    use crate::quant::{PlexSize, QuantCondition, QuantificationLabel};

    fn light_heavy() -> LabelMap {
        LabelMap::new()
            .with(QuantificationLabel::Light, "control")
            .with(QuantificationLabel::Heavy, "treated")
    }

    const SCENARIO_A: &str = "H\tCensus report\n\
        H\tPLINE\tLOCUS\tDESCRIPTION\n\
        H\tSLINE\tUNIQUE\tSEQUENCE\tRATIO\tFILE_NAME\tSCAN\tCS\n\
        P\tACC1\tFirst protein OS=Mus musculus\n\
        S\t*\tPEPTIDEK\t2.0\trun1\t100\t2\n";

    fn write_input(dir: &tempfile::TempDir, name: &str, content: &str) -> io::Result<PathBuf> {
        let path = dir.path().join(name);
        fs::write(&path, content)?;
        Ok(path)
    }

    #[test_log::test]
    fn scenario_a_single_block() -> Result<(), QuantParserError> {
        let dir = tempfile::tempdir()?;
        let path = write_input(&dir, "scenario_a.txt", SCENARIO_A)?;
        let mut parser = QuantParser::builder()
            .store(IdentityStore::new())
            .input(InputFile::new(path).labels(light_heavy()))
            .build();
        assert!(matches!(parser.proteins(), Err(QuantParserError::NotProcessed)));

        let graph = parser.process()?;
        assert_eq!(graph.proteins.len(), 1);
        assert_eq!(graph.peptides.len(), 1);
        assert_eq!(graph.psms.len(), 1);
        let psm = graph.psms.get("run1-100-PEPTIDEK-2").unwrap();
        assert_eq!(psm.peptide.as_deref(), Some("PEPTIDEK"));
        assert!(psm.proteins.contains("ACC1"));
        assert!(graph.taxonomies.contains("Mus musculus"));
        assert!(graph.protein_peptides["ACC1"].contains("PEPTIDEK"));
        assert!(graph.peptide_psms["PEPTIDEK"].contains("run1-100-PEPTIDEK-2"));
        assert!(parser.is_processed());
        assert_eq!(parser.result()?.records, 1);
        Ok(())
    }

    #[test]
    fn scenario_b_decoy_block() -> Result<(), QuantParserError> {
        let dir = tempfile::tempdir()?;
        let path = write_input(&dir, "scenario_b.txt", SCENARIO_A)?;
        let store = IdentityStore::new();
        let mut parser = QuantParser::builder()
            .store(store.clone())
            .decoy_pattern(Regex::new("^ACC1$").unwrap())
            .input(InputFile::new(path).format(QuantFormat::CensusOut).labels(light_heavy()))
            .build();
        let err = parser.process().unwrap_err();
        assert!(matches!(err, QuantParserError::NoValidInput(1)));
        assert_eq!(store.protein_count(), 0);
        assert_eq!(store.psm_count(), 0);
        assert!(!parser.is_processed());
        Ok(())
    }

    #[test]
    fn scenario_c_plex_mismatch() -> Result<(), QuantParserError> {
        let mut header = vec!["H", "SLINE", "UNIQUE", "SEQUENCE", "FILE_NAME", "SCAN", "CS"]
            .into_iter()
            .map(String::from)
            .collect::<Vec<_>>();
        for label in PlexSize::Ten.labels() {
            header.push(format!("m/z_{}", label.mass_tag().unwrap()));
        }
        let text = format!(
            "H\tPLINE\tLOCUS\n{}\nP\tACC1\nS\t\tPEPTIDEK\trun1\t1\t2\n",
            header.join("\t")
        );
        let dir = tempfile::tempdir()?;
        let path = write_input(&dir, "scenario_c.txt", &text)?;
        let labels: LabelMap = PlexSize::Six
            .labels()
            .enumerate()
            .map(|(i, label)| (label, QuantCondition::new(format!("sample{i}"))))
            .collect();
        let mut parser = QuantParser::builder()
            .store(IdentityStore::new())
            .input(InputFile::new(path).labels(labels))
            .build();
        let err = parser.process().unwrap_err();
        assert!(matches!(err, QuantParserError::ConfigurationError(_)));
        Ok(())
    }

    #[test_log::test]
    fn scenario_d_one_spectrum_per_peak() -> Result<(), QuantParserError> {
        let text = "H\tPLINE\tLOCUS\n\
            H\tSLINE\tUNIQUE\tSEQUENCE\tRATIO\tREGRESSION_FACTOR\tFILE_NAME\tSCAN\tCS\n\
            P\tACC1\n\
            S\t\tPEPTIDEK\t2.0\t0.7\tH_run1\t100\t2\n\
            S\t\tPEPTIDEK\t2.2\t0.95\tL_run1\t104\t2\n";
        let dir = tempfile::tempdir()?;
        let path = write_input(&dir, "scenario_d.txt", text)?;
        let mut parser = QuantParser::builder()
            .store(IdentityStore::new())
            .one_spectrum_per_chromatographic_peak(true)
            .input(InputFile::new(path).labels(light_heavy()))
            .build();
        let graph = parser.process()?;
        assert_eq!(graph.psms.len(), 1);
        assert!(graph.psms.contains_key("L_run1-104-PEPTIDEK-2"));
        assert_eq!(graph.peptide_psms["PEPTIDEK"].len(), 1);
        assert_eq!(graph.proteins["ACC1"].psms.len(), 1);
        Ok(())
    }

    #[test_log::test]
    fn unreadable_inputs_are_skipped() -> Result<(), QuantParserError> {
        let dir = tempfile::tempdir()?;
        let path = write_input(&dir, "good.txt", SCENARIO_A)?;
        let mut parser = QuantParser::builder()
            .store(IdentityStore::new())
            .input(InputFile::new(dir.path().join("missing.txt")).format(QuantFormat::CensusOut))
            .input(InputFile::new(path).labels(light_heavy()))
            .build();
        assert_eq!(parser.process()?.psms.len(), 1);

        let mut parser = QuantParser::builder()
            .store(IdentityStore::new())
            .input(InputFile::new(dir.path().join("missing.txt")).format(QuantFormat::CensusOut))
            .build();
        assert!(matches!(parser.process(), Err(QuantParserError::NoValidInput(1))));
        Ok(())
    }

    #[test]
    fn shared_store_and_consolidation() -> Result<(), QuantParserError> {
        let dir = tempfile::tempdir()?;
        let first = write_input(&dir, "first.txt", SCENARIO_A)?;
        let second = write_input(
            &dir,
            "second.tsv",
            "id\tsequence\tratio\tweight\taccession\n7\tPEPTIDEK\t1.5\t1.0\tOLD1\n",
        )?;
        let resolver: IndexMap<String, ResolvedAccession> = [(
            "OLD1".to_string(),
            ResolvedAccession {
                primary: "ACC1".to_string(),
                secondary: vec![],
            },
        )]
        .into_iter()
        .collect();

        let store = IdentityStore::new();
        let mut parser = QuantParser::builder()
            .store(store.clone())
            .clear_store_on_start(true)
            .accession_resolver(Arc::new(resolver))
            .input(InputFile::new(first).labels(light_heavy()))
            .input(InputFile::new(second).labels(light_heavy()))
            .build();
        let graph = parser.process()?;
        assert_eq!(graph.proteins.len(), 1);
        let protein = &graph.proteins["ACC1"];
        assert_eq!(protein.psms.len(), 2);
        assert_eq!(protein.secondary_accessions, vec!["OLD1".to_string()]);
        assert_eq!(graph.peptides["PEPTIDEK"].psms.len(), 2);
        assert!(store.contains::<Psm>("second-7-PEPTIDEK"));

        // A second run over the same store starts from scratch
        let graph = parser.process()?;
        assert_eq!(graph.psms.len(), 2);
        assert_eq!(store.psm_count(), 2);
        Ok(())
    }

    #[test]
    fn source_names() {
        assert_eq!(InputFile::new("data/run1_out.txt.gz").source_name(), "run1_out");
        assert_eq!(InputFile::new("data/run2.xml").source_name(), "run2");
    }
}
