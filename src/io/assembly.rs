//! Wiring shared by every format reader: obtain canonical entities from the store and
//! connect PSMs, peptides and proteins.
use std::cmp::Ordering;

use indexmap::IndexMap;
use log::{debug, warn};

use crate::entity::{HasRatios, HasScores, Peptide, Protein, Psm};
use crate::quant::{RatioDescriptor, RatioSide};
use crate::store::QuantGraph;

use super::traits::{IndexedProtein, ParseContext, ParseResult, QuantParserError};

pub const REGRESSION_FACTOR: &str = "REGRESSION_FACTOR";
pub const XCORR: &str = "XCorr";

/// The keys of a registered PSM and its peptide
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PsmHandle {
    pub psm: String,
    pub peptide: String,
    pub is_new: bool,
}

/// The observation a PSM is built from
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct PsmObservation<'a> {
    pub raw_file: &'a str,
    pub scan: &'a str,
    pub full_sequence: &'a str,
    pub charge: Option<i32>,
    pub singleton: bool,
}

/// Registers entities on behalf of one reader, remembering which keys it touched
pub(crate) struct Assembler<'a> {
    ctx: &'a ParseContext,
    result: ParseResult,
}

impl<'a> Assembler<'a> {
    pub fn new(ctx: &'a ParseContext) -> Self {
        Self {
            ctx,
            result: ParseResult::default(),
        }
    }

    pub fn ctx(&self) -> &ParseContext {
        self.ctx
    }

    pub fn result(&self) -> &ParseResult {
        &self.result
    }

    pub fn result_mut(&mut self) -> &mut ParseResult {
        &mut self.result
    }

    pub fn accept(&mut self) {
        self.result.records += 1;
    }

    pub fn reject_decoy(&mut self) {
        self.result.decoys_rejected += 1;
    }

    /// Count a malformed record if the context allows skipping it, otherwise return it
    /// as the error to stop on.
    pub fn skip_or_fail(&mut self, error: QuantParserError) -> Result<(), QuantParserError> {
        if self.ctx.skip_malformed_records && error.is_record_level() {
            warn!("Skipping malformed record in {}: {error}", self.ctx.source_name);
            self.result.malformed_skipped += 1;
            Ok(())
        } else {
            Err(error)
        }
    }

    pub fn finish(self) -> ParseResult {
        self.result
    }

    /// Get or register the protein, filling in the description if it was unknown
    pub fn protein(
        &mut self,
        graph: &mut QuantGraph,
        accession: &str,
        description: Option<&str>,
    ) -> String {
        let mut protein = Protein::new(accession);
        if let Some(description) = description {
            protein.set_description(description);
        }
        let registration = graph.get_or_register(protein);
        let key = registration.into_key();
        if let (Some(description), Some(existing)) = (description, graph.proteins.get_mut(&key)) {
            if existing.description.is_empty() && !description.is_empty() {
                existing.set_description(description);
            }
        }
        self.result.proteins.insert(key.clone());
        key
    }

    /// Get or register the PSM and its peptide and link the two
    pub fn psm(&mut self, graph: &mut QuantGraph, observation: PsmObservation<'_>) -> PsmHandle {
        let policy = &self.ctx.key_policy;
        let raw_file = if observation.raw_file.trim().is_empty() {
            self.ctx.source_name.as_str()
        } else {
            observation.raw_file
        };
        let psm = Psm::new(
            policy,
            raw_file,
            observation.scan,
            observation.full_sequence,
            observation.charge,
        )
        .singleton(observation.singleton);
        let registration = graph.get_or_register(psm);
        let is_new = registration.is_new();
        let psm_key = registration.into_key();
        let peptide_key = graph
            .get_or_register(Peptide::new(
                policy,
                observation.full_sequence,
                observation.charge,
            ))
            .into_key();
        graph.link_psm_to_peptide(&psm_key, &peptide_key);
        self.result.psms.insert(psm_key.clone());
        self.result.peptides.insert(peptide_key.clone());
        PsmHandle {
            psm: psm_key,
            peptide: peptide_key,
            is_new,
        }
    }

    /// Link a PSM and its peptide to a registered protein, in both directions
    pub fn link(&mut self, graph: &mut QuantGraph, handle: &PsmHandle, accession: &str) {
        graph.link_psm_to_protein(&handle.psm, accession, true);
        graph.link_peptide_to_protein(&handle.peptide, accession, true);
    }

    /**
    Look the clean sequence up in the context's sequence index.

    A sequence the index does not know is an error unless missing peptides are being
    ignored, in which case it is recorded in the store's missing peptide set. This takes
    the store lock itself, so it must not be called while a write guard is held.
    */
    pub fn index_lookup(&self, sequence: &str) -> Result<Vec<IndexedProtein>, QuantParserError> {
        let index = match self.ctx.sequence_index.as_ref() {
            Some(index) => index,
            None => return Ok(Vec::new()),
        };
        let hits = index.proteins_for_sequence(sequence);
        if hits.is_empty() {
            if self.ctx.ignore_missing_peptides {
                debug!("Peptide {sequence} is missing from the sequence index");
                self.ctx.store.add_missing_peptide(sequence);
            } else {
                return Err(QuantParserError::PeptideNotFoundInIndex(sequence.to_string()));
            }
        }
        Ok(hits)
    }

    /// Register the proteins found by [`Assembler::index_lookup`] and link them
    pub fn link_indexed(
        &mut self,
        graph: &mut QuantGraph,
        handle: &PsmHandle,
        hits: &[IndexedProtein],
    ) -> usize {
        let mut linked = 0;
        for hit in hits {
            if self.ctx.is_decoy(&hit.accession) {
                continue;
            }
            let accession = self.protein(graph, &hit.accession, Some(&hit.description));
            if let (Some(taxonomy), Some(protein)) =
                (hit.taxonomy.as_ref(), graph.proteins.get_mut(&accession))
            {
                protein.taxonomies.insert(taxonomy.clone());
            }
            self.link(graph, handle, &accession);
            linked += 1;
        }
        linked
    }

    /// Resolve the conditions the descriptor's labels stand for in this input
    pub fn descriptor_sides(
        &self,
        descriptor: &RatioDescriptor,
    ) -> Result<(RatioSide, RatioSide), QuantParserError> {
        descriptor.resolve(&self.ctx.labels).map_err(|label| {
            QuantParserError::ConfigurationError(format!(
                "Label {label} of ratio {descriptor} is not mapped to a condition"
            ))
        })
    }
}

/// Split a protein list column such as `P1;P2` or `P1, P2`
pub(crate) fn split_accessions(value: &str) -> Vec<&str> {
    value
        .split([';', ','])
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect()
}

/// The raw file name without the `H_`/`M_`/`L_` label prefix some tools add
pub(crate) fn unlabeled_raw_file(raw_file: &str) -> &str {
    ["H_", "M_", "L_"]
        .iter()
        .find_map(|p| raw_file.strip_prefix(p))
        .unwrap_or(raw_file)
}

fn best_score(psm: &Psm, name: &str) -> Option<f64> {
    psm.score_value(name)
        .into_iter()
        .chain(
            psm.ratios()
                .iter()
                .filter_map(|r| r.score().filter(|s| s.name == name).map(|s| s.value)),
        )
        .filter(|v| !v.is_nan())
        .max_by(|a, b| a.total_cmp(b))
}

fn compare_confidence(a: &Psm, b: &Psm) -> Ordering {
    let by = |name: &str| best_score(a, name).partial_cmp(&best_score(b, name));
    match by(REGRESSION_FACTOR) {
        Some(Ordering::Equal) | None => {}
        Some(ord) => return ord,
    }
    match by(XCORR) {
        Some(Ordering::Equal) | None => {}
        Some(ord) => return ord,
    }
    b.key.cmp(&a.key)
}

/**
Keep only the most confident PSM among those measuring the same chromatographic peak,
that is sharing clean sequence, unlabeled raw file and charge.

Confidence is the largest regression factor, then the largest XCorr, and otherwise the
smallest key. Every other PSM of the group is removed from the graph and from `result`,
along with any peptide left without a PSM. Returns the number of PSMs removed.
*/
pub(crate) fn keep_one_spectrum_per_peak(
    graph: &mut QuantGraph,
    result: &mut ParseResult,
) -> usize {
    let mut groups: IndexMap<(String, String, Option<i32>), Vec<String>> = IndexMap::new();
    for key in result.psms.iter() {
        if let Some(psm) = graph.psms.get(key) {
            let raw = unlabeled_raw_file(psm.raw_file().unwrap_or_default()).to_string();
            groups
                .entry((psm.sequence.clone(), raw, psm.charge))
                .or_default()
                .push(key.clone());
        }
    }

    let mut removed = 0;
    for (_, members) in groups.into_iter().filter(|(_, m)| m.len() > 1) {
        let best = members
            .iter()
            .filter_map(|k| graph.psms.get(k))
            .max_by(|a, b| compare_confidence(a, b))
            .map(|p| p.key.clone());
        let best = match best {
            Some(best) => best,
            None => continue,
        };
        for key in members.iter().filter(|k| **k != best) {
            debug!("Discarding {key}, another spectrum of the same peak was kept: {best}");
            let peptide = graph.remove::<Psm>(key).and_then(|psm| psm.peptide);
            result.forget_psm(key);
            removed += 1;
            if let Some(peptide) = peptide {
                if graph.peptides.get(&peptide).is_some_and(|p| p.psms.is_empty()) {
                    debug!("Discarding peptide {peptide}, none of its spectra were kept");
                    graph.remove::<Peptide>(&peptide);
                    result.forget_peptide(&peptide);
                }
            }
        }
    }
    removed
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::quant::Score;
    use crate::store::IdentityStore;

    #[test]
    fn test_split_and_prefix() {
        assert_eq!(split_accessions("P1; P2,P3;"), vec!["P1", "P2", "P3"]);
        assert_eq!(unlabeled_raw_file("H_run1"), "run1");
        assert_eq!(unlabeled_raw_file("run1"), "run1");
    }

    #[test]
    fn test_assemble() {
        let ctx = ParseContext::new(IdentityStore::new()).with_source_name("input.txt");
        let mut assembler = Assembler::new(&ctx);
        let mut graph = ctx.store.write();
        let acc = assembler.protein(&mut graph, "P1", None);
        let handle = assembler.psm(
            &mut graph,
            PsmObservation {
                scan: "5",
                full_sequence: "K.PEPTIDEK.R",
                charge: Some(2),
                ..Default::default()
            },
        );
        assembler.link(&mut graph, &handle, &acc);
        assert!(handle.is_new);
        assert_eq!(handle.psm, "input.txt-5-PEPTIDEK-2");
        let protein = graph.proteins.get("P1").unwrap();
        assert!(protein.peptides.contains("PEPTIDEK"));
        assert!(protein.psms.contains(&handle.psm));
        drop(graph);
        let result = assembler.finish();
        assert_eq!(result.proteins.len(), 1);
        assert_eq!(result.psms.len(), 1);
    }

    #[test]
    fn test_missing_peptides() {
        let index: IndexMap<String, Vec<IndexedProtein>> = IndexMap::new();
        let mut ctx = ParseContext::new(IdentityStore::new())
            .with_sequence_index(std::sync::Arc::new(index));
        {
            let assembler = Assembler::new(&ctx);
            assert!(matches!(
                assembler.index_lookup("PEPTIDEK"),
                Err(QuantParserError::PeptideNotFoundInIndex(_))
            ));
        }
        ctx.ignore_missing_peptides = true;
        let assembler = Assembler::new(&ctx);
        assert!(assembler.index_lookup("PEPTIDEK").unwrap().is_empty());
        assert!(ctx.store.missing_peptides().contains("PEPTIDEK"));
    }

    #[test]
    fn test_one_spectrum_per_peak() {
        let ctx = ParseContext::new(IdentityStore::new());
        let mut assembler = Assembler::new(&ctx);
        let mut graph = ctx.store.write();
        let mut keys = Vec::new();
        let observations = [("H_run1", "10", 0.8), ("M_run1", "11", 0.95), ("run1", "12", 0.5)];
        for (raw, scan, factor) in observations {
            let handle = assembler.psm(
                &mut graph,
                PsmObservation {
                    raw_file: raw,
                    scan,
                    full_sequence: "PEPTIDEK",
                    charge: Some(2),
                    singleton: false,
                },
            );
            graph
                .psms
                .get_mut(&handle.psm)
                .unwrap()
                .set_score(Score::new(REGRESSION_FACTOR, factor));
            keys.push(handle.psm);
        }
        let mut result = assembler.finish();
        let removed = keep_one_spectrum_per_peak(&mut graph, &mut result);
        assert_eq!(removed, 2);
        assert_eq!(result.psms.len(), 1);
        assert!(result.psms.contains(&keys[1]));
        assert_eq!(graph.psms.len(), 1);
        assert_eq!(graph.peptides.get("PEPTIDEK").unwrap().psms.len(), 1);
    }

    fn observe(
        assembler: &mut Assembler<'_>,
        graph: &mut QuantGraph,
        raw_file: &str,
        scan: &str,
        full_sequence: &str,
        scores: &[(&str, f64)],
    ) -> String {
        let handle = assembler.psm(
            graph,
            PsmObservation {
                raw_file,
                scan,
                full_sequence,
                charge: Some(2),
                singleton: false,
            },
        );
        let psm = graph.psms.get_mut(&handle.psm).unwrap();
        for (name, value) in scores {
            psm.set_score(Score::new(*name, *value));
        }
        handle.psm
    }

    #[test]
    fn test_peak_confidence_fallbacks() {
        let ctx = ParseContext::new(IdentityStore::new());
        let mut assembler = Assembler::new(&ctx);
        let mut graph = ctx.store.write();
        let g: &mut QuantGraph = &mut graph;
        let a = &mut assembler;

        // Equal regression factors, XCorr decides
        observe(a, g, "runA", "1", "PEPTIDEK", &[(REGRESSION_FACTOR, 0.9), (XCORR, 2.0)]);
        let equal_factor = observe(
            a,
            g,
            "H_runA",
            "2",
            "PEPTIDEK",
            &[(REGRESSION_FACTOR, 0.9), (XCORR, 3.5)],
        );
        // No regression factor at all, XCorr decides
        let no_factor = observe(a, g, "runB", "3", "PEPTIDEK", &[(XCORR, 4.1)]);
        observe(a, g, "L_runB", "4", "PEPTIDEK", &[(XCORR, 1.2)]);
        // Nothing to compare, the smallest key is kept
        observe(a, g, "runC", "21", "PEPTIDEK", &[]);
        let smallest = observe(a, g, "runC", "20", "PEPTIDEK", &[]);

        let mut result = assembler.finish();
        let removed = keep_one_spectrum_per_peak(&mut graph, &mut result);
        assert_eq!(removed, 3);
        assert_eq!(result.psms.len(), 3);
        for key in [&equal_factor, &no_factor, &smallest] {
            assert!(result.psms.contains(key), "{key} should have been kept");
            assert!(graph.psms.contains(key));
        }
        assert_eq!(graph.peptides.get("PEPTIDEK").unwrap().psms.len(), 3);
    }

    #[test]
    fn test_peak_refinement_drops_emptied_peptides() {
        let mut ctx = ParseContext::new(IdentityStore::new());
        ctx.key_policy.distinguish_modified_peptides = true;
        let mut assembler = Assembler::new(&ctx);
        let mut graph = ctx.store.write();
        let acc = assembler.protein(&mut graph, "P1", None);
        let modified = observe(
            &mut assembler,
            &mut graph,
            "run1",
            "10",
            "PEPM(15.99)TIDEK",
            &[(REGRESSION_FACTOR, 0.8)],
        );
        let plain = observe(
            &mut assembler,
            &mut graph,
            "run1",
            "11",
            "PEPMTIDEK",
            &[(REGRESSION_FACTOR, 0.95)],
        );
        for key in [&modified, &plain] {
            let handle = PsmHandle {
                psm: key.clone(),
                peptide: graph.psms.get(key).unwrap().peptide.clone().unwrap(),
                is_new: true,
            };
            assembler.link(&mut graph, &handle, &acc);
        }
        assert_eq!(graph.peptides.len(), 2);

        let mut result = assembler.finish();
        assert_eq!(keep_one_spectrum_per_peak(&mut graph, &mut result), 1);
        assert!(graph.psms.contains(&plain));
        assert!(!graph.psms.contains(&modified));
        assert_eq!(graph.peptides.len(), 1);
        assert!(!graph.peptides.contains("PEPM(15.99)TIDEK"));
        assert!(!result.peptides.contains("PEPM(15.99)TIDEK"));
        assert!(result.peptides.contains("PEPMTIDEK"));
        let protein = graph.proteins.get("P1").unwrap();
        assert_eq!(protein.peptides.len(), 1);
        assert!(protein.peptides.contains("PEPMTIDEK"));
        assert_eq!(protein.psms.len(), 1);
    }
}
