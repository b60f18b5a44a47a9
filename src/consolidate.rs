//! Rewrite proteins found under secondary accessions to their primary accession once an
//! authoritative accession mapping is available.
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use log::{debug, info};

use crate::io::{AccessionResolver, QuantParserError, ResolvedAccession};
use crate::store::IdentityStore;

/// The number of accessions sent to the resolver at once
pub const DEFAULT_BATCH_SIZE: usize = 500_000;

/// What a consolidation pass changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsolidationReport {
    /// Proteins re-keyed to a primary accession nobody held yet
    pub renamed: usize,
    /// Proteins folded into a protein already registered under their primary accession
    pub merged: usize,
    /// Accessions the resolver knew nothing about
    pub unresolved: usize,
}

impl ConsolidationReport {
    pub fn changes(&self) -> usize {
        self.renamed + self.merged
    }
}

/// Follow a chain of resolutions within one batch to its end, so that `A -> B -> C`
/// lands on `C` whatever order the batch is processed in
fn final_primary(start: &str, resolved: &IndexMap<String, ResolvedAccession>) -> String {
    let mut target = start.to_string();
    for _ in 0..resolved.len() {
        match resolved.get(&target) {
            Some(next) if next.primary != target && !next.primary.is_empty() => {
                target = next.primary.clone()
            }
            _ => break,
        }
    }
    target
}

/**
Renames or merges proteins so that each one is registered under the primary accession
an [`AccessionResolver`] gives for it.

Running it a second time with the same resolver changes nothing.
*/
#[derive(Clone)]
pub struct ProteinConsolidator {
    resolver: Arc<dyn AccessionResolver>,
    version: Option<String>,
    batch_size: usize,
}

impl std::fmt::Debug for ProteinConsolidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProteinConsolidator")
            .field("version", &self.version)
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

impl ProteinConsolidator {
    pub fn new(resolver: Arc<dyn AccessionResolver>) -> Self {
        Self {
            resolver,
            version: None,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// The version of the accession database to resolve against
    pub fn with_version<S: Into<String>>(mut self, version: Option<S>) -> Self {
        self.version = version.map(|v| v.into());
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /**
    Consolidate every protein in `proteins`, the accessions a parsing run produced.

    The resolver is consulted one batch at a time without holding the store lock, then
    the batch's renames and merges are applied under a single write lock. `proteins` is
    rewritten to hold the accessions the proteins ended up under.
    */
    pub fn consolidate(
        &self,
        store: &IdentityStore,
        proteins: &mut IndexSet<String>,
    ) -> Result<ConsolidationReport, QuantParserError> {
        let mut report = ConsolidationReport::default();
        let accessions: Vec<String> = proteins.iter().cloned().collect();
        let n_batches = accessions.len().div_ceil(self.batch_size);

        for (i, batch) in accessions.chunks(self.batch_size).enumerate() {
            let resolved = self.resolver.resolve(batch, self.version.as_deref())?;
            report.unresolved += batch.iter().filter(|a| !resolved.contains_key(*a)).count();

            let mut graph = store.write();
            for accession in batch {
                let Some(resolution) = resolved.get(accession) else {
                    continue;
                };
                let primary = final_primary(accession, &resolved);
                let current = if primary != *accession && graph.proteins.contains(accession) {
                    if graph.proteins.contains(&primary) {
                        graph.merge_protein_into(accession, &primary);
                        report.merged += 1;
                    } else {
                        graph.rename_protein(accession, &primary);
                        report.renamed += 1;
                    }
                    proteins.shift_remove(accession);
                    proteins.insert(primary.clone());
                    primary
                } else {
                    accession.clone()
                };
                if let Some(protein) = graph.proteins.get_mut(&current) {
                    for secondary in resolution.secondary.iter() {
                        if *secondary != protein.accession
                            && !protein.secondary_accessions.contains(secondary)
                        {
                            protein.secondary_accessions.push(secondary.clone());
                        }
                    }
                }
            }
            drop(graph);
            info!(
                "Consolidated accession batch {}/{} ({} accessions)",
                i + 1,
                n_batches,
                batch.len()
            );
        }
        debug!(
            "Consolidation renamed {} and merged {} proteins, {} accessions were unresolved",
            report.renamed, report.merged, report.unresolved
        );
        Ok(report)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::entity::{HasRatios, Peptide, Protein, Psm};
    use crate::quant::{AggregationLevel, QuantRatio, RatioSide};
    use crate::store::QuantGraph;

    fn resolution(primary: &str, secondary: &[&str]) -> ResolvedAccession {
        ResolvedAccession {
            primary: primary.to_string(),
            secondary: secondary.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn populate(graph: &mut QuantGraph) {
        let policy = Default::default();
        for (acc, scan) in [("OLD1", "1"), ("P1", "2"), ("OLD2", "3"), ("P3", "4")] {
            graph.get_or_register(Protein::new(acc));
            let psm = Psm::new(&policy, "run", scan, "PEPTIDEK", Some(2));
            let psm_key = graph.get_or_register(psm).into_key();
            let peptide = graph
                .get_or_register(Peptide::new(&policy, "PEPTIDEK", Some(2)))
                .into_key();
            graph.link_psm_to_peptide(&psm_key, &peptide);
            graph.link_psm_to_protein(&psm_key, acc, true);
            graph.link_peptide_to_protein(&peptide, acc, true);
        }
        let ratio = QuantRatio::new(
            Some(2.0),
            false,
            RatioSide::condition("a".into()),
            RatioSide::condition("b".into()),
            "AVERAGE_RATIO",
            AggregationLevel::Protein,
        )
        .unwrap();
        graph.proteins.get_mut("OLD1").unwrap().add_ratio(ratio);
    }

    fn resolver() -> Arc<dyn AccessionResolver> {
        let map: IndexMap<String, ResolvedAccession> = [
            ("OLD1".to_string(), resolution("P1", &["OLD1"])),
            ("OLD2".to_string(), resolution("P2", &["OLD2", "ALT2"])),
            ("P1".to_string(), resolution("P1", &[])),
        ]
        .into_iter()
        .collect();
        Arc::new(map)
    }

    #[test_log::test]
    fn test_consolidate() {
        let store = IdentityStore::new();
        populate(&mut store.write());
        let mut proteins: IndexSet<String> = store.read().proteins.keys().cloned().collect();

        let consolidator = ProteinConsolidator::new(resolver()).with_batch_size(2);
        let report = consolidator.consolidate(&store, &mut proteins).unwrap();
        assert_eq!(report.merged, 1);
        assert_eq!(report.renamed, 1);
        assert_eq!(report.unresolved, 1);

        let graph = store.read();
        assert_eq!(graph.proteins.len(), 3);
        assert!(!graph.proteins.contains("OLD1"));
        assert!(!graph.proteins.contains("OLD2"));
        let p1 = graph.proteins.get("P1").unwrap();
        assert_eq!(p1.psms.len(), 2);
        assert!(p1.secondary_accessions.contains(&"OLD1".to_string()));
        assert_eq!(p1.ratios().len(), 1);
        let p2 = graph.proteins.get("P2").unwrap();
        assert_eq!(p2.secondary_accessions, vec!["OLD2".to_string(), "ALT2".to_string()]);
        assert!(graph
            .psms
            .get("run-3-PEPTIDEK-2")
            .unwrap()
            .proteins
            .contains("P2"));
        assert!(graph.peptides.get("PEPTIDEK").unwrap().proteins.contains("P1"));
        assert!(!graph.peptides.get("PEPTIDEK").unwrap().proteins.contains("OLD1"));
        drop(graph);

        let expected: IndexSet<String> =
            ["P1", "P2", "P3"].into_iter().map(String::from).collect();
        assert_eq!(proteins.len(), 3);
        assert!(proteins.iter().all(|p| expected.contains(p)));
    }

    #[test]
    fn test_idempotent() {
        let store = IdentityStore::new();
        populate(&mut store.write());
        let mut proteins: IndexSet<String> = store.read().proteins.keys().cloned().collect();
        let consolidator = ProteinConsolidator::new(resolver());
        consolidator.consolidate(&store, &mut proteins).unwrap();
        let snapshot = store.read().clone();

        let report = consolidator.consolidate(&store, &mut proteins).unwrap();
        assert_eq!(report.changes(), 0);
        assert_eq!(*store.read(), snapshot);
    }

    #[test]
    fn test_chained_resolution() {
        let map: IndexMap<String, ResolvedAccession> = [
            ("B".to_string(), resolution("C", &[])),
            ("A".to_string(), resolution("B", &[])),
        ]
        .into_iter()
        .collect();
        let store = IdentityStore::new();
        {
            let mut graph = store.write();
            graph.get_or_register(Protein::new("A"));
            graph.get_or_register(Protein::new("B"));
        }
        let mut proteins: IndexSet<String> = ["B", "A"].into_iter().map(String::from).collect();
        ProteinConsolidator::new(Arc::new(map))
            .consolidate(&store, &mut proteins)
            .unwrap();
        let graph = store.read();
        assert_eq!(graph.proteins.len(), 1);
        let c = graph.proteins.get("C").unwrap();
        assert!(c.secondary_accessions.contains(&"A".to_string()));
        assert!(c.secondary_accessions.contains(&"B".to_string()));
    }
}
