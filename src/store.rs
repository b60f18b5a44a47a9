/*!
The canonical identity store shared by every parser of an analysis run.

Entities live in per-kind [`Registry`] arenas keyed by their canonical key, and refer to
each other by key. [`IdentityStore`] is a cheaply clonable handle to one [`QuantGraph`]
behind a single reader/writer lock: lookups take the shared lock, anything that mutates
takes the exclusive lock. A multi-step operation such as wiring a PSM to its peptide and
proteins should hold one [`IdentityStore::write`] guard for its whole duration.
*/
use std::sync::Arc;

use indexmap::{map::Iter, IndexMap, IndexSet};
use lazy_static::lazy_static;
use log::debug;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::entity::{HasKey, Peptide, Protein, Psm};

/// The outcome of [`Registry::get_or_register`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Registration {
    /// The entity was new and is now the canonical instance for its key
    Registered(String),
    /// An entity already held this key. The offered instance was discarded.
    Existing(String),
}

impl Registration {
    pub fn key(&self) -> &str {
        match self {
            Registration::Registered(k) | Registration::Existing(k) => k,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Registration::Registered(_))
    }

    pub fn into_key(self) -> String {
        match self {
            Registration::Registered(k) | Registration::Existing(k) => k,
        }
    }
}

/// An insertion-ordered arena of entities of one kind, keyed by [`HasKey::key`]
#[derive(Debug, Clone, PartialEq)]
pub struct Registry<T> {
    entries: IndexMap<String, T>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self {
            entries: IndexMap::new(),
        }
    }
}

impl<T: HasKey> Registry<T> {
    /// Insert `entity` unless its key is already taken, in which case the existing
    /// instance wins.
    pub fn get_or_register(&mut self, entity: T) -> Registration {
        let key = entity.key().to_string();
        if self.entries.contains_key(&key) {
            Registration::Existing(key)
        } else {
            self.entries.insert(key.clone(), entity);
            Registration::Registered(key)
        }
    }

    pub fn get(&self, key: &str) -> Option<&T> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut T> {
        self.entries.get_mut(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Remove an entry without touching the entities that refer to it
    pub(crate) fn take(&mut self, key: &str) -> Option<T> {
        self.entries.shift_remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.entries.values()
    }

    pub fn iter(&self) -> Iter<'_, String, T> {
        self.entries.iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear()
    }
}

/// An entity kind that lives in a [`QuantGraph`]
pub trait StoredEntity: HasKey + Clone + Sized {
    fn registry(graph: &QuantGraph) -> &Registry<Self>;

    fn registry_mut(graph: &mut QuantGraph) -> &mut Registry<Self>;

    /// Remove every edge other entities hold towards `entity`
    fn unlink(graph: &mut QuantGraph, entity: &Self);
}

impl StoredEntity for Protein {
    fn registry(graph: &QuantGraph) -> &Registry<Self> {
        &graph.proteins
    }

    fn registry_mut(graph: &mut QuantGraph) -> &mut Registry<Self> {
        &mut graph.proteins
    }

    fn unlink(graph: &mut QuantGraph, entity: &Self) {
        for key in entity.psms.iter() {
            if let Some(psm) = graph.psms.get_mut(key) {
                psm.proteins.shift_remove(&entity.accession);
            }
        }
        for key in entity.peptides.iter() {
            if let Some(peptide) = graph.peptides.get_mut(key) {
                peptide.proteins.shift_remove(&entity.accession);
            }
        }
    }
}

impl StoredEntity for Peptide {
    fn registry(graph: &QuantGraph) -> &Registry<Self> {
        &graph.peptides
    }

    fn registry_mut(graph: &mut QuantGraph) -> &mut Registry<Self> {
        &mut graph.peptides
    }

    fn unlink(graph: &mut QuantGraph, entity: &Self) {
        for key in entity.psms.iter() {
            if let Some(psm) = graph.psms.get_mut(key) {
                if psm.peptide.as_deref() == Some(entity.key.as_str()) {
                    psm.peptide = None;
                }
            }
        }
        for acc in entity.proteins.iter() {
            if let Some(protein) = graph.proteins.get_mut(acc) {
                protein.peptides.shift_remove(&entity.key);
            }
        }
    }
}

impl StoredEntity for Psm {
    fn registry(graph: &QuantGraph) -> &Registry<Self> {
        &graph.psms
    }

    fn registry_mut(graph: &mut QuantGraph) -> &mut Registry<Self> {
        &mut graph.psms
    }

    fn unlink(graph: &mut QuantGraph, entity: &Self) {
        if let Some(peptide) = entity
            .peptide
            .as_deref()
            .and_then(|k| graph.peptides.get_mut(k))
        {
            peptide.psms.shift_remove(&entity.key);
        }
        for acc in entity.proteins.iter() {
            if let Some(protein) = graph.proteins.get_mut(acc) {
                protein.psms.shift_remove(&entity.key);
            }
        }
    }
}

/// The entity graph guarded by an [`IdentityStore`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuantGraph {
    pub proteins: Registry<Protein>,
    pub peptides: Registry<Peptide>,
    pub psms: Registry<Psm>,
    /// Clean sequences that were looked up in a sequence index and not found
    pub missing_peptides: IndexSet<String>,
}

impl QuantGraph {
    pub fn get_or_register<T: StoredEntity>(&mut self, entity: T) -> Registration {
        T::registry_mut(self).get_or_register(entity)
    }

    pub fn get<T: StoredEntity>(&self, key: &str) -> Option<&T> {
        T::registry(self).get(key)
    }

    pub fn contains<T: StoredEntity>(&self, key: &str) -> bool {
        T::registry(self).contains(key)
    }

    /// Remove an entity and every edge pointing at it
    pub fn remove<T: StoredEntity>(&mut self, key: &str) -> Option<T> {
        let entity = T::registry_mut(self).take(key)?;
        T::unlink(self, &entity);
        Some(entity)
    }

    /// Make `peptide_key` the peptide of the PSM, detaching it from any previous one
    pub fn link_psm_to_peptide(&mut self, psm_key: &str, peptide_key: &str) -> bool {
        if !self.peptides.contains(peptide_key) {
            return false;
        }
        let (previous, raw_files) = match self.psms.get_mut(psm_key) {
            Some(psm) => (
                psm.peptide.replace(peptide_key.to_string()),
                psm.raw_files.clone(),
            ),
            None => return false,
        };
        if let Some(previous) = previous.filter(|p| p != peptide_key) {
            if let Some(old) = self.peptides.get_mut(&previous) {
                old.psms.shift_remove(psm_key);
            }
        }
        if let Some(peptide) = self.peptides.get_mut(peptide_key) {
            peptide.psms.insert(psm_key.to_string());
            peptide.raw_files.extend(raw_files);
        }
        true
    }

    /// Add the protein to the PSM, and the PSM to the protein when `symmetric`
    pub fn link_psm_to_protein(&mut self, psm_key: &str, accession: &str, symmetric: bool) -> bool {
        if !self.proteins.contains(accession) {
            return false;
        }
        match self.psms.get_mut(psm_key) {
            Some(psm) => {
                psm.proteins.insert(accession.to_string());
            }
            None => return false,
        }
        if symmetric {
            if let Some(protein) = self.proteins.get_mut(accession) {
                protein.psms.insert(psm_key.to_string());
            }
        }
        true
    }

    /// Add the protein to the peptide, and the peptide to the protein when `symmetric`
    pub fn link_peptide_to_protein(
        &mut self,
        peptide_key: &str,
        accession: &str,
        symmetric: bool,
    ) -> bool {
        if !self.proteins.contains(accession) {
            return false;
        }
        match self.peptides.get_mut(peptide_key) {
            Some(peptide) => {
                peptide.proteins.insert(accession.to_string());
            }
            None => return false,
        }
        if symmetric {
            if let Some(protein) = self.proteins.get_mut(accession) {
                protein.peptides.insert(peptide_key.to_string());
            }
        }
        true
    }

    fn repoint_protein_edges(&mut self, protein: &Protein, from: &str) {
        let to = protein.accession.as_str();
        for key in protein.psms.iter() {
            if let Some(psm) = self.psms.get_mut(key) {
                psm.proteins.shift_remove(from);
                psm.proteins.insert(to.to_string());
            }
        }
        for key in protein.peptides.iter() {
            if let Some(peptide) = self.peptides.get_mut(key) {
                peptide.proteins.shift_remove(from);
                peptide.proteins.insert(to.to_string());
            }
        }
    }

    /**
    Re-key a protein under `new_accession`, remembering the old accession as secondary.

    Fails, leaving everything untouched, if the old accession is not registered or the
    new one is already taken. Use [`QuantGraph::merge_protein_into`] for the latter.
    */
    pub fn rename_protein(&mut self, accession: &str, new_accession: &str) -> bool {
        if accession == new_accession || self.proteins.contains(new_accession) {
            return false;
        }
        let mut protein = match self.proteins.take(accession) {
            Some(p) => p,
            None => return false,
        };
        protein.accession = new_accession.to_string();
        if !protein.secondary_accessions.iter().any(|a| a == accession) {
            protein.secondary_accessions.push(accession.to_string());
        }
        self.repoint_protein_edges(&protein, accession);
        debug!("Renamed protein {accession} to {new_accession}");
        self.proteins.get_or_register(protein);
        true
    }

    /// Merge the protein under `donor` into the one under `receiver`, moving its PSM and
    /// peptide memberships across and removing the donor.
    pub fn merge_protein_into(&mut self, donor: &str, receiver: &str) -> bool {
        if donor == receiver || !self.proteins.contains(receiver) {
            return false;
        }
        let donor_protein = match self.proteins.take(donor) {
            Some(p) => p,
            None => return false,
        };
        let mut moved = donor_protein.clone();
        moved.accession = receiver.to_string();
        self.repoint_protein_edges(&moved, donor);
        if let Some(target) = self.proteins.get_mut(receiver) {
            target.absorb(donor_protein);
        }
        debug!("Merged protein {donor} into {receiver}");
        true
    }

    pub fn clear(&mut self) {
        self.proteins.clear();
        self.peptides.clear();
        self.psms.clear();
        self.missing_peptides.clear();
    }
}

lazy_static! {
    static ref GLOBAL_STORE: IdentityStore = IdentityStore::new();
}

/// A shared, lock-protected handle to a [`QuantGraph`]. Clones refer to the same graph.
#[derive(Debug, Clone, Default)]
pub struct IdentityStore {
    graph: Arc<RwLock<QuantGraph>>,
}

impl IdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide store, for callers that do not manage their own
    pub fn global() -> Self {
        GLOBAL_STORE.clone()
    }

    /// Whether two handles refer to the same graph
    pub fn same_store(&self, other: &IdentityStore) -> bool {
        Arc::ptr_eq(&self.graph, &other.graph)
    }

    pub fn read(&self) -> RwLockReadGuard<'_, QuantGraph> {
        self.graph.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, QuantGraph> {
        self.graph.write()
    }

    pub fn get_or_register<T: StoredEntity>(&self, entity: T) -> Registration {
        self.write().get_or_register(entity)
    }

    pub fn contains<T: StoredEntity>(&self, key: &str) -> bool {
        self.read().contains::<T>(key)
    }

    /// A copy of the entity currently registered under `key`
    pub fn get<T: StoredEntity>(&self, key: &str) -> Option<T> {
        self.read().get::<T>(key).cloned()
    }

    pub fn remove<T: StoredEntity>(&self, key: &str) -> Option<T> {
        self.write().remove::<T>(key)
    }

    pub fn add_missing_peptide<S: Into<String>>(&self, sequence: S) {
        self.write().missing_peptides.insert(sequence.into());
    }

    pub fn missing_peptides(&self) -> IndexSet<String> {
        self.read().missing_peptides.clone()
    }

    pub fn clear(&self) {
        self.write().clear()
    }

    pub fn protein_count(&self) -> usize {
        self.read().proteins.len()
    }

    pub fn peptide_count(&self) -> usize {
        self.read().peptides.len()
    }

    pub fn psm_count(&self) -> usize {
        self.read().psms.len()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::entity::KeyPolicy;

    fn wired(store: &IdentityStore) {
        let policy = KeyPolicy::default();
        let mut graph = store.write();
        graph.get_or_register(Protein::new("P1"));
        graph.get_or_register(Peptide::new(&policy, "PEPTIDEK", Some(2)));
        let psm = graph
            .get_or_register(Psm::new(&policy, "run1", "10", "PEPTIDEK", Some(2)))
            .into_key();
        assert!(graph.link_psm_to_peptide(&psm, "PEPTIDEK"));
        assert!(graph.link_psm_to_protein(&psm, "P1", true));
        assert!(graph.link_peptide_to_protein("PEPTIDEK", "P1", true));
    }

    #[test]
    fn test_get_or_register() {
        let store = IdentityStore::new();
        let first = store.get_or_register(Protein::new("P1").with_description("first"));
        let second = store.get_or_register(Protein::new("P1").with_description("second"));
        assert!(first.is_new());
        assert!(!second.is_new());
        assert_eq!(first.key(), second.key());
        assert_eq!(store.protein_count(), 1);
        assert_eq!(store.get::<Protein>("P1").unwrap().description, "first");
    }

    #[test]
    fn test_shared_handles() {
        let store = IdentityStore::new();
        let other = store.clone();
        other.get_or_register(Protein::new("P1"));
        assert!(store.contains::<Protein>("P1"));
        assert!(store.same_store(&other));
        assert!(!store.same_store(&IdentityStore::new()));
    }

    #[test]
    fn test_concurrent_registration() {
        let store = IdentityStore::new();
        let policy = KeyPolicy::default();
        std::thread::scope(|scope| {
            for _ in 0..8 {
                let store = store.clone();
                scope.spawn(move || {
                    for scan in 0..100 {
                        store.get_or_register(Psm::new(
                            &policy,
                            "run1",
                            &scan.to_string(),
                            "PEPTIDEK",
                            Some(2),
                        ));
                    }
                });
            }
        });
        assert_eq!(store.psm_count(), 100);
    }

    #[test]
    fn test_symmetric_links() {
        let store = IdentityStore::new();
        wired(&store);
        let graph = store.read();
        let psm = graph.psms.get("run1-10-PEPTIDEK-2").unwrap();
        assert_eq!(psm.peptide.as_deref(), Some("PEPTIDEK"));
        assert!(psm.proteins.contains("P1"));
        assert!(graph.peptides.get("PEPTIDEK").unwrap().psms.contains(&psm.key));
        assert!(graph.peptides.get("PEPTIDEK").unwrap().raw_files.contains("run1"));
        assert!(graph.proteins.get("P1").unwrap().psms.contains(&psm.key));
    }

    #[test]
    fn test_one_directional_link() {
        let store = IdentityStore::new();
        let mut graph = store.write();
        graph.get_or_register(Protein::new("P1"));
        graph.get_or_register(Peptide::new(&KeyPolicy::default(), "PEPTIDEK", None));
        assert!(graph.link_peptide_to_protein("PEPTIDEK", "P1", false));
        assert!(graph.proteins.get("P1").unwrap().peptides.is_empty());
        assert!(!graph.link_peptide_to_protein("PEPTIDEK", "P2", true));
    }

    #[test]
    fn test_remove_cascades_edges() {
        let store = IdentityStore::new();
        wired(&store);
        let removed: Protein = store.remove("P1").unwrap();
        assert_eq!(removed.accession, "P1");
        let graph = store.read();
        assert!(graph.psms.get("run1-10-PEPTIDEK-2").unwrap().proteins.is_empty());
        assert!(graph.peptides.get("PEPTIDEK").unwrap().proteins.is_empty());
    }

    #[test]
    fn test_rename_and_merge() {
        let store = IdentityStore::new();
        wired(&store);
        {
            let mut graph = store.write();
            assert!(graph.rename_protein("P1", "P1-CANON"));
            assert!(!graph.contains::<Protein>("P1"));
            let psm = graph.psms.get("run1-10-PEPTIDEK-2").unwrap();
            assert!(psm.proteins.contains("P1-CANON"));
            assert_eq!(
                graph.proteins.get("P1-CANON").unwrap().secondary_accessions,
                vec!["P1".to_string()]
            );
        }
        {
            let mut graph = store.write();
            graph.get_or_register(Protein::new("P2"));
            assert!(graph.rename_protein("P2", "P2-CANON"));
            assert!(!graph.rename_protein("P2-CANON", "P1-CANON"));
            assert!(graph.merge_protein_into("P1-CANON", "P2-CANON"));
            assert_eq!(graph.proteins.len(), 1);
            let merged = graph.proteins.get("P2-CANON").unwrap();
            assert!(merged.psms.contains("run1-10-PEPTIDEK-2"));
            assert!(merged.secondary_accessions.contains(&"P1-CANON".to_string()));
            assert!(merged.secondary_accessions.contains(&"P1".to_string()));
            let peptide = graph.peptides.get("PEPTIDEK").unwrap();
            assert!(peptide.proteins.contains("P2-CANON"));
            assert!(!peptide.proteins.contains("P1-CANON"));
        }
    }

    #[test]
    fn test_clear() {
        let store = IdentityStore::new();
        wired(&store);
        store.add_missing_peptide("MISSINGK");
        assert_eq!(store.missing_peptides().len(), 1);
        store.clear();
        assert_eq!(store.psm_count(), 0);
        assert_eq!(store.peptide_count(), 0);
        assert!(store.missing_peptides().is_empty());
    }
}
