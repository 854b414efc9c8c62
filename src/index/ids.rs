use std::collections::{BTreeMap, HashMap};

use crate::domain::{DocumentId, NodeId, NodeKey};

/// What an identifier names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Resolution {
    /// Exactly one node.
    Unique(NodeKey),
    /// No node.
    Missing,
    /// Several nodes, in different documents.
    Ambiguous,
}

impl Resolution {
    pub(crate) const fn key(self) -> Option<NodeKey> {
        match self {
            Self::Unique(key) => Some(key),
            Self::Missing | Self::Ambiguous => None,
        }
    }
}

/// Identifier lookup in both directions.
///
/// An identifier maps to several keys only when documents collide; every
/// such collision is reported as a diagnostic.
#[derive(Debug, Default)]
pub(crate) struct IdTable {
    by_id: BTreeMap<NodeId, Vec<NodeKey>>,
    names: HashMap<NodeKey, NodeId>,
    owners: HashMap<NodeKey, DocumentId>,
}

impl IdTable {
    pub(crate) fn insert(&mut self, key: NodeKey, id: NodeId, document: DocumentId) {
        self.by_id.entry(id.clone()).or_default().push(key);
        self.names.insert(key, id);
        self.owners.insert(key, document);
    }

    pub(crate) fn remove(&mut self, key: NodeKey) -> Option<NodeId> {
        self.owners.remove(&key);
        let id = self.names.remove(&key)?;
        self.detach(key, &id);
        Some(id)
    }

    pub(crate) fn rename(&mut self, key: NodeKey, new: NodeId) -> Option<NodeId> {
        let old = self.names.insert(key, new.clone())?;
        self.detach(key, &old);
        self.by_id.entry(new).or_default().push(key);
        Some(old)
    }

    fn detach(&mut self, key: NodeKey, id: &NodeId) {
        if let Some(keys) = self.by_id.get_mut(id) {
            keys.retain(|candidate| *candidate != key);
            if keys.is_empty() {
                self.by_id.remove(id);
            }
        }
    }

    pub(crate) fn resolve(&self, id: &str) -> Resolution {
        match self.by_id.get(id).map(Vec::as_slice) {
            Some([key]) => Resolution::Unique(*key),
            Some([]) | None => Resolution::Missing,
            Some(_) => Resolution::Ambiguous,
        }
    }

    pub(crate) fn keys(&self, id: &str) -> &[NodeKey] {
        self.by_id.get(id).map_or(&[][..], Vec::as_slice)
    }

    pub(crate) fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    pub(crate) fn name(&self, key: NodeKey) -> Option<&NodeId> {
        self.names.get(&key)
    }

    pub(crate) fn owner(&self, key: NodeKey) -> Option<&DocumentId> {
        self.owners.get(&key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: &str) -> NodeId {
        raw.parse().unwrap()
    }

    fn doc(raw: &str) -> DocumentId {
        DocumentId::new(raw).unwrap()
    }

    #[test]
    fn resolves_unique_missing_and_ambiguous_ids() {
        let mut table = IdTable::default();
        let a = NodeKey::new();
        let b = NodeKey::new();
        let c = NodeKey::new();
        table.insert(a, id("REQ-1"), doc("a.sdoc"));
        table.insert(b, id("REQ-2"), doc("a.sdoc"));
        table.insert(c, id("REQ-2"), doc("b.sdoc"));

        assert_eq!(table.resolve("REQ-1"), Resolution::Unique(a));
        assert_eq!(table.resolve("REQ-9"), Resolution::Missing);
        assert_eq!(table.resolve("REQ-2"), Resolution::Ambiguous);
        assert_eq!(table.keys("REQ-2"), [b, c]);
    }

    #[test]
    fn rename_and_remove_update_both_directions() {
        let mut table = IdTable::default();
        let a = NodeKey::new();
        table.insert(a, id("REQ-1"), doc("a.sdoc"));

        assert_eq!(table.rename(a, id("REQ-1A")), Some(id("REQ-1")));
        assert!(!table.contains("REQ-1"));
        assert_eq!(table.resolve("REQ-1A"), Resolution::Unique(a));

        assert_eq!(table.remove(a), Some(id("REQ-1A")));
        assert!(!table.contains("REQ-1A"));
        assert_eq!(table.owner(a), None);
    }
}
