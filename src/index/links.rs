use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::domain::{LinkKind, NodeId, NodeKey};

/// One reference from a node's field to an identifier.
///
/// The textual target is kept even when it resolves to nothing, so a broken
/// link is repaired as soon as a node with that identifier appears.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LinkRecord {
    pub(crate) source: NodeKey,
    pub(crate) kind: LinkKind,
    pub(crate) field: String,
    pub(crate) target: NodeId,
    pub(crate) resolved: Option<NodeKey>,
}

/// Forward and backward link tables.
///
/// Records are numbered in insertion order; backward listings are sorted by
/// that number so they follow declaration order in source.
#[derive(Debug, Default)]
pub(crate) struct LinkTable {
    next: u64,
    records: BTreeMap<u64, LinkRecord>,
    outgoing: HashMap<NodeKey, Vec<u64>>,
    incoming: HashMap<NodeKey, BTreeSet<u64>>,
    by_target: HashMap<NodeId, BTreeSet<u64>>,
}

impl LinkTable {
    pub(crate) fn insert(&mut self, record: LinkRecord) -> u64 {
        let number = self.next;
        self.next += 1;
        self.index(number, &record);
        self.outgoing.entry(record.source).or_default().push(number);
        self.records.insert(number, record);
        number
    }

    fn index(&mut self, number: u64, record: &LinkRecord) {
        self.by_target
            .entry(record.target.clone())
            .or_default()
            .insert(number);
        if let Some(target) = record.resolved {
            self.incoming.entry(target).or_default().insert(number);
        }
    }

    fn unindex(&mut self, number: u64, record: &LinkRecord) {
        if let Some(numbers) = self.by_target.get_mut(&record.target) {
            numbers.remove(&number);
            if numbers.is_empty() {
                self.by_target.remove(&record.target);
            }
        }
        if let Some(target) = record.resolved {
            if let Some(numbers) = self.incoming.get_mut(&target) {
                numbers.remove(&number);
                if numbers.is_empty() {
                    self.incoming.remove(&target);
                }
            }
        }
    }

    /// Links declared by a node, in declaration order.
    pub(crate) fn outgoing(&self, source: NodeKey) -> impl Iterator<Item = &LinkRecord> {
        self.outgoing
            .get(&source)
            .into_iter()
            .flatten()
            .filter_map(|number| self.records.get(number))
    }

    /// Resolved links pointing at a node, in insertion order.
    pub(crate) fn incoming(&self, target: NodeKey) -> impl Iterator<Item = &LinkRecord> {
        self.incoming
            .get(&target)
            .into_iter()
            .flatten()
            .filter_map(|number| self.records.get(number))
    }

    /// All links, in insertion order.
    pub(crate) fn records(&self) -> impl Iterator<Item = &LinkRecord> {
        self.records.values()
    }

    /// Replaces the links declared by one field of a node.
    ///
    /// Links whose target is unchanged keep their place in every listing.
    /// Returns the nodes the field resolved to before or after, but not both.
    pub(crate) fn replace_field(
        &mut self,
        source: NodeKey,
        field: &str,
        kind: &LinkKind,
        targets: Vec<(NodeId, Option<NodeKey>)>,
    ) -> BTreeSet<NodeKey> {
        let previous: Vec<u64> = self
            .outgoing(source)
            .zip(self.outgoing.get(&source).into_iter().flatten())
            .filter(|(record, _)| record.field == field)
            .map(|(_, number)| *number)
            .collect();

        let before = self.resolved(&previous);
        let mut reusable: Vec<(u64, NodeId)> = previous
            .iter()
            .filter_map(|number| Some((*number, self.records.get(number)?.target.clone())))
            .collect();

        let mut kept = Vec::new();
        for (target, resolved) in targets {
            if let Some(position) = reusable.iter().position(|(_, t)| *t == target) {
                let (number, _) = reusable.remove(position);
                self.set_resolution(number, resolved);
                kept.push(number);
            } else {
                let number = self.next;
                self.next += 1;
                let record = LinkRecord {
                    source,
                    kind: kind.clone(),
                    field: field.to_string(),
                    target,
                    resolved,
                };
                self.index(number, &record);
                self.records.insert(number, record);
                kept.push(number);
            }
        }

        for (number, _) in reusable {
            if let Some(record) = self.records.remove(&number) {
                self.unindex(number, &record);
            }
        }
        let after = self.resolved(&kept);

        let order = self.outgoing.entry(source).or_default();
        let at = order
            .iter()
            .position(|number| previous.contains(number))
            .unwrap_or(order.len());
        order.retain(|number| !previous.contains(number));
        let at = at.min(order.len());
        order.splice(at..at, kept);
        if order.is_empty() {
            self.outgoing.remove(&source);
        }

        before.symmetric_difference(&after).copied().collect()
    }

    fn resolved(&self, numbers: &[u64]) -> BTreeSet<NodeKey> {
        numbers
            .iter()
            .filter_map(|number| self.records.get(number)?.resolved)
            .collect()
    }

    /// Removes every link declared by a node.
    pub(crate) fn remove_source(&mut self, source: NodeKey) -> Vec<LinkRecord> {
        let numbers = self.outgoing.remove(&source).unwrap_or_default();
        numbers
            .into_iter()
            .filter_map(|number| {
                let record = self.records.remove(&number)?;
                self.unindex(number, &record);
                Some(record)
            })
            .collect()
    }

    /// Points every link naming `target` at `resolved`.
    ///
    /// Returns the links whose resolution changed, as they are now.
    pub(crate) fn retarget(&mut self, target: &NodeId, resolved: Option<NodeKey>) -> Vec<LinkRecord> {
        let numbers: Vec<u64> = self
            .by_target
            .get(target)
            .map(|numbers| numbers.iter().copied().collect())
            .unwrap_or_default();

        numbers
            .into_iter()
            .filter_map(|number| {
                if self.set_resolution(number, resolved) {
                    self.records.get(&number).cloned()
                } else {
                    None
                }
            })
            .collect()
    }

    fn set_resolution(&mut self, number: u64, resolved: Option<NodeKey>) -> bool {
        let Some(record) = self.records.get(&number) else {
            return false;
        };
        if record.resolved == resolved {
            return false;
        }
        let record = record.clone();
        self.unindex(number, &record);
        let record = LinkRecord { resolved, ..record };
        self.index(number, &record);
        self.records.insert(number, record);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: &str) -> NodeId {
        raw.parse().unwrap()
    }

    fn link(source: NodeKey, target: &str, resolved: Option<NodeKey>) -> LinkRecord {
        LinkRecord {
            source,
            kind: LinkKind::TracesTo,
            field: "PARENT".to_string(),
            target: id(target),
            resolved,
        }
    }

    #[test]
    fn incoming_follows_insertion_order() {
        let mut table = LinkTable::default();
        let root = NodeKey::new();
        let first = NodeKey::new();
        let second = NodeKey::new();
        table.insert(link(second, "ROOT", Some(root)));
        table.insert(link(first, "ROOT", Some(root)));

        let sources: Vec<_> = table.incoming(root).map(|r| r.source).collect();
        assert_eq!(sources, [second, first]);
    }

    #[test]
    fn replacing_a_field_keeps_unchanged_links() {
        let mut table = LinkTable::default();
        let source = NodeKey::new();
        let a = NodeKey::new();
        let b = NodeKey::new();
        let kept = table.insert(link(source, "A", Some(a)));
        table.insert(link(source, "B", Some(b)));

        let retargeted = table.replace_field(
            source,
            "PARENT",
            &LinkKind::TracesTo,
            vec![(id("A"), Some(a)), (id("C"), None)],
        );

        assert_eq!(retargeted, BTreeSet::from([b]));
        assert_eq!(table.incoming(b).count(), 0);

        let targets: Vec<_> = table.outgoing(source).map(|r| r.target.to_string()).collect();
        assert_eq!(targets, ["A", "C"]);
        assert_eq!(table.outgoing.get(&source).unwrap()[0], kept);

        let unchanged = table.replace_field(
            source,
            "PARENT",
            &LinkKind::TracesTo,
            vec![(id("C"), None), (id("A"), Some(a))],
        );
        assert!(unchanged.is_empty());
    }

    #[test]
    fn retargeting_repairs_and_breaks_links() {
        let mut table = LinkTable::default();
        let source = NodeKey::new();
        let target = NodeKey::new();
        table.insert(link(source, "REQ-9", None));

        let changed = table.retarget(&id("REQ-9"), Some(target));
        assert_eq!(changed.len(), 1);
        assert_eq!(table.incoming(target).count(), 1);

        assert!(table.retarget(&id("REQ-9"), Some(target)).is_empty());

        let changed = table.retarget(&id("REQ-9"), None);
        assert_eq!(changed[0].resolved, None);
        assert_eq!(table.incoming(target).count(), 0);
    }

    #[test]
    fn removing_a_source_drops_its_backward_entries() {
        let mut table = LinkTable::default();
        let source = NodeKey::new();
        let target = NodeKey::new();
        table.insert(link(source, "ROOT", Some(target)));

        let removed = table.remove_source(source);

        assert_eq!(removed.len(), 1);
        assert_eq!(table.incoming(target).count(), 0);
        assert_eq!(table.records().count(), 0);
    }
}
