use std::collections::{BTreeMap, BTreeSet};

use super::ProjectIndex;
use crate::domain::{DocumentId, Node, NodeId};

/// A node whose content differs between two versions of a project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeChange {
    /// The node.
    pub id: NodeId,
    /// Fields added, removed or changed, in name order.
    pub fields: Vec<String>,
}

/// What changed between two versions of a project.
///
/// Nodes are matched by authored identifier; nodes with synthetic
/// identifiers have no stable identity and are left out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectDiff {
    /// Nodes only in the new version.
    pub added: Vec<NodeId>,
    /// Nodes only in the old version.
    pub removed: Vec<NodeId>,
    /// Nodes in both whose kind or fields differ.
    pub modified: Vec<NodeChange>,
    /// Documents only in the new version.
    pub added_documents: Vec<DocumentId>,
    /// Documents only in the old version.
    pub removed_documents: Vec<DocumentId>,
}

impl ProjectDiff {
    /// Whether the two versions have the same content.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.removed.is_empty()
            && self.modified.is_empty()
            && self.added_documents.is_empty()
            && self.removed_documents.is_empty()
    }
}

fn authored(index: &ProjectIndex) -> BTreeMap<NodeId, Node> {
    index
        .nodes()
        .into_iter()
        .filter(|node| !node.id().is_synthetic())
        .map(|node| (node.id().clone(), node))
        .collect()
}

fn changed_fields(old: &Node, new: &Node) -> Vec<String> {
    let names: BTreeSet<&str> = old
        .fields()
        .iter()
        .chain(new.fields())
        .map(|field| field.name())
        .collect();
    names
        .into_iter()
        .filter(|name| old.value(name) != new.value(name))
        .map(str::to_string)
        .collect()
}

/// Compares two versions of a project.
///
/// Content is compared by fingerprint, so layout-only changes (blank lines,
/// trailing spaces) do not count as modifications.
#[must_use]
#[tracing::instrument(level = "debug", skip_all)]
pub fn diff(old: &ProjectIndex, new: &ProjectIndex) -> ProjectDiff {
    let before = authored(old);
    let after = authored(new);

    let mut result = ProjectDiff::default();
    for (id, node) in &after {
        match before.get(id) {
            None => result.added.push(id.clone()),
            Some(previous) if previous.fingerprint() != node.fingerprint() => {
                result.modified.push(NodeChange {
                    id: id.clone(),
                    fields: changed_fields(previous, node),
                });
            }
            Some(_) => {}
        }
    }
    result.removed = before
        .keys()
        .filter(|id| !after.contains_key(*id))
        .cloned()
        .collect();

    let old_documents: BTreeSet<DocumentId> = old.documents().into_iter().collect();
    let new_documents: BTreeSet<DocumentId> = new.documents().into_iter().collect();
    result.added_documents = new_documents.difference(&old_documents).cloned().collect();
    result.removed_documents = old_documents.difference(&new_documents).cloned().collect();

    tracing::debug!(
        added = result.added.len(),
        removed = result.removed.len(),
        modified = result.modified.len(),
        "projects compared"
    );
    result
}
