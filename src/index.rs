//! The project-wide registry of documents, nodes and links.
//!
//! A [`ProjectIndex`] is built in one step from the node trees of every
//! document and is the only structure queried afterwards. Field and
//! structural edits patch it in place; a full rebuild produces a new index,
//! which [`Project`] swaps in atomically.
//!
//! Locks are always taken in the same order: structure, node, identifiers,
//! links, diagnostics, reported cycles.

use std::collections::{BTreeSet, HashMap, HashSet};

use indexmap::{IndexMap, IndexSet};
use nonempty::NonEmpty;
use parking_lot::{FairMutex, Mutex, RwLock};
use rayon::prelude::*;
use tracing::instrument;

use crate::{
    domain::{
        Config, Diagnostic, DiagnosticCode, Diagnostics, Document, DocumentId, FieldValue,
        LinkKind, Location, Node, NodeId, NodeKey, NodeTree, Schema, build_tree,
        schema::IDENTIFIER_FIELD,
    },
    graph,
    syntax::{parse_document, resolve_schema, write_document},
};

mod diff;
mod edit;
mod ids;
mod links;
mod project;
mod query;

pub use diff::{NodeChange, ProjectDiff, diff};
pub use edit::{EditError, NewNode};
pub use project::Project;
pub use query::{Operand, Query, QueryError};

use ids::{IdTable, Resolution};
use links::{LinkRecord, LinkTable};

/// The text of one document, as supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    /// The document identifier, typically a relative path.
    pub document: DocumentId,
    /// The SDoc text.
    pub text: String,
}

impl Source {
    /// Pairs a document identifier with its text.
    #[must_use]
    pub fn new(document: DocumentId, text: impl Into<String>) -> Self {
        Self {
            document,
            text: text.into(),
        }
    }
}

/// Which way to follow links.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Children, then the targets of the node's own references.
    Forward,
    /// The parent, then the nodes whose references name this node.
    Backward,
}

/// An elementary cycle among links of one kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cycle {
    /// The link kind.
    pub kind: LinkKind,
    /// The nodes on the cycle, starting from the earliest in document order.
    pub nodes: NonEmpty<NodeId>,
}

/// Errors from index lookups.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IndexError {
    /// No node has the identifier.
    #[error("no node with identifier '{0}'")]
    NotFound(String),
    /// Several nodes (in different documents) have the identifier.
    #[error("identifier '{0}' is held by more than one node")]
    Ambiguous(String),
    /// No document has the identifier.
    #[error("no document '{0}'")]
    DocumentNotFound(String),
}

/// The nodes whose externally visible state changed in an edit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexDelta {
    /// Nodes to re-render: the edited node and every node whose trace
    /// listing now differs.
    pub changed: BTreeSet<NodeId>,
    /// Identifiers that no longer name the node they named before.
    pub removed: BTreeSet<NodeId>,
}

impl IndexDelta {
    /// Whether the edit changed nothing visible.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.removed.is_empty()
    }
}

/// A reference that resolves to no node, or to more than one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokenLink {
    /// The referencing node.
    pub source: NodeId,
    /// The referencing node's document.
    pub document: DocumentId,
    /// The reference field.
    pub field: String,
    /// The link kind.
    pub kind: LinkKind,
    /// The identifier named by the reference.
    pub target: NodeId,
    /// Whether the target is held by several nodes rather than none.
    pub ambiguous: bool,
}

#[derive(Debug, Default)]
struct Structure {
    documents: IndexMap<DocumentId, Document>,
    nodes: HashMap<NodeKey, FairMutex<Node>>,
}

impl Structure {
    fn with<T>(&self, key: NodeKey, f: impl FnOnce(&Node) -> T) -> Option<T> {
        self.nodes.get(&key).map(|cell| f(&cell.lock()))
    }

    fn with_mut<T>(&self, key: NodeKey, f: impl FnOnce(&mut Node) -> T) -> Option<T> {
        self.nodes.get(&key).map(|cell| f(&mut cell.lock()))
    }

    fn snapshot(&self, key: NodeKey) -> Option<Node> {
        self.with(key, Node::clone)
    }

    /// Keys of a subtree, root first.
    fn subtree(&self, root: NodeKey) -> Vec<NodeKey> {
        self.preorder(vec![root])
    }

    fn document_order(&self, document: &Document) -> Vec<NodeKey> {
        self.preorder(document.roots().to_vec())
    }

    /// Keys of every node, document by document.
    fn order(&self) -> Vec<NodeKey> {
        self.documents
            .values()
            .flat_map(|document| self.document_order(document))
            .collect()
    }

    fn preorder(&self, roots: Vec<NodeKey>) -> Vec<NodeKey> {
        let mut order = Vec::new();
        let mut stack: Vec<NodeKey> = roots.into_iter().rev().collect();
        while let Some(key) = stack.pop() {
            if let Some(children) = self.with(key, |node| node.children().to_vec()) {
                order.push(key);
                stack.extend(children.into_iter().rev());
            }
        }
        order
    }

    fn schema(&self, document: &DocumentId) -> Option<&Schema> {
        self.documents
            .get(document)
            .map(|document| document.schema().as_ref())
    }
}

/// The registry of every document, node and link in a project.
///
/// Built in one step by [`ProjectIndex::build`] or [`ProjectIndex::load`];
/// there is no way to observe a partially built index. Queries and edits may
/// run concurrently from several threads.
#[derive(Debug)]
pub struct ProjectIndex {
    structure: RwLock<Structure>,
    ids: RwLock<IdTable>,
    links: Mutex<LinkTable>,
    diagnostics: Mutex<Diagnostics>,
    cycles: Mutex<Vec<ReportedCycle>>,
    config: Config,
}

/// A cycle behind one [`DiagnosticCode::TraceCycle`] warning.
#[derive(Debug)]
struct ReportedCycle {
    kind: LinkKind,
    nodes: Vec<NodeKey>,
    message: String,
}

impl ProjectIndex {
    /// Builds the index from the node trees of every document.
    ///
    /// `diagnostics` carries whatever was found while parsing; resolution
    /// problems are added to it. Identifiers shared by nodes of different
    /// documents are flagged on every holder and resolve to neither.
    /// Unresolved references are flagged but keep their node. A document
    /// identifier seen twice keeps its first tree.
    #[must_use]
    #[instrument(level = "info", skip_all, fields(documents = trees.len()))]
    pub fn build(trees: Vec<NodeTree>, mut diagnostics: Diagnostics, config: &Config) -> Self {
        let mut structure = Structure::default();
        let mut ids = IdTable::default();

        for tree in trees {
            let (document, nodes) = tree.into_parts();
            if structure.documents.contains_key(document.id()) {
                diagnostics.push(Diagnostic::error(
                    DiagnosticCode::DuplicateDocument,
                    format!(
                        "document '{}' is loaded more than once; only the first copy is indexed",
                        document.id()
                    ),
                    Location::Source {
                        document: document.id().clone(),
                        line: 1,
                        column: 1,
                    },
                ));
                continue;
            }
            for (key, node) in nodes {
                ids.insert(key, node.id().clone(), node.document().clone());
                structure.nodes.insert(key, FairMutex::new(node));
            }
            structure.documents.insert(document.id().clone(), document);
        }

        let order = structure.order();
        let mut links = LinkTable::default();
        for &key in &order {
            let declared = structure
                .with(key, |node| {
                    structure
                        .schema(node.document())
                        .map(|schema| references(node, schema))
                })
                .flatten()
                .unwrap_or_default();
            register_links(key, declared, &ids, &mut links);
        }

        refresh_links(order, &ids, &links, &mut diagnostics);
        let mut cycles = Vec::new();
        refresh_cycles(None, &ids, &links, config, &mut diagnostics, &mut cycles);

        tracing::info!(
            documents = structure.documents.len(),
            nodes = structure.nodes.len(),
            diagnostics = diagnostics.len(),
            "project index built"
        );

        Self {
            structure: RwLock::new(structure),
            ids: RwLock::new(ids),
            links: Mutex::new(links),
            diagnostics: Mutex::new(diagnostics),
            cycles: Mutex::new(cycles),
            config: config.clone(),
        }
    }

    /// Parses every source and builds the index.
    ///
    /// Documents are parsed independently (in parallel unless disabled in
    /// the configuration). A document that fails to parse is left out; its
    /// error is kept in the index diagnostics.
    #[must_use]
    #[instrument(level = "info", skip_all, fields(documents = sources.len()))]
    pub fn load(sources: &[Source], config: &Config) -> Self {
        let parsed: Vec<(Option<NodeTree>, Diagnostics)> = if config.parallel {
            sources.par_iter().map(parse_source).collect()
        } else {
            sources.iter().map(parse_source).collect()
        };

        let mut diagnostics = Diagnostics::new();
        let mut trees = Vec::with_capacity(parsed.len());
        for (tree, mut found) in parsed {
            diagnostics.append(&mut found);
            trees.extend(tree);
        }
        Self::build(trees, diagnostics, config)
    }

    /// The configuration the index was built with.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Identifiers of the indexed documents, in load order.
    #[must_use]
    pub fn documents(&self) -> Vec<DocumentId> {
        self.structure.read().documents.keys().cloned().collect()
    }

    /// A copy of the node with the given identifier.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError`] if no node, or more than one, has the
    /// identifier.
    pub fn node(&self, id: &str) -> Result<Node, IndexError> {
        let structure = self.structure.read();
        let key = self.locate(id)?;
        structure
            .snapshot(key)
            .ok_or_else(|| IndexError::NotFound(id.to_string()))
    }

    /// Copies of every node holding an identifier, duplicates included.
    #[must_use]
    pub fn nodes_with_id(&self, id: &str) -> Vec<Node> {
        let structure = self.structure.read();
        let keys = self.ids.read().keys(id).to_vec();
        keys.into_iter()
            .filter_map(|key| structure.snapshot(key))
            .collect()
    }

    /// Copies of every node, document by document in document order.
    #[must_use]
    pub fn nodes(&self) -> Vec<Node> {
        let structure = self.structure.read();
        structure
            .order()
            .into_iter()
            .filter_map(|key| structure.snapshot(key))
            .collect()
    }

    /// Number of indexed nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.structure.read().nodes.len()
    }

    /// Whether the project has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.structure.read().nodes.is_empty()
    }

    /// The children of a node, in order.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError`] if the identifier does not name exactly one
    /// node.
    pub fn children(&self, id: &str) -> Result<Vec<Node>, IndexError> {
        let structure = self.structure.read();
        let key = self.locate(id)?;
        let children = structure
            .with(key, |node| node.children().to_vec())
            .ok_or_else(|| IndexError::NotFound(id.to_string()))?;
        Ok(children
            .into_iter()
            .filter_map(|child| structure.snapshot(child))
            .collect())
    }

    /// The parent of a node, if it has one.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError`] if the identifier does not name exactly one
    /// node.
    pub fn parent(&self, id: &str) -> Result<Option<Node>, IndexError> {
        let structure = self.structure.read();
        let key = self.locate(id)?;
        let parent = structure
            .with(key, Node::parent)
            .ok_or_else(|| IndexError::NotFound(id.to_string()))?;
        Ok(parent.and_then(|parent| structure.snapshot(parent)))
    }

    /// The value of a field, falling back to the schema default.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError`] if the identifier does not name exactly one
    /// node.
    pub fn field_value(&self, id: &str, field: &str) -> Result<Option<FieldValue>, IndexError> {
        let structure = self.structure.read();
        let key = self.locate(id)?;
        structure
            .with(key, |node| {
                structure
                    .schema(node.document())
                    .and_then(|schema| effective_value(node, schema, field))
            })
            .ok_or_else(|| IndexError::NotFound(id.to_string()))
    }

    /// The trace listing of a node, over every link kind.
    ///
    /// Forward: the node's children, then the targets of its references in
    /// declaration order. Backward: its parent, then the nodes referencing it
    /// in declaration order. Each node is listed once; broken references are
    /// not listed.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError`] if the identifier does not name exactly one
    /// node.
    pub fn query_trace(&self, id: &str, direction: Direction) -> Result<Vec<Node>, IndexError> {
        self.trace(id, direction, None)
    }

    /// The trace listing of a node, restricted to one link kind.
    ///
    /// [`LinkKind::ParentOf`] lists only the hierarchy.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError`] if the identifier does not name exactly one
    /// node.
    pub fn query_trace_kind(
        &self,
        id: &str,
        direction: Direction,
        kind: &LinkKind,
    ) -> Result<Vec<Node>, IndexError> {
        self.trace(id, direction, Some(kind))
    }

    fn trace(
        &self,
        id: &str,
        direction: Direction,
        kind: Option<&LinkKind>,
    ) -> Result<Vec<Node>, IndexError> {
        let structure = self.structure.read();
        let key = self.locate(id)?;
        let (parent, children) = structure
            .with(key, |node| (node.parent(), node.children().to_vec()))
            .ok_or_else(|| IndexError::NotFound(id.to_string()))?;

        let hierarchy = kind.is_none_or(LinkKind::is_hierarchy);
        let selected = |record: &&LinkRecord| kind.is_none_or(|kind| record.kind == *kind);

        let mut keys: IndexSet<NodeKey> = IndexSet::new();
        {
            let links = self.links.lock();
            match direction {
                Direction::Forward => {
                    if hierarchy {
                        keys.extend(children);
                    }
                    keys.extend(
                        links
                            .outgoing(key)
                            .filter(selected)
                            .filter_map(|record| record.resolved),
                    );
                }
                Direction::Backward => {
                    if hierarchy {
                        keys.extend(parent);
                    }
                    keys.extend(
                        links
                            .incoming(key)
                            .filter(selected)
                            .map(|record| record.source),
                    );
                }
            }
        }

        Ok(keys
            .into_iter()
            .filter_map(|key| structure.snapshot(key))
            .collect())
    }

    /// Whether a node has at least one resolved outgoing link of a kind.
    ///
    /// For [`LinkKind::ParentOf`], whether it has children.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError`] if the identifier does not name exactly one
    /// node.
    pub fn coverage(&self, id: &str, kind: &LinkKind) -> Result<bool, IndexError> {
        let structure = self.structure.read();
        let key = self.locate(id)?;
        if kind.is_hierarchy() {
            return structure
                .with(key, |node| !node.children().is_empty())
                .ok_or_else(|| IndexError::NotFound(id.to_string()));
        }
        Ok(self
            .links
            .lock()
            .outgoing(key)
            .any(|record| record.kind == *kind && record.resolved.is_some()))
    }

    /// Every elementary cycle among resolved links of a kind.
    ///
    /// The hierarchy is kept acyclic by construction, so
    /// [`LinkKind::ParentOf`] never yields a cycle.
    #[must_use]
    pub fn detect_cycles(&self, kind: &LinkKind) -> Vec<Cycle> {
        let structure = self.structure.read();
        let edges: Vec<(NodeKey, NodeKey)> = if kind.is_hierarchy() {
            structure
                .order()
                .into_iter()
                .filter_map(|child| {
                    structure
                        .with(child, Node::parent)
                        .flatten()
                        .map(|parent| (parent, child))
                })
                .collect()
        } else {
            link_edges(&self.links.lock(), kind)
        };

        let ids = self.ids.read();
        key_cycles(&edges)
            .into_iter()
            .filter_map(|keys| {
                let names = keys
                    .iter()
                    .filter_map(|key| ids.name(*key).cloned())
                    .collect();
                Some(Cycle {
                    kind: kind.clone(),
                    nodes: NonEmpty::from_vec(names)?,
                })
            })
            .collect()
    }

    /// References that resolve to no node or to several, in declaration
    /// order.
    #[must_use]
    pub fn broken_links(&self) -> Vec<BrokenLink> {
        let ids = self.ids.read();
        let links = self.links.lock();
        links
            .records()
            .filter(|record| record.resolved.is_none())
            .filter_map(|record| {
                Some(BrokenLink {
                    source: ids.name(record.source)?.clone(),
                    document: ids.owner(record.source)?.clone(),
                    field: record.field.clone(),
                    kind: record.kind.clone(),
                    target: record.target.clone(),
                    ambiguous: ids.resolve(&record.target) == Resolution::Ambiguous,
                })
            })
            .collect()
    }

    /// Every diagnostic recorded so far.
    #[must_use]
    pub fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.lock().clone()
    }

    /// Diagnostics located in a document or on its nodes.
    #[must_use]
    pub fn diagnostics_for_document(&self, document: &DocumentId) -> Vec<Diagnostic> {
        self.diagnostics
            .lock()
            .for_document(document)
            .cloned()
            .collect()
    }

    /// Diagnostics attached to the node(s) with an identifier.
    #[must_use]
    pub fn diagnostics_for_node(&self, id: &str) -> Vec<Diagnostic> {
        self.diagnostics.lock().for_node(id).cloned().collect()
    }

    /// Writes a document back to SDoc text.
    ///
    /// Untouched regions are reproduced byte for byte.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::DocumentNotFound`] for an unknown document.
    pub fn serialize_document(&self, document: &DocumentId) -> Result<String, IndexError> {
        let structure = self.structure.read();
        let found = structure
            .documents
            .get(document)
            .ok_or_else(|| IndexError::DocumentNotFound(document.to_string()))?;
        let nodes: HashMap<NodeKey, Node> = structure
            .document_order(found)
            .into_iter()
            .filter_map(|key| Some((key, structure.snapshot(key)?)))
            .collect();
        Ok(write_document(found, |key| nodes.get(&key)))
    }

    fn locate(&self, id: &str) -> Result<NodeKey, IndexError> {
        match self.ids.read().resolve(id) {
            Resolution::Unique(key) => Ok(key),
            Resolution::Missing => Err(IndexError::NotFound(id.to_string())),
            Resolution::Ambiguous => Err(IndexError::Ambiguous(id.to_string())),
        }
    }
}

fn parse_source(source: &Source) -> (Option<NodeTree>, Diagnostics) {
    let mut diagnostics = Diagnostics::new();
    let tree = resolve_schema(&source.text, &source.document, &mut diagnostics)
        .ok()
        .and_then(|schema| {
            parse_document(&source.text, &source.document, &schema, &mut diagnostics).ok()
        })
        .and_then(|syntax| build_tree(syntax, &mut diagnostics).ok());

    if tree.is_none() {
        tracing::warn!(document = %source.document, "document left out of the project");
    }
    (tree, diagnostics)
}

/// The value of a field, or its schema default.
fn effective_value(node: &Node, schema: &Schema, field: &str) -> Option<FieldValue> {
    node.value(field).cloned().or_else(|| {
        schema
            .kind(node.kind())?
            .field(field)?
            .default_value()
            .cloned()
    })
}

/// The reference fields of a node and the identifiers they name.
fn references(node: &Node, schema: &Schema) -> Vec<(String, LinkKind, Vec<NodeId>)> {
    let Some(definition) = schema.kind(node.kind()) else {
        return Vec::new();
    };
    node.fields()
        .iter()
        .filter_map(|field| {
            let kind = definition.field(field.name())?.link_kind()?;
            let targets = field
                .value()
                .items()
                .filter_map(|item| item.trim().parse().ok())
                .collect();
            Some((field.name().to_string(), kind.clone(), targets))
        })
        .collect()
}

/// Adds the declared links of a node, returning the keys they resolve to.
fn register_links(
    key: NodeKey,
    declared: Vec<(String, LinkKind, Vec<NodeId>)>,
    ids: &IdTable,
    links: &mut LinkTable,
) -> BTreeSet<NodeKey> {
    let mut targets = BTreeSet::new();
    for (field, kind, names) in declared {
        for target in names {
            let resolved = ids.resolve(&target).key();
            targets.extend(resolved);
            links.insert(LinkRecord {
                source: key,
                kind: kind.clone(),
                field: field.clone(),
                target,
                resolved,
            });
        }
    }
    targets
}

fn link_edges(links: &LinkTable, kind: &LinkKind) -> Vec<(NodeKey, NodeKey)> {
    links
        .records()
        .filter(|record| record.kind == *kind)
        .filter_map(|record| Some((record.source, record.resolved?)))
        .collect()
}

/// Elementary cycles over node keys. Keys are numbered by first appearance,
/// so the listing follows the order of `edges`.
fn key_cycles(edges: &[(NodeKey, NodeKey)]) -> Vec<Vec<NodeKey>> {
    let mut keys: IndexSet<NodeKey> = IndexSet::new();
    let numbered: Vec<(usize, usize)> = edges
        .iter()
        .map(|&(from, to)| (keys.insert_full(from).0, keys.insert_full(to).0))
        .collect();

    graph::elementary_cycles(keys.len(), &numbered)
        .into_iter()
        .map(|cycle| {
            cycle
                .into_iter()
                .filter_map(|index| keys.get_index(index).copied())
                .collect()
        })
        .collect()
}

/// The identifier and reference problems of one node.
fn link_diagnostics(key: NodeKey, ids: &IdTable, links: &LinkTable) -> Vec<Diagnostic> {
    let (Some(id), Some(document)) = (ids.name(key), ids.owner(key)) else {
        return Vec::new();
    };
    let at = |field: &str| Location::Node {
        document: document.clone(),
        node: id.clone(),
        field: Some(field.to_string()),
    };

    let mut found = Vec::new();
    let holders = ids.keys(id);
    if holders.len() > 1 {
        let others: Vec<String> = holders
            .iter()
            .filter(|&&holder| holder != key)
            .filter_map(|&holder| ids.owner(holder))
            .map(ToString::to_string)
            .collect();
        found.push(Diagnostic::error(
            DiagnosticCode::DuplicateId,
            format!("identifier '{id}' is also used in {}", others.join(", ")),
            at(IDENTIFIER_FIELD),
        ));
    }

    for record in links.outgoing(key).filter(|record| record.resolved.is_none()) {
        let diagnostic = match ids.resolve(&record.target) {
            Resolution::Ambiguous => Diagnostic::error(
                DiagnosticCode::AmbiguousReference,
                format!("'{}' names more than one node", record.target),
                at(&record.field),
            ),
            Resolution::Missing | Resolution::Unique(_) => Diagnostic::error(
                DiagnosticCode::UnresolvedReference,
                format!("'{}' does not name any node", record.target),
                at(&record.field),
            ),
        };
        found.push(diagnostic);
    }
    found
}

/// Recomputes the identifier and reference diagnostics of some nodes.
fn refresh_links(
    keys: impl IntoIterator<Item = NodeKey>,
    ids: &IdTable,
    links: &LinkTable,
    diagnostics: &mut Diagnostics,
) {
    let keys: IndexSet<NodeKey> = keys.into_iter().collect();
    for key in keys {
        let (Some(id), Some(document)) = (ids.name(key), ids.owner(key)) else {
            continue;
        };
        diagnostics.discard(|diagnostic| {
            diagnostic.code.is_link_state()
                && diagnostic.location.document() == document
                && diagnostic.location.node() == Some(id)
        });
        diagnostics.extend(link_diagnostics(key, ids, links));
    }
}

/// Like [`key_cycles`], but only within the strongly connected components
/// holding one of `seeds`. Also returns every key of those components,
/// together with the seeds themselves.
fn key_cycles_through(
    edges: &[(NodeKey, NodeKey)],
    seeds: &BTreeSet<NodeKey>,
) -> (BTreeSet<NodeKey>, Vec<Vec<NodeKey>>) {
    let mut keys: IndexSet<NodeKey> = IndexSet::new();
    let numbered: Vec<(usize, usize)> = edges
        .iter()
        .map(|&(from, to)| (keys.insert_full(from).0, keys.insert_full(to).0))
        .collect();
    let seeded: Vec<usize> = seeds
        .iter()
        .filter_map(|seed| keys.get_index_of(seed))
        .collect();

    let (searched, cycles) = graph::elementary_cycles_through(keys.len(), &numbered, &seeded);
    let key = |index: usize| keys.get_index(index).copied();

    let mut affected: BTreeSet<NodeKey> = searched.into_iter().filter_map(key).collect();
    affected.extend(seeds.iter().copied());
    let cycles = cycles
        .into_iter()
        .map(|cycle| cycle.into_iter().filter_map(key).collect())
        .collect();
    (affected, cycles)
}

/// Recomputes the warnings for cycles among links whose kind must be
/// acyclic.
///
/// With `seeds`, only the strongly connected components holding one of them
/// are searched again, and only the warnings for cycles through those
/// components are replaced. The seeds must include every node whose
/// outgoing links changed and every node that was removed.
fn refresh_cycles(
    seeds: Option<&BTreeSet<NodeKey>>,
    ids: &IdTable,
    links: &LinkTable,
    config: &Config,
    diagnostics: &mut Diagnostics,
    reported: &mut Vec<ReportedCycle>,
) {
    if seeds.is_some_and(BTreeSet::is_empty) {
        return;
    }

    let kinds: BTreeSet<LinkKind> = links
        .records()
        .map(|record| &record.kind)
        .chain(reported.iter().map(|cycle| &cycle.kind))
        .filter(|kind| !config.allows_cycles(kind))
        .cloned()
        .collect();

    for kind in kinds {
        let edges = link_edges(links, &kind);
        let (affected, cycles) = match seeds {
            Some(seeds) => {
                let (affected, cycles) = key_cycles_through(&edges, seeds);
                (Some(affected), cycles)
            }
            None => (None, key_cycles(&edges)),
        };

        let (stale, kept): (Vec<ReportedCycle>, Vec<ReportedCycle>) =
            std::mem::take(reported).into_iter().partition(|cycle| {
                cycle.kind == kind
                    && affected
                        .as_ref()
                        .is_none_or(|affected| cycle.nodes.iter().any(|node| affected.contains(node)))
            });
        *reported = kept;
        let stale: HashSet<String> = stale.into_iter().map(|cycle| cycle.message).collect();
        diagnostics.discard(|diagnostic| {
            diagnostic.code == DiagnosticCode::TraceCycle && stale.contains(&diagnostic.message)
        });

        for cycle in cycles {
            let Some(warning) = cycle_warning(&kind, &cycle, ids) else {
                continue;
            };
            reported.push(ReportedCycle {
                kind: kind.clone(),
                nodes: cycle,
                message: warning.message.clone(),
            });
            diagnostics.push(warning);
        }
    }
}

fn cycle_warning(kind: &LinkKind, cycle: &[NodeKey], ids: &IdTable) -> Option<Diagnostic> {
    let names: Vec<&NodeId> = cycle.iter().filter_map(|key| ids.name(*key)).collect();
    let document = ids.owner(*cycle.first()?)?;
    let first = *names.first()?;
    let path: Vec<String> = names
        .iter()
        .chain(std::iter::once(&first))
        .map(ToString::to_string)
        .collect();
    Some(Diagnostic::warning(
        DiagnosticCode::TraceCycle,
        format!("{kind} links form a cycle: {}", path.join(" -> ")),
        Location::Node {
            document: document.clone(),
            node: first.clone(),
            field: None,
        },
    ))
}

#[cfg(test)]
pub(crate) fn load_sources(sources: &[(&str, &str)]) -> ProjectIndex {
    let sources: Vec<Source> = sources
        .iter()
        .map(|(document, text)| Source::new(DocumentId::new(*document).unwrap(), *text))
        .collect();
    ProjectIndex::load(&sources, &Config::default())
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;
    use crate::domain::ErrorClass;

    const ROOT: &str = "\
[DOCUMENT]
TITLE: Vehicle

[REQUIREMENT]
UID: REQ-ROOT
TITLE: Vehicle safety
";

    const BRAKES: &str = "\
[DOCUMENT]
TITLE: Brakes

[REQUIREMENT]
UID: REQ-1
TITLE: Brake system
PARENT:
- REQ-ROOT
";

    const DANGLING: &str = "\
[DOCUMENT]
TITLE: Dangling

[REQUIREMENT]
UID: REQ-C
PARENT:
- REQ-9
";

    fn ids(nodes: &[Node]) -> Vec<String> {
        nodes.iter().map(|node| node.id().to_string()).collect()
    }

    fn reference_errors(index: &ProjectIndex) -> Vec<Diagnostic> {
        index
            .diagnostics()
            .into_iter()
            .filter(|diagnostic| diagnostic.class() == ErrorClass::ReferenceError)
            .collect()
    }

    #[test]
    fn resolves_references_across_documents() {
        let index = load_sources(&[("a.sdoc", ROOT), ("b.sdoc", BRAKES)]);

        assert!(index.diagnostics().is_empty());
        let referencing = index.query_trace("REQ-ROOT", Direction::Backward).unwrap();
        assert_eq!(ids(&referencing), ["REQ-1"]);
        let referenced = index.query_trace("REQ-1", Direction::Forward).unwrap();
        assert_eq!(ids(&referenced), ["REQ-ROOT"]);
    }

    #[test]
    fn removing_the_referencing_document_leaves_no_errors() {
        let index = load_sources(&[("a.sdoc", ROOT)]);

        assert!(reference_errors(&index).is_empty());
        assert!(
            index
                .query_trace("REQ-ROOT", Direction::Backward)
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn unresolved_reference_is_reported_once() {
        let index = load_sources(&[("a.sdoc", ROOT), ("b.sdoc", BRAKES), ("c.sdoc", DANGLING)]);

        let errors = reference_errors(&index);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code, DiagnosticCode::UnresolvedReference);
        assert_eq!(errors[0].location.node().unwrap().as_str(), "REQ-C");
        assert_eq!(index.diagnostics_for_node("REQ-C").len(), 1);

        let broken = index.broken_links();
        assert_eq!(broken.len(), 1);
        assert_eq!(broken[0].target.as_str(), "REQ-9");
        assert!(!broken[0].ambiguous);
    }

    #[test]
    fn duplicate_identifiers_across_documents_flag_both_holders() {
        let index = load_sources(&[("a.sdoc", ROOT), ("a2.sdoc", ROOT), ("b.sdoc", BRAKES)]);

        let duplicates: Vec<_> = index
            .diagnostics()
            .with_code(DiagnosticCode::DuplicateId)
            .map(|diagnostic| diagnostic.location.document().to_string())
            .collect();
        assert_eq!(duplicates, ["a.sdoc", "a2.sdoc"]);

        assert_eq!(
            index.node("REQ-ROOT"),
            Err(IndexError::Ambiguous("REQ-ROOT".to_string()))
        );
        assert_eq!(index.nodes_with_id("REQ-ROOT").len(), 2);
        assert_eq!(
            index
                .diagnostics()
                .with_code(DiagnosticCode::AmbiguousReference)
                .count(),
            1
        );
    }

    #[test]
    fn repeated_document_keeps_first_copy() {
        let index = load_sources(&[("a.sdoc", ROOT), ("a.sdoc", BRAKES)]);

        assert_eq!(index.documents().len(), 1);
        assert!(index.node("REQ-ROOT").is_ok());
        assert!(index.node("REQ-1").is_err());
        assert_eq!(
            index
                .diagnostics()
                .with_code(DiagnosticCode::DuplicateDocument)
                .count(),
            1
        );
    }

    #[test]
    fn forward_trace_lists_children_then_references() {
        let source = "\
[DOCUMENT]
TITLE: Nested

[REQUIREMENT]
UID: REQ-ROOT

[[REQUIREMENT]]
UID: REQ-1
PARENT:
- REQ-ROOT

[REQUIREMENT]
UID: REQ-2

[[/REQUIREMENT]]
";
        let index = load_sources(&[("n.sdoc", source)]);

        let forward = index.query_trace("REQ-1", Direction::Forward).unwrap();
        assert_eq!(ids(&forward), ["REQ-2", "REQ-ROOT"]);

        let traces = index
            .query_trace_kind("REQ-1", Direction::Forward, &LinkKind::TracesTo)
            .unwrap();
        assert_eq!(ids(&traces), ["REQ-ROOT"]);

        let hierarchy = index
            .query_trace_kind("REQ-2", Direction::Backward, &LinkKind::ParentOf)
            .unwrap();
        assert_eq!(ids(&hierarchy), ["REQ-1"]);

        assert!(index.coverage("REQ-1", &LinkKind::TracesTo).unwrap());
        assert!(index.coverage("REQ-1", &LinkKind::ParentOf).unwrap());
        assert!(!index.coverage("REQ-ROOT", &LinkKind::TracesTo).unwrap());
    }

    #[test]
    fn backward_trace_follows_declaration_order() {
        let source = "\
[DOCUMENT]
TITLE: Order

[REQUIREMENT]
UID: REQ-B
PARENT:
- REQ-ROOT

[REQUIREMENT]
UID: REQ-A
PARENT:
- REQ-ROOT
";
        let index = load_sources(&[("a.sdoc", ROOT), ("o.sdoc", source)]);

        let backward = index.query_trace("REQ-ROOT", Direction::Backward).unwrap();
        assert_eq!(ids(&backward), ["REQ-B", "REQ-A"]);
    }

    const LOOP: &str = "\
[DOCUMENT]
TITLE: Loop

[REQUIREMENT]
UID: REQ-X
PARENT:
- REQ-Y

[REQUIREMENT]
UID: REQ-Y
PARENT:
- REQ-X
";

    const DUPLICATES: &str = "\
[DOCUMENT]
TITLE: Duplicates

[GRAMMAR]
ELEMENTS:
- TAG: REQUIREMENT
  FIELDS:
  - TITLE: UID
    TYPE: String
  - TITLE: SAME_AS
    TYPE: Reference(Duplicates)
    MULTIPLICITY: Many

[REQUIREMENT]
UID: D-1
SAME_AS:
- D-2

[REQUIREMENT]
UID: D-2
SAME_AS:
- D-1
";

    #[test]
    fn trace_cycles_are_reported_and_warned() {
        let index = load_sources(&[("loop.sdoc", LOOP)]);

        let cycles = index.detect_cycles(&LinkKind::TracesTo);
        assert_eq!(cycles.len(), 1);
        let members: Vec<_> = cycles[0].nodes.iter().map(NodeId::as_str).collect();
        assert_eq!(members, ["REQ-X", "REQ-Y"]);

        let warnings: Vec<_> = index
            .diagnostics()
            .with_code(DiagnosticCode::TraceCycle)
            .cloned()
            .collect();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].message, "TracesTo links form a cycle: REQ-X -> REQ-Y -> REQ-X");
        assert!(index.detect_cycles(&LinkKind::ParentOf).is_empty());
    }

    #[test]
    fn permitted_cycles_are_not_warned() {
        let index = load_sources(&[("dup.sdoc", DUPLICATES)]);

        assert_eq!(index.detect_cycles(&LinkKind::Duplicates).len(), 1);
        assert!(index.diagnostics().is_empty());
    }

    fn fail_fast_source(fix_first: bool) -> String {
        let mut lines: Vec<String> = [
            "[DOCUMENT]",
            "TITLE: Fail fast",
            "",
            "[REQUIREMENT]",
            "UID: REQ-1",
            "TITLE: One",
            "",
            "[REQUIREMENT]",
            "UID: REQ-2",
            "TITLE Two",
        ]
        .map(String::from)
        .to_vec();
        let mut n = 3;
        while lines.len() < 40 {
            lines.push(String::new());
            lines.push("[REQUIREMENT]".to_string());
            lines.push(format!("UID: REQ-{n}"));
            n += 1;
        }
        lines[39] = "TITLE Twelve".to_string();
        if fix_first {
            lines[9] = "TITLE: Two".to_string();
        }
        lines.join("\n") + "\n"
    }

    #[test_case(false, 10; "first error")]
    #[test_case(true, 40; "second error after fixing the first")]
    fn syntax_errors_surface_one_at_a_time(fix_first: bool, line: usize) {
        let source = fail_fast_source(fix_first);
        let index = load_sources(&[("ff.sdoc", source.as_str()), ("a.sdoc", ROOT)]);

        let errors: Vec<_> = index
            .diagnostics()
            .with_code(DiagnosticCode::Syntax)
            .cloned()
            .collect();
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0].location, Location::Source { line: l, .. } if l == line));

        // the malformed document is left out; the other one is unaffected
        assert_eq!(index.documents().len(), 1);
        assert!(index.node("REQ-ROOT").is_ok());
    }

    #[test]
    fn sequential_and_parallel_loads_agree() {
        let sources: Vec<Source> = [("a.sdoc", ROOT), ("b.sdoc", BRAKES), ("c.sdoc", DANGLING)]
            .iter()
            .map(|(document, text)| Source::new(DocumentId::new(*document).unwrap(), *text))
            .collect();
        let mut sequential = Config::default();
        sequential.parallel = false;

        let a = ProjectIndex::load(&sources, &sequential);
        let b = ProjectIndex::load(&sources, &Config::default());

        assert_eq!(a.diagnostics(), b.diagnostics());
        assert_eq!(ids(&a.nodes()), ids(&b.nodes()));
    }

    #[test]
    fn field_value_falls_back_to_schema_default() {
        let source = "\
[DOCUMENT]
TITLE: Defaults

[GRAMMAR]
ELEMENTS:
- TAG: REQUIREMENT
  FIELDS:
  - TITLE: UID
    TYPE: String
  - TITLE: PRIORITY
    TYPE: Number
    DEFAULT: 3

[REQUIREMENT]
UID: REQ-1
";
        let index = load_sources(&[("d.sdoc", source)]);

        assert_eq!(index.node("REQ-1").unwrap().value("PRIORITY"), None);
        assert_eq!(
            index.field_value("REQ-1", "PRIORITY").unwrap(),
            Some(FieldValue::from("3"))
        );
    }

    #[test]
    fn serializes_indexed_documents_verbatim() {
        let index = load_sources(&[("b.sdoc", BRAKES)]);
        let document = DocumentId::new("b.sdoc").unwrap();
        assert_eq!(index.serialize_document(&document).unwrap(), BRAKES);
    }
}
