//! Field and structural edits.
//!
//! Every edit is validated completely before anything is touched, so a
//! rejected edit leaves the index exactly as it was.

use std::{
    collections::{BTreeSet, HashSet},
    sync::Arc,
};

use parking_lot::FairMutex;
use tracing::instrument;

use super::{
    IndexDelta, IndexError, ProjectIndex, Structure, references, refresh_cycles, refresh_links,
    register_links,
};
use crate::{
    domain::{
        Diagnostic, DiagnosticCode, DocumentId, ErrorClass, FieldValue, Location, NodeId, NodeKey,
        Schema,
        node::{BlockStyle, Field, FieldLayout, Layout, LineEnding, Node},
        schema::{FieldDescriptor, IDENTIFIER_FIELD},
    },
    syntax::check_representable,
};

/// Why an edit was rejected. A rejected edit changes nothing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EditError {
    /// No node has the identifier.
    #[error("no node with identifier '{0}'")]
    NotFound(String),
    /// Several nodes have the identifier, so the target is unclear.
    #[error("identifier '{0}' is held by more than one node")]
    Ambiguous(String),
    /// No document has the identifier.
    #[error("no document '{0}'")]
    DocumentNotFound(String),
    /// The node changed since the caller last read it.
    #[error("'{node}' is at version {actual}, not {expected}")]
    Conflict {
        /// The node.
        node: NodeId,
        /// The version the caller based the edit on.
        expected: u64,
        /// The current version.
        actual: u64,
    },
    /// The new identifier is already held by a node.
    #[error("identifier '{0}' is already in use")]
    IdentifierTaken(NodeId),
    /// The result would not match the schema.
    #[error("{}", summary(.0))]
    Violation(Vec<Diagnostic>),
    /// The move would place a node under itself.
    #[error("'{node}' cannot be moved under its own descendant '{parent}'")]
    StructuralCycle {
        /// The node being moved.
        node: NodeId,
        /// The requested parent.
        parent: NodeId,
    },
    /// The requested parent cannot hold the node.
    #[error("'{parent}' cannot be the parent: {reason}")]
    InvalidParent {
        /// The requested parent.
        parent: NodeId,
        /// Why not.
        reason: &'static str,
    },
}

fn summary(violations: &[Diagnostic]) -> String {
    let messages: Vec<String> = violations.iter().map(ToString::to_string).collect();
    format!("edit rejected: {}", messages.join("; "))
}

impl EditError {
    /// The error family.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::Conflict { .. } | Self::IdentifierTaken(_) => ErrorClass::EditConflict,
            Self::Violation(_) | Self::InvalidParent { .. } => ErrorClass::SchemaViolation,
            Self::StructuralCycle { .. } => ErrorClass::StructuralCycleError,
            Self::NotFound(_) | Self::Ambiguous(_) | Self::DocumentNotFound(_) => {
                ErrorClass::ReferenceError
            }
        }
    }
}

impl From<IndexError> for EditError {
    fn from(error: IndexError) -> Self {
        match error {
            IndexError::NotFound(id) => Self::NotFound(id),
            IndexError::Ambiguous(id) => Self::Ambiguous(id),
            IndexError::DocumentNotFound(id) => Self::DocumentNotFound(id),
        }
    }
}

/// A node to insert with [`ProjectIndex::insert_node`].
///
/// ```
/// use sdoc::{DocumentId, NewNode};
///
/// let node = NewNode::new(DocumentId::new("brakes.sdoc").unwrap(), "REQUIREMENT")
///     .under("REQ-ROOT")
///     .at(0)
///     .with_field("UID", "REQ-7")
///     .with_field("TITLE", "Parking brake");
/// # let _ = node;
/// ```
#[derive(Debug, Clone)]
pub struct NewNode {
    document: DocumentId,
    kind: String,
    parent: Option<String>,
    position: Option<usize>,
    composite: bool,
    fields: Vec<(String, FieldValue)>,
}

impl NewNode {
    /// A node of `kind` at the end of the document's top level.
    #[must_use]
    pub fn new(document: DocumentId, kind: impl Into<String>) -> Self {
        Self {
            document,
            kind: kind.into(),
            parent: None,
            position: None,
            composite: false,
            fields: Vec::new(),
        }
    }

    /// Places the node under the container with the given identifier.
    #[must_use]
    pub fn under(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Places the node at a position among its siblings (clamped to the end).
    #[must_use]
    pub const fn at(mut self, position: usize) -> Self {
        self.position = Some(position);
        self
    }

    /// Writes the node as a `[[KIND]]` container rather than a leaf.
    #[must_use]
    pub const fn composite(mut self) -> Self {
        self.composite = true;
        self
    }

    /// Adds a field.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    fn build(
        self,
        key: NodeKey,
        id: NodeId,
        parent: Option<NodeKey>,
        schema: &Schema,
        line_ending: LineEnding,
    ) -> Node {
        let style = if self.kind == "SECTION" {
            BlockStyle::Section
        } else if self.composite {
            BlockStyle::Composite
        } else {
            BlockStyle::Leaf
        };
        let definition = schema.kind(&self.kind);
        let mut fields: Vec<Field> = self
            .fields
            .into_iter()
            .map(|(name, value)| Field::new(name, value))
            .collect();
        fields.sort_by_key(|field| {
            definition
                .and_then(|definition| definition.position(field.name()))
                .unwrap_or(usize::MAX)
        });

        Node {
            key,
            id,
            kind: self.kind,
            style,
            document: self.document,
            fields,
            children: Vec::new(),
            parent,
            span: None,
            version: 1,
            layout: Layout::fresh(line_ending),
        }
    }
}

impl ProjectIndex {
    /// Sets a field of a node.
    ///
    /// `expected_version` is the version the caller last read; if the node
    /// has changed since, the edit is rejected. On success the node's version
    /// is incremented. Editing a reference field relinks the node; editing
    /// the `UID` renames it. Links that named the old identifier become
    /// broken and links anywhere that already named the new one resolve to
    /// this node. Referencing text is never rewritten.
    ///
    /// Setting a field to the value it already holds changes nothing and
    /// returns an empty delta.
    ///
    /// # Errors
    ///
    /// Returns an [`EditError`] if the node cannot be found, the version is
    /// stale, the value violates the schema, or the new identifier is taken.
    /// Nothing is changed.
    #[instrument(level = "debug", skip(self, value))]
    pub fn apply_edit(
        &self,
        id: &str,
        field: &str,
        value: impl Into<FieldValue>,
        expected_version: u64,
    ) -> Result<IndexDelta, EditError> {
        self.edit_field(id, field, Some(value.into()), expected_version)
    }

    /// Removes an optional field from a node.
    ///
    /// # Errors
    ///
    /// As for [`Self::apply_edit`]; required fields and the identifier
    /// cannot be cleared.
    #[instrument(level = "debug", skip(self))]
    pub fn clear_field(
        &self,
        id: &str,
        field: &str,
        expected_version: u64,
    ) -> Result<IndexDelta, EditError> {
        self.edit_field(id, field, None, expected_version)
    }

    fn edit_field(
        &self,
        id: &str,
        field: &str,
        value: Option<FieldValue>,
        expected_version: u64,
    ) -> Result<IndexDelta, EditError> {
        let structure = self.structure.read();
        let key = self.locate(id)?;
        let cell = structure
            .nodes
            .get(&key)
            .ok_or_else(|| EditError::NotFound(id.to_string()))?;
        let mut node = cell.lock();

        // renamed while we waited for the lock
        if node.id().as_str() != id {
            return Err(EditError::NotFound(id.to_string()));
        }
        check_version(&node, expected_version)?;

        let schema = structure
            .schema(node.document())
            .ok_or_else(|| EditError::DocumentNotFound(node.document().to_string()))?;
        let descriptor = check_field(&node, schema, field, value.as_ref())?;

        if node.value(field) == value.as_ref() {
            return Ok(IndexDelta::default());
        }

        match value {
            Some(value) if descriptor.is_identifier() => self.rename(&mut node, schema, value),
            value => Ok(self.set_field(&mut node, schema, &descriptor, value)),
        }
    }

    fn set_field(
        &self,
        node: &mut Node,
        schema: &Schema,
        descriptor: &FieldDescriptor,
        value: Option<FieldValue>,
    ) -> IndexDelta {
        let field = descriptor.name();
        let targets: Vec<NodeId> = value
            .iter()
            .flat_map(FieldValue::items)
            .filter_map(|item| item.trim().parse().ok())
            .collect();

        write_field(node, schema, field, value);
        node.version += 1;

        let mut delta = IndexDelta::default();
        delta.changed.insert(node.id().clone());

        if let Some(kind) = descriptor.link_kind() {
            let key = node.key();
            let ids = self.ids.read();
            let mut links = self.links.lock();

            let targets = targets
                .into_iter()
                .map(|target| {
                    let resolved = ids.resolve(&target).key();
                    (target, resolved)
                })
                .collect();
            let retargeted = links.replace_field(key, field, kind, targets);
            delta.changed.extend(
                retargeted
                    .iter()
                    .filter_map(|target| ids.name(*target).cloned()),
            );

            let mut diagnostics = self.diagnostics.lock();
            refresh_links([key], &ids, &links, &mut diagnostics);
            if !retargeted.is_empty() {
                refresh_cycles(
                    Some(&BTreeSet::from([key])),
                    &ids,
                    &links,
                    &self.config,
                    &mut diagnostics,
                    &mut self.cycles.lock(),
                );
            }
        }

        tracing::debug!(node = %node.id(), field, version = node.version(), "field edited");
        delta
    }

    fn rename(
        &self,
        node: &mut Node,
        schema: &Schema,
        value: FieldValue,
    ) -> Result<IndexDelta, EditError> {
        let new_id: NodeId = value
            .as_str()
            .and_then(|raw| raw.trim().parse().ok())
            .ok_or_else(|| {
                violation(
                    node,
                    IDENTIFIER_FIELD,
                    DiagnosticCode::InvalidValue,
                    "the identifier must be a single valid identifier".to_string(),
                )
            })?;

        let key = node.key();
        let mut ids = self.ids.write();
        if ids.contains(&new_id) {
            return Err(EditError::IdentifierTaken(new_id));
        }

        let old_id = node.id().clone();
        write_field(node, schema, IDENTIFIER_FIELD, Some(value));
        node.id = new_id.clone();
        node.version += 1;
        ids.rename(key, new_id.clone());

        let mut links = self.links.lock();
        let mut touched: BTreeSet<NodeKey> = BTreeSet::from([key]);
        touched.extend(ids.keys(&old_id));
        for target in [&old_id, &new_id] {
            let resolution = ids.resolve(target).key();
            touched.extend(
                links
                    .retarget(target, resolution)
                    .into_iter()
                    .map(|record| record.source),
            );
        }

        let mut neighbours: BTreeSet<NodeKey> = touched.clone();
        neighbours.extend(node.parent());
        neighbours.extend(node.children());
        neighbours.extend(links.outgoing(key).filter_map(|record| record.resolved));
        neighbours.extend(links.incoming(key).map(|record| record.source));

        let mut delta = IndexDelta::default();
        delta.changed.insert(new_id.clone());
        delta.changed.extend(
            neighbours
                .iter()
                .filter(|&&neighbour| neighbour != key)
                .filter_map(|neighbour| ids.name(*neighbour).cloned()),
        );
        delta.removed.insert(old_id.clone());

        let mut diagnostics = self.diagnostics.lock();
        diagnostics.rename_node(node.document(), &old_id, &new_id);
        refresh_links(touched.iter().copied(), &ids, &links, &mut diagnostics);
        refresh_cycles(
            Some(&touched),
            &ids,
            &links,
            &self.config,
            &mut diagnostics,
            &mut self.cycles.lock(),
        );

        tracing::info!(old = %old_id, new = %new_id, "node renamed");
        Ok(delta)
    }

    /// Inserts a new node.
    ///
    /// The node gets version 1 and is written in canonical layout when its
    /// document is serialized. Links anywhere that named its identifier
    /// resolve to it.
    ///
    /// # Errors
    ///
    /// Returns an [`EditError`] if the document or parent cannot be found,
    /// the parent is a leaf or belongs to another document, the fields do not
    /// match the schema (every violation is reported), or the identifier is
    /// taken.
    #[instrument(level = "debug", skip_all, fields(document = %new.document, kind = %new.kind))]
    pub fn insert_node(&self, new: NewNode) -> Result<(NodeId, IndexDelta), EditError> {
        let mut guard = self.structure.write();
        let structure = &mut *guard;

        let found = structure
            .documents
            .get(&new.document)
            .ok_or_else(|| EditError::DocumentNotFound(new.document.to_string()))?;
        let schema = Arc::clone(found.schema());
        let line_ending = found.line_ending;

        let authored: Option<NodeId> = new
            .fields
            .iter()
            .find(|(name, _)| name == IDENTIFIER_FIELD)
            .and_then(|(_, value)| value.as_str())
            .and_then(|raw| raw.trim().parse().ok());
        let label = authored
            .clone()
            .unwrap_or_else(|| found.upcoming_synthetic_id());
        check_new_fields(&new.document, &label, &schema, &new.kind, &new.fields)?;

        let parent = match &new.parent {
            Some(parent) => Some(structure.container(self.locate(parent)?, parent, &new.document)?),
            None => None,
        };

        let mut ids = self.ids.write();
        if let Some(id) = &authored {
            if ids.contains(id) {
                return Err(EditError::IdentifierTaken(id.clone()));
            }
        }
        let id = authored.unwrap_or_else(|| found.next_synthetic_id());

        let key = NodeKey::new();
        let position = new.position;
        let node = new.build(key, id.clone(), parent, &schema, line_ending);
        let declared = references(&node, &schema);
        let document = node.document().clone();

        structure.nodes.insert(key, FairMutex::new(node));
        structure.attach(key, parent, position, &document);
        let parent_id = parent.and_then(|parent| structure.bump(parent));
        ids.insert(key, id.clone(), document);

        let mut links = self.links.lock();
        let targets = register_links(key, declared, &ids, &mut links);
        let repaired: BTreeSet<NodeKey> = links
            .retarget(&id, ids.resolve(&id).key())
            .into_iter()
            .map(|record| record.source)
            .collect();

        let mut delta = IndexDelta::default();
        delta.changed.insert(id.clone());
        delta.changed.extend(parent_id);
        delta.changed.extend(
            targets
                .into_iter()
                .chain(repaired.iter().copied())
                .filter_map(|neighbour| ids.name(neighbour).cloned()),
        );

        let mut seeds = repaired;
        seeds.insert(key);
        let mut diagnostics = self.diagnostics.lock();
        refresh_links(seeds.iter().copied(), &ids, &links, &mut diagnostics);
        refresh_cycles(
            Some(&seeds),
            &ids,
            &links,
            &self.config,
            &mut diagnostics,
            &mut self.cycles.lock(),
        );

        tracing::info!(node = %id, "node inserted");
        Ok((id, delta))
    }

    /// Deletes a node and its whole subtree.
    ///
    /// Links into the subtree become broken references. Diagnostics located
    /// in the deleted nodes are discarded.
    ///
    /// # Errors
    ///
    /// Returns an [`EditError`] if the node cannot be found or the version is
    /// stale.
    #[instrument(level = "debug", skip(self))]
    pub fn delete_node(&self, id: &str, expected_version: u64) -> Result<IndexDelta, EditError> {
        let mut guard = self.structure.write();
        let structure = &mut *guard;

        let key = self.locate(id)?;
        let (parent, document) = structure
            .with(key, |node| {
                check_version(node, expected_version)
                    .map(|()| (node.parent(), node.document().clone()))
            })
            .ok_or_else(|| EditError::NotFound(id.to_string()))??;

        let subtree = structure.subtree(key);
        structure.detach(key, parent, &document);
        let parent_id = parent.and_then(|parent| structure.bump(parent));

        let removed: Vec<Node> = subtree
            .iter()
            .filter_map(|key| structure.nodes.remove(key))
            .map(FairMutex::into_inner)
            .collect();

        let mut delta = self.unregister(&removed);
        delta.changed.extend(parent_id);
        tracing::info!(node = id, removed = removed.len(), "node deleted");
        Ok(delta)
    }

    /// Moves a node (with its subtree) under another container of the same
    /// document, or to the document's top level.
    ///
    /// # Errors
    ///
    /// Returns [`EditError::StructuralCycle`] if the new parent is the node
    /// itself or one of its descendants, [`EditError::InvalidParent`] if it
    /// is a leaf or belongs to another document, and the usual lookup and
    /// version errors.
    #[instrument(level = "debug", skip(self))]
    pub fn move_node(
        &self,
        id: &str,
        parent: Option<&str>,
        position: Option<usize>,
        expected_version: u64,
    ) -> Result<IndexDelta, EditError> {
        let mut guard = self.structure.write();
        let structure = &mut *guard;

        let key = self.locate(id)?;
        let (old_parent, document, node_id) = structure
            .with(key, |node| {
                check_version(node, expected_version)
                    .map(|()| (node.parent(), node.document().clone(), node.id().clone()))
            })
            .ok_or_else(|| EditError::NotFound(id.to_string()))??;

        let new_parent = match parent {
            Some(parent) => {
                let parent_key = self.locate(parent)?;
                if structure.descends_from(parent_key, key) {
                    let parent = structure
                        .with(parent_key, |node| node.id().clone())
                        .ok_or_else(|| EditError::NotFound(parent.to_string()))?;
                    return Err(EditError::StructuralCycle {
                        node: node_id,
                        parent,
                    });
                }
                Some(structure.container(parent_key, parent, &document)?)
            }
            None => None,
        };

        structure.detach(key, old_parent, &document);
        structure.attach(key, new_parent, position, &document);
        structure.with_mut(key, |node| {
            node.parent = new_parent;
            node.version += 1;
        });

        let mut delta = IndexDelta::default();
        delta.changed.insert(node_id.clone());
        let parents: BTreeSet<NodeKey> = old_parent.into_iter().chain(new_parent).collect();
        delta
            .changed
            .extend(parents.into_iter().filter_map(|parent| structure.bump(parent)));

        tracing::info!(node = %node_id, "node moved");
        Ok(delta)
    }

    /// Unloads a document, removing all of its nodes.
    ///
    /// Links from other documents into it become broken references, and
    /// every diagnostic located in it is discarded.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::DocumentNotFound`] for an unknown document.
    #[instrument(level = "debug", skip(self), fields(%document))]
    pub fn remove_document(&self, document: &DocumentId) -> Result<IndexDelta, IndexError> {
        let mut guard = self.structure.write();
        let structure = &mut *guard;

        let found = structure
            .documents
            .get(document)
            .ok_or_else(|| IndexError::DocumentNotFound(document.to_string()))?;
        let order = structure.document_order(found);
        structure.documents.shift_remove(document);

        let removed: Vec<Node> = order
            .iter()
            .filter_map(|key| structure.nodes.remove(key))
            .map(FairMutex::into_inner)
            .collect();

        let delta = self.unregister(&removed);
        self.diagnostics
            .lock()
            .discard(|diagnostic| diagnostic.location.document() == document);

        tracing::info!(removed = removed.len(), "document removed");
        Ok(delta)
    }

    /// Drops removed nodes from the identifier and link tables and updates
    /// everything that pointed at them.
    fn unregister(&self, removed: &[Node]) -> IndexDelta {
        let gone: HashSet<NodeKey> = removed.iter().map(Node::key).collect();
        let mut ids = self.ids.write();
        let mut links = self.links.lock();

        let mut delta = IndexDelta::default();
        let mut affected = BTreeSet::new();
        let mut touched = BTreeSet::new();

        for node in removed {
            ids.remove(node.key());
            affected.extend(
                links
                    .remove_source(node.key())
                    .into_iter()
                    .filter_map(|record| record.resolved),
            );
        }
        for node in removed {
            let resolution = ids.resolve(node.id()).key();
            touched.extend(
                links
                    .retarget(node.id(), resolution)
                    .into_iter()
                    .map(|record| record.source),
            );
            touched.extend(ids.keys(node.id()));
            delta.removed.insert(node.id().clone());
        }
        affected.extend(touched.iter().copied());

        delta.changed.extend(
            affected
                .iter()
                .filter(|key| !gone.contains(key))
                .filter_map(|key| ids.name(*key).cloned()),
        );

        let mut diagnostics = self.diagnostics.lock();
        for node in removed {
            diagnostics.discard(|diagnostic| located_in(diagnostic, node));
        }
        refresh_links(
            touched.iter().copied().filter(|key| !gone.contains(key)),
            &ids,
            &links,
            &mut diagnostics,
        );
        let seeds: BTreeSet<NodeKey> = touched.into_iter().chain(gone).collect();
        refresh_cycles(
            Some(&seeds),
            &ids,
            &links,
            &self.config,
            &mut diagnostics,
            &mut self.cycles.lock(),
        );

        delta
    }
}

impl Structure {
    /// Checks that `key` can hold children belonging to `document`.
    fn container(
        &self,
        key: NodeKey,
        name: &str,
        document: &DocumentId,
    ) -> Result<NodeKey, EditError> {
        let (parent_document, style, parent) = self
            .with(key, |node| {
                (node.document().clone(), node.style(), node.id().clone())
            })
            .ok_or_else(|| EditError::NotFound(name.to_string()))?;
        if &parent_document != document {
            return Err(EditError::InvalidParent {
                parent,
                reason: "it belongs to another document",
            });
        }
        if !style.is_container() {
            return Err(EditError::InvalidParent {
                parent,
                reason: "leaf nodes cannot hold children",
            });
        }
        Ok(key)
    }

    /// Whether `key` is `ancestor` or lies beneath it.
    fn descends_from(&self, key: NodeKey, ancestor: NodeKey) -> bool {
        let mut cursor = Some(key);
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            cursor = self.with(current, Node::parent).flatten();
        }
        false
    }

    fn attach(
        &mut self,
        key: NodeKey,
        parent: Option<NodeKey>,
        position: Option<usize>,
        document: &DocumentId,
    ) {
        match parent {
            Some(parent) => {
                self.with_mut(parent, |parent| {
                    insert_at(&mut parent.children, position, key);
                });
            }
            None => {
                if let Some(found) = self.documents.get_mut(document) {
                    insert_at(&mut found.roots, position, key);
                }
            }
        }
    }

    fn detach(&mut self, key: NodeKey, parent: Option<NodeKey>, document: &DocumentId) {
        match parent {
            Some(parent) => {
                self.with_mut(parent, |parent| parent.children.retain(|child| *child != key));
            }
            None => {
                if let Some(found) = self.documents.get_mut(document) {
                    found.roots.retain(|root| *root != key);
                }
            }
        }
    }

    /// Records a structural change to a container.
    fn bump(&self, key: NodeKey) -> Option<NodeId> {
        self.with_mut(key, |node| {
            node.version += 1;
            node.id().clone()
        })
    }
}

fn check_version(node: &Node, expected_version: u64) -> Result<(), EditError> {
    if node.version() == expected_version {
        Ok(())
    } else {
        Err(EditError::Conflict {
            node: node.id().clone(),
            expected: expected_version,
            actual: node.version(),
        })
    }
}

fn violation(node: &Node, field: &str, code: DiagnosticCode, message: String) -> EditError {
    EditError::Violation(vec![Diagnostic::error(
        code,
        message,
        Location::Node {
            document: node.document().clone(),
            node: node.id().clone(),
            field: Some(field.to_string()),
        },
    )])
}

/// Checks that `value` may be written to `field`, or the field cleared.
fn check_field(
    node: &Node,
    schema: &Schema,
    field: &str,
    value: Option<&FieldValue>,
) -> Result<FieldDescriptor, EditError> {
    let definition = schema.kind(node.kind()).ok_or_else(|| {
        violation(
            node,
            field,
            DiagnosticCode::UnknownKind,
            format!("node kind '{}' is not defined", node.kind()),
        )
    })?;
    let descriptor = definition.field(field).ok_or_else(|| {
        violation(
            node,
            field,
            DiagnosticCode::UnknownField,
            format!("'{}' has no field '{field}'", node.kind()),
        )
    })?;

    match value {
        Some(value) => {
            let layout = FieldLayout::preferred(value, node.field(field).map(Field::layout));
            descriptor
                .check(value, layout)
                .and_then(|()| check_representable(value, layout))
                .map_err(|error| {
                    violation(node, field, DiagnosticCode::InvalidValue, error.to_string())
                })?;
        }
        None if descriptor.is_identifier() => {
            return Err(violation(
                node,
                field,
                DiagnosticCode::InvalidValue,
                "the identifier cannot be cleared".to_string(),
            ));
        }
        None if descriptor.is_mandatory() => {
            return Err(violation(
                node,
                field,
                DiagnosticCode::MissingField,
                format!("'{field}' is required"),
            ));
        }
        None => {}
    }
    Ok(descriptor.clone())
}

/// Checks the fields of a node to be inserted, reporting every violation.
fn check_new_fields(
    document: &DocumentId,
    label: &NodeId,
    schema: &Schema,
    kind: &str,
    fields: &[(String, FieldValue)],
) -> Result<(), EditError> {
    let at = |field: Option<&str>| Location::Node {
        document: document.clone(),
        node: label.clone(),
        field: field.map(str::to_string),
    };

    let Some(definition) = schema.kind(kind) else {
        return Err(EditError::Violation(vec![Diagnostic::error(
            DiagnosticCode::UnknownKind,
            format!("node kind '{kind}' is not defined"),
            at(None),
        )]));
    };

    let mut violations = Vec::new();
    let mut seen = HashSet::new();
    for (name, value) in fields {
        let Some(descriptor) = definition.field(name) else {
            violations.push(Diagnostic::error(
                DiagnosticCode::UnknownField,
                format!("'{kind}' has no field '{name}'"),
                at(Some(name)),
            ));
            continue;
        };
        if !seen.insert(name.as_str()) {
            violations.push(Diagnostic::error(
                DiagnosticCode::DuplicateField,
                format!("'{name}' is given more than once"),
                at(Some(name)),
            ));
            continue;
        }
        let layout = FieldLayout::preferred(value, None);
        if let Err(error) = descriptor
            .check(value, layout)
            .and_then(|()| check_representable(value, layout))
        {
            violations.push(Diagnostic::error(
                DiagnosticCode::InvalidValue,
                error.to_string(),
                at(Some(name)),
            ));
        }
    }
    for descriptor in definition.fields() {
        if descriptor.is_mandatory() && !seen.contains(descriptor.name()) {
            violations.push(Diagnostic::error(
                DiagnosticCode::MissingField,
                format!("'{}' is required", descriptor.name()),
                at(Some(descriptor.name())),
            ));
        }
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(EditError::Violation(violations))
    }
}

/// Writes (or with `None`, removes) a field. A new field is placed by its
/// position in the schema.
fn write_field(node: &mut Node, schema: &Schema, name: &str, value: Option<FieldValue>) {
    let Some(value) = value else {
        node.fields.retain(|field| field.name() != name);
        return;
    };
    if let Some(field) = node.field_mut(name) {
        field.set_value(value);
        return;
    }

    let definition = schema.kind(&node.kind);
    let rank = |field: &str| {
        definition
            .and_then(|definition| definition.position(field))
            .unwrap_or(usize::MAX)
    };
    let target = rank(name);
    let at = node
        .fields
        .iter()
        .position(|field| rank(field.name()) > target)
        .unwrap_or(node.fields.len());
    node.fields.insert(at, Field::new(name, value));
}

fn insert_at(keys: &mut Vec<NodeKey>, position: Option<usize>, key: NodeKey) {
    let at = position.map_or(keys.len(), |position| position.min(keys.len()));
    keys.insert(at, key);
}

/// Whether a diagnostic is attached to a node or lies within its source
/// lines.
fn located_in(diagnostic: &Diagnostic, node: &Node) -> bool {
    match &diagnostic.location {
        Location::Node { document, node: id, .. } => {
            document == node.document() && id == node.id()
        }
        Location::Source { document, line, .. } => node.span().is_some_and(|span| {
            *document == span.document && (span.start_line..=span.end_line).contains(line)
        }),
    }
}
