//! Turning a [`SyntaxTree`] into a typed, addressable [`NodeTree`].
//!
//! Blocks become [`Node`]s keyed by a fresh [`NodeKey`]. Nesting becomes
//! parent/child edges, in document order. The hierarchy is checked for
//! cycles and identifiers are checked for uniqueness within the document
//! before anything is built.

use std::{
    collections::HashMap,
    sync::atomic::AtomicUsize,
};

use indexmap::IndexMap;
use tracing::instrument;

use crate::{
    domain::{
        Document, DocumentId, NodeId,
        diagnostics::{Diagnostic, DiagnosticCode, Diagnostics, Location},
        node::{Field, Layout, LineEnding, Node, NodeKey, SourceSpan},
        schema::IDENTIFIER_FIELD,
    },
    graph,
    syntax::{SyntaxBlock, SyntaxField, SyntaxTree, write_document},
};

/// The nodes of one document, in document order.
#[derive(Debug, Clone)]
pub struct NodeTree {
    document: Document,
    nodes: IndexMap<NodeKey, Node>,
}

/// Errors that make a syntax tree unusable as a node tree.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TreeError {
    /// A block names a parent index outside the tree.
    #[error("{document}: block {block} names missing parent block {parent}")]
    DanglingParent {
        /// The document.
        document: DocumentId,
        /// Index of the offending block.
        block: usize,
        /// The parent index it names.
        parent: usize,
    },
    /// A block is nested inside a block that cannot hold children.
    #[error("{document}: block {block} is nested in leaf block {parent}")]
    LeafParent {
        /// The document.
        document: DocumentId,
        /// Index of the offending block.
        block: usize,
        /// Index of the leaf it is nested in.
        parent: usize,
    },
    /// The parent/child relation contains a cycle.
    #[error("{document}: hierarchy cycle through blocks {blocks:?}")]
    StructuralCycle {
        /// The document.
        document: DocumentId,
        /// Indices of the blocks on the cycle.
        blocks: Vec<usize>,
    },
    /// Two nodes of the document share an identifier.
    #[error("{document}: identifier '{id}' is used by more than one node")]
    DuplicateId {
        /// The document.
        document: DocumentId,
        /// The repeated identifier.
        id: NodeId,
    },
}

impl NodeTree {
    /// The document the nodes belong to.
    #[must_use]
    pub const fn document(&self) -> &Document {
        &self.document
    }

    /// Nodes in document order (parents before children).
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Looks up a node by key.
    #[must_use]
    pub fn node(&self, key: NodeKey) -> Option<&Node> {
        self.nodes.get(&key)
    }

    /// Looks up a node by identifier.
    #[must_use]
    pub fn find(&self, id: &str) -> Option<&Node> {
        self.nodes.values().find(|node| node.id().as_str() == id)
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the document has no content blocks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Writes the document back to SDoc text.
    ///
    /// Without edits the result is the original source, byte for byte.
    #[must_use]
    pub fn to_source(&self) -> String {
        write_document(&self.document, |key| self.nodes.get(&key))
    }

    pub(crate) fn into_parts(self) -> (Document, IndexMap<NodeKey, Node>) {
        (self.document, self.nodes)
    }
}

/// Builds the node tree of one document.
///
/// Nodes without a `UID` receive synthetic identifiers, numbered from 1 in
/// document order.
///
/// # Errors
///
/// Returns a [`TreeError`] if the hierarchy is malformed or cyclic, or if an
/// identifier is used twice within the document. The error is also recorded
/// in `diagnostics`, along with every other repeated identifier.
#[instrument(level = "debug", skip_all, fields(document = %syntax.document))]
pub fn build_tree(
    syntax: SyntaxTree,
    diagnostics: &mut Diagnostics,
) -> Result<NodeTree, TreeError> {
    let SyntaxTree {
        document,
        schema,
        preamble,
        header,
        blocks,
        trailing,
        final_newline,
        line_count,
    } = syntax;

    check_hierarchy(&document, &blocks, diagnostics)?;
    let line_ending = LineEnding::detect(&preamble);

    let mut ordinal = 0;
    let ids: Vec<NodeId> = blocks
        .iter()
        .map(|block| {
            authored_id(&block.fields).unwrap_or_else(|| {
                ordinal += 1;
                NodeId::synthetic(&document, ordinal)
            })
        })
        .collect();

    check_unique(&document, &blocks, &ids, diagnostics)?;

    let keys: Vec<NodeKey> = blocks.iter().map(|_| NodeKey::new()).collect();
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); blocks.len()];
    let mut roots = Vec::new();
    for (index, block) in blocks.iter().enumerate() {
        match block.parent {
            Some(parent) => children[parent].push(index),
            None => roots.push(index),
        }
    }

    let mut built: Vec<Option<Node>> = blocks
        .into_iter()
        .zip(ids)
        .enumerate()
        .map(|(index, (block, id))| {
            Some(Node {
                key: keys[index],
                id,
                kind: block.kind,
                style: block.style,
                document: document.clone(),
                fields: block.fields.into_iter().map(parsed_field).collect(),
                children: children[index].iter().map(|&child| keys[child]).collect(),
                parent: block.parent.map(|parent| keys[parent]),
                span: Some(SourceSpan {
                    document: document.clone(),
                    start_line: block.start_line,
                    end_line: block.end_line,
                }),
                version: 1,
                layout: Layout {
                    marker: Some(block.marker),
                    leading: block.leading,
                    closing: block.closing,
                    line_ending,
                },
            })
        })
        .collect();

    let mut nodes = IndexMap::with_capacity(built.len());
    let mut stack: Vec<usize> = roots.iter().rev().copied().collect();
    while let Some(index) = stack.pop() {
        if let Some(node) = built[index].take() {
            nodes.insert(node.key, node);
        }
        stack.extend(children[index].iter().rev().copied());
    }

    let document = Document {
        header: header.into_iter().map(parsed_field).collect(),
        schema,
        roots: roots.iter().map(|&index| keys[index]).collect(),
        span: SourceSpan {
            document: document.clone(),
            start_line: 1,
            end_line: line_count.max(1),
        },
        preamble,
        trailing,
        final_newline,
        line_ending,
        next_ordinal: AtomicUsize::new(ordinal + 1),
        id: document,
    };

    tracing::debug!(nodes = nodes.len(), "node tree built");
    Ok(NodeTree { document, nodes })
}

fn parsed_field(field: SyntaxField) -> Field {
    Field::parsed(field.name, field.value, field.layout, field.raw)
}

fn authored_id(fields: &[SyntaxField]) -> Option<NodeId> {
    fields
        .iter()
        .find(|field| field.name == IDENTIFIER_FIELD)
        .and_then(|field| field.value.as_str())
        .and_then(|value| value.trim().parse().ok())
}

fn check_hierarchy(
    document: &DocumentId,
    blocks: &[SyntaxBlock],
    diagnostics: &mut Diagnostics,
) -> Result<(), TreeError> {
    for (index, block) in blocks.iter().enumerate() {
        let Some(parent) = block.parent else {
            continue;
        };
        let error = match blocks.get(parent) {
            None => TreeError::DanglingParent {
                document: document.clone(),
                block: index,
                parent,
            },
            Some(container) if !container.style.is_container() => TreeError::LeafParent {
                document: document.clone(),
                block: index,
                parent,
            },
            Some(_) => continue,
        };
        diagnostics.push(Diagnostic::error(
            DiagnosticCode::Syntax,
            error.to_string(),
            at(document, block.start_line),
        ));
        return Err(error);
    }

    let cycle = graph::find_cycle(0..blocks.len(), |index| {
        blocks[index].parent.into_iter().collect()
    });
    if let Some(cycle) = cycle {
        let line = cycle.first().map_or(1, |&index| blocks[index].start_line);
        let error = TreeError::StructuralCycle {
            document: document.clone(),
            blocks: cycle,
        };
        diagnostics.push(Diagnostic::error(
            DiagnosticCode::StructuralCycle,
            error.to_string(),
            at(document, line),
        ));
        return Err(error);
    }

    Ok(())
}

fn check_unique(
    document: &DocumentId,
    blocks: &[SyntaxBlock],
    ids: &[NodeId],
    diagnostics: &mut Diagnostics,
) -> Result<(), TreeError> {
    let mut first_use: HashMap<&NodeId, usize> = HashMap::new();
    let mut error = None;

    for (index, id) in ids.iter().enumerate() {
        let Some(&first) = first_use.get(id) else {
            first_use.insert(id, index);
            continue;
        };
        let line = blocks[index]
            .fields
            .iter()
            .find(|field| field.name == IDENTIFIER_FIELD)
            .map_or(blocks[index].start_line, |field| field.line);
        diagnostics.push(Diagnostic::error(
            DiagnosticCode::DuplicateLocalId,
            format!(
                "identifier '{id}' is already used on line {}",
                blocks[first].start_line
            ),
            at(document, line),
        ));
        error.get_or_insert_with(|| TreeError::DuplicateId {
            document: document.clone(),
            id: id.clone(),
        });
    }

    error.map_or(Ok(()), Err)
}

fn at(document: &DocumentId, line: usize) -> Location {
    Location::Source {
        document: document.clone(),
        line,
        column: 1,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        domain::{
            node::{BlockStyle, FieldLayout, FieldValue},
            schema::Schema,
        },
        syntax::{parse_document, resolve_schema},
    };

    const SOURCE: &str = "\
[DOCUMENT]
TITLE: Brakes

[SECTION]
TITLE: Scope

[REQUIREMENT]
UID: REQ-1
TITLE: Brake system

[TEXT]
STATEMENT: Informative.

[/SECTION]

[REQUIREMENT]
UID: REQ-2
PARENT:
- REQ-1
";

    fn syntax(source: &str) -> SyntaxTree {
        let document = DocumentId::new("brakes.sdoc").unwrap();
        let mut diagnostics = Diagnostics::new();
        let schema = resolve_schema(source, &document, &mut diagnostics).unwrap();
        parse_document(source, &document, &schema, &mut diagnostics).unwrap()
    }

    fn block(kind: &str, style: BlockStyle, parent: Option<usize>) -> SyntaxBlock {
        SyntaxBlock {
            kind: kind.to_string(),
            style,
            marker: format!("[{kind}]\n"),
            fields: Vec::new(),
            leading: "\n".to_string(),
            closing: None,
            parent,
            start_line: 1,
            end_line: 1,
        }
    }

    fn crafted(blocks: Vec<SyntaxBlock>) -> SyntaxTree {
        SyntaxTree {
            document: DocumentId::new("crafted.sdoc").unwrap(),
            schema: Arc::new(Schema::default()),
            preamble: "[DOCUMENT]\nTITLE: T\n".to_string(),
            header: Vec::new(),
            blocks,
            trailing: String::new(),
            final_newline: true,
            line_count: 2,
        }
    }

    /// Kind, identifier, depth and field values of every node, in order.
    fn outline(tree: &NodeTree) -> Vec<(String, String, usize, Vec<(String, FieldValue)>)> {
        tree.nodes()
            .map(|node| {
                let mut depth = 0;
                let mut parent = node.parent();
                while let Some(key) = parent {
                    depth += 1;
                    parent = tree.node(key).and_then(Node::parent);
                }
                let fields = node
                    .fields()
                    .iter()
                    .map(|f| (f.name().to_string(), f.value().clone()))
                    .collect();
                (node.kind().to_string(), node.id().to_string(), depth, fields)
            })
            .collect()
    }

    #[test]
    fn nesting_becomes_parent_child_edges() {
        let mut diagnostics = Diagnostics::new();
        let tree = build_tree(syntax(SOURCE), &mut diagnostics).unwrap();

        let ids: Vec<_> = tree.nodes().map(|n| n.id().to_string()).collect();
        assert_eq!(ids, ["brakes.sdoc#1", "REQ-1", "brakes.sdoc#2", "REQ-2"]);

        let section = tree.find("brakes.sdoc#1").unwrap();
        let children: Vec<_> = section
            .children()
            .iter()
            .map(|&key| tree.node(key).unwrap().id().to_string())
            .collect();
        assert_eq!(children, ["REQ-1", "brakes.sdoc#2"]);
        assert_eq!(tree.find("REQ-1").unwrap().parent(), Some(section.key()));
        assert_eq!(tree.document().roots().len(), 2);
        assert_eq!(tree.document().title(), Some("Brakes"));

        let span = tree.find("REQ-1").unwrap().span().unwrap();
        assert_eq!((span.start_line, span.end_line), (7, 9));
    }

    #[test]
    fn serialized_tree_parses_to_an_equal_tree() {
        let mut diagnostics = Diagnostics::new();
        let tree = build_tree(syntax(SOURCE), &mut diagnostics).unwrap();
        let reparsed = build_tree(syntax(&tree.to_source()), &mut diagnostics).unwrap();
        assert_eq!(outline(&tree), outline(&reparsed));
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn parent_cycle_is_rejected() {
        // X's parent is Y and Y's parent is X
        let tree = crafted(vec![
            block("SECTION", BlockStyle::Section, Some(1)),
            block("SECTION", BlockStyle::Section, Some(0)),
        ]);
        let mut diagnostics = Diagnostics::new();

        let error = build_tree(tree, &mut diagnostics).unwrap_err();

        assert!(matches!(error, TreeError::StructuralCycle { ref blocks, .. } if blocks.len() == 2));
        assert_eq!(
            diagnostics.with_code(DiagnosticCode::StructuralCycle).count(),
            1
        );
    }

    #[test]
    fn nesting_under_a_leaf_is_rejected() {
        let tree = crafted(vec![
            block("TEXT", BlockStyle::Leaf, None),
            block("TEXT", BlockStyle::Leaf, Some(0)),
        ]);
        let error = build_tree(tree, &mut Diagnostics::new()).unwrap_err();
        assert!(matches!(error, TreeError::LeafParent { block: 1, parent: 0, .. }));
    }

    #[test]
    fn duplicate_identifier_within_document_is_fatal() {
        let source = "[DOCUMENT]\nTITLE: T\n\n[REQUIREMENT]\nUID: REQ-1\n\n[REQUIREMENT]\nUID: REQ-1\n";
        let mut diagnostics = Diagnostics::new();

        let error = build_tree(syntax(source), &mut diagnostics).unwrap_err();

        assert!(matches!(error, TreeError::DuplicateId { ref id, .. } if id.as_str() == "REQ-1"));
        let duplicates: Vec<_> = diagnostics
            .with_code(DiagnosticCode::DuplicateLocalId)
            .collect();
        assert_eq!(duplicates.len(), 1);
        assert_eq!(
            duplicates[0].location,
            Location::Source {
                document: DocumentId::new("brakes.sdoc").unwrap(),
                line: 8,
                column: 1
            }
        );
    }

    #[test]
    fn fields_keep_their_layout() {
        let tree = build_tree(syntax(SOURCE), &mut Diagnostics::new()).unwrap();
        let parent = tree.find("REQ-2").unwrap().field("PARENT").unwrap();
        assert_eq!(parent.layout(), FieldLayout::List);
        assert_eq!(parent.raw(), Some("PARENT:\n- REQ-1\n"));
    }
}
