use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use crate::domain::{
    DocumentId, NodeId,
    node::{Field, LineEnding, NodeKey, SourceSpan},
    schema::Schema,
};

/// One parsed source artifact.
#[derive(Debug)]
pub struct Document {
    pub(crate) id: DocumentId,
    pub(crate) header: Vec<Field>,
    pub(crate) schema: Arc<Schema>,
    pub(crate) roots: Vec<NodeKey>,
    pub(crate) span: SourceSpan,
    /// `[DOCUMENT]` and `[GRAMMAR]` blocks, verbatim.
    pub(crate) preamble: String,
    /// Blank lines after the last block.
    pub(crate) trailing: String,
    pub(crate) final_newline: bool,
    pub(crate) line_ending: LineEnding,
    /// Next ordinal for synthetic identifiers.
    pub(crate) next_ordinal: AtomicUsize,
}

impl Document {
    /// The document identifier.
    #[must_use]
    pub const fn id(&self) -> &DocumentId {
        &self.id
    }

    /// The `TITLE` of the `[DOCUMENT]` header.
    #[must_use]
    pub fn title(&self) -> Option<&str> {
        self.header_value("TITLE")
    }

    /// A field of the `[DOCUMENT]` header.
    #[must_use]
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.header
            .iter()
            .find(|field| field.name() == name)
            .and_then(|field| field.value().as_str())
    }

    /// The schema the document was validated against.
    #[must_use]
    pub const fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Keys of the top-level nodes, in order.
    #[must_use]
    pub fn roots(&self) -> &[NodeKey] {
        &self.roots
    }

    /// Lines covered by the source.
    #[must_use]
    pub const fn span(&self) -> &SourceSpan {
        &self.span
    }

    /// Allocates the identifier for a node without a `UID`.
    pub(crate) fn next_synthetic_id(&self) -> NodeId {
        let ordinal = self.next_ordinal.fetch_add(1, Ordering::Relaxed);
        NodeId::synthetic(&self.id, ordinal)
    }

    /// The identifier [`Self::next_synthetic_id`] would allocate.
    pub(crate) fn upcoming_synthetic_id(&self) -> NodeId {
        NodeId::synthetic(&self.id, self.next_ordinal.load(Ordering::Relaxed))
    }
}

impl Clone for Document {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            header: self.header.clone(),
            schema: Arc::clone(&self.schema),
            roots: self.roots.clone(),
            span: self.span.clone(),
            preamble: self.preamble.clone(),
            trailing: self.trailing.clone(),
            final_newline: self.final_newline,
            line_ending: self.line_ending,
            next_ordinal: AtomicUsize::new(self.next_ordinal.load(Ordering::Relaxed)),
        }
    }
}
