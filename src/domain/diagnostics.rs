//! Structured, located errors and warnings.
//!
//! Every problem found while parsing, building or editing is recorded as a
//! [`Diagnostic`] in a [`Diagnostics`] collector before it reaches a caller.

use std::fmt;

use serde::Serialize;

use crate::domain::{DocumentId, NodeId};

/// How serious a diagnostic is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// The artifact is invalid.
    Error,
    /// Suspicious but permitted.
    Warning,
}

/// The error family a diagnostic belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorClass {
    /// Structural syntax error; fatal to one document's parse.
    SyntaxError,
    /// Node or field does not match the schema.
    SchemaViolation,
    /// Unresolvable, ambiguous or duplicated identifier.
    ReferenceError,
    /// Parent/child hierarchy forms a cycle.
    StructuralCycleError,
    /// Rejected edit.
    EditConflict,
}

/// Machine-readable diagnostic code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiagnosticCode {
    /// The document is not structurally well formed.
    Syntax,
    /// A `[GRAMMAR]` declaration is malformed.
    InvalidDeclaration,
    /// A node kind or field is declared twice.
    DuplicateDeclaration,
    /// A block uses a kind the schema does not define.
    UnknownKind,
    /// A block carries a field its kind does not define.
    UnknownField,
    /// A required field is absent.
    MissingField,
    /// A single-valued field appears more than once.
    DuplicateField,
    /// A field value does not match its kind.
    InvalidValue,
    /// An identifier is used by more than one node of the same document.
    DuplicateLocalId,
    /// An identifier is used by nodes of different documents.
    DuplicateId,
    /// Two loaded documents share an identifier.
    DuplicateDocument,
    /// A reference names no node.
    UnresolvedReference,
    /// A reference names an identifier held by several nodes.
    AmbiguousReference,
    /// The hierarchy contains a cycle.
    StructuralCycle,
    /// Trace links of a kind that must be acyclic form a cycle.
    TraceCycle,
    /// An edit was rejected.
    EditConflict,
}

impl DiagnosticCode {
    /// The error family of this code.
    #[must_use]
    pub const fn class(self) -> ErrorClass {
        match self {
            Self::Syntax => ErrorClass::SyntaxError,
            Self::InvalidDeclaration
            | Self::DuplicateDeclaration
            | Self::UnknownKind
            | Self::UnknownField
            | Self::MissingField
            | Self::DuplicateField
            | Self::InvalidValue
            | Self::DuplicateLocalId => ErrorClass::SchemaViolation,
            Self::DuplicateId
            | Self::DuplicateDocument
            | Self::UnresolvedReference
            | Self::AmbiguousReference
            | Self::TraceCycle => ErrorClass::ReferenceError,
            Self::StructuralCycle => ErrorClass::StructuralCycleError,
            Self::EditConflict => ErrorClass::EditConflict,
        }
    }

    /// Whether the code describes link state that the index recomputes as
    /// nodes and identifiers change.
    pub(crate) const fn is_link_state(self) -> bool {
        matches!(
            self,
            Self::DuplicateId | Self::UnresolvedReference | Self::AmbiguousReference
        )
    }
}

/// Where a diagnostic applies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Location {
    /// A position in a source document.
    Source {
        /// The document.
        document: DocumentId,
        /// 1-based line.
        line: usize,
        /// 1-based column.
        column: usize,
    },
    /// A node, optionally narrowed to one of its fields.
    Node {
        /// The owning document.
        document: DocumentId,
        /// The node.
        node: NodeId,
        /// The field, if the problem is specific to one.
        field: Option<String>,
    },
}

impl Location {
    /// The document the location belongs to.
    #[must_use]
    pub const fn document(&self) -> &DocumentId {
        match self {
            Self::Source { document, .. } | Self::Node { document, .. } => document,
        }
    }

    /// The node, for node locations.
    #[must_use]
    pub const fn node(&self) -> Option<&NodeId> {
        match self {
            Self::Source { .. } => None,
            Self::Node { node, .. } => Some(node),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source {
                document,
                line,
                column,
            } => write!(f, "{document}:{line}:{column}"),
            Self::Node {
                document,
                node,
                field: Some(field),
            } => write!(f, "{document}: {node}.{field}"),
            Self::Node {
                document,
                node,
                field: None,
            } => write!(f, "{document}: {node}"),
        }
    }
}

/// A located error or warning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    /// Error or warning.
    pub severity: Severity,
    /// Machine-readable code.
    pub code: DiagnosticCode,
    /// Human-readable description.
    pub message: String,
    /// Where the problem is.
    pub location: Location,
}

impl Diagnostic {
    /// Creates an error.
    #[must_use]
    pub fn error(code: DiagnosticCode, message: impl Into<String>, location: Location) -> Self {
        Self {
            severity: Severity::Error,
            code,
            message: message.into(),
            location,
        }
    }

    /// Creates a warning.
    #[must_use]
    pub fn warning(code: DiagnosticCode, message: impl Into<String>, location: Location) -> Self {
        Self {
            severity: Severity::Warning,
            code,
            message: message.into(),
            location,
        }
    }

    /// The error family.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        self.code.class()
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let severity = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{}: {severity}: {}", self.location, self.message)
    }
}

/// Accumulates diagnostics in the order they were raised.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    /// Creates an empty collector.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Records a diagnostic.
    pub fn push(&mut self, diagnostic: Diagnostic) {
        tracing::debug!(%diagnostic, "diagnostic recorded");
        self.entries.push(diagnostic);
    }

    /// Moves all diagnostics out of `other` into this collector.
    pub fn append(&mut self, other: &mut Self) {
        self.entries.append(&mut other.entries);
    }

    /// Number of diagnostics.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.entries
            .iter()
            .any(|diagnostic| diagnostic.severity == Severity::Error)
    }

    /// All diagnostics.
    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter()
    }

    /// Diagnostics with the given code.
    pub fn with_code(&self, code: DiagnosticCode) -> impl Iterator<Item = &Diagnostic> {
        self.entries
            .iter()
            .filter(move |diagnostic| diagnostic.code == code)
    }

    /// Diagnostics located in a document, including those attached to its
    /// nodes.
    pub fn for_document<'a>(
        &'a self,
        document: &'a DocumentId,
    ) -> impl Iterator<Item = &'a Diagnostic> + 'a {
        self.entries
            .iter()
            .filter(move |diagnostic| diagnostic.location.document() == document)
    }

    /// Diagnostics attached to a node.
    pub fn for_node<'a>(&'a self, node: &'a str) -> impl Iterator<Item = &'a Diagnostic> + 'a {
        self.entries.iter().filter(move |diagnostic| {
            diagnostic
                .location
                .node()
                .is_some_and(|id| id.as_str() == node)
        })
    }

    /// Consumes the collector.
    #[must_use]
    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.entries
    }

    /// Drops the diagnostics matching `predicate`.
    ///
    /// Used when the index recomputes state it derived earlier; the
    /// replacement diagnostics are pushed straight after.
    pub(crate) fn discard(&mut self, predicate: impl Fn(&Diagnostic) -> bool) {
        self.entries.retain(|diagnostic| !predicate(diagnostic));
    }

    /// Re-points diagnostics of a renamed node at its new identifier.
    pub(crate) fn rename_node(&mut self, document: &DocumentId, old: &NodeId, new: &NodeId) {
        for diagnostic in &mut self.entries {
            if let Location::Node {
                document: located,
                node,
                ..
            } = &mut diagnostic.location
            {
                if located == document && node == old {
                    node.clone_from(new);
                }
            }
        }
    }
}

impl Extend<Diagnostic> for Diagnostics {
    fn extend<T: IntoIterator<Item = Diagnostic>>(&mut self, iter: T) {
        for diagnostic in iter {
            self.push(diagnostic);
        }
    }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(name: &str) -> DocumentId {
        DocumentId::new(name).unwrap()
    }

    fn node_location(document: &str, node: &str) -> Location {
        Location::Node {
            document: doc(document),
            node: node.parse().unwrap(),
            field: None,
        }
    }

    #[test]
    fn filters_by_document_and_node() {
        let mut diagnostics = Diagnostics::new();
        diagnostics.push(Diagnostic::error(
            DiagnosticCode::Syntax,
            "expected field",
            Location::Source {
                document: doc("a.sdoc"),
                line: 3,
                column: 1,
            },
        ));
        diagnostics.push(Diagnostic::error(
            DiagnosticCode::UnresolvedReference,
            "REQ-9 not found",
            node_location("b.sdoc", "REQ-1"),
        ));

        assert_eq!(diagnostics.for_document(&doc("a.sdoc")).count(), 1);
        assert_eq!(diagnostics.for_document(&doc("b.sdoc")).count(), 1);
        assert_eq!(diagnostics.for_node("REQ-1").count(), 1);
        assert_eq!(diagnostics.for_node("REQ-2").count(), 0);
        assert!(diagnostics.has_errors());
    }

    #[test]
    fn rename_moves_node_diagnostics() {
        let mut diagnostics = Diagnostics::new();
        diagnostics.push(Diagnostic::error(
            DiagnosticCode::UnresolvedReference,
            "REQ-9 not found",
            node_location("b.sdoc", "REQ-1"),
        ));

        diagnostics.rename_node(
            &doc("b.sdoc"),
            &"REQ-1".parse().unwrap(),
            &"REQ-1A".parse().unwrap(),
        );

        assert_eq!(diagnostics.for_node("REQ-1").count(), 0);
        assert_eq!(diagnostics.for_node("REQ-1A").count(), 1);
    }

    #[test]
    fn codes_map_to_error_classes() {
        assert_eq!(DiagnosticCode::Syntax.class(), ErrorClass::SyntaxError);
        assert_eq!(
            DiagnosticCode::MissingField.class(),
            ErrorClass::SchemaViolation
        );
        assert_eq!(
            DiagnosticCode::DuplicateId.class(),
            ErrorClass::ReferenceError
        );
    }
}
