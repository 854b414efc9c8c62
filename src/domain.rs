//! Domain models for structured documents.
//!
//! This module contains the core types: node identifiers, the schema that
//! governs validation, nodes and documents, diagnostics, and configuration.

mod id;
pub use id::{DocumentId, EmptyDocumentIdError, InvalidIdError, NodeId};

/// Node kinds, field descriptors and link kinds.
pub mod schema;
pub use schema::{FieldDescriptor, FieldKind, LinkKind, Multiplicity, NodeKindDef, Schema};

/// Nodes, their fields and their source layout.
pub mod node;
pub use node::{BlockStyle, Field, FieldLayout, FieldValue, Node, NodeKey, SourceSpan};

mod document;
pub use document::Document;

pub mod diagnostics;
pub use diagnostics::{Diagnostic, DiagnosticCode, Diagnostics, ErrorClass, Location, Severity};

mod config;
pub use config::Config;

mod tree;
pub use tree::{NodeTree, TreeError, build_tree};
