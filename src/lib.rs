//! Grammar-driven requirements documents with project-wide traceability.
//!
//! Documents are written in the SDoc notation: typed blocks of named fields,
//! validated against a schema that each document may declare for itself.
//! Nodes reference one another by identifier, within and across documents.
//!
//! ```
//! use sdoc::{Config, Direction, DocumentId, ProjectIndex, Source};
//!
//! let sources = [
//!     Source::new(
//!         DocumentId::new("system.sdoc").unwrap(),
//!         "[DOCUMENT]\nTITLE: System\n\n[REQUIREMENT]\nUID: REQ-ROOT\n",
//!     ),
//!     Source::new(
//!         DocumentId::new("brakes.sdoc").unwrap(),
//!         "[DOCUMENT]\nTITLE: Brakes\n\n[REQUIREMENT]\nUID: REQ-1\nPARENT:\n- REQ-ROOT\n",
//!     ),
//! ];
//! let index = ProjectIndex::load(&sources, &Config::default());
//!
//! let referencing = index.query_trace("REQ-ROOT", Direction::Backward).unwrap();
//! assert_eq!(referencing[0].id().as_str(), "REQ-1");
//! ```

pub mod domain;
pub use domain::{
    BlockStyle, Config, Diagnostic, DiagnosticCode, Diagnostics, Document, DocumentId,
    ErrorClass, Field, FieldValue, LinkKind, Location, Node, NodeId, NodeTree, Schema, Severity,
    build_tree,
};

pub mod syntax;

mod graph;

pub mod index;
pub use index::{
    BrokenLink, Cycle, Direction, EditError, IndexDelta, IndexError, NewNode, Project,
    ProjectDiff, ProjectIndex, Query, Source, diff,
};
