//! Parsing and serializing the SDoc notation.
//!
//! Parsing is two-phase. [`resolve_schema`] reads the `[DOCUMENT]` header and
//! the optional `[GRAMMAR]` declarations; [`parse_document`] then splits the
//! content into blocks with a PEG grammar and validates every block against
//! that schema.
//!
//! Structural errors stop the parse at the first one. Schema violations are
//! collected for the whole document.

use std::sync::Arc;

use crate::domain::{
    DocumentId,
    diagnostics::{Diagnostic, DiagnosticCode, Diagnostics, Location},
    node::{BlockStyle, FieldLayout, FieldValue},
    schema::Schema,
};

mod grammar;
mod parser;
mod schema_decl;
mod serialize;
mod validate;

pub(crate) use serialize::{check_representable, write_document};
pub use serialize::serialize_node;

/// A structurally well-formed document whose blocks have not yet been turned
/// into nodes.
///
/// Blocks are stored in an arena in document order; each names its parent by
/// index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxTree {
    /// The document the text came from.
    pub document: DocumentId,
    /// The schema the blocks were validated against.
    pub schema: Arc<Schema>,
    /// The `[DOCUMENT]` and `[GRAMMAR]` text, verbatim.
    pub preamble: String,
    /// Fields of the `[DOCUMENT]` header.
    pub header: Vec<SyntaxField>,
    /// Content blocks in document order.
    pub blocks: Vec<SyntaxBlock>,
    /// Blank lines after the last block.
    pub trailing: String,
    /// Whether the source ended with a newline.
    pub final_newline: bool,
    /// Number of lines in the source.
    pub line_count: usize,
}

/// One content block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxBlock {
    /// The block tag.
    pub kind: String,
    /// How the block is delimited.
    pub style: BlockStyle,
    /// The opening marker line, verbatim.
    pub marker: String,
    /// Fields in source order.
    pub fields: Vec<SyntaxField>,
    /// Blank lines before the opening marker.
    pub leading: String,
    /// Blank lines and closing marker of a container.
    pub closing: Option<String>,
    /// Index of the enclosing block.
    pub parent: Option<usize>,
    /// Line of the opening marker (1-based).
    pub start_line: usize,
    /// Last line of the block, including its closing marker.
    pub end_line: usize,
}

/// One field assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxField {
    /// The field name.
    pub name: String,
    /// The parsed value.
    pub value: FieldValue,
    /// The form the value was written in.
    pub layout: FieldLayout,
    /// The assignment text, verbatim, including its final newline.
    pub raw: String,
    /// Line of the field name (1-based).
    pub line: usize,
}

/// The first structural error in a document.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{document}:{line}:{column}: {message}")]
pub struct SyntaxError {
    /// The document.
    pub document: DocumentId,
    /// 1-based line.
    pub line: usize,
    /// 1-based column.
    pub column: usize,
    /// What the parser expected.
    pub message: String,
}

impl SyntaxError {
    pub(crate) fn to_diagnostic(&self) -> Diagnostic {
        Diagnostic::error(
            DiagnosticCode::Syntax,
            self.message.clone(),
            Location::Source {
                document: self.document.clone(),
                line: self.line,
                column: self.column,
            },
        )
    }
}

/// Why a document's schema could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    /// The header or declarations are not well formed.
    #[error(transparent)]
    Syntax(#[from] SyntaxError),
    /// The declarations are well formed but violate the declaration rules.
    #[error("{document}: {count} invalid schema declaration(s)")]
    Invalid {
        /// The document.
        document: DocumentId,
        /// Number of violations reported.
        count: usize,
    },
}

/// Resolves the schema a document's content is validated against.
///
/// Returns the built-in default schema when the document declares none.
///
/// # Errors
///
/// Returns [`SchemaError`] if the header cannot be parsed or a declaration is
/// invalid (for example, a node kind declared twice). Every problem is also
/// recorded in `diagnostics`.
#[tracing::instrument(level = "debug", skip(source, document, diagnostics), fields(%document))]
pub fn resolve_schema(
    source: &str,
    document: &DocumentId,
    diagnostics: &mut Diagnostics,
) -> Result<Arc<Schema>, SchemaError> {
    let source = parser::Source::new(source);
    let declarations = match parser::parse_preamble(&source, document) {
        Ok(declarations) => declarations,
        Err(error) => {
            diagnostics.push(error.to_diagnostic());
            return Err(error.into());
        }
    };

    let Some(declarations) = declarations else {
        return Ok(Arc::new(Schema::default()));
    };

    let mut violations = Diagnostics::new();
    let schema = schema_decl::build(&declarations, document, &mut violations);
    if violations.is_empty() {
        tracing::debug!(kinds = schema.kinds().count(), "declared schema resolved");
        Ok(Arc::new(schema))
    } else {
        let count = violations.len();
        diagnostics.append(&mut violations);
        Err(SchemaError::Invalid {
            document: document.clone(),
            count,
        })
    }
}

/// Parses the content of a document against a resolved schema.
///
/// A structurally malformed document yields exactly one [`SyntaxError`] (the
/// first by position). A well-formed document always yields a
/// [`SyntaxTree`]; schema violations in its blocks are recorded in
/// `diagnostics`.
///
/// # Errors
///
/// Returns the first [`SyntaxError`]; the same error is recorded in
/// `diagnostics`.
#[tracing::instrument(level = "debug", skip(source, document, schema, diagnostics), fields(%document))]
pub fn parse_document(
    source: &str,
    document: &DocumentId,
    schema: &Arc<Schema>,
    diagnostics: &mut Diagnostics,
) -> Result<SyntaxTree, SyntaxError> {
    let source = parser::Source::new(source);
    let tree = match parser::parse_content(&source, document, schema) {
        Ok(tree) => tree,
        Err(error) => {
            diagnostics.push(error.to_diagnostic());
            return Err(error);
        }
    };

    validate::check_tree(&tree, diagnostics);
    tracing::debug!(blocks = tree.blocks.len(), "document parsed");
    Ok(tree)
}
