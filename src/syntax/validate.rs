//! Schema checks over a structurally valid document.
//!
//! Every block is checked and every violation is reported; nothing here stops
//! early.

use std::collections::HashSet;

use super::{SyntaxField, SyntaxTree};
use crate::domain::{
    DocumentId,
    diagnostics::{Diagnostic, DiagnosticCode, Diagnostics, Location},
    schema::{FieldDescriptor, FieldKind, IDENTIFIER_FIELD, NodeKindDef},
};

fn header_kind() -> NodeKindDef {
    NodeKindDef::new("DOCUMENT")
        .with_field(FieldDescriptor::new("TITLE", FieldKind::Text).required())
        .with_field(FieldDescriptor::new(IDENTIFIER_FIELD, FieldKind::Text))
        .with_field(FieldDescriptor::new("VERSION", FieldKind::Text))
        .with_field(FieldDescriptor::new("CLASSIFICATION", FieldKind::Text))
}

pub(super) fn check_tree(tree: &SyntaxTree, diagnostics: &mut Diagnostics) {
    let header_line = tree
        .preamble
        .lines()
        .position(|line| !line.trim().is_empty())
        .map_or(1, |index| index + 1);
    check_fields(
        &tree.document,
        &header_kind(),
        &tree.header,
        header_line,
        diagnostics,
    );

    for block in &tree.blocks {
        let Some(kind) = tree.schema.kind(&block.kind) else {
            diagnostics.push(Diagnostic::error(
                DiagnosticCode::UnknownKind,
                format!("unknown node kind '{}'", block.kind),
                at(&tree.document, block.start_line),
            ));
            continue;
        };
        check_fields(
            &tree.document,
            kind,
            &block.fields,
            block.start_line,
            diagnostics,
        );
    }
}

fn check_fields(
    document: &DocumentId,
    kind: &NodeKindDef,
    fields: &[SyntaxField],
    marker_line: usize,
    diagnostics: &mut Diagnostics,
) {
    let mut seen = HashSet::new();

    for field in fields {
        let Some(descriptor) = kind.field(&field.name) else {
            diagnostics.push(Diagnostic::error(
                DiagnosticCode::UnknownField,
                format!("'{}' has no field '{}'", kind.name(), field.name),
                at(document, field.line),
            ));
            continue;
        };

        if !seen.insert(field.name.as_str()) {
            diagnostics.push(Diagnostic::error(
                DiagnosticCode::DuplicateField,
                format!("field '{}' is given more than once", field.name),
                at(document, field.line),
            ));
            continue;
        }

        if let Err(error) = descriptor.check(&field.value, field.layout) {
            diagnostics.push(Diagnostic::error(
                DiagnosticCode::InvalidValue,
                format!("{}.{}: {error}", kind.name(), field.name),
                at(document, field.line),
            ));
        }
    }

    for descriptor in kind.fields() {
        if descriptor.is_mandatory() && !seen.contains(descriptor.name()) {
            diagnostics.push(Diagnostic::error(
                DiagnosticCode::MissingField,
                format!(
                    "'{}' is missing required field '{}'",
                    kind.name(),
                    descriptor.name()
                ),
                at(document, marker_line),
            ));
        }
    }
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
    use crate::{
        domain::{
            DocumentId,
            diagnostics::{DiagnosticCode, Diagnostics, Location},
        },
        syntax::{parse_document, resolve_schema},
    };

    fn check(source: &str) -> Diagnostics {
        let document = DocumentId::new("doc.sdoc").unwrap();
        let mut diagnostics = Diagnostics::new();
        let schema = resolve_schema(source, &document, &mut diagnostics).unwrap();
        parse_document(source, &document, &schema, &mut diagnostics).unwrap();
        diagnostics
    }

    fn lines(diagnostics: &Diagnostics) -> Vec<usize> {
        diagnostics
            .iter()
            .map(|d| match d.location {
                Location::Source { line, .. } => line,
                Location::Node { .. } => 0,
            })
            .collect()
    }

    #[test]
    fn valid_document_has_no_diagnostics() {
        let diagnostics = check(
            "[DOCUMENT]\nTITLE: Brakes\n\n[REQUIREMENT]\nUID: REQ-1\nTITLE: Brake system\nPARENT:\n- REQ-ROOT\n",
        );
        assert!(diagnostics.is_empty(), "{diagnostics:?}");
    }

    #[test]
    fn reports_every_violation_in_the_document() {
        let diagnostics = check(concat!(
            "[DOCUMENT]\n",
            "TITLE: Brakes\n",
            "\n",
            "[REQUIREMENT]\n",
            "UID: REQ-1\n",
            "COLOUR: red\n",
            "\n",
            "[SECTION]\n",
            "UID: SEC-1\n",
            "[/SECTION]\n",
            "\n",
            "[REQUIREMENT]\n",
            "UID: REQ-2\n",
            "TITLE: >>>\n",
            "two\n",
            "lines\n",
            "<<<\n",
        ));

        let codes: Vec<_> = diagnostics.iter().map(|d| d.code).collect();
        assert_eq!(
            codes,
            [
                DiagnosticCode::UnknownField,
                DiagnosticCode::MissingField,
                DiagnosticCode::InvalidValue,
            ]
        );
        assert_eq!(lines(&diagnostics), [6, 8, 14]);
    }

    #[test]
    fn unknown_kinds_and_duplicate_fields_are_reported() {
        let diagnostics = check(
            "[DOCUMENT]\nTITLE: T\n\n[HAZARD]\nUID: H-1\n\n[REQUIREMENT]\nTITLE: a\nTITLE: b\n",
        );
        let codes: Vec<_> = diagnostics.iter().map(|d| d.code).collect();
        assert_eq!(
            codes,
            [DiagnosticCode::UnknownKind, DiagnosticCode::DuplicateField]
        );
    }

    #[test]
    fn header_title_is_required() {
        let diagnostics = check("\n[DOCUMENT]\nVERSION: 1\n");
        let missing: Vec<_> = diagnostics.with_code(DiagnosticCode::MissingField).collect();
        assert_eq!(missing.len(), 1);
        assert_eq!(lines(&diagnostics), [2]);
    }
}
