use std::{collections::HashSet, sync::LazyLock};

use regex::Regex;

use super::parser::{ElementDecl, FieldDecl};
use crate::domain::{
    DocumentId,
    diagnostics::{Diagnostic, DiagnosticCode, Diagnostics, Location},
    node::{FieldLayout, FieldValue},
    schema::{FieldDescriptor, FieldKind, LinkKind, Multiplicity, NodeKindDef, Schema},
};

static FIELD_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z][A-Z0-9_]*$").expect("field name pattern is valid"));

static CHOICE_TYPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^SingleChoice\((.*)\)$").expect("choice pattern is valid"));

static REFERENCE_TYPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Reference\((.*)\)$").expect("reference pattern is valid"));

const RESERVED_KINDS: [&str; 2] = ["DOCUMENT", "GRAMMAR"];

/// Turns `[GRAMMAR]` declarations into a schema, reporting every invalid
/// declaration.
pub(super) fn build(
    elements: &[ElementDecl],
    document: &DocumentId,
    violations: &mut Diagnostics,
) -> Schema {
    let mut declared = HashSet::new();
    let mut kinds = Vec::new();

    for element in elements {
        if RESERVED_KINDS.contains(&element.name.as_str()) {
            violations.push(invalid(
                document,
                element.line,
                format!("'{}' is reserved and cannot be declared", element.name),
            ));
            continue;
        }
        if !declared.insert(element.name.as_str()) {
            violations.push(Diagnostic::error(
                DiagnosticCode::DuplicateDeclaration,
                format!("node kind '{}' is declared more than once", element.name),
                at(document, element.line),
            ));
            continue;
        }

        let mut kind = NodeKindDef::new(element.name.clone());
        for decl in &element.fields {
            let Some(descriptor) = field_descriptor(decl, document, violations) else {
                continue;
            };
            let name = descriptor.name().to_string();
            if !kind.add_field(descriptor) {
                violations.push(Diagnostic::error(
                    DiagnosticCode::DuplicateDeclaration,
                    format!("field '{name}' of '{}' is declared more than once", element.name),
                    at(document, decl.line),
                ));
            }
        }
        kinds.push(kind);
    }

    Schema::declared(kinds)
}

fn field_descriptor(
    decl: &FieldDecl,
    document: &DocumentId,
    violations: &mut Diagnostics,
) -> Option<FieldDescriptor> {
    let before = violations.len();
    let mut title = None;
    let mut field_type = None;
    let mut required = false;
    let mut multiplicity = Multiplicity::One;
    let mut default = None;
    let mut seen = HashSet::new();

    for (name, value, line) in &decl.attributes {
        if !seen.insert(name.as_str()) {
            violations.push(invalid(
                document,
                *line,
                format!("attribute '{name}' is given more than once"),
            ));
            continue;
        }
        match name.as_str() {
            "TITLE" => {
                if FIELD_NAME.is_match(value) {
                    title = Some(value.clone());
                } else {
                    violations.push(invalid(
                        document,
                        *line,
                        format!("'{value}' is not a valid field name"),
                    ));
                }
            }
            "TYPE" => match parse_type(value) {
                Ok(kind) => field_type = Some(kind),
                Err(message) => violations.push(invalid(document, *line, message)),
            },
            "REQUIRED" => match value.as_str() {
                "True" => required = true,
                "False" => required = false,
                other => violations.push(invalid(
                    document,
                    *line,
                    format!("REQUIRED must be True or False, not '{other}'"),
                )),
            },
            "MULTIPLICITY" => match value.as_str() {
                "One" => multiplicity = Multiplicity::One,
                "Many" => multiplicity = Multiplicity::Many,
                other => violations.push(invalid(
                    document,
                    *line,
                    format!("MULTIPLICITY must be One or Many, not '{other}'"),
                )),
            },
            "DEFAULT" => default = Some((value.clone(), *line)),
            other => violations.push(invalid(
                document,
                *line,
                format!("unknown field attribute '{other}'"),
            )),
        }
    }

    let Some(title) = title else {
        if violations.len() == before {
            violations.push(invalid(document, decl.line, "field declaration has no TITLE"));
        }
        return None;
    };
    let Some(field_type) = field_type else {
        if violations.len() == before {
            violations.push(invalid(
                document,
                decl.line,
                format!("field '{title}' has no TYPE"),
            ));
        }
        return None;
    };

    let mut descriptor = FieldDescriptor::new(title, field_type).with_multiplicity(multiplicity);
    if required {
        descriptor = descriptor.required();
    }

    if let Some((value, line)) = default {
        if descriptor.link_kind().is_some() {
            violations.push(invalid(
                document,
                line,
                format!("reference field '{}' cannot have a DEFAULT", descriptor.name()),
            ));
            return None;
        }
        let value = FieldValue::Single(value);
        if let Err(error) = descriptor.check(&value, FieldLayout::Inline) {
            violations.push(invalid(
                document,
                line,
                format!("DEFAULT of '{}': {error}", descriptor.name()),
            ));
            return None;
        }
        descriptor = descriptor.with_default(value);
    }

    (violations.len() == before).then_some(descriptor)
}

fn parse_type(value: &str) -> Result<FieldKind, String> {
    match value {
        "String" => return Ok(FieldKind::Text),
        "Text" => return Ok(FieldKind::Multiline),
        "Number" => return Ok(FieldKind::Number),
        _ => {}
    }

    if let Some(captures) = CHOICE_TYPE.captures(value) {
        let options: Vec<String> = captures[1]
            .split(',')
            .map(|option| option.trim().to_string())
            .collect();
        if options.iter().any(String::is_empty) {
            return Err(format!("'{value}' has an empty choice"));
        }
        let unique: HashSet<_> = options.iter().collect();
        if unique.len() != options.len() {
            return Err(format!("'{value}' repeats a choice"));
        }
        return Ok(FieldKind::Enum(options));
    }

    if let Some(captures) = REFERENCE_TYPE.captures(value) {
        let kind: LinkKind = captures[1].parse().map_err(|e| format!("{e}"))?;
        if kind.is_hierarchy() {
            return Err("ParentOf links come from nesting and cannot be declared".to_string());
        }
        return Ok(FieldKind::Reference(kind));
    }

    Err(format!(
        "unknown field type '{value}', expected String, Text, Number, SingleChoice(..) or Reference(..)"
    ))
}

fn invalid(document: &DocumentId, line: usize, message: impl Into<String>) -> Diagnostic {
    Diagnostic::error(
        DiagnosticCode::InvalidDeclaration,
        message,
        at(document, line),
    )
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
    use test_case::test_case;

    use crate::{
        domain::{
            DocumentId,
            diagnostics::{DiagnosticCode, Diagnostics},
            schema::{FieldKind, LinkKind, Multiplicity},
        },
        syntax::{SchemaError, resolve_schema},
    };

    const GRAMMAR: &str = "\
[DOCUMENT]
TITLE: Braking

[GRAMMAR]
ELEMENTS:
- TAG: REQUIREMENT
  FIELDS:
  - TITLE: UID
    TYPE: String
  - TITLE: TITLE
    TYPE: String
    REQUIRED: True
  - TITLE: PRIORITY
    TYPE: Number
    DEFAULT: 3
  - TITLE: STATUS
    TYPE: SingleChoice(Draft, Active, Obsolete)
  - TITLE: PARENT
    TYPE: Reference(TracesTo)
    MULTIPLICITY: Many
- TAG: HAZARD
  FIELDS:
  - TITLE: UID
    TYPE: String
";

    fn resolve(source: &str) -> (Result<std::sync::Arc<crate::Schema>, SchemaError>, Diagnostics) {
        let document = DocumentId::new("doc.sdoc").unwrap();
        let mut diagnostics = Diagnostics::new();
        let schema = resolve_schema(source, &document, &mut diagnostics);
        (schema, diagnostics)
    }

    #[test]
    fn builds_declared_kinds() {
        let (schema, diagnostics) = resolve(GRAMMAR);
        let schema = schema.unwrap();
        assert!(diagnostics.is_empty());
        assert!(schema.is_declared());

        let requirement = schema.kind("REQUIREMENT").unwrap();
        let names: Vec<_> = requirement.fields().map(|f| f.name()).collect();
        assert_eq!(names, ["UID", "TITLE", "PRIORITY", "STATUS", "PARENT"]);
        assert!(requirement.field("TITLE").unwrap().is_required());
        assert_eq!(
            requirement.field("PRIORITY").unwrap().default_value(),
            Some(&"3".into())
        );
        assert_eq!(
            requirement.field("STATUS").unwrap().kind(),
            &FieldKind::Enum(vec![
                "Draft".to_string(),
                "Active".to_string(),
                "Obsolete".to_string()
            ])
        );
        let parent = requirement.field("PARENT").unwrap();
        assert_eq!(parent.link_kind(), Some(&LinkKind::TracesTo));
        assert_eq!(parent.multiplicity(), Multiplicity::Many);

        assert!(schema.kind("HAZARD").is_some());
        assert!(schema.kind("SECTION").is_some());
    }

    #[test]
    fn redeclared_kind_is_fatal() {
        let source = format!("{GRAMMAR}- TAG: HAZARD\n  FIELDS:\n  - TITLE: UID\n    TYPE: String\n");
        let (schema, diagnostics) = resolve(&source);
        assert!(matches!(schema, Err(SchemaError::Invalid { count: 1, .. })));
        let codes: Vec<_> = diagnostics.iter().map(|d| d.code).collect();
        assert_eq!(codes, [DiagnosticCode::DuplicateDeclaration]);
    }

    #[test_case("    TYPE: Colour\n"; "unknown type")]
    #[test_case("    TYPE: Number\n    DEFAULT: high\n"; "default of wrong kind")]
    #[test_case("    TYPE: Reference(ParentOf)\n"; "hierarchy reference")]
    #[test_case("    TYPE: String\n    REQUIRED: Yes\n"; "bad required flag")]
    #[test_case("    TYPE: SingleChoice(A, A)\n"; "repeated choice")]
    #[test_case("    TYPE: String\n    WIDTH: 3\n"; "unknown attribute")]
    fn invalid_field_declarations(attributes: &str) {
        let source = format!(
            "[DOCUMENT]\nTITLE: T\n\n[GRAMMAR]\nELEMENTS:\n- TAG: ITEM\n  FIELDS:\n  - TITLE: FIELD\n{attributes}"
        );
        let (schema, diagnostics) = resolve(&source);
        assert!(schema.is_err());
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(
            diagnostics.iter().next().unwrap().code,
            DiagnosticCode::InvalidDeclaration
        );
    }

    #[test]
    fn document_without_grammar_uses_default_schema() {
        let (schema, diagnostics) = resolve("[DOCUMENT]\nTITLE: T\n");
        assert!(!schema.unwrap().is_declared());
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn malformed_header_is_a_syntax_error() {
        let (schema, diagnostics) = resolve("TITLE: T\n");
        assert!(matches!(schema, Err(SchemaError::Syntax(_))));
        assert_eq!(diagnostics.len(), 1);
    }
}
