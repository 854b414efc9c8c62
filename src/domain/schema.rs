//! Node-kind and field descriptors that govern validation.
//!
//! A [`Schema`] is plain data. The parser and the edit engine consult it
//! through [`FieldDescriptor::check`]; nothing is generated per schema.

use std::{fmt, str::FromStr, sync::LazyLock};

use indexmap::IndexMap;
use regex::Regex;
use serde::Serialize;

use crate::domain::{
    NodeId,
    node::{FieldLayout, FieldValue},
};

/// Name of the field that carries a node's identifier.
pub const IDENTIFIER_FIELD: &str = "UID";

static CUSTOM_KIND_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").expect("link kind pattern is valid"));

/// The kind of a directed link between two nodes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum LinkKind {
    /// Hierarchy edge from a container to each of its children.
    ///
    /// Derived from document structure; never declared on a field.
    ParentOf,
    /// Trace relation, declared as `Reference(TracesTo)` or
    /// `Reference(Parent)`.
    TracesTo,
    /// Duplication relation.
    Duplicates,
    /// Any other named relation.
    Custom(String),
}

impl LinkKind {
    /// Whether the kind comes from the document hierarchy rather than from
    /// reference fields.
    #[must_use]
    pub const fn is_hierarchy(&self) -> bool {
        matches!(self, Self::ParentOf)
    }
}

impl fmt::Display for LinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ParentOf => f.write_str("ParentOf"),
            Self::TracesTo => f.write_str("TracesTo"),
            Self::Duplicates => f.write_str("Duplicates"),
            Self::Custom(name) => f.write_str(name),
        }
    }
}

impl FromStr for LinkKind {
    type Err = InvalidLinkKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "ParentOf" => Ok(Self::ParentOf),
            "TracesTo" | "Parent" => Ok(Self::TracesTo),
            "Duplicates" => Ok(Self::Duplicates),
            other if CUSTOM_KIND_PATTERN.is_match(other) => Ok(Self::Custom(other.to_string())),
            other => Err(InvalidLinkKindError(other.to_string())),
        }
    }
}

/// Error returned for a link kind name that is not an identifier.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid link kind '{0}'")]
pub struct InvalidLinkKindError(String);

/// The kind of value a field holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    /// Single-line text (`String` in a grammar declaration).
    Text,
    /// Free text that may span lines (`Text`).
    Multiline,
    /// A decimal number (`Number`).
    Number,
    /// One of a fixed set of options (`SingleChoice(a, b)`).
    Enum(Vec<String>),
    /// The identifier of another node (`Reference(kind)`).
    Reference(LinkKind),
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => f.write_str("String"),
            Self::Multiline => f.write_str("Text"),
            Self::Number => f.write_str("Number"),
            Self::Enum(options) => write!(f, "SingleChoice({})", options.join(", ")),
            Self::Reference(kind) => write!(f, "Reference({kind})"),
        }
    }
}

/// How many values a field carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Multiplicity {
    /// Exactly one value.
    #[default]
    One,
    /// A list of one or more values.
    Many,
}

/// Describes one field of a node kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    name: String,
    kind: FieldKind,
    required: bool,
    multiplicity: Multiplicity,
    default: Option<FieldValue>,
}

impl FieldDescriptor {
    /// Creates an optional, single-valued field with no default.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            multiplicity: Multiplicity::One,
            default: None,
        }
    }

    /// Marks the field as required.
    #[must_use]
    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Sets the multiplicity.
    #[must_use]
    pub const fn with_multiplicity(mut self, multiplicity: Multiplicity) -> Self {
        self.multiplicity = multiplicity;
        self
    }

    /// Sets a default value used when the field is absent.
    ///
    /// The caller is responsible for checking the value with
    /// [`FieldDescriptor::check`].
    #[must_use]
    pub fn with_default(mut self, value: FieldValue) -> Self {
        self.default = Some(value);
        self
    }

    /// The field name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The value kind.
    #[must_use]
    pub const fn kind(&self) -> &FieldKind {
        &self.kind
    }

    /// Whether a node must carry this field (either authored or via a
    /// default).
    #[must_use]
    pub const fn is_required(&self) -> bool {
        self.required
    }

    /// The field multiplicity.
    #[must_use]
    pub const fn multiplicity(&self) -> Multiplicity {
        self.multiplicity
    }

    /// The default value, if any.
    #[must_use]
    pub const fn default_value(&self) -> Option<&FieldValue> {
        self.default.as_ref()
    }

    /// Link kind for reference fields.
    #[must_use]
    pub const fn link_kind(&self) -> Option<&LinkKind> {
        match &self.kind {
            FieldKind::Reference(kind) => Some(kind),
            _ => None,
        }
    }

    /// Whether this field carries the node identifier.
    #[must_use]
    pub fn is_identifier(&self) -> bool {
        self.name == IDENTIFIER_FIELD
    }

    /// Whether a missing value is a violation.
    #[must_use]
    pub const fn is_mandatory(&self) -> bool {
        self.required && self.default.is_none()
    }

    /// Checks a value (and the textual form it was written in) against this
    /// descriptor.
    ///
    /// # Errors
    ///
    /// Returns the first [`ValueError`] found.
    pub fn check(&self, value: &FieldValue, layout: FieldLayout) -> Result<(), ValueError> {
        match (value, self.multiplicity) {
            (FieldValue::List(_), Multiplicity::One) => return Err(ValueError::ExpectedSingle),
            (FieldValue::List(items), Multiplicity::Many) if items.is_empty() => {
                return Err(ValueError::EmptyList);
            }
            _ => {}
        }

        for item in value.items() {
            self.check_item(item, layout)?;
        }
        Ok(())
    }

    fn check_item(&self, item: &str, layout: FieldLayout) -> Result<(), ValueError> {
        match &self.kind {
            FieldKind::Text => {
                if layout == FieldLayout::Multiline || item.contains('\n') {
                    return Err(ValueError::ExpectedSingleLine);
                }
            }
            FieldKind::Multiline => {}
            FieldKind::Number => {
                let valid = item.trim().parse::<f64>().is_ok_and(f64::is_finite);
                if !valid {
                    return Err(ValueError::NotANumber(item.to_string()));
                }
            }
            FieldKind::Enum(options) => {
                if !options.iter().any(|option| option == item.trim()) {
                    return Err(ValueError::NotAnOption {
                        value: item.to_string(),
                        options: options.clone(),
                    });
                }
            }
            FieldKind::Reference(_) => {
                if item.trim().parse::<NodeId>().is_err() {
                    return Err(ValueError::InvalidReference(item.to_string()));
                }
            }
        }

        if self.is_identifier() && item.trim().parse::<NodeId>().is_err() {
            return Err(ValueError::InvalidIdentifier(item.to_string()));
        }
        Ok(())
    }
}

/// A value that does not match its field descriptor.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ValueError {
    /// A list was given for a single-valued field.
    #[error("expected a single value, found a list")]
    ExpectedSingle,
    /// A list field was given no items.
    #[error("expected at least one list item")]
    EmptyList,
    /// Multiline text was given for a single-line field.
    #[error("expected single-line text")]
    ExpectedSingleLine,
    /// The value is not a decimal number.
    #[error("'{0}' is not a number")]
    NotANumber(String),
    /// The value is not one of the declared options.
    #[error("'{value}' is not one of: {}", options.join(", "))]
    NotAnOption {
        /// The offending value.
        value: String,
        /// The declared options.
        options: Vec<String>,
    },
    /// The value is not a well-formed node identifier.
    #[error("'{0}' is not a valid reference")]
    InvalidReference(String),
    /// The identifier field holds a malformed identifier.
    #[error("'{0}' is not a valid identifier")]
    InvalidIdentifier(String),
    /// The value cannot be written in any field form that reads back
    /// unchanged (for example, surrounding whitespace on an inline value).
    #[error("'{0}' cannot be written back to source unchanged")]
    Unrepresentable(String),
}

/// The definition of one node kind: its fields, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeKindDef {
    name: String,
    fields: IndexMap<String, FieldDescriptor>,
}

impl NodeKindDef {
    /// Creates a kind with no fields.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: IndexMap::new(),
        }
    }

    /// Adds a field descriptor.
    ///
    /// Returns `false` (and leaves the kind unchanged) if a field with the
    /// same name already exists.
    pub fn add_field(&mut self, descriptor: FieldDescriptor) -> bool {
        if self.fields.contains_key(descriptor.name()) {
            return false;
        }
        self.fields.insert(descriptor.name().to_string(), descriptor);
        true
    }

    /// Builder form of [`NodeKindDef::add_field`]; duplicates are ignored.
    #[must_use]
    pub fn with_field(mut self, descriptor: FieldDescriptor) -> Self {
        self.add_field(descriptor);
        self
    }

    /// The kind name (the block tag).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Looks up a field descriptor.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.get(name)
    }

    /// Position of a field in declaration order.
    #[must_use]
    pub fn position(&self, name: &str) -> Option<usize> {
        self.fields.get_index_of(name)
    }

    /// Field descriptors in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.values()
    }
}

/// The set of node kinds a document may use.
///
/// Immutable once content parsing starts; documents share it behind an
/// `Arc`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    kinds: IndexMap<String, NodeKindDef>,
    declared: bool,
}

impl Default for Schema {
    fn default() -> Self {
        let mut kinds = IndexMap::new();
        for kind in [section_kind(), text_kind(), requirement_kind()] {
            kinds.insert(kind.name().to_string(), kind);
        }
        Self {
            kinds,
            declared: false,
        }
    }
}

impl Schema {
    /// Builds a schema from kinds declared in a document.
    ///
    /// The built-in `SECTION` and `TEXT` kinds remain available unless a
    /// declaration replaces them; the built-in `REQUIREMENT` kind does not.
    #[must_use]
    pub fn declared(declared: impl IntoIterator<Item = NodeKindDef>) -> Self {
        let mut kinds = IndexMap::new();
        for kind in [section_kind(), text_kind()] {
            kinds.insert(kind.name().to_string(), kind);
        }
        for kind in declared {
            kinds.insert(kind.name().to_string(), kind);
        }
        Self {
            kinds,
            declared: true,
        }
    }

    /// Whether this schema came from a `[GRAMMAR]` block.
    #[must_use]
    pub const fn is_declared(&self) -> bool {
        self.declared
    }

    /// Looks up a node kind.
    #[must_use]
    pub fn kind(&self, name: &str) -> Option<&NodeKindDef> {
        self.kinds.get(name)
    }

    /// All node kinds.
    pub fn kinds(&self) -> impl Iterator<Item = &NodeKindDef> {
        self.kinds.values()
    }
}

fn uid() -> FieldDescriptor {
    FieldDescriptor::new(IDENTIFIER_FIELD, FieldKind::Text)
}

fn section_kind() -> NodeKindDef {
    NodeKindDef::new("SECTION")
        .with_field(uid())
        .with_field(FieldDescriptor::new("TITLE", FieldKind::Text).required())
}

fn text_kind() -> NodeKindDef {
    NodeKindDef::new("TEXT")
        .with_field(uid())
        .with_field(FieldDescriptor::new("STATEMENT", FieldKind::Multiline).required())
}

fn requirement_kind() -> NodeKindDef {
    NodeKindDef::new("REQUIREMENT")
        .with_field(uid())
        .with_field(FieldDescriptor::new("LEVEL", FieldKind::Text))
        .with_field(FieldDescriptor::new("STATUS", FieldKind::Text))
        .with_field(FieldDescriptor::new("TAGS", FieldKind::Text))
        .with_field(FieldDescriptor::new("TITLE", FieldKind::Text))
        .with_field(FieldDescriptor::new("STATEMENT", FieldKind::Multiline))
        .with_field(FieldDescriptor::new("RATIONALE", FieldKind::Multiline))
        .with_field(
            FieldDescriptor::new("COMMENT", FieldKind::Multiline)
                .with_multiplicity(Multiplicity::Many),
        )
        .with_field(
            FieldDescriptor::new("PARENT", FieldKind::Reference(LinkKind::TracesTo))
                .with_multiplicity(Multiplicity::Many),
        )
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test]
    fn default_schema_has_builtin_kinds() {
        let schema = Schema::default();
        let names: Vec<_> = schema.kinds().map(NodeKindDef::name).collect();
        assert_eq!(names, ["SECTION", "TEXT", "REQUIREMENT"]);
        assert!(!schema.is_declared());
    }

    #[test]
    fn declared_schema_replaces_requirement_kind() {
        let schema = Schema::declared([NodeKindDef::new("HAZARD")]);
        assert!(schema.kind("REQUIREMENT").is_none());
        assert!(schema.kind("SECTION").is_some());
        assert!(schema.kind("HAZARD").is_some());
    }

    #[test]
    fn field_names_are_unique_per_kind() {
        let mut kind = NodeKindDef::new("REQ");
        assert!(kind.add_field(FieldDescriptor::new("TITLE", FieldKind::Text)));
        assert!(!kind.add_field(FieldDescriptor::new("TITLE", FieldKind::Number)));
        assert_eq!(kind.field("TITLE").unwrap().kind(), &FieldKind::Text);
    }

    #[test_case("TracesTo", LinkKind::TracesTo; "traces to")]
    #[test_case("Parent", LinkKind::TracesTo; "parent alias")]
    #[test_case("Duplicates", LinkKind::Duplicates; "duplicates")]
    #[test_case("Verifies", LinkKind::Custom("Verifies".to_string()); "custom")]
    fn parses_link_kinds(raw: &str, expected: LinkKind) {
        assert_eq!(raw.parse::<LinkKind>().unwrap(), expected);
    }

    #[test]
    fn text_rejects_multiline_values() {
        let descriptor = FieldDescriptor::new("TITLE", FieldKind::Text);
        assert_eq!(
            descriptor.check(&FieldValue::from("a\nb"), FieldLayout::Inline),
            Err(ValueError::ExpectedSingleLine)
        );
        assert_eq!(
            descriptor.check(&FieldValue::from("a"), FieldLayout::Multiline),
            Err(ValueError::ExpectedSingleLine)
        );
    }

    #[test_case("3", true; "integer")]
    #[test_case("-2.5", true; "negative decimal")]
    #[test_case("three", false; "word")]
    #[test_case("inf", false; "infinity")]
    fn number_values(raw: &str, valid: bool) {
        let descriptor = FieldDescriptor::new("PRIORITY", FieldKind::Number);
        let result = descriptor.check(&FieldValue::from(raw), FieldLayout::Inline);
        assert_eq!(result.is_ok(), valid);
    }

    #[test]
    fn enum_values_must_be_declared_options() {
        let descriptor = FieldDescriptor::new(
            "STATUS",
            FieldKind::Enum(vec!["Draft".to_string(), "Active".to_string()]),
        );
        assert!(
            descriptor
                .check(&FieldValue::from("Active"), FieldLayout::Inline)
                .is_ok()
        );
        assert!(matches!(
            descriptor.check(&FieldValue::from("Done"), FieldLayout::Inline),
            Err(ValueError::NotAnOption { .. })
        ));
    }

    #[test]
    fn multiplicity_governs_lists() {
        let one = FieldDescriptor::new("PARENT", FieldKind::Reference(LinkKind::TracesTo));
        let many = one.clone().with_multiplicity(Multiplicity::Many);
        let list = FieldValue::List(vec!["REQ-1".to_string(), "REQ-2".to_string()]);

        assert_eq!(
            one.check(&list, FieldLayout::List),
            Err(ValueError::ExpectedSingle)
        );
        assert!(many.check(&list, FieldLayout::List).is_ok());
        assert_eq!(
            many.check(&FieldValue::List(Vec::new()), FieldLayout::List),
            Err(ValueError::EmptyList)
        );
    }

    #[test]
    fn identifier_field_requires_identifier_syntax() {
        let descriptor = FieldDescriptor::new(IDENTIFIER_FIELD, FieldKind::Text);
        assert!(matches!(
            descriptor.check(&FieldValue::from("not an id"), FieldLayout::Inline),
            Err(ValueError::InvalidIdentifier(_))
        ));
    }
}
