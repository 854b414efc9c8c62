use std::fmt;

use borsh::BorshSerialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::domain::{DocumentId, NodeId};

/// Stable internal key of a node.
///
/// Unlike the [`NodeId`], the key survives renames and stays distinct when
/// two documents declare the same identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey(Uuid);

impl NodeKey {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The value of a field: a single string or a list of strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    /// Inline or multiline text.
    Single(String),
    /// The items of a list field.
    List(Vec<String>),
}

impl FieldValue {
    /// Iterates over the value's items (one item for [`FieldValue::Single`]).
    pub fn items(&self) -> impl Iterator<Item = &str> {
        let items: &[String] = match self {
            Self::Single(value) => std::slice::from_ref(value),
            Self::List(items) => items,
        };
        items.iter().map(String::as_str)
    }

    /// The text of a single value.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Single(value) => Some(value),
            Self::List(_) => None,
        }
    }

    /// The value rendered as one string; list items are joined with `", "`.
    #[must_use]
    pub fn joined(&self) -> String {
        match self {
            Self::Single(value) => value.clone(),
            Self::List(items) => items.join(", "),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Single(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Single(value)
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(items: Vec<String>) -> Self {
        Self::List(items)
    }
}

impl From<Vec<&str>> for FieldValue {
    fn from(items: Vec<&str>) -> Self {
        Self::List(items.into_iter().map(str::to_string).collect())
    }
}

/// The textual form a field is written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldLayout {
    /// `NAME: value`
    Inline,
    /// `NAME: >>>` ... `<<<`
    Multiline,
    /// `NAME:` followed by `- item` lines.
    List,
}

impl FieldLayout {
    /// The layout used to write `value` when it has no original text.
    ///
    /// A multiline field keeps the multiline form even for a one-line value
    /// when it was written that way before.
    #[must_use]
    pub fn preferred(value: &FieldValue, previous: Option<Self>) -> Self {
        match value {
            FieldValue::List(_) => Self::List,
            FieldValue::Single(text) if text.contains('\n') => Self::Multiline,
            FieldValue::Single(_) if previous == Some(Self::Multiline) => Self::Multiline,
            FieldValue::Single(_) => Self::Inline,
        }
    }
}

/// One field of a node, as authored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    name: String,
    value: FieldValue,
    layout: FieldLayout,
    /// Original source text (including the final newline). `None` once the
    /// field has been edited or for fields that were never parsed.
    raw: Option<String>,
}

impl Field {
    /// Creates a field with no source text.
    #[must_use]
    pub fn new(name: impl Into<String>, value: FieldValue) -> Self {
        let layout = FieldLayout::preferred(&value, None);
        Self {
            name: name.into(),
            value,
            layout,
            raw: None,
        }
    }

    pub(crate) const fn parsed(
        name: String,
        value: FieldValue,
        layout: FieldLayout,
        raw: String,
    ) -> Self {
        Self {
            name,
            value,
            layout,
            raw: Some(raw),
        }
    }

    /// The field name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The field value.
    #[must_use]
    pub const fn value(&self) -> &FieldValue {
        &self.value
    }

    /// The layout the field is (or will be) written in.
    #[must_use]
    pub const fn layout(&self) -> FieldLayout {
        self.layout
    }

    /// The original source text, if the field is untouched.
    #[must_use]
    pub fn raw(&self) -> Option<&str> {
        self.raw.as_deref()
    }

    /// Replaces the value, dropping the original text.
    pub(crate) fn set_value(&mut self, value: FieldValue) {
        self.layout = FieldLayout::preferred(&value, Some(self.layout));
        self.value = value;
        self.raw = None;
    }
}

/// How a node's block is delimited in source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStyle {
    /// `[KIND]`, no children.
    Leaf,
    /// `[SECTION]` ... `[/SECTION]`.
    Section,
    /// `[[KIND]]` ... `[[/KIND]]`.
    Composite,
}

impl BlockStyle {
    /// Whether blocks of this style can hold children.
    #[must_use]
    pub const fn is_container(self) -> bool {
        !matches!(self, Self::Leaf)
    }
}

/// Where a node came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSpan {
    /// The originating document.
    pub document: DocumentId,
    /// First line of the block (1-based).
    pub start_line: usize,
    /// Last line of the block (1-based, inclusive).
    pub end_line: usize,
}

/// Source text surrounding a node's own block, kept so that serialization
/// reproduces untouched regions verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Layout {
    /// Opening marker line, if the node was parsed.
    pub(crate) marker: Option<String>,
    /// Blank lines preceding the opening marker.
    pub(crate) leading: String,
    /// Blank lines and closing marker of a container.
    pub(crate) closing: Option<String>,
    /// Line ending of the enclosing document, used for rendered text.
    pub(crate) line_ending: LineEnding,
}

impl Layout {
    pub(crate) fn fresh(line_ending: LineEnding) -> Self {
        Self {
            marker: None,
            leading: line_ending.as_str().to_string(),
            closing: None,
            line_ending,
        }
    }
}

/// How a document terminates its lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) enum LineEnding {
    #[default]
    Lf,
    CrLf,
}

impl LineEnding {
    /// The ending of the first line of `text`.
    pub(crate) fn detect(text: &str) -> Self {
        match text.find('\n') {
            Some(end) if text[..end].ends_with('\r') => Self::CrLf,
            _ => Self::Lf,
        }
    }

    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Self::Lf => "\n",
            Self::CrLf => "\r\n",
        }
    }

    /// Rewrites every line break in `text` to this ending.
    pub(crate) fn apply(self, text: &str) -> String {
        match self {
            Self::Lf => text.to_string(),
            Self::CrLf => text.replace("\r\n", "\n").replace('\n', "\r\n"),
        }
    }
}

/// A typed, addressable unit of content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub(crate) key: NodeKey,
    pub(crate) id: NodeId,
    pub(crate) kind: String,
    pub(crate) style: BlockStyle,
    pub(crate) document: DocumentId,
    pub(crate) fields: Vec<Field>,
    pub(crate) children: Vec<NodeKey>,
    pub(crate) parent: Option<NodeKey>,
    pub(crate) span: Option<SourceSpan>,
    pub(crate) version: u64,
    pub(crate) layout: Layout,
}

impl Node {
    /// The internal key.
    #[must_use]
    pub const fn key(&self) -> NodeKey {
        self.key
    }

    /// The project-wide identifier.
    #[must_use]
    pub const fn id(&self) -> &NodeId {
        &self.id
    }

    /// The node kind (block tag).
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// The block style.
    #[must_use]
    pub const fn style(&self) -> BlockStyle {
        self.style
    }

    /// The owning document.
    #[must_use]
    pub const fn document(&self) -> &DocumentId {
        &self.document
    }

    /// Authored fields in source order.
    #[must_use]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Looks up an authored field.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|field| field.name == name)
    }

    /// The authored value of a field.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<&FieldValue> {
        self.field(name).map(Field::value)
    }

    /// The text of a single-valued field.
    #[must_use]
    pub fn text(&self, name: &str) -> Option<&str> {
        self.value(name).and_then(FieldValue::as_str)
    }

    /// Keys of the children, in document order.
    #[must_use]
    pub fn children(&self) -> &[NodeKey] {
        &self.children
    }

    /// Key of the parent node, if any.
    #[must_use]
    pub const fn parent(&self) -> Option<NodeKey> {
        self.parent
    }

    /// Where the node was parsed from. `None` for inserted nodes.
    #[must_use]
    pub const fn span(&self) -> Option<&SourceSpan> {
        self.span.as_ref()
    }

    /// Incremented on every accepted mutation.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// A hash of the node's kind and field values.
    ///
    /// Layout and position do not contribute, so reformatting a node keeps
    /// its fingerprint.
    ///
    /// # Panics
    ///
    /// Panics if borsh serialization fails (which should never happen for this
    /// data structure).
    #[must_use]
    pub fn fingerprint(&self) -> String {
        #[derive(BorshSerialize)]
        struct FingerprintData<'a> {
            kind: &'a str,
            fields: Vec<(&'a str, Vec<&'a str>)>,
        }

        let data = FingerprintData {
            kind: &self.kind,
            fields: self
                .fields
                .iter()
                .map(|field| (field.name.as_str(), field.value.items().collect()))
                .collect(),
        };

        let encoded = borsh::to_vec(&data).expect("this should never fail");
        let hash = Sha256::digest(encoded);
        format!("{hash:x}")
    }

    pub(crate) fn field_mut(&mut self, name: &str) -> Option<&mut Field> {
        self.fields.iter_mut().find(|field| field.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(fields: Vec<Field>) -> Node {
        let document = DocumentId::new("doc").unwrap();
        Node {
            key: NodeKey::new(),
            id: NodeId::synthetic(&document, 1),
            kind: "REQUIREMENT".to_string(),
            style: BlockStyle::Leaf,
            document,
            fields,
            children: Vec::new(),
            parent: None,
            span: None,
            version: 1,
            layout: Layout::fresh(LineEnding::Lf),
        }
    }

    #[test]
    fn fingerprint_ignores_layout() {
        let inline = node(vec![Field::parsed(
            "TITLE".to_string(),
            FieldValue::from("Brakes"),
            FieldLayout::Inline,
            "TITLE: Brakes   \n".to_string(),
        )]);
        let fresh = node(vec![Field::new("TITLE", FieldValue::from("Brakes"))]);
        assert_eq!(inline.fingerprint(), fresh.fingerprint());
    }

    #[test]
    fn field_values_affect_fingerprint() {
        let a = node(vec![Field::new("TITLE", FieldValue::from("Brakes"))]);
        let b = node(vec![Field::new("TITLE", FieldValue::from("Braking"))]);
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn editing_a_field_drops_its_source_text() {
        let mut field = Field::parsed(
            "STATEMENT".to_string(),
            FieldValue::from("one line"),
            FieldLayout::Multiline,
            "STATEMENT: >>>\none line\n<<<\n".to_string(),
        );
        field.set_value(FieldValue::from("another line"));
        assert_eq!(field.raw(), None);
        assert_eq!(field.layout(), FieldLayout::Multiline);
    }
}
