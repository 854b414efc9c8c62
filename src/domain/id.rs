use std::{
    borrow::Borrow,
    fmt,
    hash::{Hash, Hasher},
    ops::Deref,
    str::FromStr,
    sync::LazyLock,
};

use non_empty_string::NonEmptyString;
use regex::Regex;
use serde::{Serialize, Serializer};

static NODE_ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.:/\-]*$").expect("node identifier pattern is valid")
});

/// The identifier of a node, unique within a project.
///
/// Authored identifiers come from the `UID` field and must match
/// `[A-Za-z0-9_][A-Za-z0-9_.:/-]*`. Nodes without a `UID` receive a
/// synthetic identifier of the form `<document>#<n>`, which can never collide
/// with an authored one.
///
/// ```
/// use sdoc::NodeId;
///
/// let id: NodeId = "REQ-001".parse().unwrap();
/// assert_eq!(id.as_str(), "REQ-001");
/// assert!(!id.is_synthetic());
/// assert!("REQ 001".parse::<NodeId>().is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct NodeId(NonEmptyString);

impl NodeId {
    /// Creates an authored identifier.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidIdError`] if the string is empty or contains
    /// characters outside the identifier alphabet.
    pub fn new(s: String) -> Result<Self, InvalidIdError> {
        if !NODE_ID_PATTERN.is_match(&s) {
            return Err(InvalidIdError(s));
        }
        NonEmptyString::new(s).map(Self).map_err(InvalidIdError)
    }

    /// Creates the synthetic identifier for the `ordinal`-th anonymous node of
    /// a document.
    #[must_use]
    pub fn synthetic(document: &DocumentId, ordinal: usize) -> Self {
        let raw = format!("{document}#{ordinal}");
        // document ids are never empty, so neither is the formatted string
        Self(NonEmptyString::new(raw).unwrap_or_else(|_| unreachable!()))
    }

    /// Whether this identifier was generated rather than authored.
    #[must_use]
    pub fn is_synthetic(&self) -> bool {
        self.as_str().contains('#')
    }

    /// Returns the string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Hash for NodeId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_str().hash(state);
    }
}

impl Borrow<str> for NodeId {
    fn borrow(&self) -> &str {
        self.as_str()
    }
}

impl Deref for NodeId {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        self.as_str()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeId {
    type Err = InvalidIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<&str> for NodeId {
    type Error = InvalidIdError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::from_str(value)
    }
}

impl Serialize for NodeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Error returned when a string is not a valid authored node identifier.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("Invalid node identifier '{0}': expected [A-Za-z0-9_][A-Za-z0-9_.:/-]*")]
pub struct InvalidIdError(String);

/// The identifier of a document, supplied by the caller when a source is
/// loaded (typically a relative path).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct DocumentId(NonEmptyString);

impl DocumentId {
    /// Creates a document identifier.
    ///
    /// # Errors
    ///
    /// Returns [`EmptyDocumentIdError`] if the string is empty.
    pub fn new(s: impl Into<String>) -> Result<Self, EmptyDocumentIdError> {
        NonEmptyString::new(s.into())
            .map(Self)
            .map_err(|_| EmptyDocumentIdError)
    }

    /// Returns the string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Hash for DocumentId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_str().hash(state);
    }
}

impl Borrow<str> for DocumentId {
    fn borrow(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentId {
    type Err = EmptyDocumentIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl Serialize for DocumentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Error returned when constructing a [`DocumentId`] from an empty string.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("document identifiers cannot be empty")]
pub struct EmptyDocumentIdError;

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case("REQ-1"; "kind and number")]
    #[test_case("REQ-ROOT"; "all alphabetic")]
    #[test_case("sys.brake/3"; "dotted path")]
    #[test_case("_internal"; "leading underscore")]
    fn accepts_authored_ids(raw: &str) {
        let id = NodeId::from_str(raw).unwrap();
        assert_eq!(id.as_str(), raw);
        assert!(!id.is_synthetic());
    }

    #[test_case(""; "empty")]
    #[test_case("REQ 1"; "embedded space")]
    #[test_case("-REQ"; "leading dash")]
    #[test_case("doc#1"; "synthetic marker")]
    fn rejects_malformed_ids(raw: &str) {
        assert!(NodeId::from_str(raw).is_err());
    }

    #[test]
    fn synthetic_ids_cannot_collide_with_authored_ones() {
        let document = DocumentId::new("specs/brakes.sdoc").unwrap();
        let id = NodeId::synthetic(&document, 3);
        assert_eq!(id.as_str(), "specs/brakes.sdoc#3");
        assert!(id.is_synthetic());
        assert!(NodeId::from_str(id.as_str()).is_err());
    }

    #[test]
    fn empty_document_id_is_rejected() {
        assert_eq!(DocumentId::new(""), Err(EmptyDocumentIdError));
    }
}
