//! Boolean queries over nodes.
//!
//! ```
//! use sdoc::Query;
//!
//! let query: Query = r#"(node.is_requirement and "Draft" in node["STATUS"])"#
//!     .parse()
//!     .unwrap();
//! assert!(matches!(query, Query::And(_)));
//! ```

use std::str::FromStr;

use pest::{
    Parser,
    error::{Error as PestError, LineColLocation},
    iterators::{Pair, Pairs},
};

use super::{ProjectIndex, effective_value, links::LinkTable};
use crate::domain::{BlockStyle, FieldValue, LinkKind, Node, Schema};

mod grammar {
    use pest_derive::Parser;

    #[derive(Parser)]
    #[grammar = "index/query.pest"]
    pub(super) struct QueryParser;
}

use grammar::{QueryParser, Rule};

/// A parsed query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// `(a and b and ...)`
    And(Vec<Query>),
    /// `(a or b or ...)`
    Or(Vec<Query>),
    /// `not a`
    Not(Box<Query>),
    /// `node.is_requirement`: any kind other than `SECTION` and `TEXT`.
    IsRequirement,
    /// `node.is_section`
    IsSection,
    /// `node.is_root`: a top-level node of its document.
    IsRoot,
    /// `node.has_parent_requirements`: the node traces to at least one
    /// existing node.
    HasParentRequirements,
    /// `node.has_child_requirements`: at least one node traces to this one.
    HasChildRequirements,
    /// `a == b`
    Equal(Operand, Operand),
    /// `a != b`
    NotEqual(Operand, Operand),
    /// `a in b`: list membership when `b` is a list field, substring
    /// otherwise.
    In(Operand, Operand),
    /// `a not in b`
    NotIn(Operand, Operand),
}

/// One side of a comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    /// `node["NAME"]`, with the schema default when the field is absent.
    Field(String),
    /// `"text"`
    Text(String),
    /// `None`
    None,
}

/// A query that does not parse.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid query at column {column}: {message}")]
pub struct QueryError {
    /// 1-based column of the problem.
    pub column: usize,
    /// What was expected.
    pub message: String,
}

impl QueryError {
    fn from_pest(error: PestError<Rule>) -> Self {
        let error = error.renamed_rules(describe);
        let (_, column) = match error.line_col {
            LineColLocation::Pos(position) | LineColLocation::Span(position, _) => position,
        };
        Self {
            column,
            message: error.variant.message().into_owned(),
        }
    }

    fn malformed(pair: &Pair<'_, Rule>) -> Self {
        Self {
            column: pair.as_span().start() + 1,
            message: format!("unexpected '{}'", pair.as_str()),
        }
    }
}

fn describe(rule: &Rule) -> String {
    let text = match rule {
        Rule::field => "node[\"FIELD\"]",
        Rule::field_name => "a field name",
        Rule::string => "a quoted string",
        Rule::none => "None",
        Rule::EOI => "end of query",
        _ => "an expression",
    };
    text.to_string()
}

impl FromStr for Query {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let empty = || QueryError {
            column: 1,
            message: "empty query".to_string(),
        };
        let query = QueryParser::parse(Rule::query, s)
            .map_err(QueryError::from_pest)?
            .next()
            .ok_or_else(empty)?;
        let expression = query.into_inner().next().ok_or_else(empty)?;
        build(expression)
    }
}

fn build(pair: Pair<'_, Rule>) -> Result<Query, QueryError> {
    let rule = pair.as_rule();
    let malformed = QueryError::malformed(&pair);
    let mut inner = pair.into_inner();

    let query = match rule {
        Rule::conjunction => Query::And(inner.map(build).collect::<Result<_, _>>()?),
        Rule::disjunction => Query::Or(inner.map(build).collect::<Result<_, _>>()?),
        Rule::negation => {
            let negated = inner.next().ok_or_else(|| malformed.clone())?;
            Query::Not(Box::new(build(negated)?))
        }
        Rule::is_requirement => Query::IsRequirement,
        Rule::is_section => Query::IsSection,
        Rule::is_root => Query::IsRoot,
        Rule::has_parent => Query::HasParentRequirements,
        Rule::has_child => Query::HasChildRequirements,
        Rule::equal => {
            let (lhs, rhs) = operands(&mut inner, &malformed)?;
            Query::Equal(lhs, rhs)
        }
        Rule::not_equal => {
            let (lhs, rhs) = operands(&mut inner, &malformed)?;
            Query::NotEqual(lhs, rhs)
        }
        Rule::in_expr => {
            let (lhs, rhs) = operands(&mut inner, &malformed)?;
            Query::In(lhs, rhs)
        }
        Rule::not_in_expr => {
            let (lhs, rhs) = operands(&mut inner, &malformed)?;
            Query::NotIn(lhs, rhs)
        }
        _ => return Err(malformed),
    };
    Ok(query)
}

fn operands(
    inner: &mut Pairs<'_, Rule>,
    malformed: &QueryError,
) -> Result<(Operand, Operand), QueryError> {
    let lhs = inner.next().ok_or_else(|| malformed.clone())?;
    let rhs = inner.next().ok_or_else(|| malformed.clone())?;
    Ok((operand(lhs), operand(rhs)))
}

fn operand(pair: Pair<'_, Rule>) -> Operand {
    let rule = pair.as_rule();
    let inner = pair
        .into_inner()
        .next()
        .map(|inner| inner.as_str().to_string())
        .unwrap_or_default();
    match rule {
        Rule::field => Operand::Field(inner),
        Rule::string => Operand::Text(inner),
        _ => Operand::None,
    }
}

/// What a query is evaluated against.
struct Subject<'a> {
    node: &'a Node,
    schema: Option<&'a Schema>,
    links: &'a LinkTable,
}

impl Subject<'_> {
    fn value(&self, operand: &Operand) -> Option<FieldValue> {
        match operand {
            Operand::Field(name) => match self.schema {
                Some(schema) => effective_value(self.node, schema, name),
                None => self.node.value(name).cloned(),
            },
            Operand::Text(text) => Some(FieldValue::from(text.as_str())),
            Operand::None => None,
        }
    }

    fn contains(&self, needle: &Operand, haystack: &Operand) -> bool {
        let (Some(needle), Some(haystack)) = (self.value(needle), self.value(haystack)) else {
            return false;
        };
        let needle = needle.joined();
        match haystack {
            FieldValue::List(items) => items.iter().any(|item| *item == needle),
            FieldValue::Single(text) => text.contains(&needle),
        }
    }
}

impl Query {
    fn matches(&self, subject: &Subject<'_>) -> bool {
        let node = subject.node;
        match self {
            Self::And(all) => all.iter().all(|query| query.matches(subject)),
            Self::Or(any) => any.iter().any(|query| query.matches(subject)),
            Self::Not(query) => !query.matches(subject),
            Self::IsRequirement => !matches!(node.kind(), "SECTION" | "TEXT"),
            Self::IsSection => node.style() == BlockStyle::Section,
            Self::IsRoot => node.parent().is_none(),
            Self::HasParentRequirements => subject
                .links
                .outgoing(node.key())
                .any(|record| record.kind == LinkKind::TracesTo && record.resolved.is_some()),
            Self::HasChildRequirements => subject
                .links
                .incoming(node.key())
                .any(|record| record.kind == LinkKind::TracesTo),
            Self::Equal(lhs, rhs) => joined(subject, lhs) == joined(subject, rhs),
            Self::NotEqual(lhs, rhs) => joined(subject, lhs) != joined(subject, rhs),
            Self::In(needle, haystack) => subject.contains(needle, haystack),
            Self::NotIn(needle, haystack) => !subject.contains(needle, haystack),
        }
    }
}

fn joined(subject: &Subject<'_>, operand: &Operand) -> Option<String> {
    subject.value(operand).as_ref().map(FieldValue::joined)
}

impl ProjectIndex {
    /// The nodes matching a query, document by document in document order.
    #[must_use]
    pub fn find(&self, query: &Query) -> Vec<Node> {
        let structure = self.structure.read();
        let candidates: Vec<Node> = structure
            .order()
            .into_iter()
            .filter_map(|key| structure.snapshot(key))
            .collect();

        let links = self.links.lock();
        let found: Vec<Node> = candidates
            .into_iter()
            .filter(|node| {
                query.matches(&Subject {
                    node,
                    schema: structure.schema(node.document()),
                    links: &links,
                })
            })
            .collect();
        tracing::debug!(?query, matches = found.len(), "query evaluated");
        found
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;
    use crate::index::load_sources;

    const PROJECT: &str = "\
[DOCUMENT]
TITLE: Vehicle

[SECTION]
TITLE: Safety

[REQUIREMENT]
UID: REQ-ROOT
TITLE: Vehicle safety
STATUS: Active

[REQUIREMENT]
UID: REQ-1
TITLE: Brake system
STATUS: Draft
PARENT:
- REQ-ROOT

[REQUIREMENT]
UID: REQ-2
TAGS: brakes, hydraulics
PARENT:
- REQ-1
- REQ-ROOT

[/SECTION]

[TEXT]
STATEMENT: Closing note.
";

    fn matching(query: &str) -> Vec<String> {
        let index = load_sources(&[("vehicle.sdoc", PROJECT)]);
        index
            .find(&query.parse().unwrap())
            .iter()
            .map(|node| node.id().to_string())
            .collect()
    }

    #[test]
    fn parses_nested_expressions() {
        let query: Query = r#"(node.is_requirement and not (node["STATUS"] == None or "x" not in node["TAGS"]))"#
            .parse()
            .unwrap();

        assert_eq!(
            query,
            Query::And(vec![
                Query::IsRequirement,
                Query::Not(Box::new(Query::Or(vec![
                    Query::Equal(Operand::Field("STATUS".to_string()), Operand::None),
                    Query::NotIn(
                        Operand::Text("x".to_string()),
                        Operand::Field("TAGS".to_string())
                    ),
                ]))),
            ])
        );
    }

    #[test_case("node.is_requirement", &["REQ-ROOT", "REQ-1", "REQ-2"]; "requirements")]
    #[test_case("node.is_section", &["vehicle.sdoc#1"]; "sections")]
    #[test_case("node.is_root", &["vehicle.sdoc#1", "vehicle.sdoc#2"]; "top level")]
    #[test_case("node.has_parent_requirements", &["REQ-1", "REQ-2"]; "tracing up")]
    #[test_case("node.has_child_requirements", &["REQ-ROOT", "REQ-1"]; "traced to")]
    #[test_case(r#"node["STATUS"] == "Draft""#, &["REQ-1"]; "equality")]
    #[test_case(r#"(node.is_requirement and node["STATUS"] == None)"#, &["REQ-2"]; "missing field")]
    #[test_case(r#"(node.is_requirement and node["STATUS"] != "Draft")"#, &["REQ-ROOT", "REQ-2"]; "inequality")]
    #[test_case(r#""hydraulics" in node["TAGS"]"#, &["REQ-2"]; "substring")]
    #[test_case(r#""REQ-ROOT" in node["PARENT"]"#, &["REQ-1", "REQ-2"]; "list membership")]
    #[test_case(r#"(node.is_requirement and "REQ" not in node["PARENT"])"#, &["REQ-ROOT", "REQ-1", "REQ-2"]; "list items match whole")]
    #[test_case(r#"(node.is_section or node.is_root)"#, &["vehicle.sdoc#1", "vehicle.sdoc#2"]; "disjunction")]
    fn evaluates_queries_in_document_order(query: &str, expected: &[&str]) {
        assert_eq!(matching(query), expected);
    }

    #[test_case(""; "empty")]
    #[test_case("node.is_requirement and node.is_section"; "missing parentheses")]
    #[test_case(r#"node["STATUS"] =="#; "missing operand")]
    #[test_case(r#"None in node["TAGS"]"#; "none is not searchable")]
    fn rejects_malformed_queries(query: &str) {
        assert!(query.parse::<Query>().is_err());
    }

    #[test]
    fn errors_point_at_the_problem() {
        let error = r#"(node.is_root and nod)"#.parse::<Query>().unwrap_err();
        assert_eq!(error.column, 19);
    }
}
