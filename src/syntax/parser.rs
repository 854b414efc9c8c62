use std::{borrow::Cow, sync::Arc};

use pest::{
    Parser,
    error::{Error as PestError, LineColLocation},
    iterators::Pair,
};

use super::{
    SyntaxBlock, SyntaxError, SyntaxField, SyntaxTree,
    grammar::{Rule, SdocParser},
};
use crate::domain::{
    DocumentId,
    node::{BlockStyle, FieldLayout, FieldValue},
    schema::Schema,
};

/// Source text with a guaranteed final newline and a line-start table.
pub(super) struct Source<'a> {
    text: Cow<'a, str>,
    final_newline: bool,
    line_starts: Vec<usize>,
}

impl<'a> Source<'a> {
    pub(super) fn new(text: &'a str) -> Self {
        let final_newline = text.is_empty() || text.ends_with('\n');
        let text = if final_newline {
            Cow::Borrowed(text)
        } else {
            Cow::Owned(format!("{text}\n"))
        };
        let line_starts = std::iter::once(0)
            .chain(text.match_indices('\n').map(|(offset, _)| offset + 1))
            .collect();
        Self {
            text,
            final_newline,
            line_starts,
        }
    }

    /// 1-based line containing a byte offset.
    fn line(&self, offset: usize) -> usize {
        self.line_starts.partition_point(|&start| start <= offset)
    }

    fn line_count(&self) -> usize {
        self.line_starts.len() - 1
    }
}

/// One `- TITLE: ...` entry of an element declaration.
#[derive(Debug)]
pub(super) struct FieldDecl {
    pub(super) line: usize,
    pub(super) attributes: Vec<(String, String, usize)>,
}

/// One `- TAG: ...` entry of a `[GRAMMAR]` block.
#[derive(Debug)]
pub(super) struct ElementDecl {
    pub(super) name: String,
    pub(super) line: usize,
    pub(super) fields: Vec<FieldDecl>,
}

/// Parses the `[DOCUMENT]` header and returns the `[GRAMMAR]` declarations,
/// if any.
pub(super) fn parse_preamble(
    source: &Source<'_>,
    document: &DocumentId,
) -> Result<Option<Vec<ElementDecl>>, SyntaxError> {
    let mut pairs = SdocParser::parse(Rule::preamble, &source.text)
        .map_err(|error| syntax_error(error, document))?;
    let Some(preamble) = pairs.next() else {
        return Ok(None);
    };

    Ok(preamble
        .into_inner()
        .find(|pair| pair.as_rule() == Rule::grammar)
        .map(|grammar| {
            grammar
                .into_inner()
                .filter(|pair| pair.as_rule() == Rule::element)
                .map(|element| element_decl(source, element))
                .collect()
        }))
}

fn element_decl(source: &Source<'_>, element: Pair<'_, Rule>) -> ElementDecl {
    let line = source.line(element.as_span().start());
    let mut inner = element.into_inner();
    let name = inner
        .next()
        .map(|pair| pair.as_str().to_string())
        .unwrap_or_default();
    let fields = inner
        .filter(|pair| pair.as_rule() == Rule::field_decl)
        .map(|decl| FieldDecl {
            line: source.line(decl.as_span().start()),
            attributes: decl
                .into_inner()
                .map(|attribute| {
                    let line = source.line(attribute.as_span().start());
                    let mut parts = attribute.into_inner();
                    let name = parts.next().map(|p| p.as_str()).unwrap_or_default();
                    let value = parts.next().map(|p| p.as_str().trim_end()).unwrap_or_default();
                    (name.to_string(), value.to_string(), line)
                })
                .collect(),
        })
        .collect();

    ElementDecl { name, line, fields }
}

/// Parses a whole document into blocks.
pub(super) fn parse_content(
    source: &Source<'_>,
    document: &DocumentId,
    schema: &Arc<Schema>,
) -> Result<SyntaxTree, SyntaxError> {
    let mut pairs = SdocParser::parse(Rule::document, &source.text)
        .map_err(|error| syntax_error(error, document))?;

    let mut tree = SyntaxTree {
        document: document.clone(),
        schema: Arc::clone(schema),
        preamble: String::new(),
        header: Vec::new(),
        blocks: Vec::new(),
        trailing: String::new(),
        final_newline: source.final_newline,
        line_count: source.line_count(),
    };

    let Some(root) = pairs.next() else {
        return Ok(tree);
    };

    for pair in root.into_inner() {
        match pair.as_rule() {
            Rule::preamble => {
                tree.preamble = pair.as_str().to_string();
                if let Some(header) = pair.into_inner().find(|p| p.as_rule() == Rule::header) {
                    tree.header = header
                        .into_inner()
                        .filter(|p| p.as_rule() == Rule::field)
                        .map(|p| field(source, p))
                        .collect();
                }
            }
            Rule::body => {
                for node in pair.into_inner() {
                    block(source, node, None, &mut tree.blocks);
                }
            }
            Rule::trivia => tree.trailing = pair.as_str().to_string(),
            _ => {}
        }
    }

    Ok(tree)
}

fn block(
    source: &Source<'_>,
    node: Pair<'_, Rule>,
    parent: Option<usize>,
    blocks: &mut Vec<SyntaxBlock>,
) {
    let end_line = source.line(node.as_span().end().saturating_sub(1));
    let mut inner = node.into_inner();
    let leading = inner
        .next()
        .map(|pair| pair.as_str().to_string())
        .unwrap_or_default();
    let Some(content) = inner.next() else {
        return;
    };

    let style = match content.as_rule() {
        Rule::section => BlockStyle::Section,
        Rule::composite => BlockStyle::Composite,
        _ => BlockStyle::Leaf,
    };

    let index = blocks.len();
    blocks.push(SyntaxBlock {
        kind: String::new(),
        style,
        marker: String::new(),
        fields: Vec::new(),
        leading,
        closing: None,
        parent,
        start_line: source.line(content.as_span().start()),
        end_line,
    });

    for part in content.into_inner() {
        match part.as_rule() {
            Rule::section_open => {
                blocks[index].kind = "SECTION".to_string();
                blocks[index].marker = part.as_str().to_string();
            }
            Rule::composite_open | Rule::leaf_open => {
                blocks[index].marker = part.as_str().to_string();
                if let Some(name) = part.into_inner().next() {
                    blocks[index].kind = name.as_str().to_string();
                }
            }
            Rule::field => {
                let field = field(source, part);
                blocks[index].fields.push(field);
            }
            Rule::body => {
                for child in part.into_inner() {
                    block(source, child, Some(index), blocks);
                }
            }
            Rule::section_close | Rule::composite_close => {
                blocks[index].closing = Some(part.as_str().to_string());
            }
            _ => {}
        }
    }
}

fn field(source: &Source<'_>, pair: Pair<'_, Rule>) -> SyntaxField {
    let line = source.line(pair.as_span().start());
    let raw = pair.as_str().to_string();
    let mut inner = pair.into_inner();
    let name = inner
        .next()
        .map(|p| p.as_str().to_string())
        .unwrap_or_default();

    let (value, layout) = match inner.next() {
        Some(value) if value.as_rule() == Rule::multiline => {
            let body = value.into_inner().next().map_or("", |p| p.as_str());
            let body = body
                .strip_suffix("\r\n")
                .or_else(|| body.strip_suffix('\n'))
                .unwrap_or(body);
            (FieldValue::Single(body.to_string()), FieldLayout::Multiline)
        }
        Some(value) if value.as_rule() == Rule::list => {
            let items = value
                .into_inner()
                .filter_map(|item| item.into_inner().next())
                .map(|text| text.as_str().trim_end().to_string())
                .collect();
            (FieldValue::List(items), FieldLayout::List)
        }
        Some(value) => {
            let text = value.into_inner().next().map_or("", |p| p.as_str());
            (
                FieldValue::Single(text.trim_end().to_string()),
                FieldLayout::Inline,
            )
        }
        None => (FieldValue::Single(String::new()), FieldLayout::Inline),
    };

    SyntaxField {
        name,
        value,
        layout,
        raw,
        line,
    }
}

fn syntax_error(error: PestError<Rule>, document: &DocumentId) -> SyntaxError {
    let error = error.renamed_rules(describe);
    let (line, column) = match error.line_col {
        LineColLocation::Pos(position) | LineColLocation::Span(position, _) => position,
    };
    SyntaxError {
        document: document.clone(),
        line,
        column,
        message: error.variant.message().into_owned(),
    }
}

fn describe(rule: &Rule) -> String {
    let text = match rule {
        Rule::name => "a name in capitals",
        Rule::text => "a value",
        Rule::field => "a field",
        Rule::inline => "an inline value",
        Rule::multiline => "'>>>'",
        Rule::list | Rule::item => "'- item'",
        Rule::section_open => "'[SECTION]'",
        Rule::section_close => "'[/SECTION]'",
        Rule::composite_open => "'[[KIND]]'",
        Rule::composite_close => "the matching '[[/KIND]]'",
        Rule::leaf_open => "'[KIND]'",
        Rule::node => "a block",
        Rule::document_open => "'[DOCUMENT]'",
        Rule::grammar_open => "'[GRAMMAR]'",
        Rule::element => "'- TAG: KIND'",
        Rule::field_decl | Rule::attribute => "a field declaration",
        Rule::EOI => "end of document",
        other => return format!("{other:?}"),
    };
    text.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> SyntaxTree {
        let source = Source::new(text);
        let document = DocumentId::new("test.sdoc").unwrap();
        parse_content(&source, &document, &Arc::new(Schema::default())).unwrap()
    }

    fn error(text: &str) -> SyntaxError {
        let source = Source::new(text);
        let document = DocumentId::new("test.sdoc").unwrap();
        parse_content(&source, &document, &Arc::new(Schema::default())).unwrap_err()
    }

    #[test]
    fn splits_blocks_and_fields() {
        let tree = parse(
            "[DOCUMENT]\nTITLE: Brakes\n\n[SECTION]\nTITLE: Scope\n\n[REQUIREMENT]\nUID: REQ-1\nPARENT:\n- REQ-ROOT\n- REQ-2\nSTATEMENT: >>>\nline one\nline two\n<<<\n\n[/SECTION]\n",
        );

        assert_eq!(tree.header.len(), 1);
        assert_eq!(tree.blocks.len(), 2);

        let section = &tree.blocks[0];
        assert_eq!(section.kind, "SECTION");
        assert_eq!(section.style, BlockStyle::Section);
        assert_eq!(section.start_line, 4);
        assert_eq!(section.end_line, 17);
        assert_eq!(section.closing.as_deref(), Some("\n[/SECTION]\n"));

        let requirement = &tree.blocks[1];
        assert_eq!(requirement.parent, Some(0));
        assert_eq!(requirement.start_line, 7);
        assert_eq!(requirement.leading, "\n");
        assert_eq!(
            requirement.fields[1].value,
            FieldValue::List(vec!["REQ-ROOT".to_string(), "REQ-2".to_string()])
        );
        assert_eq!(
            requirement.fields[2].value,
            FieldValue::Single("line one\nline two".to_string())
        );
        assert_eq!(requirement.fields[2].layout, FieldLayout::Multiline);
        assert_eq!(requirement.fields[2].line, 12);
    }

    #[test]
    fn composite_blocks_nest() {
        let tree = parse(
            "[DOCUMENT]\nTITLE: T\n\n[[REQUIREMENT]]\nUID: A\n\n[[REQUIREMENT]]\nUID: B\n[[/REQUIREMENT]]\n\n[TEXT]\nSTATEMENT: x\n[[/REQUIREMENT]]\n",
        );
        let parents: Vec<_> = tree.blocks.iter().map(|b| b.parent).collect();
        assert_eq!(parents, [None, Some(0), Some(0)]);
        assert_eq!(tree.blocks[1].style, BlockStyle::Composite);
        assert_eq!(tree.blocks[2].style, BlockStyle::Leaf);
    }

    #[test]
    fn missing_final_newline_is_remembered() {
        let tree = parse("[DOCUMENT]\nTITLE: T\n\n[TEXT]\nSTATEMENT: x");
        assert!(!tree.final_newline);
        assert_eq!(tree.blocks[0].fields[0].raw, "STATEMENT: x\n");
    }

    #[test]
    fn unclosed_section_is_a_syntax_error() {
        let error = error("[DOCUMENT]\nTITLE: T\n\n[SECTION]\nTITLE: S\n");
        assert_eq!(error.line, 6);
    }

    #[test]
    fn mismatched_composite_close_is_a_syntax_error() {
        let error = error("[DOCUMENT]\nTITLE: T\n\n[[REQUIREMENT]]\nUID: A\n[[/TEXT]]\n");
        assert_eq!(error.line, 6);
    }

    #[test]
    fn unterminated_multiline_is_a_syntax_error() {
        let error = error("[DOCUMENT]\nTITLE: T\n\n[TEXT]\nSTATEMENT: >>>\nbody\n");
        assert!(error.line >= 5);
    }

    #[test]
    fn document_header_must_come_first() {
        let error = error("[SECTION]\nTITLE: S\n[/SECTION]\n");
        assert_eq!((error.line, error.column), (1, 1));
    }
}
