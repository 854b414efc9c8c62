//! Writing nodes and documents back to SDoc text.
//!
//! Untouched regions are copied from the source verbatim; only fields that
//! were edited (or nodes that were inserted) are rendered afresh.

use crate::domain::{
    Document,
    node::{BlockStyle, Field, FieldLayout, FieldValue, LineEnding, Node, NodeKey},
    schema::ValueError,
};

/// Writes a node's own block: its opening marker and fields.
///
/// Children and the closing marker of a container are written by the
/// enclosing document. For a node that has not been edited the result is its
/// source text, byte for byte. Rendered lines end the way the node's
/// document does.
#[must_use]
pub fn serialize_node(node: &Node) -> String {
    let line_ending = node.layout.line_ending;
    let mut out = String::new();
    match &node.layout.marker {
        Some(marker) => out.push_str(marker),
        None => out.push_str(&opening_marker(node.style(), node.kind(), line_ending)),
    }
    for field in node.fields() {
        match field.raw() {
            Some(raw) => out.push_str(raw),
            None => out.push_str(&render_field(field, line_ending)),
        }
    }
    out
}

/// Renders a field in its layout, ignoring any source text.
pub(crate) fn render_field(field: &Field, line_ending: LineEnding) -> String {
    let name = field.name();
    let nl = line_ending.as_str();
    match (field.layout(), field.value()) {
        (FieldLayout::List, value) => {
            let mut out = format!("{name}:{nl}");
            for item in value.items() {
                out.push_str("- ");
                out.push_str(item);
                out.push_str(nl);
            }
            out
        }
        (FieldLayout::Multiline, value) => format!(
            "{name}: >>>{nl}{}{nl}<<<{nl}",
            line_ending.apply(&value.joined())
        ),
        (FieldLayout::Inline, value) => format!("{name}: {}{nl}", value.joined()),
    }
}

/// Writes a whole document, looking nodes up by key.
pub(crate) fn write_document<'a, F>(document: &Document, lookup: F) -> String
where
    F: Fn(NodeKey) -> Option<&'a Node>,
{
    let mut out = document.preamble.clone();
    for &root in document.roots() {
        write_subtree(root, &lookup, &mut out);
    }
    out.push_str(&document.trailing);

    if !document.final_newline {
        if out.ends_with("\r\n") {
            out.truncate(out.len() - 2);
        } else if out.ends_with('\n') {
            out.truncate(out.len() - 1);
        }
    }
    out
}

fn write_subtree<'a, F>(key: NodeKey, lookup: &F, out: &mut String)
where
    F: Fn(NodeKey) -> Option<&'a Node>,
{
    let Some(node) = lookup(key) else {
        return;
    };

    out.push_str(&node.layout.leading);
    out.push_str(&serialize_node(node));
    for &child in node.children() {
        write_subtree(child, lookup, out);
    }

    if node.style().is_container() {
        match &node.layout.closing {
            Some(closing) => out.push_str(closing),
            None => out.push_str(&closing_marker(
                node.style(),
                node.kind(),
                node.layout.line_ending,
            )),
        }
    }
}

fn opening_marker(style: BlockStyle, kind: &str, line_ending: LineEnding) -> String {
    let nl = line_ending.as_str();
    match style {
        BlockStyle::Leaf => format!("[{kind}]{nl}"),
        BlockStyle::Section => format!("[SECTION]{nl}"),
        BlockStyle::Composite => format!("[[{kind}]]{nl}"),
    }
}

fn closing_marker(style: BlockStyle, kind: &str, line_ending: LineEnding) -> String {
    let nl = line_ending.as_str();
    match style {
        BlockStyle::Leaf => String::new(),
        BlockStyle::Section => format!("{nl}[/SECTION]{nl}"),
        BlockStyle::Composite => format!("{nl}[[/{kind}]]{nl}"),
    }
}

/// Checks that a value written in `layout` reads back unchanged.
pub(crate) fn check_representable(
    value: &FieldValue,
    layout: FieldLayout,
) -> Result<(), ValueError> {
    let unrepresentable = || ValueError::Unrepresentable(value.joined());

    match (layout, value) {
        (FieldLayout::Multiline, FieldValue::Single(text)) => {
            if text.lines().any(|line| line.trim_end() == "<<<") {
                return Err(unrepresentable());
            }
        }
        (FieldLayout::Inline, FieldValue::Single(text)) => {
            let single_line = !text.contains(['\n', '\r']);
            let trimmed = !text.is_empty() && text.trim() == text;
            if !single_line || !trimmed || text.trim_end() == ">>>" {
                return Err(unrepresentable());
            }
        }
        (FieldLayout::List, FieldValue::List(items)) => {
            let valid = items.iter().all(|item| {
                !item.is_empty() && item.trim() == item && !item.contains(['\n', '\r'])
            });
            if !valid {
                return Err(unrepresentable());
            }
        }
        _ => return Err(unrepresentable()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;
    use crate::{
        domain::{DocumentId, build_tree, diagnostics::Diagnostics},
        index::{NewNode, load_sources},
        syntax::{parse_document, resolve_schema},
    };

    fn document() -> DocumentId {
        DocumentId::new("doc.sdoc").unwrap()
    }

    fn round_trip(source: &str) -> String {
        let document = document();
        let mut diagnostics = Diagnostics::new();
        let schema = resolve_schema(source, &document, &mut diagnostics).unwrap();
        let syntax = parse_document(source, &document, &schema, &mut diagnostics).unwrap();
        build_tree(syntax, &mut diagnostics).unwrap().to_source()
    }

    #[test_case("[DOCUMENT]\nTITLE: T\n"; "header only")]
    #[test_case("[DOCUMENT]\nTITLE: T\n\n\n[TEXT]\nSTATEMENT: x   \n\n\n"; "blank lines and trailing spaces")]
    #[test_case("[DOCUMENT]\r\nTITLE: T\r\n\r\n[TEXT]\r\nSTATEMENT: >>>\r\na\r\n<<<\r\n"; "crlf line endings")]
    #[test_case("[DOCUMENT]\nTITLE: T\n\n[SECTION]\nTITLE: S\n\n[[REQUIREMENT]]\nUID: A\n\n[REQUIREMENT]\nUID: B\nPARENT:\n- A\n\n[[/REQUIREMENT]]\n\n[/SECTION]"; "nesting without final newline")]
    fn untouched_documents_round_trip_verbatim(source: &str) {
        assert_eq!(round_trip(source), source);
    }

    #[test]
    fn edited_crlf_documents_keep_their_line_endings() {
        let source = "[DOCUMENT]\r\nTITLE: T\r\n\r\n[[REQUIREMENT]]\r\nUID: R\r\nTITLE: a\r\n\r\n[[/REQUIREMENT]]\r\n";
        let index = load_sources(&[("doc.sdoc", source)]);
        index.apply_edit("R", "TITLE", "b", 1).unwrap();
        index.apply_edit("R", "STATEMENT", "x\ny", 2).unwrap();
        index
            .insert_node(NewNode::new(document(), "TEXT").under("R").with_field("STATEMENT", "z"))
            .unwrap();

        let text = index.serialize_document(&document()).unwrap();

        assert_eq!(
            text,
            "[DOCUMENT]\r\nTITLE: T\r\n\r\n[[REQUIREMENT]]\r\nUID: R\r\nTITLE: b\r\n\
             STATEMENT: >>>\r\nx\r\ny\r\n<<<\r\n\r\n[TEXT]\r\nSTATEMENT: z\r\n\r\n\
             [[/REQUIREMENT]]\r\n"
        );
        assert!(!text.replace("\r\n", "").contains('\n'));
    }

    #[test]
    fn renders_each_layout() {
        let inline = Field::new("TITLE", "Brakes".into());
        let multiline = Field::new("STATEMENT", "a\nb".into());
        let list = Field::new("PARENT", vec!["A", "B"].into());

        assert_eq!(render_field(&inline, LineEnding::Lf), "TITLE: Brakes\n");
        assert_eq!(
            render_field(&multiline, LineEnding::Lf),
            "STATEMENT: >>>\na\nb\n<<<\n"
        );
        assert_eq!(render_field(&list, LineEnding::Lf), "PARENT:\n- A\n- B\n");
        assert_eq!(
            render_field(&multiline, LineEnding::CrLf),
            "STATEMENT: >>>\r\na\r\nb\r\n<<<\r\n"
        );
    }

    #[test_case(FieldValue::from(" padded"), FieldLayout::Inline; "leading space")]
    #[test_case(FieldValue::from(""), FieldLayout::Inline; "empty inline")]
    #[test_case(FieldValue::from(">>>"), FieldLayout::Inline; "multiline opener")]
    #[test_case(FieldValue::from("a\n<<<\nb"), FieldLayout::Multiline; "multiline closer")]
    #[test_case(FieldValue::from(vec!["A", ""]), FieldLayout::List; "empty item")]
    fn rejects_values_that_would_not_read_back(value: FieldValue, layout: FieldLayout) {
        assert!(check_representable(&value, layout).is_err());
    }
}
