//! Reconstruction of verse content from `sID`/`eID` milestone pairs.

use super::document::{Document, NodeId};

/// Content of one verse as a set of top-level nodes plus an exclusive
/// document-order limit. Every node of the span satisfies `id < limit`, which
/// is how an end marker nested inside a sibling truncates that sibling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerseSpan {
    pub start: NodeId,
    pub osis_id: String,
    pub items: Vec<NodeId>,
    pub limit: NodeId,
    pub end_marker: Option<NodeId>,
    pub end_nested: bool,
    pub closed: bool,
}

impl VerseSpan {
    pub fn markup(&self, doc: &Document) -> String {
        let mut out = String::new();
        for item in &self.items {
            doc.write_markup_before(*item, self.limit, &mut out);
        }
        out
    }

    /// All nodes of the span (top-level items and their bounded descendants)
    /// in document order.
    pub fn nodes<'a>(&'a self, doc: &'a Document) -> impl Iterator<Item = NodeId> + 'a {
        let limit = self.limit;
        self.items
            .iter()
            .flat_map(move |item| *item..doc.subtree_end(*item))
            .filter(move |id| *id < limit)
    }
}

pub fn is_verse_start(doc: &Document, id: NodeId) -> bool {
    if !doc.is_element(id, "verse") {
        return false;
    }
    if doc.attr(id, "sID").is_some() {
        return true;
    }
    doc.attr(id, "eID").is_none() && doc.attr(id, "osisID").is_some()
}

fn is_verse_end(doc: &Document, id: NodeId, sid: &str) -> bool {
    doc.is_element(id, "verse") && doc.attr(id, "eID") == Some(sid)
}

fn find_nested_end(doc: &Document, scope: NodeId, sid: &str) -> Option<NodeId> {
    doc.descendants(scope).find(|id| is_verse_end(doc, *id, sid))
}

/// A sibling that begins other content: the next verse or a chapter boundary.
/// Only consulted when the end marker is missing.
fn starts_foreign_content(doc: &Document, id: NodeId) -> bool {
    let begins = |node: NodeId| {
        (doc.is_element(node, "verse") && doc.attr(node, "sID").is_some())
            || doc.is_element(node, "chapter")
    };
    begins(id) || doc.descendants(id).any(begins)
}

/// Nearest chapter or book container of `id`, or the document root.
fn enclosing_scope(doc: &Document, id: NodeId) -> NodeId {
    doc.ancestors(id)
        .find(|ancestor| {
            doc.is_element(*ancestor, "chapter")
                || (doc.is_element(*ancestor, "div") && doc.attr(*ancestor, "type") == Some("book"))
        })
        .unwrap_or_else(|| doc.root())
}

/// Resolve the content of the verse whose start marker is `start`.
///
/// Never fails: when no matching end marker exists the span holds whatever
/// was collected before the next verse or chapter boundary and `closed` is
/// false.
pub fn resolve_verse(doc: &Document, start: NodeId) -> VerseSpan {
    let osis_id = doc
        .attr(start, "osisID")
        .or_else(|| doc.attr(start, "sID"))
        .unwrap_or_default()
        .to_string();

    let Some(sid) = doc.attr(start, "sID") else {
        return VerseSpan {
            start,
            osis_id,
            items: doc.children(start).to_vec(),
            limit: doc.subtree_end(start),
            end_marker: None,
            end_nested: false,
            closed: true,
        };
    };

    let scope = enclosing_scope(doc, start);
    let mut end_ahead = None;

    let mut items = Vec::new();
    let mut end_marker = None;
    let mut end_nested = false;
    let mut cursor = start;

    // An end marker in a later sibling of an ancestor (the next `l` of the
    // same `lg`) is reached by climbing until the chapter or book.
    'climb: loop {
        for sibling in doc.following_siblings(cursor) {
            if doc.element(sibling).is_none() {
                items.push(sibling);
                continue;
            }

            if is_verse_end(doc, sibling, sid) {
                end_marker = Some(sibling);
                break 'climb;
            }

            if let Some(marker) = find_nested_end(doc, sibling, sid) {
                items.push(sibling);
                end_marker = Some(marker);
                end_nested = true;
                break 'climb;
            }

            if starts_foreign_content(doc, sibling) {
                break 'climb;
            }

            items.push(sibling);
        }

        let Some(parent) = doc.parent(cursor).filter(|parent| *parent != scope) else {
            break;
        };
        let ahead = *end_ahead.get_or_insert_with(|| {
            (start..doc.subtree_end(scope)).any(|id| is_verse_end(doc, id, sid))
        });
        if !ahead {
            break;
        }
        cursor = parent;
    }

    let limit = match end_marker {
        Some(marker) => marker,
        None => items
            .last()
            .map(|item| doc.subtree_end(*item))
            .unwrap_or(start + 1),
    };

    VerseSpan {
        start,
        osis_id,
        items,
        limit,
        end_marker,
        end_nested,
        closed: end_marker.is_some(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::osis::render::render_plain_text;

    fn first_start(doc: &Document) -> NodeId {
        doc.elements("verse")
            .find(|id| is_verse_start(doc, *id))
            .expect("verse start present")
    }

    #[test]
    fn sibling_end_marker_bounds_the_verse() {
        let doc = Document::parse(
            r#"<chapter><verse osisID="Gen.1.1" sID="x"/>In <w lemma="strong:H0430">God</w> created<verse eID="x"/>after</chapter>"#,
        )
        .expect("fragment should parse");
        let span = resolve_verse(&doc, first_start(&doc));

        assert!(span.closed);
        assert!(!span.end_nested);
        assert_eq!(span.osis_id, "Gen.1.1");
        assert_eq!(
            span.markup(&doc),
            r#"In <w lemma="strong:H0430">God</w> created"#
        );
        assert_eq!(
            render_plain_text(&span.markup(&doc)).expect("span renders"),
            "In God created"
        );
    }

    #[test]
    fn nested_end_marker_truncates_the_containing_sibling() {
        let doc = Document::parse(
            r#"<chapter><verse osisID="Ps.1.1" sID="a"/><lg><l>Blessed <w>is</w> the man<verse eID="a"/> trailing</l><l>next verse line</l></lg><verse osisID="Ps.1.2" sID="b"/>x<verse eID="b"/></chapter>"#,
        )
        .expect("fragment should parse");
        let span = resolve_verse(&doc, first_start(&doc));

        assert!(span.closed);
        assert!(span.end_nested);
        let markup = span.markup(&doc);
        assert_eq!(markup, "<lg><l>Blessed <w>is</w> the man</l></lg>");
        assert!(!markup.contains("trailing"));
        assert!(!markup.contains("next verse"));
    }

    #[test]
    fn end_marker_in_a_later_line_extends_the_verse() {
        let doc = Document::parse(
            r#"<chapter><lg><l><verse osisID="Ps.1.1" sID="a"/>Blessed is the man</l><l>that walketh not<verse eID="a"/></l><l><verse osisID="Ps.1.2" sID="b"/>But his delight<verse eID="b"/></l></lg></chapter>"#,
        )
        .expect("fragment should parse");
        let span = resolve_verse(&doc, first_start(&doc));

        assert!(span.closed);
        assert!(span.end_nested);
        let markup = span.markup(&doc);
        assert_eq!(markup, "Blessed is the man<l>that walketh not</l>");
        assert!(!markup.contains("delight"));
    }

    #[test]
    fn climbing_stops_at_the_chapter_without_an_end_marker() {
        let doc = Document::parse(
            r#"<div type="book"><chapter><l><verse osisID="Ps.1.1" sID="a"/>only line</l></chapter><chapter><l>next chapter<verse eID="a"/></l></chapter></div>"#,
        )
        .expect("fragment should parse");
        let span = resolve_verse(&doc, first_start(&doc));

        assert!(!span.closed);
        assert_eq!(span.markup(&doc), "only line");
    }

    #[test]
    fn missing_end_marker_returns_best_effort_content() {
        let doc = Document::parse(
            r#"<chapter><verse osisID="Gen.1.1" sID="a"/>partial text<verse osisID="Gen.1.2" sID="b"/>second<verse eID="b"/></chapter>"#,
        )
        .expect("fragment should parse");
        let span = resolve_verse(&doc, first_start(&doc));

        assert!(!span.closed);
        assert_eq!(span.end_marker, None);
        assert_eq!(span.markup(&doc), "partial text");
    }

    #[test]
    fn containment_verse_uses_its_children() {
        let doc = Document::parse(r#"<chapter><verse osisID="John.11.35">Jesus <w>wept</w>.</verse></chapter>"#)
            .expect("fragment should parse");
        let span = resolve_verse(&doc, first_start(&doc));

        assert!(span.closed);
        assert_eq!(span.markup(&doc), "Jesus <w>wept</w>.");
    }

    #[test]
    fn span_nodes_exclude_content_after_the_marker() {
        let doc = Document::parse(
            r#"<p><verse osisID="A.1.1" sID="a"/><l><w>one</w><verse eID="a"/><w>two</w></l></p>"#,
        )
        .expect("fragment should parse");
        let span = resolve_verse(&doc, first_start(&doc));
        let words = span
            .nodes(&doc)
            .filter(|id| doc.is_element(*id, "w"))
            .count();
        assert_eq!(words, 1);
    }
}
