//! Paragraph spans derived from pilcrow milestones over the ordered verse
//! stream. The tracker is a pure state machine: each step consumes the state
//! and hands back the next one together with any paragraphs it closed.

use std::collections::BTreeSet;

use super::boundary::VerseSpan;
use super::document::{Document, NodeId};

pub const PARAGRAPH_MILESTONE_TYPE: &str = "x-p";
pub const PILCROW: &str = "¶";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParagraphState {
    pub chapter_id: Option<i64>,
    pub open_start: Option<u32>,
    pub open_verses: BTreeSet<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParagraphSpan {
    pub chapter_id: i64,
    pub start_verse: u32,
    pub end_verse: u32,
    pub verses: Vec<u32>,
}

impl ParagraphState {
    fn open_at(chapter_id: Option<i64>, verse_number: u32) -> Self {
        Self {
            chapter_id,
            open_start: Some(verse_number),
            open_verses: BTreeSet::from([verse_number]),
        }
    }

    pub fn is_open(&self) -> bool {
        self.open_start.is_some()
    }
}

fn close_with(chapter_id: Option<i64>, verses: BTreeSet<u32>) -> Option<ParagraphSpan> {
    let chapter_id = chapter_id?;
    let start_verse = *verses.first()?;
    let end_verse = *verses.last()?;
    Some(ParagraphSpan {
        chapter_id,
        start_verse,
        end_verse,
        verses: verses.into_iter().collect(),
    })
}

/// Advance the tracker by one verse.
pub fn step(
    state: ParagraphState,
    chapter_id: i64,
    verse_number: u32,
    has_break: bool,
) -> (ParagraphState, Vec<ParagraphSpan>) {
    let mut closed = Vec::new();
    let mut state = state;

    if state.chapter_id != Some(chapter_id) {
        if state.is_open() {
            closed.extend(close_with(state.chapter_id, state.open_verses));
        }
        state = if verse_number == 1 {
            ParagraphState::open_at(Some(chapter_id), 1)
        } else {
            ParagraphState {
                chapter_id: Some(chapter_id),
                ..ParagraphState::default()
            }
        };
    }

    if has_break {
        if state.is_open() {
            let before = state
                .open_verses
                .iter()
                .copied()
                .filter(|verse| *verse < verse_number)
                .collect::<BTreeSet<u32>>();
            closed.extend(close_with(state.chapter_id, before));
        }
        return (ParagraphState::open_at(Some(chapter_id), verse_number), closed);
    }

    if state.is_open() {
        state.open_verses.insert(verse_number);
    }

    (state, closed)
}

/// Close whatever paragraph is still open at the end of the stream.
pub fn finish(state: ParagraphState) -> Option<ParagraphSpan> {
    if !state.is_open() {
        return None;
    }
    close_with(state.chapter_id, state.open_verses)
}

pub fn is_paragraph_break(doc: &Document, id: NodeId) -> bool {
    doc.is_element(id, "milestone")
        && doc.attr(id, "type").map(str::trim) == Some(PARAGRAPH_MILESTONE_TYPE)
        && doc.attr(id, "marker").map(str::trim) == Some(PILCROW)
}

pub fn span_has_paragraph_break(doc: &Document, span: &VerseSpan) -> bool {
    span.nodes(doc).any(|id| is_paragraph_break(doc, id))
}
