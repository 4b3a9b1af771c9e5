//! Structural records (words, titles, poetry, ...) found inside a verse.

use anyhow::{Context, Result};
use regex::Regex;

use super::boundary::VerseSpan;
use super::document::{Attributes, Document, NodeId};
use super::render::render_plain_text;
use crate::util::normalize_whitespace;

pub const DIVINE_NAME_ORIGINAL: &str = "YHWH";
pub const RED_LETTER_SPEAKER: &str = "Jesus";
pub const MAX_POETRY_LEVEL: u8 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Word,
    TranslatorChange,
    RedLetter,
    DivineName,
    Title,
    LineGroup,
    Line,
    Note,
    Unrecognized,
}

impl ElementKind {
    pub fn classify(doc: &Document, id: NodeId) -> Self {
        match doc.osis_name(id) {
            Some("w") => ElementKind::Word,
            Some("transChange") if doc.attr(id, "type") == Some("added") => {
                ElementKind::TranslatorChange
            }
            Some("q") if doc.attr(id, "who") == Some(RED_LETTER_SPEAKER) => ElementKind::RedLetter,
            Some("divineName") => ElementKind::DivineName,
            Some("title") => ElementKind::Title,
            Some("lg") => ElementKind::LineGroup,
            Some("l") => ElementKind::Line,
            Some("note") => ElementKind::Note,
            _ => ElementKind::Unrecognized,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TitleType {
    Main,
    Chapter,
    Psalm,
    Acrostic,
    Sub,
}

impl TitleType {
    pub fn as_str(self) -> &'static str {
        match self {
            TitleType::Main => "main",
            TitleType::Chapter => "chapter",
            TitleType::Psalm => "psalm",
            TitleType::Acrostic => "acrostic",
            TitleType::Sub => "sub",
        }
    }

    /// Map a raw `type` attribute onto the closed set. An absent type is
    /// `main`; an unknown one is coerced to `main` and reported back.
    pub fn resolve(raw: Option<&str>) -> (TitleType, Option<String>) {
        let Some(value) = raw else {
            return (TitleType::Main, None);
        };
        match value.trim() {
            "main" => (TitleType::Main, None),
            "chapter" => (TitleType::Chapter, None),
            "psalm" => (TitleType::Psalm, None),
            "acrostic" => (TitleType::Acrostic, None),
            "sub" => (TitleType::Sub, None),
            other => (TitleType::Main, Some(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructureType {
    Line,
    LineGroup,
}

impl StructureType {
    pub fn as_str(self) -> &'static str {
        match self {
            StructureType::Line => "l",
            StructureType::LineGroup => "lg",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WordRecord {
    pub position: u32,
    pub text: String,
    pub strongs_number: Option<String>,
    pub morphology: Option<String>,
    pub lemma: Option<String>,
    pub attributes: Attributes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TitleRecord {
    pub position: u32,
    pub title_type: TitleType,
    pub text: String,
    pub canonical: bool,
    pub coerced_from: Option<String>,
    /// Serialized `<title>` element, truncated at the verse limit.
    pub markup: String,
    pub attributes: Attributes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoetryRecord {
    pub position: u32,
    pub structure_type: StructureType,
    pub level: u8,
    pub text: String,
    pub synthetic: bool,
    pub attributes: Attributes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslatorChangeRecord {
    pub position: u32,
    pub text: String,
    pub change_type: String,
    pub attributes: Attributes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedLetterRecord {
    pub position: u32,
    pub text: String,
    pub speaker: String,
    pub attributes: Attributes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DivineNameRecord {
    pub position: u32,
    pub displayed_text: String,
    pub original_name: String,
    pub attributes: Attributes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudyNoteRecord {
    pub position: u32,
    pub note_type: String,
    pub text: String,
    pub attributes: Attributes,
}

#[derive(Debug, Clone, Default)]
pub struct VerseStructure {
    pub words: Vec<WordRecord>,
    pub titles: Vec<TitleRecord>,
    pub poetry: Vec<PoetryRecord>,
    pub translator_changes: Vec<TranslatorChangeRecord>,
    pub red_letters: Vec<RedLetterRecord>,
    pub divine_names: Vec<DivineNameRecord>,
    pub notes: Vec<StudyNoteRecord>,
    next_position: u32,
}

impl VerseStructure {
    fn take_position(&mut self) -> u32 {
        self.next_position += 1;
        self.next_position
    }

    pub fn has_poetry(&self) -> bool {
        !self.poetry.is_empty()
    }

    /// Verses of poetic books without any line markup still read as one line.
    pub fn add_synthetic_line(&mut self, text: &str) {
        let position = self.take_position();
        self.poetry.push(PoetryRecord {
            position,
            structure_type: StructureType::Line,
            level: 1,
            text: normalize_whitespace(text),
            synthetic: true,
            attributes: Attributes::new(),
        });
    }

    pub fn coerced_titles(&self) -> impl Iterator<Item = &TitleRecord> {
        self.titles.iter().filter(|title| title.coerced_from.is_some())
    }
}

pub struct StructuralExtractor {
    strongs_regex: Regex,
}

impl StructuralExtractor {
    pub fn new() -> Result<Self> {
        let strongs_regex =
            Regex::new(r"strong:([HG]\d+)").context("failed to compile Strong's number regex")?;
        Ok(Self { strongs_regex })
    }

    pub fn strongs_number(&self, lemma: &str) -> Option<String> {
        self.strongs_regex
            .captures(lemma)
            .and_then(|captures| captures.get(1))
            .map(|m| m.as_str().to_string())
    }

    /// Walk a resolved verse in pre-order and collect its structural records.
    ///
    /// `leading_titles` stand in front of the start marker and take the first
    /// positions. Poetry wrappers enclosing the start marker come next,
    /// outermost first, then every element inside the span receives the next
    /// position in visitation order.
    pub fn extract(
        &self,
        doc: &Document,
        span: &VerseSpan,
        leading_titles: &[NodeId],
    ) -> Result<VerseStructure> {
        let mut structure = VerseStructure::default();

        for title in leading_titles {
            let position = structure.take_position();
            structure
                .titles
                .push(title_record(doc, *title, NodeId::MAX, position));
        }

        for wrapper in poetry_context(doc, span.start) {
            let position = structure.take_position();
            let mut markup = String::new();
            for item in span.items.iter().filter(|item| doc.contains(wrapper, **item)) {
                doc.write_markup_before(*item, span.limit, &mut markup);
            }
            structure
                .poetry
                .push(poetry_record(doc, wrapper, &markup, position)?);
        }

        for item in &span.items {
            self.visit(doc, *item, span.limit, &mut structure)?;
        }

        Ok(structure)
    }

    fn visit(
        &self,
        doc: &Document,
        id: NodeId,
        limit: NodeId,
        structure: &mut VerseStructure,
    ) -> Result<()> {
        if id >= limit || doc.element(id).is_none() {
            return Ok(());
        }

        let position = structure.take_position();
        let attributes = doc
            .element(id)
            .map(|element| element.attributes.clone())
            .unwrap_or_default();
        let text = || normalize_whitespace(&doc.text_content_before(id, limit));

        match ElementKind::classify(doc, id) {
            ElementKind::Word => {
                let lemma = attributes.get("lemma").map(ToOwned::to_owned);
                structure.words.push(WordRecord {
                    position,
                    text: text(),
                    strongs_number: lemma.as_deref().and_then(|l| self.strongs_number(l)),
                    morphology: attributes.get("morph").map(ToOwned::to_owned),
                    lemma,
                    attributes,
                });
            }
            ElementKind::TranslatorChange => {
                structure.translator_changes.push(TranslatorChangeRecord {
                    position,
                    text: text(),
                    change_type: "added".to_string(),
                    attributes,
                });
            }
            ElementKind::RedLetter => {
                structure.red_letters.push(RedLetterRecord {
                    position,
                    text: text(),
                    speaker: RED_LETTER_SPEAKER.to_string(),
                    attributes,
                });
            }
            ElementKind::DivineName => {
                structure.divine_names.push(DivineNameRecord {
                    position,
                    displayed_text: text(),
                    original_name: DIVINE_NAME_ORIGINAL.to_string(),
                    attributes,
                });
            }
            ElementKind::Title => {
                structure.titles.push(title_record(doc, id, limit, position));
            }
            ElementKind::LineGroup | ElementKind::Line => {
                let mut markup = String::new();
                doc.write_markup_before(id, limit, &mut markup);
                structure
                    .poetry
                    .push(poetry_record(doc, id, &markup, position)?);
            }
            ElementKind::Note => {
                structure.notes.push(StudyNoteRecord {
                    position,
                    note_type: attributes.get("type").unwrap_or("study").to_string(),
                    text: text(),
                    attributes,
                });
            }
            ElementKind::Unrecognized => {}
        }

        for child in doc.children(id) {
            self.visit(doc, *child, limit, structure)?;
        }
        Ok(())
    }
}

pub fn title_record(doc: &Document, id: NodeId, limit: NodeId, position: u32) -> TitleRecord {
    let attributes = doc
        .element(id)
        .map(|element| element.attributes.clone())
        .unwrap_or_default();
    let (title_type, coerced_from) = TitleType::resolve(attributes.get("type"));
    let mut markup = String::new();
    doc.write_markup_before(id, limit, &mut markup);
    TitleRecord {
        position,
        title_type,
        text: normalize_whitespace(&doc.text_content_before(id, limit)),
        canonical: attributes.get("canonical") == Some("true"),
        coerced_from,
        markup,
        attributes,
    }
}

/// `markup` is the part of the line or group that belongs to the verse.
fn poetry_record(
    doc: &Document,
    id: NodeId,
    markup: &str,
    position: u32,
) -> Result<PoetryRecord> {
    let attributes = doc
        .element(id)
        .map(|element| element.attributes.clone())
        .unwrap_or_default();
    let (structure_type, level) = if doc.is_element(id, "lg") {
        (StructureType::LineGroup, 1)
    } else {
        let level = attributes
            .get("level")
            .and_then(|raw| raw.trim().parse::<u8>().ok())
            .unwrap_or(1)
            .clamp(1, MAX_POETRY_LEVEL);
        (StructureType::Line, level)
    };

    Ok(PoetryRecord {
        position,
        structure_type,
        level,
        text: render_plain_text(markup)?,
        synthetic: false,
        attributes,
    })
}

/// `l`/`lg` elements wrapping the verse start marker, outermost first.
/// The upward walk stops at the first ancestor that is neither.
pub fn poetry_context(doc: &Document, verse_start: NodeId) -> Vec<NodeId> {
    let mut wrappers = doc
        .ancestors(verse_start)
        .take_while(|id| doc.is_element(*id, "l") || doc.is_element(*id, "lg"))
        .collect::<Vec<NodeId>>();
    wrappers.reverse();
    wrappers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::osis::boundary::{is_verse_start, resolve_verse};

    fn extract_first(xml: &str) -> VerseStructure {
        let doc = Document::parse(xml).expect("fragment should parse");
        let start = doc
            .elements("verse")
            .find(|id| is_verse_start(&doc, *id))
            .expect("verse start present");
        let span = resolve_verse(&doc, start);
        StructuralExtractor::new()
            .expect("extractor should build")
            .extract(&doc, &span, &[])
            .expect("verse extracts")
    }

    #[test]
    fn word_captures_strongs_number_and_morphology() {
        let structure = extract_first(
            r#"<c><verse osisID="Gen.1.1" sID="x"/>In <w lemma="strong:H0430" morph="strongMorph:TH8804">God</w> created<verse eID="x"/></c>"#,
        );
        assert_eq!(structure.words.len(), 1);
        let word = &structure.words[0];
        assert_eq!(word.position, 1);
        assert_eq!(word.text, "God");
        assert_eq!(word.strongs_number.as_deref(), Some("H0430"));
        assert_eq!(word.morphology.as_deref(), Some("strongMorph:TH8804"));
        assert_eq!(
            word.attributes.to_json(),
            r#"{"lemma":"strong:H0430","morph":"strongMorph:TH8804"}"#
        );
    }

    #[test]
    fn positions_increase_across_nesting_levels() {
        let structure = extract_first(
            r#"<c><verse osisID="Ps.1.1" sID="x"/><lg><l level="2"><w>Blessed</w> <transChange type="added">is</transChange></l></lg><w>man</w><verse eID="x"/></c>"#,
        );
        let positions = structure
            .poetry
            .iter()
            .map(|p| (p.structure_type, p.level, p.position))
            .collect::<Vec<_>>();
        assert_eq!(
            positions,
            vec![(StructureType::LineGroup, 1, 1), (StructureType::Line, 2, 2)]
        );
        assert_eq!(structure.words[0].position, 3);
        assert_eq!(structure.translator_changes[0].position, 4);
        assert_eq!(structure.words[1].position, 5);
    }

    #[test]
    fn red_letter_divine_name_and_notes_are_recorded() {
        let structure = extract_first(
            r#"<c><verse osisID="John.14.27" sID="x"/><q who="Jesus" marker="">Peace</q> of the <divineName>Lord</divineName><note>A study aside</note><note type="crossReference">Isa.9.6</note><q who="Peter">no</q><transChange type="tenseChange">was</transChange><verse eID="x"/></c>"#,
        );
        assert_eq!(structure.red_letters.len(), 1);
        assert_eq!(structure.red_letters[0].speaker, "Jesus");
        assert_eq!(structure.red_letters[0].text, "Peace");
        assert_eq!(structure.divine_names[0].displayed_text, "Lord");
        assert_eq!(structure.divine_names[0].original_name, "YHWH");
        assert_eq!(structure.notes[0].note_type, "study");
        assert_eq!(structure.notes[1].note_type, "crossReference");
        assert!(structure.translator_changes.is_empty());
    }

    #[test]
    fn unknown_title_type_is_coerced_to_main() {
        let structure = extract_first(
            r#"<c><verse osisID="Ps.3.1" sID="x"/><title type="x-heading" canonical="true">A Psalm</title><title type="acrostic">ALEPH</title>text<verse eID="x"/></c>"#,
        );
        assert_eq!(structure.titles.len(), 2);
        assert_eq!(structure.titles[0].title_type, TitleType::Main);
        assert_eq!(structure.titles[0].coerced_from.as_deref(), Some("x-heading"));
        assert!(structure.titles[0].canonical);
        assert_eq!(structure.titles[1].title_type, TitleType::Acrostic);
        assert_eq!(structure.coerced_titles().count(), 1);
    }

    #[test]
    fn leading_titles_take_the_first_positions() {
        let doc = Document::parse(
            r#"<c><verse eID="p"/><title type="acrostic">BETH</title><verse osisID="Ps.119.9" sID="x"/><w>Wherewithal</w><verse eID="x"/></c>"#,
        )
        .expect("fragment should parse");
        let start = doc
            .elements("verse")
            .find(|id| is_verse_start(&doc, *id))
            .expect("verse start present");
        let title = doc.elements("title").next().expect("title present");
        let structure = StructuralExtractor::new()
            .expect("extractor should build")
            .extract(&doc, &resolve_verse(&doc, start), &[title])
            .expect("verse extracts");

        assert_eq!(structure.titles.len(), 1);
        assert_eq!(structure.titles[0].position, 1);
        assert_eq!(structure.titles[0].title_type, TitleType::Acrostic);
        assert_eq!(structure.titles[0].text, "BETH");
        assert_eq!(structure.words[0].position, 2);
    }

    #[test]
    fn poetry_levels_are_clamped() {
        let structure = extract_first(
            r#"<c><verse osisID="Ps.1.1" sID="x"/><l level="9">high</l><l level="0">low</l><verse eID="x"/></c>"#,
        );
        assert_eq!(structure.poetry[0].level, 4);
        assert_eq!(structure.poetry[1].level, 1);
    }

    #[test]
    fn wrapping_poetry_is_recorded_before_contents() {
        let structure = extract_first(
            r#"<c><lg><l level="2"><verse osisID="Ps.2.1" sID="x"/>Why do the <w>heathen</w> rage<verse eID="x"/></l></lg></c>"#,
        );
        assert_eq!(structure.poetry.len(), 2);
        assert_eq!(structure.poetry[0].structure_type, StructureType::LineGroup);
        assert_eq!(structure.poetry[1].structure_type, StructureType::Line);
        assert_eq!(structure.poetry[1].level, 2);
        assert_eq!(structure.words[0].position, 3);
    }

    #[test]
    fn wrapping_line_text_is_limited_to_the_verse() {
        let structure = extract_first(
            r#"<c><l><verse osisID="Ps.1.1" sID="a"/>one<verse eID="a"/><verse osisID="Ps.1.2" sID="b"/>two<verse eID="b"/></l></c>"#,
        );
        assert_eq!(structure.poetry.len(), 1);
        assert_eq!(structure.poetry[0].text, "one");
    }

    #[test]
    fn line_group_text_separates_its_lines() {
        let structure = extract_first(
            r#"<c><verse osisID="Ps.1.1" sID="x"/><lg><l>Blessed is the man</l><l>that walketh not</l></lg><verse eID="x"/></c>"#,
        );
        assert_eq!(structure.poetry[0].structure_type, StructureType::LineGroup);
        assert_eq!(structure.poetry[0].text, "Blessed is the man that walketh not");
        assert_eq!(structure.poetry[2].text, "that walketh not");
    }

    #[test]
    fn synthetic_line_follows_existing_positions() {
        let mut structure = extract_first(
            r#"<c><verse osisID="Prov.1.1" sID="x"/><w>The</w>  proverbs<verse eID="x"/></c>"#,
        );
        assert!(!structure.has_poetry());
        structure.add_synthetic_line("The  proverbs");
        assert_eq!(structure.poetry[0].position, 2);
        assert_eq!(structure.poetry[0].level, 1);
        assert_eq!(structure.poetry[0].text, "The proverbs");
    }

    #[test]
    fn strongs_number_takes_first_match() {
        let extractor = StructuralExtractor::new().expect("extractor should build");
        assert_eq!(
            extractor.strongs_number("lemma.TR:theos strong:G2316 strong:G3588").as_deref(),
            Some("G2316")
        );
        assert_eq!(extractor.strongs_number("lemma.TR:theos"), None);
    }
}
