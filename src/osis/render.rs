//! Plain-text and HTML renderings of a verse markup fragment.
//!
//! Both renderings are driven by the same event walk and the same
//! [`SpacingWriter`], so word boundaries never differ between the search text
//! and the display HTML of one verse.

use anyhow::{Context, Result};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use super::extract::{MAX_POETRY_LEVEL, RED_LETTER_SPEAKER, TitleType};
use super::paragraph::PILCROW;

pub const RED_LETTER_CLASS: &str = "text-red-600 dark:text-red-400 font-medium";
pub const TRANSLATOR_ADDITION_CLASS: &str = "italic text-gray-600 dark:text-gray-400";
pub const DIVINE_NAME_CLASS: &str = "divine-name small-caps";
pub const POETRY_GROUP_CLASS: &str = "poetry-group my-2";
pub const CAESURA_GLYPH: char = '‖';
pub const CAESURA_HTML: &str = r#"<span class="caesura text-gray-400">‖</span>"#;

/// Characters that never take a space in front of them.
const NO_SPACE_BEFORE: &[char] = &[
    ',', '.', ';', ':', '!', '?', '\'', '"', ')', ']', '}', '’', '”', '»',
];
/// Characters that never take a space after them.
const NO_SPACE_AFTER: &[char] = &['(', '[', '{', '“', '‘', '«'];

/// HTML elements emitted by the renderer; they pass through a second run
/// unchanged.
const HTML_PASSTHROUGH: &[&str] = &[
    "div", "span", "em", "strong", "i", "b", "sup", "sub", "small", "br", "p", "h2", "h3", "h4",
];

/// OSIS block elements, plus the block HTML the renderer emits for them.
const BLOCK_ELEMENTS: &[&str] = &[
    "title", "l", "lg", "p", "div", "lb", "list", "item", "head", "chapter", "h2", "h3", "h4",
    "br",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedVerse {
    pub text: String,
    pub html: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    PlainText,
    Html,
}

pub fn render_verse(markup: &str) -> Result<RenderedVerse> {
    Ok(RenderedVerse {
        text: render_plain_text(markup)?,
        html: render_html(markup)?,
    })
}

pub fn render_plain_text(markup: &str) -> Result<String> {
    render(markup, Mode::PlainText).context("failed to render plain text")
}

pub fn render_html(markup: &str) -> Result<String> {
    render(markup, Mode::Html).context("failed to render HTML")
}

pub fn title_html(title_type: TitleType) -> (&'static str, &'static str) {
    match title_type {
        TitleType::Main => (
            r#"<h3 class="osis-title title-main text-lg font-semibold text-center my-2">"#,
            "</h3>",
        ),
        TitleType::Chapter => (
            r#"<h3 class="osis-title title-chapter text-base font-semibold my-2">"#,
            "</h3>",
        ),
        TitleType::Psalm => (
            r#"<div class="osis-title title-psalm italic text-sm text-gray-600 dark:text-gray-400 my-1">"#,
            "</div>",
        ),
        TitleType::Acrostic => (
            r#"<div class="osis-title title-acrostic font-semibold uppercase tracking-wide text-sm my-1">"#,
            "</div>",
        ),
        TitleType::Sub => (
            r#"<h4 class="osis-title title-sub text-sm font-medium my-1">"#,
            "</h4>",
        ),
    }
}

pub fn poetry_line_class(level: u8) -> String {
    let level = level.clamp(1, MAX_POETRY_LEVEL);
    format!("poetry-line pl-{}", u32::from(level) * 4)
}

/// Output buffer that owns every spacing decision.
///
/// Whitespace in text, `<w>` boundaries and block element edges only mark a
/// space as pending. Opening markup is held back with it until the next
/// visible character arrives, so the space lands in front of the markup and
/// only when that character is not closing punctuation. Pending spaces survive
/// closing tags, and a trailing pending space is dropped.
struct SpacingWriter {
    out: String,
    escape: bool,
    pending_space: bool,
    pending_markup: String,
    last_visible: Option<char>,
}

impl SpacingWriter {
    fn new(escape: bool) -> Self {
        Self {
            out: String::new(),
            escape,
            pending_space: false,
            pending_markup: String::new(),
            last_visible: None,
        }
    }

    fn mark_boundary(&mut self) {
        if self.last_visible.is_some() {
            self.pending_space = true;
        }
    }

    fn space_allowed_after_last(&self) -> bool {
        self.last_visible
            .map(|ch| !NO_SPACE_AFTER.contains(&ch))
            .unwrap_or(false)
    }

    /// Settle the pending space and markup in front of a visible character.
    fn before_visible(&mut self, next: char) {
        if self.pending_space {
            self.pending_space = false;
            if !NO_SPACE_BEFORE.contains(&next) && self.space_allowed_after_last() {
                self.out.push(' ');
            }
        }
        self.flush_markup();
    }

    fn flush_markup(&mut self) {
        if !self.pending_markup.is_empty() {
            self.out.push_str(&self.pending_markup);
            self.pending_markup.clear();
        }
    }

    fn push_text(&mut self, text: &str) {
        for ch in text.chars() {
            if ch.is_whitespace() {
                self.mark_boundary();
                continue;
            }
            if PILCROW.starts_with(ch) {
                continue;
            }
            self.before_visible(ch);
            match ch {
                '&' if self.escape => self.out.push_str("&amp;"),
                '<' if self.escape => self.out.push_str("&lt;"),
                '>' if self.escape => self.out.push_str("&gt;"),
                _ => self.out.push(ch),
            }
            self.last_visible = Some(ch);
        }
    }

    fn open_markup(&mut self, markup: &str) {
        self.pending_markup.push_str(markup);
    }

    /// Markup that renders as a visible glyph of its own.
    fn inline_glyph(&mut self, markup: &str, glyph: char) {
        self.before_visible(glyph);
        self.out.push_str(markup);
        self.last_visible = Some(glyph);
    }

    fn close_markup(&mut self, markup: &str) {
        self.flush_markup();
        self.out.push_str(markup);
    }

    fn finish(mut self) -> String {
        self.flush_markup();
        self.out
    }
}

/// What to emit when an open element closes.
enum Closing {
    Markup(String),
    Nothing,
}

/// An element still open during the walk.
struct OpenElement {
    closing: Closing,
    boundary: bool,
}

struct Tag {
    local_name: String,
    raw: String,
    attributes: Vec<(String, String)>,
}

impl Tag {
    fn from_start(start: &BytesStart<'_>) -> Result<Self> {
        let local_name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
        let raw = String::from_utf8_lossy(start).into_owned();
        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr.with_context(|| format!("malformed attribute on <{local_name}>"))?;
            let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
            let value = attr.unescape_value()?.into_owned();
            attributes.push((key, value));
        }
        Ok(Self {
            local_name,
            raw,
            attributes,
        })
    }

    fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    /// Words and block elements separate the text on either side of them.
    fn is_word_boundary(&self) -> bool {
        self.local_name == "w" || BLOCK_ELEMENTS.contains(&self.local_name.as_str())
    }

    fn is_html_passthrough(&self) -> bool {
        if !HTML_PASSTHROUGH.contains(&self.local_name.as_str()) {
            return false;
        }
        // OSIS also has <div>; ours always carry a class and never a type.
        self.local_name != "div" || (self.attr("class").is_some() && self.attr("type").is_none())
    }
}

fn html_open(tag: &Tag) -> (Option<String>, Closing) {
    if tag.is_html_passthrough() {
        return (
            Some(format!("<{}>", tag.raw)),
            Closing::Markup(format!("</{}>", tag.local_name)),
        );
    }

    match tag.local_name.as_str() {
        "title" => {
            let (title_type, _) = TitleType::resolve(tag.attr("type"));
            let (open, close) = title_html(title_type);
            (Some(open.to_string()), Closing::Markup(close.to_string()))
        }
        "lg" => (
            Some(format!(r#"<div class="{POETRY_GROUP_CLASS}">"#)),
            Closing::Markup("</div>".to_string()),
        ),
        "l" => {
            let level = tag
                .attr("level")
                .and_then(|raw| raw.trim().parse::<u8>().ok())
                .unwrap_or(1);
            (
                Some(format!(r#"<div class="{}">"#, poetry_line_class(level))),
                Closing::Markup("</div>".to_string()),
            )
        }
        "q" if tag.attr("who") == Some(RED_LETTER_SPEAKER) => (
            Some(format!(r#"<span class="{RED_LETTER_CLASS}">"#)),
            Closing::Markup("</span>".to_string()),
        ),
        "transChange" if tag.attr("type") == Some("added") => (
            Some(format!(r#"<em class="{TRANSLATOR_ADDITION_CLASS}">"#)),
            Closing::Markup("</em>".to_string()),
        ),
        "divineName" => (
            Some(format!(r#"<span class="{DIVINE_NAME_CLASS}">"#)),
            Closing::Markup("</span>".to_string()),
        ),
        "hi" => match tag.attr("type") {
            Some("italic") => (Some("<em>".to_string()), Closing::Markup("</em>".to_string())),
            Some("bold") => (
                Some("<strong>".to_string()),
                Closing::Markup("</strong>".to_string()),
            ),
            Some("super") => (Some("<sup>".to_string()), Closing::Markup("</sup>".to_string())),
            Some("small-caps") => (
                Some(r#"<span class="small-caps">"#.to_string()),
                Closing::Markup("</span>".to_string()),
            ),
            _ => (None, Closing::Nothing),
        },
        _ => (None, Closing::Nothing),
    }
}

fn html_empty(tag: &Tag) -> Option<String> {
    if tag.is_html_passthrough() {
        return Some(format!("<{}/>", tag.raw));
    }
    match tag.local_name.as_str() {
        "lb" => Some("<br/>".to_string()),
        _ => None,
    }
}

fn render(markup: &str, mode: Mode) -> Result<String> {
    let mut reader = Reader::from_str(markup);
    let mut writer = SpacingWriter::new(mode == Mode::Html);
    let mut open: Vec<OpenElement> = Vec::new();
    let mut skip_depth = 0usize;

    loop {
        let position = reader.buffer_position();
        let event = reader
            .read_event()
            .with_context(|| format!("malformed verse markup near byte {position}"))?;

        match event {
            Event::Start(start) => {
                if skip_depth > 0 {
                    skip_depth += 1;
                    continue;
                }
                let tag = Tag::from_start(&start)?;
                if tag.local_name == "note" {
                    skip_depth = 1;
                    continue;
                }
                let boundary = tag.is_word_boundary();
                if boundary {
                    writer.mark_boundary();
                }
                let closing = match mode {
                    Mode::Html if tag.local_name != "w" => {
                        let (markup, closing) = html_open(&tag);
                        if let Some(markup) = markup {
                            writer.open_markup(&markup);
                        }
                        closing
                    }
                    _ => Closing::Nothing,
                };
                open.push(OpenElement { closing, boundary });
            }
            Event::End(_) => {
                if skip_depth > 0 {
                    skip_depth -= 1;
                    continue;
                }
                if let Some(element) = open.pop() {
                    if element.boundary {
                        writer.mark_boundary();
                    }
                    if let Closing::Markup(close) = element.closing {
                        writer.close_markup(&close);
                    }
                }
            }
            Event::Empty(start) => {
                if skip_depth > 0 {
                    continue;
                }
                let tag = Tag::from_start(&start)?;
                if tag.is_word_boundary() {
                    writer.mark_boundary();
                }
                if mode == Mode::PlainText || tag.local_name == "w" {
                    continue;
                }
                if tag.local_name == "caesura" {
                    writer.inline_glyph(CAESURA_HTML, CAESURA_GLYPH);
                } else if let Some(markup) = html_empty(&tag) {
                    writer.open_markup(&markup);
                }
            }
            Event::Text(text) => {
                if skip_depth > 0 {
                    continue;
                }
                let value = text
                    .unescape()
                    .with_context(|| format!("invalid character data near byte {position}"))?;
                writer.push_text(&value);
            }
            Event::CData(data) => {
                if skip_depth > 0 {
                    continue;
                }
                writer.push_text(&String::from_utf8_lossy(&data.into_inner()));
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(writer.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_spaces_words_like_the_source() {
        let text = render_plain_text(r#"In <w lemma="strong:H0430">God</w> created"#)
            .expect("fragment renders");
        assert_eq!(text, "In God created");
    }

    #[test]
    fn adjacent_words_get_exactly_one_space() {
        let text = render_plain_text("<w>In</w><w>the</w>  <w>beginning</w>").expect("renders");
        assert_eq!(text, "In the beginning");
    }

    #[test]
    fn no_space_before_closing_punctuation() {
        let text = render_plain_text(
            r#"<w>light</w>: <w>and</w> <q who="Jesus"><w>it</w></q>, <w>was</w> <transChange type="added"><w>good</w></transChange>. (<w>so</w>)"#,
        )
        .expect("renders");
        assert_eq!(text, "light: and it, was good. (so)");
        assert!(!text.contains("  "));
        for punct in [",", ".", ";", ":", "!", "?", "'", "\"", ")", "]"] {
            assert!(!text.contains(&format!(" {punct}")), "space before {punct}");
        }
    }

    #[test]
    fn notes_and_pilcrows_are_dropped_from_both_views() {
        let markup = r#"<milestone type="x-p" marker="¶"/>¶ <w>And</w> God<note type="study">aside <w>x</w></note> said"#;
        let rendered = render_verse(markup).expect("renders");
        assert_eq!(rendered.text, "And God said");
        assert_eq!(rendered.html, "And God said");
    }

    #[test]
    fn red_letter_renders_to_styled_span() {
        let html = render_html(r#"<q who="Jesus">Peace</q>"#).expect("renders");
        assert_eq!(
            html,
            r#"<span class="text-red-600 dark:text-red-400 font-medium">Peace</span>"#
        );
    }

    #[test]
    fn html_maps_osis_structure() {
        let html = render_html(
            r#"<title type="psalm">A Psalm of David.</title><lg><l level="2"><w>The</w> <divineName>Lord</divineName> <transChange type="added">is</transChange> my shepherd<caesura/> I shall not want.</l></lg>"#,
        )
        .expect("renders");
        assert_eq!(
            html,
            concat!(
                r#"<div class="osis-title title-psalm italic text-sm text-gray-600 dark:text-gray-400 my-1">A Psalm of David.</div> "#,
                r#"<div class="poetry-group my-2"><div class="poetry-line pl-8">The "#,
                r#"<span class="divine-name small-caps">Lord</span> "#,
                r#"<em class="italic text-gray-600 dark:text-gray-400">is</em> my shepherd"#,
                r#"<span class="caesura text-gray-400">‖</span> I shall not want.</div></div>"#,
            )
        );
    }

    #[test]
    fn html_transform_is_idempotent() {
        let samples = [
            r#"In <w lemma="strong:H0430">God</w> created"#,
            r#"<title type="x-unknown">Head</title><q who="Jesus"><w>Peace</w></q>, <w>be</w> <transChange type="added">still</transChange>."#,
            r#"<lg><l level="3"><w>A</w> &amp; <w>B</w><caesura/><w>C</w></l><l><w>D</w></l></lg> <note>n</note>(<w>x</w>)"#,
            r#"<div type="colophon"><hi type="italic">done</hi><lb/>end</div>"#,
        ];
        for sample in samples {
            let once = render_html(sample).expect("first pass renders");
            let twice = render_html(&once).expect("second pass renders");
            assert_eq!(once, twice, "not a fixed point for {sample}");
        }
    }

    #[test]
    fn plain_and_html_agree_on_word_boundaries() {
        let markup = r#"<w>Jesus</w><q who="Jesus"><w>said</w></q><transChange type="added"><w>unto</w></transChange><w>them</w>,<w>Go</w>"#;
        let rendered = render_verse(markup).expect("renders");
        assert_eq!(rendered.text, "Jesus said unto them, Go");
        let stripped = rendered
            .html
            .split('<')
            .map(|part| part.split_once('>').map(|(_, rest)| rest).unwrap_or(part))
            .collect::<String>();
        assert_eq!(stripped, rendered.text);
    }

    #[test]
    fn text_entities_are_decoded_for_search_and_escaped_for_html() {
        let rendered = render_verse("<w>A</w> &amp; <w>B</w>").expect("renders");
        assert_eq!(rendered.text, "A & B");
        assert_eq!(rendered.html, "A &amp; B");
    }

    #[test]
    fn block_elements_separate_words() {
        let rendered = render_verse(
            r#"<title type="x-heading">Trouble</title><l>Many there be</l><l>which say</l>"#,
        )
        .expect("renders");
        assert_eq!(rendered.text, "Trouble Many there be which say");
        assert_eq!(
            rendered.html,
            concat!(
                r#"<h3 class="osis-title title-main text-lg font-semibold text-center my-2">Trouble</h3> "#,
                r#"<div class="poetry-line pl-4">Many there be</div> "#,
                r#"<div class="poetry-line pl-4">which say</div>"#,
            )
        );
        assert_eq!(render_html(&rendered.html).expect("second pass"), rendered.html);
    }

    #[test]
    fn line_breaks_separate_words_in_plain_text() {
        let text = render_plain_text("first<lb/>second").expect("renders");
        assert_eq!(text, "first second");
    }

    #[test]
    fn markup_opening_on_punctuation_takes_no_space() {
        let rendered = render_verse(r#"<w>good</w><transChange type="added">.</transChange>"#)
            .expect("renders");
        assert_eq!(rendered.text, "good.");
        assert_eq!(
            rendered.html,
            r#"good<em class="italic text-gray-600 dark:text-gray-400">.</em>"#
        );
    }

    #[test]
    fn space_goes_in_front_of_markup_not_inside() {
        let html = render_html(r#"<w>Jesus</w><q who="Jesus"><w>said</w></q>"#).expect("renders");
        assert_eq!(
            html,
            r#"Jesus <span class="text-red-600 dark:text-red-400 font-medium">said</span>"#
        );
    }
}
