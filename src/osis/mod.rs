pub mod boundary;
pub mod document;
pub mod extract;
pub mod paragraph;
pub mod reference;
pub mod render;

pub use boundary::{is_verse_start, resolve_verse};
pub use document::{Document, NodeId};
pub use extract::{StructuralExtractor, VerseStructure};
pub use paragraph::ParagraphSpan;
pub use render::render_verse;
