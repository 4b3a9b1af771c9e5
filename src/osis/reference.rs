/// A parsed `osisID` such as `Gen.1.1`, `Ps.119` or `KJV:John.3.16`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsisRef {
    pub book: String,
    pub chapter: Option<u32>,
    pub verse: Option<u32>,
}

/// Parse the first reference of an `osisID` attribute.
///
/// Multi-verse ids (`"Gen.1.1 Gen.1.2"`) resolve to their first entry and a
/// leading work prefix (`KJV:`) is ignored. Returns `None` when the book part
/// is empty or a numeric segment is not a number.
pub fn parse_osis_ref(raw: &str) -> Option<OsisRef> {
    let first = raw.split_whitespace().next()?;
    let without_work = first.rsplit(':').next().unwrap_or(first);
    let without_grain = without_work.split('!').next().unwrap_or(without_work);

    let mut segments = without_grain.split('.');
    let book = segments.next()?.trim();
    if book.is_empty() {
        return None;
    }

    let chapter = match segments.next() {
        Some(value) => Some(value.parse::<u32>().ok()?),
        None => None,
    };
    let verse = match segments.next() {
        Some(value) => Some(value.parse::<u32>().ok()?),
        None => None,
    };

    Some(OsisRef {
        book: book.to_string(),
        chapter,
        verse,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_book_chapter_and_verse() {
        let parsed = parse_osis_ref("Gen.1.1").expect("valid reference");
        assert_eq!(parsed.book, "Gen");
        assert_eq!(parsed.chapter, Some(1));
        assert_eq!(parsed.verse, Some(1));
    }

    #[test]
    fn multi_reference_ids_use_the_first_entry() {
        let parsed = parse_osis_ref("1Sam.3.4 1Sam.3.5").expect("valid reference");
        assert_eq!(parsed.book, "1Sam");
        assert_eq!(parsed.verse, Some(4));
    }

    #[test]
    fn work_prefix_and_chapter_only_forms_are_accepted() {
        let parsed = parse_osis_ref("KJV:Ps.119").expect("valid reference");
        assert_eq!(parsed.book, "Ps");
        assert_eq!(parsed.chapter, Some(119));
        assert_eq!(parsed.verse, None);
    }

    #[test]
    fn rejects_non_numeric_segments() {
        assert!(parse_osis_ref("Gen.one.1").is_none());
        assert!(parse_osis_ref("").is_none());
    }
}
