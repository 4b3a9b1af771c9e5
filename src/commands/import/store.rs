use super::*;

#[derive(Debug, Clone)]
pub(super) struct VersionInfo {
    pub osis_work: String,
    pub abbreviation: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub language: Option<String>,
    pub source_sha256: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub(super) struct BookRow {
    pub id: i64,
    pub is_poetic: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub(super) struct StructureCounts {
    pub words: usize,
    pub titles: usize,
    pub poetry: usize,
    pub translator_changes: usize,
    pub red_letters: usize,
    pub divine_names: usize,
    pub notes: usize,
}

/// Reuse the version keyed by its work identifier, refreshing descriptive
/// columns, or create it.
pub(super) fn find_or_create_version(
    connection: &Connection,
    info: &VersionInfo,
) -> Result<VersionSummary> {
    let now = now_utc_string();
    let existing = with_busy_retry("select bible_versions", || {
        connection
            .query_row(
                "SELECT id, abbreviation FROM bible_versions WHERE osis_work = ?1",
                [&info.osis_work],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()
    })?;

    if let Some((id, abbreviation)) = existing {
        with_busy_retry("update bible_versions", || {
            connection.execute(
                "
                UPDATE bible_versions
                SET title = COALESCE(?2, title),
                    description = COALESCE(?3, description),
                    language = COALESCE(?4, language),
                    source_sha256 = COALESCE(?5, source_sha256),
                    updated_at = ?6
                WHERE id = ?1
                ",
                params![
                    id,
                    info.title,
                    info.description,
                    info.language,
                    info.source_sha256,
                    now
                ],
            )
        })?;

        return Ok(VersionSummary {
            id,
            osis_work: info.osis_work.clone(),
            abbreviation,
            title: info.title.clone(),
            language: info.language.clone(),
            reused: true,
        });
    }

    with_busy_retry("insert bible_versions", || {
        connection.execute(
            "
            INSERT INTO bible_versions(
              osis_work, abbreviation, title, description, language, source_sha256,
              created_at, updated_at
            )
            VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
            ",
            params![
                info.osis_work,
                info.abbreviation,
                info.title,
                info.description,
                info.language,
                info.source_sha256,
                now
            ],
        )
    })?;

    Ok(VersionSummary {
        id: connection.last_insert_rowid(),
        osis_work: info.osis_work.clone(),
        abbreviation: info.abbreviation.clone(),
        title: info.title.clone(),
        language: info.language.clone(),
        reused: false,
    })
}

pub(super) fn load_books(connection: &Connection) -> Result<HashMap<String, BookRow>> {
    let mut statement = connection
        .prepare("SELECT osis_id, id, is_poetic FROM books ORDER BY book_order")
        .context("failed to prepare book lookup")?;
    let rows = statement.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            BookRow {
                id: row.get(1)?,
                is_poetic: row.get::<_, i64>(2)? != 0,
            },
        ))
    })?;

    let mut books = HashMap::new();
    for row in rows {
        let (osis_id, book) = row?;
        books.insert(osis_id, book);
    }
    Ok(books)
}

pub(super) fn book_ids_in_order(connection: &Connection) -> Result<Vec<String>> {
    let mut statement = connection.prepare("SELECT osis_id FROM books ORDER BY book_order")?;
    let ids = statement
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(ids)
}

/// Returns the chapter id and whether the row was created by this call.
pub(super) fn find_or_create_chapter(
    connection: &Connection,
    book_id: i64,
    version_id: i64,
    chapter_number: u32,
    osis_id: &str,
    chapter_title: Option<&str>,
) -> Result<(i64, bool)> {
    let existing = with_busy_retry("select chapters", || {
        connection
            .query_row(
                "
                SELECT id FROM chapters
                WHERE book_id = ?1 AND bible_version_id = ?2 AND chapter_number = ?3
                ",
                params![book_id, version_id, chapter_number],
                |row| row.get::<_, i64>(0),
            )
            .optional()
    })?;

    if let Some(id) = existing {
        if chapter_title.is_some() {
            with_busy_retry("update chapters", || {
                connection.execute(
                    "UPDATE chapters SET chapter_title = ?2 WHERE id = ?1",
                    params![id, chapter_title],
                )
            })?;
        }
        return Ok((id, false));
    }

    with_busy_retry("insert chapters", || {
        connection.execute(
            "
            INSERT INTO chapters(book_id, bible_version_id, chapter_number, osis_id, chapter_title)
            VALUES(?1, ?2, ?3, ?4, ?5)
            ",
            params![book_id, version_id, chapter_number, osis_id, chapter_title],
        )
    })?;
    Ok((connection.last_insert_rowid(), true))
}

/// Insert the verse or overwrite its three text representations in place.
/// Returns the verse id and whether the row was created.
pub(super) fn upsert_verse(
    connection: &Connection,
    chapter_id: i64,
    verse_number: u32,
    osis_id: &str,
    text: &str,
    formatted_text: &str,
    original_xml: &str,
) -> Result<(i64, bool)> {
    let now = now_utc_string();
    let existing = with_busy_retry("select verses", || {
        connection
            .query_row(
                "SELECT id FROM verses WHERE chapter_id = ?1 AND verse_number = ?2",
                params![chapter_id, verse_number],
                |row| row.get::<_, i64>(0),
            )
            .optional()
    })?;

    if let Some(id) = existing {
        with_busy_retry("update verses", || {
            connection.execute(
                "
                UPDATE verses
                SET osis_id = ?2, text = ?3, formatted_text = ?4, original_xml = ?5, updated_at = ?6
                WHERE id = ?1
                ",
                params![id, osis_id, text, formatted_text, original_xml, now],
            )
        })?;
        return Ok((id, false));
    }

    with_busy_retry("insert verses", || {
        connection.execute(
            "
            INSERT INTO verses(
              chapter_id, verse_number, osis_id, text, formatted_text, original_xml, updated_at
            )
            VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ",
            params![
                chapter_id,
                verse_number,
                osis_id,
                text,
                formatted_text,
                original_xml,
                now
            ],
        )
    })?;
    Ok((connection.last_insert_rowid(), true))
}

/// Drop structural rows of a verse so a re-import replaces them.
pub(super) fn clear_verse_structure(connection: &Connection, verse_id: i64) -> Result<()> {
    for table in [
        "word_elements",
        "titles",
        "poetry_structure",
        "translator_changes",
        "red_letter_text",
        "divine_names",
        "study_notes",
    ] {
        let sql = format!("DELETE FROM {table} WHERE verse_id = ?1");
        with_busy_retry("clear verse structure", || {
            connection.execute(&sql, [verse_id])
        })
        .with_context(|| format!("failed to clear {table} for verse {verse_id}"))?;
    }
    Ok(())
}

pub(super) fn clear_chapter_titles(connection: &Connection, chapter_id: i64) -> Result<()> {
    with_busy_retry("clear chapter titles", || {
        connection.execute("DELETE FROM titles WHERE chapter_id = ?1", [chapter_id])
    })?;
    Ok(())
}

#[derive(Debug, Clone, Copy)]
pub(super) enum TitleOwner {
    Verse(i64),
    Chapter(i64),
}

pub(super) fn insert_title(
    connection: &Connection,
    owner: TitleOwner,
    title: &TitleRecord,
) -> Result<()> {
    let (verse_id, chapter_id) = match owner {
        TitleOwner::Verse(id) => (Some(id), None),
        TitleOwner::Chapter(id) => (None, Some(id)),
    };
    let formatted = render_html(&title.markup)?;
    with_busy_retry("insert titles", || {
        connection.execute(
            "
            INSERT INTO titles(
              verse_id, chapter_id, title_type, title_text, formatted_text,
              is_canonical, title_order, attributes_json
            )
            VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ",
            params![
                verse_id,
                chapter_id,
                title.title_type.as_str(),
                title.text,
                formatted,
                title.canonical,
                title.position,
                title.attributes.to_json()
            ],
        )
    })?;
    Ok(())
}

pub(super) fn insert_structure(
    connection: &Connection,
    verse_id: i64,
    structure: &VerseStructure,
) -> Result<StructureCounts> {
    let mut counts = StructureCounts::default();

    for word in &structure.words {
        with_busy_retry("insert word_elements", || {
            connection.execute(
                "
                INSERT INTO word_elements(
                  verse_id, word_order, word_text, strongs_number, morphology_code, lemma,
                  attributes_json
                )
                VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ",
                params![
                    verse_id,
                    word.position,
                    word.text,
                    word.strongs_number,
                    word.morphology,
                    word.lemma,
                    word.attributes.to_json()
                ],
            )
        })?;
        counts.words += 1;
    }

    for title in &structure.titles {
        insert_title(connection, TitleOwner::Verse(verse_id), title)?;
        counts.titles += 1;
    }

    for line in &structure.poetry {
        with_busy_retry("insert poetry_structure", || {
            connection.execute(
                "
                INSERT INTO poetry_structure(
                  verse_id, structure_type, level, line_order, text_content, is_synthetic,
                  attributes_json
                )
                VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ",
                params![
                    verse_id,
                    line.structure_type.as_str(),
                    line.level,
                    line.position,
                    line.text,
                    line.synthetic,
                    line.attributes.to_json()
                ],
            )
        })?;
        counts.poetry += 1;
    }

    for change in &structure.translator_changes {
        with_busy_retry("insert translator_changes", || {
            connection.execute(
                "
                INSERT INTO translator_changes(
                  verse_id, change_order, text_content, change_type, attributes_json
                )
                VALUES(?1, ?2, ?3, ?4, ?5)
                ",
                params![
                    verse_id,
                    change.position,
                    change.text,
                    change.change_type,
                    change.attributes.to_json()
                ],
            )
        })?;
        counts.translator_changes += 1;
    }

    for quote in &structure.red_letters {
        with_busy_retry("insert red_letter_text", || {
            connection.execute(
                "
                INSERT INTO red_letter_text(
                  verse_id, text_order, text_content, speaker, attributes_json
                )
                VALUES(?1, ?2, ?3, ?4, ?5)
                ",
                params![
                    verse_id,
                    quote.position,
                    quote.text,
                    quote.speaker,
                    quote.attributes.to_json()
                ],
            )
        })?;
        counts.red_letters += 1;
    }

    for name in &structure.divine_names {
        with_busy_retry("insert divine_names", || {
            connection.execute(
                "
                INSERT INTO divine_names(
                  verse_id, name_order, displayed_text, original_name, attributes_json
                )
                VALUES(?1, ?2, ?3, ?4, ?5)
                ",
                params![
                    verse_id,
                    name.position,
                    name.displayed_text,
                    name.original_name,
                    name.attributes.to_json()
                ],
            )
        })?;
        counts.divine_names += 1;
    }

    for note in &structure.notes {
        with_busy_retry("insert study_notes", || {
            connection.execute(
                "
                INSERT INTO study_notes(verse_id, note_order, note_type, content, attributes_json)
                VALUES(?1, ?2, ?3, ?4, ?5)
                ",
                params![
                    verse_id,
                    note.position,
                    note.note_type,
                    note.text,
                    note.attributes.to_json()
                ],
            )
        })?;
        counts.notes += 1;
    }

    Ok(counts)
}

/// Formatted text of the verses in `start..=end` of a chapter, joined by a
/// single space.
pub(crate) fn paragraph_text(
    connection: &Connection,
    chapter_id: i64,
    start_verse: u32,
    end_verse: u32,
) -> Result<String> {
    let mut statement = connection.prepare(
        "
        SELECT formatted_text FROM verses
        WHERE chapter_id = ?1 AND verse_number BETWEEN ?2 AND ?3
        ORDER BY verse_number
        ",
    )?;
    let parts = statement
        .query_map(params![chapter_id, start_verse, end_verse], |row| {
            row.get::<_, String>(0)
        })?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(parts
        .iter()
        .map(|part| part.trim())
        .filter(|part| !part.is_empty())
        .collect::<Vec<&str>>()
        .join(" "))
}

/// Insert a closed paragraph unless the same span is already stored.
/// Returns true when a row was written.
pub(super) fn persist_paragraph(connection: &Connection, span: &ParagraphSpan) -> Result<bool> {
    let text_content = paragraph_text(
        connection,
        span.chapter_id,
        span.start_verse,
        span.end_verse,
    )?;
    let changed = with_busy_retry("insert paragraphs", || {
        connection.execute(
            "
            INSERT INTO paragraphs(
              chapter_id, start_verse_id, end_verse_id, start_verse, end_verse, text_content
            )
            VALUES(
              ?1,
              (SELECT id FROM verses WHERE chapter_id = ?1 AND verse_number = ?2),
              (SELECT id FROM verses WHERE chapter_id = ?1 AND verse_number = ?3),
              ?2, ?3, ?4
            )
            ON CONFLICT(chapter_id, start_verse, end_verse) DO NOTHING
            ",
            params![span.chapter_id, span.start_verse, span.end_verse, text_content],
        )
    })?;
    Ok(changed > 0)
}
