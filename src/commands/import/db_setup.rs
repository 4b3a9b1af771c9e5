use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use rusqlite::{Connection, OpenFlags};

use crate::util::{now_utc_string, with_busy_retry};

pub(crate) const DB_SCHEMA_VERSION: &str = "1.0.0";
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) fn open_connection(db_path: &Path) -> Result<Connection> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            crate::util::ensure_directory(parent)?;
        }
    }
    let connection = Connection::open(db_path)
        .with_context(|| format!("failed to open {}", db_path.display()))?;
    configure_connection(&connection)?;
    Ok(connection)
}

pub(crate) fn open_existing_read_only(db_path: &Path) -> Result<Connection> {
    if !db_path.exists() {
        bail!("database file missing: {}", db_path.display());
    }
    Connection::open_with_flags(db_path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .with_context(|| format!("failed to open {} read-only", db_path.display()))
}

pub(crate) fn configure_connection(connection: &Connection) -> Result<()> {
    connection
        .busy_timeout(BUSY_TIMEOUT)
        .context("failed to set busy timeout")?;
    connection
        .pragma_update(None, "journal_mode", "WAL")
        .context("failed to set journal_mode=WAL")?;
    connection
        .pragma_update(None, "synchronous", "NORMAL")
        .context("failed to set synchronous=NORMAL")?;
    connection
        .pragma_update(None, "foreign_keys", "ON")
        .context("failed to enable foreign keys")?;
    Ok(())
}

pub(crate) fn ensure_schema(connection: &Connection) -> Result<()> {
    connection
        .execute_batch(
            "
        CREATE TABLE IF NOT EXISTS metadata (
          key TEXT PRIMARY KEY,
          value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS bible_versions (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          osis_work TEXT NOT NULL UNIQUE,
          abbreviation TEXT NOT NULL,
          title TEXT,
          description TEXT,
          language TEXT,
          source_sha256 TEXT,
          created_at TEXT NOT NULL,
          updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS books (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          osis_id TEXT NOT NULL UNIQUE,
          name TEXT NOT NULL,
          testament TEXT NOT NULL,
          book_order INTEGER NOT NULL,
          is_poetic INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS chapters (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          book_id INTEGER NOT NULL,
          bible_version_id INTEGER NOT NULL,
          chapter_number INTEGER NOT NULL,
          osis_id TEXT NOT NULL,
          chapter_title TEXT,
          UNIQUE(book_id, bible_version_id, chapter_number),
          FOREIGN KEY(book_id) REFERENCES books(id),
          FOREIGN KEY(bible_version_id) REFERENCES bible_versions(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS verses (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          chapter_id INTEGER NOT NULL,
          verse_number INTEGER NOT NULL,
          osis_id TEXT NOT NULL,
          text TEXT NOT NULL,
          formatted_text TEXT NOT NULL,
          original_xml TEXT NOT NULL,
          updated_at TEXT NOT NULL,
          UNIQUE(chapter_id, verse_number),
          FOREIGN KEY(chapter_id) REFERENCES chapters(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS word_elements (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          verse_id INTEGER NOT NULL,
          word_order INTEGER NOT NULL,
          word_text TEXT NOT NULL,
          strongs_number TEXT,
          morphology_code TEXT,
          lemma TEXT,
          attributes_json TEXT NOT NULL DEFAULT '{}',
          FOREIGN KEY(verse_id) REFERENCES verses(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS titles (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          verse_id INTEGER,
          chapter_id INTEGER,
          title_type TEXT NOT NULL
            CHECK (title_type IN ('main', 'chapter', 'psalm', 'acrostic', 'sub')),
          title_text TEXT NOT NULL,
          formatted_text TEXT,
          is_canonical INTEGER NOT NULL DEFAULT 0,
          title_order INTEGER NOT NULL,
          attributes_json TEXT NOT NULL DEFAULT '{}',
          CHECK (verse_id IS NULL OR chapter_id IS NULL),
          CHECK (verse_id IS NOT NULL OR chapter_id IS NOT NULL),
          FOREIGN KEY(verse_id) REFERENCES verses(id) ON DELETE CASCADE,
          FOREIGN KEY(chapter_id) REFERENCES chapters(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS poetry_structure (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          verse_id INTEGER NOT NULL,
          structure_type TEXT NOT NULL CHECK (structure_type IN ('l', 'lg')),
          level INTEGER NOT NULL CHECK (level BETWEEN 1 AND 4),
          line_order INTEGER NOT NULL,
          text_content TEXT NOT NULL,
          is_synthetic INTEGER NOT NULL DEFAULT 0,
          attributes_json TEXT NOT NULL DEFAULT '{}',
          FOREIGN KEY(verse_id) REFERENCES verses(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS paragraphs (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          chapter_id INTEGER NOT NULL,
          start_verse_id INTEGER,
          end_verse_id INTEGER,
          start_verse INTEGER NOT NULL,
          end_verse INTEGER NOT NULL,
          text_content TEXT NOT NULL,
          UNIQUE(chapter_id, start_verse, end_verse),
          FOREIGN KEY(chapter_id) REFERENCES chapters(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS translator_changes (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          verse_id INTEGER NOT NULL,
          change_order INTEGER NOT NULL,
          text_content TEXT NOT NULL,
          change_type TEXT NOT NULL,
          attributes_json TEXT NOT NULL DEFAULT '{}',
          FOREIGN KEY(verse_id) REFERENCES verses(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS red_letter_text (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          verse_id INTEGER NOT NULL,
          text_order INTEGER NOT NULL,
          text_content TEXT NOT NULL,
          speaker TEXT NOT NULL,
          attributes_json TEXT NOT NULL DEFAULT '{}',
          FOREIGN KEY(verse_id) REFERENCES verses(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS divine_names (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          verse_id INTEGER NOT NULL,
          name_order INTEGER NOT NULL,
          displayed_text TEXT NOT NULL,
          original_name TEXT NOT NULL,
          attributes_json TEXT NOT NULL DEFAULT '{}',
          FOREIGN KEY(verse_id) REFERENCES verses(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS study_notes (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          verse_id INTEGER NOT NULL,
          note_order INTEGER NOT NULL,
          note_type TEXT NOT NULL,
          content TEXT NOT NULL,
          attributes_json TEXT NOT NULL DEFAULT '{}',
          FOREIGN KEY(verse_id) REFERENCES verses(id) ON DELETE CASCADE
        );
        ",
        )
        .context("failed to create core tables")?;

    connection
        .execute(
            "
            CREATE VIRTUAL TABLE IF NOT EXISTS verses_fts
            USING fts5(text, content='verses', content_rowid='id')
            ",
            [],
        )
        .context("failed to initialize FTS5 table verses_fts")?;

    connection
        .execute_batch(
            "
        CREATE INDEX IF NOT EXISTS idx_chapters_version ON chapters(bible_version_id);
        CREATE INDEX IF NOT EXISTS idx_verses_osis ON verses(osis_id);
        CREATE INDEX IF NOT EXISTS idx_word_elements_verse ON word_elements(verse_id, word_order);
        CREATE INDEX IF NOT EXISTS idx_word_elements_strongs ON word_elements(strongs_number);
        CREATE INDEX IF NOT EXISTS idx_titles_verse ON titles(verse_id);
        CREATE INDEX IF NOT EXISTS idx_titles_chapter ON titles(chapter_id);
        CREATE INDEX IF NOT EXISTS idx_poetry_verse ON poetry_structure(verse_id, line_order);
        CREATE INDEX IF NOT EXISTS idx_paragraphs_chapter ON paragraphs(chapter_id, start_verse);
        CREATE INDEX IF NOT EXISTS idx_translator_changes_verse ON translator_changes(verse_id);
        CREATE INDEX IF NOT EXISTS idx_red_letter_verse ON red_letter_text(verse_id);
        CREATE INDEX IF NOT EXISTS idx_divine_names_verse ON divine_names(verse_id);
        CREATE INDEX IF NOT EXISTS idx_study_notes_verse ON study_notes(verse_id);
        ",
        )
        .context("failed to create indexes")?;

    let now = now_utc_string();
    connection.execute(
        "INSERT INTO metadata(key, value) VALUES('db_schema_version', ?1)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        [DB_SCHEMA_VERSION],
    )?;
    connection.execute(
        "INSERT INTO metadata(key, value) VALUES('db_updated_at', ?1)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        [now],
    )?;

    Ok(())
}

pub(crate) fn rebuild_fts_index(connection: &Connection) -> Result<()> {
    with_busy_retry("rebuild verses_fts", || {
        connection.execute("INSERT INTO verses_fts(verses_fts) VALUES('rebuild')", [])
    })
    .context("failed to rebuild FTS index")?;
    Ok(())
}

pub(crate) fn count_rows(connection: &Connection, sql: &str) -> Result<i64> {
    let count = connection.query_row(sql, [], |row| row.get(0))?;
    Ok(count)
}
