use anyhow::Result;
use rusqlite::{Connection, OptionalExtension};
use tracing::{info, warn};

use crate::cli::{StatusArgs, resolve_db_path};
use crate::commands::import::{count_rows, open_existing_read_only};

const COUNTED_TABLES: &[&str] = &[
    "books",
    "chapters",
    "verses",
    "word_elements",
    "titles",
    "poetry_structure",
    "paragraphs",
    "translator_changes",
    "red_letter_text",
    "divine_names",
    "study_notes",
];

pub fn run(args: StatusArgs) -> Result<()> {
    let db_path = resolve_db_path(&args.cache_root, args.db_path.as_ref());
    info!(cache_root = %args.cache_root.display(), "status requested");

    if !db_path.exists() {
        warn!(path = %db_path.display(), "database file missing");
        return Ok(());
    }

    let conn = open_existing_read_only(&db_path)?;
    let schema_version = metadata_value(&conn, "db_schema_version").unwrap_or_default();
    let updated_at = metadata_value(&conn, "db_updated_at").unwrap_or_default();
    info!(
        path = %db_path.display(),
        schema_version = %schema_version.unwrap_or_default(),
        updated_at = %updated_at.unwrap_or_default(),
        "database status"
    );

    for version in version_rows(&conn)? {
        info!(
            work = %version.osis_work,
            abbreviation = %version.abbreviation,
            language = %version.language.unwrap_or_default(),
            chapters = version.chapters,
            verses = version.verses,
            "bible version"
        );
    }

    for table in COUNTED_TABLES {
        let count = count_rows(&conn, &format!("SELECT COUNT(*) FROM {table}")).unwrap_or(0);
        info!(table = %table, rows = count, "table count");
    }

    Ok(())
}

struct VersionRow {
    osis_work: String,
    abbreviation: String,
    language: Option<String>,
    chapters: i64,
    verses: i64,
}

fn metadata_value(conn: &Connection, key: &str) -> Result<Option<String>> {
    let value = conn
        .query_row("SELECT value FROM metadata WHERE key = ?1", [key], |row| {
            row.get(0)
        })
        .optional()?;
    Ok(value)
}

fn version_rows(conn: &Connection) -> Result<Vec<VersionRow>> {
    let mut statement = conn.prepare(
        "
        SELECT bv.osis_work, bv.abbreviation, bv.language,
               (SELECT COUNT(*) FROM chapters c WHERE c.bible_version_id = bv.id),
               (SELECT COUNT(*) FROM verses v
                  JOIN chapters c ON c.id = v.chapter_id
                 WHERE c.bible_version_id = bv.id)
        FROM bible_versions bv
        ORDER BY bv.id
        ",
    )?;
    let rows = statement
        .query_map([], |row| {
            Ok(VersionRow {
                osis_work: row.get(0)?,
                abbreviation: row.get(1)?,
                language: row.get(2)?,
                chapters: row.get(3)?,
                verses: row.get(4)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<VersionRow>>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::import::ensure_schema;

    #[test]
    fn reports_versions_with_their_sizes() {
        let conn = Connection::open_in_memory().expect("in-memory db");
        ensure_schema(&conn).expect("schema");
        conn.execute(
            "INSERT INTO bible_versions(osis_work, abbreviation, language, created_at, updated_at)
             VALUES('Bible.en.kjv', 'KJV', 'en', 'now', 'now')",
            [],
        )
        .expect("version");

        let rows = version_rows(&conn).expect("rows");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].abbreviation, "KJV");
        assert_eq!(rows[0].verses, 0);
        assert_eq!(
            metadata_value(&conn, "db_schema_version").expect("metadata").as_deref(),
            Some(crate::commands::import::DB_SCHEMA_VERSION)
        );
    }
}
