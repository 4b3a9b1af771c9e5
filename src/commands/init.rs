use anyhow::{Context, Result};
use rusqlite::{Connection, params};
use tracing::info;

use crate::cli::{InitArgs, resolve_db_path};
use crate::commands::import::{count_rows, ensure_schema, open_connection};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Testament {
    Old,
    New,
}

impl Testament {
    pub fn as_str(self) -> &'static str {
        match self {
            Testament::Old => "OT",
            Testament::New => "NT",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CanonicalBook {
    pub osis_id: &'static str,
    pub name: &'static str,
    pub testament: Testament,
    pub is_poetic: bool,
}

const fn ot(osis_id: &'static str, name: &'static str) -> CanonicalBook {
    CanonicalBook {
        osis_id,
        name,
        testament: Testament::Old,
        is_poetic: false,
    }
}

const fn poetic(osis_id: &'static str, name: &'static str) -> CanonicalBook {
    CanonicalBook {
        osis_id,
        name,
        testament: Testament::Old,
        is_poetic: true,
    }
}

const fn nt(osis_id: &'static str, name: &'static str) -> CanonicalBook {
    CanonicalBook {
        osis_id,
        name,
        testament: Testament::New,
        is_poetic: false,
    }
}

/// Protestant canon in traditional order; the slice index is the book order.
pub const CANONICAL_BOOKS: [CanonicalBook; 66] = [
    ot("Gen", "Genesis"),
    ot("Exod", "Exodus"),
    ot("Lev", "Leviticus"),
    ot("Num", "Numbers"),
    ot("Deut", "Deuteronomy"),
    ot("Josh", "Joshua"),
    ot("Judg", "Judges"),
    ot("Ruth", "Ruth"),
    ot("1Sam", "1 Samuel"),
    ot("2Sam", "2 Samuel"),
    ot("1Kgs", "1 Kings"),
    ot("2Kgs", "2 Kings"),
    ot("1Chr", "1 Chronicles"),
    ot("2Chr", "2 Chronicles"),
    ot("Ezra", "Ezra"),
    ot("Neh", "Nehemiah"),
    ot("Esth", "Esther"),
    poetic("Job", "Job"),
    poetic("Ps", "Psalms"),
    poetic("Prov", "Proverbs"),
    poetic("Eccl", "Ecclesiastes"),
    poetic("Song", "Song of Solomon"),
    ot("Isa", "Isaiah"),
    ot("Jer", "Jeremiah"),
    poetic("Lam", "Lamentations"),
    ot("Ezek", "Ezekiel"),
    ot("Dan", "Daniel"),
    ot("Hos", "Hosea"),
    ot("Joel", "Joel"),
    ot("Amos", "Amos"),
    ot("Obad", "Obadiah"),
    ot("Jonah", "Jonah"),
    ot("Mic", "Micah"),
    ot("Nah", "Nahum"),
    ot("Hab", "Habakkuk"),
    ot("Zeph", "Zephaniah"),
    ot("Hag", "Haggai"),
    ot("Zech", "Zechariah"),
    ot("Mal", "Malachi"),
    nt("Matt", "Matthew"),
    nt("Mark", "Mark"),
    nt("Luke", "Luke"),
    nt("John", "John"),
    nt("Acts", "Acts"),
    nt("Rom", "Romans"),
    nt("1Cor", "1 Corinthians"),
    nt("2Cor", "2 Corinthians"),
    nt("Gal", "Galatians"),
    nt("Eph", "Ephesians"),
    nt("Phil", "Philippians"),
    nt("Col", "Colossians"),
    nt("1Thess", "1 Thessalonians"),
    nt("2Thess", "2 Thessalonians"),
    nt("1Tim", "1 Timothy"),
    nt("2Tim", "2 Timothy"),
    nt("Titus", "Titus"),
    nt("Phlm", "Philemon"),
    nt("Heb", "Hebrews"),
    nt("Jas", "James"),
    nt("1Pet", "1 Peter"),
    nt("2Pet", "2 Peter"),
    nt("1John", "1 John"),
    nt("2John", "2 John"),
    nt("3John", "3 John"),
    nt("Jude", "Jude"),
    nt("Rev", "Revelation"),
];

pub fn run(args: InitArgs) -> Result<()> {
    let db_path = resolve_db_path(&args.cache_root, args.db_path.as_ref());
    info!(db_path = %db_path.display(), "initializing database");

    let mut connection = open_connection(&db_path)?;
    ensure_schema(&connection)?;
    let inserted = seed_books(&mut connection)?;
    let total = count_rows(&connection, "SELECT COUNT(*) FROM books")?;

    info!(inserted, total, "book table seeded");
    Ok(())
}

/// Insert any canonical book that is not present yet. Returns the number of
/// new rows.
pub fn seed_books(connection: &mut Connection) -> Result<usize> {
    let tx = connection.transaction()?;
    let mut inserted = 0;
    {
        let mut statement = tx
            .prepare(
                "
                INSERT INTO books(osis_id, name, testament, book_order, is_poetic)
                VALUES(?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(osis_id) DO NOTHING
                ",
            )
            .context("failed to prepare book seed statement")?;

        for (index, book) in CANONICAL_BOOKS.iter().enumerate() {
            inserted += statement.execute(params![
                book.osis_id,
                book.name,
                book.testament.as_str(),
                index as i64 + 1,
                book.is_poetic
            ])?;
        }
    }
    tx.commit()?;
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> Connection {
        let mut connection = Connection::open_in_memory().expect("in-memory db");
        ensure_schema(&connection).expect("schema");
        seed_books(&mut connection).expect("seed");
        connection
    }

    #[test]
    fn seeds_sixty_six_books_once() {
        let mut connection = seeded();
        assert_eq!(
            count_rows(&connection, "SELECT COUNT(*) FROM books").expect("count"),
            66
        );
        assert_eq!(seed_books(&mut connection).expect("reseed"), 0);
        assert_eq!(
            count_rows(&connection, "SELECT COUNT(*) FROM books").expect("count"),
            66
        );
    }

    #[test]
    fn poetic_books_are_flagged() {
        let connection = seeded();
        let mut statement = connection
            .prepare("SELECT osis_id FROM books WHERE is_poetic = 1 ORDER BY book_order")
            .expect("prepare");
        let poetic = statement
            .query_map([], |row| row.get::<_, String>(0))
            .expect("query")
            .collect::<rusqlite::Result<Vec<String>>>()
            .expect("rows");
        assert_eq!(poetic, vec!["Job", "Ps", "Prov", "Eccl", "Song", "Lam"]);
    }

    #[test]
    fn testament_split_follows_canon_order() {
        let connection = seeded();
        let (testament, order): (String, i64) = connection
            .query_row(
                "SELECT testament, book_order FROM books WHERE osis_id = 'Matt'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .expect("Matthew present");
        assert_eq!(testament, "NT");
        assert_eq!(order, 40);
    }
}
