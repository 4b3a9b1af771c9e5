use std::collections::BTreeSet;

use anyhow::{Result, bail};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info, warn};

use crate::cli::{FixSpacingArgs, resolve_db_path};
use crate::commands::import::{ensure_schema, open_connection, paragraph_text, rebuild_fts_index};
use crate::model::{FixSpacingCounts, FixSpacingManifest};
use crate::osis::render_verse;
use crate::util::{now_utc_string, utc_compact_string, with_busy_retry, write_json_pretty};

#[derive(Debug, Clone)]
pub struct FixSpacingOutcome {
    pub counts: FixSpacingCounts,
    pub fts_rebuilt: bool,
    pub warnings: Vec<String>,
}

struct StoredVerse {
    id: i64,
    chapter_id: i64,
    osis_id: String,
    text: String,
    formatted_text: String,
    original_xml: String,
}

pub fn run(args: FixSpacingArgs) -> Result<()> {
    let started_ts = Utc::now();
    let run_id = format!("fix-spacing-{}", utc_compact_string(started_ts));
    let manifest_path = args.cache_root.join("manifests").join(format!(
        "fix_spacing_{}.json",
        utc_compact_string(started_ts)
    ));
    let db_path = resolve_db_path(&args.cache_root, args.db_path.as_ref());

    info!(
        db_path = %db_path.display(),
        work = %args.work.as_deref().unwrap_or("*"),
        dry_run = args.dry_run,
        "starting spacing fix"
    );

    let mut connection = open_connection(&db_path)?;
    ensure_schema(&connection)?;
    let outcome = fix_spacing(&mut connection, args.work.as_deref(), args.dry_run)?;

    let manifest = FixSpacingManifest {
        manifest_version: 1,
        run_id,
        generated_at: now_utc_string(),
        work: args.work.clone(),
        dry_run: args.dry_run,
        db_path: db_path.display().to_string(),
        counts: outcome.counts,
        fts_rebuilt: outcome.fts_rebuilt,
        warnings: outcome.warnings,
    };
    write_json_pretty(&manifest_path, &manifest)?;

    info!(
        path = %manifest_path.display(),
        scanned = manifest.counts.verses_scanned,
        changed = manifest.counts.verses_changed,
        "spacing fix completed"
    );
    Ok(())
}

/// Re-derive plain and HTML verse text from the stored original markup and
/// rewrite rows whose rendering changed. Paragraph text of touched chapters is
/// rebuilt from the refreshed verses.
pub fn fix_spacing(
    connection: &mut Connection,
    work: Option<&str>,
    dry_run: bool,
) -> Result<FixSpacingOutcome> {
    let version_id = match work {
        Some(work) => {
            let id = connection
                .query_row(
                    "SELECT id FROM bible_versions WHERE osis_work = ?1",
                    [work],
                    |row| row.get::<_, i64>(0),
                )
                .optional()?;
            match id {
                Some(id) => Some(id),
                None => bail!("no bible version with work identifier {work}"),
            }
        }
        None => None,
    };

    let verses = load_verses(connection, version_id)?;
    let mut counts = FixSpacingCounts::default();
    let mut warnings = Vec::new();
    let mut touched_chapters = BTreeSet::new();

    let tx = connection.transaction()?;
    for verse in &verses {
        counts.verses_scanned += 1;
        let rendered = match render_verse(&verse.original_xml) {
            Ok(rendered) => rendered,
            Err(err) => {
                warn!(verse = %verse.osis_id, error = %format!("{err:#}"), "re-render failed");
                counts.verses_failed += 1;
                warnings.push(format!("verse {}: {err:#}", verse.osis_id));
                continue;
            }
        };

        if rendered.text == verse.text && rendered.html == verse.formatted_text {
            continue;
        }
        counts.verses_changed += 1;
        touched_chapters.insert(verse.chapter_id);
        debug!(verse = %verse.osis_id, "spacing changed");

        if !dry_run {
            with_busy_retry("update verses", || {
                tx.execute(
                    "UPDATE verses SET text = ?2, formatted_text = ?3, updated_at = ?4 WHERE id = ?1",
                    params![verse.id, rendered.text, rendered.html, now_utc_string()],
                )
            })?;
            counts.poetry_lines_refreshed += with_busy_retry("update poetry_structure", || {
                tx.execute(
                    "
                    UPDATE poetry_structure SET text_content = ?2
                    WHERE verse_id = ?1 AND is_synthetic = 1 AND text_content <> ?2
                    ",
                    params![verse.id, rendered.text],
                )
            })?;
        }
    }

    if !dry_run {
        for chapter_id in &touched_chapters {
            counts.paragraphs_refreshed += refresh_paragraphs(&tx, *chapter_id)?;
        }
    }
    tx.commit()?;

    let fts_rebuilt = if dry_run {
        false
    } else {
        match rebuild_fts_index(connection) {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %format!("{err:#}"), "full-text index rebuild failed");
                warnings.push(format!("full-text index rebuild failed: {err:#}"));
                false
            }
        }
    };

    Ok(FixSpacingOutcome {
        counts,
        fts_rebuilt,
        warnings,
    })
}

fn load_verses(connection: &Connection, version_id: Option<i64>) -> Result<Vec<StoredVerse>> {
    let mut statement = connection.prepare(
        "
        SELECT v.id, v.chapter_id, v.osis_id, v.text, v.formatted_text, v.original_xml
        FROM verses v
        JOIN chapters c ON c.id = v.chapter_id
        WHERE ?1 IS NULL OR c.bible_version_id = ?1
        ORDER BY v.chapter_id, v.verse_number
        ",
    )?;
    let verses = statement
        .query_map([version_id], |row| {
            Ok(StoredVerse {
                id: row.get(0)?,
                chapter_id: row.get(1)?,
                osis_id: row.get(2)?,
                text: row.get(3)?,
                formatted_text: row.get(4)?,
                original_xml: row.get(5)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<StoredVerse>>>()?;
    Ok(verses)
}

/// Returns the number of paragraph rows whose text changed.
fn refresh_paragraphs(connection: &Connection, chapter_id: i64) -> Result<usize> {
    let spans = {
        let mut statement = connection.prepare(
            "SELECT id, start_verse, end_verse, text_content FROM paragraphs WHERE chapter_id = ?1",
        )?;
        let rows = statement
            .query_map([chapter_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, u32>(1)?,
                    row.get::<_, u32>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows
    };

    let mut refreshed = 0;
    for (id, start_verse, end_verse, current) in spans {
        let text = paragraph_text(connection, chapter_id, start_verse, end_verse)?;
        if text == current {
            continue;
        }
        with_busy_retry("update paragraphs", || {
            connection.execute(
                "UPDATE paragraphs SET text_content = ?2 WHERE id = ?1",
                params![id, text],
            )
        })?;
        refreshed += 1;
    }
    Ok(refreshed)
}
