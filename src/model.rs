use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct ImportPaths {
    pub cache_root: String,
    pub manifest_dir: String,
    pub source_path: String,
    pub db_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportCounts {
    pub books_in_document: usize,
    pub books_imported: usize,
    pub books_skipped: usize,
    pub chapters_inserted: usize,
    pub chapters_reused: usize,
    pub chapter_titles_inserted: usize,
    pub verses_seen: usize,
    pub verses_inserted: usize,
    pub verses_updated: usize,
    pub verses_failed: usize,
    pub verses_without_end_marker: usize,
    pub verses_with_nested_end_marker: usize,
    pub words_inserted: usize,
    pub verse_titles_inserted: usize,
    pub titles_coerced: usize,
    pub poetry_rows_inserted: usize,
    pub synthetic_poetry_lines: usize,
    pub translator_changes_inserted: usize,
    pub red_letter_inserted: usize,
    pub divine_names_inserted: usize,
    pub study_notes_inserted: usize,
    pub paragraphs_inserted: usize,
    pub paragraphs_existing: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BookCoverage {
    pub missing_from_schema: Vec<String>,
    pub absent_from_document: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VersionSummary {
    pub id: i64,
    pub osis_work: String,
    pub abbreviation: String,
    pub title: Option<String>,
    pub language: Option<String>,
    pub reused: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub db_schema_version: String,
    pub status: String,
    pub started_at: String,
    pub updated_at: String,
    pub command: String,
    pub source_sha256: String,
    pub paths: ImportPaths,
    pub version: VersionSummary,
    pub counts: ImportCounts,
    pub coverage: BookCoverage,
    pub fts_rebuilt: bool,
    pub warnings: Vec<String>,
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FixSpacingCounts {
    pub verses_scanned: usize,
    pub verses_changed: usize,
    pub verses_failed: usize,
    pub paragraphs_refreshed: usize,
    pub poetry_lines_refreshed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct FixSpacingManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub generated_at: String,
    pub work: Option<String>,
    pub dry_run: bool,
    pub db_path: String,
    pub counts: FixSpacingCounts,
    pub fts_rebuilt: bool,
    pub warnings: Vec<String>,
}
