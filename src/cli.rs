use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

pub const DEFAULT_CACHE_ROOT: &str = ".cache/osis";
pub const DEFAULT_DB_FILENAME: &str = "bible.sqlite";

#[derive(Parser, Debug)]
#[command(
    name = "osis-import",
    version,
    about = "Import OSIS XML Bibles into a normalized SQLite store"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the schema and seed the canonical book list.
    Init(InitArgs),
    /// Import one OSIS document.
    Import(ImportArgs),
    /// Re-derive verse text and HTML from stored markup.
    FixSpacing(FixSpacingArgs),
    Status(StatusArgs),
}

#[derive(Args, Debug, Clone)]
pub struct InitArgs {
    #[arg(long, default_value = DEFAULT_CACHE_ROOT)]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ImportArgs {
    #[arg(long, default_value = DEFAULT_CACHE_ROOT)]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    /// OSIS XML document to import.
    #[arg(long)]
    pub source: PathBuf,

    /// Short name for a newly created version; derived from the work id when
    /// omitted.
    #[arg(long)]
    pub abbreviation: Option<String>,

    #[arg(long)]
    pub manifest_path: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct FixSpacingArgs {
    #[arg(long, default_value = DEFAULT_CACHE_ROOT)]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    /// Limit the pass to one work identifier, e.g. `Bible.en.kjv`.
    #[arg(long)]
    pub work: Option<String>,

    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long, default_value = DEFAULT_CACHE_ROOT)]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,
}

pub fn resolve_db_path(cache_root: &std::path::Path, db_path: Option<&PathBuf>) -> PathBuf {
    db_path
        .cloned()
        .unwrap_or_else(|| cache_root.join(DEFAULT_DB_FILENAME))
}
