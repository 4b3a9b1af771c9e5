use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, bail};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info, warn};

use crate::model::{BookCoverage, ImportCounts, VersionSummary};
use crate::osis::extract::{TitleRecord, title_record};
use crate::osis::paragraph::{self, ParagraphState, span_has_paragraph_break};
use crate::osis::reference::parse_osis_ref;
use crate::osis::render::render_html;
use crate::osis::{
    Document, NodeId, ParagraphSpan, StructuralExtractor, VerseStructure, is_verse_start,
    render_verse, resolve_verse,
};
use crate::util::{normalize_whitespace, now_utc_string, with_busy_retry};

mod db_setup;
mod pipeline;
mod run;
mod store;

pub use pipeline::{ImportOptions, import_document};
pub use run::run;

pub(crate) use db_setup::{
    DB_SCHEMA_VERSION, count_rows, ensure_schema, open_connection,
    open_existing_read_only, rebuild_fts_index,
};

pub(crate) use store::paragraph_text;

use store::*;
