use chrono::Utc;

use crate::cli::{ImportArgs, resolve_db_path};
use crate::model::{ImportPaths, ImportRunManifest};
use crate::util::{ensure_directory, sha256_file, utc_compact_string, write_json_pretty};

use super::*;

pub fn run(args: ImportArgs) -> Result<()> {
    let started_ts = Utc::now();
    let started_at = now_utc_string();
    let run_id = format!("run-{}", utc_compact_string(started_ts));

    let cache_root = args.cache_root.clone();
    let manifest_dir = cache_root.join("manifests");
    ensure_directory(&manifest_dir)?;

    let manifest_path = args.manifest_path.clone().unwrap_or_else(|| {
        manifest_dir.join(format!(
            "import_run_{}.json",
            utc_compact_string(started_ts)
        ))
    });
    let db_path = resolve_db_path(&cache_root, args.db_path.as_ref());

    info!(
        source = %args.source.display(),
        db_path = %db_path.display(),
        run_id = %run_id,
        "starting import"
    );

    let source_sha256 = sha256_file(&args.source)?;
    let doc = Document::load(&args.source)?;
    info!(nodes = doc.len(), "parsed OSIS document");

    let mut connection = open_connection(&db_path)?;
    ensure_schema(&connection)?;

    let options = ImportOptions {
        abbreviation: args.abbreviation.clone(),
        source_sha256: Some(source_sha256.clone()),
        cancel: None,
    };
    let outcome = import_document(&mut connection, &doc, &options)?;

    let status = if outcome.cancelled {
        "cancelled"
    } else if outcome.counts.verses_failed > 0 {
        "completed_with_errors"
    } else {
        "completed"
    };

    let manifest = ImportRunManifest {
        manifest_version: 1,
        run_id,
        db_schema_version: DB_SCHEMA_VERSION.to_string(),
        status: status.to_string(),
        started_at,
        updated_at: now_utc_string(),
        command: render_import_command(&args),
        source_sha256,
        paths: ImportPaths {
            cache_root: cache_root.display().to_string(),
            manifest_dir: manifest_dir.display().to_string(),
            source_path: args.source.display().to_string(),
            db_path: db_path.display().to_string(),
        },
        version: outcome.version,
        counts: outcome.counts,
        coverage: outcome.coverage,
        fts_rebuilt: outcome.fts_rebuilt,
        warnings: outcome.warnings,
        notes: vec![
            "Verse boundaries resolved from sID/eID milestones, including nested end markers."
                .to_string(),
            "Structural rows of re-imported verses are replaced, not appended.".to_string(),
        ],
    };

    write_json_pretty(&manifest_path, &manifest)?;

    info!(path = %manifest_path.display(), "wrote import run manifest");
    info!(
        status = %manifest.status,
        verses = manifest.counts.verses_seen,
        failed = manifest.counts.verses_failed,
        "import completed"
    );

    Ok(())
}

pub(super) fn render_import_command(args: &ImportArgs) -> String {
    let mut command = vec![
        "osis-import".to_string(),
        "import".to_string(),
        "--cache-root".to_string(),
        args.cache_root.display().to_string(),
        "--source".to_string(),
        args.source.display().to_string(),
    ];

    if let Some(db_path) = &args.db_path {
        command.push("--db-path".to_string());
        command.push(db_path.display().to_string());
    }
    if let Some(abbreviation) = &args.abbreviation {
        command.push("--abbreviation".to_string());
        command.push(abbreviation.clone());
    }
    if let Some(manifest_path) = &args.manifest_path {
        command.push("--manifest-path".to_string());
        command.push(manifest_path.display().to_string());
    }

    command.join(" ")
}
