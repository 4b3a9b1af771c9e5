use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use backoff::ExponentialBackoff;
use backoff::backoff::Backoff;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::ErrorCode;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::warn;

pub const STORAGE_RETRY_ATTEMPTS: u32 = 5;
const STORAGE_RETRY_INITIAL_INTERVAL: Duration = Duration::from_millis(100);

pub fn now_utc_string() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn utc_compact_string(ts: DateTime<Utc>) -> String {
    ts.format("%Y%m%dT%H%M%SZ").to_string()
}

pub fn ensure_directory(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .with_context(|| format!("failed to create directory: {}", path.display()))
}

pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)
        .with_context(|| format!("failed to open file for hashing: {}", path.display()))?;

    let mut hasher = Sha256::new();
    let mut buf = [0_u8; 8192];

    loop {
        let count = file
            .read(&mut buf)
            .with_context(|| format!("failed to read file for hashing: {}", path.display()))?;
        if count == 0 {
            break;
        }
        hasher.update(&buf[..count]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

pub fn write_json_pretty<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_directory(parent)?;
    }

    let data = serde_json::to_vec_pretty(value)
        .with_context(|| format!("failed to serialize json: {}", path.display()))?;

    let mut file = File::create(path)
        .with_context(|| format!("failed to create json file: {}", path.display()))?;
    file.write_all(&data)
        .with_context(|| format!("failed to write json file: {}", path.display()))?;
    file.write_all(b"\n")
        .with_context(|| format!("failed to finalize json file: {}", path.display()))?;

    Ok(())
}

pub fn normalize_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<&str>>().join(" ")
}

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _)
            if matches!(failure.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

/// Doubling delays from 100 ms without jitter; the attempt count bounds the
/// loop, not elapsed time.
fn storage_backoff() -> ExponentialBackoff {
    ExponentialBackoff {
        current_interval: STORAGE_RETRY_INITIAL_INTERVAL,
        initial_interval: STORAGE_RETRY_INITIAL_INTERVAL,
        randomization_factor: 0.0,
        multiplier: 2.0,
        max_elapsed_time: None,
        ..Default::default()
    }
}

/// Run a storage call, retrying a bounded number of times while SQLite
/// reports the database as busy or locked.
pub fn with_busy_retry<T>(
    operation: &str,
    mut call: impl FnMut() -> rusqlite::Result<T>,
) -> Result<T> {
    let mut backoff = storage_backoff();
    let mut attempt = 1;
    loop {
        match call() {
            Ok(value) => return Ok(value),
            Err(err) if is_busy(&err) && attempt < STORAGE_RETRY_ATTEMPTS => {
                let Some(delay) = backoff.next_backoff() else {
                    return Err(err).with_context(|| format!("storage call failed: {operation}"));
                };
                warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "storage busy, retrying"
                );
                thread::sleep(delay);
                attempt += 1;
            }
            Err(err) => {
                return Err(err).with_context(|| format!("storage call failed: {operation}"));
            }
        }
    }
}
