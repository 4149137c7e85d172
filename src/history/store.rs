//! SQLite-backed [`RunHistoryStore`].

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{HistoryError, RunRecord, RunStatus};
use crate::backend::ArtifactCleaner;
use crate::storage::Pool;

const SELECT_RECORDS: &str = "SELECT id, suite, status, duration_secs, started_at, pass_count, \
     fail_count, report_file, log_file, video_file, raw_logs_json FROM run_history";

/// Append-only history of finished runs.
///
/// Cheap to clone; clones share the pool and the write gate, so `append`,
/// `remove` and `import_json` are serialized across every handle.
#[derive(Clone)]
pub struct RunHistoryStore {
    pool: Pool,
    cleaner: Arc<dyn ArtifactCleaner>,
    write_gate: Arc<Mutex<()>>,
}

/// Result of [`RunHistoryStore::remove`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RemoveReport {
    pub removed: bool,
    /// Artifacts that could not be deleted. The record is gone regardless.
    pub artifact_warnings: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HistoryStats {
    pub total_runs: usize,
    pub passed_runs: usize,
    /// Percentage of runs that finished `Success`.
    pub pass_rate: f64,
    pub avg_duration_secs: f64,
}

impl HistoryStats {
    pub fn from_records(records: &[RunRecord]) -> Self {
        if records.is_empty() {
            return Self::default();
        }
        let total = records.len();
        let passed = records
            .iter()
            .filter(|r| r.status == RunStatus::Success)
            .count();
        let duration: f64 = records.iter().map(|r| r.duration_secs).sum();
        Self {
            total_runs: total,
            passed_runs: passed,
            pass_rate: passed as f64 / total as f64 * 100.0,
            avg_duration_secs: duration / total as f64,
        }
    }
}

impl RunHistoryStore {
    pub fn new(pool: Pool, cleaner: Arc<dyn ArtifactCleaner>) -> Self {
        Self {
            pool,
            cleaner,
            write_gate: Arc::new(Mutex::new(())),
        }
    }

    /// Persist one finished run. Ids are unique; a duplicate is an error.
    pub async fn append(&self, record: &RunRecord) -> Result<()> {
        let _gate = self.write_gate.lock().await;
        let record = record.clone();
        let inserted = self.blocking(move |conn| insert(conn, &record)).await?;
        if inserted == 0 {
            anyhow::bail!("run record already exists");
        }
        Ok(())
    }

    /// Every record, oldest first. An unreadable history reads as empty.
    pub async fn list(&self) -> Vec<RunRecord> {
        self.read("ORDER BY seq ASC", Vec::new()).await
    }

    /// The latest `n` records, newest first.
    pub async fn recent(&self, n: usize) -> Vec<RunRecord> {
        // SQLite limits are signed 64-bit.
        let limit = i64::try_from(n).unwrap_or(i64::MAX);
        self.read(&format!("ORDER BY seq DESC LIMIT {}", limit), Vec::new())
            .await
    }

    pub async fn get(&self, id: &str) -> Option<RunRecord> {
        self.read("WHERE id = ?1", vec![id.to_string()])
            .await
            .into_iter()
            .next()
    }

    /// Delete a record, then ask the backend to delete its artifacts.
    ///
    /// Artifact deletion is best effort: failures are logged and returned as
    /// warnings, and never bring the record back.
    pub async fn remove(&self, id: &str) -> Result<RemoveReport> {
        let artifacts = {
            let _gate = self.write_gate.lock().await;
            let id = id.to_string();
            self.blocking(move |conn| delete(conn, &id)).await?
        };

        let Some(artifacts) = artifacts else {
            debug!(%id, "no run record to remove");
            return Ok(RemoveReport::default());
        };
        info!(%id, "run record removed");

        let mut report = RemoveReport {
            removed: true,
            artifact_warnings: Vec::new(),
        };
        for filename in artifacts {
            if let Err(source) = self.cleaner.delete_artifact(&filename).await {
                let err = HistoryError::ArtifactDeleteFailed { filename, source };
                warn!(%id, error = %err, "artifact cleanup failed");
                report.artifact_warnings.push(err.to_string());
            }
        }
        Ok(report)
    }

    pub async fn stats(&self) -> HistoryStats {
        HistoryStats::from_records(&self.list().await)
    }

    /// Write the whole history as a JSON array. Returns the number of records.
    pub async fn export_json(&self, path: &Path) -> Result<usize> {
        let records = self.list().await;
        let body =
            serde_json::to_string_pretty(&records).context("failed to serialize run history")?;
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                tokio::fs::create_dir_all(dir)
                    .await
                    .with_context(|| format!("failed to create {}", dir.display()))?;
            }
        }
        tokio::fs::write(path, body)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!(path = %path.display(), count = records.len(), "run history exported");
        Ok(records.len())
    }

    /// Append records from a JSON array written by [`export_json`](Self::export_json).
    ///
    /// Records whose id is already present are skipped. An unreadable or
    /// corrupt file imports nothing and returns `Ok(0)`.
    pub async fn import_json(&self, path: &Path) -> Result<usize> {
        let records: Vec<RunRecord> = match tokio::fs::read_to_string(path).await {
            Ok(body) => match serde_json::from_str(&body) {
                Ok(records) => records,
                Err(e) => {
                    let err = HistoryError::Corrupt(format!("{}: {}", path.display(), e));
                    warn!(error = %err, "nothing imported");
                    return Ok(0);
                }
            },
            Err(e) => {
                let err = HistoryError::Corrupt(format!("{}: {}", path.display(), e));
                warn!(error = %err, "nothing imported");
                return Ok(0);
            }
        };

        let _gate = self.write_gate.lock().await;
        let imported = self
            .blocking(move |conn| {
                let tx = conn.unchecked_transaction()?;
                let mut imported = 0;
                for record in &records {
                    imported += insert(&tx, record)?;
                }
                tx.commit()?;
                Ok(imported)
            })
            .await?;
        info!(path = %path.display(), imported, "run history imported");
        Ok(imported)
    }

    async fn read(&self, clause: &str, args: Vec<String>) -> Vec<RunRecord> {
        let sql = format!("{} {}", SELECT_RECORDS, clause);
        match self.blocking(move |conn| query(conn, &sql, args)).await {
            Ok(records) => records,
            Err(e) => {
                let err = HistoryError::Corrupt(format!("{:#}", e));
                warn!(error = %err, "treating run history as empty");
                Vec::new()
            }
        }
    }

    /// Run a database closure on the blocking pool.
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().context("failed to get a database connection")?;
            f(&conn)
        })
        .await?
    }
}

fn insert(conn: &Connection, r: &RunRecord) -> Result<usize> {
    let raw_logs = serde_json::to_string(&r.raw_logs)?;
    let inserted = conn
        .execute(
            "INSERT OR IGNORE INTO run_history (id, suite, status, duration_secs, started_at,
                 pass_count, fail_count, report_file, log_file, video_file, raw_logs_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                r.id,
                r.suite,
                r.status.as_str(),
                r.duration_secs,
                r.started_at.to_rfc3339(),
                r.pass_count,
                r.fail_count,
                r.report_file,
                r.log_file,
                r.video_file,
                raw_logs,
            ],
        )
        .with_context(|| format!("failed to insert run record {}", r.id))?;
    Ok(inserted)
}

/// Delete one row, returning its artifact filenames if it existed.
fn delete(conn: &Connection, id: &str) -> Result<Option<Vec<String>>> {
    let artifacts = conn
        .query_row(
            "SELECT report_file, log_file, video_file FROM run_history WHERE id = ?1",
            [id],
            |row| {
                Ok([
                    row.get::<_, Option<String>>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ])
            },
        )
        .optional()?;
    conn.execute("DELETE FROM run_history WHERE id = ?1", [id])?;
    Ok(artifacts.map(|files| files.into_iter().flatten().collect()))
}

fn query(conn: &Connection, sql: &str, args: Vec<String>) -> Result<Vec<RunRecord>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params_from_iter(args), StoredRow::from_row)?;

    let mut records = Vec::new();
    for row in rows {
        match row.map_err(anyhow::Error::from).and_then(StoredRow::decode) {
            Ok(record) => records.push(record),
            Err(e) => warn!(error = %e, "skipping undecodable run record"),
        }
    }
    Ok(records)
}

/// A `run_history` row before validation.
struct StoredRow {
    id: String,
    suite: String,
    status: String,
    duration_secs: f64,
    started_at: String,
    pass_count: i64,
    fail_count: i64,
    report_file: Option<String>,
    log_file: Option<String>,
    video_file: Option<String>,
    raw_logs_json: String,
}

impl StoredRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            suite: row.get(1)?,
            status: row.get(2)?,
            duration_secs: row.get(3)?,
            started_at: row.get(4)?,
            pass_count: row.get(5)?,
            fail_count: row.get(6)?,
            report_file: row.get(7)?,
            log_file: row.get(8)?,
            video_file: row.get(9)?,
            raw_logs_json: row.get(10)?,
        })
    }

    fn decode(self) -> Result<RunRecord> {
        let started_at = DateTime::parse_from_rfc3339(&self.started_at)
            .with_context(|| format!("record {} has a bad start time", self.id))?
            .with_timezone(&Utc);
        let raw_logs = serde_json::from_str(&self.raw_logs_json)
            .with_context(|| format!("record {} has unreadable logs", self.id))?;
        Ok(RunRecord {
            status: self.status.parse()?,
            suite: self.suite,
            duration_secs: self.duration_secs,
            started_at,
            pass_count: u32::try_from(self.pass_count)?,
            fail_count: u32::try_from(self.fail_count)?,
            report_file: self.report_file,
            log_file: self.log_file,
            video_file: self.video_file,
            raw_logs,
            id: self.id,
        })
    }
}
