// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Persistent print queue and printer registry backed by SQLite.
//
// Job and printer metadata live in a local SQLite database so they survive
// process restarts.  Artifact bytes (G-code) are NOT stored in the database:
// they live on disk in a content-addressed directory, referenced by their
// SHA-256 hash, and are staged out to a scratch directory when a job is
// handed to a printer.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument};

use druckwerk_core::error::{DruckwerkError, Result};
use druckwerk_core::types::{JobId, JobStatus, PrintJob, PrinterId, PrinterRecord};

/// SQLite schema for the jobs and printers tables.
const CREATE_TABLES_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS jobs (
        id TEXT PRIMARY KEY,
        printer_type TEXT NOT NULL,
        status TEXT NOT NULL,
        artifact_name TEXT NOT NULL,
        artifact_hash TEXT NOT NULL,
        added TEXT NOT NULL,
        started TEXT,
        finished TEXT,
        assigned_printer TEXT,
        duration_secs INTEGER,
        material_used_mm INTEGER
    );
    CREATE TABLE IF NOT EXISTS printers (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        printer_type TEXT NOT NULL,
        endpoint TEXT NOT NULL,
        api_key TEXT
    );
"#;

/// The interface the supervisor drives the queue store through.
///
/// All methods are synchronous: the production backend is `rusqlite`, whose
/// queries complete in well under a millisecond, and the orchestration cycle
/// is strictly sequential anyway.  Store failures are not locally recovered —
/// they propagate out of the cycle and are surfaced to the operator.
pub trait QueueStore: Send + Sync {
    /// All printer registry entries (including those without an API key).
    fn all_printer_details(&self) -> Result<Vec<PrinterRecord>>;

    /// The set of printer type tags present in the registry.
    fn valid_printer_types(&self) -> Result<BTreeSet<String>>;

    /// The oldest `Queued` job matching the given printer type, by added
    /// timestamp (FIFO).  `None` when nothing is queued for that type.
    fn next_print(&self, printer_type: &str) -> Result<Option<JobId>>;

    /// Full job record, or `None` if unknown.
    fn job(&self, id: &JobId) -> Result<Option<PrintJob>>;

    /// Current status of a job, or `None` if unknown.
    fn status(&self, id: &JobId) -> Result<Option<JobStatus>>;

    /// Transition a job's status, enforcing monotonicity
    /// (`Queued -> Running -> {Complete, Failed}`).
    fn update_status(&self, id: &JobId, status: JobStatus) -> Result<()>;

    /// Record that a job has started printing on the given printer.
    fn mark_running(&self, id: &JobId, printer: &PrinterId) -> Result<()>;

    /// Record a successful print with its measured duration and material use.
    fn mark_complete(
        &self,
        id: &JobId,
        printer: &PrinterId,
        duration_secs: i64,
        material_used_mm: i64,
    ) -> Result<()>;

    /// Record a failed print.
    fn mark_failed(&self, id: &JobId) -> Result<()>;

    /// Copy the job's artifact into `dest_dir` as `<job-id>.gcode`, verifying
    /// its content hash on the way out.  Returns the staged path.
    fn stage_artifact(&self, id: &JobId, dest_dir: &Path) -> Result<PathBuf>;
}

/// Queue store backed by a SQLite database plus an on-disk artifact directory.
pub struct SqliteQueueStore {
    /// Connection wrapped in a mutex so the store is `Sync` behind a trait
    /// object.  Contention is nil: the cycle is the only writer.
    conn: Mutex<Connection>,
    /// Content-addressed artifact directory (file name = SHA-256 hash).
    artifacts_dir: PathBuf,
}

impl SqliteQueueStore {
    /// Open (or create) the store database at the given path.
    ///
    /// Applies WAL journal mode and creates the tables if they do not exist.
    /// `artifacts_dir` is created if needed.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>, artifacts_dir: impl Into<PathBuf>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| DruckwerkError::Store(format!("open: {e}")))?;

        // WAL survives unclean shutdowns more gracefully and keeps readers
        // (e.g. an external status page) from blocking the cycle.
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| DruckwerkError::Store(format!("WAL pragma: {e}")))?;

        Self::init(conn, artifacts_dir.into(), "queue store database opened")
    }

    /// Open an in-memory database (useful for tests).
    pub fn open_in_memory(artifacts_dir: impl Into<PathBuf>) -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| DruckwerkError::Store(format!("open in-memory: {e}")))?;
        Self::init(conn, artifacts_dir.into(), "in-memory queue store opened")
    }

    fn init(conn: Connection, artifacts_dir: PathBuf, message: &str) -> Result<Self> {
        conn.execute_batch(CREATE_TABLES_SQL)
            .map_err(|e| DruckwerkError::Store(format!("create tables: {e}")))?;
        std::fs::create_dir_all(&artifacts_dir)?;
        info!("{message}");
        Ok(Self {
            conn: Mutex::new(conn),
            artifacts_dir,
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("store lock poisoned")
    }

    /// Store artifact bytes content-addressed by their SHA-256 hash.
    ///
    /// Returns the hash to record on the owning job.  Idempotent: identical
    /// bytes land in the same file.
    pub fn store_artifact(&self, bytes: &[u8]) -> Result<String> {
        let hash = hex::encode(Sha256::digest(bytes));
        let path = self.artifacts_dir.join(&hash);
        if !path.exists() {
            std::fs::write(&path, bytes)?;
        }
        debug!(hash = %hash, size = bytes.len(), "artifact stored");
        Ok(hash)
    }

    /// Insert a new print job into the queue.
    ///
    /// The job's artifact must already be stored (see [`store_artifact`]).
    #[instrument(skip(self, job), fields(job_id = %job.id))]
    pub fn insert_job(&self, job: &PrintJob) -> Result<()> {
        let status_json = serde_json::to_string(&job.status)?;

        self.lock()
            .execute(
                "INSERT INTO jobs (id, printer_type, status, artifact_name, artifact_hash,
                 added, started, finished, assigned_printer, duration_secs, material_used_mm)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    job.id.to_string(),
                    job.printer_type,
                    status_json,
                    job.artifact_name,
                    job.artifact_hash,
                    job.added.to_rfc3339(),
                    job.started.map(|t| t.to_rfc3339()),
                    job.finished.map(|t| t.to_rfc3339()),
                    job.assigned_printer.map(|p| p.to_string()),
                    job.duration_secs,
                    job.material_used_mm,
                ],
            )
            .map_err(|e| DruckwerkError::Store(format!("insert job: {e}")))?;

        info!(job_id = %job.id, printer_type = %job.printer_type, "job queued");
        Ok(())
    }

    /// Add or update a printer registry entry.
    #[instrument(skip(self, record), fields(printer_id = %record.id))]
    pub fn register_printer(&self, record: &PrinterRecord) -> Result<()> {
        self.lock()
            .execute(
                "INSERT OR REPLACE INTO printers (id, name, printer_type, endpoint, api_key)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.id.to_string(),
                    record.name,
                    record.printer_type,
                    record.endpoint,
                    record.api_key,
                ],
            )
            .map_err(|e| DruckwerkError::Store(format!("register printer: {e}")))?;

        info!(printer_id = %record.id, name = %record.name, "printer registered");
        Ok(())
    }

    /// Apply a status transition plus extra column updates in one statement.
    fn transition(
        &self,
        id: &JobId,
        next: JobStatus,
        extra_sql: &str,
        extra_params: &[&dyn rusqlite::ToSql],
    ) -> Result<()> {
        let current = self
            .status(id)?
            .ok_or_else(|| DruckwerkError::UnknownJob(id.to_string()))?;

        if !current.can_transition_to(next) {
            return Err(DruckwerkError::InvalidTransition {
                from: current.to_string(),
                to: next.to_string(),
            });
        }

        let status_json = serde_json::to_string(&next)?;
        let sql = format!("UPDATE jobs SET status = ?1{extra_sql} WHERE id = ?2");
        let mut all_params: Vec<&dyn rusqlite::ToSql> = vec![&status_json];
        let id_string = id.to_string();
        all_params.push(&id_string);
        all_params.extend_from_slice(extra_params);

        self.lock()
            .execute(&sql, all_params.as_slice())
            .map_err(|e| DruckwerkError::Store(format!("update job: {e}")))?;

        debug!(job_id = %id, from = %current, to = %next, "job status updated");
        Ok(())
    }
}

impl QueueStore for SqliteQueueStore {
    fn all_printer_details(&self) -> Result<Vec<PrinterRecord>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare("SELECT id, name, printer_type, endpoint, api_key FROM printers ORDER BY name")
            .map_err(|e| DruckwerkError::Store(format!("prepare printers: {e}")))?;

        let records = stmt
            .query_map([], row_to_printer_record)
            .map_err(|e| DruckwerkError::Store(format!("query printers: {e}")))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| DruckwerkError::Store(format!("collect printers: {e}")))?;

        debug!(count = records.len(), "retrieved printer registry");
        Ok(records)
    }

    fn valid_printer_types(&self) -> Result<BTreeSet<String>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare("SELECT DISTINCT printer_type FROM printers")
            .map_err(|e| DruckwerkError::Store(format!("prepare types: {e}")))?;

        let types = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| DruckwerkError::Store(format!("query types: {e}")))?
            .collect::<std::result::Result<BTreeSet<_>, _>>()
            .map_err(|e| DruckwerkError::Store(format!("collect types: {e}")))?;

        Ok(types)
    }

    fn next_print(&self, printer_type: &str) -> Result<Option<JobId>> {
        let queued_json = serde_json::to_string(&JobStatus::Queued)?;
        let conn = self.lock();

        let id: Option<String> = conn
            .query_row(
                "SELECT id FROM jobs
                 WHERE status = ?1 AND printer_type = ?2
                 ORDER BY added ASC LIMIT 1",
                params![queued_json, printer_type],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| DruckwerkError::Store(format!("next print: {e}")))?;

        match id {
            Some(raw) => Ok(Some(parse_job_id(&raw)?)),
            None => Ok(None),
        }
    }

    fn job(&self, id: &JobId) -> Result<Option<PrintJob>> {
        let conn = self.lock();
        conn.query_row(
            "SELECT id, printer_type, status, artifact_name, artifact_hash,
                    added, started, finished, assigned_printer, duration_secs, material_used_mm
             FROM jobs WHERE id = ?1",
            params![id.to_string()],
            row_to_print_job,
        )
        .optional()
        .map_err(|e| DruckwerkError::Store(format!("get job: {e}")))
    }

    fn status(&self, id: &JobId) -> Result<Option<JobStatus>> {
        let conn = self.lock();
        let raw: Option<String> = conn
            .query_row(
                "SELECT status FROM jobs WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| DruckwerkError::Store(format!("get status: {e}")))?;

        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn update_status(&self, id: &JobId, status: JobStatus) -> Result<()> {
        self.transition(id, status, "", &[])
    }

    fn mark_running(&self, id: &JobId, printer: &PrinterId) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let printer_string = printer.to_string();
        self.transition(
            id,
            JobStatus::Running,
            ", started = ?3, assigned_printer = ?4",
            &[&now, &printer_string],
        )?;
        info!(job_id = %id, printer_id = %printer, "job marked running");
        Ok(())
    }

    fn mark_complete(
        &self,
        id: &JobId,
        printer: &PrinterId,
        duration_secs: i64,
        material_used_mm: i64,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.transition(
            id,
            JobStatus::Complete,
            ", finished = ?3, duration_secs = ?4, material_used_mm = ?5",
            &[&now, &duration_secs, &material_used_mm],
        )?;
        info!(
            job_id = %id,
            printer_id = %printer,
            duration_secs,
            material_used_mm,
            "job marked complete"
        );
        Ok(())
    }

    fn mark_failed(&self, id: &JobId) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.transition(id, JobStatus::Failed, ", finished = ?3", &[&now])?;
        info!(job_id = %id, "job marked failed");
        Ok(())
    }

    #[instrument(skip(self, dest_dir), fields(job_id = %id))]
    fn stage_artifact(&self, id: &JobId, dest_dir: &Path) -> Result<PathBuf> {
        let job = self
            .job(id)?
            .ok_or_else(|| DruckwerkError::UnknownJob(id.to_string()))?;

        let source = self.artifacts_dir.join(&job.artifact_hash);
        let bytes = std::fs::read(&source).map_err(|e| {
            DruckwerkError::Artifact(format!("read {}: {e}", source.display()))
        })?;

        // The hash is the content address, so a mismatch means on-disk
        // corruption rather than a lookup error.
        let actual = hex::encode(Sha256::digest(&bytes));
        if actual != job.artifact_hash {
            return Err(DruckwerkError::IntegrityMismatch {
                expected: job.artifact_hash,
                actual,
            });
        }

        let dest = dest_dir.join(format!("{id}.gcode"));
        std::fs::write(&dest, &bytes)?;
        debug!(path = %dest.display(), size = bytes.len(), "artifact staged");
        Ok(dest)
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn parse_job_id(raw: &str) -> Result<JobId> {
    uuid::Uuid::parse_str(raw)
        .map(JobId)
        .map_err(|e| DruckwerkError::Store(format!("malformed job id '{raw}': {e}")))
}

/// Map a SQLite row to a `PrinterRecord`.
fn row_to_printer_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<PrinterRecord> {
    let id_str: String = row.get(0)?;
    let id = uuid::Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(PrinterRecord {
        id: PrinterId(id),
        name: row.get(1)?,
        printer_type: row.get(2)?,
        endpoint: row.get(3)?,
        api_key: row.get(4)?,
    })
}

/// Map a SQLite row to a `PrintJob`.
///
/// Column indices must match the SELECT order used in the query methods above.
fn row_to_print_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<PrintJob> {
    let id_str: String = row.get(0)?;
    let status_json: String = row.get(2)?;
    let added_str: String = row.get(5)?;
    let started_str: Option<String> = row.get(6)?;
    let finished_str: Option<String> = row.get(7)?;
    let printer_str: Option<String> = row.get(8)?;

    let id = uuid::Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let status: JobStatus = serde_json::from_str(&status_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let added = parse_timestamp(&added_str, 5)?;
    let started = started_str.map(|s| parse_timestamp(&s, 6)).transpose()?;
    let finished = finished_str.map(|s| parse_timestamp(&s, 7)).transpose()?;

    let assigned_printer = printer_str
        .map(|s| {
            uuid::Uuid::parse_str(&s).map(PrinterId).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    8,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })
        })
        .transpose()?;

    Ok(PrintJob {
        id: JobId(id),
        printer_type: row.get(1)?,
        status,
        artifact_name: row.get(3)?,
        artifact_hash: row.get(4)?,
        added,
        started,
        finished,
        assigned_printer,
        duration_secs: row.get(9)?,
        material_used_mm: row.get(10)?,
    })
}

fn parse_timestamp(raw: &str, column: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                column,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn test_store() -> (SqliteQueueStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SqliteQueueStore::open_in_memory(dir.path().join("artifacts"))
            .expect("open in-memory store");
        (store, dir)
    }

    /// Helper: queue a job with given type and an added-timestamp offset.
    fn queue_job(store: &SqliteQueueStore, printer_type: &str, added_offset_secs: i64) -> PrintJob {
        let hash = store
            .store_artifact(b"G28\nG1 X10 Y10\n")
            .expect("store artifact");
        let mut job = PrintJob::new(printer_type.into(), "part.gcode".into(), hash);
        job.added += Duration::seconds(added_offset_secs);
        store.insert_job(&job).expect("insert");
        job
    }

    #[test]
    fn next_print_is_fifo_by_added_timestamp() {
        let (store, _dir) = test_store();
        // Inserted newest-first to prove ordering comes from the timestamp.
        let later = queue_job(&store, "A", 60);
        let earlier = queue_job(&store, "A", 0);

        assert_eq!(store.next_print("A").expect("next"), Some(earlier.id));

        let printer = PrinterId::new();
        store.mark_running(&earlier.id, &printer).expect("running");
        assert_eq!(store.next_print("A").expect("next"), Some(later.id));
    }

    #[test]
    fn next_print_filters_by_type() {
        let (store, _dir) = test_store();
        queue_job(&store, "A", 0);

        assert!(store.next_print("B").expect("next").is_none());
    }

    #[test]
    fn mark_running_sets_assignment_and_start_time() {
        let (store, _dir) = test_store();
        let job = queue_job(&store, "A", 0);
        let printer = PrinterId::new();

        store.mark_running(&job.id, &printer).expect("running");

        let updated = store.job(&job.id).expect("get").expect("found");
        assert_eq!(updated.status, JobStatus::Running);
        assert_eq!(updated.assigned_printer, Some(printer));
        assert!(updated.started.is_some());
        assert!(updated.finished.is_none());
    }

    #[test]
    fn mark_complete_records_measurements() {
        let (store, _dir) = test_store();
        let job = queue_job(&store, "A", 0);
        let printer = PrinterId::new();

        store.mark_running(&job.id, &printer).expect("running");
        store
            .mark_complete(&job.id, &printer, 3600, 3000)
            .expect("complete");

        let updated = store.job(&job.id).expect("get").expect("found");
        assert_eq!(updated.status, JobStatus::Complete);
        assert_eq!(updated.duration_secs, Some(3600));
        assert_eq!(updated.material_used_mm, Some(3000));
        assert!(updated.finished.is_some());
    }

    #[test]
    fn transitions_out_of_terminal_states_are_rejected() {
        let (store, _dir) = test_store();
        let job = queue_job(&store, "A", 0);
        let printer = PrinterId::new();

        store.mark_running(&job.id, &printer).expect("running");
        store.mark_failed(&job.id).expect("failed");

        let err = store
            .update_status(&job.id, JobStatus::Running)
            .expect_err("terminal state must be final");
        assert!(matches!(err, DruckwerkError::InvalidTransition { .. }));
    }

    #[test]
    fn complete_requires_running() {
        let (store, _dir) = test_store();
        let job = queue_job(&store, "A", 0);

        let err = store
            .mark_complete(&job.id, &PrinterId::new(), 10, 10)
            .expect_err("queued job cannot complete");
        assert!(matches!(err, DruckwerkError::InvalidTransition { .. }));
    }

    #[test]
    fn marking_unknown_job_fails() {
        let (store, _dir) = test_store();
        let err = store.mark_failed(&JobId::new()).expect_err("unknown job");
        assert!(matches!(err, DruckwerkError::UnknownJob(_)));
    }

    #[test]
    fn stage_artifact_names_file_by_job_id() {
        let (store, dir) = test_store();
        let job = queue_job(&store, "A", 0);

        let staged = store
            .stage_artifact(&job.id, dir.path())
            .expect("stage artifact");

        assert_eq!(
            staged.file_name().and_then(|n| n.to_str()),
            Some(format!("{}.gcode", job.id).as_str())
        );
        assert_eq!(
            std::fs::read(&staged).expect("read staged"),
            b"G28\nG1 X10 Y10\n"
        );
    }

    #[test]
    fn stage_artifact_detects_corruption() {
        let (store, dir) = test_store();
        let job = queue_job(&store, "A", 0);

        // Corrupt the content-addressed file behind the store's back.
        let path = dir.path().join("artifacts").join(&job.artifact_hash);
        std::fs::write(&path, b"tampered").expect("overwrite");

        let err = store
            .stage_artifact(&job.id, dir.path())
            .expect_err("corrupted artifact must be rejected");
        assert!(matches!(err, DruckwerkError::IntegrityMismatch { .. }));
    }

    #[test]
    fn registry_round_trip() {
        let (store, _dir) = test_store();
        let record = PrinterRecord {
            id: PrinterId::new(),
            name: "ultra-1".into(),
            printer_type: "A".into(),
            endpoint: "10.0.0.5".into(),
            api_key: Some("key".into()),
        };
        store.register_printer(&record).expect("register");

        let all = store.all_printer_details().expect("details");
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, record.id);
        assert_eq!(all[0].endpoint, "10.0.0.5");
    }

    #[test]
    fn valid_printer_types_deduplicates() {
        let (store, _dir) = test_store();
        for (name, printer_type) in [("p1", "A"), ("p2", "A"), ("p3", "B")] {
            store
                .register_printer(&PrinterRecord {
                    id: PrinterId::new(),
                    name: name.into(),
                    printer_type: printer_type.into(),
                    endpoint: "10.0.0.1".into(),
                    api_key: None,
                })
                .expect("register");
        }

        let types = store.valid_printer_types().expect("types");
        assert_eq!(types.into_iter().collect::<Vec<_>>(), vec!["A", "B"]);
    }
}
