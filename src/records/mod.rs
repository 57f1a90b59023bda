use crate::forms::types::FormKind;
use crate::session::Language;
use anyhow::Context;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;

/// Status of a record kept only locally.
pub const STATUS_SUBMITTED: &str = "Submitted";
/// Status of a record awaiting remote acknowledgement.
pub const STATUS_PENDING: &str = "Pending";

const REFERENCE_ATTEMPTS: usize = 5;

/// A completed form as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmissionRecord {
    pub reference: String,
    pub form_id: String,
    pub form_kind: String,
    pub user_id: String,
    pub language: String,
    /// One entry per declared field of the form.
    pub fields: BTreeMap<String, String>,
    pub submission_timestamp: String,
    pub status: String,
    pub remote_reference: Option<String>,
    pub updated_at: String,
}

/// Parameters for storing a completed form.
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub form_id: Uuid,
    pub kind: FormKind,
    pub user_id: String,
    pub language: Language,
    pub reference_prefix: String,
    pub fields: BTreeMap<String, String>,
    pub status: String,
    pub remote_reference: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(SubmissionRecord),
    /// The form was already stored; this is the earlier record.
    Duplicate(SubmissionRecord),
}

impl InsertOutcome {
    pub fn record(&self) -> &SubmissionRecord {
        match self {
            InsertOutcome::Inserted(r) | InsertOutcome::Duplicate(r) => r,
        }
    }
}

/// `<PREFIX><YYYYMMDD>-<6 hex>`, e.g. `CMP20261017-3FA91C`.
pub fn generate_reference(prefix: &str, now: DateTime<Utc>) -> String {
    let suffix: String = Uuid::new_v4().simple().to_string()[..6].to_uppercase();
    format!("{prefix}{}-{suffix}", now.format("%Y%m%d"))
}

fn timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Append-only store of completed forms. Only `status` changes after insert.
///
/// The connection sits behind a `Mutex`; callers on async tasks share one
/// store through `Arc<RecordStore>`.
pub struct RecordStore {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl RecordStore {
    /// Open (or create) the record database at the given path.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open record database {}", path.display()))?;
        let store = Self {
            conn: Mutex::new(conn),
            db_path: path.to_path_buf(),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// In-memory database (for tests and dry runs).
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
            db_path: PathBuf::from(":memory:"),
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn init_schema(&self) -> anyhow::Result<()> {
        let guard = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        guard
            .execute_batch(
                "PRAGMA journal_mode=WAL;
                 PRAGMA busy_timeout=5000;

                 CREATE TABLE IF NOT EXISTS submissions (
                     reference            TEXT PRIMARY KEY NOT NULL,
                     form_id              TEXT NOT NULL UNIQUE,
                     form_kind            TEXT NOT NULL,
                     user_id              TEXT NOT NULL,
                     language             TEXT NOT NULL,
                     fields_json          TEXT NOT NULL,
                     submission_timestamp TEXT NOT NULL,
                     status               TEXT NOT NULL,
                     remote_reference     TEXT,
                     updated_at           TEXT NOT NULL
                 );
                 CREATE INDEX IF NOT EXISTS idx_submissions_kind
                     ON submissions(form_kind, submission_timestamp DESC);
                 CREATE INDEX IF NOT EXISTS idx_submissions_remote
                     ON submissions(remote_reference);",
            )
            .context("failed to initialize record schema")?;
        Ok(())
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<(SubmissionRecord, String)> {
        let fields_json: String = row.get(5)?;
        Ok((
            SubmissionRecord {
                reference: row.get(0)?,
                form_id: row.get(1)?,
                form_kind: row.get(2)?,
                user_id: row.get(3)?,
                language: row.get(4)?,
                fields: BTreeMap::new(),
                submission_timestamp: row.get(6)?,
                status: row.get(7)?,
                remote_reference: row.get(8)?,
                updated_at: row.get(9)?,
            },
            fields_json,
        ))
    }

    fn decode((mut record, fields_json): (SubmissionRecord, String)) -> anyhow::Result<SubmissionRecord> {
        record.fields = serde_json::from_str(&fields_json)
            .with_context(|| format!("corrupt fields for record {}", record.reference))?;
        Ok(record)
    }

    const COLUMNS: &'static str = "reference, form_id, form_kind, user_id, language, fields_json, \
         submission_timestamp, status, remote_reference, updated_at";

    /// Store a completed form once. A second insert for the same form id is a
    /// no-op that returns the first record.
    pub fn insert(&self, new: &NewRecord, now: DateTime<Utc>) -> anyhow::Result<InsertOutcome> {
        let fields_json = serde_json::to_string(&new.fields)?;
        let ts = timestamp(now);
        let form_id = new.form_id.to_string();

        for _ in 0..REFERENCE_ATTEMPTS {
            let reference = generate_reference(&new.reference_prefix, now);
            let changed = {
                let guard = self.conn.lock().unwrap_or_else(|e| e.into_inner());
                guard.execute(
                    "INSERT OR IGNORE INTO submissions
                        (reference, form_id, form_kind, user_id, language, fields_json,
                         submission_timestamp, status, remote_reference, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?7)",
                    params![
                        reference,
                        form_id,
                        new.kind.as_str(),
                        new.user_id,
                        new.language.as_str(),
                        fields_json,
                        ts,
                        new.status,
                        new.remote_reference,
                    ],
                )?
            };

            if changed == 1 {
                tracing::info!(form = %new.kind, %reference, "record stored");
                let record = self
                    .get(&reference)?
                    .with_context(|| format!("record {reference} vanished after insert"))?;
                return Ok(InsertOutcome::Inserted(record));
            }
            if let Some(existing) = self.get_by_form_id(&form_id)? {
                tracing::warn!(form = %new.kind, reference = %existing.reference, "duplicate finalize ignored");
                return Ok(InsertOutcome::Duplicate(existing));
            }
            tracing::debug!("reference collision on {reference}, retrying");
        }
        anyhow::bail!("could not allocate a unique reference after {REFERENCE_ATTEMPTS} attempts")
    }

    /// Look a record up by its local or remote reference.
    pub fn get(&self, reference: &str) -> anyhow::Result<Option<SubmissionRecord>> {
        let guard = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let row = guard
            .query_row(
                &format!(
                    "SELECT {} FROM submissions
                     WHERE reference = ?1 COLLATE NOCASE OR remote_reference = ?1 COLLATE NOCASE
                     LIMIT 1",
                    Self::COLUMNS
                ),
                params![reference.trim()],
                Self::row_to_record,
            )
            .optional()?;
        drop(guard);
        row.map(Self::decode).transpose()
    }

    fn get_by_form_id(&self, form_id: &str) -> anyhow::Result<Option<SubmissionRecord>> {
        let guard = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let row = guard
            .query_row(
                &format!("SELECT {} FROM submissions WHERE form_id = ?1", Self::COLUMNS),
                params![form_id],
                Self::row_to_record,
            )
            .optional()?;
        drop(guard);
        row.map(Self::decode).transpose()
    }

    /// Set the status of a record. Returns `false` when no record matches.
    pub fn update_status(&self, reference: &str, status: &str, now: DateTime<Utc>) -> anyhow::Result<bool> {
        let guard = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let changed = guard.execute(
            "UPDATE submissions SET status = ?2, updated_at = ?3
             WHERE reference = ?1 COLLATE NOCASE OR remote_reference = ?1 COLLATE NOCASE",
            params![reference.trim(), status, timestamp(now)],
        )?;
        if changed > 0 {
            tracing::info!(%reference, %status, "record status updated");
        }
        Ok(changed > 0)
    }

    /// Newest first. Returns (records, total matching).
    pub fn list(
        &self,
        kind: Option<FormKind>,
        limit: usize,
        offset: usize,
    ) -> anyhow::Result<(Vec<SubmissionRecord>, usize)> {
        let kind = kind.map(|k| k.as_str());
        let guard = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let total: usize = guard.query_row(
            "SELECT COUNT(*) FROM submissions WHERE ?1 IS NULL OR form_kind = ?1",
            params![kind],
            |row| row.get::<_, i64>(0).map(|v| v as usize),
        )?;

        let mut stmt = guard.prepare(&format!(
            "SELECT {} FROM submissions
             WHERE ?1 IS NULL OR form_kind = ?1
             ORDER BY submission_timestamp DESC, reference DESC
             LIMIT ?2 OFFSET ?3",
            Self::COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![kind, limit as i64, offset as i64], Self::row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        drop(stmt);
        drop(guard);

        let records = rows
            .into_iter()
            .map(Self::decode)
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok((records, total))
    }
}
