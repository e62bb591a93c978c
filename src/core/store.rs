use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::core::error::TriageError;
use crate::core::report::{NewAttempt, Report, ReportRecord, ReportStatus, ValidationAttempt};
use crate::core::time::now_utc;

/// Aggregate counts over all reports. `acceptance_rate` is a percentage in
/// [0, 100] and is 0 when no reports exist.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StoreStats {
    pub total: u64,
    pub new: u64,
    pub rejected: u64,
    pub accepted: u64,
    pub forwarded_to_admin: u64,
    pub acceptance_rate: f64,
}

/// Per-report document store over SQLite. The full document lives in
/// `doc_json`; `status`, `attempts`, and `created_at` are mirrored into
/// columns for indexing and the conditional attempt append. The mirror is
/// rewritten from the document on every write, so the two can't drift.
pub struct ReportStore {
    conn: Mutex<Connection>,
}

impl ReportStore {
    pub fn new(path: &Path) -> Result<Self, TriageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, TriageError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, TriageError> {
        self.conn
            .lock()
            .map_err(|_| TriageError::Store("connection lock poisoned".into()))
    }

    fn init_schema(&self) -> Result<(), TriageError> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS reports (
              id TEXT PRIMARY KEY,
              status TEXT NOT NULL,
              attempts INTEGER NOT NULL,
              created_at TEXT NOT NULL,
              updated_at TEXT NOT NULL,
              doc_json TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_reports_status ON reports(status);

            CREATE TABLE IF NOT EXISTS escalations (
              report_id TEXT PRIMARY KEY,
              forwarded_at TEXT NOT NULL,
              source TEXT NOT NULL,
              doc_json TEXT NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<ReportRecord>, TriageError> {
        let conn = self.lock()?;
        fetch_record(&conn, id)
    }

    /// Create the document for a first submission. On a resubmission the
    /// caller-editable fields are refreshed (a rejected report comes back
    /// with an amended description); status, attempt count, and history are
    /// untouched. Terminal records are returned as-is.
    pub fn upsert_submission(&self, report: &Report) -> Result<ReportRecord, TriageError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        if let Some(mut existing) = fetch_record(&tx, &report.id)? {
            if !existing.status.is_terminal() {
                existing.incident_type = report.incident_type;
                existing.description = report.description.clone();
                existing.location = report.location;
                existing.timestamp = report.timestamp;
                existing.image_url = report.image_url.clone();
                existing.updated_at = now_utc();
                write_record(&tx, &existing, false)?;
            }
            tx.commit()?;
            return Ok(existing);
        }
        let record = ReportRecord::from_submission(report, now_utc());
        write_record(&tx, &record, true)?;
        tx.commit()?;
        Ok(record)
    }

    /// Write a document patch. With `merge` the patch is deep-merged into
    /// the existing document (absent keys survive) and a missing document is
    /// `NotFound`; without it the patch replaces the document wholesale and
    /// may create.
    pub fn save(&self, id: &str, patch: &serde_json::Value, merge: bool) -> Result<(), TriageError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let existing: Option<serde_json::Value> = tx
            .query_row(
                "SELECT doc_json FROM reports WHERE id = ?1",
                params![id],
                |row| row.get::<_, String>(0),
            )
            .optional()?
            .map(|json| serde_json::from_str(&json))
            .transpose()?;

        let doc = match (existing, merge) {
            (Some(mut base), true) => {
                merge_json(&mut base, patch);
                base
            }
            // A merge needs a base document; only a full replace may create.
            (None, true) => return Err(TriageError::NotFound(id.to_string())),
            (_, false) => patch.clone(),
        };

        let mut record: ReportRecord = serde_json::from_value(doc)
            .map_err(|e| TriageError::Store(format!("patch produced an invalid document: {e}")))?;
        record.updated_at = now_utc();
        write_record(&tx, &record, false)?;
        tx.commit()?;
        Ok(())
    }

    /// Merge a patch into an existing document. Missing report is an error.
    pub fn update(&self, id: &str, patch: &serde_json::Value) -> Result<(), TriageError> {
        self.save(id, patch, true)
    }

    pub fn attempts(&self, id: &str) -> Result<Vec<ValidationAttempt>, TriageError> {
        Ok(self
            .get(id)?
            .map(|record| record.validation_history)
            .unwrap_or_default())
    }

    /// The only path that grows `validation_history`. The attempt number is
    /// derived as `len + 1` at write time; history, `last_validation_attempt`,
    /// the `attempts` counter, and the caller's verdict patch (status and the
    /// latest score fields) all land in one transaction, so a fault can never
    /// record an attempt without its verdict or vice versa. The append is
    /// conditional on `expected_attempts` matching the stored count, so two
    /// racing validation calls cannot double-book an attempt slot.
    pub fn append_attempt(
        &self,
        id: &str,
        expected_attempts: u32,
        input: &NewAttempt,
        patch: &serde_json::Value,
    ) -> Result<ValidationAttempt, TriageError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut record =
            fetch_record(&tx, id)?.ok_or_else(|| TriageError::NotFound(id.to_string()))?;

        let current = record.validation_history.len() as u32;
        if current != expected_attempts || record.attempts != current {
            return Err(TriageError::Conflict(id.to_string()));
        }

        let attempt = ValidationAttempt {
            attempt_number: current + 1,
            score: input.score,
            reason: input.reason.clone(),
            confidence: input.confidence.clamp(0.0, 1.0),
            suggestions: input.suggestions.clone(),
            timestamp: now_utc(),
        };
        record.validation_history.push(attempt.clone());
        record.last_validation_attempt = Some(attempt.clone());
        record.attempts = record.validation_history.len() as u32;
        record.updated_at = attempt.timestamp;

        let mut doc = serde_json::to_value(&record)?;
        merge_json(&mut doc, patch);
        let record: ReportRecord = serde_json::from_value(doc)
            .map_err(|e| TriageError::Store(format!("patch produced an invalid document: {e}")))?;

        write_record(&tx, &record, false)?;
        tx.commit()?;
        Ok(attempt)
    }

    /// Copy the report into the human-review queue, then mark the original
    /// `forwarded_to_admin`. A missing source report is an error, not a
    /// no-op.
    pub fn escalate(&self, id: &str) -> Result<(), TriageError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut record =
            fetch_record(&tx, id)?.ok_or_else(|| TriageError::NotFound(id.to_string()))?;

        record.status = ReportStatus::ForwardedToAdmin;
        record.updated_at = now_utc();

        let doc_json = serde_json::to_string(&record)?;
        tx.execute(
            "INSERT OR REPLACE INTO escalations (report_id, forwarded_at, source, doc_json)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                record.id,
                record.updated_at.to_rfc3339(),
                "auto_validation",
                doc_json
            ],
        )?;
        write_record(&tx, &record, false)?;
        tx.commit()?;
        Ok(())
    }

    /// Read the copied document from the human-review queue, if the report
    /// has been escalated.
    pub fn escalation(&self, id: &str) -> Result<Option<ReportRecord>, TriageError> {
        let conn = self.lock()?;
        let json: Option<String> = conn
            .query_row(
                "SELECT doc_json FROM escalations WHERE report_id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub fn stats(&self) -> Result<StoreStats, TriageError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM reports GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?))
        })?;

        let mut stats = StoreStats {
            total: 0,
            new: 0,
            rejected: 0,
            accepted: 0,
            forwarded_to_admin: 0,
            acceptance_rate: 0.0,
        };
        for row in rows {
            let (status, count) = row?;
            stats.total += count;
            match ReportStatus::parse(&status) {
                Some(ReportStatus::New) => stats.new += count,
                Some(ReportStatus::Rejected) => stats.rejected += count,
                Some(ReportStatus::Accepted) => stats.accepted += count,
                Some(ReportStatus::ForwardedToAdmin) => stats.forwarded_to_admin += count,
                None => {}
            }
        }
        if stats.total > 0 {
            stats.acceptance_rate = stats.accepted as f64 / stats.total as f64 * 100.0;
        }
        Ok(stats)
    }

    /// Delete settled reports older than the cutoff. Only `accepted` and
    /// `rejected` qualify; in-flight and escalated reports are never purged
    /// by this path.
    pub fn purge_older_than(&self, days: u32) -> Result<usize, TriageError> {
        if days == 0 {
            return Ok(0);
        }
        let cutoff = now_utc() - chrono::Duration::days(days as i64);
        let conn = self.lock()?;
        let deleted = conn.execute(
            "DELETE FROM reports
             WHERE status IN ('accepted', 'rejected') AND created_at < ?1",
            params![cutoff.to_rfc3339()],
        )?;
        Ok(deleted)
    }
}

fn fetch_record(conn: &Connection, id: &str) -> Result<Option<ReportRecord>, TriageError> {
    let json: Option<String> = conn
        .query_row(
            "SELECT doc_json FROM reports WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()?;
    match json {
        Some(json) => Ok(Some(serde_json::from_str(&json)?)),
        None => Ok(None),
    }
}

fn write_record(conn: &Connection, record: &ReportRecord, create: bool) -> Result<(), TriageError> {
    let doc_json = serde_json::to_string(record)?;
    let sql = if create {
        "INSERT INTO reports (id, status, attempts, created_at, updated_at, doc_json)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
    } else {
        "INSERT OR REPLACE INTO reports (id, status, attempts, created_at, updated_at, doc_json)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
    };
    conn.execute(
        sql,
        params![
            record.id,
            record.status.as_str(),
            record.attempts as i64,
            record.created_at.to_rfc3339(),
            record.updated_at.to_rfc3339(),
            doc_json
        ],
    )?;
    Ok(())
}

/// RFC 7396-style deep merge: object keys recurse, everything else
/// (including null) overwrites.
fn merge_json(base: &mut serde_json::Value, patch: &serde_json::Value) {
    match (base, patch) {
        (serde_json::Value::Object(base_map), serde_json::Value::Object(patch_map)) => {
            for (key, value) in patch_map {
                merge_json(
                    base_map.entry(key.clone()).or_insert(serde_json::Value::Null),
                    value,
                );
            }
        }
        (base, patch) => *base = patch.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_json_keeps_unpatched_keys() {
        let mut base = serde_json::json!({"a": 1, "nested": {"x": 1, "y": 2}});
        let patch = serde_json::json!({"nested": {"y": 3}, "b": true});
        merge_json(&mut base, &patch);
        assert_eq!(
            base,
            serde_json::json!({"a": 1, "b": true, "nested": {"x": 1, "y": 3}})
        );
    }
}
