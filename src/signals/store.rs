//! Signal persistence: replace-per-case generations with audit history.
//!
//! A recompute replaces the whole active set for (case_id, decision_type) in
//! one transaction: previous rows are stamped with the new generation id via
//! `superseded_by`, fresh rows insert under the new generation. Scoring only
//! ever reads `superseded_by IS NULL`; older generations exist for audit.

use chrono::Utc;
use rusqlite::params;
use uuid::Uuid;

use crate::db::{CaseDb, DbError};
use crate::signals::{Signal, SignalMetadata};
use crate::types::parse_timestamp;

/// A stored signal row, including its generation bookkeeping.
#[derive(Debug, Clone)]
pub struct StoredSignal {
    pub signal: Signal,
    pub generation: String,
    pub superseded_by: Option<String>,
    pub created_at: String,
}

/// Mint a generation id.
fn new_generation_id() -> String {
    format!("gen-{}", Uuid::new_v4())
}

/// Replace the active signal set for a case. Returns the new generation id.
///
/// Runs as a single transaction so a reader never observes a half-replaced
/// set: either the old generation is still active or the new one is.
pub fn replace_signals(
    db: &CaseDb,
    case_id: &str,
    decision_type: &str,
    signals: &[Signal],
) -> Result<String, DbError> {
    let generation = new_generation_id();
    let written_at = Utc::now().to_rfc3339();

    db.with_transaction(|tx| {
        tx.supersede_active_signals(case_id, decision_type, &generation)?;
        for signal in signals {
            tx.insert_signal(signal, &generation, &written_at)?;
        }
        Ok(())
    })?;

    log::debug!(
        "SignalStore: wrote {} signal(s) for {}/{} as generation {}",
        signals.len(),
        case_id,
        decision_type,
        generation
    );
    Ok(generation)
}

/// Active (non-superseded) signals for a case, ordered by signal type.
pub fn get_active_signals(
    db: &CaseDb,
    case_id: &str,
    decision_type: &str,
) -> Result<Vec<Signal>, DbError> {
    db.get_active_signal_rows(case_id, decision_type)
}

/// Full stored history for a case, newest rows first. Audit-only; nothing in
/// the scoring path reads superseded generations.
pub fn signal_history(
    db: &CaseDb,
    case_id: &str,
    decision_type: &str,
    limit: usize,
) -> Result<Vec<StoredSignal>, DbError> {
    db.get_signal_history(case_id, decision_type, limit)
}

// ---------------------------------------------------------------------------
// CaseDb methods
// ---------------------------------------------------------------------------

impl CaseDb {
    /// Stamp the currently-active rows as superseded by `new_generation`.
    pub fn supersede_active_signals(
        &self,
        case_id: &str,
        decision_type: &str,
        new_generation: &str,
    ) -> Result<usize, DbError> {
        let stamped = self.conn_ref().execute(
            "UPDATE case_signals SET superseded_by = ?1
             WHERE case_id = ?2 AND decision_type = ?3 AND superseded_by IS NULL",
            params![new_generation, case_id, decision_type],
        )?;
        Ok(stamped)
    }

    /// Insert one signal row under a generation.
    pub fn insert_signal(
        &self,
        signal: &Signal,
        generation: &str,
        created_at: &str,
    ) -> Result<(), DbError> {
        let metadata_json = match &signal.metadata {
            SignalMetadata::None => None,
            other => Some(
                serde_json::to_string(other)
                    .map_err(|e| DbError::MalformedRow(format!("signal metadata: {}", e)))?,
            ),
        };
        self.conn_ref().execute(
            "INSERT INTO case_signals
                (id, case_id, decision_type, signal_type, source_type, observed_at,
                 strength, complete, metadata, generation, superseded_by, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, NULL, ?11)",
            params![
                signal.id,
                signal.case_id,
                signal.decision_type,
                signal.signal_type,
                signal.source_type,
                signal.observed_at.to_rfc3339(),
                signal.strength,
                signal.complete as i64,
                metadata_json,
                generation,
                created_at,
            ],
        )?;
        Ok(())
    }

    /// Query the active signal set, ordered by signal type for stable reads.
    pub fn get_active_signal_rows(
        &self,
        case_id: &str,
        decision_type: &str,
    ) -> Result<Vec<Signal>, DbError> {
        let mut stmt = self.conn_ref().prepare(
            "SELECT id, case_id, decision_type, signal_type, source_type, observed_at,
                    strength, complete, metadata
             FROM case_signals
             WHERE case_id = ?1 AND decision_type = ?2 AND superseded_by IS NULL
             ORDER BY signal_type",
        )?;
        let rows = stmt.query_map(params![case_id, decision_type], signal_from_row)?;
        let mut signals = Vec::new();
        for row in rows {
            signals.push(row?);
        }
        Ok(signals)
    }

    /// Query stored rows including superseded generations, newest first.
    pub fn get_signal_history(
        &self,
        case_id: &str,
        decision_type: &str,
        limit: usize,
    ) -> Result<Vec<StoredSignal>, DbError> {
        let mut stmt = self.conn_ref().prepare(
            "SELECT id, case_id, decision_type, signal_type, source_type, observed_at,
                    strength, complete, metadata, generation, superseded_by, created_at
             FROM case_signals
             WHERE case_id = ?1 AND decision_type = ?2
             ORDER BY created_at DESC, signal_type
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![case_id, decision_type, limit as i64], |row| {
            Ok(StoredSignal {
                signal: signal_from_row(row)?,
                generation: row.get(9)?,
                superseded_by: row.get(10)?,
                created_at: row.get(11)?,
            })
        })?;
        let mut history = Vec::new();
        for row in rows {
            history.push(row?);
        }
        Ok(history)
    }
}

fn signal_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Signal> {
    let observed_at_raw: String = row.get(5)?;
    let metadata: SignalMetadata = row
        .get::<_, Option<String>>(8)?
        .as_deref()
        .and_then(|json| serde_json::from_str(json).ok())
        .unwrap_or_default();
    Ok(Signal {
        id: row.get(0)?,
        case_id: row.get(1)?,
        decision_type: row.get(2)?,
        signal_type: row.get(3)?,
        source_type: row.get(4)?,
        observed_at: parse_timestamp(&observed_at_raw).unwrap_or_else(Utc::now),
        strength: row.get(6)?,
        complete: row.get::<_, i64>(7)? != 0,
        metadata,
    })
}
