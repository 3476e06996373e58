//! Intelligence record persistence.
//!
//! One row per (case_id, decision_type), overwritten whole on each
//! recompute. Staleness is derived from `computed_at` at read time, so the
//! same row can read fresh now and stale five minutes later without a
//! write in between.

use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::db::{CaseDb, DbError};
use crate::intelligence::compute::DecisionIntelligence;
use crate::types::{parse_timestamp, ConfidenceBand};

/// Insert or overwrite the record for the case and decision type.
pub fn upsert_intelligence(db: &CaseDb, record: &DecisionIntelligence) -> Result<(), DbError> {
    db.upsert_intelligence_row(record)
}

/// Read the record, deriving `is_stale` against the caller's clock.
pub fn get_intelligence_row(
    db: &CaseDb,
    case_id: &str,
    decision_type: &str,
    now: DateTime<Utc>,
) -> Result<Option<DecisionIntelligence>, DbError> {
    db.get_intelligence_record(case_id, decision_type, now)
}

/// Replace only the narrative, refreshing `updated_at`. The enrichment path
/// uses this after the record has already been persisted; scores and
/// `computed_at` stay untouched. Matching on `computed_at` keeps a slow
/// enrichment from landing its text on a newer record persisted meanwhile;
/// `false` means the row is gone or no longer the one that was enriched.
pub fn update_narrative(
    db: &CaseDb,
    record: &DecisionIntelligence,
    narrative: &str,
) -> Result<bool, DbError> {
    let changed = db.conn_ref().execute(
        "UPDATE decision_intelligence SET narrative = ?1, updated_at = ?2
         WHERE case_id = ?3 AND decision_type = ?4 AND computed_at = ?5",
        params![
            narrative,
            Utc::now().to_rfc3339(),
            record.case_id,
            record.decision_type,
            record.computed_at.to_rfc3339(),
        ],
    )?;
    Ok(changed > 0)
}

impl CaseDb {
    pub fn upsert_intelligence_row(&self, record: &DecisionIntelligence) -> Result<(), DbError> {
        let gaps_json = to_json("gaps", &record.gaps)?;
        let flags_json = to_json("bias_flags", &record.bias_flags)?;
        let factors_json = to_json("explanation_factors", &record.explanation_factors)?;

        self.conn_ref().execute(
            "INSERT INTO decision_intelligence (
                case_id, decision_type, computed_at, updated_at,
                completeness_score, confidence_score, confidence_band,
                gaps, gap_severity_score, bias_flags, narrative,
                explanation_factors, stale_after_minutes
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            ON CONFLICT(case_id, decision_type) DO UPDATE SET
                computed_at = excluded.computed_at,
                updated_at = excluded.updated_at,
                completeness_score = excluded.completeness_score,
                confidence_score = excluded.confidence_score,
                confidence_band = excluded.confidence_band,
                gaps = excluded.gaps,
                gap_severity_score = excluded.gap_severity_score,
                bias_flags = excluded.bias_flags,
                narrative = excluded.narrative,
                explanation_factors = excluded.explanation_factors,
                stale_after_minutes = excluded.stale_after_minutes",
            params![
                record.case_id,
                record.decision_type,
                record.computed_at.to_rfc3339(),
                record.updated_at.to_rfc3339(),
                record.completeness_score,
                record.confidence_score,
                record.confidence_band.as_str(),
                gaps_json,
                record.gap_severity_score,
                flags_json,
                record.narrative,
                factors_json,
                record.stale_after_minutes,
            ],
        )?;
        Ok(())
    }

    pub fn get_intelligence_record(
        &self,
        case_id: &str,
        decision_type: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<DecisionIntelligence>, DbError> {
        let mut stmt = self.conn_ref().prepare(
            "SELECT case_id, decision_type, computed_at, updated_at,
                    completeness_score, confidence_score, confidence_band,
                    gaps, gap_severity_score, bias_flags, narrative,
                    explanation_factors, stale_after_minutes
             FROM decision_intelligence
             WHERE case_id = ?1 AND decision_type = ?2",
        )?;

        let result = stmt.query_row(params![case_id, decision_type], |row| {
            let computed_at_raw: String = row.get(2)?;
            let updated_at_raw: String = row.get(3)?;
            let band_raw: String = row.get(6)?;
            let gaps_raw: String = row.get(7)?;
            let flags_raw: String = row.get(9)?;
            let factors_raw: String = row.get(11)?;
            let stale_after_minutes: i64 = row.get(12)?;

            // An unparseable computed_at reads as stale rather than erroring:
            // the cure is a recompute, not a failed read
            let computed_at = parse_timestamp(&computed_at_raw);
            let is_stale = match computed_at {
                Some(at) => (now - at).num_minutes() > stale_after_minutes,
                None => true,
            };

            Ok(DecisionIntelligence {
                case_id: row.get(0)?,
                decision_type: row.get(1)?,
                computed_at: computed_at.unwrap_or(now),
                updated_at: parse_timestamp(&updated_at_raw).unwrap_or(now),
                completeness_score: row.get(4)?,
                confidence_score: row.get(5)?,
                confidence_band: ConfidenceBand::parse_lossy(&band_raw),
                gaps: from_json("gaps", &gaps_raw),
                gap_severity_score: row.get(8)?,
                bias_flags: from_json("bias_flags", &flags_raw),
                narrative: row.get(10)?,
                explanation_factors: from_json("explanation_factors", &factors_raw),
                is_stale,
                stale_after_minutes,
            })
        });

        match result {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

fn to_json<T: serde::Serialize>(column: &str, value: &T) -> Result<String, DbError> {
    serde_json::to_string(value)
        .map_err(|e| DbError::MalformedRow(format!("{} column: {}", column, e)))
}

/// Lenient JSON column parse. A corrupted column degrades to empty rather
/// than making the record unreadable; the next recompute rewrites it.
fn from_json<T: serde::de::DeserializeOwned + Default>(column: &str, raw: &str) -> T {
    match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(e) => {
            log::warn!("Intelligence: dropping malformed {} column: {}", column, e);
            T::default()
        }
    }
}
