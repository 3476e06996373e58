//! Case artifact snapshots and the reader boundary.
//!
//! The scoring pipeline never touches submission or evidence tables directly;
//! it consumes an immutable `CaseSnapshot` produced by a `CaseReader`.
//! `SqliteCaseReader` is the production impl over the platform's case tables.
//! It opens its own read-only connection per call, so a recompute in flight
//! never contends with the engine's writer connection.

use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::db::CaseDb;
use crate::error::EngineError;
use crate::types::parse_timestamp;

// ---------------------------------------------------------------------------
// Snapshot types
// ---------------------------------------------------------------------------

/// Point-in-time view of every artifact the generator derives signals from.
#[derive(Debug, Clone, Default)]
pub struct CaseSnapshot {
    pub case_id: String,
    pub exists: bool,
    pub decision_type: String,
    pub status: String,
    pub submission: Option<SubmissionSnapshot>,
    pub evidence: Option<EvidenceSnapshot>,
    pub info_requests: Vec<InfoRequestSnapshot>,
    pub license: Option<LicenseSnapshot>,
    pub explainability: Option<ExplainabilitySnapshot>,
}

impl CaseSnapshot {
    /// Snapshot for a case that does not exist (deleted or never created).
    pub fn missing(case_id: &str) -> Self {
        Self {
            case_id: case_id.to_string(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubmissionSnapshot {
    /// None while the submission is still a draft.
    pub submitted_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub field_count: u32,
    pub complete_field_count: u32,
    pub declared_evidence_count: u32,
}

#[derive(Debug, Clone)]
pub struct EvidenceSnapshot {
    pub item_count: u32,
    pub latest_attached_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct InfoRequestSnapshot {
    pub id: String,
    pub status: String,
    pub opened_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl InfoRequestSnapshot {
    pub fn is_open(&self) -> bool {
        self.status == "open"
    }

    pub fn has_response(&self) -> bool {
        self.responded_at.is_some() || self.status == "responded" || self.is_resolved()
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some() || self.status == "resolved"
    }
}

#[derive(Debug, Clone)]
pub struct LicenseSnapshot {
    pub verified: bool,
    pub license_number: Option<String>,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ExplainabilitySnapshot {
    pub generated_at: DateTime<Utc>,
    pub model_version: Option<String>,
}

// ---------------------------------------------------------------------------
// Reader boundary
// ---------------------------------------------------------------------------

/// Read-side boundary between the engine and the case artifact store.
pub trait CaseReader: Send + Sync {
    /// Snapshot the case. A missing case returns `exists: false`, not an
    /// error; unreadable sub-artifacts degrade to absent parts.
    fn read_case_state(&self, case_id: &str) -> Result<CaseSnapshot, EngineError>;

    /// Cheap existence check, re-run just before persisting results.
    fn case_exists(&self, case_id: &str) -> bool;
}

/// Production reader over the platform's case tables.
pub struct SqliteCaseReader {
    db_path: PathBuf,
}

impl SqliteCaseReader {
    pub fn new(db_path: PathBuf) -> Self {
        Self { db_path }
    }

    /// Reader over the default database location.
    pub fn at_default_path() -> Result<Self, EngineError> {
        Ok(Self::new(CaseDb::db_path()?))
    }

    fn read_submission(db: &CaseDb, case_id: &str) -> Option<SubmissionSnapshot> {
        db.conn_ref()
            .query_row(
                "SELECT submitted_at, updated_at, field_count, complete_field_count,
                        declared_evidence_count
                 FROM case_submissions WHERE case_id = ?1",
                [case_id],
                |row| {
                    Ok(SubmissionSnapshot {
                        submitted_at: row
                            .get::<_, Option<String>>(0)?
                            .as_deref()
                            .and_then(parse_timestamp),
                        updated_at: parse_timestamp(&row.get::<_, String>(1)?)
                            .unwrap_or_else(Utc::now),
                        field_count: row.get(2)?,
                        complete_field_count: row.get(3)?,
                        declared_evidence_count: row.get(4)?,
                    })
                },
            )
            .ok()
    }

    fn read_evidence(db: &CaseDb, case_id: &str) -> Option<EvidenceSnapshot> {
        let (count, latest): (u32, Option<String>) = db
            .conn_ref()
            .query_row(
                "SELECT COUNT(*), MAX(attached_at) FROM case_evidence WHERE case_id = ?1",
                [case_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap_or((0, None));
        if count == 0 {
            return None;
        }
        Some(EvidenceSnapshot {
            item_count: count,
            latest_attached_at: latest.as_deref().and_then(parse_timestamp),
        })
    }

    fn read_info_requests(db: &CaseDb, case_id: &str) -> Vec<InfoRequestSnapshot> {
        let result = db.conn_ref().prepare(
            "SELECT id, status, opened_at, responded_at, resolved_at
             FROM case_info_requests WHERE case_id = ?1 ORDER BY opened_at",
        );
        let mut stmt = match result {
            Ok(stmt) => stmt,
            Err(e) => {
                log::warn!("CaseReader: info request query failed for {}: {}", case_id, e);
                return Vec::new();
            }
        };
        let rows = stmt.query_map([case_id], |row| {
            Ok(InfoRequestSnapshot {
                id: row.get(0)?,
                status: row.get(1)?,
                opened_at: parse_timestamp(&row.get::<_, String>(2)?).unwrap_or_else(Utc::now),
                responded_at: row
                    .get::<_, Option<String>>(3)?
                    .as_deref()
                    .and_then(parse_timestamp),
                resolved_at: row
                    .get::<_, Option<String>>(4)?
                    .as_deref()
                    .and_then(parse_timestamp),
            })
        });
        match rows {
            Ok(mapped) => mapped.filter_map(|r| r.ok()).collect(),
            Err(e) => {
                log::warn!("CaseReader: info request rows failed for {}: {}", case_id, e);
                Vec::new()
            }
        }
    }

    fn read_license(db: &CaseDb, case_id: &str) -> Option<LicenseSnapshot> {
        db.conn_ref()
            .query_row(
                "SELECT verified, license_number, checked_at
                 FROM case_license_checks WHERE case_id = ?1
                 ORDER BY checked_at DESC LIMIT 1",
                [case_id],
                |row| {
                    Ok(LicenseSnapshot {
                        verified: row.get::<_, i64>(0)? != 0,
                        license_number: row.get(1)?,
                        checked_at: parse_timestamp(&row.get::<_, String>(2)?)
                            .unwrap_or_else(Utc::now),
                    })
                },
            )
            .ok()
    }
}

impl CaseReader for SqliteCaseReader {
    fn read_case_state(&self, case_id: &str) -> Result<CaseSnapshot, EngineError> {
        let db = CaseDb::open_readonly_at(&self.db_path)?;

        let case_row: Option<(String, String, Option<String>, Option<String>)> = db
            .conn_ref()
            .query_row(
                "SELECT decision_type, status, explainability_generated_at, explainability_model
                 FROM cases WHERE id = ?1",
                [case_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(crate::db::DbError::from(other)),
            })?;

        let Some((decision_type, status, explainability_at, explainability_model)) = case_row
        else {
            return Ok(CaseSnapshot::missing(case_id));
        };

        let explainability = explainability_at
            .as_deref()
            .and_then(parse_timestamp)
            .map(|generated_at| ExplainabilitySnapshot {
                generated_at,
                model_version: explainability_model,
            });

        Ok(CaseSnapshot {
            case_id: case_id.to_string(),
            exists: true,
            decision_type,
            status,
            submission: Self::read_submission(&db, case_id),
            evidence: Self::read_evidence(&db, case_id),
            info_requests: Self::read_info_requests(&db, case_id),
            license: Self::read_license(&db, case_id),
            explainability,
        })
    }

    fn case_exists(&self, case_id: &str) -> bool {
        let Ok(db) = CaseDb::open_readonly_at(&self.db_path) else {
            return false;
        };
        db.conn_ref()
            .prepare("SELECT 1 FROM cases WHERE id = ?1")
            .and_then(|mut stmt| stmt.exists([case_id]))
            .unwrap_or(false)
    }
}

// =============================================================================
// Shared test utilities
// =============================================================================

#[cfg(test)]
pub mod test_utils {
    use super::*;
    use dashmap::DashMap;

    /// In-memory reader for engine tests. Snapshots are inserted directly and
    /// can be removed mid-test to simulate case deletion.
    #[derive(Default)]
    pub struct FixtureReader {
        snapshots: DashMap<String, CaseSnapshot>,
    }

    impl FixtureReader {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn insert(&self, snapshot: CaseSnapshot) {
            self.snapshots.insert(snapshot.case_id.clone(), snapshot);
        }

        pub fn remove(&self, case_id: &str) {
            self.snapshots.remove(case_id);
        }
    }

    impl CaseReader for FixtureReader {
        fn read_case_state(&self, case_id: &str) -> Result<CaseSnapshot, EngineError> {
            Ok(self
                .snapshots
                .get(case_id)
                .map(|s| s.clone())
                .unwrap_or_else(|| CaseSnapshot::missing(case_id)))
        }

        fn case_exists(&self, case_id: &str) -> bool {
            self.snapshots.contains_key(case_id)
        }
    }

    /// A fully-evidenced controlled-substance case: submitted, every field
    /// complete, all declared evidence attached.
    pub fn full_csf_snapshot(case_id: &str, now: DateTime<Utc>) -> CaseSnapshot {
        CaseSnapshot {
            case_id: case_id.to_string(),
            exists: true,
            decision_type: "csf".to_string(),
            status: "submitted".to_string(),
            submission: Some(SubmissionSnapshot {
                submitted_at: Some(now),
                updated_at: now,
                field_count: 8,
                complete_field_count: 8,
                declared_evidence_count: 3,
            }),
            evidence: Some(EvidenceSnapshot {
                item_count: 3,
                latest_attached_at: Some(now),
            }),
            info_requests: Vec::new(),
            license: None,
            explainability: None,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
