//! Audit trail for engine decisions.
//!
//! Every recompute appends a row to `audit_log` recording who asked, why,
//! and the headline numbers it produced, so a reviewer can reconstruct how
//! a case's intelligence evolved without replaying the pipeline.

use chrono::Utc;
use rusqlite::params;
use uuid::Uuid;

use crate::db::{CaseDb, DbError};

/// Event type for a completed recompute.
pub const EVENT_INTELLIGENCE_RECOMPUTED: &str = "intelligence_recomputed";

/// Recompute triggered by a platform event.
pub const REASON_EVENT: &str = "event";
/// Recompute requested explicitly by an actor.
pub const REASON_MANUAL: &str = "manual";
/// Recompute performed because a read found no stored record.
pub const REASON_LAZY_READ: &str = "lazy_read";

/// One audit row.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub id: String,
    pub case_id: String,
    pub event_type: String,
    pub actor: String,
    pub payload: serde_json::Value,
    pub created_at: String,
}

/// Append an audit row. Returns the new row's id.
pub fn emit_audit(
    db: &CaseDb,
    case_id: &str,
    event_type: &str,
    actor: &str,
    payload: &serde_json::Value,
) -> Result<String, DbError> {
    let id = format!("aud-{}", Uuid::new_v4());
    db.insert_audit_event(&id, case_id, event_type, actor, payload)?;
    Ok(id)
}

/// Most recent audit rows for a case, newest first.
pub fn recent_events(db: &CaseDb, case_id: &str, limit: usize) -> Result<Vec<AuditEvent>, DbError> {
    db.get_audit_events(case_id, limit)
}

impl CaseDb {
    pub fn insert_audit_event(
        &self,
        id: &str,
        case_id: &str,
        event_type: &str,
        actor: &str,
        payload: &serde_json::Value,
    ) -> Result<(), DbError> {
        let payload_json = serde_json::to_string(payload)
            .map_err(|e| DbError::MalformedRow(format!("audit payload: {}", e)))?;
        self.conn_ref().execute(
            "INSERT INTO audit_log (id, case_id, event_type, actor, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id,
                case_id,
                event_type,
                actor,
                payload_json,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_audit_events(
        &self,
        case_id: &str,
        limit: usize,
    ) -> Result<Vec<AuditEvent>, DbError> {
        let mut stmt = self.conn_ref().prepare(
            "SELECT id, case_id, event_type, actor, payload, created_at
             FROM audit_log
             WHERE case_id = ?1
             ORDER BY created_at DESC, id
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![case_id, limit as i64], |row| {
            let payload_raw: String = row.get(4)?;
            Ok(AuditEvent {
                id: row.get(0)?,
                case_id: row.get(1)?,
                event_type: row.get(2)?,
                actor: row.get(3)?,
                payload: serde_json::from_str(&payload_raw)
                    .unwrap_or(serde_json::Value::Null),
                created_at: row.get(5)?,
            })
        })?;
        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::test_db;
    use serde_json::json;

    #[test]
    fn test_emit_and_read_back() {
        let db = test_db();
        let payload = json!({
            "reason": REASON_MANUAL,
            "confidenceScore": 80.0,
            "confidenceBand": "high"
        });

        let id = emit_audit(
            &db,
            "case-1",
            EVENT_INTELLIGENCE_RECOMPUTED,
            "compliance-lead",
            &payload,
        )
        .expect("emit");
        assert!(id.starts_with("aud-"));

        let events = recent_events(&db, "case-1", 10).expect("read");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, id);
        assert_eq!(events[0].event_type, EVENT_INTELLIGENCE_RECOMPUTED);
        assert_eq!(events[0].actor, "compliance-lead");
        assert_eq!(events[0].payload["reason"], "manual");
        assert_eq!(events[0].payload["confidenceScore"], 80.0);
    }

    #[test]
    fn test_events_are_scoped_to_case() {
        let db = test_db();
        let payload = json!({ "reason": REASON_EVENT });
        emit_audit(&db, "case-1", EVENT_INTELLIGENCE_RECOMPUTED, "system", &payload)
            .expect("emit");
        emit_audit(&db, "case-2", EVENT_INTELLIGENCE_RECOMPUTED, "system", &payload)
            .expect("emit");

        assert_eq!(recent_events(&db, "case-1", 10).expect("read").len(), 1);
        assert_eq!(recent_events(&db, "case-2", 10).expect("read").len(), 1);
        assert!(recent_events(&db, "case-3", 10).expect("read").is_empty());
    }

    #[test]
    fn test_limit_caps_history() {
        let db = test_db();
        for i in 0..5 {
            let payload = json!({ "reason": REASON_EVENT, "sequence": i });
            emit_audit(&db, "case-1", EVENT_INTELLIGENCE_RECOMPUTED, "system", &payload)
                .expect("emit");
        }
        let events = recent_events(&db, "case-1", 3).expect("read");
        assert_eq!(events.len(), 3);
    }
}
