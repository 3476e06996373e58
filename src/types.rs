use std::collections::HashMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::scoring::ScoringConfig;

/// Actor name used for engine-initiated work (auto triggers, lazy reads).
pub const SYSTEM_ACTOR: &str = "system";

/// Configuration stored in ~/.caseintel/config.json
///
/// Every field carries a serde default so a partial (or empty) config file
/// deserializes cleanly and new fields never break existing installs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub features: HashMap<String, bool>,
    /// Actors allowed to bypass the recompute debounce window.
    /// "system" is always allowed and does not need to be listed.
    #[serde(default = "default_privileged_actors")]
    pub privileged_actors: Vec<String>,
    /// Minutes after which a persisted intelligence row reads as stale.
    #[serde(default = "default_stale_after_minutes")]
    pub stale_after_minutes: i64,
    /// Upper bound on LLM narrative enrichment, in milliseconds.
    #[serde(default = "default_narrative_timeout_ms")]
    pub narrative_timeout_ms: u64,
    /// Scoring tables (signal weights, penalties, staleness horizon).
    /// Versioned so tuning changes are auditable without code changes.
    #[serde(default)]
    pub scoring: ScoringConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            features: HashMap::new(),
            privileged_actors: default_privileged_actors(),
            stale_after_minutes: default_stale_after_minutes(),
            narrative_timeout_ms: default_narrative_timeout_ms(),
            scoring: ScoringConfig::default(),
        }
    }
}

fn default_privileged_actors() -> Vec<String> {
    vec!["compliance-lead".to_string()]
}

fn default_stale_after_minutes() -> i64 {
    30
}

fn default_narrative_timeout_ms() -> u64 {
    1500
}

/// Default feature flags.
///
/// All features default ON; the config file turns them off explicitly.
pub fn default_features() -> HashMap<String, bool> {
    let mut features = HashMap::new();
    features.insert("autoRecompute".to_string(), true);
    features.insert("narrativeEnrichment".to_string(), true);
    features
}

/// Check if a feature is enabled, falling through to defaults.
///
/// Priority: explicit config value > default > true (safe fallback).
pub fn is_feature_enabled(config: &Config, feature: &str) -> bool {
    // Explicit override in config.features takes priority
    if let Some(&enabled) = config.features.get(feature) {
        return enabled;
    }
    let defaults = default_features();
    defaults.get(feature).copied().unwrap_or(true)
}

/// Check whether an actor may bypass the recompute debounce window.
///
/// The engine itself ("system") is always allowed; human actors must appear
/// in `privilegedActors` in the config file.
pub fn can_force_recompute(config: &Config, actor: &str) -> bool {
    actor == SYSTEM_ACTOR || config.privileged_actors.iter().any(|a| a == actor)
}

// =============================================================================
// Shared enums
// =============================================================================

/// Severity grading shared by gaps and bias flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    High,
    Medium,
    Low,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Confidence band, always derived from the score by fixed thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceBand {
    High,
    Medium,
    Low,
}

impl ConfidenceBand {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceBand::High => "high",
            ConfidenceBand::Medium => "medium",
            ConfidenceBand::Low => "low",
        }
    }

    /// Parse a stored band value. Unknown values degrade to Low rather than
    /// failing the whole read; the row will be rewritten on next recompute.
    pub fn parse_lossy(s: &str) -> Self {
        match s {
            "high" => ConfidenceBand::High,
            "medium" => ConfidenceBand::Medium,
            _ => ConfidenceBand::Low,
        }
    }
}

impl std::fmt::Display for ConfidenceBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Case lifecycle events delivered to the engine by the intake platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseEvent {
    SubmissionCreated,
    SubmissionUpdated,
    EvidenceAttached,
    RequestInfoCreated,
    RequestInfoResubmitted,
    StatusChanged,
    NoteAdded,
    Assigned,
    CaseCreated,
}

impl CaseEvent {
    /// Whether this event triggers an automatic recompute.
    ///
    /// Notes, assignment, and bare case creation are deliberate no-ops: they
    /// carry no evidence, and a just-created case has nothing to score yet.
    pub fn triggers_recompute(&self) -> bool {
        matches!(
            self,
            CaseEvent::SubmissionCreated
                | CaseEvent::SubmissionUpdated
                | CaseEvent::EvidenceAttached
                | CaseEvent::RequestInfoCreated
                | CaseEvent::RequestInfoResubmitted
                | CaseEvent::StatusChanged
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CaseEvent::SubmissionCreated => "submission_created",
            CaseEvent::SubmissionUpdated => "submission_updated",
            CaseEvent::EvidenceAttached => "evidence_attached",
            CaseEvent::RequestInfoCreated => "request_info_created",
            CaseEvent::RequestInfoResubmitted => "request_info_resubmitted",
            CaseEvent::StatusChanged => "status_changed",
            CaseEvent::NoteAdded => "note_added",
            CaseEvent::Assigned => "assigned",
            CaseEvent::CaseCreated => "case_created",
        }
    }
}

impl std::fmt::Display for CaseEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Timestamp parsing
// =============================================================================

/// Parse a stored timestamp, tolerating both RFC 3339 and the bare
/// `datetime('now')` format SQLite emits.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}
