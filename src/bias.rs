//! Bias heuristics over the active signal set.
//!
//! Four independent checks run against the full signal set (not against
//! registry expectations; that is gap detection's job). Flags concatenate
//! in heuristic order with no deduplication. An empty signal set produces
//! no flags at all.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::scoring::ScoringConfig;
use crate::signals::{
    Signal, SignalMetadata, SIGNAL_EVIDENCE_PRESENT, SIGNAL_RFI_OPEN, SIGNAL_RFI_RESOLVED,
    SIGNAL_RFI_RESPONDED, SIGNAL_SUBMISSION_COMPLETENESS, SIGNAL_SUBMISSION_PRESENT,
};
use crate::types::Severity;

/// Strength share above which one source dominates outright.
const SINGLE_SOURCE_HIGH_SHARE: f64 = 0.85;
/// Strength share above which one source is merely over-weighted.
const SINGLE_SOURCE_MEDIUM_SHARE: f64 = 0.70;
/// Distinct source types expected of a healthy evidence base.
const MIN_DIVERSE_SOURCES: usize = 3;

/// Which heuristic raised a flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BiasType {
    SingleSourceReliance,
    LowDiversity,
    Contradiction,
    StaleSignals,
}

impl BiasType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BiasType::SingleSourceReliance => "single_source_reliance",
            BiasType::LowDiversity => "low_diversity",
            BiasType::Contradiction => "contradiction",
            BiasType::StaleSignals => "stale_signals",
        }
    }
}

/// One raised bias flag, persisted as part of the intelligence record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BiasFlag {
    pub flag_type: BiasType,
    pub severity: Severity,
    pub message: String,
    pub suggested_action: String,
    pub metadata: serde_json::Value,
}

/// Run all four heuristics and concatenate their flags.
pub fn detect_bias(signals: &[Signal], config: &ScoringConfig, now: DateTime<Utc>) -> Vec<BiasFlag> {
    if signals.is_empty() {
        return Vec::new();
    }

    let mut flags = Vec::new();

    // 1. Single-source reliance: share of total strength from one source type
    let total_strength: f64 = signals.iter().map(|s| s.strength).sum();
    if total_strength > 0.0 {
        let mut per_source: BTreeMap<&str, f64> = BTreeMap::new();
        for signal in signals {
            *per_source.entry(signal.source_type.as_str()).or_insert(0.0) += signal.strength;
        }
        let (dominant, dominant_strength) = per_source
            .iter()
            .fold(("", 0.0_f64), |best, (source, strength)| {
                if *strength > best.1 {
                    (source, *strength)
                } else {
                    best
                }
            });
        let share = dominant_strength / total_strength;
        let severity = if share > SINGLE_SOURCE_HIGH_SHARE {
            Some(Severity::High)
        } else if share > SINGLE_SOURCE_MEDIUM_SHARE {
            Some(Severity::Medium)
        } else {
            None
        };
        if let Some(severity) = severity {
            flags.push(BiasFlag {
                flag_type: BiasType::SingleSourceReliance,
                severity,
                message: format!(
                    "{:.0}% of signal strength comes from the '{}' source",
                    share * 100.0,
                    dominant
                ),
                suggested_action: "Corroborate with evidence from an independent source"
                    .to_string(),
                metadata: json!({ "sourceType": dominant, "share": share }),
            });
        }
    }

    // 2. Low diversity: fewer distinct source types than expected
    let distinct: BTreeSet<&str> = signals.iter().map(|s| s.source_type.as_str()).collect();
    if distinct.len() < MIN_DIVERSE_SOURCES {
        let severity = if distinct.len() <= 1 {
            Severity::Medium
        } else {
            Severity::Low
        };
        flags.push(BiasFlag {
            flag_type: BiasType::LowDiversity,
            severity,
            message: format!(
                "Signals come from {} distinct source(s); expected at least {}",
                distinct.len(),
                MIN_DIVERSE_SOURCES
            ),
            suggested_action: "Broaden the evidence base with additional sources".to_string(),
            metadata: json!({ "distinctSources": distinct.len() }),
        });
    }

    // 3. Contradictions: documented patterns, one medium flag per match
    flags.extend(detect_contradictions(signals));

    // 4. Stale evidence base: any signal past the freshness limit
    let max_age = Duration::hours(config.max_age_hours);
    let stale_count = signals
        .iter()
        .filter(|s| now.signed_duration_since(s.observed_at) > max_age)
        .count();
    if stale_count > 0 {
        flags.push(BiasFlag {
            flag_type: BiasType::StaleSignals,
            severity: Severity::Low,
            message: format!(
                "{} signal(s) are older than {}h",
                stale_count, config.max_age_hours
            ),
            suggested_action: "Refresh case data and recompute".to_string(),
            metadata: json!({ "staleCount": stale_count, "maxAgeHours": config.max_age_hours }),
        });
    }

    flags
}

fn detect_contradictions(signals: &[Signal]) -> Vec<BiasFlag> {
    let find = |t: &str| signals.iter().find(|s| s.signal_type == t);
    let mut flags = Vec::new();

    let contradiction = |message: String, action: &str, pattern: &str| BiasFlag {
        flag_type: BiasType::Contradiction,
        severity: Severity::Medium,
        message,
        suggested_action: action.to_string(),
        metadata: json!({ "pattern": pattern }),
    };

    // (a) Open and responded info requests with nothing resolved
    if find(SIGNAL_RFI_OPEN).is_some()
        && find(SIGNAL_RFI_RESPONDED).is_some()
        && find(SIGNAL_RFI_RESOLVED).is_none()
    {
        flags.push(contradiction(
            "Case has open and responded info requests but none resolved".to_string(),
            "Resolve or close the outstanding information requests",
            "unresolved_info_requests",
        ));
    }

    // (b) Completeness computed against a submission that reads absent
    if let (Some(present), Some(completeness)) = (
        find(SIGNAL_SUBMISSION_PRESENT),
        find(SIGNAL_SUBMISSION_COMPLETENESS),
    ) {
        if present.strength == 0.0 && completeness.strength > 0.0 {
            flags.push(contradiction(
                "Submission completeness is non-zero while the submission reads absent"
                    .to_string(),
                "Re-check the stored submission record",
                "submission_completeness_mismatch",
            ));
        }
    }

    // (c) Submission declares evidence that never showed up
    if let Some(present) = find(SIGNAL_SUBMISSION_PRESENT) {
        if let SignalMetadata::Submission {
            declared_evidence_count,
            ..
        } = &present.metadata
        {
            let evidence_missing = match find(SIGNAL_EVIDENCE_PRESENT) {
                None => true,
                Some(e) => e.strength == 0.0,
            };
            if *declared_evidence_count > 0 && evidence_missing {
                flags.push(contradiction(
                    format!(
                        "Submission declares {} evidence item(s) but none are attached",
                        declared_evidence_count
                    ),
                    "Attach the declared evidence or correct the declared count",
                    "missing_declared_evidence",
                ));
            }
        }
    }

    flags
}
