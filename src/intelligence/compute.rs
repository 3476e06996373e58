//! Decision intelligence computation (CI-42).
//!
//! Pure composition layer: snapshot in, assessment out. Generates signals
//! from case artifacts, runs gap and bias detection against the decision
//! registry, scores the result, and renders the template narrative. No
//! database access and no clock reads; `now` is always passed in, which is
//! what makes recomputes reproducible in tests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bias::{detect_bias, BiasFlag};
use crate::case_reader::CaseSnapshot;
use crate::gaps::{detect_gaps, gap_severity_score, Gap};
use crate::narrative::render_narrative;
use crate::registry::{expectations_for, SignalExpectation};
use crate::scoring::{score_case, ExplanationFactor, ScoreOutcome, ScoringConfig};
use crate::signals::generator::generate_signals;
use crate::signals::Signal;
use crate::types::ConfidenceBand;

/// The persisted intelligence record for one (case, decision type) pair.
///
/// `is_stale` is derived from `computed_at` on every read and never stored;
/// the row a reader gets five minutes apart can flip from fresh to stale
/// without any write happening in between.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionIntelligence {
    pub case_id: String,
    pub decision_type: String,
    pub computed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completeness_score: f64,
    pub confidence_score: f64,
    pub confidence_band: ConfidenceBand,
    pub gaps: Vec<Gap>,
    pub gap_severity_score: f64,
    pub bias_flags: Vec<BiasFlag>,
    pub narrative: String,
    pub explanation_factors: Vec<ExplanationFactor>,
    pub is_stale: bool,
    pub stale_after_minutes: i64,
}

/// Everything one pipeline run produced, before persistence.
#[derive(Debug, Clone)]
pub struct Assessment {
    pub case_id: String,
    pub decision_type: String,
    pub signals: Vec<Signal>,
    pub gaps: Vec<Gap>,
    pub bias_flags: Vec<BiasFlag>,
    pub outcome: ScoreOutcome,
    pub completeness_score: f64,
    pub narrative: String,
}

impl Assessment {
    /// Assemble the persistable record. A fresh record is never stale.
    pub fn into_record(self, now: DateTime<Utc>, stale_after_minutes: i64) -> DecisionIntelligence {
        DecisionIntelligence {
            case_id: self.case_id,
            decision_type: self.decision_type,
            computed_at: now,
            updated_at: now,
            completeness_score: self.completeness_score,
            confidence_score: self.outcome.final_score,
            confidence_band: self.outcome.band,
            gap_severity_score: gap_severity_score(&self.gaps),
            gaps: self.gaps,
            bias_flags: self.bias_flags,
            narrative: self.narrative,
            explanation_factors: self.outcome.explanation_factors,
            is_stale: false,
            stale_after_minutes,
        }
    }
}

/// Run the full assessment pipeline over a case snapshot.
pub fn assess_case(
    snapshot: &CaseSnapshot,
    decision_type: &str,
    config: &ScoringConfig,
    now: DateTime<Utc>,
) -> Assessment {
    let expectations = expectations_for(decision_type);

    // 1. Derive signals from the case artifacts
    let signals = generate_signals(snapshot, decision_type, now);

    // 2. Gaps: what the registry expected but did not get
    let gaps = detect_gaps(&signals, &expectations, config, now);

    // 3. Bias: structural weaknesses in what we did get
    let bias_flags = detect_bias(&signals, config, now);

    // 4. Score and explain
    let outcome = score_case(&signals, &gaps, &bias_flags, config);

    // 5. Completeness against the registry, then the template narrative
    let completeness_score = completeness_score(&signals, &expectations);
    let narrative = render_narrative(
        completeness_score,
        gaps.len(),
        bias_flags.len(),
        outcome.band,
        outcome.final_score,
    );

    Assessment {
        case_id: snapshot.case_id.clone(),
        decision_type: decision_type.to_string(),
        signals,
        gaps,
        bias_flags,
        outcome,
        completeness_score,
        narrative,
    }
}

/// How much of the registry's expected signal set is present, 0-100.
///
/// Each expected type earns full credit when present and complete, half
/// credit when present but incomplete. Signal strength deliberately does
/// not matter here; completeness answers "did the evidence arrive", not
/// "how good is it".
pub fn completeness_score(signals: &[Signal], expectations: &[SignalExpectation]) -> f64 {
    if expectations.is_empty() {
        return 100.0;
    }
    let credit: f64 = expectations
        .iter()
        .map(|exp| {
            match signals.iter().find(|s| s.signal_type == exp.signal_type) {
                Some(s) if s.complete => 1.0,
                Some(_) => 0.5,
                None => 0.0,
            }
        })
        .sum();
    100.0 * credit / expectations.len() as f64
}
