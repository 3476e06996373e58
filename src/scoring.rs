//! Confidence scoring: weighted signal evidence minus gap and bias
//! penalties, with a full explanation trail.
//!
//! All tunable tables live in [`ScoringConfig`] and serialize into the
//! external config file, so weight changes are auditable without code
//! changes. Band thresholds are deliberately NOT configurable: a band must
//! mean the same thing across every deployment reading the same data.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::bias::BiasFlag;
use crate::gaps::{Gap, GapType};
use crate::signals::Signal;
use crate::types::{ConfidenceBand, Severity};

/// Floor of the high confidence band.
pub const HIGH_BAND_MIN: f64 = 75.0;
/// Floor of the medium confidence band.
pub const MEDIUM_BAND_MIN: f64 = 50.0;

/// Map a final score to its band.
pub fn band_for_score(score: f64) -> ConfidenceBand {
    if score >= HIGH_BAND_MIN {
        ConfidenceBand::High
    } else if score >= MEDIUM_BAND_MIN {
        ConfidenceBand::Medium
    } else {
        ConfidenceBand::Low
    }
}

// ---------------------------------------------------------------------------
// Tunable tables
// ---------------------------------------------------------------------------

/// Penalty points per gap, before the severity multiplier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GapPenalties {
    pub missing: f64,
    pub partial: f64,
    pub weak: f64,
    pub stale: f64,
}

impl Default for GapPenalties {
    fn default() -> Self {
        Self {
            missing: 15.0,
            partial: 10.0,
            weak: 5.0,
            stale: 3.0,
        }
    }
}

/// Scales a gap's penalty by how severe the detector judged it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SeverityMultipliers {
    pub high: f64,
    pub medium: f64,
    pub low: f64,
}

impl Default for SeverityMultipliers {
    fn default() -> Self {
        Self {
            high: 1.5,
            medium: 1.0,
            low: 0.5,
        }
    }
}

/// Flat penalty points per bias flag by severity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BiasPenalties {
    pub high: f64,
    pub medium: f64,
    pub low: f64,
}

impl Default for BiasPenalties {
    fn default() -> Self {
        Self {
            high: 15.0,
            medium: 10.0,
            low: 5.0,
        }
    }
}

/// The scoring tables. Weights sum to 100 so a fully-evidenced case with
/// every signal at full strength scores exactly 100 before penalties.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScoringConfig {
    /// Bumped when table semantics change; persisted records can be traced
    /// back to the tables that produced them.
    pub version: u32,
    pub signal_weights: HashMap<String, f64>,
    pub gap_penalties: GapPenalties,
    pub severity_multipliers: SeverityMultipliers,
    pub bias_penalties: BiasPenalties,
    /// Signals observed longer ago than this count as stale, for both gap
    /// detection and the stale-evidence bias heuristic.
    pub max_age_hours: i64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            version: 1,
            signal_weights: default_signal_weights(),
            gap_penalties: GapPenalties::default(),
            severity_multipliers: SeverityMultipliers::default(),
            bias_penalties: BiasPenalties::default(),
            max_age_hours: 72,
        }
    }
}

fn default_signal_weights() -> HashMap<String, f64> {
    use crate::signals::*;
    HashMap::from([
        (SIGNAL_SUBMISSION_PRESENT.to_string(), 30.0),
        (SIGNAL_SUBMISSION_COMPLETENESS.to_string(), 25.0),
        (SIGNAL_EVIDENCE_PRESENT.to_string(), 25.0),
        (SIGNAL_EXPLAINABILITY.to_string(), 10.0),
        (SIGNAL_RFI_RESPONDED.to_string(), 5.0),
        (SIGNAL_LICENSE_VERIFIED.to_string(), 5.0),
        // Lifecycle markers: tracked for gap/bias detection, worth no points
        (SIGNAL_RFI_OPEN.to_string(), 0.0),
        (SIGNAL_RFI_RESOLVED.to_string(), 0.0),
    ])
}

impl ScoringConfig {
    /// Weight for a signal type. Unknown types score zero rather than error,
    /// so new signal producers can ship ahead of a weight-table update.
    pub fn signal_weight(&self, signal_type: &str) -> f64 {
        self.signal_weights.get(signal_type).copied().unwrap_or(0.0)
    }

    fn gap_penalty_base(&self, gap_type: GapType) -> f64 {
        match gap_type {
            GapType::Missing => self.gap_penalties.missing,
            GapType::Partial => self.gap_penalties.partial,
            GapType::Weak => self.gap_penalties.weak,
            GapType::Stale => self.gap_penalties.stale,
        }
    }

    fn severity_multiplier(&self, severity: Severity) -> f64 {
        match severity {
            Severity::High => self.severity_multipliers.high,
            Severity::Medium => self.severity_multipliers.medium,
            Severity::Low => self.severity_multipliers.low,
        }
    }

    fn bias_penalty(&self, severity: Severity) -> f64 {
        match severity {
            Severity::High => self.bias_penalties.high,
            Severity::Medium => self.bias_penalties.medium,
            Severity::Low => self.bias_penalties.low,
        }
    }
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

/// One line of the explanation trail persisted with the score.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplanationFactor {
    pub factor: String,
    pub impact: f64,
    pub detail: String,
}

/// Result of scoring one case.
#[derive(Debug, Clone)]
pub struct ScoreOutcome {
    pub base_score: f64,
    pub gap_penalty: f64,
    pub bias_penalty: f64,
    pub final_score: f64,
    pub band: ConfidenceBand,
    pub explanation_factors: Vec<ExplanationFactor>,
}

/// Score a case from its signals and the detector outputs.
///
/// Scoring dimensions:
/// - Base evidence (0-100): weight x strength x completeness credit per signal
/// - Gap penalty: penalty base per gap type x severity multiplier
/// - Bias penalty: flat points per flag by severity
/// - Final: base minus penalties, clamped to [0, 100]; band from fixed floors
pub fn score_case(
    signals: &[Signal],
    gaps: &[Gap],
    flags: &[BiasFlag],
    config: &ScoringConfig,
) -> ScoreOutcome {
    // 1. Base evidence: each present signal contributes its weighted
    //    strength, halved when the underlying data is incomplete
    let mut contributions: Vec<(&Signal, f64)> = signals
        .iter()
        .map(|signal| {
            let credit = if signal.complete { 1.0 } else { 0.5 };
            let term = config.signal_weight(&signal.signal_type) * signal.strength * credit;
            (signal, term)
        })
        .collect();
    contributions.sort_by(|a, b| a.0.signal_type.cmp(&b.0.signal_type));
    let base_score: f64 = contributions.iter().map(|(_, term)| term).sum();

    // 2. Gap penalty
    let gap_penalty: f64 = gaps
        .iter()
        .map(|gap| config.gap_penalty_base(gap.gap_type) * config.severity_multiplier(gap.severity))
        .sum();

    // 3. Bias penalty
    let bias_penalty: f64 = flags
        .iter()
        .map(|flag| config.bias_penalty(flag.severity))
        .sum();

    // 4. Final, clamped to [0, 100]
    let final_score = (base_score - gap_penalty - bias_penalty).clamp(0.0, 100.0);

    // 5. Band from fixed floors
    let band = band_for_score(final_score);

    let explanation_factors =
        build_factors(&contributions, gaps, flags, base_score, gap_penalty, bias_penalty, final_score, band);

    ScoreOutcome {
        base_score,
        gap_penalty,
        bias_penalty,
        final_score,
        band,
        explanation_factors,
    }
}

/// Assemble the explanation trail. Section order is part of the persisted
/// contract: base, per-signal (sorted by type), gaps, bias, final.
#[allow(clippy::too_many_arguments)]
fn build_factors(
    contributions: &[(&Signal, f64)],
    gaps: &[Gap],
    flags: &[BiasFlag],
    base_score: f64,
    gap_penalty: f64,
    bias_penalty: f64,
    final_score: f64,
    band: ConfidenceBand,
) -> Vec<ExplanationFactor> {
    let mut factors = Vec::with_capacity(contributions.len() + 4);

    factors.push(ExplanationFactor {
        factor: "base".to_string(),
        impact: base_score,
        detail: format!("Weighted evidence from {} signal(s)", contributions.len()),
    });

    for (signal, term) in contributions {
        let credit_note = if signal.complete { "" } else { " at half credit" };
        factors.push(ExplanationFactor {
            factor: format!("signal:{}", signal.signal_type),
            impact: *term,
            detail: format!("strength {:.2}{}", signal.strength, credit_note),
        });
    }

    // Negate the penalties for the trail; a zero penalty stays 0.0 so the
    // serialized impact never reads -0.0
    factors.push(ExplanationFactor {
        factor: "gaps".to_string(),
        impact: if gap_penalty > 0.0 { -gap_penalty } else { 0.0 },
        detail: gap_detail(gaps),
    });
    factors.push(ExplanationFactor {
        factor: "bias".to_string(),
        impact: if bias_penalty > 0.0 { -bias_penalty } else { 0.0 },
        detail: bias_detail(flags),
    });

    factors.push(ExplanationFactor {
        factor: "final".to_string(),
        impact: final_score,
        detail: format!("Confidence band: {}", band.as_str()),
    });

    factors
}

fn gap_detail(gaps: &[Gap]) -> String {
    if gaps.is_empty() {
        return "No gaps detected".to_string();
    }
    let mut counts = [0usize; 4];
    for gap in gaps {
        let slot = match gap.gap_type {
            GapType::Missing => 0,
            GapType::Partial => 1,
            GapType::Weak => 2,
            GapType::Stale => 3,
        };
        counts[slot] += 1;
    }
    let labels = ["missing", "partial", "weak", "stale"];
    let parts: Vec<String> = counts
        .iter()
        .zip(labels.iter())
        .filter(|(count, _)| **count > 0)
        .map(|(count, label)| format!("{} {}", count, label))
        .collect();
    parts.join(", ")
}

fn bias_detail(flags: &[BiasFlag]) -> String {
    if flags.is_empty() {
        return "No bias flags raised".to_string();
    }
    let mut seen = Vec::new();
    for flag in flags {
        let name = flag.flag_type.as_str();
        if !seen.contains(&name) {
            seen.push(name);
        }
    }
    seen.join(", ")
}
