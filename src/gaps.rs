//! Gap detection: compare the active signal set against the decision
//! registry's expectations and surface what is missing, partial, weak,
//! or stale.
//!
//! Checks fire independently, so one signal can produce several gaps at
//! once (an incomplete, weak, week-old signal yields partial + weak +
//! stale). Scoring turns the resulting list into a penalty; the list
//! itself is persisted for reviewers.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::registry::SignalExpectation;
use crate::scoring::ScoringConfig;
use crate::signals::Signal;
use crate::types::Severity;

/// What kind of shortfall a gap describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GapType {
    /// Expected signal never observed.
    Missing,
    /// Signal observed but its underlying data is incomplete.
    Partial,
    /// Signal observed but below the expected minimum strength.
    Weak,
    /// Signal observed too long ago to trust.
    Stale,
}

impl GapType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GapType::Missing => "missing",
            GapType::Partial => "partial",
            GapType::Weak => "weak",
            GapType::Stale => "stale",
        }
    }
}

/// One detected evidence gap, persisted as part of the intelligence record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Gap {
    pub gap_type: GapType,
    pub severity: Severity,
    pub signal_type: String,
    pub message: String,
    /// Threshold the signal was judged against: minimum strength for
    /// missing/weak, 1.0 for partial, the max age in hours for stale.
    pub expected_threshold: f64,
}

/// Evaluate every registry expectation against the signal set.
pub fn detect_gaps(
    signals: &[Signal],
    expectations: &[SignalExpectation],
    config: &ScoringConfig,
    now: DateTime<Utc>,
) -> Vec<Gap> {
    let mut gaps = Vec::new();

    for exp in expectations {
        let signal = signals.iter().find(|s| s.signal_type == exp.signal_type);

        let signal = match signal {
            None => {
                // 1. Missing: required expectations escalate to high
                let severity = if exp.required {
                    Severity::High
                } else {
                    Severity::Medium
                };
                gaps.push(Gap {
                    gap_type: GapType::Missing,
                    severity,
                    signal_type: exp.signal_type.to_string(),
                    message: format!("No {} signal recorded for this case", exp.signal_type),
                    expected_threshold: exp.min_strength,
                });
                continue;
            }
            Some(s) => s,
        };

        // 2. Partial: present but the underlying data is incomplete
        if !signal.complete {
            gaps.push(Gap {
                gap_type: GapType::Partial,
                severity: Severity::Medium,
                signal_type: exp.signal_type.to_string(),
                message: format!("{} signal is present but incomplete", exp.signal_type),
                expected_threshold: 1.0,
            });
        }

        // 3. Weak: below the expected minimum; far below escalates
        if signal.strength < exp.min_strength {
            let severity = if signal.strength < exp.min_strength / 2.0 {
                Severity::Medium
            } else {
                Severity::Low
            };
            gaps.push(Gap {
                gap_type: GapType::Weak,
                severity,
                signal_type: exp.signal_type.to_string(),
                message: format!(
                    "{} strength {:.2} is below the expected minimum {:.2}",
                    exp.signal_type, signal.strength, exp.min_strength
                ),
                expected_threshold: exp.min_strength,
            });
        }

        // 4. Stale: observed too long ago
        let max_age = Duration::hours(config.max_age_hours);
        if now.signed_duration_since(signal.observed_at) > max_age {
            let age_hours = now.signed_duration_since(signal.observed_at).num_hours();
            gaps.push(Gap {
                gap_type: GapType::Stale,
                severity: Severity::Low,
                signal_type: exp.signal_type.to_string(),
                message: format!(
                    "{} signal is {}h old (freshness limit {}h)",
                    exp.signal_type, age_hours, config.max_age_hours
                ),
                expected_threshold: config.max_age_hours as f64,
            });
        }
    }

    gaps
}

/// Aggregate gap pressure on a 0-100 scale.
///
/// Each gap contributes a type weight (missing 0.3, partial 0.2, weak 0.1,
/// stale 0.05); the sum is squashed with w/(1+w) so the score approaches
/// but never reaches 100 as gaps pile up.
pub fn gap_severity_score(gaps: &[Gap]) -> f64 {
    let weight: f64 = gaps
        .iter()
        .map(|g| match g.gap_type {
            GapType::Missing => 0.3,
            GapType::Partial => 0.2,
            GapType::Weak => 0.1,
            GapType::Stale => 0.05,
        })
        .sum();
    100.0 * weight / (1.0 + weight)
}
