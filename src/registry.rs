//! Expectation registry: which signals each decision type should carry.
//!
//! Pure lookup, no I/O. Profiles are code, not data: adding a decision type
//! means adding a match arm, which keeps the gap detector's inputs reviewable
//! in one place.

use crate::signals::{
    SIGNAL_EVIDENCE_PRESENT, SIGNAL_LICENSE_VERIFIED, SIGNAL_SUBMISSION_COMPLETENESS,
    SIGNAL_SUBMISSION_PRESENT,
};

/// Decision types with dedicated expectation profiles.
pub const DECISION_CSF: &str = "csf";
pub const DECISION_LICENSE_CHECK: &str = "license_check";

/// What one decision type expects from one signal type.
#[derive(Debug, Clone, Copy)]
pub struct SignalExpectation {
    pub signal_type: &'static str,
    pub required: bool,
    /// Strength below this reads as weak evidence.
    pub min_strength: f64,
}

impl SignalExpectation {
    const fn required(signal_type: &'static str, min_strength: f64) -> Self {
        Self {
            signal_type,
            required: true,
            min_strength,
        }
    }

    const fn optional(signal_type: &'static str, min_strength: f64) -> Self {
        Self {
            signal_type,
            required: false,
            min_strength,
        }
    }
}

/// Expected signal profile for a decision type.
///
/// Unknown decision types fall back to the minimal default profile (a case
/// must at least have a submission). Never empty, never an error.
pub fn expectations_for(decision_type: &str) -> Vec<SignalExpectation> {
    match decision_type {
        // Controlled-substance form review: the full evidentiary bar.
        DECISION_CSF => vec![
            SignalExpectation::required(SIGNAL_SUBMISSION_PRESENT, 0.5),
            SignalExpectation::required(SIGNAL_SUBMISSION_COMPLETENESS, 0.6),
            SignalExpectation::required(SIGNAL_EVIDENCE_PRESENT, 0.5),
        ],
        // License verification: registry lookup carries the decision.
        DECISION_LICENSE_CHECK => vec![
            SignalExpectation::required(SIGNAL_SUBMISSION_PRESENT, 0.5),
            SignalExpectation::required(SIGNAL_LICENSE_VERIFIED, 0.6),
            SignalExpectation::optional(SIGNAL_EVIDENCE_PRESENT, 0.25),
        ],
        _ => vec![
            SignalExpectation::required(SIGNAL_SUBMISSION_PRESENT, 0.5),
            SignalExpectation::optional(SIGNAL_SUBMISSION_COMPLETENESS, 0.5),
        ],
    }
}
