//! Case evidence signals.
//!
//! Each signal is one evidence indicator about a case (submission present,
//! completeness ratio, evidence attached, RFI state). The generator derives
//! them from case artifacts on every recompute; the store replaces the active
//! set wholesale per generation. Everything downstream (gaps, bias, scoring)
//! consumes the in-memory signal set, never the artifacts directly.

pub mod generator;
pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Known signal and source types
// ---------------------------------------------------------------------------

// The scorer's weight table and the expectation registry key off these.
// Unknown types flow through the pipeline with weight 0.
pub const SIGNAL_SUBMISSION_PRESENT: &str = "submission_present";
pub const SIGNAL_SUBMISSION_COMPLETENESS: &str = "submission_completeness";
pub const SIGNAL_EVIDENCE_PRESENT: &str = "evidence_present";
pub const SIGNAL_RFI_OPEN: &str = "rfi_open";
pub const SIGNAL_RFI_RESPONDED: &str = "rfi_responded";
pub const SIGNAL_RFI_RESOLVED: &str = "rfi_resolved";
pub const SIGNAL_EXPLAINABILITY: &str = "explainability_available";
pub const SIGNAL_LICENSE_VERIFIED: &str = "license_verified";

pub const SOURCE_SUBMISSION: &str = "submission";
pub const SOURCE_VALIDATION: &str = "validation";
pub const SOURCE_EVIDENCE: &str = "evidence";
pub const SOURCE_WORKFLOW: &str = "workflow";
pub const SOURCE_CORRESPONDENCE: &str = "correspondence";
pub const SOURCE_ANALYTICS: &str = "analytics";
pub const SOURCE_REGISTRY: &str = "registry";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One evidence indicator about a case.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signal {
    pub id: String,
    pub case_id: String,
    pub decision_type: String,
    pub signal_type: String,
    pub source_type: String,
    pub observed_at: DateTime<Utc>,
    /// Evidence strength in [0, 1]. 0 is a present-but-failed indicator
    /// (e.g. a license check that came back negative), not an absent one.
    pub strength: f64,
    /// Whether the underlying artifact is complete. Partial signals earn
    /// half credit in the scorer.
    pub complete: bool,
    #[serde(default)]
    pub metadata: SignalMetadata,
}

/// Typed metadata payloads per signal family.
///
/// Tagged rather than a free-form map so consumers pattern-match instead of
/// doing stringly-typed key lookups. `Unstructured` is the escape hatch for
/// signals minted outside the generator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data")]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum SignalMetadata {
    #[default]
    None,
    Submission {
        field_count: u32,
        complete_field_count: u32,
        declared_evidence_count: u32,
    },
    Evidence {
        item_count: u32,
        latest_attached_at: Option<DateTime<Utc>>,
    },
    InfoRequests {
        open_count: u32,
        responded_count: u32,
        resolved_count: u32,
    },
    License {
        verified: bool,
        license_number: Option<String>,
    },
    Explainability {
        model_version: Option<String>,
    },
    Unstructured(serde_json::Value),
}

/// Mint a signal id.
pub fn new_signal_id() -> String {
    format!("sig-{}", Uuid::new_v4())
}
