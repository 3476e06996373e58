//! Reviewer-facing narrative for an intelligence record.
//!
//! The template summary is pure and always produced at compute time. A
//! richer narrative can come from an optional [`NarrativeProvider`] after
//! persistence; it is time-bounded and never required for correctness.

use async_trait::async_trait;

use crate::intelligence::DecisionIntelligence;
use crate::types::ConfidenceBand;

/// Render the one-line template summary.
pub fn render_narrative(
    completeness_score: f64,
    gap_count: usize,
    bias_count: usize,
    band: ConfidenceBand,
    final_score: f64,
) -> String {
    format!(
        "Case has {:.0}% completeness with {} gap(s) and {} bias flag(s). Confidence: {} ({:.0}%).",
        completeness_score,
        gap_count,
        bias_count,
        band.as_str(),
        final_score
    )
}

/// Plugs in a richer narrative source (an LLM, a rules engine) behind the
/// orchestrator's timeout. Implementations must not assume they run to
/// completion.
#[async_trait]
pub trait NarrativeProvider: Send + Sync {
    /// Produce an enriched narrative for a freshly computed record.
    async fn enrich(&self, intelligence: &DecisionIntelligence) -> Result<String, String>;
}
