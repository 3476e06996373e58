//! Signal generation: case artifacts in, evidence signals out.
//!
//! Pure derivation from a `CaseSnapshot`. At most one signal per known
//! indicator type; an unavailable or unreadable artifact produces an absent
//! signal, never an error. Strength mappings are deliberately simple and
//! documented on each block; the scorer owns all weighting.

use chrono::{DateTime, Utc};

use crate::case_reader::CaseSnapshot;
use crate::signals::{
    new_signal_id, Signal, SignalMetadata, SIGNAL_EVIDENCE_PRESENT, SIGNAL_EXPLAINABILITY,
    SIGNAL_LICENSE_VERIFIED, SIGNAL_RFI_OPEN, SIGNAL_RFI_RESOLVED, SIGNAL_RFI_RESPONDED,
    SIGNAL_SUBMISSION_COMPLETENESS, SIGNAL_SUBMISSION_PRESENT, SOURCE_ANALYTICS,
    SOURCE_CORRESPONDENCE, SOURCE_EVIDENCE, SOURCE_REGISTRY, SOURCE_SUBMISSION, SOURCE_VALIDATION,
    SOURCE_WORKFLOW,
};

/// Evidence item count at which `evidence_present` saturates to full strength.
const EVIDENCE_TARGET_ITEMS: f64 = 3.0;

/// Derive the full signal set for a case.
///
/// `now` is injected (not read from the clock) so the same snapshot always
/// produces the same signals; it only backstops artifacts without their own
/// timestamp.
pub fn generate_signals(
    snapshot: &CaseSnapshot,
    decision_type: &str,
    now: DateTime<Utc>,
) -> Vec<Signal> {
    if !snapshot.exists {
        return Vec::new();
    }

    let mut signals = Vec::new();
    let mut push = |signal_type: &str,
                    source_type: &str,
                    observed_at: DateTime<Utc>,
                    strength: f64,
                    complete: bool,
                    metadata: SignalMetadata| {
        signals.push(Signal {
            id: new_signal_id(),
            case_id: snapshot.case_id.clone(),
            decision_type: decision_type.to_string(),
            signal_type: signal_type.to_string(),
            source_type: source_type.to_string(),
            observed_at,
            strength: strength.clamp(0.0, 1.0),
            complete,
            metadata,
        });
    };

    // Submission: existence at full strength, completeness as the field ratio.
    // A draft (not yet formally submitted) counts as partial presence.
    if let Some(submission) = &snapshot.submission {
        let submission_meta = SignalMetadata::Submission {
            field_count: submission.field_count,
            complete_field_count: submission.complete_field_count,
            declared_evidence_count: submission.declared_evidence_count,
        };
        push(
            SIGNAL_SUBMISSION_PRESENT,
            SOURCE_SUBMISSION,
            submission.updated_at,
            1.0,
            submission.submitted_at.is_some(),
            submission_meta.clone(),
        );

        if submission.field_count > 0 {
            let ratio =
                f64::from(submission.complete_field_count) / f64::from(submission.field_count);
            push(
                SIGNAL_SUBMISSION_COMPLETENESS,
                SOURCE_VALIDATION,
                submission.updated_at,
                ratio,
                ratio >= 1.0,
                submission_meta,
            );
        }
    }

    // Evidence: strength saturates at EVIDENCE_TARGET_ITEMS attachments.
    // Complete once every item the submission declared is actually attached;
    // with no declaration there is nothing to be incomplete against.
    if let Some(evidence) = &snapshot.evidence {
        let declared = snapshot
            .submission
            .as_ref()
            .map(|s| s.declared_evidence_count)
            .unwrap_or(0);
        push(
            SIGNAL_EVIDENCE_PRESENT,
            SOURCE_EVIDENCE,
            evidence.latest_attached_at.unwrap_or(now),
            f64::from(evidence.item_count) / EVIDENCE_TARGET_ITEMS,
            declared == 0 || evidence.item_count >= declared,
            SignalMetadata::Evidence {
                item_count: evidence.item_count,
                latest_attached_at: evidence.latest_attached_at,
            },
        );
    }

    // Info requests: presence signals per lifecycle stage.
    if !snapshot.info_requests.is_empty() {
        let open_count = snapshot.info_requests.iter().filter(|r| r.is_open()).count() as u32;
        let responded_count = snapshot
            .info_requests
            .iter()
            .filter(|r| r.has_response())
            .count() as u32;
        let resolved_count = snapshot
            .info_requests
            .iter()
            .filter(|r| r.is_resolved())
            .count() as u32;
        let rfi_meta = SignalMetadata::InfoRequests {
            open_count,
            responded_count,
            resolved_count,
        };

        if open_count > 0 {
            let latest_opened = snapshot
                .info_requests
                .iter()
                .filter(|r| r.is_open())
                .map(|r| r.opened_at)
                .max()
                .unwrap_or(now);
            push(
                SIGNAL_RFI_OPEN,
                SOURCE_WORKFLOW,
                latest_opened,
                1.0,
                true,
                rfi_meta.clone(),
            );
        }
        if responded_count > 0 {
            let latest_responded = snapshot
                .info_requests
                .iter()
                .filter_map(|r| r.responded_at)
                .max()
                .unwrap_or(now);
            push(
                SIGNAL_RFI_RESPONDED,
                SOURCE_CORRESPONDENCE,
                latest_responded,
                1.0,
                true,
                rfi_meta.clone(),
            );
        }
        if resolved_count > 0 {
            let latest_resolved = snapshot
                .info_requests
                .iter()
                .filter_map(|r| r.resolved_at)
                .max()
                .unwrap_or(now);
            push(
                SIGNAL_RFI_RESOLVED,
                SOURCE_WORKFLOW,
                latest_resolved,
                1.0,
                true,
                rfi_meta,
            );
        }
    }

    // Explainability artifact from the analytics pipeline.
    if let Some(explainability) = &snapshot.explainability {
        push(
            SIGNAL_EXPLAINABILITY,
            SOURCE_ANALYTICS,
            explainability.generated_at,
            1.0,
            true,
            SignalMetadata::Explainability {
                model_version: explainability.model_version.clone(),
            },
        );
    }

    // License check: a failed check is a present, zero-strength signal.
    // Present-but-zero participates in gap and bias detection; absent from
    // the snapshot means the check never ran.
    if let Some(license) = &snapshot.license {
        push(
            SIGNAL_LICENSE_VERIFIED,
            SOURCE_REGISTRY,
            license.checked_at,
            if license.verified { 1.0 } else { 0.0 },
            true,
            SignalMetadata::License {
                verified: license.verified,
                license_number: license.license_number.clone(),
            },
        );
    }

    signals
}
