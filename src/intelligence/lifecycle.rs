//! Recompute lifecycle: event intake, debounce, manual and lazy paths.
//!
//! The intake platform calls `notify` on every case event. Triggering events
//! run the full pipeline (snapshot, score, persist, audit) on a spawned task;
//! bursts inside the debounce window coalesce into one run. Reads go through
//! `get_intelligence`, which computes on first read and otherwise serves the
//! persisted row as-is, stale or not.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use serde_json::json;
use tokio::time::Instant;

use crate::audit::{
    self, EVENT_INTELLIGENCE_RECOMPUTED, REASON_EVENT, REASON_LAZY_READ, REASON_MANUAL,
};
use crate::error::EngineError;
use crate::intelligence::compute::{assess_case, DecisionIntelligence};
use crate::intelligence::io;
use crate::signals::store::replace_signals;
use crate::state::EngineState;
use crate::types::{can_force_recompute, is_feature_enabled, CaseEvent, Config, SYSTEM_ACTOR};

/// Events closer together than this produce a single recompute.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Auto-recompute kill switch
// ---------------------------------------------------------------------------

/// Process-wide switch gating event-triggered recomputes. Event hooks fire
/// from several tasks; the static means an operator toggle reaches all of
/// them without plumbing config through every call site. Manual recomputes
/// and lazy reads are not gated.
static AUTO_RECOMPUTE: AtomicBool = AtomicBool::new(true);

pub fn set_auto_recompute(enabled: bool) {
    AUTO_RECOMPUTE.store(enabled, Ordering::Relaxed);
    log::info!(
        "Lifecycle: auto recompute {}",
        if enabled { "enabled" } else { "disabled" }
    );
}

pub fn auto_recompute_enabled() -> bool {
    AUTO_RECOMPUTE.load(Ordering::Relaxed)
}

/// Push lifecycle-relevant feature flags from config into process state.
/// Called on startup and after every config write or reload.
pub fn apply_feature_flags(config: &Config) {
    let enabled = is_feature_enabled(config, "autoRecompute");
    if enabled != auto_recompute_enabled() {
        set_auto_recompute(enabled);
    }
}

// ---------------------------------------------------------------------------
// Debounce bookkeeping
// ---------------------------------------------------------------------------

/// Last-run bookkeeping behind a trait so multi-replica deployments can back
/// it with a shared store. One engine process uses the in-process map.
pub trait DebounceStore: Send + Sync {
    fn last_run(&self, key: &str) -> Option<Instant>;
    fn record_run(&self, key: &str, at: Instant);
    /// Drop entries whose last run is older than `horizon` ago.
    fn prune_older_than(&self, horizon: Duration);
}

#[derive(Default)]
pub struct InProcessDebounce {
    runs: DashMap<String, Instant>,
}

impl InProcessDebounce {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DebounceStore for InProcessDebounce {
    fn last_run(&self, key: &str) -> Option<Instant> {
        self.runs.get(key).map(|entry| *entry.value())
    }

    fn record_run(&self, key: &str, at: Instant) {
        self.runs.insert(key.to_string(), at);
    }

    fn prune_older_than(&self, horizon: Duration) {
        let now = Instant::now();
        self.runs.retain(|_, at| now.duration_since(*at) < horizon);
    }
}

/// Debounce is per (case, decision type): a license check recompute does not
/// swallow a fraud screen recompute for the same case.
fn debounce_key(case_id: &str, decision_type: &str) -> String {
    format!("{}:{}", case_id, decision_type)
}

/// What a pipeline run does about the debounce window once it holds the
/// case lock.
///
/// The intake checks run before the lock, so two near-simultaneous triggers
/// can both see a clear window and serialize on the lock; whichever loses
/// the lock race finds the winner's stamp in the authoritative re-check.
#[derive(Clone, Copy, PartialEq, Eq)]
enum DebounceMode {
    /// Skip inside the window; the record just persisted stands.
    Coalesce,
    /// Inside the window is `Throttled` back to the caller.
    Throttle,
    /// Run regardless of the window.
    Bypass,
}

// ---------------------------------------------------------------------------
// Event intake
// ---------------------------------------------------------------------------

/// What happened to one delivered event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyOutcome {
    /// Pipeline ran and a fresh record was persisted.
    Recomputed,
    /// Inside the debounce window; skipped silently.
    Debounced,
    /// Event type does not trigger recomputes.
    NonTriggering,
    /// Kill switch is off.
    Disabled,
    /// Case missing at read, or deleted while the pipeline ran. Nothing
    /// was persisted.
    CaseMissing,
    /// Pipeline failed; the error was logged.
    Failed(String),
}

/// Fire-and-forget entry point for the platform's event hook. Must be called
/// from within the tokio runtime. Failures are logged, never surfaced to the
/// emitting workflow.
pub fn notify(state: &Arc<EngineState>, case_id: &str, decision_type: &str, event: CaseEvent) {
    if !event.triggers_recompute() {
        log::debug!("Lifecycle: ignoring {} for case {}", event, case_id);
        return;
    }
    if !auto_recompute_enabled() {
        log::debug!(
            "Lifecycle: auto recompute disabled; dropping {} for case {}",
            event,
            case_id
        );
        return;
    }

    let state = Arc::clone(state);
    let case_id = case_id.to_string();
    let decision_type = decision_type.to_string();
    tokio::spawn(async move {
        let outcome = handle_event(&state, &case_id, &decision_type, event).await;
        if let NotifyOutcome::Failed(e) = outcome {
            log::error!(
                "Lifecycle: recompute after {} failed for case {}: {}",
                event,
                case_id,
                e
            );
        }
    });
}

/// Process one delivered event end to end. `notify` calls this on a spawned
/// task; tests and callers that want the outcome call it directly.
pub async fn handle_event(
    state: &Arc<EngineState>,
    case_id: &str,
    decision_type: &str,
    event: CaseEvent,
) -> NotifyOutcome {
    // 1. Trigger filter: notes, assignment, and bare creation are policy no-ops
    if !event.triggers_recompute() {
        return NotifyOutcome::NonTriggering;
    }

    // 2. Kill switch
    if !auto_recompute_enabled() {
        return NotifyOutcome::Disabled;
    }

    // 3. Debounce fast path: obvious bursts skip without touching the case
    //    lock. The authoritative check re-runs under the lock, where racing
    //    events that all passed this one resolve to a single run
    let key = debounce_key(case_id, decision_type);
    if let Some(last) = state.debounce.last_run(&key) {
        let elapsed = last.elapsed();
        if elapsed < DEBOUNCE_WINDOW {
            log::debug!(
                "Lifecycle: debounced {} for case {} ({:?} since last run)",
                event,
                case_id,
                elapsed
            );
            return NotifyOutcome::Debounced;
        }
    }

    // 4. Full pipeline, attributed to the engine
    match run_pipeline(
        state,
        case_id,
        decision_type,
        SYSTEM_ACTOR,
        REASON_EVENT,
        Some(event),
        DebounceMode::Coalesce,
    )
    .await
    {
        Ok(PipelineRun::Computed(_)) => NotifyOutcome::Recomputed,
        Ok(PipelineRun::Debounced) => NotifyOutcome::Debounced,
        Ok(PipelineRun::CaseMissing) => NotifyOutcome::CaseMissing,
        Err(e) => NotifyOutcome::Failed(e.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Manual recompute and reads
// ---------------------------------------------------------------------------

/// Force a recompute on behalf of an actor.
///
/// Privileged actors (and the engine itself) bypass the debounce window;
/// everyone else inside the window gets `Throttled` with the remaining wait.
pub async fn recompute(
    state: &Arc<EngineState>,
    case_id: &str,
    decision_type: &str,
    actor: &str,
) -> Result<DecisionIntelligence, EngineError> {
    let privileged = can_force_recompute(&state.config.read(), actor);
    if !privileged {
        // Fast path; the check under the case lock is authoritative
        let key = debounce_key(case_id, decision_type);
        if let Some(last) = state.debounce.last_run(&key) {
            let elapsed = last.elapsed();
            if elapsed < DEBOUNCE_WINDOW {
                let retry_after_ms = (DEBOUNCE_WINDOW - elapsed).as_millis() as u64;
                return Err(EngineError::Throttled {
                    case_id: case_id.to_string(),
                    retry_after_ms,
                });
            }
        }
    }

    let mode = if privileged {
        DebounceMode::Bypass
    } else {
        DebounceMode::Throttle
    };
    match run_pipeline(state, case_id, decision_type, actor, REASON_MANUAL, None, mode).await? {
        PipelineRun::Computed(record) => Ok(record),
        PipelineRun::CaseMissing => Err(EngineError::CaseNotFound(case_id.to_string())),
        PipelineRun::Debounced => unreachable!("manual modes never coalesce"),
    }
}

/// Read the persisted record, computing it first if the case has never been
/// scored. Staleness never blocks a read; `is_stale` on the returned record
/// is advisory and it is the caller's decision to force a recompute.
pub async fn get_intelligence(
    state: &Arc<EngineState>,
    case_id: &str,
    decision_type: &str,
) -> Result<DecisionIntelligence, EngineError> {
    let existing = {
        let db = state.db.lock();
        io::get_intelligence_row(&db, case_id, decision_type, Utc::now())?
    };
    if let Some(record) = existing {
        return Ok(record);
    }

    log::info!(
        "Lifecycle: no intelligence for case {} ({}); computing on first read",
        case_id,
        decision_type
    );
    match run_pipeline(
        state,
        case_id,
        decision_type,
        SYSTEM_ACTOR,
        REASON_LAZY_READ,
        None,
        DebounceMode::Coalesce,
    )
    .await?
    {
        PipelineRun::Computed(record) => Ok(record),
        PipelineRun::CaseMissing => Err(EngineError::CaseNotFound(case_id.to_string())),
        PipelineRun::Debounced => {
            // A concurrent run persisted the row while this read waited on
            // the case lock; the window stamp only ever follows a persist,
            // so the row is there to serve
            let db = state.db.lock();
            io::get_intelligence_row(&db, case_id, decision_type, Utc::now())?
                .ok_or_else(|| EngineError::CaseNotFound(case_id.to_string()))
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Outcome of one locked pipeline pass.
enum PipelineRun {
    /// Fresh record computed and persisted.
    Computed(DecisionIntelligence),
    /// A run for the same key finished inside the window while this one
    /// waited on the case lock. Nothing computed.
    Debounced,
    /// Case absent at snapshot, or deleted mid-compute. Nothing persisted.
    CaseMissing,
}

/// Full recompute for one case: snapshot, score, persist, audit.
///
/// The whole pass, debounce check through window stamp, happens under the
/// per-case lock, so concurrent triggers for one key cannot both compute.
async fn run_pipeline(
    state: &Arc<EngineState>,
    case_id: &str,
    decision_type: &str,
    actor: &str,
    reason: &str,
    event: Option<CaseEvent>,
    debounce: DebounceMode,
) -> Result<PipelineRun, EngineError> {
    let started = std::time::Instant::now();

    // One compute per case at a time; unrelated cases proceed in parallel
    let lock = state.case_lock(case_id);
    let _guard = lock.lock().await;

    // 1. Authoritative debounce check, now that no other run can be mid-
    //    flight for this key
    if debounce != DebounceMode::Bypass {
        let key = debounce_key(case_id, decision_type);
        if let Some(last) = state.debounce.last_run(&key) {
            let elapsed = last.elapsed();
            if elapsed < DEBOUNCE_WINDOW {
                if debounce == DebounceMode::Throttle {
                    return Err(EngineError::Throttled {
                        case_id: case_id.to_string(),
                        retry_after_ms: (DEBOUNCE_WINDOW - elapsed).as_millis() as u64,
                    });
                }
                log::debug!(
                    "Lifecycle: coalesced run for case {} ({:?} since last run)",
                    case_id,
                    elapsed
                );
                return Ok(PipelineRun::Debounced);
            }
        }
    }

    // 2. Snapshot the case artifacts
    let snapshot = state.reader.read_case_state(case_id)?;
    if !snapshot.exists {
        log::info!("Lifecycle: case {} not found; skipping recompute", case_id);
        return Ok(PipelineRun::CaseMissing);
    }

    // 3. Score. Pure computation, no locks held
    let config = state.config.read().clone();
    let now = Utc::now();
    let assessment = assess_case(&snapshot, decision_type, &config.scoring, now);
    let signals = assessment.signals.clone();
    let record = assessment.into_record(now, config.stale_after_minutes);

    // 4. Re-check existence: a case deleted mid-compute must not resurrect
    //    as a fresh intelligence row
    if !state.reader.case_exists(case_id) {
        log::info!(
            "Lifecycle: case {} deleted mid-compute; discarding result",
            case_id
        );
        return Ok(PipelineRun::CaseMissing);
    }

    // 5. Persist signals, record, and audit under one writer lock
    {
        let db = state.db.lock();
        replace_signals(&db, case_id, decision_type, &signals)?;
        io::upsert_intelligence(&db, &record)?;
        audit::emit_audit(
            &db,
            case_id,
            EVENT_INTELLIGENCE_RECOMPUTED,
            actor,
            &audit_payload(reason, event, &record),
        )?;
    }

    // 6. Stamp the debounce window; shed debounce entries far outside it and
    //    case locks nobody holds, so neither map needs a background sweeper
    let key = debounce_key(case_id, decision_type);
    state.debounce.record_run(&key, Instant::now());
    state.debounce.prune_older_than(DEBOUNCE_WINDOW * 10);
    state.prune_idle_case_locks();

    log::info!(
        "Lifecycle: recomputed case {} ({}) in {}ms: {} ({:.0}%), {} gap(s), {} bias flag(s)",
        case_id,
        decision_type,
        started.elapsed().as_millis(),
        record.confidence_band,
        record.confidence_score,
        record.gaps.len(),
        record.bias_flags.len()
    );

    // 7. Narrative enrichment runs after the record is already readable;
    //    the template narrative stands until (unless) the provider delivers
    maybe_enrich_narrative(state, &record);

    Ok(PipelineRun::Computed(record))
}

fn audit_payload(
    reason: &str,
    event: Option<CaseEvent>,
    record: &DecisionIntelligence,
) -> serde_json::Value {
    json!({
        "reason": reason,
        "eventType": event.map(|e| e.as_str()),
        "confidenceScore": record.confidence_score,
        "confidenceBand": record.confidence_band,
        "gapSeverityScore": record.gap_severity_score,
        "biasCount": record.bias_flags.len(),
        "computedAt": record.computed_at.to_rfc3339(),
    })
}

/// Spawn LLM narrative enrichment for a just-persisted record.
///
/// Enrichment is bounded by `narrative_timeout_ms` and can only ever replace
/// the narrative text; scores and `computed_at` are already final.
fn maybe_enrich_narrative(state: &Arc<EngineState>, record: &DecisionIntelligence) {
    let Some(provider) = state.narrative_provider.clone() else {
        return;
    };
    let (enabled, timeout_ms) = {
        let config = state.config.read();
        (
            is_feature_enabled(&config, "narrativeEnrichment"),
            config.narrative_timeout_ms,
        )
    };
    if !enabled {
        return;
    }

    let state = Arc::clone(state);
    let record = record.clone();
    tokio::spawn(async move {
        let deadline = Duration::from_millis(timeout_ms);
        match tokio::time::timeout(deadline, provider.enrich(&record)).await {
            Ok(Ok(text)) => {
                let db = state.db.lock();
                match io::update_narrative(&db, &record, &text) {
                    Ok(true) => {
                        log::debug!("Lifecycle: narrative enriched for case {}", record.case_id)
                    }
                    Ok(false) => log::debug!(
                        "Lifecycle: case {} was rescored while enrichment ran; narrative dropped",
                        record.case_id
                    ),
                    Err(e) => log::warn!(
                        "Lifecycle: narrative write failed for case {}: {}",
                        record.case_id,
                        e
                    ),
                }
            }
            Ok(Err(e)) => log::warn!(
                "Lifecycle: narrative enrichment failed for case {}: {}; keeping template",
                record.case_id,
                e
            ),
            Err(_) => log::warn!(
                "Lifecycle: narrative enrichment timed out after {}ms for case {}; keeping template",
                timeout_ms,
                record.case_id
            ),
        }
    });
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case_reader::test_utils::{full_csf_snapshot, FixtureReader};
    use crate::case_reader::{CaseReader, CaseSnapshot};
    use crate::db::test_utils::test_db;
    use crate::intelligence::io::get_intelligence_row;
    use crate::narrative::NarrativeProvider;
    use crate::signals::store::get_active_signals;
    use crate::types::ConfidenceBand;
    use async_trait::async_trait;

    /// The kill switch is process-wide; tests that read or toggle it
    /// serialize here so the toggling test cannot interleave.
    static KILL_SWITCH_LOCK: parking_lot::Mutex<()> = parking_lot::Mutex::new(());

    fn engine_with_reader() -> (Arc<EngineState>, Arc<FixtureReader>) {
        let reader = Arc::new(FixtureReader::new());
        reader.insert(full_csf_snapshot("case-1", Utc::now()));
        let state = Arc::new(EngineState::new(
            Config::default(),
            test_db(),
            reader.clone() as Arc<dyn CaseReader>,
        ));
        (state, reader)
    }

    #[tokio::test]
    async fn test_triggering_event_runs_full_pipeline() {
        let _guard = KILL_SWITCH_LOCK.lock();
        let (state, _reader) = engine_with_reader();

        let outcome = handle_event(&state, "case-1", "csf", CaseEvent::SubmissionUpdated).await;
        assert_eq!(outcome, NotifyOutcome::Recomputed);

        let db = state.db.lock();
        let record = get_intelligence_row(&db, "case-1", "csf", Utc::now())
            .expect("read")
            .expect("row persisted");
        assert!((record.confidence_score - 80.0).abs() < f64::EPSILON);
        assert_eq!(record.confidence_band, ConfidenceBand::High);

        let signals = get_active_signals(&db, "case-1", "csf").expect("signals");
        assert_eq!(signals.len(), 3);

        let events = audit::recent_events(&db, "case-1", 10).expect("audit");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EVENT_INTELLIGENCE_RECOMPUTED);
        assert_eq!(events[0].actor, "system");
        assert_eq!(events[0].payload["reason"], "event");
        assert_eq!(events[0].payload["eventType"], "submission_updated");
        assert_eq!(events[0].payload["confidenceScore"], 80.0);
        assert_eq!(events[0].payload["confidenceBand"], "high");
        assert_eq!(events[0].payload["biasCount"], 0);
        assert!(events[0].payload["computedAt"].is_string());
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_coalesces_burst() {
        let _guard = KILL_SWITCH_LOCK.lock();
        let (state, _reader) = engine_with_reader();

        let first = handle_event(&state, "case-1", "csf", CaseEvent::SubmissionUpdated).await;
        assert_eq!(first, NotifyOutcome::Recomputed);

        // Burst inside the window: skipped silently
        let second = handle_event(&state, "case-1", "csf", CaseEvent::EvidenceAttached).await;
        let third = handle_event(&state, "case-1", "csf", CaseEvent::StatusChanged).await;
        assert_eq!(second, NotifyOutcome::Debounced);
        assert_eq!(third, NotifyOutcome::Debounced);

        // A different decision type for the same case is its own window
        let other = handle_event(&state, "case-1", "license_check", CaseEvent::StatusChanged).await;
        assert_eq!(other, NotifyOutcome::Recomputed);

        {
            let db = state.db.lock();
            assert_eq!(audit::recent_events(&db, "case-1", 10).expect("audit").len(), 2);
        }

        // Once the window passes, events recompute again
        tokio::time::advance(Duration::from_secs(3)).await;
        let later = handle_event(&state, "case-1", "csf", CaseEvent::EvidenceAttached).await;
        assert_eq!(later, NotifyOutcome::Recomputed);

        let db = state.db.lock();
        assert_eq!(audit::recent_events(&db, "case-1", 10).expect("audit").len(), 3);
    }

    #[tokio::test]
    async fn test_racing_events_compute_once() {
        let _guard = KILL_SWITCH_LOCK.lock();
        let (state, _reader) = engine_with_reader();

        // Park two events on the case lock so both pass the intake debounce
        // check before either has stamped the window
        let lock = state.case_lock("case-1");
        let parked = lock.lock().await;

        let first = tokio::spawn({
            let state = Arc::clone(&state);
            async move { handle_event(&state, "case-1", "csf", CaseEvent::SubmissionUpdated).await }
        });
        let second = tokio::spawn({
            let state = Arc::clone(&state);
            async move { handle_event(&state, "case-1", "csf", CaseEvent::EvidenceAttached).await }
        });
        tokio::task::yield_now().await;
        drop(parked);

        let outcomes = [first.await.expect("join"), second.await.expect("join")];
        assert!(outcomes.contains(&NotifyOutcome::Recomputed), "{outcomes:?}");
        assert!(outcomes.contains(&NotifyOutcome::Debounced), "{outcomes:?}");

        let db = state.db.lock();
        assert_eq!(
            audit::recent_events(&db, "case-1", 10).expect("audit").len(),
            1,
            "a simultaneous burst must persist exactly one run"
        );
    }

    #[tokio::test]
    async fn test_racing_manual_recompute_throttles_under_lock() {
        let _guard = KILL_SWITCH_LOCK.lock();
        let (state, _reader) = engine_with_reader();

        let lock = state.case_lock("case-1");
        let parked = lock.lock().await;

        // The event parks first and wins the lock race; the unprivileged
        // recompute behind it passed the intake check but must still come
        // back throttled
        let event_task = tokio::spawn({
            let state = Arc::clone(&state);
            async move { handle_event(&state, "case-1", "csf", CaseEvent::SubmissionUpdated).await }
        });
        tokio::task::yield_now().await;
        let manual_task = tokio::spawn({
            let state = Arc::clone(&state);
            async move { recompute(&state, "case-1", "csf", "reviewer-jane").await }
        });
        tokio::task::yield_now().await;
        drop(parked);

        assert_eq!(event_task.await.expect("join"), NotifyOutcome::Recomputed);
        let err = manual_task
            .await
            .expect("join")
            .expect_err("throttled under the case lock");
        assert!(matches!(err, EngineError::Throttled { .. }));
    }

    #[tokio::test]
    async fn test_racing_lazy_read_serves_persisted_row() {
        let _guard = KILL_SWITCH_LOCK.lock();
        let (state, _reader) = engine_with_reader();

        let lock = state.case_lock("case-1");
        let parked = lock.lock().await;

        // The event parks on the case lock first; the read finds no row,
        // then queues behind it
        let event_task = tokio::spawn({
            let state = Arc::clone(&state);
            async move { handle_event(&state, "case-1", "csf", CaseEvent::SubmissionUpdated).await }
        });
        tokio::task::yield_now().await;
        let read_task = tokio::spawn({
            let state = Arc::clone(&state);
            async move { get_intelligence(&state, "case-1", "csf").await }
        });
        tokio::task::yield_now().await;
        drop(parked);

        assert_eq!(event_task.await.expect("join"), NotifyOutcome::Recomputed);
        let record = read_task.await.expect("join").expect("read");
        assert!((record.confidence_score - 80.0).abs() < f64::EPSILON);

        // The read served the event's record instead of computing a second one
        let db = state.db.lock();
        let events = audit::recent_events(&db, "case-1", 10).expect("audit");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].payload["reason"], "event");
    }

    #[tokio::test]
    async fn test_non_triggering_events_are_policy() {
        let _guard = KILL_SWITCH_LOCK.lock();
        let (state, _reader) = engine_with_reader();

        for event in [CaseEvent::NoteAdded, CaseEvent::Assigned, CaseEvent::CaseCreated] {
            let outcome = handle_event(&state, "case-1", "csf", event).await;
            assert_eq!(outcome, NotifyOutcome::NonTriggering, "event {}", event);
        }

        let db = state.db.lock();
        assert!(get_intelligence_row(&db, "case-1", "csf", Utc::now())
            .expect("read")
            .is_none());
        assert!(audit::recent_events(&db, "case-1", 10).expect("audit").is_empty());
    }

    #[tokio::test]
    async fn test_kill_switch_gates_auto_only() {
        let _guard = KILL_SWITCH_LOCK.lock();
        let (state, _reader) = engine_with_reader();

        set_auto_recompute(false);
        let auto_outcome =
            handle_event(&state, "case-1", "csf", CaseEvent::SubmissionUpdated).await;
        let manual_result = recompute(&state, "case-1", "csf", "compliance-lead").await;
        set_auto_recompute(true);

        assert_eq!(auto_outcome, NotifyOutcome::Disabled);
        // Manual recomputes are not auto-triggering and stay available
        assert!(manual_result.is_ok());
    }

    #[tokio::test]
    async fn test_feature_flag_drives_kill_switch() {
        let _guard = KILL_SWITCH_LOCK.lock();

        let mut config = Config::default();
        config.features.insert("autoRecompute".to_string(), false);
        apply_feature_flags(&config);
        let disabled = auto_recompute_enabled();

        config.features.insert("autoRecompute".to_string(), true);
        apply_feature_flags(&config);
        let enabled = auto_recompute_enabled();

        assert!(!disabled);
        assert!(enabled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_recompute_debounce_rules() {
        let _guard = KILL_SWITCH_LOCK.lock();
        let (state, _reader) = engine_with_reader();

        let first = handle_event(&state, "case-1", "csf", CaseEvent::SubmissionUpdated).await;
        assert_eq!(first, NotifyOutcome::Recomputed);

        // Privileged actor inside the window: runs
        let record = recompute(&state, "case-1", "csf", "compliance-lead")
            .await
            .expect("privileged recompute");
        assert_eq!(record.confidence_band, ConfidenceBand::High);

        // Unprivileged actor inside the window: throttled with a retry hint
        let err = recompute(&state, "case-1", "csf", "reviewer-jane")
            .await
            .expect_err("throttled");
        assert!(err.is_retryable());
        match err {
            EngineError::Throttled {
                case_id,
                retry_after_ms,
            } => {
                assert_eq!(case_id, "case-1");
                assert!(retry_after_ms > 0 && retry_after_ms <= 2_000);
            }
            other => panic!("expected Throttled, got {other:?}"),
        }

        // Outside the window the same actor succeeds
        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(recompute(&state, "case-1", "csf", "reviewer-jane").await.is_ok());
    }

    #[tokio::test]
    async fn test_manual_recompute_missing_case() {
        let (state, _reader) = engine_with_reader();
        let err = recompute(&state, "ghost", "csf", "compliance-lead")
            .await
            .expect_err("missing case");
        assert!(matches!(err, EngineError::CaseNotFound(_)));
    }

    /// Snapshot reads fine, but the pre-persist existence check says the
    /// case is gone.
    struct VanishingReader;

    impl CaseReader for VanishingReader {
        fn read_case_state(&self, case_id: &str) -> Result<CaseSnapshot, EngineError> {
            Ok(full_csf_snapshot(case_id, Utc::now()))
        }

        fn case_exists(&self, _case_id: &str) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn test_case_deleted_mid_compute_discards_result() {
        let _guard = KILL_SWITCH_LOCK.lock();
        let state = Arc::new(EngineState::new(
            Config::default(),
            test_db(),
            Arc::new(VanishingReader),
        ));

        let outcome = handle_event(&state, "case-1", "csf", CaseEvent::SubmissionUpdated).await;
        assert_eq!(outcome, NotifyOutcome::CaseMissing);

        let db = state.db.lock();
        assert!(get_intelligence_row(&db, "case-1", "csf", Utc::now())
            .expect("read")
            .is_none());
        assert!(get_active_signals(&db, "case-1", "csf").expect("signals").is_empty());
        assert!(audit::recent_events(&db, "case-1", 10).expect("audit").is_empty());
    }

    #[tokio::test]
    async fn test_lazy_read_computes_once() {
        let (state, _reader) = engine_with_reader();

        let first = get_intelligence(&state, "case-1", "csf")
            .await
            .expect("lazy compute");
        assert!((first.confidence_score - 80.0).abs() < f64::EPSILON);

        {
            let db = state.db.lock();
            let events = audit::recent_events(&db, "case-1", 10).expect("audit");
            assert_eq!(events.len(), 1);
            assert_eq!(events[0].payload["reason"], "lazy_read");
            assert_eq!(events[0].actor, "system");
        }

        // Second read serves the persisted row without recomputing
        let second = get_intelligence(&state, "case-1", "csf").await.expect("read");
        assert_eq!(second.computed_at, first.computed_at);

        let db = state.db.lock();
        assert_eq!(audit::recent_events(&db, "case-1", 10).expect("audit").len(), 1);
    }

    #[tokio::test]
    async fn test_lazy_read_missing_case() {
        let (state, _reader) = engine_with_reader();
        let err = get_intelligence(&state, "ghost", "csf")
            .await
            .expect_err("missing case");
        assert!(matches!(err, EngineError::CaseNotFound(_)));
    }

    #[tokio::test]
    async fn test_notify_spawns_recompute() {
        let _guard = KILL_SWITCH_LOCK.lock();
        let (state, _reader) = engine_with_reader();

        notify(&state, "case-1", "csf", CaseEvent::SubmissionCreated);

        for _ in 0..50 {
            tokio::task::yield_now().await;
            let done = {
                let db = state.db.lock();
                get_intelligence_row(&db, "case-1", "csf", Utc::now())
                    .expect("read")
                    .is_some()
            };
            if done {
                return;
            }
        }
        panic!("spawned recompute never persisted a record");
    }

    struct CannedNarrative;

    #[async_trait]
    impl NarrativeProvider for CannedNarrative {
        async fn enrich(&self, intelligence: &DecisionIntelligence) -> Result<String, String> {
            Ok(format!("Reviewer summary for {}.", intelligence.case_id))
        }
    }

    struct StalledNarrative;

    #[async_trait]
    impl NarrativeProvider for StalledNarrative {
        async fn enrich(&self, _intelligence: &DecisionIntelligence) -> Result<String, String> {
            tokio::time::sleep(Duration::from_secs(600)).await;
            Ok("too late".to_string())
        }
    }

    struct FailingNarrative;

    #[async_trait]
    impl NarrativeProvider for FailingNarrative {
        async fn enrich(&self, _intelligence: &DecisionIntelligence) -> Result<String, String> {
            Err("model offline".to_string())
        }
    }

    fn engine_with_provider(provider: Arc<dyn NarrativeProvider>) -> Arc<EngineState> {
        let reader = Arc::new(FixtureReader::new());
        reader.insert(full_csf_snapshot("case-1", Utc::now()));
        Arc::new(
            EngineState::new(Config::default(), test_db(), reader as Arc<dyn CaseReader>)
                .with_narrative_provider(provider),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_narrative_enrichment_replaces_template() {
        let _guard = KILL_SWITCH_LOCK.lock();
        let state = engine_with_provider(Arc::new(CannedNarrative));

        let outcome = handle_event(&state, "case-1", "csf", CaseEvent::SubmissionUpdated).await;
        assert_eq!(outcome, NotifyOutcome::Recomputed);

        // Let the spawned enrichment task run
        tokio::time::sleep(Duration::from_millis(10)).await;

        let db = state.db.lock();
        let record = get_intelligence_row(&db, "case-1", "csf", Utc::now())
            .expect("read")
            .expect("row");
        assert_eq!(record.narrative, "Reviewer summary for case-1.");
        // Scores are untouched by enrichment
        assert!((record.confidence_score - 80.0).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn test_narrative_timeout_keeps_template() {
        let _guard = KILL_SWITCH_LOCK.lock();
        let state = engine_with_provider(Arc::new(StalledNarrative));

        handle_event(&state, "case-1", "csf", CaseEvent::SubmissionUpdated).await;

        // Sleep past the 1500ms enrichment deadline
        tokio::time::sleep(Duration::from_millis(1_600)).await;

        let db = state.db.lock();
        let record = get_intelligence_row(&db, "case-1", "csf", Utc::now())
            .expect("read")
            .expect("row");
        assert!(record.narrative.starts_with("Case has 100% completeness"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_narrative_failure_keeps_template() {
        let _guard = KILL_SWITCH_LOCK.lock();
        let state = engine_with_provider(Arc::new(FailingNarrative));

        handle_event(&state, "case-1", "csf", CaseEvent::SubmissionUpdated).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let db = state.db.lock();
        let record = get_intelligence_row(&db, "case-1", "csf", Utc::now())
            .expect("read")
            .expect("row");
        assert!(record.narrative.starts_with("Case has 100% completeness"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_store_prunes_expired_entries() {
        let store = InProcessDebounce::new();
        store.record_run("case-1:csf", Instant::now());

        tokio::time::advance(Duration::from_secs(30)).await;
        store.record_run("case-2:csf", Instant::now());

        store.prune_older_than(Duration::from_secs(20));
        assert!(store.last_run("case-1:csf").is_none());
        assert!(store.last_run("case-2:csf").is_some());
    }
}
