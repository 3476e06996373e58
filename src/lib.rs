//! Decision intelligence engine for compliance casework.
//!
//! Turns the raw artifacts of a case (submissions, evidence, information
//! requests, license checks) into a scored, explainable confidence
//! assessment per decision type. The event lifecycle keeps assessments
//! current as cases change; reads never block on recomputes and mark
//! anything older than the staleness window as advisory-stale.

pub mod audit;
pub mod bias;
pub mod case_reader;
pub mod db;
pub mod error;
pub mod gaps;
pub mod intelligence;
mod migrations;
pub mod narrative;
pub mod registry;
pub mod scoring;
pub mod signals;
pub mod state;
pub mod types;

// The types a host platform touches on every call path.
pub use error::EngineError;
pub use intelligence::compute::DecisionIntelligence;
pub use intelligence::lifecycle::NotifyOutcome;
pub use state::EngineState;
pub use types::{CaseEvent, Config, ConfidenceBand, Severity};
