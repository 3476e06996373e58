//! Shared engine state and configuration plumbing.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};

use crate::case_reader::CaseReader;
use crate::db::CaseDb;
use crate::intelligence::lifecycle::{self, DebounceStore, InProcessDebounce};
use crate::narrative::NarrativeProvider;
use crate::types::Config;

/// Everything a lifecycle task needs, behind one `Arc`.
pub struct EngineState {
    /// Runtime configuration. Read on every recompute; replaced wholesale
    /// by `reload_config`.
    pub config: RwLock<Config>,
    /// Writer connection. rusqlite connections are not `Sync`, so every
    /// write funnels through this lock; the case reader opens its own
    /// read-only connections.
    pub db: Mutex<CaseDb>,
    pub reader: Arc<dyn CaseReader>,
    /// Optional LLM narrative enrichment. Without a provider, records keep
    /// the deterministic template narrative.
    pub narrative_provider: Option<Arc<dyn NarrativeProvider>>,
    /// Debounce bookkeeping. In-process by default; replica deployments can
    /// swap in a shared store.
    pub debounce: Arc<dyn DebounceStore>,
    /// Per-case compute locks, created on first use. One pipeline run per
    /// case at a time; unrelated cases proceed in parallel.
    case_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl EngineState {
    /// Assemble engine state from explicit parts. The binary loads config
    /// and opens the database; tests inject fixtures.
    pub fn new(config: Config, db: CaseDb, reader: Arc<dyn CaseReader>) -> Self {
        Self {
            config: RwLock::new(config),
            db: Mutex::new(db),
            reader,
            narrative_provider: None,
            debounce: Arc::new(InProcessDebounce::new()),
            case_locks: DashMap::new(),
        }
    }

    pub fn with_narrative_provider(mut self, provider: Arc<dyn NarrativeProvider>) -> Self {
        self.narrative_provider = Some(provider);
        self
    }

    pub fn with_debounce_store(mut self, debounce: Arc<dyn DebounceStore>) -> Self {
        self.debounce = debounce;
        self
    }

    /// Handle to the compute lock for one case.
    pub fn case_lock(&self, case_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.case_locks
            .entry(case_id.to_string())
            .or_default()
            .clone()
    }

    /// Drop lock entries no task currently holds a handle to. Without this
    /// the map keeps one entry for every case ever scored.
    pub fn prune_idle_case_locks(&self) {
        self.case_locks
            .retain(|_, lock| Arc::strong_count(lock) > 1);
    }
}

/// Get the canonical config file path (~/.caseintel/config.json)
pub fn config_path() -> Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or("Could not find home directory")?;
    Ok(home.join(".caseintel").join("config.json"))
}

/// Load configuration from ~/.caseintel/config.json.
///
/// A missing file is not an error: every field has a serde default, so first
/// runs start from `Config::default()` until an operator writes overrides.
pub fn load_config() -> Result<Config, String> {
    let path = config_path()?;

    if !path.exists() {
        log::info!("Config: no file at {}; using defaults", path.display());
        return Ok(Config::default());
    }

    let content =
        fs::read_to_string(&path).map_err(|e| format!("Failed to read config: {}", e))?;

    let config: Config =
        serde_json::from_str(&content).map_err(|e| format!("Failed to parse config: {}", e))?;

    Ok(config)
}

/// Create or update config.json.
///
/// Clones the in-memory config, applies the mutator, writes the result to
/// disk, and swaps it in. Lifecycle feature flags are re-applied so a toggle
/// takes effect without a restart.
pub fn create_or_update_config(
    state: &EngineState,
    mutator: impl FnOnce(&mut Config),
) -> Result<Config, String> {
    let mut config = state.config.read().clone();
    mutator(&mut config);

    // Ensure ~/.caseintel/ exists
    let path = config_path()?;
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create config dir: {}", e))?;
        }
    }

    // Write to disk
    let content = serde_json::to_string_pretty(&config)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;
    fs::write(&path, content).map_err(|e| format!("Failed to write config: {}", e))?;

    // Update in-memory state
    lifecycle::apply_feature_flags(&config);
    *state.config.write() = config.clone();

    Ok(config)
}

/// Reload configuration from disk.
pub fn reload_config(state: &EngineState) -> Result<Config, String> {
    let config = load_config()?;
    lifecycle::apply_feature_flags(&config);
    *state.config.write() = config.clone();
    Ok(config)
}
