use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use jsonschema::{validator_for, Validator};
use once_cell::sync::Lazy;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::document::DocumentDefaults;
use crate::lease::{RetryPolicy, DEFAULT_CONFIRM_DELAY_MS, DEFAULT_LEASE_TIMEOUT_MS, MIN_LEASE_TIMEOUT_MS};
use crate::rollover::RolloverGuard;
use crate::scheduler::LessonFrequency;
use crate::taxonomy::Taxonomy;
use crate::util::{env_bool, env_parse};

#[derive(Debug, Default, Clone, Deserialize, Serialize, JsonSchema)]
pub struct LeaseSection {
    /// Age after which a held lease counts as abandoned (ms).
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Acquire attempts before an update is skipped.
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub base_backoff_ms: Option<u64>,
    #[serde(default)]
    pub max_backoff_ms: Option<u64>,
    #[serde(default)]
    pub jitter_ms: Option<u64>,
    /// Pause between writing a claim and re-reading it (ms).
    #[serde(default)]
    pub confirm_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize, JsonSchema)]
pub struct TrackerSection {
    #[serde(default)]
    pub default_frequency: Option<LessonFrequency>,
    #[serde(default)]
    pub enabled_sites: Option<Vec<String>>,
    /// "best_effort" (default) or "locked".
    #[serde(default)]
    pub rollover_guard: Option<RolloverGuard>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize, JsonSchema)]
pub struct Config {
    #[serde(default)]
    pub lease: LeaseSection,
    #[serde(default)]
    pub tracker: TrackerSection,
    /// Replaces the built-in theme → topic catalogue.
    #[serde(default)]
    pub taxonomy: Option<Taxonomy>,
}

static SCHEMA_JSON: Lazy<serde_json::Value> = Lazy::new(|| {
    serde_json::to_value(schemars::schema_for!(Config)).expect("config schema serializes")
});

static CONFIG_SCHEMA: Lazy<Validator> =
    Lazy::new(|| validator_for(&SCHEMA_JSON).expect("generated config schema is valid"));

/// JSON schema of `configs/bb.toml`, as printed by `bb-cli config schema`.
pub fn config_schema_json() -> serde_json::Value {
    SCHEMA_JSON.clone()
}

pub fn write_schema_file(path: &Path) -> std::io::Result<()> {
    std::fs::write(path, serde_json::to_string_pretty(&*SCHEMA_JSON)?)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)?;
    let raw: toml::Value = toml::from_str(&content)?;
    let json_value = serde_json::to_value(&raw)?;
    let problems: Vec<String> = CONFIG_SCHEMA
        .iter_errors(&json_value)
        .map(|e| format!("{}: {}", e.instance_path, e))
        .collect();
    anyhow::ensure!(problems.is_empty(), "{}: {}", path.display(), problems.join("; "));
    let cfg: Config = toml::from_str(&content)?;
    Ok(cfg)
}

/// Effective tracker settings after defaults, file and environment are layered.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerConfig {
    pub lease_timeout_ms: u64,
    pub confirm_delay: Duration,
    pub retry: RetryPolicy,
    pub rollover_guard: RolloverGuard,
    pub defaults: DocumentDefaults,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            lease_timeout_ms: DEFAULT_LEASE_TIMEOUT_MS,
            confirm_delay: Duration::from_millis(DEFAULT_CONFIRM_DELAY_MS),
            retry: RetryPolicy::default(),
            rollover_guard: RolloverGuard::default(),
            defaults: DocumentDefaults::default(),
        }
    }
}

impl Config {
    /// Layer this file over the built-in defaults, then apply
    /// `BB_LEASE_TIMEOUT_MS`, `BB_LOCK_ATTEMPTS` and `BB_ROLLOVER_LOCKED`.
    pub fn effective(&self) -> TrackerConfig {
        let mut out = TrackerConfig::default();
        let lease = &self.lease;
        if let Some(ms) = lease.timeout_ms {
            out.lease_timeout_ms = ms;
        }
        if let Some(n) = lease.max_attempts {
            out.retry.max_attempts = n;
        }
        if let Some(ms) = lease.base_backoff_ms {
            out.retry.base_backoff = Duration::from_millis(ms);
        }
        if let Some(ms) = lease.max_backoff_ms {
            out.retry.max_backoff = Duration::from_millis(ms);
        }
        if let Some(ms) = lease.jitter_ms {
            out.retry.max_jitter = Duration::from_millis(ms);
        }
        if let Some(ms) = lease.confirm_delay_ms {
            out.confirm_delay = Duration::from_millis(ms);
        }

        if let Some(freq) = self.tracker.default_frequency {
            out.defaults.frequency = freq;
        }
        if let Some(sites) = &self.tracker.enabled_sites {
            out.defaults.enabled_sites = sites.clone();
        }
        if let Some(guard) = self.tracker.rollover_guard {
            out.rollover_guard = guard;
        }
        if let Some(taxonomy) = &self.taxonomy {
            if taxonomy.has_theme(&taxonomy.default_theme) {
                out.defaults.taxonomy = taxonomy.clone();
            } else {
                tracing::warn!(
                    default_theme = %taxonomy.default_theme,
                    "taxonomy default theme is not one of its themes; keeping built-in taxonomy"
                );
            }
        }

        if let Some(ms) = env_parse::<u64>("BB_LEASE_TIMEOUT_MS") {
            out.lease_timeout_ms = ms;
        }
        if let Some(n) = env_parse::<u32>("BB_LOCK_ATTEMPTS") {
            out.retry.max_attempts = n;
        }
        if let Some(locked) = env_bool("BB_ROLLOVER_LOCKED") {
            out.rollover_guard = if locked {
                RolloverGuard::Locked
            } else {
                RolloverGuard::BestEffort
            };
        }

        out.lease_timeout_ms = out.lease_timeout_ms.max(MIN_LEASE_TIMEOUT_MS);
        out.retry.max_attempts = out.retry.max_attempts.max(1);
        out
    }
}

/// Resolve, load and layer the configuration. A missing file means
/// defaults; an invalid one is logged and ignored.
pub fn load_effective_config() -> TrackerConfig {
    let path = std::env::var("BB_CONFIG")
        .ok()
        .map(PathBuf::from)
        .or_else(|| resolve_config_path("configs/bb.toml"));
    let cfg = match path {
        Some(p) => match load_config(&p) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::error!("invalid config {}: {}", p.display(), e);
                Config::default()
            }
        },
        None => Config::default(),
    };
    cfg.effective()
}

/// Resolve a config file path independent of the current working directory.
///
/// Search order (first existing wins): `BB_CONFIG_DIR`, the executable's
/// directory and its parent, then the current working directory. An
/// absolute `rel` is returned if it exists.
pub fn resolve_config_path(rel: &str) -> Option<PathBuf> {
    let rel_path = Path::new(rel);
    if rel_path.is_absolute() {
        return rel_path.exists().then(|| rel_path.to_path_buf());
    }

    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Ok(cfg_dir) = std::env::var("BB_CONFIG_DIR") {
        if !cfg_dir.trim().is_empty() {
            candidates.push(PathBuf::from(cfg_dir));
        }
    }
    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            candidates.push(exe_dir.to_path_buf());
            if let Some(parent) = exe_dir.parent() {
                candidates.push(parent.to_path_buf());
            }
        }
    }
    if let Ok(cwd) = std::env::current_dir() {
        candidates.push(cwd);
    }

    candidates
        .into_iter()
        .map(|base| base.join(rel))
        .find(|p| p.exists())
}
