use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{SteadyhandError, SteadyhandResult};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub oracle: OracleConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub pointer: PointerConfig,
    #[serde(default)]
    pub verification: VerificationConfig,
    #[serde(default)]
    pub regeneration: RegenerationConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LlmConfig {
    pub active_provider: String,
    pub providers: HashMap<String, ProviderEntry>,
    /// Role-to-model mapping. If a role is absent, falls back to active_provider defaults.
    #[serde(default)]
    pub roles: RolesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub display_name: String,
    /// Full chat-completions endpoint URL.
    pub api_base: String,
    /// Default model for this provider (used as fallback when no role config exists).
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Optional API key stored in config.toml (falls back to env var STEADYHAND_<ID>_API_KEY).
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Maps oracle roles to specific provider+model combinations.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RolesConfig {
    /// Proposes and regenerates `move to (x, y)` commands.
    pub planner: Option<RoleEntry>,
    /// Judges pointer placement and task outcomes.
    pub verifier: Option<RoleEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleEntry {
    /// Must match a key under [llm.providers.*].
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub stream: bool,
    pub temperature: Option<f64>,
}

fn default_temperature() -> f64 {
    0.1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    /// Caller-side bound on every oracle round trip.
    #[serde(default = "default_oracle_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_oracle_timeout_secs() -> u64 {
    60
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_oracle_timeout_secs(),
        }
    }
}

impl OracleConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Image space: the fixed resolution every snapshot is scaled to before the oracle sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    #[serde(default = "default_image_width")]
    pub image_width: u32,
    #[serde(default = "default_image_height")]
    pub image_height: u32,
    /// Monitor index; `None` selects the primary monitor.
    #[serde(default)]
    pub monitor: Option<usize>,
}

fn default_image_width() -> u32 {
    1000
}

fn default_image_height() -> u32 {
    600
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            image_width: default_image_width(),
            image_height: default_image_height(),
            monitor: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointerConfig {
    #[serde(default = "default_movement_speed")]
    pub movement_speed: f64,
    #[serde(default = "default_smooth_steps")]
    pub smooth_steps: u32,
    /// Pause after each waypoint at movement_speed 1.0.
    #[serde(default = "default_step_interval_ms")]
    pub step_interval_ms: u64,
    #[serde(default = "default_click_settle_ms")]
    pub click_settle_ms: u64,
    #[serde(default = "default_double_click_gap_ms")]
    pub double_click_gap_ms: u64,
    #[serde(default = "default_idle_poll_ms")]
    pub idle_poll_ms: u64,
    /// Pixels of slack when deciding whether a move landed.
    #[serde(default = "default_tolerance_px")]
    pub tolerance_px: f64,
    /// 0 disables the keep-alive pinger.
    #[serde(default = "default_keepalive_ms")]
    pub keepalive_ms: u64,
    #[serde(default = "default_true")]
    pub sync_position: bool,
    #[serde(default = "default_true")]
    pub smooth: bool,
}

fn default_movement_speed() -> f64 {
    1.0
}

fn default_smooth_steps() -> u32 {
    30
}

fn default_step_interval_ms() -> u64 {
    8
}

fn default_click_settle_ms() -> u64 {
    200
}

fn default_double_click_gap_ms() -> u64 {
    100
}

fn default_idle_poll_ms() -> u64 {
    10
}

fn default_tolerance_px() -> f64 {
    5.0
}

fn default_keepalive_ms() -> u64 {
    5000
}

fn default_true() -> bool {
    true
}

impl Default for PointerConfig {
    fn default() -> Self {
        Self {
            movement_speed: default_movement_speed(),
            smooth_steps: default_smooth_steps(),
            step_interval_ms: default_step_interval_ms(),
            click_settle_ms: default_click_settle_ms(),
            double_click_gap_ms: default_double_click_gap_ms(),
            idle_poll_ms: default_idle_poll_ms(),
            tolerance_px: default_tolerance_px(),
            keepalive_ms: default_keepalive_ms(),
            sync_position: true,
            smooth: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationConfig {
    /// Minimum confidence that the pointer sits on the intended target.
    #[serde(default = "default_position_threshold")]
    pub position_threshold: u8,
    /// Minimum confidence that the task's expected outcome is visible.
    #[serde(default = "default_completion_threshold")]
    pub completion_threshold: u8,
}

fn default_position_threshold() -> u8 {
    90
}

fn default_completion_threshold() -> u8 {
    75
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            position_threshold: default_position_threshold(),
            completion_threshold: default_completion_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegenerationConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Write every attempt record to a JSONL session journal.
    #[serde(default)]
    pub journal: bool,
}

fn default_max_attempts() -> u32 {
    3
}

impl Default for RegenerationConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            journal: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay `d`; retry n waits `d * 2^(n-1)`.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_scheduler_idle_ms")]
    pub idle_poll_ms: u64,
    #[serde(default = "default_join_timeout_ms")]
    pub join_timeout_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    2000
}

fn default_scheduler_idle_ms() -> u64 {
    100
}

fn default_join_timeout_ms() -> u64 {
    10_000
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            idle_poll_ms: default_scheduler_idle_ms(),
            join_timeout_ms: default_join_timeout_ms(),
        }
    }
}

fn resolve_config_path(explicit: Option<&Path>) -> SteadyhandResult<PathBuf> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        return Err(SteadyhandError::Config(format!(
            "config file {} does not exist",
            path.display()
        )));
    }

    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            let candidate = parent.join("config.toml");
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "config found next to executable");
                return Ok(candidate);
            }
        }
    }

    let cwd = std::env::current_dir()?;
    let candidate = cwd.join("config.toml");
    if candidate.exists() {
        tracing::debug!(path = %candidate.display(), "config found in working directory");
        return Ok(candidate);
    }

    Err(SteadyhandError::Config(
        "config.toml not found next to executable or in working directory".into(),
    ))
}

pub fn load_config(explicit: Option<&Path>) -> SteadyhandResult<AppConfig> {
    let path = resolve_config_path(explicit)?;
    let content = std::fs::read_to_string(&path)?;
    let config = parse_config(&content)?;
    tracing::info!(path = %path.display(), provider = %config.llm.active_provider, "config loaded");
    Ok(config)
}

pub fn parse_config(content: &str) -> SteadyhandResult<AppConfig> {
    let config: AppConfig = toml::from_str(content)?;
    config.validate()?;
    Ok(config)
}

pub fn save_config(config: &AppConfig, path: &Path) -> SteadyhandResult<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    tracing::info!(path = %path.display(), "config saved");
    Ok(())
}

impl AppConfig {
    pub fn validate(&self) -> SteadyhandResult<()> {
        if self.capture.image_width == 0 || self.capture.image_height == 0 {
            return Err(SteadyhandError::Config(
                "capture.image_width and capture.image_height must be > 0".into(),
            ));
        }
        if !(self.pointer.movement_speed > 0.0) {
            return Err(SteadyhandError::Config(
                "pointer.movement_speed must be > 0".into(),
            ));
        }
        if self.verification.position_threshold > 100 || self.verification.completion_threshold > 100 {
            return Err(SteadyhandError::Config(
                "verification thresholds are percentages (0-100)".into(),
            ));
        }
        Ok(())
    }
}
