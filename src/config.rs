use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{AppError, Result};
use crate::language::Language;
use crate::policy::AutonomyLevel;
use crate::workflow::stage::Stage;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Browser origins allowed to call the API. Empty disables CORS.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

#[derive(Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

// Manual Debug impl to avoid leaking the API key
impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("api_url", &self.api_url)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Backoff schedule for transient generation failures.
#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl RetryConfig {
    /// Delay before retry number `attempt` (1-based), doubling up to the cap.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        let millis = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(millis)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkflowConfig {
    /// Generations allowed per stage before policy denials escalate to a human.
    #[serde(default = "default_max_stage_attempts")]
    pub max_stage_attempts: u32,
    #[serde(default)]
    pub default_language: Language,
    #[serde(default)]
    pub default_autonomy: AutonomyLevel,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_store_dir")]
    pub base_dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PolicyConfig {
    /// Overrides for the per-autonomy-level thresholds, keyed by level name.
    #[serde(default)]
    pub thresholds: HashMap<String, f64>,
    /// Per-stage thresholds keyed by stage name; these win over the level's threshold.
    #[serde(default)]
    pub stage_thresholds: HashMap<String, f64>,
    #[serde(default)]
    pub weights: PolicyWeights,
}

impl PolicyConfig {
    pub fn threshold(&self, stage: Stage, level: AutonomyLevel) -> f64 {
        self.stage_thresholds
            .get(stage.as_str())
            .or_else(|| self.thresholds.get(level.as_str()))
            .copied()
            .unwrap_or_else(|| level.default_threshold())
    }
}

/// Relative weight of each scorecard component in the overall score.
#[derive(Debug, Deserialize, Clone)]
pub struct PolicyWeights {
    #[serde(default = "default_weight")]
    pub completeness: f64,
    #[serde(default = "default_weight")]
    pub consistency: f64,
    #[serde(default = "default_weight")]
    pub security: f64,
    #[serde(default = "default_weight")]
    pub best_practices: f64,
}

impl Default for PolicyWeights {
    fn default() -> Self {
        Self {
            completeness: default_weight(),
            consistency: default_weight(),
            security: default_weight(),
            best_practices: default_weight(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            allowed_origins: Vec::new(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            api_url: default_api_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_stage_attempts: default_max_stage_attempts(),
            default_language: Language::default(),
            default_autonomy: AutonomyLevel::default(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_dir: default_store_dir(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_max_tokens() -> u32 {
    8192
}

fn default_api_url() -> String {
    "https://api.anthropic.com/v1/messages".to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    2000
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_max_stage_attempts() -> u32 {
    3
}

fn default_store_dir() -> PathBuf {
    PathBuf::from("auto_saves")
}

fn default_weight() -> f64 {
    1.0
}

impl AppConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        // Load from file if specified
        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path));
        } else {
            builder = builder.add_source(config::File::with_name("sdlc-wizard").required(false));
        }

        // Environment variable overrides with SDLC_WIZARD_ prefix
        builder = builder.add_source(
            config::Environment::with_prefix("SDLC_WIZARD")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| AppError::Config(e.to_string()))?;

        let config: AppConfig = config
            .try_deserialize()
            .map_err(|e| AppError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(AppError::Config("retry.max_attempts must be at least 1".into()));
        }
        if self.workflow.max_stage_attempts == 0 {
            return Err(AppError::Config(
                "workflow.max_stage_attempts must be at least 1".into(),
            ));
        }
        // Lookups are by exact key, so aliases and ungated stages are rejected here
        for key in self.policy.thresholds.keys() {
            let known = AutonomyLevel::all()
                .iter()
                .any(|level| level.uses_policy() && level.as_str() == key);
            if !known {
                return Err(AppError::Config(format!(
                    "Unknown autonomy level in policy.thresholds: {key:?} (expected semi_auto, full_auto or expert_auto)"
                )));
            }
        }
        for key in self.policy.stage_thresholds.keys() {
            let known = Stage::all()
                .iter()
                .any(|stage| stage.is_gated() && stage.as_str() == key);
            if !known {
                let gated: Vec<&str> = Stage::all()
                    .iter()
                    .filter(|stage| stage.is_gated())
                    .map(|stage| stage.as_str())
                    .collect();
                return Err(AppError::Config(format!(
                    "Unknown gated stage in policy.stage_thresholds: {key:?} (expected one of {})",
                    gated.join(", ")
                )));
            }
        }
        let thresholds = self
            .policy
            .thresholds
            .values()
            .chain(self.policy.stage_thresholds.values());
        for value in thresholds {
            if !(0.0..=1.0).contains(value) {
                return Err(AppError::Config(format!(
                    "policy threshold {value} is outside [0, 1]"
                )));
            }
        }
        let w = &self.policy.weights;
        if [w.completeness, w.consistency, w.security, w.best_practices]
            .iter()
            .any(|v| *v < 0.0 || !v.is_finite())
        {
            return Err(AppError::Config("policy weights must be finite and non-negative".into()));
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            llm: LlmConfig::default(),
            retry: RetryConfig::default(),
            workflow: WorkflowConfig::default(),
            store: StoreConfig::default(),
            policy: PolicyConfig::default(),
        }
    }
}
