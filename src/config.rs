use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::query::{DetectionRule, ANY_LENGTH, FULL_CONFIDENCE};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub service: ServiceConfig,
    pub case: CaseConfig,
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
    #[serde(default)]
    pub query: QueryConfig,
    pub locations: LocationsConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub base_url: String,
    /// OAuth client-credentials token endpoint. When absent, the token
    /// is read from the environment variable named by `token_env`.
    #[serde(default)]
    pub token_url: Option<String>,
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_client_id_env")]
    pub client_id_env: String,
    #[serde(default = "default_client_secret_env")]
    pub client_secret_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_token_env() -> String {
    "DSC_API_TOKEN".to_string()
}
fn default_client_id_env() -> String {
    "DSC_CLIENT_ID".to_string()
}
fn default_client_secret_env() -> String {
    "DSC_CLIENT_SECRET".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct CaseConfig {
    pub name: String,
    #[serde(default)]
    pub search_name: Option<String>,
}

impl CaseConfig {
    /// Search display name; defaults to "<case name> Search".
    pub fn search_name(&self) -> String {
        self.search_name
            .clone()
            .unwrap_or_else(|| format!("{} Search", self.name))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RuleConfig {
    pub id: String,
    #[serde(default = "default_confidence")]
    pub confidence: String,
    #[serde(default = "default_length")]
    pub length: String,
}

fn default_confidence() -> String {
    FULL_CONFIDENCE.to_string()
}
fn default_length() -> String {
    ANY_LENGTH.to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct QueryConfig {
    #[serde(default)]
    pub supplemental_ids: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LocationsConfig {
    pub names: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ResolverConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

fn default_concurrency() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct PollingConfig {
    #[serde(default = "default_init_max_wait_secs")]
    pub init_max_wait_secs: u64,
    #[serde(default = "default_init_poll_interval_secs")]
    pub init_poll_interval_secs: u64,
    #[serde(default = "default_progress_max_wait_secs")]
    pub progress_max_wait_secs: u64,
    #[serde(default = "default_progress_poll_interval_secs")]
    pub progress_poll_interval_secs: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            init_max_wait_secs: default_init_max_wait_secs(),
            init_poll_interval_secs: default_init_poll_interval_secs(),
            progress_max_wait_secs: default_progress_max_wait_secs(),
            progress_poll_interval_secs: default_progress_poll_interval_secs(),
        }
    }
}

impl PollingConfig {
    pub fn init_max_wait(&self) -> Duration {
        Duration::from_secs(self.init_max_wait_secs)
    }
    pub fn init_poll_interval(&self) -> Duration {
        Duration::from_secs(self.init_poll_interval_secs)
    }
    pub fn progress_max_wait(&self) -> Duration {
        Duration::from_secs(self.progress_max_wait_secs)
    }
    pub fn progress_poll_interval(&self) -> Duration {
        Duration::from_secs(self.progress_poll_interval_secs)
    }
}

fn default_init_max_wait_secs() -> u64 {
    300
}
fn default_init_poll_interval_secs() -> u64 {
    10
}
fn default_progress_max_wait_secs() -> u64 {
    3600
}
fn default_progress_poll_interval_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./reports")
}

impl Config {
    /// Detection rules in query-builder form.
    pub fn detection_rules(&self) -> Vec<DetectionRule> {
        self.rules
            .iter()
            .map(|r| DetectionRule {
                id: r.id.clone(),
                length_range: r.length.clone(),
                confidence_range: r.confidence.clone(),
            })
            .collect()
    }

    /// Minimal in-memory config for tests.
    pub fn minimal() -> Self {
        Self {
            service: ServiceConfig {
                base_url: "https://compliance.invalid/api/v1".to_string(),
                token_url: None,
                token_env: default_token_env(),
                client_id_env: default_client_id_env(),
                client_secret_env: default_client_secret_env(),
                timeout_secs: default_timeout_secs(),
                max_retries: default_max_retries(),
            },
            case: CaseConfig {
                name: "Test Case".to_string(),
                search_name: None,
            },
            rules: vec![RuleConfig {
                id: "rule-1".to_string(),
                confidence: default_confidence(),
                length: default_length(),
            }],
            query: QueryConfig::default(),
            locations: LocationsConfig {
                names: vec!["Site1".to_string()],
            },
            resolver: ResolverConfig::default(),
            polling: PollingConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate service
    if config.service.base_url.trim().is_empty() {
        anyhow::bail!("service.base_url must not be empty");
    }
    config.service.base_url = config.service.base_url.trim_end_matches('/').to_string();

    // Validate rules
    if config.rules.is_empty() {
        anyhow::bail!("at least one [[rules]] entry is required");
    }
    for rule in &config.rules {
        if rule.id.trim().is_empty() {
            anyhow::bail!("rules.id must not be empty");
        }
    }

    // Validate locations
    if config.locations.names.is_empty() {
        anyhow::bail!("locations.names must list at least one location");
    }

    // Validate resolver
    if !(1..=16).contains(&config.resolver.concurrency) {
        anyhow::bail!("resolver.concurrency must be in 1..=16");
    }

    // Validate polling: intervals positive and within their budgets
    let p = &config.polling;
    if p.init_poll_interval_secs == 0 || p.progress_poll_interval_secs == 0 {
        anyhow::bail!("polling intervals must be > 0");
    }
    if p.init_poll_interval_secs > p.init_max_wait_secs {
        anyhow::bail!("polling.init_poll_interval_secs must not exceed polling.init_max_wait_secs");
    }
    if p.progress_poll_interval_secs > p.progress_max_wait_secs {
        anyhow::bail!(
            "polling.progress_poll_interval_secs must not exceed polling.progress_max_wait_secs"
        );
    }

    Ok(config)
}
