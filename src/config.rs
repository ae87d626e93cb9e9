//! Workspace configuration (`.branchlink/config.toml`)
//!
//! Every field has a default, so a missing file is a valid configuration.
//! Credentials are never stored here; the file names the environment
//! variables that hold them.

use crate::automation::accounting::{AccountingCredentials, AccountingSystem, HttpAccounting};
use crate::detect::native::ActivationPolicy;
use crate::repo::{BranchReadMode, DEFAULT_DEPTH};
use crate::ticket::{
    CorrelatorOptions, IssueTracker, JiraClient, JiraCredentials, UnconfiguredTracker,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Environment variable {0} is not set")]
    MissingEnv(String),

    #[error("Cannot build {service} client: {reason}")]
    Client { service: &'static str, reason: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub discovery: DiscoveryConfig,
    pub detection: DetectionConfig,
    pub tracker: TrackerConfig,
    pub accounting: AccountingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiscoveryConfig {
    /// How many directory levels below each workspace root are searched
    pub depth: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            depth: DEFAULT_DEPTH,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DetectionConfig {
    pub branch_reader: BranchReadMode,
    /// Use the git-hook integration when hooks are installed
    pub native: bool,
    pub activation_attempts: u32,
    pub activation_backoff_ms: u64,
    pub activation_max_backoff_ms: u64,
    pub command_timeout_ms: u64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            branch_reader: BranchReadMode::default(),
            native: true,
            activation_attempts: 5,
            activation_backoff_ms: 500,
            activation_max_backoff_ms: 8000,
            command_timeout_ms: 5000,
        }
    }
}

impl DetectionConfig {
    pub fn activation_policy(&self) -> ActivationPolicy {
        ActivationPolicy {
            max_attempts: self.activation_attempts,
            initial_backoff: Duration::from_millis(self.activation_backoff_ms),
            max_backoff: Duration::from_millis(self.activation_max_backoff_ms),
        }
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrackerConfig {
    /// Jira site, e.g. `https://example.atlassian.net`. Unset disables correlation.
    pub base_url: Option<String>,
    pub email_env: String,
    pub token_env: String,
    pub request_timeout_ms: u64,
    pub strict_search_match: bool,
    pub enrichment_ttl_secs: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            email_env: "JIRA_EMAIL".to_string(),
            token_env: "JIRA_API_TOKEN".to_string(),
            request_timeout_ms: 10_000,
            strict_search_match: true,
            enrichment_ttl_secs: 60,
        }
    }
}

impl TrackerConfig {
    pub fn correlator_options(&self) -> CorrelatorOptions {
        CorrelatorOptions {
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            strict_search_match: self.strict_search_match,
            enrichment_ttl: Duration::from_secs(self.enrichment_ttl_secs),
        }
    }

    /// The configured tracker, or [`UnconfiguredTracker`] without a base URL
    pub fn build(&self) -> Result<Arc<dyn IssueTracker>> {
        let Some(base_url) = &self.base_url else {
            tracing::info!("no issue tracker configured, ticket correlation disabled");
            return Ok(Arc::new(UnconfiguredTracker));
        };
        let credentials = JiraCredentials {
            email: env_var(&self.email_env)?,
            token: env_var(&self.token_env)?,
        };
        let client = JiraClient::new(
            base_url,
            credentials,
            Duration::from_millis(self.request_timeout_ms),
        )
        .map_err(|e| ConfigError::Client {
            service: "issue tracker",
            reason: e.to_string(),
        })?;
        Ok(Arc::new(client))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AccountingConfig {
    /// API root, e.g. `https://api.productive.io/api/v2`. Unset disables secondary logging.
    pub base_url: Option<String>,
    pub token_env: String,
    pub organization_env: String,
    pub request_timeout_ms: u64,
}

impl Default for AccountingConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            token_env: "ACCOUNTING_API_TOKEN".to_string(),
            organization_env: "ACCOUNTING_ORGANIZATION_ID".to_string(),
            request_timeout_ms: 10_000,
        }
    }
}

impl AccountingConfig {
    pub fn build(&self) -> Result<Option<Arc<dyn AccountingSystem>>> {
        let Some(base_url) = &self.base_url else {
            return Ok(None);
        };
        let credentials = AccountingCredentials {
            token: env_var(&self.token_env)?,
            organization_id: env_var(&self.organization_env)?,
        };
        let client = HttpAccounting::new(
            base_url,
            credentials,
            Duration::from_millis(self.request_timeout_ms),
        )
        .map_err(|e| ConfigError::Client {
            service: "accounting",
            reason: e.to_string(),
        })?;
        Ok(Some(Arc::new(client)))
    }
}

impl Config {
    /// Default location for a workspace
    pub fn default_path(workspace: &Path) -> PathBuf {
        workspace.join(".branchlink").join("config.toml")
    }

    /// Load `path`; a missing file yields defaults
    pub fn load(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        Self::parse(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

fn env_var(name: &str) -> Result<String> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::MissingEnv(name.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_is_default() {
        let tmp = TempDir::new().unwrap();
        let config = Config::load(&Config::default_path(tmp.path())).unwrap();
        assert_eq!(config, Config::default());
        assert!(config.detection.native);
        assert!(config.tracker.strict_search_match);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config = Config::parse(
            r#"
            [detection]
            branch_reader = "subprocess"
            activation_attempts = 2

            [tracker]
            base_url = "https://example.atlassian.net"
            enrichment_ttl_secs = 0
            "#,
        )
        .unwrap();

        assert_eq!(config.detection.branch_reader, BranchReadMode::Subprocess);
        assert_eq!(config.detection.activation_policy().max_attempts, 2);
        assert_eq!(config.detection.command_timeout(), Duration::from_secs(5));
        assert_eq!(config.tracker.email_env, "JIRA_EMAIL");
        assert!(config.tracker.correlator_options().enrichment_ttl.is_zero());
        assert_eq!(config.discovery.depth, DEFAULT_DEPTH);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(Config::parse("[detection]\npolling = true\n").is_err());
    }

    #[test]
    fn invalid_file_reports_path() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[discovery]\ndepth = \"deep\"\n").unwrap();
        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains("config.toml"));
    }

    #[test]
    fn tracker_without_url_is_unconfigured() {
        assert!(TrackerConfig::default().build().is_ok());
        assert!(AccountingConfig::default().build().unwrap().is_none());
    }

    #[test]
    fn tracker_needs_credentials() {
        let config = TrackerConfig {
            base_url: Some("https://example.atlassian.net".to_string()),
            email_env: "BRANCHLINK_TEST_UNSET_EMAIL".to_string(),
            token_env: "BRANCHLINK_TEST_UNSET_TOKEN".to_string(),
            ..TrackerConfig::default()
        };
        assert!(matches!(config.build(), Err(ConfigError::MissingEnv(name)) if name == "BRANCHLINK_TEST_UNSET_EMAIL"));
    }
}
