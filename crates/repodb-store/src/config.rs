use std::path::Path;
use std::time::Duration;

use repodb_remote::GitHubConfig;
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::retry::RetryPolicy;

/// Settings for a storage engine backed by a hosted repository.
///
/// ```toml
/// owner = "acme"
/// repo = "inventory"
/// branch = "main"
/// base_path = "data"
/// cache_ttl_ms = 0
///
/// [retry]
/// max_retries = 5
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub owner: String,
    pub repo: String,
    #[serde(skip_serializing)]
    pub token: Option<String>,
    pub branch: String,
    pub api_url: String,
    /// Directory under which collections live.
    pub base_path: String,
    /// How long a cached read is trusted without revalidation.
    /// `None` disables expiry; `Some(0)` revalidates on every read.
    pub cache_ttl_ms: Option<u64>,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub retry: RetryConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            owner: String::new(),
            repo: String::new(),
            token: None,
            branch: "main".into(),
            api_url: "https://api.github.com".into(),
            base_path: "data".into(),
            cache_ttl_ms: Some(0),
            user_agent: concat!("repodb/", env!("CARGO_PKG_VERSION")).into(),
            timeout_ms: 30_000,
            retry: RetryConfig::default(),
        }
    }
}

impl StoreConfig {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            ..Self::default()
        }
    }

    pub fn from_toml_str(source: &str) -> StoreResult<Self> {
        let config: Self =
            toml::from_str(source).map_err(|e| StoreError::Config(e.message().to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&source)
    }

    /// Reject settings no remote could be reached with.
    pub fn validate(&self) -> StoreResult<()> {
        if self.owner.is_empty() || self.repo.is_empty() {
            return Err(StoreError::Config("owner and repo are required".into()));
        }
        if self.branch.is_empty() {
            return Err(StoreError::Config("branch must not be empty".into()));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(StoreError::Config(
                "retry.base_delay_ms exceeds retry.max_delay_ms".into(),
            ));
        }
        Ok(())
    }

    pub fn cache_ttl(&self) -> Option<Duration> {
        self.cache_ttl_ms.map(Duration::from_millis)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry.policy()
    }

    pub fn github(&self) -> GitHubConfig {
        GitHubConfig {
            api_url: self.api_url.clone(),
            owner: self.owner.clone(),
            repo: self.repo.clone(),
            branch: self.branch.clone(),
            token: self.token.clone(),
            user_agent: self.user_agent.clone(),
            timeout: Duration::from_millis(self.timeout_ms),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub enabled: bool,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 10_000,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        if !self.enabled {
            return RetryPolicy::disabled();
        }
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}
