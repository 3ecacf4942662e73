//! Service configuration loaded from the environment.
//!
//! Every setting has a default except the credentials, which stay `None`
//! until set. Components that need a credential fail when they are built,
//! so an API-only process runs without LLM or Notion keys.

use std::time::Duration;

use thiserror::Error;

use crate::document::{NotionConfig, DEFAULT_NOTION_VERSION, DEFAULT_TITLE_PROP};
use crate::llm::DEFAULT_API_BASE;
use crate::scheduler::store::{DEFAULT_JOB_TTL, DEFAULT_LEASE};
use crate::scheduler::{StoreConfig, WorkerPoolConfig};

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Settings for the API server and the workers.
#[derive(Debug, Clone)]
pub struct AppConfig {
    // Storage
    pub redis_url: String,
    /// How long a job record lives after submission.
    pub job_ttl: Duration,
    /// How long a running job survives without a heartbeat.
    pub job_lease: Duration,
    /// Upper bound on one blocking dequeue wait.
    pub queue_poll: Duration,

    // Security
    /// Shared secret expected in `X-API-Key`. Unset rejects every request.
    pub api_key: Option<String>,

    // LLM
    pub openai_api_base: String,
    pub openai_api_key: Option<String>,
    pub openai_project_id: Option<String>,
    pub model_plan: String,
    pub model_research: String,

    // Notion
    pub notion_integration_secret: Option<String>,
    pub notion_database_id: Option<String>,
    pub notion_title_prop: String,
    pub notion_due_prop: Option<String>,
    pub notion_version: String,

    // Workers
    pub worker_count: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379/0".to_string(),
            job_ttl: DEFAULT_JOB_TTL,
            job_lease: DEFAULT_LEASE,
            queue_poll: Duration::from_secs(30),

            api_key: None,

            openai_api_base: DEFAULT_API_BASE.to_string(),
            openai_api_key: None,
            openai_project_id: None,
            model_plan: "gpt-4o-mini".to_string(),
            model_research: "gpt-4o".to_string(),

            notion_integration_secret: None,
            notion_database_id: None,
            notion_title_prop: DEFAULT_TITLE_PROP.to_string(),
            notion_due_prop: None,
            notion_version: DEFAULT_NOTION_VERSION.to_string(),

            worker_count: 1,
        }
    }
}

impl AppConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `REDIS_URL`: Redis connection URL (default: redis://localhost:6379/0)
    /// - `JOB_TTL_SECONDS`: Job record lifetime (default: 21600)
    /// - `JOB_LEASE_SECONDS`: Running-job lease (default: 120)
    /// - `QUEUE_POLL_SECONDS`: Dequeue wait bound (default: 30)
    /// - `API_KEY`: Shared secret for the HTTP API
    /// - `OPENAI_API_BASE`: Chat-completions base URL (default: https://api.openai.com/v1)
    /// - `OPENAI_API_KEY`, `OPENAI_PROJECT_ID`: LLM credentials
    /// - `MODEL_PLAN`: Planning model (default: gpt-4o-mini)
    /// - `MODEL_RESEARCH`: Research model (default: gpt-4o)
    /// - `NOTION_INTEGRATION_SECRET`, `NOTION_DATABASE_ID`: Notion target
    /// - `NOTION_TITLE_PROP`: Title property name (default: Name)
    /// - `NOTION_DUE_PROP`: Optional date property for the due date
    /// - `NOTION_VERSION`: API version header (default: 2022-06-28)
    /// - `WORKER_COUNT`: Workers per worker process (default: 1)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds configuration from an arbitrary key lookup.
    ///
    /// Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        // Storage settings
        if let Some(val) = get("REDIS_URL") {
            config.redis_url = val;
        }

        if let Some(val) = get("JOB_TTL_SECONDS") {
            config.job_ttl = Duration::from_secs(parse_env_value(&val, "JOB_TTL_SECONDS")?);
        }

        if let Some(val) = get("JOB_LEASE_SECONDS") {
            config.job_lease = Duration::from_secs(parse_env_value(&val, "JOB_LEASE_SECONDS")?);
        }

        if let Some(val) = get("QUEUE_POLL_SECONDS") {
            config.queue_poll = Duration::from_secs(parse_env_value(&val, "QUEUE_POLL_SECONDS")?);
        }

        config.api_key = get("API_KEY");

        // LLM settings
        if let Some(val) = get("OPENAI_API_BASE") {
            config.openai_api_base = val;
        }
        config.openai_api_key = get("OPENAI_API_KEY");
        config.openai_project_id = get("OPENAI_PROJECT_ID");

        if let Some(val) = get("MODEL_PLAN") {
            config.model_plan = val;
        }

        if let Some(val) = get("MODEL_RESEARCH") {
            config.model_research = val;
        }

        // Notion settings
        config.notion_integration_secret = get("NOTION_INTEGRATION_SECRET");
        config.notion_database_id = get("NOTION_DATABASE_ID");

        if let Some(val) = get("NOTION_TITLE_PROP") {
            config.notion_title_prop = val;
        }
        config.notion_due_prop = get("NOTION_DUE_PROP");

        if let Some(val) = get("NOTION_VERSION") {
            config.notion_version = val;
        }

        if let Some(val) = get("WORKER_COUNT") {
            config.worker_count = parse_env_value(&val, "WORKER_COUNT")?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.redis_url.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "redis_url cannot be empty".to_string(),
            ));
        }

        if self.job_ttl.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "job_ttl must be greater than 0".to_string(),
            ));
        }

        if self.job_lease.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "job_lease must be greater than 0".to_string(),
            ));
        }

        if self.job_lease >= self.job_ttl {
            return Err(ConfigError::ValidationFailed(
                "job_lease must be shorter than job_ttl".to_string(),
            ));
        }

        if self.queue_poll.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "queue_poll must be greater than 0".to_string(),
            ));
        }

        if self.model_plan.is_empty() || self.model_research.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "model_plan and model_research cannot be empty".to_string(),
            ));
        }

        if self.worker_count == 0 {
            return Err(ConfigError::ValidationFailed(
                "worker_count must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Store settings derived from the TTL and lease.
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig::default()
            .with_ttl(self.job_ttl)
            .with_lease(self.job_lease)
    }

    /// Worker pool settings for `num_workers` workers.
    pub fn pool_config(&self, num_workers: usize) -> WorkerPoolConfig {
        WorkerPoolConfig::new(num_workers)
            .with_poll_interval(self.queue_poll)
            .with_lease(self.job_lease)
    }

    /// Notion target settings.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if the secret or database id is
    /// unset.
    pub fn notion_config(&self) -> Result<NotionConfig, ConfigError> {
        let secret = self
            .notion_integration_secret
            .clone()
            .ok_or_else(|| ConfigError::MissingEnvVar("NOTION_INTEGRATION_SECRET".to_string()))?;
        let database_id = self
            .notion_database_id
            .clone()
            .ok_or_else(|| ConfigError::MissingEnvVar("NOTION_DATABASE_ID".to_string()))?;

        Ok(NotionConfig::new(secret, database_id)
            .with_title_prop(self.notion_title_prop.clone())
            .with_due_prop(self.notion_due_prop.clone())
            .with_version(self.notion_version.clone()))
    }

    /// Builder method to set the Redis URL.
    pub fn with_redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = url.into();
        self
    }

    /// Builder method to set the job TTL.
    pub fn with_job_ttl(mut self, ttl: Duration) -> Self {
        self.job_ttl = ttl;
        self
    }

    /// Builder method to set the job lease.
    pub fn with_job_lease(mut self, lease: Duration) -> Self {
        self.job_lease = lease;
        self
    }

    /// Builder method to set the API key.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Builder method to set the worker count.
    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.redis_url, "redis://localhost:6379/0");
        assert_eq!(config.job_ttl, Duration::from_secs(21_600));
        assert_eq!(config.job_lease, Duration::from_secs(120));
        assert_eq!(config.model_plan, "gpt-4o-mini");
        assert_eq!(config.model_research, "gpt-4o");
        assert_eq!(config.notion_title_prop, "Name");
        assert_eq!(config.notion_version, "2022-06-28");
        assert!(config.api_key.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lookup_reads_values() {
        let config = AppConfig::from_lookup(lookup(&[
            ("REDIS_URL", "redis://cache:6379/2"),
            ("JOB_TTL_SECONDS", "3600"),
            ("API_KEY", "secret"),
            ("MODEL_PLAN", "gpt-4.1-mini"),
            ("NOTION_DUE_PROP", "Due"),
            ("WORKER_COUNT", "4"),
        ]))
        .expect("config");

        assert_eq!(config.redis_url, "redis://cache:6379/2");
        assert_eq!(config.job_ttl, Duration::from_secs(3600));
        assert_eq!(config.api_key.as_deref(), Some("secret"));
        assert_eq!(config.model_plan, "gpt-4.1-mini");
        assert_eq!(config.notion_due_prop.as_deref(), Some("Due"));
        assert_eq!(config.worker_count, 4);
    }

    #[test]
    fn test_empty_values_count_as_unset() {
        let config = AppConfig::from_lookup(lookup(&[("API_KEY", ""), ("MODEL_PLAN", "  ")]))
            .expect("config");
        assert!(config.api_key.is_none());
        assert_eq!(config.model_plan, "gpt-4o-mini");
    }

    #[test]
    fn test_invalid_number() {
        let err = AppConfig::from_lookup(lookup(&[("JOB_TTL_SECONDS", "six hours")]))
            .expect_err("invalid");
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "JOB_TTL_SECONDS"));
    }

    #[test]
    fn test_validation_lease_must_fit_in_ttl() {
        let config = AppConfig::default()
            .with_job_ttl(Duration::from_secs(60))
            .with_job_lease(Duration::from_secs(120));
        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("job_lease"));
    }

    #[test]
    fn test_validation_zero_workers() {
        let result = AppConfig::default().with_worker_count(0).validate();
        assert!(result.unwrap_err().to_string().contains("worker_count"));
    }

    #[test]
    fn test_notion_config_requires_credentials() {
        let err = AppConfig::default().notion_config().expect_err("missing");
        assert!(err.to_string().contains("NOTION_INTEGRATION_SECRET"));

        let config = AppConfig::from_lookup(lookup(&[
            ("NOTION_INTEGRATION_SECRET", "ntn_x"),
            ("NOTION_DATABASE_ID", "db-1"),
            ("NOTION_TITLE_PROP", "Task"),
        ]))
        .expect("config");
        let notion = config.notion_config().expect("notion");
        assert_eq!(notion.database_id, "db-1");
        assert_eq!(notion.title_prop, "Task");
        assert!(notion.due_prop.is_none());
    }

    #[test]
    fn test_pool_config_follows_lease() {
        let config = AppConfig::default().with_job_lease(Duration::from_secs(90));
        let pool = config.pool_config(3);
        assert_eq!(pool.num_workers, 3);
        assert_eq!(pool.lease, Duration::from_secs(90));
        assert_eq!(pool.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(pool.poll_interval, Duration::from_secs(30));
    }
}
