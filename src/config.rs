use std::time::Duration;

use crate::error::{Result, StudioError};

/// Key sent when the user has not configured one. The backend treats it as
/// the guest/admin key in local deployments.
pub const FALLBACK_AUTH_KEY: &str = "admin";

/// Configuration for the client and generation session.
///
/// Use [`ClientConfig::builder()`] for ergonomic construction,
/// [`ClientConfig::from_env()`] to read `ZIMAGE_*` variables, or
/// [`ClientConfig::default()`] for a local backend.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the Z-Image API, without trailing slash.
    pub endpoint: String,

    /// Value for the `X-Auth-Key` header. `None` = guest fallback key.
    pub auth_key: Option<String>,

    /// Interval between batch status polls.
    pub poll_interval: Duration,

    /// Ceiling on tasks a single batch may put in flight.
    pub max_active_tasks: u32,

    /// Timeout for ordinary API calls.
    pub request_timeout: Duration,

    /// Page size for history listing.
    pub history_page_size: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8000".to_string(),
            auth_key: None,
            poll_interval: Duration::from_millis(800),
            max_active_tasks: 8,
            request_timeout: Duration::from_secs(30),
            history_page_size: 20,
        }
    }
}

impl ClientConfig {
    /// Start building a config with the builder pattern.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Defaults overridden by `ZIMAGE_API_URL`, `ZIMAGE_AUTH_KEY`,
    /// `ZIMAGE_POLL_INTERVAL_MS` and `ZIMAGE_MAX_ACTIVE_TASKS`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = Self::builder();
        if let Some(url) = lookup("ZIMAGE_API_URL") {
            builder = builder.with_endpoint(url);
        }
        if let Some(key) = lookup("ZIMAGE_AUTH_KEY") {
            builder = builder.with_auth_key(key);
        }
        if let Some(raw) = lookup("ZIMAGE_POLL_INTERVAL_MS") {
            let ms: u64 = raw.trim().parse().map_err(|_| {
                StudioError::Config(format!("ZIMAGE_POLL_INTERVAL_MS is not a number: {}", raw))
            })?;
            builder = builder.with_poll_interval(Duration::from_millis(ms));
        }
        if let Some(raw) = lookup("ZIMAGE_MAX_ACTIVE_TASKS") {
            let max: u32 = raw.trim().parse().map_err(|_| {
                StudioError::Config(format!("ZIMAGE_MAX_ACTIVE_TASKS is not a number: {}", raw))
            })?;
            builder = builder.with_max_active_tasks(max);
        }
        builder.build()
    }

    /// The key actually sent on the wire.
    pub fn effective_auth_key(&self) -> &str {
        self.auth_key.as_deref().unwrap_or(FALLBACK_AUTH_KEY)
    }
}

/// Builder for [`ClientConfig`].
#[derive(Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Set the API base URL.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the auth key. Blank keys are treated as absent.
    pub fn with_auth_key(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.config.auth_key = if key.trim().is_empty() {
            None
        } else {
            Some(key.trim().to_string())
        };
        self
    }

    /// Set the batch status polling interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Set the active-task ceiling.
    pub fn with_max_active_tasks(mut self, max: u32) -> Self {
        self.config.max_active_tasks = max;
        self
    }

    /// Set the timeout for ordinary API calls.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Set the history page size. Clamped to the backend's 1..=50.
    pub fn with_history_page_size(mut self, size: u32) -> Self {
        self.config.history_page_size = size.clamp(1, 50);
        self
    }

    /// Build the final [`ClientConfig`].
    pub fn build(self) -> Result<ClientConfig> {
        let config = self.config;
        if !(config.endpoint.starts_with("http://") || config.endpoint.starts_with("https://")) {
            return Err(StudioError::Config(format!(
                "endpoint must be an http(s) URL, got '{}'",
                config.endpoint
            )));
        }
        if config.poll_interval.is_zero() {
            return Err(StudioError::Config("poll interval must be non-zero".into()));
        }
        if config.max_active_tasks == 0 {
            return Err(StudioError::Config("max active tasks must be at least 1".into()));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.poll_interval, Duration::from_millis(800));
        assert_eq!(config.max_active_tasks, 8);
        assert_eq!(config.history_page_size, 20);
        assert_eq!(config.effective_auth_key(), FALLBACK_AUTH_KEY);
    }

    #[test]
    fn test_builder() {
        let config = ClientConfig::builder()
            .with_endpoint("https://img.example.com/")
            .with_auth_key(" secret ")
            .with_poll_interval(Duration::from_millis(250))
            .with_max_active_tasks(2)
            .with_history_page_size(500)
            .build()
            .unwrap();
        assert_eq!(config.endpoint, "https://img.example.com");
        assert_eq!(config.effective_auth_key(), "secret");
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.max_active_tasks, 2);
        assert_eq!(config.history_page_size, 50);
    }

    #[test]
    fn test_blank_auth_key_is_guest() {
        let config = ClientConfig::builder().with_auth_key("  ").build().unwrap();
        assert!(config.auth_key.is_none());
        assert_eq!(config.effective_auth_key(), "admin");
    }

    #[test]
    fn test_rejects_bad_endpoint() {
        let result = ClientConfig::builder().with_endpoint("localhost:8000").build();
        assert!(matches!(result, Err(StudioError::Config(_))));
    }

    #[test]
    fn test_rejects_zero_ceiling() {
        let result = ClientConfig::builder().with_max_active_tasks(0).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("ZIMAGE_API_URL", "http://gpu-box:9000"),
            ("ZIMAGE_AUTH_KEY", "k1"),
            ("ZIMAGE_POLL_INTERVAL_MS", "1500"),
            ("ZIMAGE_MAX_ACTIVE_TASKS", "4"),
        ]
        .into_iter()
        .collect();
        let config =
            ClientConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.endpoint, "http://gpu-box:9000");
        assert_eq!(config.auth_key.as_deref(), Some("k1"));
        assert_eq!(config.poll_interval, Duration::from_millis(1500));
        assert_eq!(config.max_active_tasks, 4);
    }

    #[test]
    fn test_from_lookup_bad_number() {
        let result = ClientConfig::from_lookup(|k| {
            (k == "ZIMAGE_POLL_INTERVAL_MS").then(|| "soon".to_string())
        });
        assert!(matches!(result, Err(StudioError::Config(_))));
    }
}
