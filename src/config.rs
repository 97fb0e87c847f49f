//! Configuration for chat sessions, the store client and the dev server.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::chat::reconcile::MatchPolicy;
use crate::error::{ChatError, ChatResult};

/// Environment variable holding the store base URL.
pub const STORE_URL_ENV: &str = "HALLDYLL_CHAT_STORE_URL";
/// Environment variable holding the request timeout in seconds.
pub const TIMEOUT_ENV: &str = "HALLDYLL_CHAT_TIMEOUT_SECS";
/// Environment variable selecting the match policy.
pub const MATCH_POLICY_ENV: &str = "HALLDYLL_CHAT_MATCH_POLICY";
/// Environment variable holding the dev server port.
pub const PORT_ENV: &str = "HALLDYLL_CHAT_PORT";

/// Default dev server port.
pub const DEFAULT_PORT: u16 = 3000;

/// Top-level configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Remote store settings.
    pub store: StoreConfig,
    /// How confirmed messages are matched to pending ones.
    pub match_policy: MatchPolicy,
    /// Port the development store server listens on.
    pub server_port: u16,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            match_policy: MatchPolicy::default(),
            server_port: DEFAULT_PORT,
        }
    }
}

impl ChatConfig {
    /// Create a config with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Read overrides from the process environment.
    ///
    /// # Errors
    /// Returns an error if a variable is set to an unusable value.
    pub fn from_env() -> ChatResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read overrides through `lookup`, falling back to defaults.
    ///
    /// # Errors
    /// Returns an error if a value cannot be parsed or fails validation.
    pub fn from_lookup<F>(lookup: F) -> ChatResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup(STORE_URL_ENV) {
            config.store.base_url = url;
        }
        if let Some(secs) = lookup(TIMEOUT_ENV) {
            let secs: u64 = secs
                .trim()
                .parse()
                .map_err(|_| ChatError::Config(format!("{TIMEOUT_ENV} must be a number of seconds")))?;
            config.store.request_timeout = Duration::from_secs(secs);
        }
        if let Some(name) = lookup(MATCH_POLICY_ENV) {
            config.match_policy = MatchPolicy::from_name(&name).ok_or_else(|| {
                ChatError::Config(format!("{MATCH_POLICY_ENV} must be `content` or `correlation`"))
            })?;
        }
        if let Some(port) = lookup(PORT_ENV) {
            config.server_port = port
                .trim()
                .parse()
                .map_err(|_| ChatError::Config(format!("{PORT_ENV} must be a port number")))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Set the store base URL.
    #[must_use]
    pub fn with_store_url(mut self, url: impl Into<String>) -> Self {
        self.store.base_url = url.into();
        self
    }

    /// Set the request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.store.request_timeout = timeout;
        self
    }

    /// Set the match policy.
    #[must_use]
    pub const fn with_match_policy(mut self, policy: MatchPolicy) -> Self {
        self.match_policy = policy;
        self
    }

    /// Validate configuration invariants.
    ///
    /// # Errors
    /// Returns an error if the URL is not HTTP(S) or a timeout is zero.
    pub fn validate(&self) -> ChatResult<()> {
        self.store.validate()
    }
}

/// Remote store settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Base URL the `/api/...` paths are resolved against.
    pub base_url: String,
    /// Whole-request timeout.
    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,
    /// Connection timeout.
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_url: format!("http://127.0.0.1:{DEFAULT_PORT}"),
            request_timeout: Duration::from_secs(15),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl StoreConfig {
    /// Parse the base URL.
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or not HTTP(S).
    pub fn url(&self) -> ChatResult<Url> {
        let url = Url::parse(&self.base_url)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ChatError::Config(format!(
                "store URL must be http or https, got {}",
                url.scheme()
            )));
        }
        Ok(url)
    }

    /// Validate the store settings.
    ///
    /// # Errors
    /// Returns an error if the URL is unusable or a timeout is zero.
    pub fn validate(&self) -> ChatResult<()> {
        self.url()?;
        if self.request_timeout.is_zero() {
            return Err(ChatError::Config("request_timeout must be > 0".to_string()));
        }
        if self.connect_timeout.is_zero() {
            return Err(ChatError::Config("connect_timeout must be > 0".to_string()));
        }
        Ok(())
    }
}

/// Serde module storing a `Duration` as whole seconds.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
