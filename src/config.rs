//! Configuration parsing and validation for gemini-relay.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::Path;

/// Env var supplying the gate key when the config file does not set one.
pub const GATE_KEY_ENV: &str = "RELAY_GATE_KEY";

/// Env var holding a comma-separated list of extra upstream keys.
pub const UPSTREAM_KEYS_ENV: &str = "RELAY_UPSTREAM_KEYS";

/// Root configuration structure.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub auth: AuthConfig,
    pub logging: LoggingConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on (e.g., "127.0.0.1:8080")
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

/// How streaming responses are written back to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamMode {
    /// Decode upstream chunks and re-emit each one as `data: <json>\n\n`.
    #[default]
    Sse,
    /// Forward upstream bytes and content type unchanged.
    Passthrough,
}

impl std::fmt::Display for StreamMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamMode::Sse => write!(f, "sse"),
            StreamMode::Passthrough => write!(f, "passthrough"),
        }
    }
}

/// Upstream provider configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL of the generative-AI API, without a version segment
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Streaming contract exposed to clients
    #[serde(default)]
    pub stream_mode: StreamMode,
    /// TCP connect timeout for upstream calls
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            stream_mode: StreamMode::default(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

/// Strategy used to pick an upstream key from the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolStrategy {
    /// Uniform random choice per request
    #[default]
    Random,
    /// Cycle through keys in configured order
    RoundRobin,
}

impl std::fmt::Display for PoolStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolStrategy::Random => write!(f, "random"),
            PoolStrategy::RoundRobin => write!(f, "round_robin"),
        }
    }
}

/// Inbound gate and outbound key pool.
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    /// Credential clients must present. When unset, the client's credential
    /// is forwarded upstream as-is.
    pub gate_key: Option<ApiKey>,
    /// Upstream keys used when a gate is configured
    pub keys: Vec<ApiKey>,
    pub strategy: PoolStrategy,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log request and response bodies at debug level
    #[serde(default)]
    pub log_bodies: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_bodies: false,
        }
    }
}

/// API key wrapper that redacts in Debug/Display/Serialize and zeroizes on drop.
///
/// Only accessible via `.expose_secret()` so every use is grep-auditable.
#[derive(Clone)]
pub struct ApiKey(SecretString);

impl ApiKey {
    /// Access the raw key value. Every call site is auditable via `grep expose_secret`.
    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }

    /// Compare against a credential presented by a client.
    pub fn matches(&self, candidate: &str) -> bool {
        let expected = self.expose_secret().as_bytes();
        let candidate = candidate.as_bytes();
        if expected.len() != candidate.len() {
            return false;
        }
        expected
            .iter()
            .zip(candidate)
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl std::fmt::Display for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl Serialize for ApiKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("[REDACTED]")
    }
}

impl<'de> serde::Deserialize<'de> for ApiKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(|s| ApiKey(SecretString::from(s)))
    }
}

impl From<String> for ApiKey {
    fn from(s: String) -> Self {
        ApiKey(SecretString::from(s))
    }
}

impl From<&str> for ApiKey {
    fn from(s: &str) -> Self {
        ApiKey(SecretString::from(s))
    }
}

/// How a configured key was resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum KeySource {
    /// Key was a literal string in config (no ${} references)
    Literal,
    /// Key contained ${VAR} references expanded from environment
    EnvExpanded,
    /// Key came from a well-known env var (holds var name)
    Environment(String),
}

impl std::fmt::Display for KeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeySource::Literal => write!(f, "config-literal"),
            KeySource::EnvExpanded => write!(f, "env-expanded"),
            KeySource::Environment(var) => write!(f, "environment ({})", var),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Environment variable '{var}' not set for '{field}': {message}")]
    EnvVar {
        var: String,
        field: String,
        message: String,
    },
}

/// Raw auth table deserialized directly from TOML.
/// Values may contain `${VAR}` references not yet expanded.
#[derive(Debug, Default, Deserialize)]
pub struct RawAuthConfig {
    pub gate_key: Option<String>,
    #[serde(default)]
    pub keys: Vec<String>,
    #[serde(default)]
    pub strategy: PoolStrategy,
}

/// Raw configuration deserialized directly from TOML.
#[derive(Debug, Default, Deserialize)]
pub struct RawConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub auth: RawAuthConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Expand all `${VAR}` references in a string using a custom lookup function.
///
/// Supports multiple `${VAR}` in one string. Fails on first missing variable,
/// unclosed `${`, or empty variable name.
fn expand_env_vars_with<F>(input: &str, field: &str, lookup: &F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if !input.contains("${") {
        return Ok(input.to_string());
    }

    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        let end = after.find('}').ok_or_else(|| ConfigError::EnvVar {
            var: "<unclosed>".to_string(),
            field: field.to_string(),
            message: "Unclosed '${' in config value".to_string(),
        })?;

        let var_name = &after[..end];
        if var_name.is_empty() {
            return Err(ConfigError::EnvVar {
                var: "".to_string(),
                field: field.to_string(),
                message: "Empty variable name in '${}' reference".to_string(),
            });
        }

        let value = lookup(var_name).ok_or_else(|| ConfigError::EnvVar {
            var: var_name.to_string(),
            field: field.to_string(),
            message: format!(
                "Environment variable '{}' is not set (referenced in '{}')",
                var_name, field
            ),
        })?;

        result.push_str(&value);
        rest = &after[end + 1..];
    }

    result.push_str(rest);
    Ok(result)
}

/// Resolve one raw key value into an [`ApiKey`] and record where it came from.
fn resolve_key<F>(raw: &str, field: &str, lookup: &F) -> Result<(ApiKey, KeySource), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if raw.contains("${") {
        let expanded = expand_env_vars_with(raw, field, lookup)?;
        Ok((ApiKey::from(expanded), KeySource::EnvExpanded))
    } else {
        Ok((ApiKey::from(raw), KeySource::Literal))
    }
}

/// Split a comma-separated key list, dropping blanks.
pub fn split_key_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_file_with_env(path).map(|(config, _)| config)
    }

    /// Parse configuration from a TOML string, expanding against the process environment.
    pub fn parse_str(content: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(content).map_err(ConfigError::Parse)?;
        let (config, _) = Self::from_raw(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Convert raw config to final config using real environment variables.
    pub fn from_raw(raw: RawConfig) -> Result<(Self, Vec<(String, KeySource)>), ConfigError> {
        Self::from_raw_with(raw, |name| std::env::var(name).ok())
    }

    /// Convert raw (deserialized) config to final config with env var expansion.
    ///
    /// - `gate_key` and each entry of `keys` get `${VAR}` expansion.
    /// - If `gate_key` is absent, `RELAY_GATE_KEY` is consulted.
    /// - Entries of `RELAY_UPSTREAM_KEYS` are appended to the pool.
    ///
    /// Returns the config and a label/source pair for each resolved key.
    pub fn from_raw_with<F>(
        raw: RawConfig,
        lookup: F,
    ) -> Result<(Self, Vec<(String, KeySource)>), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut key_sources = Vec::new();

        let gate_key = match raw.auth.gate_key {
            Some(ref raw_gate) => {
                let (key, source) = resolve_key(raw_gate, "auth.gate_key", &lookup)?;
                key_sources.push(("gate".to_string(), source));
                Some(key)
            }
            None => lookup(GATE_KEY_ENV)
                .filter(|v| !v.trim().is_empty())
                .map(|value| {
                    key_sources.push((
                        "gate".to_string(),
                        KeySource::Environment(GATE_KEY_ENV.to_string()),
                    ));
                    ApiKey::from(value.trim())
                }),
        };

        let mut keys = Vec::with_capacity(raw.auth.keys.len());
        for (i, raw_key) in raw.auth.keys.iter().enumerate() {
            let field = format!("auth.keys[{}]", i);
            let (key, source) = resolve_key(raw_key, &field, &lookup)?;
            key_sources.push((field, source));
            keys.push(key);
        }

        if let Some(list) = lookup(UPSTREAM_KEYS_ENV) {
            for (i, value) in split_key_list(&list).into_iter().enumerate() {
                key_sources.push((
                    format!("{}[{}]", UPSTREAM_KEYS_ENV, i),
                    KeySource::Environment(UPSTREAM_KEYS_ENV.to_string()),
                ));
                keys.push(ApiKey::from(value));
            }
        }

        let config = Config {
            server: raw.server,
            upstream: raw.upstream,
            auth: AuthConfig {
                gate_key,
                keys,
                strategy: raw.auth.strategy,
            },
            logging: raw.logging,
        };

        Ok((config, key_sources))
    }

    /// Load configuration from a TOML file with environment variable expansion.
    ///
    /// Returns the config and per-key source information.
    pub fn from_file_with_env(
        path: impl AsRef<Path>,
    ) -> Result<(Self, Vec<(String, KeySource)>), ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;

        let raw: RawConfig = toml::from_str(&content).map_err(ConfigError::Parse)?;
        let (config, key_sources) = Self::from_raw(raw)?;
        config.validate()?;

        Ok((config, key_sources))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let base = self.upstream.base_url.trim();
        if base.is_empty() {
            return Err(ConfigError::Validation(
                "upstream.base_url must not be empty".to_string(),
            ));
        }
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(ConfigError::Validation(format!(
                "upstream.base_url '{}' must start with http:// or https://",
                base
            )));
        }

        if self.auth.gate_key.is_some() && self.auth.keys.is_empty() {
            return Err(ConfigError::Validation(
                "auth.gate_key is set but no upstream keys are configured".to_string(),
            ));
        }

        if self.auth.gate_key.is_none() && !self.auth.keys.is_empty() {
            tracing::warn!(
                keys = self.auth.keys.len(),
                "Upstream keys configured without a gate key - client credentials will be forwarded instead"
            );
        }

        Ok(())
    }
}
