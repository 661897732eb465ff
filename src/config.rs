use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use url::Url;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// Environment override tracking
// ---------------------------------------------------------------------------

/// Tracks which configuration settings are overridden by environment variables.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    overrides: HashMap<String, String>,
}

impl EnvOverrides {
    /// Check whether a setting key (e.g. "session.token_ttl_secs") is overridden.
    pub fn is_overridden(&self, key: &str) -> bool {
        self.overrides.contains_key(key)
    }

    /// Get the env var name that overrides the given setting key.
    pub fn env_var_for(&self, key: &str) -> Option<&str> {
        self.overrides.get(key).map(String::as_str)
    }

    /// All overrides as setting key -> env var name.
    pub fn all(&self) -> &HashMap<String, String> {
        &self.overrides
    }

    fn record(&mut self, key: &str, env_var: &str) {
        self.overrides.insert(key.to_string(), env_var.to_string());
    }
}

// ---------------------------------------------------------------------------
// Main configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub guard: GuardConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Env var overrides are not serialized to TOML.
    #[serde(skip)]
    pub env_overrides: EnvOverrides,
}

/// Backend location and HTTP behaviour.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_login_path")]
    pub login_path: String,
    #[serde(default = "default_refresh_path")]
    pub refresh_path: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            login_path: default_login_path(),
            refresh_path: default_refresh_path(),
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

impl ApiConfig {
    pub fn base(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.base_url)
            .map_err(|e| ConfigError::Invalid(format!("api.base_url '{}': {e}", self.base_url)))
    }

    /// Resolve a path against the base URL.
    pub fn url(&self, path: &str) -> Result<Url, ConfigError> {
        self.base()?
            .join(path)
            .map_err(|e| ConfigError::Invalid(format!("path '{path}': {e}")))
    }

    pub fn login_url(&self) -> Result<Url, ConfigError> {
        self.url(&self.login_path)
    }

    pub fn refresh_url(&self) -> Result<Url, ConfigError> {
        self.url(&self.refresh_path)
    }
}

/// Credential lifetime and renewal behaviour.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    /// Mirrors the backend's access-token TTL.
    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: u64,
    /// Renew this long before `expires_at`.
    #[serde(default = "default_renewal_buffer")]
    pub renewal_buffer_secs: u64,
    #[serde(default = "default_renewal_timeout")]
    pub renewal_timeout_secs: u64,
    #[serde(default = "default_max_renewal_failures")]
    pub max_renewal_failures: u32,
    /// Read `exp` from JWT access tokens instead of relying on the TTL alone.
    #[serde(default = "default_true")]
    pub trust_token_claims: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            token_ttl_secs: default_token_ttl(),
            renewal_buffer_secs: default_renewal_buffer(),
            renewal_timeout_secs: default_renewal_timeout(),
            max_renewal_failures: default_max_renewal_failures(),
            trust_token_claims: true,
        }
    }
}

/// Longest token lifetime or renewal timeout the session layer accepts.
pub const MAX_SESSION_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Seconds as a chrono duration, saturating instead of overflowing.
pub(crate) fn seconds(secs: u64) -> chrono::Duration {
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .unwrap_or(chrono::Duration::MAX)
}

impl SessionConfig {
    pub fn expiry_policy(&self) -> crate::credentials::ExpiryPolicy {
        crate::credentials::ExpiryPolicy::new(
            seconds(self.token_ttl_secs),
            self.trust_token_claims,
        )
    }
}

/// Navigation gate settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct GuardConfig {
    #[serde(default = "default_guard_login_path")]
    pub login_path: String,
    #[serde(default = "default_landing_path")]
    pub landing_path: String,
    /// Login/registration pages; authenticated users are sent to the landing page.
    #[serde(default = "default_auth_routes")]
    pub auth_routes: Vec<String>,
    /// Exact public paths.
    #[serde(default = "default_public_routes")]
    pub public_routes: Vec<String>,
    /// Public path prefixes.
    #[serde(default = "default_public_prefixes")]
    pub public_prefixes: Vec<String>,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            login_path: default_guard_login_path(),
            landing_path: default_landing_path(),
            auth_routes: default_auth_routes(),
            public_routes: default_public_routes(),
            public_prefixes: default_public_prefixes(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default = "default_storage_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_storage_key")]
    pub key: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            dir: default_storage_dir(),
            key: default_storage_key(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    File,
    Keyring,
    Memory,
}

impl std::fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File => write!(f, "file"),
            Self::Keyring => write!(f, "keyring"),
            Self::Memory => write!(f, "memory"),
        }
    }
}

impl FromStr for StorageBackend {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "file" => Ok(Self::File),
            "keyring" => Ok(Self::Keyring),
            "memory" => Ok(Self::Memory),
            _ => Err(format!("Unknown storage backend: {s}")),
        }
    }
}

/// Field names of the chunked response protocol.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct StreamConfig {
    #[serde(default = "default_content_field")]
    pub content_field: String,
    #[serde(default = "default_id_field")]
    pub id_field: String,
    /// Final text when the stream produced nothing.
    #[serde(default = "default_empty_response_text")]
    pub empty_response_text: String,
    /// Longest fragment kept while waiting for its line terminator.
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            content_field: default_content_field(),
            id_field: default_id_field(),
            empty_response_text: default_empty_response_text(),
            max_line_bytes: default_max_line_bytes(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions
// ---------------------------------------------------------------------------

fn default_base_url() -> String {
    "http://127.0.0.1:8000".to_string()
}
fn default_login_path() -> String {
    "/api/auth/login".to_string()
}
fn default_refresh_path() -> String {
    "/api/auth/refresh".to_string()
}
const fn default_connect_timeout() -> u64 {
    10
}
const fn default_request_timeout() -> u64 {
    300
}
fn default_user_agent() -> String {
    crate::net::client::USER_AGENT.to_string()
}
const fn default_token_ttl() -> u64 {
    30 * 60
}
const fn default_renewal_buffer() -> u64 {
    5 * 60
}
const fn default_renewal_timeout() -> u64 {
    15
}
const fn default_max_renewal_failures() -> u32 {
    3
}
const fn default_true() -> bool {
    true
}
fn default_guard_login_path() -> String {
    "/login".to_string()
}
fn default_landing_path() -> String {
    "/dashboard".to_string()
}
fn default_auth_routes() -> Vec<String> {
    vec!["/login".to_string(), "/register".to_string()]
}
fn default_public_routes() -> Vec<String> {
    vec!["/".to_string(), "/about".to_string()]
}
fn default_public_prefixes() -> Vec<String> {
    vec!["/public/".to_string(), "/static/".to_string()]
}
fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("session-core")
}
fn default_storage_key() -> String {
    crate::credentials::store::DEFAULT_STORAGE_KEY.to_string()
}
fn default_content_field() -> String {
    "content".to_string()
}
fn default_id_field() -> String {
    "conversation_id".to_string()
}
fn default_empty_response_text() -> String {
    "No response was produced.".to_string()
}
fn default_max_line_bytes() -> usize {
    1024 * 1024
}
fn default_log_level() -> String {
    "info".to_string()
}

// ---------------------------------------------------------------------------
// Loading, env overrides, validation
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a TOML file, then apply environment variable
    /// overrides. Any setting with a `SESSION_CORE_` variable takes precedence
    /// over the file value and is tracked in `env_overrides`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            toml::from_str::<Config>(&content)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document without touching the environment.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the session lifecycle meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.api.base()?;
        if self.session.token_ttl_secs == 0 {
            return Err(ConfigError::Invalid("session.token_ttl_secs must be positive".into()));
        }
        for (key, secs) in [
            ("session.token_ttl_secs", self.session.token_ttl_secs),
            ("session.renewal_timeout_secs", self.session.renewal_timeout_secs),
        ] {
            if secs > MAX_SESSION_SECS {
                return Err(ConfigError::Invalid(format!(
                    "{key} ({secs}) exceeds the maximum of {MAX_SESSION_SECS}"
                )));
            }
        }
        if self.session.renewal_buffer_secs >= self.session.token_ttl_secs {
            return Err(ConfigError::Invalid(format!(
                "session.renewal_buffer_secs ({}) must be shorter than session.token_ttl_secs ({})",
                self.session.renewal_buffer_secs, self.session.token_ttl_secs
            )));
        }
        if self.session.renewal_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "session.renewal_timeout_secs must be positive".into(),
            ));
        }
        if self.session.max_renewal_failures == 0 {
            return Err(ConfigError::Invalid(
                "session.max_renewal_failures must be at least 1".into(),
            ));
        }
        if self.stream.max_line_bytes == 0 {
            return Err(ConfigError::Invalid("stream.max_line_bytes must be positive".into()));
        }
        for (key, path) in [
            ("api.login_path", &self.api.login_path),
            ("api.refresh_path", &self.api.refresh_path),
            ("guard.login_path", &self.guard.login_path),
            ("guard.landing_path", &self.guard.landing_path),
        ] {
            if !path.starts_with('/') {
                return Err(ConfigError::Invalid(format!("{key} must start with '/': {path}")));
            }
        }
        Ok(())
    }

    /// Serialize the file-level configuration (env overrides excluded).
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Apply environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        let mut ov = EnvOverrides::default();

        // -- Helpers (macros for concise per-field overrides) --

        macro_rules! env_str {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = val;
                    ov.record($key, $env);
                }
            };
        }
        macro_rules! env_bool {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = matches!(val.to_lowercase().as_str(), "1" | "true" | "yes" | "on");
                    ov.record($key, $env);
                }
            };
        }
        macro_rules! env_parse {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    if let Ok(parsed) = val.parse() {
                        $field = parsed;
                        ov.record($key, $env);
                    } else {
                        tracing::warn!(env = $env, value = %val, "Ignoring unparsable env override");
                    }
                }
            };
        }
        macro_rules! env_path {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = PathBuf::from(val);
                    ov.record($key, $env);
                }
            };
        }

        // -- API --
        env_str!("api.base_url", "SESSION_CORE_API_BASE_URL", self.api.base_url);
        env_str!("api.login_path", "SESSION_CORE_API_LOGIN_PATH", self.api.login_path);
        env_str!("api.refresh_path", "SESSION_CORE_API_REFRESH_PATH", self.api.refresh_path);

        // -- Session --
        env_parse!(
            "session.token_ttl_secs",
            "SESSION_CORE_TOKEN_TTL_SECS",
            self.session.token_ttl_secs
        );
        env_parse!(
            "session.renewal_buffer_secs",
            "SESSION_CORE_RENEWAL_BUFFER_SECS",
            self.session.renewal_buffer_secs
        );
        env_parse!(
            "session.renewal_timeout_secs",
            "SESSION_CORE_RENEWAL_TIMEOUT_SECS",
            self.session.renewal_timeout_secs
        );
        env_parse!(
            "session.max_renewal_failures",
            "SESSION_CORE_MAX_RENEWAL_FAILURES",
            self.session.max_renewal_failures
        );
        env_bool!(
            "session.trust_token_claims",
            "SESSION_CORE_TRUST_TOKEN_CLAIMS",
            self.session.trust_token_claims
        );

        // -- Guard --
        env_str!("guard.login_path", "SESSION_CORE_GUARD_LOGIN_PATH", self.guard.login_path);
        env_str!(
            "guard.landing_path",
            "SESSION_CORE_GUARD_LANDING_PATH",
            self.guard.landing_path
        );

        // -- Storage --
        env_parse!("storage.backend", "SESSION_CORE_STORAGE_BACKEND", self.storage.backend);
        env_path!("storage.dir", "SESSION_CORE_STORAGE_DIR", self.storage.dir);

        // -- Stream --
        env_parse!(
            "stream.max_line_bytes",
            "SESSION_CORE_STREAM_MAX_LINE_BYTES",
            self.stream.max_line_bytes
        );

        // -- Logging --
        env_str!("logging.level", "SESSION_CORE_LOG_LEVEL", self.logging.level);
        env_bool!("logging.json", "SESSION_CORE_LOG_JSON", self.logging.json);

        self.env_overrides = ov;
    }
}

// Helper for default storage directory
mod dirs {
    use std::path::PathBuf;

    pub fn data_local_dir() -> Option<PathBuf> {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local").join("share"))
            })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
