use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ApiCfg {
    /// Backend origin, e.g. `http://localhost:8000`. Paths such as `/api/chat` are appended.
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl Default for ApiCfg {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct HttpCfg {
    /// TCP connect timeout in milliseconds (default 5000ms)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Total timeout for non-streaming requests in milliseconds (default 30000ms).
    /// Event streams are not bounded by it.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Optional per-host idle connection pool cap (None = reqwest default)
    #[serde(default)]
    pub pool_max_idle_per_host: Option<usize>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for HttpCfg {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            pool_max_idle_per_host: None,
            user_agent: default_user_agent(),
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_request_timeout_ms() -> u64 {
    30_000
}
fn default_user_agent() -> String {
    "chatwire/0.1".to_string()
}

/// What to report when the backend closes an event stream without a `done` or `error` event.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SilentClose {
    /// Report `StreamFailure::ClosedEarly` through the error callback.
    #[default]
    Error,
    /// Treat the closure as completion and call the done callback.
    Complete,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct StreamCfg {
    #[serde(default)]
    pub on_silent_close: SilentClose,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RouteRule {
    /// Regex applied to the route path, e.g. `^/dashboard`
    pub pattern: String,
    #[serde(default)]
    pub requires_auth: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RouteCfg {
    #[serde(default = "default_login_path")]
    pub login_path: String,
    #[serde(default = "default_home_path")]
    pub home_path: String,
    #[serde(default = "default_route_rules")]
    pub rules: Vec<RouteRule>,
}

impl Default for RouteCfg {
    fn default() -> Self {
        Self {
            login_path: default_login_path(),
            home_path: default_home_path(),
            rules: default_route_rules(),
        }
    }
}

fn default_login_path() -> String {
    "/login".to_string()
}
fn default_home_path() -> String {
    "/".to_string()
}
fn default_route_rules() -> Vec<RouteRule> {
    vec![
        RouteRule {
            pattern: "^/$".into(),
            requires_auth: true,
        },
        RouteRule {
            pattern: "^/dashboard/?$".into(),
            requires_auth: true,
        },
    ]
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct LoggingCfg {
    /// `tracing-subscriber` filter directive, e.g. `info` or `chatwire_core=trace`.
    /// `RUST_LOG` takes precedence when set.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_true")]
    pub ansi: bool,
}

impl Default for LoggingCfg {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            ansi: true,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}

/// Every section is optional; `{}` is a valid config.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct Config {
    #[serde(default)]
    pub api: ApiCfg,
    #[serde(default)]
    pub http: HttpCfg,
    #[serde(default)]
    pub stream: StreamCfg,
    #[serde(default)]
    pub routes: RouteCfg,
    #[serde(default)]
    pub logging: LoggingCfg,
}

impl Config {
    /// Load a Config from a file path (JSON or TOML by extension). If the
    /// extension is missing or unrecognized, try JSON first, then TOML.
    pub fn from_path<P: AsRef<Path>>(path: P) -> crate::error::CoreResult<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(crate::error::ChatClientError::from)?;
        let s = std::str::from_utf8(&bytes)
            .map_err(|e| crate::error::ChatClientError::Other(e.into()))?;
        let cfg: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str::<Self>(s)
                .map_err(|e| crate::error::ChatClientError::Other(e.into()))?,
            Some("toml") => toml::from_str::<Self>(s)
                .map_err(|e| crate::error::ChatClientError::Other(e.into()))?,
            _ => serde_json::from_str::<Self>(s)
                .map_err(|e| crate::error::ChatClientError::Other(e.into()))
                .or_else(|_| {
                    toml::from_str::<Self>(s)
                        .map_err(|e| crate::error::ChatClientError::Other(e.into()))
                })?,
        };
        Ok(cfg)
    }

    /// Base URL with any trailing slash removed, ready for `format!("{base}/api/...")`.
    pub fn base_url(&self) -> &str {
        self.api.base_url.trim_end_matches('/')
    }
}
