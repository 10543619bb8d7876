//! Session configuration.
//!
//! Supports configuration from:
//! - Builder methods on [`SessionConfig`]
//! - TOML file via [`SessionConfig::load`], with `${VAR}` / `${VAR:-default}`
//!   substitution inside the file
//! - Environment variables with `MQPOLL__` prefix, e.g. `MQPOLL__HEARTBEAT=10`
//!
//! The broker endpoint is a URL of the form
//! `mqtt[s]://[username[:password]@]host[:port]`; anything that is not such a
//! URL is taken as a bare hostname.

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::LazyLock;
use std::time::Duration;

use config::{Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

/// Default heartbeat (keepalive) interval in seconds.
pub const DEFAULT_HEARTBEAT: u16 = 30;

/// Default wait for protocol responses in seconds.
pub const DEFAULT_PROTOCOL_TIMEOUT: f64 = 30.0;

/// Default TCP connect timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT: u64 = 10;

pub const DEFAULT_PORT: u16 = 1883;
pub const DEFAULT_TLS_PORT: u16 = 8883;

static ENDPOINT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<schema>mqtts?)://((?P<username>[^:@]+)(:(?P<password>[^@]+))?@)?(?P<host>[^:]+)(:(?P<port>\d+))?$",
    )
    .expect("endpoint pattern is valid")
});

static ENV_VAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}").expect("substitution pattern is valid")
});

static CLIENT_SEQ: AtomicU32 = AtomicU32::new(0);

/// Configuration error.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Where and as whom to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub host: String,
    pub port: u16,
    pub ssl: bool,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for ConnectionInfo {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            ssl: false,
            username: None,
            password: None,
        }
    }
}

impl ConnectionInfo {
    /// Parse an endpoint URL or bare hostname.
    pub fn parse(endpoint: &str) -> Result<Self, ConfigError> {
        let Some(caps) = ENDPOINT.captures(endpoint) else {
            return Ok(Self {
                host: endpoint.to_string(),
                ..Default::default()
            });
        };

        let ssl = &caps["schema"] == "mqtts";
        let port = match caps.name("port") {
            Some(port) => port.as_str().parse().map_err(|_| {
                ConfigError::Validation(format!("invalid port in endpoint '{}'", endpoint))
            })?,
            None if ssl => DEFAULT_TLS_PORT,
            None => DEFAULT_PORT,
        };

        Ok(Self {
            host: caps["host"].to_string(),
            port,
            ssl,
            username: caps.name("username").map(|m| m.as_str().to_string()),
            password: caps.name("password").map(|m| m.as_str().to_string()),
        })
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level: error, warn, info, debug, trace.
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Session configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Broker endpoint URL or hostname.
    pub endpoint: Option<String>,
    /// Overrides applied on top of the parsed endpoint.
    pub host: Option<String>,
    pub port: Option<u16>,
    pub ssl: Option<bool>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Client identifier; generated when unset.
    pub client_id: Option<String>,
    /// Keepalive interval in seconds.
    pub heartbeat: u16,
    /// Wait for protocol responses, in seconds.
    pub protocol_timeout: f64,
    /// TCP connect timeout in seconds.
    pub connect_timeout: u64,
    pub clean_session: bool,
    pub log: LogConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            host: None,
            port: None,
            ssl: None,
            username: None,
            password: None,
            client_id: None,
            heartbeat: DEFAULT_HEARTBEAT,
            protocol_timeout: DEFAULT_PROTOCOL_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            clean_session: true,
            log: LogConfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the broker endpoint (URL or hostname).
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Force TLS on or off regardless of the endpoint scheme.
    pub fn ssl(mut self, ssl: bool) -> Self {
        self.ssl = Some(ssl);
        self
    }

    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = Some(id.into());
        self
    }

    /// Set the keepalive interval in seconds.
    pub fn heartbeat(mut self, seconds: u16) -> Self {
        self.heartbeat = seconds;
        self
    }

    pub fn protocol_timeout(mut self, timeout: Duration) -> Self {
        self.protocol_timeout = timeout.as_secs_f64();
        self
    }

    pub fn clean_session(mut self, clean: bool) -> Self {
        self.clean_session = clean;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout.as_secs();
        self
    }

    /// Resolve endpoint plus overrides.
    pub fn connection_info(&self) -> Result<ConnectionInfo, ConfigError> {
        let mut info = match self.endpoint {
            Some(ref endpoint) => ConnectionInfo::parse(endpoint)?,
            None => ConnectionInfo::default(),
        };
        if let Some(ref host) = self.host {
            info.host = host.clone();
        }
        if let Some(port) = self.port {
            info.port = port;
        }
        if let Some(ssl) = self.ssl {
            info.ssl = ssl;
        }
        if self.username.is_some() {
            info.username = self.username.clone();
        }
        if self.password.is_some() {
            info.password = self.password.clone();
        }
        Ok(info)
    }

    /// The configured client id, or a fresh generated one.
    pub fn resolved_client_id(&self) -> String {
        match self.client_id {
            Some(ref id) => id.clone(),
            None => format!(
                "mqpoll-{}-{}",
                std::process::id(),
                CLIENT_SEQ.fetch_add(1, Ordering::Relaxed)
            ),
        }
    }

    /// Protocol timeout as a `Duration`. Values `validate` rejects saturate.
    pub fn protocol_timeout_duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.protocol_timeout.max(0.0)).unwrap_or(Duration::MAX)
    }

    pub fn connect_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    /// Load configuration from a TOML file with environment variable overrides.
    /// A missing file is not an error.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .set_default("heartbeat", DEFAULT_HEARTBEAT as i64)?
            .set_default("protocol_timeout", DEFAULT_PROTOCOL_TIMEOUT)?
            .set_default("connect_timeout", DEFAULT_CONNECT_TIMEOUT as i64)?
            .set_default("clean_session", true)?
            .set_default("log.level", "info")?;

        let path = path.as_ref();
        if path.is_file() {
            let content = std::fs::read_to_string(path)?;
            let substituted = substitute_env_vars(&content);
            builder = builder.add_source(File::from_str(&substituted, FileFormat::Toml));
        }

        let cfg = builder
            .add_source(
                Environment::with_prefix("MQPOLL")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: SessionConfig = cfg.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables only.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(Path::new(""))
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let substituted = substitute_env_vars(content);
        let config: SessionConfig = toml::from_str(&substituted)
            .map_err(|e| ConfigError::Validation(format!("TOML parse error: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.heartbeat == 0 {
            return Err(ConfigError::Validation(
                "heartbeat must be at least 1 second".into(),
            ));
        }
        if self.protocol_timeout < 0.0
            || Duration::try_from_secs_f64(self.protocol_timeout).is_err()
        {
            return Err(ConfigError::Validation(format!(
                "protocol_timeout must be a non-negative number of seconds, got {}",
                self.protocol_timeout
            )));
        }
        self.connection_info()?;
        Ok(())
    }
}

/// Substitute `${VAR}` and `${VAR:-default}` with environment values.
fn substitute_env_vars(content: &str) -> String {
    ENV_VAR
        .replace_all(content, |caps: &regex::Captures| {
            let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            std::env::var(&caps[1]).unwrap_or_else(|_| default.to_string())
        })
        .into_owned()
}
