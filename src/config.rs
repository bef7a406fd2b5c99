use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// The downstream services the gateway fronts. The set is fixed at compile
/// time; adding a backend means adding a variant here and its route entries
/// in `routes::RouteTable::build`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendId {
    User,
    Chat,
    Office,
    Shipments,
    Meetings,
    Search,
}

impl BackendId {
    pub const ALL: [BackendId; 6] = [
        BackendId::User,
        BackendId::Chat,
        BackendId::Office,
        BackendId::Shipments,
        BackendId::Meetings,
        BackendId::Search,
    ];

    /// Short name used in log lines and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            BackendId::User => "user",
            BackendId::Chat => "chat",
            BackendId::Office => "office",
            BackendId::Shipments => "shipments",
            BackendId::Meetings => "meetings",
            BackendId::Search => "search",
        }
    }

    fn url_env_key(&self) -> &'static str {
        match self {
            BackendId::User => "USER_SERVICE_URL",
            BackendId::Chat => "CHAT_SERVICE_URL",
            BackendId::Office => "OFFICE_SERVICE_URL",
            BackendId::Shipments => "SHIPMENT_SERVICE_URL",
            BackendId::Meetings => "MEETING_SERVICE_URL",
            BackendId::Search => "SEARCH_SERVICE_URL",
        }
    }

    fn key_env_key(&self) -> &'static str {
        match self {
            BackendId::User => "USER_SERVICE_KEY",
            BackendId::Chat => "CHAT_SERVICE_KEY",
            BackendId::Office => "OFFICE_SERVICE_KEY",
            BackendId::Shipments => "SHIPMENT_SERVICE_KEY",
            BackendId::Meetings => "MEETING_SERVICE_KEY",
            BackendId::Search => "SEARCH_SERVICE_KEY",
        }
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Base URL and service credential for one backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub id: BackendId,
    pub base_url: String,
    pub service_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Listen host address
    pub host: String,

    /// Listen port
    pub port: u16,

    /// Shared secret for bearer token verification (HS256)
    pub auth_secret: String,

    /// Externally visible frontend origin, used for CORS
    pub frontend_origin: String,

    /// Per-backend base URLs and credentials
    pub backends: Vec<BackendConfig>,

    /// Upstream connect + response timeout in seconds
    pub upstream_timeout_secs: u64,

    /// Include upstream error detail in 500 bodies
    pub dev_mode: bool,

    /// Log level
    pub log_level: String,
}

/// All required keys that were missing or empty, reported at once so a
/// misconfigured deployment needs a single restart cycle to fix.
#[derive(Debug)]
pub struct MissingConfig {
    pub keys: Vec<String>,
}

impl fmt::Display for MissingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "missing required configuration:")?;
        for key in &self.keys {
            writeln!(f, "  {}", key)?;
        }
        Ok(())
    }
}

impl std::error::Error for MissingConfig {}

impl GatewayConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through a key lookup function. Factored out of
    /// `from_env` so tests can exercise the missing-key aggregation without
    /// mutating process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut missing: Vec<String> = Vec::new();

        let mut require = |key: &str| -> String {
            match lookup(key) {
                Some(value) if !value.trim().is_empty() => value,
                _ => {
                    missing.push(key.to_string());
                    String::new()
                }
            }
        };

        let auth_secret = require("AUTH_TOKEN_SECRET");
        let frontend_origin = require("FRONTEND_ORIGIN");

        let mut backends = Vec::with_capacity(BackendId::ALL.len());
        for id in BackendId::ALL {
            let base_url = require(id.url_env_key());
            let service_key = require(id.key_env_key());
            backends.push(BackendConfig {
                id,
                base_url: base_url.trim_end_matches('/').to_string(),
                service_key,
            });
        }

        if !missing.is_empty() {
            return Err(MissingConfig { keys: missing }.into());
        }

        let host = lookup("GATEWAY_HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port = lookup("GATEWAY_PORT")
            .unwrap_or_else(|| "8080".to_string())
            .parse()
            .context("Invalid GATEWAY_PORT")?;

        let upstream_timeout_secs = lookup("UPSTREAM_TIMEOUT_SECS")
            .unwrap_or_else(|| "60".to_string())
            .parse()
            .context("Invalid UPSTREAM_TIMEOUT_SECS")?;

        let dev_mode = lookup("GATEWAY_DEV_MODE")
            .unwrap_or_else(|| "false".to_string())
            .parse()
            .context("Invalid GATEWAY_DEV_MODE")?;

        let log_level = lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        let config = Self {
            host,
            port,
            auth_secret,
            frontend_origin,
            backends,
            upstream_timeout_secs,
            dev_mode,
            log_level,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        for backend in &self.backends {
            let parsed = url::Url::parse(&backend.base_url).with_context(|| {
                format!("Invalid base URL for {} backend: {}", backend.id, backend.base_url)
            })?;
            if !matches!(parsed.scheme(), "http" | "https") {
                anyhow::bail!(
                    "Backend {} base URL must be http or https, got {}",
                    backend.id,
                    parsed.scheme()
                );
            }
        }

        if self.upstream_timeout_secs == 0 {
            anyhow::bail!("UPSTREAM_TIMEOUT_SECS must be greater than 0");
        }

        Ok(())
    }

    pub fn backend(&self, id: BackendId) -> &BackendConfig {
        self.backends
            .iter()
            .find(|b| b.id == id)
            .expect("every BackendId is populated at startup")
    }

    /// Get upstream timeout as Duration
    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }

    /// Get the listen address
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
