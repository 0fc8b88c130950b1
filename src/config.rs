//! Configuration types, loaded from `TELE_RELAY_*` environment variables.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::model::AccountId;

const PREFIX: &str = "TELE_RELAY_";

/// Full process configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// The single user allowed to drive the control surface.
    pub owner_id: AccountId,
    pub bot: BotConfig,
    pub gateway: GatewayConfig,
    /// libSQL database file.
    pub database_path: PathBuf,
    pub logging: LoggingConfig,
    pub session: SessionConfig,
    pub dispatch: DispatchConfig,
}

/// Relay identity (Bot API) settings.
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub token: SecretString,
    /// Bot API base, without a trailing slash.
    pub api_url: String,
    /// Proxy for Bot API calls, already normalized by [`normalize_proxy`].
    pub proxy_url: Option<String>,
}

/// Session gateway sidecar.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// `http(s)://host:port`, without a trailing slash.
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub dir: PathBuf,
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
}

/// Session lifecycle bounds.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Bound on opening and authenticating one session.
    pub connect_timeout: Duration,
    /// Bound on `stop_all`, and on draining one session's in-flight event.
    pub shutdown_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(15),
        }
    }
}

/// Forwarding dispatcher bounds.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Bound on each notify / forward / confirm step.
    pub send_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            send_timeout: Duration::from_secs(20),
        }
    }
}

impl RelayConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary lookup. `lookup` receives full variable names.
    pub fn from_vars<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(&format!("{PREFIX}{name}"))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let require = |name: &str| {
            get(name).ok_or_else(|| ConfigError::MissingEnvVar(format!("{PREFIX}{name}")))
        };
        let seconds = |name: &str, default: u64| -> Result<Duration, ConfigError> {
            match get(name) {
                None => Ok(Duration::from_secs(default)),
                Some(raw) => match raw.parse::<u64>() {
                    Ok(0) | Err(_) => Err(ConfigError::InvalidValue {
                        key: format!("{PREFIX}{name}"),
                        message: format!("expected a positive number of seconds, got {raw:?}"),
                    }),
                    Ok(n) => Ok(Duration::from_secs(n)),
                },
            }
        };

        let token = require("BOT_TOKEN")?;

        let owner_raw = require("OWNER_ID")?;
        let owner_id = match owner_raw.parse::<AccountId>() {
            Ok(0) | Err(_) => {
                return Err(ConfigError::InvalidValue {
                    key: format!("{PREFIX}OWNER_ID"),
                    message: format!("expected a non-zero integer, got {owner_raw:?}"),
                });
            }
            Ok(id) => id,
        };

        let gateway_url = require("GATEWAY_URL")?;
        if !(gateway_url.starts_with("http://") || gateway_url.starts_with("https://")) {
            return Err(ConfigError::InvalidValue {
                key: format!("{PREFIX}GATEWAY_URL"),
                message: format!("expected an http:// or https:// URL, got {gateway_url:?}"),
            });
        }

        Ok(Self {
            owner_id,
            bot: BotConfig {
                token: SecretString::from(token),
                api_url: get("BOT_API_URL")
                    .unwrap_or_else(|| "https://api.telegram.org".to_string())
                    .trim_end_matches('/')
                    .to_string(),
                proxy_url: get("PROXY_URL").map(|p| normalize_proxy(&p)),
            },
            gateway: GatewayConfig {
                url: gateway_url.trim_end_matches('/').to_string(),
            },
            database_path: get("DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data/tele-relay.db")),
            logging: LoggingConfig {
                dir: get("LOG_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("./logs")),
                level: get("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            },
            session: SessionConfig {
                connect_timeout: seconds("CONNECT_TIMEOUT_SECS", 30)?,
                shutdown_timeout: seconds("SHUTDOWN_TIMEOUT_SECS", 15)?,
            },
            dispatch: DispatchConfig {
                send_timeout: seconds("SEND_TIMEOUT_SECS", 20)?,
            },
        })
    }
}

/// Keep `socks4`, `socks5`, and `http` proxies as given; anything else
/// (including a missing scheme) is treated as `http`.
pub fn normalize_proxy(url: &str) -> String {
    match url.split_once("://") {
        Some((scheme, rest)) => match scheme.to_ascii_lowercase().as_str() {
            "socks4" | "socks5" | "http" => url.to_string(),
            _ => format!("http://{rest}"),
        },
        None => format!("http://{url}"),
    }
}
