//! Bot configuration.
//!
//! Everything the bot needs to know up front lives in one immutable
//! [`BotConfig`], built once at startup (normally from `LAGOON_BOT_*`
//! environment variables) and shared read-only afterwards.

use std::fmt;
use std::time::Duration;

use tracing::info;

/// Default IRC port.
pub const DEFAULT_PORT: u16 = 6667;

const DEFAULT_SERVER: &str = "irc.supernets.org";
const DEFAULT_NICK: &str = "GOnzo";
const DEFAULT_CHANNEL: &str = "#kushboy";

/// A host and port the bot can dial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Who the bot says it is during registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub nickname: String,
    pub username: String,
}

/// The single channel the bot lives in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRef {
    pub name: String,
}

/// How hard to try each endpoint before giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Dial attempts against the primary endpoint.
    pub primary_attempts: u32,
    /// Pause after each failed primary attempt.
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            primary_attempts: 3,
            retry_delay: Duration::from_secs(2),
        }
    }
}

/// Deadlines applied to socket operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Upper bound on a single TCP dial.
    pub connect: Duration,
    /// Read deadline until the server welcomes us.
    pub handshake: Duration,
    /// Read deadline once joined. Silence this long triggers a reconnect.
    pub idle: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            handshake: Duration::from_secs(30),
            idle: Duration::from_secs(5 * 60),
        }
    }
}

/// Immutable bot configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotConfig {
    pub primary: Endpoint,
    /// `None` when no backup host is configured.
    pub backup: Option<Endpoint>,
    pub identity: Identity,
    pub channel: ChannelRef,
    pub retry: RetryPolicy,
    pub timeouts: Timeouts,
}

/// Errors from reading configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid port {value:?} in {var}")]
    InvalidPort { var: &'static str, value: String },
    #[error("{var} must not be empty")]
    Empty { var: &'static str },
}

impl BotConfig {
    /// Build a configuration with default policy and timeouts.
    ///
    /// An empty `backup_host` disables failover.
    pub fn new(
        primary_host: &str,
        backup_host: &str,
        port: u16,
        nickname: &str,
        username: &str,
        channel: &str,
    ) -> Self {
        let backup = (!backup_host.is_empty()).then(|| Endpoint::new(backup_host, port));
        Self {
            primary: Endpoint::new(primary_host, port),
            backup,
            identity: Identity {
                nickname: nickname.into(),
                username: username.into(),
            },
            channel: ChannelRef {
                name: channel.into(),
            },
            retry: RetryPolicy::default(),
            timeouts: Timeouts::default(),
        }
    }

    /// Load configuration from `LAGOON_BOT_*` environment variables.
    ///
    /// - `LAGOON_BOT_SERVER` — primary host (default `irc.supernets.org`)
    /// - `LAGOON_BOT_BACKUP` — backup host, empty disables (default empty)
    /// - `LAGOON_BOT_PORT` — port for both hosts (default 6667)
    /// - `LAGOON_BOT_NICK` / `LAGOON_BOT_USER` — identity (default `GOnzo`)
    /// - `LAGOON_BOT_CHANNEL` — channel to join (default `#kushboy`)
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self::from_lookup(|var| std::env::var(var).ok())?;
        info!(
            primary = %config.primary,
            backup = config.backup.as_ref().map(|e| e.to_string()).unwrap_or_default(),
            nick = %config.identity.nickname,
            channel = %config.channel.name,
            "config: loaded"
        );
        Ok(config)
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str, default: &str| {
            lookup(var)
                .map(|v| v.trim().to_string())
                .unwrap_or_else(|| default.to_string())
        };
        let required = |var: &'static str, default: &str| {
            let value = get(var, default);
            if value.is_empty() {
                Err(ConfigError::Empty { var })
            } else {
                Ok(value)
            }
        };

        let primary = required("LAGOON_BOT_SERVER", DEFAULT_SERVER)?;
        let backup = get("LAGOON_BOT_BACKUP", "");
        let port_str = get("LAGOON_BOT_PORT", &DEFAULT_PORT.to_string());
        let port = port_str.parse::<u16>().map_err(|_| ConfigError::InvalidPort {
            var: "LAGOON_BOT_PORT",
            value: port_str.clone(),
        })?;
        let nickname = required("LAGOON_BOT_NICK", DEFAULT_NICK)?;
        let username = required("LAGOON_BOT_USER", &nickname)?;
        let channel = required("LAGOON_BOT_CHANNEL", DEFAULT_CHANNEL)?;

        Ok(Self::new(&primary, &backup, port, &nickname, &username, &channel))
    }
}
