//! Session configuration and relay defaults.
//!
//! [`SessionConfig`] configures the sessions served by the [`server`] module.
//! The constants are the defaults used across the crate.
//!
//! [`server`]: crate::server

use crate::Broker;
use serde::{Deserialize, Deserializer};
use std::time::Duration;

pub use crate::broker::DEFAULT_READ_BUFFER_SIZE;

/// How long a blocking `pub` waits for its first subscriber by default.
pub const DEFAULT_PUB_TIMEOUT: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// How often a [`PurgeQueue`] publishes its pending keys by default.
///
/// [`PurgeQueue`]: crate::cache_drain::PurgeQueue
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);

/// Configuration for interactive sessions served by [`Connect`].
///
/// Deserializable from any serde format. Durations are written in
/// [`humantime`] notation, e.g. `"30days"` or `"1h 30m"`.
///
/// ```
/// # use tubecast::config::SessionConfig;
/// let cfg: SessionConfig = serde_json::from_str(
///     r#"{ "command_prefix": "nc relay.example 2222", "pub_timeout": "10m" }"#,
/// ).unwrap();
/// assert_eq!(cfg.pub_timeout.as_secs(), 600);
/// assert!(!cfg.admin);
/// ```
///
/// [`Connect`]: crate::server::Connect
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How users reach the server, shown in the subscribe hint printed by
    /// `pub` and `pipe`.
    pub command_prefix: String,
    /// Default for the `-t` flag of `pub`.
    #[serde(deserialize_with = "human_duration")]
    pub pub_timeout: Duration,
    /// Maximum size of a single read from a publishing session.
    pub read_buffer_size: usize,
    /// Namespace that topics are scoped to. `None` leaves topics verbatim.
    pub user: Option<String>,
    /// Whether sessions may list every topic and address raw topics.
    pub admin: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            command_prefix: "tubecast".to_owned(),
            pub_timeout: DEFAULT_PUB_TIMEOUT,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            user: None,
            admin: false,
        }
    }
}

impl SessionConfig {
    /// Set the command prefix.
    pub fn with_command_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.command_prefix = prefix.into();
        self
    }

    /// Set the default `pub` timeout.
    pub const fn with_pub_timeout(mut self, timeout: Duration) -> Self {
        self.pub_timeout = timeout;
        self
    }

    /// Set the read buffer size.
    pub const fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// Scope topics to `user`.
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Grant admin rights to sessions.
    pub const fn with_admin(mut self, admin: bool) -> Self {
        self.admin = admin;
        self
    }

    /// Build a relay over a new broker honoring this configuration.
    pub fn relay<P: From<Broker>>(&self) -> P {
        Broker::new()
            .with_read_buffer_size(self.read_buffer_size)
            .into()
    }
}

fn human_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    humantime::parse_duration(&s).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults() {
        let cfg: SessionConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg, SessionConfig::default());
        assert_eq!(cfg.pub_timeout, DEFAULT_PUB_TIMEOUT);
        assert_eq!(cfg.read_buffer_size, 32 * 1024);
    }

    #[test]
    fn rejects_bad_duration() {
        let res = serde_json::from_str::<SessionConfig>(r#"{ "pub_timeout": "soon" }"#);
        assert!(res.is_err());
    }

    #[test]
    fn builders() {
        let cfg = SessionConfig::default()
            .with_user("alice")
            .with_admin(true)
            .with_pub_timeout(Duration::from_secs(1));
        assert_eq!(cfg.user.as_deref(), Some("alice"));
        assert!(cfg.admin);
        assert_eq!(cfg.pub_timeout, Duration::from_secs(1));
    }
}
