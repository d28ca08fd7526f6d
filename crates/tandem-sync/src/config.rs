use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::backoff::Backoff;

/// Tunables for a chat session. Defaults suit a mobile-ish client; every
/// field can be overridden from the environment with [`SyncConfig::from_env`].
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// How long `open()` and each connect attempt wait for the live channel.
    pub connect_timeout: Duration,
    pub reconnect_base_delay: Duration,
    pub reconnect_max_delay: Duration,
    /// Extra random delay, as a fraction of the un-jittered delay.
    pub reconnect_jitter: f64,
    /// Consecutive failed attempts before the link gives up. 0 = never.
    pub max_reconnect_attempts: u32,
    pub heartbeat_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            reconnect_base_delay: Duration::from_millis(500),
            reconnect_max_delay: Duration::from_secs(30),
            reconnect_jitter: 0.25,
            max_reconnect_attempts: 10,
            heartbeat_interval: Duration::from_secs(15),
        }
    }
}

impl SyncConfig {
    /// Read `TANDEM_*` overrides on top of the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            connect_timeout: Duration::from_millis(env_or(
                "TANDEM_CONNECT_TIMEOUT_MS",
                millis(defaults.connect_timeout),
            )),
            reconnect_base_delay: Duration::from_millis(env_or(
                "TANDEM_RECONNECT_BASE_MS",
                millis(defaults.reconnect_base_delay),
            )),
            reconnect_max_delay: Duration::from_millis(env_or(
                "TANDEM_RECONNECT_MAX_MS",
                millis(defaults.reconnect_max_delay),
            )),
            reconnect_jitter: env_or("TANDEM_RECONNECT_JITTER", defaults.reconnect_jitter),
            max_reconnect_attempts: env_or(
                "TANDEM_MAX_RECONNECT_ATTEMPTS",
                defaults.max_reconnect_attempts,
            ),
            heartbeat_interval: Duration::from_secs(env_or(
                "TANDEM_HEARTBEAT_SECS",
                defaults.heartbeat_interval.as_secs(),
            )),
        }
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            self.reconnect_base_delay,
            self.reconnect_max_delay,
            self.reconnect_jitter,
        )
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Ignoring unparsable {}={:?}", key, raw);
            default
        }),
        Err(_) => default,
    }
}
