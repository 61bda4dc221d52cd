use std::collections::HashMap;
use std::time::Duration;

use tracing::debug;

use crate::error::Error;

/// Default inactivity watchdog: reclaim a pollable after 300 seconds.
pub const DEFAULT_WATCHDOG: Duration = Duration::from_secs(300);

/// Default cap on the bytes read from a socket in one recv.
pub const DEFAULT_MAX_RECV: usize = 1 << 18;

/// Configuration for the reactor runtime.
#[derive(Clone)]
pub struct Config {
    /// Try IPv6 addresses before IPv4 when connecting.
    pub prefer_ipv6: bool,
    /// Maximum number of bytes read from a socket in one recv.
    pub max_recv: usize,
    /// TCP listen backlog.
    pub backlog: i32,
    /// Inactivity watchdog applied to new streams. `None` never expires.
    pub watchdog: Option<Duration>,
    /// Watchdog bounding a single connect attempt.
    pub connect_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            prefer_ipv6: false,
            max_recv: DEFAULT_MAX_RECV,
            backlog: 128,
            watchdog: Some(DEFAULT_WATCHDOG),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl Config {
    /// Populate a config from the flat string map produced by an external
    /// configuration-file parser. Unknown keys are ignored.
    pub fn from_map(map: &HashMap<String, String>) -> Self {
        let mut config = Config::default();
        for (key, value) in map {
            match key.as_str() {
                "prefer_ipv6" => config.prefer_ipv6 = parse_bool(value),
                _ => debug!(key = %key, "ignoring unknown configuration key"),
            }
        }
        config
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), Error> {
        if self.max_recv == 0 {
            return Err(Error::InvalidConfig("max_recv must be > 0".into()));
        }
        if self.backlog <= 0 {
            return Err(Error::InvalidConfig("backlog must be > 0".into()));
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Builder for [`Config`] with `build()` validation.
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder with default config values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Try IPv6 addresses before IPv4 when connecting.
    pub fn prefer_ipv6(mut self, enable: bool) -> Self {
        self.config.prefer_ipv6 = enable;
        self
    }

    /// Set the per-recv byte cap.
    pub fn max_recv(mut self, n: usize) -> Self {
        self.config.max_recv = n;
        self
    }

    /// Set the TCP listen backlog.
    pub fn backlog(mut self, n: i32) -> Self {
        self.config.backlog = n;
        self
    }

    /// Set the stream inactivity watchdog. `None` never expires.
    pub fn watchdog(mut self, timeout: Option<Duration>) -> Self {
        self.config.watchdog = timeout;
        self
    }

    /// Set the connect-attempt watchdog.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Validate and build the final [`Config`].
    pub fn build(self) -> Result<Config, Error> {
        self.config.validate()?;
        Ok(self.config)
    }
}
