use anyhow::{Context, Result};
use rand::Rng;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_server_url")]
    pub server_url: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Fixed pause between failed registration attempts.
    #[serde(default = "default_registration_backoff")]
    pub registration_backoff_secs: u64,

    /// Enables diagnostic output on stderr when set (e.g. "debug").
    #[serde(default)]
    pub log_level: Option<String>,

    #[serde(default)]
    pub callback: CallbackConfig,
}

/// Beacon timing. Owned by the scheduler and changed only through
/// [`CallbackConfig::reconfigure`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CallbackConfig {
    /// Base check-in period in minutes.
    #[serde(default = "default_callback_freq")]
    pub callback_freq: u64,

    /// Upper bound, in percent of the base period, of the random extra delay.
    #[serde(default = "default_jitter")]
    pub jitter: u32,

    /// Consecutive failed check-ins tolerated before self-termination.
    #[serde(default = "default_self_terminate")]
    pub self_terminate: u32,

    /// Seconds to wait before the first registration attempt.
    #[serde(default = "default_start_delay")]
    pub start_delay: u64,
}

/// Values carried by a `reconfig` task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconfigure {
    pub callback_freq: u64,
    pub jitter: u32,
    pub self_terminate: u32,
}

fn default_server_url() -> String {
    "https://127.0.0.1:8000".to_string()
}
fn default_request_timeout() -> u64 {
    10
}
fn default_registration_backoff() -> u64 {
    60
}
fn default_callback_freq() -> u64 {
    1
}
fn default_jitter() -> u32 {
    15
}
fn default_self_terminate() -> u32 {
    20
}
fn default_start_delay() -> u64 {
    5
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            request_timeout_secs: default_request_timeout(),
            registration_backoff_secs: default_registration_backoff(),
            log_level: None,
            callback: CallbackConfig::default(),
        }
    }
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            callback_freq: default_callback_freq(),
            jitter: default_jitter(),
            self_terminate: default_self_terminate(),
            start_delay: default_start_delay(),
        }
    }
}

impl AgentConfig {
    /// Loads the TOML file at `path`, or the built-in defaults when no path is given.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: AgentConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        info!(
            "Loaded config: server={}, freq={}m, jitter={}%, threshold={}",
            config.server_url,
            config.callback.callback_freq,
            config.callback.jitter,
            config.callback.self_terminate
        );
        Ok(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn registration_backoff(&self) -> Duration {
        Duration::from_secs(self.registration_backoff_secs)
    }
}

impl CallbackConfig {
    /// Sleep length for a given jitter roll (a percentage, normally drawn from `0..=jitter`).
    pub fn interval_for_roll(&self, roll: u32) -> Duration {
        let base_secs = self.callback_freq.saturating_mul(60);
        let jitter_secs = base_secs.saturating_mul(u64::from(roll)) / 100;
        Duration::from_secs(base_secs.saturating_add(jitter_secs))
    }

    pub fn next_interval<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let roll = rng.gen_range(0..=self.jitter);
        self.interval_for_roll(roll)
    }

    pub fn start_delay(&self) -> Duration {
        Duration::from_secs(self.start_delay)
    }

    pub fn reconfigure(&mut self, update: Reconfigure) {
        self.callback_freq = update.callback_freq;
        self.jitter = update.jitter;
        self.self_terminate = update.self_terminate;
    }
}

impl Reconfigure {
    /// Parses `"freq jitter threshold"`.
    ///
    /// Parsing is permissive: a missing or non-numeric field becomes zero.
    pub fn parse(args: &str) -> Self {
        let mut fields = args.split_whitespace();
        let mut next = || fields.next().and_then(|f| f.parse::<u64>().ok()).unwrap_or(0);
        let callback_freq = next();
        let jitter = u32::try_from(next()).unwrap_or(0);
        let self_terminate = u32::try_from(next()).unwrap_or(0);
        Self {
            callback_freq,
            jitter,
            self_terminate,
        }
    }
}
