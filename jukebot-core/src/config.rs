// jukebot-core/src/config.rs
//
// Engine configuration. Every section has defaults and a range check; an
// `EngineConfig` can only be obtained through `new`, `Default` or
// deserialization, all of which validate.

use std::fmt::Display;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Error;

fn check_range<T: PartialOrd + Display>(name: &str, value: T, min: T, max: T) -> Result<(), Error> {
    if value < min || value > max {
        return Err(Error::Validation(format!(
            "{name} must be between {min} and {max}, got {value}"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of pending tracks (the now-playing track is not counted).
    pub max_queue_size: usize,
    pub history_limit: usize,
    pub default_volume: f32,
    /// Tracks that may fail to start back to back before playback gives up.
    pub max_consecutive_failures: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 50,
            history_limit: 50,
            default_volume: 0.5,
            max_consecutive_failures: 3,
        }
    }
}

impl QueueConfig {
    pub fn validate(&self) -> Result<(), Error> {
        check_range("queue.max_queue_size", self.max_queue_size, 1, 1000)?;
        check_range("queue.history_limit", self.history_limit, 1, 1000)?;
        check_range("queue.default_volume", self.default_volume, 0.0, 2.0)?;
        check_range("queue.max_consecutive_failures", self.max_consecutive_failures, 1, 100)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VotingConfig {
    pub skip_threshold_percentage: f64,
    pub min_voters: usize,
    /// At or below this many listeners a single vote is enough.
    pub auto_skip_listener_count: usize,
}

impl Default for VotingConfig {
    fn default() -> Self {
        Self {
            skip_threshold_percentage: 0.5,
            min_voters: 1,
            auto_skip_listener_count: 2,
        }
    }
}

impl VotingConfig {
    pub fn new(
        skip_threshold_percentage: f64,
        min_voters: usize,
        auto_skip_listener_count: usize,
    ) -> Result<Self, Error> {
        let cfg = Self {
            skip_threshold_percentage,
            min_voters,
            auto_skip_listener_count,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), Error> {
        check_range("voting.skip_threshold_percentage", self.skip_threshold_percentage, 0.0, 1.0)?;
        check_range("voting.min_voters", self.min_voters, 1, 100)?;
        check_range("voting.auto_skip_listener_count", self.auto_skip_listener_count, 0, 100)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoSkipConfig {
    pub enabled: bool,
    pub prompt_timeout_secs: u64,
}

impl Default for AutoSkipConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            prompt_timeout_secs: 30,
        }
    }
}

impl AutoSkipConfig {
    pub fn prompt_timeout(&self) -> Duration {
        Duration::from_secs(self.prompt_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), Error> {
        check_range("autoskip.prompt_timeout_secs", self.prompt_timeout_secs, 1, 600)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    pub interval_secs: u64,
    pub stale_after_secs: u64,
    pub history_retention_days: i64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30 * 60,
            stale_after_secs: 24 * 3600,
            history_retention_days: 30,
        }
    }
}

impl CleanupConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn validate(&self) -> Result<(), Error> {
        check_range("cleanup.interval_secs", self.interval_secs, 1, 7 * 24 * 3600)?;
        check_range("cleanup.stale_after_secs", self.stale_after_secs, 1, 30 * 24 * 3600)?;
        check_range("cleanup.history_retention_days", self.history_retention_days, 1, 3650)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    /// Tracks requested from the recommender per refill.
    pub batch_size: usize,
    pub max_tracks_per_session: usize,
    /// Refill once this many or fewer tracks are pending.
    pub low_water_mark: usize,
    /// Recent history entries used as seeds alongside the current track.
    pub seed_history: usize,
    pub cache_ttl_secs: u64,
    pub cache_max_entries: usize,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            max_tracks_per_session: 50,
            low_water_mark: 1,
            seed_history: 5,
            cache_ttl_secs: 3600,
            cache_max_entries: 256,
        }
    }
}

impl RadioConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn validate(&self) -> Result<(), Error> {
        check_range("radio.batch_size", self.batch_size, 1, 10)?;
        check_range("radio.max_tracks_per_session", self.max_tracks_per_session, 1, 200)?;
        check_range("radio.low_water_mark", self.low_water_mark, 0, 10)?;
        check_range("radio.seed_history", self.seed_history, 0, 20)?;
        check_range("radio.cache_ttl_secs", self.cache_ttl_secs, 1, 7 * 24 * 3600)?;
        check_range("radio.cache_max_entries", self.cache_max_entries, 1, 10_000)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub attempts: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 5_000,
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn validate(&self) -> Result<(), Error> {
        check_range("retry.attempts", self.attempts, 1, 10)?;
        check_range("retry.max_delay_ms", self.max_delay_ms, self.base_delay_ms, 60_000)
    }
}

/// Raw, unvalidated shape of the configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfigFile {
    pub queue: QueueConfig,
    pub voting: VotingConfig,
    pub autoskip: AutoSkipConfig,
    pub cleanup: CleanupConfig,
    pub radio: RadioConfig,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "EngineConfigFile")]
pub struct EngineConfig {
    queue: QueueConfig,
    voting: VotingConfig,
    autoskip: AutoSkipConfig,
    cleanup: CleanupConfig,
    radio: RadioConfig,
    retry: RetryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            queue: QueueConfig::default(),
            voting: VotingConfig::default(),
            autoskip: AutoSkipConfig::default(),
            cleanup: CleanupConfig::default(),
            radio: RadioConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl TryFrom<EngineConfigFile> for EngineConfig {
    type Error = Error;

    fn try_from(raw: EngineConfigFile) -> Result<Self, Self::Error> {
        EngineConfig::new(raw)
    }
}

impl EngineConfig {
    pub fn new(raw: EngineConfigFile) -> Result<Self, Error> {
        raw.queue.validate()?;
        raw.voting.validate()?;
        raw.autoskip.validate()?;
        raw.cleanup.validate()?;
        raw.radio.validate()?;
        raw.retry.validate()?;
        Ok(Self {
            queue: raw.queue,
            voting: raw.voting,
            autoskip: raw.autoskip,
            cleanup: raw.cleanup,
            radio: raw.radio,
            retry: raw.retry,
        })
    }

    pub fn from_json_str(s: &str) -> Result<Self, Error> {
        let raw: EngineConfigFile = serde_json::from_str(s)?;
        Self::new(raw)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn queue(&self) -> &QueueConfig {
        &self.queue
    }

    pub fn voting(&self) -> &VotingConfig {
        &self.voting
    }

    pub fn autoskip(&self) -> &AutoSkipConfig {
        &self.autoskip
    }

    pub fn cleanup(&self) -> &CleanupConfig {
        &self.cleanup
    }

    pub fn radio(&self) -> &RadioConfig {
        &self.radio
    }

    pub fn retry(&self) -> &RetryConfig {
        &self.retry
    }
}
