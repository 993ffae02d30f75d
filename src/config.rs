//! Configuration management
//!
//! Built once at startup from the environment (after `dotenvy` has layered
//! `defaults.env` and `.env` underneath) and passed into each component.

use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;
use std::path::PathBuf;
use std::time::Duration;

use crate::recovery::CallPolicy;

static DURATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:(\d+(?:\.\d+)?)\s*([smhd])\s*)+$").unwrap());
static DURATION_PART: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*([smhd])").unwrap());

/// Fields the bot cannot run without
const REQUIRED_FIELDS: [&str; 4] = ["BOT_NAME", "SOURCE_USERNAME", "API_BASE_URL", "ACCESS_TOKEN"];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Can't run without {}", .0.join(", "))]
    MissingFields(Vec<String>),

    #[error("Invalid value for {field}: {value:?}")]
    Invalid { field: String, value: String },
}

/// Inclusive range of seconds to wait before reacting
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DelayRange {
    pub min: Duration,
    pub max: Duration,
}

impl DelayRange {
    pub fn fixed(delay: Duration) -> Self {
        Self { min: delay, max: delay }
    }

    /// Parse `"5"`, `"2.5"`, `"1..6"` or `"1...6"` (seconds)
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        let (lo, hi) = match value.split_once("...").or_else(|| value.split_once("..")) {
            Some((lo, hi)) => (lo.trim().parse::<f64>().ok()?, hi.trim().parse::<f64>().ok()?),
            None => {
                let n = value.parse::<f64>().ok()?;
                (n, n)
            }
        };

        if lo < 0.0 || hi < lo || !hi.is_finite() {
            return None;
        }

        Some(Self {
            min: Duration::try_from_secs_f64(lo).ok()?,
            max: Duration::try_from_secs_f64(hi).ok()?,
        })
    }

    /// Pick a delay within the range
    pub fn sample(&self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        rand::thread_rng().gen_range(self.min..=self.max)
    }
}

impl Default for DelayRange {
    fn default() -> Self {
        Self::fixed(Duration::ZERO)
    }
}

/// Bot configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Account the bot posts as
    pub bot_name: String,

    /// Account whose posts form the archive
    pub source_username: String,

    /// Mastodon-compatible server, e.g. https://botsin.space
    pub api_base_url: String,

    pub access_token: String,

    /// Archive location (file, or directory the archive file name is appended to)
    pub archive_path: PathBuf,

    /// Model location (file or directory)
    pub model_path: PathBuf,

    /// Remote object store endpoint; `None` keeps every artifact local-only
    pub remote_store_url: Option<String>,

    pub remote_store_token: Option<String>,

    pub tweet_interval: Duration,
    pub update_follows_interval: Duration,
    pub refresh_model_interval: Duration,
    pub poll_interval: Duration,

    /// Probability that a post tick actually posts
    pub tweet_chance: f64,

    /// Retryable failures tolerated per wrapped call
    pub max_error_retries: u32,

    /// Cooldown after a timeout/capacity error
    pub timeout_sleep: Duration,

    /// Accounts never answered (compared case-insensitively)
    pub blacklist: Vec<String>,

    /// Words obscured in everything the bot posts
    pub banned_terms: Vec<String>,

    pub default_delay: DelayRange,
    pub dm_delay: DelayRange,
    pub mention_delay: DelayRange,

    pub max_post_length: usize,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from any key lookup (environment, map, ...)
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let missing: Vec<String> = REQUIRED_FIELDS
            .iter()
            .filter(|field| get(**field).is_none())
            .map(|field| field.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ConfigError::MissingFields(missing));
        }

        let required = |key: &str| get(key).unwrap_or_default();
        let source_username = required("SOURCE_USERNAME");

        let path = |key: &str, default: String| -> PathBuf {
            let raw = get(key).unwrap_or(default);
            PathBuf::from(shellexpand::tilde(&raw).into_owned())
        };

        let duration = |key: &str, default: Duration| -> Result<Duration, ConfigError> {
            match get(key) {
                Some(v) => parse_duration(&v).ok_or_else(|| invalid(key, &v)),
                None => Ok(default),
            }
        };

        let delay = |key: &str| -> Result<Option<DelayRange>, ConfigError> {
            match get(key) {
                Some(v) => DelayRange::parse(&v).map(Some).ok_or_else(|| invalid(key, &v)),
                None => Ok(None),
            }
        };

        let default_delay = delay("DEFAULT_DELAY")?.unwrap_or_default();

        let tweet_chance = match get("TWEET_CHANCE") {
            Some(v) => v
                .parse::<f64>()
                .ok()
                .filter(|c| (0.0..=1.0).contains(c))
                .ok_or_else(|| invalid("TWEET_CHANCE", &v))?,
            None => 1.0,
        };

        let max_error_retries = match get("MAX_ERROR_RETRIES") {
            Some(v) => v.parse().map_err(|_| invalid("MAX_ERROR_RETRIES", &v))?,
            None => 3,
        };

        let max_post_length = match get("MAX_POST_LENGTH") {
            Some(v) => v
                .parse()
                .ok()
                .filter(|n: &usize| *n > 0)
                .ok_or_else(|| invalid("MAX_POST_LENGTH", &v))?,
            None => 280,
        };

        Ok(Self {
            bot_name: required("BOT_NAME"),
            api_base_url: required("API_BASE_URL"),
            access_token: required("ACCESS_TOKEN"),
            archive_path: path("ARCHIVE_PATH", format!("corpus/{}.json", source_username)),
            model_path: path("MODEL_PATH", format!("model/{}.model", source_username)),
            source_username,
            remote_store_url: get("REMOTE_STORE_URL"),
            remote_store_token: get("REMOTE_STORE_TOKEN"),
            tweet_interval: duration("TWEET_INTERVAL", Duration::from_secs(2 * 3600))?,
            update_follows_interval: duration("UPDATE_FOLLOWS_INTERVAL", Duration::from_secs(3600))?,
            refresh_model_interval: duration("REFRESH_MODEL_INTERVAL", Duration::from_secs(24 * 3600))?,
            poll_interval: duration("POLL_INTERVAL", Duration::from_secs(60))?,
            tweet_chance,
            max_error_retries,
            timeout_sleep: duration("TIMEOUT_SLEEP", Duration::from_secs(30))?,
            blacklist: get("BLACKLIST").map(|v| parse_list(&v)).unwrap_or_default(),
            banned_terms: get("BANNED_TERMS").map(|v| parse_list(&v)).unwrap_or_default(),
            dm_delay: delay("DM_DELAY")?.unwrap_or(default_delay),
            mention_delay: delay("MENTION_DELAY")?.unwrap_or(default_delay),
            default_delay,
            max_post_length,
        })
    }

    /// Retry policy for every wrapped remote call
    pub fn call_policy(&self) -> CallPolicy {
        CallPolicy {
            max_retries: self.max_error_retries,
            timeout_cooldown: self.timeout_sleep,
            ..CallPolicy::default()
        }
    }

    /// Whether the remote object store is configured
    pub fn remote_enabled(&self) -> bool {
        self.remote_store_url.is_some()
    }

    pub fn is_blacklisted(&self, username: &str) -> bool {
        self.blacklist.iter().any(|b| b.eq_ignore_ascii_case(username))
    }
}

fn invalid(field: &str, value: &str) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        value: value.to_string(),
    }
}

/// Split a comma/semicolon separated list
pub fn parse_list(value: &str) -> Vec<String> {
    value
        .split([',', ';'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Parse `"45s"`, `"30m"`, `"2h"`, `"1d"`, `"1h30m"` or bare seconds
pub fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<f64>() {
        return Duration::try_from_secs_f64(secs).ok();
    }

    if !DURATION.is_match(value) {
        return None;
    }

    let total: f64 = DURATION_PART
        .captures_iter(value)
        .filter_map(|c| {
            let n: f64 = c[1].parse().ok()?;
            let unit = match &c[2] {
                "s" => 1.0,
                "m" => 60.0,
                "h" => 3600.0,
                _ => 86400.0,
            };
            Some(n * unit)
        })
        .sum();

    Duration::try_from_secs_f64(total).ok()
}
