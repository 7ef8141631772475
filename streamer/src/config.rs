//! Service configuration.
//!
//! Every field has a default and can be overridden through a `STREAMER_*`
//! environment variable. Values that are present but unparsable stop startup
//! with [`Error::Configuration`].

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::encoder::{OutputFormat, QualityProfile};
use crate::session::{FlagFilterKind, FlagPolicy, FlagScope};
use crate::{Error, Result};

/// Default scratch root on the RAM-backed volume.
pub const DEFAULT_SCRATCH_ROOT: &str = "/tmp/ramdrive/stream";

/// Default source template; `{channel}` is replaced by the channel id.
pub const DEFAULT_SOURCE_URL_TEMPLATE: &str =
    "http://127.0.0.1:9981/stream/channelid/{channel}?profile=pass";

/// HTTP listener settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    /// Use the first `X-Forwarded-For` entry as the client address.
    pub trust_forwarded_for: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8000,
            trust_forwarded_for: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    pub scratch_root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            scratch_root: PathBuf::from(DEFAULT_SCRATCH_ROOT),
        }
    }
}

/// Encoder invocation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncoderConfig {
    pub ffmpeg_path: String,
    pub source_url_template: String,
    /// Absolute base for variant URIs; relative URIs when unset.
    pub public_base_url: Option<String>,
    pub output_format: OutputFormat,
    pub profiles: Vec<QualityProfile>,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            source_url_template: DEFAULT_SOURCE_URL_TEMPLATE.to_string(),
            public_base_url: None,
            output_format: OutputFormat::default(),
            profiles: QualityProfile::defaults(),
        }
    }
}

impl EncoderConfig {
    /// Files the readiness barrier waits for after a launch.
    pub fn readiness_files(&self) -> Vec<String> {
        match self.output_format {
            OutputFormat::Dash => vec![self.output_format.entry_file().to_string()],
            OutputFormat::Hls => self
                .profiles
                .iter()
                .map(QualityProfile::playlist_name)
                .collect(),
        }
    }
}

/// Viewer liveness and circuit-breaker settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub inactivity_timeout_secs: u64,
    pub flag_cooldown_secs: u64,
    pub sweep_interval_secs: u64,
    pub flag_scope: FlagScope,
    pub flag_filter: FlagFilterKind,
    pub cast_markers: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout_secs: 20,
            flag_cooldown_secs: 180,
            sweep_interval_secs: 5,
            flag_scope: FlagScope::default(),
            flag_filter: FlagFilterKind::default(),
            cast_markers: vec!["CrKey".to_string()],
        }
    }
}

impl SessionConfig {
    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.inactivity_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn flag_policy(&self) -> FlagPolicy {
        FlagPolicy::new(
            self.flag_scope,
            self.flag_filter.build(&self.cast_markers),
            Duration::from_secs(self.flag_cooldown_secs),
        )
    }
}

/// Readiness barrier and segment lookup settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadinessConfig {
    /// A manifest must be strictly larger than this to count as ready.
    pub min_bytes: u64,
    pub max_wait_secs: u64,
    pub poll_interval_ms: u64,
    /// Attempts to find a requested segment before answering 404.
    pub segment_attempts: u32,
    pub segment_retry_delay_ms: u64,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            min_bytes: 500,
            max_wait_secs: 15,
            poll_interval_ms: 100,
            segment_attempts: 3,
            segment_retry_delay_ms: 100,
        }
    }
}

impl ReadinessConfig {
    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn segment_retry_delay(&self) -> Duration {
        Duration::from_millis(self.segment_retry_delay_ms)
    }
}

/// Reclaim policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReclaimMode {
    /// Oldest segments across all channels, driven by free space.
    #[default]
    Global,
    /// Transport-stream segments older than a fixed lifetime.
    PerChannel,
}

impl FromStr for ReclaimMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "global" => Ok(ReclaimMode::Global),
            "per_channel" | "channel" => Ok(ReclaimMode::PerChannel),
            other => Err(Error::config(format!("unknown reclaim mode: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReclaimConfig {
    pub mode: ReclaimMode,
    pub min_free_bytes: u64,
    pub global_interval_secs: u64,
    pub channel_interval_secs: u64,
    pub segment_lifetime_secs: u64,
}

impl Default for ReclaimConfig {
    fn default() -> Self {
        Self {
            mode: ReclaimMode::default(),
            min_free_bytes: 200_000_000,
            global_interval_secs: 60,
            channel_interval_secs: 30,
            segment_lifetime_secs: 720,
        }
    }
}

impl ReclaimConfig {
    pub fn with_mode(mut self, mode: ReclaimMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_min_free_bytes(mut self, bytes: u64) -> Self {
        self.min_free_bytes = bytes;
        self
    }

    pub fn segment_lifetime(&self) -> Duration {
        Duration::from_secs(self.segment_lifetime_secs)
    }

    /// Period of the loop for the configured mode.
    pub fn pass_interval(&self) -> Duration {
        match self.mode {
            ReclaimMode::Global => Duration::from_secs(self.global_interval_secs),
            ReclaimMode::PerChannel => Duration::from_secs(self.channel_interval_secs),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Directory for daily-rotated log files; stdout only when unset.
    pub log_dir: Option<PathBuf>,
}

/// Complete service configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamerConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub encoder: EncoderConfig,
    pub session: SessionConfig,
    pub readiness: ReadinessConfig,
    pub reclaim: ReclaimConfig,
    pub logging: LoggingConfig,
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| Error::config(format!("{key}={raw}: {e}")))
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::config(format!("{key}={raw}: expected a boolean"))),
    }
}

impl StreamerConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let mut config = Self::default();

        if let Some(v) = get("STREAMER_BIND_ADDRESS") {
            config.server.bind_address = v.trim().to_string();
        }
        if let Some(v) = get("STREAMER_PORT") {
            config.server.port = parse_value("STREAMER_PORT", &v)?;
        }
        if let Some(v) = get("STREAMER_TRUST_FORWARDED_FOR") {
            config.server.trust_forwarded_for = parse_bool("STREAMER_TRUST_FORWARDED_FOR", &v)?;
        }

        if let Some(v) = get("STREAMER_SCRATCH_ROOT") {
            config.storage.scratch_root = PathBuf::from(v.trim());
        }

        if let Some(v) = get("STREAMER_SOURCE_URL_TEMPLATE") {
            config.encoder.source_url_template = v.trim().to_string();
        }
        if let Some(v) = get("STREAMER_PUBLIC_BASE_URL") {
            config.encoder.public_base_url = Some(v.trim().to_string());
        }
        if let Some(v) = get("STREAMER_FFMPEG_PATH") {
            config.encoder.ffmpeg_path = v.trim().to_string();
        }
        if let Some(v) = get("STREAMER_OUTPUT_FORMAT") {
            config.encoder.output_format = parse_value("STREAMER_OUTPUT_FORMAT", &v)?;
        }
        if let Some(v) = get("STREAMER_PROFILES") {
            config.encoder.profiles = serde_json::from_str(&v)
                .map_err(|e| Error::config(format!("STREAMER_PROFILES: {e}")))?;
        }

        if let Some(v) = get("STREAMER_INACTIVITY_TIMEOUT_SECS") {
            config.session.inactivity_timeout_secs =
                parse_value("STREAMER_INACTIVITY_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("STREAMER_FLAG_COOLDOWN_SECS") {
            config.session.flag_cooldown_secs = parse_value("STREAMER_FLAG_COOLDOWN_SECS", &v)?;
        }
        if let Some(v) = get("STREAMER_SWEEP_INTERVAL_SECS") {
            config.session.sweep_interval_secs = parse_value("STREAMER_SWEEP_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = get("STREAMER_FLAG_SCOPE") {
            config.session.flag_scope = parse_value("STREAMER_FLAG_SCOPE", &v)?;
        }
        if let Some(v) = get("STREAMER_FLAG_FILTER") {
            config.session.flag_filter = parse_value("STREAMER_FLAG_FILTER", &v)?;
        }
        if let Some(v) = get("STREAMER_CAST_MARKERS") {
            config.session.cast_markers = v
                .split(',')
                .map(str::trim)
                .filter(|marker| !marker.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Some(v) = get("STREAMER_READY_MIN_BYTES") {
            config.readiness.min_bytes = parse_value("STREAMER_READY_MIN_BYTES", &v)?;
        }
        if let Some(v) = get("STREAMER_READY_MAX_WAIT_SECS") {
            config.readiness.max_wait_secs = parse_value("STREAMER_READY_MAX_WAIT_SECS", &v)?;
        }

        if let Some(v) = get("STREAMER_RECLAIM_MODE") {
            config.reclaim.mode = parse_value("STREAMER_RECLAIM_MODE", &v)?;
        }
        if let Some(v) = get("STREAMER_MIN_FREE_BYTES") {
            config.reclaim.min_free_bytes = parse_value("STREAMER_MIN_FREE_BYTES", &v)?;
        }
        if let Some(v) = get("STREAMER_SEGMENT_LIFETIME_SECS") {
            config.reclaim.segment_lifetime_secs =
                parse_value("STREAMER_SEGMENT_LIFETIME_SECS", &v)?;
        }

        if let Some(v) = get("STREAMER_LOG_DIR") {
            config.logging.log_dir = Some(PathBuf::from(v.trim()));
        }

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.encoder.profiles.is_empty() {
            return Err(Error::config("at least one quality profile is required"));
        }
        for (index, profile) in self.encoder.profiles.iter().enumerate() {
            profile.validate()?;
            if self.encoder.profiles[..index]
                .iter()
                .any(|other| other.name == profile.name)
            {
                return Err(Error::config(format!(
                    "duplicate profile name: {}",
                    profile.name
                )));
            }
        }
        if self.encoder.source_url_template.is_empty() {
            return Err(Error::config("source URL template must not be empty"));
        }
        if self.encoder.ffmpeg_path.is_empty() {
            return Err(Error::config("ffmpeg path must not be empty"));
        }

        let zero_intervals = [
            ("inactivity timeout", self.session.inactivity_timeout_secs),
            ("sweep interval", self.session.sweep_interval_secs),
            ("readiness wait", self.readiness.max_wait_secs),
            ("readiness poll interval", self.readiness.poll_interval_ms),
            ("global reclaim interval", self.reclaim.global_interval_secs),
            ("channel reclaim interval", self.reclaim.channel_interval_secs),
        ];
        if let Some((name, _)) = zero_intervals.iter().find(|(_, value)| *value == 0) {
            return Err(Error::config(format!("{name} must be greater than zero")));
        }
        if self.readiness.segment_attempts == 0 {
            return Err(Error::config("segment attempts must be at least 1"));
        }
        Ok(())
    }

    /// Socket address string for the listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.bind_address, self.server.port)
    }
}
