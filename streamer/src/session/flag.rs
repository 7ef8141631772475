//! Circuit-breaker flags.
//!
//! Some clients (notably cast receivers) keep re-requesting a manifest long
//! after the viewer stopped watching, which would relaunch the encoder over
//! and over. When such a session expires it is flagged, and manifest requests
//! for the flagged key are rejected until the cooldown elapses.
//!
//! Which expired sessions get flagged, and how wide a flag reaches, are both
//! configurable.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::viewer::{ClientKey, ViewerKey, ViewerSession};
use crate::{Error, Result};

/// Reach of a flag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagScope {
    /// Only the client whose session expired is rejected.
    #[default]
    Client,
    /// Every client of the channel is rejected.
    Channel,
}

impl FlagScope {
    pub fn key_for(&self, channel: &str, client: &ClientKey) -> FlagKey {
        match self {
            FlagScope::Client => FlagKey::Viewer(ViewerKey::new(channel, client.clone())),
            FlagScope::Channel => FlagKey::Channel(channel.to_string()),
        }
    }
}

impl FromStr for FlagScope {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "client" => Ok(FlagScope::Client),
            "channel" => Ok(FlagScope::Channel),
            other => Err(Error::config(format!("unknown flag scope: {other}"))),
        }
    }
}

/// Key under which a flag is stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FlagKey {
    Viewer(ViewerKey),
    Channel(String),
}

impl FlagKey {
    pub fn channel(&self) -> &str {
        match self {
            FlagKey::Viewer(key) => &key.channel,
            FlagKey::Channel(channel) => channel,
        }
    }
}

/// A temporary ban.
#[derive(Debug, Clone)]
pub struct FlagRecord {
    pub flagged_at: Instant,
    /// User agent of the session that caused the flag.
    pub client_tag: String,
}

impl FlagRecord {
    /// Still within the cooldown at `now`.
    pub fn is_active(&self, now: Instant, cooldown: Duration) -> bool {
        now.saturating_duration_since(self.flagged_at) < cooldown
    }
}

/// Decides whether an expired session should be flagged.
pub trait FlagFilter: Send + Sync + fmt::Debug {
    fn should_flag(&self, session: &ViewerSession) -> bool;
}

/// Flag clients whose user agent carries a cast receiver marker.
#[derive(Debug, Clone)]
pub struct CastReceivers {
    markers: Vec<String>,
}

impl CastReceivers {
    pub fn new(markers: Vec<String>) -> Self {
        Self { markers }
    }
}

impl Default for CastReceivers {
    fn default() -> Self {
        Self::new(vec!["CrKey".to_string()])
    }
}

impl FlagFilter for CastReceivers {
    fn should_flag(&self, session: &ViewerSession) -> bool {
        self.markers
            .iter()
            .any(|marker| session.client_tag.contains(marker.as_str()))
    }
}

/// Flag every expired session.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllClients;

impl FlagFilter for AllClients {
    fn should_flag(&self, _session: &ViewerSession) -> bool {
        true
    }
}

/// Flag sessions that requested a manifest but never fetched a segment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManifestOnly;

impl FlagFilter for ManifestOnly {
    fn should_flag(&self, session: &ViewerSession) -> bool {
        session.segments_served == 0
    }
}

/// Never flag.
#[derive(Debug, Clone, Copy, Default)]
pub struct Never;

impl FlagFilter for Never {
    fn should_flag(&self, _session: &ViewerSession) -> bool {
        false
    }
}

/// Configurable selection of a built-in [`FlagFilter`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagFilterKind {
    #[default]
    CastReceivers,
    AllClients,
    ManifestOnly,
    Never,
}

impl FlagFilterKind {
    pub fn build(&self, cast_markers: &[String]) -> Arc<dyn FlagFilter> {
        match self {
            FlagFilterKind::CastReceivers => Arc::new(CastReceivers::new(cast_markers.to_vec())),
            FlagFilterKind::AllClients => Arc::new(AllClients),
            FlagFilterKind::ManifestOnly => Arc::new(ManifestOnly),
            FlagFilterKind::Never => Arc::new(Never),
        }
    }
}

impl FromStr for FlagFilterKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "cast_receivers" => Ok(FlagFilterKind::CastReceivers),
            "all_clients" | "all" => Ok(FlagFilterKind::AllClients),
            "manifest_only" => Ok(FlagFilterKind::ManifestOnly),
            "never" | "none" => Ok(FlagFilterKind::Never),
            other => Err(Error::config(format!("unknown flag filter: {other}"))),
        }
    }
}

/// Scope, filter, and cooldown applied by the registry and the monitor.
#[derive(Debug, Clone)]
pub struct FlagPolicy {
    pub scope: FlagScope,
    pub filter: Arc<dyn FlagFilter>,
    pub cooldown: Duration,
}

impl FlagPolicy {
    pub fn new(scope: FlagScope, filter: Arc<dyn FlagFilter>, cooldown: Duration) -> Self {
        Self {
            scope,
            filter,
            cooldown,
        }
    }
}

impl Default for FlagPolicy {
    fn default() -> Self {
        Self::new(
            FlagScope::Client,
            Arc::new(CastReceivers::default()),
            Duration::from_secs(180),
        )
    }
}
