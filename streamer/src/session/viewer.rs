//! Viewer identities and sessions.

use std::fmt;

use tokio::time::Instant;

const UNKNOWN_AGENT: &str = "unknown";

/// Fingerprint of a client: `address|user-agent`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientKey(String);

impl ClientKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A requesting client as seen by the HTTP layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Client {
    pub key: ClientKey,
    /// Raw user agent, `unknown` when absent.
    pub user_agent: String,
}

impl Client {
    pub fn new(address: impl fmt::Display, user_agent: Option<&str>) -> Self {
        let user_agent = user_agent
            .map(str::trim)
            .filter(|ua| !ua.is_empty())
            .unwrap_or(UNKNOWN_AGENT)
            .to_string();
        Self {
            key: ClientKey(format!("{address}|{user_agent}")),
            user_agent,
        }
    }
}

/// Key of a viewer session: one client watching one channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ViewerKey {
    pub channel: String,
    pub client: ClientKey,
}

impl ViewerKey {
    pub fn new(channel: impl Into<String>, client: ClientKey) -> Self {
        Self {
            channel: channel.into(),
            client,
        }
    }
}

/// Liveness record of one viewer.
#[derive(Debug, Clone)]
pub struct ViewerSession {
    pub key: ViewerKey,
    pub client_tag: String,
    pub created_at: Instant,
    pub last_activity: Instant,
    pub segments_served: u64,
}

impl ViewerSession {
    pub fn new(key: ViewerKey, client_tag: impl Into<String>, now: Instant) -> Self {
        Self {
            key,
            client_tag: client_tag.into(),
            created_at: now,
            last_activity: now,
            segments_served: 0,
        }
    }

    pub fn channel(&self) -> &str {
        &self.key.channel
    }

    /// Idle longer than `timeout` at `now`.
    pub fn is_expired(&self, now: Instant, timeout: std::time::Duration) -> bool {
        now.saturating_duration_since(self.last_activity) > timeout
    }
}
