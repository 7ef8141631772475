//! Session registry.
//!
//! Tracks viewer sessions, per-channel segment activity, and circuit-breaker
//! flags. All maps are sharded; no guard is held across an `.await`, and
//! removals that race with refreshes use `remove_if` so the refresh wins.

use std::collections::HashSet;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::{debug, info};

use super::flag::{FlagKey, FlagPolicy, FlagRecord, FlagScope};
use super::viewer::{Client, ViewerKey, ViewerSession};
use crate::storage::layout::is_media_segment;

/// Per-channel activity summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelActivity {
    pub channel: String,
    pub viewers: usize,
    /// Time since the last media segment was served, if tracked.
    pub idle: Option<Duration>,
}

pub struct SessionRegistry {
    viewers: DashMap<ViewerKey, ViewerSession>,
    last_segment_access: DashMap<String, Instant>,
    flags: DashMap<FlagKey, FlagRecord>,
    policy: FlagPolicy,
}

impl SessionRegistry {
    pub fn new(policy: FlagPolicy) -> Self {
        Self {
            viewers: DashMap::new(),
            last_segment_access: DashMap::new(),
            flags: DashMap::new(),
            policy,
        }
    }

    pub fn policy(&self) -> &FlagPolicy {
        &self.policy
    }

    /// Register a manifest request.
    ///
    /// Creates the viewer session if needed but does not count as activity.
    pub fn record_manifest_request(&self, channel: &str, client: &Client) {
        let now = Instant::now();
        let key = ViewerKey::new(channel, client.key.clone());

        self.viewers
            .entry(key.clone())
            .and_modify(|session| session.client_tag.clone_from(&client.user_agent))
            .or_insert_with(|| {
                debug!(channel = %channel, client = %client.key, "New viewer session");
                ViewerSession::new(key, client.user_agent.clone(), now)
            });

        self.last_segment_access
            .entry(channel.to_string())
            .or_insert(now);
    }

    /// Register a file fetch. Only media segments count as activity.
    ///
    /// Returns whether the fetch was counted.
    pub fn record_segment_fetch(&self, channel: &str, client: &Client, file_name: &str) -> bool {
        if !is_media_segment(file_name) {
            return false;
        }
        let now = Instant::now();
        let key = ViewerKey::new(channel, client.key.clone());

        self.viewers
            .entry(key.clone())
            .and_modify(|session| {
                session.last_activity = now;
                session.segments_served += 1;
            })
            .or_insert_with(|| {
                let mut session = ViewerSession::new(key, client.user_agent.clone(), now);
                session.segments_served = 1;
                session
            });

        self.last_segment_access.insert(channel.to_string(), now);
        true
    }

    /// Whether the client is under cooldown for this channel.
    ///
    /// An expired record is removed by this call.
    pub fn is_flagged(&self, channel: &str, client: &Client) -> bool {
        let key = self.policy.scope.key_for(channel, &client.key);
        let now = Instant::now();
        let cooldown = self.policy.cooldown;

        let active = match self.flags.get(&key) {
            Some(record) => record.is_active(now, cooldown),
            None => return false,
        };
        if active {
            return true;
        }

        if self
            .flags
            .remove_if(&key, |_, record| !record.is_active(now, cooldown))
            .is_some()
        {
            debug!(channel = %channel, client = %client.key, "Flag cooldown expired");
        }
        false
    }

    /// Flag an expired session if the policy's filter accepts it.
    pub(crate) fn flag_if_eligible(&self, session: &ViewerSession, now: Instant) -> bool {
        if !self.policy.filter.should_flag(session) {
            return false;
        }
        let key = self
            .policy
            .scope
            .key_for(session.channel(), &session.key.client);
        info!(
            channel = %session.channel(),
            client = %session.key.client,
            scope = ?self.policy.scope,
            "Flagging client after inactivity"
        );
        self.flags.insert(
            key,
            FlagRecord {
                flagged_at: now,
                client_tag: session.client_tag.clone(),
            },
        );
        true
    }

    /// Remove sessions idle longer than `timeout` at `now` and return them.
    pub(crate) fn expire_viewers(&self, now: Instant, timeout: Duration) -> Vec<ViewerSession> {
        let candidates: Vec<ViewerKey> = self
            .viewers
            .iter()
            .filter(|entry| entry.value().is_expired(now, timeout))
            .map(|entry| entry.key().clone())
            .collect();

        candidates
            .into_iter()
            .filter_map(|key| {
                self.viewers
                    .remove_if(&key, |_, session| session.is_expired(now, timeout))
                    .map(|(_, session)| session)
            })
            .collect()
    }

    /// Channels whose last segment access is older than `timeout` at `now`.
    pub(crate) fn stale_channels(&self, now: Instant, timeout: Duration) -> Vec<String> {
        self.last_segment_access
            .iter()
            .filter(|entry| now.saturating_duration_since(*entry.value()) > timeout)
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Restart the channel's idle clocks after a fresh encoder launch.
    ///
    /// Access and every existing viewer's activity are set to `now`, so a
    /// starting encoder is never judged on the previous encoder's history.
    pub(crate) fn reset_channel_activity(&self, channel: &str, now: Instant) {
        self.last_segment_access.insert(channel.to_string(), now);
        self.viewers
            .iter_mut()
            .filter(|entry| entry.key().channel == channel)
            .for_each(|mut entry| entry.value_mut().last_activity = now);
    }

    pub(crate) fn clear_channel_access(&self, channel: &str) {
        self.last_segment_access.remove(channel);
    }

    /// Drop every viewer session of a channel without flagging.
    pub(crate) fn drop_channel_viewers(&self, channel: &str) -> usize {
        let before = self.viewers.len();
        self.viewers.retain(|key, _| key.channel != channel);
        before.saturating_sub(self.viewers.len())
    }

    pub fn viewer_count(&self, channel: &str) -> usize {
        self.viewers
            .iter()
            .filter(|entry| entry.key().channel == channel)
            .count()
    }

    pub fn total_viewers(&self) -> usize {
        self.viewers.len()
    }

    /// Number of flags still inside their cooldown.
    pub fn active_flags(&self) -> usize {
        let now = Instant::now();
        self.flags
            .iter()
            .filter(|entry| entry.value().is_active(now, self.policy.cooldown))
            .count()
    }

    pub fn scope(&self) -> FlagScope {
        self.policy.scope
    }

    /// Activity of every channel with viewers or tracked segment access.
    pub fn snapshot(&self) -> Vec<ChannelActivity> {
        let now = Instant::now();
        let mut channels: HashSet<String> = self
            .last_segment_access
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        channels.extend(self.viewers.iter().map(|entry| entry.key().channel.clone()));

        let mut activity: Vec<ChannelActivity> = channels
            .into_iter()
            .map(|channel| {
                let idle = self
                    .last_segment_access
                    .get(&channel)
                    .map(|last| now.saturating_duration_since(*last));
                ChannelActivity {
                    viewers: self.viewer_count(&channel),
                    idle,
                    channel,
                }
            })
            .collect();
        activity.sort_by(|a, b| a.channel.cmp(&b.channel));
        activity
    }

    /// Clone of the session for a viewer, if present.
    pub fn session(&self, channel: &str, client: &Client) -> Option<ViewerSession> {
        self.viewers
            .get(&ViewerKey::new(channel, client.key.clone()))
            .map(|entry| entry.value().clone())
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(FlagPolicy::default())
    }
}
