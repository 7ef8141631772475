//! Process supervisor: at most one encoder per channel.
//!
//! Each channel owns a slot with its own async mutex, so check-alive-then-launch
//! is one critical section per channel while different channels never contend.
//! A slot retired by [`ProcessSupervisor::stop`] is removed from the table and
//! never reused; callers that raced with the stop retry on a fresh slot.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{Error, Result};
use crate::encoder::{
    EncoderHandle, EncoderInfo, EncoderLauncher, EncoderProcess, LaunchRequest, OutputFormat,
};
use crate::session::SessionRegistry;
use crate::storage::layout::{StorageLayout, validate_channel_id};
use crate::utils::fs::{prepare_output_dir, purge_dir_files};

#[derive(Debug, Default)]
struct SlotState {
    encoder: Option<EncoderHandle>,
    retired: bool,
}

#[derive(Debug, Default)]
struct ChannelSlot {
    state: Mutex<SlotState>,
}

pub struct ProcessSupervisor {
    layout: StorageLayout,
    launcher: Arc<dyn EncoderLauncher>,
    registry: Arc<SessionRegistry>,
    format: OutputFormat,
    channels: DashMap<String, Arc<ChannelSlot>>,
    generation: AtomicU64,
    shutdown: CancellationToken,
}

impl ProcessSupervisor {
    pub fn new(
        layout: StorageLayout,
        launcher: Arc<dyn EncoderLauncher>,
        registry: Arc<SessionRegistry>,
        format: OutputFormat,
    ) -> Self {
        Self {
            layout,
            launcher,
            registry,
            format,
            channels: DashMap::new(),
            generation: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
        }
    }

    /// Refuse new launches once `token` is cancelled.
    pub fn with_shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    fn slot(&self, channel: &str) -> Arc<ChannelSlot> {
        self.channels
            .entry(channel.to_string())
            .or_default()
            .value()
            .clone()
    }

    /// Make sure an encoder is running for `channel`, launching one if needed.
    ///
    /// Concurrent callers for the same channel observe a single launch. A
    /// failed launch installs nothing and forgets the channel's slot, so the
    /// next call tries again. Fails with [`Error::Cancelled`] once shutdown
    /// has begun. A fresh launch restarts the channel's idle clocks.
    pub async fn ensure_running(&self, channel: &str) -> Result<EncoderInfo> {
        validate_channel_id(channel)?;

        loop {
            let slot = self.slot(channel);
            let mut state = slot.state.lock().await;
            if state.retired {
                drop(state);
                tokio::task::yield_now().await;
                continue;
            }

            if let Some(encoder) = state.encoder.as_mut() {
                if encoder.is_alive() {
                    return Ok(encoder.info());
                }
                warn!(
                    channel = %channel,
                    generation = encoder.generation(),
                    "Encoder exited unexpectedly, relaunching"
                );
                state.encoder = None;
            }

            let output_dir = self.layout.channel_dir(channel);
            let request = LaunchRequest {
                channel: channel.to_string(),
                output_dir,
            };
            let launched: Result<Box<dyn EncoderProcess>> = async {
                // Checked under the slot lock so shutdown_all cannot miss a launch.
                if self.shutdown.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                prepare_output_dir(&request.output_dir).await?;
                self.launcher.launch(&request).await
            }
            .await;
            let process = match launched {
                Ok(process) => process,
                Err(e) => {
                    // Waiters on this slot retry on a fresh one.
                    state.retired = true;
                    self.channels
                        .remove_if(channel, |_, current| Arc::ptr_eq(current, &slot));
                    if let Err(rm) = tokio::fs::remove_dir(&request.output_dir).await {
                        debug!(channel = %channel, error = %rm, "Output directory left in place");
                    }
                    return Err(e);
                }
            };

            let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
            let handle = EncoderHandle::new(generation, self.format, process);
            let info = handle.info();
            state.encoder = Some(handle);
            self.registry.reset_channel_activity(channel, Instant::now());

            info!(
                channel = %channel,
                generation,
                pid = ?info.pid,
                "Encoder launched"
            );
            return Ok(info);
        }
    }

    /// Stop the channel's encoder and forget the channel.
    ///
    /// The slot and the segment-access entry are removed even when the kill
    /// fails. Returns whether an encoder was present.
    pub async fn stop(&self, channel: &str) -> bool {
        let slot = self.channels.get(channel).map(|entry| Arc::clone(entry.value()));

        let had_encoder = match slot {
            Some(slot) => {
                let mut state = slot.state.lock().await;
                state.retired = true;
                let had_encoder = match state.encoder.take() {
                    Some(mut encoder) => {
                        if let Err(e) = encoder.kill() {
                            warn!(
                                channel = %channel,
                                generation = encoder.generation(),
                                error = %e,
                                "Failed to kill encoder"
                            );
                        }
                        true
                    }
                    None => false,
                };
                self.channels
                    .remove_if(channel, |_, current| Arc::ptr_eq(current, &slot));
                had_encoder
            }
            None => false,
        };

        self.registry.clear_channel_access(channel);
        had_encoder
    }

    /// Stop the encoder, drop the channel's viewers, and delete its files.
    ///
    /// Returns whether an encoder was running.
    pub async fn teardown(&self, channel: &str) -> bool {
        let stopped = self.stop(channel).await;
        let dropped = self.registry.drop_channel_viewers(channel);

        if validate_channel_id(channel).is_ok() {
            let dir = self.layout.channel_dir(channel);
            if let Err(e) = purge_dir_files(&dir).await {
                warn!(channel = %channel, error = %e, "Failed to purge channel directory");
            }
        }

        info!(
            channel = %channel,
            stopped,
            viewers_dropped = dropped,
            "Channel torn down"
        );
        stopped
    }

    /// Stop every encoder. Used on shutdown.
    pub async fn shutdown_all(&self) -> usize {
        let channels: Vec<String> = self
            .channels
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        let mut stopped = 0;
        for channel in &channels {
            if self.stop(channel).await {
                stopped += 1;
            }
        }
        if stopped > 0 {
            info!(stopped, "Stopped all encoders");
        }
        stopped
    }

    /// Channels with an installed encoder or a launch in progress, sorted.
    pub fn running_channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self
            .channels
            .iter()
            .filter(|entry| {
                entry
                    .value()
                    .state
                    .try_lock()
                    .map(|state| state.encoder.is_some())
                    .unwrap_or(true)
            })
            .map(|entry| entry.key().clone())
            .collect();
        channels.sort();
        channels
    }

    /// Snapshot of the channel's encoder, if one is installed.
    pub async fn encoder_info(&self, channel: &str) -> Option<EncoderInfo> {
        let slot = self.channels.get(channel).map(|entry| Arc::clone(entry.value()))?;
        let state = slot.state.lock().await;
        state.encoder.as_ref().map(EncoderHandle::info)
    }
}
