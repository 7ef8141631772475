//! Channel status and operator teardown.

use std::collections::BTreeMap;

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{delete, get},
};
use serde::Serialize;

use crate::api::error::ApiResult;
use crate::api::server::AppState;
use crate::encoder::EncoderInfo;
use crate::storage::layout::validate_channel_id;

#[derive(Debug, Serialize)]
pub struct ChannelStatus {
    pub channel: String,
    pub encoder: Option<EncoderInfo>,
    pub encoder_age_secs: Option<u64>,
    pub viewers: usize,
    /// Seconds since the last media segment was served.
    pub idle_secs: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct TeardownResponse {
    pub channel: String,
    pub stopped: bool,
}

/// Create the channels router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_channels))
        .route("/{channel}", delete(teardown_channel))
}

async fn list_channels(State(state): State<AppState>) -> Json<Vec<ChannelStatus>> {
    let service = &state.service;
    let mut channels: BTreeMap<String, ChannelStatus> = BTreeMap::new();

    for activity in service.registry.snapshot() {
        channels.insert(
            activity.channel.clone(),
            ChannelStatus {
                channel: activity.channel,
                encoder: None,
                encoder_age_secs: None,
                viewers: activity.viewers,
                idle_secs: activity.idle.map(|idle| idle.as_secs()),
            },
        );
    }

    for channel in service.supervisor.running_channels() {
        let info = service.supervisor.encoder_info(&channel).await;
        let status = channels
            .entry(channel.clone())
            .or_insert_with(|| ChannelStatus {
                channel,
                encoder: None,
                encoder_age_secs: None,
                viewers: 0,
                idle_secs: None,
            });
        status.encoder_age_secs = info.as_ref().map(|i| i.started.elapsed().as_secs());
        status.encoder = info;
    }

    Json(channels.into_values().collect())
}

async fn teardown_channel(
    State(state): State<AppState>,
    Path(channel): Path<String>,
) -> ApiResult<Json<TeardownResponse>> {
    validate_channel_id(&channel)?;
    let stopped = state.service.supervisor.teardown(&channel).await;
    Ok(Json(TeardownResponse { channel, stopped }))
}
