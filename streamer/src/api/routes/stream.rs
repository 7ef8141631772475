//! Stream routes: manifests and produced files.

use std::net::SocketAddr;
use std::path::PathBuf;

use axum::{
    Router,
    extract::{ConnectInfo, Path, Request, State},
    http::{HeaderValue, header},
    response::{IntoResponse, Response},
    routing::get,
};
use tower_http::services::ServeFile;
use tracing::{debug, info};

use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::encoder::OutputFormat;
use crate::encoder::playlist::write_master_playlist;
use crate::error::Error;
use crate::session::Client;
use crate::storage::layout::{DASH_MANIFEST, FileKind, validate_channel_id};

/// Create the stream router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{channel}/manifest.mpd", get(dash_manifest))
        .route("/{channel}/index.m3u8", get(hls_master))
        .route("/{channel}/{file}", get(stream_file))
}

/// Identify the requesting client from the peer address and user agent.
pub(crate) fn client_from_request(request: &Request, trust_forwarded_for: bool) -> Client {
    let forwarded = if trust_forwarded_for {
        request
            .headers()
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    } else {
        None
    };

    let address = forwarded
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        })
        .unwrap_or_else(|| "unknown".to_string());

    let user_agent = request
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok());

    Client::new(address, user_agent)
}

/// Serve a file with the content type for its kind.
async fn serve_file(path: PathBuf, kind: FileKind, request: Request) -> ApiResult<Response> {
    let mut response = match ServeFile::new(&path).try_call(request).await {
        Ok(response) => response.into_response(),
        Err(e) => return Err(ApiError::internal(format!("Failed to serve file: {}", e))),
    };

    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(kind.content_type()),
    );
    if matches!(kind, FileKind::Manifest | FileKind::Playlist) {
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    }
    Ok(response)
}

async fn dash_manifest(
    State(state): State<AppState>,
    Path(channel): Path<String>,
    request: Request,
) -> ApiResult<Response> {
    serve_entry(state, channel, OutputFormat::Dash, request).await
}

async fn hls_master(
    State(state): State<AppState>,
    Path(channel): Path<String>,
    request: Request,
) -> ApiResult<Response> {
    serve_entry(state, channel, OutputFormat::Hls, request).await
}

/// Flag check, ensure the encoder runs, wait for readiness, serve the entry file.
async fn serve_entry(
    state: AppState,
    channel: String,
    format: OutputFormat,
    request: Request,
) -> ApiResult<Response> {
    let service = &state.service;
    validate_channel_id(&channel)?;

    if service.supervisor.format() != format {
        return Err(ApiError::not_found(format!(
            "{} output is not enabled",
            format
        )));
    }
    if service.is_shutting_down() {
        return Err(Error::Cancelled.into());
    }

    let client = client_from_request(&request, service.config.server.trust_forwarded_for);
    if service.registry.is_flagged(&channel, &client) {
        info!(channel = %channel, client = %client.key, "Rejecting flagged client");
        return Err(Error::Flagged { channel }.into());
    }

    let encoder = service.supervisor.ensure_running(&channel).await?;
    service.registry.record_manifest_request(&channel, &client);
    debug!(
        channel = %channel,
        generation = encoder.generation,
        client = %client.key,
        "Manifest requested"
    );

    let dir = service.layout.channel_dir(&channel);
    let targets: Vec<PathBuf> = service
        .config
        .encoder
        .readiness_files()
        .iter()
        .map(|file| dir.join(file))
        .collect();
    service
        .readiness
        .await_all(&channel, &targets, &service.cancellation_token())
        .await?;

    let (path, kind) = match format {
        OutputFormat::Dash => (dir.join(DASH_MANIFEST), FileKind::Manifest),
        OutputFormat::Hls => {
            let encoder_config = &service.config.encoder;
            let path = write_master_playlist(
                &dir,
                &channel,
                &encoder_config.profiles,
                encoder_config.public_base_url.as_deref(),
            )
            .await?;
            (path, FileKind::Playlist)
        }
    };

    serve_file(path, kind, request).await
}

/// Serve any produced file; media segments count as viewing activity.
async fn stream_file(
    State(state): State<AppState>,
    Path((channel, file)): Path<(String, String)>,
    request: Request,
) -> ApiResult<Response> {
    let service = &state.service;
    let path = service.layout.file_path(&channel, &file)?;
    let lookup = &service.config.readiness;

    // The encoder may still be flushing a file the playlist already lists.
    let mut found = false;
    for attempt in 0..lookup.segment_attempts {
        if tokio::fs::metadata(&path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
        {
            found = true;
            break;
        }
        if attempt + 1 < lookup.segment_attempts {
            tokio::time::sleep(lookup.segment_retry_delay()).await;
        }
    }
    if !found {
        debug!(channel = %channel, file = %file, "Requested file not found");
        return Err(Error::SegmentNotFound { channel, file }.into());
    }

    let client = client_from_request(&request, service.config.server.trust_forwarded_for);
    service.registry.record_segment_fetch(&channel, &client, &file);

    serve_file(path, FileKind::classify(&file), request).await
}

#[cfg(test)]
mod tests {
    use axum::body::Body;

    use super::*;

    fn request_with(headers: &[(&str, &str)], peer: Option<&str>) -> Request {
        let mut builder = axum::http::Request::builder().uri("/stream/42/manifest.mpd");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let mut request = builder.body(Body::empty()).unwrap();
        if let Some(peer) = peer {
            request
                .extensions_mut()
                .insert(ConnectInfo(peer.parse::<SocketAddr>().unwrap()));
        }
        request
    }

    #[test]
    fn test_client_from_peer_address() {
        let request = request_with(&[("user-agent", "VLC/3.0.20")], Some("192.168.1.20:53211"));
        let client = client_from_request(&request, false);
        assert_eq!(client.key.as_str(), "192.168.1.20|VLC/3.0.20");
    }

    #[test]
    fn test_forwarded_for_only_when_trusted() {
        let request = request_with(
            &[("x-forwarded-for", "203.0.113.7, 10.0.0.1")],
            Some("10.0.0.1:4000"),
        );
        assert_eq!(
            client_from_request(&request, true).key.as_str(),
            "203.0.113.7|unknown"
        );
        assert_eq!(
            client_from_request(&request, false).key.as_str(),
            "10.0.0.1|unknown"
        );
    }

    #[test]
    fn test_missing_peer_is_unknown() {
        let request = request_with(&[], None);
        assert_eq!(client_from_request(&request, false).key.as_str(), "unknown|unknown");
    }
}
