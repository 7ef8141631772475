//! API server setup and configuration.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::Request;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::Span;

use crate::api::routes;
use crate::app::StreamerService;
use crate::config::ServerConfig;
use crate::error::{Error, Result};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<StreamerService>,
}

impl AppState {
    pub fn new(service: Arc<StreamerService>) -> Self {
        Self { service }
    }
}

fn is_health(req: &Request) -> bool {
    req.uri().path().starts_with("/health")
}

/// Build the router with all middleware and routes.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    routes::create_router(state).layer(cors).layer(
        TraceLayer::new_for_http()
            .make_span_with(|req: &Request| {
                if is_health(req) {
                    Span::none()
                } else {
                    let mut make_span =
                        tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO);
                    use tower_http::trace::MakeSpan;
                    make_span.make_span(req)
                }
            })
            .on_request(|req: &Request, span: &Span| {
                if span.is_disabled() || is_health(req) {
                    return;
                }
                let mut on_request =
                    tower_http::trace::DefaultOnRequest::new().level(tracing::Level::DEBUG);
                use tower_http::trace::OnRequest;
                on_request.on_request(req, span);
            })
            .on_response(
                |res: &axum::http::Response<_>, latency: Duration, span: &Span| {
                    if span.is_disabled() {
                        return;
                    }
                    let on_response =
                        tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO);
                    use tower_http::trace::OnResponse;
                    on_response.on_response(res, latency, span);
                },
            )
            .on_failure(
                |class: tower_http::classify::ServerErrorsFailureClass,
                 latency: Duration,
                 span: &Span| {
                    if span.is_disabled() {
                        return;
                    }
                    let mut on_failure =
                        tower_http::trace::DefaultOnFailure::new().level(tracing::Level::ERROR);
                    use tower_http::trace::OnFailure;
                    on_failure.on_failure(class, latency, span);
                },
            ),
    )
}

pub struct ApiServer {
    config: ServerConfig,
    state: AppState,
    cancel_token: CancellationToken,
}

impl ApiServer {
    /// Create a server that stops when `cancel_token` fires.
    pub fn new(config: ServerConfig, state: AppState, cancel_token: CancellationToken) -> Self {
        Self {
            config,
            state,
            cancel_token,
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Start the server and serve until cancelled.
    pub async fn run(&self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.bind_address, self.config.port)
            .parse()
            .map_err(|e| Error::config(format!("Invalid address: {}", e)))?;

        let router = build_router(self.state.clone());
        let listener = TcpListener::bind(addr).await?;

        tracing::info!("Streamer listening on http://{}", addr);

        let cancel_token = self.cancel_token.clone();

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            cancel_token.cancelled().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await
        .map_err(|e| Error::Other(format!("Server error: {}", e)))?;

        Ok(())
    }

    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }
}
