//! Axum binding for the forwarding engine
//!
//! ```rust,ignore
//! use mount_proxy::proxy::ProxyBuilder;
//!
//! let router = ProxyBuilder::new("/api/", "http://upstream.internal")
//!     .build()?
//!     .into_router();
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, router).await?;
//! ```
//!
//! Every inbound request is forwarded by its own tokio task writing into a
//! [`ChannelSink`]. The handler returns as soon as the response head is
//! committed and the body keeps streaming from the task. When the caller
//! disconnects, the channel closes, the next sink write fails and the task
//! drops the upstream response.

use crate::proxy::client::UpstreamClient;
use crate::proxy::engine::HttpProxy;
use crate::proxy::sink::ChannelSink;
use axum::{
    body::Body,
    extract::{Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

/// Body frames buffered between the forwarding task and the caller
pub const SINK_CHANNEL_CAPACITY: usize = 16;

/// Health check endpoint path
pub const HEALTH_PATH: &str = "/health";

impl<C: UpstreamClient> HttpProxy<C> {
    /// Create an Axum router serving `/health` and forwarding everything else
    pub fn into_router(self) -> Router {
        Router::new()
            .route(HEALTH_PATH, get(health_handler))
            .fallback(proxy_handler::<C>)
            .layer(TraceLayer::new_for_http())
            .with_state(self)
    }
}

/// Axum handler for proxying requests
async fn proxy_handler<C: UpstreamClient>(
    State(proxy): State<HttpProxy<C>>,
    request: Request<Body>,
) -> Response {
    let (mut sink, pending) = ChannelSink::new(SINK_CHANNEL_CAPACITY);

    tokio::spawn(async move {
        if let Err(sink_error) = proxy.forward(request, &mut sink).await {
            if sink_error.is_disconnect() {
                debug!("Caller went away before the response was written");
            } else {
                error!(error = %sink_error, "Failed to write proxy response");
            }
            sink.abort(&sink_error).await;
        }
    });

    match pending.await {
        Ok(response) => response,
        Err(_) => {
            error!("Forwarding task ended without producing a response");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Health check handler
async fn health_handler() -> &'static str {
    "OK"
}
