//! Upstream HTTP client seam
//!
//! The engine only depends on [`UpstreamClient`]. [`HyperUpstreamClient`] is
//! the pooled binding used in production: one `hyper_util` legacy client
//! whose connection pool is shared by every forwarding cycle. It reaches both
//! `http://` and `https://` origins through a rustls connector.
//!
//! Timeouts, all optional:
//!
//! - connect: TCP connect, enforced by the inner [`HttpConnector`]
//! - connection request: obtaining a usable connection (connect plus TLS
//!   handshake), enforced by [`TimeoutConnector`]
//! - read: idle limit. It restarts on every request body frame handed to
//!   the connection and on every response body frame received, so only a
//!   silent upstream trips it.

use crate::proxy::types::*;
use async_trait::async_trait;
use axum::body::Body;
use bytes::Bytes;
use http::{HeaderName, HeaderValue, Request, Response, Uri};
use http_body::{Frame, SizeHint};
use hyper::body::Incoming;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use pin_project_lite::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Sleep;
use tower::Service;
use tracing::debug;

/// Executes one fully-formed outbound request
///
/// Implementations own connection acquisition, pooling and timeout
/// enforcement. The returned body is read by the engine exactly once.
#[async_trait]
pub trait UpstreamClient: Send + Sync + 'static {
    async fn execute(&self, request: Request<Body>) -> ProxyResult<Response<Body>>;
}

/// Client-level settings applied to every outbound request
#[derive(Clone, Debug, Default)]
pub struct ClientSettings {
    pub connect_timeout: Option<Duration>,
    pub read_timeout: Option<Duration>,
    pub connection_request_timeout: Option<Duration>,
    pub default_headers: Vec<(HeaderName, HeaderValue)>,
}

type PooledClient = Client<TimeoutConnector<HttpsConnector<HttpConnector>>, Body>;

/// Pooled hyper client speaking HTTP/1.1 over plain TCP or TLS
#[derive(Clone)]
pub struct HyperUpstreamClient {
    client: PooledClient,
    settings: ClientSettings,
}

impl HyperUpstreamClient {
    pub fn new(settings: ClientSettings) -> Self {
        let mut http = HttpConnector::new();
        http.enforce_http(false);
        http.set_connect_timeout(settings.connect_timeout);
        http.set_nodelay(true);

        let https = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .wrap_connector(http);
        let connector = TimeoutConnector::new(https, settings.connection_request_timeout);

        let client = Client::builder(TokioExecutor::new())
            .http1_title_case_headers(true)
            .http1_preserve_header_case(true)
            .build(connector);

        Self { client, settings }
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }
}

#[async_trait]
impl UpstreamClient for HyperUpstreamClient {
    async fn execute(&self, mut request: Request<Body>) -> ProxyResult<Response<Body>> {
        for (name, value) in &self.settings.default_headers {
            request.headers_mut().append(name.clone(), value.clone());
        }

        debug!(method = %request.method(), uri = %request.uri(), "Executing upstream request");

        let (parts, body) = request.into_parts();
        let response = match self.settings.read_timeout {
            Some(timeout) => {
                let (body, activity) = ActivityBody::new(body);
                let pending = self.client.request(Request::from_parts(parts, Body::new(body)));
                until_idle(pending, timeout, activity).await?
            }
            None => self.client.request(Request::from_parts(parts, body)).await,
        }
        .map_err(upstream_error)?;

        let (parts, incoming) = response.into_parts();
        Ok(Response::from_parts(
            parts,
            response_body(incoming, self.settings.read_timeout),
        ))
    }
}

fn response_body(incoming: Incoming, read_timeout: Option<Duration>) -> Body {
    match read_timeout {
        Some(timeout) => Body::new(ReadTimeoutBody::new(incoming, timeout)),
        None => Body::new(incoming),
    }
}

/// Classify a client failure, keeping connection-request timeouts distinct
fn upstream_error(error: hyper_util::client::legacy::Error) -> ProxyError {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(&error);
    while let Some(cause) = source {
        if let Some(timeout) = cause.downcast_ref::<ConnectionRequestTimeout>() {
            return ProxyError::UpstreamTimeout {
                what: "connection request",
                after: timeout.0,
            };
        }
        source = cause.source();
    }
    ProxyError::upstream_io(error)
}

/// Wait for `future`, failing once `timeout` passes without request body activity
///
/// The timer restarts whenever the outbound body yields a frame and once more
/// when the body is finished, so what is measured is the upstream's silence.
pub async fn until_idle<F: Future>(
    future: F,
    timeout: Duration,
    mut activity: watch::Receiver<()>,
) -> ProxyResult<F::Output> {
    tokio::pin!(future);
    let mut uploading = true;

    loop {
        tokio::select! {
            output = &mut future => return Ok(output),
            changed = activity.changed(), if uploading => uploading = changed.is_ok(),
            () = tokio::time::sleep(timeout) => {
                return Err(ProxyError::UpstreamTimeout { what: "read", after: timeout });
            }
        }
    }
}

pin_project! {
    /// Request body wrapper reporting every produced frame to a watch channel
    ///
    /// The sender is dropped at the end of the body.
    pub struct ActivityBody<B> {
        #[pin]
        inner: B,
        activity: Option<watch::Sender<()>>,
    }
}

impl<B> ActivityBody<B> {
    pub fn new(inner: B) -> (Self, watch::Receiver<()>) {
        let (tx, rx) = watch::channel(());
        let body = Self {
            inner,
            activity: Some(tx),
        };
        (body, rx)
    }
}

impl<B> http_body::Body for ActivityBody<B>
where
    B: http_body::Body<Data = Bytes>,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.project();
        let polled = this.inner.poll_frame(cx);

        if let Poll::Ready(frame) = &polled {
            if let Some(activity) = this.activity.as_ref() {
                activity.send_replace(());
            }
            if frame.is_none() {
                *this.activity = None;
            }
        }

        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

/// Raised when no connection could be obtained within the connection request timeout
#[derive(Debug, thiserror::Error)]
#[error("Upstream connection request timed out after {0:?}")]
pub struct ConnectionRequestTimeout(pub Duration);

/// Connector wrapper bounding how long establishing a connection may take
#[derive(Clone, Debug)]
pub struct TimeoutConnector<C> {
    inner: C,
    timeout: Option<Duration>,
}

impl<C> TimeoutConnector<C> {
    pub fn new(inner: C, timeout: Option<Duration>) -> Self {
        Self { inner, timeout }
    }
}

impl<C> Service<Uri> for TimeoutConnector<C>
where
    C: Service<Uri>,
    C::Response: Send + 'static,
    C::Error: Into<BoxError>,
    C::Future: Send + 'static,
{
    type Response = C::Response;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<C::Response, BoxError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, uri: Uri) -> Self::Future {
        let connecting = self.inner.call(uri);
        let timeout = self.timeout;

        Box::pin(async move {
            match timeout {
                Some(after) => match tokio::time::timeout(after, connecting).await {
                    Ok(result) => result.map_err(Into::into),
                    Err(_) => Err(Box::new(ConnectionRequestTimeout(after)) as BoxError),
                },
                None => connecting.await.map_err(Into::into),
            }
        })
    }
}

/// Raised when an upstream body read stalls longer than the read timeout
#[derive(Debug, thiserror::Error)]
#[error("Upstream read timed out after {0:?}")]
pub struct ReadTimeoutError(pub Duration);

pin_project! {
    /// Body wrapper that fails a frame read exceeding `timeout`
    ///
    /// The timer restarts for every frame, so a long but steadily flowing
    /// body is never cut off.
    pub struct ReadTimeoutBody<B> {
        #[pin]
        inner: B,
        #[pin]
        sleep: Option<Sleep>,
        timeout: Duration,
    }
}

impl<B> ReadTimeoutBody<B> {
    pub fn new(inner: B, timeout: Duration) -> Self {
        Self {
            inner,
            sleep: None,
            timeout,
        }
    }
}

impl<B> http_body::Body for ReadTimeoutBody<B>
where
    B: http_body::Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let mut this = self.project();

        if this.sleep.is_none() {
            this.sleep.set(Some(tokio::time::sleep(*this.timeout)));
        }

        if let Poll::Ready(frame) = this.inner.poll_frame(cx) {
            this.sleep.set(None);
            return Poll::Ready(frame.map(|result| result.map_err(Into::into)));
        }

        if let Some(sleep) = this.sleep.as_pin_mut() {
            if sleep.poll(cx).is_ready() {
                return Poll::Ready(Some(Err(Box::new(ReadTimeoutError(*this.timeout)))));
            }
        }

        Poll::Pending
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
