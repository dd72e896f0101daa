//! Forwarding engine
//!
//! One call to [`HttpProxy::forward`] runs a single forwarding cycle:
//!
//! ```text
//! Building -> Sending -> StreamingResponse -> Done
//!     \_________\_____________\_____________> Failed -> error response written
//! ```
//!
//! There is exactly one upstream attempt per inbound request. Every failure
//! before or during execution becomes a 500 response carrying the failure
//! message; only a failure to write that error response escapes.

use crate::proxy::client::UpstreamClient;
use crate::proxy::headers::{self, HeaderOverrides, CONTENT_LENGTH};
use crate::proxy::hooks::PathTransform;
use crate::proxy::path_rewriter::compute_target_path;
use crate::proxy::sink::ResponseSink;
use crate::proxy::types::*;
use axum::body::Body;
use http::request::Parts;
use http::{HeaderMap, Request, Response, Uri};
use http_body_util::BodyExt;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Immutable settings shared by every forwarding cycle
#[derive(Clone)]
pub struct ProxyConfiguration {
    pub mount_path: MountPath,
    pub target_base_url: TargetBaseUrl,
    pub path_transform: Arc<dyn PathTransform>,
    pub overrides: HeaderOverrides,
    pub copy_buffer_size: CopyBufferSize,
    pub hop_by_hop: HopByHopPolicy,
}

impl std::fmt::Debug for ProxyConfiguration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyConfiguration")
            .field("mount_path", &self.mount_path)
            .field("target_base_url", &self.target_base_url)
            .field("overrides", &self.overrides)
            .field("copy_buffer_size", &self.copy_buffer_size)
            .field("hop_by_hop", &self.hop_by_hop)
            .finish_non_exhaustive()
    }
}

/// Forwards requests under a mount path to the target base URL
pub struct HttpProxy<C> {
    config: Arc<ProxyConfiguration>,
    client: Arc<C>,
}

impl<C> Clone for HttpProxy<C> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            client: Arc::clone(&self.client),
        }
    }
}

impl<C: UpstreamClient> HttpProxy<C> {
    pub fn new(config: ProxyConfiguration, client: C) -> Self {
        Self {
            config: Arc::new(config),
            client: Arc::new(client),
        }
    }

    pub fn config(&self) -> &ProxyConfiguration {
        &self.config
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Run one forwarding cycle, writing the outcome to `sink`
    ///
    /// Request-scoped failures are converted into a 500 response. The only
    /// error returned is a failure to write that response.
    #[instrument(skip_all, fields(method = %request.method(), path = %request.uri().path()))]
    pub async fn forward<S>(&self, request: Request<Body>, sink: &mut S) -> Result<(), SinkError>
    where
        S: ResponseSink + ?Sized,
    {
        let mut phase = ForwardPhase::Building;

        match self.try_forward(request, sink, &mut phase).await {
            Ok(()) => {
                debug!(%phase, "Forwarding completed");
                Ok(())
            }
            Err(error) => {
                warn!(failed_in = %phase, %error, "Forwarding failed");
                phase = ForwardPhase::Failed;
                debug!(%phase, "Writing error response");
                write_error_response(sink, &error).await
            }
        }
    }

    async fn try_forward<S>(
        &self,
        request: Request<Body>,
        sink: &mut S,
        phase: &mut ForwardPhase,
    ) -> ProxyResult<()>
    where
        S: ResponseSink + ?Sized,
    {
        let outbound = self.create_proxy_request(request)?;

        *phase = ForwardPhase::Sending;
        debug!(uri = %outbound.uri(), "Forwarding to upstream");
        let response = self.client.execute(outbound).await?;

        *phase = ForwardPhase::StreamingResponse;
        self.write_proxy_response(response, sink).await?;

        *phase = ForwardPhase::Done;
        Ok(())
    }

    /// Assemble the outbound request: URL, method, headers, then body
    pub fn create_proxy_request(&self, request: Request<Body>) -> ProxyResult<Request<Body>> {
        let (parts, body) = request.into_parts();

        let uri = self.create_proxy_uri(&parts)?;
        let method = SupportedMethod::try_from(&parts.method)?;

        let body = if declared_content_length(&parts.headers) == Some(0) {
            Body::empty()
        } else {
            body
        };

        let mut outbound = Request::new(body);
        *outbound.method_mut() = method.as_method();
        *outbound.uri_mut() = uri;
        headers::copy_request_headers(&parts.headers, outbound.headers_mut(), &self.config.overrides)?;

        Ok(outbound)
    }

    /// Target base URL + rewritten path + original query string
    pub fn create_proxy_url(&self, parts: &Parts) -> ProxyResult<String> {
        let path = compute_target_path(
            parts.uri.path(),
            &self.config.mount_path,
            self.config.path_transform.as_ref(),
            parts,
        )?;

        let mut url = String::from(self.config.target_base_url.as_ref());
        url.push_str(&path);
        if let Some(query) = parts.uri.query() {
            url.push('?');
            url.push_str(query);
        }
        Ok(url)
    }

    fn create_proxy_uri(&self, parts: &Parts) -> ProxyResult<Uri> {
        let url = self.create_proxy_url(parts)?;
        url.parse::<Uri>()
            .map_err(|e| ProxyError::Configuration(format!("Invalid upstream URL '{url}': {e}")))
    }

    /// Copy status, headers and body from the upstream response, then flush
    async fn write_proxy_response<S>(&self, response: Response<Body>, sink: &mut S) -> ProxyResult<()>
    where
        S: ResponseSink + ?Sized,
    {
        let (parts, mut body) = response.into_parts();

        sink.set_status(parts.status);
        headers::copy_response_headers(&parts.headers, sink, self.config.hop_by_hop);

        // `body` is dropped on every exit path, releasing the upstream connection
        let chunk_size = *self.config.copy_buffer_size.as_ref();
        while let Some(frame) = body.frame().await {
            let frame = frame.map_err(ProxyError::upstream_io)?;
            match frame.into_data() {
                Ok(mut data) => {
                    while !data.is_empty() {
                        let chunk = data.split_to(data.len().min(chunk_size));
                        sink.write_body(chunk).await?;
                    }
                }
                Err(frame) => {
                    if let Ok(trailers) = frame.into_trailers() {
                        sink.write_trailers(trailers).await?;
                    }
                }
            }
        }

        sink.flush().await?;
        Ok(())
    }
}

fn declared_content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
}

/// Best-effort 500 response carrying the failure message
pub async fn write_error_response<S>(sink: &mut S, error: &ProxyError) -> Result<(), SinkError>
where
    S: ResponseSink + ?Sized,
{
    sink.send_error(error.status_code(), &error.to_string()).await
}
