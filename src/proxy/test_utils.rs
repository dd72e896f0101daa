//! Test utilities for proxy module testing
//!
//! A recording [`ResponseSink`] and a scriptable [`UpstreamClient`] so the
//! engine can be exercised without sockets.

#[cfg(test)]
pub mod test_helpers {
    use crate::proxy::client::UpstreamClient;
    use crate::proxy::sink::ResponseSink;
    use crate::proxy::types::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use bytes::Bytes;
    use http::{HeaderMap, HeaderName, HeaderValue, Method, Request, Response, StatusCode};
    use http_body::Body as _;
    use http_body_util::BodyExt;
    use std::sync::{Arc, Mutex};

    /// One observable write against a [`MemorySink`]
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum SinkEvent {
        Status(StatusCode),
        Header(String),
        Body(usize),
        Trailers,
        Flush,
        Error(StatusCode),
    }

    /// Sink that records everything written to it
    #[derive(Debug, Default)]
    pub struct MemorySink {
        pub status: Option<StatusCode>,
        pub headers: HeaderMap,
        pub body: Vec<u8>,
        pub chunk_sizes: Vec<usize>,
        pub trailers: Option<HeaderMap>,
        pub events: Vec<SinkEvent>,
        pub committed: bool,
        pub flushed: bool,
        /// Simulate a caller that disconnected mid-response
        pub fail_body_writes: bool,
        /// Simulate a transport that cannot carry the error response
        pub fail_send_error: bool,
    }

    impl MemorySink {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn body_string(&self) -> String {
            String::from_utf8_lossy(&self.body).into_owned()
        }
    }

    #[async_trait]
    impl ResponseSink for MemorySink {
        fn set_status(&mut self, status: StatusCode) {
            if !self.committed {
                self.status = Some(status);
                self.events.push(SinkEvent::Status(status));
            }
        }

        fn append_header(&mut self, name: HeaderName, value: HeaderValue) {
            if !self.committed {
                self.events.push(SinkEvent::Header(name.to_string()));
                self.headers.append(name, value);
            }
        }

        async fn write_body(&mut self, chunk: Bytes) -> Result<(), SinkError> {
            self.committed = true;
            if self.fail_body_writes {
                return Err(SinkError::Closed);
            }
            self.events.push(SinkEvent::Body(chunk.len()));
            self.chunk_sizes.push(chunk.len());
            self.body.extend_from_slice(&chunk);
            Ok(())
        }

        async fn write_trailers(&mut self, trailers: HeaderMap) -> Result<(), SinkError> {
            self.committed = true;
            self.events.push(SinkEvent::Trailers);
            self.trailers = Some(trailers);
            Ok(())
        }

        async fn flush(&mut self) -> Result<(), SinkError> {
            self.committed = true;
            self.flushed = true;
            self.events.push(SinkEvent::Flush);
            Ok(())
        }

        async fn send_error(&mut self, status: StatusCode, message: &str) -> Result<(), SinkError> {
            if self.fail_send_error {
                return Err(SinkError::Closed);
            }
            if self.committed {
                return Err(SinkError::Committed(status));
            }
            self.committed = true;
            self.status = Some(status);
            self.headers.clear();
            self.body = message.as_bytes().to_vec();
            self.events.push(SinkEvent::Error(status));
            Ok(())
        }

        fn is_committed(&self) -> bool {
            self.committed
        }
    }

    /// Outbound request as seen by the mock client
    #[derive(Clone, Debug)]
    pub struct RecordedRequest {
        pub method: Method,
        pub uri: String,
        pub headers: HeaderMap,
        pub body: Vec<u8>,
        pub body_was_end_stream: bool,
    }

    type ResponseFactory = dyn Fn() -> Response<Body> + Send + Sync;

    enum Outcome {
        Respond(Box<ResponseFactory>),
        Fail(Mutex<Option<ProxyError>>),
    }

    /// Upstream client that records requests and replays a scripted outcome
    #[derive(Clone)]
    pub struct MockUpstreamClient {
        outcome: Arc<Outcome>,
        requests: Arc<Mutex<Vec<RecordedRequest>>>,
    }

    impl MockUpstreamClient {
        pub fn ok(status: StatusCode, body: &'static str) -> Self {
            Self::with_response(move || {
                let mut response = Response::new(Body::from(body));
                *response.status_mut() = status;
                response
            })
        }

        pub fn with_response<F>(factory: F) -> Self
        where
            F: Fn() -> Response<Body> + Send + Sync + 'static,
        {
            Self::from_outcome(Outcome::Respond(Box::new(factory)))
        }

        /// Fail the first execution with `error`
        pub fn failing(error: ProxyError) -> Self {
            Self::from_outcome(Outcome::Fail(Mutex::new(Some(error))))
        }

        fn from_outcome(outcome: Outcome) -> Self {
            Self {
                outcome: Arc::new(outcome),
                requests: Arc::new(Mutex::new(Vec::new())),
            }
        }

        pub fn requests(&self) -> Vec<RecordedRequest> {
            self.requests.lock().expect("requests lock").clone()
        }
    }

    #[async_trait]
    impl UpstreamClient for MockUpstreamClient {
        async fn execute(&self, request: Request<Body>) -> ProxyResult<Response<Body>> {
            let body_was_end_stream = request.body().is_end_stream();
            let (parts, body) = request.into_parts();
            let body = body
                .collect()
                .await
                .map_err(ProxyError::upstream_io)?
                .to_bytes();

            self.requests
                .lock()
                .expect("requests lock")
                .push(RecordedRequest {
                    method: parts.method,
                    uri: parts.uri.to_string(),
                    headers: parts.headers,
                    body: body.to_vec(),
                    body_was_end_stream,
                });

            match self.outcome.as_ref() {
                Outcome::Respond(factory) => Ok(factory()),
                Outcome::Fail(error) => {
                    let error = error.lock().expect("error lock").take();
                    Err(error.unwrap_or_else(|| ProxyError::UpstreamIo("mock exhausted".into())))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_helpers::*;
    use crate::proxy::client::UpstreamClient;
    use crate::proxy::sink::ResponseSink;
    use axum::body::Body;
    use bytes::Bytes;
    use http::{Request, StatusCode};

    #[tokio::test]
    async fn test_memory_sink_records_writes() {
        let mut sink = MemorySink::new();
        sink.set_status(StatusCode::ACCEPTED);
        sink.write_body(Bytes::from_static(b"abc")).await.unwrap();
        sink.flush().await.unwrap();

        assert_eq!(sink.status, Some(StatusCode::ACCEPTED));
        assert_eq!(sink.body_string(), "abc");
        assert!(sink.is_committed());
    }

    #[tokio::test]
    async fn test_mock_client_records_request() {
        let client = MockUpstreamClient::ok(StatusCode::OK, "pong");
        let request = Request::builder()
            .uri("http://upstream.internal/ping")
            .body(Body::from("ping"))
            .unwrap();

        let response = client.execute(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let recorded = client.requests();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].body, b"ping");
        assert_eq!(recorded[0].uri, "http://upstream.internal/ping");
    }
}
