//! Inbound response sink
//!
//! The engine writes the caller's response through [`ResponseSink`] in a
//! fixed order: status, headers, body, flush. The head (status and headers)
//! is committed by the first body write or flush; after that only body bytes
//! and trailers can still be written.

use crate::proxy::types::SinkError;
use async_trait::async_trait;
use axum::body::Body;
use axum::response::Response;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use http_body::Frame;
use http_body_util::StreamBody;
use std::io;
use tokio::sync::{mpsc, oneshot};

/// Destination for the response written back to the original caller
#[async_trait]
pub trait ResponseSink: Send {
    /// Set the status code; ignored once the head is committed
    fn set_status(&mut self, status: StatusCode);

    /// Add a header entry, keeping existing entries with the same name
    fn append_header(&mut self, name: HeaderName, value: HeaderValue);

    async fn write_body(&mut self, chunk: Bytes) -> Result<(), SinkError>;

    async fn write_trailers(&mut self, trailers: HeaderMap) -> Result<(), SinkError>;

    /// Commit the head if needed and push buffered bytes towards the transport
    async fn flush(&mut self) -> Result<(), SinkError>;

    /// Replace the pending response with `status` and a plain-text message
    ///
    /// Fails with [`SinkError::Committed`] when the head was already sent.
    async fn send_error(&mut self, status: StatusCode, message: &str) -> Result<(), SinkError>;

    fn is_committed(&self) -> bool;
}

type BodyFrame = Result<Frame<Bytes>, io::Error>;

/// Receiving half of a [`ChannelSink`]: resolves once the head is committed
pub type PendingResponse = oneshot::Receiver<Response>;

/// Sink that feeds an axum response through channels
///
/// The head travels over a oneshot channel as soon as it is committed; body
/// frames follow through a bounded channel, so a slow caller applies
/// back-pressure to the upstream read loop. Dropping the response on the
/// receiving side (caller disconnected) makes every later write fail with
/// [`SinkError::Closed`].
pub struct ChannelSink {
    status: StatusCode,
    headers: HeaderMap,
    head_tx: Option<oneshot::Sender<Response>>,
    body_tx: mpsc::Sender<BodyFrame>,
    body_rx: Option<mpsc::Receiver<BodyFrame>>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, PendingResponse) {
        let (head_tx, head_rx) = oneshot::channel();
        let (body_tx, body_rx) = mpsc::channel(capacity.max(1));

        let sink = Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            head_tx: Some(head_tx),
            body_tx,
            body_rx: Some(body_rx),
        };
        (sink, head_rx)
    }

    /// Terminate a committed body with an error so the server aborts the
    /// connection instead of presenting a truncated body as complete
    pub async fn abort(self, error: &SinkError) {
        if self.is_committed() {
            let _ = self
                .body_tx
                .send(Err(io::Error::other(error.to_string())))
                .await;
        }
    }

    fn commit(&mut self, body: Body) -> Result<(), SinkError> {
        let Some(head_tx) = self.head_tx.take() else {
            return Ok(());
        };

        let mut response = Response::new(body);
        *response.status_mut() = self.status;
        *response.headers_mut() = std::mem::take(&mut self.headers);

        head_tx.send(response).map_err(|_| SinkError::Closed)
    }

    fn commit_streaming(&mut self) -> Result<(), SinkError> {
        if self.is_committed() {
            return Ok(());
        }

        let body = match self.body_rx.take() {
            Some(mut rx) => Body::new(StreamBody::new(futures_util::stream::poll_fn(
                move |cx| rx.poll_recv(cx),
            ))),
            None => Body::empty(),
        };
        self.commit(body)
    }

    async fn send_frame(&mut self, frame: Frame<Bytes>) -> Result<(), SinkError> {
        self.commit_streaming()?;
        self.body_tx
            .send(Ok(frame))
            .await
            .map_err(|_| SinkError::Closed)
    }
}

#[async_trait]
impl ResponseSink for ChannelSink {
    fn set_status(&mut self, status: StatusCode) {
        if !self.is_committed() {
            self.status = status;
        }
    }

    fn append_header(&mut self, name: HeaderName, value: HeaderValue) {
        if !self.is_committed() {
            self.headers.append(name, value);
        }
    }

    async fn write_body(&mut self, chunk: Bytes) -> Result<(), SinkError> {
        self.send_frame(Frame::data(chunk)).await
    }

    async fn write_trailers(&mut self, trailers: HeaderMap) -> Result<(), SinkError> {
        self.send_frame(Frame::trailers(trailers)).await
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        self.commit_streaming()
    }

    async fn send_error(&mut self, status: StatusCode, message: &str) -> Result<(), SinkError> {
        if self.is_committed() {
            return Err(SinkError::Committed(status));
        }

        self.status = status;
        self.headers.clear();
        self.commit(Body::from(message.to_string()))
    }

    fn is_committed(&self) -> bool {
        self.head_tx.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn test_head_is_committed_on_flush() {
        let (mut sink, pending) = ChannelSink::new(4);
        sink.set_status(StatusCode::CREATED);
        sink.append_header(HeaderName::from_static("x-a"), HeaderValue::from_static("1"));
        sink.append_header(HeaderName::from_static("x-a"), HeaderValue::from_static("2"));
        assert!(!sink.is_committed());

        sink.flush().await.unwrap();
        assert!(sink.is_committed());
        drop(sink);

        let response = pending.await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let values: Vec<_> = response.headers().get_all("x-a").iter().collect();
        assert_eq!(values, vec!["1", "2"]);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_body_chunks_stream_in_order() {
        let (mut sink, pending) = ChannelSink::new(4);
        let writer = tokio::spawn(async move {
            for chunk in ["hello ", "streaming ", "world"] {
                sink.write_body(Bytes::from_static(chunk.as_bytes()))
                    .await
                    .unwrap();
            }
            sink.flush().await.unwrap();
        });

        let response = pending.await.unwrap();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        writer.await.unwrap();
        assert_eq!(&body[..], b"hello streaming world");
    }

    #[tokio::test]
    async fn test_send_error_before_commit_replaces_response() {
        let (mut sink, pending) = ChannelSink::new(4);
        sink.set_status(StatusCode::OK);
        sink.append_header(HeaderName::from_static("x-a"), HeaderValue::from_static("1"));

        sink.send_error(StatusCode::INTERNAL_SERVER_ERROR, "boom")
            .await
            .unwrap();

        let response = pending.await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.headers().get("x-a").is_none());
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"boom");
    }

    #[tokio::test]
    async fn test_send_error_after_commit_fails() {
        let (mut sink, _pending) = ChannelSink::new(4);
        sink.flush().await.unwrap();

        let result = sink
            .send_error(StatusCode::INTERNAL_SERVER_ERROR, "late")
            .await;
        assert!(matches!(result, Err(SinkError::Committed(_))));
    }

    #[tokio::test]
    async fn test_write_after_caller_dropped_is_closed() {
        let (mut sink, pending) = ChannelSink::new(1);
        drop(pending);

        let result = sink.write_body(Bytes::from_static(b"data")).await;
        assert!(matches!(result, Err(SinkError::Closed)));
    }

    #[tokio::test]
    async fn test_abort_terminates_body_with_error() {
        let (mut sink, pending) = ChannelSink::new(4);
        sink.write_body(Bytes::from_static(b"partial")).await.unwrap();
        sink.abort(&SinkError::Closed).await;

        let response = pending.await.unwrap();
        let result = response.into_body().collect().await;
        assert!(result.is_err());
    }
}
