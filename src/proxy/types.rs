//! Type definitions for the proxy module

use http::Method;
use nutype::nutype;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Boxed error used at the body and client seams
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

// ========== Configuration Types ==========

/// Path prefix under which the proxy is mounted
///
/// Matched as a literal substring of the inbound request path.
#[nutype(
    validate(predicate = |s: &str| !s.is_empty()),
    derive(Clone, Debug, Display, PartialEq, Eq, Deserialize, Serialize, TryFrom, AsRef),
)]
pub struct MountPath(String);

/// Origin (and optional base path) requests are forwarded to
///
/// Used exactly as configured: no trailing-slash normalization is applied.
#[nutype(
    validate(predicate = |s: &str| s.starts_with("http://") || s.starts_with("https://")),
    derive(Clone, Debug, Display, PartialEq, Eq, Deserialize, Serialize, TryFrom, AsRef),
)]
pub struct TargetBaseUrl(String);

/// Largest chunk handed to the response sink per write
#[nutype(
    validate(predicate = |size: &usize| *size > 0),
    derive(Clone, Copy, Debug, Display, PartialEq, Eq, Deserialize, Serialize, TryFrom, AsRef),
)]
pub struct CopyBufferSize(usize);

/// Default response copy chunk size (4 KiB)
pub const DEFAULT_COPY_BUFFER_SIZE: usize = 4 * 1024;

impl Default for CopyBufferSize {
    fn default() -> Self {
        Self::try_new(DEFAULT_COPY_BUFFER_SIZE).expect("4KB is a valid copy buffer size")
    }
}

/// Treatment of hop-by-hop headers on upstream responses
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HopByHopPolicy {
    /// Copy every upstream header verbatim
    #[default]
    PassThrough,
    /// Drop Connection, Transfer-Encoding and the other hop-by-hop headers
    Strip,
}

// ========== Request Types ==========

/// HTTP methods the proxy is willing to forward
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SupportedMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl SupportedMethod {
    pub fn as_method(self) -> Method {
        match self {
            Self::Get => Method::GET,
            Self::Post => Method::POST,
            Self::Put => Method::PUT,
            Self::Delete => Method::DELETE,
        }
    }
}

impl TryFrom<&Method> for SupportedMethod {
    type Error = ProxyError;

    fn try_from(method: &Method) -> Result<Self, Self::Error> {
        match *method {
            Method::GET => Ok(Self::Get),
            Method::POST => Ok(Self::Post),
            Method::PUT => Ok(Self::Put),
            Method::DELETE => Ok(Self::Delete),
            _ => Err(ProxyError::UnsupportedMethod(method.clone())),
        }
    }
}

/// Stage of a single forwarding cycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ForwardPhase {
    Building,
    Sending,
    StreamingResponse,
    Done,
    Failed,
}

impl fmt::Display for ForwardPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Building => "building",
            Self::Sending => "sending",
            Self::StreamingResponse => "streaming_response",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

// ========== Errors ==========

/// Failure writing to the inbound response sink
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Response sink closed by the caller")]
    Closed,

    #[error("Response already committed, cannot send error status {0}")]
    Committed(http::StatusCode),
}

impl SinkError {
    /// The caller stopped listening; routine for an aborted download
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// Errors that can occur in the proxy
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Proxy doesn't support method: {0}")]
    UnsupportedMethod(Method),

    #[error("Invalid header value for {name}: {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("Upstream I/O error: {0}")]
    UpstreamIo(String),

    #[error("Upstream {what} timed out after {after:?}")]
    UpstreamTimeout { what: &'static str, after: Duration },

    #[error("Failed to write response: {0}")]
    SinkWrite(#[from] SinkError),
}

impl ProxyError {
    /// Wrap an upstream failure, keeping the full source chain in the message
    pub fn upstream_io(error: impl Into<BoxError>) -> Self {
        let error = error.into();
        Self::UpstreamIo(error_chain(error.as_ref()))
    }

    pub fn mount_path_not_found(path: &str, mount_path: &MountPath) -> Self {
        Self::Configuration(format!(
            "Proxy request path '{path}' does not contain mount path '{mount_path}'"
        ))
    }

    /// Status written to the caller when this error aborts a forwarding cycle
    pub fn status_code(&self) -> http::StatusCode {
        http::StatusCode::INTERNAL_SERVER_ERROR
    }
}

/// Result type for proxy operations
pub type ProxyResult<T> = Result<T, ProxyError>;

/// Render an error and its sources as `outer: inner: root`
pub fn error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let cause_message = cause.to_string();
        if !message.contains(&cause_message) {
            message.push_str(": ");
            message.push_str(&cause_message);
        }
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_mount_path_rejects_empty() {
        assert!(MountPath::try_new(String::new()).is_err());
        assert!(MountPath::try_new("/api/".to_string()).is_ok());
    }

    #[rstest]
    #[case("http://upstream.internal", true)]
    #[case("https://upstream.internal/base", true)]
    #[case("ftp://upstream.internal", false)]
    #[case("upstream.internal", false)]
    fn test_target_base_url_validation(#[case] url: &str, #[case] valid: bool) {
        assert_eq!(TargetBaseUrl::try_new(url.to_string()).is_ok(), valid);
    }

    #[test]
    fn test_copy_buffer_size_default_is_4k() {
        assert_eq!(*CopyBufferSize::default().as_ref(), 4096);
        assert!(CopyBufferSize::try_new(0).is_err());
    }

    #[rstest]
    #[case(Method::GET, SupportedMethod::Get)]
    #[case(Method::POST, SupportedMethod::Post)]
    #[case(Method::PUT, SupportedMethod::Put)]
    #[case(Method::DELETE, SupportedMethod::Delete)]
    fn test_supported_methods_map_to_themselves(
        #[case] method: Method,
        #[case] expected: SupportedMethod,
    ) {
        let supported = SupportedMethod::try_from(&method).unwrap();
        assert_eq!(supported, expected);
        assert_eq!(supported.as_method(), method);
    }

    #[rstest]
    #[case(Method::HEAD)]
    #[case(Method::PATCH)]
    #[case(Method::OPTIONS)]
    #[case(Method::TRACE)]
    fn test_other_methods_are_unsupported(#[case] method: Method) {
        let error = SupportedMethod::try_from(&method).unwrap_err();
        assert!(matches!(error, ProxyError::UnsupportedMethod(ref m) if *m == method));
        assert_eq!(
            error.to_string(),
            format!("Proxy doesn't support method: {method}")
        );
    }

    #[test]
    fn test_all_proxy_errors_map_to_internal_server_error() {
        let errors = [
            ProxyError::Configuration("x".to_string()),
            ProxyError::UnsupportedMethod(Method::PATCH),
            ProxyError::UpstreamIo("refused".to_string()),
            ProxyError::UpstreamTimeout {
                what: "read",
                after: Duration::from_millis(5),
            },
        ];
        for error in errors {
            assert_eq!(error.status_code(), http::StatusCode::INTERNAL_SERVER_ERROR);
        }
    }

    #[test]
    fn test_error_chain_includes_sources() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "connection refused");
        let error = ProxyError::upstream_io(io);
        assert_eq!(error.to_string(), "Upstream I/O error: connection refused");
    }

    #[test]
    fn test_only_closed_sink_counts_as_disconnect() {
        assert!(SinkError::Closed.is_disconnect());
        assert!(!SinkError::Committed(http::StatusCode::INTERNAL_SERVER_ERROR).is_disconnect());
    }

    #[test]
    fn test_hop_by_hop_policy_deserializes_snake_case() {
        let policy: HopByHopPolicy = serde_json::from_str("\"strip\"").unwrap();
        assert_eq!(policy, HopByHopPolicy::Strip);
        assert_eq!(HopByHopPolicy::default(), HopByHopPolicy::PassThrough);
    }
}
