//! Header copy policy between inbound, outbound and upstream messages
//!
//! Request side: every inbound entry is copied once, except `Content-Length`
//! (re-derived from the attached body by the client) and `Authorization` /
//! `Host` when an override supplier is configured. Overrides are applied
//! after the copy pass and replace rather than merge.
//!
//! Response side: upstream headers are copied verbatim unless the
//! [`HopByHopPolicy`] asks for hop-by-hop headers to be stripped.

use crate::proxy::hooks::{CredentialSupplier, HostSupplier};
use crate::proxy::sink::ResponseSink;
use crate::proxy::types::*;
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use std::sync::Arc;

/// Standard header re-exports for convenience
pub use header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, HOST};

/// Whether `name` is meaningful only for a single transport connection
pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
    )
}

/// Per-request replacements for caller-supplied headers
#[derive(Clone, Default)]
pub struct HeaderOverrides {
    pub authorization: Option<Arc<dyn CredentialSupplier>>,
    pub host: Option<Arc<dyn HostSupplier>>,
}

impl std::fmt::Debug for HeaderOverrides {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeaderOverrides")
            .field("authorization", &self.authorization.is_some())
            .field("host", &self.host.is_some())
            .finish()
    }
}

/// Copy inbound request headers onto the outbound request
pub fn copy_request_headers(
    inbound: &HeaderMap,
    outbound: &mut HeaderMap,
    overrides: &HeaderOverrides,
) -> ProxyResult<()> {
    for (name, value) in inbound {
        if *name == CONTENT_LENGTH {
            continue;
        }
        if overrides.authorization.is_some() && *name == AUTHORIZATION {
            continue;
        }
        if overrides.host.is_some() && *name == HOST {
            continue;
        }
        outbound.append(name.clone(), value.clone());
    }

    if let Some(supplier) = &overrides.authorization {
        outbound.insert(AUTHORIZATION, override_value(&AUTHORIZATION, supplier.authorization())?);
    }
    if let Some(supplier) = &overrides.host {
        outbound.insert(HOST, override_value(&HOST, supplier.host())?);
    }

    Ok(())
}

fn override_value(name: &HeaderName, value: String) -> ProxyResult<HeaderValue> {
    HeaderValue::try_from(value).map_err(|e| ProxyError::InvalidHeader {
        name: name.to_string(),
        reason: e.to_string(),
    })
}

/// Copy upstream response headers onto the caller's response
pub fn copy_response_headers<S>(upstream: &HeaderMap, sink: &mut S, policy: HopByHopPolicy)
where
    S: ResponseSink + ?Sized,
{
    for (name, value) in upstream {
        if policy == HopByHopPolicy::Strip && is_hop_by_hop(name) {
            continue;
        }
        sink.append_header(name.clone(), value.clone());
    }
}
