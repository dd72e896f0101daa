//! Proxy module for forwarding a mounted sub-path upstream
//!
//! - Path rewriting: strip the mount path, apply the path transform
//! - Engine: build the outbound request, execute it, stream the response back
//! - Service: axum binding that runs one forwarding task per request

pub mod builder;
pub mod client;
pub mod engine;
pub mod headers;
pub mod hooks;
pub mod path_rewriter;
pub mod service;
pub mod sink;
pub mod types;

#[cfg(test)]
pub mod test_utils;


pub use builder::ProxyBuilder;
pub use client::{ClientSettings, HyperUpstreamClient, UpstreamClient};
pub use engine::{HttpProxy, ProxyConfiguration};
pub use hooks::{CredentialSupplier, HostSupplier, IdentityTransform, PathTransform};
pub use sink::{ChannelSink, ResponseSink};
pub use types::{ProxyError, ProxyResult, SinkError};
