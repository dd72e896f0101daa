//! Mount Proxy - forwards a mounted sub-path to another HTTP service
//!
//! Inbound requests under the mount path are rewritten against a target
//! base URL, executed through a pooled client, and the upstream response is
//! streamed back unchanged. Credentials and host identity can be substituted
//! per request along the way.

pub mod application;
pub mod config;
pub mod error;
pub mod proxy;

pub use application::Application;
pub use error::{Error, Result};
