//! Pluggable per-request capabilities
//!
//! Each capability is a single-method contract consulted while building the
//! outbound request. Suppliers are invoked once per forwarded request and
//! their values are never cached across requests, so time-varying values
//! (refreshed tokens, rotating hosts) take effect immediately.

use http::request::Parts;

/// Rewrites the path remaining after the mount path was stripped
pub trait PathTransform: Send + Sync {
    /// Produce the path appended to the target base URL
    ///
    /// `request` is the inbound request head, available for templating
    /// (e.g. inserting a tenant segment derived from a header).
    fn create_path(&self, path_after_mount: &str, request: &Parts) -> String;
}

/// Leaves the path untouched
#[derive(Clone, Copy, Debug, Default)]
pub struct IdentityTransform;

impl PathTransform for IdentityTransform {
    fn create_path(&self, path_after_mount: &str, _request: &Parts) -> String {
        path_after_mount.to_string()
    }
}

impl<F> PathTransform for F
where
    F: Fn(&str, &Parts) -> String + Send + Sync,
{
    fn create_path(&self, path_after_mount: &str, request: &Parts) -> String {
        self(path_after_mount, request)
    }
}

/// Provides the `Authorization` value that replaces the caller's own
pub trait CredentialSupplier: Send + Sync {
    fn authorization(&self) -> String;
}

impl<F> CredentialSupplier for F
where
    F: Fn() -> String + Send + Sync,
{
    fn authorization(&self) -> String {
        self()
    }
}

/// Provides the `Host` value that replaces the caller's own
pub trait HostSupplier: Send + Sync {
    fn host(&self) -> String;
}

impl<F> HostSupplier for F
where
    F: Fn() -> String + Send + Sync,
{
    fn host(&self) -> String {
        self()
    }
}

/// Fixed value for either override, used by file/env configuration
#[derive(Clone, Debug)]
pub struct StaticValue(pub String);

impl CredentialSupplier for StaticValue {
    fn authorization(&self) -> String {
        self.0.clone()
    }
}

impl HostSupplier for StaticValue {
    fn host(&self) -> String {
        self.0.clone()
    }
}
