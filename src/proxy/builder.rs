//! Builder for [`HttpProxy`]
//!
//! ```rust,ignore
//! use mount_proxy::proxy::ProxyBuilder;
//!
//! let proxy = ProxyBuilder::new("/api/", "http://upstream.internal")
//!     .connect_timeout(2_000)
//!     .read_timeout(30_000)
//!     .add_default_header("x-forwarded-by", "mount_proxy")
//!     .authorization_supplier(|| token_cache.current())
//!     .build()?;
//! ```

use crate::config::ProxySettings;
use crate::proxy::client::{ClientSettings, HyperUpstreamClient, UpstreamClient};
use crate::proxy::engine::{HttpProxy, ProxyConfiguration};
use crate::proxy::headers::HeaderOverrides;
use crate::proxy::hooks::*;
use crate::proxy::types::*;
use http::{HeaderName, HeaderValue};
use std::sync::Arc;
use std::time::Duration;

/// Collects proxy and client settings; validation happens in `build`
pub struct ProxyBuilder {
    mount_path: String,
    target_base_url: String,
    connect_timeout_ms: u64,
    read_timeout_ms: u64,
    connection_request_timeout_ms: u64,
    default_headers: Vec<(String, String)>,
    path_transform: Arc<dyn PathTransform>,
    overrides: HeaderOverrides,
    copy_buffer_size: usize,
    hop_by_hop: HopByHopPolicy,
}

impl ProxyBuilder {
    pub fn new(mount_path: impl Into<String>, target_base_url: impl Into<String>) -> Self {
        Self {
            mount_path: mount_path.into(),
            target_base_url: target_base_url.into(),
            connect_timeout_ms: 0,
            read_timeout_ms: 0,
            connection_request_timeout_ms: 0,
            default_headers: Vec::new(),
            path_transform: Arc::new(IdentityTransform),
            overrides: HeaderOverrides::default(),
            copy_buffer_size: DEFAULT_COPY_BUFFER_SIZE,
            hop_by_hop: HopByHopPolicy::default(),
        }
    }

    /// Start from file/env settings; static overrides become suppliers
    pub fn from_settings(settings: &ProxySettings) -> Self {
        let mut builder = Self::new(settings.mount_path.clone(), settings.target_base_url.clone())
            .connect_timeout(settings.connect_timeout_ms)
            .read_timeout(settings.read_timeout_ms)
            .connection_request_timeout(settings.connection_request_timeout_ms)
            .copy_buffer_size(settings.copy_buffer_size)
            .hop_by_hop_policy(settings.hop_by_hop);

        for header in &settings.default_headers {
            builder = builder.add_default_header(header.name.clone(), header.value.clone());
        }
        if let Some(authorization) = &settings.authorization {
            builder = builder.authorization_supplier(StaticValue(authorization.clone()));
        }
        if let Some(host) = &settings.host {
            builder = builder.host_supplier(StaticValue(host.clone()));
        }
        builder
    }

    /// Connect timeout in milliseconds; 0 disables it
    pub fn connect_timeout(mut self, millis: u64) -> Self {
        self.connect_timeout_ms = millis;
        self
    }

    /// Read timeout in milliseconds; 0 disables it
    pub fn read_timeout(mut self, millis: u64) -> Self {
        self.read_timeout_ms = millis;
        self
    }

    /// Connection-request timeout in milliseconds; 0 disables it
    pub fn connection_request_timeout(mut self, millis: u64) -> Self {
        self.connection_request_timeout_ms = millis;
        self
    }

    /// Header added to every outbound request
    pub fn add_default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.push((name.into(), value.into()));
        self
    }

    pub fn path_transform(mut self, transform: impl PathTransform + 'static) -> Self {
        self.path_transform = Arc::new(transform);
        self
    }

    pub fn authorization_supplier(mut self, supplier: impl CredentialSupplier + 'static) -> Self {
        self.overrides.authorization = Some(Arc::new(supplier));
        self
    }

    pub fn host_supplier(mut self, supplier: impl HostSupplier + 'static) -> Self {
        self.overrides.host = Some(Arc::new(supplier));
        self
    }

    pub fn copy_buffer_size(mut self, bytes: usize) -> Self {
        self.copy_buffer_size = bytes;
        self
    }

    pub fn hop_by_hop_policy(mut self, policy: HopByHopPolicy) -> Self {
        self.hop_by_hop = policy;
        self
    }

    /// Build with the pooled hyper client
    pub fn build(self) -> ProxyResult<HttpProxy<HyperUpstreamClient>> {
        let client_settings = self.client_settings()?;
        let client = HyperUpstreamClient::new(client_settings);
        self.build_with_client(client)
    }

    /// Build against any [`UpstreamClient`]
    ///
    /// Timeouts and default headers are client concerns and are ignored here.
    pub fn build_with_client<C: UpstreamClient>(self, client: C) -> ProxyResult<HttpProxy<C>> {
        let mount_path = MountPath::try_new(self.mount_path)
            .map_err(|e| ProxyError::Configuration(format!("Invalid mount path: {e}")))?;
        let target_base_url = TargetBaseUrl::try_new(self.target_base_url)
            .map_err(|e| ProxyError::Configuration(format!("Invalid target base URL: {e}")))?;
        let copy_buffer_size = CopyBufferSize::try_new(self.copy_buffer_size)
            .map_err(|e| ProxyError::Configuration(format!("Invalid copy buffer size: {e}")))?;

        let config = ProxyConfiguration {
            mount_path,
            target_base_url,
            path_transform: self.path_transform,
            overrides: self.overrides,
            copy_buffer_size,
            hop_by_hop: self.hop_by_hop,
        };
        Ok(HttpProxy::new(config, client))
    }

    fn client_settings(&self) -> ProxyResult<ClientSettings> {
        let default_headers = self
            .default_headers
            .iter()
            .map(|(name, value)| {
                let header_name = HeaderName::try_from(name.as_str()).map_err(|e| {
                    ProxyError::InvalidHeader {
                        name: name.clone(),
                        reason: e.to_string(),
                    }
                })?;
                let header_value = HeaderValue::try_from(value.as_str()).map_err(|e| {
                    ProxyError::InvalidHeader {
                        name: name.clone(),
                        reason: e.to_string(),
                    }
                })?;
                Ok((header_name, header_value))
            })
            .collect::<ProxyResult<Vec<_>>>()?;

        Ok(ClientSettings {
            connect_timeout: millis(self.connect_timeout_ms),
            read_timeout: millis(self.read_timeout_ms),
            connection_request_timeout: millis(self.connection_request_timeout_ms),
            default_headers,
        })
    }
}

fn millis(value: u64) -> Option<Duration> {
    (value > 0).then(|| Duration::from_millis(value))
}
