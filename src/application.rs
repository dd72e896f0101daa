use crate::config::Settings;
use crate::proxy::{HttpProxy, HyperUpstreamClient, ProxyBuilder};
use crate::Result;
use tokio::net::TcpListener;
use tracing::{info, instrument};

/// Main application struct that coordinates all components
pub struct Application {
    settings: Settings,
    proxy: HttpProxy<HyperUpstreamClient>,
}

impl Application {
    #[instrument(skip_all)]
    pub fn new(settings: Settings) -> Result<Self> {
        info!(
            mount_path = %settings.proxy.mount_path,
            target = %settings.proxy.target_base_url,
            "Configuring proxy"
        );
        let proxy = ProxyBuilder::from_settings(&settings.proxy).build()?;

        Ok(Self { settings, proxy })
    }

    #[instrument(skip(self))]
    pub async fn run(self) -> Result<()> {
        let address = self.settings.bind_address();
        let listener = TcpListener::bind(&address).await?;
        info!("Starting mount proxy on {}", listener.local_addr()?);

        axum::serve(listener, self.proxy.into_router())
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("Server stopped");
        Ok(())
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn proxy(&self) -> &HttpProxy<HyperUpstreamClient> {
        &self.proxy
    }
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown signal received");
    }
}
