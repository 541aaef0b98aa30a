use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use tokio::signal;
use tracing::{info, warn};

use cowpay_checkout as app;
use app::repositories::InMemoryOrderStore;
use app::services::{HttpTransport, InMemoryStorefront};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = app::config::load_config().context("loading configuration")?;
    app::config::init_tracing(&cfg.log_level, cfg.log_json);

    if cfg.gateway.sandbox {
        warn!(base_url = %cfg.gateway.base_url, "using the sandbox gateway");
    }

    let endpoint = cfg
        .gateway
        .charge_endpoint()
        .context("building gateway charge endpoint")?;
    let transport = HttpTransport::new(endpoint, cfg.gateway.api_token.clone(), cfg.gateway.timeout())
        .context("building gateway transport")?;

    let state = app::AppState::new(
        &cfg,
        Arc::new(InMemoryOrderStore::new()),
        Arc::new(InMemoryStorefront::new()),
        Arc::new(transport),
    );
    let router = app::app_router(state);

    let addr: SocketAddr = cfg
        .bind_address()
        .parse()
        .with_context(|| format!("invalid bind address {}", cfg.bind_address()))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!(environment = %cfg.environment, "cowpay-checkout listening on http://{}", addr);

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!("failed to install Ctrl+C handler: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!("failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
