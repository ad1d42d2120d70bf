use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use tokio::signal;
use tracing::{info, warn};

use chroma3d_store as store;
use store::{
    rate_limiter::{default_policies, start_cleanup_task, RateLimitConfig, RateLimitLayer},
    services::{
        notifications::{notifier_from_config, NotificationQueue},
        payments::{mercadopago::MercadoPagoGateway, PaymentGateway},
    },
    signing::TokenSigner,
};

const RATE_LIMIT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = store::config::load_config().context("failed to load configuration")?;
    store::config::init_tracing(cfg.log_level(), cfg.log_json);
    store::handlers::health::init_start_time();

    // Init DB
    let db_pool = store::db::establish_connection_from_app_config(&cfg)
        .await
        .context("failed to connect to database")?;
    if cfg.auto_migrate {
        store::db::run_migrations(&db_pool)
            .await
            .context("failed running migrations")?;
    }
    let db = Arc::new(db_pool);

    // Payment gateway; absent token means simulated payments
    let signer = TokenSigner::new(cfg.signing_key()).context("invalid signing key")?;
    let gateway: Option<Arc<dyn PaymentGateway>> =
        match MercadoPagoGateway::from_config(&cfg, signer)
            .context("failed to configure MercadoPago")?
        {
            Some(gateway) => {
                info!("MercadoPago payments enabled");
                Some(Arc::new(gateway))
            }
            None => {
                warn!("No MercadoPago access token configured; payments are simulated");
                None
            }
        };

    let notifications =
        NotificationQueue::start(notifier_from_config(&cfg), cfg.notification_max_attempts);

    let services =
        store::handlers::AppServices::new(db.clone(), &cfg, gateway, notifications)
            .context("failed to build services")?;

    let rl_config = RateLimitConfig::from_app_config(&cfg);
    let window = rl_config.window_duration;
    let rate_limit = RateLimitLayer::new(rl_config).with_policies(default_policies(window));
    tokio::spawn(start_cleanup_task(
        rate_limit.limiter(),
        RATE_LIMIT_CLEANUP_INTERVAL,
    ));

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.port));
    let app_state = store::AppState {
        db,
        config: Arc::new(cfg),
        services,
    };
    let app = store::app_router(app_state, rate_limit);

    info!("chroma3d-store listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Client IPs for rate limiting fall back to the peer address
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "failed to install Ctrl+C handler");
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
                warn!(error = %err, "failed to install SIGTERM handler");
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
    info!("Shutdown signal received");
}
