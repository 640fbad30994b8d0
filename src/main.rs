use anyhow::Context;
use apothecary_api::{
    build_router,
    config::{init_tracing, load_config},
    db::{ensure_schema, establish_connection},
    events::{event_channel, process_events, reconciliation::ReconciliationWorker},
    stripe::StripeClient,
    AppState,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config().context("failed to load configuration")?;
    init_tracing(&config.log_level, config.log_json);

    let config = Arc::new(config);
    info!(environment = %config.environment, "starting apothecary-api");

    let db = establish_connection(&config)
        .await
        .context("failed to connect to database")?;
    let db = Arc::new(db);

    if config.auto_migrate {
        ensure_schema(&db).await.context("schema bootstrap failed")?;
    }

    let (event_sender, event_receiver) = event_channel(config.event_channel_capacity);

    let stripe = StripeClient::new(
        config.stripe.secret_key.clone(),
        config.stripe.api_base.clone(),
    );

    let state = AppState::new(db.clone(), config.clone(), event_sender, stripe);

    tokio::spawn(process_events(
        event_receiver,
        Some(state.services.notifications.clone()),
    ));

    let worker = ReconciliationWorker::new(db.clone());
    tokio::spawn(worker.run(Duration::from_secs(config.reconciliation_poll_secs)));

    let app = build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
