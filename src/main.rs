use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use hisab_khata::{
    build_state, config::Config, connections, init_router, init_store, ledger, notify,
    store::Store,
};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const USAGE: &str = "usage: hisab-khata [serve | sync-relationships | reconcile]";

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;
    let command = std::env::args().nth(1);
    let store = init_store(&config).await?;

    match command.as_deref() {
        None | Some("serve") => serve(config, store).await,
        Some("sync-relationships") => {
            let report = connections::sync_relationships(store.as_ref()).await?;
            info!(
                created = report.created,
                existing = report.existing,
                unresolvable = report.unresolvable,
                "relationship sync finished"
            );
            Ok(())
        }
        Some("reconcile") => {
            let report = ledger::reconcile(store.as_ref()).await?;
            info!(
                checked = report.checked,
                corrected = report.corrected,
                "balance reconcile finished"
            );
            Ok(())
        }
        Some(other) => anyhow::bail!("unknown command `{other}`\n{USAGE}"),
    }
}

async fn serve(config: Config, store: Arc<dyn Store>) -> Result<()> {
    let push = notify::push_client_from_config(&config)?;
    let port = config.server_port;
    let app = init_router(build_state(config, store, push));

    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!(%addr, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}
