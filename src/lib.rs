//! Ledger backend connecting businesses with their customers: connection
//! requests, per-relationship running balances, chat and notifications.

pub mod api;
pub mod chat;
pub mod config;
pub mod connections;
pub mod error;
pub mod favorites;
pub mod ledger;
pub mod notify;
pub mod responses;
pub mod store;
pub mod types;
pub mod users;

use std::sync::Arc;

use anyhow::Result;
pub use api::{AppState, init_router};
use tracing::warn;

use crate::chat::ChatHub;
use crate::config::Config;
use crate::notify::{Notifier, PushClient};
use crate::store::{MemoryStore, PgStore, Store};

/// Opens the store selected by `database_url`.
pub async fn init_store(config: &Config) -> Result<Arc<dyn Store>> {
    if config.uses_memory_store() {
        warn!("using the in-memory store, data will not survive a restart");
        return Ok(Arc::new(MemoryStore::new()));
    }
    let store = PgStore::connect(&config.database_url, config.max_connections).await?;
    Ok(Arc::new(store))
}

/// Wires the shared application state.
pub fn build_state(config: Config, store: Arc<dyn Store>, push: Arc<dyn PushClient>) -> AppState {
    AppState {
        notifier: Notifier::new(Arc::clone(&store), push),
        hub: Arc::new(ChatHub::new(config.chat_channel_capacity)),
        store,
        config,
    }
}
