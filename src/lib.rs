pub mod config;
pub mod error;
pub mod state;
pub mod auth;
pub mod client;
pub mod db;
pub mod models;
pub mod queue;
pub mod routes;
pub mod store;
pub mod worker;

use std::sync::Arc;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::client::ClientRegistry;
use crate::config::Config;
use crate::queue::QueueService;
use crate::state::{AppState, SharedState};
use crate::store::QueueStore;

pub fn build_app(store: Arc<dyn QueueStore>, config: Config) -> (Router, SharedState) {
    let queue = Arc::new(QueueService::new(
        store,
        Arc::new(ClientRegistry::new()),
        config.api.clone(),
        config.queue.clone(),
    ));

    let state: SharedState = Arc::new(AppState { config, queue });

    let app = Router::new()
        .merge(routes::api_routes())
        .route("/health", axum::routing::get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    (app, state)
}

async fn health() -> &'static str {
    "ok"
}
