// src/lib.rs

use axum::{
    routing::{get, post},
    Router,
};
use sea_orm::DatabaseConnection;
use services::{intake::IntakeService, status::StatusService};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub intake: IntakeService,
    pub status: StatusService,
}

pub mod entities {
    pub mod prelude;
    pub mod operations;
}

pub mod services {
    pub mod record_store;
    pub mod chain_gateway;
    pub mod relay_signer;
    pub mod operation_encoder;
    pub mod slot_guard;
    pub mod submission;
    pub mod intake;
    pub mod status;
}

pub mod config;
pub mod models;
pub mod handlers;
pub mod jobs;

/// HTTP surface of the relay
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::operations::health))
        .route("/api/submit_op", post(handlers::operations::submit_op))
        .route("/api/status/{op_hash}", get(handlers::operations::get_status))
        .route("/api/history", get(handlers::operations::get_history))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
