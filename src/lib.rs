pub mod adapters;
pub mod cli;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod ports;
pub mod services;
pub mod startup;
pub mod utils;

use axum::{routing::get, Router};

#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .with_state(state)
}
