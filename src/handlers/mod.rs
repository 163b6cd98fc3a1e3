use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub version: &'static str,
    pub db: &'static str,
    pub db_pool: DbPoolStats,
}

#[derive(Debug, Serialize)]
pub struct DbPoolStats {
    pub active_connections: u32,
    pub idle_connections: u32,
    pub max_connections: u32,
}

/// Reports database reachability; 503 when the database is down.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let connected = crate::db::check_health(&state.db).await.is_ok();

    let health = HealthStatus {
        status: if connected { "healthy" } else { "unhealthy" },
        version: env!("CARGO_PKG_VERSION"),
        db: if connected { "connected" } else { "disconnected" },
        db_pool: DbPoolStats {
            active_connections: state.db.size(),
            idle_connections: state.db.num_idle() as u32,
            max_connections: state.db.options().get_max_connections(),
        },
    };

    let status_code = if connected {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(health))
}
