//! `GET /health`: process liveness plus per-dependency reachability, so an on-call
//! engineer gets more than a bare 200 when the pipeline is actually stuck.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_seconds: u64,
    pub timestamp: chrono::DateTime<Utc>,
    pub dependencies: Dependencies,
}

#[derive(Debug, Serialize)]
pub struct Dependencies {
    pub database: bool,
    pub redis: bool,
    pub broker: bool,
}

pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let database = sqlx::query("SELECT 1").execute(&state.db).await.is_ok();
    let redis = state.redis.health_check().await.unwrap_or(false);
    let broker = state.broker.is_connected().await;

    let status = if database && redis && broker { "ok" } else { "degraded" };
    let code = if database && redis && broker { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };

    let body = HealthResponse {
        status,
        uptime_seconds: state.started_at.elapsed().as_secs(),
        timestamp: Utc::now(),
        dependencies: Dependencies { database, redis, broker },
    };

    (code, Json(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependencies_serialize() {
        let deps = Dependencies { database: true, redis: false, broker: true };
        let json = serde_json::to_value(&deps).unwrap();
        assert_eq!(json["redis"], false);
    }
}
