pub mod auth;
pub mod generate;
pub mod health;
pub mod logs;
pub mod shorts;

use axum::Router;
use axum::routing::{get, post};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/health", get(health::health))
        .route(
            "/api/cron/generate-daily",
            get(generate::cron_generate_daily).post(generate::cron_generate_daily),
        )
        .route("/api/shorts/generate", post(generate::generate_manual))
        .route("/api/shorts/webhook", post(generate::webhook))
        .route("/api/shorts/logs", get(logs::list_logs))
        .route("/api/shorts", get(shorts::list_shorts))
        .route(
            "/api/shorts/{id}",
            get(shorts::get_short).patch(shorts::update_status),
        )
}
