pub mod reserves_get;
pub mod withdraw;

use axum::routing::get;
use axum::Router;

use crate::metrics_route::metrics_handler;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/reserves/{reserve_pub}/withdraw", axum::routing::post(withdraw::handle))
        .route("/reserves/{reserve_pub}", get(reserves_get::handle))
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(liveness))
        .with_state(state)
}

async fn liveness() -> &'static str {
    "OK"
}
