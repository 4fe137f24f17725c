use axum::routing::get;
use axum::Router;

use crate::state::AppState;

pub mod contracts;
pub mod health;
pub mod invoices;

pub fn v1_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .merge(contracts::router())
        .merge(invoices::router())
}
