use axum::{routing::get, Router};

pub mod batches;
pub mod billings;
pub mod directory;
pub mod invoices;
pub mod payments;
pub mod system;

/// Router for all authenticated endpoints, mounted under `/v1`.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .route("/stream", get(system::stream))
        .merge(directory::router())
        .merge(billings::router())
        .merge(invoices::router())
        .merge(batches::router())
        .merge(payments::router())
}
