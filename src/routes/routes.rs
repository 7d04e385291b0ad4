//! Routes of the tus server.
//!
//! - `GET /healthz`, `GET /readyz`: probes
//! - `ANY {context_path}`: creation (POST) and discovery (OPTIONS)
//! - `ANY {context_path}/{id}`: HEAD, PATCH, DELETE, GET on one upload
//!
//! Every method reaches the dispatcher so unsupported ones get a tus 405.

use crate::handlers::{
    health_handlers::{healthz, readyz},
    tus_handlers::{AppState, tus_endpoint},
};
use axum::{
    Router,
    routing::{any, get},
};

/// Build the router for a normalized context path such as `/files`.
pub fn routes(context_path: &str) -> Router<AppState> {
    let base = context_path.trim_end_matches('/');
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route(base, any(tus_endpoint))
        .route(&format!("{}/{{id}}", base), any(tus_endpoint))
}
