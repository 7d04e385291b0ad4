//! The single axum entry point for every tus request.
//!
//! Method routing happens inside the dispatcher, so the router sends all
//! methods on the upload paths here.

use crate::services::{dispatcher::TusDispatcher, storage_service::StorageService};
use axum::{
    extract::{Request, State},
    http::HeaderName,
    response::Response,
};

/// Shared state handed to every route.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: TusDispatcher,
    /// Concrete storage, used by the readiness probe.
    pub storage: StorageService,
    /// Header carrying the caller's owner key; `None` disables scoping.
    pub owner_key_header: Option<HeaderName>,
}

impl AppState {
    fn owner_key(&self, request: &Request) -> Option<String> {
        let name = self.owner_key_header.as_ref()?;
        request
            .headers()
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    }
}

/// `ANY {context_path}` and `ANY {context_path}/{id}`
pub async fn tus_endpoint(State(state): State<AppState>, request: Request) -> Response {
    let owner_key = state.owner_key(&request);
    state
        .dispatcher
        .process(request, owner_key.as_deref())
        .await
}
