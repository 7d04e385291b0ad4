//! `termination`: DELETE discards an upload.

use crate::{
    errors::TusResult,
    protocol::{
        Extension, RequestHandler,
        headers::TUS_EXTENSION,
        method::HttpMethod,
        request::TusRequest,
        response::TusResponse,
    },
    services::upload_storage::UploadStorage,
};
use async_trait::async_trait;
use axum::http::StatusCode;
use tracing::debug;

pub const NAME: &str = "termination";

pub fn extension() -> Extension {
    Extension::new(NAME, &[HttpMethod::Delete])
        .with_handler(TerminationOptionsRequestHandler)
        .with_handler(TerminationDeleteRequestHandler)
}

pub struct TerminationOptionsRequestHandler;

#[async_trait]
impl RequestHandler for TerminationOptionsRequestHandler {
    fn supports(&self, method: HttpMethod) -> bool {
        method == HttpMethod::Options
    }

    async fn process(
        &self,
        _method: HttpMethod,
        _request: &mut TusRequest,
        response: &mut TusResponse,
        _storage: &dyn UploadStorage,
        _owner_key: Option<&str>,
    ) -> TusResult<()> {
        response.append_to_list_header(TUS_EXTENSION, NAME);
        Ok(())
    }
}

/// Idempotent: deleting an unknown or already terminated upload still yields 204.
pub struct TerminationDeleteRequestHandler;

#[async_trait]
impl RequestHandler for TerminationDeleteRequestHandler {
    fn supports(&self, method: HttpMethod) -> bool {
        method == HttpMethod::Delete
    }

    async fn process(
        &self,
        _method: HttpMethod,
        request: &mut TusRequest,
        response: &mut TusResponse,
        storage: &dyn UploadStorage,
        owner_key: Option<&str>,
    ) -> TusResult<()> {
        match storage.get_upload_info_by_uri(request.path(), owner_key).await? {
            Some(info) => storage.terminate_upload(&info).await?,
            None => debug!(path = request.path(), "nothing to terminate"),
        }
        response.set_status(StatusCode::NO_CONTENT);
        Ok(())
    }
}
