//! `download`: GET streams a completed upload back to the client.

use super::find_upload;
use crate::{
    errors::{TusError, TusResult},
    protocol::{
        Extension, RequestHandler,
        headers::{TUS_EXTENSION, UPLOAD_METADATA},
        method::HttpMethod,
        request::TusRequest,
        response::TusResponse,
    },
    services::upload_storage::UploadStorage,
};
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{
        StatusCode,
        header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE},
    },
};
use tracing::debug;

pub const NAME: &str = "download";

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

pub fn extension() -> Extension {
    Extension::new(NAME, &[HttpMethod::Get])
        .with_handler(DownloadOptionsRequestHandler)
        .with_handler(DownloadGetRequestHandler)
}

/// `attachment; filename="..."` with quotes and control characters stripped.
fn content_disposition(file_name: Option<&str>) -> String {
    match file_name {
        Some(name) => {
            let safe: String = name
                .chars()
                .filter(|c| *c != '"' && *c != '\\' && !c.is_control())
                .collect();
            format!("attachment; filename=\"{}\"", safe)
        }
        None => "attachment".to_string(),
    }
}

pub struct DownloadOptionsRequestHandler;

#[async_trait]
impl RequestHandler for DownloadOptionsRequestHandler {
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

pub struct DownloadGetRequestHandler;

#[async_trait]
impl RequestHandler for DownloadGetRequestHandler {
    fn supports(&self, method: HttpMethod) -> bool {
        method == HttpMethod::Get
    }

    async fn process(
        &self,
        _method: HttpMethod,
        request: &mut TusRequest,
        response: &mut TusResponse,
        storage: &dyn UploadStorage,
        owner_key: Option<&str>,
    ) -> TusResult<()> {
        let mut info = find_upload(request, storage, owner_key).await?;
        storage.finalize_concatenation(&mut info).await?;
        if info.is_upload_in_progress() {
            return Err(TusError::UploadInProgress(info.id));
        }

        let stream = storage.upload_stream(&info).await?;
        debug!(upload_id = %info.id, bytes = info.offset, "streaming download");

        response.set_header(CONTENT_LENGTH, info.offset.to_string());
        response.set_header(
            CONTENT_DISPOSITION,
            content_disposition(info.file_name().as_deref()),
        );
        response.set_header(
            CONTENT_TYPE,
            info.file_mime_type()
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
        );
        if !info.metadata.is_empty() {
            response.set_header(UPLOAD_METADATA, info.metadata.encode());
        }
        response.set_body(Body::from_stream(stream));
        response.set_status(StatusCode::OK);
        Ok(())
    }
}
