//! `creation` and `creation-defer-length`: POST on the upload URI makes a new upload.

use super::parse_upload_length;
use crate::{
    errors::{TusError, TusResult},
    models::upload::{UploadConcat, UploadInfo, UploadMetadata},
    protocol::{
        Extension, RequestHandler, RequestValidator,
        headers::{TUS_EXTENSION, UPLOAD_CONCAT, UPLOAD_DEFER_LENGTH, UPLOAD_LENGTH, UPLOAD_METADATA},
        method::HttpMethod,
        request::TusRequest,
        response::TusResponse,
    },
    services::upload_storage::UploadStorage,
};
use async_trait::async_trait;
use axum::http::{StatusCode, header::LOCATION};

pub const NAME: &str = "creation";

pub fn extension() -> Extension {
    Extension::new(NAME, &[HttpMethod::Post])
        .with_validator(PostUriValidator)
        .with_validator(UploadDeferLengthValidator)
        .with_validator(UploadLengthValidator)
        .with_handler(CreationOptionsRequestHandler)
        .with_handler(CreationPostRequestHandler)
}

fn is_final_concatenation(request: &TusRequest) -> bool {
    request
        .header(&UPLOAD_CONCAT)
        .and_then(UploadConcat::parse)
        .is_some_and(|concat| concat.is_final())
}

/// POST is only accepted on the upload URI itself.
pub struct PostUriValidator;

#[async_trait]
impl RequestValidator for PostUriValidator {
    fn supports(&self, method: Option<HttpMethod>) -> bool {
        method == Some(HttpMethod::Post)
    }

    async fn validate(
        &self,
        _method: Option<HttpMethod>,
        request: &TusRequest,
        storage: &dyn UploadStorage,
        _owner_key: Option<&str>,
    ) -> TusResult<()> {
        let path = request.path().trim_end_matches('/');
        if path == storage.upload_uri().trim_end_matches('/') {
            Ok(())
        } else {
            Err(TusError::PostNotAllowed)
        }
    }
}

pub struct UploadDeferLengthValidator;

#[async_trait]
impl RequestValidator for UploadDeferLengthValidator {
    fn supports(&self, method: Option<HttpMethod>) -> bool {
        method == Some(HttpMethod::Post)
    }

    async fn validate(
        &self,
        _method: Option<HttpMethod>,
        request: &TusRequest,
        _storage: &dyn UploadStorage,
        _owner_key: Option<&str>,
    ) -> TusResult<()> {
        match request.header(&UPLOAD_DEFER_LENGTH) {
            None => Ok(()),
            Some("1") if request.header(&UPLOAD_LENGTH).is_some() => Err(
                TusError::InvalidUploadLength("Upload-Length and Upload-Defer-Length are exclusive".into()),
            ),
            Some("1") => Ok(()),
            Some(other) => Err(TusError::InvalidUploadLength(format!(
                "Upload-Defer-Length must be 1, got `{}`",
                other
            ))),
        }
    }
}

/// A new upload states its length, defers it, or is a final concatenation.
pub struct UploadLengthValidator;

#[async_trait]
impl RequestValidator for UploadLengthValidator {
    fn supports(&self, method: Option<HttpMethod>) -> bool {
        method == Some(HttpMethod::Post)
    }

    async fn validate(
        &self,
        _method: Option<HttpMethod>,
        request: &TusRequest,
        storage: &dyn UploadStorage,
        _owner_key: Option<&str>,
    ) -> TusResult<()> {
        if is_final_concatenation(request) {
            return Ok(());
        }
        match request.header(&UPLOAD_LENGTH) {
            Some(raw) => parse_upload_length(raw, storage).map(|_| ()),
            None if request.header(&UPLOAD_DEFER_LENGTH).is_some() => Ok(()),
            None => Err(TusError::InvalidUploadLength(
                "either Upload-Length or Upload-Defer-Length is required".into(),
            )),
        }
    }
}

pub struct CreationOptionsRequestHandler;

#[async_trait]
impl RequestHandler for CreationOptionsRequestHandler {
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
        response.append_to_list_header(TUS_EXTENSION, "creation");
        response.append_to_list_header(TUS_EXTENSION, "creation-defer-length");
        Ok(())
    }
}

pub struct CreationPostRequestHandler;

#[async_trait]
impl RequestHandler for CreationPostRequestHandler {
    fn supports(&self, method: HttpMethod) -> bool {
        method == HttpMethod::Post
    }

    async fn process(
        &self,
        _method: HttpMethod,
        request: &mut TusRequest,
        response: &mut TusResponse,
        storage: &dyn UploadStorage,
        owner_key: Option<&str>,
    ) -> TusResult<()> {
        let length = match request.header(&UPLOAD_LENGTH) {
            Some(raw) if !is_final_concatenation(request) => Some(parse_upload_length(raw, storage)?),
            _ => None,
        };
        let metadata = request
            .header(&UPLOAD_METADATA)
            .map(UploadMetadata::parse)
            .unwrap_or_default();

        let info = storage
            .create(UploadInfo::new(length, metadata, owner_key.map(str::to_string)))
            .await?;

        response.set_header(LOCATION, storage.upload_location(info.id));
        response.set_status(StatusCode::CREATED);
        Ok(())
    }
}
