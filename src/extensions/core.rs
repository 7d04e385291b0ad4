//! The core protocol: OPTIONS discovery, HEAD offset queries and PATCH appends.

use super::{find_upload, parse_upload_length};
use crate::{
    errors::{TusError, TusResult},
    models::upload::UploadType,
    protocol::{
        Extension, RequestHandler, RequestValidator,
        headers::{
            OFFSET_OCTET_STREAM, TUS_MAX_SIZE, TUS_PROTOCOL_VERSION, TUS_RESUMABLE, TUS_VERSION,
            UPLOAD_DEFER_LENGTH, UPLOAD_LENGTH, UPLOAD_METADATA, UPLOAD_OFFSET,
        },
        method::HttpMethod,
        request::TusRequest,
        response::TusResponse,
    },
    services::upload_storage::UploadStorage,
};
use async_trait::async_trait;
use axum::http::{
    StatusCode,
    header::{CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE},
};
use tracing::info;

pub const NAME: &str = "core";

pub fn extension() -> Extension {
    Extension::new(NAME, &[HttpMethod::Options, HttpMethod::Head, HttpMethod::Patch])
        .with_validator(HttpMethodValidator)
        .with_validator(ProtocolVersionValidator)
        .with_validator(IdExistsValidator)
        .with_validator(ContentTypeValidator)
        .with_validator(UploadOffsetValidator)
        .with_validator(ContentLengthValidator)
        .with_handler(DefaultResponseHeadersHandler)
        .with_handler(CoreOptionsRequestHandler)
        .with_handler(CoreHeadRequestHandler)
        .with_handler(CorePatchRequestHandler)
}

/// The client's `Upload-Offset`, parsed.
fn client_offset(request: &TusRequest) -> TusResult<u64> {
    let raw = request
        .header(&UPLOAD_OFFSET)
        .ok_or_else(|| TusError::InvalidUploadOffset("header is missing".into()))?;
    raw.parse()
        .map_err(|_| TusError::InvalidUploadOffset(format!("`{}` is not a non-negative integer", raw)))
}

/// Rejects methods outside the union of the enabled extensions.
pub struct HttpMethodValidator;

#[async_trait]
impl RequestValidator for HttpMethodValidator {
    fn supports(&self, _method: Option<HttpMethod>) -> bool {
        true
    }

    async fn validate(
        &self,
        method: Option<HttpMethod>,
        request: &TusRequest,
        _storage: &dyn UploadStorage,
        _owner_key: Option<&str>,
    ) -> TusResult<()> {
        match method {
            Some(_) => Ok(()),
            None => Err(TusError::UnsupportedMethod(request.raw_method().to_string())),
        }
    }
}

/// `Tus-Resumable` must name the version this server implements. OPTIONS is exempt.
pub struct ProtocolVersionValidator;

#[async_trait]
impl RequestValidator for ProtocolVersionValidator {
    fn supports(&self, method: Option<HttpMethod>) -> bool {
        method.is_some_and(|method| method != HttpMethod::Options)
    }

    async fn validate(
        &self,
        _method: Option<HttpMethod>,
        request: &TusRequest,
        _storage: &dyn UploadStorage,
        _owner_key: Option<&str>,
    ) -> TusResult<()> {
        match request.header(&TUS_RESUMABLE) {
            Some(TUS_PROTOCOL_VERSION) => Ok(()),
            other => Err(TusError::InvalidProtocolVersion(other.unwrap_or_default().to_string())),
        }
    }
}

pub struct IdExistsValidator;

#[async_trait]
impl RequestValidator for IdExistsValidator {
    fn supports(&self, method: Option<HttpMethod>) -> bool {
        matches!(method, Some(HttpMethod::Head | HttpMethod::Patch))
    }

    async fn validate(
        &self,
        _method: Option<HttpMethod>,
        request: &TusRequest,
        storage: &dyn UploadStorage,
        owner_key: Option<&str>,
    ) -> TusResult<()> {
        find_upload(request, storage, owner_key).await.map(|_| ())
    }
}

pub struct ContentTypeValidator;

#[async_trait]
impl RequestValidator for ContentTypeValidator {
    fn supports(&self, method: Option<HttpMethod>) -> bool {
        method == Some(HttpMethod::Patch)
    }

    async fn validate(
        &self,
        _method: Option<HttpMethod>,
        request: &TusRequest,
        _storage: &dyn UploadStorage,
        _owner_key: Option<&str>,
    ) -> TusResult<()> {
        let media_type = request
            .header(&CONTENT_TYPE)
            .map(|value| value.split(';').next().unwrap_or_default().trim());
        match media_type {
            Some(media_type) if media_type.eq_ignore_ascii_case(OFFSET_OCTET_STREAM) => Ok(()),
            _ => Err(TusError::InvalidContentType),
        }
    }
}

/// PATCH must continue exactly where the stored upload ends.
pub struct UploadOffsetValidator;

#[async_trait]
impl RequestValidator for UploadOffsetValidator {
    fn supports(&self, method: Option<HttpMethod>) -> bool {
        method == Some(HttpMethod::Patch)
    }

    async fn validate(
        &self,
        _method: Option<HttpMethod>,
        request: &TusRequest,
        storage: &dyn UploadStorage,
        owner_key: Option<&str>,
    ) -> TusResult<()> {
        let info = find_upload(request, storage, owner_key).await?;
        if info.upload_type == UploadType::Concatenated {
            return Ok(());
        }

        let offset = client_offset(request)?;
        if offset != info.offset {
            return Err(TusError::UploadOffsetMismatch {
                expected: info.offset,
                actual: offset,
            });
        }
        Ok(())
    }
}

/// A declared `Content-Length` may not carry the upload past its length, or
/// past `Tus-Max-Size` while the length is deferred.
pub struct ContentLengthValidator;

#[async_trait]
impl RequestValidator for ContentLengthValidator {
    fn supports(&self, method: Option<HttpMethod>) -> bool {
        method == Some(HttpMethod::Patch)
    }

    async fn validate(
        &self,
        _method: Option<HttpMethod>,
        request: &TusRequest,
        storage: &dyn UploadStorage,
        owner_key: Option<&str>,
    ) -> TusResult<()> {
        let Some(raw) = request.header(&CONTENT_LENGTH) else {
            return Ok(());
        };
        let content_length = raw
            .parse::<u64>()
            .map_err(|_| TusError::InvalidContentLength(format!("`{}` is not a number", raw)))?;

        let info = find_upload(request, storage, owner_key).await?;
        if info.upload_type == UploadType::Concatenated {
            return Ok(());
        }

        let length = match info.length {
            Some(length) => Some(length),
            None => request
                .header(&UPLOAD_LENGTH)
                .and_then(|value| value.parse::<u64>().ok()),
        };
        let end = info.offset.saturating_add(content_length);
        match (length, storage.max_upload_size()) {
            (Some(length), _) if end > length => Err(TusError::InvalidContentLength(format!(
                "{} bytes at offset {} exceed the upload length {}",
                content_length, info.offset, length
            ))),
            (None, Some(max)) if end > max => {
                Err(TusError::MaxUploadLengthExceeded { length: end, max })
            }
            _ => Ok(()),
        }
    }
}

/// Adds `Tus-Resumable` to every successful response.
pub struct DefaultResponseHeadersHandler;

#[async_trait]
impl RequestHandler for DefaultResponseHeadersHandler {
    fn supports(&self, _method: HttpMethod) -> bool {
        true
    }

    async fn process(
        &self,
        _method: HttpMethod,
        _request: &mut TusRequest,
        response: &mut TusResponse,
        _storage: &dyn UploadStorage,
        _owner_key: Option<&str>,
    ) -> TusResult<()> {
        response.set_header(TUS_RESUMABLE, TUS_PROTOCOL_VERSION);
        Ok(())
    }
}

pub struct CoreOptionsRequestHandler;

#[async_trait]
impl RequestHandler for CoreOptionsRequestHandler {
    fn supports(&self, method: HttpMethod) -> bool {
        method == HttpMethod::Options
    }

    async fn process(
        &self,
        _method: HttpMethod,
        _request: &mut TusRequest,
        response: &mut TusResponse,
        storage: &dyn UploadStorage,
        _owner_key: Option<&str>,
    ) -> TusResult<()> {
        response.set_header(TUS_VERSION, TUS_PROTOCOL_VERSION);
        if let Some(max) = storage.max_upload_size() {
            response.set_header(TUS_MAX_SIZE, max.to_string());
        }
        response.set_status(StatusCode::NO_CONTENT);
        Ok(())
    }
}

pub struct CoreHeadRequestHandler;

#[async_trait]
impl RequestHandler for CoreHeadRequestHandler {
    fn supports(&self, method: HttpMethod) -> bool {
        method == HttpMethod::Head
    }

    async fn process(
        &self,
        _method: HttpMethod,
        request: &mut TusRequest,
        response: &mut TusResponse,
        storage: &dyn UploadStorage,
        owner_key: Option<&str>,
    ) -> TusResult<()> {
        let info = find_upload(request, storage, owner_key).await?;

        response.set_header(UPLOAD_OFFSET, info.offset.to_string());
        match info.length {
            Some(length) => response.set_header(UPLOAD_LENGTH, length.to_string()),
            None if info.upload_type != UploadType::Concatenated => {
                response.set_header(UPLOAD_DEFER_LENGTH, "1")
            }
            None => {}
        }
        if !info.metadata.is_empty() {
            response.set_header(UPLOAD_METADATA, info.metadata.encode());
        }
        response.set_header(CACHE_CONTROL, "no-store");
        response.set_status(StatusCode::OK);
        Ok(())
    }
}

/// Streams the body onto the upload and reports the new offset.
pub struct CorePatchRequestHandler;

#[async_trait]
impl RequestHandler for CorePatchRequestHandler {
    fn supports(&self, method: HttpMethod) -> bool {
        method == HttpMethod::Patch
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

        if let Some(raw) = request.header(&UPLOAD_LENGTH) {
            let length = parse_upload_length(raw, storage)?;
            match info.length {
                None => {
                    if length < info.offset {
                        return Err(TusError::InvalidUploadLength(format!(
                            "{} is below the current offset {}",
                            length, info.offset
                        )));
                    }
                    info.length = Some(length);
                    storage.update(&info).await?;
                    info!(upload_id = %info.id, length, "deferred upload length set");
                }
                Some(current) if current != length => {
                    return Err(TusError::InvalidUploadLength(format!(
                        "length is already {} and cannot change to {}",
                        current, length
                    )));
                }
                Some(_) => {}
            }
        }

        let offset = client_offset(request)?;
        let updated = storage.append(info.id, offset, request.body_mut()).await?;
        request.record_appended(updated.offset - offset);

        if !updated.is_upload_in_progress() {
            info!(upload_id = %updated.id, length = ?updated.length, "upload complete");
        }
        response.set_header(UPLOAD_OFFSET, updated.offset.to_string());
        response.set_status(StatusCode::NO_CONTENT);
        Ok(())
    }
}
