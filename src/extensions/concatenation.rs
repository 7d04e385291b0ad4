//! `concatenation` and `concatenation-unfinished`: partial uploads stitched
//! into a virtual final upload.
//!
//! A final upload may be created before its parts complete; its length and
//! offset are derived from the parts whenever it is looked at.

use super::find_upload;
use crate::{
    errors::{TusError, TusResult},
    models::upload::{UploadConcat, UploadId, UploadType},
    protocol::{
        Extension, RequestHandler, RequestValidator,
        headers::{
            TUS_EXTENSION, UPLOAD_CONCAT, UPLOAD_DEFER_LENGTH, UPLOAD_LENGTH, UPLOAD_OFFSET,
        },
        method::HttpMethod,
        request::TusRequest,
        response::TusResponse,
    },
    services::upload_storage::UploadStorage,
};
use async_trait::async_trait;
use axum::http::header::LOCATION;
use tracing::info;

pub const NAME: &str = "concatenation";

pub fn extension() -> Extension {
    Extension::new(NAME, &[HttpMethod::Post, HttpMethod::Head])
        .with_validator(PatchFinalUploadValidator)
        .with_validator(NoUploadLengthOnFinalValidator)
        .with_validator(PartialUploadsExistValidator)
        .with_handler(ConcatenationOptionsRequestHandler)
        .with_handler(ConcatenationPostRequestHandler)
        .with_handler(ConcatenationHeadRequestHandler)
}

fn upload_concat(request: &TusRequest) -> Option<UploadConcat> {
    request.header(&UPLOAD_CONCAT).and_then(UploadConcat::parse)
}

/// Final uploads are virtual; nothing may be appended to them.
pub struct PatchFinalUploadValidator;

#[async_trait]
impl RequestValidator for PatchFinalUploadValidator {
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
        match storage.get_upload_info_by_uri(request.path(), owner_key).await? {
            Some(info) if info.upload_type == UploadType::Concatenated => {
                Err(TusError::PatchOnFinalUploadNotAllowed(info.id))
            }
            _ => Ok(()),
        }
    }
}

pub struct NoUploadLengthOnFinalValidator;

#[async_trait]
impl RequestValidator for NoUploadLengthOnFinalValidator {
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
        let is_final = upload_concat(request).is_some_and(|concat| concat.is_final());
        if is_final && request.header(&UPLOAD_LENGTH).is_some() {
            return Err(TusError::UploadLengthNotAllowedOnConcatenation);
        }
        Ok(())
    }
}

/// Every part named by a final `Upload-Concat` must resolve to an existing
/// upload visible to the same owner.
pub struct PartialUploadsExistValidator;

#[async_trait]
impl RequestValidator for PartialUploadsExistValidator {
    fn supports(&self, method: Option<HttpMethod>) -> bool {
        method == Some(HttpMethod::Post)
    }

    async fn validate(
        &self,
        _method: Option<HttpMethod>,
        request: &TusRequest,
        storage: &dyn UploadStorage,
        owner_key: Option<&str>,
    ) -> TusResult<()> {
        let Some(UploadConcat::Final(references)) = upload_concat(request) else {
            return Ok(());
        };
        if references.is_empty() {
            return Err(TusError::InvalidPartialUploadId(
                "final concatenation names no partial uploads".into(),
            ));
        }

        for reference in &references {
            let id = UploadId::from_reference(reference)
                .ok_or_else(|| TusError::InvalidPartialUploadId(reference.clone()))?;
            let visible = storage
                .get_upload_info(id)
                .await?
                .is_some_and(|part| part.owner_key.as_deref() == owner_key);
            if !visible {
                return Err(TusError::InvalidPartialUploadId(reference.clone()));
            }
        }
        Ok(())
    }
}

pub struct ConcatenationOptionsRequestHandler;

#[async_trait]
impl RequestHandler for ConcatenationOptionsRequestHandler {
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
        response.append_to_list_header(TUS_EXTENSION, "concatenation");
        response.append_to_list_header(TUS_EXTENSION, "concatenation-unfinished");
        Ok(())
    }
}

/// Marks the upload just created by the creation handler as partial or final.
pub struct ConcatenationPostRequestHandler;

#[async_trait]
impl RequestHandler for ConcatenationPostRequestHandler {
    fn supports(&self, method: HttpMethod) -> bool {
        method == HttpMethod::Post
    }

    async fn process(
        &self,
        _method: HttpMethod,
        request: &mut TusRequest,
        response: &mut TusResponse,
        storage: &dyn UploadStorage,
        _owner_key: Option<&str>,
    ) -> TusResult<()> {
        let Some(concat) = upload_concat(request) else {
            return Ok(());
        };
        let Some(id) = response.header(&LOCATION).and_then(UploadId::from_reference) else {
            return Ok(());
        };
        let mut info = storage
            .get_upload_info(id)
            .await?
            .ok_or_else(|| TusError::UploadNotFound(id.to_string()))?;

        match concat {
            UploadConcat::Partial => {
                info.upload_type = UploadType::Partial;
                storage.update(&info).await?;
            }
            UploadConcat::Final(references) => {
                info.upload_type = UploadType::Concatenated;
                info.length = None;
                info.concatenation_parts = references
                    .iter()
                    .filter_map(|reference| UploadId::from_reference(reference))
                    .collect();
                storage.update(&info).await?;
                info!(
                    upload_id = %info.id,
                    parts = info.concatenation_parts.len(),
                    "created final upload"
                );
                storage.finalize_concatenation(&mut info).await?;
            }
        }
        Ok(())
    }
}

/// Reports `Upload-Concat` and the derived state of final uploads.
pub struct ConcatenationHeadRequestHandler;

#[async_trait]
impl RequestHandler for ConcatenationHeadRequestHandler {
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
        let mut info = find_upload(request, storage, owner_key).await?;
        match info.upload_type {
            UploadType::Regular => {}
            UploadType::Partial => response.set_header(UPLOAD_CONCAT, "partial"),
            UploadType::Concatenated => {
                storage.finalize_concatenation(&mut info).await?;

                let locations = info
                    .concatenation_parts
                    .iter()
                    .map(|part| storage.upload_location(*part))
                    .collect::<Vec<_>>()
                    .join(" ");
                response.set_header(UPLOAD_CONCAT, format!("final;{}", locations));

                response.remove_header(&UPLOAD_DEFER_LENGTH);
                match info.length {
                    Some(length) if !info.is_upload_in_progress() => {
                        response.set_header(UPLOAD_LENGTH, length.to_string());
                        response.set_header(UPLOAD_OFFSET, info.offset.to_string());
                    }
                    _ => {
                        response.remove_header(&UPLOAD_LENGTH);
                        response.remove_header(&UPLOAD_OFFSET);
                    }
                }
            }
        }
        Ok(())
    }
}
