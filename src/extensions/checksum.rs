//! `checksum` and `checksum-trailer`: PATCH bodies verified against `Upload-Checksum`.
//!
//! Digests are computed while the body streams (see the dispatcher). A
//! mismatch fails the request with 460 and the dispatcher discards the bytes
//! the request appended.

use crate::{
    errors::{TusError, TusResult},
    models::checksum::ChecksumAlgorithm,
    protocol::{
        Extension, RequestHandler, RequestValidator,
        headers::{TUS_CHECKSUM_ALGORITHM, TUS_EXTENSION, UPLOAD_CHECKSUM},
        method::HttpMethod,
        request::TusRequest,
        response::TusResponse,
    },
    services::upload_storage::UploadStorage,
};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use tracing::{debug, warn};

pub const NAME: &str = "checksum";

pub fn extension() -> Extension {
    Extension::new(NAME, &[HttpMethod::Patch])
        .tracking_checksums()
        .with_validator(ChecksumAlgorithmValidator)
        .with_handler(ChecksumOptionsRequestHandler)
        .with_handler(ChecksumPatchRequestHandler)
}

/// Split `<algorithm> <digest>` and resolve the algorithm.
fn parse_upload_checksum(value: &str) -> TusResult<(ChecksumAlgorithm, &str)> {
    let (name, digest) = value.split_once(' ').unwrap_or((value, ""));
    let algorithm = ChecksumAlgorithm::for_wire_name(name)
        .ok_or_else(|| TusError::ChecksumAlgorithmNotSupported(name.to_string()))?;
    Ok((algorithm, digest.trim()))
}

/// A client digest matches when it is the base64 (tus) or hex encoding of ours.
fn digest_matches(expected: &str, calculated: &[u8]) -> bool {
    expected == general_purpose::STANDARD.encode(calculated)
        || expected.eq_ignore_ascii_case(&hex::encode(calculated))
}

pub struct ChecksumAlgorithmValidator;

#[async_trait]
impl RequestValidator for ChecksumAlgorithmValidator {
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
        match request.header(&UPLOAD_CHECKSUM) {
            Some(value) => parse_upload_checksum(value).map(|_| ()),
            None => Ok(()),
        }
    }
}

pub struct ChecksumOptionsRequestHandler;

#[async_trait]
impl RequestHandler for ChecksumOptionsRequestHandler {
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
        response.append_to_list_header(TUS_EXTENSION, "checksum");
        response.append_to_list_header(TUS_EXTENSION, "checksum-trailer");
        response.set_header(TUS_CHECKSUM_ALGORITHM, ChecksumAlgorithm::advertised_list());
        Ok(())
    }
}

/// Runs after the core PATCH handler, once the body (and any trailer) is read.
pub struct ChecksumPatchRequestHandler;

#[async_trait]
impl RequestHandler for ChecksumPatchRequestHandler {
    fn supports(&self, method: HttpMethod) -> bool {
        method == HttpMethod::Patch
    }

    async fn process(
        &self,
        _method: HttpMethod,
        request: &mut TusRequest,
        _response: &mut TusResponse,
        _storage: &dyn UploadStorage,
        _owner_key: Option<&str>,
    ) -> TusResult<()> {
        let Some(value) = request.upload_checksum() else {
            return Ok(());
        };
        // Trailers never passed the validator.
        let (algorithm, expected) = parse_upload_checksum(&value)?;

        let calculated = request
            .body()
            .calculated_checksum(algorithm)
            .ok_or_else(|| TusError::ChecksumAlgorithmNotSupported(algorithm.wire_name().to_string()))?;

        if digest_matches(expected, &calculated) {
            debug!(algorithm = algorithm.wire_name(), "upload checksum verified");
            return Ok(());
        }

        let calculated = general_purpose::STANDARD.encode(&calculated);
        warn!(
            algorithm = algorithm.wire_name(),
            expected,
            calculated = %calculated,
            "upload checksum mismatch"
        );
        Err(TusError::UploadChecksumMismatch {
            expected: expected.to_string(),
            calculated,
        })
    }
}
