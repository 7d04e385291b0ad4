use crate::{
    models::upload::UploadId,
    protocol::headers::{TUS_RESUMABLE, TUS_VERSION, TUS_PROTOCOL_VERSION},
    services::storage_service::StorageError,
};
use axum::{
    Json,
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Status used by the checksum extension for a digest mismatch.
pub const CHECKSUM_MISMATCH_STATUS: u16 = 460;

/// Every way a tus request can fail.
///
/// Validators and handlers return the most specific variant; only the
/// dispatcher turns it into a status code and a response.
#[derive(Debug, Error)]
pub enum TusError {
    #[error("HTTP method `{0}` is not supported")]
    UnsupportedMethod(String),
    #[error("unsupported Tus-Resumable version `{0}`")]
    InvalidProtocolVersion(String),
    #[error("PATCH requests must use Content-Type application/offset+octet-stream")]
    InvalidContentType,
    #[error("invalid Upload-Offset header: {0}")]
    InvalidUploadOffset(String),
    #[error("upload offset mismatch: expected {expected}, got {actual}")]
    UploadOffsetMismatch { expected: u64, actual: u64 },
    #[error("invalid upload length: {0}")]
    InvalidUploadLength(String),
    #[error("upload length {length} exceeds the maximum of {max} bytes")]
    MaxUploadLengthExceeded { length: u64, max: u64 },
    #[error("invalid Content-Length: {0}")]
    InvalidContentLength(String),
    #[error("POST is only allowed on the upload creation URL")]
    PostNotAllowed,
    #[error("upload `{0}` not found")]
    UploadNotFound(String),
    #[error("upload `{0}` is still in progress")]
    UploadInProgress(UploadId),
    #[error("checksum algorithm `{0}` is not supported")]
    ChecksumAlgorithmNotSupported(String),
    #[error("upload checksum mismatch: expected `{expected}`, calculated `{calculated}`")]
    UploadChecksumMismatch { expected: String, calculated: String },
    #[error("Upload-Length is not allowed on a final concatenation request")]
    UploadLengthNotAllowedOnConcatenation,
    #[error("invalid partial upload id `{0}`")]
    InvalidPartialUploadId(String),
    #[error("PATCH is not allowed on final upload `{0}`")]
    PatchOnFinalUploadNotAllowed(UploadId),
    #[error(transparent)]
    Storage(StorageError),
}

pub type TusResult<T> = Result<T, TusError>;

impl TusError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::UnsupportedMethod(_) | Self::PostNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::InvalidProtocolVersion(_) => StatusCode::PRECONDITION_FAILED,
            Self::InvalidContentType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::InvalidUploadOffset(_)
            | Self::InvalidUploadLength(_)
            | Self::InvalidContentLength(_)
            | Self::ChecksumAlgorithmNotSupported(_)
            | Self::UploadLengthNotAllowedOnConcatenation
            | Self::InvalidPartialUploadId(_) => StatusCode::BAD_REQUEST,
            Self::UploadOffsetMismatch { .. } => StatusCode::CONFLICT,
            Self::MaxUploadLengthExceeded { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::UploadNotFound(_) => StatusCode::NOT_FOUND,
            Self::UploadInProgress(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::UploadChecksumMismatch { .. } => StatusCode::from_u16(CHECKSUM_MISMATCH_STATUS)
                .unwrap_or(StatusCode::BAD_REQUEST),
            Self::PatchOnFinalUploadNotAllowed(_) => StatusCode::FORBIDDEN,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the bytes appended by the failing request must be discarded.
    pub fn rolls_back_request_bytes(&self) -> bool {
        matches!(self, Self::UploadChecksumMismatch { .. })
    }

    fn is_internal(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

impl From<StorageError> for TusError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::UploadNotFound(id) => TusError::UploadNotFound(id.to_string()),
            StorageError::OffsetMismatch { expected, actual } => {
                TusError::UploadOffsetMismatch { expected, actual }
            }
            StorageError::NotAppendable(id) => TusError::PatchOnFinalUploadNotAllowed(id),
            other => TusError::Storage(other),
        }
    }
}

impl IntoResponse for TusError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if self.is_internal() {
            tracing::error!(error = %self, "request failed with an internal error");
            "internal server error".to_string()
        } else {
            self.to_string()
        };

        let body = Json(json!({
            "error": message,
            "status": status.as_u16()
        }));

        let mut response = (status, body).into_response();
        let headers = response.headers_mut();
        headers.insert(TUS_RESUMABLE, HeaderValue::from_static(TUS_PROTOCOL_VERSION));
        if matches!(self, Self::InvalidProtocolVersion(_)) {
            headers.insert(TUS_VERSION, HeaderValue::from_static(TUS_PROTOCOL_VERSION));
        }
        response
    }
}
