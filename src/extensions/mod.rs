//! The tus extensions this server speaks, one module each.
//!
//! Every module exposes `NAME` and `extension()`; the dispatcher decides which
//! ones are enabled and in what order they run.

pub mod checksum;
pub mod concatenation;
pub mod core;
pub mod creation;
pub mod download;
pub mod termination;

use crate::{
    errors::{TusError, TusResult},
    models::upload::UploadInfo,
    protocol::request::TusRequest,
    services::upload_storage::UploadStorage,
};

/// The upload addressed by the request path, respecting owner scoping.
pub(crate) async fn find_upload(
    request: &TusRequest,
    storage: &dyn UploadStorage,
    owner_key: Option<&str>,
) -> TusResult<UploadInfo> {
    storage
        .get_upload_info_by_uri(request.path(), owner_key)
        .await?
        .ok_or_else(|| TusError::UploadNotFound(request.path().to_string()))
}

/// Parse an `Upload-Length` value and hold it against the configured maximum.
pub(crate) fn parse_upload_length(raw: &str, storage: &dyn UploadStorage) -> TusResult<u64> {
    let length = raw
        .parse::<u64>()
        .map_err(|_| TusError::InvalidUploadLength(format!("`{}` is not a non-negative integer", raw)))?;
    if let Some(max) = storage.max_upload_size() {
        if length > max {
            return Err(TusError::MaxUploadLengthExceeded { length, max });
        }
    }
    Ok(length)
}
