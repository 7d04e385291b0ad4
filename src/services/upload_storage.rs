//! The contract every upload backend fulfils.
//!
//! Byte and metadata persistence are backend specific; URI resolution,
//! owner scoping and the virtual concatenation of partial uploads are
//! expressed once here on top of the primitive operations.

use super::storage_service::{StorageError, StorageResult};
use crate::{
    models::upload::{UploadId, UploadInfo, UploadType},
    protocol::request::RequestBody,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt, stream};
use std::{io, pin::Pin};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

/// Stream of stored upload bytes.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

#[async_trait]
pub trait UploadStorage: Send + Sync {
    /// Path uploads are created under, e.g. `/files`.
    fn upload_uri(&self) -> &str;

    /// Largest `Upload-Length` accepted, if limited.
    fn max_upload_size(&self) -> Option<u64>;

    async fn get_upload_info(&self, id: UploadId) -> StorageResult<Option<UploadInfo>>;

    /// Persist a new upload. The returned record carries an id never used before.
    async fn create(&self, info: UploadInfo) -> StorageResult<UploadInfo>;

    /// Store the mutable fields (length, offset, type, parts, metadata) of `info`.
    async fn update(&self, info: &UploadInfo) -> StorageResult<()>;

    /// Append `body` at `expected_offset`, which must equal the stored offset.
    ///
    /// Bytes are written as they arrive. Bytes written before a body error stay
    /// committed. Returns the record with its advanced offset.
    async fn append(
        &self,
        id: UploadId,
        expected_offset: u64,
        body: &mut RequestBody,
    ) -> StorageResult<UploadInfo>;

    /// Discard the last `count` bytes of an upload and move its offset back.
    async fn remove_last_bytes(&self, id: UploadId, count: u64) -> StorageResult<()>;

    /// Drop metadata and bytes. Later lookups report the upload as absent.
    async fn terminate_upload(&self, info: &UploadInfo) -> StorageResult<()>;

    /// Committed bytes of a regular or partial upload.
    async fn read_bytes(&self, info: &UploadInfo) -> StorageResult<ByteStream>;

    /// Extract the upload id addressed by a request path below [`Self::upload_uri`].
    fn upload_id_from_uri(&self, uri: &str) -> Option<UploadId> {
        let base = self.upload_uri().trim_end_matches('/');
        let rest = uri.strip_prefix(base)?.trim_matches('/');
        if rest.is_empty() || rest.contains('/') {
            return None;
        }
        rest.parse().ok()
    }

    /// Public location of an upload.
    fn upload_location(&self, id: UploadId) -> String {
        format!("{}/{}", self.upload_uri().trim_end_matches('/'), id)
    }

    /// Resolve a request path and apply owner scoping: an upload created
    /// under one owner key is invisible to every other key.
    async fn get_upload_info_by_uri(
        &self,
        uri: &str,
        owner_key: Option<&str>,
    ) -> StorageResult<Option<UploadInfo>> {
        let Some(id) = self.upload_id_from_uri(uri) else {
            return Ok(None);
        };
        Ok(self
            .get_upload_info(id)
            .await?
            .filter(|info| info.owner_key.as_deref() == owner_key))
    }

    /// Recompute length and offset of a concatenated upload from its parts.
    ///
    /// While any part is still in progress the final upload has no length and
    /// stays in progress. A part that no longer exists is reported as not found.
    async fn finalize_concatenation(&self, info: &mut UploadInfo) -> StorageResult<()> {
        if info.upload_type != UploadType::Concatenated || !info.is_upload_in_progress() {
            return Ok(());
        }

        let mut total: Option<u64> = Some(0);
        for part_id in &info.concatenation_parts {
            let part = self
                .get_upload_info(*part_id)
                .await?
                .ok_or(StorageError::UploadNotFound(*part_id))?;
            total = match (total, part.length) {
                (Some(sum), Some(length)) if !part.is_upload_in_progress() => Some(sum + length),
                _ => None,
            };
        }

        match total {
            Some(length) => {
                info.length = Some(length);
                info.offset = length;
                self.update(info).await?;
                info!(upload_id = %info.id, length, "concatenated upload complete");
            }
            None => debug!(upload_id = %info.id, "concatenated upload still waiting on parts"),
        }
        Ok(())
    }

    /// Ordered byte stream over the parts of a concatenated upload.
    async fn concatenate(&self, info: &UploadInfo) -> StorageResult<ByteStream> {
        let mut streams = Vec::with_capacity(info.concatenation_parts.len());
        for part_id in &info.concatenation_parts {
            let part = self
                .get_upload_info(*part_id)
                .await?
                .ok_or(StorageError::UploadNotFound(*part_id))?;
            streams.push(self.read_bytes(&part).await?);
        }
        Ok(Box::pin(stream::iter(streams).flatten()))
    }

    /// Committed bytes of any upload kind.
    async fn upload_stream(&self, info: &UploadInfo) -> StorageResult<ByteStream> {
        match info.upload_type {
            UploadType::Concatenated => self.concatenate(info).await,
            UploadType::Regular | UploadType::Partial => self.read_bytes(info).await,
        }
    }

    /// Copy the committed bytes of `info` into `sink`, returning the count.
    async fn copy_upload_to(
        &self,
        info: &UploadInfo,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> StorageResult<u64> {
        let mut stream = self.upload_stream(info).await?;
        let mut copied = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            sink.write_all(&chunk).await?;
            copied += chunk.len() as u64;
        }
        sink.flush().await?;
        Ok(copied)
    }
}
