//! src/services/storage_service.rs
//!
//! StorageService: tus upload storage backed by SQLite for upload records
//! and local disk for upload bytes sharded beneath `base_path/{shard}/{id}`.
//! Locking is not done here; callers serialize same-upload mutations through
//! `UploadLockService`.

use super::upload_storage::{ByteStream, UploadStorage};
use crate::{
    models::upload::{UploadId, UploadInfo, UploadMetadata, UploadType},
    protocol::request::RequestBody,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use std::{
    io::{self, ErrorKind, SeekFrom},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File, OpenOptions},
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
};
use tokio_util::io::ReaderStream;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("upload `{0}` not found")]
    UploadNotFound(UploadId),
    #[error("upload offset mismatch: stored {expected}, requested {actual}")]
    OffsetMismatch { expected: u64, actual: u64 },
    #[error("upload `{0}` is a concatenated upload and cannot be appended to")]
    NotAppendable(UploadId),
    #[error("could not allocate an unused upload id")]
    IdExhausted,
    #[error("invalid upload record: {0}")]
    InvalidRecord(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Row layout of the `uploads` table.
#[derive(FromRow, Debug)]
struct UploadRow {
    id: Uuid,
    owner_key: Option<String>,
    upload_length: Option<i64>,
    upload_offset: i64,
    upload_type: String,
    concatenation_parts: String,
    metadata: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<UploadRow> for UploadInfo {
    type Error = StorageError;

    fn try_from(row: UploadRow) -> Result<Self, Self::Error> {
        let concatenation_parts = row
            .concatenation_parts
            .split_whitespace()
            .map(|part| {
                part.parse::<UploadId>()
                    .map_err(|err| StorageError::InvalidRecord(format!("part `{}`: {}", part, err)))
            })
            .collect::<StorageResult<Vec<_>>>()?;

        Ok(UploadInfo {
            id: row.id.into(),
            owner_key: row.owner_key,
            length: row.upload_length.map(from_db).transpose()?,
            offset: from_db(row.upload_offset)?,
            upload_type: row.upload_type.parse().map_err(StorageError::InvalidRecord)?,
            concatenation_parts,
            metadata: UploadMetadata::parse(&row.metadata),
            creation_timestamp: row.created_at,
        })
    }
}

/// StorageService persists tus uploads:
/// - upload records (length, offset, type, parts, metadata, owner) in SQLite
/// - upload bytes in one file per upload on local disk
///
/// The offset column only advances after the bytes it covers are synced.
#[derive(Clone)]
pub struct StorageService {
    /// Shared SQLite connection pool used for upload records.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where upload bytes are stored.
    pub base_path: PathBuf,

    upload_uri: String,
    max_upload_size: Option<u64>,
}

const MAX_ID_ATTEMPTS: usize = 5;
const MIGRATION_SQL: &str = include_str!("../../migrations/0001_init.sql");
const SELECT_UPLOAD: &str = "SELECT id, owner_key, upload_length, upload_offset, upload_type,
        concatenation_parts, metadata, created_at
 FROM uploads WHERE id = ?";

impl StorageService {
    /// Create a new StorageService backed by the provided SQLite pool, storing
    /// bytes under `base_path` and addressing uploads below `upload_uri`.
    pub fn new(
        db: Arc<SqlitePool>,
        base_path: impl Into<PathBuf>,
        upload_uri: impl Into<String>,
    ) -> Self {
        Self {
            db,
            base_path: base_path.into(),
            upload_uri: upload_uri.into(),
            max_upload_size: None,
        }
    }

    pub fn with_max_upload_size(mut self, max_upload_size: Option<u64>) -> Self {
        self.max_upload_size = max_upload_size;
        self
    }

    /// Apply the embedded schema. Safe to run repeatedly.
    pub async fn migrate(&self) -> StorageResult<()> {
        let statements = MIGRATION_SQL
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        info!("Running {} migration statements...", statements.len());
        for stmt in statements {
            debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    /// Shard directory for an upload: first byte of MD5(id) as lowercase hex.
    fn upload_shard(id: UploadId) -> String {
        let digest = md5::compute(id.as_uuid().as_bytes());
        format!("{:02x}", digest[0])
    }

    fn upload_path(&self, id: UploadId) -> PathBuf {
        let mut path = self.base_path.clone();
        path.push(Self::upload_shard(id));
        path.push(format!("{}.bin", id));
        path
    }

    async fn insert(&self, info: &UploadInfo) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO uploads (
                id, owner_key, upload_length, upload_offset, upload_type,
                concatenation_parts, metadata, created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(info.id.as_uuid())
        .bind(info.owner_key.as_deref())
        .bind(info.length.map(to_db).transpose()?)
        .bind(to_db(info.offset)?)
        .bind(info.upload_type.as_str())
        .bind(encode_parts(&info.concatenation_parts))
        .bind(info.metadata.encode())
        .bind(info.creation_timestamp)
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    async fn write_offset(&self, id: UploadId, offset: u64) -> StorageResult<()> {
        let result = sqlx::query("UPDATE uploads SET upload_offset = ? WHERE id = ?")
            .bind(to_db(offset)?)
            .bind(id.as_uuid())
            .execute(&*self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::UploadNotFound(id));
        }
        Ok(())
    }

    /// Remove empty shard directories up to (not including) `stop`.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl UploadStorage for StorageService {
    fn upload_uri(&self) -> &str {
        &self.upload_uri
    }

    fn max_upload_size(&self) -> Option<u64> {
        self.max_upload_size
    }

    async fn get_upload_info(&self, id: UploadId) -> StorageResult<Option<UploadInfo>> {
        let row = sqlx::query_as::<_, UploadRow>(SELECT_UPLOAD)
            .bind(id.as_uuid())
            .fetch_optional(&*self.db)
            .await?;
        row.map(UploadInfo::try_from).transpose()
    }

    /// Insert the record, retrying with a fresh id on the (unlikely) collision,
    /// then create the empty payload file.
    async fn create(&self, mut info: UploadInfo) -> StorageResult<UploadInfo> {
        for _ in 0..MAX_ID_ATTEMPTS {
            match self.insert(&info).await {
                Ok(()) => {
                    let path = self.upload_path(info.id);
                    let created = async {
                        if let Some(parent) = path.parent() {
                            fs::create_dir_all(parent).await?;
                        }
                        File::create(&path).await.map(|_| ())
                    }
                    .await;
                    if let Err(err) = created {
                        let _ = sqlx::query("DELETE FROM uploads WHERE id = ?")
                            .bind(info.id.as_uuid())
                            .execute(&*self.db)
                            .await;
                        return Err(StorageError::Io(err));
                    }

                    info!(upload_id = %info.id, length = ?info.length, "created upload");
                    return Ok(info);
                }
                Err(StorageError::Sqlx(err)) if is_unique_violation(&err) => {
                    debug!(upload_id = %info.id, "upload id already taken, retrying");
                    info.id = UploadId::new();
                }
                Err(err) => return Err(err),
            }
        }
        Err(StorageError::IdExhausted)
    }

    async fn update(&self, info: &UploadInfo) -> StorageResult<()> {
        let result = sqlx::query(
            "UPDATE uploads SET upload_length = ?, upload_offset = ?, upload_type = ?,
                    concatenation_parts = ?, metadata = ?
             WHERE id = ?",
        )
        .bind(info.length.map(to_db).transpose()?)
        .bind(to_db(info.offset)?)
        .bind(info.upload_type.as_str())
        .bind(encode_parts(&info.concatenation_parts))
        .bind(info.metadata.encode())
        .bind(info.id.as_uuid())
        .execute(&*self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::UploadNotFound(info.id));
        }
        Ok(())
    }

    /// Stream `body` onto the end of the payload file.
    ///
    /// - Rejects concatenated uploads and stale offsets before touching disk.
    /// - Truncates the file to the recorded offset, dropping bytes whose
    ///   offset update never landed.
    /// - Writes at most the remaining length, or up to the max upload size
    ///   while the length is deferred; excess body bytes are drained so
    ///   trailers can still be read.
    /// - Syncs, then records the new offset, also when the body errors midway.
    async fn append(
        &self,
        id: UploadId,
        expected_offset: u64,
        body: &mut RequestBody,
    ) -> StorageResult<UploadInfo> {
        let mut info = self
            .get_upload_info(id)
            .await?
            .ok_or(StorageError::UploadNotFound(id))?;
        if info.upload_type == UploadType::Concatenated {
            return Err(StorageError::NotAppendable(id));
        }
        if info.offset != expected_offset {
            return Err(StorageError::OffsetMismatch {
                expected: info.offset,
                actual: expected_offset,
            });
        }

        let path = self.upload_path(id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .await?;
        file.set_len(info.offset).await?;
        file.seek(SeekFrom::Start(info.offset)).await?;

        let limit = info.remaining().or_else(|| {
            self.max_upload_size
                .map(|max| max.saturating_sub(info.offset))
        });
        let (written, outcome) = write_body(&mut file, body, limit).await;
        file.flush().await?;
        file.sync_data().await?;

        if written > 0 {
            info.offset += written;
            self.write_offset(id, info.offset).await?;
        }
        debug!(upload_id = %id, written, offset = info.offset, "appended bytes");

        outcome?;
        Ok(info)
    }

    async fn remove_last_bytes(&self, id: UploadId, count: u64) -> StorageResult<()> {
        let info = self
            .get_upload_info(id)
            .await?
            .ok_or(StorageError::UploadNotFound(id))?;
        let new_offset = info.offset.saturating_sub(count);

        match OpenOptions::new().write(true).open(self.upload_path(id)).await {
            Ok(file) => {
                file.set_len(new_offset).await?;
                file.sync_data().await?;
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(StorageError::Io(err)),
        }

        self.write_offset(id, new_offset).await?;
        info!(
            upload_id = %id,
            removed = info.offset - new_offset,
            offset = new_offset,
            "discarded bytes of a rejected request"
        );
        Ok(())
    }

    /// Delete the record, then the payload file best-effort, then prune the shard.
    async fn terminate_upload(&self, info: &UploadInfo) -> StorageResult<()> {
        sqlx::query("DELETE FROM uploads WHERE id = ?")
            .bind(info.id.as_uuid())
            .execute(&*self.db)
            .await?;

        let file_path = self.upload_path(info.id);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed payload file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("payload file {} already missing", file_path.display());
            }
            Err(err) => return Err(StorageError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            let base_path = self.base_path.clone();
            self.prune_empty_dirs(parent, &base_path).await;
        }

        info!(upload_id = %info.id, "terminated upload");
        Ok(())
    }

    async fn read_bytes(&self, info: &UploadInfo) -> StorageResult<ByteStream> {
        let file = File::open(self.upload_path(info.id))
            .await
            .map_err(|err| {
                if err.kind() == ErrorKind::NotFound {
                    StorageError::UploadNotFound(info.id)
                } else {
                    StorageError::Io(err)
                }
            })?;
        Ok(Box::pin(ReaderStream::new(file.take(info.offset))))
    }
}

/// Copy body chunks into `file`, writing at most `limit` bytes.
///
/// Returns the number of bytes written alongside the outcome so progress made
/// before an error can still be recorded.
async fn write_body(
    file: &mut File,
    body: &mut RequestBody,
    limit: Option<u64>,
) -> (u64, io::Result<()>) {
    let mut written = 0u64;
    loop {
        let chunk = match body.next_chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => return (written, Ok(())),
            Err(err) => return (written, Err(err)),
        };

        let room = match limit {
            Some(limit) => limit.saturating_sub(written),
            None => chunk.len() as u64,
        };
        let take = room.min(chunk.len() as u64) as usize;
        if take == 0 {
            continue;
        }
        if let Err(err) = file.write_all(&chunk[..take]).await {
            return (written, Err(err));
        }
        written += take as u64;
    }
}

fn encode_parts(parts: &[UploadId]) -> String {
    parts
        .iter()
        .map(UploadId::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

fn to_db(value: u64) -> StorageResult<i64> {
    i64::try_from(value).map_err(|_| StorageError::InvalidRecord(format!("{} exceeds i64", value)))
}

fn from_db(value: i64) -> StorageResult<u64> {
    u64::try_from(value).map_err(|_| StorageError::InvalidRecord(format!("negative value {}", value)))
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}
