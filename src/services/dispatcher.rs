//! TusDispatcher: classifies each request, takes the per-upload lock, and
//! runs the validator then handler chains of the enabled extensions.
//!
//! The dispatcher is the only place a `TusError` becomes an HTTP status.

use super::{
    upload_lock::{UploadLock, UploadLockService},
    upload_storage::UploadStorage,
};
use crate::{
    errors::{TusError, TusResult},
    extensions::{checksum, concatenation, core, creation, download, termination},
    models::{checksum::ChecksumAlgorithm, upload::UploadInfo},
    protocol::{
        Extension,
        headers::UPLOAD_CHECKSUM,
        method::HttpMethod,
        request::TusRequest,
        response::TusResponse,
    },
};
use axum::{
    body::Body,
    http::Request,
    response::{IntoResponse, Response},
};
use std::{collections::BTreeSet, sync::Arc};
use tokio::io::AsyncWrite;
use tracing::{Instrument, debug, error, info_span, warn};

/// Cheap to clone; all clones share storage, locks and extension chains.
#[derive(Clone)]
pub struct TusDispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    storage: Arc<dyn UploadStorage>,
    locks: UploadLockService,
    extensions: Vec<Extension>,
    supported_methods: BTreeSet<HttpMethod>,
    tracks_checksums: bool,
}

pub struct TusDispatcherBuilder {
    storage: Arc<dyn UploadStorage>,
    download: bool,
    disabled: BTreeSet<String>,
}

impl TusDispatcherBuilder {
    /// Serve completed uploads through GET. Off by default.
    pub fn with_download(mut self, enabled: bool) -> Self {
        self.download = enabled;
        self
    }

    /// Leave an extension out of the chains. `core` is always kept.
    pub fn disable_extension(mut self, name: impl Into<String>) -> Self {
        self.disabled.insert(name.into().trim().to_ascii_lowercase());
        self
    }

    pub fn build(self) -> TusDispatcher {
        if self.disabled.contains(core::NAME) {
            warn!("the core extension cannot be disabled; ignoring");
        }

        // Priority order: core first, then the optional extensions.
        let optional: [fn() -> Extension; 5] = [
            creation::extension,
            checksum::extension,
            termination::extension,
            download::extension,
            concatenation::extension,
        ];

        let mut extensions = vec![core::extension()];
        for make in optional {
            let extension = make();
            let name = extension.name();
            if name == download::NAME && !self.download {
                continue;
            }
            if self.disabled.contains(name) {
                debug!(extension = name, "extension disabled");
                continue;
            }
            extensions.push(extension);
        }

        let supported_methods = extensions
            .iter()
            .flat_map(|extension| extension.methods().iter().copied())
            .collect();
        let tracks_checksums = extensions.iter().any(Extension::tracks_checksums);

        TusDispatcher {
            inner: Arc::new(DispatcherInner {
                storage: self.storage,
                locks: UploadLockService::new(),
                extensions,
                supported_methods,
                tracks_checksums,
            }),
        }
    }
}

impl TusDispatcher {
    pub fn builder(storage: Arc<dyn UploadStorage>) -> TusDispatcherBuilder {
        TusDispatcherBuilder {
            storage,
            download: false,
            disabled: BTreeSet::new(),
        }
    }

    /// Names of the enabled extensions in chain order.
    pub fn extension_names(&self) -> Vec<&'static str> {
        self.inner.extensions.iter().map(Extension::name).collect()
    }

    pub fn supported_methods(&self) -> &BTreeSet<HttpMethod> {
        &self.inner.supported_methods
    }

    /// Handle one tus request end to end. Never fails: errors become responses.
    pub async fn process(&self, request: Request<Body>, owner_key: Option<&str>) -> Response {
        let (parts, body) = request.into_parts();
        let method =
            HttpMethod::classify(&parts.method, &parts.headers, &self.inner.supported_methods);
        let path = parts.uri.path().to_string();
        let span = info_span!("tus_request", method = %parts.method, path = %path);

        let request = TusRequest::new(method, parts.method.as_str(), path, parts.headers, body);
        self.run(request, owner_key).instrument(span).await
    }

    async fn run(&self, mut request: TusRequest, owner_key: Option<&str>) -> Response {
        let storage = self.inner.storage.as_ref();

        if self.inner.tracks_checksums && request.method() == Some(HttpMethod::Patch) {
            let algorithms = checksum_algorithms(&request);
            request.body_mut().track_checksums(algorithms);
        }

        let upload_id = storage.upload_id_from_uri(request.path());
        let _lock = match upload_id {
            Some(id) => Some(self.inner.locks.lock(id).await),
            None => None,
        };

        let mut response = TusResponse::new();
        match self.execute(&mut request, &mut response, owner_key).await {
            Ok(()) => {
                debug!(status = ?response.status(), "request handled");
                response.into_response()
            }
            Err(err) => {
                if err.rolls_back_request_bytes() && request.appended_bytes() > 0 {
                    if let Some(id) = upload_id {
                        if let Err(rollback) =
                            storage.remove_last_bytes(id, request.appended_bytes()).await
                        {
                            error!(upload_id = %id, error = %rollback, "failed to discard request bytes");
                        }
                    }
                }

                let status = err.status();
                if status.is_server_error() {
                    warn!(%status, error = %err, "request failed");
                } else {
                    debug!(%status, error = %err, "request rejected");
                }
                err.into_response()
            }
        }
    }

    async fn execute(
        &self,
        request: &mut TusRequest,
        response: &mut TusResponse,
        owner_key: Option<&str>,
    ) -> TusResult<()> {
        let storage = self.inner.storage.as_ref();
        let method = request.method();

        for extension in &self.inner.extensions {
            for validator in extension.validators() {
                if validator.supports(method) {
                    validator.validate(method, request, storage, owner_key).await?;
                }
            }
        }

        let Some(method) = method else {
            return Err(TusError::UnsupportedMethod(request.raw_method().to_string()));
        };

        for extension in &self.inner.extensions {
            for handler in extension.handlers() {
                if handler.supports(method) {
                    handler
                        .process(method, request, response, storage, owner_key)
                        .await?;
                }
            }
        }
        Ok(())
    }

    /// Look up an upload the way a HEAD request would, finalizing
    /// concatenated uploads first.
    pub async fn get_upload_info(
        &self,
        uri: &str,
        owner_key: Option<&str>,
    ) -> TusResult<UploadInfo> {
        let _lock = self.lock_uri(uri).await;
        self.lookup(uri, owner_key)
            .await?
            .ok_or_else(|| TusError::UploadNotFound(uri.to_string()))
    }

    /// Write the bytes of a completed upload into `sink`.
    pub async fn copy_upload_to(
        &self,
        uri: &str,
        owner_key: Option<&str>,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> TusResult<u64> {
        let storage = self.inner.storage.as_ref();
        let _lock = self.lock_uri(uri).await;
        let info = self
            .lookup(uri, owner_key)
            .await?
            .ok_or_else(|| TusError::UploadNotFound(uri.to_string()))?;
        if info.is_upload_in_progress() {
            return Err(TusError::UploadInProgress(info.id));
        }
        Ok(storage.copy_upload_to(&info, sink).await?)
    }

    /// Terminate an upload on behalf of the host. Unknown uploads are ignored.
    pub async fn delete_upload(&self, uri: &str, owner_key: Option<&str>) -> TusResult<()> {
        let storage = self.inner.storage.as_ref();
        let _lock = self.lock_uri(uri).await;
        if let Some(info) = storage.get_upload_info_by_uri(uri, owner_key).await? {
            storage.terminate_upload(&info).await?;
        }
        Ok(())
    }

    async fn lock_uri(&self, uri: &str) -> Option<UploadLock> {
        match self.inner.storage.upload_id_from_uri(uri) {
            Some(id) => Some(self.inner.locks.lock(id).await),
            None => None,
        }
    }

    async fn lookup(&self, uri: &str, owner_key: Option<&str>) -> TusResult<Option<UploadInfo>> {
        let storage = self.inner.storage.as_ref();
        let Some(mut info) = storage.get_upload_info_by_uri(uri, owner_key).await? else {
            return Ok(None);
        };
        storage.finalize_concatenation(&mut info).await?;
        Ok(Some(info))
    }
}

/// Digests to compute while a PATCH body streams: the header's algorithm, or
/// every algorithm when the checksum can only arrive as a trailer.
fn checksum_algorithms(request: &TusRequest) -> Vec<ChecksumAlgorithm> {
    if let Some(algorithm) = request
        .header(&UPLOAD_CHECKSUM)
        .and_then(ChecksumAlgorithm::for_upload_checksum_header)
    {
        return vec![algorithm];
    }
    if request.may_carry_checksum_trailer() {
        return ChecksumAlgorithm::ALL.to_vec();
    }
    Vec::new()
}
