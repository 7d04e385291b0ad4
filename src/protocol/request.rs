//! The inbound side of a tus exchange.

use super::{headers::UPLOAD_CHECKSUM, method::HttpMethod};
use crate::models::checksum::{ChecksumAlgorithm, RunningDigest};
use axum::{
    body::Body,
    http::{
        HeaderMap, HeaderName,
        header::{TRAILER, TRANSFER_ENCODING},
    },
};
use bytes::Bytes;
use http_body_util::BodyExt;
use std::io;
use tokio::sync::Mutex;

/// A request as seen by validators and handlers.
pub struct TusRequest {
    method: Option<HttpMethod>,
    raw_method: String,
    path: String,
    headers: HeaderMap,
    body: RequestBody,
    appended_bytes: u64,
}

impl TusRequest {
    pub fn new(
        method: Option<HttpMethod>,
        raw_method: impl Into<String>,
        path: impl Into<String>,
        headers: HeaderMap,
        body: Body,
    ) -> Self {
        Self {
            method,
            raw_method: raw_method.into(),
            path: path.into(),
            headers,
            body: RequestBody::new(body),
            appended_bytes: 0,
        }
    }

    /// The classified method; `None` when it is not one the server accepts.
    pub fn method(&self) -> Option<HttpMethod> {
        self.method
    }

    pub fn raw_method(&self) -> &str {
        &self.raw_method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Trimmed header value; absent, empty or non-ASCII values read as `None`.
    pub fn header(&self, name: &HeaderName) -> Option<&str> {
        self.headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    /// `Upload-Checksum` from the headers, falling back to the trailers once
    /// the body has been read.
    pub fn upload_checksum(&self) -> Option<String> {
        self.header(&UPLOAD_CHECKSUM)
            .map(str::to_string)
            .or_else(|| self.body.trailer(&UPLOAD_CHECKSUM).map(str::to_string))
    }

    /// True when the body may end with an `Upload-Checksum` trailer: the
    /// request announces it in `Trailer` or is sent chunked.
    pub fn may_carry_checksum_trailer(&self) -> bool {
        let lists = |name: &HeaderName, wanted: &str| {
            self.headers.get_all(name).iter().any(|value| {
                value
                    .to_str()
                    .unwrap_or_default()
                    .split(',')
                    .any(|item| item.trim().eq_ignore_ascii_case(wanted))
            })
        };
        lists(&TRAILER, UPLOAD_CHECKSUM.as_str()) || lists(&TRANSFER_ENCODING, "chunked")
    }

    pub fn body(&self) -> &RequestBody {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut RequestBody {
        &mut self.body
    }

    /// Remember how many bytes this request appended to its upload.
    pub fn record_appended(&mut self, bytes: u64) {
        self.appended_bytes += bytes;
    }

    pub fn appended_bytes(&self) -> u64 {
        self.appended_bytes
    }
}

/// Streaming request body that keeps running digests and collects trailers.
pub struct RequestBody {
    // `Body` is not `Sync`; the mutex makes `&TusRequest` shareable across
    // awaits. It is only ever reached through `get_mut`.
    inner: Mutex<Body>,
    digests: Vec<RunningDigest>,
    trailers: Option<HeaderMap>,
    bytes_read: u64,
    finished: bool,
}

impl RequestBody {
    pub fn new(inner: Body) -> Self {
        Self {
            inner: Mutex::new(inner),
            digests: Vec::new(),
            trailers: None,
            bytes_read: 0,
            finished: false,
        }
    }

    /// Compute digests for `algorithms` while the body is consumed.
    pub fn track_checksums(&mut self, algorithms: impl IntoIterator<Item = ChecksumAlgorithm>) {
        self.digests = algorithms
            .into_iter()
            .map(ChecksumAlgorithm::new_digest)
            .collect();
    }

    /// Next data chunk, or `None` once the body (and its trailers) is exhausted.
    pub async fn next_chunk(&mut self) -> io::Result<Option<Bytes>> {
        if self.finished {
            return Ok(None);
        }

        while let Some(frame) = self.inner.get_mut().frame().await {
            let frame = frame.map_err(io::Error::other)?;
            match frame.into_data() {
                Ok(data) => {
                    if data.is_empty() {
                        continue;
                    }
                    self.bytes_read += data.len() as u64;
                    for digest in &mut self.digests {
                        digest.update(&data);
                    }
                    return Ok(Some(data));
                }
                Err(frame) => {
                    if let Ok(trailers) = frame.into_trailers() {
                        self.trailers
                            .get_or_insert_with(HeaderMap::new)
                            .extend(trailers);
                    }
                }
            }
        }

        self.finished = true;
        Ok(None)
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn trailer(&self, name: &HeaderName) -> Option<&str> {
        self.trailers
            .as_ref()?
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    /// Digest of everything read so far, if `algorithm` was tracked.
    pub fn calculated_checksum(&self, algorithm: ChecksumAlgorithm) -> Option<Vec<u8>> {
        self.digests
            .iter()
            .find(|digest| digest.algorithm() == algorithm)
            .map(|digest| digest.clone().finalize())
    }
}
