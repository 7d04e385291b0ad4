//! End-to-end protocol tests driving the axum router in-process.

use axum::{
    Router,
    body::Body,
    http::{HeaderMap, HeaderValue, Request, Response, StatusCode},
};
use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use futures::stream;
use http_body::Frame;
use http_body_util::{BodyExt, StreamBody};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{io, sync::Arc};
use tempfile::TempDir;
use tower::ServiceExt;
use tus_server::{
    handlers::tus_handlers::AppState,
    models::checksum::ChecksumAlgorithm,
    routes::routes::routes,
    services::{
        dispatcher::{TusDispatcher, TusDispatcherBuilder},
        storage_service::StorageService,
    },
};

const TUS: &str = "1.0.0";
const OCTET: &str = "application/offset+octet-stream";

struct TestServer {
    router: Router,
    _dir: TempDir,
}

struct Options {
    max_upload_size: Option<u64>,
    owner_key_header: Option<&'static str>,
    configure: fn(TusDispatcherBuilder) -> TusDispatcherBuilder,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            max_upload_size: None,
            owner_key_header: None,
            configure: |builder| builder.with_download(true),
        }
    }
}

async fn server() -> TestServer {
    server_with(Options::default()).await
}

async fn server_with(options: Options) -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let connect = SqliteConnectOptions::new()
        .filename(dir.path().join("meta.db"))
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(connect)
        .await
        .unwrap();
    let storage = StorageService::new(Arc::new(pool), dir.path().join("uploads"), "/files")
        .with_max_upload_size(options.max_upload_size);
    storage.migrate().await.unwrap();

    let dispatcher = (options.configure)(TusDispatcher::builder(Arc::new(storage.clone()))).build();
    let state = AppState {
        dispatcher,
        storage,
        owner_key_header: options
            .owner_key_header
            .map(|name| name.parse().unwrap()),
    };

    TestServer {
        router: routes("/files").with_state(state),
        _dir: dir,
    }
}

impl TestServer {
    async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    async fn create(&self, length: u64) -> String {
        let response = self
            .send(
                Request::post("/files")
                    .header("tus-resumable", TUS)
                    .header("upload-length", length.to_string())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        header(&response, "location").unwrap()
    }

    async fn create_partial(&self, length: u64) -> String {
        let response = self
            .send(
                Request::post("/files")
                    .header("tus-resumable", TUS)
                    .header("upload-length", length.to_string())
                    .header("upload-concat", "partial")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        header(&response, "location").unwrap()
    }

    async fn patch(&self, location: &str, offset: u64, bytes: &'static [u8]) -> Response<Body> {
        self.send(patch_request(location, offset, bytes).body(Body::from(bytes)).unwrap())
            .await
    }

    async fn head(&self, location: &str) -> Response<Body> {
        self.send(
            Request::head(location)
                .header("tus-resumable", TUS)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    async fn get(&self, location: &str) -> Response<Body> {
        self.send(
            Request::get(location)
                .header("tus-resumable", TUS)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    async fn delete(&self, location: &str) -> Response<Body> {
        self.send(
            Request::delete(location)
                .header("tus-resumable", TUS)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }
}

fn patch_request(location: &str, offset: u64, bytes: &[u8]) -> axum::http::request::Builder {
    Request::patch(location)
        .header("tus-resumable", TUS)
        .header("content-type", OCTET)
        .header("upload-offset", offset.to_string())
        .header("content-length", bytes.len().to_string())
}

fn header(response: &Response<Body>, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn checksum(algorithm: ChecksumAlgorithm, bytes: &[u8]) -> String {
    format!(
        "{} {}",
        algorithm.wire_name(),
        general_purpose::STANDARD.encode(algorithm.compute_digest(bytes))
    )
}

async fn body_bytes(response: Response<Body>) -> Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

async fn error_status(response: Response<Body>) -> u64 {
    let body = body_bytes(response).await;
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    json["status"].as_u64().unwrap()
}

#[tokio::test]
async fn upload_in_two_patches_then_download() {
    let server = server().await;
    let location = server.create(10).await;
    assert!(location.starts_with("/files/"));

    let first = server.patch(&location, 0, b"hello ").await;
    assert_eq!(first.status(), StatusCode::NO_CONTENT);
    assert_eq!(header(&first, "upload-offset").as_deref(), Some("6"));
    assert_eq!(header(&first, "tus-resumable").as_deref(), Some(TUS));

    let second = server
        .send(
            patch_request(&location, 6, b"tus!")
                .header("upload-checksum", checksum(ChecksumAlgorithm::Md5, b"tus!"))
                .body(Body::from("tus!"))
                .unwrap(),
        )
        .await;
    assert_eq!(second.status(), StatusCode::NO_CONTENT);
    assert_eq!(header(&second, "upload-offset").as_deref(), Some("10"));

    let head = server.head(&location).await;
    assert_eq!(head.status(), StatusCode::OK);
    assert_eq!(header(&head, "upload-offset").as_deref(), Some("10"));
    assert_eq!(header(&head, "upload-length").as_deref(), Some("10"));
    assert_eq!(header(&head, "cache-control").as_deref(), Some("no-store"));

    let download = server.get(&location).await;
    assert_eq!(download.status(), StatusCode::OK);
    assert_eq!(header(&download, "content-length").as_deref(), Some("10"));
    assert_eq!(
        header(&download, "content-type").as_deref(),
        Some("application/octet-stream")
    );
    assert_eq!(body_bytes(download).await, Bytes::from_static(b"hello tus!"));
}

#[tokio::test]
async fn final_concatenation_rejects_upload_length() {
    let server = server().await;
    let first = server.create_partial(3).await;
    let second = server.create_partial(2).await;

    let accepted = server
        .send(
            Request::post("/files")
                .header("tus-resumable", TUS)
                .header("upload-concat", format!("final;{} {}", first, second))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(accepted.status(), StatusCode::CREATED);

    let rejected = server
        .send(
            Request::post("/files")
                .header("tus-resumable", TUS)
                .header("upload-concat", format!("final;{} {}", first, second))
                .header("upload-length", "5")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(rejected.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_status(rejected).await, 400);
}

#[tokio::test]
async fn termination_is_idempotent() {
    let server = server().await;
    let location = server.create(3).await;
    server.patch(&location, 0, b"abc").await;

    assert_eq!(server.delete(&location).await.status(), StatusCode::NO_CONTENT);
    assert_eq!(server.get(&location).await.status(), StatusCode::NOT_FOUND);
    assert_eq!(server.head(&location).await.status(), StatusCode::NOT_FOUND);
    assert_eq!(server.delete(&location).await.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn checksum_mismatch_discards_request_bytes_and_retry_succeeds() {
    let server = server().await;
    let location = server.create(10).await;
    server.patch(&location, 0, b"01234").await;

    let bad = server
        .send(
            patch_request(&location, 5, b"56789")
                .header("upload-checksum", checksum(ChecksumAlgorithm::Sha256, b"nope!"))
                .body(Body::from("56789"))
                .unwrap(),
        )
        .await;
    assert_eq!(bad.status().as_u16(), 460);
    assert_eq!(error_status(bad).await, 460);

    let head = server.head(&location).await;
    assert_eq!(header(&head, "upload-offset").as_deref(), Some("5"));

    let good = server
        .send(
            patch_request(&location, 5, b"56789")
                .header("upload-checksum", checksum(ChecksumAlgorithm::Sha256, b"56789"))
                .body(Body::from("56789"))
                .unwrap(),
        )
        .await;
    assert_eq!(good.status(), StatusCode::NO_CONTENT);
    assert_eq!(header(&good, "upload-offset").as_deref(), Some("10"));
    assert_eq!(
        body_bytes(server.get(&location).await).await,
        Bytes::from_static(b"0123456789")
    );
}

#[tokio::test]
async fn checksum_trailer_is_verified_after_the_body() {
    let server = server().await;
    let location = server.create(4).await;

    let trailer_request = |digest: String| {
        let mut trailers = HeaderMap::new();
        trailers.insert("upload-checksum", HeaderValue::from_str(&digest).unwrap());
        let frames = vec![
            Ok::<_, io::Error>(Frame::data(Bytes::from_static(b"da"))),
            Ok(Frame::data(Bytes::from_static(b"ta"))),
            Ok(Frame::trailers(trailers)),
        ];
        Request::patch(location.as_str())
            .header("tus-resumable", TUS)
            .header("content-type", OCTET)
            .header("upload-offset", "0")
            .header("trailer", "upload-checksum")
            .body(Body::new(StreamBody::new(stream::iter(frames))))
            .unwrap()
    };

    let bad = server
        .send(trailer_request(checksum(ChecksumAlgorithm::Sha1, b"nope")))
        .await;
    assert_eq!(bad.status().as_u16(), 460);
    let head = server.head(&location).await;
    assert_eq!(header(&head, "upload-offset").as_deref(), Some("0"));

    let good = server
        .send(trailer_request(checksum(ChecksumAlgorithm::Sha1, b"data")))
        .await;
    assert_eq!(good.status(), StatusCode::NO_CONTENT);
    assert_eq!(header(&good, "upload-offset").as_deref(), Some("4"));
}

#[tokio::test]
async fn unknown_trailer_algorithm_is_a_bad_request() {
    let server = server().await;
    let location = server.create(2).await;

    let mut trailers = HeaderMap::new();
    trailers.insert("upload-checksum", HeaderValue::from_static("crc32 AAAA"));
    let frames = vec![
        Ok::<_, io::Error>(Frame::data(Bytes::from_static(b"ok"))),
        Ok(Frame::trailers(trailers)),
    ];
    let response = server
        .send(
            Request::patch(location.as_str())
                .header("tus-resumable", TUS)
                .header("content-type", OCTET)
                .header("upload-offset", "0")
                .header("trailer", "upload-checksum")
                .body(Body::new(StreamBody::new(stream::iter(frames))))
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_checksum_algorithm_is_rejected_before_the_body() {
    let server = server().await;
    let location = server.create(3).await;

    let response = server
        .send(
            patch_request(&location, 0, b"abc")
                .header("upload-checksum", "crc32 AAAA")
                .body(Body::from("abc"))
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let head = server.head(&location).await;
    assert_eq!(header(&head, "upload-offset").as_deref(), Some("0"));
}

#[tokio::test]
async fn offset_conflict_leaves_upload_untouched() {
    let server = server().await;
    let location = server.create(6).await;
    server.patch(&location, 0, b"abc").await;

    let conflict = server.patch(&location, 0, b"xyz").await;
    assert_eq!(conflict.status(), StatusCode::CONFLICT);

    let missing = server
        .send(
            Request::patch(location.as_str())
                .header("tus-resumable", TUS)
                .header("content-type", OCTET)
                .body(Body::from("xyz"))
                .unwrap(),
        )
        .await;
    assert_eq!(missing.status(), StatusCode::BAD_REQUEST);

    let head = server.head(&location).await;
    assert_eq!(header(&head, "upload-offset").as_deref(), Some("3"));
}

#[tokio::test]
async fn concurrent_patches_at_the_same_offset_serialize() {
    let server = server().await;
    let location = server.create(6).await;

    let (left, right) = tokio::join!(
        server.patch(&location, 0, b"abc"),
        server.patch(&location, 0, b"abc")
    );
    let mut statuses = vec![left.status(), right.status()];
    statuses.sort();
    assert_eq!(statuses, vec![StatusCode::NO_CONTENT, StatusCode::CONFLICT]);

    let next = server.patch(&location, 3, b"def").await;
    assert_eq!(next.status(), StatusCode::NO_CONTENT);
    assert_eq!(
        body_bytes(server.get(&location).await).await,
        Bytes::from_static(b"abcdef")
    );
}

#[tokio::test]
async fn options_advertises_each_extension_once() {
    let server = server_with(Options {
        max_upload_size: Some(1024),
        ..Options::default()
    })
    .await;

    let response = server
        .send(Request::options("/files").body(Body::empty()).unwrap())
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(header(&response, "tus-version").as_deref(), Some(TUS));
    assert_eq!(header(&response, "tus-resumable").as_deref(), Some(TUS));
    assert_eq!(header(&response, "tus-max-size").as_deref(), Some("1024"));
    assert_eq!(
        header(&response, "tus-extension").as_deref(),
        Some(
            "creation,creation-defer-length,checksum,checksum-trailer,termination,download,\
             concatenation,concatenation-unfinished"
        )
    );
    assert_eq!(
        header(&response, "tus-checksum-algorithm").as_deref(),
        Some("md5,sha1,sha256,sha384,sha512")
    );
    assert!(body_bytes(response).await.is_empty());
}

#[tokio::test]
async fn disabled_extensions_are_neither_advertised_nor_served() {
    let server = server_with(Options {
        configure: |builder| builder.disable_extension("termination"),
        ..Options::default()
    })
    .await;

    let options = server
        .send(Request::options("/files").body(Body::empty()).unwrap())
        .await;
    let extensions = header(&options, "tus-extension").unwrap();
    assert!(!extensions.contains("termination"));
    assert!(!extensions.contains("download"));

    let location = server.create(1).await;
    assert_eq!(
        server.delete(&location).await.status(),
        StatusCode::METHOD_NOT_ALLOWED
    );
    assert_eq!(
        server.get(&location).await.status(),
        StatusCode::METHOD_NOT_ALLOWED
    );
}

#[tokio::test]
async fn protocol_version_is_enforced() {
    let server = server().await;
    let location = server.create(1).await;

    let response = server
        .send(
            Request::head(location.as_str())
                .header("tus-resumable", "0.2.2")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);
    assert_eq!(header(&response, "tus-version").as_deref(), Some(TUS));

    let missing = server
        .send(Request::post("/files").header("upload-length", "1").body(Body::empty()).unwrap())
        .await;
    assert_eq!(missing.status(), StatusCode::PRECONDITION_FAILED);
}

#[tokio::test]
async fn unsupported_methods_and_uris_are_rejected() {
    let server = server().await;
    let location = server.create(1).await;

    let put = server
        .send(
            Request::put(location.as_str())
                .header("tus-resumable", TUS)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(put.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(error_status(put).await, 405);

    let post_on_upload = server
        .send(
            Request::post(location.as_str())
                .header("tus-resumable", TUS)
                .header("upload-length", "1")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(post_on_upload.status(), StatusCode::METHOD_NOT_ALLOWED);

    let unknown = server.head("/files/00000000-0000-4000-8000-000000000000").await;
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn patch_preconditions() {
    let server = server().await;
    let location = server.create(4).await;

    let wrong_type = server
        .send(
            Request::patch(location.as_str())
                .header("tus-resumable", TUS)
                .header("content-type", "text/plain")
                .header("upload-offset", "0")
                .body(Body::from("abcd"))
                .unwrap(),
        )
        .await;
    assert_eq!(wrong_type.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

    let overrun = server.patch(&location, 0, b"abcdef").await;
    assert_eq!(overrun.status(), StatusCode::BAD_REQUEST);

    let head = server.head(&location).await;
    assert_eq!(header(&head, "upload-offset").as_deref(), Some("0"));
}

#[tokio::test]
async fn creation_limits_and_deferred_length() {
    let server = server_with(Options {
        max_upload_size: Some(8),
        ..Options::default()
    })
    .await;

    let too_large = server
        .send(
            Request::post("/files")
                .header("tus-resumable", TUS)
                .header("upload-length", "9")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(too_large.status(), StatusCode::PAYLOAD_TOO_LARGE);

    let no_length = server
        .send(
            Request::post("/files")
                .header("tus-resumable", TUS)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(no_length.status(), StatusCode::BAD_REQUEST);

    let deferred = server
        .send(
            Request::post("/files")
                .header("tus-resumable", TUS)
                .header("upload-defer-length", "1")
                .header("upload-metadata", "filename bm90ZXMudHh0,filetype dGV4dC9wbGFpbg==")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(deferred.status(), StatusCode::CREATED);
    let location = header(&deferred, "location").unwrap();

    let head = server.head(&location).await;
    assert_eq!(header(&head, "upload-defer-length").as_deref(), Some("1"));
    assert_eq!(header(&head, "upload-length"), None);
    assert_eq!(
        header(&head, "upload-metadata").as_deref(),
        Some("filename bm90ZXMudHh0,filetype dGV4dC9wbGFpbg==")
    );

    let patch = server
        .send(
            patch_request(&location, 0, b"note")
                .header("upload-length", "4")
                .body(Body::from("note"))
                .unwrap(),
        )
        .await;
    assert_eq!(patch.status(), StatusCode::NO_CONTENT);

    let head = server.head(&location).await;
    assert_eq!(header(&head, "upload-length").as_deref(), Some("4"));
    assert_eq!(header(&head, "upload-defer-length"), None);

    let download = server.get(&location).await;
    assert_eq!(
        header(&download, "content-disposition").as_deref(),
        Some("attachment; filename=\"notes.txt\"")
    );
    assert_eq!(header(&download, "content-type").as_deref(), Some("text/plain"));
}

#[tokio::test]
async fn deferred_length_upload_is_capped_by_max_size() {
    let server = server_with(Options {
        max_upload_size: Some(10),
        ..Options::default()
    })
    .await;

    let created = server
        .send(
            Request::post("/files")
                .header("tus-resumable", TUS)
                .header("upload-defer-length", "1")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(created.status(), StatusCode::CREATED);
    let location = header(&created, "location").unwrap();

    let declared = server.patch(&location, 0, b"0123456789abcdefghij").await;
    assert_eq!(declared.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let head = server.head(&location).await;
    assert_eq!(header(&head, "upload-offset").as_deref(), Some("0"));

    // Without a Content-Length the body is cut at the limit.
    let frames = vec![Ok::<_, io::Error>(Frame::data(Bytes::from_static(
        b"0123456789abcdefghij",
    )))];
    let streamed = server
        .send(
            Request::patch(location.as_str())
                .header("tus-resumable", TUS)
                .header("content-type", OCTET)
                .header("upload-offset", "0")
                .body(Body::new(StreamBody::new(stream::iter(frames))))
                .unwrap(),
        )
        .await;
    assert_eq!(streamed.status(), StatusCode::NO_CONTENT);
    assert_eq!(header(&streamed, "upload-offset").as_deref(), Some("10"));

    let finish = server
        .send(
            patch_request(&location, 10, b"")
                .header("upload-length", "10")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(finish.status(), StatusCode::NO_CONTENT);
    assert_eq!(
        body_bytes(server.get(&location).await).await,
        Bytes::from_static(b"0123456789")
    );
}

#[tokio::test]
async fn interrupted_body_keeps_bytes_already_written() {
    let server = server().await;
    let location = server.create(6).await;

    let frames = vec![
        Ok(Frame::data(Bytes::from_static(b"abc"))),
        Err(io::Error::new(io::ErrorKind::ConnectionReset, "client went away")),
    ];
    let interrupted = server
        .send(
            Request::patch(location.as_str())
                .header("tus-resumable", TUS)
                .header("content-type", OCTET)
                .header("upload-offset", "0")
                .body(Body::new(StreamBody::new(stream::iter(frames))))
                .unwrap(),
        )
        .await;
    assert!(interrupted.status().is_server_error());

    let head = server.head(&location).await;
    assert_eq!(header(&head, "upload-offset").as_deref(), Some("3"));

    let resumed = server.patch(&location, 3, b"def").await;
    assert_eq!(resumed.status(), StatusCode::NO_CONTENT);
    assert_eq!(header(&resumed, "upload-offset").as_deref(), Some("6"));
    assert_eq!(
        body_bytes(server.get(&location).await).await,
        Bytes::from_static(b"abcdef")
    );
}

#[tokio::test]
async fn download_of_unfinished_upload_is_refused() {
    let server = server().await;
    let location = server.create(4).await;
    server.patch(&location, 0, b"ab").await;

    let response = server.get(&location).await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn concatenation_of_partial_uploads() {
    let server = server().await;
    let first = server.create_partial(3).await;
    let second = server.create_partial(2).await;

    let created = server
        .send(
            Request::post("/files")
                .header("tus-resumable", TUS)
                .header("upload-concat", format!("final;{} {}", second, first))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(created.status(), StatusCode::CREATED);
    let final_location = header(&created, "location").unwrap();

    let unfinished = server.head(&final_location).await;
    assert_eq!(unfinished.status(), StatusCode::OK);
    assert_eq!(
        header(&unfinished, "upload-concat"),
        Some(format!("final;{} {}", second, first))
    );
    assert_eq!(header(&unfinished, "upload-offset"), None);
    assert_eq!(header(&unfinished, "upload-length"), None);

    let part_head = server.head(&first).await;
    assert_eq!(header(&part_head, "upload-concat").as_deref(), Some("partial"));

    server.patch(&first, 0, b"abc").await;
    server.patch(&second, 0, b"de").await;

    let finished = server.head(&final_location).await;
    assert_eq!(header(&finished, "upload-length").as_deref(), Some("5"));
    assert_eq!(header(&finished, "upload-offset").as_deref(), Some("5"));

    let patch_final = server.patch(&final_location, 5, b"x").await;
    assert_eq!(patch_final.status(), StatusCode::FORBIDDEN);

    assert_eq!(
        body_bytes(server.get(&final_location).await).await,
        Bytes::from_static(b"deabc")
    );
}

#[tokio::test]
async fn final_concatenation_requires_existing_parts() {
    let server = server().await;
    let first = server.create_partial(1).await;

    for concat in [
        "final;".to_string(),
        format!("final;{} not-an-id", first),
        format!("final;{} /files/00000000-0000-4000-8000-000000000000", first),
    ] {
        let response = server
            .send(
                Request::post("/files")
                    .header("tus-resumable", TUS)
                    .header("upload-concat", concat)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}

#[tokio::test]
async fn owner_key_scopes_uploads() {
    let server = server_with(Options {
        owner_key_header: Some("x-owner"),
        ..Options::default()
    })
    .await;

    let created = server
        .send(
            Request::post("/files")
                .header("tus-resumable", TUS)
                .header("upload-length", "1")
                .header("x-owner", "alice")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    let location = header(&created, "location").unwrap();

    let head_as = |owner: &'static str| {
        Request::head(location.as_str())
            .header("tus-resumable", TUS)
            .header("x-owner", owner)
            .body(Body::empty())
            .unwrap()
    };
    assert_eq!(server.send(head_as("alice")).await.status(), StatusCode::OK);
    assert_eq!(server.send(head_as("bob")).await.status(), StatusCode::NOT_FOUND);
    assert_eq!(server.head(&location).await.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn method_override_header_is_honored() {
    let server = server().await;
    let location = server.create(1).await;

    let response = server
        .send(
            Request::post(location.as_str())
                .header("tus-resumable", TUS)
                .header("x-http-method-override", "DELETE")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(server.head(&location).await.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn health_probes() {
    let server = server().await;

    let live = server
        .send(Request::get("/healthz").body(Body::empty()).unwrap())
        .await;
    assert_eq!(live.status(), StatusCode::OK);

    let ready = server
        .send(Request::get("/readyz").body(Body::empty()).unwrap())
        .await;
    assert_eq!(ready.status(), StatusCode::OK);
    let body: serde_json::Value = serde_json::from_slice(&body_bytes(ready).await).unwrap();
    assert_eq!(body["checks"]["sqlite"]["ok"], true);
    assert_eq!(body["checks"]["disk"]["ok"], true);
}
