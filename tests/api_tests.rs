//! HTTP surface tests exercising the router with in-process backends.

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tierstore::hash::sha1_hex;
use tierstore::models::file::TierKind;
use tierstore::services::file_service::FileService;
use tierstore::services::metadata::{MetadataStore, run_migrations};
use tierstore::services::session_store::MemorySessionStore;
use tierstore::services::tiering::TieringPolicy;
use tierstore::services::tiers::{FsTierClient, TierSet};
use tierstore::services::transfer::ChannelTransferQueue;
use tower::ServiceExt;

const CHUNK_SIZE: u64 = 8;

async fn test_app() -> (Router, TempDir) {
    let tmp = tempfile::tempdir().unwrap();
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    run_migrations(&pool).await.unwrap();

    let tiers = TierSet::new(
        Arc::new(FsTierClient::new(TierKind::Local, tmp.path().join("local"))),
        Arc::new(FsTierClient::new(TierKind::Cold, tmp.path().join("cold"))),
        Arc::new(FsTierClient::new(TierKind::Bulk, tmp.path().join("bulk"))),
    );
    let service = FileService::new(
        Arc::new(MemorySessionStore::new(
            Duration::from_secs(60),
            Duration::from_secs(60),
        )),
        tiers,
        MetadataStore::new(Arc::new(pool)),
        Arc::new(ChannelTransferQueue::new()),
        TieringPolicy::new("VI"),
        CHUNK_SIZE,
        tmp.path().join("scratch"),
        false,
    );
    std::fs::create_dir_all(tmp.path().join("scratch")).unwrap();
    (tierstore::routes::routes::routes().with_state(service), tmp)
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Drive the whole chunked flow over HTTP and return the content hash.
async fn upload_via_api(app: &Router, owner: &str, file_name: &str, data: &[u8]) -> String {
    let hash = sha1_hex(data);
    let response = app
        .clone()
        .oneshot(post_json(
            "/api/upload/init",
            json!({"owner": owner, "content_hash": hash, "declared_size": data.len()}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let init = json_body(response).await;
    let session_id = init["session_id"].as_str().unwrap().to_string();
    let chunk_count = init["chunk_count"].as_u64().unwrap();
    assert_eq!(init["chunk_size"].as_u64().unwrap(), CHUNK_SIZE);

    for (index, chunk) in data.chunks(CHUNK_SIZE as usize).enumerate() {
        let uri = format!(
            "/api/upload/chunk?session_id={session_id}&index={index}&chunk_hash={}",
            sha1_hex(chunk)
        );
        let response = app
            .clone()
            .oneshot(
                Request::post(uri)
                    .body(Body::from(chunk.to_vec()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
    assert_eq!(data.len().div_ceil(CHUNK_SIZE as usize) as u64, chunk_count);

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/upload/complete",
            json!({
                "session_id": session_id,
                "owner": owner,
                "content_hash": hash,
                "declared_size": data.len(),
                "file_name": file_name,
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    hash
}

#[tokio::test]
async fn health_endpoints_respond() {
    let (app, _tmp) = test_app().await;

    let response = app
        .clone()
        .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(Request::get("/readyz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "ok");
}

#[tokio::test]
async fn chunked_upload_then_full_download() {
    let (app, _tmp) = test_app().await;
    let data = b"the quick brown fox jumps over the lazy dog";
    let hash = upload_via_api(&app, "alice", "fox.txt", data).await;

    let response = app
        .oneshot(
            Request::get(format!("/api/download?content_hash={hash}&owner=alice"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::ACCEPT_RANGES].to_str().unwrap(),
        "bytes"
    );
    assert_eq!(
        response.headers()[header::CONTENT_LENGTH].to_str().unwrap(),
        data.len().to_string()
    );
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], data);
}

#[tokio::test]
async fn range_download_returns_partial_content() {
    let (app, _tmp) = test_app().await;
    let data = b"0123456789abcdefghij";
    let hash = upload_via_api(&app, "alice", "digits.bin", data).await;

    let response = app
        .clone()
        .oneshot(
            Request::get(format!("/api/download?content_hash={hash}"))
                .header(header::RANGE, "bytes=4-9")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        response.headers()[header::CONTENT_RANGE].to_str().unwrap(),
        format!("bytes 4-9/{}", data.len())
    );
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"456789");

    // Unsatisfiable range: 416 plus the total size for the client to retry.
    let response = app
        .clone()
        .oneshot(
            Request::get(format!("/api/download?content_hash={hash}"))
                .header(header::RANGE, format!("bytes={}-", data.len()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(
        response.headers()[header::CONTENT_RANGE].to_str().unwrap(),
        format!("bytes */{}", data.len())
    );

    // A bounded end past EOF is also unsatisfiable, never clamped.
    let response = app
        .clone()
        .oneshot(
            Request::get(format!("/api/download?content_hash={hash}"))
                .header(header::RANGE, "bytes=4-999")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);

    // Malformed range header is the client's mistake.
    let response = app
        .oneshot(
            Request::get(format!("/api/download?content_hash={hash}"))
                .header(header::RANGE, "bytes=oops")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn status_reports_progress_and_incomplete_completion_conflicts() {
    let (app, _tmp) = test_app().await;
    let data = b"partial progress payload";
    let hash = sha1_hex(data);

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/upload/init",
            json!({"owner": "alice", "content_hash": hash, "declared_size": data.len()}),
        ))
        .await
        .unwrap();
    let session_id = json_body(response).await["session_id"]
        .as_str()
        .unwrap()
        .to_string();

    let chunk = &data[..CHUNK_SIZE as usize];
    let response = app
        .clone()
        .oneshot(
            Request::post(format!(
                "/api/upload/chunk?session_id={session_id}&index=0&chunk_hash={}",
                sha1_hex(chunk)
            ))
            .body(Body::from(chunk.to_vec()))
            .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(
            Request::get(format!("/api/upload/status?session_id={session_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let status = json_body(response).await;
    assert_eq!(status["complete"], false);
    assert_eq!(status["received"], json!([0]));

    let response = app
        .oneshot(post_json(
            "/api/upload/complete",
            json!({
                "session_id": session_id,
                "owner": "alice",
                "content_hash": hash,
                "declared_size": data.len(),
                "file_name": "p.bin",
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(json_body(response).await["code"], "incomplete");
}

#[tokio::test]
async fn corrupt_chunk_yields_hash_mismatch() {
    let (app, _tmp) = test_app().await;
    let data = b"will not match";
    let hash = sha1_hex(data);
    let response = app
        .clone()
        .oneshot(post_json(
            "/api/upload/init",
            json!({"owner": "alice", "content_hash": hash, "declared_size": data.len()}),
        ))
        .await
        .unwrap();
    let session_id = json_body(response).await["session_id"]
        .as_str()
        .unwrap()
        .to_string();

    let response = app
        .oneshot(
            Request::post(format!(
                "/api/upload/chunk?session_id={session_id}&index=0&chunk_hash={}",
                sha1_hex(b"declared bytes")
            ))
            .body(Body::from(&b"actual bytes"[..]))
            .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json_body(response).await["code"], "hash_mismatch");
}

#[tokio::test]
async fn fast_upload_404_until_content_exists() {
    let (app, _tmp) = test_app().await;
    let data = b"content for the fast path";
    let hash = sha1_hex(data);

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/upload/fast",
            json!({"owner": "bob", "content_hash": hash, "file_name": "copy.bin"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(response).await["code"], "not_found");

    upload_via_api(&app, "alice", "orig.bin", data).await;

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/upload/fast",
            json!({"owner": "bob", "content_hash": hash, "file_name": "copy.bin"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let record = json_body(response).await;
    assert_eq!(record["owner"], "bob");
    assert_eq!(record["file_name"], "copy.bin");
}

#[tokio::test]
async fn whole_upload_lists_and_deletes() {
    let (app, _tmp) = test_app().await;
    let data = b"one-shot upload body";

    let response = app
        .clone()
        .oneshot(
            Request::post("/api/upload?owner=alice&file_name=single.bin")
                .body(Body::from(&data[..]))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let stored = json_body(response).await;
    assert_eq!(stored["content_hash"], sha1_hex(data));

    let response = app
        .clone()
        .oneshot(
            Request::get("/api/files?owner=alice")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let files = json_body(response).await;
    assert_eq!(files.as_array().unwrap().len(), 1);
    assert_eq!(files[0]["file_name"], "single.bin");

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/files/delete",
            json!({"owner": "alice", "content_hash": sha1_hex(data)}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(
            Request::get("/api/files?owner=alice")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert!(json_body(response).await.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn rename_and_single_file_meta() {
    let (app, _tmp) = test_app().await;
    let data = b"metadata under a new name";
    let hash = upload_via_api(&app, "alice", "old-name.bin", data).await;

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/files/rename",
            json!({"owner": "alice", "content_hash": hash, "new_file_name": "new-name.bin"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["file_name"], "new-name.bin");

    let response = app
        .clone()
        .oneshot(
            Request::get(format!("/api/files/meta?owner=alice&content_hash={hash}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let meta = json_body(response).await;
    assert_eq!(meta["file_name"], "new-name.bin");
    assert_eq!(meta["content_hash"].as_str().unwrap(), hash);
    assert_eq!(meta["size_bytes"].as_u64().unwrap() as usize, data.len());

    // Renaming a file the owner does not have is a 404.
    let response = app
        .oneshot(post_json(
            "/api/files/rename",
            json!({"owner": "bob", "content_hash": hash, "new_file_name": "x.bin"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invalid_params_are_rejected_up_front() {
    let (app, _tmp) = test_app().await;

    // Bad owner.
    let response = app
        .clone()
        .oneshot(post_json(
            "/api/upload/init",
            json!({"owner": "a/b", "content_hash": "0".repeat(40), "declared_size": 1}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["code"], "invalid_params");

    // Bad hash.
    let response = app
        .clone()
        .oneshot(post_json(
            "/api/upload/init",
            json!({"owner": "alice", "content_hash": "nothex", "declared_size": 1}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Unknown session.
    let response = app
        .oneshot(
            Request::get("/api/upload/status?session_id=missing")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
