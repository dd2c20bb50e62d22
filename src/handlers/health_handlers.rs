//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks DB connectivity and scratch I/O

use crate::services::file_service::FileService;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use tokio::fs;
use uuid::Uuid;

#[derive(Serialize)]
struct CheckStatus {
    name: &'static str,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl CheckStatus {
    fn from_result(name: &'static str, result: Result<(), String>) -> Self {
        Self {
            name,
            ok: result.is_ok(),
            error: result.err(),
        }
    }
}

#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    checks: Vec<CheckStatus>,
}

/// `GET /healthz`
///
/// Liveness probe; always 200, never performs I/O.
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

/// `GET /readyz`
///
/// Readiness probe covering the two dependencies every upload needs: the
/// metadata database and the scratch directory. 200 when all checks pass,
/// 503 when any fails.
pub async fn readyz(State(service): State<FileService>) -> impl IntoResponse {
    let checks = vec![
        CheckStatus::from_result("sqlite", check_sqlite(&service).await),
        CheckStatus::from_result("scratch", check_scratch(&service).await),
    ];

    let all_ok = checks.iter().all(|c| c.ok);
    let status = if all_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = ReadyResponse {
        status: if all_ok { "ok" } else { "error" },
        checks,
    };
    (status, Json(body))
}

async fn check_sqlite(service: &FileService) -> Result<(), String> {
    match sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(&*service.metadata.db)
        .await
    {
        Ok(1) => Ok(()),
        Ok(v) => Err(format!("unexpected result: {v}")),
        Err(e) => Err(format!("error: {e}")),
    }
}

/// Write/read/delete a probe file under the scratch directory.
async fn check_scratch(service: &FileService) -> Result<(), String> {
    let tmp_path = service
        .scratch_dir
        .join(format!(".readyz-{}", Uuid::new_v4()));

    fs::write(&tmp_path, b"readyz")
        .await
        .map_err(|e| format!("could not write tmp file: {e}"))?;
    let read_back = fs::read(&tmp_path).await;
    let _ = fs::remove_file(&tmp_path).await;

    match read_back {
        Ok(bytes) if bytes == b"readyz" => Ok(()),
        Ok(_) => Err("file content mismatch".into()),
        Err(e) => Err(format!("could not read tmp file: {e}")),
    }
}
