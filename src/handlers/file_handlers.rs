//! Listing and deletion of an owner's files.

use crate::{
    errors::AppError,
    handlers::{check_content_hash, check_owner},
    models::user_file::UserFileRecord,
    services::file_service::FileService,
};
use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const DEFAULT_LIST_LIMIT: u32 = 100;
const MAX_LIST_LIMIT: u32 = 1000;

#[derive(Debug, Deserialize)]
pub struct ListFilesQuery {
    pub owner: String,
    pub limit: Option<u32>,
}

/// GET `/api/files?owner=...` — the owner's live files, newest first.
pub async fn list_files(
    State(service): State<FileService>,
    Query(q): Query<ListFilesQuery>,
) -> Result<Json<Vec<UserFileRecord>>, AppError> {
    check_owner(&q.owner)?;
    let limit = q.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
    let files = service.list_files(&q.owner, limit).await?;
    Ok(Json(files))
}

#[derive(Debug, Deserialize)]
pub struct FileMetaQuery {
    pub owner: String,
    pub content_hash: String,
}

#[derive(Debug, Serialize)]
pub struct FileMetaResp {
    pub content_hash: String,
    pub file_name: String,
    pub size_bytes: i64,
    pub tier: String,
    pub uploaded_at: DateTime<Utc>,
    pub download_count: i64,
}

/// GET `/api/files/meta?owner=&content_hash=` — one file's metadata, the
/// owner's view joined with the stored-content record.
pub async fn file_meta(
    State(service): State<FileService>,
    Query(q): Query<FileMetaQuery>,
) -> Result<Json<FileMetaResp>, AppError> {
    check_owner(&q.owner)?;
    let content_hash = check_content_hash(&q.content_hash)?;
    let (user_file, record) = service.file_meta(&q.owner, &content_hash).await?;
    Ok(Json(FileMetaResp {
        content_hash: record.content_hash,
        file_name: user_file.file_name,
        size_bytes: record.size_bytes,
        tier: record.tier.to_string(),
        uploaded_at: user_file.uploaded_at,
        download_count: user_file.download_count,
    }))
}

#[derive(Debug, Deserialize)]
pub struct RenameFileReq {
    pub owner: String,
    pub content_hash: String,
    pub new_file_name: String,
}

/// POST `/api/files/rename` — change the visible name of an owner's file.
/// Pure metadata; the content identity never changes.
pub async fn rename_file(
    State(service): State<FileService>,
    Json(req): Json<RenameFileReq>,
) -> Result<Json<UserFileRecord>, AppError> {
    check_owner(&req.owner)?;
    let content_hash = check_content_hash(&req.content_hash)?;
    if req.new_file_name.is_empty() {
        return Err(AppError::invalid_params("new_file_name must not be empty"));
    }
    let record = service
        .rename_file(&req.owner, &content_hash, &req.new_file_name)
        .await?;
    Ok(Json(record))
}

#[derive(Debug, Deserialize)]
pub struct DeleteFileReq {
    pub owner: String,
    pub content_hash: String,
}

/// POST `/api/files/delete` — tombstone the owner's association with a
/// file. The stored bytes survive; other owners may still reference them.
pub async fn delete_file(
    State(service): State<FileService>,
    Json(req): Json<DeleteFileReq>,
) -> Result<impl IntoResponse, AppError> {
    check_owner(&req.owner)?;
    let content_hash = check_content_hash(&req.content_hash)?;
    service.delete_file(&req.owner, &content_hash).await?;
    Ok(StatusCode::OK)
}
