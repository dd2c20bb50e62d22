//! HTTP handlers for the upload paths: chunked sessions, whole-file
//! uploads, and the hash-based fast path. Chunk and whole-file bodies are
//! streamed straight into the service, never buffered in memory.

use crate::{
    errors::AppError,
    handlers::{check_content_hash, check_owner},
    models::{session::UploadStatus, user_file::UserFileRecord},
    services::file_service::FileService,
};
use axum::{
    Json,
    body::Body,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::io;

#[derive(Debug, Deserialize)]
pub struct InitUploadReq {
    pub owner: String,
    pub content_hash: String,
    pub declared_size: u64,
}

#[derive(Debug, Serialize)]
pub struct InitUploadResp {
    pub session_id: String,
    pub chunk_size: u64,
    pub chunk_count: u32,
}

/// POST `/api/upload/init` — open a chunked-upload session.
pub async fn init_upload(
    State(service): State<FileService>,
    Json(req): Json<InitUploadReq>,
) -> Result<impl IntoResponse, AppError> {
    check_owner(&req.owner)?;
    let content_hash = check_content_hash(&req.content_hash)?;

    let session = service
        .init_upload(&req.owner, &content_hash, req.declared_size)
        .await?;
    Ok(Json(InitUploadResp {
        chunk_size: session.chunk_size,
        chunk_count: session.chunk_count(),
        session_id: session.id,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ChunkQuery {
    pub session_id: String,
    pub index: u32,
    pub chunk_hash: String,
}

/// POST `/api/upload/chunk` — receive one chunk as a raw streamed body.
pub async fn upload_chunk(
    State(service): State<FileService>,
    Query(q): Query<ChunkQuery>,
    body: Body,
) -> Result<impl IntoResponse, AppError> {
    let chunk_hash = check_content_hash(&q.chunk_hash)?;
    let stream = body
        .into_data_stream()
        .map(|chunk| chunk.map_err(|err| io::Error::new(io::ErrorKind::Other, err)));

    service
        .receive_chunk(&q.session_id, q.index, &chunk_hash, stream)
        .await?;
    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub session_id: String,
}

#[derive(Debug, Serialize)]
pub struct UploadStatusResp {
    pub content_hash: String,
    pub declared_size: u64,
    pub chunk_size: u64,
    pub chunk_count: u32,
    pub received: Vec<u32>,
    pub complete: bool,
}

impl From<UploadStatus> for UploadStatusResp {
    fn from(status: UploadStatus) -> Self {
        Self {
            complete: status.is_complete(),
            received: status.completed.iter().copied().collect(),
            content_hash: status.content_hash,
            declared_size: status.declared_size,
            chunk_size: status.chunk_size,
            chunk_count: status.chunk_count,
        }
    }
}

/// GET `/api/upload/status` — progress for a session, suitable for
/// resuming an interrupted upload.
pub async fn upload_status(
    State(service): State<FileService>,
    Query(q): Query<StatusQuery>,
) -> Result<impl IntoResponse, AppError> {
    let status = service.upload_status(&q.session_id).await?;
    Ok(Json(UploadStatusResp::from(status)))
}

#[derive(Debug, Deserialize)]
pub struct CompleteUploadReq {
    pub session_id: String,
    pub owner: String,
    pub content_hash: String,
    pub declared_size: u64,
    pub file_name: String,
}

#[derive(Debug, Serialize)]
pub struct StoredFileResp {
    pub content_hash: String,
    pub size_bytes: i64,
    pub tier: String,
}

/// POST `/api/upload/complete` — assemble the session's chunks into the
/// final object and place it on its home tier.
pub async fn complete_upload(
    State(service): State<FileService>,
    Json(req): Json<CompleteUploadReq>,
) -> Result<impl IntoResponse, AppError> {
    check_owner(&req.owner)?;
    let content_hash = check_content_hash(&req.content_hash)?;
    if req.file_name.is_empty() {
        return Err(AppError::invalid_params("file_name must not be empty"));
    }

    let record = service
        .complete_upload(
            &req.session_id,
            &req.owner,
            &content_hash,
            req.declared_size,
            &req.file_name,
        )
        .await?;
    Ok(Json(StoredFileResp {
        content_hash: record.content_hash,
        size_bytes: record.size_bytes,
        tier: record.tier.to_string(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct CancelUploadReq {
    pub session_id: String,
}

/// POST `/api/upload/cancel` — drop a session and its received chunks.
pub async fn cancel_upload(
    State(service): State<FileService>,
    Json(req): Json<CancelUploadReq>,
) -> Result<impl IntoResponse, AppError> {
    service.cancel_upload(&req.session_id).await?;
    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
pub struct FastUploadReq {
    pub owner: String,
    pub content_hash: String,
    pub file_name: String,
}

/// POST `/api/upload/fast` — claim already-stored content by hash.
/// Responds 404 when the hash is unknown; the client falls back to a real
/// upload.
pub async fn fast_upload(
    State(service): State<FileService>,
    Json(req): Json<FastUploadReq>,
) -> Result<Json<UserFileRecord>, AppError> {
    check_owner(&req.owner)?;
    let content_hash = check_content_hash(&req.content_hash)?;
    if req.file_name.is_empty() {
        return Err(AppError::invalid_params("file_name must not be empty"));
    }

    let record = service
        .fast_upload(&req.owner, &content_hash, &req.file_name)
        .await?;
    Ok(Json(record))
}

#[derive(Debug, Deserialize)]
pub struct WholeUploadQuery {
    pub owner: String,
    pub file_name: String,
}

/// POST `/api/upload` — single-request upload for files small enough to
/// not bother with sessions. The body is the raw file content.
pub async fn upload_whole(
    State(service): State<FileService>,
    Query(q): Query<WholeUploadQuery>,
    body: Body,
) -> Result<impl IntoResponse, AppError> {
    check_owner(&q.owner)?;
    if q.file_name.is_empty() {
        return Err(AppError::invalid_params("file_name must not be empty"));
    }

    let stream = body
        .into_data_stream()
        .map(|chunk| chunk.map_err(|err| io::Error::new(io::ErrorKind::Other, err)));
    let record = service.upload_whole(&q.owner, &q.file_name, stream).await?;
    Ok((
        StatusCode::CREATED,
        Json(StoredFileResp {
            content_hash: record.content_hash,
            size_bytes: record.size_bytes,
            tier: record.tier.to_string(),
        }),
    ))
}
