//! Defines routes for the upload, download, and file-management API.
//!
//! ## Structure
//! - **Upload endpoints**
//!   - `POST /api/upload`           — whole-file upload (raw body)
//!   - `POST /api/upload/init`      — open a chunked-upload session
//!   - `POST /api/upload/chunk`     — receive one chunk (raw body)
//!   - `GET  /api/upload/status`    — session progress, for resume
//!   - `POST /api/upload/complete`  — assemble and place the object
//!   - `POST /api/upload/cancel`    — drop a session
//!   - `POST /api/upload/fast`      — claim stored content by hash
//!
//! - **Download and file endpoints**
//!   - `GET  /api/download`         — stream an object, Range supported
//!   - `GET  /api/files`            — list an owner's files
//!   - `GET  /api/files/meta`       — one file's metadata
//!   - `POST /api/files/rename`     — change a file's visible name
//!   - `POST /api/files/delete`     — tombstone an owner's file
//!
//! Chunk and object identifiers travel in query strings so the raw bodies
//! stay opaque byte streams.

use crate::{
    handlers::{
        download_handlers::download,
        file_handlers::{delete_file, file_meta, list_files, rename_file},
        health_handlers::{healthz, readyz},
        upload_handlers::{
            cancel_upload, complete_upload, fast_upload, init_upload, upload_chunk, upload_status,
            upload_whole,
        },
    },
    services::file_service::FileService,
};
use axum::{
    Router,
    routing::{get, post},
};

/// Build the router for the full API surface. The router carries shared
/// state (`FileService`) to all handlers.
pub fn routes() -> Router<FileService> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // upload paths
        .route("/api/upload", post(upload_whole))
        .route("/api/upload/init", post(init_upload))
        .route("/api/upload/chunk", post(upload_chunk))
        .route("/api/upload/status", get(upload_status))
        .route("/api/upload/complete", post(complete_upload))
        .route("/api/upload/cancel", post(cancel_upload))
        .route("/api/upload/fast", post(fast_upload))
        // download and file management
        .route("/api/download", get(download))
        .route("/api/files", get(list_files))
        .route("/api/files/meta", get(file_meta))
        .route("/api/files/rename", post(rename_file))
        .route("/api/files/delete", post(delete_file))
}
