//! FileService: the ingestion and tiering pipeline.
//!
//! Owns the full life of uploaded bytes: chunk receive into a per-session
//! scratch area, assembly into a content-addressed object on the local
//! tier, dedup by content hash, classification and placement onto the
//! durable tiers (inline or via the transfer queue), and resolution of
//! downloads against whichever tier currently holds the object.
//!
//! All collaborators are injected so tests can substitute in-memory fakes
//! for the session store, the queue, and the object-store tiers.

use crate::hash::ContentHasher;
use crate::models::file::{FileRecord, TierKind};
use crate::models::session::{UploadSession, UploadStatus};
use crate::models::transfer::TransferJob;
use crate::models::user_file::UserFileRecord;
use crate::services::metadata::MetadataStore;
use crate::services::session_store::{SessionStore, SessionStoreError};
use crate::services::tiering::{StorageClass, TieringPolicy};
use crate::services::tiers::{ByteStream, TierError, TierSet};
use bytes::Bytes;
use futures::{Stream, StreamExt, pin_mut};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::services::transfer::TransferQueue;

/// Read buffer for the assembly merge loop.
const MERGE_BUF_SIZE: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid request: {0}")]
    InvalidParams(String),
    #[error("upload session not found")]
    SessionNotFound,
    #[error("file not found")]
    FileNotFound,
    #[error("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },
    #[error("upload incomplete: {received} of {expected} chunks received")]
    Incomplete { received: u32, expected: u32 },
    #[error("size mismatch: declared {declared} bytes, assembled {actual}")]
    SizeMismatch { declared: u64, actual: u64 },
    #[error("requested range not satisfiable for object of {size} bytes")]
    RangeNotSatisfiable { size: u64 },
    #[error("chunk assembly failed")]
    Assembly(#[source] io::Error),
    #[error("tier write failed")]
    StoreWrite(#[source] TierError),
    #[error("session store error")]
    Session(#[source] SessionStoreError),
    #[error(transparent)]
    Tier(#[from] TierError),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<SessionStoreError> for StorageError {
    fn from(err: SessionStoreError) -> Self {
        match err {
            SessionStoreError::NotFound => StorageError::SessionNotFound,
            other => StorageError::Session(other),
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Core service wiring the upload, tiering, and download paths together.
#[derive(Clone)]
pub struct FileService {
    pub sessions: Arc<dyn SessionStore>,
    pub tiers: TierSet,
    pub metadata: MetadataStore,
    pub queue: Arc<dyn TransferQueue>,
    pub policy: TieringPolicy,

    /// Fixed chunk size handed to clients at session init.
    pub chunk_size: u64,

    /// Root for per-session chunk directories and spool files.
    pub scratch_dir: PathBuf,

    /// Whether ordinary files ride the transfer queue instead of being
    /// copied to the bulk tier inline.
    pub async_transfer: bool,
}

impl FileService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        tiers: TierSet,
        metadata: MetadataStore,
        queue: Arc<dyn TransferQueue>,
        policy: TieringPolicy,
        chunk_size: u64,
        scratch_dir: impl Into<PathBuf>,
        async_transfer: bool,
    ) -> Self {
        Self {
            sessions,
            tiers,
            metadata,
            queue,
            policy,
            chunk_size,
            scratch_dir: scratch_dir.into(),
            async_transfer,
        }
    }

    fn session_dir(&self, session_id: &str) -> PathBuf {
        self.scratch_dir.join(session_id)
    }

    // ----- chunked upload -----

    /// Open a new chunked-upload session.
    pub async fn init_upload(
        &self,
        owner: &str,
        content_hash: &str,
        declared_size: u64,
    ) -> StorageResult<UploadSession> {
        let session = UploadSession::new(owner, content_hash, declared_size, self.chunk_size);
        self.sessions.create(&session).await?;
        debug!(session_id = %session.id, chunks = session.chunk_count(), "upload session created");
        Ok(session)
    }

    /// Receive one chunk: stream it to the session's scratch directory,
    /// verifying the declared chunk hash while writing. A rejected chunk
    /// leaves no partial file behind and is not marked complete.
    pub async fn receive_chunk<S>(
        &self,
        session_id: &str,
        index: u32,
        expected_hash: &str,
        body: S,
    ) -> StorageResult<()>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        // Re-checking the session up front also rejects chunks racing a
        // cancellation.
        let status = self.sessions.status(session_id).await?;
        if index >= status.chunk_count {
            return Err(StorageError::InvalidParams(format!(
                "chunk index {index} out of range (chunk count {})",
                status.chunk_count
            )));
        }

        let dir = self.session_dir(session_id);
        fs::create_dir_all(&dir).await?;
        let chunk_path = dir.join(index.to_string());

        let (actual_hash, _) = match write_stream_hashed(&chunk_path, body).await {
            Ok(out) => out,
            Err(err) => {
                let _ = fs::remove_file(&chunk_path).await;
                return Err(err.into());
            }
        };

        if actual_hash != expected_hash {
            let _ = fs::remove_file(&chunk_path).await;
            return Err(StorageError::HashMismatch {
                expected: expected_hash.to_string(),
                actual: actual_hash,
            });
        }

        self.sessions.mark_chunk_complete(session_id, index).await?;
        Ok(())
    }

    /// Poll a session's progress.
    pub async fn upload_status(&self, session_id: &str) -> StorageResult<UploadStatus> {
        Ok(self.sessions.status(session_id).await?)
    }

    /// Cancel a session: drop its store entry and scratch chunks.
    /// Idempotent; cancelling an unknown session succeeds.
    pub async fn cancel_upload(&self, session_id: &str) -> StorageResult<()> {
        self.sessions.delete(session_id).await?;
        let _ = fs::remove_dir_all(self.session_dir(session_id)).await;
        Ok(())
    }

    /// Assemble a completed session into one object and place it.
    ///
    /// Chunks are concatenated in strict index order, so out-of-order
    /// arrival cannot change the output. The assembled byte length and
    /// recomputed whole-file hash must match the declared values.
    pub async fn complete_upload(
        &self,
        session_id: &str,
        owner: &str,
        content_hash: &str,
        declared_size: u64,
        file_name: &str,
    ) -> StorageResult<FileRecord> {
        let status = self.sessions.status(session_id).await?;
        if !status.is_complete() {
            return Err(StorageError::Incomplete {
                received: status.received_count(),
                expected: status.chunk_count,
            });
        }
        if !status.content_hash.is_empty() && status.content_hash != content_hash {
            return Err(StorageError::InvalidParams(
                "content hash does not match the session".into(),
            ));
        }

        let staging = self
            .scratch_dir
            .join(format!(".assembly-{}", Uuid::new_v4()));
        let merged = self
            .merge_chunks(session_id, status.chunk_count, &staging)
            .await;
        let (actual_hash, actual_size) = match merged {
            Ok(out) => out,
            Err(err) => {
                let _ = fs::remove_file(&staging).await;
                return Err(err);
            }
        };

        if actual_size != declared_size {
            let _ = fs::remove_file(&staging).await;
            return Err(StorageError::SizeMismatch {
                declared: declared_size,
                actual: actual_size,
            });
        }
        if actual_hash != content_hash {
            let _ = fs::remove_file(&staging).await;
            return Err(StorageError::HashMismatch {
                expected: content_hash.to_string(),
                actual: actual_hash,
            });
        }

        let result = self
            .store_new_file(owner, file_name, content_hash, actual_size, &staging)
            .await;
        let _ = fs::remove_file(&staging).await;
        let record = result?;

        // The session and its chunks are spent regardless of where the
        // bytes ended up.
        self.sessions.delete(session_id).await?;
        let _ = fs::remove_dir_all(self.session_dir(session_id)).await;

        Ok(record)
    }

    /// Concatenate chunk files 0..count into `staging`, returning the
    /// merged hash and byte length.
    async fn merge_chunks(
        &self,
        session_id: &str,
        chunk_count: u32,
        staging: &Path,
    ) -> StorageResult<(String, u64)> {
        let dir = self.session_dir(session_id);
        let mut out = File::create(staging).await.map_err(StorageError::Assembly)?;
        let mut hasher = ContentHasher::new();
        let mut total: u64 = 0;
        let mut buf = vec![0u8; MERGE_BUF_SIZE];

        for index in 0..chunk_count {
            let mut chunk = File::open(dir.join(index.to_string()))
                .await
                .map_err(StorageError::Assembly)?;
            loop {
                let n = chunk.read(&mut buf).await.map_err(StorageError::Assembly)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
                out.write_all(&buf[..n])
                    .await
                    .map_err(StorageError::Assembly)?;
                total += n as u64;
            }
        }
        out.flush().await.map_err(StorageError::Assembly)?;
        out.sync_all().await.map_err(StorageError::Assembly)?;
        Ok((hasher.finalize_hex(), total))
    }

    // ----- whole-file upload -----

    /// Accept a whole file in one request: spool while hashing, then join
    /// the same dedup/placement path as chunked assembly. Identical bytes
    /// already stored short-circuit to a metadata-only write.
    pub async fn upload_whole<S>(
        &self,
        owner: &str,
        file_name: &str,
        body: S,
    ) -> StorageResult<FileRecord>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        fs::create_dir_all(&self.scratch_dir).await?;
        let spool = self.scratch_dir.join(format!(".upload-{}", Uuid::new_v4()));
        let (content_hash, size) = match write_stream_hashed(&spool, body).await {
            Ok(out) => out,
            Err(err) => {
                let _ = fs::remove_file(&spool).await;
                return Err(err.into());
            }
        };

        if let Some(existing) = self.metadata.get_file(&content_hash).await? {
            let _ = fs::remove_file(&spool).await;
            self.metadata
                .upsert_user_file(owner, &content_hash, file_name)
                .await?;
            debug!(content_hash, "whole upload deduplicated against stored content");
            return Ok(existing);
        }

        let result = self
            .store_new_file(owner, file_name, &content_hash, size, &spool)
            .await;
        let _ = fs::remove_file(&spool).await;
        result
    }

    // ----- placement -----

    /// Land freshly assembled bytes on the local tier, record the metadata,
    /// and run the tiering policy.
    async fn store_new_file(
        &self,
        owner: &str,
        file_name: &str,
        content_hash: &str,
        size: u64,
        staged: &Path,
    ) -> StorageResult<FileRecord> {
        self.tiers
            .local
            .put_path(content_hash, staged)
            .await
            .map_err(StorageError::StoreWrite)?;

        let mut record = FileRecord::new(content_hash, size, TierKind::Local, content_hash);
        self.metadata.upsert_file(&record).await?;
        self.metadata
            .upsert_user_file(owner, content_hash, file_name)
            .await?;

        self.place_file(&mut record, file_name, staged).await?;
        Ok(record)
    }

    /// Apply the tiering policy to a newly stored object.
    ///
    /// Important files move to the cold tier before the upload returns.
    /// Ordinary files either move to the bulk tier inline or stay local
    /// with a transfer job enqueued; a failed enqueue is logged and the
    /// upload still succeeds, readable from the local tier.
    async fn place_file(
        &self,
        record: &mut FileRecord,
        file_name: &str,
        staged: &Path,
    ) -> StorageResult<()> {
        let class = self.policy.classify(file_name);
        let target = self.policy.target_tier(class);
        match class {
            StorageClass::Important => self.move_to_tier(record, target, staged).await,
            StorageClass::Ordinary if !self.async_transfer => {
                self.move_to_tier(record, target, staged).await
            }
            StorageClass::Ordinary => {
                let job = TransferJob::new(
                    &record.content_hash,
                    record.tier,
                    &record.location,
                    target,
                    &record.content_hash,
                );
                if !self.queue.publish(&job).await {
                    warn!(
                        content_hash = %record.content_hash,
                        "transfer enqueue failed; object stays on the local tier"
                    );
                }
                Ok(())
            }
        }
    }

    /// Synchronous cross-tier copy with pointer update, used for the
    /// inline placement paths.
    async fn move_to_tier(
        &self,
        record: &mut FileRecord,
        dest: TierKind,
        staged: &Path,
    ) -> StorageResult<()> {
        let dest_location = record.content_hash.clone();
        self.tiers
            .client(dest)
            .put_path(&dest_location, staged)
            .await
            .map_err(StorageError::StoreWrite)?;
        self.metadata
            .update_location(&record.content_hash, dest, &dest_location)
            .await?;

        // The landing-zone copy is unreferenced once the pointer moved.
        let stale = self.tiers.client(record.tier);
        if stale.kind() != dest {
            if let Err(err) = stale.delete(&record.location).await {
                debug!("failed to remove stale local copy: {err}");
            }
        }

        record.tier = dest;
        record.location = dest_location;
        Ok(())
    }

    // ----- dedup fast path -----

    /// Satisfy an upload by reference to already-stored content. Returns
    /// `FileNotFound` when the hash is unknown, telling the client to fall
    /// back to a real upload.
    pub async fn fast_upload(
        &self,
        owner: &str,
        content_hash: &str,
        file_name: &str,
    ) -> StorageResult<UserFileRecord> {
        if self.metadata.get_file(content_hash).await?.is_none() {
            return Err(StorageError::FileNotFound);
        }
        Ok(self
            .metadata
            .upsert_user_file(owner, content_hash, file_name)
            .await?)
    }

    // ----- download -----

    /// Look up where the bytes currently live.
    pub async fn resolve_download(&self, content_hash: &str) -> StorageResult<FileRecord> {
        self.metadata
            .get_file(content_hash)
            .await?
            .ok_or(StorageError::FileNotFound)
    }

    /// Open a streaming read against the tier named by the record. `range`
    /// is an inclusive pair already validated against the object size.
    pub async fn open_download(
        &self,
        record: &FileRecord,
        range: Option<(u64, u64)>,
    ) -> StorageResult<ByteStream> {
        Ok(self
            .tiers
            .client(record.tier)
            .get(&record.location, range)
            .await?)
    }

    /// Fire-and-forget download-counter bump; never fails the download.
    pub fn record_download(&self, owner: &str, content_hash: &str) {
        let metadata = self.metadata.clone();
        let owner = owner.to_string();
        let content_hash = content_hash.to_string();
        tokio::spawn(async move {
            if let Err(err) = metadata.bump_download_count(&owner, &content_hash).await {
                warn!("failed to update download count: {err}");
            }
        });
    }

    // ----- listing / delete -----

    pub async fn list_files(&self, owner: &str, limit: u32) -> StorageResult<Vec<UserFileRecord>> {
        Ok(self.metadata.list_user_files(owner, limit).await?)
    }

    /// The owner's view of one file, paired with where the bytes live.
    pub async fn file_meta(
        &self,
        owner: &str,
        content_hash: &str,
    ) -> StorageResult<(UserFileRecord, FileRecord)> {
        let user_file = self
            .metadata
            .get_user_file(owner, content_hash)
            .await?
            .ok_or(StorageError::FileNotFound)?;
        let record = self
            .metadata
            .get_file(content_hash)
            .await?
            .ok_or(StorageError::FileNotFound)?;
        Ok((user_file, record))
    }

    /// Change the visible name of the owner's file. Content identity and
    /// bytes are untouched.
    pub async fn rename_file(
        &self,
        owner: &str,
        content_hash: &str,
        file_name: &str,
    ) -> StorageResult<UserFileRecord> {
        self.metadata
            .rename_user_file(owner, content_hash, file_name)
            .await?
            .ok_or(StorageError::FileNotFound)
    }

    /// Tombstone the owner's association with a file. Bytes and the file
    /// record stay put: other owners may reference them and tombstoned
    /// rows can be restored.
    pub async fn delete_file(&self, owner: &str, content_hash: &str) -> StorageResult<()> {
        if !self
            .metadata
            .soft_delete_user_file(owner, content_hash)
            .await?
        {
            return Err(StorageError::FileNotFound);
        }
        Ok(())
    }
}

/// Stream `body` into `path`, computing the content hash alongside the
/// write. Returns the lowercase hex digest and the byte count.
async fn write_stream_hashed<S>(path: &Path, body: S) -> io::Result<(String, u64)>
where
    S: Stream<Item = io::Result<Bytes>> + Send,
{
    let mut file = File::create(path).await?;
    let mut hasher = ContentHasher::new();
    let mut total: u64 = 0;

    pin_mut!(body);
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        hasher.update(&chunk);
        total += chunk.len() as u64;
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    file.sync_all().await?;
    Ok((hasher.finalize_hex(), total))
}
