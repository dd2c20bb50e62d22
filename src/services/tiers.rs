//! Storage-tier clients.
//!
//! Each tier (local disk, cold object store, bulk object store) exposes the
//! same narrow contract: put a finished file, stream it back (optionally a
//! byte range), delete it. Tier selection always happens on [`TierKind`],
//! never by sniffing location strings.

use crate::models::file::TierKind;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::io::{self, ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

/// A boxed stream of bytes for streaming reads out of a tier.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

#[derive(Debug, Error)]
pub enum TierError {
    #[error("object `{0}` not found in tier")]
    NotFound(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("object store error: {0}")]
    Backend(String),
}

pub type TierResult<T> = Result<T, TierError>;

/// One storage backend holding object payloads keyed by content hash.
#[async_trait]
pub trait TierClient: Send + Sync {
    /// Which tier this client serves.
    fn kind(&self) -> TierKind;

    /// Store the file at `src` under `key`. Overwrites any existing object.
    async fn put_path(&self, key: &str, src: &Path) -> TierResult<()>;

    /// Open a streaming read. `range` is an inclusive `(start, end)` byte
    /// pair already validated against the object size.
    async fn get(&self, key: &str, range: Option<(u64, u64)>) -> TierResult<ByteStream>;

    /// Remove the object. Missing keys are not an error.
    async fn delete(&self, key: &str) -> TierResult<()>;
}

/// Local-filesystem tier. Payloads are sharded two levels deep beneath the
/// root to keep per-directory file counts down.
pub struct FsTierClient {
    kind: TierKind,
    root: PathBuf,
}

impl FsTierClient {
    pub fn new(kind: TierKind, root: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            root: root.into(),
        }
    }

    /// `root/{aa}/{bb}/{key}` for hash-like keys, flat otherwise.
    fn object_path(&self, key: &str) -> PathBuf {
        if key.len() >= 4 && key.bytes().all(|b| b.is_ascii_alphanumeric()) {
            self.root.join(&key[0..2]).join(&key[2..4]).join(key)
        } else {
            self.root.join(key)
        }
    }

    /// Remove empty shard directories up to the tier root after a delete.
    async fn prune_empty_dirs(&self, start: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(&self.root) && current != self.root {
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
                    debug!("failed to prune directory: {err}");
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl TierClient for FsTierClient {
    fn kind(&self) -> TierKind {
        self.kind
    }

    async fn put_path(&self, key: &str, src: &Path) -> TierResult<()> {
        let dest = self.object_path(key);
        let parent = dest
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| TierError::Backend("object path missing parent directory".into()))?;
        fs::create_dir_all(&parent).await?;

        // Copy into a temp name, then rename so readers never observe a
        // partially written object.
        let tmp = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        if let Err(err) = fs::copy(src, &tmp).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(err.into());
        }
        if let Err(err) = fs::rename(&tmp, &dest).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(err.into());
        }
        Ok(())
    }

    async fn get(&self, key: &str, range: Option<(u64, u64)>) -> TierResult<ByteStream> {
        let path = self.object_path(key);
        let mut file = File::open(&path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                TierError::NotFound(key.to_string())
            } else {
                TierError::Io(err)
            }
        })?;

        match range {
            Some((start, end)) => {
                file.seek(SeekFrom::Start(start)).await?;
                let limited = file.take(end - start + 1);
                Ok(Box::pin(ReaderStream::new(limited)))
            }
            None => Ok(Box::pin(ReaderStream::new(file))),
        }
    }

    async fn delete(&self, key: &str) -> TierResult<()> {
        let path = self.object_path(key);
        match fs::remove_file(&path).await {
            Ok(_) => {
                if let Some(parent) = path.parent() {
                    self.prune_empty_dirs(parent).await;
                }
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// S3-compatible object-store tier.
pub struct S3TierClient {
    kind: TierKind,
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3TierClient {
    /// Build a client for `bucket`. A custom `endpoint` (MinIO, Ceph RGW)
    /// switches the SDK to path-style addressing.
    pub async fn connect(
        kind: TierKind,
        bucket: impl Into<String>,
        region: &str,
        endpoint: Option<&str>,
    ) -> Self {
        let base = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_string()))
            .load()
            .await;
        let mut builder = aws_sdk_s3::config::Builder::from(&base);
        if let Some(endpoint) = endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }
        Self {
            kind,
            client: aws_sdk_s3::Client::from_conf(builder.build()),
            bucket: bucket.into(),
        }
    }
}

#[async_trait]
impl TierClient for S3TierClient {
    fn kind(&self) -> TierKind {
        self.kind
    }

    async fn put_path(&self, key: &str, src: &Path) -> TierResult<()> {
        let body = aws_sdk_s3::primitives::ByteStream::from_path(src)
            .await
            .map_err(|err| TierError::Backend(err.to_string()))?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|err| TierError::Backend(err.to_string()))?;
        Ok(())
    }

    async fn get(&self, key: &str, range: Option<(u64, u64)>) -> TierResult<ByteStream> {
        let mut req = self.client.get_object().bucket(&self.bucket).key(key);
        if let Some((start, end)) = range {
            req = req.range(format!("bytes={start}-{end}"));
        }
        let out = req.send().await.map_err(|err| {
            if let aws_sdk_s3::error::SdkError::ServiceError(ref service_err) = err {
                if service_err.err().is_no_such_key() {
                    return TierError::NotFound(key.to_string());
                }
            }
            TierError::Backend(err.to_string())
        })?;
        Ok(Box::pin(ReaderStream::new(out.body.into_async_read())))
    }

    async fn delete(&self, key: &str) -> TierResult<()> {
        // S3 DeleteObject is a no-op for missing keys, matching the trait
        // contract.
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| TierError::Backend(err.to_string()))?;
        Ok(())
    }
}

/// The full set of configured tiers, dispatched by [`TierKind`].
#[derive(Clone)]
pub struct TierSet {
    pub local: Arc<dyn TierClient>,
    pub cold: Arc<dyn TierClient>,
    pub bulk: Arc<dyn TierClient>,
}

impl TierSet {
    pub fn new(
        local: Arc<dyn TierClient>,
        cold: Arc<dyn TierClient>,
        bulk: Arc<dyn TierClient>,
    ) -> Self {
        Self { local, cold, bulk }
    }

    pub fn client(&self, kind: TierKind) -> &Arc<dyn TierClient> {
        match kind {
            TierKind::Local => &self.local,
            TierKind::Cold => &self.cold,
            TierKind::Bulk => &self.bulk,
        }
    }
}
