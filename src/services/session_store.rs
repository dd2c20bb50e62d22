//! Chunk-session tracking backed by a fast key-value store.
//!
//! The session store is the single source of truth for chunk-completion
//! state, so marking a chunk must be an atomic set-membership add. Sessions
//! carry a TTL so abandoned uploads do not leak entries forever. The store
//! also hands out short-lived per-hash markers used to dedup in-flight tier
//! transfers when several workers run.

use crate::models::session::{UploadSession, UploadStatus};
use async_trait::async_trait;
use redis::{AsyncCommands, aio::ConnectionManager};
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Redis hash field prefix for per-chunk completion flags.
const CHUNK_FIELD_PREFIX: &str = "chk_";

#[derive(Debug, Error)]
pub enum SessionStoreError {
    #[error("upload session not found")]
    NotFound,
    #[error("session store backend error: {0}")]
    Backend(String),
}

impl From<redis::RedisError> for SessionStoreError {
    fn from(err: redis::RedisError) -> Self {
        SessionStoreError::Backend(err.to_string())
    }
}

pub type SessionStoreResult<T> = Result<T, SessionStoreError>;

/// Key-value backed tracker of in-progress chunked uploads.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persist a new session. Chunk flags start empty.
    async fn create(&self, session: &UploadSession) -> SessionStoreResult<()>;

    /// Mark one chunk index complete. Idempotent: marking the same index
    /// twice leaves the completed count unchanged.
    async fn mark_chunk_complete(&self, session_id: &str, index: u32) -> SessionStoreResult<()>;

    /// Snapshot the session, or `NotFound` if it was completed, cancelled,
    /// or expired.
    async fn status(&self, session_id: &str) -> SessionStoreResult<UploadStatus>;

    /// Drop the session. Succeeds even if it is already gone.
    async fn delete(&self, session_id: &str) -> SessionStoreResult<()>;

    /// Claim the in-flight transfer marker for a content hash. Returns
    /// false when another worker already holds it.
    async fn try_lock_transfer(&self, content_hash: &str) -> SessionStoreResult<bool>;

    /// Release the in-flight transfer marker.
    async fn unlock_transfer(&self, content_hash: &str) -> SessionStoreResult<()>;
}

fn parse_field<T: std::str::FromStr>(
    fields: &HashMap<String, String>,
    name: &str,
) -> SessionStoreResult<T> {
    fields
        .get(name)
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| SessionStoreError::Backend(format!("corrupt session field `{name}`")))
}

/// Builds an [`UploadStatus`] out of the raw field map shared by both
/// backends: fixed metadata fields plus one `chk_<index>` flag per chunk.
fn status_from_fields(fields: &HashMap<String, String>) -> SessionStoreResult<UploadStatus> {
    let mut completed = BTreeSet::new();
    for (key, value) in fields {
        if let Some(index) = key.strip_prefix(CHUNK_FIELD_PREFIX) {
            if value == "1" {
                let index = index.parse().map_err(|_| {
                    SessionStoreError::Backend(format!("corrupt chunk flag `{key}`"))
                })?;
                completed.insert(index);
            }
        }
    }
    Ok(UploadStatus {
        content_hash: fields.get("content_hash").cloned().unwrap_or_default(),
        declared_size: parse_field(fields, "declared_size")?,
        chunk_size: parse_field(fields, "chunk_size")?,
        chunk_count: parse_field(fields, "chunk_count")?,
        completed,
    })
}

fn session_fields(session: &UploadSession) -> Vec<(String, String)> {
    vec![
        ("owner".into(), session.owner.clone()),
        ("content_hash".into(), session.content_hash.clone()),
        ("declared_size".into(), session.declared_size.to_string()),
        ("chunk_size".into(), session.chunk_size.to_string()),
        ("chunk_count".into(), session.chunk_count().to_string()),
    ]
}

/// Production session store on Redis: one hash per session with native TTL,
/// `SET NX EX` for transfer markers.
#[derive(Clone)]
pub struct RedisSessionStore {
    conn: ConnectionManager,
    session_ttl: Duration,
    lock_ttl: Duration,
}

impl RedisSessionStore {
    pub async fn connect(
        url: &str,
        session_ttl: Duration,
        lock_ttl: Duration,
    ) -> SessionStoreResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self {
            conn,
            session_ttl,
            lock_ttl,
        })
    }

    fn session_key(session_id: &str) -> String {
        format!("mpu:{session_id}")
    }

    fn lock_key(content_hash: &str) -> String {
        format!("transfer-lock:{content_hash}")
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn create(&self, session: &UploadSession) -> SessionStoreResult<()> {
        let key = Self::session_key(&session.id);
        let mut conn = self.conn.clone();
        let fields = session_fields(session);
        let _: () = conn.hset_multiple(&key, &fields).await?;
        let _: () = conn.expire(&key, self.session_ttl.as_secs() as i64).await?;
        Ok(())
    }

    async fn mark_chunk_complete(&self, session_id: &str, index: u32) -> SessionStoreResult<()> {
        let key = Self::session_key(session_id);
        let mut conn = self.conn.clone();
        // Guard against resurrecting a cancelled/expired session as a stray
        // hash holding only chunk flags.
        let exists: bool = conn.exists(&key).await?;
        if !exists {
            return Err(SessionStoreError::NotFound);
        }
        let _: () = conn
            .hset(&key, format!("{CHUNK_FIELD_PREFIX}{index}"), 1u8)
            .await?;
        let _: () = conn.expire(&key, self.session_ttl.as_secs() as i64).await?;
        Ok(())
    }

    async fn status(&self, session_id: &str) -> SessionStoreResult<UploadStatus> {
        let key = Self::session_key(session_id);
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn.hgetall(&key).await?;
        if fields.is_empty() {
            return Err(SessionStoreError::NotFound);
        }
        status_from_fields(&fields)
    }

    async fn delete(&self, session_id: &str) -> SessionStoreResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(Self::session_key(session_id)).await?;
        Ok(())
    }

    async fn try_lock_transfer(&self, content_hash: &str) -> SessionStoreResult<bool> {
        let mut conn = self.conn.clone();
        let acquired: Option<String> = redis::cmd("SET")
            .arg(Self::lock_key(content_hash))
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(self.lock_ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(acquired.is_some())
    }

    async fn unlock_transfer(&self, content_hash: &str) -> SessionStoreResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(Self::lock_key(content_hash)).await?;
        Ok(())
    }
}

struct MemoryEntry {
    expires_at: Instant,
    fields: HashMap<String, String>,
}

/// In-process session store for tests and single-node deployments without
/// Redis. TTLs are enforced lazily on access.
pub struct MemorySessionStore {
    session_ttl: Duration,
    sessions: Mutex<HashMap<String, MemoryEntry>>,
    locks: Mutex<HashMap<String, Instant>>,
    lock_ttl: Duration,
}

impl MemorySessionStore {
    pub fn new(session_ttl: Duration, lock_ttl: Duration) -> Self {
        Self {
            session_ttl,
            sessions: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
            lock_ttl,
        }
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, session: &UploadSession) -> SessionStoreResult<()> {
        let mut sessions = self.sessions.lock().expect("session map poisoned");
        sessions.insert(
            session.id.clone(),
            MemoryEntry {
                expires_at: Instant::now() + self.session_ttl,
                fields: session_fields(session).into_iter().collect(),
            },
        );
        Ok(())
    }

    async fn mark_chunk_complete(&self, session_id: &str, index: u32) -> SessionStoreResult<()> {
        let mut sessions = self.sessions.lock().expect("session map poisoned");
        let now = Instant::now();
        sessions.retain(|_, entry| entry.expires_at > now);
        let entry = sessions
            .get_mut(session_id)
            .ok_or(SessionStoreError::NotFound)?;
        entry
            .fields
            .insert(format!("{CHUNK_FIELD_PREFIX}{index}"), "1".into());
        entry.expires_at = now + self.session_ttl;
        Ok(())
    }

    async fn status(&self, session_id: &str) -> SessionStoreResult<UploadStatus> {
        let mut sessions = self.sessions.lock().expect("session map poisoned");
        let now = Instant::now();
        sessions.retain(|_, entry| entry.expires_at > now);
        let entry = sessions.get(session_id).ok_or(SessionStoreError::NotFound)?;
        status_from_fields(&entry.fields)
    }

    async fn delete(&self, session_id: &str) -> SessionStoreResult<()> {
        self.sessions
            .lock()
            .expect("session map poisoned")
            .remove(session_id);
        Ok(())
    }

    async fn try_lock_transfer(&self, content_hash: &str) -> SessionStoreResult<bool> {
        let mut locks = self.locks.lock().expect("lock map poisoned");
        let now = Instant::now();
        locks.retain(|_, deadline| *deadline > now);
        if locks.contains_key(content_hash) {
            return Ok(false);
        }
        locks.insert(content_hash.to_string(), now + self.lock_ttl);
        Ok(true)
    }

    async fn unlock_transfer(&self, content_hash: &str) -> SessionStoreResult<()> {
        self.locks
            .lock()
            .expect("lock map poisoned")
            .remove(content_hash);
        Ok(())
    }
}
