//! Metadata store: file and user-file records in SQLite.
//!
//! All writes use upsert-on-conflict so concurrent uploads of the same
//! content (assembly finishing while another owner fast-uploads, for
//! example) serialize on the database instead of racing in application
//! code.

use crate::models::file::{FileRecord, TierKind};
use crate::models::user_file::UserFileRecord;
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

/// Apply the embedded schema migration statement by statement.
///
/// The migration file only contains `IF NOT EXISTS` DDL, so this is safe to
/// run at every startup and against fresh in-memory test pools.
pub async fn run_migrations(db: &SqlitePool) -> sqlx::Result<()> {
    apply_statements(db, include_str!("../../migrations/0001_init.sql")).await
}

/// Execute a migration script statement by statement. Comment lines are
/// dropped before the split so a `;` inside a comment cannot produce a
/// bogus fragment.
async fn apply_statements(db: &SqlitePool, sql: &str) -> sqlx::Result<()> {
    let stripped: String = sql
        .lines()
        .filter(|line| !line.trim_start().starts_with("--"))
        .collect::<Vec<_>>()
        .join("\n");
    for stmt in stripped.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        sqlx::query(stmt).execute(db).await?;
    }
    Ok(())
}

#[derive(Clone)]
pub struct MetadataStore {
    pub db: Arc<SqlitePool>,
}

impl MetadataStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Insert or refresh the file record for a content hash.
    ///
    /// A second upload of identical bytes keeps the single row but may move
    /// the location pointer back to wherever the fresh copy landed;
    /// `created_at` is preserved.
    pub async fn upsert_file(&self, record: &FileRecord) -> sqlx::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO files (content_hash, size_bytes, tier, location, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(content_hash) DO UPDATE SET
                size_bytes = excluded.size_bytes,
                tier = excluded.tier,
                location = excluded.location
            "#,
        )
        .bind(&record.content_hash)
        .bind(record.size_bytes)
        .bind(record.tier)
        .bind(&record.location)
        .bind(record.created_at)
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    pub async fn get_file(&self, content_hash: &str) -> sqlx::Result<Option<FileRecord>> {
        sqlx::query_as::<_, FileRecord>(
            "SELECT content_hash, size_bytes, tier, location, created_at
             FROM files WHERE content_hash = ?",
        )
        .bind(content_hash)
        .fetch_optional(&*self.db)
        .await
    }

    /// Move the location pointer after a confirmed tier write. Returns
    /// false when no record exists for the hash.
    pub async fn update_location(
        &self,
        content_hash: &str,
        tier: TierKind,
        location: &str,
    ) -> sqlx::Result<bool> {
        let result = sqlx::query("UPDATE files SET tier = ?, location = ? WHERE content_hash = ?")
            .bind(tier)
            .bind(location)
            .bind(content_hash)
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Create or restore the owner's association with a content hash.
    ///
    /// Re-uploading (or fast-uploading) clears any tombstone and refreshes
    /// the visible file name.
    pub async fn upsert_user_file(
        &self,
        owner: &str,
        content_hash: &str,
        file_name: &str,
    ) -> sqlx::Result<UserFileRecord> {
        sqlx::query_as::<_, UserFileRecord>(
            r#"
            INSERT INTO user_files (id, owner, content_hash, file_name, uploaded_at, download_count, is_deleted)
            VALUES (?, ?, ?, ?, ?, 0, 0)
            ON CONFLICT(owner, content_hash) DO UPDATE SET
                file_name = excluded.file_name,
                uploaded_at = excluded.uploaded_at,
                is_deleted = 0
            RETURNING id, owner, content_hash, file_name, uploaded_at, download_count, is_deleted
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(owner)
        .bind(content_hash)
        .bind(file_name)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await
    }

    /// Look up the owner's live association with a content hash.
    pub async fn get_user_file(
        &self,
        owner: &str,
        content_hash: &str,
    ) -> sqlx::Result<Option<UserFileRecord>> {
        sqlx::query_as::<_, UserFileRecord>(
            "SELECT id, owner, content_hash, file_name, uploaded_at, download_count, is_deleted
             FROM user_files
             WHERE owner = ? AND content_hash = ? AND is_deleted = 0",
        )
        .bind(owner)
        .bind(content_hash)
        .fetch_optional(&*self.db)
        .await
    }

    /// Change the visible name of the owner's live association. Returns the
    /// updated row, or `None` when there is no live record to rename.
    pub async fn rename_user_file(
        &self,
        owner: &str,
        content_hash: &str,
        file_name: &str,
    ) -> sqlx::Result<Option<UserFileRecord>> {
        sqlx::query_as::<_, UserFileRecord>(
            r#"
            UPDATE user_files SET file_name = ?
            WHERE owner = ? AND content_hash = ? AND is_deleted = 0
            RETURNING id, owner, content_hash, file_name, uploaded_at, download_count, is_deleted
            "#,
        )
        .bind(file_name)
        .bind(owner)
        .bind(content_hash)
        .fetch_optional(&*self.db)
        .await
    }

    /// Tombstone the owner's association. Returns false when there is no
    /// live record to delete.
    pub async fn soft_delete_user_file(
        &self,
        owner: &str,
        content_hash: &str,
    ) -> sqlx::Result<bool> {
        let result = sqlx::query(
            "UPDATE user_files SET is_deleted = 1
             WHERE owner = ? AND content_hash = ? AND is_deleted = 0",
        )
        .bind(owner)
        .bind(content_hash)
        .execute(&*self.db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Live files for an owner, newest first.
    pub async fn list_user_files(
        &self,
        owner: &str,
        limit: u32,
    ) -> sqlx::Result<Vec<UserFileRecord>> {
        sqlx::query_as::<_, UserFileRecord>(
            "SELECT id, owner, content_hash, file_name, uploaded_at, download_count, is_deleted
             FROM user_files
             WHERE owner = ? AND is_deleted = 0
             ORDER BY uploaded_at DESC, id ASC
             LIMIT ?",
        )
        .bind(owner)
        .bind(limit as i64)
        .fetch_all(&*self.db)
        .await
    }

    /// Best-effort download counter; callers must not fail the download on
    /// error.
    pub async fn bump_download_count(&self, owner: &str, content_hash: &str) -> sqlx::Result<()> {
        sqlx::query(
            "UPDATE user_files SET download_count = download_count + 1
             WHERE owner = ? AND content_hash = ? AND is_deleted = 0",
        )
        .bind(owner)
        .bind(content_hash)
        .execute(&*self.db)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn store() -> MetadataStore {
        // One connection so every query sees the same in-memory database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        MetadataStore::new(Arc::new(pool))
    }

    fn hash(fill: char) -> String {
        fill.to_string().repeat(40)
    }

    #[tokio::test]
    async fn migrations_apply_and_rerun_cleanly() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        // The embedded schema is all IF NOT EXISTS DDL, so a second run is
        // a no-op rather than an error.
        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();
    }

    #[tokio::test]
    async fn statement_split_ignores_semicolons_in_comments() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        apply_statements(
            &pool,
            "-- a comment; with a semicolon\nCREATE TABLE t (x INTEGER);\n-- another; one\nINSERT INTO t VALUES (1);",
        )
        .await
        .unwrap();
        let x: i64 = sqlx::query_scalar("SELECT x FROM t")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(x, 1);
    }

    #[tokio::test]
    async fn upsert_file_keeps_single_row_per_hash() {
        let store = store().await;
        let h = hash('a');

        store
            .upsert_file(&FileRecord::new(&h, 10, TierKind::Local, &h))
            .await
            .unwrap();
        store
            .upsert_file(&FileRecord::new(&h, 10, TierKind::Cold, &h))
            .await
            .unwrap();

        let record = store.get_file(&h).await.unwrap().unwrap();
        assert_eq!(record.tier, TierKind::Cold);
        assert_eq!(record.size_bytes, 10);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files")
            .fetch_one(&*store.db)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn update_location_moves_pointer() {
        let store = store().await;
        let h = hash('b');
        store
            .upsert_file(&FileRecord::new(&h, 5, TierKind::Local, &h))
            .await
            .unwrap();

        assert!(store.update_location(&h, TierKind::Bulk, &h).await.unwrap());
        let record = store.get_file(&h).await.unwrap().unwrap();
        assert_eq!(record.tier, TierKind::Bulk);

        assert!(
            !store
                .update_location(&hash('c'), TierKind::Bulk, "x")
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn user_file_tombstone_and_restore() {
        let store = store().await;
        let h = hash('d');

        let record = store.upsert_user_file("alice", &h, "report.pdf").await.unwrap();
        assert!(!record.is_deleted);

        assert!(store.soft_delete_user_file("alice", &h).await.unwrap());
        assert!(!store.soft_delete_user_file("alice", &h).await.unwrap());
        assert!(store.list_user_files("alice", 10).await.unwrap().is_empty());

        // Re-upload restores the tombstoned row instead of duplicating it.
        let restored = store.upsert_user_file("alice", &h, "report-v2.pdf").await.unwrap();
        assert!(!restored.is_deleted);
        assert_eq!(restored.file_name, "report-v2.pdf");

        let files = store.list_user_files("alice", 10).await.unwrap();
        assert_eq!(files.len(), 1);
    }

    #[tokio::test]
    async fn rename_touches_live_rows_only() {
        let store = store().await;
        let h = hash('g');
        store.upsert_user_file("alice", &h, "draft.doc").await.unwrap();

        let renamed = store
            .rename_user_file("alice", &h, "final.doc")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(renamed.file_name, "final.doc");
        let fetched = store.get_user_file("alice", &h).await.unwrap().unwrap();
        assert_eq!(fetched.file_name, "final.doc");

        // Unknown hashes and tombstoned rows cannot be renamed.
        assert!(store.rename_user_file("alice", &hash('h'), "x").await.unwrap().is_none());
        store.soft_delete_user_file("alice", &h).await.unwrap();
        assert!(store.rename_user_file("alice", &h, "x").await.unwrap().is_none());
        assert!(store.get_user_file("alice", &h).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn two_owners_share_one_content_hash() {
        let store = store().await;
        let h = hash('e');

        store.upsert_user_file("alice", &h, "mine.bin").await.unwrap();
        store.upsert_user_file("bob", &h, "theirs.bin").await.unwrap();

        assert_eq!(store.list_user_files("alice", 10).await.unwrap().len(), 1);
        assert_eq!(store.list_user_files("bob", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn download_count_increments_for_live_rows_only() {
        let store = store().await;
        let h = hash('f');
        store.upsert_user_file("alice", &h, "a.bin").await.unwrap();

        store.bump_download_count("alice", &h).await.unwrap();
        store.bump_download_count("alice", &h).await.unwrap();
        let files = store.list_user_files("alice", 10).await.unwrap();
        assert_eq!(files[0].download_count, 2);

        store.soft_delete_user_file("alice", &h).await.unwrap();
        store.bump_download_count("alice", &h).await.unwrap();
        let count: i64 =
            sqlx::query_scalar("SELECT download_count FROM user_files WHERE owner = 'alice'")
                .fetch_one(&*store.db)
                .await
                .unwrap();
        assert_eq!(count, 2);
    }
}
