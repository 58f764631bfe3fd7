// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQL revision log, sharing the catalog store's pool.
//!
//! ```sql
//! CREATE TABLE catalog_revisions (
//!   object_type, revision, created_at, diff TEXT DEFAULT '{}', parent NULL, revoked,
//!   PRIMARY KEY (object_type, revision)
//! );
//! CREATE TABLE catalog_snapshots (object_type, revision, created_at, data TEXT,
//!   PRIMARY KEY (object_type, revision));
//! ```

use async_trait::async_trait;
use sqlx::any::AnyRow;
use sqlx::{AnyPool, Row};
use tracing::{info, warn};

use super::{Revision, RevisionLog};
use crate::catalog::{CatalogSnapshot, ObjectType};
use crate::diff::FullDiffData;
use crate::metrics;
use crate::resilience::retry::{retry, RetryConfig};
use crate::storage::now_millis;
use crate::storage::sql::get_text;
use crate::storage::traits::StorageError;

pub struct SqlRevisionLog {
    pool: AnyPool,
    is_sqlite: bool,
}

fn to_u64(value: i64) -> u64 {
    value.max(0) as u64
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn decode_revision(row: &AnyRow) -> Result<Revision, StorageError> {
    let revision: i64 = row.try_get("revision")?;
    let created_at: i64 = row.try_get("created_at")?;
    let parent: Option<i64> = row.try_get("parent")?;
    let revoked: i64 = row.try_get("revoked")?;
    let diff: FullDiffData = serde_json::from_str(&get_text(row, "diff")?)?;
    Ok(Revision {
        revision: to_u64(revision),
        created_at,
        diff,
        parent: parent.map(to_u64),
        revoked: revoked != 0,
    })
}

impl SqlRevisionLog {
    /// Build on an existing pool (normally `SqlCatalogStore::pool()`) and
    /// create the revision tables.
    pub async fn new(pool: AnyPool, is_sqlite: bool) -> Result<Self, StorageError> {
        let log = Self { pool, is_sqlite };
        log.init_schema().await?;
        Ok(log)
    }

    async fn init_schema(&self) -> Result<(), StorageError> {
        let statements: [&str; 2] = if self.is_sqlite {
            [
                r#"
                CREATE TABLE IF NOT EXISTS catalog_revisions (
                    object_type TEXT NOT NULL,
                    revision INTEGER NOT NULL,
                    created_at INTEGER NOT NULL,
                    diff TEXT NOT NULL DEFAULT '{}',
                    parent INTEGER,
                    revoked INTEGER NOT NULL DEFAULT 0,
                    PRIMARY KEY (object_type, revision)
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS catalog_snapshots (
                    object_type TEXT NOT NULL,
                    revision INTEGER NOT NULL,
                    created_at INTEGER NOT NULL,
                    data TEXT NOT NULL,
                    PRIMARY KEY (object_type, revision)
                )
                "#,
            ]
        } else {
            [
                r#"
                CREATE TABLE IF NOT EXISTS catalog_revisions (
                    object_type VARCHAR(64) NOT NULL,
                    revision BIGINT NOT NULL,
                    created_at BIGINT NOT NULL,
                    diff LONGTEXT NOT NULL DEFAULT ('{}'),
                    parent BIGINT NULL,
                    revoked BIGINT NOT NULL DEFAULT 0,
                    PRIMARY KEY (object_type, revision)
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS catalog_snapshots (
                    object_type VARCHAR(64) NOT NULL,
                    revision BIGINT NOT NULL,
                    created_at BIGINT NOT NULL,
                    data LONGTEXT NOT NULL,
                    PRIMARY KEY (object_type, revision)
                )
                "#,
            ]
        };

        for sql in statements {
            retry("sql_init_revisions", &RetryConfig::startup(), || async {
                sqlx::query(sql)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| StorageError::Backend(e.to_string()))
            })
            .await?;
        }
        Ok(())
    }

    async fn max_revision(&self, object_type: &ObjectType, live_only: bool) -> Result<Option<u64>, StorageError> {
        let sql = if live_only {
            "SELECT MAX(revision) AS head FROM catalog_revisions WHERE object_type = ? AND revoked = 0"
        } else {
            "SELECT MAX(revision) AS head FROM catalog_revisions WHERE object_type = ?"
        };
        let row = sqlx::query(sql)
            .bind(object_type.as_str().to_string())
            .fetch_one(&self.pool)
            .await?;
        let head: Option<i64> = row.try_get("head")?;
        Ok(head.map(to_u64))
    }
}

#[async_trait]
impl RevisionLog for SqlRevisionLog {
    async fn latest(&self, object_type: &ObjectType) -> Result<Option<u64>, StorageError> {
        self.max_revision(object_type, false).await
    }

    async fn head(&self, object_type: &ObjectType) -> Result<Option<u64>, StorageError> {
        self.max_revision(object_type, true).await
    }

    async fn append(
        &self,
        object_type: &ObjectType,
        diff: FullDiffData,
    ) -> Result<Revision, StorageError> {
        let encoded = serde_json::to_string(&diff)?;
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT MAX(revision) AS latest, \
             MAX(CASE WHEN revoked = 0 THEN revision END) AS head \
             FROM catalog_revisions WHERE object_type = ?",
        )
        .bind(object_type.as_str().to_string())
        .fetch_one(&mut *tx)
        .await?;
        let latest: Option<i64> = row.try_get("latest")?;
        let head: Option<i64> = row.try_get("head")?;

        let revision = Revision {
            revision: latest.map_or(1, |n| to_u64(n) + 1),
            created_at: now_millis(),
            diff,
            parent: head.map(to_u64),
            revoked: false,
        };

        sqlx::query(
            "INSERT INTO catalog_revisions (object_type, revision, created_at, diff, parent, revoked) \
             VALUES (?, ?, ?, ?, ?, 0)",
        )
        .bind(object_type.as_str().to_string())
        .bind(to_i64(revision.revision))
        .bind(revision.created_at)
        .bind(encoded)
        .bind(revision.parent.map(to_i64))
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        metrics::record_revision(object_type.as_str(), revision.revision);
        info!(
            %object_type,
            revision = revision.revision,
            summary = %revision.diff.summarize(),
            "Appended revision"
        );
        Ok(revision)
    }

    async fn revisions(
        &self,
        object_type: &ObjectType,
        after: u64,
        up_to: Option<u64>,
    ) -> Result<Vec<Revision>, StorageError> {
        let rows = sqlx::query(
            "SELECT revision, created_at, diff, parent, revoked FROM catalog_revisions \
             WHERE object_type = ? AND revision > ? AND revision <= ? ORDER BY revision",
        )
        .bind(object_type.as_str().to_string())
        .bind(to_i64(after))
        .bind(to_i64(up_to.unwrap_or(u64::MAX)))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(decode_revision).collect()
    }

    async fn revoke(&self, object_type: &ObjectType, revision: u64) -> Result<bool, StorageError> {
        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query(
            "UPDATE catalog_revisions SET revoked = 1 \
             WHERE object_type = ? AND revision = ? AND revoked = 0",
        )
        .bind(object_type.as_str().to_string())
        .bind(to_i64(revision))
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if updated == 0 {
            return Ok(false);
        }
        let dropped = sqlx::query(
            "DELETE FROM catalog_snapshots WHERE object_type = ? AND revision >= ?",
        )
        .bind(object_type.as_str().to_string())
        .bind(to_i64(revision))
        .execute(&mut *tx)
        .await?
        .rows_affected();
        tx.commit().await?;

        warn!(%object_type, revision, dropped_snapshots = dropped, "Revoked revision");
        Ok(true)
    }

    async fn cached_snapshot(
        &self,
        object_type: &ObjectType,
        at_or_below: u64,
    ) -> Result<Option<(u64, CatalogSnapshot)>, StorageError> {
        let row = sqlx::query(
            "SELECT revision, data FROM catalog_snapshots \
             WHERE object_type = ? AND revision <= ? ORDER BY revision DESC LIMIT 1",
        )
        .bind(object_type.as_str().to_string())
        .bind(to_i64(at_or_below))
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => {
                let revision: i64 = row.try_get("revision")?;
                let snapshot: CatalogSnapshot = serde_json::from_str(&get_text(&row, "data")?)?;
                Ok(Some((to_u64(revision), snapshot)))
            }
            None => Ok(None),
        }
    }

    async fn put_snapshot(
        &self,
        object_type: &ObjectType,
        revision: u64,
        snapshot: &CatalogSnapshot,
    ) -> Result<(), StorageError> {
        let encoded = serde_json::to_string(snapshot)?;
        let sql = if self.is_sqlite {
            "INSERT INTO catalog_snapshots (object_type, revision, created_at, data) VALUES (?, ?, ?, ?) \
             ON CONFLICT(object_type, revision) DO UPDATE SET data = excluded.data, created_at = excluded.created_at"
        } else {
            "INSERT INTO catalog_snapshots (object_type, revision, created_at, data) VALUES (?, ?, ?, ?) \
             ON DUPLICATE KEY UPDATE data = VALUES(data), created_at = VALUES(created_at)"
        };
        sqlx::query(sql)
            .bind(object_type.as_str().to_string())
            .bind(to_i64(revision))
            .bind(now_millis())
            .bind(encoded)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::revision::test_support::{add_compound, add_frequency, remove_compound};
    use crate::storage::sql::SqlCatalogStore;
    use std::path::PathBuf;

    async fn open(name: &str) -> (SqlRevisionLog, PathBuf) {
        let path = std::env::temp_dir().join(format!(
            "catalog_revisions_test_{}_{}.db",
            name,
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        let url = format!("sqlite://{}?mode=rwc", path.display());
        let store = SqlCatalogStore::new(&url, 2).await.unwrap();
        (SqlRevisionLog::new(store.pool(), true).await.unwrap(), path)
    }

    #[tokio::test]
    async fn test_append_numbers_and_parents() {
        let (log, path) = open("append").await;
        let ot = ObjectType::default();
        assert_eq!(log.latest(&ot).await.unwrap(), None);

        let first = log.append(&ot, add_compound("t=a", 24)).await.unwrap();
        let second = log.append(&ot, add_frequency("daily", 24)).await.unwrap();
        assert_eq!((first.revision, first.parent), (1, None));
        assert_eq!((second.revision, second.parent), (2, Some(1)));

        let stored = log.revisions(&ot, 0, None).await.unwrap();
        assert_eq!(stored, vec![first, second]);

        // Object types are independent chains
        assert_eq!(log.head(&ObjectType::new("other")).await.unwrap(), None);

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_snapshot_at_uses_and_fills_cache() {
        let (log, path) = open("snapshot").await;
        let ot = ObjectType::default();
        log.append(&ot, add_compound("t=a", 24)).await.unwrap();
        log.append(&ot, add_compound("t=b", 48)).await.unwrap();
        log.append(&ot, remove_compound("t=a", 24)).await.unwrap();

        let at_two = log.snapshot_at(&ot, 2).await.unwrap();
        assert_eq!(at_two.compounds.len(), 2);
        assert_eq!(log.cached_snapshot(&ot, 2).await.unwrap().unwrap().0, 2);

        let (head, snapshot) = log.head_snapshot(&ot).await.unwrap().unwrap();
        assert_eq!(head, 3);
        let names: Vec<String> = snapshot.compounds.keys().map(ToString::to_string).collect();
        assert_eq!(names, vec!["t=b"]);

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_revoke_skips_revision_and_drops_later_snapshots() {
        let (log, path) = open("revoke").await;
        let ot = ObjectType::default();
        log.append(&ot, add_compound("t=a", 24)).await.unwrap();
        log.append(&ot, add_frequency("daily", 24)).await.unwrap();
        log.snapshot_at(&ot, 2).await.unwrap();

        assert!(log.revoke(&ot, 2).await.unwrap());
        assert!(!log.revoke(&ot, 2).await.unwrap());
        assert!(!log.revoke(&ot, 9).await.unwrap());

        assert_eq!(log.cached_snapshot(&ot, u64::MAX).await.unwrap(), None);
        assert_eq!(log.head(&ot).await.unwrap(), Some(1));
        assert_eq!(log.latest(&ot).await.unwrap(), Some(2));

        let next = log.append(&ot, add_frequency("weekly", 168)).await.unwrap();
        assert_eq!((next.revision, next.parent), (3, Some(1)));

        let snapshot = log.snapshot_at(&ot, 3).await.unwrap();
        assert_eq!(snapshot.frequencies.len(), 1);
        assert!(snapshot.frequencies.keys().all(|name| name.as_str() == "weekly"));

        let _ = std::fs::remove_file(&path);
    }
}
