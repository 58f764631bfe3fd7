// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQL backing store for the three catalogs.
//!
//! Works against SQLite or MySQL through sqlx's `Any` driver. Every mutation
//! runs inside one transaction; rows are compared before writing so callers
//! learn whether anything actually changed.
//!
//! Schema:
//! ```sql
//! CREATE TABLE compounds (
//!   base VARCHAR(255), variant VARCHAR(255),
//!   half_life_ms BIGINT, pct_active DOUBLE, note TEXT,
//!   created_at BIGINT, updated_at BIGINT,
//!   PRIMARY KEY (base, variant)
//! );
//! CREATE TABLE blends      (name PRIMARY KEY, components TEXT, created_at, updated_at);
//! CREATE TABLE frequencies (name PRIMARY KEY, intervals TEXT, created_at, updated_at);
//! ```
//!
//! Blend components and frequency intervals are JSON in TEXT columns (the
//! `Any` driver has no JSON type mapping).
//!
//! ## sqlx Any Driver Quirks
//!
//! MySQL TEXT columns come back as BLOB through `Any`, so text is read as
//! `String` first and then as UTF-8 bytes.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Once;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{Any, AnyPool, Row, Transaction};
use tracing::{debug, info};

use super::now_millis;
use super::traits::{CatalogEntries, CatalogStore, DeleteRequest, DeleteTarget, StorageError};
use crate::catalog::{
    BlendName, BlendValue, Catalog, CompoundBase, CompoundInfo, CompoundName, CompoundPatch,
    FrequencyName, FrequencyValue,
};
use crate::metrics::{self, LatencyTimer};
use crate::resilience::retry::{retry, RetryConfig};

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

pub(crate) fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

/// Keeps IN / OR clauses well under parameter limits.
const CHUNK_SIZE: usize = 200;

/// (table, JSON value column) of the name-keyed catalogs.
const BLEND_COLUMNS: (&str, &str) = ("blends", "components");
const FREQUENCY_COLUMNS: (&str, &str) = ("frequencies", "intervals");

pub struct SqlCatalogStore {
    pool: AnyPool,
    is_sqlite: bool,
}

/// Read a TEXT column as String (SQLite) or UTF-8 bytes (MySQL via `Any`).
pub(crate) fn get_text(row: &AnyRow, column: &str) -> Result<String, StorageError> {
    if let Ok(s) = row.try_get::<String, _>(column) {
        return Ok(s);
    }
    let bytes: Vec<u8> = row.try_get(column)?;
    String::from_utf8(bytes).map_err(|e| StorageError::Codec(e.to_string()))
}

fn decode_compound_name(row: &AnyRow) -> Result<CompoundName, StorageError> {
    let base = CompoundBase::new(get_text(row, "base")?)
        .map_err(|e| StorageError::Codec(format!("stored compound base: {e}")))?;
    Ok(CompoundName::new(base, get_text(row, "variant")?))
}

fn decode_compound_info(row: &AnyRow) -> Result<CompoundInfo, StorageError> {
    let half_life_ms: i64 = row.try_get("half_life_ms")?;
    let pct_active: f64 = row.try_get("pct_active")?;
    let note = get_text(row, "note")?;
    CompoundInfo::new(
        Duration::from_millis(half_life_ms.max(0) as u64),
        pct_active,
        note,
    )
    .map_err(|e| StorageError::Codec(format!("stored compound: {e}")))
}

fn decode_name<N: std::str::FromStr<Err = crate::catalog::ValidationError>>(
    row: &AnyRow,
) -> Result<N, StorageError> {
    get_text(row, "name")?
        .parse()
        .map_err(|e| StorageError::Codec(format!("stored name: {e}")))
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// `(base = ? AND variant = ?) OR base = ? ...` for a chunk of compound names.
fn compound_filter(chunk: &[&CompoundName]) -> String {
    chunk
        .iter()
        .map(|name| {
            if name.selects_all_variants() {
                "base = ?"
            } else {
                "(base = ? AND variant = ?)"
            }
        })
        .collect::<Vec<_>>()
        .join(" OR ")
}

fn bind_compound_filter<'q>(
    mut query: sqlx::query::Query<'q, Any, sqlx::any::AnyArguments<'q>>,
    chunk: &[&CompoundName],
) -> sqlx::query::Query<'q, Any, sqlx::any::AnyArguments<'q>> {
    for name in chunk {
        query = query.bind(name.base().as_str().to_string());
        if !name.selects_all_variants() {
            query = query.bind(name.variant().to_string());
        }
    }
    query
}

impl SqlCatalogStore {
    /// Connect with startup-mode retry (fails fast if config is wrong) and
    /// create the catalog tables.
    pub async fn new(connection_string: &str, max_connections: u32) -> Result<Self, StorageError> {
        install_drivers();

        let is_sqlite = connection_string.starts_with("sqlite:");

        let pool = retry("sql_connect", &RetryConfig::startup(), || async {
            AnyPoolOptions::new()
                .max_connections(max_connections)
                .acquire_timeout(Duration::from_secs(10))
                .idle_timeout(Duration::from_secs(300))
                .connect(connection_string)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))
        })
        .await?;

        let store = Self::from_pool(pool, is_sqlite);
        if is_sqlite {
            store.enable_wal_mode().await?;
        }
        store.init_schema().await?;
        info!(sqlite = is_sqlite, "Catalog store ready");
        Ok(store)
    }

    /// Wrap an existing pool. The schema must already exist.
    #[must_use]
    pub fn from_pool(pool: AnyPool, is_sqlite: bool) -> Self {
        Self { pool, is_sqlite }
    }

    /// Get a clone of the connection pool for sharing with the revision log.
    #[must_use]
    pub fn pool(&self) -> AnyPool {
        self.pool.clone()
    }

    #[must_use]
    pub fn is_sqlite(&self) -> bool {
        self.is_sqlite
    }

    async fn enable_wal_mode(&self) -> Result<(), StorageError> {
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to enable WAL mode: {}", e)))?;
        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to set synchronous mode: {}", e)))?;
        Ok(())
    }

    async fn init_schema(&self) -> Result<(), StorageError> {
        let statements: [&str; 3] = if self.is_sqlite {
            [
                r#"
                CREATE TABLE IF NOT EXISTS compounds (
                    base TEXT NOT NULL,
                    variant TEXT NOT NULL DEFAULT '',
                    half_life_ms INTEGER NOT NULL,
                    pct_active REAL NOT NULL DEFAULT 1.0,
                    note TEXT NOT NULL DEFAULT '',
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL,
                    PRIMARY KEY (base, variant)
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS blends (
                    name TEXT PRIMARY KEY,
                    components TEXT NOT NULL,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS frequencies (
                    name TEXT PRIMARY KEY,
                    intervals TEXT NOT NULL,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL
                )
                "#,
            ]
        } else {
            [
                r#"
                CREATE TABLE IF NOT EXISTS compounds (
                    base VARCHAR(255) NOT NULL,
                    variant VARCHAR(255) NOT NULL DEFAULT '',
                    half_life_ms BIGINT NOT NULL,
                    pct_active DOUBLE NOT NULL DEFAULT 1.0,
                    note TEXT NOT NULL,
                    created_at BIGINT NOT NULL,
                    updated_at BIGINT NOT NULL,
                    PRIMARY KEY (base, variant),
                    INDEX idx_compounds_updated_at (updated_at)
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS blends (
                    name VARCHAR(255) PRIMARY KEY,
                    components TEXT NOT NULL,
                    created_at BIGINT NOT NULL,
                    updated_at BIGINT NOT NULL,
                    INDEX idx_blends_updated_at (updated_at)
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS frequencies (
                    name VARCHAR(255) PRIMARY KEY,
                    intervals TEXT NOT NULL,
                    created_at BIGINT NOT NULL,
                    updated_at BIGINT NOT NULL,
                    INDEX idx_frequencies_updated_at (updated_at)
                )
                "#,
            ]
        };

        for sql in statements {
            retry("sql_init_schema", &RetryConfig::startup(), || async {
                sqlx::query(sql)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| StorageError::Backend(e.to_string()))
            })
            .await?;
        }
        Ok(())
    }

    /// Row-lock suffix for read-modify-write selects. SQLite locks the whole
    /// database on the first write instead.
    fn lock_clause(&self) -> &'static str {
        if self.is_sqlite {
            ""
        } else {
            " FOR UPDATE"
        }
    }

    async fn put_compound_tx(
        &self,
        tx: &mut Transaction<'static, Any>,
        name: &CompoundName,
        info: &CompoundInfo,
        now: i64,
    ) -> Result<bool, StorageError> {
        let select = format!(
            "SELECT half_life_ms, pct_active, note FROM compounds WHERE base = ? AND variant = ?{}",
            self.lock_clause()
        );
        let existing = sqlx::query(&select)
            .bind(name.base().as_str().to_string())
            .bind(name.variant().to_string())
            .fetch_optional(&mut **tx)
            .await?;

        let existing = match existing {
            Some(row) => Some(decode_compound_info(&row)?),
            None => None,
        };

        let half_life_ms = i64::try_from(info.half_life().as_millis()).unwrap_or(i64::MAX);
        match existing {
            Some(current) if current == *info => Ok(false),
            Some(_) => {
                sqlx::query(
                    "UPDATE compounds SET half_life_ms = ?, pct_active = ?, note = ?, updated_at = ? \
                     WHERE base = ? AND variant = ?",
                )
                .bind(half_life_ms)
                .bind(info.pct_active())
                .bind(info.note().to_string())
                .bind(now)
                .bind(name.base().as_str().to_string())
                .bind(name.variant().to_string())
                .execute(&mut **tx)
                .await?;
                Ok(true)
            }
            None => {
                sqlx::query(
                    "INSERT INTO compounds (base, variant, half_life_ms, pct_active, note, created_at, updated_at) \
                     VALUES (?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(name.base().as_str().to_string())
                .bind(name.variant().to_string())
                .bind(half_life_ms)
                .bind(info.pct_active())
                .bind(info.note().to_string())
                .bind(now)
                .bind(now)
                .execute(&mut **tx)
                .await?;
                Ok(true)
            }
        }
    }

    /// Upsert a JSON-encoded value into a `name`-keyed table.
    async fn put_named_tx(
        &self,
        tx: &mut Transaction<'static, Any>,
        (table, column): (&str, &str),
        name: &str,
        encoded: String,
        now: i64,
    ) -> Result<bool, StorageError> {
        let select = format!(
            "SELECT {column} FROM {table} WHERE name = ?{}",
            self.lock_clause()
        );
        let existing = sqlx::query(&select)
            .bind(name.to_string())
            .fetch_optional(&mut **tx)
            .await?;

        match existing {
            Some(row) => {
                // Compare decoded JSON so formatting differences don't count
                let stored: serde_json::Value = serde_json::from_str(&get_text(&row, column)?)?;
                let incoming: serde_json::Value = serde_json::from_str(&encoded)?;
                if stored == incoming {
                    return Ok(false);
                }
                let update = format!("UPDATE {table} SET {column} = ?, updated_at = ? WHERE name = ?");
                sqlx::query(&update)
                    .bind(encoded)
                    .bind(now)
                    .bind(name.to_string())
                    .execute(&mut **tx)
                    .await?;
            }
            None => {
                let insert = format!(
                    "INSERT INTO {table} (name, {column}, created_at, updated_at) VALUES (?, ?, ?, ?)"
                );
                sqlx::query(&insert)
                    .bind(name.to_string())
                    .bind(encoded)
                    .bind(now)
                    .bind(now)
                    .execute(&mut **tx)
                    .await?;
            }
        }
        Ok(true)
    }

    async fn delete_compounds_tx(
        &self,
        tx: &mut Transaction<'static, Any>,
        target: &DeleteTarget<CompoundName>,
    ) -> Result<u64, StorageError> {
        match target {
            DeleteTarget::None => Ok(0),
            DeleteTarget::All => Ok(sqlx::query("DELETE FROM compounds")
                .execute(&mut **tx)
                .await?
                .rows_affected()),
            DeleteTarget::Subset(names) => {
                let names: Vec<&CompoundName> = names.iter().collect();
                let mut removed = 0;
                for chunk in names.chunks(CHUNK_SIZE) {
                    let sql = format!("DELETE FROM compounds WHERE {}", compound_filter(chunk));
                    removed += bind_compound_filter(sqlx::query(&sql), chunk)
                        .execute(&mut **tx)
                        .await?
                        .rows_affected();
                }
                Ok(removed)
            }
        }
    }

    async fn delete_named_tx<K: std::fmt::Display>(
        &self,
        tx: &mut Transaction<'static, Any>,
        table: &str,
        target: &DeleteTarget<K>,
    ) -> Result<u64, StorageError> {
        match target {
            DeleteTarget::None => Ok(0),
            DeleteTarget::All => {
                let sql = format!("DELETE FROM {table}");
                Ok(sqlx::query(&sql).execute(&mut **tx).await?.rows_affected())
            }
            DeleteTarget::Subset(names) => {
                let names: Vec<String> = names.iter().map(ToString::to_string).collect();
                let mut removed = 0;
                for chunk in names.chunks(CHUNK_SIZE) {
                    let sql = format!(
                        "DELETE FROM {table} WHERE name IN ({})",
                        placeholders(chunk.len())
                    );
                    let mut query = sqlx::query(&sql);
                    for name in chunk {
                        query = query.bind(name.clone());
                    }
                    removed += query.execute(&mut **tx).await?.rows_affected();
                }
                Ok(removed)
            }
        }
    }

    async fn names_in<N>(&self, table: &str, since_ms: Option<i64>) -> Result<BTreeSet<N>, StorageError>
    where
        N: Ord + std::str::FromStr<Err = crate::catalog::ValidationError>,
    {
        let rows = match since_ms {
            Some(since) => {
                let sql = format!("SELECT name FROM {table} WHERE updated_at >= ? ORDER BY name");
                sqlx::query(&sql).bind(since).fetch_all(&self.pool).await?
            }
            None => {
                let sql = format!("SELECT name FROM {table} ORDER BY name");
                sqlx::query(&sql).fetch_all(&self.pool).await?
            }
        };
        rows.iter().map(decode_name).collect()
    }

    async fn values_in<N, V>(
        &self,
        (table, column): (&str, &str),
        names: &BTreeSet<N>,
    ) -> Result<BTreeMap<N, V>, StorageError>
    where
        N: Ord + std::fmt::Display + std::str::FromStr<Err = crate::catalog::ValidationError>,
        V: serde::de::DeserializeOwned,
    {
        let names: Vec<String> = names.iter().map(ToString::to_string).collect();
        let mut out = BTreeMap::new();
        for chunk in names.chunks(CHUNK_SIZE) {
            let sql = format!(
                "SELECT name, {column} FROM {table} WHERE name IN ({})",
                placeholders(chunk.len())
            );
            let mut query = sqlx::query(&sql);
            for name in chunk {
                query = query.bind(name.clone());
            }
            for row in query.fetch_all(&self.pool).await? {
                let value: V = serde_json::from_str(&get_text(&row, column)?)?;
                out.insert(decode_name(&row)?, value);
            }
        }
        Ok(out)
    }

    async fn compound_names_where(
        &self,
        since_ms: Option<i64>,
    ) -> Result<BTreeSet<CompoundName>, StorageError> {
        let rows = match since_ms {
            Some(since) => {
                sqlx::query(
                    "SELECT base, variant FROM compounds WHERE updated_at >= ? ORDER BY base, variant",
                )
                .bind(since)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query("SELECT base, variant FROM compounds ORDER BY base, variant")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.iter().map(decode_compound_name).collect()
    }
}

fn record<T>(operation: &str, result: &Result<T, StorageError>) {
    let status = if result.is_ok() { "success" } else { "error" };
    metrics::record_store_operation("sql", operation, status);
}

#[async_trait]
impl CatalogStore for SqlCatalogStore {
    async fn compound_names(&self) -> Result<BTreeSet<CompoundName>, StorageError> {
        let _timer = LatencyTimer::new("sql", "compound_names");
        self.compound_names_where(None).await
    }

    async fn blend_names(&self) -> Result<BTreeSet<BlendName>, StorageError> {
        let _timer = LatencyTimer::new("sql", "blend_names");
        self.names_in("blends", None).await
    }

    async fn frequency_names(&self) -> Result<BTreeSet<FrequencyName>, StorageError> {
        let _timer = LatencyTimer::new("sql", "frequency_names");
        self.names_in("frequencies", None).await
    }

    async fn compounds(
        &self,
        names: &BTreeSet<CompoundName>,
    ) -> Result<BTreeMap<CompoundName, CompoundInfo>, StorageError> {
        let _timer = LatencyTimer::new("sql", "compounds");
        let names: Vec<&CompoundName> = names.iter().collect();
        let mut out = BTreeMap::new();
        for chunk in names.chunks(CHUNK_SIZE) {
            let sql = format!(
                "SELECT base, variant, half_life_ms, pct_active, note FROM compounds WHERE {}",
                compound_filter(chunk)
            );
            let rows = bind_compound_filter(sqlx::query(&sql), chunk)
                .fetch_all(&self.pool)
                .await?;
            for row in rows {
                out.insert(decode_compound_name(&row)?, decode_compound_info(&row)?);
            }
        }
        Ok(out)
    }

    async fn blends(
        &self,
        names: &BTreeSet<BlendName>,
    ) -> Result<BTreeMap<BlendName, BlendValue>, StorageError> {
        let _timer = LatencyTimer::new("sql", "blends");
        self.values_in(BLEND_COLUMNS, names).await
    }

    async fn frequencies(
        &self,
        names: &BTreeSet<FrequencyName>,
    ) -> Result<BTreeMap<FrequencyName, FrequencyValue>, StorageError> {
        let _timer = LatencyTimer::new("sql", "frequencies");
        self.values_in(FREQUENCY_COLUMNS, names).await
    }

    async fn put_bulk(&self, entries: CatalogEntries) -> Result<bool, StorageError> {
        let _timer = LatencyTimer::new("sql", "put_bulk");
        if entries.is_empty() {
            return Ok(false);
        }
        let result = async {
            let now = now_millis();
            let mut tx = self.pool.begin().await?;
            let mut changed = false;
            for (name, info) in &entries.compounds {
                changed |= self.put_compound_tx(&mut tx, name, info, now).await?;
            }
            for (name, value) in &entries.blends {
                let encoded = serde_json::to_string(value)?;
                changed |= self
                    .put_named_tx(&mut tx, BLEND_COLUMNS, name.as_str(), encoded, now)
                    .await?;
            }
            for (name, value) in &entries.frequencies {
                let encoded = serde_json::to_string(value)?;
                changed |= self
                    .put_named_tx(&mut tx, FREQUENCY_COLUMNS, name.as_str(), encoded, now)
                    .await?;
            }
            tx.commit().await?;
            Ok::<_, StorageError>(changed)
        }
        .await;
        record("put_bulk", &result);
        if let Ok(changed) = result {
            debug!(
                compounds = entries.compounds.len(),
                blends = entries.blends.len(),
                frequencies = entries.frequencies.len(),
                changed,
                "put_bulk committed"
            );
        }
        result
    }

    async fn update_compounds(
        &self,
        patches: BTreeMap<CompoundName, CompoundPatch>,
    ) -> Result<bool, StorageError> {
        let _timer = LatencyTimer::new("sql", "update_compounds");
        let result = async {
            let now = now_millis();
            let mut tx = self.pool.begin().await?;
            let select = format!(
                "SELECT half_life_ms, pct_active, note FROM compounds WHERE base = ? AND variant = ?{}",
                self.lock_clause()
            );
            let mut changed = false;
            for (name, patch) in &patches {
                let Some(row) = sqlx::query(&select)
                    .bind(name.base().as_str().to_string())
                    .bind(name.variant().to_string())
                    .fetch_optional(&mut *tx)
                    .await?
                else {
                    continue;
                };
                let current = decode_compound_info(&row)?;
                // A validation failure drops `tx`, rolling back the whole batch
                let patched = patch.apply(&current)?;
                if patched != current {
                    changed |= self.put_compound_tx(&mut tx, name, &patched, now).await?;
                }
            }
            tx.commit().await?;
            Ok::<_, StorageError>(changed)
        }
        .await;
        record("update_compounds", &result);
        result
    }

    async fn delete_bulk(&self, request: DeleteRequest) -> Result<bool, StorageError> {
        let _timer = LatencyTimer::new("sql", "delete_bulk");
        if request.is_noop() {
            return Ok(false);
        }
        let result = async {
            let mut tx = self.pool.begin().await?;
            let mut removed = self.delete_compounds_tx(&mut tx, &request.compounds).await?;
            removed += self.delete_named_tx(&mut tx, "blends", &request.blends).await?;
            removed += self
                .delete_named_tx(&mut tx, "frequencies", &request.frequencies)
                .await?;
            tx.commit().await?;
            Ok::<_, StorageError>(removed)
        }
        .await;
        record("delete_bulk", &result);
        let removed = result?;
        debug!(removed, "delete_bulk committed");
        Ok(removed > 0)
    }

    async fn is_empty(&self) -> Result<bool, StorageError> {
        for catalog in Catalog::ALL {
            let sql = format!("SELECT COUNT(*) AS cnt FROM {}", catalog.as_str());
            let row = sqlx::query(&sql).fetch_one(&self.pool).await?;
            let count: i64 = row.try_get("cnt")?;
            if count > 0 {
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn compound_names_changed_since(
        &self,
        since_ms: i64,
    ) -> Result<BTreeSet<CompoundName>, StorageError> {
        self.compound_names_where(Some(since_ms)).await
    }

    async fn blend_names_changed_since(
        &self,
        since_ms: i64,
    ) -> Result<BTreeSet<BlendName>, StorageError> {
        self.names_in("blends", Some(since_ms)).await
    }

    async fn frequency_names_changed_since(
        &self,
        since_ms: i64,
    ) -> Result<BTreeSet<FrequencyName>, StorageError> {
        self.names_in("frequencies", Some(since_ms)).await
    }

    async fn compound_variants(&self, base: &CompoundBase) -> Result<BTreeSet<String>, StorageError> {
        let rows = sqlx::query("SELECT variant FROM compounds WHERE base = ? ORDER BY variant")
            .bind(base.as_str().to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(|row| get_text(row, "variant")).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const HOUR: Duration = Duration::from_secs(3600);

    fn temp_db_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("catalog_store_test_{}_{}.db", name, std::process::id()))
    }

    async fn open(name: &str) -> (SqlCatalogStore, PathBuf) {
        let path = temp_db_path(name);
        let _ = std::fs::remove_file(&path);
        let url = format!("sqlite://{}?mode=rwc", path.display());
        (SqlCatalogStore::new(&url, 4).await.unwrap(), path)
    }

    fn compound(wire: &str) -> CompoundName {
        wire.parse().unwrap()
    }

    fn entries() -> CatalogEntries {
        let mut entries = CatalogEntries::default();
        entries
            .compounds
            .insert(compound("t=a"), CompoundInfo::with_half_life(HOUR * 24).unwrap());
        entries
            .compounds
            .insert(compound("t=b"), CompoundInfo::with_half_life(HOUR * 48).unwrap());
        entries.blends.insert(
            BlendName::new("mix").unwrap(),
            BlendValue::from_pairs([("t=a", 1.0), ("t=b", 1.0)]).unwrap(),
        );
        entries.frequencies.insert(
            FrequencyName::new("daily").unwrap(),
            FrequencyValue::every(HOUR * 24).unwrap(),
        );
        entries
    }

    #[tokio::test]
    async fn test_put_bulk_reports_change_only_once() {
        let (store, path) = open("put_bulk").await;
        assert!(store.is_empty().await.unwrap());

        assert!(store.put_bulk(entries()).await.unwrap());
        assert!(!store.put_bulk(entries()).await.unwrap());
        assert!(!store.is_empty().await.unwrap());

        let names: Vec<String> = store
            .compound_names()
            .await
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(names, vec!["t=a", "t=b"]);

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_millisecond_durations_round_trip() {
        let (store, path) = open("millis").await;
        let name = compound("fast=x");
        let info = CompoundInfo::with_half_life(Duration::from_millis(1)).unwrap();
        let mut entries = CatalogEntries::default();
        entries.compounds.insert(name.clone(), info.clone());
        entries.frequencies.insert(
            FrequencyName::new("often").unwrap(),
            FrequencyValue::new(vec![Duration::from_millis(1), Duration::from_millis(1500)]).unwrap(),
        );

        assert!(store.put_bulk(entries.clone()).await.unwrap());
        assert_eq!(store.compound(&name).await.unwrap(), Some(info));
        assert_eq!(
            store.frequency(&FrequencyName::new("often").unwrap()).await.unwrap(),
            entries.frequencies.values().next().cloned()
        );
        // Stored values compare equal to what was written
        assert!(!store.put_bulk(entries).await.unwrap());

        // Anything finer can't be built in the first place
        assert!(CompoundInfo::with_half_life(Duration::from_micros(500)).is_err());

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_bulk_reads_omit_missing() {
        let (store, path) = open("bulk_reads").await;
        store.put_bulk(entries()).await.unwrap();

        let query: BTreeSet<BlendName> = [BlendName::new("mix").unwrap(), BlendName::new("nope").unwrap()]
            .into_iter()
            .collect();
        let blends = store.blends(&query).await.unwrap();
        assert_eq!(blends.len(), 1);

        assert!(store.compound(&compound("t=z")).await.unwrap().is_none());
        let freq = store.frequency(&FrequencyName::new("daily").unwrap()).await.unwrap();
        assert_eq!(freq.unwrap().intervals(), &[HOUR * 24]);

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_all_variants_query_and_variant_listing() {
        let (store, path) = open("variants").await;
        store.put_bulk(entries()).await.unwrap();

        let base = CompoundBase::new("t").unwrap();
        let query = BTreeSet::from([CompoundName::all_variants_of(base.clone())]);
        assert_eq!(store.compounds(&query).await.unwrap().len(), 2);

        let variants: Vec<String> = store.compound_variants(&base).await.unwrap().into_iter().collect();
        assert_eq!(variants, vec!["a", "b"]);

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_update_compounds_patches_fields() {
        let (store, path) = open("update").await;
        store.put_bulk(entries()).await.unwrap();

        let patches = BTreeMap::from([(compound("t=a"), CompoundPatch::note("weekly"))]);
        assert!(store.update_compounds(patches.clone()).await.unwrap());
        assert!(!store.update_compounds(patches).await.unwrap());

        let info = store.compound(&compound("t=a")).await.unwrap().unwrap();
        assert_eq!(info.note(), "weekly");
        assert_eq!(info.half_life(), HOUR * 24);

        // Invalid patch rolls back the whole batch
        let bad = BTreeMap::from([
            (compound("t=a"), CompoundPatch::note("changed")),
            (
                compound("t=b"),
                CompoundPatch {
                    pct_active: Some(0.0),
                    ..Default::default()
                },
            ),
        ]);
        assert!(matches!(
            store.update_compounds(bad).await,
            Err(StorageError::Validation(_))
        ));
        let info = store.compound(&compound("t=a")).await.unwrap().unwrap();
        assert_eq!(info.note(), "weekly");

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_delete_all_and_none() {
        let (store, path) = open("delete").await;

        // Deleting everything from an empty store changes nothing
        assert!(!store.delete_bulk(DeleteRequest::all()).await.unwrap());

        store.put_bulk(entries()).await.unwrap();
        let empty_subset = DeleteRequest {
            compounds: DeleteTarget::subset(Vec::new()),
            ..Default::default()
        };
        assert!(!store.delete_bulk(empty_subset).await.unwrap());
        assert_eq!(store.compound_names().await.unwrap().len(), 2);

        assert!(store.delete_compounds(DeleteTarget::All).await.unwrap());
        assert!(store.compound_names().await.unwrap().is_empty());
        assert_eq!(store.blend_names().await.unwrap().len(), 1);

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_names_changed_since() {
        let (store, path) = open("changed_since").await;
        store.put_bulk(entries()).await.unwrap();

        let future = now_millis() + 60_000;
        assert!(store.blend_names_changed_since(future).await.unwrap().is_empty());
        assert_eq!(store.compound_names_changed_since(0).await.unwrap().len(), 2);
        assert_eq!(store.frequency_names_changed_since(0).await.unwrap().len(), 1);

        let _ = std::fs::remove_file(&path);
    }
}
