//! SQLite-backed persistence gateway
//!
//! Durable home for everything the pipeline needs across restarts: the
//! path ↔ identity registry, content checksums, pre-damage snapshots,
//! White/Black list membership, and the per-actor action log. One store
//! handle is injected explicitly into every component at construction;
//! the event loop is single-threaded, so no locking wraps the connection.

use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::checksum::Checksum;
use crate::error::Result;

/// Stable opaque identity of a filesystem path
pub type FileId = i64;

/// Epoch-millisecond timestamp
pub type Millis = i64;

/// Reserved identity of the agent's own trust database
pub const TRUST_DB_ID: FileId = 0;

/// List membership tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    White,
    Black,
}

impl Tier {
    /// Backing table name; the only thing that varies between tiers
    fn table(self) -> &'static str {
        match self {
            Tier::White => "whitelist",
            Tier::Black => "blacklist",
        }
    }

    fn opposite(self) -> Tier {
        match self {
            Tier::White => Tier::Black,
            Tier::Black => Tier::White,
        }
    }
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS files (
    id INTEGER PRIMARY KEY,
    path TEXT NOT NULL UNIQUE
);
CREATE INDEX IF NOT EXISTS path_idx ON files (path);

CREATE TABLE IF NOT EXISTS files_hash (
    id INTEGER PRIMARY KEY,
    hash INTEGER NOT NULL UNIQUE,
    FOREIGN KEY(id) REFERENCES files(id)
);
CREATE INDEX IF NOT EXISTS hash_idx ON files_hash (hash);

CREATE TABLE IF NOT EXISTS files_content (
    id INTEGER PRIMARY KEY,
    content BLOB NOT NULL,
    FOREIGN KEY(id) REFERENCES files(id)
);

CREATE TABLE IF NOT EXISTS whitelist (
    id INTEGER PRIMARY KEY,
    FOREIGN KEY(id) REFERENCES files(id)
);

CREATE TABLE IF NOT EXISTS blacklist (
    id INTEGER PRIMARY KEY,
    FOREIGN KEY(id) REFERENCES files(id)
);

CREATE TABLE IF NOT EXISTS actions (
    id INTEGER PRIMARY KEY,
    bin INTEGER NOT NULL,
    target INTEGER NOT NULL,
    target_dir INTEGER NOT NULL,
    timepoint INTEGER NOT NULL,
    FOREIGN KEY(bin) REFERENCES files(id),
    FOREIGN KEY(target) REFERENCES files(id)
);
CREATE INDEX IF NOT EXISTS bin_idx ON actions (bin);
CREATE INDEX IF NOT EXISTS target_dir_idx ON actions (target_dir);
CREATE INDEX IF NOT EXISTS timepoint_idx ON actions (timepoint);
"#;

/// Persistence gateway over a single SQLite connection
pub struct Store {
    conn: Connection,
    db_path: PathBuf,
}

impl Store {
    /// Open (creating if necessary) the trust database at `path`.
    ///
    /// Identity 0 is bootstrapped to the database's own canonical path so
    /// the mediator can recognize accesses to it.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;

        let db_path = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        conn.execute(
            "INSERT OR IGNORE INTO files (id, path) VALUES (?1, ?2)",
            params![TRUST_DB_ID, db_path.to_string_lossy()],
        )?;

        debug!("trust database open at {:?}", db_path);
        Ok(Self { conn, db_path })
    }

    /// In-memory store for tests
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        let db_path = PathBuf::from("/rampart-test/trust.db");
        conn.execute(
            "INSERT OR IGNORE INTO files (id, path) VALUES (?1, ?2)",
            params![TRUST_DB_ID, db_path.to_string_lossy()],
        )?;
        Ok(Self { conn, db_path })
    }

    /// Canonical path of the trust database itself
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    // --- file identity ---

    /// Idempotent upsert: the identity for `path`, created on first sight
    pub fn identity_for_path(&self, path: &Path) -> Result<FileId> {
        let key = path.to_string_lossy();
        self.conn
            .prepare_cached("INSERT OR IGNORE INTO files (path) VALUES (?1)")?
            .execute(params![key])?;
        let id = self
            .conn
            .prepare_cached("SELECT id FROM files WHERE path = ?1")?
            .query_row(params![key], |row| row.get(0))?;
        Ok(id)
    }

    pub fn path_for_identity(&self, id: FileId) -> Result<Option<PathBuf>> {
        let path: Option<String> = self
            .conn
            .prepare_cached("SELECT path FROM files WHERE id = ?1")?
            .query_row(params![id], |row| row.get(0))
            .optional()?;
        Ok(path.map(PathBuf::from))
    }

    // --- action log ---

    pub fn record_action(
        &self,
        actor: FileId,
        target: FileId,
        target_dir: FileId,
        ts: Millis,
    ) -> Result<()> {
        self.conn
            .prepare_cached(
                "INSERT INTO actions (bin, target, target_dir, timepoint) VALUES (?1, ?2, ?3, ?4)",
            )?
            .execute(params![actor, target, target_dir, ts])?;
        Ok(())
    }

    /// Distinct targets this actor wrote since `cutoff`
    pub fn actions_since(&self, actor: FileId, cutoff: Millis) -> Result<Vec<FileId>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT DISTINCT target FROM actions WHERE bin = ?1 AND timepoint >= ?2",
        )?;
        let rows = stmt.query_map(params![actor, cutoff], |row| row.get(0))?;
        let mut targets = Vec::new();
        for row in rows {
            targets.push(row?);
        }
        Ok(targets)
    }

    /// Per-directory distinct-target counts for this actor since `cutoff`
    pub fn actions_by_directory_since(
        &self,
        actor: FileId,
        cutoff: Millis,
    ) -> Result<HashMap<FileId, usize>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT target_dir, COUNT(DISTINCT target) FROM actions \
             WHERE bin = ?1 AND timepoint >= ?2 GROUP BY target_dir",
        )?;
        let rows = stmt.query_map(params![actor, cutoff], |row| {
            Ok((row.get::<_, FileId>(0)?, row.get::<_, i64>(1)? as usize))
        })?;
        let mut counts = HashMap::new();
        for row in rows {
            let (dir, count) = row?;
            counts.insert(dir, count);
        }
        Ok(counts)
    }

    pub fn delete_actions_for(&self, actor: FileId) -> Result<()> {
        self.conn
            .prepare_cached("DELETE FROM actions WHERE bin = ?1")?
            .execute(params![actor])?;
        Ok(())
    }

    /// Delete all entries older than `cutoff`; returns the affected targets
    /// so callers can reclaim identities that just lost their last action.
    pub fn delete_actions_older_than(&self, cutoff: Millis) -> Result<Vec<FileId>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT DISTINCT target FROM actions WHERE timepoint < ?1")?;
        let rows = stmt.query_map(params![cutoff], |row| row.get(0))?;
        let mut targets = Vec::new();
        for row in rows {
            targets.push(row?);
        }
        self.conn
            .prepare_cached("DELETE FROM actions WHERE timepoint < ?1")?
            .execute(params![cutoff])?;
        Ok(targets)
    }

    // --- list membership ---

    /// Add an identity to a tier. Membership is exclusive: the identity is
    /// removed from the opposite tier in the same operation.
    pub fn list_add(&self, tier: Tier, id: FileId) -> Result<()> {
        self.conn.execute(
            &format!("DELETE FROM {} WHERE id = ?1", tier.opposite().table()),
            params![id],
        )?;
        self.conn.execute(
            &format!("INSERT OR IGNORE INTO {} (id) VALUES (?1)", tier.table()),
            params![id],
        )?;
        Ok(())
    }

    /// Remove an identity from a tier. Never implicitly adds to the other.
    pub fn list_remove(&self, tier: Tier, id: FileId) -> Result<()> {
        self.conn.execute(
            &format!("DELETE FROM {} WHERE id = ?1", tier.table()),
            params![id],
        )?;
        Ok(())
    }

    pub fn list_contains(&self, tier: Tier, id: FileId) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {} WHERE id = ?1", tier.table()),
            params![id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn list_all(&self, tier: Tier) -> Result<Vec<FileId>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT id FROM {} ORDER BY id", tier.table()))?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    // --- content snapshots ---

    pub fn snapshot_exists(&self, id: FileId) -> Result<bool> {
        let count: i64 = self
            .conn
            .prepare_cached("SELECT COUNT(*) FROM files_content WHERE id = ?1")?
            .query_row(params![id], |row| row.get(0))?;
        Ok(count > 0)
    }

    pub fn snapshot_save(&self, id: FileId, content: &[u8]) -> Result<()> {
        self.conn
            .prepare_cached(
                "INSERT INTO files_content (id, content) VALUES (?1, ?2) \
                 ON CONFLICT(id) DO UPDATE SET content = excluded.content",
            )?
            .execute(params![id, content])?;
        Ok(())
    }

    pub fn snapshot_load(&self, id: FileId) -> Result<Option<Vec<u8>>> {
        let content = self
            .conn
            .prepare_cached("SELECT content FROM files_content WHERE id = ?1")?
            .query_row(params![id], |row| row.get(0))
            .optional()?;
        Ok(content)
    }

    pub fn snapshot_delete(&self, id: FileId) -> Result<()> {
        self.conn
            .prepare_cached("DELETE FROM files_content WHERE id = ?1")?
            .execute(params![id])?;
        Ok(())
    }

    // --- content identity ---

    /// Persist the checksum for an identity. Checksums are globally unique:
    /// two identities never share one, and a collision propagates as a
    /// storage failure.
    pub fn hash_save(&self, id: FileId, checksum: Checksum) -> Result<()> {
        self.conn
            .prepare_cached(
                "INSERT INTO files_hash (id, hash) VALUES (?1, ?2) \
                 ON CONFLICT(id) DO UPDATE SET hash = excluded.hash",
            )?
            .execute(params![id, checksum.as_u32() as i64])?;
        Ok(())
    }

    pub fn hash_for(&self, id: FileId) -> Result<Option<Checksum>> {
        let hash: Option<i64> = self
            .conn
            .prepare_cached("SELECT hash FROM files_hash WHERE id = ?1")?
            .query_row(params![id], |row| row.get(0))
            .optional()?;
        Ok(hash.map(|h| Checksum(h as u32)))
    }

    pub fn identity_for_hash(&self, checksum: Checksum) -> Result<Option<FileId>> {
        let id = self
            .conn
            .prepare_cached("SELECT id FROM files_hash WHERE hash = ?1")?
            .query_row(params![checksum.as_u32() as i64], |row| row.get(0))
            .optional()?;
        Ok(id)
    }

    // --- identity reclamation ---

    /// Remove identities with no action since `cutoff`, no list membership,
    /// and no snapshot or checksum. The reserved trust-database identity is
    /// never reclaimed. Returns the number of identities removed.
    pub fn reap(&self, cutoff: Millis) -> Result<usize> {
        let removed = self.conn.execute(
            "DELETE FROM files WHERE id != ?1 \
             AND id NOT IN (SELECT bin FROM actions WHERE timepoint >= ?2) \
             AND id NOT IN (SELECT target FROM actions WHERE timepoint >= ?2) \
             AND id NOT IN (SELECT target_dir FROM actions WHERE timepoint >= ?2) \
             AND id NOT IN (SELECT id FROM whitelist) \
             AND id NOT IN (SELECT id FROM blacklist) \
             AND id NOT IN (SELECT id FROM files_hash) \
             AND id NOT IN (SELECT id FROM files_content)",
            params![TRUST_DB_ID, cutoff],
        )?;
        Ok(removed)
    }
}
