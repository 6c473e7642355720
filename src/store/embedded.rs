use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};

use super::schema::SCHEMA;
use super::{LeasePath, LeaseStore, check_transition};
use crate::error::{Error, Result};
use crate::types::{Lease, LeaseState};

const DEFAULT_COMPACT_EVERY: usize = 1024;

/// Single-instance lease store.
///
/// Leases live in an in-memory index guarded by one mutex; every mutation is
/// first appended to a SQLite journal so the index can be rebuilt on restart.
pub struct EmbeddedStore {
    inner: Mutex<Inner>,
}

struct Inner {
    conn: Connection,
    leases: HashMap<String, Lease>,
    /// (repository, index key) -> token, for path-holding leases only.
    paths: BTreeMap<(String, String), String>,
    next_version: u64,
    appended: usize,
    compact_every: usize,
    closed: bool,
}

impl EmbeddedStore {
    pub fn open<P: AsRef<Path>>(journal_path: P) -> Result<Self> {
        Self::open_at(journal_path, Utc::now())
    }

    /// Opens the journal and replays it, discarding leases expired at `now`.
    pub fn open_at<P: AsRef<Path>>(journal_path: P, now: DateTime<Utc>) -> Result<Self> {
        let conn = Connection::open(journal_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "FULL")?;
        Self::from_connection(conn, now)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, Utc::now())
    }

    fn from_connection(conn: Connection, now: DateTime<Utc>) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;

        let mut inner = Inner {
            conn,
            leases: HashMap::new(),
            paths: BTreeMap::new(),
            next_version: 1,
            appended: 0,
            compact_every: DEFAULT_COMPACT_EVERY,
            closed: false,
        };
        inner.replay(now)?;
        inner.compact()?;

        tracing::info!(leases = inner.leases.len(), "Rebuilt lease index from journal");

        Ok(Self {
            inner: Mutex::new(inner),
        })
    }

    #[must_use]
    pub fn with_compact_every(self, rows: usize) -> Self {
        self.lock().compact_every = rows.max(1);
        self
    }

    /// Rewrites the journal as one record per live lease.
    pub fn compact(&self) -> Result<()> {
        self.lock().compact()
    }

    /// Number of journal rows currently on disk.
    pub fn journal_len(&self) -> Result<usize> {
        let inner = self.lock();
        let count: i64 =
            inner
                .conn
                .query_row("SELECT COUNT(*) FROM lease_journal", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn open_inner(&self) -> Result<MutexGuard<'_, Inner>> {
        let inner = self.lock();
        if inner.closed {
            return Err(Error::Unavailable("lease store is closed".to_string()));
        }
        Ok(inner)
    }
}

impl Inner {
    fn replay(&mut self, now: DateTime<Utc>) -> Result<()> {
        let mut replayed: HashMap<String, Lease> = HashMap::new();
        {
            let mut stmt = self
                .conn
                .prepare("SELECT op, token, record FROM lease_journal ORDER BY seq")?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            })?;

            for row in rows {
                let (op, token, record) = row?;
                match (op.as_str(), record) {
                    ("put", Some(record)) => {
                        let lease: Lease = serde_json::from_str(&record)?;
                        replayed.insert(token, lease);
                    }
                    ("remove", _) => {
                        replayed.remove(&token);
                    }
                    (op, _) => {
                        tracing::warn!(op, token = %token, "Skipping malformed journal entry");
                    }
                }
            }
        }

        let mut discarded = 0usize;
        for (token, mut lease) in replayed {
            let keep = match lease.state {
                LeaseState::Active => !lease.is_expired(now),
                // A failed publish must not be forgotten across restarts.
                LeaseState::Committing => true,
                LeaseState::Released => false,
            };
            if !keep {
                discarded += 1;
                continue;
            }
            let path = LeasePath::parse(&lease.path)?;
            lease.version = self.bump();
            self.paths
                .insert((lease.repository.clone(), path.index_key()), token.clone());
            self.leases.insert(token, lease);
        }

        if discarded > 0 {
            tracing::info!(discarded, "Discarded expired or released leases during replay");
        }
        Ok(())
    }

    fn bump(&mut self) -> u64 {
        let version = self.next_version;
        self.next_version += 1;
        version
    }

    fn append(&mut self, op: &str, token: &str, lease: Option<&Lease>) -> Result<()> {
        let record = lease.map(serde_json::to_string).transpose()?;
        self.conn
            .execute(
                "INSERT INTO lease_journal (op, token, record, recorded_at) VALUES (?1, ?2, ?3, ?4)",
                params![op, token, record, Utc::now().to_rfc3339()],
            )
            .map_err(|e| Error::Unavailable(format!("journal append failed: {e}")))?;
        self.appended += 1;
        Ok(())
    }

    fn maybe_compact(&mut self) {
        if self.appended < self.compact_every {
            return;
        }
        if let Err(e) = self.compact() {
            tracing::warn!("Journal compaction failed: {e}");
        }
    }

    fn compact(&mut self) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM lease_journal", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO lease_journal (op, token, record, recorded_at) VALUES ('put', ?1, ?2, ?3)",
            )?;
            let now = Utc::now().to_rfc3339();
            for lease in self.leases.values() {
                stmt.execute(params![lease.token, serde_json::to_string(lease)?, now])?;
            }
        }
        tx.commit()?;
        self.appended = 0;
        tracing::debug!(leases = self.leases.len(), "Compacted lease journal");
        Ok(())
    }

    fn overlapping(&self, repository: &str, path: &LeasePath) -> Vec<&Lease> {
        let own_key = path.index_key();
        let mut tokens: Vec<&String> = path
            .ancestor_keys()
            .into_iter()
            .filter_map(|key| self.paths.get(&(repository.to_string(), key)))
            .collect();

        let start = (repository.to_string(), own_key.clone());
        tokens.extend(
            self.paths
                .range(start..)
                .take_while(|((repo, key), _)| repo == repository && key.starts_with(&own_key))
                .map(|(_, token)| token),
        );

        tokens
            .into_iter()
            .filter_map(|token| self.leases.get(token))
            .filter(|lease| lease.state.holds_path())
            .collect()
    }

    fn insert(&mut self, lease: &Lease) -> Result<Lease> {
        if !lease.state.holds_path() {
            return Err(Error::BadRequest(format!(
                "cannot insert a lease in state {}",
                lease.state
            )));
        }
        if self.leases.contains_key(&lease.token) {
            return Err(Error::VersionConflict(lease.token.clone()));
        }

        let path = LeasePath::parse(&lease.path)?;
        if let Some(blocking) = self.overlapping(&lease.repository, &path).first() {
            return Err(Error::PathConflict(blocking.conflict_info()));
        }

        let mut stored = lease.clone();
        stored.version = self.bump();
        self.append("put", &stored.token, Some(&stored))?;

        self.paths.insert(
            (stored.repository.clone(), path.index_key()),
            stored.token.clone(),
        );
        self.leases.insert(stored.token.clone(), stored.clone());
        self.maybe_compact();
        Ok(stored)
    }

    fn update(&mut self, lease: &Lease) -> Result<Lease> {
        let current = self
            .leases
            .get(&lease.token)
            .ok_or_else(|| Error::NotFound(format!("lease {}", lease.token)))?;
        check_transition(current, lease)?;

        let mut stored = lease.clone();
        stored.version = self.bump();
        self.append("put", &stored.token, Some(&stored))?;

        if !stored.state.holds_path() {
            self.unindex(&stored)?;
        }
        self.leases.insert(stored.token.clone(), stored.clone());
        self.maybe_compact();
        Ok(stored)
    }

    fn remove(&mut self, token: &str) -> Result<()> {
        let Some(lease) = self.leases.get(token).cloned() else {
            return Ok(());
        };
        self.append("remove", token, None)?;
        self.unindex(&lease)?;
        self.leases.remove(token);
        self.maybe_compact();
        Ok(())
    }

    fn unindex(&mut self, lease: &Lease) -> Result<()> {
        let key = (
            lease.repository.clone(),
            LeasePath::parse(&lease.path)?.index_key(),
        );
        if self.paths.get(&key) == Some(&lease.token) {
            self.paths.remove(&key);
        }
        Ok(())
    }
}

#[async_trait]
impl LeaseStore for EmbeddedStore {
    async fn insert(&self, lease: &Lease) -> Result<Lease> {
        self.open_inner()?.insert(lease)
    }

    async fn get(&self, token: &str) -> Result<Lease> {
        self.open_inner()?
            .leases
            .get(token)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("lease {token}")))
    }

    async fn get_by_path(&self, repository: &str, path: &LeasePath) -> Result<Vec<Lease>> {
        let inner = self.open_inner()?;
        Ok(inner
            .overlapping(repository, path)
            .into_iter()
            .cloned()
            .collect())
    }

    async fn list(&self, repository: Option<&str>) -> Result<Vec<Lease>> {
        let inner = self.open_inner()?;
        Ok(inner
            .leases
            .values()
            .filter(|lease| lease.state.holds_path())
            .filter(|lease| repository.is_none_or(|repo| lease.repository == repo))
            .cloned()
            .collect())
    }

    async fn update(&self, lease: &Lease) -> Result<Lease> {
        self.open_inner()?.update(lease)
    }

    async fn remove(&self, token: &str) -> Result<()> {
        self.open_inner()?.remove(token)
    }

    async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<Lease>> {
        let inner = self.open_inner()?;
        Ok(inner
            .leases
            .values()
            .filter(|lease| lease.is_expired(now))
            .cloned()
            .collect())
    }

    async fn close(&self) -> Result<()> {
        let mut inner = self.lock();
        if inner.closed {
            return Ok(());
        }
        inner.compact()?;
        inner.closed = true;
        Ok(())
    }
}
