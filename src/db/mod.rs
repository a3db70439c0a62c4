use crate::error::{Result, StoreError};
use crate::models::{
    format_timestamp, normalize_fact_text, parse_timestamp, Fact, Interaction, InteractionMeta,
    Role,
};
use chrono::Utc;
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info};

mod schema;

/// Shared handle to the SQLite memory file.
///
/// Clones share one connection. Every statement runs under the same lock, so
/// writes are serialized and readers never see a half-written row.
#[derive(Clone)]
pub struct MemoryStore {
    conn: Arc<Mutex<Connection>>,
}

impl MemoryStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        info!("MemoryStore: Opened {}", path.display());

        let store = Self::from_connection(conn);
        store.execute_init()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let store = Self::from_connection(Connection::open_in_memory()?);
        store.execute_init()?;
        Ok(store)
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Runs a store call on the blocking pool so async callers never hold the
    /// connection lock on a runtime worker.
    pub async fn run_blocking<T, F>(&self, f: F) -> anyhow::Result<T>
    where
        F: FnOnce(&MemoryStore) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.clone();
        let value = tokio::task::spawn_blocking(move || f(&store)).await??;
        Ok(value)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    pub fn execute_init(&self) -> Result<()> {
        info!("MemoryStore: Initializing schema...");
        let mut conn = self.lock()?;
        conn.execute_batch(schema::SCHEMA)?;
        migrate_fact_norm(&mut conn)?;
        conn.execute_batch(schema::FACT_NORM_INDEX)?;
        debug!("MemoryStore: Schema initialized successfully");
        Ok(())
    }

    // --- Interactions ---

    pub fn add_interaction(
        &self,
        role: Role,
        content: &str,
        meta: Option<&InteractionMeta>,
    ) -> Result<()> {
        let meta_json = meta.map(InteractionMeta::to_json).transpose()?;
        let ts = format_timestamp(Utc::now());

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO interactions (ts, role, content, meta) VALUES (?1, ?2, ?3, ?4)",
            params![ts, role.as_str(), content, meta_json],
        )?;
        debug!("MemoryStore: Saved {} interaction ({} chars)", role, content.chars().count());
        Ok(())
    }

    /// Returns the last `limit` interactions, oldest first.
    pub fn get_recent_interactions(&self, limit: usize) -> Result<Vec<Interaction>> {
        if limit == 0 {
            return Err(StoreError::InvalidLimit(limit));
        }
        let sql_limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT ts, role, content, meta FROM interactions ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map([sql_limit], interaction_from_row)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        results.reverse();
        Ok(results)
    }

    pub fn interaction_count(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM interactions", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    // --- Facts ---

    /// Inserts a fact unless one with the same normalized text exists.
    pub fn add_fact(&self, source: &str, fact: &str, importance: i64) -> Result<()> {
        let key = normalize_fact_text(fact);
        let ts = format_timestamp(Utc::now());

        let conn = self.lock()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO facts (ts, source, fact, importance, norm) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![ts, source, fact, importance, key],
        )?;
        if inserted == 0 {
            debug!("MemoryStore: Skipping duplicate fact from {}", source);
            return Err(StoreError::DuplicateFact(fact.trim().to_string()));
        }
        debug!("MemoryStore: Saved fact from {}", source);
        Ok(())
    }

    /// All facts in insertion order.
    pub fn get_all_facts(&self) -> Result<Vec<Fact>> {
        Ok(self
            .facts_with_ids()?
            .into_iter()
            .map(|(_, fact)| fact)
            .collect())
    }

    /// Facts containing at least one of `query_terms` (case-insensitive).
    ///
    /// Ordered by number of matched terms, then importance, then newest first.
    pub fn search_facts<S: AsRef<str>>(&self, query_terms: &[S]) -> Result<Vec<Fact>> {
        let terms: Vec<String> = query_terms
            .iter()
            .map(|t| t.as_ref().trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut matches: Vec<(usize, i64, Fact)> = self
            .facts_with_ids()?
            .into_iter()
            .filter_map(|(id, fact)| {
                let lowered = fact.fact.to_lowercase();
                let hits = terms.iter().filter(|t| lowered.contains(t.as_str())).count();
                (hits > 0).then_some((hits, id, fact))
            })
            .collect();

        matches.sort_by(|a, b| {
            b.0.cmp(&a.0)
                .then_with(|| b.2.importance.cmp(&a.2.importance))
                .then_with(|| b.1.cmp(&a.1))
        });

        debug!("MemoryStore: Fact search returned {} results", matches.len());
        Ok(matches.into_iter().map(|(_, _, fact)| fact).collect())
    }

    pub fn fact_count(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM facts", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    fn facts_with_ids(&self) -> Result<Vec<(i64, Fact)>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT id, ts, source, fact, importance FROM facts ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            let id: i64 = row.get(0)?;
            let ts: String = row.get(1)?;
            Ok((
                id,
                Fact {
                    timestamp: parse_timestamp(&ts)
                        .ok_or_else(|| conversion_error(1, format!("bad timestamp: {ts}")))?,
                    source: row.get(2)?,
                    fact: row.get(3)?,
                    importance: row.get(4)?,
                },
            ))
        })?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    /// Closes the connection if this is the last handle to it.
    pub fn close(self) -> Result<()> {
        match Arc::try_unwrap(self.conn) {
            Ok(mutex) => {
                let conn = mutex.into_inner().map_err(|_| StoreError::LockPoisoned)?;
                conn.close().map_err(|(_, e)| StoreError::Storage(e))?;
                info!("MemoryStore: Closed");
            }
            Err(_) => debug!("MemoryStore: Handle still shared, dropping this reference"),
        }
        Ok(())
    }
}

/// Adds and backfills `facts.norm` on files created before the column
/// existed. Later repeats of an already seen text keep a NULL key.
fn migrate_fact_norm(conn: &mut Connection) -> Result<()> {
    let has_norm = conn
        .prepare("SELECT 1 FROM pragma_table_info('facts') WHERE name = 'norm'")?
        .exists([])?;
    if has_norm {
        return Ok(());
    }

    info!("MemoryStore: Migrating facts table to normalized keys");
    let tx = conn.transaction()?;
    tx.execute("ALTER TABLE facts ADD COLUMN norm TEXT", [])?;
    let rows = {
        let mut stmt = tx.prepare("SELECT id, fact FROM facts ORDER BY id")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?;
        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        results
    };

    let mut seen = HashSet::new();
    for (id, fact) in rows {
        let key = normalize_fact_text(&fact);
        if seen.insert(key.clone()) {
            tx.execute("UPDATE facts SET norm = ?1 WHERE id = ?2", params![key, id])?;
        }
    }
    tx.commit()?;
    Ok(())
}

fn interaction_from_row(row: &Row<'_>) -> rusqlite::Result<Interaction> {
    let ts: String = row.get(0)?;
    let role: String = row.get(1)?;
    let meta: Option<String> = row.get(3)?;
    Ok(Interaction {
        timestamp: parse_timestamp(&ts)
            .ok_or_else(|| conversion_error(0, format!("bad timestamp: {ts}")))?,
        role: role.parse::<Role>().map_err(|e| conversion_error(1, e))?,
        content: row.get(2)?,
        meta: meta.as_deref().and_then(InteractionMeta::from_stored),
    })
}

fn conversion_error(column: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, message.into())
}
