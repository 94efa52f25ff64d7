#![deny(warnings)]

//! Persistence layer: leaderboard stores.
//!
//! The default store is a flat `Name,Score` CSV file. A SQLite store backed by
//! sqlx is available for setups that keep saves in a database. Both rewrite
//! the whole board on every write and do not coordinate concurrent writers.

use anyhow::{Context, Result};
use chrono::Utc;
use sim_core::{Leaderboard, LeaderboardEntry, LeaderboardStore};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;
use tracing::{debug, info};

/// Default CSV file used when no location is given.
pub fn default_csv_path() -> &'static str {
    "leaderboard.csv"
}

/// Returns the default SQLite URL used for local saves.
pub fn default_sqlite_url() -> &'static str {
    "sqlite://./saves/leaderboard.db"
}

/// Open a store from a location string: `sqlite:` URLs select the SQLite
/// store, anything else is treated as a CSV path.
pub fn open_store(location: &str) -> Result<Box<dyn LeaderboardStore>> {
    if location.starts_with("sqlite:") {
        Ok(Box::new(SqliteLeaderboardStore::open(location)?))
    } else {
        Ok(Box::new(CsvLeaderboardStore::new(location)))
    }
}

/// Leaderboard kept in a two-column CSV file with a `Name,Score` header.
#[derive(Clone, Debug)]
pub struct CsvLeaderboardStore {
    path: PathBuf,
}

impl CsvLeaderboardStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl LeaderboardStore for CsvLeaderboardStore {
    fn load(&self) -> Result<Leaderboard> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "no leaderboard file yet");
            return Ok(Leaderboard::default());
        }
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(&self.path)
            .with_context(|| format!("opening {}", self.path.display()))?;
        let mut entries = Vec::new();
        for row in reader.deserialize::<LeaderboardEntry>() {
            entries.push(row.with_context(|| format!("reading {}", self.path.display()))?);
        }
        Ok(Leaderboard::from_entries(entries))
    }

    fn persist(&self, board: &Leaderboard) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        // Write beside the target and rename so readers never see a half file.
        let tmp = self.path.with_extension("csv.tmp");
        {
            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .from_path(&tmp)
                .with_context(|| format!("creating {}", tmp.display()))?;
            writer.write_record(["Name", "Score"])?;
            for entry in board.entries() {
                writer.serialize(entry)?;
            }
            writer.flush()?;
        }
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("replacing {}", self.path.display()))?;
        info!(path = %self.path.display(), entries = board.len(), "leaderboard saved");
        Ok(())
    }
}

/// In-process store, handy for tests and throwaway sessions.
#[derive(Debug, Default)]
pub struct MemoryLeaderboardStore {
    board: Mutex<Leaderboard>,
}

impl LeaderboardStore for MemoryLeaderboardStore {
    fn load(&self) -> Result<Leaderboard> {
        let guard = self
            .board
            .lock()
            .map_err(|_| anyhow::anyhow!("leaderboard lock poisoned"))?;
        Ok(guard.clone())
    }

    fn persist(&self, board: &Leaderboard) -> Result<()> {
        let mut guard = self
            .board
            .lock()
            .map_err(|_| anyhow::anyhow!("leaderboard lock poisoned"))?;
        *guard = board.clone();
        Ok(())
    }
}

const CREATE_LEADERBOARD: &str = "CREATE TABLE IF NOT EXISTS leaderboard (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    score INTEGER NOT NULL,
    written_at TEXT NOT NULL
)";

/// File backing a SQLite URL, or None for in-memory databases.
fn sqlite_file(url: &str) -> Option<&Path> {
    let rest = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))?;
    let path = rest.split('?').next().unwrap_or(rest);
    if path.is_empty() || path.starts_with(":memory:") {
        return None;
    }
    Some(Path::new(path))
}

/// Connect to SQLite and make sure the leaderboard table exists. The
/// database's parent directory is created when missing.
pub async fn init_db(url: &str) -> Result<SqlitePool> {
    if let Some(parent) = sqlite_file(url)
        .and_then(Path::parent)
        .filter(|p| !p.as_os_str().is_empty())
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let opts = SqliteConnectOptions::from_str(url)
        .with_context(|| format!("parsing {url}"))?
        .create_if_missing(true);
    // One long-lived connection keeps `sqlite::memory:` databases alive.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(opts)
        .await?;
    sqlx::query(CREATE_LEADERBOARD).execute(&pool).await?;
    Ok(pool)
}

/// Read every stored entry in insertion order.
pub async fn load_entries(pool: &SqlitePool) -> Result<Vec<LeaderboardEntry>> {
    let rows: Vec<(String, i64)> =
        sqlx::query_as("SELECT name, score FROM leaderboard ORDER BY id")
            .fetch_all(pool)
            .await?;
    Ok(rows
        .into_iter()
        .map(|(name, score)| LeaderboardEntry::new(name, score))
        .collect())
}

/// Replace the stored board in a single transaction.
pub async fn replace_entries(pool: &SqlitePool, entries: &[LeaderboardEntry]) -> Result<()> {
    let written_at = Utc::now().to_rfc3339();
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM leaderboard").execute(&mut *tx).await?;
    for e in entries {
        sqlx::query("INSERT INTO leaderboard (name, score, written_at) VALUES (?, ?, ?)")
            .bind(&e.name)
            .bind(e.score)
            .bind(&written_at)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(())
}

/// Leaderboard in a SQLite database. Owns a small runtime so it can serve
/// the synchronous [`LeaderboardStore`] interface.
pub struct SqliteLeaderboardStore {
    // Field order matters: the pool must drop before its runtime.
    pool: SqlitePool,
    rt: tokio::runtime::Runtime,
}

impl SqliteLeaderboardStore {
    pub fn open(url: &str) -> Result<Self> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let pool = rt.block_on(init_db(url))?;
        Ok(Self { pool, rt })
    }
}

impl LeaderboardStore for SqliteLeaderboardStore {
    fn load(&self) -> Result<Leaderboard> {
        let entries = self.rt.block_on(load_entries(&self.pool))?;
        Ok(Leaderboard::from_entries(entries))
    }

    fn persist(&self, board: &Leaderboard) -> Result<()> {
        self.rt.block_on(replace_entries(&self.pool, board.entries()))?;
        info!(entries = board.len(), "leaderboard saved to sqlite");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_is_sqlite() {
        assert!(default_sqlite_url().starts_with("sqlite://"));
    }

    #[test]
    fn missing_csv_is_empty_board() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvLeaderboardStore::new(dir.path().join("none.csv"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn csv_append_sorts_and_rewrites_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scores").join("leaderboard.csv");
        let store = CsvLeaderboardStore::new(&path);
        store.append(LeaderboardEntry::new("Asha", 120_000)).unwrap();
        store.append(LeaderboardEntry::new("Ravi", 340_000)).unwrap();
        let board = store.append(LeaderboardEntry::new("Asha", -5_000)).unwrap();
        assert_eq!(board.entries()[0].name, "Ravi");
        assert_eq!(board.len(), 3);

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "Name,Score\nRavi,340000\nAsha,120000\nAsha,-5000\n");
        assert_eq!(store.load().unwrap(), board);
    }

    #[test]
    fn csv_reads_unsorted_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leaderboard.csv");
        std::fs::write(&path, "Name,Score\nlow, 10\nhigh,99\n").unwrap();
        let board = CsvLeaderboardStore::new(&path).load().unwrap();
        assert_eq!(board.entries()[0], LeaderboardEntry::new("high", 99));
        assert_eq!(board.entries()[1], LeaderboardEntry::new("low", 10));
    }

    #[test]
    fn empty_board_still_writes_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leaderboard.csv");
        CsvLeaderboardStore::new(&path)
            .persist(&Leaderboard::default())
            .unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "Name,Score\n");
    }

    #[test]
    fn memory_store_appends() {
        let store = MemoryLeaderboardStore::default();
        store.append(LeaderboardEntry::new("a", 1)).unwrap();
        let board = store.append(LeaderboardEntry::new("b", 2)).unwrap();
        assert_eq!(board.top(1)[0].name, "b");
    }

    #[test]
    fn sqlite_store_roundtrip() {
        let store = SqliteLeaderboardStore::open("sqlite::memory:").unwrap();
        assert!(store.load().unwrap().is_empty());
        store.append(LeaderboardEntry::new("Asha", 10)).unwrap();
        store.append(LeaderboardEntry::new("Ravi", 30)).unwrap();
        let board = store.append(LeaderboardEntry::new("Meera", 20)).unwrap();
        let names: Vec<_> = store.load().unwrap().entries().iter().map(|e| e.name.clone()).collect();
        assert_eq!(names, vec!["Ravi", "Meera", "Asha"]);
        assert_eq!(board.len(), 3);
    }

    #[test]
    fn sqlite_store_creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("saves").join("nested").join("leaderboard.db");
        let url = format!("sqlite://{}", db.display());
        let store = open_store(&url).unwrap();
        store.append(LeaderboardEntry::new("Asha", 42)).unwrap();
        assert!(db.exists());
        drop(store);

        let reopened = SqliteLeaderboardStore::open(&url).unwrap();
        assert_eq!(reopened.load().unwrap().entries(), &[LeaderboardEntry::new("Asha", 42)]);
    }

    #[test]
    fn sqlite_file_skips_memory_urls() {
        assert_eq!(sqlite_file("sqlite::memory:"), None);
        assert_eq!(
            sqlite_file("sqlite://./saves/leaderboard.db?mode=rwc"),
            Some(Path::new("./saves/leaderboard.db"))
        );
        assert_eq!(sqlite_file("sqlite:/tmp/lb.db"), Some(Path::new("/tmp/lb.db")));
    }

    #[test]
    fn open_store_picks_backend() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("lb.csv");
        let store = open_store(csv_path.to_str().unwrap()).unwrap();
        store.append(LeaderboardEntry::new("x", 1)).unwrap();
        assert!(csv_path.exists());
        let sqlite = open_store("sqlite::memory:").unwrap();
        assert!(sqlite.load().unwrap().is_empty());
    }
}
