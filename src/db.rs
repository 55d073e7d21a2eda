use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Type, ValueRef};
use rusqlite::{Connection, OpenFlags, params};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::models::{Application, NewApplication, Stage};

const SELECT_COLUMNS: &str = "SELECT id, title, company_url, company_name, stage, progress_notes, created_at, updated_at
     FROM applications";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("cannot open database at {}: {source}", .path.display())]
    Connection {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("cannot create database directory {}: {source}", .path.display())]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("query failed: {0}")]
    Query(#[from] rusqlite::Error),
}

/// Where the applications database lives.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub path: PathBuf,
}

impl StorageConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `--db` if given, otherwise the per-user data directory.
    pub fn resolve(path: Option<PathBuf>) -> Self {
        Self::new(path.unwrap_or_else(Self::default_path))
    }

    fn default_path() -> PathBuf {
        // Use XDG data directory or fallback
        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "apptrack") {
            proj_dirs.data_dir().join("apptrack.db")
        } else {
            PathBuf::from("apptrack.db")
        }
    }

    /// Log file written by the board, next to the database.
    pub fn log_path(&self) -> PathBuf {
        self.path.with_file_name("apptrack.log")
    }
}

/// The reads and writes the tracker needs from persistent storage.
pub trait ApplicationStore {
    fn list_all(&self) -> Result<Vec<Application>, StorageError>;
    fn get(&self, id: i64) -> Result<Option<Application>, StorageError>;
    fn create(&self, new: &NewApplication) -> Result<i64, StorageError>;
    /// Returns the number of rows changed; zero when `id` does not exist.
    fn advance(&self, id: i64, stage: Stage, notes: &str) -> Result<usize, StorageError>;
}

/// SQLite-backed store. Every call opens its own connection and drops it on return.
pub struct Database {
    config: StorageConfig,
}

impl Database {
    pub fn new(config: StorageConfig) -> Self {
        Self { config }
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Opens an existing database file. A missing file is a connection error,
    /// only `init` creates one.
    fn connect(&self) -> Result<Connection, StorageError> {
        debug!(path = %self.config.path.display(), "opening connection");
        Connection::open_with_flags(
            &self.config.path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|source| StorageError::Connection {
            path: self.config.path.clone(),
            source,
        })
    }

    pub fn init(&self) -> Result<(), StorageError> {
        let path = &self.config.path;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StorageError::Directory {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let conn = Connection::open(path).map_err(|source| StorageError::Connection {
            path: path.clone(),
            source,
        })?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS applications (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL CHECK (title <> ''),
                company_url TEXT NOT NULL CHECK (company_url <> ''),
                company_name TEXT,
                stage TEXT NOT NULL DEFAULT 'wishlist'
                    CHECK (stage IN ('wishlist', 'application_sent', 'in_process', 'offer_received')),
                progress_notes TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_applications_created ON applications(created_at);
            "#,
        )?;
        info!(path = %path.display(), "schema ready");
        Ok(())
    }

    pub fn is_initialized(&self) -> Result<bool, StorageError> {
        let conn = self.connect()?;
        let tables: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='applications'",
            [],
            |row| row.get(0),
        )?;
        Ok(tables > 0)
    }

    fn row_to_application(row: &rusqlite::Row) -> rusqlite::Result<Application> {
        Ok(Application {
            id: row.get(0)?,
            title: row.get(1)?,
            company_url: row.get(2)?,
            company_name: row.get(3)?,
            stage: row.get(4)?,
            progress_notes: row.get(5)?,
            created_at: parse_timestamp(row, 6)?,
            updated_at: parse_timestamp(row, 7)?,
        })
    }
}

impl ApplicationStore for Database {
    fn list_all(&self) -> Result<Vec<Application>, StorageError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "{SELECT_COLUMNS} ORDER BY created_at DESC, id DESC"
        ))?;
        let rows = stmt.query_map([], Self::row_to_application)?;
        let applications = rows.collect::<Result<Vec<_>, _>>()?;
        debug!(count = applications.len(), "listed applications");
        Ok(applications)
    }

    fn get(&self, id: i64) -> Result<Option<Application>, StorageError> {
        let conn = self.connect()?;
        let result = conn.query_row(
            &format!("{SELECT_COLUMNS} WHERE id = ?1"),
            [id],
            Self::row_to_application,
        );
        match result {
            Ok(app) => Ok(Some(app)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn create(&self, new: &NewApplication) -> Result<i64, StorageError> {
        let conn = self.connect()?;
        let now = format_timestamp(Utc::now());
        conn.execute(
            "INSERT INTO applications (title, company_url, company_name, stage, progress_notes, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, '', ?5, ?5)",
            params![new.title, new.company_url, new.company_name, Stage::Wishlist, now],
        )?;
        let id = conn.last_insert_rowid();
        info!(id, title = %new.title, "application created");
        Ok(id)
    }

    fn advance(&self, id: i64, stage: Stage, notes: &str) -> Result<usize, StorageError> {
        let conn = self.connect()?;
        let changed = conn.execute(
            "UPDATE applications SET stage = ?1, progress_notes = ?2, updated_at = ?3 WHERE id = ?4",
            params![stage, notes, format_timestamp(Utc::now()), id],
        )?;
        info!(id, %stage, changed, "stage updated");
        Ok(changed)
    }
}

impl ToSql for Stage {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Stage {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

// Fixed-width UTC with microseconds, so text order in SQLite matches time order.
fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}


#[cfg(test)]
mod tests {
    use super::*;
    use chrono::SubsecRound;
    use tempfile::TempDir;

    fn test_db() -> (TempDir, Database) {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let db = Database::new(StorageConfig::new(dir.path().join("apptrack.db")));
        db.init().expect("init should succeed");
        (dir, db)
    }

    fn backend_engineer() -> NewApplication {
        NewApplication::new("Backend Engineer", "https://co.example/jobs/1", "Acme")
    }

    #[test]
    fn test_init_is_idempotent() {
        let (_dir, db) = test_db();
        db.init().expect("second init should succeed");
        assert!(db.is_initialized().unwrap());
    }

    #[test]
    fn test_init_creates_missing_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/data/apptrack.db");
        let db = Database::new(StorageConfig::new(&path));
        db.init().expect("init should create parents");
        assert!(path.exists());
    }

    #[test]
    fn test_create_starts_in_wishlist_with_empty_notes() {
        let (_dir, db) = test_db();
        let id = db.create(&backend_engineer()).unwrap();

        let app = db.get(id).unwrap().expect("row should exist");
        assert_eq!(app.title, "Backend Engineer");
        assert_eq!(app.company_url, "https://co.example/jobs/1");
        assert_eq!(app.company_name.as_deref(), Some("Acme"));
        assert_eq!(app.stage, Stage::Wishlist);
        assert_eq!(app.progress_notes, "");
        assert_eq!(app.created_at, app.updated_at);
    }

    #[test]
    fn test_create_without_company_stores_null() {
        let (_dir, db) = test_db();
        let id = db
            .create(&NewApplication::new("QA", "https://qa.example", ""))
            .unwrap();
        assert_eq!(db.get(id).unwrap().unwrap().company_name, None);
    }

    #[test]
    fn test_create_rejected_by_constraint() {
        let (_dir, db) = test_db();
        let blank = NewApplication {
            title: String::new(),
            company_url: "https://co.example".to_string(),
            company_name: None,
        };
        let err = db.create(&blank).unwrap_err();
        assert!(matches!(err, StorageError::Query(_)));
        assert!(db.list_all().unwrap().is_empty());
    }

    #[test]
    fn test_list_all_newest_first() {
        let (_dir, db) = test_db();
        let first = db.create(&backend_engineer()).unwrap();
        let second = db
            .create(&NewApplication::new("Data Engineer", "https://co.example/jobs/2", ""))
            .unwrap();

        let ids: Vec<i64> = db.list_all().unwrap().iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![second, first]);
    }

    #[test]
    fn test_list_all_orders_by_created_at_not_id() {
        let (_dir, db) = test_db();
        let conn = Connection::open(db.path()).unwrap();
        conn.execute_batch(
            "INSERT INTO applications (id, title, company_url, stage, created_at, updated_at)
             VALUES (1, 'Later', 'https://a.example', 'wishlist',
                     '2024-03-01T09:00:00.000000Z', '2024-03-01T09:00:00.000000Z');
             INSERT INTO applications (id, title, company_url, stage, created_at, updated_at)
             VALUES (2, 'Earlier', 'https://b.example', 'wishlist',
                     '2024-02-01T09:00:00.000000Z', '2024-02-01T09:00:00.000000Z');",
        )
        .unwrap();

        let titles: Vec<String> = db.list_all().unwrap().into_iter().map(|a| a.title).collect();
        assert_eq!(titles, vec!["Later", "Earlier"]);
    }

    #[test]
    fn test_advance_overwrites_stage_notes_and_timestamp() {
        let (_dir, db) = test_db();
        let id = db.create(&backend_engineer()).unwrap();
        let created = db.get(id).unwrap().unwrap();

        let before = Utc::now().trunc_subsecs(6);
        let changed = db
            .advance(id, Stage::ApplicationSent, "sent 2024-01-01 10:00")
            .unwrap();
        assert_eq!(changed, 1);

        let app = db.get(id).unwrap().unwrap();
        assert_eq!(app.stage, Stage::ApplicationSent);
        assert_eq!(app.progress_notes, "sent 2024-01-01 10:00");
        assert!(app.updated_at >= before);
        assert_eq!(app.created_at, created.created_at);

        db.advance(id, Stage::InProcess, "Recruitment process started").unwrap();
        let app = db.get(id).unwrap().unwrap();
        assert_eq!(app.progress_notes, "Recruitment process started");
    }

    #[test]
    fn test_advance_twice_bumps_updated_at() {
        let (_dir, db) = test_db();
        let id = db.create(&backend_engineer()).unwrap();

        db.advance(id, Stage::OfferReceived, "Offer received").unwrap();
        let first = db.get(id).unwrap().unwrap();
        db.advance(id, Stage::OfferReceived, "Offer received").unwrap();
        let second = db.get(id).unwrap().unwrap();

        assert_eq!(second.stage, Stage::OfferReceived);
        assert!(second.updated_at > first.updated_at);
    }

    #[test]
    fn test_advance_unknown_id_changes_nothing() {
        let (_dir, db) = test_db();
        let changed = db.advance(42, Stage::InProcess, "n/a").unwrap();
        assert_eq!(changed, 0);
        assert!(db.list_all().unwrap().is_empty());
    }

    #[test]
    fn test_get_missing_returns_none() {
        let (_dir, db) = test_db();
        assert!(db.get(7).unwrap().is_none());
    }

    #[test]
    fn test_missing_file_is_connection_error() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(StorageConfig::new(dir.path().join("absent/apptrack.db")));

        let err = db.list_all().unwrap_err();
        assert!(matches!(err, StorageError::Connection { .. }));
        assert!(!dir.path().join("absent").exists());
    }

    #[test]
    fn test_uninitialized_file_is_query_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.db");
        Connection::open(&path).unwrap();
        let db = Database::new(StorageConfig::new(&path));

        assert!(!db.is_initialized().unwrap());
        assert!(matches!(db.list_all().unwrap_err(), StorageError::Query(_)));
    }

    #[test]
    fn test_log_path_sits_next_to_database() {
        let config = StorageConfig::new("/var/lib/apptrack/apptrack.db");
        assert_eq!(config.log_path(), PathBuf::from("/var/lib/apptrack/apptrack.log"));
    }
}
