//! QuizBank Storage
//!
//! Storage backend abstraction and repositories for the QuizBank backend.
//! The backend hands out SQLite connections; the repository modules expose
//! the logical operation surface the engine composes into transactions.

use quizbank_core::{init_sqlite_schema, QuizBankError, Result};
use rusqlite::Connection;
use std::path::{Path, PathBuf};

pub mod repositories;

/// Backend abstraction for the question-bank store.
///
/// Implementations handle different storage mechanisms; the engine only
/// depends on getting a connection with the schema in place. Transaction
/// scope stays with the caller so multi-document writes can share one
/// transaction.
pub trait BankBackend: Send + Sync {
    /// Get a connection to the question-bank database.
    fn get_connection(&self) -> Result<Connection>;

    /// Check if the database exists.
    fn exists(&self) -> Result<bool>;

    /// Initialize a new database (create the file and schema).
    fn initialize(&self) -> Result<()>;
}

/// Local filesystem SQLite backend.
///
/// Stores the question banks as a SQLite file on the local filesystem.
#[derive(Clone, Debug)]
pub struct LocalSqliteBackend {
    /// Path to the SQLite database file
    path: PathBuf,
}

impl LocalSqliteBackend {
    /// Create a new local SQLite backend.
    ///
    /// # Example
    /// ```
    /// use quizbank_storage::LocalSqliteBackend;
    ///
    /// let backend = LocalSqliteBackend::new("quizbank.db");
    /// ```
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Get the path to the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BankBackend for LocalSqliteBackend {
    fn get_connection(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)?;

        // Foreign keys are off by default in SQLite
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        init_sqlite_schema(&conn)?;

        Ok(conn)
    }

    fn exists(&self) -> Result<bool> {
        Ok(self.path.exists())
    }

    fn initialize(&self) -> Result<()> {
        if self.exists()? {
            return Err(QuizBankError::ConstraintViolation(format!(
                "database already exists at {:?}",
                self.path
            )));
        }

        let conn = Connection::open(&self.path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        init_sqlite_schema(&conn)?;

        Ok(())
    }
}

/// In-memory backend for tests and ephemeral runs.
///
/// Every connection is a fresh empty database, so callers that need shared
/// state across connections should hold one connection for the duration.
#[derive(Clone, Debug, Default)]
pub struct InMemoryBackend;

impl BankBackend for InMemoryBackend {
    fn get_connection(&self) -> Result<Connection> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        init_sqlite_schema(&conn)?;
        Ok(conn)
    }

    fn exists(&self) -> Result<bool> {
        Ok(false)
    }

    fn initialize(&self) -> Result<()> {
        Ok(())
    }
}
