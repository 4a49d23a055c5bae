//! QuizBank Core
//!
//! Core types, commands, and SQLite schema for the QuizBank backend.

use rusqlite::ErrorCode;

pub mod command;
pub mod types;
pub mod validation;

pub use command::{
    AvailableTaxonomy, BootstrapCommand, BootstrapOutcome, CategorySelection, CommandContext,
    Operation, TaxonomySelection, UpsertOutcome, UpsertQuestionCommand,
};
pub use types::{
    BanksPerUser, CategoryItem, DifficultyLevel, EssayData, McqData, McqOption, Question,
    QuestionBank, QuestionStatus, QuestionType, QuizItem, Relationship, RubricCriterion,
    SecurityEvent, Severity, TagItem, TaxonomySet, TaxonomyType, TrueFalseData, TypePayload,
};

/// Errors that can occur in QuizBank operations.
///
/// Every variant's `Display` starts with its error code followed by `": "`;
/// transport layers key status mapping on that prefix.
#[derive(Debug, thiserror::Error)]
pub enum QuizBankError {
    #[error("DATABASE_ERROR: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("UNAUTHORIZED_ACCESS: {0}")]
    UnauthorizedAccess(String),

    #[error("QUESTION_BANK_NOT_FOUND: {0}")]
    BankNotFound(String),

    #[error("TAXONOMY_REFERENCE_NOT_FOUND: {0}")]
    TaxonomyReferenceNotFound(String),

    #[error("MISSING_REQUIRED_FIELD: {0}")]
    MissingRequiredField(String),

    #[error("INVALID_QUESTION_TYPE: {0}")]
    InvalidQuestionType(String),

    #[error("TYPE_DATA_MISMATCH: {0}")]
    TypeDataMismatch(String),

    #[error("CONSTRAINT_VIOLATION: {0}")]
    ConstraintViolation(String),

    #[error("INVALID_QUERY_PARAMETER: {0}")]
    InvalidQueryParameter(String),

    #[error("DUPLICATE_USER: {0}")]
    DuplicateUser(String),

    #[error("DUPLICATE_SOURCE_QUESTION_ID: {0}")]
    DuplicateSourceQuestionId(String),

    /// Question-type strategy failures carry their own sub-code
    /// (`MCQ_*`, `TRUE_FALSE_*`, `ESSAY_*`).
    #[error("{code}: {message}")]
    TypeRule { code: &'static str, message: String },

    #[error("TRANSACTION_FAILED: {0}")]
    TransactionFailed(String),

    #[error("RETRY_EXHAUSTED: {0}")]
    RetryExhausted(String),

    #[error("TIMEOUT: {0}")]
    Timeout(String),

    #[error("OWNERSHIP_VALIDATION_ERROR: {0}")]
    OwnershipValidation(String),

    #[error("UPSERT_ERROR: {0}")]
    Upsert(String),

    #[error("QUERY_ERROR: {0}")]
    Query(String),
}

impl QuizBankError {
    /// The bare error code, without the message.
    ///
    /// Used as a metrics label and by transport status mapping.
    pub fn code(&self) -> &'static str {
        match self {
            QuizBankError::Database(_) => "DATABASE_ERROR",
            QuizBankError::UnauthorizedAccess(_) => "UNAUTHORIZED_ACCESS",
            QuizBankError::BankNotFound(_) => "QUESTION_BANK_NOT_FOUND",
            QuizBankError::TaxonomyReferenceNotFound(_) => "TAXONOMY_REFERENCE_NOT_FOUND",
            QuizBankError::MissingRequiredField(_) => "MISSING_REQUIRED_FIELD",
            QuizBankError::InvalidQuestionType(_) => "INVALID_QUESTION_TYPE",
            QuizBankError::TypeDataMismatch(_) => "TYPE_DATA_MISMATCH",
            QuizBankError::ConstraintViolation(_) => "CONSTRAINT_VIOLATION",
            QuizBankError::InvalidQueryParameter(_) => "INVALID_QUERY_PARAMETER",
            QuizBankError::DuplicateUser(_) => "DUPLICATE_USER",
            QuizBankError::DuplicateSourceQuestionId(_) => "DUPLICATE_SOURCE_QUESTION_ID",
            QuizBankError::TypeRule { code, .. } => code,
            QuizBankError::TransactionFailed(_) => "TRANSACTION_FAILED",
            QuizBankError::RetryExhausted(_) => "RETRY_EXHAUSTED",
            QuizBankError::Timeout(_) => "TIMEOUT",
            QuizBankError::OwnershipValidation(_) => "OWNERSHIP_VALIDATION_ERROR",
            QuizBankError::Upsert(_) => "UPSERT_ERROR",
            QuizBankError::Query(_) => "QUERY_ERROR",
        }
    }

    /// Whether a bounded retry may recover this failure.
    ///
    /// Only transient storage faults qualify; logical failures are never
    /// retried.
    pub fn is_transient(&self) -> bool {
        match self {
            QuizBankError::Database(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

/// Result type for QuizBank operations.
pub type Result<T> = std::result::Result<T, QuizBankError>;

/// Initialize the SQLite schema for the question-bank store.
///
/// Creates all necessary tables if they don't exist:
/// - `user_banks`: Per-user registry root (one row per user)
/// - `question_banks`: Embedded bank list, `is_active` gates writes
/// - `taxonomy_sets` + `taxonomy_categories`/`taxonomy_tags`/
///   `taxonomy_quizzes`/`taxonomy_difficulty`: the per-bank taxonomy universe
/// - `questions`: Question documents, natural key
///   `(user_id, bank_id, source_question_id)`
/// - `question_relationships`: One row per question→taxonomy edge
/// - `security_events`: Append-only audit trail
/// - `question_search`: FTS5 virtual table over title/content
///
/// The unique indexes are part of the correctness contract, not tuning:
/// the natural-key index linearizes concurrent upserts and the relationship
/// index prevents duplicate-edge races.
pub fn init_sqlite_schema(conn: &rusqlite::Connection) -> Result<()> {
    let ddl = r#"
    -- Per-user registry root
    CREATE TABLE IF NOT EXISTS user_banks (
      user_id INTEGER PRIMARY KEY,
      default_bank_id INTEGER NOT NULL,
      user_email TEXT,
      metadata TEXT,
      created_at TEXT NOT NULL
    );

    -- Embedded bank list
    CREATE TABLE IF NOT EXISTS question_banks (
      id INTEGER PRIMARY KEY AUTOINCREMENT,
      user_id INTEGER NOT NULL,
      bank_id INTEGER NOT NULL,
      name TEXT NOT NULL,
      description TEXT,
      is_active INTEGER NOT NULL DEFAULT 1,
      created_at TEXT NOT NULL,
      FOREIGN KEY (user_id) REFERENCES user_banks(user_id) ON DELETE CASCADE,
      UNIQUE(user_id, bank_id)
    );

    CREATE INDEX IF NOT EXISTS idx_question_banks_user ON question_banks(user_id);

    -- Taxonomy universe per (user_id, bank_id)
    CREATE TABLE IF NOT EXISTS taxonomy_sets (
      id INTEGER PRIMARY KEY AUTOINCREMENT,
      user_id INTEGER NOT NULL,
      bank_id INTEGER NOT NULL,
      created_at TEXT NOT NULL,
      UNIQUE(user_id, bank_id)
    );

    CREATE TABLE IF NOT EXISTS taxonomy_categories (
      id INTEGER PRIMARY KEY AUTOINCREMENT,
      user_id INTEGER NOT NULL,
      bank_id INTEGER NOT NULL,
      level INTEGER NOT NULL,
      category_id TEXT NOT NULL,
      name TEXT NOT NULL,
      slug TEXT NOT NULL,
      parent_id TEXT,
      UNIQUE(user_id, bank_id, level, category_id),
      CHECK (level BETWEEN 1 AND 4)
    );

    CREATE TABLE IF NOT EXISTS taxonomy_tags (
      id INTEGER PRIMARY KEY AUTOINCREMENT,
      user_id INTEGER NOT NULL,
      bank_id INTEGER NOT NULL,
      tag_id TEXT NOT NULL,
      name TEXT NOT NULL,
      color TEXT,
      UNIQUE(user_id, bank_id, tag_id)
    );

    CREATE TABLE IF NOT EXISTS taxonomy_quizzes (
      id INTEGER PRIMARY KEY AUTOINCREMENT,
      user_id INTEGER NOT NULL,
      bank_id INTEGER NOT NULL,
      quiz_id INTEGER NOT NULL,
      quiz_name TEXT NOT NULL,
      quiz_slug TEXT NOT NULL,
      UNIQUE(user_id, bank_id, quiz_id)
    );

    CREATE TABLE IF NOT EXISTS taxonomy_difficulty (
      id INTEGER PRIMARY KEY AUTOINCREMENT,
      user_id INTEGER NOT NULL,
      bank_id INTEGER NOT NULL,
      level TEXT NOT NULL,
      numeric_value INTEGER NOT NULL,
      description TEXT,
      UNIQUE(user_id, bank_id, level)
    );

    -- Question documents
    CREATE TABLE IF NOT EXISTS questions (
      id INTEGER PRIMARY KEY AUTOINCREMENT,
      user_id INTEGER NOT NULL,
      bank_id INTEGER NOT NULL,
      source_question_id TEXT NOT NULL,
      question_type TEXT NOT NULL,
      title TEXT NOT NULL,
      content TEXT NOT NULL,
      status TEXT NOT NULL,
      points INTEGER,
      display_order INTEGER,
      solution_explanation TEXT,
      type_data TEXT NOT NULL,
      attachments TEXT,
      question_settings TEXT,
      metadata TEXT,
      created_at TEXT NOT NULL,
      updated_at TEXT NOT NULL,
      published_at TEXT,
      archived_at TEXT,
      CHECK (question_type IN ('mcq', 'true_false', 'essay')),
      CHECK (status IN ('draft', 'published', 'archived'))
    );

    -- Natural key: linearizes concurrent upserts of the same question
    CREATE UNIQUE INDEX IF NOT EXISTS idx_questions_natural_key
      ON questions(user_id, bank_id, source_question_id);

    CREATE INDEX IF NOT EXISTS idx_questions_bank_status
      ON questions(user_id, bank_id, status, created_at DESC);

    -- One row per question -> taxonomy edge; unique to prevent duplicate edges
    CREATE TABLE IF NOT EXISTS question_relationships (
      id INTEGER PRIMARY KEY AUTOINCREMENT,
      user_id INTEGER NOT NULL,
      bank_id INTEGER NOT NULL,
      question_id INTEGER NOT NULL,
      taxonomy_type TEXT NOT NULL,
      taxonomy_id TEXT NOT NULL,
      FOREIGN KEY (question_id) REFERENCES questions(id) ON DELETE CASCADE,
      UNIQUE(user_id, bank_id, question_id, taxonomy_type, taxonomy_id)
    );

    CREATE INDEX IF NOT EXISTS idx_relationships_question
      ON question_relationships(question_id);
    CREATE INDEX IF NOT EXISTS idx_relationships_taxonomy
      ON question_relationships(user_id, bank_id, taxonomy_type, taxonomy_id);

    -- Append-only security audit trail
    CREATE TABLE IF NOT EXISTS security_events (
      id INTEGER PRIMARY KEY AUTOINCREMENT,
      event_type TEXT NOT NULL,
      user_id INTEGER NOT NULL,
      session_id TEXT,
      severity TEXT NOT NULL,
      timestamp TEXT NOT NULL,
      request_id TEXT NOT NULL,
      details TEXT NOT NULL,
      client_ip TEXT,
      user_agent TEXT,
      checksum TEXT NOT NULL,
      anonymization_date TEXT NOT NULL,
      retention_expiry_date TEXT NOT NULL,
      CHECK (severity IN ('INFO', 'MEDIUM', 'HIGH', 'CRITICAL'))
    );

    CREATE INDEX IF NOT EXISTS idx_security_events_user ON security_events(user_id);
    CREATE INDEX IF NOT EXISTS idx_security_events_type ON security_events(event_type);

    -- Full-text search virtual table; rowid mirrors questions.id
    CREATE VIRTUAL TABLE IF NOT EXISTS question_search USING fts5(
      title,
      content
    );
    "#;

    conn.execute_batch(ddl)?;
    Ok(())
}
