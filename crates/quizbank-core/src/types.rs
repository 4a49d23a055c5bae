//! Domain records for the QuizBank write and query sides.
//!
//! All entities are plain values; cross-aggregate references are by id only
//! (`user_id`, `bank_id`, `question_id`, `taxonomy_id`). Invariants that span
//! aggregates are enforced by the validation chain, not by shared references.

use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{QuizBankError, Result};

/// Days until a security event's personal fields may be anonymized.
pub const ANONYMIZATION_DAYS: i64 = 90;

/// Months until a security event falls out of retention (7 years).
pub const RETENTION_MONTHS: u32 = 84;

/// The closed set of question types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    Mcq,
    TrueFalse,
    Essay,
}

impl QuestionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionType::Mcq => "mcq",
            QuestionType::TrueFalse => "true_false",
            QuestionType::Essay => "essay",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "mcq" => Ok(QuestionType::Mcq),
            "true_false" => Ok(QuestionType::TrueFalse),
            "essay" => Ok(QuestionType::Essay),
            other => Err(QuizBankError::InvalidQuestionType(format!(
                "unknown question type '{}'",
                other
            ))),
        }
    }
}

/// Lifecycle status of a question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionStatus {
    Draft,
    Published,
    Archived,
}

impl QuestionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionStatus::Draft => "draft",
            QuestionStatus::Published => "published",
            QuestionStatus::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "draft" => Ok(QuestionStatus::Draft),
            "published" => Ok(QuestionStatus::Published),
            "archived" => Ok(QuestionStatus::Archived),
            other => Err(QuizBankError::ConstraintViolation(format!(
                "unknown status '{}'",
                other
            ))),
        }
    }
}

/// The taxonomy axes a question can relate to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaxonomyType {
    CategoryLevel1,
    CategoryLevel2,
    CategoryLevel3,
    CategoryLevel4,
    Tag,
    Quiz,
    DifficultyLevel,
}

impl TaxonomyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaxonomyType::CategoryLevel1 => "category_level_1",
            TaxonomyType::CategoryLevel2 => "category_level_2",
            TaxonomyType::CategoryLevel3 => "category_level_3",
            TaxonomyType::CategoryLevel4 => "category_level_4",
            TaxonomyType::Tag => "tag",
            TaxonomyType::Quiz => "quiz",
            TaxonomyType::DifficultyLevel => "difficulty_level",
        }
    }

    /// The category axis for a level in 1..=4.
    pub fn category_level(level: u8) -> Option<Self> {
        match level {
            1 => Some(TaxonomyType::CategoryLevel1),
            2 => Some(TaxonomyType::CategoryLevel2),
            3 => Some(TaxonomyType::CategoryLevel3),
            4 => Some(TaxonomyType::CategoryLevel4),
            _ => None,
        }
    }
}

/// A single question bank embedded in a user's registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionBank {
    pub bank_id: i64,
    pub name: String,
    pub description: Option<String>,
    /// Gates all write operations against this bank.
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// A user's bank registry: the ordered bank list plus the default pointer.
///
/// Created exactly once per user at first signup; banks may be appended but
/// never removed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BanksPerUser {
    pub user_id: i64,
    pub default_bank_id: i64,
    pub user_email: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub banks: Vec<QuestionBank>,
    pub created_at: DateTime<Utc>,
}

/// A category entry in a bank's taxonomy set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryItem {
    /// Level 1..=4; a level-N category is only usable when levels 1..N-1
    /// are also selected.
    pub level: u8,
    pub id: String,
    pub name: String,
    pub slug: String,
    pub parent_id: Option<String>,
}

/// A tag entry in a bank's taxonomy set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagItem {
    pub id: String,
    pub name: String,
    pub color: Option<String>,
}

/// A quiz entry in a bank's taxonomy set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizItem {
    pub quiz_id: i64,
    pub quiz_name: String,
    pub quiz_slug: String,
}

/// An allowed difficulty level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DifficultyLevel {
    pub level: String,
    pub numeric_value: i64,
    pub description: Option<String>,
}

/// The per-bank universe of allowed taxonomy references.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxonomySet {
    pub user_id: i64,
    pub bank_id: i64,
    pub categories: Vec<CategoryItem>,
    pub tags: Vec<TagItem>,
    pub quizzes: Vec<QuizItem>,
    pub difficulty_levels: Vec<DifficultyLevel>,
    pub created_at: DateTime<Utc>,
}

/// One answer option of a multiple-choice question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McqOption {
    pub text: String,
    pub is_correct: bool,
}

/// Type-specific payload for multiple-choice questions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McqData {
    pub options: Vec<McqOption>,
    #[serde(default)]
    pub allow_multiple_correct: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_limit_seconds: Option<i64>,
}

/// Type-specific payload for true/false questions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrueFalseData {
    pub correct_answer: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_limit_seconds: Option<i64>,
}

/// One grading criterion of an essay rubric.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RubricCriterion {
    pub criterion: String,
    pub max_points: i64,
}

/// Type-specific payload for essay questions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EssayData {
    pub min_words: i64,
    pub max_words: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rubric: Option<Vec<RubricCriterion>>,
}

/// The tagged union of type-specific payloads.
///
/// The discriminator lives in the question's `question_type` column, so the
/// stored JSON is the bare inner payload; [`TypePayload::from_json`] needs
/// the type to pick the variant back. In responses the payload serializes as
/// the field matching its type (`mcq_data`, `true_false_data`, `essay_data`).
#[derive(Debug, Clone)]
pub enum TypePayload {
    Mcq(McqData),
    TrueFalse(TrueFalseData),
    Essay(EssayData),
}

impl Serialize for TypePayload {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(1))?;
        match self {
            TypePayload::Mcq(data) => map.serialize_entry("mcq_data", data)?,
            TypePayload::TrueFalse(data) => map.serialize_entry("true_false_data", data)?,
            TypePayload::Essay(data) => map.serialize_entry("essay_data", data)?,
        }
        map.end()
    }
}

impl TypePayload {
    pub fn question_type(&self) -> QuestionType {
        match self {
            TypePayload::Mcq(_) => QuestionType::Mcq,
            TypePayload::TrueFalse(_) => QuestionType::TrueFalse,
            TypePayload::Essay(_) => QuestionType::Essay,
        }
    }

    /// Serialize the bare inner payload for the `type_data` column.
    pub fn to_json(&self) -> Result<String> {
        let json = match self {
            TypePayload::Mcq(d) => serde_json::to_string(d),
            TypePayload::TrueFalse(d) => serde_json::to_string(d),
            TypePayload::Essay(d) => serde_json::to_string(d),
        };
        json.map_err(|e| QuizBankError::Upsert(format!("cannot encode type data: {}", e)))
    }

    /// Rebuild the payload from a `type_data` column, discriminated by
    /// `question_type`.
    pub fn from_json(question_type: QuestionType, json: &str) -> Result<Self> {
        let payload = match question_type {
            QuestionType::Mcq => serde_json::from_str(json).map(TypePayload::Mcq),
            QuestionType::TrueFalse => serde_json::from_str(json).map(TypePayload::TrueFalse),
            QuestionType::Essay => serde_json::from_str(json).map(TypePayload::Essay),
        };
        payload.map_err(|e| QuizBankError::Query(format!("corrupt type data: {}", e)))
    }
}

/// A persisted question document.
#[derive(Debug, Clone, Serialize)]
pub struct Question {
    /// Store-assigned surrogate id.
    pub id: i64,
    pub user_id: i64,
    pub bank_id: i64,
    /// Client-chosen stable identifier; with `(user_id, bank_id)` it forms
    /// the natural key.
    pub source_question_id: String,
    pub question_type: QuestionType,
    pub title: String,
    pub content: String,
    pub status: QuestionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub points: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_order: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub solution_explanation: Option<String>,
    #[serde(flatten)]
    pub payload: TypePayload,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question_settings: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    /// Immutable after first persistence.
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<DateTime<Utc>>,
}

/// A directed edge from a question to one taxonomy element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub user_id: i64,
    pub bank_id: i64,
    pub question_id: i64,
    pub taxonomy_type: TaxonomyType,
    pub taxonomy_id: String,
}

/// Severity of a security event (matches the DB CHECK constraint).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }
}

/// An append-only security event.
///
/// Events are tamper-evident: `checksum` is SHA-256 over the canonical
/// serialization of every preceding field. [`SecurityEvent::new`] stamps the
/// timestamp, derives the anonymization and retention dates, and seals the
/// checksum; the record is not mutated afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct SecurityEvent {
    pub event_type: String,
    pub user_id: i64,
    pub session_id: Option<String>,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
    pub details: serde_json::Value,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    pub checksum: String,
    pub anonymization_date: DateTime<Utc>,
    pub retention_expiry_date: DateTime<Utc>,
}

impl SecurityEvent {
    /// Build and seal an event at the current instant.
    pub fn new(
        event_type: impl Into<String>,
        user_id: i64,
        severity: Severity,
        request_id: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        let timestamp = Utc::now();
        let mut event = Self {
            event_type: event_type.into(),
            user_id,
            session_id: None,
            severity,
            timestamp,
            request_id: request_id.into(),
            details,
            client_ip: None,
            user_agent: None,
            checksum: String::new(),
            anonymization_date: timestamp + Duration::days(ANONYMIZATION_DAYS),
            retention_expiry_date: timestamp
                .checked_add_months(Months::new(RETENTION_MONTHS))
                .unwrap_or(timestamp),
        };
        event.checksum = event.compute_checksum();
        event
    }

    /// Set the session identifier and reseal.
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self.checksum = self.compute_checksum();
        self
    }

    /// Set the client IP and reseal.
    pub fn with_client_ip(mut self, ip: impl Into<String>) -> Self {
        self.client_ip = Some(ip.into());
        self.checksum = self.compute_checksum();
        self
    }

    /// Set the user agent and reseal.
    pub fn with_user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self.checksum = self.compute_checksum();
        self
    }

    /// SHA-256 over the canonical field serialization.
    ///
    /// Field order is fixed; `details` serializes with sorted keys
    /// (serde_json's default map), so the digest is deterministic.
    pub fn compute_checksum(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.event_type.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.user_id.to_le_bytes());
        hasher.update(self.session_id.as_deref().unwrap_or("").as_bytes());
        hasher.update([0u8]);
        hasher.update(self.severity.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(self.timestamp.to_rfc3339().as_bytes());
        hasher.update([0u8]);
        hasher.update(self.request_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.details.to_string().as_bytes());
        hasher.update([0u8]);
        hasher.update(self.client_ip.as_deref().unwrap_or("").as_bytes());
        hasher.update([0u8]);
        hasher.update(self.user_agent.as_deref().unwrap_or("").as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Whether the stored checksum still matches the field contents.
    pub fn verify_checksum(&self) -> bool {
        self.checksum == self.compute_checksum()
    }
}
