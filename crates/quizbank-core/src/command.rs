//! Command and query input shapes, plus the outcome values the engine
//! returns to the transport layer.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{EssayData, McqData, TaxonomyType, TrueFalseData};

/// Request-scoped caller context.
///
/// `authenticated_user_id` is the identity the out-of-scope auth layer
/// established for the caller; the identity-binding handler asserts that no
/// path-supplied id overrides it.
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub authenticated_user_id: i64,
    pub request_id: String,
    pub session_id: Option<String>,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
}

impl CommandContext {
    pub fn new(authenticated_user_id: i64, request_id: impl Into<String>) -> Self {
        Self {
            authenticated_user_id,
            request_id: request_id.into(),
            session_id: None,
            client_ip: None,
            user_agent: None,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_client_ip(mut self, ip: impl Into<String>) -> Self {
        self.client_ip = Some(ip.into());
        self
    }

    pub fn with_user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }
}

/// The category selection of an upsert request, one optional id per level.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CategorySelection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level_1: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level_2: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level_3: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level_4: Option<String>,
}

impl CategorySelection {
    /// The selected `(level, id)` pairs in level order.
    pub fn levels(&self) -> Vec<(u8, &str)> {
        [
            (1u8, self.level_1.as_deref()),
            (2u8, self.level_2.as_deref()),
            (3u8, self.level_3.as_deref()),
            (4u8, self.level_4.as_deref()),
        ]
        .into_iter()
        .filter_map(|(level, id)| id.map(|id| (level, id)))
        .collect()
    }
}

/// The taxonomy selection carried by an upsert request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaxonomySelection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub categories: Option<CategorySelection>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub quizzes: Vec<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub difficulty_level: Option<String>,
}

impl TaxonomySelection {
    /// Every `(taxonomy_type, taxonomy_id)` pair referenced by the request,
    /// in the derivation order of the relationship rewrite.
    pub fn referenced_ids(&self) -> Vec<(TaxonomyType, String)> {
        let mut refs = Vec::new();
        if let Some(categories) = &self.categories {
            for (level, id) in categories.levels() {
                if let Some(taxonomy_type) = TaxonomyType::category_level(level) {
                    refs.push((taxonomy_type, id.to_string()));
                }
            }
        }
        for tag in &self.tags {
            refs.push((TaxonomyType::Tag, tag.clone()));
        }
        for quiz_id in &self.quizzes {
            refs.push((TaxonomyType::Quiz, quiz_id.to_string()));
        }
        if let Some(level) = &self.difficulty_level {
            refs.push((TaxonomyType::DifficultyLevel, level.clone()));
        }
        refs
    }

    /// Category levels present in the selection, ascending.
    pub fn category_levels_present(&self) -> Vec<u8> {
        self.categories
            .as_ref()
            .map(|c| c.levels().into_iter().map(|(level, _)| level).collect())
            .unwrap_or_default()
    }
}

/// The upsert-question command: path identity plus the request envelope.
///
/// Structural binding (required fields, enum ranges) is the transport's
/// concern; everything here is semantically validated by the chain and the
/// type strategies.
#[derive(Debug, Clone, Deserialize)]
pub struct UpsertQuestionCommand {
    #[serde(default)]
    pub user_id: i64,
    #[serde(default)]
    pub bank_id: i64,
    pub source_question_id: String,
    pub question_type: String,
    pub title: String,
    pub content: String,
    pub status: String,
    #[serde(default)]
    pub points: Option<i64>,
    #[serde(default)]
    pub display_order: Option<i64>,
    #[serde(default)]
    pub solution_explanation: Option<String>,
    #[serde(default)]
    pub attachments: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub question_settings: Option<serde_json::Value>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub taxonomy: TaxonomySelection,
    #[serde(default)]
    pub mcq_data: Option<McqData>,
    #[serde(default)]
    pub true_false_data: Option<TrueFalseData>,
    #[serde(default)]
    pub essay_data: Option<EssayData>,
}

impl UpsertQuestionCommand {
    /// How many of the three type-specific payloads are present.
    pub fn payload_count(&self) -> usize {
        [
            self.mcq_data.is_some(),
            self.true_false_data.is_some(),
            self.essay_data.is_some(),
        ]
        .iter()
        .filter(|present| **present)
        .count()
    }
}

/// The bootstrap-default-bank command.
#[derive(Debug, Clone, Deserialize)]
pub struct BootstrapCommand {
    #[serde(default)]
    pub user_id: i64,
    #[serde(default)]
    pub user_email: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// Whether an upsert created a new question or updated an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Created,
    Updated,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Created => "created",
            Operation::Updated => "updated",
        }
    }
}

/// Result of a successful question upsert.
#[derive(Debug, Clone, Serialize)]
pub struct UpsertOutcome {
    pub question_id: i64,
    pub source_question_id: String,
    pub operation: Operation,
    pub taxonomy_relationships_count: usize,
}

/// The seeded-taxonomy projection returned by bootstrap.
#[derive(Debug, Clone, Serialize)]
pub struct AvailableTaxonomy {
    /// Category names keyed by `level_N`.
    pub categories: BTreeMap<String, Vec<String>>,
    pub tags: Vec<String>,
    pub difficulty: Vec<String>,
}

/// Result of a successful default-bank bootstrap.
#[derive(Debug, Clone, Serialize)]
pub struct BootstrapOutcome {
    pub user_id: i64,
    pub bank_id: i64,
    pub bank_name: String,
    pub description: String,
    pub is_active: bool,
    pub taxonomy_set_created: bool,
    pub available_taxonomy: AvailableTaxonomy,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selection() -> TaxonomySelection {
        TaxonomySelection {
            categories: Some(CategorySelection {
                level_1: Some("general".into()),
                level_2: Some("algebra".into()),
                level_3: None,
                level_4: None,
            }),
            tags: vec!["beginner".into(), "practice".into()],
            quizzes: vec![42],
            difficulty_level: Some("easy".into()),
        }
    }

    #[test]
    fn test_referenced_ids_covers_all_axes() {
        let refs = selection().referenced_ids();
        assert_eq!(refs.len(), 6);
        assert_eq!(refs[0], (TaxonomyType::CategoryLevel1, "general".into()));
        assert_eq!(refs[1], (TaxonomyType::CategoryLevel2, "algebra".into()));
        assert_eq!(refs[2], (TaxonomyType::Tag, "beginner".into()));
        assert_eq!(refs[4], (TaxonomyType::Quiz, "42".into()));
        assert_eq!(refs[5], (TaxonomyType::DifficultyLevel, "easy".into()));
    }

    #[test]
    fn test_category_levels_present() {
        assert_eq!(selection().category_levels_present(), vec![1, 2]);
        assert!(TaxonomySelection::default()
            .category_levels_present()
            .is_empty());
    }

    #[test]
    fn test_payload_count() {
        let json = r#"{
            "source_question_id": "q-1",
            "question_type": "mcq",
            "title": "t",
            "content": "c",
            "status": "draft",
            "mcq_data": {"options": [{"text": "a", "is_correct": true}]}
        }"#;
        let cmd: UpsertQuestionCommand = serde_json::from_str(json).unwrap();
        assert_eq!(cmd.payload_count(), 1);
        assert!(cmd.taxonomy.referenced_ids().is_empty());
    }

    #[test]
    fn test_operation_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&Operation::Created).unwrap(),
            "\"created\""
        );
        assert_eq!(Operation::Updated.as_str(), "updated");
    }
}
