//! One-shot default-bank bootstrap for a new user.
//!
//! Inserts the bank registry and the seeded taxonomy set in a single
//! transaction: either both documents are visible or neither.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::info;

use quizbank_core::command::{AvailableTaxonomy, BootstrapCommand, BootstrapOutcome};
use quizbank_core::types::{
    BanksPerUser, CategoryItem, DifficultyLevel, QuestionBank, TagItem, TaxonomySet,
};
use quizbank_core::validation::{validate_email, validate_user_id};
use quizbank_core::{QuizBankError, Result};
use quizbank_storage::repositories::{banks, taxonomy};

/// Name of the bank every user starts with.
pub const DEFAULT_BANK_NAME: &str = "Default Question Bank";

/// Description of the seeded bank.
pub const DEFAULT_BANK_DESCRIPTION: &str = "Automatically created question bank";

/// Seed categories, all at level 1: `(id, name)`.
const DEFAULT_CATEGORIES: &[(&str, &str)] = &[
    ("general", "General"),
    ("mathematics", "Mathematics"),
    ("science", "Science"),
    ("language", "Language"),
];

/// Seed tags: `(id, name, color)`.
const DEFAULT_TAGS: &[(&str, &str, &str)] = &[
    ("beginner", "Beginner", "#2e7d32"),
    ("intermediate", "Intermediate", "#f9a825"),
    ("advanced", "Advanced", "#c62828"),
    ("practice", "Practice", "#1565c0"),
];

/// Seed difficulty levels: `(level, numeric_value, description)`.
const DEFAULT_DIFFICULTY: &[(&str, i64, &str)] = &[
    ("easy", 1, "Suitable for newcomers"),
    ("medium", 2, "Requires some familiarity"),
    ("hard", 3, "Challenges experienced learners"),
];

/// Execute the bootstrap inside a fresh transaction.
pub fn execute(conn: &mut Connection, cmd: &BootstrapCommand) -> Result<BootstrapOutcome> {
    validate_user_id(cmd.user_id)?;
    if let Some(email) = &cmd.user_email {
        validate_email(email)?;
    }

    if banks::exists(conn, cmd.user_id)? {
        return Err(QuizBankError::DuplicateUser(format!(
            "user {} already has a question bank registry",
            cmd.user_id
        )));
    }

    let now = Utc::now();
    // Time-derived so later banks sort after earlier ones
    let bank_id = now.timestamp_micros();

    let registry = BanksPerUser {
        user_id: cmd.user_id,
        default_bank_id: bank_id,
        user_email: cmd.user_email.clone(),
        metadata: cmd.metadata.clone(),
        banks: vec![QuestionBank {
            bank_id,
            name: DEFAULT_BANK_NAME.to_string(),
            description: Some(DEFAULT_BANK_DESCRIPTION.to_string()),
            is_active: true,
            created_at: now,
        }],
        created_at: now,
    };
    let taxonomy_set = default_taxonomy_set(cmd.user_id, bank_id, now);

    let tx = conn
        .transaction()
        .map_err(|e| QuizBankError::TransactionFailed(format!("cannot begin transaction: {}", e)))?;
    banks::insert(&tx, &registry)?;
    taxonomy::insert(&tx, &taxonomy_set)?;
    tx.commit()
        .map_err(|e| QuizBankError::TransactionFailed(format!("cannot commit bootstrap: {}", e)))?;

    info!(user_id = cmd.user_id, bank_id, "default bank bootstrapped");

    Ok(BootstrapOutcome {
        user_id: cmd.user_id,
        bank_id,
        bank_name: DEFAULT_BANK_NAME.to_string(),
        description: DEFAULT_BANK_DESCRIPTION.to_string(),
        is_active: true,
        taxonomy_set_created: true,
        available_taxonomy: project_taxonomy(&taxonomy_set),
        created_at: now,
    })
}

/// The seeded taxonomy universe for a fresh bank.
pub fn default_taxonomy_set(user_id: i64, bank_id: i64, created_at: DateTime<Utc>) -> TaxonomySet {
    TaxonomySet {
        user_id,
        bank_id,
        categories: DEFAULT_CATEGORIES
            .iter()
            .map(|(id, name)| CategoryItem {
                level: 1,
                id: (*id).to_string(),
                name: (*name).to_string(),
                slug: (*id).to_string(),
                parent_id: None,
            })
            .collect(),
        tags: DEFAULT_TAGS
            .iter()
            .map(|(id, name, color)| TagItem {
                id: (*id).to_string(),
                name: (*name).to_string(),
                color: Some((*color).to_string()),
            })
            .collect(),
        quizzes: vec![],
        difficulty_levels: DEFAULT_DIFFICULTY
            .iter()
            .map(|(level, numeric_value, description)| DifficultyLevel {
                level: (*level).to_string(),
                numeric_value: *numeric_value,
                description: Some((*description).to_string()),
            })
            .collect(),
        created_at,
    }
}

/// Project the seeded set into the response shape: category names per level,
/// tag names, difficulty levels.
fn project_taxonomy(set: &TaxonomySet) -> AvailableTaxonomy {
    let mut categories: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for category in &set.categories {
        categories
            .entry(format!("level_{}", category.level))
            .or_default()
            .push(category.name.clone());
    }

    AvailableTaxonomy {
        categories,
        tags: set.tags.iter().map(|t| t.name.clone()).collect(),
        difficulty: set
            .difficulty_levels
            .iter()
            .map(|d| d.level.clone())
            .collect(),
    }
}
