//! Primitive input validation for QuizBank commands.
//!
//! These validators cover the semantic field checks shared by the
//! question-type strategies and the bootstrap path. Structural envelope
//! validation (required fields, JSON binding) is the transport's concern.

use crate::{QuizBankError, Result};

/// Minimum number of MCQ options.
pub const MCQ_MIN_OPTIONS: usize = 2;

/// Maximum number of MCQ options.
pub const MCQ_MAX_OPTIONS: usize = 10;

/// Maximum length for a single MCQ option text.
pub const MAX_OPTION_TEXT_LEN: usize = 500;

/// Maximum time limit for a timed question, in seconds.
pub const MAX_TIME_LIMIT_SECS: i64 = 3600;

/// Maximum length for a true/false explanation.
pub const MAX_EXPLANATION_LEN: usize = 2000;

/// Maximum essay word budget.
pub const MAX_ESSAY_WORDS: i64 = 10_000;

/// Maximum length for a rubric criterion text.
pub const MAX_RUBRIC_CRITERION_LEN: usize = 1000;

/// Maximum points a rubric criterion may award.
pub const MAX_RUBRIC_POINTS: i64 = 1000;

/// Maximum page size for question queries.
pub const MAX_PAGE_SIZE: i64 = 100;

/// Sort fields accepted by the question query planner.
pub const SORTABLE_FIELDS: &[&str] =
    &["title", "created_at", "updated_at", "display_order", "points"];

/// Validate that a required text field is non-blank.
pub fn validate_required_text(value: &str, field_name: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(QuizBankError::MissingRequiredField(format!(
            "{} must not be blank",
            field_name
        )));
    }
    Ok(())
}

/// Validate the client-supplied stable question identifier.
///
/// Requirements:
/// - Not blank
/// - <= 64 characters (a time-ordered UUID fits comfortably)
pub fn validate_source_question_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(QuizBankError::MissingRequiredField(
            "source_question_id must not be blank".to_string(),
        ));
    }
    if id.len() > 64 {
        return Err(QuizBankError::ConstraintViolation(format!(
            "source_question_id too long: {} > 64 characters",
            id.len()
        )));
    }
    Ok(())
}

/// Validate an optional time limit: when present, in (0, 3600] seconds.
pub fn validate_time_limit(seconds: Option<i64>, code: &'static str) -> Result<()> {
    if let Some(seconds) = seconds {
        if seconds <= 0 || seconds > MAX_TIME_LIMIT_SECS {
            return Err(QuizBankError::TypeRule {
                code,
                message: format!(
                    "time_limit_seconds must be in (0, {}], got {}",
                    MAX_TIME_LIMIT_SECS, seconds
                ),
            });
        }
    }
    Ok(())
}

/// Validate optional points: when present, >= 0.
pub fn validate_points(points: Option<i64>) -> Result<()> {
    if let Some(points) = points {
        if points < 0 {
            return Err(QuizBankError::ConstraintViolation(format!(
                "points must be >= 0, got {}",
                points
            )));
        }
    }
    Ok(())
}

/// Validate optional display order: when present, >= 0.
pub fn validate_display_order(display_order: Option<i64>) -> Result<()> {
    if let Some(order) = display_order {
        if order < 0 {
            return Err(QuizBankError::ConstraintViolation(format!(
                "display_order must be >= 0, got {}",
                order
            )));
        }
    }
    Ok(())
}

/// Validate a user email for the bootstrap path.
///
/// A parseable mailbox shape is enough here: one `@`, non-empty local part,
/// and a dotted domain without whitespace.
pub fn validate_email(email: &str) -> Result<()> {
    let mut parts = email.split('@');
    let (local, domain) = match (parts.next(), parts.next(), parts.next()) {
        (Some(local), Some(domain), None) => (local, domain),
        _ => {
            return Err(QuizBankError::ConstraintViolation(format!(
                "user_email '{}' is not a valid email address",
                email
            )))
        }
    };

    let domain_ok = domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !domain.contains(char::is_whitespace);
    if local.is_empty() || local.contains(char::is_whitespace) || !domain_ok {
        return Err(QuizBankError::ConstraintViolation(format!(
            "user_email '{}' is not a valid email address",
            email
        )));
    }
    Ok(())
}

/// Validate a positive user id.
pub fn validate_user_id(user_id: i64) -> Result<()> {
    if user_id <= 0 {
        return Err(QuizBankError::ConstraintViolation(format!(
            "user_id must be > 0, got {}",
            user_id
        )));
    }
    Ok(())
}
