//! Per-question-type semantic validation and aggregate construction.
//!
//! The three types form a closed set; dispatch is a lookup by discriminator,
//! not open-ended reflection. Each strategy validates its own payload and
//! returns an aggregate carrying no persistence identity — the upsert engine
//! assigns the surrogate id and reconciles `created_at` after its lookup.

use chrono::{DateTime, Utc};
use quizbank_core::command::UpsertQuestionCommand;
use quizbank_core::types::{QuestionStatus, QuestionType, TypePayload};
use quizbank_core::validation::{
    validate_display_order, validate_points, validate_required_text, validate_source_question_id,
    validate_time_limit, MAX_ESSAY_WORDS, MAX_EXPLANATION_LEN, MAX_OPTION_TEXT_LEN,
    MAX_RUBRIC_CRITERION_LEN, MAX_RUBRIC_POINTS, MCQ_MAX_OPTIONS, MCQ_MIN_OPTIONS,
};
use quizbank_core::{QuizBankError, Result};

/// The validated value a strategy hands to the upsert engine.
///
/// `created_at` starts empty; the engine fills it from the stored document
/// (update) or the transaction clock (create) before the write.
#[derive(Debug, Clone)]
pub struct QuestionAggregate {
    pub question_type: QuestionType,
    pub title: String,
    pub content: String,
    pub status: QuestionStatus,
    pub points: Option<i64>,
    pub display_order: Option<i64>,
    pub solution_explanation: Option<String>,
    pub payload: TypePayload,
    pub attachments: Option<Vec<serde_json::Value>>,
    pub question_settings: Option<serde_json::Value>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: Option<DateTime<Utc>>,
}

impl QuestionAggregate {
    /// Fill the reconciled creation time. Called exactly once by the engine
    /// between lookup and write.
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }
}

/// A question-type strategy: semantic validation plus aggregate build.
pub trait QuestionTypeStrategy: Send + Sync {
    fn question_type(&self) -> QuestionType;

    /// Validate the command's type payload and assemble the aggregate.
    fn build(&self, cmd: &UpsertQuestionCommand) -> Result<QuestionAggregate>;
}

/// Look up the strategy for a question type.
pub fn strategy_for(question_type: QuestionType) -> &'static dyn QuestionTypeStrategy {
    match question_type {
        QuestionType::Mcq => &McqStrategy,
        QuestionType::TrueFalse => &TrueFalseStrategy,
        QuestionType::Essay => &EssayStrategy,
    }
}

/// Validate the type-independent fields and return the status.
fn common_fields(cmd: &UpsertQuestionCommand) -> Result<QuestionStatus> {
    validate_source_question_id(&cmd.source_question_id)?;
    validate_required_text(&cmd.title, "title")?;
    validate_required_text(&cmd.content, "content")?;
    validate_points(cmd.points)?;
    validate_display_order(cmd.display_order)?;
    QuestionStatus::parse(&cmd.status)
}

fn assemble(
    cmd: &UpsertQuestionCommand,
    status: QuestionStatus,
    payload: TypePayload,
) -> QuestionAggregate {
    QuestionAggregate {
        question_type: payload.question_type(),
        title: cmd.title.clone(),
        content: cmd.content.clone(),
        status,
        points: cmd.points,
        display_order: cmd.display_order,
        solution_explanation: cmd.solution_explanation.clone(),
        payload,
        attachments: cmd.attachments.clone(),
        question_settings: cmd.question_settings.clone(),
        metadata: cmd.metadata.clone(),
        created_at: None,
    }
}

fn rule(code: &'static str, message: String) -> QuizBankError {
    QuizBankError::TypeRule { code, message }
}

/// Multiple-choice questions: 2..=10 options, at least one correct, multiple
/// correct only when allowed, bounded option text and time limit.
pub struct McqStrategy;

impl QuestionTypeStrategy for McqStrategy {
    fn question_type(&self) -> QuestionType {
        QuestionType::Mcq
    }

    fn build(&self, cmd: &UpsertQuestionCommand) -> Result<QuestionAggregate> {
        let status = common_fields(cmd)?;
        let data = cmd.mcq_data.as_ref().ok_or_else(|| {
            rule(
                "MCQ_DATA_REQUIRED",
                "mcq questions require mcq_data".to_string(),
            )
        })?;

        if data.options.len() < MCQ_MIN_OPTIONS || data.options.len() > MCQ_MAX_OPTIONS {
            return Err(rule(
                "MCQ_OPTION_COUNT_INVALID",
                format!(
                    "expected {}..={} options, got {}",
                    MCQ_MIN_OPTIONS,
                    MCQ_MAX_OPTIONS,
                    data.options.len()
                ),
            ));
        }

        for (index, option) in data.options.iter().enumerate() {
            if option.text.trim().is_empty() {
                return Err(rule(
                    "MCQ_OPTION_TEXT_INVALID",
                    format!("option {} text must not be blank", index + 1),
                ));
            }
            if option.text.len() > MAX_OPTION_TEXT_LEN {
                return Err(rule(
                    "MCQ_OPTION_TEXT_INVALID",
                    format!(
                        "option {} text too long: {} > {} characters",
                        index + 1,
                        option.text.len(),
                        MAX_OPTION_TEXT_LEN
                    ),
                ));
            }
        }

        let correct_count = data.options.iter().filter(|o| o.is_correct).count();
        if correct_count == 0 {
            return Err(rule(
                "MCQ_NO_CORRECT_OPTION",
                "at least one option must be correct".to_string(),
            ));
        }
        if correct_count > 1 && !data.allow_multiple_correct {
            return Err(rule(
                "MCQ_MULTIPLE_CORRECT_NOT_ALLOWED",
                format!(
                    "{} options marked correct but allow_multiple_correct is false",
                    correct_count
                ),
            ));
        }

        validate_time_limit(data.time_limit_seconds, "MCQ_TIME_LIMIT_INVALID")?;

        Ok(assemble(cmd, status, TypePayload::Mcq(data.clone())))
    }
}

/// True/false questions: boolean answer, optional bounded explanation.
pub struct TrueFalseStrategy;

impl QuestionTypeStrategy for TrueFalseStrategy {
    fn question_type(&self) -> QuestionType {
        QuestionType::TrueFalse
    }

    fn build(&self, cmd: &UpsertQuestionCommand) -> Result<QuestionAggregate> {
        let status = common_fields(cmd)?;
        let data = cmd.true_false_data.as_ref().ok_or_else(|| {
            rule(
                "TRUE_FALSE_DATA_REQUIRED",
                "true_false questions require true_false_data".to_string(),
            )
        })?;

        if let Some(explanation) = &data.explanation {
            if explanation.trim().is_empty() {
                return Err(rule(
                    "TRUE_FALSE_EXPLANATION_INVALID",
                    "explanation must not be blank when present".to_string(),
                ));
            }
            if explanation.len() > MAX_EXPLANATION_LEN {
                return Err(rule(
                    "TRUE_FALSE_EXPLANATION_INVALID",
                    format!(
                        "explanation too long: {} > {} characters",
                        explanation.len(),
                        MAX_EXPLANATION_LEN
                    ),
                ));
            }
        }

        validate_time_limit(data.time_limit_seconds, "TRUE_FALSE_TIME_LIMIT_INVALID")?;

        Ok(assemble(cmd, status, TypePayload::TrueFalse(data.clone())))
    }
}

/// Essay questions: consistent word budget and a bounded optional rubric.
pub struct EssayStrategy;

impl QuestionTypeStrategy for EssayStrategy {
    fn question_type(&self) -> QuestionType {
        QuestionType::Essay
    }

    fn build(&self, cmd: &UpsertQuestionCommand) -> Result<QuestionAggregate> {
        let status = common_fields(cmd)?;
        let data = cmd.essay_data.as_ref().ok_or_else(|| {
            rule(
                "ESSAY_DATA_REQUIRED",
                "essay questions require essay_data".to_string(),
            )
        })?;

        if data.min_words < 0
            || data.max_words <= 0
            || data.max_words > MAX_ESSAY_WORDS
            || data.min_words > data.max_words
        {
            return Err(rule(
                "ESSAY_WORD_LIMIT_INVALID",
                format!(
                    "word limits must satisfy 0 <= min_words <= max_words <= {}, got min={} max={}",
                    MAX_ESSAY_WORDS, data.min_words, data.max_words
                ),
            ));
        }

        if let Some(rubric) = &data.rubric {
            for (index, criterion) in rubric.iter().enumerate() {
                if criterion.criterion.trim().is_empty() {
                    return Err(rule(
                        "ESSAY_RUBRIC_INVALID",
                        format!("rubric criterion {} must not be blank", index + 1),
                    ));
                }
                if criterion.criterion.len() > MAX_RUBRIC_CRITERION_LEN {
                    return Err(rule(
                        "ESSAY_RUBRIC_INVALID",
                        format!(
                            "rubric criterion {} too long: {} > {} characters",
                            index + 1,
                            criterion.criterion.len(),
                            MAX_RUBRIC_CRITERION_LEN
                        ),
                    ));
                }
                if criterion.max_points <= 0 || criterion.max_points > MAX_RUBRIC_POINTS {
                    return Err(rule(
                        "ESSAY_RUBRIC_INVALID",
                        format!(
                            "rubric criterion {} max_points must be in (0, {}], got {}",
                            index + 1,
                            MAX_RUBRIC_POINTS,
                            criterion.max_points
                        ),
                    ));
                }
            }
        }

        Ok(assemble(cmd, status, TypePayload::Essay(data.clone())))
    }
}
