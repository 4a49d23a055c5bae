//! Admission control for write commands.
//!
//! An ordered chain of handlers, each passing the command on or
//! short-circuiting with a typed failure:
//!
//! 1. Identity binding - the path-supplied user id must be the
//!    authenticated caller's
//! 2. Ownership - the caller owns the bank and the bank is active
//! 3. Taxonomy references - every referenced taxonomy id exists in the
//!    bank's set, and category levels have no gaps
//! 4. Data integrity - the type discriminator matches exactly one payload
//!
//! Each step runs under the bounded-retry helper for transient I/O and
//! records its outcome in the engine metrics. Identity and ownership
//! violations are appended to the security audit sink. The chain holds no
//! per-command state and is safe to share across concurrent commands.

use rusqlite::Connection;
use serde_json::json;
use tracing::warn;

use quizbank_core::command::{CommandContext, UpsertQuestionCommand};
use quizbank_core::types::{QuestionType, SecurityEvent, Severity};
use quizbank_core::{QuizBankError, Result};
use quizbank_storage::repositories::{banks, taxonomy};

use crate::audit::SecurityAuditSink;
use crate::metrics;
use crate::retry::{with_retry, RetryPolicy};

/// Security event type for a path identity that contradicts the token.
pub const PATH_PARAMETER_MANIPULATION: &str = "PATH_PARAMETER_MANIPULATION";

/// Security event type for bank access the token does not grant.
pub const TOKEN_PRIVILEGE_ESCALATION: &str = "TOKEN_PRIVILEGE_ESCALATION";

/// One step of the admission pipeline.
pub trait ValidationHandler: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Ok(())` passes the command to the next handler; an error
    /// short-circuits the chain.
    fn validate(
        &self,
        conn: &Connection,
        ctx: &CommandContext,
        cmd: &UpsertQuestionCommand,
    ) -> Result<()>;
}

/// The fixed-order admission pipeline.
pub struct ValidationChain {
    handlers: Vec<Box<dyn ValidationHandler>>,
    retry: RetryPolicy,
}

impl ValidationChain {
    /// Build the chain in its fixed order.
    pub fn new(audit: SecurityAuditSink, retry: RetryPolicy) -> Self {
        Self {
            handlers: vec![
                Box::new(IdentityBindingHandler {
                    audit: audit.clone(),
                }),
                Box::new(OwnershipHandler { audit }),
                Box::new(TaxonomyReferenceHandler),
                Box::new(DataIntegrityHandler),
            ],
            retry,
        }
    }

    /// Run every handler in order, failing fast on the first rejection.
    pub fn run(
        &self,
        conn: &Connection,
        ctx: &CommandContext,
        cmd: &UpsertQuestionCommand,
    ) -> Result<()> {
        for handler in &self.handlers {
            let step = handler.name();
            match with_retry(step, &self.retry, || handler.validate(conn, ctx, cmd)) {
                Ok(()) => metrics::record_validation_step(step, true),
                Err(err) => {
                    metrics::record_validation_step(step, false);
                    metrics::record_validation_failure(err.code());
                    warn!(
                        step,
                        code = err.code(),
                        request_id = %ctx.request_id,
                        user_id = cmd.user_id,
                        bank_id = cmd.bank_id,
                        "validation chain rejected command"
                    );
                    return Err(err);
                }
            }
        }
        Ok(())
    }
}

/// Step 1: the command's user id must be the authenticated caller's.
struct IdentityBindingHandler {
    audit: SecurityAuditSink,
}

impl ValidationHandler for IdentityBindingHandler {
    fn name(&self) -> &'static str {
        "identity_binding"
    }

    fn validate(
        &self,
        _conn: &Connection,
        ctx: &CommandContext,
        cmd: &UpsertQuestionCommand,
    ) -> Result<()> {
        if cmd.user_id == ctx.authenticated_user_id {
            return Ok(());
        }

        let mut event = SecurityEvent::new(
            PATH_PARAMETER_MANIPULATION,
            ctx.authenticated_user_id,
            Severity::Critical,
            ctx.request_id.clone(),
            json!({
                "path_user_id": cmd.user_id,
                "authenticated_user_id": ctx.authenticated_user_id,
                "bank_id": cmd.bank_id,
            }),
        );
        if let Some(session_id) = &ctx.session_id {
            event = event.with_session(session_id.clone());
        }
        if let Some(client_ip) = &ctx.client_ip {
            event = event.with_client_ip(client_ip.clone());
        }
        if let Some(user_agent) = &ctx.user_agent {
            event = event.with_user_agent(user_agent.clone());
        }
        self.audit.append(event);

        Err(QuizBankError::UnauthorizedAccess(format!(
            "path user id {} does not match the authenticated caller",
            cmd.user_id
        )))
    }
}

/// Step 2: the caller owns the bank and the bank accepts writes.
struct OwnershipHandler {
    audit: SecurityAuditSink,
}

impl OwnershipHandler {
    fn escalation_event(
        &self,
        ctx: &CommandContext,
        cmd: &UpsertQuestionCommand,
        severity: Severity,
        reason: &str,
    ) {
        let mut event = SecurityEvent::new(
            TOKEN_PRIVILEGE_ESCALATION,
            ctx.authenticated_user_id,
            severity,
            ctx.request_id.clone(),
            json!({
                "bank_id": cmd.bank_id,
                "reason": reason,
            }),
        );
        if let Some(session_id) = &ctx.session_id {
            event = event.with_session(session_id.clone());
        }
        if let Some(client_ip) = &ctx.client_ip {
            event = event.with_client_ip(client_ip.clone());
        }
        if let Some(user_agent) = &ctx.user_agent {
            event = event.with_user_agent(user_agent.clone());
        }
        self.audit.append(event);
    }
}

impl ValidationHandler for OwnershipHandler {
    fn name(&self) -> &'static str {
        "ownership"
    }

    fn validate(
        &self,
        conn: &Connection,
        ctx: &CommandContext,
        cmd: &UpsertQuestionCommand,
    ) -> Result<()> {
        if !banks::validate_ownership(conn, cmd.user_id, cmd.bank_id)? {
            self.escalation_event(ctx, cmd, Severity::Critical, "bank_not_owned");
            return Err(QuizBankError::UnauthorizedAccess(format!(
                "user {} does not own question bank {}",
                cmd.user_id, cmd.bank_id
            )));
        }

        if !banks::is_active(conn, cmd.user_id, cmd.bank_id)? {
            self.escalation_event(ctx, cmd, Severity::High, "bank_inactive");
            return Err(QuizBankError::UnauthorizedAccess(format!(
                "question bank {} is not active",
                cmd.bank_id
            )));
        }

        Ok(())
    }
}

/// Step 3: referenced taxonomy ids exist and category levels are gapless.
struct TaxonomyReferenceHandler;

impl ValidationHandler for TaxonomyReferenceHandler {
    fn name(&self) -> &'static str {
        "taxonomy_references"
    }

    fn validate(
        &self,
        conn: &Connection,
        _ctx: &CommandContext,
        cmd: &UpsertQuestionCommand,
    ) -> Result<()> {
        // Level N requires levels 1..N-1
        let levels = cmd.taxonomy.category_levels_present();
        for (index, level) in levels.iter().enumerate() {
            let expected = (index + 1) as u8;
            if *level != expected {
                return Err(QuizBankError::ConstraintViolation(format!(
                    "category level {} requires level {} to be selected",
                    level, expected
                )));
            }
        }

        let refs = cmd.taxonomy.referenced_ids();
        metrics::record_taxonomy_references(refs.len());
        if refs.is_empty() {
            return Ok(());
        }

        let unknown = taxonomy::get_unknown_references(conn, cmd.user_id, cmd.bank_id, &refs)?;
        if !unknown.is_empty() {
            let listing = unknown
                .iter()
                .map(|(taxonomy_type, id)| format!("{}:{}", taxonomy_type.as_str(), id))
                .collect::<Vec<_>>()
                .join(", ");
            return Err(QuizBankError::TaxonomyReferenceNotFound(format!(
                "unknown taxonomy references: {}",
                listing
            )));
        }

        Ok(())
    }
}

/// Step 4: exactly one type payload, matching the discriminator.
struct DataIntegrityHandler;

impl ValidationHandler for DataIntegrityHandler {
    fn name(&self) -> &'static str {
        "data_integrity"
    }

    fn validate(
        &self,
        _conn: &Connection,
        _ctx: &CommandContext,
        cmd: &UpsertQuestionCommand,
    ) -> Result<()> {
        let question_type = QuestionType::parse(&cmd.question_type)?;

        if cmd.payload_count() != 1 {
            return Err(QuizBankError::TypeDataMismatch(format!(
                "expected exactly one type payload, got {}",
                cmd.payload_count()
            )));
        }

        let matches = match question_type {
            QuestionType::Mcq => cmd.mcq_data.is_some(),
            QuestionType::TrueFalse => cmd.true_false_data.is_some(),
            QuestionType::Essay => cmd.essay_data.is_some(),
        };
        if !matches {
            return Err(QuizBankError::TypeDataMismatch(format!(
                "question_type '{}' does not match the supplied type payload",
                question_type.as_str()
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use quizbank_core::init_sqlite_schema;
    use quizbank_core::types::{
        BanksPerUser, CategoryItem, DifficultyLevel, QuestionBank, TagItem, TaxonomySet,
    };
    use quizbank_storage::repositories::{banks, taxonomy};
    use std::time::Duration;

    use crate::audit::{AuditConfig, SecurityAuditSink};

    fn seeded_conn(user_id: i64, bank_id: i64, active: bool) -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_sqlite_schema(&conn).unwrap();
        let now = Utc::now();
        banks::insert(
            &conn,
            &BanksPerUser {
                user_id,
                default_bank_id: bank_id,
                user_email: None,
                metadata: None,
                banks: vec![QuestionBank {
                    bank_id,
                    name: "Default Question Bank".into(),
                    description: None,
                    is_active: active,
                    created_at: now,
                }],
                created_at: now,
            },
        )
        .unwrap();
        taxonomy::insert(
            &conn,
            &TaxonomySet {
                user_id,
                bank_id,
                categories: vec![CategoryItem {
                    level: 1,
                    id: "general".into(),
                    name: "General".into(),
                    slug: "general".into(),
                    parent_id: None,
                }],
                tags: vec![TagItem {
                    id: "beginner".into(),
                    name: "Beginner".into(),
                    color: None,
                }],
                quizzes: vec![],
                difficulty_levels: vec![DifficultyLevel {
                    level: "easy".into(),
                    numeric_value: 1,
                    description: None,
                }],
                created_at: now,
            },
        )
        .unwrap();
        conn
    }

    fn command(user_id: i64, bank_id: i64) -> UpsertQuestionCommand {
        let mut cmd: UpsertQuestionCommand = serde_json::from_value(serde_json::json!({
            "source_question_id": "q-1",
            "question_type": "mcq",
            "title": "What is 2+2?",
            "content": "Pick one.",
            "status": "draft",
            "taxonomy": {
                "categories": {"level_1": "general"},
                "difficulty_level": "easy"
            },
            "mcq_data": {
                "options": [
                    {"text": "4", "is_correct": true},
                    {"text": "5", "is_correct": false}
                ]
            }
        }))
        .unwrap();
        cmd.user_id = user_id;
        cmd.bank_id = bank_id;
        cmd
    }

    fn chain_with_sink() -> (ValidationChain, tokio::sync::mpsc::Receiver<SecurityEvent>) {
        let (sink, receiver) = SecurityAuditSink::new(&AuditConfig::default());
        let retry = RetryPolicy::default().with_base_delay(Duration::from_millis(1));
        (ValidationChain::new(sink, retry), receiver)
    }

    fn ctx(user_id: i64) -> CommandContext {
        CommandContext::new(user_id, "req-1")
            .with_client_ip("10.0.0.1")
            .with_user_agent("tests")
    }

    #[test]
    fn test_valid_command_passes() {
        let conn = seeded_conn(42, 100, true);
        let (chain, _receiver) = chain_with_sink();
        chain.run(&conn, &ctx(42), &command(42, 100)).unwrap();
    }

    #[test]
    fn test_identity_mismatch_emits_critical_event() {
        let conn = seeded_conn(42, 100, true);
        let (chain, mut receiver) = chain_with_sink();

        let err = chain
            .run(&conn, &ctx(1002), &command(1001, 100))
            .unwrap_err();
        assert_eq!(err.code(), "UNAUTHORIZED_ACCESS");
        assert!(err.to_string().starts_with("UNAUTHORIZED_ACCESS: "));

        let event = receiver.try_recv().unwrap();
        assert_eq!(event.event_type, PATH_PARAMETER_MANIPULATION);
        assert_eq!(event.severity, Severity::Critical);
        assert_eq!(event.user_id, 1002);
        assert!(event.verify_checksum());
        // Exactly one event
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn test_unowned_bank_is_critical_escalation() {
        let conn = seeded_conn(42, 100, true);
        let (chain, mut receiver) = chain_with_sink();

        let err = chain.run(&conn, &ctx(42), &command(42, 999)).unwrap_err();
        assert_eq!(err.code(), "UNAUTHORIZED_ACCESS");

        let event = receiver.try_recv().unwrap();
        assert_eq!(event.event_type, TOKEN_PRIVILEGE_ESCALATION);
        assert_eq!(event.severity, Severity::Critical);
    }

    #[test]
    fn test_inactive_bank_is_high_escalation() {
        let conn = seeded_conn(42, 100, false);
        let (chain, mut receiver) = chain_with_sink();

        let err = chain.run(&conn, &ctx(42), &command(42, 100)).unwrap_err();
        assert_eq!(err.code(), "UNAUTHORIZED_ACCESS");

        let event = receiver.try_recv().unwrap();
        assert_eq!(event.event_type, TOKEN_PRIVILEGE_ESCALATION);
        assert_eq!(event.severity, Severity::High);
    }

    #[test]
    fn test_unknown_taxonomy_reference_lists_offenders() {
        let conn = seeded_conn(42, 100, true);
        let (chain, _receiver) = chain_with_sink();

        let mut cmd = command(42, 100);
        cmd.taxonomy.categories.as_mut().unwrap().level_1 = Some("does-not-exist".into());

        let err = chain.run(&conn, &ctx(42), &cmd).unwrap_err();
        assert_eq!(err.code(), "TAXONOMY_REFERENCE_NOT_FOUND");
        assert!(err
            .to_string()
            .contains("category_level_1:does-not-exist"));
    }

    #[test]
    fn test_category_gap_rejected() {
        let conn = seeded_conn(42, 100, true);
        let (chain, _receiver) = chain_with_sink();

        let mut cmd = command(42, 100);
        let categories = cmd.taxonomy.categories.as_mut().unwrap();
        categories.level_1 = None;
        categories.level_2 = Some("general".into());

        let err = chain.run(&conn, &ctx(42), &cmd).unwrap_err();
        assert_eq!(err.code(), "CONSTRAINT_VIOLATION");
    }

    #[test]
    fn test_type_payload_mismatch() {
        let conn = seeded_conn(42, 100, true);
        let (chain, _receiver) = chain_with_sink();

        let mut cmd = command(42, 100);
        cmd.question_type = "essay".into();
        let err = chain.run(&conn, &ctx(42), &cmd).unwrap_err();
        assert_eq!(err.code(), "TYPE_DATA_MISMATCH");

        let mut cmd = command(42, 100);
        cmd.question_type = "matching".into();
        let err = chain.run(&conn, &ctx(42), &cmd).unwrap_err();
        assert_eq!(err.code(), "INVALID_QUESTION_TYPE");
    }

    #[test]
    fn test_two_payloads_rejected() {
        let conn = seeded_conn(42, 100, true);
        let (chain, _receiver) = chain_with_sink();

        let mut cmd = command(42, 100);
        cmd.essay_data = Some(quizbank_core::types::EssayData {
            min_words: 1,
            max_words: 10,
            rubric: None,
        });
        let err = chain.run(&conn, &ctx(42), &cmd).unwrap_err();
        assert_eq!(err.code(), "TYPE_DATA_MISMATCH");
    }
}
