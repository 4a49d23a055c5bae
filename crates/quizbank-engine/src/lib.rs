//! QuizBank Engine
//!
//! The command and query services of the QuizBank backend:
//! - Admission control ([`chain`]) and per-type semantics ([`strategy`])
//! - The transactional upsert engine ([`upsert`]) and default-bank
//!   bootstrap ([`bootstrap`])
//! - The question query planner ([`query`])
//! - The security audit sink ([`audit`]), bounded retry ([`retry`]), and
//!   engine metrics ([`metrics`])
//!
//! [`QuizBankService`] is the facade transports call into. It is cheap to
//! clone and safe to share: all state is the backend handle, the audit sink
//! handle, and atomic metric registries.

use std::sync::Arc;

pub mod audit;
pub mod bootstrap;
pub mod chain;
pub mod metrics;
pub mod query;
pub mod retry;
pub mod strategy;
pub mod upsert;

use quizbank_core::command::{
    BootstrapCommand, BootstrapOutcome, CommandContext, UpsertOutcome, UpsertQuestionCommand,
};
use quizbank_core::types::QuestionType;
use quizbank_core::{QuizBankError, Result};
use quizbank_storage::BankBackend;

pub use audit::{security_event_writer_task, AuditConfig, SecurityAuditSink};
pub use query::{QuestionPage, QuestionQueryParams};
pub use retry::RetryPolicy;

use chain::ValidationChain;

/// The engine facade: one value per process, shared across request tasks.
#[derive(Clone)]
pub struct QuizBankService {
    backend: Arc<dyn BankBackend>,
    chain: Arc<ValidationChain>,
    retry: RetryPolicy,
}

impl QuizBankService {
    /// Build the service with the default retry policy.
    pub fn new(backend: Arc<dyn BankBackend>, audit: SecurityAuditSink) -> Self {
        Self::with_retry_policy(backend, audit, RetryPolicy::from_env())
    }

    /// Build the service with an explicit retry policy.
    pub fn with_retry_policy(
        backend: Arc<dyn BankBackend>,
        audit: SecurityAuditSink,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            backend,
            chain: Arc::new(ValidationChain::new(audit, retry.clone())),
            retry,
        }
    }

    /// Bootstrap the default bank for a new user.
    pub fn bootstrap_default_bank(&self, cmd: &BootstrapCommand) -> Result<BootstrapOutcome> {
        metrics::time_operation("bootstrap_default_bank", || {
            let mut conn = self.backend.get_connection()?;
            let result = retry::with_retry("bootstrap_transaction", &self.retry, || {
                bootstrap::execute(&mut conn, cmd)
            })
            .map_err(flatten_retry_exhaustion);
            record(&result, "bootstrap_default_bank");
            result
        })
    }

    /// Validate and upsert a question, rewriting its relationship set.
    pub fn upsert_question(
        &self,
        ctx: &CommandContext,
        cmd: &UpsertQuestionCommand,
    ) -> Result<UpsertOutcome> {
        metrics::time_operation("upsert_question", || {
            let mut conn = self.backend.get_connection()?;

            let result = (|| {
                self.chain.run(&conn, ctx, cmd)?;

                let question_type = QuestionType::parse(&cmd.question_type)?;
                let aggregate = strategy::strategy_for(question_type).build(cmd)?;

                retry::with_retry("upsert_transaction", &self.retry, || {
                    upsert::execute(&mut conn, ctx, cmd, aggregate.clone())
                })
                .map_err(flatten_retry_exhaustion)
            })();

            record(&result, "upsert_question");
            result
        })
    }

    /// Plan and execute a question query.
    pub fn query_questions(
        &self,
        user_id: i64,
        bank_id: i64,
        params: &QuestionQueryParams,
    ) -> Result<QuestionPage> {
        metrics::time_operation("query_questions", || {
            let conn = self.backend.get_connection()?;
            let result = query::execute(&conn, user_id, bank_id, params);
            record(&result, "query_questions");
            result
        })
    }
}

/// A transaction whose retry budget ran out failed as a transaction.
fn flatten_retry_exhaustion(err: QuizBankError) -> QuizBankError {
    match err {
        QuizBankError::RetryExhausted(message) => QuizBankError::TransactionFailed(message),
        other => other,
    }
}

fn record<T>(result: &Result<T>, operation: &str) {
    match result {
        Ok(_) => metrics::record_operation(operation, "success"),
        Err(err) => metrics::record_operation(operation, err.code()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quizbank_core::command::Operation;
    use quizbank_core::init_sqlite_schema;
    use quizbank_storage::repositories::{questions, relationships};
    use rusqlite::Connection;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU64, Ordering};

    static DB_SEQ: AtomicU64 = AtomicU64::new(0);

    /// File-backed fixture so the service sees one database across
    /// connections.
    struct Fixture {
        service: QuizBankService,
        path: PathBuf,
        _dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let path = dir
                .path()
                .join(format!("quizbank-{}.db", DB_SEQ.fetch_add(1, Ordering::SeqCst)));
            let backend: Arc<dyn BankBackend> =
                Arc::new(quizbank_storage::LocalSqliteBackend::new(&path));
            let (sink, _receiver) = SecurityAuditSink::new(&AuditConfig::default());
            let service = QuizBankService::with_retry_policy(
                backend,
                sink,
                RetryPolicy::default().with_base_delay(std::time::Duration::from_millis(1)),
            );
            Self {
                service,
                path,
                _dir: dir,
            }
        }

        fn conn(&self) -> Connection {
            let conn = Connection::open(&self.path).unwrap();
            init_sqlite_schema(&conn).unwrap();
            conn
        }
    }

    fn upsert_command(
        user_id: i64,
        bank_id: i64,
        source_id: &str,
        title: &str,
    ) -> UpsertQuestionCommand {
        let mut cmd: UpsertQuestionCommand = serde_json::from_value(serde_json::json!({
            "source_question_id": source_id,
            "question_type": "mcq",
            "title": title,
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

    #[test]
    fn test_bootstrap_then_first_upsert() {
        let fixture = Fixture::new();
        let outcome = fixture
            .service
            .bootstrap_default_bank(&BootstrapCommand {
                user_id: 42,
                user_email: None,
                metadata: None,
            })
            .unwrap();
        assert!(outcome.taxonomy_set_created);

        let ctx = CommandContext::new(42, "req-1");
        let upserted = fixture
            .service
            .upsert_question(&ctx, &upsert_command(42, outcome.bank_id, "q-1", "First"))
            .unwrap();
        assert_eq!(upserted.operation, Operation::Created);
        assert_eq!(upserted.taxonomy_relationships_count, 2);
    }

    #[test]
    fn test_replay_reports_updated() {
        let fixture = Fixture::new();
        let bank_id = fixture
            .service
            .bootstrap_default_bank(&BootstrapCommand {
                user_id: 42,
                user_email: None,
                metadata: None,
            })
            .unwrap()
            .bank_id;

        let ctx = CommandContext::new(42, "req-1");
        let first = fixture
            .service
            .upsert_question(&ctx, &upsert_command(42, bank_id, "q-1", "Original"))
            .unwrap();
        let second = fixture
            .service
            .upsert_question(&ctx, &upsert_command(42, bank_id, "q-1", "Renamed"))
            .unwrap();

        assert_eq!(first.operation, Operation::Created);
        assert_eq!(second.operation, Operation::Updated);
        assert_eq!(first.question_id, second.question_id);
    }

    #[test]
    fn test_failed_validation_leaves_stores_unchanged() {
        let fixture = Fixture::new();
        let bank_id = fixture
            .service
            .bootstrap_default_bank(&BootstrapCommand {
                user_id: 42,
                user_email: None,
                metadata: None,
            })
            .unwrap()
            .bank_id;

        let ctx = CommandContext::new(42, "req-1");
        let mut cmd = upsert_command(42, bank_id, "q-3", "Bad taxonomy");
        cmd.taxonomy.categories.as_mut().unwrap().level_1 = Some("does-not-exist".into());

        let err = fixture.service.upsert_question(&ctx, &cmd).unwrap_err();
        assert_eq!(err.code(), "TAXONOMY_REFERENCE_NOT_FOUND");

        let conn = fixture.conn();
        assert!(questions::find_by_natural_key(&conn, 42, bank_id, "q-3")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_query_round_trip_with_taxonomy_filter() {
        let fixture = Fixture::new();
        let bank_id = fixture
            .service
            .bootstrap_default_bank(&BootstrapCommand {
                user_id: 42,
                user_email: None,
                metadata: None,
            })
            .unwrap()
            .bank_id;

        let ctx = CommandContext::new(42, "req-1");
        fixture
            .service
            .upsert_question(&ctx, &upsert_command(42, bank_id, "q-1", "Findable"))
            .unwrap();

        let mut params = QuestionQueryParams::default();
        params.category_level_1 = Some("general".into());
        params.difficulty_level = Some("easy".into());
        params.status = Some("draft".into());

        let page = fixture
            .service
            .query_questions(42, bank_id, &params)
            .unwrap();
        assert_eq!(page.pagination.total_elements, 1);
        assert_eq!(page.questions[0].title, "Findable");
        assert_eq!(page.filters.result_count, 1);
    }

    #[test]
    fn test_relationship_rewrite_observed_through_service() {
        let fixture = Fixture::new();
        let bank_id = fixture
            .service
            .bootstrap_default_bank(&BootstrapCommand {
                user_id: 42,
                user_email: None,
                metadata: None,
            })
            .unwrap()
            .bank_id;

        let ctx = CommandContext::new(42, "req-1");
        let mut tagged = upsert_command(42, bank_id, "q-2", "Tagged");
        tagged.taxonomy.tags = vec!["beginner".into()];
        let first = fixture.service.upsert_question(&ctx, &tagged).unwrap();
        assert_eq!(first.taxonomy_relationships_count, 3);

        let untagged = upsert_command(42, bank_id, "q-2", "Tagged");
        let second = fixture.service.upsert_question(&ctx, &untagged).unwrap();
        assert_eq!(second.taxonomy_relationships_count, 2);

        let conn = fixture.conn();
        let edges = relationships::find_by_question(&conn, second.question_id).unwrap();
        assert_eq!(edges.len(), 2);
    }
}
