//! Transactional question upsert with relationship rewrite.
//!
//! All steps run in one SQLite transaction: natural-key lookup, overlay of
//! the stored identity onto the fresh aggregate, document upsert, and the
//! delete-then-insert relationship rewrite. Any failing step aborts the
//! whole transaction, so readers never observe partial state.

use chrono::Utc;
use rusqlite::Connection;

use quizbank_core::command::{CommandContext, Operation, UpsertOutcome, UpsertQuestionCommand};
use quizbank_core::types::{Question, QuestionStatus, Relationship};
use quizbank_core::{QuizBankError, Result};
use quizbank_storage::repositories::{questions, relationships};

use crate::strategy::QuestionAggregate;

/// Execute the upsert inside a fresh transaction.
pub fn execute(
    conn: &mut Connection,
    ctx: &CommandContext,
    cmd: &UpsertQuestionCommand,
    aggregate: QuestionAggregate,
) -> Result<UpsertOutcome> {
    let tx = conn
        .transaction()
        .map_err(|e| QuizBankError::TransactionFailed(format!("cannot begin transaction: {}", e)))?;

    let outcome = run(&tx, cmd, aggregate)?;

    tx.commit()
        .map_err(|e| QuizBankError::TransactionFailed(format!("cannot commit upsert: {}", e)))?;

    tracing::debug!(
        request_id = %ctx.request_id,
        question_id = outcome.question_id,
        operation = outcome.operation.as_str(),
        relationships = outcome.taxonomy_relationships_count,
        "question upsert committed"
    );

    Ok(outcome)
}

fn run(
    tx: &Connection,
    cmd: &UpsertQuestionCommand,
    aggregate: QuestionAggregate,
) -> Result<UpsertOutcome> {
    let now = Utc::now();

    let existing = questions::find_by_natural_key(tx, cmd.user_id, cmd.bank_id, &cmd.source_question_id)?;

    // The aggregate is a fresh value; reconcile it with the stored identity
    // before the write. created_at never moves after the first persistence.
    let (operation, aggregate, surrogate_id, published_at, archived_at) = match &existing {
        Some(stored) => (
            Operation::Updated,
            aggregate.with_created_at(stored.created_at),
            stored.id,
            stored.published_at,
            stored.archived_at,
        ),
        None => (
            Operation::Created,
            aggregate.with_created_at(now),
            0,
            None,
            None,
        ),
    };

    let created_at = aggregate
        .created_at
        .ok_or_else(|| QuizBankError::Upsert("aggregate missing reconciled created_at".into()))?;

    // Status transitions stamp their timestamp once and keep it thereafter
    let published_at = match aggregate.status {
        QuestionStatus::Published => published_at.or(Some(now)),
        _ => published_at,
    };
    let archived_at = match aggregate.status {
        QuestionStatus::Archived => archived_at.or(Some(now)),
        _ => archived_at,
    };

    let question = Question {
        id: surrogate_id,
        user_id: cmd.user_id,
        bank_id: cmd.bank_id,
        source_question_id: cmd.source_question_id.clone(),
        question_type: aggregate.question_type,
        title: aggregate.title,
        content: aggregate.content,
        status: aggregate.status,
        points: aggregate.points,
        display_order: aggregate.display_order,
        solution_explanation: aggregate.solution_explanation,
        payload: aggregate.payload,
        attachments: aggregate.attachments,
        question_settings: aggregate.question_settings,
        metadata: aggregate.metadata,
        created_at,
        updated_at: now,
        published_at,
        archived_at,
    };

    let question_id = questions::upsert_by_natural_key(tx, &question)?;

    // Rewrite the owned relationship set: no extras, no residue
    let edges: Vec<Relationship> = cmd
        .taxonomy
        .referenced_ids()
        .into_iter()
        .map(|(taxonomy_type, taxonomy_id)| Relationship {
            user_id: cmd.user_id,
            bank_id: cmd.bank_id,
            question_id,
            taxonomy_type,
            taxonomy_id,
        })
        .collect();
    let taxonomy_relationships_count = relationships::replace_for_question(tx, question_id, &edges)?;

    Ok(UpsertOutcome {
        question_id,
        source_question_id: cmd.source_question_id.clone(),
        operation,
        taxonomy_relationships_count,
    })
}
