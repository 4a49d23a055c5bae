//! Reads and writes for question documents, including the full-text index
//! and the composed query path the planner hands down.

use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, ToSql};

use quizbank_core::types::{Question, QuestionStatus, QuestionType, TaxonomyType, TypePayload};
use quizbank_core::{QuizBankError, Result};

/// One taxonomy constraint of a query: the question must hold at least one
/// relationship of `taxonomy_type` whose id is in `ids`.
///
/// Axes combine AND between each other; the ids within one axis combine OR.
#[derive(Debug, Clone)]
pub struct TaxonomyAxis {
    pub taxonomy_type: TaxonomyType,
    pub ids: Vec<String>,
}

/// A whitelisted sort column and direction.
#[derive(Debug, Clone)]
pub struct SortSpec {
    pub field: String,
    pub descending: bool,
}

/// How the result set is ordered.
#[derive(Debug, Clone)]
pub enum QueryOrder {
    /// Full-text relevance, best match first. Only valid with a search term.
    Relevance,
    Columns(Vec<SortSpec>),
}

/// The executable query the planner produces.
///
/// Ownership (`user_id`, `bank_id`) is always present as the leading
/// predicates; everything else is optional.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub user_id: i64,
    pub bank_id: i64,
    pub axes: Vec<TaxonomyAxis>,
    pub question_type: Option<QuestionType>,
    pub status: Option<QuestionStatus>,
    pub search: Option<String>,
    pub order: QueryOrder,
    /// Zero-indexed page.
    pub page: i64,
    pub size: i64,
}

/// A page of questions plus the unpaginated total.
#[derive(Debug)]
pub struct QuestionRows {
    pub items: Vec<Question>,
    pub total: i64,
}

const QUESTION_COLUMNS: &str = r#"
    q.id, q.user_id, q.bank_id, q.source_question_id, q.question_type,
    q.title, q.content, q.status, q.points, q.display_order,
    q.solution_explanation, q.type_data, q.attachments, q.question_settings,
    q.metadata, q.created_at, q.updated_at, q.published_at, q.archived_at
"#;

fn conversion_err(index: usize, err: QuizBankError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(err))
}

fn map_question_row(row: &Row<'_>) -> rusqlite::Result<Question> {
    let question_type_str: String = row.get(4)?;
    let question_type =
        QuestionType::parse(&question_type_str).map_err(|e| conversion_err(4, e))?;

    let status_str: String = row.get(7)?;
    let status = QuestionStatus::parse(&status_str).map_err(|e| conversion_err(7, e))?;

    let type_data: String = row.get(11)?;
    let payload =
        TypePayload::from_json(question_type, &type_data).map_err(|e| conversion_err(11, e))?;

    let attachments: Option<String> = row.get(12)?;
    let question_settings: Option<String> = row.get(13)?;
    let metadata: Option<String> = row.get(14)?;

    Ok(Question {
        id: row.get(0)?,
        user_id: row.get(1)?,
        bank_id: row.get(2)?,
        source_question_id: row.get(3)?,
        question_type,
        title: row.get(5)?,
        content: row.get(6)?,
        status,
        points: row.get(8)?,
        display_order: row.get(9)?,
        solution_explanation: row.get(10)?,
        payload,
        attachments: attachments.and_then(|s| serde_json::from_str(&s).ok()),
        question_settings: question_settings.and_then(|s| serde_json::from_str(&s).ok()),
        metadata: metadata.and_then(|s| serde_json::from_str(&s).ok()),
        created_at: row.get(15)?,
        updated_at: row.get(16)?,
        published_at: row.get(17)?,
        archived_at: row.get(18)?,
    })
}

/// Look up a question by its natural key.
pub fn find_by_natural_key(
    conn: &Connection,
    user_id: i64,
    bank_id: i64,
    source_question_id: &str,
) -> Result<Option<Question>> {
    let sql = format!(
        "SELECT {} FROM questions q WHERE q.user_id = ?1 AND q.bank_id = ?2 AND q.source_question_id = ?3",
        QUESTION_COLUMNS
    );
    let question = conn
        .query_row(&sql, params![user_id, bank_id, source_question_id], |row| {
            map_question_row(row)
        })
        .optional()?;
    Ok(question)
}

/// Upsert a question by its natural key and refresh its full-text row.
///
/// `created_at` is deliberately absent from the conflict update: the stored
/// creation time survives even a caller that failed to overlay it.
/// Returns the surrogate id.
pub fn upsert_by_natural_key(conn: &Connection, question: &Question) -> Result<i64> {
    conn.execute(
        r#"
        INSERT INTO questions (
            user_id, bank_id, source_question_id, question_type, title, content,
            status, points, display_order, solution_explanation, type_data,
            attachments, question_settings, metadata, created_at, updated_at,
            published_at, archived_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
        ON CONFLICT(user_id, bank_id, source_question_id) DO UPDATE SET
            question_type = excluded.question_type,
            title = excluded.title,
            content = excluded.content,
            status = excluded.status,
            points = excluded.points,
            display_order = excluded.display_order,
            solution_explanation = excluded.solution_explanation,
            type_data = excluded.type_data,
            attachments = excluded.attachments,
            question_settings = excluded.question_settings,
            metadata = excluded.metadata,
            updated_at = excluded.updated_at,
            published_at = excluded.published_at,
            archived_at = excluded.archived_at
        "#,
        params![
            question.user_id,
            question.bank_id,
            question.source_question_id,
            question.question_type.as_str(),
            question.title,
            question.content,
            question.status.as_str(),
            question.points,
            question.display_order,
            question.solution_explanation,
            question.payload.to_json()?,
            question
                .attachments
                .as_ref()
                .map(|a| serde_json::Value::Array(a.clone()).to_string()),
            question.question_settings.as_ref().map(|s| s.to_string()),
            question.metadata.as_ref().map(|m| m.to_string()),
            question.created_at.to_rfc3339(),
            question.updated_at.to_rfc3339(),
            question.published_at.map(|t| t.to_rfc3339()),
            question.archived_at.map(|t| t.to_rfc3339()),
        ],
    )?;

    let id: i64 = conn.query_row(
        "SELECT id FROM questions WHERE user_id = ?1 AND bank_id = ?2 AND source_question_id = ?3",
        params![
            question.user_id,
            question.bank_id,
            question.source_question_id
        ],
        |row| row.get(0),
    )?;

    // Keep the FTS row in step inside the same transaction
    conn.execute(
        "DELETE FROM question_search WHERE rowid = ?1",
        params![id],
    )?;
    conn.execute(
        "INSERT INTO question_search (rowid, title, content) VALUES (?1, ?2, ?3)",
        params![id, question.title, question.content],
    )?;

    Ok(id)
}

/// All questions of a bank, newest first.
pub fn find_by_bank(conn: &Connection, user_id: i64, bank_id: i64) -> Result<Vec<Question>> {
    let sql = format!(
        "SELECT {} FROM questions q WHERE q.user_id = ?1 AND q.bank_id = ?2 ORDER BY q.created_at DESC",
        QUESTION_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let questions = stmt
        .query_map(params![user_id, bank_id], map_question_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(questions)
}

/// Execute a composed query plan: filter, search, order, paginate.
pub fn query(conn: &Connection, plan: &QueryPlan) -> Result<QuestionRows> {
    let (joins, where_clause, values) = build_filter(plan);

    let count_sql = format!(
        "SELECT COUNT(*) FROM questions q{} WHERE {}",
        joins, where_clause
    );
    let total: i64 = {
        let mut stmt = conn.prepare(&count_sql)?;
        let params_ref: Vec<&dyn ToSql> = values.iter().map(|b| b.as_ref()).collect();
        stmt.query_row(params_ref.as_slice(), |row| row.get(0))?
    };

    let order_clause = match &plan.order {
        QueryOrder::Relevance => "bm25(question_search, 10.0, 5.0)".to_string(),
        QueryOrder::Columns(specs) => specs
            .iter()
            .map(|spec| {
                format!(
                    "q.{} {}",
                    spec.field,
                    if spec.descending { "DESC" } else { "ASC" }
                )
            })
            .collect::<Vec<_>>()
            .join(", "),
    };

    let page_sql = format!(
        "SELECT {} FROM questions q{} WHERE {} ORDER BY {} LIMIT ? OFFSET ?",
        QUESTION_COLUMNS, joins, where_clause, order_clause
    );

    let (_, _, mut values) = build_filter(plan);
    values.push(Box::new(plan.size));
    values.push(Box::new(plan.page * plan.size));

    let mut stmt = conn.prepare(&page_sql)?;
    let params_ref: Vec<&dyn ToSql> = values.iter().map(|b| b.as_ref()).collect();
    let items = stmt
        .query_map(params_ref.as_slice(), map_question_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(QuestionRows { items, total })
}

/// Build the shared JOIN/WHERE text and the parameter list, in placeholder
/// order.
fn build_filter(plan: &QueryPlan) -> (String, String, Vec<Box<dyn ToSql>>) {
    let mut joins = String::new();
    let mut conditions: Vec<String> = Vec::new();
    let mut values: Vec<Box<dyn ToSql>> = Vec::new();

    if plan.search.is_some() {
        joins.push_str(" JOIN question_search ON question_search.rowid = q.id");
    }

    // Ownership leads every plan
    conditions.push("q.user_id = ?".to_string());
    values.push(Box::new(plan.user_id));
    conditions.push("q.bank_id = ?".to_string());
    values.push(Box::new(plan.bank_id));

    if !plan.axes.is_empty() {
        let mut having_terms: Vec<String> = Vec::new();
        let mut axis_values: Vec<Box<dyn ToSql>> = Vec::new();
        for axis in &plan.axes {
            let placeholders = vec!["?"; axis.ids.len()].join(", ");
            having_terms.push(format!(
                "MAX(CASE WHEN taxonomy_type = ? AND taxonomy_id IN ({}) THEN 1 ELSE 0 END) = 1",
                placeholders
            ));
            axis_values.push(Box::new(axis.taxonomy_type.as_str()));
            for id in &axis.ids {
                axis_values.push(Box::new(id.clone()));
            }
        }
        conditions.push(format!(
            r#"q.id IN (
                SELECT question_id FROM question_relationships
                WHERE user_id = ? AND bank_id = ?
                GROUP BY question_id
                HAVING {}
            )"#,
            having_terms.join(" AND ")
        ));
        values.push(Box::new(plan.user_id));
        values.push(Box::new(plan.bank_id));
        values.extend(axis_values);
    }

    if let Some(question_type) = plan.question_type {
        conditions.push("q.question_type = ?".to_string());
        values.push(Box::new(question_type.as_str()));
    }
    if let Some(status) = plan.status {
        conditions.push("q.status = ?".to_string());
        values.push(Box::new(status.as_str()));
    }
    if let Some(search) = &plan.search {
        conditions.push("question_search MATCH ?".to_string());
        values.push(Box::new(search.clone()));
    }

    (joins, conditions.join(" AND "), values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use quizbank_core::init_sqlite_schema;
    use quizbank_core::types::{EssayData, McqData, McqOption};

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_sqlite_schema(&conn).unwrap();
        conn
    }

    fn mcq_question(user_id: i64, bank_id: i64, source_id: &str, title: &str) -> Question {
        let now = Utc::now();
        Question {
            id: 0,
            user_id,
            bank_id,
            source_question_id: source_id.to_string(),
            question_type: QuestionType::Mcq,
            title: title.to_string(),
            content: "Pick the correct answer.".into(),
            status: QuestionStatus::Draft,
            points: Some(5),
            display_order: None,
            solution_explanation: None,
            payload: TypePayload::Mcq(McqData {
                options: vec![
                    McqOption {
                        text: "4".into(),
                        is_correct: true,
                    },
                    McqOption {
                        text: "5".into(),
                        is_correct: false,
                    },
                ],
                allow_multiple_correct: false,
                time_limit_seconds: None,
            }),
            attachments: None,
            question_settings: None,
            metadata: None,
            created_at: now,
            updated_at: now,
            published_at: None,
            archived_at: None,
        }
    }

    fn link(
        conn: &Connection,
        user_id: i64,
        bank_id: i64,
        question_id: i64,
        taxonomy_type: &str,
        taxonomy_id: &str,
    ) {
        conn.execute(
            r#"
            INSERT INTO question_relationships (user_id, bank_id, question_id, taxonomy_type, taxonomy_id)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![user_id, bank_id, question_id, taxonomy_type, taxonomy_id],
        )
        .unwrap();
    }

    fn bare_plan(user_id: i64, bank_id: i64) -> QueryPlan {
        QueryPlan {
            user_id,
            bank_id,
            axes: vec![],
            question_type: None,
            status: None,
            search: None,
            order: QueryOrder::Columns(vec![SortSpec {
                field: "created_at".into(),
                descending: true,
            }]),
            page: 0,
            size: 20,
        }
    }

    #[test]
    fn test_upsert_insert_then_find() {
        let conn = conn();
        let question = mcq_question(1, 10, "q-1", "What is 2+2?");

        let id = upsert_by_natural_key(&conn, &question).unwrap();
        assert!(id > 0);

        let found = find_by_natural_key(&conn, 1, 10, "q-1").unwrap().unwrap();
        assert_eq!(found.id, id);
        assert_eq!(found.title, "What is 2+2?");
        assert_eq!(found.question_type, QuestionType::Mcq);
    }

    #[test]
    fn test_upsert_conflict_keeps_id_and_created_at() {
        let conn = conn();
        let mut question = mcq_question(1, 10, "q-1", "Original");
        let first_id = upsert_by_natural_key(&conn, &question).unwrap();
        let stored = find_by_natural_key(&conn, 1, 10, "q-1").unwrap().unwrap();

        question.title = "Renamed".into();
        // A buggy caller forgets the overlay; the store still keeps created_at
        question.created_at = stored.created_at + Duration::hours(1);
        question.updated_at = stored.updated_at + Duration::hours(1);
        let second_id = upsert_by_natural_key(&conn, &question).unwrap();

        assert_eq!(first_id, second_id);
        let after = find_by_natural_key(&conn, 1, 10, "q-1").unwrap().unwrap();
        assert_eq!(after.title, "Renamed");
        assert_eq!(
            after.created_at.timestamp_millis(),
            stored.created_at.timestamp_millis()
        );
        assert!(after.updated_at > stored.updated_at);
    }

    #[test]
    fn test_find_by_natural_key_misses() {
        let conn = conn();
        assert!(find_by_natural_key(&conn, 1, 10, "missing")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_essay_payload_round_trips_through_store() {
        let conn = conn();
        let mut question = mcq_question(1, 10, "q-essay", "Describe photosynthesis");
        question.question_type = QuestionType::Essay;
        question.payload = TypePayload::Essay(EssayData {
            min_words: 50,
            max_words: 500,
            rubric: None,
        });

        upsert_by_natural_key(&conn, &question).unwrap();
        let found = find_by_natural_key(&conn, 1, 10, "q-essay")
            .unwrap()
            .unwrap();
        match found.payload {
            TypePayload::Essay(data) => {
                assert_eq!(data.min_words, 50);
                assert_eq!(data.max_words, 500);
            }
            _ => panic!("expected essay payload"),
        }
    }

    #[test]
    fn test_find_by_bank_newest_first() {
        let conn = conn();
        let mut older = mcq_question(1, 10, "q-old", "Older");
        older.created_at = Utc::now() - Duration::hours(1);
        older.updated_at = older.created_at;
        upsert_by_natural_key(&conn, &older).unwrap();
        upsert_by_natural_key(&conn, &mcq_question(1, 10, "q-new", "Newer")).unwrap();
        upsert_by_natural_key(&conn, &mcq_question(2, 10, "q-other", "Other user")).unwrap();

        let questions = find_by_bank(&conn, 1, 10).unwrap();
        assert_eq!(questions.len(), 2);
        assert_eq!(questions[0].title, "Newer");
        assert_eq!(questions[1].title, "Older");
    }

    #[test]
    fn test_query_ownership_prefix() {
        let conn = conn();
        upsert_by_natural_key(&conn, &mcq_question(1, 10, "q-1", "Mine")).unwrap();
        upsert_by_natural_key(&conn, &mcq_question(2, 10, "q-1", "Theirs")).unwrap();

        let rows = query(&conn, &bare_plan(1, 10)).unwrap();
        assert_eq!(rows.total, 1);
        assert_eq!(rows.items[0].title, "Mine");
    }

    #[test]
    fn test_query_axes_and_or_composition() {
        let conn = conn();
        // A(cat=general, tag=beginner), B(cat=general, tag=practice),
        // C(cat=other, tag=beginner), D(cat=general, tags=[beginner, practice])
        let a = upsert_by_natural_key(&conn, &mcq_question(1, 10, "a", "A")).unwrap();
        let b = upsert_by_natural_key(&conn, &mcq_question(1, 10, "b", "B")).unwrap();
        let c = upsert_by_natural_key(&conn, &mcq_question(1, 10, "c", "C")).unwrap();
        let d = upsert_by_natural_key(&conn, &mcq_question(1, 10, "d", "D")).unwrap();

        link(&conn, 1, 10, a, "category_level_1", "general");
        link(&conn, 1, 10, a, "tag", "beginner");
        link(&conn, 1, 10, b, "category_level_1", "general");
        link(&conn, 1, 10, b, "tag", "practice");
        link(&conn, 1, 10, c, "category_level_1", "other");
        link(&conn, 1, 10, c, "tag", "beginner");
        link(&conn, 1, 10, d, "category_level_1", "general");
        link(&conn, 1, 10, d, "tag", "beginner");
        link(&conn, 1, 10, d, "tag", "practice");

        let mut plan = bare_plan(1, 10);
        plan.axes = vec![
            TaxonomyAxis {
                taxonomy_type: TaxonomyType::CategoryLevel1,
                ids: vec!["general".into()],
            },
            TaxonomyAxis {
                taxonomy_type: TaxonomyType::Tag,
                ids: vec!["beginner".into(), "practice".into()],
            },
        ];
        plan.order = QueryOrder::Columns(vec![SortSpec {
            field: "title".into(),
            descending: false,
        }]);

        let rows = query(&conn, &plan).unwrap();
        assert_eq!(rows.total, 3);
        let titles: Vec<&str> = rows.items.iter().map(|q| q.title.as_str()).collect();
        assert_eq!(titles, vec!["A", "B", "D"]);
    }

    #[test]
    fn test_query_equality_filters() {
        let conn = conn();
        let mut published = mcq_question(1, 10, "q-pub", "Published");
        published.status = QuestionStatus::Published;
        upsert_by_natural_key(&conn, &published).unwrap();
        upsert_by_natural_key(&conn, &mcq_question(1, 10, "q-draft", "Draft")).unwrap();

        let mut plan = bare_plan(1, 10);
        plan.status = Some(QuestionStatus::Published);
        let rows = query(&conn, &plan).unwrap();
        assert_eq!(rows.total, 1);
        assert_eq!(rows.items[0].title, "Published");
    }

    #[test]
    fn test_query_full_text_relevance() {
        let conn = conn();
        let mut in_title = mcq_question(1, 10, "q-1", "Gravity basics");
        in_title.content = "Introductory mechanics.".into();
        let mut in_content = mcq_question(1, 10, "q-2", "Forces");
        in_content.content = "Explain how gravity affects motion.".into();
        let unrelated = mcq_question(1, 10, "q-3", "Algebra");
        upsert_by_natural_key(&conn, &in_title).unwrap();
        upsert_by_natural_key(&conn, &in_content).unwrap();
        upsert_by_natural_key(&conn, &unrelated).unwrap();

        let mut plan = bare_plan(1, 10);
        plan.search = Some("gravity".into());
        plan.order = QueryOrder::Relevance;

        let rows = query(&conn, &plan).unwrap();
        assert_eq!(rows.total, 2);
        // Title matches outweigh content matches
        assert_eq!(rows.items[0].title, "Gravity basics");
    }

    #[test]
    fn test_query_page_past_end_is_empty_not_error() {
        let conn = conn();
        upsert_by_natural_key(&conn, &mcq_question(1, 10, "q-1", "Only")).unwrap();

        let mut plan = bare_plan(1, 10);
        plan.page = 5;
        let rows = query(&conn, &plan).unwrap();
        assert_eq!(rows.total, 1);
        assert!(rows.items.is_empty());
    }

    #[test]
    fn test_fts_row_tracks_title_updates() {
        let conn = conn();
        let mut question = mcq_question(1, 10, "q-1", "Thermodynamics");
        upsert_by_natural_key(&conn, &question).unwrap();

        question.title = "Optics".into();
        upsert_by_natural_key(&conn, &question).unwrap();

        let mut plan = bare_plan(1, 10);
        plan.search = Some("thermodynamics".into());
        plan.order = QueryOrder::Relevance;
        assert_eq!(query(&conn, &plan).unwrap().total, 0);

        plan.search = Some("optics".into());
        assert_eq!(query(&conn, &plan).unwrap().total, 1);
    }
}
