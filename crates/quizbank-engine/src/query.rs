//! Query planning and result shaping for the question read side.
//!
//! Composition rules:
//! - Category filters across levels combine AND
//! - Tags and quizzes each combine OR within their own set
//! - Different taxonomy axes combine AND between axes
//! - `question_type` and `status` are plain equality filters
//! - Full-text search matches title (weight 10) and content (weight 5);
//!   relevance replaces the default sort unless the caller ordered explicitly
//! - Ownership is always the leading predicate
//!
//! Pages past the end are valid queries returning empty items.

use serde::Serialize;

use quizbank_core::types::{Question, QuestionStatus, QuestionType, TaxonomyType};
use quizbank_core::validation::{MAX_PAGE_SIZE, SORTABLE_FIELDS};
use quizbank_core::{QuizBankError, Result};
use quizbank_storage::repositories::questions::{
    self, QueryOrder, QueryPlan, SortSpec, TaxonomyAxis,
};
use rusqlite::Connection;

/// Default page size when the caller does not specify one.
pub const DEFAULT_PAGE_SIZE: i64 = 20;

/// Raw query parameters as the transport hands them over.
#[derive(Debug, Clone, Default)]
pub struct QuestionQueryParams {
    pub category_level_1: Option<String>,
    pub category_level_2: Option<String>,
    pub category_level_3: Option<String>,
    pub category_level_4: Option<String>,
    pub tags: Vec<String>,
    pub quizzes: Vec<String>,
    pub difficulty_level: Option<String>,
    pub question_type: Option<String>,
    pub status: Option<String>,
    pub search: Option<String>,
    pub page: Option<i64>,
    pub size: Option<i64>,
    pub sort: Vec<String>,
}

/// Pagination metadata for a result page.
#[derive(Debug, Clone, Serialize)]
pub struct Pagination {
    pub current_page: i64,
    pub page_size: i64,
    pub total_elements: i64,
    pub total_pages: i64,
    pub is_first: bool,
    pub is_last: bool,
    pub has_next: bool,
    pub has_previous: bool,
}

/// Which filters were applied, and how many rows this page holds.
#[derive(Debug, Clone, Serialize)]
pub struct FilterSummary {
    pub applied: Vec<String>,
    pub result_count: usize,
}

/// A shaped result page.
#[derive(Debug, Serialize)]
pub struct QuestionPage {
    pub questions: Vec<Question>,
    pub pagination: Pagination,
    pub filters: FilterSummary,
}

/// Validate the raw parameters and compose the executable plan.
pub fn plan(user_id: i64, bank_id: i64, params: &QuestionQueryParams) -> Result<QueryPlan> {
    let page = params.page.unwrap_or(0);
    if page < 0 {
        return Err(QuizBankError::InvalidQueryParameter(format!(
            "page must be >= 0, got {}",
            page
        )));
    }

    let size = params.size.unwrap_or(DEFAULT_PAGE_SIZE);
    if !(1..=MAX_PAGE_SIZE).contains(&size) {
        return Err(QuizBankError::InvalidQueryParameter(format!(
            "size must be in [1, {}], got {}",
            MAX_PAGE_SIZE, size
        )));
    }

    let question_type = params
        .question_type
        .as_deref()
        .map(|s| {
            QuestionType::parse(s).map_err(|_| {
                QuizBankError::InvalidQueryParameter(format!("unknown question_type '{}'", s))
            })
        })
        .transpose()?;

    let status = params
        .status
        .as_deref()
        .map(|s| {
            QuestionStatus::parse(s).map_err(|_| {
                QuizBankError::InvalidQueryParameter(format!("unknown status '{}'", s))
            })
        })
        .transpose()?;

    let mut axes = Vec::new();
    let category_levels = [
        (TaxonomyType::CategoryLevel1, &params.category_level_1),
        (TaxonomyType::CategoryLevel2, &params.category_level_2),
        (TaxonomyType::CategoryLevel3, &params.category_level_3),
        (TaxonomyType::CategoryLevel4, &params.category_level_4),
    ];
    for (taxonomy_type, id) in category_levels {
        if let Some(id) = id {
            axes.push(TaxonomyAxis {
                taxonomy_type,
                ids: vec![id.clone()],
            });
        }
    }
    if !params.tags.is_empty() {
        axes.push(TaxonomyAxis {
            taxonomy_type: TaxonomyType::Tag,
            ids: params.tags.clone(),
        });
    }
    if !params.quizzes.is_empty() {
        let mut ids = Vec::with_capacity(params.quizzes.len());
        for quiz in &params.quizzes {
            let quiz_id: i64 = quiz.parse().map_err(|_| {
                QuizBankError::InvalidQueryParameter(format!(
                    "quiz filter '{}' is not a numeric id",
                    quiz
                ))
            })?;
            ids.push(quiz_id.to_string());
        }
        axes.push(TaxonomyAxis {
            taxonomy_type: TaxonomyType::Quiz,
            ids,
        });
    }
    if let Some(level) = &params.difficulty_level {
        axes.push(TaxonomyAxis {
            taxonomy_type: TaxonomyType::DifficultyLevel,
            ids: vec![level.clone()],
        });
    }

    let search = params
        .search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    let explicit_sort = parse_sort(&params.sort)?;
    let order = match (&explicit_sort, &search) {
        (Some(specs), _) => QueryOrder::Columns(specs.clone()),
        (None, Some(_)) => QueryOrder::Relevance,
        (None, None) => QueryOrder::Columns(vec![SortSpec {
            field: "created_at".into(),
            descending: true,
        }]),
    };

    Ok(QueryPlan {
        user_id,
        bank_id,
        axes,
        question_type,
        status,
        search,
        order,
        page,
        size,
    })
}

/// Parse `sort=field[,asc|desc]` entries against the whitelist.
fn parse_sort(entries: &[String]) -> Result<Option<Vec<SortSpec>>> {
    if entries.is_empty() {
        return Ok(None);
    }

    let mut specs = Vec::with_capacity(entries.len());
    for entry in entries {
        let mut parts = entry.splitn(2, ',');
        let field = parts.next().unwrap_or_default().trim();
        let direction = parts.next().map(str::trim);

        if !SORTABLE_FIELDS.contains(&field) {
            return Err(QuizBankError::InvalidQueryParameter(format!(
                "unknown sort field '{}'; allowed: {}",
                field,
                SORTABLE_FIELDS.join(", ")
            )));
        }

        let descending = match direction {
            None | Some("asc") => false,
            Some("desc") => true,
            Some(other) => {
                return Err(QuizBankError::InvalidQueryParameter(format!(
                    "unknown sort direction '{}'",
                    other
                )))
            }
        };

        specs.push(SortSpec {
            field: field.to_string(),
            descending,
        });
    }
    Ok(Some(specs))
}

/// Plan, execute, and shape a question query.
pub fn execute(
    conn: &Connection,
    user_id: i64,
    bank_id: i64,
    params: &QuestionQueryParams,
) -> Result<QuestionPage> {
    let plan = plan(user_id, bank_id, params)?;
    let rows = questions::query(conn, &plan)?;

    let total_pages = if rows.total == 0 {
        0
    } else {
        (rows.total + plan.size - 1) / plan.size
    };
    let pagination = Pagination {
        current_page: plan.page,
        page_size: plan.size,
        total_elements: rows.total,
        total_pages,
        is_first: plan.page == 0,
        is_last: total_pages == 0 || plan.page >= total_pages - 1,
        has_next: plan.page + 1 < total_pages,
        has_previous: plan.page > 0 && total_pages > 0,
    };

    let filters = FilterSummary {
        applied: applied_filters(params),
        result_count: rows.items.len(),
    };

    Ok(QuestionPage {
        questions: rows.items,
        pagination,
        filters,
    })
}

fn applied_filters(params: &QuestionQueryParams) -> Vec<String> {
    let mut applied = Vec::new();
    for (name, present) in [
        ("category_level_1", params.category_level_1.is_some()),
        ("category_level_2", params.category_level_2.is_some()),
        ("category_level_3", params.category_level_3.is_some()),
        ("category_level_4", params.category_level_4.is_some()),
        ("tags", !params.tags.is_empty()),
        ("quizzes", !params.quizzes.is_empty()),
        ("difficulty_level", params.difficulty_level.is_some()),
        ("question_type", params.question_type.is_some()),
        ("status", params.status.is_some()),
        (
            "search",
            params
                .search
                .as_deref()
                .is_some_and(|s| !s.trim().is_empty()),
        ),
    ] {
        if present {
            applied.push(name.to_string());
        }
    }
    applied
}

#[cfg(test)]
mod tests {
    use super::*;
    use quizbank_core::init_sqlite_schema;

    fn params() -> QuestionQueryParams {
        QuestionQueryParams::default()
    }

    #[test]
    fn test_defaults() {
        let plan = plan(1, 10, &params()).unwrap();
        assert_eq!(plan.page, 0);
        assert_eq!(plan.size, DEFAULT_PAGE_SIZE);
        assert!(plan.axes.is_empty());
        match plan.order {
            QueryOrder::Columns(ref specs) => {
                assert_eq!(specs.len(), 1);
                assert_eq!(specs[0].field, "created_at");
                assert!(specs[0].descending);
            }
            _ => panic!("expected column order"),
        }
    }

    #[test]
    fn test_invalid_page_and_size() {
        let mut p = params();
        p.page = Some(-1);
        assert_eq!(
            plan(1, 10, &p).unwrap_err().code(),
            "INVALID_QUERY_PARAMETER"
        );

        let mut p = params();
        p.size = Some(0);
        assert!(plan(1, 10, &p).is_err());

        let mut p = params();
        p.size = Some(MAX_PAGE_SIZE + 1);
        assert!(plan(1, 10, &p).is_err());
    }

    #[test]
    fn test_unknown_enums_rejected() {
        let mut p = params();
        p.question_type = Some("matching".into());
        assert_eq!(
            plan(1, 10, &p).unwrap_err().code(),
            "INVALID_QUERY_PARAMETER"
        );

        let mut p = params();
        p.status = Some("live".into());
        assert_eq!(
            plan(1, 10, &p).unwrap_err().code(),
            "INVALID_QUERY_PARAMETER"
        );
    }

    #[test]
    fn test_sort_whitelist() {
        let mut p = params();
        p.sort = vec!["title,asc".into(), "points,desc".into()];
        let plan = plan(1, 10, &p).unwrap();
        match plan.order {
            QueryOrder::Columns(specs) => {
                assert_eq!(specs[0].field, "title");
                assert!(!specs[0].descending);
                assert_eq!(specs[1].field, "points");
                assert!(specs[1].descending);
            }
            _ => panic!("expected column order"),
        }

        let mut p = params();
        p.sort = vec!["checksum".into()];
        assert_eq!(
            super::plan(1, 10, &p).unwrap_err().code(),
            "INVALID_QUERY_PARAMETER"
        );

        let mut p = params();
        p.sort = vec!["title,sideways".into()];
        assert!(super::plan(1, 10, &p).is_err());
    }

    #[test]
    fn test_search_switches_to_relevance_unless_sorted() {
        let mut p = params();
        p.search = Some("gravity".into());
        assert!(matches!(plan(1, 10, &p).unwrap().order, QueryOrder::Relevance));

        p.sort = vec!["title".into()];
        assert!(matches!(
            plan(1, 10, &p).unwrap().order,
            QueryOrder::Columns(_)
        ));
    }

    #[test]
    fn test_blank_search_ignored() {
        let mut p = params();
        p.search = Some("   ".into());
        let plan = plan(1, 10, &p).unwrap();
        assert!(plan.search.is_none());
        assert!(matches!(plan.order, QueryOrder::Columns(_)));
    }

    #[test]
    fn test_axes_composition() {
        let mut p = params();
        p.category_level_1 = Some("general".into());
        p.tags = vec!["beginner".into(), "practice".into()];
        p.quizzes = vec!["42".into()];
        p.difficulty_level = Some("easy".into());

        let plan = plan(1, 10, &p).unwrap();
        assert_eq!(plan.axes.len(), 4);
        assert_eq!(plan.axes[0].taxonomy_type, TaxonomyType::CategoryLevel1);
        assert_eq!(plan.axes[1].taxonomy_type, TaxonomyType::Tag);
        assert_eq!(plan.axes[1].ids.len(), 2);
        assert_eq!(plan.axes[2].taxonomy_type, TaxonomyType::Quiz);
        assert_eq!(plan.axes[3].taxonomy_type, TaxonomyType::DifficultyLevel);
    }

    #[test]
    fn test_non_numeric_quiz_filter_rejected() {
        let mut p = params();
        p.quizzes = vec!["warmup".into()];
        assert_eq!(
            plan(1, 10, &p).unwrap_err().code(),
            "INVALID_QUERY_PARAMETER"
        );
    }

    #[test]
    fn test_pagination_metadata_shapes() {
        let conn = Connection::open_in_memory().unwrap();
        init_sqlite_schema(&conn).unwrap();

        // Empty store: zero pages, still a valid first/last page
        let page = execute(&conn, 1, 10, &params()).unwrap();
        assert_eq!(page.pagination.total_elements, 0);
        assert_eq!(page.pagination.total_pages, 0);
        assert!(page.pagination.is_first);
        assert!(page.pagination.is_last);
        assert!(!page.pagination.has_next);
        assert!(!page.pagination.has_previous);
        assert!(page.questions.is_empty());
        assert_eq!(page.filters.result_count, 0);
    }

    #[test]
    fn test_applied_filter_names() {
        let mut p = params();
        p.category_level_1 = Some("general".into());
        p.tags = vec!["beginner".into()];
        p.search = Some("x".into());
        assert_eq!(
            applied_filters(&p),
            vec!["category_level_1", "tags", "search"]
        );
    }
}
