//! Reads and writes for the per-bank taxonomy universe.

use rusqlite::{params, Connection, OptionalExtension};

use quizbank_core::types::{TaxonomySet, TaxonomyType};
use quizbank_core::Result;

/// Whether a taxonomy set exists for `(user_id, bank_id)`.
pub fn exists(conn: &Connection, user_id: i64, bank_id: i64) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM taxonomy_sets WHERE user_id = ?1 AND bank_id = ?2",
            params![user_id, bank_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Filter the given references down to the ones the taxonomy set does not
/// contain, preserving request order.
///
/// A reference is checked at the type/level it is used in: a category id
/// only counts at its own level, a quiz id must be numeric.
pub fn get_unknown_references(
    conn: &Connection,
    user_id: i64,
    bank_id: i64,
    refs: &[(TaxonomyType, String)],
) -> Result<Vec<(TaxonomyType, String)>> {
    let mut unknown = Vec::new();
    for (taxonomy_type, taxonomy_id) in refs {
        if !reference_exists(conn, user_id, bank_id, *taxonomy_type, taxonomy_id)? {
            unknown.push((*taxonomy_type, taxonomy_id.clone()));
        }
    }
    Ok(unknown)
}

fn reference_exists(
    conn: &Connection,
    user_id: i64,
    bank_id: i64,
    taxonomy_type: TaxonomyType,
    taxonomy_id: &str,
) -> Result<bool> {
    let found: Option<i64> = match taxonomy_type {
        TaxonomyType::CategoryLevel1
        | TaxonomyType::CategoryLevel2
        | TaxonomyType::CategoryLevel3
        | TaxonomyType::CategoryLevel4 => {
            let level = match taxonomy_type {
                TaxonomyType::CategoryLevel1 => 1,
                TaxonomyType::CategoryLevel2 => 2,
                TaxonomyType::CategoryLevel3 => 3,
                _ => 4,
            };
            conn.query_row(
                r#"
                SELECT 1 FROM taxonomy_categories
                WHERE user_id = ?1 AND bank_id = ?2 AND level = ?3 AND category_id = ?4
                "#,
                params![user_id, bank_id, level, taxonomy_id],
                |row| row.get(0),
            )
            .optional()?
        }
        TaxonomyType::Tag => conn
            .query_row(
                "SELECT 1 FROM taxonomy_tags WHERE user_id = ?1 AND bank_id = ?2 AND tag_id = ?3",
                params![user_id, bank_id, taxonomy_id],
                |row| row.get(0),
            )
            .optional()?,
        TaxonomyType::Quiz => {
            // Non-numeric quiz references can never exist
            let Ok(quiz_id) = taxonomy_id.parse::<i64>() else {
                return Ok(false);
            };
            conn.query_row(
                "SELECT 1 FROM taxonomy_quizzes WHERE user_id = ?1 AND bank_id = ?2 AND quiz_id = ?3",
                params![user_id, bank_id, quiz_id],
                |row| row.get(0),
            )
            .optional()?
        }
        TaxonomyType::DifficultyLevel => conn
            .query_row(
                "SELECT 1 FROM taxonomy_difficulty WHERE user_id = ?1 AND bank_id = ?2 AND level = ?3",
                params![user_id, bank_id, taxonomy_id],
                |row| row.get(0),
            )
            .optional()?,
    };
    Ok(found.is_some())
}

/// Insert a full taxonomy set: the marker row plus every item.
pub fn insert(conn: &Connection, set: &TaxonomySet) -> Result<()> {
    conn.execute(
        "INSERT INTO taxonomy_sets (user_id, bank_id, created_at) VALUES (?1, ?2, ?3)",
        params![set.user_id, set.bank_id, set.created_at.to_rfc3339()],
    )?;

    let mut stmt = conn.prepare_cached(
        r#"
        INSERT INTO taxonomy_categories (user_id, bank_id, level, category_id, name, slug, parent_id)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
    )?;
    for category in &set.categories {
        stmt.execute(params![
            set.user_id,
            set.bank_id,
            category.level,
            category.id,
            category.name,
            category.slug,
            category.parent_id,
        ])?;
    }
    drop(stmt);

    let mut stmt = conn.prepare_cached(
        "INSERT INTO taxonomy_tags (user_id, bank_id, tag_id, name, color) VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for tag in &set.tags {
        stmt.execute(params![set.user_id, set.bank_id, tag.id, tag.name, tag.color])?;
    }
    drop(stmt);

    let mut stmt = conn.prepare_cached(
        r#"
        INSERT INTO taxonomy_quizzes (user_id, bank_id, quiz_id, quiz_name, quiz_slug)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
    )?;
    for quiz in &set.quizzes {
        stmt.execute(params![
            set.user_id,
            set.bank_id,
            quiz.quiz_id,
            quiz.quiz_name,
            quiz.quiz_slug,
        ])?;
    }
    drop(stmt);

    let mut stmt = conn.prepare_cached(
        r#"
        INSERT INTO taxonomy_difficulty (user_id, bank_id, level, numeric_value, description)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
    )?;
    for level in &set.difficulty_levels {
        stmt.execute(params![
            set.user_id,
            set.bank_id,
            level.level,
            level.numeric_value,
            level.description,
        ])?;
    }

    Ok(())
}
