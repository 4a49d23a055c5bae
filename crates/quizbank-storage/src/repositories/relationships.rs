//! Reads and writes for question→taxonomy relationship edges.
//!
//! The relationship set is owned by its question: writers always replace the
//! full set, never patch it.

use rusqlite::types::Type;
use rusqlite::{params, Connection};

use quizbank_core::types::{Relationship, TaxonomyType};
use quizbank_core::{QuizBankError, Result};

/// Replace the full relationship set for a question: delete everything, then
/// insert the new edges in one batch. Returns the inserted count.
///
/// Callers run this inside the upsert transaction so readers never observe a
/// half-written set.
pub fn replace_for_question(
    conn: &Connection,
    question_id: i64,
    relationships: &[Relationship],
) -> Result<usize> {
    conn.execute(
        "DELETE FROM question_relationships WHERE question_id = ?1",
        params![question_id],
    )?;

    let mut stmt = conn.prepare_cached(
        r#"
        INSERT INTO question_relationships (user_id, bank_id, question_id, taxonomy_type, taxonomy_id)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
    )?;

    let mut count = 0;
    for relationship in relationships {
        stmt.execute(params![
            relationship.user_id,
            relationship.bank_id,
            relationship.question_id,
            relationship.taxonomy_type.as_str(),
            relationship.taxonomy_id,
        ])?;
        count += 1;
    }

    Ok(count)
}

/// All edges of a question, in insertion order.
pub fn find_by_question(conn: &Connection, question_id: i64) -> Result<Vec<Relationship>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT user_id, bank_id, question_id, taxonomy_type, taxonomy_id
        FROM question_relationships
        WHERE question_id = ?1
        ORDER BY id
        "#,
    )?;

    let relationships = stmt
        .query_map(params![question_id], |row| {
            let type_str: String = row.get(3)?;
            let taxonomy_type = parse_taxonomy_type(&type_str).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e))
            })?;
            Ok(Relationship {
                user_id: row.get(0)?,
                bank_id: row.get(1)?,
                question_id: row.get(2)?,
                taxonomy_type,
                taxonomy_id: row.get(4)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(relationships)
}

fn parse_taxonomy_type(s: &str) -> Result<TaxonomyType> {
    match s {
        "category_level_1" => Ok(TaxonomyType::CategoryLevel1),
        "category_level_2" => Ok(TaxonomyType::CategoryLevel2),
        "category_level_3" => Ok(TaxonomyType::CategoryLevel3),
        "category_level_4" => Ok(TaxonomyType::CategoryLevel4),
        "tag" => Ok(TaxonomyType::Tag),
        "quiz" => Ok(TaxonomyType::Quiz),
        "difficulty_level" => Ok(TaxonomyType::DifficultyLevel),
        other => Err(QuizBankError::Query(format!(
            "unknown taxonomy type '{}' in relationship store",
            other
        ))),
    }
}
