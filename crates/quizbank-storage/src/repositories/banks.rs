//! Reads and writes for the per-user bank registry.

use rusqlite::{params, Connection, OptionalExtension};

use quizbank_core::types::{BanksPerUser, QuestionBank};
use quizbank_core::Result;

/// Whether a registry row exists for this user.
pub fn exists(conn: &Connection, user_id: i64) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM user_banks WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Whether `bank_id` is one of this user's banks.
pub fn validate_ownership(conn: &Connection, user_id: i64, bank_id: i64) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM question_banks WHERE user_id = ?1 AND bank_id = ?2",
            params![user_id, bank_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Whether this user's bank is active. A missing bank reads as inactive.
pub fn is_active(conn: &Connection, user_id: i64, bank_id: i64) -> Result<bool> {
    let active: Option<i64> = conn
        .query_row(
            "SELECT is_active FROM question_banks WHERE user_id = ?1 AND bank_id = ?2",
            params![user_id, bank_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(active == Some(1))
}

/// The user's default bank id, if the registry exists.
pub fn default_bank_id(conn: &Connection, user_id: i64) -> Result<Option<i64>> {
    let bank_id: Option<i64> = conn
        .query_row(
            "SELECT default_bank_id FROM user_banks WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(bank_id)
}

/// Insert a full registry record: the root row plus every embedded bank.
///
/// Callers wrap this in the bootstrap transaction; the unique `user_id`
/// primary key rejects a second registry for the same user.
pub fn insert(conn: &Connection, record: &BanksPerUser) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO user_banks (user_id, default_bank_id, user_email, metadata, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
        params![
            record.user_id,
            record.default_bank_id,
            record.user_email,
            record
                .metadata
                .as_ref()
                .map(|m| m.to_string()),
            record.created_at.to_rfc3339(),
        ],
    )?;

    let mut stmt = conn.prepare_cached(
        r#"
        INSERT INTO question_banks (user_id, bank_id, name, description, is_active, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
    )?;
    for bank in &record.banks {
        stmt.execute(params![
            record.user_id,
            bank.bank_id,
            bank.name,
            bank.description,
            bank.is_active as i64,
            bank.created_at.to_rfc3339(),
        ])?;
    }

    Ok(())
}

/// Load the embedded bank list for a user, in bank_id order.
pub fn find_banks(conn: &Connection, user_id: i64) -> Result<Vec<QuestionBank>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT bank_id, name, description, is_active, created_at
        FROM question_banks
        WHERE user_id = ?1
        ORDER BY bank_id
        "#,
    )?;

    let banks = stmt
        .query_map(params![user_id], |row| {
            Ok(QuestionBank {
                bank_id: row.get(0)?,
                name: row.get(1)?,
                description: row.get(2)?,
                is_active: row.get::<_, i64>(3)? != 0,
                created_at: row.get(4)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(banks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use quizbank_core::init_sqlite_schema;

    fn registry(user_id: i64, bank_id: i64, active: bool) -> BanksPerUser {
        let now = Utc::now();
        BanksPerUser {
            user_id,
            default_bank_id: bank_id,
            user_email: Some("owner@example.com".into()),
            metadata: None,
            banks: vec![QuestionBank {
                bank_id,
                name: "Default Question Bank".into(),
                description: Some("Seeded at signup".into()),
                is_active: active,
                created_at: now,
            }],
            created_at: now,
        }
    }

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_sqlite_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn test_exists_and_insert() {
        let conn = conn();
        assert!(!exists(&conn, 42).unwrap());

        insert(&conn, &registry(42, 100, true)).unwrap();
        assert!(exists(&conn, 42).unwrap());
        assert_eq!(default_bank_id(&conn, 42).unwrap(), Some(100));
    }

    #[test]
    fn test_duplicate_user_rejected() {
        let conn = conn();
        insert(&conn, &registry(42, 100, true)).unwrap();
        assert!(insert(&conn, &registry(42, 101, true)).is_err());
    }

    #[test]
    fn test_ownership_and_active() {
        let conn = conn();
        insert(&conn, &registry(42, 100, true)).unwrap();
        insert(&conn, &registry(43, 200, false)).unwrap();

        assert!(validate_ownership(&conn, 42, 100).unwrap());
        assert!(!validate_ownership(&conn, 42, 200).unwrap());
        assert!(is_active(&conn, 42, 100).unwrap());
        assert!(!is_active(&conn, 43, 200).unwrap());
        // Missing bank reads as inactive, not an error
        assert!(!is_active(&conn, 42, 999).unwrap());
    }

    #[test]
    fn test_find_banks() {
        let conn = conn();
        insert(&conn, &registry(42, 100, true)).unwrap();

        let banks = find_banks(&conn, 42).unwrap();
        assert_eq!(banks.len(), 1);
        assert_eq!(banks[0].bank_id, 100);
        assert!(banks[0].is_active);
    }
}
