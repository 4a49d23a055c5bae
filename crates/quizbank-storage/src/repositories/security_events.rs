//! Append-only writes for the security audit trail.

use rusqlite::{params, Connection};

use quizbank_core::types::{SecurityEvent, Severity};
use quizbank_core::Result;

/// Append a single event.
pub fn append(conn: &Connection, event: &SecurityEvent) -> Result<()> {
    append_batch(conn, std::slice::from_ref(event))?;
    Ok(())
}

/// Append a batch of events in one transaction. Returns the written count.
pub fn append_batch(conn: &Connection, events: &[SecurityEvent]) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;

    let mut stmt = tx.prepare_cached(
        r#"
        INSERT INTO security_events (
            event_type, user_id, session_id, severity, timestamp, request_id,
            details, client_ip, user_agent, checksum, anonymization_date,
            retention_expiry_date
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
        "#,
    )?;

    let mut count = 0;
    for event in events {
        stmt.execute(params![
            event.event_type,
            event.user_id,
            event.session_id,
            event.severity.as_str(),
            event.timestamp.to_rfc3339(),
            event.request_id,
            event.details.to_string(),
            event.client_ip,
            event.user_agent,
            event.checksum,
            event.anonymization_date.to_rfc3339(),
            event.retention_expiry_date.to_rfc3339(),
        ])?;
        count += 1;
    }

    drop(stmt);
    tx.commit()?;

    Ok(count)
}

/// All events for a user, newest first. Mainly a verification surface for
/// tests and incident review.
pub fn find_by_user(conn: &Connection, user_id: i64) -> Result<Vec<SecurityEvent>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT event_type, user_id, session_id, severity, timestamp, request_id,
               details, client_ip, user_agent, checksum, anonymization_date,
               retention_expiry_date
        FROM security_events
        WHERE user_id = ?1
        ORDER BY timestamp DESC, id DESC
        "#,
    )?;

    let events = stmt
        .query_map(params![user_id], |row| {
            let severity_str: String = row.get(3)?;
            let severity = match severity_str.as_str() {
                "INFO" => Severity::Info,
                "MEDIUM" => Severity::Medium,
                "HIGH" => Severity::High,
                _ => Severity::Critical,
            };
            let details: String = row.get(6)?;
            Ok(SecurityEvent {
                event_type: row.get(0)?,
                user_id: row.get(1)?,
                session_id: row.get(2)?,
                severity,
                timestamp: row.get(4)?,
                request_id: row.get(5)?,
                details: serde_json::from_str(&details)
                    .unwrap_or(serde_json::Value::Null),
                client_ip: row.get(7)?,
                user_agent: row.get(8)?,
                checksum: row.get(9)?,
                anonymization_date: row.get(10)?,
                retention_expiry_date: row.get(11)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(events)
}
