//! Legal entities: the nodes of the canonical relation graph.

use rusqlite::{Connection, OptionalExtension, params};

use super::{from_us, now, to_us};
use crate::error::RelationError;
use crate::model::LegalEntity;

fn row_to_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, Option<String>, i64)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
}

fn from_raw(
    (bpnl, legal_name, created_at_us): (String, Option<String>, i64),
) -> Result<LegalEntity, RelationError> {
    Ok(LegalEntity {
        bpnl,
        legal_name,
        created_at: from_us("created_at_us", created_at_us)?,
    })
}

/// Register a legal entity. An existing BPNL keeps its creation time; a
/// supplied name replaces the stored one.
///
/// # Errors
///
/// Returns a store error if the write fails.
pub fn register_legal_entity(
    conn: &Connection,
    bpnl: &str,
    legal_name: Option<&str>,
) -> Result<LegalEntity, RelationError> {
    register_legal_entity_at(conn, bpnl, legal_name, now())
}

/// Register a legal entity with an explicit creation time.
///
/// Creation time drives edge direction for symmetric relations, so imports
/// of existing entities must be able to carry it over.
///
/// # Errors
///
/// Returns a store error if the write fails.
pub fn register_legal_entity_at(
    conn: &Connection,
    bpnl: &str,
    legal_name: Option<&str>,
    created_at: chrono::DateTime<chrono::Utc>,
) -> Result<LegalEntity, RelationError> {
    let bpnl = bpnl.trim();
    if bpnl.is_empty() {
        return Err(RelationError::invalid("BPNL must not be empty"));
    }
    conn.execute(
        "INSERT INTO legal_entities (bpnl, legal_name, created_at_us)
         VALUES (?1, ?2, ?3)
         ON CONFLICT (bpnl)
         DO UPDATE SET legal_name = COALESCE(excluded.legal_name, legal_entities.legal_name)",
        params![bpnl, legal_name, to_us(created_at)],
    )?;
    tracing::info!(bpnl, "registered legal entity");
    find_legal_entity(conn, bpnl)?.ok_or_else(|| RelationError::Corrupt {
        column: "bpnl",
        value: bpnl.to_string(),
    })
}

/// Look up a legal entity by BPNL.
///
/// # Errors
///
/// Returns a store error if the query fails or the row is corrupt.
pub fn find_legal_entity(
    conn: &Connection,
    bpnl: &str,
) -> Result<Option<LegalEntity>, RelationError> {
    conn.query_row(
        "SELECT bpnl, legal_name, created_at_us FROM legal_entities WHERE bpnl = ?1",
        params![bpnl],
        row_to_raw,
    )
    .optional()?
    .map(from_raw)
    .transpose()
}

/// All legal entities, oldest first.
///
/// # Errors
///
/// Returns a store error if the query fails or a row is corrupt.
pub fn list_legal_entities(conn: &Connection) -> Result<Vec<LegalEntity>, RelationError> {
    let mut stmt = conn.prepare(
        "SELECT bpnl, legal_name, created_at_us FROM legal_entities
         ORDER BY created_at_us, bpnl",
    )?;
    let rows = stmt.query_map([], row_to_raw)?;
    let mut entities = Vec::new();
    for row in rows {
        entities.push(from_raw(row?)?);
    }
    Ok(entities)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use chrono::{TimeZone, Utc};

    #[test]
    fn register_keeps_first_creation_time() {
        let conn = open_in_memory().unwrap();
        let old = Utc.with_ymd_and_hms(2001, 1, 1, 0, 0, 0).unwrap();
        let first = register_legal_entity_at(&conn, "BPNL-A", Some("Acme"), old).unwrap();
        let again = register_legal_entity(&conn, "BPNL-A", None).unwrap();

        assert_eq!(first.created_at, old);
        assert_eq!(again.created_at, old);
        assert_eq!(again.legal_name.as_deref(), Some("Acme"));
    }

    #[test]
    fn empty_bpnl_is_rejected() {
        let conn = open_in_memory().unwrap();
        assert!(matches!(
            register_legal_entity(&conn, "  ", None),
            Err(RelationError::InvalidRelation { .. })
        ));
    }

    #[test]
    fn list_orders_oldest_first() {
        let conn = open_in_memory().unwrap();
        register_legal_entity_at(
            &conn,
            "BPNL-NEW",
            None,
            Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
        )
        .unwrap();
        register_legal_entity_at(
            &conn,
            "BPNL-OLD",
            None,
            Utc.with_ymd_and_hms(2010, 1, 1, 0, 0, 0).unwrap(),
        )
        .unwrap();

        let bpnls: Vec<String> = list_legal_entities(&conn)
            .unwrap()
            .into_iter()
            .map(|entity| entity.bpnl)
            .collect();
        assert_eq!(bpnls, vec!["BPNL-OLD", "BPNL-NEW"]);
        assert!(find_legal_entity(&conn, "BPNL-MISSING").unwrap().is_none());
    }
}
