//! Ordered validity-state lists for staged stages and canonical edges.

use rusqlite::{Connection, params};

use super::{from_us, parse_column, to_us};
use crate::error::RelationError;
use crate::model::{StageType, ValidityState};

struct RawState {
    valid_from_us: i64,
    valid_to_us: i64,
    state_type: String,
}

impl TryFrom<RawState> for ValidityState {
    type Error = RelationError;

    fn try_from(raw: RawState) -> Result<Self, Self::Error> {
        Ok(Self::new(
            from_us("valid_from_us", raw.valid_from_us)?,
            from_us("valid_to_us", raw.valid_to_us)?,
            parse_column("state_type", raw.state_type)?,
        ))
    }
}

fn row_to_raw_state(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawState> {
    Ok(RawState {
        valid_from_us: row.get(0)?,
        valid_to_us: row.get(1)?,
        state_type: row.get(2)?,
    })
}

/// Replace the states of one stage of a staged relation.
pub(crate) fn replace_stage_states(
    conn: &Connection,
    relation_id: i64,
    stage: StageType,
    states: &[ValidityState],
) -> Result<(), RelationError> {
    conn.execute(
        "DELETE FROM relation_states WHERE relation_id = ?1 AND stage = ?2",
        params![relation_id, stage.as_str()],
    )?;
    let mut stmt = conn.prepare_cached(
        "INSERT INTO relation_states
            (relation_id, stage, position, valid_from_us, valid_to_us, state_type)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    for (position, state) in states.iter().enumerate() {
        stmt.execute(params![
            relation_id,
            stage.as_str(),
            position,
            to_us(state.valid_from),
            to_us(state.valid_to),
            state.state_type.as_str(),
        ])?;
    }
    Ok(())
}

/// Load the states of one stage, in stored order.
pub(crate) fn stage_states(
    conn: &Connection,
    relation_id: i64,
    stage: StageType,
) -> Result<Vec<ValidityState>, RelationError> {
    let mut stmt = conn.prepare_cached(
        "SELECT valid_from_us, valid_to_us, state_type
         FROM relation_states
         WHERE relation_id = ?1 AND stage = ?2
         ORDER BY position",
    )?;
    let rows = stmt.query_map(params![relation_id, stage.as_str()], row_to_raw_state)?;
    let mut states = Vec::new();
    for row in rows {
        states.push(ValidityState::try_from(row?)?);
    }
    Ok(states)
}

/// Replace the states of a canonical edge.
pub(crate) fn replace_edge_states(
    conn: &Connection,
    edge_id: i64,
    states: &[ValidityState],
) -> Result<(), RelationError> {
    conn.execute(
        "DELETE FROM canonical_relation_states WHERE edge_id = ?1",
        params![edge_id],
    )?;
    let mut stmt = conn.prepare_cached(
        "INSERT INTO canonical_relation_states
            (edge_id, position, valid_from_us, valid_to_us, state_type)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for (position, state) in states.iter().enumerate() {
        stmt.execute(params![
            edge_id,
            position,
            to_us(state.valid_from),
            to_us(state.valid_to),
            state.state_type.as_str(),
        ])?;
    }
    Ok(())
}

/// Load the states of a canonical edge, in stored order.
pub(crate) fn edge_states(
    conn: &Connection,
    edge_id: i64,
) -> Result<Vec<ValidityState>, RelationError> {
    let mut stmt = conn.prepare_cached(
        "SELECT valid_from_us, valid_to_us, state_type
         FROM canonical_relation_states
         WHERE edge_id = ?1
         ORDER BY position",
    )?;
    let rows = stmt.query_map(params![edge_id], row_to_raw_state)?;
    let mut states = Vec::new();
    for row in rows {
        states.push(ValidityState::try_from(row?)?);
    }
    Ok(states)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use crate::model::BusinessStateType;
    use chrono::{TimeZone, Utc};

    fn seed_relation(conn: &Connection) -> i64 {
        conn.execute(
            "INSERT INTO relations (tenant_id, external_id, created_at_us) VALUES ('T', 'R-1', 1)",
            [],
        )
        .unwrap();
        conn.last_insert_rowid()
    }

    #[test]
    fn stage_states_keep_order_and_stage_separation() {
        let conn = open_in_memory().unwrap();
        let relation_id = seed_relation(&conn);
        let first = ValidityState::always_active();
        let second = ValidityState::new(
            Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap(),
            BusinessStateType::Inactive,
        );

        replace_stage_states(&conn, relation_id, StageType::Input, &[first, second]).unwrap();
        replace_stage_states(&conn, relation_id, StageType::Output, &[second]).unwrap();

        assert_eq!(
            stage_states(&conn, relation_id, StageType::Input).unwrap(),
            vec![first, second]
        );
        assert_eq!(
            stage_states(&conn, relation_id, StageType::Output).unwrap(),
            vec![second]
        );

        replace_stage_states(&conn, relation_id, StageType::Input, &[second]).unwrap();
        assert_eq!(
            stage_states(&conn, relation_id, StageType::Input).unwrap(),
            vec![second]
        );
    }

    #[test]
    fn unknown_state_type_is_reported_as_corrupt() {
        let conn = open_in_memory().unwrap();
        let relation_id = seed_relation(&conn);
        conn.execute(
            "INSERT INTO relation_states
                (relation_id, stage, position, valid_from_us, valid_to_us, state_type)
             VALUES (?1, 'Input', 0, 0, 10, 'RETIRED')",
            params![relation_id],
        )
        .unwrap();

        let err = stage_states(&conn, relation_id, StageType::Input).unwrap_err();
        assert!(matches!(
            err,
            RelationError::Corrupt {
                column: "state_type",
                ..
            }
        ));
    }
}
