//! Sharing state of staged relations.
//!
//! The engine only drives two transitions: any write of an Input stage
//! resets to `Initial`, and promoting an Output sets `Success`. `Pending` and
//! `Error` belong to the downstream synchronizer.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::db::{from_us, now, parse_column, to_us};
use crate::error::RelationError;
use crate::model::{ParseEnumError, RelationType};

/// Synchronization status of a staged relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SharingStateType {
    Initial,
    Pending,
    Success,
    Error,
}

impl SharingStateType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initial => "Initial",
            Self::Pending => "Pending",
            Self::Success => "Success",
            Self::Error => "Error",
        }
    }
}

impl fmt::Display for SharingStateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SharingStateType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "initial" => Ok(Self::Initial),
            "pending" => Ok(Self::Pending),
            "success" => Ok(Self::Success),
            "error" => Ok(Self::Error),
            _ => Err(ParseEnumError {
                expected: "sharing state",
                got: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharingState {
    pub state_type: SharingStateType,
    pub relation_type: Option<RelationType>,
    pub error_message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Reset to `Initial` after the Input stage was written.
///
/// # Errors
///
/// Returns a store error if the update fails.
pub fn set_initial(
    conn: &Connection,
    relation_id: i64,
    relation_type: RelationType,
) -> Result<(), RelationError> {
    conn.execute(
        "UPDATE relations
         SET sharing_state = 'Initial',
             sharing_relation_type = ?2,
             sharing_error_message = NULL,
             sharing_updated_at_us = ?3
         WHERE relation_id = ?1",
        params![relation_id, relation_type.as_str(), to_us(now())],
    )?;
    tracing::debug!(relation_id, %relation_type, "sharing state reset to Initial");
    Ok(())
}

/// Mark the relation as shared after its Output was promoted.
///
/// # Errors
///
/// Returns a store error if the update fails.
pub fn set_success(conn: &Connection, relation_id: i64) -> Result<(), RelationError> {
    conn.execute(
        "UPDATE relations
         SET sharing_state = 'Success',
             sharing_error_message = NULL,
             sharing_updated_at_us = ?2
         WHERE relation_id = ?1",
        params![relation_id, to_us(now())],
    )?;
    tracing::debug!(relation_id, "sharing state set to Success");
    Ok(())
}

/// Record a failed synchronization. Only the synchronizer calls this.
///
/// # Errors
///
/// Returns a store error if the update fails.
pub fn mark_error(conn: &Connection, relation_id: i64, message: &str) -> Result<(), RelationError> {
    conn.execute(
        "UPDATE relations
         SET sharing_state = 'Error',
             sharing_error_message = ?2,
             sharing_updated_at_us = ?3
         WHERE relation_id = ?1",
        params![relation_id, message, to_us(now())],
    )?;
    tracing::warn!(relation_id, message, "sharing state set to Error");
    Ok(())
}

/// Current sharing state, `None` when it was never set.
///
/// # Errors
///
/// Returns a store error if the query fails or a column is corrupt.
pub fn current(conn: &Connection, relation_id: i64) -> Result<Option<SharingState>, RelationError> {
    let raw = conn
        .query_row(
            "SELECT sharing_state, sharing_relation_type, sharing_error_message, sharing_updated_at_us
             FROM relations
             WHERE relation_id = ?1",
            params![relation_id],
            |row| {
                Ok((
                    row.get::<_, Option<String>>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<i64>>(3)?,
                ))
            },
        )
        .optional()?;

    let Some((Some(state_type), relation_type, error_message, updated_at_us)) = raw else {
        return Ok(None);
    };
    Ok(Some(SharingState {
        state_type: parse_column("sharing_state", state_type)?,
        relation_type: relation_type
            .map(|value| parse_column("sharing_relation_type", value))
            .transpose()?,
        error_message,
        updated_at: from_us("sharing_updated_at_us", updated_at_us.unwrap_or_default())?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;

    fn seed_relation(conn: &Connection) -> i64 {
        conn.execute(
            "INSERT INTO relations (tenant_id, external_id, created_at_us) VALUES ('T', 'R-1', 1)",
            [],
        )
        .unwrap();
        conn.last_insert_rowid()
    }

    #[test]
    fn unset_state_reads_as_none() {
        let conn = open_in_memory().unwrap();
        let relation_id = seed_relation(&conn);
        assert_eq!(current(&conn, relation_id).unwrap(), None);
        assert_eq!(current(&conn, relation_id + 1).unwrap(), None);
    }

    #[test]
    fn transitions_are_recorded() {
        let conn = open_in_memory().unwrap();
        let relation_id = seed_relation(&conn);

        set_initial(&conn, relation_id, RelationType::IsOwnedBy).unwrap();
        let state = current(&conn, relation_id).unwrap().unwrap();
        assert_eq!(state.state_type, SharingStateType::Initial);
        assert_eq!(state.relation_type, Some(RelationType::IsOwnedBy));

        mark_error(&conn, relation_id, "downstream rejected").unwrap();
        let state = current(&conn, relation_id).unwrap().unwrap();
        assert_eq!(state.state_type, SharingStateType::Error);
        assert_eq!(state.error_message.as_deref(), Some("downstream rejected"));

        set_success(&conn, relation_id).unwrap();
        let state = current(&conn, relation_id).unwrap().unwrap();
        assert_eq!(state.state_type, SharingStateType::Success);
        assert_eq!(state.error_message, None);
        assert_eq!(state.relation_type, Some(RelationType::IsOwnedBy));
    }

    #[test]
    fn parse_sharing_state() {
        assert_eq!(
            "ERROR".parse::<SharingStateType>().unwrap(),
            SharingStateType::Error
        );
        assert!("done".parse::<SharingStateType>().is_err());
    }
}
