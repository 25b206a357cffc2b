//! Append-only changelog of staged and canonical mutations.
//!
//! Entries are written in the same transaction as the change they describe,
//! so a rolled-back operation leaves no trace here.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params, params_from_iter};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::db::query::{Conditions, Page, PageRequest, count};
use crate::db::{from_us, now, parse_column, to_us};
use crate::error::RelationError;
use crate::model::{ParseEnumError, StageType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangelogType {
    Create,
    Update,
}

impl ChangelogType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
        }
    }
}

impl fmt::Display for ChangelogType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangelogType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CREATE" => Ok(Self::Create),
            "UPDATE" => Ok(Self::Update),
            _ => Err(ParseEnumError {
                expected: "changelog type",
                got: s.to_string(),
            }),
        }
    }
}

/// What kind of record a changelog entry refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityKind {
    Relation,
    LegalEntity,
}

impl EntityKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Relation => "RELATION",
            Self::LegalEntity => "LEGAL_ENTITY",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "RELATION" => Ok(Self::Relation),
            "LEGAL_ENTITY" => Ok(Self::LegalEntity),
            _ => Err(ParseEnumError {
                expected: "entity kind",
                got: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangelogEntry {
    pub entry_id: i64,
    pub subject_id: String,
    pub tenant_id: Option<String>,
    pub change_type: ChangelogType,
    pub stage: Option<StageType>,
    pub entity_kind: EntityKind,
    pub created_at: DateTime<Utc>,
}

/// Filter for changelog reads.
#[derive(Debug, Clone, Default)]
pub struct ChangelogFilter {
    pub tenant_id: Option<String>,
    pub entity_kind: Option<EntityKind>,
    pub subject_id: Option<String>,
    /// Only entries created strictly after this instant.
    pub since: Option<DateTime<Utc>>,
}

/// Append one entry.
///
/// # Errors
///
/// Returns a store error if the insert fails.
pub fn record(
    conn: &Connection,
    subject_id: &str,
    tenant_id: Option<&str>,
    change_type: ChangelogType,
    stage: Option<StageType>,
    entity_kind: EntityKind,
) -> Result<(), RelationError> {
    conn.execute(
        "INSERT INTO changelog_entries
            (subject_id, tenant_id, change_type, stage, entity_kind, created_at_us)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            subject_id,
            tenant_id,
            change_type.as_str(),
            stage.map(StageType::as_str),
            entity_kind.as_str(),
            to_us(now()),
        ],
    )?;
    tracing::debug!(subject_id, %change_type, %entity_kind, "changelog entry recorded");
    Ok(())
}

struct RawEntry {
    entry_id: i64,
    subject_id: String,
    tenant_id: Option<String>,
    change_type: String,
    stage: Option<String>,
    entity_kind: String,
    created_at_us: i64,
}

impl TryFrom<RawEntry> for ChangelogEntry {
    type Error = RelationError;

    fn try_from(raw: RawEntry) -> Result<Self, Self::Error> {
        Ok(Self {
            entry_id: raw.entry_id,
            subject_id: raw.subject_id,
            tenant_id: raw.tenant_id,
            change_type: parse_column("change_type", raw.change_type)?,
            stage: raw
                .stage
                .map(|value| parse_column("stage", value))
                .transpose()?,
            entity_kind: parse_column("entity_kind", raw.entity_kind)?,
            created_at: from_us("created_at_us", raw.created_at_us)?,
        })
    }
}

/// Page through the changelog in insertion order.
///
/// # Errors
///
/// Returns a store error if a query fails or a row is corrupt.
pub fn list_changelog(
    conn: &Connection,
    filter: &ChangelogFilter,
    page: PageRequest,
) -> Result<Page<ChangelogEntry>, RelationError> {
    let mut conditions = Conditions::default();
    if let Some(tenant_id) = &filter.tenant_id {
        conditions.eq("tenant_id", tenant_id.clone());
    }
    if let Some(entity_kind) = filter.entity_kind {
        conditions.eq("entity_kind", entity_kind.as_str());
    }
    if let Some(subject_id) = &filter.subject_id {
        conditions.eq("subject_id", subject_id.clone());
    }
    if let Some(since) = filter.since {
        conditions.after("created_at_us", to_us(since));
    }

    let total = count(conn, "changelog_entries", &conditions)?;
    let sql = format!(
        "SELECT entry_id, subject_id, tenant_id, change_type, stage, entity_kind, created_at_us
         FROM changelog_entries{}
         ORDER BY entry_id{}",
        conditions.where_clause(),
        page.limit_clause()
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(conditions.params()), |row| {
        Ok(RawEntry {
            entry_id: row.get(0)?,
            subject_id: row.get(1)?,
            tenant_id: row.get(2)?,
            change_type: row.get(3)?,
            stage: row.get(4)?,
            entity_kind: row.get(5)?,
            created_at_us: row.get(6)?,
        })
    })?;

    let mut content = Vec::new();
    for row in rows {
        content.push(ChangelogEntry::try_from(row?)?);
    }
    Ok(Page::new(total, page, content))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;

    #[test]
    fn entries_list_in_insertion_order() {
        let conn = open_in_memory().unwrap();
        record(
            &conn,
            "R-1",
            Some("T1"),
            ChangelogType::Create,
            Some(StageType::Input),
            EntityKind::Relation,
        )
        .unwrap();
        record(
            &conn,
            "BPNL-A",
            None,
            ChangelogType::Update,
            None,
            EntityKind::LegalEntity,
        )
        .unwrap();

        let page = list_changelog(&conn, &ChangelogFilter::default(), PageRequest::default())
            .unwrap();
        assert_eq!(page.total_elements, 2);
        assert_eq!(page.content[0].subject_id, "R-1");
        assert_eq!(page.content[0].stage, Some(StageType::Input));
        assert_eq!(page.content[1].stage, None);
        assert_eq!(page.content[1].entity_kind, EntityKind::LegalEntity);
    }

    #[test]
    fn filter_by_tenant_and_kind() {
        let conn = open_in_memory().unwrap();
        for (subject, tenant) in [("R-1", "T1"), ("R-2", "T2")] {
            record(
                &conn,
                subject,
                Some(tenant),
                ChangelogType::Create,
                Some(StageType::Input),
                EntityKind::Relation,
            )
            .unwrap();
        }

        let filter = ChangelogFilter {
            tenant_id: Some("T2".into()),
            entity_kind: Some(EntityKind::Relation),
            ..ChangelogFilter::default()
        };
        let page = list_changelog(&conn, &filter, PageRequest::default()).unwrap();
        assert_eq!(page.total_elements, 1);
        assert_eq!(page.content[0].subject_id, "R-2");
    }

    #[test]
    fn serde_uses_wire_names() {
        assert_eq!(
            serde_json::to_value(ChangelogType::Update).unwrap(),
            "UPDATE"
        );
        assert_eq!(
            serde_json::to_value(EntityKind::LegalEntity).unwrap(),
            "LEGAL_ENTITY"
        );
    }
}
