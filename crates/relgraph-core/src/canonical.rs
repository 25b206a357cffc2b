//! Canonical relation graph.
//!
//! Edges are identified by `(source BPNL, target BPNL, relation type)` and
//! looked up direction-sensitively. An edge's state list is replaced
//! wholesale when it differs positionally from the proposed one.

use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;

use crate::changelog::{self, ChangelogType, EntityKind};
use crate::db::{self, from_us, legal_entities, parse_column, states, to_us};
use crate::error::RelationError;
use crate::model::{CanonicalRelation, LegalEntity, RelationType, ValidityState};

/// Scope label for canonical lookups.
pub(crate) const CANONICAL_SCOPE: &str = "canonical graph";

/// Proposed canonical edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertRequest {
    pub source: LegalEntity,
    pub target: LegalEntity,
    pub relation_type: RelationType,
    pub states: Vec<ValidityState>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum UpsertKind {
    Created,
    Updated,
    NoChange,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertResult {
    pub relation: CanonicalRelation,
    pub kind: UpsertKind,
}

/// Canonical edge operations over one store connection.
pub struct RelationUpsertService<'conn> {
    conn: &'conn Connection,
}

impl<'conn> RelationUpsertService<'conn> {
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    /// Create or update one edge in its own transaction.
    ///
    /// # Errors
    ///
    /// Returns [`RelationError::SelfRelation`] when both endpoints are the
    /// same entity and [`RelationError::SourceNotFound`] /
    /// [`RelationError::TargetNotFound`] for unregistered endpoints.
    pub fn upsert(&self, request: &UpsertRequest) -> Result<UpsertResult, RelationError> {
        db::immediate(self.conn, |tx| upsert_tx(tx, request))
    }

    /// Exact, direction-sensitive lookup.
    ///
    /// # Errors
    ///
    /// Returns a store error if the read fails.
    pub fn find(
        &self,
        source_bpnl: &str,
        target_bpnl: &str,
        relation_type: RelationType,
    ) -> Result<Option<CanonicalRelation>, RelationError> {
        find_edge(self.conn, source_bpnl, target_bpnl, relation_type)
    }

    /// Edges of `relation_type` with `bpnl` as source or target.
    ///
    /// # Errors
    ///
    /// Returns a store error if the read fails.
    pub fn find_touching(
        &self,
        relation_type: RelationType,
        bpnl: &str,
    ) -> Result<Vec<CanonicalRelation>, RelationError> {
        find_touching(self.conn, relation_type, bpnl)
    }

    /// All edges, optionally restricted to one type.
    ///
    /// # Errors
    ///
    /// Returns a store error if the read fails.
    pub fn list(
        &self,
        relation_type: Option<RelationType>,
    ) -> Result<Vec<CanonicalRelation>, RelationError> {
        let raws = match relation_type {
            Some(relation_type) => {
                let mut stmt = self.conn.prepare(&format!(
                    "SELECT {EDGE_COLUMNS} FROM canonical_relations
                     WHERE relation_type = ?1
                     ORDER BY edge_id"
                ))?;
                stmt.query_map(params![relation_type.as_str()], row_to_raw_edge)?
                    .collect::<rusqlite::Result<Vec<_>>>()?
            }
            None => {
                let mut stmt = self.conn.prepare(&format!(
                    "SELECT {EDGE_COLUMNS} FROM canonical_relations ORDER BY edge_id"
                ))?;
                stmt.query_map([], row_to_raw_edge)?
                    .collect::<rusqlite::Result<Vec<_>>>()?
            }
        };
        raws.into_iter()
            .map(|raw| finish_edge(self.conn, raw))
            .collect()
    }

    /// Existing edges of the request's type around its source whose ACTIVE
    /// windows collide with the request. See [`filter_overlapping`].
    ///
    /// # Errors
    ///
    /// Returns a store error if the read fails.
    pub fn overlapping(
        &self,
        request: &UpsertRequest,
    ) -> Result<Vec<CanonicalRelation>, RelationError> {
        let existing = find_touching(self.conn, request.relation_type, &request.source.bpnl)?;
        Ok(filter_overlapping(request, &existing))
    }
}

/// Keep the edges whose ACTIVE windows collide with the candidate.
///
/// Edges with exactly the candidate's endpoints are dropped first. A
/// collision means a boundary (`valid_from` or `valid_to`) of some ACTIVE
/// candidate state lies inside the closed window of some ACTIVE existing
/// state. An existing window strictly nested inside a candidate window has
/// no candidate boundary inside it and is therefore not reported.
#[must_use]
pub fn filter_overlapping(
    candidate: &UpsertRequest,
    existing: &[CanonicalRelation],
) -> Vec<CanonicalRelation> {
    existing
        .iter()
        .filter(|edge| {
            !(edge.source_bpnl == candidate.source.bpnl && edge.target_bpnl == candidate.target.bpnl)
        })
        .filter(|edge| has_overlap(&candidate.states, &edge.states))
        .cloned()
        .collect()
}

fn has_overlap(candidate: &[ValidityState], existing: &[ValidityState]) -> bool {
    candidate.iter().filter(|state| state.is_active()).any(|proposed| {
        existing
            .iter()
            .filter(|state| state.is_active())
            .any(|window| window.contains(proposed.valid_from) || window.contains(proposed.valid_to))
    })
}

fn states_differ(existing: &[ValidityState], proposed: &[ValidityState]) -> bool {
    existing.len() != proposed.len()
        || existing.iter().zip(proposed).any(|(current, next)| {
            current.valid_from != next.valid_from
                || current.valid_to != next.valid_to
                || current.state_type != next.state_type
        })
}

/// Build a request from BPNLs, resolving both endpoints.
///
/// # Errors
///
/// Returns [`RelationError::SourceNotFound`] / [`RelationError::TargetNotFound`]
/// for BPNLs that are not registered legal entities.
pub fn resolve_request(
    conn: &Connection,
    source_bpnl: &str,
    target_bpnl: &str,
    relation_type: RelationType,
    states: Vec<ValidityState>,
) -> Result<UpsertRequest, RelationError> {
    let source = legal_entities::find_legal_entity(conn, source_bpnl)?.ok_or_else(|| {
        RelationError::SourceNotFound {
            reference: source_bpnl.to_string(),
            scope: CANONICAL_SCOPE.to_string(),
        }
    })?;
    let target = legal_entities::find_legal_entity(conn, target_bpnl)?.ok_or_else(|| {
        RelationError::TargetNotFound {
            reference: target_bpnl.to_string(),
            scope: CANONICAL_SCOPE.to_string(),
        }
    })?;
    Ok(UpsertRequest {
        source,
        target,
        relation_type,
        states,
    })
}

/// Upsert one edge inside the caller's transaction.
pub(crate) fn upsert_tx(
    conn: &Connection,
    request: &UpsertRequest,
) -> Result<UpsertResult, RelationError> {
    let source_bpnl = request.source.bpnl.as_str();
    let target_bpnl = request.target.bpnl.as_str();
    if source_bpnl == target_bpnl {
        return Err(RelationError::SelfRelation {
            id: source_bpnl.to_string(),
        });
    }
    if legal_entities::find_legal_entity(conn, source_bpnl)?.is_none() {
        return Err(RelationError::SourceNotFound {
            reference: source_bpnl.to_string(),
            scope: CANONICAL_SCOPE.to_string(),
        });
    }
    if legal_entities::find_legal_entity(conn, target_bpnl)?.is_none() {
        return Err(RelationError::TargetNotFound {
            reference: target_bpnl.to_string(),
            scope: CANONICAL_SCOPE.to_string(),
        });
    }

    let proposed: Vec<ValidityState> = request
        .states
        .iter()
        .map(ValidityState::at_storage_precision)
        .collect();
    let relation_type = request.relation_type;

    if let Some(mut existing) = find_edge(conn, source_bpnl, target_bpnl, relation_type)? {
        if !states_differ(&existing.states, &proposed) {
            tracing::debug!(source_bpnl, target_bpnl, %relation_type, "canonical edge unchanged");
            return Ok(UpsertResult {
                relation: existing,
                kind: UpsertKind::NoChange,
            });
        }
        let updated_at = db::now();
        conn.execute(
            "UPDATE canonical_relations SET updated_at_us = ?2 WHERE edge_id = ?1",
            params![existing.edge_id, to_us(updated_at)],
        )?;
        states::replace_edge_states(conn, existing.edge_id, &proposed)?;
        existing.states = proposed;
        existing.updated_at = updated_at;
        tracing::info!(source_bpnl, target_bpnl, %relation_type, "updated canonical edge states");
        return Ok(UpsertResult {
            relation: existing,
            kind: UpsertKind::Updated,
        });
    }

    let now = db::now();
    conn.execute(
        "INSERT INTO canonical_relations
            (source_bpnl, target_bpnl, relation_type, created_at_us, updated_at_us)
         VALUES (?1, ?2, ?3, ?4, ?4)",
        params![source_bpnl, target_bpnl, relation_type.as_str(), to_us(now)],
    )?;
    let edge_id = conn.last_insert_rowid();
    states::replace_edge_states(conn, edge_id, &proposed)?;
    for bpnl in [source_bpnl, target_bpnl] {
        changelog::record(
            conn,
            bpnl,
            None,
            ChangelogType::Update,
            None,
            EntityKind::LegalEntity,
        )?;
    }
    tracing::info!(source_bpnl, target_bpnl, %relation_type, "created canonical edge");

    Ok(UpsertResult {
        relation: CanonicalRelation {
            edge_id,
            relation_type,
            source_bpnl: source_bpnl.to_string(),
            target_bpnl: target_bpnl.to_string(),
            states: proposed,
            created_at: now,
            updated_at: now,
        },
        kind: UpsertKind::Created,
    })
}

const EDGE_COLUMNS: &str =
    "edge_id, source_bpnl, target_bpnl, relation_type, created_at_us, updated_at_us";

struct RawEdge {
    edge_id: i64,
    source_bpnl: String,
    target_bpnl: String,
    relation_type: String,
    created_at_us: i64,
    updated_at_us: i64,
}

fn row_to_raw_edge(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawEdge> {
    Ok(RawEdge {
        edge_id: row.get(0)?,
        source_bpnl: row.get(1)?,
        target_bpnl: row.get(2)?,
        relation_type: row.get(3)?,
        created_at_us: row.get(4)?,
        updated_at_us: row.get(5)?,
    })
}

fn finish_edge(conn: &Connection, raw: RawEdge) -> Result<CanonicalRelation, RelationError> {
    Ok(CanonicalRelation {
        states: states::edge_states(conn, raw.edge_id)?,
        edge_id: raw.edge_id,
        relation_type: parse_column("relation_type", raw.relation_type)?,
        source_bpnl: raw.source_bpnl,
        target_bpnl: raw.target_bpnl,
        created_at: from_us("created_at_us", raw.created_at_us)?,
        updated_at: from_us("updated_at_us", raw.updated_at_us)?,
    })
}

pub(crate) fn find_edge(
    conn: &Connection,
    source_bpnl: &str,
    target_bpnl: &str,
    relation_type: RelationType,
) -> Result<Option<CanonicalRelation>, RelationError> {
    conn.query_row(
        &format!(
            "SELECT {EDGE_COLUMNS} FROM canonical_relations
             WHERE source_bpnl = ?1 AND target_bpnl = ?2 AND relation_type = ?3"
        ),
        params![source_bpnl, target_bpnl, relation_type.as_str()],
        row_to_raw_edge,
    )
    .optional()?
    .map(|raw| finish_edge(conn, raw))
    .transpose()
}

pub(crate) fn find_touching(
    conn: &Connection,
    relation_type: RelationType,
    bpnl: &str,
) -> Result<Vec<CanonicalRelation>, RelationError> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {EDGE_COLUMNS} FROM canonical_relations
         WHERE relation_type = ?1 AND (source_bpnl = ?2 OR target_bpnl = ?2)
         ORDER BY edge_id"
    ))?;
    let raws = stmt
        .query_map(params![relation_type.as_str(), bpnl], row_to_raw_edge)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    raws.into_iter().map(|raw| finish_edge(conn, raw)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changelog::{ChangelogFilter, list_changelog};
    use crate::db::open_in_memory;
    use crate::db::query::PageRequest;
    use crate::model::BusinessStateType;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn at(year: i32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0).unwrap()
    }

    fn entity(conn: &Connection, bpnl: &str) -> LegalEntity {
        legal_entities::register_legal_entity(conn, bpnl, None).unwrap()
    }

    fn active(from: i32, to: i32) -> ValidityState {
        ValidityState::new(at(from), at(to), BusinessStateType::Active)
    }

    fn edge(source: &str, target: &str, states: Vec<ValidityState>) -> CanonicalRelation {
        CanonicalRelation {
            edge_id: 0,
            relation_type: RelationType::IsManagedBy,
            source_bpnl: source.into(),
            target_bpnl: target.into(),
            states,
            created_at: at(2000),
            updated_at: at(2000),
        }
    }

    fn request(source: &str, target: &str, states: Vec<ValidityState>) -> UpsertRequest {
        UpsertRequest {
            source: LegalEntity {
                bpnl: source.into(),
                legal_name: None,
                created_at: at(2000),
            },
            target: LegalEntity {
                bpnl: target.into(),
                legal_name: None,
                created_at: at(2000),
            },
            relation_type: RelationType::IsManagedBy,
            states,
        }
    }

    #[test]
    fn upsert_twice_creates_then_no_change() {
        let conn = open_in_memory().unwrap();
        let service = RelationUpsertService::new(&conn);
        let request = UpsertRequest {
            source: entity(&conn, "BPNL-A"),
            target: entity(&conn, "BPNL-B"),
            relation_type: RelationType::IsOwnedBy,
            states: vec![active(2020, 2030)],
        };

        let first = service.upsert(&request).unwrap();
        assert_eq!(first.kind, UpsertKind::Created);
        let second = service.upsert(&request).unwrap();
        assert_eq!(second.kind, UpsertKind::NoChange);
        assert_eq!(second.relation, first.relation);
    }

    #[test]
    fn changed_states_replace_wholesale() {
        let conn = open_in_memory().unwrap();
        let service = RelationUpsertService::new(&conn);
        let mut request = UpsertRequest {
            source: entity(&conn, "BPNL-A"),
            target: entity(&conn, "BPNL-B"),
            relation_type: RelationType::IsOwnedBy,
            states: vec![active(2020, 2030)],
        };
        service.upsert(&request).unwrap();

        request.states = vec![active(2020, 2025), active(2026, 2030)];
        let result = service.upsert(&request).unwrap();
        assert_eq!(result.kind, UpsertKind::Updated);

        let stored = service
            .find("BPNL-A", "BPNL-B", RelationType::IsOwnedBy)
            .unwrap()
            .unwrap();
        assert_eq!(stored.states, request.states);
    }

    #[test]
    fn lookup_is_direction_and_type_sensitive() {
        let conn = open_in_memory().unwrap();
        let service = RelationUpsertService::new(&conn);
        let request = UpsertRequest {
            source: entity(&conn, "BPNL-A"),
            target: entity(&conn, "BPNL-B"),
            relation_type: RelationType::IsOwnedBy,
            states: Vec::new(),
        };
        service.upsert(&request).unwrap();

        assert!(service
            .find("BPNL-B", "BPNL-A", RelationType::IsOwnedBy)
            .unwrap()
            .is_none());
        assert!(service
            .find("BPNL-A", "BPNL-B", RelationType::IsManagedBy)
            .unwrap()
            .is_none());
        assert_eq!(service.find_touching(RelationType::IsOwnedBy, "BPNL-B").unwrap().len(), 1);
        assert_eq!(service.list(None).unwrap().len(), 1);
        assert!(service.list(Some(RelationType::IsManagedBy)).unwrap().is_empty());
    }

    #[test]
    fn creation_logs_both_endpoints() {
        let conn = open_in_memory().unwrap();
        let service = RelationUpsertService::new(&conn);
        service
            .upsert(&UpsertRequest {
                source: entity(&conn, "BPNL-A"),
                target: entity(&conn, "BPNL-B"),
                relation_type: RelationType::IsManagedBy,
                states: Vec::new(),
            })
            .unwrap();

        let page = list_changelog(&conn, &ChangelogFilter::default(), PageRequest::default())
            .unwrap();
        let subjects: Vec<&str> = page.content.iter().map(|e| e.subject_id.as_str()).collect();
        assert_eq!(subjects, vec!["BPNL-A", "BPNL-B"]);
        assert!(page.content.iter().all(|e| {
            e.change_type == ChangelogType::Update
                && e.entity_kind == EntityKind::LegalEntity
                && e.stage.is_none()
        }));
    }

    #[test]
    fn self_and_unknown_endpoints_are_rejected() {
        let conn = open_in_memory().unwrap();
        let service = RelationUpsertService::new(&conn);
        let a = entity(&conn, "BPNL-A");

        let err = service
            .upsert(&UpsertRequest {
                source: a.clone(),
                target: a.clone(),
                relation_type: RelationType::IsManagedBy,
                states: Vec::new(),
            })
            .unwrap_err();
        assert!(matches!(err, RelationError::SelfRelation { .. }));

        let err = resolve_request(&conn, "BPNL-A", "BPNL-Z", RelationType::IsManagedBy, Vec::new())
            .unwrap_err();
        assert!(matches!(err, RelationError::TargetNotFound { .. }));

        let mut ghost = a.clone();
        ghost.bpnl = "BPNL-GHOST".into();
        let err = service
            .upsert(&UpsertRequest {
                source: ghost,
                target: a,
                relation_type: RelationType::IsManagedBy,
                states: Vec::new(),
            })
            .unwrap_err();
        assert!(matches!(err, RelationError::SourceNotFound { .. }));
    }

    #[test]
    fn overlap_excludes_same_endpoints() {
        let candidate = request("BPNL-A", "BPNL-B", vec![active(2020, 2030)]);
        let existing = vec![
            edge("BPNL-A", "BPNL-B", vec![active(2020, 2030)]),
            edge("BPNL-A", "BPNL-C", vec![active(2025, 2035)]),
        ];
        let hits = filter_overlapping(&candidate, &existing);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].target_bpnl, "BPNL-C");
    }

    #[test]
    fn overlap_boundaries_are_closed() {
        let candidate = request("BPNL-A", "BPNL-B", vec![active(2020, 2030)]);
        let touching = vec![edge("BPNL-A", "BPNL-C", vec![active(2030, 2040)])];
        assert_eq!(filter_overlapping(&candidate, &touching).len(), 1);

        let disjoint = vec![edge("BPNL-A", "BPNL-C", vec![active(2031, 2040)])];
        assert!(filter_overlapping(&candidate, &disjoint).is_empty());
    }

    #[test]
    fn overlap_ignores_inactive_windows() {
        let candidate = request("BPNL-A", "BPNL-B", vec![active(2020, 2030)]);
        let inactive = ValidityState::new(at(2019), at(2040), BusinessStateType::Inactive);
        let existing = vec![edge("BPNL-A", "BPNL-C", vec![inactive])];
        assert!(filter_overlapping(&candidate, &existing).is_empty());
    }

    #[test]
    fn overlap_misses_existing_window_nested_inside_candidate() {
        let candidate = request("BPNL-A", "BPNL-B", vec![active(2020, 2040)]);
        let nested = vec![edge("BPNL-A", "BPNL-C", vec![active(2025, 2030)])];
        assert!(filter_overlapping(&candidate, &nested).is_empty());

        let candidate = request("BPNL-A", "BPNL-B", vec![active(2025, 2030)]);
        let enclosing = vec![edge("BPNL-A", "BPNL-C", vec![active(2020, 2040)])];
        assert_eq!(filter_overlapping(&candidate, &enclosing).len(), 1);
    }

    #[test]
    fn overlapping_reads_edges_around_source() {
        let conn = open_in_memory().unwrap();
        let service = RelationUpsertService::new(&conn);
        let a = entity(&conn, "BPNL-A");
        let b = entity(&conn, "BPNL-B");
        let c = entity(&conn, "BPNL-C");
        service
            .upsert(&UpsertRequest {
                source: a.clone(),
                target: c,
                relation_type: RelationType::IsManagedBy,
                states: vec![active(2020, 2030)],
            })
            .unwrap();

        let candidate = UpsertRequest {
            source: a,
            target: b,
            relation_type: RelationType::IsManagedBy,
            states: vec![ValidityState::new(
                at(2029),
                at(2029) + Duration::days(400),
                BusinessStateType::Active,
            )],
        };
        assert_eq!(service.overlapping(&candidate).unwrap().len(), 1);
    }
}
