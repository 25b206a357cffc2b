//! Upsert strategies per relation type.
//!
//! `IsAlternativeHeadquarterFor` is symmetric: every pair of entities
//! connected through it must end up directly connected, with each edge
//! pointing from the younger entity to the older one. Creating an edge
//! therefore repairs the closure through an explicit worklist; each derived
//! edge that is newly created is expanded in turn until nothing new appears.

use rusqlite::Connection;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use crate::canonical::{self, UpsertKind, UpsertRequest, UpsertResult};
use crate::db::{self, legal_entities};
use crate::error::RelationError;
use crate::model::{LegalEntity, RelationType, ValidityState};
use crate::validity::is_always_active;

/// Type-specific upsert policy layered over the canonical upsert service.
pub trait RelationUpsertStrategy {
    /// The relation type this strategy is responsible for.
    fn relation_type(&self) -> RelationType;

    /// Upsert inside the caller's transaction.
    ///
    /// # Errors
    ///
    /// Returns the validation and store errors of the underlying upsert.
    fn upsert_in(
        &self,
        conn: &Connection,
        request: &UpsertRequest,
    ) -> Result<UpsertResult, RelationError>;
}

/// Upsert as requested, without derived edges.
#[derive(Debug, Clone, Copy)]
pub struct PlainRelationStrategy {
    relation_type: RelationType,
}

impl PlainRelationStrategy {
    #[must_use]
    pub const fn new(relation_type: RelationType) -> Self {
        Self { relation_type }
    }
}

impl RelationUpsertStrategy for PlainRelationStrategy {
    fn relation_type(&self) -> RelationType {
        self.relation_type
    }

    fn upsert_in(
        &self,
        conn: &Connection,
        request: &UpsertRequest,
    ) -> Result<UpsertResult, RelationError> {
        ensure_type(self.relation_type, request)?;
        canonical::upsert_tx(conn, request)
    }
}

/// Direction canonicalization plus transitive closure for
/// `IsAlternativeHeadquarterFor`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlternativeHeadquarterStrategy;

impl RelationUpsertStrategy for AlternativeHeadquarterStrategy {
    fn relation_type(&self) -> RelationType {
        RelationType::IsAlternativeHeadquarterFor
    }

    fn upsert_in(
        &self,
        conn: &Connection,
        request: &UpsertRequest,
    ) -> Result<UpsertResult, RelationError> {
        ensure_type(RelationType::IsAlternativeHeadquarterFor, request)?;
        if !is_always_active(&request.states) {
            return Err(RelationError::invalid(
                "Invalid 'IsAlternativeHeadquarterFor' relation: This relation type does not support any validity constraints.",
            ));
        }

        let (mut source, mut target) = canonicalize(&request.source, &request.target);
        // Equal creation times: keep whichever orientation is already stored.
        if source.created_at == target.created_at
            && canonical::find_edge(conn, &target.bpnl, &source.bpnl, self.relation_type())?
                .is_some()
        {
            std::mem::swap(&mut source, &mut target);
        }
        let canonical_request = UpsertRequest {
            source: source.clone(),
            target: target.clone(),
            relation_type: RelationType::IsAlternativeHeadquarterFor,
            states: request.states.clone(),
        };
        let result = canonical::upsert_tx(conn, &canonical_request)?;

        if result.kind == UpsertKind::Created {
            let derived = close_transitively(conn, &canonical_request)?;
            tracing::info!(
                source = %source.bpnl,
                target = %target.bpnl,
                derived,
                "propagated alternative headquarter relation"
            );
        }
        Ok(result)
    }
}

fn ensure_type(expected: RelationType, request: &UpsertRequest) -> Result<(), RelationError> {
    if request.relation_type == expected {
        Ok(())
    } else {
        Err(RelationError::invalid(format!(
            "{expected} strategy cannot upsert {} relations",
            request.relation_type
        )))
    }
}

/// The strategy responsible for `relation_type`.
#[must_use]
pub fn strategy_for(relation_type: RelationType) -> Box<dyn RelationUpsertStrategy> {
    match relation_type {
        RelationType::IsAlternativeHeadquarterFor => Box::new(AlternativeHeadquarterStrategy),
        other => Box::new(PlainRelationStrategy::new(other)),
    }
}

/// Order a symmetric pair so the edge points at the older entity.
///
/// Equal creation times keep the given order.
#[must_use]
pub fn canonicalize<'a>(
    left: &'a LegalEntity,
    right: &'a LegalEntity,
) -> (&'a LegalEntity, &'a LegalEntity) {
    if left.created_at < right.created_at {
        (right, left)
    } else {
        (left, right)
    }
}

/// Upsert through the strategy for the request's type in one transaction.
///
/// # Errors
///
/// Any failure, including one on a derived edge, rolls back the whole
/// operation.
pub fn upsert_relation(
    conn: &Connection,
    request: &UpsertRequest,
) -> Result<UpsertResult, RelationError> {
    db::immediate(conn, |tx| {
        strategy_for(request.relation_type).upsert_in(tx, request)
    })
}

/// Resolve both BPNLs to legal entities, then [`upsert_relation`].
///
/// # Errors
///
/// Returns [`RelationError::SourceNotFound`] / [`RelationError::TargetNotFound`]
/// for unregistered BPNLs, plus the errors of [`upsert_relation`].
pub fn upsert_relation_by_bpnl(
    conn: &Connection,
    source_bpnl: &str,
    target_bpnl: &str,
    relation_type: RelationType,
    states: Vec<ValidityState>,
) -> Result<UpsertResult, RelationError> {
    db::immediate(conn, |tx| {
        let request =
            canonical::resolve_request(tx, source_bpnl, target_bpnl, relation_type, states)?;
        strategy_for(relation_type).upsert_in(tx, &request)
    })
}

/// Create every missing edge implied by `created`. Returns how many derived
/// edges were newly created.
fn close_transitively(conn: &Connection, created: &UpsertRequest) -> Result<usize, RelationError> {
    let relation_type = created.relation_type;
    let mut entities: HashMap<String, LegalEntity> = HashMap::new();
    for entity in [&created.source, &created.target] {
        entities.insert(entity.bpnl.clone(), entity.clone());
    }

    let mut seen: HashSet<(String, String)> = HashSet::new();
    seen.insert(pair_key(&created.source.bpnl, &created.target.bpnl));
    let mut worklist = VecDeque::from([(created.source.bpnl.clone(), created.target.bpnl.clone())]);
    let mut derived = 0;

    while let Some((source_bpnl, target_bpnl)) = worklist.pop_front() {
        let mut candidates = Vec::new();
        for (pivot, partner) in [(&source_bpnl, &target_bpnl), (&target_bpnl, &source_bpnl)] {
            for opposite in group_members(conn, relation_type, pivot)? {
                if opposite == *partner || opposite == *pivot {
                    continue;
                }
                let partner_entity = cached_entity(conn, &mut entities, partner)?;
                let opposite_entity = cached_entity(conn, &mut entities, &opposite)?;
                let (source, target) = canonicalize(&partner_entity, &opposite_entity);
                candidates.push((source.clone(), target.clone()));
            }
        }

        for (source, target) in candidates {
            if !seen.insert(pair_key(&source.bpnl, &target.bpnl)) {
                continue;
            }
            // Equal creation times: a stored reverse edge already joins the pair.
            if source.created_at == target.created_at
                && canonical::find_edge(conn, &target.bpnl, &source.bpnl, relation_type)?.is_some()
            {
                continue;
            }
            let request = UpsertRequest {
                source,
                target,
                relation_type,
                states: created.states.clone(),
            };
            let result = canonical::upsert_tx(conn, &request)?;
            if result.kind == UpsertKind::Created {
                tracing::debug!(
                    source = %request.source.bpnl,
                    target = %request.target.bpnl,
                    "derived transitive edge"
                );
                derived += 1;
                worklist.push_back((request.source.bpnl, request.target.bpnl));
            }
        }
    }

    Ok(derived)
}

/// Order-independent identity of an entity pair.
fn pair_key(left: &str, right: &str) -> (String, String) {
    if left <= right {
        (left.to_string(), right.to_string())
    } else {
        (right.to_string(), left.to_string())
    }
}

/// Every endpoint of the edges touching `pivot`, in stable order.
fn group_members(
    conn: &Connection,
    relation_type: RelationType,
    pivot: &str,
) -> Result<BTreeSet<String>, RelationError> {
    let mut members = BTreeSet::new();
    for edge in canonical::find_touching(conn, relation_type, pivot)? {
        members.insert(edge.source_bpnl);
        members.insert(edge.target_bpnl);
    }
    Ok(members)
}

fn cached_entity(
    conn: &Connection,
    cache: &mut HashMap<String, LegalEntity>,
    bpnl: &str,
) -> Result<LegalEntity, RelationError> {
    if let Some(entity) = cache.get(bpnl) {
        return Ok(entity.clone());
    }
    let entity = legal_entities::find_legal_entity(conn, bpnl)?.ok_or_else(|| {
        RelationError::Corrupt {
            column: "canonical_relations.bpnl",
            value: bpnl.to_string(),
        }
    })?;
    cache.insert(bpnl.to_string(), entity.clone());
    Ok(entity)
}
