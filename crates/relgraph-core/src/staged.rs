//! Tenant-scoped staged relations.
//!
//! A staged relation is a container keyed by `(tenant, external id)` that
//! owns exactly one Input stage (what the tenant submitted, addressed by the
//! tenant's own business partner ids) and at most one Output record (what was
//! promoted, addressed by BPNL). Every public write runs in one
//! `BEGIN IMMEDIATE` transaction; batch writes are all-or-nothing.

use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use crate::changelog::{self, ChangelogType, EntityKind};
use crate::db::query::{self, InputFilter, OutputFilter, Page, PageRequest};
use crate::db::{self, peers, states, to_us};
use crate::error::RelationError;
use crate::model::{
    InputStage, OutputRecord, OutputUpsertRequest, Peer, RelationPutEntry, RelationType,
    StageType, ValidityState,
};
use crate::sharing::{self, SharingState, SharingStateType};
use crate::validity::validate_states;

/// Staged relation operations over one store connection.
pub struct StagedRelationService<'conn> {
    conn: &'conn Connection,
}

struct Container {
    relation_id: i64,
    has_output: bool,
}

struct StoredStage {
    relation_type: String,
    source_partner_id: i64,
    target_partner_id: i64,
}

impl<'conn> StagedRelationService<'conn> {
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    /// Page through a tenant's Input stages.
    ///
    /// # Errors
    ///
    /// Returns a store error if the read fails.
    pub fn list_input(
        &self,
        tenant_id: &str,
        filter: &InputFilter,
        page: PageRequest,
    ) -> Result<Page<InputStage>, RelationError> {
        query::list_input(self.conn, tenant_id, filter, page)
    }

    /// Page through a tenant's Output records.
    ///
    /// # Errors
    ///
    /// Returns a store error if the read fails.
    pub fn list_output(
        &self,
        tenant_id: &str,
        filter: &OutputFilter,
        page: PageRequest,
    ) -> Result<Page<OutputRecord>, RelationError> {
        query::list_output(self.conn, tenant_id, filter, page)
    }

    /// Fetch one Input stage.
    ///
    /// # Errors
    ///
    /// Returns [`RelationError::NotFound`] if the tenant has no Input stage
    /// under `external_id`.
    pub fn get_input(&self, tenant_id: &str, external_id: &str) -> Result<InputStage, RelationError> {
        fetch_input(self.conn, tenant_id, external_id)
    }

    /// Current sharing state of a staged relation.
    ///
    /// # Errors
    ///
    /// Returns [`RelationError::NotFound`] if the container does not exist.
    pub fn sharing_state(
        &self,
        tenant_id: &str,
        external_id: &str,
    ) -> Result<Option<SharingState>, RelationError> {
        let container = require_container(self.conn, tenant_id, external_id)?;
        sharing::current(self.conn, container.relation_id)
    }

    /// Create a staged relation with the default validity state.
    ///
    /// A missing `external_id` is replaced by a random UUID.
    ///
    /// # Errors
    ///
    /// Returns [`RelationError::AlreadyExists`] for a known external id,
    /// [`RelationError::SelfRelation`] when source and target are equal, and
    /// [`RelationError::SourceNotFound`] / [`RelationError::TargetNotFound`]
    /// when a partner reference does not resolve to exactly one partner.
    pub fn create_input(
        &self,
        tenant_id: &str,
        external_id: Option<&str>,
        relation_type: RelationType,
        source_external_id: &str,
        target_external_id: &str,
    ) -> Result<InputStage, RelationError> {
        db::immediate(self.conn, |tx| {
            create_input_tx(
                tx,
                tenant_id,
                external_id,
                relation_type,
                source_external_id,
                target_external_id,
                &[],
            )
        })
    }

    /// Update an existing Input stage. Never creates.
    ///
    /// # Errors
    ///
    /// Returns [`RelationError::NotFound`] if the container or its Input
    /// stage is missing, plus the validation and resolution errors of
    /// [`Self::create_input`].
    pub fn update_input(
        &self,
        tenant_id: &str,
        entry: &RelationPutEntry,
    ) -> Result<InputStage, RelationError> {
        db::immediate(self.conn, |tx| update_input_tx(tx, tenant_id, entry))
    }

    /// Create or update the Input stage identified by `entry.external_id`.
    ///
    /// # Errors
    ///
    /// See [`Self::create_input`] and [`Self::update_input`].
    pub fn upsert_input(
        &self,
        tenant_id: &str,
        entry: &RelationPutEntry,
    ) -> Result<InputStage, RelationError> {
        db::immediate(self.conn, |tx| upsert_input_tx(tx, tenant_id, entry))
    }

    /// Upsert a batch of Input stages in one transaction.
    ///
    /// # Errors
    ///
    /// The first failing entry aborts the whole batch.
    pub fn upsert_input_relations(
        &self,
        tenant_id: &str,
        entries: &[RelationPutEntry],
    ) -> Result<Vec<InputStage>, RelationError> {
        db::immediate(self.conn, |tx| {
            entries
                .iter()
                .map(|entry| upsert_input_tx(tx, tenant_id, entry))
                .collect()
        })
    }

    /// Update a batch of Input stages in one transaction.
    ///
    /// # Errors
    ///
    /// The first failing entry aborts the whole batch.
    pub fn update_input_relations(
        &self,
        tenant_id: &str,
        entries: &[RelationPutEntry],
    ) -> Result<Vec<InputStage>, RelationError> {
        db::immediate(self.conn, |tx| {
            entries
                .iter()
                .map(|entry| update_input_tx(tx, tenant_id, entry))
                .collect()
        })
    }

    /// Delete a staged relation together with its Input stage and Output.
    ///
    /// # Errors
    ///
    /// Returns [`RelationError::NotFound`] if the container or its Input
    /// stage is missing.
    pub fn delete_input(&self, tenant_id: &str, external_id: &str) -> Result<(), RelationError> {
        db::immediate(self.conn, |tx| {
            let container = require_container(tx, tenant_id, external_id)?;
            if stored_stage(tx, container.relation_id)?.is_none() {
                return Err(not_found(external_id));
            }
            tx.execute(
                "DELETE FROM relations WHERE relation_id = ?1",
                params![container.relation_id],
            )?;
            tracing::info!(tenant_id, external_id, "deleted staged relation");
            Ok(())
        })
    }

    /// Promote a staged relation: write its Output record.
    ///
    /// # Errors
    ///
    /// Returns [`RelationError::NotFound`] if the container is missing,
    /// [`RelationError::SelfRelation`] when both BPNLs are equal, and
    /// [`RelationError::InvalidRelation`] for inadmissible states.
    pub fn upsert_output(
        &self,
        request: &OutputUpsertRequest,
    ) -> Result<OutputRecord, RelationError> {
        db::immediate(self.conn, |tx| upsert_output_tx(tx, request))
    }

    /// Promote a batch of staged relations in one transaction.
    ///
    /// # Errors
    ///
    /// The first failing request aborts the whole batch.
    pub fn upsert_output_relations(
        &self,
        requests: &[OutputUpsertRequest],
    ) -> Result<Vec<OutputRecord>, RelationError> {
        db::immediate(self.conn, |tx| {
            requests
                .iter()
                .map(|request| upsert_output_tx(tx, request))
                .collect()
        })
    }
}

fn not_found(external_id: &str) -> RelationError {
    RelationError::NotFound {
        external_id: external_id.to_string(),
    }
}

fn find_container(
    conn: &Connection,
    tenant_id: &str,
    external_id: &str,
) -> Result<Option<Container>, RelationError> {
    Ok(conn
        .query_row(
            "SELECT relation_id, output_relation_type IS NOT NULL
             FROM relations
             WHERE tenant_id = ?1 AND external_id = ?2",
            params![tenant_id, external_id],
            |row| {
                Ok(Container {
                    relation_id: row.get(0)?,
                    has_output: row.get(1)?,
                })
            },
        )
        .optional()?)
}

fn require_container(
    conn: &Connection,
    tenant_id: &str,
    external_id: &str,
) -> Result<Container, RelationError> {
    find_container(conn, tenant_id, external_id)?.ok_or_else(|| not_found(external_id))
}

fn stored_stage(conn: &Connection, relation_id: i64) -> Result<Option<StoredStage>, RelationError> {
    Ok(conn
        .query_row(
            "SELECT relation_type, source_partner_id, target_partner_id
             FROM relation_input_stages
             WHERE relation_id = ?1",
            params![relation_id],
            |row| {
                Ok(StoredStage {
                    relation_type: row.get(0)?,
                    source_partner_id: row.get(1)?,
                    target_partner_id: row.get(2)?,
                })
            },
        )
        .optional()?)
}

fn fetch_input(
    conn: &Connection,
    tenant_id: &str,
    external_id: &str,
) -> Result<InputStage, RelationError> {
    query::get_input(conn, tenant_id, external_id)?.ok_or_else(|| not_found(external_id))
}

fn ensure_distinct(source: &str, target: &str) -> Result<(), RelationError> {
    if source == target {
        return Err(RelationError::SelfRelation {
            id: source.to_string(),
        });
    }
    Ok(())
}

fn resolve_endpoints(
    conn: &Connection,
    tenant_id: &str,
    source_external_id: &str,
    target_external_id: &str,
) -> Result<(Peer, Peer), RelationError> {
    let source = peers::resolve_unique(conn, tenant_id, source_external_id)?.ok_or_else(|| {
        RelationError::SourceNotFound {
            reference: source_external_id.to_string(),
            scope: RelationError::tenant_scope(tenant_id),
        }
    })?;
    let target = peers::resolve_unique(conn, tenant_id, target_external_id)?.ok_or_else(|| {
        RelationError::TargetNotFound {
            reference: target_external_id.to_string(),
            scope: RelationError::tenant_scope(tenant_id),
        }
    })?;
    Ok((source, target))
}

fn upsert_input_tx(
    conn: &Connection,
    tenant_id: &str,
    entry: &RelationPutEntry,
) -> Result<InputStage, RelationError> {
    if find_container(conn, tenant_id, &entry.external_id)?.is_some() {
        update_input_tx(conn, tenant_id, entry)
    } else {
        create_input_tx(
            conn,
            tenant_id,
            Some(&entry.external_id),
            entry.relation_type,
            &entry.source_external_id,
            &entry.target_external_id,
            &entry.states,
        )
    }
}

fn create_input_tx(
    conn: &Connection,
    tenant_id: &str,
    external_id: Option<&str>,
    relation_type: RelationType,
    source_external_id: &str,
    target_external_id: &str,
    proposed_states: &[ValidityState],
) -> Result<InputStage, RelationError> {
    if let Some(external_id) = external_id {
        if find_container(conn, tenant_id, external_id)?.is_some() {
            return Err(RelationError::AlreadyExists {
                external_id: external_id.to_string(),
            });
        }
    }
    ensure_distinct(source_external_id, target_external_id)?;
    let validated = validate_states(proposed_states)?;
    let (source, target) =
        resolve_endpoints(conn, tenant_id, source_external_id, target_external_id)?;

    let external_id = external_id.map_or_else(|| Uuid::new_v4().to_string(), str::to_string);
    let now_us = to_us(db::now());

    conn.execute(
        "INSERT INTO relations (tenant_id, external_id, created_at_us) VALUES (?1, ?2, ?3)",
        params![tenant_id, external_id, now_us],
    )?;
    let relation_id = conn.last_insert_rowid();
    conn.execute(
        "INSERT INTO relation_input_stages
            (relation_id, relation_type, source_partner_id, target_partner_id,
             created_at_us, updated_at_us)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
        params![
            relation_id,
            relation_type.as_str(),
            source.partner_id,
            target.partner_id,
            now_us
        ],
    )?;
    states::replace_stage_states(conn, relation_id, StageType::Input, &validated)?;
    sharing::set_initial(conn, relation_id, relation_type)?;
    changelog::record(
        conn,
        &external_id,
        Some(tenant_id),
        ChangelogType::Create,
        Some(StageType::Input),
        EntityKind::Relation,
    )?;

    tracing::info!(tenant_id, external_id, %relation_type, "created staged relation");
    fetch_input(conn, tenant_id, &external_id)
}

fn update_input_tx(
    conn: &Connection,
    tenant_id: &str,
    entry: &RelationPutEntry,
) -> Result<InputStage, RelationError> {
    let external_id = entry.external_id.as_str();
    let container = require_container(conn, tenant_id, external_id)?;
    ensure_distinct(&entry.source_external_id, &entry.target_external_id)?;
    let proposed = validate_states(&entry.states)?;
    let existing = stored_stage(conn, container.relation_id)?.ok_or_else(|| not_found(external_id))?;
    let (source, target) = resolve_endpoints(
        conn,
        tenant_id,
        &entry.source_external_id,
        &entry.target_external_id,
    )?;

    let persisted = states::stage_states(conn, container.relation_id, StageType::Input)?;

    let has_changes = existing.relation_type != entry.relation_type.as_str()
        || existing.source_partner_id != source.partner_id
        || existing.target_partner_id != target.partner_id
        || persisted != proposed;
    let in_error = sharing::current(conn, container.relation_id)?
        .is_some_and(|state| state.state_type == SharingStateType::Error);

    if has_changes {
        conn.execute(
            "UPDATE relation_input_stages
             SET relation_type = ?2,
                 source_partner_id = ?3,
                 target_partner_id = ?4,
                 updated_at_us = ?5
             WHERE relation_id = ?1",
            params![
                container.relation_id,
                entry.relation_type.as_str(),
                source.partner_id,
                target.partner_id,
                to_us(db::now())
            ],
        )?;
        states::replace_stage_states(conn, container.relation_id, StageType::Input, &proposed)?;
        changelog::record(
            conn,
            external_id,
            Some(tenant_id),
            ChangelogType::Update,
            Some(StageType::Input),
            EntityKind::Relation,
        )?;
        tracing::info!(tenant_id, external_id, "updated staged relation");
    } else {
        tracing::debug!(tenant_id, external_id, "staged relation unchanged");
    }

    if has_changes || in_error {
        sharing::set_initial(conn, container.relation_id, entry.relation_type)?;
    }

    fetch_input(conn, tenant_id, external_id)
}

fn upsert_output_tx(
    conn: &Connection,
    request: &OutputUpsertRequest,
) -> Result<OutputRecord, RelationError> {
    let tenant_id = request.tenant_id.as_str();
    let external_id = request.external_id.as_str();
    let container = require_container(conn, tenant_id, external_id)?;
    ensure_distinct(&request.source_bpnl, &request.target_bpnl)?;
    let states = validate_states(&request.states)?;

    let change_type = if container.has_output {
        ChangelogType::Update
    } else {
        ChangelogType::Create
    };
    let updated_at = db::now();

    conn.execute(
        "UPDATE relations
         SET output_relation_type = ?2,
             output_source_bpnl = ?3,
             output_target_bpnl = ?4,
             output_updated_at_us = ?5
         WHERE relation_id = ?1",
        params![
            container.relation_id,
            request.relation_type.as_str(),
            request.source_bpnl,
            request.target_bpnl,
            to_us(updated_at)
        ],
    )?;
    states::replace_stage_states(conn, container.relation_id, StageType::Output, &states)?;
    sharing::set_success(conn, container.relation_id)?;
    changelog::record(
        conn,
        external_id,
        Some(tenant_id),
        change_type,
        Some(StageType::Output),
        EntityKind::Relation,
    )?;

    tracing::info!(tenant_id, external_id, %change_type, "promoted staged relation output");
    Ok(OutputRecord {
        external_id: request.external_id.clone(),
        relation_type: request.relation_type,
        source_bpnl: request.source_bpnl.clone(),
        target_bpnl: request.target_bpnl.clone(),
        states,
        updated_at,
    })
}
