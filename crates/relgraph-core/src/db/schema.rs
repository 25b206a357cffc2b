//! SQLite schema for the relation store.
//!
//! Two layers share one file:
//! - the staged layer (`business_partners`, `relations`, `relation_input_stages`,
//!   `relation_states`) is tenant scoped and addressed by external ids
//! - the canonical layer (`legal_entities`, `canonical_relations`,
//!   `canonical_relation_states`) is global and addressed by BPNL
//!
//! `changelog_entries` records every mutation of either layer and
//! `store_meta` mirrors the schema version for tooling.

/// Migration v1: staged and canonical tables plus store metadata.
pub const MIGRATION_V1_SQL: &str = r"
CREATE TABLE IF NOT EXISTS business_partners (
    partner_id INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id TEXT NOT NULL CHECK (length(trim(tenant_id)) > 0),
    external_id TEXT NOT NULL CHECK (length(trim(external_id)) > 0),
    partner_type TEXT NOT NULL
        CHECK (partner_type IN ('GENERIC', 'LEGAL_ENTITY', 'SITE', 'ADDRESS')),
    bpnl TEXT,
    created_at_us INTEGER NOT NULL,
    UNIQUE (tenant_id, external_id, partner_type)
);

CREATE TABLE IF NOT EXISTS relations (
    relation_id INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id TEXT NOT NULL CHECK (length(trim(tenant_id)) > 0),
    external_id TEXT NOT NULL CHECK (length(trim(external_id)) > 0),
    sharing_state TEXT
        CHECK (sharing_state IS NULL OR sharing_state IN ('Initial', 'Pending', 'Success', 'Error')),
    sharing_relation_type TEXT,
    sharing_error_message TEXT,
    sharing_updated_at_us INTEGER,
    output_relation_type TEXT,
    output_source_bpnl TEXT,
    output_target_bpnl TEXT,
    output_updated_at_us INTEGER,
    created_at_us INTEGER NOT NULL,
    UNIQUE (tenant_id, external_id)
);

CREATE TABLE IF NOT EXISTS relation_input_stages (
    relation_id INTEGER PRIMARY KEY REFERENCES relations(relation_id) ON DELETE CASCADE,
    relation_type TEXT NOT NULL,
    source_partner_id INTEGER NOT NULL REFERENCES business_partners(partner_id),
    target_partner_id INTEGER NOT NULL REFERENCES business_partners(partner_id),
    created_at_us INTEGER NOT NULL,
    updated_at_us INTEGER NOT NULL,
    CHECK (source_partner_id <> target_partner_id)
);

CREATE TABLE IF NOT EXISTS relation_states (
    relation_id INTEGER NOT NULL REFERENCES relations(relation_id) ON DELETE CASCADE,
    stage TEXT NOT NULL CHECK (stage IN ('Input', 'Output')),
    position INTEGER NOT NULL,
    valid_from_us INTEGER NOT NULL,
    valid_to_us INTEGER NOT NULL,
    state_type TEXT NOT NULL,
    PRIMARY KEY (relation_id, stage, position)
);

CREATE TABLE IF NOT EXISTS legal_entities (
    bpnl TEXT PRIMARY KEY,
    legal_name TEXT,
    created_at_us INTEGER NOT NULL,
    CHECK (length(trim(bpnl)) > 0)
);

CREATE TABLE IF NOT EXISTS canonical_relations (
    edge_id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_bpnl TEXT NOT NULL REFERENCES legal_entities(bpnl),
    target_bpnl TEXT NOT NULL REFERENCES legal_entities(bpnl),
    relation_type TEXT NOT NULL,
    created_at_us INTEGER NOT NULL,
    updated_at_us INTEGER NOT NULL,
    UNIQUE (source_bpnl, target_bpnl, relation_type),
    CHECK (source_bpnl <> target_bpnl)
);

CREATE TABLE IF NOT EXISTS canonical_relation_states (
    edge_id INTEGER NOT NULL REFERENCES canonical_relations(edge_id) ON DELETE CASCADE,
    position INTEGER NOT NULL,
    valid_from_us INTEGER NOT NULL,
    valid_to_us INTEGER NOT NULL,
    state_type TEXT NOT NULL,
    PRIMARY KEY (edge_id, position)
);

CREATE TABLE IF NOT EXISTS changelog_entries (
    entry_id INTEGER PRIMARY KEY AUTOINCREMENT,
    subject_id TEXT NOT NULL,
    tenant_id TEXT,
    change_type TEXT NOT NULL CHECK (change_type IN ('CREATE', 'UPDATE')),
    stage TEXT CHECK (stage IS NULL OR stage IN ('Input', 'Output')),
    entity_kind TEXT NOT NULL CHECK (entity_kind IN ('RELATION', 'LEGAL_ENTITY')),
    created_at_us INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS store_meta (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    schema_version INTEGER NOT NULL,
    created_at_us INTEGER NOT NULL DEFAULT 0
);

INSERT OR IGNORE INTO store_meta (id, schema_version, created_at_us)
VALUES (1, 1, CAST(strftime('%s', 'now') AS INTEGER) * 1000000);
";

/// Migration v2: read-path indexes for filters, graph walks and changelog paging.
pub const MIGRATION_V2_SQL: &str = r"
CREATE INDEX IF NOT EXISTS idx_relations_tenant_external
    ON relations(tenant_id, external_id);

CREATE INDEX IF NOT EXISTS idx_relations_output_updated
    ON relations(tenant_id, output_updated_at_us);

CREATE INDEX IF NOT EXISTS idx_input_stages_type_updated
    ON relation_input_stages(relation_type, updated_at_us);

CREATE INDEX IF NOT EXISTS idx_business_partners_tenant_external
    ON business_partners(tenant_id, external_id);

CREATE INDEX IF NOT EXISTS idx_canonical_relations_source_type
    ON canonical_relations(source_bpnl, relation_type);

CREATE INDEX IF NOT EXISTS idx_canonical_relations_target_type
    ON canonical_relations(target_bpnl, relation_type);

CREATE INDEX IF NOT EXISTS idx_changelog_created
    ON changelog_entries(created_at_us, entry_id);

CREATE INDEX IF NOT EXISTS idx_changelog_tenant_created
    ON changelog_entries(tenant_id, created_at_us);

UPDATE store_meta
SET schema_version = 2
WHERE id = 1;
";

/// Indexes expected by list, filter and propagation query paths.
pub const REQUIRED_INDEXES: &[&str] = &[
    "idx_relations_tenant_external",
    "idx_relations_output_updated",
    "idx_input_stages_type_updated",
    "idx_business_partners_tenant_external",
    "idx_canonical_relations_source_type",
    "idx_canonical_relations_target_type",
    "idx_changelog_created",
    "idx_changelog_tenant_created",
];
