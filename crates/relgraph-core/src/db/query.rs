//! Filtered, paginated reads over the staged layer.
//!
//! Filters are AND-combined; an empty id set means "no constraint on this
//! field". Results are ordered by external id so pages are stable.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params_from_iter, types::ToSql};
use serde::Serialize;

use super::{from_us, parse_column, states, to_us};
use crate::error::RelationError;
use crate::model::{InputStage, OutputRecord, RelationType, StageType};

/// Page size used when the caller does not ask for one.
pub const DEFAULT_PAGE_SIZE: u32 = 100;
/// Upper bound on a single page.
pub const MAX_PAGE_SIZE: u32 = 1000;

/// Zero-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub size: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 0,
            size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl PageRequest {
    /// Build a request, clamping `size` into `1..=MAX_PAGE_SIZE`.
    #[must_use]
    pub fn new(page: u32, size: u32) -> Self {
        Self {
            page,
            size: size.clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub(crate) fn limit_clause(self) -> String {
        let size = self.size.clamp(1, MAX_PAGE_SIZE);
        let offset = u64::from(self.page) * u64::from(size);
        format!(" LIMIT {size} OFFSET {offset}")
    }
}

/// One page of results plus totals over the whole filtered set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub total_elements: u64,
    pub total_pages: u64,
    pub page: u32,
    pub content_size: usize,
    pub content: Vec<T>,
}

impl<T> Page<T> {
    pub(crate) fn new(total_elements: u64, request: PageRequest, content: Vec<T>) -> Self {
        let size = u64::from(request.size.clamp(1, MAX_PAGE_SIZE));
        Self {
            total_elements,
            total_pages: total_elements.div_ceil(size),
            page: request.page,
            content_size: content.len(),
            content,
        }
    }
}

/// Filter for Input-stage listings.
#[derive(Debug, Clone, Default)]
pub struct InputFilter {
    pub external_ids: Vec<String>,
    pub relation_type: Option<RelationType>,
    pub source_external_ids: Vec<String>,
    pub target_external_ids: Vec<String>,
    /// Only stages updated strictly after this instant.
    pub updated_after: Option<DateTime<Utc>>,
}

/// Filter for Output listings.
#[derive(Debug, Clone, Default)]
pub struct OutputFilter {
    pub external_ids: Vec<String>,
    pub relation_type: Option<RelationType>,
    pub source_bpnls: Vec<String>,
    pub target_bpnls: Vec<String>,
    /// Only outputs updated strictly after this instant.
    pub updated_after: Option<DateTime<Utc>>,
}

/// Collects `WHERE` conditions with positional `?N` parameters.
#[derive(Default)]
pub(crate) struct Conditions {
    clauses: Vec<String>,
    params: Vec<Box<dyn ToSql>>,
}

impl Conditions {
    pub(crate) fn eq(&mut self, column: &str, value: impl ToSql + 'static) {
        self.params.push(Box::new(value));
        self.clauses
            .push(format!("{column} = ?{}", self.params.len()));
    }

    pub(crate) fn after(&mut self, column: &str, micros: i64) {
        self.params.push(Box::new(micros));
        self.clauses
            .push(format!("{column} > ?{}", self.params.len()));
    }

    pub(crate) fn any_of(&mut self, column: &str, values: &[String]) {
        if values.is_empty() {
            return;
        }
        let mut placeholders = Vec::with_capacity(values.len());
        for value in values {
            self.params.push(Box::new(value.clone()));
            placeholders.push(format!("?{}", self.params.len()));
        }
        self.clauses
            .push(format!("{column} IN ({})", placeholders.join(", ")));
    }

    pub(crate) fn raw(&mut self, clause: &str) {
        self.clauses.push(clause.to_string());
    }

    pub(crate) fn where_clause(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }

    pub(crate) fn params(&self) -> impl Iterator<Item = &dyn ToSql> {
        self.params.iter().map(AsRef::as_ref)
    }
}

pub(crate) fn count(
    conn: &Connection,
    from: &str,
    conditions: &Conditions,
) -> Result<u64, RelationError> {
    let sql = format!("SELECT COUNT(*) FROM {from}{}", conditions.where_clause());
    let total: i64 = conn.query_row(&sql, params_from_iter(conditions.params()), |row| {
        row.get(0)
    })?;
    Ok(u64::try_from(total).unwrap_or_default())
}

const INPUT_FROM: &str = "relations r \
     INNER JOIN relation_input_stages s ON s.relation_id = r.relation_id \
     INNER JOIN business_partners sp ON sp.partner_id = s.source_partner_id \
     INNER JOIN business_partners tp ON tp.partner_id = s.target_partner_id";

struct RawInput {
    relation_id: i64,
    external_id: String,
    relation_type: String,
    source_external_id: String,
    target_external_id: String,
    created_at_us: i64,
    updated_at_us: i64,
}

fn row_to_raw_input(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawInput> {
    Ok(RawInput {
        relation_id: row.get(0)?,
        external_id: row.get(1)?,
        relation_type: row.get(2)?,
        source_external_id: row.get(3)?,
        target_external_id: row.get(4)?,
        created_at_us: row.get(5)?,
        updated_at_us: row.get(6)?,
    })
}

fn finish_input(conn: &Connection, raw: RawInput) -> Result<InputStage, RelationError> {
    Ok(InputStage {
        states: states::stage_states(conn, raw.relation_id, StageType::Input)?,
        external_id: raw.external_id,
        relation_type: parse_column("relation_type", raw.relation_type)?,
        source_external_id: raw.source_external_id,
        target_external_id: raw.target_external_id,
        created_at: from_us("created_at_us", raw.created_at_us)?,
        updated_at: from_us("updated_at_us", raw.updated_at_us)?,
    })
}

const INPUT_COLUMNS: &str = "r.relation_id, r.external_id, s.relation_type, \
     sp.external_id, tp.external_id, s.created_at_us, s.updated_at_us";

/// List Input stages of a tenant.
///
/// # Errors
///
/// Returns a store error if a query fails or a row is corrupt.
pub fn list_input(
    conn: &Connection,
    tenant_id: &str,
    filter: &InputFilter,
    page: PageRequest,
) -> Result<Page<InputStage>, RelationError> {
    let mut conditions = Conditions::default();
    conditions.eq("r.tenant_id", tenant_id.to_string());
    conditions.any_of("r.external_id", &filter.external_ids);
    if let Some(relation_type) = filter.relation_type {
        conditions.eq("s.relation_type", relation_type.as_str());
    }
    conditions.any_of("sp.external_id", &filter.source_external_ids);
    conditions.any_of("tp.external_id", &filter.target_external_ids);
    if let Some(updated_after) = filter.updated_after {
        conditions.after("s.updated_at_us", to_us(updated_after));
    }

    let total = count(conn, INPUT_FROM, &conditions)?;
    let sql = format!(
        "SELECT {INPUT_COLUMNS} FROM {INPUT_FROM}{} ORDER BY r.external_id{}",
        conditions.where_clause(),
        page.limit_clause()
    );
    let mut stmt = conn.prepare(&sql)?;
    let raws = stmt
        .query_map(params_from_iter(conditions.params()), row_to_raw_input)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut content = Vec::with_capacity(raws.len());
    for raw in raws {
        content.push(finish_input(conn, raw)?);
    }
    Ok(Page::new(total, page, content))
}

/// Fetch one Input stage by external id.
///
/// # Errors
///
/// Returns a store error if the query fails or the row is corrupt.
pub fn get_input(
    conn: &Connection,
    tenant_id: &str,
    external_id: &str,
) -> Result<Option<InputStage>, RelationError> {
    let filter = InputFilter {
        external_ids: vec![external_id.to_string()],
        ..InputFilter::default()
    };
    Ok(list_input(conn, tenant_id, &filter, PageRequest::new(0, 1))?
        .content
        .pop())
}

const OUTPUT_COLUMNS: &str = "r.relation_id, r.external_id, r.output_relation_type, \
     r.output_source_bpnl, r.output_target_bpnl, r.output_updated_at_us";

struct RawOutput {
    relation_id: i64,
    external_id: String,
    relation_type: String,
    source_bpnl: String,
    target_bpnl: String,
    updated_at_us: i64,
}

fn row_to_raw_output(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawOutput> {
    Ok(RawOutput {
        relation_id: row.get(0)?,
        external_id: row.get(1)?,
        relation_type: row.get(2)?,
        source_bpnl: row.get(3)?,
        target_bpnl: row.get(4)?,
        updated_at_us: row.get(5)?,
    })
}

fn finish_output(conn: &Connection, raw: RawOutput) -> Result<OutputRecord, RelationError> {
    Ok(OutputRecord {
        states: states::stage_states(conn, raw.relation_id, StageType::Output)?,
        external_id: raw.external_id,
        relation_type: parse_column("output_relation_type", raw.relation_type)?,
        source_bpnl: raw.source_bpnl,
        target_bpnl: raw.target_bpnl,
        updated_at: from_us("output_updated_at_us", raw.updated_at_us)?,
    })
}

/// List Output records of a tenant. Containers without an output are skipped.
///
/// # Errors
///
/// Returns a store error if a query fails or a row is corrupt.
pub fn list_output(
    conn: &Connection,
    tenant_id: &str,
    filter: &OutputFilter,
    page: PageRequest,
) -> Result<Page<OutputRecord>, RelationError> {
    let mut conditions = Conditions::default();
    conditions.eq("r.tenant_id", tenant_id.to_string());
    conditions.raw("r.output_relation_type IS NOT NULL");
    conditions.any_of("r.external_id", &filter.external_ids);
    if let Some(relation_type) = filter.relation_type {
        conditions.eq("r.output_relation_type", relation_type.as_str());
    }
    conditions.any_of("r.output_source_bpnl", &filter.source_bpnls);
    conditions.any_of("r.output_target_bpnl", &filter.target_bpnls);
    if let Some(updated_after) = filter.updated_after {
        conditions.after("r.output_updated_at_us", to_us(updated_after));
    }

    let total = count(conn, "relations r", &conditions)?;
    let sql = format!(
        "SELECT {OUTPUT_COLUMNS} FROM relations r{} ORDER BY r.external_id{}",
        conditions.where_clause(),
        page.limit_clause()
    );
    let mut stmt = conn.prepare(&sql)?;
    let raws = stmt
        .query_map(params_from_iter(conditions.params()), row_to_raw_output)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut content = Vec::with_capacity(raws.len());
    for raw in raws {
        content.push(finish_output(conn, raw)?);
    }
    Ok(Page::new(total, page, content))
}
