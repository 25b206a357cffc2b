//! Tenant-scoped business partner registry and the peer identity resolver.

use rusqlite::{Connection, params};

use super::{now, parse_column, to_us};
use crate::error::RelationError;
use crate::model::{PartnerType, Peer};

struct RawPeer {
    partner_id: i64,
    tenant_id: String,
    external_id: String,
    partner_type: String,
    bpnl: Option<String>,
}

impl TryFrom<RawPeer> for Peer {
    type Error = RelationError;

    fn try_from(raw: RawPeer) -> Result<Self, Self::Error> {
        Ok(Self {
            partner_id: raw.partner_id,
            tenant_id: raw.tenant_id,
            external_id: raw.external_id,
            partner_type: parse_column("partner_type", raw.partner_type)?,
            bpnl: raw.bpnl,
        })
    }
}

fn row_to_raw_peer(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawPeer> {
    Ok(RawPeer {
        partner_id: row.get(0)?,
        tenant_id: row.get(1)?,
        external_id: row.get(2)?,
        partner_type: row.get(3)?,
        bpnl: row.get(4)?,
    })
}

const PEER_COLUMNS: &str = "partner_id, tenant_id, external_id, partner_type, bpnl";

/// Register a business partner for a tenant, or refresh its BPNL when the
/// `(tenant, external id, type)` triple already exists.
///
/// # Errors
///
/// Returns a store error if the write fails.
pub fn register_peer(
    conn: &Connection,
    tenant_id: &str,
    external_id: &str,
    partner_type: PartnerType,
    bpnl: Option<&str>,
) -> Result<Peer, RelationError> {
    conn.execute(
        "INSERT INTO business_partners (tenant_id, external_id, partner_type, bpnl, created_at_us)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT (tenant_id, external_id, partner_type)
         DO UPDATE SET bpnl = COALESCE(excluded.bpnl, business_partners.bpnl)",
        params![
            tenant_id,
            external_id,
            partner_type.as_str(),
            bpnl,
            to_us(now())
        ],
    )?;

    let raw = conn.query_row(
        &format!(
            "SELECT {PEER_COLUMNS} FROM business_partners
             WHERE tenant_id = ?1 AND external_id = ?2 AND partner_type = ?3"
        ),
        params![tenant_id, external_id, partner_type.as_str()],
        row_to_raw_peer,
    )?;
    tracing::info!(tenant_id, external_id, %partner_type, "registered business partner");
    Peer::try_from(raw)
}

/// All partners of `tenant_id` carrying `external_id`, across partner types.
///
/// # Errors
///
/// Returns a store error if the query fails or a row is corrupt.
pub fn find_by_external_id(
    conn: &Connection,
    tenant_id: &str,
    external_id: &str,
) -> Result<Vec<Peer>, RelationError> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {PEER_COLUMNS} FROM business_partners
         WHERE tenant_id = ?1 AND external_id = ?2
         ORDER BY partner_id"
    ))?;
    let rows = stmt.query_map(params![tenant_id, external_id], row_to_raw_peer)?;
    let mut peers = Vec::new();
    for row in rows {
        peers.push(Peer::try_from(row?)?);
    }
    Ok(peers)
}

/// Resolve `external_id` to exactly one partner; anything else is `None`.
pub(crate) fn resolve_unique(
    conn: &Connection,
    tenant_id: &str,
    external_id: &str,
) -> Result<Option<Peer>, RelationError> {
    let mut peers = find_by_external_id(conn, tenant_id, external_id)?;
    if peers.len() == 1 {
        Ok(peers.pop())
    } else {
        if peers.len() > 1 {
            tracing::debug!(
                tenant_id,
                external_id,
                matches = peers.len(),
                "ambiguous business partner reference"
            );
        }
        Ok(None)
    }
}

/// Every partner registered for a tenant, ordered by external id.
///
/// # Errors
///
/// Returns a store error if the query fails or a row is corrupt.
pub fn list_peers(conn: &Connection, tenant_id: &str) -> Result<Vec<Peer>, RelationError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {PEER_COLUMNS} FROM business_partners
         WHERE tenant_id = ?1
         ORDER BY external_id, partner_type"
    ))?;
    let rows = stmt.query_map(params![tenant_id], row_to_raw_peer)?;
    let mut peers = Vec::new();
    for row in rows {
        peers.push(Peer::try_from(row?)?);
    }
    Ok(peers)
}
