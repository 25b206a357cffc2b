//! `relgraph partner`: tenant-scoped business partners that staged relations
//! reference by external id.

use crate::cmd::{TenantArgs, open_project};
use crate::output::{OutputMode, Renderable, fail, pretty_kv, render_item, render_list, write_json};
use clap::{Args, Subcommand};
use relgraph_core::db::peers;
use relgraph_core::model::{PartnerType, Peer};
use std::io::{self, Write};
use std::path::Path;

#[derive(Subcommand, Debug)]
pub enum PartnerCommand {
    /// Register a business partner (or refresh its BPNL).
    Add(PartnerAddArgs),
    /// List a tenant's business partners.
    List(PartnerListArgs),
}

#[derive(Args, Debug)]
pub struct PartnerAddArgs {
    #[command(flatten)]
    pub tenant: TenantArgs,

    /// The partner's id within the tenant.
    pub external_id: String,

    /// Partner kind: generic, legal-entity, site or address.
    #[arg(long = "type", default_value = "legal-entity")]
    pub partner_type: PartnerType,

    /// BPNL assigned to the partner, if known.
    #[arg(long)]
    pub bpnl: Option<String>,
}

#[derive(Args, Debug)]
pub struct PartnerListArgs {
    #[command(flatten)]
    pub tenant: TenantArgs,
}

impl Renderable for Peer {
    fn render_human(&self, w: &mut dyn Write) -> io::Result<()> {
        pretty_kv(w, "Partner", &self.external_id)?;
        pretty_kv(w, "Type", self.partner_type.as_str())?;
        pretty_kv(w, "BPNL", self.bpnl.as_deref().unwrap_or("-"))?;
        writeln!(w)
    }

    fn render_json(&self, w: &mut dyn Write) -> io::Result<()> {
        write_json(w, self)
    }

    fn render_table(&self, w: &mut dyn Write) -> io::Result<()> {
        writeln!(
            w,
            "{}  {}  {}",
            self.external_id,
            self.partner_type,
            self.bpnl.as_deref().unwrap_or("-")
        )
    }

    fn table_headers() -> &'static [&'static str] {
        &["EXTERNAL_ID", "TYPE", "BPNL"]
    }
}

/// Execute a `relgraph partner` subcommand.
///
/// # Errors
///
/// Returns an error if the project is not initialized, no tenant is known,
/// or the store write fails.
pub fn run_partner(
    command: &PartnerCommand,
    output: OutputMode,
    project_root: &Path,
) -> anyhow::Result<()> {
    let project = open_project(project_root, output)?;
    match command {
        PartnerCommand::Add(args) => {
            let tenant = args.tenant.resolve(&project.config, output)?;
            let peer = peers::register_peer(
                &project.conn,
                &tenant,
                &args.external_id,
                args.partner_type,
                args.bpnl.as_deref(),
            )
            .map_err(|err| fail(output, &err))?;
            render_item(&peer, output)?;
        }
        PartnerCommand::List(args) => {
            let tenant = args.tenant.resolve(&project.config, output)?;
            let partners =
                peers::list_peers(&project.conn, &tenant).map_err(|err| fail(output, &err))?;
            render_list(&partners, output)?;
        }
    }
    Ok(())
}
