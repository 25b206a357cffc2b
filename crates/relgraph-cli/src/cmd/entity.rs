//! `relgraph entity`: legal entities, the nodes of the canonical graph.

use crate::cmd::open_project;
use crate::output::{OutputMode, Renderable, fail, pretty_kv, render_item, render_list, write_json};
use chrono::{DateTime, Utc};
use clap::{Args, Subcommand};
use relgraph_core::db::legal_entities;
use relgraph_core::model::LegalEntity;
use std::io::{self, Write};
use std::path::Path;

#[derive(Subcommand, Debug)]
pub enum EntityCommand {
    /// Register a legal entity by BPNL.
    Add(EntityAddArgs),
    /// List legal entities, oldest first.
    List,
}

#[derive(Args, Debug)]
pub struct EntityAddArgs {
    /// The entity's BPNL.
    pub bpnl: String,

    /// Registered legal name.
    #[arg(long)]
    pub name: Option<String>,

    /// Creation time to carry over from another system (RFC 3339).
    /// Decides edge direction for symmetric relation types.
    #[arg(long)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Renderable for LegalEntity {
    fn render_human(&self, w: &mut dyn Write) -> io::Result<()> {
        pretty_kv(w, "BPNL", &self.bpnl)?;
        pretty_kv(w, "Name", self.legal_name.as_deref().unwrap_or("-"))?;
        pretty_kv(w, "Created", self.created_at.to_rfc3339())?;
        writeln!(w)
    }

    fn render_json(&self, w: &mut dyn Write) -> io::Result<()> {
        write_json(w, self)
    }

    fn render_table(&self, w: &mut dyn Write) -> io::Result<()> {
        writeln!(
            w,
            "{}  {}  {}",
            self.bpnl,
            self.created_at.to_rfc3339(),
            self.legal_name.as_deref().unwrap_or("-")
        )
    }

    fn table_headers() -> &'static [&'static str] {
        &["BPNL", "CREATED_AT", "NAME"]
    }
}

/// Execute a `relgraph entity` subcommand.
///
/// # Errors
///
/// Returns an error if the project is not initialized or the store
/// operation fails.
pub fn run_entity(
    command: &EntityCommand,
    output: OutputMode,
    project_root: &Path,
) -> anyhow::Result<()> {
    let project = open_project(project_root, output)?;
    match command {
        EntityCommand::Add(args) => {
            let entity = match args.created_at {
                Some(created_at) => legal_entities::register_legal_entity_at(
                    &project.conn,
                    &args.bpnl,
                    args.name.as_deref(),
                    created_at,
                ),
                None => legal_entities::register_legal_entity(
                    &project.conn,
                    &args.bpnl,
                    args.name.as_deref(),
                ),
            }
            .map_err(|err| fail(output, &err))?;
            render_item(&entity, output)?;
        }
        EntityCommand::List => {
            let entities = legal_entities::list_legal_entities(&project.conn)
                .map_err(|err| fail(output, &err))?;
            render_list(&entities, output)?;
        }
    }
    Ok(())
}
