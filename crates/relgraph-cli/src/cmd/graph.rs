//! `relgraph graph`: the canonical legal-entity relation graph.

use crate::cmd::{StateArgs, open_project};
use crate::output::{
    OutputMode, Renderable, fail, render_list, render_mode, states_summary, write_json,
};
use clap::{Args, Subcommand};
use relgraph_core::canonical::resolve_request;
use relgraph_core::model::{CanonicalRelation, RelationType};
use relgraph_core::propagation::upsert_relation_by_bpnl;
use relgraph_core::validity::validate_states;
use relgraph_core::{RelationError, RelationUpsertService, UpsertKind, UpsertRequest};
use rusqlite::Connection;
use std::io::{self, Write};
use std::path::Path;

#[derive(Subcommand, Debug)]
pub enum GraphCommand {
    /// Create or update an edge; alternative headquarters propagate.
    Upsert(EdgeArgs),
    /// List edges.
    List(GraphListArgs),
    /// Show existing edges whose ACTIVE windows collide with a proposed edge.
    Overlaps(EdgeArgs),
}

#[derive(Args, Debug)]
pub struct EdgeArgs {
    /// Source BPNL.
    #[arg(long)]
    pub source: String,

    /// Target BPNL.
    #[arg(long)]
    pub target: String,

    /// Relation type, e.g. IsAlternativeHeadquarterFor.
    #[arg(long = "type")]
    pub relation_type: RelationType,

    #[command(flatten)]
    pub states: StateArgs,
}

#[derive(Args, Debug)]
pub struct GraphListArgs {
    /// Restrict to one relation type.
    #[arg(long = "type")]
    pub relation_type: Option<RelationType>,
}

impl Renderable for CanonicalRelation {
    fn render_human(&self, w: &mut dyn Write) -> io::Result<()> {
        writeln!(
            w,
            "{} -[{}]-> {}",
            self.source_bpnl, self.relation_type, self.target_bpnl
        )?;
        writeln!(w, "    {}", states_summary(&self.states))
    }

    fn render_json(&self, w: &mut dyn Write) -> io::Result<()> {
        write_json(w, self)
    }

    fn render_table(&self, w: &mut dyn Write) -> io::Result<()> {
        writeln!(
            w,
            "{}  {}  {}  {}",
            self.source_bpnl,
            self.relation_type,
            self.target_bpnl,
            states_summary(&self.states)
        )
    }

    fn table_headers() -> &'static [&'static str] {
        &["SOURCE", "TYPE", "TARGET", "STATES"]
    }
}

const fn kind_label(kind: UpsertKind) -> &'static str {
    match kind {
        UpsertKind::Created => "created",
        UpsertKind::Updated => "updated",
        UpsertKind::NoChange => "unchanged",
    }
}

fn proposed(conn: &Connection, args: &EdgeArgs) -> Result<UpsertRequest, RelationError> {
    resolve_request(
        conn,
        &args.source,
        &args.target,
        args.relation_type,
        validate_states(&args.states.states())?,
    )
}

/// Execute a `relgraph graph` subcommand.
///
/// # Errors
///
/// Returns an error if the project is not initialized, an endpoint is not a
/// registered legal entity, or the upsert is rejected.
pub fn run_graph(command: &GraphCommand, output: OutputMode, project_root: &Path) -> anyhow::Result<()> {
    let project = open_project(project_root, output)?;

    match command {
        GraphCommand::Upsert(args) => {
            let states = validate_states(&args.states.states()).map_err(|err| fail(output, &err))?;
            let result = upsert_relation_by_bpnl(
                &project.conn,
                &args.source,
                &args.target,
                args.relation_type,
                states,
            )
            .map_err(|err| fail(output, &err))?;
            render_mode(
                output,
                &result,
                |r, w| {
                    writeln!(
                        w,
                        "{}  {}  {}  {}",
                        kind_label(r.kind),
                        r.relation.source_bpnl,
                        r.relation.relation_type,
                        r.relation.target_bpnl
                    )
                },
                |r, w| {
                    writeln!(w, "✓ Edge {}:", kind_label(r.kind))?;
                    r.relation.render_human(w)
                },
            )?;
        }
        GraphCommand::List(args) => {
            let edges = RelationUpsertService::new(&project.conn)
                .list(args.relation_type)
                .map_err(|err| fail(output, &err))?;
            render_list(&edges, output)?;
        }
        GraphCommand::Overlaps(args) => {
            let request = proposed(&project.conn, args).map_err(|err| fail(output, &err))?;
            let hits = RelationUpsertService::new(&project.conn)
                .overlapping(&request)
                .map_err(|err| fail(output, &err))?;
            render_list(&hits, output)?;
        }
    }
    Ok(())
}
