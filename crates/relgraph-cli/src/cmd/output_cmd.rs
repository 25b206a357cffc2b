//! `relgraph output`: promotion of staged relations to their Output record.

use crate::cmd::{PageArgs, StateArgs, TenantArgs, open_project, render_page};
use crate::output::{
    OutputMode, Renderable, fail, pretty_kv, pretty_section, render_item, render_list,
    states_summary, write_json,
};
use anyhow::Context as _;
use chrono::{DateTime, Utc};
use clap::{Args, Subcommand};
use relgraph_core::StagedRelationService;
use relgraph_core::db::query::OutputFilter;
use relgraph_core::model::{OutputRecord, OutputUpsertRequest, RelationType};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[derive(Subcommand, Debug)]
pub enum OutputCommand {
    /// Write the Output record of a staged relation.
    Upsert(OutputUpsertArgs),
    /// Promote a JSON array of Output records in one transaction.
    Import(OutputImportArgs),
    /// List Output records.
    List(OutputListArgs),
}

#[derive(Args, Debug)]
pub struct OutputUpsertArgs {
    #[command(flatten)]
    pub tenant: TenantArgs,

    /// External id of the staged relation.
    pub id: String,

    /// Relation type, e.g. IsManagedBy.
    #[arg(long = "type")]
    pub relation_type: RelationType,

    /// Source BPNL.
    #[arg(long)]
    pub source_bpnl: String,

    /// Target BPNL.
    #[arg(long)]
    pub target_bpnl: String,

    #[command(flatten)]
    pub states: StateArgs,
}

#[derive(Args, Debug)]
pub struct OutputImportArgs {
    /// JSON file holding an array of Output upsert requests.
    pub file: PathBuf,
}

#[derive(Args, Debug)]
pub struct OutputListArgs {
    #[command(flatten)]
    pub tenant: TenantArgs,

    /// Restrict to these external ids.
    #[arg(long = "id")]
    pub ids: Vec<String>,

    /// Restrict to one relation type.
    #[arg(long = "type")]
    pub relation_type: Option<RelationType>,

    /// Restrict to these source BPNLs.
    #[arg(long = "source-bpnl")]
    pub source_bpnls: Vec<String>,

    /// Restrict to these target BPNLs.
    #[arg(long = "target-bpnl")]
    pub target_bpnls: Vec<String>,

    /// Only outputs updated after this instant (RFC 3339).
    #[arg(long)]
    pub updated_after: Option<DateTime<Utc>>,

    #[command(flatten)]
    pub page: PageArgs,
}

impl Renderable for OutputRecord {
    fn render_human(&self, w: &mut dyn Write) -> io::Result<()> {
        pretty_section(w, &format!("{} ({})", self.external_id, self.relation_type))?;
        pretty_kv(w, "Source", &self.source_bpnl)?;
        pretty_kv(w, "Target", &self.target_bpnl)?;
        pretty_kv(w, "States", states_summary(&self.states))?;
        pretty_kv(w, "Updated", self.updated_at.to_rfc3339())?;
        writeln!(w)
    }

    fn render_json(&self, w: &mut dyn Write) -> io::Result<()> {
        write_json(w, self)
    }

    fn render_table(&self, w: &mut dyn Write) -> io::Result<()> {
        writeln!(
            w,
            "{}  {}  {}  {}  {}",
            self.external_id,
            self.relation_type,
            self.source_bpnl,
            self.target_bpnl,
            states_summary(&self.states)
        )
    }

    fn table_headers() -> &'static [&'static str] {
        &["EXTERNAL_ID", "TYPE", "SOURCE_BPNL", "TARGET_BPNL", "STATES"]
    }
}

fn read_requests(path: &Path) -> anyhow::Result<Vec<OutputUpsertRequest>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Execute a `relgraph output` subcommand.
///
/// # Errors
///
/// Returns an error if the project is not initialized, no tenant is known,
/// or the promotion fails.
pub fn run_output(
    command: &OutputCommand,
    output: OutputMode,
    project_root: &Path,
) -> anyhow::Result<()> {
    let project = open_project(project_root, output)?;
    let service = StagedRelationService::new(&project.conn);

    match command {
        OutputCommand::Upsert(args) => {
            let tenant_id = args.tenant.resolve(&project.config, output)?;
            let request = OutputUpsertRequest {
                tenant_id,
                external_id: args.id.clone(),
                relation_type: args.relation_type,
                source_bpnl: args.source_bpnl.clone(),
                target_bpnl: args.target_bpnl.clone(),
                states: args.states.states(),
            };
            let record = service
                .upsert_output(&request)
                .map_err(|err| fail(output, &err))?;
            render_item(&record, output)?;
        }
        OutputCommand::Import(args) => {
            let requests = read_requests(&args.file)?;
            let records = service
                .upsert_output_relations(&requests)
                .map_err(|err| fail(output, &err))?;
            tracing::info!(count = records.len(), file = %args.file.display(), "imported output records");
            render_list(&records, output)?;
        }
        OutputCommand::List(args) => {
            let tenant = args.tenant.resolve(&project.config, output)?;
            let filter = OutputFilter {
                external_ids: args.ids.clone(),
                relation_type: args.relation_type,
                source_bpnls: args.source_bpnls.clone(),
                target_bpnls: args.target_bpnls.clone(),
                updated_after: args.updated_after,
            };
            let page = service
                .list_output(&tenant, &filter, args.page.request(&project.config))
                .map_err(|err| fail(output, &err))?;
            render_page(&page, output)?;
        }
    }
    Ok(())
}
