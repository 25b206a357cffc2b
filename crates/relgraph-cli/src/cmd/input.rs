//! `relgraph input`: the Input stage of tenant-scoped staged relations.

use crate::cmd::{PageArgs, StateArgs, TenantArgs, open_project, render_page};
use crate::output::{
    OutputMode, Renderable, fail, pretty_kv, pretty_section, render_item, render_list,
    render_mode, states_summary, write_json,
};
use anyhow::Context as _;
use chrono::{DateTime, Utc};
use clap::{Args, Subcommand};
use relgraph_core::StagedRelationService;
use relgraph_core::db::query::InputFilter;
use relgraph_core::model::{InputStage, RelationPutEntry, RelationType};
use relgraph_core::sharing::SharingState;
use serde::Serialize;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[derive(Subcommand, Debug)]
pub enum InputCommand {
    /// Create a staged relation with the default validity state.
    Create(InputCreateArgs),
    /// Update an existing Input stage. Never creates.
    Update(InputPutArgs),
    /// Create or update an Input stage.
    Upsert(InputPutArgs),
    /// Upsert (or update) a JSON array of Input stages in one transaction.
    Import(InputImportArgs),
    /// List Input stages.
    List(InputListArgs),
    /// Show one Input stage.
    Show(InputRefArgs),
    /// Delete a staged relation and its Output.
    Delete(InputRefArgs),
    /// Show the sharing state of a staged relation.
    Sharing(InputRefArgs),
}

#[derive(Args, Debug)]
pub struct InputCreateArgs {
    #[command(flatten)]
    pub tenant: TenantArgs,

    /// External id; a random UUID when omitted.
    #[arg(long)]
    pub id: Option<String>,

    /// Relation type, e.g. IsManagedBy.
    #[arg(long = "type")]
    pub relation_type: RelationType,

    /// Source partner's external id.
    #[arg(long)]
    pub source: String,

    /// Target partner's external id.
    #[arg(long)]
    pub target: String,
}

#[derive(Args, Debug)]
pub struct InputPutArgs {
    #[command(flatten)]
    pub tenant: TenantArgs,

    /// External id of the staged relation.
    pub id: String,

    /// Relation type, e.g. IsManagedBy.
    #[arg(long = "type")]
    pub relation_type: RelationType,

    /// Source partner's external id.
    #[arg(long)]
    pub source: String,

    /// Target partner's external id.
    #[arg(long)]
    pub target: String,

    #[command(flatten)]
    pub states: StateArgs,
}

impl InputPutArgs {
    fn entry(&self) -> RelationPutEntry {
        RelationPutEntry {
            external_id: self.id.clone(),
            relation_type: self.relation_type,
            source_external_id: self.source.clone(),
            target_external_id: self.target.clone(),
            states: self.states.states(),
        }
    }
}

#[derive(Args, Debug)]
pub struct InputImportArgs {
    #[command(flatten)]
    pub tenant: TenantArgs,

    /// JSON file holding an array of Input stage entries.
    pub file: PathBuf,

    /// Reject entries that do not exist yet instead of creating them.
    #[arg(long)]
    pub update_only: bool,
}

#[derive(Args, Debug)]
pub struct InputListArgs {
    #[command(flatten)]
    pub tenant: TenantArgs,

    /// Restrict to these external ids.
    #[arg(long = "id")]
    pub ids: Vec<String>,

    /// Restrict to one relation type.
    #[arg(long = "type")]
    pub relation_type: Option<RelationType>,

    /// Restrict to these source partner ids.
    #[arg(long = "source")]
    pub sources: Vec<String>,

    /// Restrict to these target partner ids.
    #[arg(long = "target")]
    pub targets: Vec<String>,

    /// Only stages updated after this instant (RFC 3339).
    #[arg(long)]
    pub updated_after: Option<DateTime<Utc>>,

    #[command(flatten)]
    pub page: PageArgs,
}

#[derive(Args, Debug)]
pub struct InputRefArgs {
    #[command(flatten)]
    pub tenant: TenantArgs,

    /// External id of the staged relation.
    pub id: String,
}

impl Renderable for InputStage {
    fn render_human(&self, w: &mut dyn Write) -> io::Result<()> {
        pretty_section(w, &format!("{} ({})", self.external_id, self.relation_type))?;
        pretty_kv(w, "Source", &self.source_external_id)?;
        pretty_kv(w, "Target", &self.target_external_id)?;
        pretty_kv(w, "States", states_summary(&self.states))?;
        pretty_kv(w, "Created", self.created_at.to_rfc3339())?;
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
            self.source_external_id,
            self.target_external_id,
            states_summary(&self.states)
        )
    }

    fn table_headers() -> &'static [&'static str] {
        &["EXTERNAL_ID", "TYPE", "SOURCE", "TARGET", "STATES"]
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SharingReport {
    external_id: String,
    sharing: Option<SharingState>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Deleted {
    external_id: String,
    deleted: bool,
}

fn read_entries(path: &Path) -> anyhow::Result<Vec<RelationPutEntry>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Execute a `relgraph input` subcommand.
///
/// # Errors
///
/// Returns an error if the project is not initialized, no tenant is known,
/// or the staged relation operation fails.
#[allow(clippy::too_many_lines)]
pub fn run_input(command: &InputCommand, output: OutputMode, project_root: &Path) -> anyhow::Result<()> {
    let project = open_project(project_root, output)?;
    let service = StagedRelationService::new(&project.conn);

    match command {
        InputCommand::Create(args) => {
            let tenant = args.tenant.resolve(&project.config, output)?;
            let stage = service
                .create_input(
                    &tenant,
                    args.id.as_deref(),
                    args.relation_type,
                    &args.source,
                    &args.target,
                )
                .map_err(|err| fail(output, &err))?;
            render_item(&stage, output)?;
        }
        InputCommand::Update(args) => {
            let tenant = args.tenant.resolve(&project.config, output)?;
            let stage = service
                .update_input(&tenant, &args.entry())
                .map_err(|err| fail(output, &err))?;
            render_item(&stage, output)?;
        }
        InputCommand::Upsert(args) => {
            let tenant = args.tenant.resolve(&project.config, output)?;
            let stage = service
                .upsert_input(&tenant, &args.entry())
                .map_err(|err| fail(output, &err))?;
            render_item(&stage, output)?;
        }
        InputCommand::Import(args) => {
            let tenant = args.tenant.resolve(&project.config, output)?;
            let entries = read_entries(&args.file)?;
            let stages = if args.update_only {
                service.update_input_relations(&tenant, &entries)
            } else {
                service.upsert_input_relations(&tenant, &entries)
            }
            .map_err(|err| fail(output, &err))?;
            tracing::info!(count = stages.len(), file = %args.file.display(), "imported input stages");
            render_list(&stages, output)?;
        }
        InputCommand::List(args) => {
            let tenant = args.tenant.resolve(&project.config, output)?;
            let filter = InputFilter {
                external_ids: args.ids.clone(),
                relation_type: args.relation_type,
                source_external_ids: args.sources.clone(),
                target_external_ids: args.targets.clone(),
                updated_after: args.updated_after,
            };
            let page = service
                .list_input(&tenant, &filter, args.page.request(&project.config))
                .map_err(|err| fail(output, &err))?;
            render_page(&page, output)?;
        }
        InputCommand::Show(args) => {
            let tenant = args.tenant.resolve(&project.config, output)?;
            let stage = service
                .get_input(&tenant, &args.id)
                .map_err(|err| fail(output, &err))?;
            render_item(&stage, output)?;
        }
        InputCommand::Delete(args) => {
            let tenant = args.tenant.resolve(&project.config, output)?;
            service
                .delete_input(&tenant, &args.id)
                .map_err(|err| fail(output, &err))?;
            let report = Deleted {
                external_id: args.id.clone(),
                deleted: true,
            };
            render_mode(
                output,
                &report,
                |r, w| writeln!(w, "deleted {}", r.external_id),
                |r, w| writeln!(w, "✓ Deleted staged relation {}", r.external_id),
            )?;
        }
        InputCommand::Sharing(args) => {
            let tenant = args.tenant.resolve(&project.config, output)?;
            let sharing = service
                .sharing_state(&tenant, &args.id)
                .map_err(|err| fail(output, &err))?;
            let report = SharingReport {
                external_id: args.id.clone(),
                sharing,
            };
            render_mode(
                output,
                &report,
                |r, w| match &r.sharing {
                    Some(state) => writeln!(w, "{}  {}", r.external_id, state.state_type),
                    None => writeln!(w, "{}  -", r.external_id),
                },
                |r, w| {
                    pretty_section(w, &format!("Sharing state of {}", r.external_id))?;
                    match &r.sharing {
                        Some(state) => {
                            pretty_kv(w, "State", state.state_type.as_str())?;
                            pretty_kv(w, "Updated", state.updated_at.to_rfc3339())?;
                            if let Some(message) = &state.error_message {
                                pretty_kv(w, "Error", message)?;
                            }
                            Ok(())
                        }
                        None => pretty_kv(w, "State", "none"),
                    }
                },
            )?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use relgraph_core::model::BusinessStateType;

    #[test]
    fn import_file_accepts_wire_field_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batch.json");
        std::fs::write(
            &path,
            r#"[
                {
                    "externalId": "REL-1",
                    "relationType": "IsManagedBy",
                    "businessPartnerSourceExternalId": "BP-1",
                    "businessPartnerTargetExternalId": "BP-2"
                },
                {
                    "externalId": "REL-2",
                    "relationType": "IsOwnedBy",
                    "businessPartnerSourceExternalId": "BP-2",
                    "businessPartnerTargetExternalId": "BP-3",
                    "states": [{
                        "validFrom": "2024-01-01T00:00:00Z",
                        "validTo": "2025-01-01T00:00:00Z",
                        "type": "INACTIVE"
                    }]
                }
            ]"#,
        )
        .unwrap();

        let entries = read_entries(&path).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].states.is_empty());
        assert_eq!(entries[1].relation_type, RelationType::IsOwnedBy);
        assert_eq!(entries[1].states[0].state_type, BusinessStateType::Inactive);
    }

    #[test]
    fn unreadable_import_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_entries(&dir.path().join("missing.json")).is_err());
    }
}
