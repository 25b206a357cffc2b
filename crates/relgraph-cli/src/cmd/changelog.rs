use crate::cmd::{PageArgs, open_project, render_page};
use crate::output::{OutputMode, Renderable, fail, write_json};
use chrono::{DateTime, Utc};
use clap::Args;
use relgraph_core::changelog::{ChangelogEntry, ChangelogFilter, EntityKind, list_changelog};
use std::io::{self, Write};
use std::path::Path;

#[derive(Args, Debug)]
pub struct ChangelogArgs {
    /// Restrict to one tenant's staged relations.
    #[arg(short, long)]
    pub tenant: Option<String>,

    /// Restrict to one entity kind: relation or legal-entity.
    #[arg(long)]
    pub kind: Option<EntityKind>,

    /// Restrict to one subject (external id or BPNL).
    #[arg(long)]
    pub subject: Option<String>,

    /// Only entries recorded after this instant (RFC 3339).
    #[arg(long)]
    pub since: Option<DateTime<Utc>>,

    #[command(flatten)]
    pub page: PageArgs,
}

impl Renderable for ChangelogEntry {
    fn render_human(&self, w: &mut dyn Write) -> io::Result<()> {
        let stage = self
            .stage
            .map_or_else(String::new, |stage| format!(" [{stage}]"));
        writeln!(
            w,
            "{}  {} {} {}{}",
            self.created_at.format("%Y-%m-%d %H:%M:%S"),
            self.change_type,
            self.entity_kind,
            self.subject_id,
            stage
        )
    }

    fn render_json(&self, w: &mut dyn Write) -> io::Result<()> {
        write_json(w, self)
    }

    fn render_table(&self, w: &mut dyn Write) -> io::Result<()> {
        writeln!(
            w,
            "{}  {}  {}  {}  {}",
            self.entry_id,
            self.change_type,
            self.entity_kind,
            self.subject_id,
            self.stage.map_or_else(|| "-".to_string(), |stage| stage.to_string())
        )
    }

    fn table_headers() -> &'static [&'static str] {
        &["ID", "CHANGE", "KIND", "SUBJECT", "STAGE"]
    }
}

/// Execute `relgraph changelog`.
///
/// # Errors
///
/// Returns an error if the project is not initialized or the read fails.
pub fn run_changelog(
    args: &ChangelogArgs,
    output: OutputMode,
    project_root: &Path,
) -> anyhow::Result<()> {
    let project = open_project(project_root, output)?;
    let filter = ChangelogFilter {
        tenant_id: args.tenant.clone(),
        entity_kind: args.kind,
        subject_id: args.subject.clone(),
        since: args.since,
    };
    let page = list_changelog(&project.conn, &filter, args.page.request(&project.config))
        .map_err(|err| fail(output, &err))?;
    render_page(&page, output)
}
