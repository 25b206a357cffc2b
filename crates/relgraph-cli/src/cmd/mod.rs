pub mod changelog;
pub mod completions;
pub mod entity;
pub mod graph;
pub mod init;
pub mod input;
pub mod output_cmd;
pub mod partner;

use crate::output::{CliError, OutputMode, Renderable, render_error, render_list};
use chrono::{DateTime, Utc};
use clap::Args;
use relgraph_core::config::{self, PROJECT_DIR, ProjectConfig};
use relgraph_core::db::open_store;
use relgraph_core::db::query::{Page, PageRequest};
use relgraph_core::error::ErrorCode;
use relgraph_core::model::{BusinessStateType, ValidityState};
use rusqlite::Connection;
use serde::Serialize;
use std::io::{self, Write};
use std::path::Path;

/// An initialized project: its config plus an open, migrated store.
pub struct Project {
    pub config: ProjectConfig,
    pub conn: Connection,
}

/// Open the project rooted at `project_root`.
///
/// # Errors
///
/// Fails with a rendered `E1001` when `.relgraph/` is missing and `E1002`
/// when its config does not parse.
pub fn open_project(project_root: &Path, output: OutputMode) -> anyhow::Result<Project> {
    if !project_root.join(PROJECT_DIR).exists() {
        render_error(
            output,
            &CliError::from_code(
                ErrorCode::NotInitialized,
                format!("no relation store under {}", project_root.display()),
            ),
        )?;
        anyhow::bail!("relation store not initialized");
    }

    let config = match config::load_project_config(project_root) {
        Ok(config) => config,
        Err(err) => {
            render_error(
                output,
                &CliError::from_code(ErrorCode::ConfigParseError, format!("{err:#}")),
            )?;
            return Err(err);
        }
    };

    let conn = open_store(&config.store_path(project_root), config.busy_timeout())?;
    Ok(Project { config, conn })
}

/// `--tenant` flag shared by tenant-scoped commands.
#[derive(Args, Debug, Clone, Default)]
pub struct TenantArgs {
    /// Tenant BPNL owning the staged relations. Defaults to `[tenant] default`
    /// from `.relgraph/config.toml`.
    #[arg(short, long)]
    pub tenant: Option<String>,
}

impl TenantArgs {
    /// The tenant to act for.
    ///
    /// # Errors
    ///
    /// Fails when neither the flag nor the project config names a tenant.
    pub fn resolve(&self, config: &ProjectConfig, output: OutputMode) -> anyhow::Result<String> {
        if let Some(tenant) = self.tenant.as_deref().or(config.tenant.default.as_deref()) {
            return Ok(tenant.to_string());
        }
        render_error(
            output,
            &CliError::with_details(
                "no tenant given",
                "pass --tenant or set [tenant] default in .relgraph/config.toml",
                "missing_tenant",
            ),
        )?;
        anyhow::bail!("no tenant given")
    }
}

/// A single optional validity window.
#[derive(Args, Debug, Clone)]
pub struct StateArgs {
    /// Start of the validity window (RFC 3339).
    #[arg(long, requires = "valid_to")]
    pub valid_from: Option<DateTime<Utc>>,

    /// End of the validity window (RFC 3339).
    #[arg(long, requires = "valid_from")]
    pub valid_to: Option<DateTime<Utc>>,

    /// Business status inside the window.
    #[arg(long = "state", default_value = "ACTIVE")]
    pub state_type: BusinessStateType,
}

impl StateArgs {
    /// The states given on the command line; empty when no window was set.
    pub fn states(&self) -> Vec<ValidityState> {
        match (self.valid_from, self.valid_to) {
            (Some(from), Some(to)) => vec![ValidityState::new(from, to, self.state_type)],
            _ => Vec::new(),
        }
    }
}

/// `--page` / `--size` flags shared by listings.
#[derive(Args, Debug, Clone, Default)]
pub struct PageArgs {
    /// Zero-based page index.
    #[arg(long, default_value_t = 0)]
    pub page: u32,

    /// Page size. Defaults to `[paging] default_size`.
    #[arg(long)]
    pub size: Option<u32>,
}

impl PageArgs {
    pub fn request(&self, config: &ProjectConfig) -> PageRequest {
        PageRequest::new(self.page, self.size.unwrap_or_else(|| config.page_size()))
    }
}

/// Render one page of results: the page envelope in JSON, rows otherwise.
pub fn render_page<R: Renderable + Serialize>(
    page: &Page<R>,
    output: OutputMode,
) -> anyhow::Result<()> {
    if output.is_json() {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        serde_json::to_writer_pretty(&mut out, page)?;
        writeln!(out)?;
        return Ok(());
    }

    render_list(&page.content, output)?;
    if output == OutputMode::Pretty {
        println!(
            "page {} of {} ({} total)",
            page.page + 1,
            page.total_pages.max(1),
            page.total_elements
        );
    }
    Ok(())
}
