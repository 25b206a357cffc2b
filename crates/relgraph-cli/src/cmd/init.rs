use crate::output::{OutputMode, pretty_kv, render_mode};
use anyhow::{Context as _, Result};
use clap::Args;
use relgraph_core::config::{self, PROJECT_DIR};
use relgraph_core::db::migrations::current_schema_version;
use relgraph_core::db::open_store;
use serde::Serialize;
use std::path::Path;

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Rewrite `.relgraph/config.toml` even if `.relgraph/` already exists.
    #[arg(long)]
    pub force: bool,

    /// Default tenant written into the project config.
    #[arg(long)]
    pub tenant: Option<String>,
}

const GITIGNORE: &str = "relgraph.db\nrelgraph.db-wal\nrelgraph.db-shm\n";

fn config_toml(tenant: Option<&str>) -> String {
    let mut toml = String::from(
        "[store]\n\
         path = \"relgraph.db\"\n\
         busy_timeout_ms = 5000\n\
         \n\
         [paging]\n\
         default_size = 100\n",
    );
    if let Some(tenant) = tenant {
        toml.push_str(&format!("\n[tenant]\ndefault = \"{tenant}\"\n"));
    }
    toml
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InitReport {
    store: String,
    config: String,
    schema_version: u32,
}

/// Execute `relgraph init`. Creates the project skeleton:
///
/// ```text
/// .relgraph/
///   config.toml   (store, paging and tenant defaults)
///   .gitignore    (store files)
///   relgraph.db   (migrated store)
/// ```
///
/// # Errors
///
/// Returns an error if `.relgraph/` already exists and `--force` is not set,
/// or if any filesystem or store operation fails.
pub fn run_init(args: &InitArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    let project_dir = project_root.join(PROJECT_DIR);

    if project_dir.exists() && !args.force {
        anyhow::bail!(".relgraph/ already exists. Use `relgraph init --force` to reinitialize.");
    }

    std::fs::create_dir_all(&project_dir).with_context(|| {
        format!(
            "Failed to create project directory: {}",
            project_dir.display()
        )
    })?;

    let config_path = project_dir.join("config.toml");
    std::fs::write(&config_path, config_toml(args.tenant.as_deref()))
        .with_context(|| format!("Failed to write config: {}", config_path.display()))?;

    let gitignore_path = project_dir.join(".gitignore");
    std::fs::write(&gitignore_path, GITIGNORE)
        .with_context(|| format!("Failed to write .gitignore: {}", gitignore_path.display()))?;

    let project = config::load_project_config(project_root)?;
    let store_path = project.store_path(project_root);
    let conn = open_store(&store_path, project.busy_timeout())?;
    let schema_version = current_schema_version(&conn)?;
    tracing::info!(store = %store_path.display(), schema_version, "initialized relation store");

    let report = InitReport {
        store: store_path.display().to_string(),
        config: config_path.display().to_string(),
        schema_version,
    };
    render_mode(
        output,
        &report,
        |r, w| writeln!(w, "initialized {} (schema v{})", r.store, r.schema_version),
        |r, w| {
            writeln!(w, "✓ Initialized .relgraph/ project structure.")?;
            writeln!(w)?;
            pretty_kv(w, "Store", &r.store)?;
            pretty_kv(w, "Config", &r.config)?;
            pretty_kv(w, "Schema", format!("v{}", r.schema_version))?;
            writeln!(w)?;
            writeln!(w, "Next steps:")?;
            writeln!(w, "  relgraph partner add <external-id> --tenant <bpnl>")?;
            writeln!(w, "  relgraph input create --type IsManagedBy --source <id> --target <id>")
        },
    )
}
