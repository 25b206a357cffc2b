#![forbid(unsafe_code)]

mod cmd;
mod output;

use clap::{CommandFactory, Parser, Subcommand};
use output::OutputMode;
use relgraph_core::config;
use std::env;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "relgraph: staged and canonical business-partner relations",
    long_about = None
)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    /// Suppress non-essential output.
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Project root holding `.relgraph/` (defaults to the current directory).
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    /// Resolve the output mode from the flag, `FORMAT`, user config and TTY.
    fn output_mode(&self, project_root: &Path) -> OutputMode {
        match config::resolve_config(project_root, self.json) {
            Ok(effective) => OutputMode::from_resolved(&effective.resolved_output),
            Err(err) => {
                warn!(error = %format!("{err:#}"), "falling back to default output mode");
                if self.json {
                    OutputMode::Json
                } else {
                    OutputMode::Text
                }
            }
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        next_help_heading = "Lifecycle",
        about = "Initialize a relgraph project",
        long_about = "Create .relgraph/ with a default config and a migrated relation store.",
        after_help = "EXAMPLES:\n    # Initialize a project in the current directory\n    relgraph init\n\n    # Set a default tenant\n    relgraph init --tenant BPNL00000000TNT1"
    )]
    Init(cmd::init::InitArgs),

    #[command(
        next_help_heading = "Registry",
        about = "Manage tenant business partners",
        after_help = "EXAMPLES:\n    # Register a legal entity partner\n    relgraph partner add BP-1 --tenant BPNL00000000TNT1\n\n    # List partners\n    relgraph partner list --json"
    )]
    Partner {
        #[command(subcommand)]
        command: cmd::partner::PartnerCommand,
    },

    #[command(
        next_help_heading = "Registry",
        about = "Manage legal entities of the canonical graph",
        after_help = "EXAMPLES:\n    # Register an entity with its original creation time\n    relgraph entity add BPNL000000000001 --created-at 2001-05-01T00:00:00Z\n\n    # List entities\n    relgraph entity list"
    )]
    Entity {
        #[command(subcommand)]
        command: cmd::entity::EntityCommand,
    },

    #[command(
        next_help_heading = "Staged Relations",
        about = "Manage Input stages of staged relations",
        after_help = "EXAMPLES:\n    # Create a relation\n    relgraph input create --type IsManagedBy --source BP-1 --target BP-2\n\n    # Upsert with a validity window\n    relgraph input upsert REL-1 --type IsManagedBy --source BP-1 --target BP-2 \\\n        --valid-from 2024-01-01T00:00:00Z --valid-to 2025-01-01T00:00:00Z\n\n    # Import a batch\n    relgraph input import batch.json"
    )]
    Input {
        #[command(subcommand)]
        command: cmd::input::InputCommand,
    },

    #[command(
        next_help_heading = "Staged Relations",
        about = "Promote staged relations to Output records",
        after_help = "EXAMPLES:\n    # Promote a relation\n    relgraph output upsert REL-1 --type IsManagedBy \\\n        --source-bpnl BPNL000000000001 --target-bpnl BPNL000000000002\n\n    # List outputs\n    relgraph output list --json"
    )]
    Output {
        #[command(subcommand)]
        command: cmd::output_cmd::OutputCommand,
    },

    #[command(
        next_help_heading = "Canonical Graph",
        about = "Upsert and inspect canonical edges",
        after_help = "EXAMPLES:\n    # Join two alternative headquarters\n    relgraph graph upsert --type IsAlternativeHeadquarterFor \\\n        --source BPNL000000000001 --target BPNL000000000002\n\n    # Check a proposed management window for collisions\n    relgraph graph overlaps --type IsManagedBy --source BPNL000000000001 \\\n        --target BPNL000000000003 --valid-from 2024-01-01T00:00:00Z --valid-to 2024-06-30T00:00:00Z"
    )]
    Graph {
        #[command(subcommand)]
        command: cmd::graph::GraphCommand,
    },

    #[command(
        next_help_heading = "Read",
        about = "List changelog entries",
        after_help = "EXAMPLES:\n    # Everything for one tenant\n    relgraph changelog --tenant BPNL00000000TNT1\n\n    # Legal-entity changes from canonical edges\n    relgraph changelog --kind legal-entity --json"
    )]
    Changelog(cmd::changelog::ChangelogArgs),

    #[command(
        next_help_heading = "Project Maintenance",
        about = "Generate shell completion scripts",
        after_help = "EXAMPLES:\n    # Generate bash completions\n    relgraph completions bash"
    )]
    Completions(cmd::completions::CompletionsArgs),
}

fn init_tracing(verbose: bool, quiet: bool) {
    let filter = EnvFilter::try_from_env("RELGRAPH_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() || verbose {
            "relgraph=debug,relgraph_core=debug,info"
        } else if quiet {
            "error"
        } else {
            "relgraph=info,relgraph_core=info,warn"
        })
    });

    let format = env::var("RELGRAPH_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let project_root = match &cli.root {
        Some(root) => root.clone(),
        None => std::env::current_dir()?,
    };
    let output = cli.output_mode(&project_root);
    debug!(root = %project_root.display(), ?output, "resolved invocation");

    match cli.command {
        Commands::Init(ref args) => cmd::init::run_init(args, output, &project_root),
        Commands::Partner { ref command } => cmd::partner::run_partner(command, output, &project_root),
        Commands::Entity { ref command } => cmd::entity::run_entity(command, output, &project_root),
        Commands::Input { ref command } => cmd::input::run_input(command, output, &project_root),
        Commands::Output { ref command } => {
            cmd::output_cmd::run_output(command, output, &project_root)
        }
        Commands::Graph { ref command } => cmd::graph::run_graph(command, output, &project_root),
        Commands::Changelog(ref args) => {
            cmd::changelog::run_changelog(args, output, &project_root)
        }
        Commands::Completions(ref args) => {
            let mut command = Cli::command();
            cmd::completions::run_completions(args.shell, &mut command)
        }
    }
}
