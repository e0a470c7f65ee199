//! treesync - inspect a directory tree the way a file manager sees it.
//!
//! Usage:
//!   treesync tree [PATH]      Render the tree with git status markers
//!   treesync status [PATH]    Print the git status of every path in a repository
//!   treesync export [PATH]    Export the loaded tree to JSON
//!   treesync --help           Show help

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Context, Result, eyre};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use treesync_engine::{Engine, EngineConfig, GitStatus, Node, NodeId, ScanDepth};
use treesync_git::{GitStatusProvider, RepoDiscovery};

#[derive(Parser)]
#[command(
    name = "treesync",
    version,
    about = "Incremental filesystem and git-status synchronization engine",
    long_about = "treesync keeps an in-memory tree of a directory in step with disk \
                  and git.\n\nThe subcommands drive the engine once and print \
                  what it sees."
)]
struct Cli {
    /// TOML file with engine settings. Flags override its values.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Render the tree in display order with git status markers
    Tree {
        /// Directory to show
        #[arg(default_value = ".")]
        path: PathBuf,

        /// How many directory levels to expand
        #[arg(short, long, default_value = "2")]
        depth: u32,

        /// Show dotfiles
        #[arg(long)]
        hidden: bool,

        /// Hide git-ignored entries
        #[arg(long)]
        no_ignored: bool,
    },

    /// Print the status of every path in the repository containing PATH
    Status {
        /// Any path inside the repository
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Export the loaded tree to JSON
    Export {
        /// Directory to export
        #[arg(default_value = ".")]
        path: PathBuf,

        /// How many directory levels to load
        #[arg(short, long, default_value = "2")]
        depth: u32,

        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        Command::Tree {
            path,
            depth,
            hidden,
            no_ignored,
        } => {
            let mut config = load_config(cli.config.as_deref(), &path)?;
            if hidden {
                config.show_hidden = true;
            }
            if no_ignored {
                config.show_ignored = false;
            }
            run_tree(config, depth).await?;
        }
        Command::Status { path } => {
            let config = load_config(cli.config.as_deref(), &path)?;
            run_status(config).await?;
        }
        Command::Export {
            path,
            depth,
            output,
        } => {
            let config = load_config(cli.config.as_deref(), &path)?;
            run_export(config, depth, output).await?;
        }
    }

    Ok(())
}

/// Log to stderr, filtered by `TREESYNC_LOG`, then `RUST_LOG`, then `warn`.
fn init_logging() {
    let filter = EnvFilter::try_from_env("TREESYNC_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Build the engine config from an optional TOML file, rooted at `path`.
///
/// Without a file, dotfiles are hidden unless asked for.
fn load_config(file: Option<&Path>, path: &Path) -> Result<EngineConfig> {
    let root = path
        .canonicalize()
        .wrap_err_with(|| format!("Invalid path: {}", path.display()))?;

    let mut config = match file {
        Some(file) => {
            let text = std::fs::read_to_string(file)
                .wrap_err_with(|| format!("Failed to read {}", file.display()))?;
            toml::from_str::<EngineConfig>(&text)
                .wrap_err_with(|| format!("Invalid config file {}", file.display()))?
        }
        None => {
            let mut config = EngineConfig::new(&root);
            config.show_hidden = false;
            config
        }
    };
    config.root = root;
    Ok(config)
}

/// Start an engine and load `depth` levels below the root.
async fn load_tree(config: EngineConfig, depth: u32) -> Result<Engine> {
    let engine = Engine::start(config).wrap_err("Failed to start engine")?;
    engine
        .scan(engine.root(), ScanDepth::Immediate)
        .await
        .wrap_err("Scan failed")?;

    let mut frontier = vec![engine.root()];
    for _ in 1..depth {
        let mut next = Vec::new();
        for dir in frontier {
            for child in engine.children(dir) {
                if !child.is_container() {
                    continue;
                }
                match engine.expand(child.id).await {
                    Ok(_) => next.push(child.id),
                    Err(e) => tracing::warn!(path = %child.path.display(), error = %e, "skipping directory"),
                }
            }
        }
        frontier = next;
    }
    Ok(engine)
}

/// Render the tree.
async fn run_tree(config: EngineConfig, depth: u32) -> Result<()> {
    let engine = load_tree(config, depth).await?;
    let tree = engine.tree();

    println!("{}", tree.root_path().display());
    print_children(&engine, engine.root(), "");
    println!();
    println!(
        " {} nodes loaded, {} shown",
        tree.len(),
        count_visible(&engine, engine.root())
    );

    engine.shutdown()?;
    Ok(())
}

fn print_children(engine: &Engine, id: NodeId, prefix: &str) {
    let children = engine.children(id);
    let last = children.len().saturating_sub(1);
    for (i, child) in children.iter().enumerate() {
        let (branch, extend) = if i == last {
            ("└── ", "    ")
        } else {
            ("├── ", "│   ")
        };
        println!(
            "{} {}{}{}",
            status_marker(child.git_status),
            prefix,
            branch,
            describe(child)
        );
        if child.is_container() && child.expanded {
            print_children(engine, child.id, &format!("{prefix}{extend}"));
        }
    }
}

fn count_visible(engine: &Engine, id: NodeId) -> usize {
    engine
        .children(id)
        .iter()
        .map(|child| {
            1 + if child.expanded {
                count_visible(engine, child.id)
            } else {
                0
            }
        })
        .sum()
}

fn describe(node: &Node) -> String {
    if node.is_container() {
        format!("{}/", node.name)
    } else {
        format!("{} ({})", node.name, format_size(node.size))
    }
}

/// One-column status marker in the style of `git status --short`.
fn status_marker(status: GitStatus) -> char {
    match status {
        GitStatus::Staged => 'A',
        GitStatus::Modified => 'M',
        GitStatus::Untracked => '?',
        GitStatus::Ignored => '!',
        GitStatus::Unmodified | GitStatus::NotInRepo => ' ',
    }
}

/// Print the status mapping of the repository containing the root.
async fn run_status(config: EngineConfig) -> Result<()> {
    let discovery = RepoDiscovery::new(&config.root);
    let repo = discovery
        .discover(&config.root)
        .ok_or_else(|| eyre!("{} is not inside a git repository", config.root.display()))?;

    let status = GitStatusProvider::from_config(&config)
        .refresh(&repo, &CancellationToken::new())
        .await
        .wrap_err("Git status failed")?;

    let mut entries: Vec<_> = status
        .entries()
        .iter()
        .filter(|(_, status)| **status != GitStatus::Unmodified)
        .collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));

    for (path, status) in &entries {
        let shown = path.strip_prefix(&repo).unwrap_or(path.as_path());
        println!("{} {}", status_marker(**status), shown.display());
    }
    if entries.is_empty() {
        println!("nothing to report, working tree clean");
    }
    Ok(())
}

/// Export the loaded tree to JSON.
async fn run_export(config: EngineConfig, depth: u32, output: Option<PathBuf>) -> Result<()> {
    let engine = load_tree(config, depth).await?;
    let tree = engine.tree();

    let export = serde_json::json!({
        "root": tree.root_path(),
        "exported_at": chrono::Utc::now().to_rfc3339(),
        "generation": tree.generation(),
        "nodes": tree.snapshot(),
    });
    let json = serde_json::to_string_pretty(&export)?;

    match output {
        Some(output_path) => {
            std::fs::write(&output_path, json)
                .wrap_err_with(|| format!("Failed to write {}", output_path.display()))?;
            eprintln!("Exported to {}", output_path.display());
        }
        None => {
            println!("{}", json);
        }
    }

    engine.shutdown()?;
    Ok(())
}

/// Format size in human-readable form.
fn format_size(bytes: u64) -> String {
    humansize::format_size(bytes, humansize::BINARY)
}
