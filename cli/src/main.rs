//! Reef CLI Entry Point
//!
//! Thin front end over `reef-memory`: create, inspect, archive, migrate and
//! search polips in a project-local store.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use reef_memory::{
    format, temporal, Migrator, Polip, PolipId, PolipKind, ReefConfig, ReefIndex, ReefStore,
    Scope, Status,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "reef")]
#[command(about = "Persistent notes for coding agents")]
#[command(version)]
struct Args {
    /// Store directory (overrides the config file)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Config file (default: ./reef.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the store layout
    Init,
    /// Create a new polip
    Sprout {
        #[arg(long)]
        kind: PolipKind,
        #[arg(long)]
        id: String,
        #[arg(long)]
        scope: Option<Scope>,
        #[arg(long)]
        status: Option<Status>,
        #[arg(long)]
        summary: Option<String>,
        #[arg(long = "fact")]
        facts: Vec<String>,
        #[arg(long = "question")]
        questions: Vec<String>,
        #[arg(long = "link")]
        links: Vec<String>,
        #[arg(long = "file")]
        files: Vec<String>,
    },
    /// Print one polip
    Show { kind: PolipKind, id: String },
    /// List polips, optionally of one kind
    List { kind: Option<PolipKind> },
    /// Move a polip into the archive
    Decompose { kind: PolipKind, id: String },
    /// Move a polip into quarantine
    Quarantine { kind: PolipKind, id: String },
    /// Ranked lexical search
    Search {
        query: String,
        #[arg(long, short)]
        limit: Option<usize>,
    },
    /// Upgrade stale polips in place
    Migrate {
        /// Only report what would change
        #[arg(long)]
        dry_run: bool,
    },
    /// Rebuild and persist the search index
    Reindex,
    /// Archive expired sessions and purge old quarantine entries
    Sweep,
    /// Store statistics as JSON
    Stats,
}

fn main() {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "reef=info,reef_memory=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run(args) {
        tracing::error!("{:#}", e);
        std::process::exit(1);
    }
}

/// Work out the effective config from the flags and the working directory
fn resolve_config(root: Option<&Path>, config: Option<&Path>, cwd: &Path) -> anyhow::Result<ReefConfig> {
    let mut resolved = match config {
        Some(path) => {
            let mut loaded = ReefConfig::load(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?;
            if loaded.root.is_relative() {
                let base = path.parent().unwrap_or(cwd);
                loaded.root = base.join(&loaded.root);
            }
            loaded
        }
        None => ReefConfig::discover(cwd)?,
    };
    if let Some(root) = root {
        resolved.root = cwd.join(root);
    }
    Ok(resolved)
}

fn refresh_index(store: &ReefStore) -> anyhow::Result<()> {
    ReefIndex::new(&store.config().search)
        .refresh(store)
        .context("Failed to refresh search index")
}

fn run(args: Args) -> anyhow::Result<()> {
    let cwd = std::env::current_dir().context("Failed to get current directory")?;
    let config = resolve_config(args.root.as_deref(), args.config.as_deref(), &cwd)?;
    let store = ReefStore::open_with(config.clone())
        .with_context(|| format!("Failed to open store at {}", config.root.display()))?;

    match args.command {
        Command::Init => {
            refresh_index(&store)?;
            println!("{}", store.root().display());
        }
        Command::Sprout {
            kind,
            id,
            scope,
            status,
            summary,
            facts,
            questions,
            links,
            files,
        } => {
            let mut builder = Polip::builder().id(id).kind(kind);
            if let Some(scope) = scope {
                builder = builder.scope(scope);
            }
            if let Some(status) = status {
                builder = builder.status(status);
            }
            if let Some(summary) = summary {
                builder = builder.summary(summary);
            }
            for fact in facts {
                builder = builder.fact(fact);
            }
            for question in questions {
                builder = builder.question(question);
            }
            for link in links {
                builder = builder.link(link);
            }
            for file in files {
                builder = builder.file(file);
            }
            let polip = builder.build()?;
            let path = store.sprout(&polip)?;
            refresh_index(&store)?;
            println!("{}", path.display());
        }
        Command::Show { kind, id } => {
            let id = PolipId::parse(&id)?;
            let polip = store.read(kind, &id)?;
            print!("{}", format::encode(&polip));
        }
        Command::List { kind } => {
            let polips: Vec<Polip> = match kind {
                Some(kind) => store.list(kind)?,
                None => store.enumerate()?.into_iter().map(|s| s.polip).collect(),
            };
            for polip in polips {
                let headline = polip.summary.lines().next().unwrap_or("");
                println!("{}\t{}\t{}\t{}", polip.kind, polip.id, polip.updated, headline);
            }
        }
        Command::Decompose { kind, id } => {
            let id = PolipId::parse(&id)?;
            let archived = store.decompose(kind, &id)?;
            refresh_index(&store)?;
            println!("{}", archived.display());
        }
        Command::Quarantine { kind, id } => {
            let id = PolipId::parse(&id)?;
            let moved = store.quarantine(kind, &id)?;
            refresh_index(&store)?;
            println!("{}", moved.display());
        }
        Command::Search { query, limit } => {
            let index = ReefIndex::open(&store)?;
            let limit = limit.unwrap_or(config.search.default_limit);
            for hit in index.query(&query, limit) {
                println!("{:.3}\t{}\t{}\t{}", hit.score, hit.kind, hit.id, hit.updated);
            }
        }
        Command::Migrate { dry_run } => {
            let migrator = Migrator::new(&store);
            if dry_run {
                for entry in migrator.scan()? {
                    println!(
                        "{}\t{}\t{}\t{}",
                        entry.kind,
                        entry.id,
                        entry.version,
                        entry.path.display()
                    );
                }
            } else {
                let count = migrator.apply()?;
                if count > 0 {
                    refresh_index(&store)?;
                }
                println!("migrated {count}");
            }
        }
        Command::Reindex => {
            refresh_index(&store)?;
            tracing::info!("Index written to {}", store.index_path().display());
        }
        Command::Sweep => {
            let today = temporal::today();
            let swept = store.sweep_stale_sessions(today)?;
            let expired = store.expire_quarantine(config.quarantine_days, today)?;
            refresh_index(&store)?;
            println!("archived {} sessions, expired {} quarantined", swept.len(), expired);
        }
        Command::Stats => {
            println!("{}", serde_json::to_string_pretty(&store.stats()?)?);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use tempfile::TempDir;

    #[test]
    fn test_args_are_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_sprout() {
        let args = Args::try_parse_from([
            "reef", "sprout", "--kind", "thread", "--id", "auth", "--fact", "one", "--fact", "two",
        ])
        .unwrap();
        match args.command {
            Command::Sprout { kind, id, facts, .. } => {
                assert_eq!(kind, PolipKind::Thread);
                assert_eq!(id, "auth");
                assert_eq!(facts, vec!["one", "two"]);
            }
            _ => panic!("expected sprout"),
        }
    }

    #[test]
    fn test_rejects_unknown_kind() {
        assert!(Args::try_parse_from(["reef", "list", "widget"]).is_err());
    }

    #[test]
    fn test_resolve_config_precedence() {
        let dir = TempDir::new().unwrap();
        let cwd = dir.path();

        let config = resolve_config(None, None, cwd).unwrap();
        assert_eq!(config.root, cwd.join(".reef"));

        let file = cwd.join("custom.toml");
        std::fs::write(&file, "root = \"notes\"\nsession_ttl_days = 2\n").unwrap();
        let config = resolve_config(None, Some(&file), cwd).unwrap();
        assert_eq!(config.root, cwd.join("notes"));
        assert_eq!(config.session_ttl_days, 2);

        let config = resolve_config(Some(Path::new("elsewhere")), Some(&file), cwd).unwrap();
        assert_eq!(config.root, cwd.join("elsewhere"));
    }
}
