use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use boardsync::actions::{RuleFile, expected_from_rules, sync_actions};
use boardsync::collection::TaskCollection;
use boardsync::forge::{ForgeClient, ForgeConfig, RefPatterns};
use boardsync::kanban::{KanbanApi, KanbanClient, KanbanConfig};
use boardsync::reconcile::{Reconciler, UpdateOptions};
use boardsync::schema::SchemaIndex;

#[derive(Parser)]
#[command(name = "boardsync")]
#[command(version, about = "Reconciles the conformance workboard with forge activity")]
pub struct Cli {
    /// Log reconciliation decisions as they are made (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Reconcile board tasks against their forge items
    Sync {
        /// Board project name
        #[arg(long, default_value = "ConformanceWorkboard")]
        project: String,

        /// Decide everything, write nothing
        #[arg(short = 'n', long)]
        dry_run: bool,
    },
    /// Reconcile the project's automatic actions against a rule file
    Actions {
        /// Board project name
        #[arg(long, default_value = "ConformanceWorkboard")]
        project: String,

        /// Path to the TOML rule file
        #[arg(long, default_value = "rules.toml")]
        rules: PathBuf,

        /// Also remove entries matching no rule (duplicates included)
        #[arg(long)]
        remove_unexpected: bool,

        /// Decide everything, write nothing
        #[arg(short = 'n', long)]
        dry_run: bool,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "boardsync=debug" } else { "boardsync=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}

/// Resolve the board project and fetch its schema.
async fn load_schema(kanban: &dyn KanbanApi, project: &str) -> Result<SchemaIndex> {
    let record = kanban
        .get_project_by_name(project)
        .await?
        .with_context(|| format!("No board project named '{project}'"))?;
    Ok(SchemaIndex::fetch(kanban, record.id).await?)
}

async fn cmd_sync(project: &str, dry_run: bool) -> Result<()> {
    let kanban = KanbanClient::new(KanbanConfig::from_env()?);
    let forge = ForgeClient::new(ForgeConfig::from_env()?);
    let patterns = RefPatterns::new(&forge.config().project_web_url());

    let schema = load_schema(&kanban, project).await?;
    let mut collection = TaskCollection::new();
    let outcome = collection
        .load_project(&kanban, &schema, &patterns, true)
        .await?;
    info!(loaded = outcome.loaded, "board tasks hydrated");
    for (task_id, err) in &outcome.failures {
        warn!(task_id, error = %err, "task skipped for this run");
    }

    let reconciler = Reconciler {
        kanban: &kanban,
        forge: &forge,
        schema: &schema,
        patterns: &patterns,
        options: if dry_run {
            UpdateOptions::all_false()
        } else {
            UpdateOptions::all_true()
        },
    };
    let mut report = reconciler.reconcile_all(&mut collection).await?;
    reconciler
        .discover_new_tasks(&mut collection, &mut report)
        .await?;

    println!(
        "{} tasks processed: {} field updates, {} tasks created, {} links created, {} descriptions repaired",
        report.tasks_processed,
        report.fields_updated,
        report.tasks_created,
        report.links_created,
        report.descriptions_updated,
    );
    if dry_run && !report.changes_made() {
        println!("dry run: no changes were written");
    }
    if !report.failures.is_empty() {
        for failure in &report.failures {
            eprintln!("failed: {failure}");
        }
        anyhow::bail!("{} field updates failed", report.failures.len());
    }
    Ok(())
}

async fn cmd_actions(
    project: &str,
    rules_path: &PathBuf,
    remove_unexpected: bool,
    dry_run: bool,
) -> Result<()> {
    let kanban = KanbanClient::new(KanbanConfig::from_env()?);
    let schema = load_schema(&kanban, project).await?;

    let rules = RuleFile::load(rules_path)?;
    let expected = expected_from_rules(&rules)?;
    info!(rules = expected.len(), "expanded rule file");

    let report = sync_actions(&kanban, &schema, &expected, remove_unexpected, dry_run).await?;
    println!(
        "{} entries matched, {} unrecognized, {} scheduled for removal ({} removed), {} created",
        report.matched,
        report.unparsed,
        report.scheduled_removals,
        report.removed,
        report.created,
    );
    if report.scheduled_removals > 0 && !remove_unexpected {
        println!("rerun with --remove-unexpected to remove them");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match &cli.command {
        Commands::Sync { project, dry_run } => cmd_sync(project, *dry_run).await,
        Commands::Actions {
            project,
            rules,
            remove_unexpected,
            dry_run,
        } => cmd_actions(project, rules, *remove_unexpected, *dry_run).await,
    }
}
