//! annomirror-sync - pull-side sync trigger and annotation totals report
//!
//! `sync` pages through the remote job listing and mirrors it locally.
//! `totals` prints annotation totals from the local mirror only.

use std::path::PathBuf;
use std::sync::Arc;

use annomirror_common::config::MirrorConfig;
use annomirror_common::db::{init_database, GroupTotal, TaskStore, TotalsGroup};
use annomirror_common::JobFilter;
use annomirror_sync::{RemoteClient, SyncEngine};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};

/// Command-line arguments for annomirror-sync
#[derive(Parser, Debug)]
#[command(name = "annomirror-sync")]
#[command(about = "Mirror remote annotation jobs into the local database")]
#[command(version)]
struct Args {
    /// Config file (overrides ANNOMIRROR_CONFIG and the per-user file)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Pull jobs from the remote platform into the mirror
    Sync {
        #[arg(long)]
        project_id: Option<i64>,

        #[arg(long)]
        task_id: Option<i64>,

        /// Remote username of the assignee
        #[arg(long)]
        assignee: Option<String>,

        #[arg(long)]
        status: Option<String>,

        /// Overwrite jobs that are already mirrored
        #[arg(long)]
        force: bool,
    },

    /// Print annotation totals from the mirror
    Totals {
        #[arg(long)]
        by_status: bool,

        #[arg(long)]
        by_project: bool,

        #[arg(long)]
        by_assignee: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "annomirror_sync=info,annomirror_common=info".into()),
        )
        .init();

    let args = Args::parse();

    let config = MirrorConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    info!("Database path: {}", config.database.path.display());

    let pool = init_database(&config.database.path)
        .await
        .context("Failed to open database")?;
    let store = TaskStore::new(pool);

    match args.command {
        Command::Sync {
            project_id,
            task_id,
            assignee,
            status,
            force,
        } => {
            let filter = JobFilter {
                project_id,
                task_id,
                assignee,
                status,
            };
            run_sync(&config, store, &filter, force).await
        }
        Command::Totals {
            by_status,
            by_project,
            by_assignee,
        } => print_totals(&store, by_status, by_project, by_assignee).await,
    }
}

async fn run_sync(config: &MirrorConfig, store: TaskStore, filter: &JobFilter, force: bool) -> Result<()> {
    let client = RemoteClient::new(&config.remote).context("Failed to create remote client")?;
    let engine = SyncEngine::new(Arc::new(client), store);

    match engine.run(filter, force).await {
        Ok(summary) => {
            println!("Sync completed: {}", summary);
            Ok(())
        }
        Err(aborted) => {
            error!("{}", aborted);
            println!("Sync aborted: {}", aborted.summary);
            Err(aborted).context("Remote unavailable")
        }
    }
}

async fn print_totals(store: &TaskStore, by_status: bool, by_project: bool, by_assignee: bool) -> Result<()> {
    let totals = store
        .annotation_totals()
        .await
        .context("Failed to read totals")?;

    println!("Total tasks: {}", totals.task_count);
    println!("Total annotations: {}", totals.total_annotations);
    println!("Average annotations per task: {:.2}", totals.average_per_task);

    let groups = [
        (by_status, TotalsGroup::Status, "status", "(no status)"),
        (by_project, TotalsGroup::Project, "project", "(no project)"),
        (by_assignee, TotalsGroup::Assignee, "assignee", "Unassigned"),
    ];

    for (wanted, group, label, missing) in groups {
        if !wanted {
            continue;
        }
        let rows = store
            .totals_by(group)
            .await
            .with_context(|| format!("Failed to group totals by {}", label))?;
        println!();
        println!("By {}:", label);
        for row in rows {
            print_group_row(&row, missing);
        }
    }

    Ok(())
}

fn print_group_row(row: &GroupTotal, missing: &str) {
    println!(
        "  {}: {} annotations ({} tasks)",
        row.key.as_deref().unwrap_or(missing),
        row.total_annotations,
        row.task_count
    );
}
