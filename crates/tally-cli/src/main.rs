//! Tally CLI - log entries from the terminal, online or not
//!
//! Every change lands in the local database first and is synced to the
//! remote store when it can be reached.

mod cli;
mod commands;
mod error;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::commands::add::run_add;
use crate::commands::common::Target;
use crate::commands::completions::run_completions;
use crate::commands::delete::{run_delete, run_purge};
use crate::commands::edit::{run_edit, EditArgs};
use crate::commands::list::{run_list, run_trash};
use crate::commands::pending::run_pending;
use crate::commands::resolve::run_resolve;
use crate::commands::restore::run_restore;
use crate::commands::sign_out::run_sign_out;
use crate::commands::status::run_status;
use crate::commands::sync::run_sync;
use crate::commands::watch::run_watch;
use crate::error::CliError;

const DEFAULT_LOG_FILTER: &str = "tally=info";

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let target = Target::resolve(cli.db_path, cli.remote_db, cli.user, cli.offline);

    match cli.command {
        Commands::Add {
            name,
            category,
            magnitude,
            at,
        } => run_add(&name, category, magnitude, at.as_deref(), &target).await?,
        Commands::List { date, json } => run_list(date.as_deref(), json, &target).await?,
        Commands::Edit {
            id,
            name,
            category,
            magnitude,
            at,
        } => {
            let args = EditArgs {
                id: &id,
                name,
                category,
                magnitude,
                at: at.as_deref(),
            };
            run_edit(args, &target).await?;
        }
        Commands::Delete { id } => run_delete(&id, &target).await?,
        Commands::Restore { id } => run_restore(&id, &target).await?,
        Commands::Purge { id } => run_purge(&id, &target).await?,
        Commands::Trash { json } => run_trash(json, &target).await?,
        Commands::Pending { json } => run_pending(json, &target).await?,
        Commands::Sync { json } => run_sync(json, &target).await?,
        Commands::Status { json } => run_status(json, &target).await?,
        Commands::Resolve { op_id, keep } => run_resolve(&op_id, keep, &target).await?,
        Commands::Watch => run_watch(&target).await?,
        Commands::SignOut => run_sign_out(&target).await?,
        Commands::Completions { shell, output } => {
            run_completions(shell, output.as_deref())?;
        }
    }

    Ok(())
}
