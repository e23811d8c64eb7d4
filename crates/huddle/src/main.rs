//! `huddle` binary entry point: tracing setup, argument parsing, dispatch.

mod cli;
mod commands;
mod config;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run().await {
        let code = err
            .downcast_ref::<huddle_core::Error>()
            .map_or(1, huddle_core::Error::exit_code);
        eprintln!("Error: {err:#}");
        std::process::exit(code);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let db = config::resolve_db_path(cli.db)?;
    let format = cli.format;

    match cli.command {
        Command::Status { session } => commands::status(&db, &session, format).await,
        Command::List { status } => commands::list(&db, status, format).await,
        Command::Join {
            session,
            agent,
            role,
        } => commands::join(&db, &session, &agent, &role, format).await,
        Command::Leave { session, agent } => commands::leave(&db, &session, &agent, format).await,
        Command::Lock {
            session,
            resource,
            agent,
            resource_type,
        } => commands::lock(&db, &session, &resource, &agent, &resource_type, format).await,
        Command::Unlock { session, resource } => {
            commands::unlock(&db, &session, &resource, format).await
        }
        Command::Task {
            session,
            agent,
            status,
            task,
        } => commands::task(&db, &session, &agent, status, task.as_deref(), format).await,
        Command::Notify { session, role } => commands::notify(&db, &session, &role, format).await,
        Command::Done { session } => commands::done(&db, &session, format).await,
        Command::History { session, limit } => {
            commands::history(&db, &session, limit, format).await
        }
    }
}
