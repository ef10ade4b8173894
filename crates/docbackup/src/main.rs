//! docbackup binary
//!
//! Exit codes: `0` success, `1` the operation reported a failure, `2`
//! unexpected error.

use anyhow::{Context, Result};
use clap::Parser;
use docbackup::cli::{Cli, Verbosity};
use docbackup::Operation;
use docbackup_cosmos::CosmosClient;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbosity);

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            error!("Unexpected error: {:#}", e);
            ExitCode::from(2)
        }
    }
}

fn init_logging(verbosity: Verbosity) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.directive()));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

async fn run(cli: Cli) -> Result<bool> {
    let folder = cli.folder();
    if !folder.is_dir() {
        error!("Folder {} does not exist", folder.display());
        return Ok(false);
    }

    let client = match CosmosClient::builder()
        .connection_string(cli.connection_string)
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            error!("{}", e);
            return Ok(false);
        }
    };
    info!("Using account endpoint {}", client.endpoint());

    let operation = Operation::new(cli.command, Arc::new(client), cli.database, folder);
    let name = operation.name();
    operation
        .execute()
        .await
        .with_context(|| format!("{} operation failed", name))
}
