// Copyright (c) 2025-2026 Parley Contributors
//
// SPDX-License-Identifier: MIT
mod cli;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command};
use parley_config::Settings;
use parley_gateway::AppContext;
use parley_jobs::{register_core_tasks, JobRegistry, Worker, WorkerServices};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn,hyper=warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    let settings = Settings::from_env();

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => parley_gateway::serve(settings).await,
        Command::Worker => run_worker(settings).await,
        Command::InitDb => {
            let pool = parley_store::db::connect(&settings.database.url()).await?;
            parley_store::db::init_schema(&pool).await?;
            println!("schema initialized at {}", settings.database.url());
            Ok(())
        }
        Command::IssueToken { user, role } => {
            let token = parley_gateway::auth::issue_token(&settings, &user, &role)?;
            println!("{token}");
            Ok(())
        }
    }
}

/// Worker process: same wiring as the gateway, but the consuming side of
/// the queue instead of the HTTP surface.
async fn run_worker(settings: Settings) -> anyhow::Result<()> {
    let redis_url = settings
        .redis_url
        .clone()
        .context("worker requires AGENT_REDIS_URL to be configured")?;

    let ctx = AppContext::build(settings).await?;
    let client = ctx.jobs.clone().context("worker could not connect to redis")?;

    let services = Arc::new(WorkerServices {
        settings: Arc::clone(&ctx.settings),
        runtime: Arc::clone(&ctx.runtime),
        providers: ctx.providers.clone() as Arc<dyn parley_core::ProviderFactory>,
        embedder: ctx.embedder.clone(),
        client,
    });
    let mut registry = JobRegistry::new();
    register_core_tasks(&mut registry, services);

    let worker = Worker::connect(Arc::new(registry), ctx.pool.clone(), &redis_url).await?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        let _ = shutdown_tx.send(true);
    });

    worker.run(shutdown_rx).await;
    Ok(())
}
