use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use maps_agent::cli::{Cli, Commands};
use maps_agent::{console, server, AgentConfig, AgentRuntime};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so console output stays clean
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = AgentConfig::load(cli.config.as_deref())?;
    if let Commands::Serve { host, port } = &cli.command {
        if let Some(host) = host {
            config.server.host = host.clone();
        }
        if let Some(port) = port {
            config.server.port = *port;
        }
    }
    let user_id = cli
        .user
        .clone()
        .unwrap_or_else(|| config.default_user_id.clone());

    let runtime = Arc::new(AgentRuntime::builder(config).build()?);
    runtime.start().await?;

    let outcome = run(cli.command, runtime.clone(), &user_id).await;
    runtime.shutdown().await;
    outcome
}

async fn run(command: Commands, runtime: Arc<AgentRuntime>, user_id: &str) -> anyhow::Result<()> {
    match command {
        Commands::Chat => {
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            console::run_loop(&runtime, user_id, stdin, tokio::io::stdout()).await?;
        }
        Commands::Ask { prompt } => {
            let ok = console::ask(&runtime, user_id, &prompt, tokio::io::stdout()).await?;
            if !ok {
                anyhow::bail!("turn ended with an error");
            }
        }
        Commands::Serve { .. } => {
            let bind = runtime.config().bind_address();
            server::start(runtime.clone(), &bind, shutdown_signal()).await?;
        }
        Commands::Tools => {
            for tool in runtime.tool_definitions().await? {
                println!("{:<28} {}", tool.name, tool.description);
            }
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
