use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Maps agent - a tool-using model agent over MCP
#[derive(Debug, Parser)]
#[command(name = "maps-agent", version, about)]
pub struct Cli {
    /// Config file (defaults to ./maps-agent.toml, then the user config dir)
    #[arg(long, global = true, env = "MAPS_AGENT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// User id for console sessions
    #[arg(long, global = true)]
    pub user: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start an interactive chat session
    Chat,

    /// Send one prompt and print the reply
    Ask {
        /// Prompt text
        #[arg(long, short)]
        prompt: String,
    },

    /// Start the HTTP server
    Serve {
        /// Host address to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config)
        #[arg(long)]
        port: Option<u16>,
    },

    /// List the tools the tool server offers
    Tools,
}
