//! Command-line interface definitions and parsing

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path (TOML)
    #[arg(short, long)]
    pub config: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a simulated delivery scenario through a dispatcher
    Run {
        /// Number of concurrent producers
        #[arg(short, long)]
        producers: Option<usize>,
        /// Deliveries submitted by each producer
        #[arg(short, long)]
        deliveries: Option<usize>,
        /// Simulate a transport disconnect after this many submissions
        #[arg(long)]
        disconnect_after: Option<usize>,
        /// Make the Nth submitted delivery fail
        #[arg(long)]
        fail_at: Option<usize>,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the effective configuration as TOML
    Config,
}
