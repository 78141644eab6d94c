//! Command execution

use tracing::info;

use crate::cli::Commands;
use crate::config::AppConfig;
use crate::error::Result;
use crate::scenario::ScenarioRunner;

pub struct CommandDispatcher;

impl CommandDispatcher {
    /// Execute a parsed command against the loaded configuration
    pub async fn execute(command: Commands, config: AppConfig) -> Result<()> {
        match command {
            Commands::Run {
                producers,
                deliveries,
                disconnect_after,
                fail_at,
                json,
            } => {
                let config =
                    config.with_overrides(producers, deliveries, disconnect_after, fail_at)?;
                let report = ScenarioRunner::new(config)?.run().await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&report)?);
                } else {
                    println!("{}", report.summary());
                }
            }
            Commands::Config => {
                info!("Printing effective configuration");
                print!("{}", config.to_toml()?);
            }
        }
        Ok(())
    }
}
