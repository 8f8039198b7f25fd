//! CLI command implementations.

pub mod builds;
pub mod logs;

use anyhow::Result;

pub fn validate(path: &str) -> Result<()> {
    match runway_config::ServerConfig::load(path) {
        Ok(config) => {
            println!("Configuration is valid");
            println!("  listen:      {}", config.server.listen);
            println!("  database:    {}", config.database.display());
            println!("  workspace:   {}", config.workspace.display());
            println!("  concurrency: {}", config.scheduler.concurrency);
            println!("  script:      {}", config.script);
            Ok(())
        }
        Err(e) => {
            println!("Configuration error: {}", e);
            std::process::exit(1);
        }
    }
}
