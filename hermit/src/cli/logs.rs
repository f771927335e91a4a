//! logs subcommand
//!
//! Follows the shared gateway logs, or prints hermit's own log file.

use crate::config::HermitPaths;
use crate::logging::latest_log_file;
use crate::services::{ComposeServices, SharedServices};
use clap::Args;

/// Arguments for the logs subcommand
#[derive(Args, Debug, Clone, Default)]
pub struct LogsArgs {
    /// Print hermit's own log file instead of following the gateway
    #[arg(long)]
    pub own: bool,
}

/// Execute the logs command
pub async fn execute(args: &LogsArgs, paths: HermitPaths) -> Result<(), anyhow::Error> {
    if args.own {
        match latest_log_file(&paths.log_dir()) {
            Some(path) => print!("{}", std::fs::read_to_string(path)?),
            None => println!("No log files in {}", paths.log_dir().display()),
        }
        return Ok(());
    }

    let services = ComposeServices::new(paths.compose_file.clone());
    if !services.is_running().await {
        println!("Hermit services are not running");
        return Ok(());
    }

    let mut stream = services.logs_follow().await?;
    loop {
        tokio::select! {
            line = stream.next_line() => match line? {
                Some(line) => println!("{}", line),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}
