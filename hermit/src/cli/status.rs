//! status subcommand
//!
//! Displays the state of the shared services, the registered sessions and
//! the cached files.

use crate::config::{HermitPaths, Settings};
use crate::health::dependency::GatewayHealth;
use crate::health::Dependency;
use crate::models::provider::provider_ids;
use crate::registry::InstanceRegistry;
use crate::services::{ComposeServices, SharedServices};
use crate::token::TokenStore;
use chrono::{DateTime, Local};
use clap::Args;
use std::path::Path;
use std::time::SystemTime;

/// Arguments for the status subcommand
#[derive(Args, Debug, Clone, Default)]
pub struct StatusArgs {
    /// List registered session ids
    #[arg(short, long)]
    pub verbose: bool,
}

/// Execute the status command
pub async fn execute(args: &StatusArgs, paths: HermitPaths) -> Result<(), anyhow::Error> {
    let settings = Settings::from_env();
    let services = ComposeServices::new(paths.compose_file.clone());
    let gateway = GatewayHealth::from_settings(&settings);
    let registry = InstanceRegistry::new(&paths.cache_dir);
    let tokens = TokenStore::new(&paths.cache_dir);

    let running = services.is_running().await;
    let healthy = running && gateway.is_ready().await;
    let sessions = registry.list()?;

    println!(
        "SERVICES\t{}",
        determine_status_label(running, healthy, sessions.len())
    );
    println!("GATEWAY\t\t{}", settings.gateway_url);
    println!("SESSIONS\t{}", sessions.len());
    if args.verbose {
        for id in &sessions {
            println!("  - {}", id);
        }
    }

    let token_line = match tokens.read()? {
        Some(_) => match modified_at(tokens.path()) {
            Some(at) => format!("issued {}", format_time(at)),
            None => "present".to_string(),
        },
        None => "none".to_string(),
    };
    println!("TOKEN\t\t{}", token_line);

    let routing = paths.routing_config();
    let routing_line = match modified_at(&routing) {
        Some(at) => format!("{} (generated {})", routing.display(), format_time(at)),
        None => "not generated".to_string(),
    };
    println!("ROUTING\t\t{}", routing_line);
    println!(
        "PROVIDERS\t{}",
        provider_ids().collect::<Vec<_>>().join(", ")
    );
    Ok(())
}

fn determine_status_label(running: bool, healthy: bool, sessions: usize) -> &'static str {
    match (running, healthy) {
        (false, _) if sessions > 0 => "Stale",
        (false, _) => "Stopped",
        (true, true) => "Running",
        // Containers are up but the gateway has not answered yet.
        (true, false) => "Starting",
    }
}

fn modified_at(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

fn format_time(at: SystemTime) -> String {
    DateTime::<Local>::from(at)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}
