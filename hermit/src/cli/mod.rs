//! CLI module for hermit
//!
//! Provides the command-line interface for running client sessions against
//! the shared services and managing them.

pub mod logs;
pub mod run;
pub mod status;
pub mod stop;

use crate::config::HermitPaths;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// hermit - Share one local LLM gateway between many client sessions
#[derive(Parser, Debug)]
#[command(name = "hermit")]
#[command(version, about, long_about = None)]
#[command(after_help = r#"ENVIRONMENT VARIABLES:
    HERMIT_HOME                       Installation root (default: current directory)
    HERMIT_CONFIG                     Model-list file (default: <root>/hermit.config.yaml)
    HERMIT_GATEWAY_URL                Gateway URL handed to clients (default: http://localhost:4000)
    HERMIT_LOCAL_SERVER_URL           Local model server URL (default: http://localhost:1234)
    HERMIT_CLIENT                     Client program (default: claude)
    HERMIT_RUNTIME_TIMEOUT_SECS       Wait for the container runtime (default: 60)
    HERMIT_LOCAL_SERVER_TIMEOUT_SECS  Wait for the local model server (default: 30)
    HERMIT_GATEWAY_TIMEOUT_SECS       Wait for the gateway health check (default: 60)
    HERMIT_LOCAL_SERVER_LAUNCH        Shell command starting the local model server
    HERMIT_RUNTIME_LAUNCH             Shell command starting the container runtime
    HERMIT_LOG_LEVEL                  Log filter (default: warn on stderr, info in log files)
"#)]
pub struct Cli {
    /// Installation root containing docker/ and the model-list file
    #[arg(long, global = true, env = "HERMIT_HOME", value_name = "DIR")]
    pub root: Option<PathBuf>,

    /// Model-list file
    #[arg(long, global = true, env = "HERMIT_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Options for the default session command
    #[command(flatten)]
    pub run: run::RunArgs,
}

impl Cli {
    /// Resolve the filesystem layout from `--root` / `--config`.
    pub fn paths(&self) -> crate::error::Result<HermitPaths> {
        HermitPaths::resolve(self.root.clone(), self.config.clone())
    }
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Stop the shared services regardless of active sessions
    Stop(stop::StopArgs),
    /// Show the state of the shared services and sessions
    Status(status::StatusArgs),
    /// Follow the shared gateway logs
    Logs(logs::LogsArgs),
}
