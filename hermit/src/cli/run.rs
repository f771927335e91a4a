//! デフォルトのセッションコマンド
//!
//! 共有サービスを用意してクライアントを起動し、終了後に後片付けする。

use crate::config::{HermitPaths, Settings};
use crate::orchestrator::Orchestrator;
use crate::services::ComposeServices;
use crate::shutdown::{self, ShutdownController};
use clap::Args;
use std::sync::Arc;
use tracing::debug;

/// セッションコマンドの引数
#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Start the shared services and exit, writing a sourceable env file
    #[arg(short, long)]
    pub detach: bool,

    /// Arguments passed through to the client program
    #[arg(
        value_name = "CLIENT_ARGS",
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub client_args: Vec<String>,
}

/// セッションコマンドを実行
pub async fn execute(args: &RunArgs, paths: HermitPaths) -> Result<(), anyhow::Error> {
    let settings = Settings::from_env();
    let services = Arc::new(ComposeServices::new(paths.compose_file.clone()));

    let controller = ShutdownController::new();
    let _signals = shutdown::listen(controller.clone())?;

    let mut orchestrator = Orchestrator::new(paths, settings, services).with_shutdown(controller);

    if args.detach {
        orchestrator.load_config()?;
        let env_file = orchestrator.detach().await?;
        println!();
        println!("✓ Hermit services are running in the background");
        println!("  Use them from a shell: source {}", env_file.display());
        println!("  Stop them with: hermit stop");
        return Ok(());
    }

    let exit = orchestrator.run(&args.client_args).await?;
    debug!(code = ?exit.code, termination = ?exit.termination, "Session finished");
    Ok(())
}
