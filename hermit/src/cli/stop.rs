//! stop サブコマンド
//!
//! 登録中のセッション数に関係なく共有サービスを停止し、キャッシュを片付けます。

use crate::config::{HermitPaths, Settings};
use crate::orchestrator::Orchestrator;
use crate::services::ComposeServices;
use clap::Args;
use std::sync::Arc;

/// stop サブコマンドの引数
#[derive(Args, Debug, Clone, Default)]
pub struct StopArgs {}

/// stop コマンドを実行
pub async fn execute(_args: &StopArgs, paths: HermitPaths) -> Result<(), anyhow::Error> {
    let settings = Settings::from_env();
    let services = Arc::new(ComposeServices::new(paths.compose_file.clone()));
    let mut orchestrator = Orchestrator::new(paths, settings, services);

    if !orchestrator.stop_all().await {
        println!("Warning: the stop command failed, containers may still be running (check `docker ps`)");
    }
    Ok(())
}
