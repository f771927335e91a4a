//! 依存サービス
//!
//! ローカルモデルサーバー、コンテナランタイム、ゲートウェイの到達確認と起動処理。
//! 依存ごとにタイムアウトと重要度（致命的 / 警告のみ）を持つ。

use super::probe::{ensure, ProbePolicy, Readiness};
use crate::config::Settings;
use crate::error::{HermitError, Result};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// ヘルスチェックHTTPリクエストのタイムアウト（秒）
const HTTP_CHECK_TIMEOUT_SECS: u64 = 2;

/// タイムアウト時の扱い
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Criticality {
    /// タイムアウトは致命的エラー
    Fatal,
    /// 警告を出して続行
    Advisory,
}

/// 依存サービス
#[async_trait]
pub trait Dependency: Send + Sync {
    /// 表示名
    fn name(&self) -> &str;

    /// 到達可能か
    async fn is_ready(&self) -> bool;

    /// 起動を試みる（結果は待たない）
    fn launch(&self);

    /// ポーリング方針
    fn policy(&self) -> ProbePolicy;

    /// タイムアウト時の扱い
    fn criticality(&self) -> Criticality;
}

/// 依存サービスの起動を保証し、重要度に応じてタイムアウトを扱う
///
/// # Returns
///
/// - `Ok(Readiness)`: 到達可能、または警告のみの依存がタイムアウトした場合
/// - `Err(HermitError::DependencyTimeout)`: 致命的な依存がタイムアウトした場合
/// - `Err(HermitError::Interrupted)`: 待機中にキャンセルされた場合
pub async fn ensure_dependency(
    dependency: &dyn Dependency,
    cancel: &CancellationToken,
) -> Result<Readiness> {
    let name = dependency.name().to_string();
    let policy = dependency.policy();

    let readiness = ensure(
        || dependency.is_ready(),
        || {
            println!("⏳ {} is not running, starting it...", name);
            dependency.launch();
        },
        policy,
        cancel,
    )
    .await;

    match readiness {
        Readiness::AlreadyRunning => {
            println!("✓ {} is already running", name);
            Ok(readiness)
        }
        Readiness::Started => {
            println!("✓ {} is ready", name);
            Ok(readiness)
        }
        Readiness::Cancelled => Err(HermitError::Interrupted(name)),
        Readiness::TimedOut => match dependency.criticality() {
            Criticality::Fatal => Err(HermitError::DependencyTimeout {
                dependency: name,
                seconds: policy.timeout.as_secs(),
            }),
            Criticality::Advisory => {
                warn!(
                    dependency = %name,
                    timeout_secs = policy.timeout.as_secs(),
                    "Dependency did not become ready, continuing anyway"
                );
                println!(
                    "⚠️  {} did not become ready within {} seconds, continuing anyway",
                    name,
                    policy.timeout.as_secs()
                );
                Ok(readiness)
            }
        },
    }
}

/// 起動コマンド
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchCommand {
    /// `sh -c` で実行するコマンド
    Shell(String),
    /// 引数付きプログラム
    Program {
        /// プログラム
        program: String,
        /// 引数
        args: Vec<String>,
    },
    /// 起動手段なし（手動で起動してもらう）
    Manual,
}

impl LaunchCommand {
    /// 設定値、またはmacOSアプリの既定起動方法
    fn from_setting_or_app(setting: Option<&String>, macos_app: &str) -> Self {
        match setting {
            Some(cmd) => Self::Shell(cmd.clone()),
            None if cfg!(target_os = "macos") => Self::Program {
                program: "open".to_string(),
                args: vec!["-a".to_string(), macos_app.to_string()],
            },
            None => Self::Manual,
        }
    }

    /// コマンドを起動する（終了は待たない）
    pub fn spawn(&self, name: &str) {
        let mut cmd = match self {
            Self::Shell(line) => {
                let mut cmd = Command::new("sh");
                cmd.arg("-c").arg(line);
                cmd
            }
            Self::Program { program, args } => {
                let mut cmd = Command::new(program);
                cmd.args(args);
                cmd
            }
            Self::Manual => {
                println!("   Please start {} manually", name);
                return;
            }
        };

        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        match cmd.spawn() {
            Ok(child) => debug!(dependency = name, pid = ?child.id(), "Launch command spawned"),
            // 起動失敗は「まだ起動中」と区別しない
            Err(e) => debug!(dependency = name, error = %e, "Launch command failed to spawn"),
        }
    }
}

fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(HTTP_CHECK_TIMEOUT_SECS))
        .build()
        .unwrap_or_default()
}

async fn http_ok(client: &reqwest::Client, url: &str) -> bool {
    match client.get(url).send().await {
        Ok(res) => res.status().is_success(),
        Err(e) => {
            debug!(url = url, error = %e, "Health check request failed");
            false
        }
    }
}

/// ホスト上のローカルモデルサーバー（LM Studio 等）
///
/// 到達できなくても警告のみ。手動でモデルをロードした後に使えるようになるため。
pub struct LocalModelServer {
    url: String,
    client: reqwest::Client,
    launch: LaunchCommand,
    timeout: Duration,
}

impl LocalModelServer {
    /// 設定から作成
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            url: format!("{}/v1/models", settings.local_server_url),
            client: http_client(),
            launch: LaunchCommand::from_setting_or_app(
                settings.local_server_launch.as_ref(),
                "LM Studio",
            ),
            timeout: settings.local_server_timeout,
        }
    }
}

#[async_trait]
impl Dependency for LocalModelServer {
    fn name(&self) -> &str {
        "Local model server"
    }

    async fn is_ready(&self) -> bool {
        http_ok(&self.client, &self.url).await
    }

    fn launch(&self) {
        self.launch.spawn(self.name());
        info!("Launched local model server, remember to load a model");
    }

    fn policy(&self) -> ProbePolicy {
        ProbePolicy::new(self.timeout)
    }

    fn criticality(&self) -> Criticality {
        Criticality::Advisory
    }
}

/// ゲートウェイを載せるコンテナランタイム（Docker）
pub struct ContainerRuntime {
    launch: LaunchCommand,
    timeout: Duration,
}

impl ContainerRuntime {
    /// 設定から作成
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            launch: LaunchCommand::from_setting_or_app(settings.runtime_launch.as_ref(), "Docker"),
            timeout: settings.runtime_timeout,
        }
    }
}

#[async_trait]
impl Dependency for ContainerRuntime {
    fn name(&self) -> &str {
        "Docker"
    }

    async fn is_ready(&self) -> bool {
        Command::new("docker")
            .arg("info")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }

    fn launch(&self) {
        self.launch.spawn(self.name());
    }

    fn policy(&self) -> ProbePolicy {
        ProbePolicy::new(self.timeout)
    }

    fn criticality(&self) -> Criticality {
        Criticality::Fatal
    }
}

/// 共有ゲートウェイのヘルスエンドポイント
///
/// `up` の後に待つだけで、自分では起動しない。
pub struct GatewayHealth {
    url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl GatewayHealth {
    /// 設定から作成
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            url: format!("{}/health/liveliness", settings.gateway_url),
            client: http_client(),
            timeout: settings.gateway_timeout,
        }
    }
}

#[async_trait]
impl Dependency for GatewayHealth {
    fn name(&self) -> &str {
        "Gateway"
    }

    async fn is_ready(&self) -> bool {
        http_ok(&self.client, &self.url).await
    }

    fn launch(&self) {}

    fn policy(&self) -> ProbePolicy {
        ProbePolicy::new(self.timeout)
    }

    fn criticality(&self) -> Criticality {
        Criticality::Advisory
    }
}
