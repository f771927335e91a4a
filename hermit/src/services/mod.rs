//! 共有サービスの制御
//!
//! ゲートウェイコンテナの起動・停止・稼働確認・ログ追跡。
//! 実体は `docker compose` だが、オーケストレータはトレイト越しにしか触らない。

use crate::error::{HermitError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};
use tokio::process::{Child, Command};
use tracing::{debug, info};

/// 稼働確認に使うコンテナ名フィルタ
pub const CONTAINER_NAME_FILTER: &str = "hermit";

/// ゲートウェイに渡すマスターキーの環境変数
pub const MASTER_KEY_ENV: &str = "LITELLM_MASTER_KEY";

/// compose ファイルに渡すルーティング設定パスの環境変数
pub const CONFIG_PATH_ENV: &str = "HERMIT_CONFIG_PATH";

/// 共有サービスの制御面
#[async_trait]
pub trait SharedServices: Send + Sync {
    /// ルーティング設定とトークンを渡して起動する
    async fn up(&self, config_path: &Path, token: &str) -> Result<()>;

    /// 停止する
    async fn down(&self) -> Result<()>;

    /// 稼働中か
    async fn is_running(&self) -> bool;

    /// ログを追跡する
    async fn logs_follow(&self) -> Result<LogStream>;
}

/// 行単位のログストリーム
pub struct LogStream {
    lines: Lines<BufReader<Box<dyn AsyncRead + Send + Unpin>>>,
    _child: Option<Child>,
}

impl LogStream {
    /// 任意のリーダーから作成
    pub fn from_reader(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        let reader: Box<dyn AsyncRead + Send + Unpin> = Box::new(reader);
        Self {
            lines: BufReader::new(reader).lines(),
            _child: None,
        }
    }

    fn from_child(mut child: Child) -> Result<Self> {
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| HermitError::service_control("follow logs of", "stdout not captured"))?;
        let mut stream = Self::from_reader(stdout);
        stream._child = Some(child);
        Ok(stream)
    }

    /// 次の行。終端で `None`
    pub async fn next_line(&mut self) -> Result<Option<String>> {
        Ok(self.lines.next_line().await?)
    }
}

/// `docker compose` による共有サービス
#[derive(Debug, Clone)]
pub struct ComposeServices {
    program: String,
    compose_file: PathBuf,
}

impl ComposeServices {
    /// compose ファイルを指定して作成
    pub fn new(compose_file: impl Into<PathBuf>) -> Self {
        Self {
            program: "docker".to_string(),
            compose_file: compose_file.into(),
        }
    }

    /// docker 以外のプログラムを使う
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn compose(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("compose").arg("-f").arg(&self.compose_file);
        cmd.stdin(Stdio::null());
        cmd
    }

    async fn run(&self, action: &'static str, mut cmd: Command) -> Result<()> {
        let output = cmd
            .output()
            .await
            .map_err(|e| HermitError::service_control(action, e.to_string()))?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let message = if stderr.is_empty() {
            output.status.to_string()
        } else {
            stderr
        };
        Err(HermitError::service_control(action, message))
    }
}

#[async_trait]
impl SharedServices for ComposeServices {
    async fn up(&self, config_path: &Path, token: &str) -> Result<()> {
        let mut cmd = self.compose();
        cmd.arg("up")
            .arg("-d")
            .env(MASTER_KEY_ENV, token)
            .env(CONFIG_PATH_ENV, config_path);

        info!(compose_file = %self.compose_file.display(), "Starting shared services");
        self.run("start", cmd).await
    }

    async fn down(&self) -> Result<()> {
        let mut cmd = self.compose();
        cmd.arg("down");

        info!(compose_file = %self.compose_file.display(), "Stopping shared services");
        self.run("stop", cmd).await
    }

    async fn is_running(&self) -> bool {
        let output = Command::new(&self.program)
            .args([
                "ps",
                "--filter",
                &format!("name={}", CONTAINER_NAME_FILTER),
                "--format",
                "{{.Names}}",
            ])
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .await;

        match output {
            Ok(output) if output.status.success() => {
                !String::from_utf8_lossy(&output.stdout).trim().is_empty()
            }
            Ok(output) => {
                debug!(status = %output.status, "Container listing failed");
                false
            }
            Err(e) => {
                debug!(error = %e, "Container listing could not be run");
                false
            }
        }
    }

    async fn logs_follow(&self) -> Result<LogStream> {
        let mut cmd = self.compose();
        cmd.arg("logs")
            .arg("-f")
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| HermitError::service_control("follow logs of", e.to_string()))?;
        LogStream::from_child(child)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_stream_yields_lines() {
        let mut stream = LogStream::from_reader(&b"gateway | ready\ngateway | request\n"[..]);
        assert_eq!(
            stream.next_line().await.unwrap().as_deref(),
            Some("gateway | ready")
        );
        assert_eq!(
            stream.next_line().await.unwrap().as_deref(),
            Some("gateway | request")
        );
        assert_eq!(stream.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_missing_program_is_not_running() {
        let services =
            ComposeServices::new("/tmp/docker-compose.yml").with_program("/nonexistent/docker");
        assert!(!services.is_running().await);
    }

    #[tokio::test]
    async fn test_up_with_missing_program_is_start_error() {
        let services =
            ComposeServices::new("/tmp/docker-compose.yml").with_program("/nonexistent/docker");
        let err = services
            .up(Path::new("/tmp/config.yaml"), "sk-hermit-test")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            HermitError::ServiceControl { action: "start", .. }
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_down_is_stop_error() {
        let services = ComposeServices::new("/tmp/docker-compose.yml").with_program("false");
        let err = services.down().await.unwrap_err();
        assert!(matches!(err, HermitError::ServiceControl { action: "stop", .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_is_running_requires_listed_container() {
        // 何も出力しない
        let silent = ComposeServices::new("/tmp/docker-compose.yml").with_program("true");
        assert!(!silent.is_running().await);

        // 引数をそのまま出力するので、コンテナ名が列挙されたのと同じ扱い
        let listing = ComposeServices::new("/tmp/docker-compose.yml").with_program("echo");
        assert!(listing.is_running().await);
    }
}
