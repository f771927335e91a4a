//! クライアントプロセス
//!
//! 対話クライアントの起動、終了待ち、シグナル転送。

use crate::shutdown::Termination;
use async_trait::async_trait;
use std::io;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::debug;

/// 起動済みのクライアント
#[async_trait]
pub trait ClientProcess: Send {
    /// プロセスID
    fn id(&self) -> Option<u32>;

    /// 終了を待つ。終了コードを返す（シグナル終了の場合は `None`）
    async fn wait(&mut self) -> io::Result<Option<i32>>;

    /// 終了要求を転送する
    fn signal(&mut self, kind: Termination) -> io::Result<()>;

    /// 強制終了して回収する
    async fn kill(&mut self) -> io::Result<()>;
}

/// クライアントの起動方法
pub trait ClientLauncher: Send + Sync {
    /// プログラム名（表示用）
    fn program(&self) -> &str;

    /// 引数と環境変数を渡して起動する
    fn launch(
        &self,
        args: &[String],
        env: &[(&'static str, String)],
    ) -> io::Result<Box<dyn ClientProcess>>;
}

/// 端末を引き継いで子プロセスとして起動する
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: String,
}

impl ProcessLauncher {
    /// プログラムを指定して作成
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl ClientLauncher for ProcessLauncher {
    fn program(&self) -> &str {
        &self.program
    }

    fn launch(
        &self,
        args: &[String],
        env: &[(&'static str, String)],
    ) -> io::Result<Box<dyn ClientProcess>> {
        let child = Command::new(&self.program)
            .args(args)
            .envs(env.iter().map(|(k, v)| (*k, v.as_str())))
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()?;

        debug!(program = %self.program, pid = ?child.id(), "Client spawned");
        Ok(Box::new(ChildProcess { child }))
    }
}

struct ChildProcess {
    child: Child,
}

#[async_trait]
impl ClientProcess for ChildProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    async fn wait(&mut self) -> io::Result<Option<i32>> {
        Ok(self.child.wait().await?.code())
    }

    #[cfg(unix)]
    fn signal(&mut self, kind: Termination) -> io::Result<()> {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        // 回収済み
        let Some(pid) = self.child.id() else {
            return Ok(());
        };
        kill(Pid::from_raw(pid as i32), kind.as_signal())
            .map_err(|e| io::Error::other(e.to_string()))
    }

    #[cfg(not(unix))]
    fn signal(&mut self, _kind: Termination) -> io::Result<()> {
        self.child.start_kill()
    }

    async fn kill(&mut self) -> io::Result<()> {
        self.child.kill().await
    }
}
