//! ライフサイクルオーケストレータ
//!
//! 1セッション分の状態遷移を管理する。
//!
//! ```text
//! Idle → ConfigLoaded → ServicesChecked → Running → Cleaning → Stopped
//! ```
//!
//! 共有サービスの起動・停止の判断は `.lifecycle.lock` を保持したまま行う。
//! 起動判断からインスタンス登録まで、登録解除から停止・トークン削除までが
//! それぞれ1つのクリティカルセクションになるため、別セッションの起動と
//! 最後のセッションの停止が交差しない。

pub mod client;
pub mod session;

pub use client::{ClientLauncher, ClientProcess, ProcessLauncher};
pub use session::SessionEnv;

use crate::atomic::{remove_if_exists, write_atomic};
use crate::config::{HermitPaths, ModelListFile, RoleAliases, Settings};
use crate::error::{HermitError, Result};
use crate::health::dependency::{ContainerRuntime, GatewayHealth, LocalModelServer};
use crate::health::{ensure_dependency, Dependency};
use crate::lock::CacheLock;
use crate::models::descriptor::validate;
use crate::models::{generate, provider, ModelDescriptor, RoutingConfig};
use crate::registry::{InstanceId, InstanceRegistry};
use crate::services::SharedServices;
use crate::shutdown::{ShutdownController, Termination};
use crate::token::TokenStore;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// シグナル転送後、クライアントの終了を待つ時間
pub const CLIENT_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// ライフサイクルの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// 初期状態
    Idle,
    /// ルーティング設定を生成済み
    ConfigLoaded,
    /// 共有サービスが稼働し、インスタンスを登録済み
    ServicesChecked,
    /// クライアント実行中
    Running,
    /// 後片付け中
    Cleaning,
    /// 終了
    Stopped,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::ConfigLoaded => "config-loaded",
            Self::ServicesChecked => "services-checked",
            Self::Running => "running",
            Self::Cleaning => "cleaning",
            Self::Stopped => "stopped",
        };
        write!(f, "{}", s)
    }
}

/// クライアントの終了状況
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientExit {
    /// 終了コード（シグナル終了・強制終了の場合は `None`）
    pub code: Option<i32>,
    /// 終了のきっかけになったシグナル
    pub termination: Option<Termination>,
}

/// 後片付けの結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupOutcome {
    /// 登録済みのインスタンスがなかった
    NotRegistered,
    /// 他のセッションが残っているので共有サービスを残した
    ServicesKept {
        /// 残っているセッション数
        remaining: usize,
    },
    /// 最後のセッションだったので共有サービスを停止した
    ServicesStopped,
}

struct LoadedConfig {
    descriptors: Vec<ModelDescriptor>,
    routing: RoutingConfig,
    aliases: RoleAliases,
    needs_local_server: bool,
}

/// 1セッション分のライフサイクル
pub struct Orchestrator {
    paths: HermitPaths,
    settings: Settings,
    services: Arc<dyn SharedServices>,
    local_server: Box<dyn Dependency>,
    runtime: Box<dyn Dependency>,
    gateway: Box<dyn Dependency>,
    launcher: Box<dyn ClientLauncher>,
    shutdown: ShutdownController,
    registry: InstanceRegistry,
    tokens: TokenStore,
    grace_period: Duration,
    state: LifecycleState,
    loaded: Option<LoadedConfig>,
    instance: Option<InstanceId>,
    token: Option<String>,
}

impl Orchestrator {
    /// 設定に従った実際の依存サービスとクライアントで作成
    pub fn new(paths: HermitPaths, settings: Settings, services: Arc<dyn SharedServices>) -> Self {
        Self {
            registry: InstanceRegistry::new(&paths.cache_dir),
            tokens: TokenStore::new(&paths.cache_dir),
            local_server: Box::new(LocalModelServer::from_settings(&settings)),
            runtime: Box::new(ContainerRuntime::from_settings(&settings)),
            gateway: Box::new(GatewayHealth::from_settings(&settings)),
            launcher: Box::new(ProcessLauncher::new(settings.client_program.clone())),
            shutdown: ShutdownController::new(),
            grace_period: CLIENT_GRACE_PERIOD,
            state: LifecycleState::Idle,
            loaded: None,
            instance: None,
            token: None,
            paths,
            settings,
            services,
        }
    }

    /// 依存サービスを差し替える
    pub fn with_dependencies(
        mut self,
        local_server: Box<dyn Dependency>,
        runtime: Box<dyn Dependency>,
        gateway: Box<dyn Dependency>,
    ) -> Self {
        self.local_server = local_server;
        self.runtime = runtime;
        self.gateway = gateway;
        self
    }

    /// クライアントの起動方法を差し替える
    pub fn with_launcher(mut self, launcher: Box<dyn ClientLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    /// 終了要求の受け口を共有する
    pub fn with_shutdown(mut self, shutdown: ShutdownController) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// シグナル転送後の猶予時間を変更する
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// 現在の状態
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// 登録中のインスタンスID
    pub fn instance_id(&self) -> Option<&InstanceId> {
        self.instance.as_ref()
    }

    /// 取得済みのトークン
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// 生成済みのルーティング設定
    pub fn routing(&self) -> Option<&RoutingConfig> {
        self.loaded.as_ref().map(|l| &l.routing)
    }

    fn expect_state(&self, step: &'static str, expected: LifecycleState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(HermitError::InvalidState {
                step,
                state: self.state,
            })
        }
    }

    /// モデル一覧を読み込み、ルーティング設定を生成して書き出す
    ///
    /// Idle → ConfigLoaded。使えるモデルが1件もなければ
    /// [`HermitError::EmptyModelList`]。
    pub fn load_config(&mut self) -> Result<&RoutingConfig> {
        self.expect_state("load the model list", LifecycleState::Idle)?;

        let file = ModelListFile::load(&self.paths.config_file)?;
        let report = validate(file.models.ok_or(HermitError::EmptyModelList)?);
        let generated = generate(Some(report.descriptors.as_slice()))?;
        if generated.config.is_empty() {
            return Err(HermitError::EmptyModelList);
        }

        let descriptors: Vec<ModelDescriptor> = report
            .descriptors
            .into_iter()
            .filter(|d| provider::resolve(&d.provider).is_ok())
            .collect();
        let needs_local_server = descriptors.iter().any(|d| {
            provider::resolve(&d.provider)
                .map(|t| t.requires_local_server)
                .unwrap_or(false)
        });

        std::fs::create_dir_all(&self.paths.cache_dir)?;
        let routing_path = self.paths.routing_config();
        generated.config.write_atomic(&routing_path)?;

        info!(
            models = generated.config.entries.len(),
            skipped = report.warnings.len() + generated.skipped.len(),
            path = %routing_path.display(),
            "Routing config generated"
        );

        self.state = LifecycleState::ConfigLoaded;
        let loaded = self.loaded.insert(LoadedConfig {
            descriptors,
            routing: generated.config,
            aliases: file.aliases,
            needs_local_server,
        });
        Ok(&loaded.routing)
    }

    /// 共有サービスを起動（または再利用）し、トークンを返す
    ///
    /// 呼び出し側がライフサイクルロックを保持していること。
    /// 2つ目の値は、このセッションが起動したかどうか。
    async fn start_or_reuse(&self) -> Result<(String, bool)> {
        let cancel = self.shutdown.cancellation_token();

        if self.services.is_running().await {
            println!("✓ Hermit services already running");
            if self.tokens.read()?.is_none() {
                warn!("Shared services are running but no token file exists, issuing a new token");
            }
            return Ok((self.tokens.get_or_create()?, false));
        }

        let needs_local_server = self
            .loaded
            .as_ref()
            .map(|l| l.needs_local_server)
            .unwrap_or(false);
        if needs_local_server {
            ensure_dependency(self.local_server.as_ref(), &cancel).await?;
        }
        ensure_dependency(self.runtime.as_ref(), &cancel).await?;

        let token = self.tokens.get_or_create()?;

        println!("🚀 Starting Hermit services...");
        if let Err(e) = self
            .services
            .up(&self.paths.routing_config(), &token)
            .await
        {
            // サービスが動いていない間はトークンを残さない
            if let Err(remove_err) = self.tokens.remove() {
                error!(error = %remove_err, "Failed to remove token file");
            }
            return Err(e);
        }
        println!("✓ Services started");

        Ok((token, true))
    }

    /// 共有サービスを用意し、このセッションを登録する
    ///
    /// ConfigLoaded → ServicesChecked
    pub async fn check_services(&mut self) -> Result<()> {
        self.expect_state("check shared services", LifecycleState::ConfigLoaded)?;

        let lock = CacheLock::acquire_async(self.paths.lifecycle_lock()).await?;
        let (token, started) = self.start_or_reuse().await?;

        let id = InstanceId::generate();
        self.registry.register(&id)?;
        info!(instance = %id, started = started, "Session registered");
        drop(lock);

        self.instance = Some(id);
        self.token = Some(token);
        self.state = LifecycleState::ServicesChecked;

        if started {
            ensure_dependency(self.gateway.as_ref(), &self.shutdown.cancellation_token()).await?;
        }
        Ok(())
    }

    /// 共有サービスを用意し、環境変数ファイルを書いて終了する
    ///
    /// 固定ID [`InstanceId::detached`] を登録したまま終了するので、
    /// 他のセッションが終了してもサービスは `hermit stop` まで残る。
    pub async fn detach(&mut self) -> Result<PathBuf> {
        self.expect_state("start detached", LifecycleState::ConfigLoaded)?;

        let lock = CacheLock::acquire_async(self.paths.lifecycle_lock()).await?;
        let (token, started) = self.start_or_reuse().await?;
        let lease = InstanceId::detached();
        self.registry.register(&lease)?;
        info!(instance = %lease, started = started, "Detached lease registered");
        drop(lock);

        if started {
            ensure_dependency(self.gateway.as_ref(), &self.shutdown.cancellation_token()).await?;
        }

        let env = self.session_env(&token)?;
        let env_file = self.paths.env_file();
        write_atomic(&env_file, env.export_script().as_bytes(), Some(0o600))?;
        info!(path = %env_file.display(), "Session environment written");

        self.token = Some(token);
        self.state = LifecycleState::Stopped;
        Ok(env_file)
    }

    fn session_env(&self, token: &str) -> Result<SessionEnv> {
        let loaded = self.loaded.as_ref().ok_or(HermitError::EmptyModelList)?;
        SessionEnv::new(
            token,
            self.settings.gateway_url.clone(),
            &loaded.routing,
            &loaded.aliases,
        )
        .ok_or(HermitError::EmptyModelList)
    }

    fn print_models(&self) {
        let Some(loaded) = &self.loaded else {
            return;
        };
        println!();
        println!("Available models:");
        for descriptor in &loaded.descriptors {
            println!("  - {} ({})", descriptor.name, descriptor.provider);
        }
        println!();
    }

    /// クライアントを起動し、終了するか終了要求が来るまで待つ
    ///
    /// ServicesChecked → Running → Cleaning。終了要求を受けた場合は
    /// 同じシグナルをクライアントに転送し、猶予時間を過ぎたら強制終了する。
    pub async fn run_client(&mut self, args: &[String]) -> Result<ClientExit> {
        const STEP: &str = "launch the client";
        self.expect_state(STEP, LifecycleState::ServicesChecked)?;
        let Some(token) = self.token.clone() else {
            return Err(HermitError::InvalidState {
                step: STEP,
                state: self.state,
            });
        };

        if self.shutdown.is_shutdown_requested() {
            return Err(HermitError::Interrupted(self.launcher.program().to_string()));
        }

        let env = self.session_env(&token)?;
        let args = env.client_args(args);
        let program = self.launcher.program().to_string();

        self.print_models();
        println!("🚀 Starting {}...", program);
        println!();

        let mut child = self
            .launcher
            .launch(&args, &env.vars())
            .map_err(|source| HermitError::ClientLaunch {
                program: program.clone(),
                source,
            })?;
        self.state = LifecycleState::Running;

        enum Event {
            Exited(std::io::Result<Option<i32>>),
            Signalled(Termination),
        }

        let event = tokio::select! {
            status = child.wait() => Event::Exited(status),
            kind = self.shutdown.wait() => Event::Signalled(kind),
        };

        let exit = match event {
            Event::Exited(Ok(code)) => {
                println!();
                println!("✓ {} exited", program);
                println!();
                ClientExit {
                    code,
                    termination: None,
                }
            }
            Event::Exited(Err(e)) => {
                warn!(error = %e, "Failed to wait for the client");
                ClientExit {
                    code: None,
                    termination: None,
                }
            }
            Event::Signalled(kind) => self.stop_client(child.as_mut(), kind).await,
        };

        self.state = LifecycleState::Cleaning;
        Ok(exit)
    }

    async fn stop_client(&self, child: &mut dyn ClientProcess, kind: Termination) -> ClientExit {
        info!(signal = %kind, pid = ?child.id(), "Forwarding termination to the client");
        if let Err(e) = child.signal(kind) {
            warn!(error = %e, "Failed to forward termination to the client");
        }

        let code = match tokio::time::timeout(self.grace_period, child.wait()).await {
            Ok(Ok(code)) => code,
            Ok(Err(e)) => {
                warn!(error = %e, "Failed to wait for the client");
                None
            }
            Err(_) => {
                warn!(
                    grace_secs = self.grace_period.as_secs(),
                    "Client did not exit in time, killing it"
                );
                if let Err(e) = child.kill().await {
                    error!(error = %e, "Failed to kill the client");
                }
                None
            }
        };

        ClientExit {
            code,
            termination: Some(kind),
        }
    }

    /// このセッションの登録を解除し、最後なら共有サービスを停止する
    ///
    /// 何度呼んでもよい。2回目以降は [`CleanupOutcome::NotRegistered`]。
    /// 途中のエラーはログに出すだけで、処理は最後まで進める。
    pub async fn cleanup(&mut self) -> CleanupOutcome {
        let Some(id) = self.instance.take() else {
            self.state = LifecycleState::Stopped;
            return CleanupOutcome::NotRegistered;
        };
        self.state = LifecycleState::Cleaning;

        let _lock = match CacheLock::acquire_async(self.paths.lifecycle_lock()).await {
            Ok(lock) => Some(lock),
            Err(e) => {
                error!(error = %e, "Failed to acquire lifecycle lock, cleaning up without it");
                None
            }
        };

        let is_last = match self.registry.unregister(&id) {
            Ok(is_last) => is_last,
            Err(e) => {
                // 状態が読めない場合は他のセッションを優先して残す
                error!(instance = %id, error = %e, "Failed to unregister session");
                false
            }
        };

        let outcome = if is_last {
            println!("🛑 Stopping Hermit services (no other instances running)...");
            self.teardown().await;
            CleanupOutcome::ServicesStopped
        } else {
            let remaining = self.registry.list().map(|ids| ids.len()).unwrap_or(0);
            println!(
                "Hermit services are still running ({} other session(s) active).",
                remaining
            );
            println!("To stop them, run: hermit stop");
            CleanupOutcome::ServicesKept { remaining }
        };

        info!(instance = %id, ?outcome, "Session cleaned up");
        self.state = LifecycleState::Stopped;
        outcome
    }

    /// 共有サービスを停止し、トークンと環境変数ファイルを削除する
    ///
    /// 停止コマンドが成功したら `true`。
    async fn teardown(&self) -> bool {
        let stopped = match self.services.down().await {
            Ok(()) => {
                println!("✓ Stopped Hermit services");
                true
            }
            Err(e) => {
                error!(error = %e, "Failed to stop shared services");
                eprintln!("Error stopping services: {}", e);
                false
            }
        };

        if let Err(e) = self.tokens.remove() {
            error!(error = %e, "Failed to remove token file");
        }
        if let Err(e) = remove_if_exists(&self.paths.env_file()) {
            error!(error = %e, "Failed to remove environment file");
        }
        stopped
    }

    /// 登録数に関係なく共有サービスを停止し、キャッシュを片付ける
    ///
    /// 停止コマンドが成功したら `true`。
    pub async fn stop_all(&mut self) -> bool {
        let _lock = match CacheLock::acquire_async(self.paths.lifecycle_lock()).await {
            Ok(lock) => Some(lock),
            Err(e) => {
                error!(error = %e, "Failed to acquire lifecycle lock, stopping without it");
                None
            }
        };

        println!("🛑 Stopping Hermit services...");
        let stopped = self.teardown().await;

        if let Err(e) = self.registry.clear() {
            error!(error = %e, "Failed to remove instance registry");
        }
        println!("✓ Cleaned up cache files");

        self.instance = None;
        self.state = LifecycleState::Stopped;
        stopped
    }

    /// 設定読み込みからクライアント終了後の後片付けまでを実行する
    pub async fn run(&mut self, args: &[String]) -> Result<ClientExit> {
        self.load_config()?;

        let result = match self.check_services().await {
            Ok(()) => self.run_client(args).await,
            Err(e) => Err(e),
        };

        self.cleanup().await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::LogStream;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingServices {
        calls: Mutex<Vec<String>>,
        running: Mutex<bool>,
    }

    #[async_trait]
    impl SharedServices for RecordingServices {
        async fn up(&self, _config_path: &Path, _token: &str) -> Result<()> {
            self.calls.lock().unwrap().push("up".to_string());
            *self.running.lock().unwrap() = true;
            Ok(())
        }

        async fn down(&self) -> Result<()> {
            self.calls.lock().unwrap().push("down".to_string());
            *self.running.lock().unwrap() = false;
            Ok(())
        }

        async fn is_running(&self) -> bool {
            *self.running.lock().unwrap()
        }

        async fn logs_follow(&self) -> Result<LogStream> {
            Ok(LogStream::from_reader(&b""[..]))
        }
    }

    struct FailingServices;

    #[async_trait]
    impl SharedServices for FailingServices {
        async fn up(&self, _config_path: &Path, _token: &str) -> Result<()> {
            Err(HermitError::service_control("start", "compose file not found"))
        }

        async fn down(&self) -> Result<()> {
            Ok(())
        }

        async fn is_running(&self) -> bool {
            false
        }

        async fn logs_follow(&self) -> Result<LogStream> {
            Ok(LogStream::from_reader(&b""[..]))
        }
    }

    struct AlwaysReady;

    #[async_trait]
    impl Dependency for AlwaysReady {
        fn name(&self) -> &str {
            "Ready"
        }

        async fn is_ready(&self) -> bool {
            true
        }

        fn launch(&self) {}

        fn policy(&self) -> crate::health::ProbePolicy {
            crate::health::ProbePolicy::new(Duration::from_secs(1))
        }

        fn criticality(&self) -> crate::health::Criticality {
            crate::health::Criticality::Fatal
        }
    }

    fn orchestrator(dir: &Path, services: Arc<RecordingServices>) -> Orchestrator {
        let paths = HermitPaths::new(dir, None);
        Orchestrator::new(paths, Settings::default(), services)
    }

    #[test]
    fn test_state_display() {
        assert_eq!(LifecycleState::ServicesChecked.to_string(), "services-checked");
    }

    #[test]
    fn test_missing_models_key_is_empty_model_list() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hermit.config.yaml"), "aliases: {}\n").unwrap();
        let mut orch = orchestrator(dir.path(), Arc::default());

        let err = orch.load_config().unwrap_err();
        assert!(matches!(err, HermitError::EmptyModelList));
        assert_eq!(orch.state(), LifecycleState::Idle);
    }

    #[test]
    fn test_load_config_writes_routing_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("hermit.config.yaml"),
            "models:\n  - name: kimi\n    provider: openrouter\n    model: moonshotai/kimi-k2\n",
        )
        .unwrap();
        let mut orch = orchestrator(dir.path(), Arc::default());

        let routing = orch.load_config().unwrap();
        assert_eq!(routing.entries.len(), 1);
        assert_eq!(orch.state(), LifecycleState::ConfigLoaded);

        let written = std::fs::read_to_string(dir.path().join(".cache/config.yaml")).unwrap();
        assert!(written.contains("openrouter/moonshotai/kimi-k2"));
    }

    #[tokio::test]
    async fn test_steps_out_of_order_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut orch = orchestrator(dir.path(), Arc::default());

        let err = orch.check_services().await.unwrap_err();
        assert!(matches!(
            err,
            HermitError::InvalidState {
                state: LifecycleState::Idle,
                ..
            }
        ));
        let err = orch.run_client(&[]).await.unwrap_err();
        assert!(matches!(err, HermitError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_cleanup_without_registration_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let services = Arc::new(RecordingServices::default());
        let mut orch = orchestrator(dir.path(), services.clone());

        assert_eq!(orch.cleanup().await, CleanupOutcome::NotRegistered);
        assert_eq!(orch.cleanup().await, CleanupOutcome::NotRegistered);
        assert!(services.calls.lock().unwrap().is_empty());
        assert_eq!(orch.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn test_failed_start_leaves_no_token_or_registration() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("hermit.config.yaml"),
            "models:\n  - name: kimi\n    provider: openrouter\n    model: moonshotai/kimi-k2\n",
        )
        .unwrap();
        let paths = HermitPaths::new(dir.path(), None);
        let mut orch = Orchestrator::new(paths.clone(), Settings::default(), Arc::new(FailingServices))
            .with_dependencies(
                Box::new(AlwaysReady),
                Box::new(AlwaysReady),
                Box::new(AlwaysReady),
            );

        orch.load_config().unwrap();
        let err = orch.check_services().await.unwrap_err();
        assert!(matches!(err, HermitError::ServiceControl { action: "start", .. }));

        assert_eq!(TokenStore::new(&paths.cache_dir).read().unwrap(), None);
        assert!(InstanceRegistry::new(&paths.cache_dir).list().unwrap().is_empty());
        assert_eq!(orch.state(), LifecycleState::ConfigLoaded);
    }

    #[tokio::test]
    async fn test_stop_all_ignores_registered_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let paths = HermitPaths::new(dir.path(), None);
        std::fs::create_dir_all(&paths.cache_dir).unwrap();

        let registry = InstanceRegistry::new(&paths.cache_dir);
        registry.register(&InstanceId::from("other")).unwrap();
        let tokens = TokenStore::new(&paths.cache_dir);
        tokens.get_or_create().unwrap();
        std::fs::write(paths.env_file(), "export X=1\n").unwrap();

        let services = Arc::new(RecordingServices::default());
        *services.running.lock().unwrap() = true;
        let mut orch = orchestrator(dir.path(), services.clone());

        assert!(orch.stop_all().await);
        assert_eq!(*services.calls.lock().unwrap(), vec!["down"]);
        assert!(registry.list().unwrap().is_empty());
        assert_eq!(tokens.read().unwrap(), None);
        assert!(!paths.env_file().exists());
    }
}
