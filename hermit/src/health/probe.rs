//! 起動待ちの汎用ポーリング
//!
//! 依存サービスが到達可能になるまで、上限付きでポーリングする。
//! すでに到達可能な場合は起動処理を一切呼ばない。

use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// デフォルトのポーリング間隔（秒）
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 1;

/// ポーリング方針
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbePolicy {
    /// 起動処理から諦めるまでの時間
    pub timeout: Duration,
    /// チェック間隔
    pub interval: Duration,
}

impl ProbePolicy {
    /// 1秒間隔のポーリング方針を作成
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
        }
    }

    /// チェック間隔を設定
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

/// ポーリング結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// 最初のチェックで到達可能だった（起動処理は呼んでいない）
    AlreadyRunning,
    /// 起動処理の後に到達可能になった
    Started,
    /// タイムアウト
    TimedOut,
    /// キャンセルされた
    Cancelled,
}

impl Readiness {
    /// 到達可能になったか
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::AlreadyRunning | Self::Started)
    }
}

/// 依存サービスの起動を保証する
///
/// 1. `check` が真なら即座に [`Readiness::AlreadyRunning`] を返す
/// 2. そうでなければ `launch` をちょうど1回呼ぶ（結果は見ない）
/// 3. `policy.interval` ごとに `check` を呼び、真になれば [`Readiness::Started`]
/// 4. `policy.timeout` が経過したら [`Readiness::TimedOut`]
///
/// `cancel` がキャンセルされると待機を打ち切って [`Readiness::Cancelled`] を返す。
/// タイムアウトは `policy.timeout` より前には返らない。
pub async fn ensure<C, F, L>(
    mut check: C,
    launch: L,
    policy: ProbePolicy,
    cancel: &CancellationToken,
) -> Readiness
where
    C: FnMut() -> F,
    F: Future<Output = bool>,
    L: FnOnce(),
{
    if check().await {
        return Readiness::AlreadyRunning;
    }

    launch();

    let started = Instant::now();
    let deadline = started + policy.timeout;

    loop {
        let now = Instant::now();
        if now >= deadline {
            debug!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Readiness probe timed out"
            );
            return Readiness::TimedOut;
        }

        let wait = policy.interval.min(deadline - now);
        tokio::select! {
            _ = cancel.cancelled() => return Readiness::Cancelled,
            _ = sleep(wait) => {}
        }

        if check().await {
            trace!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Readiness probe succeeded"
            );
            return Readiness::Started;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_already_ready_never_launches() {
        let launches = AtomicUsize::new(0);
        let cancel = CancellationToken::new();
        let start = Instant::now();

        let result = ensure(
            || async { true },
            || {
                launches.fetch_add(1, Ordering::SeqCst);
            },
            ProbePolicy::new(Duration::from_secs(30)),
            &cancel,
        )
        .await;

        assert_eq!(result, Readiness::AlreadyRunning);
        assert_eq!(launches.load(Ordering::SeqCst), 0);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_ready_times_out_after_launching_once() {
        let launches = AtomicUsize::new(0);
        let checks = AtomicUsize::new(0);
        let cancel = CancellationToken::new();
        let timeout = Duration::from_secs(5);
        let start = Instant::now();

        let result = ensure(
            || {
                checks.fetch_add(1, Ordering::SeqCst);
                async { false }
            },
            || {
                launches.fetch_add(1, Ordering::SeqCst);
            },
            ProbePolicy::new(timeout),
            &cancel,
        )
        .await;

        let elapsed = start.elapsed();
        assert_eq!(result, Readiness::TimedOut);
        assert_eq!(launches.load(Ordering::SeqCst), 1);
        assert!(elapsed >= timeout, "returned early: {:?}", elapsed);
        assert!(elapsed <= timeout + Duration::from_secs(1), "returned late: {:?}", elapsed);
        // 初回 + 1秒ごと5回
        assert_eq!(checks.load(Ordering::SeqCst), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_becomes_ready_after_launch() {
        let checks = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();
        let start = Instant::now();

        let counter = checks.clone();
        let result = ensure(
            move || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move { n >= 3 }
            },
            || {},
            ProbePolicy::new(Duration::from_secs(60)),
            &cancel,
        )
        .await;

        assert_eq!(result, Readiness::Started);
        assert!(result.is_ready());
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_polling() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(2500)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let result = ensure(
            || async { false },
            || {},
            ProbePolicy::new(Duration::from_secs(60)),
            &cancel,
        )
        .await;

        assert_eq!(result, Readiness::Cancelled);
        assert!(!result.is_ready());
        assert!(start.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_timeout_checks_once_after_launch() {
        let launches = AtomicUsize::new(0);
        let cancel = CancellationToken::new();

        let result = ensure(
            || async { false },
            || {
                launches.fetch_add(1, Ordering::SeqCst);
            },
            ProbePolicy::new(Duration::ZERO),
            &cancel,
        )
        .await;

        assert_eq!(result, Readiness::TimedOut);
        assert_eq!(launches.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_policy_defaults_to_one_second_interval() {
        let policy = ProbePolicy::new(Duration::from_secs(10));
        assert_eq!(policy.interval, Duration::from_secs(1));
        let policy = policy.with_interval(Duration::from_millis(200));
        assert_eq!(policy.interval, Duration::from_millis(200));
    }
}
