//! Cooperative termination controller.
//!
//! OS signals are funnelled into a [`ShutdownController`]; the orchestrator
//! waits on it alongside the client process. Only the first request counts,
//! later ones are absorbed so cleanup runs exactly once.

use std::sync::{
    atomic::{AtomicU8, Ordering},
    Arc,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const NONE: u8 = 0;
const INTERRUPT: u8 = 1;
const TERMINATE: u8 = 2;

/// Kind of termination that was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Interactive interrupt (SIGINT / Ctrl+C)
    Interrupt,
    /// Termination request (SIGTERM)
    Terminate,
}

impl Termination {
    fn code(self) -> u8 {
        match self {
            Self::Interrupt => INTERRUPT,
            Self::Terminate => TERMINATE,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            INTERRUPT => Some(Self::Interrupt),
            TERMINATE => Some(Self::Terminate),
            _ => None,
        }
    }

    /// Signal to forward to a child process.
    #[cfg(unix)]
    pub fn as_signal(self) -> nix::sys::signal::Signal {
        match self {
            Self::Interrupt => nix::sys::signal::Signal::SIGINT,
            Self::Terminate => nix::sys::signal::Signal::SIGTERM,
        }
    }
}

impl std::fmt::Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Interrupt => write!(f, "interrupt"),
            Self::Terminate => write!(f, "terminate"),
        }
    }
}

/// Idempotent termination trigger shared between the signal listener and
/// the orchestrator.
#[derive(Clone, Debug, Default)]
pub struct ShutdownController {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    requested: AtomicU8,
    token: CancellationToken,
}

impl ShutdownController {
    /// Create a controller with no pending request.
    pub fn new() -> Self {
        Self::default()
    }

    /// The first termination requested, if any.
    pub fn requested(&self) -> Option<Termination> {
        Termination::from_code(self.inner.requested.load(Ordering::SeqCst))
    }

    /// Returns true if termination has been requested.
    pub fn is_shutdown_requested(&self) -> bool {
        self.requested().is_some()
    }

    /// Request termination and wake all waiters.
    ///
    /// Returns `true` for the first request; repeated requests keep the
    /// original kind and return `false`.
    pub fn request(&self, kind: Termination) -> bool {
        let first = self
            .inner
            .requested
            .compare_exchange(NONE, kind.code(), Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();

        if first {
            info!(signal = %kind, "Termination requested");
            self.inner.token.cancel();
        } else {
            debug!(signal = %kind, "Termination already in progress, ignoring");
        }
        first
    }

    /// Wait until termination is requested.
    pub async fn wait(&self) -> Termination {
        self.inner.token.cancelled().await;
        self.requested().unwrap_or(Termination::Interrupt)
    }

    /// Cancellation token that fires on the first request.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.token.clone()
    }
}

/// Install SIGINT/SIGTERM handlers that feed `controller`.
///
/// The returned task runs until the runtime shuts down.
#[cfg(unix)]
pub fn listen(controller: ShutdownController) -> std::io::Result<JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    Ok(tokio::spawn(async move {
        loop {
            let kind = tokio::select! {
                Some(()) = interrupt.recv() => Termination::Interrupt,
                Some(()) = terminate.recv() => Termination::Terminate,
                else => break,
            };
            controller.request(kind);
        }
    }))
}

/// Install a Ctrl+C handler that feeds `controller`.
#[cfg(not(unix))]
pub fn listen(controller: ShutdownController) -> std::io::Result<JoinHandle<()>> {
    Ok(tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            controller.request(Termination::Interrupt);
        }
    }))
}
