//! OS signal handling: the cancellation bridge.
//!
//! # Responsibilities
//! - Register interest in SIGINT/SIGTERM once, when a run is armed
//! - Translate the first signal into cancellation of the run token
//! - Let a repeat of that signal fall through to process termination
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - Disarming never cancels the token; it only stops listening
//! - A synthetic source ([`SignalInjector`]) stands in for the OS in tests
//! - Tokio keeps its OS handler installed for the life of the process, so a
//!   conditional default action (`signal-hook`) is registered beside it:
//!   active whenever no bridge is armed, and for the signal that already
//!   started a drain

use std::io;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::instrument::WithSubscriber;

/// A termination request recognised by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
}

impl ShutdownSignal {
    pub fn name(&self) -> &'static str {
        match self {
            ShutdownSignal::Interrupt => "SIGINT",
            ShutdownSignal::Terminate => "SIGTERM",
        }
    }

    /// POSIX signal number.
    pub fn number(&self) -> i32 {
        match self {
            ShutdownSignal::Interrupt => 2,
            ShutdownSignal::Terminate => 15,
        }
    }
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Where a bridge takes its signals from.
#[derive(Clone, Debug, Default)]
pub enum SignalHandling {
    /// Real process signals.
    #[default]
    Os,
    /// Never fires; shutdown only through tokens or `stop()`.
    Disabled,
    /// Signals raised by hand through a [`SignalInjector`].
    Injected(SignalInjector),
}

/// Synthetic signal source.
///
/// Fall-through of a repeated signal is recorded instead of exiting.
#[derive(Clone, Debug)]
pub struct SignalInjector {
    tx: broadcast::Sender<ShutdownSignal>,
    fallen_through: Arc<Mutex<Vec<ShutdownSignal>>>,
}

impl SignalInjector {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(16);
        Self {
            tx,
            fallen_through: Arc::default(),
        }
    }

    /// Deliver `signal` to every armed bridge. Returns false if none is armed.
    pub fn raise(&self, signal: ShutdownSignal) -> bool {
        self.tx.send(signal).is_ok()
    }

    pub fn is_armed(&self) -> bool {
        self.tx.receiver_count() > 0
    }

    /// Signals that would have terminated a real process.
    pub fn fall_throughs(&self) -> Vec<ShutdownSignal> {
        self.fallen_through
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Default for SignalInjector {
    fn default() -> Self {
        Self::new()
    }
}

enum Source {
    Os(OsSignals),
    Injected {
        rx: broadcast::Receiver<ShutdownSignal>,
        fallen_through: Arc<Mutex<Vec<ShutdownSignal>>>,
    },
    Disabled,
}

impl Source {
    fn register(handling: &SignalHandling) -> io::Result<Self> {
        Ok(match handling {
            SignalHandling::Os => Source::Os(OsSignals::register()?),
            SignalHandling::Disabled => Source::Disabled,
            SignalHandling::Injected(injector) => Source::Injected {
                rx: injector.tx.subscribe(),
                fallen_through: injector.fallen_through.clone(),
            },
        })
    }

    /// Next signal, or `None` once the source can never fire again.
    async fn recv(&mut self) -> Option<ShutdownSignal> {
        match self {
            Source::Os(os) => os.recv().await,
            Source::Injected { rx, .. } => loop {
                match rx.recv().await {
                    Ok(signal) => return Some(signal),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            },
            Source::Disabled => std::future::pending().await,
        }
    }

    /// A drain has started; a repeat of `signal` must now terminate.
    fn draining(&self, signal: ShutdownSignal) {
        if let Source::Os(os) = self {
            os.restore_default(signal);
        }
    }

    fn fall_through(&self, signal: ShutdownSignal) {
        match self {
            Source::Os(_) => {
                tracing::warn!(signal = %signal, "Repeated signal, terminating immediately");
                std::process::exit(128 + signal.number());
            }
            Source::Injected { fallen_through, .. } => {
                tracing::warn!(signal = %signal, "Repeated signal falls through");
                fallen_through
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .push(signal);
            }
            Source::Disabled => {}
        }
    }
}

#[cfg(unix)]
struct OsSignals {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
    _defaults: super::os_default::Suspended,
}

#[cfg(unix)]
impl OsSignals {
    fn register() -> io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        let defaults = super::os_default::suspend()?;
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            _defaults: defaults,
        })
    }

    fn restore_default(&self, signal: ShutdownSignal) {
        super::os_default::restore(signal);
    }

    async fn recv(&mut self) -> Option<ShutdownSignal> {
        tokio::select! {
            Some(()) = self.interrupt.recv() => Some(ShutdownSignal::Interrupt),
            Some(()) = self.terminate.recv() => Some(ShutdownSignal::Terminate),
            else => None,
        }
    }
}

#[cfg(not(unix))]
struct OsSignals;

#[cfg(not(unix))]
impl OsSignals {
    fn register() -> io::Result<Self> {
        Ok(Self)
    }

    fn restore_default(&self, _signal: ShutdownSignal) {}

    async fn recv(&mut self) -> Option<ShutdownSignal> {
        tokio::signal::ctrl_c().await.ok()?;
        Some(ShutdownSignal::Interrupt)
    }
}

/// Keeps an armed bridge listening. Dropping it disarms without waiting.
#[must_use = "dropping the guard disarms the bridge"]
pub struct BridgeGuard {
    disarm: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl BridgeGuard {
    /// Stop listening for signals. Leaves the derived token untouched.
    ///
    /// Returns once the signal streams have been released.
    pub async fn disarm(mut self) {
        self.disarm.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for BridgeGuard {
    fn drop(&mut self) {
        self.disarm.cancel();
    }
}

/// Derive a child of `parent` that is also cancelled by the first signal.
///
/// Must be called from within a Tokio runtime.
pub fn arm(
    parent: &CancellationToken,
    handling: &SignalHandling,
) -> io::Result<(CancellationToken, BridgeGuard)> {
    let derived = parent.child_token();
    let source = Source::register(handling)?;
    let disarm = CancellationToken::new();

    let task = tokio::spawn(
        bridge(source, derived.clone(), disarm.clone()).with_current_subscriber(),
    );

    Ok((
        derived,
        BridgeGuard {
            disarm,
            task: Some(task),
        },
    ))
}

async fn bridge(mut source: Source, derived: CancellationToken, disarm: CancellationToken) {
    let first = tokio::select! {
        biased;
        _ = disarm.cancelled() => return,
        signal = source.recv() => match signal {
            Some(signal) => signal,
            None => return,
        },
    };

    tracing::info!(
        signal = %first,
        "Shutdown signal received, draining; repeat it to exit immediately"
    );
    derived.cancel();
    source.draining(first);

    loop {
        let next = tokio::select! {
            biased;
            _ = disarm.cancelled() => return,
            signal = source.recv() => match signal {
                Some(signal) => signal,
                None => return,
            },
        };

        if next == first {
            source.fall_through(next);
            return;
        }
        tracing::debug!(signal = %next, "Ignoring signal while draining");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn eventually(mut check: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn first_signal_cancels_derived_only() {
        let injector = SignalInjector::new();
        let parent = CancellationToken::new();
        let (derived, guard) = arm(&parent, &SignalHandling::Injected(injector.clone())).unwrap();

        assert!(injector.is_armed());
        assert!(injector.raise(ShutdownSignal::Terminate));

        tokio::time::timeout(Duration::from_secs(5), derived.cancelled())
            .await
            .unwrap();
        assert!(!parent.is_cancelled());
        assert!(injector.fall_throughs().is_empty());

        guard.disarm().await;
    }

    #[tokio::test]
    async fn repeated_signal_falls_through_other_kind_is_ignored() {
        let injector = SignalInjector::new();
        let (derived, guard) = arm(
            &CancellationToken::new(),
            &SignalHandling::Injected(injector.clone()),
        )
        .unwrap();

        injector.raise(ShutdownSignal::Interrupt);
        derived.cancelled().await;

        injector.raise(ShutdownSignal::Terminate);
        injector.raise(ShutdownSignal::Interrupt);
        eventually(|| !injector.fall_throughs().is_empty()).await;

        assert_eq!(injector.fall_throughs(), vec![ShutdownSignal::Interrupt]);
        // The bridge stopped listening after falling through.
        eventually(|| !injector.is_armed()).await;
        drop(guard);
    }

    #[tokio::test]
    async fn disarm_releases_interest_without_cancelling() {
        let injector = SignalInjector::new();
        let (derived, guard) = arm(
            &CancellationToken::new(),
            &SignalHandling::Injected(injector.clone()),
        )
        .unwrap();

        guard.disarm().await;

        assert!(!injector.is_armed());
        assert!(!injector.raise(ShutdownSignal::Interrupt));
        assert!(!derived.is_cancelled());
    }

    #[tokio::test]
    async fn parent_cancellation_propagates() {
        let parent = CancellationToken::new();
        let (derived, guard) = arm(&parent, &SignalHandling::Disabled).unwrap();

        parent.cancel();
        assert!(derived.is_cancelled());
        guard.disarm().await;
    }

    #[tokio::test]
    async fn dropping_guard_disarms() {
        let injector = SignalInjector::new();
        let (_derived, guard) = arm(
            &CancellationToken::new(),
            &SignalHandling::Injected(injector.clone()),
        )
        .unwrap();

        drop(guard);
        eventually(|| !injector.is_armed()).await;
    }

    #[cfg(unix)]
    #[test]
    fn os_bridge_cancels_then_hands_signals_back() {
        use std::os::unix::process::ExitStatusExt;
        use std::process::{Command, Stdio};

        const CHILD: &str = "SERVISOR_OS_SIGNAL_CHILD";
        const NAME: &str = "lifecycle::signals::tests::os_bridge_cancels_then_hands_signals_back";

        if std::env::var_os(CHILD).is_some() {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let cancelled = runtime.block_on(async {
                let (derived, guard) = arm(&CancellationToken::new(), &SignalHandling::Os).unwrap();
                assert!(!super::super::os_default::is_default(ShutdownSignal::Terminate));

                signal_hook::low_level::raise(signal_hook::consts::SIGINT).unwrap();
                let cancelled = tokio::time::timeout(Duration::from_secs(5), derived.cancelled())
                    .await
                    .is_ok();
                guard.disarm().await;
                cancelled
            });
            if !cancelled {
                std::process::exit(3);
            }
            // Disarmed: SIGTERM must terminate the process again.
            signal_hook::low_level::raise(signal_hook::consts::SIGTERM).unwrap();
            std::thread::sleep(Duration::from_secs(5));
            std::process::exit(4);
        }

        let status = Command::new(std::env::current_exe().unwrap())
            .args(["--exact", NAME, "--test-threads=1", "--nocapture"])
            .env(CHILD, "1")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .unwrap();
        assert_eq!(
            status.signal(),
            Some(signal_hook::consts::SIGTERM),
            "child exited with {status:?}"
        );
    }

    #[test]
    fn signal_numbers_match_posix() {
        assert_eq!(ShutdownSignal::Interrupt.number(), 2);
        assert_eq!(ShutdownSignal::Terminate.number(), 15);
        assert_eq!(ShutdownSignal::Terminate.to_string(), "SIGTERM");
    }
}
