//! Shared utilities for integration tests.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use servisor::lifecycle::SignalHandling;
use servisor::{Listening, Supervisor, SupervisorConfig, SupervisorError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Upper bound for anything a test waits on.
pub const PATIENCE: Duration = Duration::from_secs(5);

/// A supervisor on `address` that ignores process signals.
pub fn supervisor(address: &str) -> Arc<Supervisor> {
    Arc::new(Supervisor::new(
        SupervisorConfig::new(address).with_signals(SignalHandling::Disabled),
    ))
}

/// Run `start` in the background.
pub fn spawn_start(
    supervisor: &Arc<Supervisor>,
    token: &CancellationToken,
) -> JoinHandle<Result<(), SupervisorError>> {
    let supervisor = Arc::clone(supervisor);
    let token = token.clone();
    tokio::spawn(async move { supervisor.start(&token).await })
}

/// Wait until `ready` holds for the bound addresses.
pub async fn wait_listening(
    supervisor: &Supervisor,
    ready: impl FnMut(&Listening) -> bool,
) -> Listening {
    let mut listening = supervisor.listening();
    let bound = tokio::time::timeout(PATIENCE, listening.wait_for(ready))
        .await
        .expect("listeners never came up")
        .expect("supervisor dropped");
    *bound
}

/// Wait for a background `start` to return.
pub async fn finish(
    run: JoinHandle<Result<(), SupervisorError>>,
) -> Result<(), SupervisorError> {
    tokio::time::timeout(PATIENCE, run)
        .await
        .expect("start did not return")
        .expect("start panicked")
}

/// Loopback address with the port of `addr` (listeners may bind 0.0.0.0).
pub fn loopback(addr: SocketAddr) -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, addr.port()))
}

/// Non-pooled client so a drained listener is not kept alive by idle connections.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .timeout(PATIENCE)
        .build()
        .unwrap()
}

/// True when nothing accepts connections on `addr`.
#[allow(dead_code)]
pub async fn unreachable(addr: SocketAddr) -> bool {
    tokio::net::TcpStream::connect(addr).await.is_err()
}
