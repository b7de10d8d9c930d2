//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Start (supervisor.rs):
//!     parent token → signals::arm → derived token
//!                  → group.rs (spawn main + profiling listener tasks)
//!
//! Shutdown:
//!     SIGTERM/SIGINT, parent cancel or Supervisor::stop
//!         → derived token cancelled → listeners stop accepting
//!         → drain in-flight requests → group.wait() returns
//!         → bridge disarmed → outcome classified
//! ```
//!
//! # Design Decisions
//! - One token per run; every listener shares it
//! - A fatal listener error cancels its siblings
//! - No shutdown deadline: callers bound the drain with their own token
//! - A repeated SIGTERM/SIGINT terminates the process (escape hatch for a
//!   stuck drain), and so does any signal once no bridge is armed

pub mod group;
#[cfg(unix)]
mod os_default;
pub mod signals;

pub use group::TaskGroup;
pub use signals::{arm, BridgeGuard, ShutdownSignal, SignalHandling, SignalInjector};
