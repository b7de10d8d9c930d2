//! Default disposition of SIGINT/SIGTERM outside an armed bridge.
//!
//! Tokio's handlers stay installed for the life of the process, so without
//! help a signal arriving after disarm would be recorded and dropped. A
//! conditional-default action is registered next to Tokio's: while at least
//! one OS bridge is armed it does nothing, otherwise it performs the
//! signal's default action (terminate).

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use signal_hook::consts::{SIGINT, SIGTERM};

use super::signals::ShutdownSignal;

struct Defaults {
    armed: usize,
    interrupt: Arc<AtomicBool>,
    terminate: Arc<AtomicBool>,
}

impl Defaults {
    fn register() -> io::Result<Self> {
        let interrupt = Arc::new(AtomicBool::new(true));
        let terminate = Arc::new(AtomicBool::new(true));
        signal_hook::flag::register_conditional_default(SIGINT, Arc::clone(&interrupt))?;
        signal_hook::flag::register_conditional_default(SIGTERM, Arc::clone(&terminate))?;
        Ok(Self {
            armed: 0,
            interrupt,
            terminate,
        })
    }

    fn flag(&self, signal: ShutdownSignal) -> &AtomicBool {
        match signal {
            ShutdownSignal::Interrupt => &self.interrupt,
            ShutdownSignal::Terminate => &self.terminate,
        }
    }

    fn set_all(&self, default_action: bool) {
        self.interrupt.store(default_action, Ordering::SeqCst);
        self.terminate.store(default_action, Ordering::SeqCst);
    }
}

static DEFAULTS: Mutex<Option<Defaults>> = Mutex::new(None);

fn lock() -> std::sync::MutexGuard<'static, Option<Defaults>> {
    DEFAULTS.lock().unwrap_or_else(|e| e.into_inner())
}

/// Held by every armed OS bridge. The default actions come back when the
/// last one is dropped.
pub(super) struct Suspended {
    _private: (),
}

/// Suppress the default actions until the returned guard is dropped.
pub(super) fn suspend() -> io::Result<Suspended> {
    let mut defaults = lock();
    if defaults.is_none() {
        *defaults = Some(Defaults::register()?);
    }
    if let Some(defaults) = defaults.as_mut() {
        defaults.armed += 1;
        defaults.set_all(false);
    }
    Ok(Suspended { _private: () })
}

/// Let the next `signal` take its default action even while armed.
pub(super) fn restore(signal: ShutdownSignal) {
    if let Some(defaults) = lock().as_ref() {
        defaults.flag(signal).store(true, Ordering::SeqCst);
    }
}

/// Whether `signal` currently gets its default action.
#[cfg(test)]
pub(super) fn is_default(signal: ShutdownSignal) -> bool {
    lock()
        .as_ref()
        .map_or(true, |defaults| defaults.flag(signal).load(Ordering::SeqCst))
}

impl Drop for Suspended {
    fn drop(&mut self) {
        if let Some(defaults) = lock().as_mut() {
            defaults.armed = defaults.armed.saturating_sub(1);
            if defaults.armed == 0 {
                defaults.set_all(true);
            }
        }
    }
}
