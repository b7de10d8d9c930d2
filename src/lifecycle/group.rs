//! Task group: run listener tasks side by side under one token.
//!
//! # Rules
//! - Every task gets a clone of the group token
//! - The first non-benign failure (a panic included) cancels the token so
//!   siblings drain
//! - `wait` returns only after every task has returned
//! - Outcome is a non-benign error that was not caused by the group's own
//!   cancellation: a failure counts as independent when the poll that
//!   produced it started before the token was cancelled
//! - Among independent failures the lowest spawn index wins, so two
//!   listeners failing in the same instant always report the same one
//! - With no independent failure, the first one recorded wins

use std::future::{poll_fn, Future};
use std::panic::AssertUnwindSafe;
use std::pin::pin;
use std::sync::{Arc, Mutex};

use futures_util::FutureExt;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::instrument::WithSubscriber;

use crate::net::listener::ServeError;

struct Failure {
    index: usize,
    independent: bool,
    error: ServeError,
}

impl Failure {
    fn outranks(&self, held: &Failure) -> bool {
        self.independent && (!held.independent || self.index < held.index)
    }
}

/// Latch that keeps the failure reported as the group outcome.
#[derive(Default)]
struct FirstError {
    slot: Mutex<Option<Failure>>,
}

impl FirstError {
    fn offer(&self, failure: Failure) -> bool {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        let replace = match slot.as_ref() {
            None => true,
            Some(held) => failure.outranks(held),
        };
        if replace {
            *slot = Some(failure);
        }
        replace
    }

    fn take(&self) -> Option<ServeError> {
        self.slot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .map(|failure| failure.error)
    }
}

/// A fixed set of concurrently running tasks with one aggregated outcome.
pub struct TaskGroup {
    token: CancellationToken,
    tasks: JoinSet<()>,
    spawned: usize,
    first_error: Arc<FirstError>,
}

impl TaskGroup {
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            tasks: JoinSet::new(),
            spawned: 0,
            first_error: Arc::default(),
        }
    }

    /// The token shared by every task in the group.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Start `task` immediately with a clone of the group token.
    pub fn spawn<F, Fut>(&mut self, name: impl Into<String>, task: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<(), ServeError>> + Send + 'static,
    {
        let name = name.into();
        let index = self.spawned;
        self.spawned += 1;
        let token = self.token.clone();
        let first_error = self.first_error.clone();
        let fut = task(token.clone());

        self.tasks.spawn(
            async move {
                let mut fut = pin!(AssertUnwindSafe(fut).catch_unwind());
                let (caught, independent) = poll_fn(|cx| {
                    let independent = !token.is_cancelled();
                    fut.as_mut().poll(cx).map(|caught| (caught, independent))
                })
                .await;
                let outcome = match caught {
                    Ok(outcome) => outcome,
                    Err(_) => Err(ServeError::Panicked {
                        listener: name.clone(),
                    }),
                };

                match outcome {
                    Ok(()) => tracing::debug!(task = %name, "Task finished"),
                    Err(err) if err.is_benign() => {
                        tracing::debug!(task = %name, reason = err.as_label(), "Task stopped");
                    }
                    Err(err) => {
                        tracing::error!(
                            task = %name,
                            error = %err,
                            "Task failed, cancelling siblings"
                        );
                        first_error.offer(Failure {
                            index,
                            independent,
                            error: err,
                        });
                        token.cancel();
                    }
                }
            }
            .with_current_subscriber(),
        );
    }

    /// Wait for every task and return the group outcome.
    pub async fn wait(mut self) -> Result<(), ServeError> {
        while let Some(joined) = self.tasks.join_next().await {
            // Panics are caught inside each task, so a join error means the
            // runtime is shutting down underneath us.
            if let Err(err) = joined {
                tracing::warn!(error = %err, "Task aborted");
                self.token.cancel();
            }
        }

        match self.first_error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::time::Duration;

    async fn until_cancelled(token: CancellationToken, name: &str) -> Result<(), ServeError> {
        token.cancelled().await;
        Err(ServeError::Closed {
            listener: name.to_string(),
        })
    }

    #[tokio::test]
    async fn all_benign_is_ok() {
        let token = CancellationToken::new();
        let mut group = TaskGroup::new(token.clone());
        group.spawn("a", |t| until_cancelled(t, "a"));
        group.spawn("b", |t| until_cancelled(t, "b"));
        group.spawn("c", |_| async { Ok(()) });
        assert_eq!(group.len(), 3);

        token.cancel();
        assert!(group.wait().await.is_ok());
    }

    #[tokio::test]
    async fn fatal_error_cancels_siblings() {
        let token = CancellationToken::new();
        let mut group = TaskGroup::new(token.clone());
        let sibling = token.clone();

        group.spawn("long", |t| until_cancelled(t, "long"));
        group.spawn("broken", |_| async {
            Err(ServeError::Io {
                listener: "broken".into(),
                source: io::Error::other("boom"),
            })
        });

        let outcome = tokio::time::timeout(Duration::from_secs(5), group.wait())
            .await
            .expect("siblings should drain");
        match outcome {
            Err(ServeError::Io { listener, .. }) => assert_eq!(listener, "broken"),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(sibling.is_cancelled());
    }

    #[tokio::test]
    async fn first_fatal_error_wins() {
        let token = CancellationToken::new();
        let mut group = TaskGroup::new(token.clone());

        group.spawn("first", |_| async {
            Err(ServeError::Io {
                listener: "first".into(),
                source: io::Error::other("first"),
            })
        });
        group.spawn("second", |t| async move {
            t.cancelled().await;
            Err(ServeError::Io {
                listener: "second".into(),
                source: io::Error::other("second"),
            })
        });

        match group.wait().await {
            Err(ServeError::Io { listener, .. }) => assert_eq!(listener, "first"),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    fn io_failure(listener: &str) -> ServeError {
        ServeError::Io {
            listener: listener.into(),
            source: io::Error::other("bind"),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn simultaneous_failures_report_lowest_spawn_index() {
        // Both failures happen inside polls that began before either task
        // cancelled the token, whichever reaches the latch first.
        for _ in 0..10 {
            let together = Arc::new(std::sync::Barrier::new(2));
            let mut group = TaskGroup::new(CancellationToken::new());
            for name in ["main", "profiling"] {
                let together = together.clone();
                group.spawn(name, move |_| async move {
                    together.wait();
                    Err(io_failure(name))
                });
            }

            let outcome = tokio::time::timeout(Duration::from_secs(5), group.wait())
                .await
                .expect("group should finish");
            match outcome {
                Err(ServeError::Io { listener, .. }) => assert_eq!(listener, "main"),
                other => panic!("unexpected outcome {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn failure_caused_by_cancellation_does_not_win() {
        let token = CancellationToken::new();
        let mut group = TaskGroup::new(token.clone());

        group.spawn("main", |t| async move {
            t.cancelled().await;
            Err(io_failure("main"))
        });
        group.spawn("profiling", |_| async {
            tokio::task::yield_now().await;
            Err(io_failure("profiling"))
        });

        match group.wait().await {
            Err(ServeError::Io { listener, .. }) => assert_eq!(listener, "profiling"),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn panic_is_reported_and_cancels_siblings() {
        let token = CancellationToken::new();
        let mut group = TaskGroup::new(token.clone());

        group.spawn("steady", |t| until_cancelled(t, "steady"));
        group.spawn("explodes", |_| async {
            let exploded = true;
            assert!(!exploded, "kaboom");
            Ok(())
        });

        match group.wait().await {
            Err(ServeError::Panicked { listener }) => assert_eq!(listener, "explodes"),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(token.is_cancelled());
    }

    #[test]
    fn latch_ranks_independent_failures_by_index() {
        let failure = |index, independent, listener: &str| Failure {
            index,
            independent,
            error: ServeError::Panicked {
                listener: listener.into(),
            },
        };

        let latch = FirstError::default();
        assert!(latch.offer(failure(1, false, "dependent")));
        assert!(!latch.offer(failure(0, false, "second dependent")));
        assert!(latch.offer(failure(2, true, "independent")));
        assert!(latch.offer(failure(0, true, "lowest")));
        assert!(!latch.offer(failure(1, true, "higher")));
        assert!(matches!(
            latch.take(),
            Some(ServeError::Panicked { listener }) if listener == "lowest"
        ));
        assert!(latch.take().is_none());
    }

    #[tokio::test]
    async fn empty_group_completes() {
        let group = TaskGroup::new(CancellationToken::new());
        assert!(group.is_empty());
        assert!(group.wait().await.is_ok());
    }
}
