pub(crate) mod builder;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{sleep, Instant};

use crate::connection::Connection;
use crate::source::ProcessSource;
use crate::ConnectionCallback;

/// Default total budget for one acquisition cycle: 20 minutes.
pub const DEFAULT_MAX_TOTAL_WAIT: Duration = Duration::from_secs(20 * 60);
/// Default minimum interval between spawn attempts.
pub const DEFAULT_MIN_ATTEMPT_INTERVAL: Duration = Duration::from_secs(1);
/// Default minimum lifetime below which a terminated connection counts as
/// unhealthy.
pub const DEFAULT_HEALTH_THRESHOLD: Duration = Duration::from_secs(10);
/// Default number of consecutive unhealthy connections after which the
/// watcher gives up.
pub const DEFAULT_MAX_UNHEALTHY_STREAK: u32 = 20;

/// Terminal reasons for which the watcher permanently stops supervising.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum GiveUpError {
    /// The total wait budget elapsed without obtaining a process handle.
    #[error("no worker process obtained within the total wait budget")]
    AcquisitionTimeout,
    /// Too many consecutive connections died before the health threshold.
    #[error("{streak} consecutive connections died before the health threshold")]
    UnhealthyCrashLoop { streak: u32 },
}

/// Externally observable watcher state.
///
/// `GaveUp` and `Disposed` are terminal: once reached, no further acquisition
/// attempt is started and the callback is never invoked again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherStatus {
    Idle,
    Acquiring,
    Connected,
    GaveUp(GiveUpError),
    Disposed,
}

impl WatcherStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::GaveUp(_) | Self::Disposed)
    }
}

impl std::fmt::Display for WatcherStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Acquiring => write!(f, "acquiring"),
            Self::Connected => write!(f, "connected"),
            Self::GaveUp(err) => write!(f, "gave up: {err}"),
            Self::Disposed => write!(f, "disposed"),
        }
    }
}

/// Retry, timeout, and health policy for one watcher.
#[derive(Debug, Clone, Copy)]
pub(crate) struct WatcherPolicy {
    pub(crate) max_total_wait: Duration,
    pub(crate) min_attempt_interval: Duration,
    pub(crate) health_threshold: Duration,
    pub(crate) max_unhealthy_streak: u32,
}

struct ActiveConnection<C> {
    connection: C,
    connected_at: Instant,
}

struct State<C> {
    current: Option<ActiveConnection<C>>,
    unhealthy_streak: u32,
    started: bool,
    disposed: bool,
}

struct Inner<S: ProcessSource, C: Connection> {
    source: S,
    factory: Box<dyn Fn(S::Handle) -> C + Send + Sync>,
    callback: Mutex<ConnectionCallback<C>>,
    policy: WatcherPolicy,
    state: Mutex<State<C>>,
    status_tx: watch::Sender<WatcherStatus>,
}

/// Supervises a long-lived connection to an external worker process.
///
/// The watcher repeatedly requests a process handle from its
/// [`ProcessSource`], wraps it into a [`Connection`], hands the connection to
/// the caller-supplied callback, and re-acquires when the connection
/// terminates. Attempts are throttled to the minimum interval and bounded by
/// the total wait budget; a streak of short-lived connections trips the
/// crash-loop breaker. Both give-up paths are permanent.
///
/// Cloning yields another handle to the same watcher. Dropping all handles
/// does not stop supervision; call [`dispose`](Watcher::dispose).
pub struct Watcher<S: ProcessSource, C: Connection> {
    inner: Arc<Inner<S, C>>,
}

impl<S: ProcessSource, C: Connection> Clone for Watcher<S, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: ProcessSource, C: Connection> Watcher<S, C> {
    pub(crate) fn from_builder(
        source: S,
        callback: ConnectionCallback<C>,
        factory: Box<dyn Fn(S::Handle) -> C + Send + Sync>,
        policy: WatcherPolicy,
    ) -> Self {
        let (status_tx, _) = watch::channel(WatcherStatus::Idle);
        Self {
            inner: Arc::new(Inner {
                source,
                factory,
                callback: Mutex::new(callback),
                policy,
                state: Mutex::new(State {
                    current: None,
                    unhealthy_streak: 0,
                    started: false,
                    disposed: false,
                }),
                status_tx,
            }),
        }
    }

    /// Starts supervision, resolving once the first acquisition cycle has
    /// concluded: a connection was obtained, or the watcher gave up.
    ///
    /// Idempotent — a second call resolves immediately without starting a
    /// concurrent cycle. Supervision itself continues in the background
    /// across connection deaths until a terminal state is reached.
    pub async fn start(&self) {
        {
            let mut state = self.inner.state();
            if state.started || state.disposed {
                return;
            }
            state.started = true;
        }
        Inner::run_cycle(&self.inner).await;
    }

    /// Permanently stops supervision, tearing down the current connection if
    /// any. Idempotent.
    ///
    /// An acquisition attempt already waiting on the source is not cancelled;
    /// its result is discarded and released as soon as it is observed, so the
    /// source's spawn attempt may keep running briefly after this returns. A
    /// callback invocation already in flight may likewise complete
    /// concurrently; no new invocation is started afterwards.
    pub fn dispose(&self) {
        let current = {
            let mut state = self.inner.state();
            if state.disposed {
                return;
            }
            state.disposed = true;
            state.current.take()
        };
        if let Some(mut active) = current {
            active.connection.dispose();
        }
        self.inner.status_tx.send_replace(WatcherStatus::Disposed);
        tracing::debug!("watcher disposed");
    }

    /// Current status snapshot.
    pub fn status(&self) -> WatcherStatus {
        *self.inner.status_tx.borrow()
    }

    /// Watch channel following status transitions, including the terminal
    /// `GaveUp` and `Disposed` states.
    pub fn subscribe_status(&self) -> watch::Receiver<WatcherStatus> {
        self.inner.status_tx.subscribe()
    }

    /// Number of consecutive connections that died before the health
    /// threshold since the last healthy one.
    pub fn unhealthy_streak(&self) -> u32 {
        self.inner.state().unhealthy_streak
    }
}

impl<S: ProcessSource, C: Connection> Inner<S, C> {
    fn state(&self) -> MutexGuard<'_, State<C>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn invoke_callback(&self, connection: Option<&C>) {
        let mut callback = self.callback.lock().unwrap_or_else(PoisonError::into_inner);
        (callback)(connection);
    }

    fn set_status(&self, status: WatcherStatus) {
        self.status_tx.send_if_modified(|current| {
            // Disposal wins over any transition still in flight.
            if matches!(current, WatcherStatus::Disposed) || *current == status {
                return false;
            }
            *current = status;
            true
        });
    }

    /// One acquisition cycle: retry until a handle is obtained or the total
    /// wait budget runs out, then install the connection and subscribe to its
    /// termination.
    ///
    /// Boxed to break the `run_cycle` / `on_terminated` recursion for the
    /// compiler's `Send` inference.
    fn run_cycle(
        inner: &Arc<Self>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            inner.set_status(WatcherStatus::Acquiring);
            let deadline = Instant::now() + inner.policy.max_total_wait;
    
            let handle = loop {
                let attempt_started = Instant::now();
                let handle = inner.source.acquire().await;
                if inner.state().disposed {
                    // Abandon anything obtained after dispose() was requested.
                    if let Some(handle) = handle {
                        let mut orphan = (inner.factory)(handle);
                        orphan.dispose();
                    }
                    return;
                }
                match handle {
                    Some(handle) => break Some(handle),
                    None if Instant::now() >= deadline => break None,
                    None => {
                        tracing::debug!("spawn attempt yielded no process, retrying");
                        let elapsed = attempt_started.elapsed();
                        if let Some(wait) = inner.policy.min_attempt_interval.checked_sub(elapsed) {
                            sleep(wait).await;
                        }
                    }
                }
            };
    
            let Some(handle) = handle else {
                tracing::warn!(
                    budget = ?inner.policy.max_total_wait,
                    "gave up acquiring a worker process"
                );
                inner.set_status(WatcherStatus::GaveUp(GiveUpError::AcquisitionTimeout));
                return;
            };
    
            let mut connection = (inner.factory)(handle);
            let terminated = connection.terminated();
            let connected_at = Instant::now();
            tracing::info!("worker connection established");
    
            inner.invoke_callback(Some(&connection));
    
            {
                let mut state = inner.state();
                if state.disposed {
                    drop(state);
                    connection.dispose();
                    return;
                }
                state.current = Some(ActiveConnection {
                    connection,
                    connected_at,
                });
            }
            inner.set_status(WatcherStatus::Connected);
    
            let monitor = Arc::clone(inner);
            tokio::spawn(async move {
                terminated.cancelled_owned().await;
                Inner::on_terminated(&monitor).await;
            });
        })
    }

    /// Health accounting after the current connection's termination signal
    /// fires, then the next cycle unless a give-up applies.
    async fn on_terminated(inner: &Arc<Self>) {
        let give_up = {
            let mut state = inner.state();
            if state.disposed {
                return;
            }
            let Some(active) = state.current.take() else {
                return;
            };
            let alive = active.connected_at.elapsed();
            if alive < inner.policy.health_threshold {
                state.unhealthy_streak += 1;
                tracing::debug!(
                    ?alive,
                    streak = state.unhealthy_streak,
                    "connection died before health threshold"
                );
                (state.unhealthy_streak >= inner.policy.max_unhealthy_streak).then_some(
                    GiveUpError::UnhealthyCrashLoop {
                        streak: state.unhealthy_streak,
                    },
                )
            } else {
                state.unhealthy_streak = 0;
                tracing::debug!(?alive, "connection terminated");
                None
            }
        };

        inner.invoke_callback(None);

        match give_up {
            Some(err) => {
                tracing::warn!(%err, "gave up supervising the worker connection");
                inner.set_status(WatcherStatus::GaveUp(err));
            }
            None => Self::run_cycle(inner).await,
        }
    }
}
