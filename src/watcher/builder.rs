use std::time::Duration;

use tokio::process::Child;

use crate::connection::{ChildConnection, Connection};
use crate::source::ProcessSource;
use crate::ConnectionCallback;

use super::{
    Watcher, WatcherPolicy, DEFAULT_HEALTH_THRESHOLD, DEFAULT_MAX_TOTAL_WAIT,
    DEFAULT_MAX_UNHEALTHY_STREAK, DEFAULT_MIN_ATTEMPT_INTERVAL,
};

/// Builds a [`Watcher`] with configurable retry, timeout, and health policy.
pub struct WatcherBuilder<S: ProcessSource, C: Connection> {
    source: S,
    callback: ConnectionCallback<C>,
    factory: Box<dyn Fn(S::Handle) -> C + Send + Sync>,
    policy: WatcherPolicy,
}

impl<S> WatcherBuilder<S, ChildConnection>
where
    S: ProcessSource<Handle = Child>,
{
    /// Builder using the standard [`ChildConnection`] wrapping for sources
    /// that yield a [`tokio::process::Child`].
    pub fn new(source: S, callback: impl FnMut(Option<&ChildConnection>) + Send + 'static) -> Self {
        Self::with_connection_factory(source, callback, ChildConnection::new)
    }
}

impl<S: ProcessSource, C: Connection> WatcherBuilder<S, C> {
    /// Builder with a custom connection factory wrapping the source's raw
    /// handles.
    pub fn with_connection_factory(
        source: S,
        callback: impl FnMut(Option<&C>) + Send + 'static,
        factory: impl Fn(S::Handle) -> C + Send + Sync + 'static,
    ) -> Self {
        Self {
            source,
            callback: Box::new(callback),
            factory: Box::new(factory),
            policy: WatcherPolicy {
                max_total_wait: DEFAULT_MAX_TOTAL_WAIT,
                min_attempt_interval: DEFAULT_MIN_ATTEMPT_INTERVAL,
                health_threshold: DEFAULT_HEALTH_THRESHOLD,
                max_unhealthy_streak: DEFAULT_MAX_UNHEALTHY_STREAK,
            },
        }
    }

    /// Sets the total wait budget for one acquisition cycle. Once it elapses
    /// without a handle, the watcher gives up permanently.
    pub fn with_max_total_wait(mut self, budget: Duration) -> Self {
        self.policy.max_total_wait = budget;
        self
    }

    /// Sets the minimum interval between spawn attempts. Attempts that take
    /// longer than this on their own are not delayed further.
    pub fn with_min_attempt_interval(mut self, interval: Duration) -> Self {
        self.policy.min_attempt_interval = interval;
        self
    }

    /// Sets the minimum lifetime for a connection to count as healthy.
    /// A healthy connection resets the unhealthy streak to zero.
    pub fn with_health_threshold(mut self, threshold: Duration) -> Self {
        self.policy.health_threshold = threshold;
        self
    }

    /// Sets the number of consecutive unhealthy connections after which the
    /// watcher gives up.
    pub fn with_max_unhealthy_streak(mut self, streak: u32) -> Self {
        self.policy.max_unhealthy_streak = streak;
        self
    }

    /// Constructs the [`Watcher`] with the configured policy.
    pub fn build(self) -> Watcher<S, C> {
        Watcher::from_builder(self.source, self.callback, self.factory, self.policy)
    }
}
