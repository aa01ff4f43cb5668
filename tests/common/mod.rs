use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use connection_watcher::{Connection, ProcessSource, WatcherBuilder};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Handle produced by the scripted source. The lifetime, if any, is how long
/// the resulting connection survives before terminating on its own.
#[derive(Debug, Clone, Copy)]
pub struct TestHandle {
    pub lifetime: Option<Duration>,
}

/// A handle whose connection lives until disposed.
#[allow(unused)]
pub const LIVE: TestHandle = TestHandle { lifetime: None };

/// A handle whose connection dies after the given duration.
#[allow(unused)]
pub fn dies_after(lifetime: Duration) -> TestHandle {
    TestHandle {
        lifetime: Some(lifetime),
    }
}

/// One scripted spawn attempt.
#[derive(Debug, Clone, Copy)]
pub enum Attempt {
    Fail,
    FailAfter(Duration),
    Yield(TestHandle),
    YieldAfter(Duration, TestHandle),
}

/// Process source following a script of attempts, recording when each attempt
/// was made. Falls back to `Attempt::Fail` once the script is exhausted.
pub struct ScriptedSource {
    script: Mutex<VecDeque<Attempt>>,
    fallback: Attempt,
    attempts: AtomicUsize,
    attempt_times: Mutex<Vec<Instant>>,
}

impl ScriptedSource {
    #[allow(unused)]
    pub fn new(script: impl IntoIterator<Item = Attempt>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback: Attempt::Fail,
            attempts: AtomicUsize::new(0),
            attempt_times: Mutex::new(Vec::new()),
        }
    }

    /// A source answering every attempt the same way.
    #[allow(unused)]
    pub fn always(fallback: Attempt) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            attempts: AtomicUsize::new(0),
            attempt_times: Mutex::new(Vec::new()),
        }
    }

    #[allow(unused)]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    #[allow(unused)]
    pub fn attempt_times(&self) -> Vec<Instant> {
        self.attempt_times.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProcessSource for ScriptedSource {
    type Handle = TestHandle;

    async fn acquire(&self) -> Option<TestHandle> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.attempt_times.lock().unwrap().push(Instant::now());
        let attempt = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.fallback);
        match attempt {
            Attempt::Fail => None,
            Attempt::Yield(handle) => Some(handle),
            Attempt::FailAfter(delay) => {
                tokio::time::sleep(delay).await;
                None
            }
            Attempt::YieldAfter(delay, handle) => {
                tokio::time::sleep(delay).await;
                Some(handle)
            }
        }
    }
}

/// Connection over a [`TestHandle`]: terminates by itself after the handle's
/// lifetime, or when disposed.
pub struct TestConnection {
    terminated: CancellationToken,
}

impl TestConnection {
    pub fn new(handle: TestHandle) -> Self {
        let terminated = CancellationToken::new();
        if let Some(lifetime) = handle.lifetime {
            let token = terminated.clone();
            tokio::spawn(async move {
                tokio::time::sleep(lifetime).await;
                token.cancel();
            });
        }
        Self { terminated }
    }
}

impl Connection for TestConnection {
    fn terminated(&self) -> CancellationToken {
        self.terminated.clone()
    }

    fn dispose(&mut self) {
        self.terminated.cancel();
    }
}

/// Registry of every connection built through [`ConnectionLog::factory`],
/// used to assert that abandoned connections really get released.
#[derive(Clone, Default)]
pub struct ConnectionLog {
    tokens: Arc<Mutex<Vec<CancellationToken>>>,
}

impl ConnectionLog {
    pub fn factory(&self) -> impl Fn(TestHandle) -> TestConnection + Send + Sync + 'static {
        let tokens = Arc::clone(&self.tokens);
        move |handle| {
            let connection = TestConnection::new(handle);
            tokens.lock().unwrap().push(connection.terminated());
            connection
        }
    }

    #[allow(unused)]
    pub fn created(&self) -> usize {
        self.tokens.lock().unwrap().len()
    }

    #[allow(unused)]
    pub fn all_terminated(&self) -> bool {
        self.tokens
            .lock()
            .unwrap()
            .iter()
            .all(|token| token.is_cancelled())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackEvent {
    Connected,
    Lost,
}

/// Records every callback invocation in order.
#[derive(Clone, Default)]
pub struct CallbackLog {
    events: Arc<Mutex<Vec<CallbackEvent>>>,
}

impl CallbackLog {
    pub fn recorder(&self) -> impl FnMut(Option<&TestConnection>) + Send + 'static {
        let events = Arc::clone(&self.events);
        move |connection| {
            let event = match connection {
                Some(_) => CallbackEvent::Connected,
                None => CallbackEvent::Lost,
            };
            events.lock().unwrap().push(event);
        }
    }

    #[allow(unused)]
    pub fn events(&self) -> Vec<CallbackEvent> {
        self.events.lock().unwrap().clone()
    }

    #[allow(unused)]
    pub fn connected(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| **e == CallbackEvent::Connected)
            .count()
    }

    #[allow(unused)]
    pub fn lost(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| **e == CallbackEvent::Lost)
            .count()
    }
}

/// Watcher builder wired to the scripted source and the test logs.
#[allow(unused)]
pub fn watcher_builder(
    source: &Arc<ScriptedSource>,
    callbacks: &CallbackLog,
    connections: &ConnectionLog,
) -> WatcherBuilder<Arc<ScriptedSource>, TestConnection> {
    WatcherBuilder::with_connection_factory(
        Arc::clone(source),
        callbacks.recorder(),
        connections.factory(),
    )
}
