use std::future::Future;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::{Child, Command};

/// A restartable producer of process handles.
///
/// Each call to [`acquire`](ProcessSource::acquire) represents exactly one
/// spawn attempt and resolves with either a handle or `None` (the attempt
/// failed). The watcher calls `acquire` fresh for every retry, so a source
/// that lazily restarts its spawn logic gets a new attempt each time.
#[async_trait]
pub trait ProcessSource: Send + Sync + 'static {
    /// Raw handle to a spawned process, wrapped into a connection by the
    /// watcher's connection factory.
    type Handle: Send + 'static;

    /// Performs one spawn attempt.
    async fn acquire(&self) -> Option<Self::Handle>;
}

/// The source is shared with its creator, never owned by the watcher.
#[async_trait]
impl<S: ProcessSource + ?Sized> ProcessSource for Arc<S> {
    type Handle = S::Handle;

    async fn acquire(&self) -> Option<Self::Handle> {
        (**self).acquire().await
    }
}

/// Adapts an async closure into a [`ProcessSource`].
///
/// See [`source_fn`].
pub struct SourceFn<F> {
    f: F,
}

/// Builds a [`ProcessSource`] from an async closure performing one spawn
/// attempt per call.
///
/// ```rust,no_run
/// use connection_watcher::source_fn;
/// use tokio::process::Command;
///
/// let source = source_fn(|| async {
///     Command::new("my-worker").kill_on_drop(true).spawn().ok()
/// });
/// ```
pub fn source_fn<F, Fut, H>(f: F) -> SourceFn<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Option<H>> + Send,
    H: Send + 'static,
{
    SourceFn { f }
}

#[async_trait]
impl<F, Fut, H> ProcessSource for SourceFn<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Option<H>> + Send,
    H: Send + 'static,
{
    type Handle = H;

    async fn acquire(&self) -> Option<H> {
        (self.f)().await
    }
}

/// Standard source spawning a [`tokio::process::Command`] per attempt.
///
/// Stdin and stdout are piped so a protocol layer can attach to the wrapped
/// connection; stderr is inherited. A spawn failure is logged and reported as
/// an absent handle, leaving the retry decision to the watcher.
pub struct CommandSource {
    program: String,
    args: Vec<String>,
}

impl CommandSource {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Appends an argument passed to every spawn attempt.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

#[async_trait]
impl ProcessSource for CommandSource {
    type Handle = Child;

    async fn acquire(&self) -> Option<Child> {
        let spawned = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        match spawned {
            Ok(child) => {
                tracing::debug!(program = %self.program, pid = ?child.id(), "spawned worker process");
                Some(child)
            }
            Err(err) => {
                tracing::warn!(program = %self.program, %err, "failed to spawn worker process");
                None
            }
        }
    }
}
