use std::sync::Mutex;

use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio_util::sync::CancellationToken;

/// A live link to a worker process, owned exclusively by the watcher.
///
/// The watcher delivers a shared reference through its callback; callers must
/// not dispose the connection themselves — the watcher does that during its
/// own teardown.
pub trait Connection: Send + 'static {
    /// Token cancelled exactly once when the connection ends, whether by
    /// crash, regular exit, or an explicit [`dispose`](Connection::dispose).
    /// After cancellation the connection is inert.
    fn terminated(&self) -> CancellationToken;

    /// Ends the connection and fires its termination signal. Idempotent.
    fn dispose(&mut self);
}

struct ChildIo {
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
}

/// Standard wrapping of a [`tokio::process::Child`].
///
/// A reaper task owns the child: it waits for the process to exit on its own,
/// or kills it when [`dispose`](Connection::dispose) is called, and cancels
/// the termination token either way. The child's piped stdio can be taken
/// once by whatever protocol layer sits on top.
pub struct ChildConnection {
    id: Option<u32>,
    io: Mutex<ChildIo>,
    terminated: CancellationToken,
    dispose: CancellationToken,
}

impl ChildConnection {
    pub fn new(mut child: Child) -> Self {
        let io = ChildIo {
            stdin: child.stdin.take(),
            stdout: child.stdout.take(),
        };
        let id = child.id();
        let terminated = CancellationToken::new();
        let dispose = CancellationToken::new();

        let exited = terminated.clone();
        let kill = dispose.clone();
        tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => {
                    tracing::debug!(pid = ?id, ?status, "worker process exited");
                }
                _ = kill.cancelled() => {
                    if let Err(err) = child.start_kill() {
                        tracing::debug!(pid = ?id, %err, "failed to kill worker process");
                    }
                    let _ = child.wait().await;
                }
            }
            exited.cancel();
        });

        Self {
            id,
            io: Mutex::new(io),
            terminated,
            dispose,
        }
    }

    /// OS pid of the wrapped process, if it had not already exited at wrap
    /// time.
    pub fn id(&self) -> Option<u32> {
        self.id
    }

    /// Takes the child's stdin pipe. Returns `None` after the first call or
    /// if the source did not pipe stdin.
    pub fn take_stdin(&self) -> Option<ChildStdin> {
        self.io.lock().ok()?.stdin.take()
    }

    /// Takes the child's stdout pipe. Returns `None` after the first call or
    /// if the source did not pipe stdout.
    pub fn take_stdout(&self) -> Option<ChildStdout> {
        self.io.lock().ok()?.stdout.take()
    }
}

impl Connection for ChildConnection {
    fn terminated(&self) -> CancellationToken {
        self.terminated.clone()
    }

    fn dispose(&mut self) {
        self.dispose.cancel();
    }
}
