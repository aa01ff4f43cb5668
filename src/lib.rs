//! # connection-watcher
//!
//! `connection-watcher` keeps a connection to an external worker process
//! alive. It spawns the process, wraps it into a connection, hands the
//! connection to your callback, and reconnects whenever the process dies —
//! with throttled retries, a total-wait budget, and a crash-loop breaker so a
//! broken worker cannot spin forever.
//!
//! ## Install
//!
//! ```bash
//! cargo add connection-watcher
//! ```
//!
//! ## Quick example
//!
//! ```rust,no_run
//! use connection_watcher::{CommandSource, WatcherBuilder};
//!
//! #[tokio::main]
//! async fn main() {
//!     let source = CommandSource::new("my-language-server").arg("--stdio");
//!
//!     let watcher = WatcherBuilder::new(source, |conn| match conn {
//!         Some(conn) => println!("connected to worker {:?}", conn.id()),
//!         None => println!("worker connection lost, reconnecting..."),
//!     })
//!     .build();
//!
//!     // Resolves once a connection is up (or the watcher gave up).
//!     watcher.start().await;
//! }
//! ```
//!
//! ## What you get
//!
//! * **Automatic reconnection** – a fresh spawn attempt per retry, throttled
//!   to a minimum interval, bounded by a total wait budget (20 min default).
//! * **Crash-loop protection** – connections that die within the health
//!   threshold (10 s default) count toward a consecutive-unhealthy streak;
//!   at the limit (20 default) the watcher gives up instead of hammering a
//!   broken worker. Any long-lived connection clears the streak.
//! * **Strict callback alternation** – your callback sees `Some(connection)`
//!   and `None` in alternation, never twice the same, never after disposal.
//! * **Pluggable seams** – bring your own [`ProcessSource`] and
//!   [`Connection`] wrapping, or use the provided [`CommandSource`] and
//!   [`ChildConnection`].
//!
//! Give-up and disposal are observable through [`Watcher::status`] and
//! [`Watcher::subscribe_status`]; diagnostics are emitted as `tracing`
//! events.
//!
//! ## License
//!
//! MIT

pub use connection::{ChildConnection, Connection};
pub use source::{source_fn, CommandSource, ProcessSource, SourceFn};
pub use watcher::{
    builder::WatcherBuilder, GiveUpError, Watcher, WatcherStatus, DEFAULT_HEALTH_THRESHOLD,
    DEFAULT_MAX_TOTAL_WAIT, DEFAULT_MAX_UNHEALTHY_STREAK, DEFAULT_MIN_ATTEMPT_INTERVAL,
};

mod connection;
mod source;
mod watcher;

/// Callback notified whenever the supervised connection's identity changes:
/// `Some` with the freshly acquired connection, `None` once it is lost.
pub type ConnectionCallback<C> = Box<dyn FnMut(Option<&C>) + Send + 'static>;
