//! Stub server
//!
//! A [`Service`] listens on one address and plays its script against the
//! clients that connect. By default it serves a single connection; the
//! `!: ALLOW RESTART` bang line keeps it accepting connections one after
//! the other, `!: ALLOW CONCURRENT` lets them overlap.
//!
//! ```rust,no_run
//! use boltstub::config::ServiceConfig;
//! use boltstub::script::Script;
//! use boltstub::server::Service;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let script = Script::parse_file("scripts/hello.script")?;
//! let service = Service::new(script, ServiceConfig::default());
//! service.start().await?;
//! for failure in service.failures().iter() {
//!     println!("{}", failure);
//! }
//! # Ok(())
//! # }
//! ```

mod actor;

pub use actor::{Actor, ActorControls};

use std::fmt;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::channel::connection_prefix;
use crate::config::ServiceConfig;
use crate::error::{StubError, StubResult};
use crate::script::Script;
use crate::wire::Wire;

// ============================================================================
// Failure - what went wrong on a connection
// ============================================================================

/// An error that ended a connection other than an orderly exit.
#[derive(Debug)]
pub struct Failure {
    /// Script file, set for script mismatches
    pub filename: Option<String>,
    /// The error
    pub error: StubError,
}

impl Failure {
    /// Whether the client didn't follow the script.
    pub fn is_script_mismatch(&self) -> bool {
        self.error.is_script_failure()
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_script_mismatch() {
            f.write_str("Script mismatch")?;
        } else {
            f.write_str("Error")?;
        }
        if let Some(filename) = self.filename.as_deref().filter(|f| !f.is_empty()) {
            write!(f, " in '{}'", filename)?;
        }
        write!(f, ":\n{}", self.error)
    }
}

// ============================================================================
// Service
// ============================================================================

/// State shared between the service, its actors and its handles.
#[derive(Debug, Default)]
struct Shared {
    failures: Mutex<Vec<Failure>>,
    ever_acted: AtomicBool,
    timed_out: AtomicBool,
    /// Stop accepting connections
    stop: CancellationToken,
    controls: ActorControls,
}

impl Shared {
    fn record(&self, failure: Failure) {
        self.failures.lock().push(failure);
    }
}

/// Serves one script.
pub struct Service {
    script: Arc<Script>,
    config: ServiceConfig,
    shared: Arc<Shared>,
}

impl Service {
    /// Create a service. Nothing is bound until [`start`](Self::start).
    pub fn new(script: Script, config: ServiceConfig) -> Self {
        Self {
            script: Arc::new(script),
            config,
            shared: Arc::new(Shared::default()),
        }
    }

    /// A handle to stop the service from elsewhere.
    pub fn handle(&self) -> ServiceHandle {
        ServiceHandle {
            shared: self.shared.clone(),
        }
    }

    /// Bind the listen address, announce `Listening` on stdout and serve.
    pub async fn start(&self) -> StubResult<()> {
        let listener = TcpListener::bind(self.config.listen_addr.to_socket_addr()).await?;
        {
            let mut stdout = io::stdout().lock();
            writeln!(stdout, "Listening")?;
            stdout.flush()?;
        }
        self.serve(listener).await
    }

    /// Serve connections from a bound listener until the script's
    /// connection policy, a timeout or a stop request ends it.
    ///
    /// Returns once the listener is closed and all connections are done.
    pub async fn serve(&self, listener: TcpListener) -> StubResult<()> {
        let context = &self.script.context;
        let keep_listening = context.restarting || context.concurrent;
        info!(
            "serving {:?} on {}",
            self.script.filename,
            listener.local_addr()?
        );

        let deadline = tokio::time::sleep(self.config.timeout);
        tokio::pin!(deadline);
        let mut actors = JoinSet::new();
        loop {
            let ever_acted = self.ever_acted();
            tokio::select! {
                biased;
                _ = self.shared.stop.cancelled() => break,
                _ = &mut deadline, if !ever_acted => {
                    warn!("no connection within {:?}", self.config.timeout);
                    self.shared.timed_out.store(true, Ordering::SeqCst);
                    break;
                }
                Some(joined) = actors.join_next(), if !actors.is_empty() => {
                    self.reap(joined);
                }
                accepted = listener.accept() => {
                    let (stream, _) = accepted?;
                    self.shared.ever_acted.store(true, Ordering::SeqCst);
                    let connection =
                        handle_connection(self.script.clone(), stream, self.shared.clone());
                    if context.concurrent {
                        actors.spawn(connection);
                    } else {
                        connection.await;
                    }
                    if !keep_listening {
                        break;
                    }
                }
            }
        }
        drop(listener);
        while let Some(joined) = actors.join_next().await {
            self.reap(joined);
        }
        Ok(())
    }

    fn reap(&self, joined: Result<(), tokio::task::JoinError>) {
        if let Err(err) = joined {
            error!("connection task failed: {}", err);
            self.shared.record(Failure {
                filename: None,
                error: StubError::Io(io::Error::other(err.to_string())),
            });
        }
    }

    /// Errors that ended connections, in the order they happened.
    pub fn failures(&self) -> parking_lot::MutexGuard<'_, Vec<Failure>> {
        self.shared.failures.lock()
    }

    /// Whether any client ever connected.
    pub fn ever_acted(&self) -> bool {
        self.shared.ever_acted.load(Ordering::SeqCst)
    }

    /// Whether the service gave up waiting for a client.
    pub fn timed_out(&self) -> bool {
        self.shared.timed_out.load(Ordering::SeqCst)
    }

    /// The script being served.
    pub fn script(&self) -> &Script {
        &self.script
    }
}

/// Play the script against one accepted connection.
async fn handle_connection(script: Arc<Script>, stream: TcpStream, shared: Arc<Shared>) {
    let wire = Wire::tcp(stream);
    let prefix = connection_prefix(wire.peer_addr(), wire.local_addr());
    if let (Some(peer), Some(local)) = (wire.peer_addr(), wire.local_addr()) {
        info!("{}S: <ACCEPT> {} -> {}", prefix, peer, local);
    }

    let mut actor = Actor::new(script.clone(), wire, shared.controls.clone());
    match actor.play().await {
        Ok(()) => {}
        Err(StubError::ServerExit(reason)) => info!("{}S: <EXIT> {}", prefix, reason),
        Err(err) => {
            let filename = err.is_script_failure().then(|| script.filename.clone());
            if !err.is_script_failure() {
                error!("{}{}", prefix, err);
            }
            shared.record(Failure {
                filename,
                error: err,
            });
        }
    }
    info!("{}S: <HANGUP>", prefix);
    actor.close().await;
}

// ============================================================================
// ServiceHandle
// ============================================================================

/// Stops a running [`Service`].
#[derive(Debug, Clone)]
pub struct ServiceHandle {
    shared: Arc<Shared>,
}

impl ServiceHandle {
    /// Stop listening and let every connection end its script early where
    /// the rest of the script may be skipped.
    pub fn try_skip_to_end(&self) {
        self.shared.stop.cancel();
        self.shared.controls.skip.cancel();
    }

    /// Stop listening and drop every connection.
    pub fn close_all_connections(&self) {
        self.shared.stop.cancel();
        self.shared.controls.exit.cancel();
    }
}
