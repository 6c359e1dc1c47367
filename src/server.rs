// server.rs
//
// The acceptor and supervisor (spec.md §4.9): listen loop, bounded worker
// pool, cooperative shutdown. Grounded on original_source's
// `server/server.py::Server.start_connection/accept_connection/stop_connection`,
// adapted from a `ThreadPoolExecutor` + polling `accept(timeout=1)` loop
// into std's nonblocking-accept equivalent.
use std::io;
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::config::Config;
use crate::context::ServerContext;
use crate::errors::{ChatError, ChatResult};
use crate::semaphore::Semaphore;
use crate::session;

/// How often the accept loop polls `is_running` between connection
/// attempts - the std-only equivalent of the original's 1-second
/// `socket.settimeout(1)` on `accept()`.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(200);

pub struct Supervisor {
    ctx: Arc<ServerContext>,
    is_running: Arc<AtomicBool>,
    pool: Arc<Semaphore>,
    /// Exit signals for every session currently in flight, tracked
    /// independent of the registry so shutdown can reach connections still
    /// in `AUTHENTICATING` (not yet admitted).
    exit_flags: Arc<Mutex<Vec<Arc<AtomicBool>>>>,
    /// Join handles for every session thread spawned so far, drained and
    /// joined once the accept loop stops - this is what lets `run()` block
    /// until every task has actually terminated instead of just signalled.
    handles: Mutex<Vec<thread::JoinHandle<()>>>,
    /// Set once `run()` has bound its listener, so a caller using an
    /// ephemeral port (`0`) can discover what the OS actually assigned.
    bound_addr: Mutex<Option<SocketAddr>>,
}

impl Supervisor {
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);
        let pool_size = config.pool_size;
        Self {
            ctx: Arc::new(ServerContext::new(config)),
            is_running: Arc::new(AtomicBool::new(true)),
            pool: Semaphore::new(pool_size),
            exit_flags: Arc::new(Mutex::new(Vec::new())),
            handles: Mutex::new(Vec::new()),
            bound_addr: Mutex::new(None),
        }
    }

    /// A handle that can be used to trigger `stop()` from elsewhere (e.g. a
    /// SIGINT handler) while `run()` blocks the calling thread.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            is_running: self.is_running.clone(),
            exit_flags: self.exit_flags.clone(),
        }
    }

    /// The address `run()` is actually listening on, once bound. Useful
    /// when `Config::port` is `0` and the OS assigned an ephemeral port.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.bound_addr.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Binds, listens, and accepts connections until `stop()` is called.
    /// Fatal per spec.md §7: a bind failure, or any accept-loop error other
    /// than a timeout/would-block, brings the whole server down.
    pub fn run(&self) -> ChatResult<()> {
        let listener = TcpListener::bind((self.ctx.config.host.as_str(), self.ctx.config.port))
            .map_err(ChatError::BindFailed)?;
        listener.set_nonblocking(true)?;
        *self.bound_addr.lock().unwrap_or_else(|e| e.into_inner()) = Some(listener.local_addr()?);
        log::info!("server listening on {}:{}", self.ctx.config.host, self.ctx.config.port);

        let result = loop {
            if !self.is_running.load(Ordering::SeqCst) {
                break Ok(());
            }
            match listener.accept() {
                Ok((stream, addr)) => {
                    log::debug!("accepted connection from {addr}");
                    self.spawn_session(stream);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(e) => {
                    log::error!("listener error, initiating shutdown: {e}");
                    self.is_running.store(false, Ordering::SeqCst);
                    break Err(e.into());
                }
            }
        };

        self.join_sessions();
        self.ctx.messages.flush();
        log::warn!("server shut down gracefully.");

        result
    }

    fn spawn_session(&self, stream: std::net::TcpStream) {
        let exit = Arc::new(AtomicBool::new(false));
        self.exit_flags.lock().unwrap_or_else(|e| e.into_inner()).push(exit.clone());

        let ctx = self.ctx.clone();
        let pool = self.pool.clone();
        let exit_flags = self.exit_flags.clone();

        let handle = thread::spawn(move || {
            let permit = pool.acquire();
            let result = session::run(ctx, stream, exit.clone());
            drop(permit);

            if let Err(e) = result {
                log::error!("session error: {e}");
            }

            // Cleanup runs on every exit path, including a panic unwound by
            // the default hook - `exit_flags` just drops this entry the
            // next time shutdown sweeps the list.
            exit_flags
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .retain(|flag| !Arc::ptr_eq(flag, &exit));
        });

        self.handles.lock().unwrap_or_else(|e| e.into_inner()).push(handle);
    }

    /// Blocks until every session thread spawned so far has returned.
    /// Called once the accept loop stops, so `run()` only returns once the
    /// whole server - not just the listener - is quiescent.
    fn join_sessions(&self) {
        let handles: Vec<_> = self.handles.lock().unwrap_or_else(|e| e.into_inner()).drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }
    }
}

/// Cheap, cloneable reference to a running supervisor's shutdown controls.
#[derive(Clone)]
pub struct ShutdownHandle {
    is_running: Arc<AtomicBool>,
    exit_flags: Arc<Mutex<Vec<Arc<AtomicBool>>>>,
}

impl ShutdownHandle {
    /// Flips `is_running` and signals every tracked session to exit. Safe to
    /// call from a signal handler: it only touches atomics and a short
    /// mutex, never blocks on I/O. The accept loop notices within one poll
    /// interval, joins every session thread, flushes the message log, and
    /// logs completion before `run()` returns - see `Supervisor::run`.
    pub fn stop(&self) {
        self.is_running.store(false, Ordering::SeqCst);

        let flags = self.exit_flags.lock().unwrap_or_else(|e| e.into_inner());
        for flag in flags.iter() {
            flag.store(true, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    fn test_config(dir: &std::path::Path) -> Config {
        Config {
            host: "127.0.0.1".to_string(),
            port: 0,
            whitelist: vec!["127.0.0.1".to_string()],
            user_db: dir.join("users.json"),
            message_db: dir.join("messages.json"),
            banned_user_db: dir.join("bans.json"),
            pool_size: 10,
            rate_limit: crate::config::RateLimitConfig::default(),
        }
    }

    #[test]
    fn stop_flips_is_running_without_blocking() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("messages.json"), b"[]").unwrap();
        let supervisor = Supervisor::new(test_config(dir.path()));
        supervisor.shutdown_handle().stop();
        assert!(!supervisor.is_running.load(Ordering::SeqCst));
    }

    #[test]
    fn spawning_a_session_tracks_and_releases_its_exit_flag() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("messages.json"), b"[]").unwrap();
        let supervisor = Supervisor::new(test_config(dir.path()));

        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let addr = listener.local_addr().unwrap();
        let client = std::net::TcpStream::connect(addr).unwrap();
        let (server_side, _) = listener.accept().unwrap();
        drop(client);

        supervisor.spawn_session(server_side);
        thread::sleep(StdDuration::from_millis(300));
        assert!(supervisor.exit_flags.lock().unwrap().is_empty());
        supervisor.join_sessions();
    }

    #[test]
    fn run_returns_only_after_every_session_thread_has_joined() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("messages.json"), b"[]").unwrap();
        let supervisor = Arc::new(Supervisor::new(test_config(dir.path())));
        let shutdown = supervisor.shutdown_handle();

        let runner = {
            let supervisor = supervisor.clone();
            thread::spawn(move || supervisor.run())
        };

        // Give the accept loop a moment to bind before signalling shutdown.
        thread::sleep(StdDuration::from_millis(100));
        shutdown.stop();
        runner.join().unwrap().unwrap();
        assert!(supervisor.handles.lock().unwrap().is_empty());
    }
}
