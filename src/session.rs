// session.rs
//
// Per-client lifecycle (spec.md §4.8): AUTHENTICATING → SERVING → REMOVING
// → GONE.
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::admin::AdminEngine;
use crate::auth::{self, AuthFailure};
use crate::broadcast::Broadcaster;
use crate::connection::ConnectionHandle;
use crate::context::ServerContext;
use crate::envelope::{self, Envelope, Flag, LineOutcome, LineReader};
use crate::errors::ChatResult;

/// Why a session ended up in `REMOVING`, controlling what (if anything) is
/// broadcast on the way out (spec.md §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalMode {
    /// The client left normally: broadcast "has left" + refreshed roster.
    Normal,
    /// An admin kicked or banned this user: no "has left" chatter, the
    /// admin action's own broadcast already said what happened.
    Silent,
    /// Server-wide shutdown: send `SYS_SERVER_CLOSED` before closing.
    Shutdown,
}

/// Removes `addr` from every table it could be in and closes its socket.
/// Idempotent - a second call for an already-removed `addr` is a no-op,
/// satisfying spec.md §8's I3/I5.
pub fn remove_client(ctx: &ServerContext, addr: SocketAddr, mode: RemovalMode) {
    let Some((username, handle)) = ctx.registry.remove(addr) else {
        return;
    };
    ctx.rate.remove(addr);

    if mode == RemovalMode::Shutdown {
        let bc = Broadcaster::new(&ctx.registry, &ctx.rate);
        bc.send(addr, &handle, &Envelope::system(Flag::SysServerClosed, "Server has been shutdown."));
    }

    handle.shutdown();

    if mode == RemovalMode::Normal {
        let bc = Broadcaster::new(&ctx.registry, &ctx.rate);
        bc.broadcast(
            &ctx.messages,
            &Envelope::system(Flag::Chat, format!("{username} has left the chat!")),
            None,
        );
        bc.announce_active_users(&ctx.messages);
        log::info!("user '{username}' disconnected");
    }
}

/// Runs one client's full lifecycle on the calling thread. Returns once the
/// session reaches `GONE`. Never panics on a bad frame - only IO errors and
/// invariant violations (poisoned locks) surface as `Err`.
pub fn run(ctx: Arc<ServerContext>, stream: TcpStream, exit: Arc<AtomicBool>) -> ChatResult<()> {
    let addr = stream.peer_addr()?;

    if !auth::whitelisted(&ctx.config.whitelist, addr.ip()) {
        log::warn!("unauthorized connection attempt from {addr}");
        return Ok(());
    }

    let mut stream = stream;
    stream.set_read_timeout(Some(std::time::Duration::from_secs(1)))?;
    let handle = Arc::new(ConnectionHandle::new(&stream, addr, exit.clone())?);
    let mut reader = LineReader::new();

    let (username, _role) = match authenticate(&ctx, &mut stream, &mut reader, &exit, &handle, addr)? {
        Some(authed) => authed,
        None => return Ok(()), // rejected or disconnected pre-auth
    };

    if ctx.registry.admit(handle.clone(), &username).is_err() {
        log::warn!("rejecting duplicate login for '{username}' from {addr}");
        let bc = Broadcaster::new(&ctx.registry, &ctx.rate);
        bc.send(addr, &handle, &Envelope::system(Flag::AuthDenied, "already logged in"));
        handle.shutdown();
        return Ok(());
    }

    let bc = Broadcaster::new(&ctx.registry, &ctx.rate);
    bc.send(addr, &handle, &Envelope::system(Flag::AuthOk, ""));
    bc.broadcast(
        &ctx.messages,
        &Envelope::system(Flag::Chat, format!("{username} has joined the chat!")),
        None,
    );
    bc.announce_active_users(&ctx.messages);
    log::info!("user '{username}' connected from {addr}");

    let mode = serve(&ctx, &mut stream, &mut reader, &exit, &handle, addr, &username);
    remove_client(&ctx, addr, mode);
    Ok(())
}

/// `AUTHENTICATING`: reads exactly one credential frame. Returns `Ok(None)`
/// for any outcome that ends the connection without entering `SERVING`.
fn authenticate(
    ctx: &ServerContext,
    stream: &mut TcpStream,
    reader: &mut LineReader,
    exit: &AtomicBool,
    handle: &ConnectionHandle,
    addr: SocketAddr,
) -> ChatResult<Option<(String, crate::store::Role)>> {
    let line = match envelope::read_line(stream, reader, exit)? {
        LineOutcome::Line(line) => line,
        LineOutcome::Closed | LineOutcome::ExitRequested => return Ok(None),
    };

    match auth::authenticate(&line, &ctx.users, |name| ctx.bans.contains(name)) {
        Ok((username, role)) => Ok(Some((username, role))),
        Err(failure) => {
            log::warn!("authentication failed for {addr}: {failure:?}");
            let bc = Broadcaster::new(&ctx.registry, &ctx.rate);
            bc.send(addr, handle, &Envelope::system(failure.flag(), auth_failure_text(failure)));
            handle.shutdown();
            Ok(None)
        }
    }
}

fn auth_failure_text(failure: AuthFailure) -> &'static str {
    match failure {
        AuthFailure::Invalid => "malformed credentials",
        AuthFailure::Banned => "this username is banned",
        AuthFailure::Denied => "unknown user or incorrect password",
    }
}

/// `SERVING`: read → parse → quit/mute/rate/admin/broadcast, until the
/// connection ends or shutdown is signalled.
fn serve(
    ctx: &ServerContext,
    stream: &mut TcpStream,
    reader: &mut LineReader,
    exit: &AtomicBool,
    handle: &ConnectionHandle,
    addr: SocketAddr,
    username: &str,
) -> RemovalMode {
    loop {
        let line = match envelope::read_line(stream, reader, exit) {
            Ok(LineOutcome::Line(line)) => line,
            Ok(LineOutcome::Closed) => return RemovalMode::Normal,
            Ok(LineOutcome::ExitRequested) => return RemovalMode::Shutdown,
            Err(e) => {
                log::info!("transport error for {addr}: {e}");
                return RemovalMode::Normal;
            }
        };

        let frame = match envelope::decode(&line) {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("malformed frame from {username} ({addr}): {e}");
                continue;
            }
        };

        if frame.flag == Flag::ClientQuit {
            return RemovalMode::Normal;
        }

        if !ctx.mutes.check(&ctx.registry, &ctx.rate, addr, handle, username) {
            continue;
        }

        if !ctx.rate.check(&ctx.registry, addr, handle) {
            continue;
        }

        if ctx.users.is_admin(username) && frame.message.starts_with('/') {
            let admin = AdminEngine {
                registry: &ctx.registry,
                users: &ctx.users,
                bans: &ctx.bans,
                mutes: &ctx.mutes,
                rate: &ctx.rate,
            };
            admin.dispatch(addr, handle, username, &frame.message, &ctx.messages);
            continue;
        }

        let bc = Broadcaster::new(&ctx.registry, &ctx.rate);
        bc.broadcast(&ctx.messages, &Envelope::chat(username, frame.message), Some(addr));
    }
}
