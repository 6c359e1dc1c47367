// connection.rs
//
// The runtime-only connection record (spec.md §3): an opaque transport
// handle, a one-shot exit signal, and a per-connection write mutex guarding
// outbound serialization.
use std::io::{self, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::errors::ChatResult;
use crate::util::lock;

pub struct ConnectionHandle {
    pub addr: SocketAddr,
    writer: Mutex<TcpStream>,
    pub exit: Arc<AtomicBool>,
}

impl ConnectionHandle {
    pub fn new(stream: &TcpStream, addr: SocketAddr, exit: Arc<AtomicBool>) -> ChatResult<Self> {
        Ok(Self {
            addr,
            writer: Mutex::new(stream.try_clone()?),
            exit,
        })
    }

    /// Writes already-framed bytes under the write mutex. A failing send is
    /// the caller's signal to drop this connection (spec.md §4.5) - this
    /// method never closes the socket itself.
    pub fn send_bytes(&self, bytes: &[u8]) -> io::Result<()> {
        lock(&self.writer).write_all(bytes)
    }

    pub fn shutdown(&self) {
        let _ = lock(&self.writer).shutdown(Shutdown::Both);
    }

    pub fn request_exit(&self) {
        self.exit.store(true, Ordering::SeqCst);
    }
}
