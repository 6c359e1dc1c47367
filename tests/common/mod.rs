// Shared fixtures for the integration tests: a running server bound to an
// ephemeral port, a populated user store, and small helpers for talking the
// framed JSON protocol over a plain `TcpStream`.
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chatd::envelope::{decode, encode, Envelope};
use chatd::{ChatResult, Config, Supervisor};

pub struct TestServer {
    pub addr: SocketAddr,
    pub supervisor: Arc<Supervisor>,
    runner: Option<JoinHandle<ChatResult<()>>>,
}

impl TestServer {
    pub fn stop(mut self) {
        self.supervisor.shutdown_handle().stop();
        if let Some(runner) = self.runner.take() {
            runner.join().unwrap().unwrap();
        }
    }
}

/// `username -> (password, is_admin)`.
pub fn write_user_db(path: &std::path::Path, users: &[(&str, &str, bool)]) {
    let mut object = serde_json::Map::new();
    for (username, password, is_admin) in users {
        let digest = bcrypt::hash(password, bcrypt::DEFAULT_COST).unwrap();
        let role = if *is_admin { "admin" } else { "user" };
        object.insert(
            username.to_string(),
            serde_json::json!({ "password": digest, "role": role }),
        );
    }
    std::fs::write(path, serde_json::to_vec(&object).unwrap()).unwrap();
}

pub fn start_server(dir: &std::path::Path) -> TestServer {
    std::fs::write(dir.join("bans.json"), b"[]").unwrap();
    if !dir.join("users.json").exists() {
        write_user_db(&dir.join("users.json"), &[]);
    }
    std::fs::write(dir.join("messages.json"), b"[]").unwrap();

    let config = Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        whitelist: vec!["127.0.0.1".to_string()],
        user_db: dir.join("users.json"),
        message_db: dir.join("messages.json"),
        banned_user_db: dir.join("bans.json"),
        pool_size: 10,
        rate_limit: chatd::config::RateLimitConfig::default(),
    };

    let supervisor = Arc::new(Supervisor::new(config));
    let runner = {
        let supervisor = supervisor.clone();
        thread::spawn(move || supervisor.run())
    };

    let addr = wait_for_bind(&supervisor);

    TestServer { addr, supervisor, runner: Some(runner) }
}

fn wait_for_bind(supervisor: &Supervisor) -> SocketAddr {
    for _ in 0..200 {
        if let Some(addr) = supervisor.local_addr() {
            return addr;
        }
        thread::sleep(Duration::from_millis(10));
    }
    panic!("server did not bind within 2s");
}

pub fn connect(addr: SocketAddr) -> TcpStream {
    let stream = TcpStream::connect(addr).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    stream
}

pub fn login(stream: &mut TcpStream, username: &str, password: &str) {
    let credentials = serde_json::json!({ "username": username, "password": password });
    let mut bytes = serde_json::to_vec(&credentials).unwrap();
    bytes.push(b'\n');
    stream.write_all(&bytes).unwrap();
}

pub fn send_envelope(stream: &mut TcpStream, envelope: &Envelope) {
    stream.write_all(&encode(envelope).unwrap()).unwrap();
}

/// Reads exactly one newline-delimited frame, blocking up to the stream's
/// read timeout. Panics (test failure) if the peer closes or the timeout
/// elapses without a full line arriving.
pub fn recv_envelope(stream: &mut TcpStream) -> Envelope {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = stream.read(&mut byte).expect("read failed waiting for a frame");
        if n == 0 {
            panic!("connection closed before a full frame arrived");
        }
        if byte[0] == b'\n' {
            break;
        }
        buf.push(byte[0]);
    }
    decode(&buf).expect("received malformed JSON frame")
}

/// Keeps reading frames until one matching `predicate` shows up, or panics
/// after `max` attempts - lets a test skip past frames (e.g. a roster
/// update) it doesn't care about.
pub fn recv_until(stream: &mut TcpStream, max: usize, predicate: impl Fn(&Envelope) -> bool) -> Envelope {
    for _ in 0..max {
        let envelope = recv_envelope(stream);
        if predicate(&envelope) {
            return envelope;
        }
    }
    panic!("did not observe a matching frame within {max} reads");
}
