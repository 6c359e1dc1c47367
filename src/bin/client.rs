// bin/client.rs
//
// Interactive terminal client: one thread prints whatever the server sends,
// the main thread reads stdin and writes frames. Reuses the library's wire
// codec so the client can never drift from what the server actually speaks.
use std::io::{self, BufRead, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use chatd::envelope::{self, Envelope, Flag, LineOutcome, LineReader};
use clap::Parser;
use serde::Serialize;

#[derive(Parser, Debug)]
#[command(author, version, about = "Chat client", long_about = None)]
struct Args {
    /// Server host to connect to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to connect to
    #[arg(long, default_value_t = 65432)]
    port: u16,
}

#[derive(Serialize)]
struct Credentials<'a> {
    username: &'a str,
    password: &'a str,
}

fn main() -> io::Result<()> {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let args = Args::parse();
    let mut stream = TcpStream::connect((args.host.as_str(), args.port)).map_err(|e| {
        log::error!("failed to connect to {}:{}: {e}", args.host, args.port);
        e
    })?;

    let username = prompt("Username: ")?;
    let password = prompt("Password: ")?;
    send_line(&mut stream, &Credentials { username: &username, password: &password })?;

    let reply_stream = stream.try_clone()?;
    let exit = Arc::new(AtomicBool::new(false));
    let reader_exit = exit.clone();
    let reader = thread::spawn(move || handle_incoming(reply_stream, reader_exit));

    handle_user_input(&mut stream, &exit)?;

    if let Err(e) = reader.join() {
        log::error!("reader thread panicked: {e:?}");
    }

    Ok(())
}

fn prompt(label: &str) -> io::Result<String> {
    print!("{label}");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn send_line<T: Serialize>(stream: &mut TcpStream, value: &T) -> io::Result<()> {
    let mut bytes = serde_json::to_vec(value)?;
    bytes.push(b'\n');
    stream.write_all(&bytes)
}

/// Reads stdin line by line, wraps each line as a chat or `/quit` frame, and
/// writes it to the server. Returns once the user quits or stdin closes.
fn handle_user_input(stream: &mut TcpStream, exit: &AtomicBool) -> io::Result<()> {
    print_prompt()?;
    for line in io::stdin().lock().lines() {
        let input = line?;
        if input.trim().is_empty() {
            print_prompt()?;
            continue;
        }

        let envelope = if input.trim() == "/quit" {
            Envelope::system(Flag::ClientQuit, "")
        } else {
            Envelope::chat("", input)
        };

        let quitting = envelope.flag == Flag::ClientQuit;
        if let Err(e) = write_envelope(stream, &envelope) {
            eprintln!("failed to send message: {e}");
        }

        if quitting {
            exit.store(true, Ordering::SeqCst);
            println!("\rdisconnected.");
            break;
        }

        print_prompt()?;
    }
    Ok(())
}

fn write_envelope(stream: &mut TcpStream, envelope: &Envelope) -> io::Result<()> {
    let bytes = envelope::encode(envelope).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    stream.write_all(&bytes)
}

fn print_prompt() -> io::Result<()> {
    print!("\r\x1B[2K> ");
    io::stdout().flush()
}

/// Reads frames off `stream` until it closes or `exit` is set, printing each
/// one the way its flag calls for.
fn handle_incoming(mut stream: TcpStream, exit: Arc<AtomicBool>) {
    let mut reader = LineReader::new();
    loop {
        if exit.load(Ordering::SeqCst) {
            return;
        }
        match envelope::read_line(&mut stream, &mut reader, &exit) {
            Ok(LineOutcome::Line(line)) => match envelope::decode(&line) {
                Ok(frame) => {
                    display(&frame);
                    let _ = print_prompt();
                }
                Err(e) => log::warn!("received malformed frame: {e}"),
            },
            Ok(LineOutcome::Closed) => {
                println!("\rconnection closed by server.");
                return;
            }
            Ok(LineOutcome::ExitRequested) => return,
            Err(e) => {
                log::error!("transport error: {e}");
                return;
            }
        }
    }
}

fn display(frame: &Envelope) {
    match frame.flag {
        Flag::Chat => println!("\r[{}]: {}", frame.sender, frame.message),
        Flag::AuthOk => println!("\rauthenticated - welcome!"),
        Flag::AuthInvalid => println!("\rlogin rejected: {}", frame.message),
        Flag::AuthDenied => println!("\rlogin rejected: {}", frame.message),
        Flag::AuthBan => println!("\rlogin rejected: {}", frame.message),
        Flag::UserListUpdate => println!("\ractive users: {}", frame.message),
        Flag::SysServerClosed => println!("\r{}", frame.message),
        Flag::AdminMsg => println!("\r[admin]: {}", frame.message),
        Flag::AdminKick => println!("\r{}", frame.message),
        Flag::AdminBan => println!("\r{}", frame.message),
        Flag::AdminMute => println!("\r{}", frame.message),
        Flag::ClientQuit => {}
    }
}
