//! Iris Echo Server
//!
//! Echo server di atas connection layer iris: satu binary untuk dua
//! transport. `--port` memilih TCP, `--path` memilih local socket;
//! kode penanganan koneksinya sama persis.
//!
//! Usage:
//!   cargo run --release --bin iris_echo_server -- --port 9999
//!   cargo run --release --bin iris_echo_server -- --path /tmp/iris-echo.sock
//!
//! Options:
//!   --port <PORT>       TCP port (default: 9999 jika --path tidak ada)
//!   --host <HOST>       Bind host (default: 0.0.0.0)
//!   --path <PATH>       Local socket path (menggantikan TCP)
//!   --max-conns <N>     Plafon koneksi simultan (default: tanpa batas)
//!   --timeout <SEC>     Inactivity timeout per koneksi (default: off)
//!   --verbose           Log per koneksi

use std::cell::Cell;
use std::error::Error as StdError;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::{Duration, Instant};

use iris::{create_server, ListenOptions, Reactor, ServerOptions};

/// Server configuration
struct ServerConfig {
    port: Option<u32>,
    host: Option<String>,
    path: Option<PathBuf>,
    max_connections: Option<usize>,
    timeout_secs: Option<u64>,
    verbose: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: None,
            host: None,
            path: None,
            max_connections: None,
            timeout_secs: None,
            verbose: false,
        }
    }
}

/// Server statistics - single-threaded, cukup Cell
struct ServerStats {
    connections_total: Cell<u64>,
    messages_echoed: Cell<u64>,
    bytes_echoed: Cell<u64>,
    timeouts_fired: Cell<u64>,
    rejected_writes: Cell<u64>,
}

impl ServerStats {
    fn new() -> Self {
        Self {
            connections_total: Cell::new(0),
            messages_echoed: Cell::new(0),
            bytes_echoed: Cell::new(0),
            timeouts_fired: Cell::new(0),
            rejected_writes: Cell::new(0),
        }
    }

    fn print_stats(&self, uptime: Duration, active: usize) {
        let msgs = self.messages_echoed.get();
        let rate = msgs as f64 / uptime.as_secs_f64();

        println!("\n📊 Server Stats (uptime: {:.1}s)", uptime.as_secs_f64());
        println!("   Connections:   {} active / {} total", active, self.connections_total.get());
        println!("   Echoed:        {} msgs ({:.1}/sec)", msgs, rate);
        println!("   Bytes:         {} KB", self.bytes_echoed.get() / 1024);
        if self.timeouts_fired.get() > 0 {
            println!("   Idle timeouts: {} ⏱", self.timeouts_fired.get());
        }
        if self.rejected_writes.get() > 0 {
            println!("   Write errors:  {} ⚠️", self.rejected_writes.get());
        }
    }
}

fn run_server(config: ServerConfig) -> Result<(), Box<dyn StdError>> {
    let mut reactor = Reactor::new()?;
    let handle = reactor.handle();
    let stats = Rc::new(ServerStats::new());

    let server = create_server(
        &handle,
        ServerOptions {
            max_connections: config.max_connections,
            ..ServerOptions::default()
        },
    );

    server.on_listening(|srv| {
        if let Some(bound) = srv.address() {
            println!("✅ Listening on {}", bound);
        }
    });

    let timeout = config.timeout_secs.map(Duration::from_secs);
    let verbose = config.verbose;
    {
        let stats = stats.clone();
        server.on_connection(move |srv, socket| {
            stats.connections_total.set(stats.connections_total.get() + 1);
            if verbose {
                let peer = socket
                    .remote_endpoint()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "<unknown>".to_string());
                println!("🔌 New connection from {} (active: {})", peer, srv.connection_count());
            }

            // TCP: matikan Nagle; local socket: dicatat tanpa efek
            socket.set_nodelay(true);

            if let Some(dur) = timeout {
                let stats = stats.clone();
                socket.set_timeout(Some(dur));
                socket.on_timeout(move |sock| {
                    stats.timeouts_fired.set(stats.timeouts_fired.get() + 1);
                    sock.destroy();
                });
            }

            {
                let stats = stats.clone();
                socket.on_data(move |sock, chunk| {
                    match sock.write(chunk) {
                        Ok(_) => {
                            stats.messages_echoed.set(stats.messages_echoed.get() + 1);
                            stats.bytes_echoed.set(stats.bytes_echoed.get() + chunk.len() as u64);
                        }
                        Err(_) => {
                            stats.rejected_writes.set(stats.rejected_writes.get() + 1);
                        }
                    }
                });
            }

            if verbose {
                socket.on_close(|_, had_error| {
                    println!("👋 Connection closed (error: {})", had_error);
                });
            }
        });
    }

    server.on_error(|_, err| {
        eprintln!("❌ Server error: {}", err);
    });

    let mut listen = ListenOptions {
        host: config.host,
        ..ListenOptions::default()
    };
    match config.path {
        Some(path) => listen.path = Some(path),
        None => listen.port = Some(config.port.unwrap_or(9999)),
    }
    server.listen(listen)?;

    let start = Instant::now();
    let mut last_stats = Instant::now();
    while reactor.has_work() {
        reactor.turn(Some(Duration::from_millis(250)))?;
        if last_stats.elapsed() >= Duration::from_secs(5) {
            stats.print_stats(start.elapsed(), server.connection_count());
            last_stats = Instant::now();
        }
    }

    // Sampai sini hanya kalau listener tertutup (mis. bind/accept error)
    stats.print_stats(start.elapsed(), server.connection_count());
    Ok(())
}

fn parse_args() -> ServerConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = ServerConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" | "-p" => {
                if i + 1 < args.len() {
                    config.port = args[i + 1].parse().ok();
                    i += 1;
                }
            }
            "--host" => {
                if i + 1 < args.len() {
                    config.host = Some(args[i + 1].clone());
                    i += 1;
                }
            }
            "--path" => {
                if i + 1 < args.len() {
                    config.path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--max-conns" => {
                if i + 1 < args.len() {
                    config.max_connections = args[i + 1].parse().ok();
                    i += 1;
                }
            }
            "--timeout" => {
                if i + 1 < args.len() {
                    config.timeout_secs = args[i + 1].parse().ok();
                    i += 1;
                }
            }
            "--verbose" | "-v" => {
                config.verbose = true;
            }
            "--help" => {
                println!("Iris Echo Server\n");
                println!("Usage: iris_echo_server [OPTIONS]\n");
                println!("Options:");
                println!("  -p, --port <PORT>      TCP port (default: 9999)");
                println!("      --host <HOST>      Bind host (default: 0.0.0.0)");
                println!("      --path <PATH>      Local socket path (replaces TCP)");
                println!("      --max-conns <N>    Connection ceiling");
                println!("      --timeout <SEC>    Idle timeout per connection");
                println!("  -v, --verbose          Per-connection logging");
                println!("      --help             Show this help");
                std::process::exit(0);
            }
            _ => {}
        }
        i += 1;
    }

    config
}

fn main() {
    let config = parse_args();

    println!("🚀 Iris Echo Server");
    println!("===================\n");

    if let Err(e) = run_server(config) {
        eprintln!("❌ Fatal: {}", e);
        std::process::exit(1);
    }
}
