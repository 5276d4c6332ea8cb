//! Iris Echo Client - Round-Trip Latency Benchmark
//!
//! Client ping untuk iris_echo_server: kirim payload, tunggu echo,
//! catat latency, ulangi. Laporan akhir berisi persentil round-trip.
//!
//! Usage:
//!   cargo run --release --bin iris_echo_client -- --port 9999
//!   cargo run --release --bin iris_echo_client -- --path /tmp/iris-echo.sock
//!
//! Options:
//!   --port <PORT>    TCP port server (default: 9999 jika --path tidak ada)
//!   --host <HOST>    Host server (default: 127.0.0.1)
//!   --path <PATH>    Local socket path (menggantikan TCP)
//!   --count <N>      Jumlah round trip (default: 10000)
//!   --size <BYTES>   Ukuran payload (default: 64)
//!   --verbose        Progress tiap 1000 round trip

use std::cell::{Cell, RefCell};
use std::error::Error as StdError;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::{Duration, Instant};

use iris::{connect, ConnectOptions, Reactor};

struct ClientConfig {
    port: Option<u32>,
    host: Option<String>,
    path: Option<PathBuf>,
    count: usize,
    payload_size: usize,
    verbose: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            port: None,
            host: None,
            path: None,
            count: 10_000,
            payload_size: 64,
            verbose: false,
        }
    }
}

fn run_client(config: ClientConfig) -> Result<(), Box<dyn StdError>> {
    let mut reactor = Reactor::new()?;
    let handle = reactor.handle();

    let mut options = ConnectOptions {
        host: config.host.clone(),
        ..ConnectOptions::default()
    };
    match &config.path {
        Some(path) => options.path = Some(path.clone()),
        None => options.port = Some(config.port.unwrap_or(9999)),
    }

    let payload = vec![0x5Au8; config.payload_size];
    let count = config.count;
    let verbose = config.verbose;

    let latencies: Rc<RefCell<Vec<u64>>> = Rc::new(RefCell::new(Vec::with_capacity(count)));
    let sent_at = Rc::new(Cell::new(Instant::now()));
    let failed = Rc::new(Cell::new(false));
    let closed = Rc::new(Cell::new(false));

    let socket = connect(&handle, options)?;
    socket.set_nodelay(true);

    {
        let sent_at = sent_at.clone();
        let payload = payload.clone();
        socket.on_connect(move |sock| {
            if let Some(remote) = sock.remote_endpoint() {
                println!("✅ Connected to {}", remote);
            }
            sent_at.set(Instant::now());
            let _ = sock.write(&payload);
        });
    }
    {
        let latencies = latencies.clone();
        let sent_at = sent_at.clone();
        let pending = Rc::new(Cell::new(0usize));
        socket.on_data(move |sock, chunk| {
            // Echo bisa datang terpecah; hitung byte sampai payload utuh
            pending.set(pending.get() + chunk.len());
            if pending.get() < payload.len() {
                return;
            }
            pending.set(0);

            latencies
                .borrow_mut()
                .push(sent_at.get().elapsed().as_nanos() as u64);
            let done = latencies.borrow().len();
            if verbose && done % 1000 == 0 {
                println!("  [{}/{}] round trips", done, count);
            }
            if done < count {
                sent_at.set(Instant::now());
                let _ = sock.write(&payload);
            } else {
                sock.end().ok();
            }
        });
    }
    {
        let failed = failed.clone();
        socket.on_error(move |_, err| {
            eprintln!("❌ Socket error: {}", err);
            failed.set(true);
        });
    }
    {
        let closed = closed.clone();
        socket.on_close(move |_, _| closed.set(true));
    }

    let start = Instant::now();
    while latencies.borrow().len() < count && !failed.get() && !closed.get() {
        reactor.turn(Some(Duration::from_millis(100)))?;
    }
    let duration = start.elapsed();
    socket.destroy();
    reactor.run()?;

    if failed.get() {
        return Err("benchmark aborted by socket error".into());
    }
    if latencies.borrow().len() < count {
        return Err("connection closed before benchmark finished".into());
    }

    print_report(&mut latencies.borrow_mut(), duration, config.payload_size);
    Ok(())
}

fn print_report(samples: &mut Vec<u64>, duration: Duration, payload_size: usize) {
    samples.sort_unstable();
    let count = samples.len();
    let pct = |p: usize| samples[(count * p / 100).min(count - 1)] as f64 / 1000.0;

    println!("\n═══════════════════════════════════════════");
    println!("📊 ROUND-TRIP BENCHMARK RESULTS");
    println!("═══════════════════════════════════════════");
    println!("\nSummary:");
    println!("  Duration:      {:.2}s", duration.as_secs_f64());
    println!("  Round trips:   {}", count);
    println!("  Payload:       {} bytes", payload_size);
    println!(
        "  Throughput:    {:.1} round trips/sec",
        count as f64 / duration.as_secs_f64()
    );

    let avg = samples.iter().sum::<u64>() as f64 / count as f64 / 1000.0;
    println!("\nLatency (μs):");
    println!("  Min:           {:.1}", samples[0] as f64 / 1000.0);
    println!("  Avg:           {:.1}", avg);
    println!("  p50:           {:.1}", pct(50));
    println!("  p95:           {:.1}", pct(95));
    println!("  p99:           {:.1}", pct(99));
    println!("  Max:           {:.1}", samples[count - 1] as f64 / 1000.0);
    println!("\n═══════════════════════════════════════════");
}

fn parse_args() -> ClientConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = ClientConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" | "-p" => {
                if i + 1 < args.len() {
                    config.port = args[i + 1].parse().ok();
                    i += 1;
                }
            }
            "--host" | "-h" => {
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
            "--count" | "-c" => {
                if i + 1 < args.len() {
                    config.count = args[i + 1].parse().unwrap_or(10_000);
                    i += 1;
                }
            }
            "--size" | "-s" => {
                if i + 1 < args.len() {
                    config.payload_size = args[i + 1].parse().unwrap_or(64);
                    i += 1;
                }
            }
            "--verbose" | "-v" => {
                config.verbose = true;
            }
            "--help" => {
                println!("Iris Echo Client - Round-Trip Benchmark\n");
                println!("Usage: iris_echo_client [OPTIONS]\n");
                println!("Options:");
                println!("  -p, --port <PORT>    Server TCP port (default: 9999)");
                println!("  -h, --host <HOST>    Server host (default: 127.0.0.1)");
                println!("      --path <PATH>    Local socket path (replaces TCP)");
                println!("  -c, --count <N>      Round trips (default: 10000)");
                println!("  -s, --size <BYTES>   Payload size (default: 64)");
                println!("  -v, --verbose        Progress output");
                println!("      --help           Show this help");
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

    println!("🚀 Iris Echo Client");
    println!("===================\n");

    if let Err(e) = run_client(config) {
        eprintln!("❌ Client error: {}", e);
        eprintln!("\n💡 Make sure the echo server is running:");
        eprintln!("   cargo run --release --bin iris_echo_server");
        std::process::exit(1);
    }
}
