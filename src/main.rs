//! Iris - Transport-Agnostic Connection Abstraction
//!
//! Smoke driver: mengukur round-trip latency lewat event loop untuk
//! kedua transport, plus throughput jalur tulis. Semua skenario
//! berjalan self-contained di satu proses (server + client di satu
//! reactor).

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};

use iris::{
    connect, create_server, ConnectOptions, ListenOptions, Reactor, ServerOptions,
};

const ITERATIONS: usize = 5_000;
const PING: &[u8] = b"ping-ping-ping-ping-ping-ping-ping-ping-ping-ping-ping-ping-ping";

fn main() {
    println!("🚀 Iris Connection Layer - Smoke Benchmark");
    println!("==========================================\n");

    bench_tcp_round_trip();
    bench_local_round_trip();
    bench_write_path();

    println!("\n✅ All smoke benchmarks complete!");
    println!("\nTo start echo server: cargo run --release --bin iris_echo_server -- --port 9999");
}

/// Echo server + ping client di atas TCP loopback
fn bench_tcp_round_trip() {
    println!("📊 TCP Round-Trip (127.0.0.1, ephemeral port)");
    println!("---------------------------------------------");

    let mut reactor = Reactor::new().expect("reactor");
    let handle = reactor.handle();

    let server = create_server(&handle, ServerOptions::default());
    server.on_connection(|_, socket| {
        socket.set_nodelay(true);
        socket.on_data(|sock, chunk| {
            let _ = sock.write(chunk);
        });
    });
    server
        .listen(ListenOptions {
            port: Some(0),
            host: Some("127.0.0.1".to_string()),
            ..ListenOptions::default()
        })
        .expect("listen");
    let port = server.address().expect("bound").port().expect("tcp port");

    let latencies = Rc::new(RefCell::new(Vec::with_capacity(ITERATIONS)));
    let sent_at = Rc::new(Cell::new(Instant::now()));

    let client = connect(
        &handle,
        ConnectOptions {
            port: Some(port as u32),
            host: Some("127.0.0.1".to_string()),
            ..ConnectOptions::default()
        },
    )
    .expect("connect");
    client.set_nodelay(true);
    {
        let sent_at = sent_at.clone();
        client.on_connect(move |sock| {
            sent_at.set(Instant::now());
            let _ = sock.write(PING);
        });
    }
    {
        let latencies = latencies.clone();
        let sent_at = sent_at.clone();
        client.on_data(move |sock, _chunk| {
            latencies
                .borrow_mut()
                .push(sent_at.get().elapsed().as_nanos() as u64);
            if latencies.borrow().len() < ITERATIONS {
                sent_at.set(Instant::now());
                let _ = sock.write(PING);
            } else {
                sock.destroy();
            }
        });
    }

    let start = Instant::now();
    while latencies.borrow().len() < ITERATIONS {
        reactor.turn(Some(Duration::from_millis(10))).expect("turn");
    }
    let duration = start.elapsed();

    server.close().expect("close");
    reactor.run().expect("drain");

    print_latency_report(&mut latencies.borrow_mut(), duration);
}

/// Skenario yang sama lewat local socket (IPC path)
fn bench_local_round_trip() {
    println!("📊 Local Socket Round-Trip (IPC path)");
    println!("-------------------------------------");

    let path = std::env::temp_dir().join(format!("iris-smoke-{}.sock", std::process::id()));
    let _ = std::fs::remove_file(&path);

    let mut reactor = Reactor::new().expect("reactor");
    let handle = reactor.handle();

    let server = create_server(&handle, ServerOptions::default());
    server.on_connection(|_, socket| {
        socket.on_data(|sock, chunk| {
            let _ = sock.write(chunk);
        });
    });
    server
        .listen(ListenOptions {
            path: Some(path.clone()),
            ..ListenOptions::default()
        })
        .expect("listen");

    let latencies = Rc::new(RefCell::new(Vec::with_capacity(ITERATIONS)));
    let sent_at = Rc::new(Cell::new(Instant::now()));

    let client = connect(
        &handle,
        ConnectOptions {
            path: Some(path.clone()),
            ..ConnectOptions::default()
        },
    )
    .expect("connect");
    {
        let sent_at = sent_at.clone();
        client.on_connect(move |sock| {
            sent_at.set(Instant::now());
            let _ = sock.write(PING);
        });
    }
    {
        let latencies = latencies.clone();
        let sent_at = sent_at.clone();
        client.on_data(move |sock, _chunk| {
            latencies
                .borrow_mut()
                .push(sent_at.get().elapsed().as_nanos() as u64);
            if latencies.borrow().len() < ITERATIONS {
                sent_at.set(Instant::now());
                let _ = sock.write(PING);
            } else {
                sock.destroy();
            }
        });
    }

    let start = Instant::now();
    while latencies.borrow().len() < ITERATIONS {
        reactor.turn(Some(Duration::from_millis(10))).expect("turn");
    }
    let duration = start.elapsed();

    server.close().expect("close");
    reactor.run().expect("drain");

    print_latency_report(&mut latencies.borrow_mut(), duration);
}

/// Throughput jalur tulis: spill buffer + drain lewat local socket
fn bench_write_path() {
    println!("📊 Write Path Throughput (64 MB, 16KB chunks)");
    println!("---------------------------------------------");

    const CHUNK_SIZE: usize = 16 * 1024;
    const TOTAL_BYTES: usize = 64 * 1024 * 1024;

    let path = std::env::temp_dir().join(format!("iris-smoke-wr-{}.sock", std::process::id()));
    let _ = std::fs::remove_file(&path);

    let mut reactor = Reactor::new().expect("reactor");
    let handle = reactor.handle();

    let received = Rc::new(Cell::new(0usize));
    let server = create_server(&handle, ServerOptions::default());
    {
        let received = received.clone();
        server.on_connection(move |_, socket| {
            let received = received.clone();
            socket.on_data(move |_, chunk| {
                received.set(received.get() + chunk.len());
            });
        });
    }
    server
        .listen(ListenOptions {
            path: Some(path.clone()),
            ..ListenOptions::default()
        })
        .expect("listen");

    let client = connect(
        &handle,
        ConnectOptions {
            path: Some(path.clone()),
            ..ConnectOptions::default()
        },
    )
    .expect("connect");

    // Tunggu sampai terkoneksi
    while client.connecting() {
        reactor.turn(Some(Duration::from_millis(10))).expect("turn");
    }

    let chunk = vec![0xA5u8; CHUNK_SIZE];
    let start = Instant::now();
    let mut sent = 0usize;
    while sent < TOTAL_BYTES {
        match client.write(&chunk) {
            Ok(true) => sent += CHUNK_SIZE,
            Ok(false) => {
                // High-water mark terlewati: biarkan reactor menguras
                // spill sebelum produksi berikutnya
                sent += CHUNK_SIZE;
                while client.buffer_size() > 0 {
                    reactor.turn(Some(Duration::from_millis(10))).expect("turn");
                }
            }
            Err(e) => {
                eprintln!("  write failed: {}", e);
                break;
            }
        }
    }
    while received.get() < sent {
        reactor.turn(Some(Duration::from_millis(10))).expect("turn");
    }
    let duration = start.elapsed();

    client.destroy();
    server.close().expect("close");
    reactor.run().expect("drain");

    let mb = sent as f64 / (1024.0 * 1024.0);
    println!("  Bytes sent:   {:.0} MB", mb);
    println!("  Duration:     {:.2}s", duration.as_secs_f64());
    println!("  Throughput:   {:.1} MB/sec\n", mb / duration.as_secs_f64());
}

fn print_latency_report(samples: &mut Vec<u64>, duration: Duration) {
    samples.sort_unstable();
    let count = samples.len();
    let min = samples[0] as f64 / 1000.0;
    let max = samples[count - 1] as f64 / 1000.0;
    let avg = samples.iter().sum::<u64>() as f64 / count as f64 / 1000.0;
    let p50 = samples[count / 2] as f64 / 1000.0;
    let p99 = samples[count * 99 / 100] as f64 / 1000.0;

    println!("  Round trips:  {}", count);
    println!("  Latency min/avg/max: {:.1}/{:.1}/{:.1} μs", min, avg, max);
    println!("  Latency p50/p99:     {:.1}/{:.1} μs", p50, p99);
    println!(
        "  Throughput:   {:.0} round trips/sec\n",
        count as f64 / duration.as_secs_f64()
    );
}
