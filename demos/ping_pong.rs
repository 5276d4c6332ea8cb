//! Ping Pong - End-to-End Demo
//!
//! Latihan lengkap connection layer dalam satu proses: server dan
//! client berbagi satu reactor, dua transport diuji dengan kode
//! penanganan yang sama.
//!
//! Skenario:
//! 1. TCP echo: connect, ping, echo utuh, graceful end, close(false)
//! 2. Local socket echo: skenario sama lewat IPC path
//! 3. Admission control: max_connections menolak koneksi berlebih
//! 4. Inactivity timeout: notifikasi tanpa menutup socket
//! 5. Backpressure: high-water mark + notifikasi drain
//!
//! Usage:
//!   cargo run --release --example ping_pong

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};

use iris::{
    connect, create_server, ConnectOptions, Endpoint, ListenOptions, Reactor, ServerOptions,
    SocketState,
};

fn main() {
    println!("🏓 Iris Ping Pong - End-to-End Demo");
    println!("===================================\n");

    let mut passed = 0;
    let mut failed = 0;
    let scenarios: [(&str, fn() -> bool); 5] = [
        ("TCP echo round trip", scenario_tcp_echo),
        ("Local socket echo round trip", scenario_local_echo),
        ("Admission control (max_connections)", scenario_admission),
        ("Inactivity timeout notification", scenario_timeout),
        ("Backpressure high-water mark + drain", scenario_backpressure),
    ];

    for (name, scenario) in scenarios {
        print!("▶ {} ... ", name);
        if scenario() {
            println!("✅");
            passed += 1;
        } else {
            println!("❌");
            failed += 1;
        }
    }

    println!("\n===================================");
    println!("Result: {} passed, {} failed", passed, failed);
    if failed > 0 {
        std::process::exit(1);
    }
}

/// Putar reactor sampai kondisi terpenuhi atau menyerah
fn pump(reactor: &mut Reactor, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done() {
        if Instant::now() > deadline {
            return false;
        }
        if reactor.turn(Some(Duration::from_millis(10))).is_err() {
            return false;
        }
    }
    true
}

fn temp_sock(tag: &str) -> std::path::PathBuf {
    let path = std::env::temp_dir().join(format!("iris-demo-{}-{}.sock", tag, std::process::id()));
    let _ = std::fs::remove_file(&path);
    path
}

fn scenario_tcp_echo() -> bool {
    let mut reactor = Reactor::new().unwrap();
    let handle = reactor.handle();

    let server = create_server(&handle, ServerOptions::default());
    server.on_connection(|_, socket| {
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
        .unwrap();
    let port = match server.address() {
        Some(Endpoint::Tcp(addr)) => addr.port(),
        _ => return false,
    };

    let echoed = Rc::new(RefCell::new(Vec::new()));
    let closed_clean = Rc::new(Cell::new(false));

    let client = connect(
        &handle,
        ConnectOptions {
            port: Some(port as u32),
            host: Some("127.0.0.1".to_string()),
            ..ConnectOptions::default()
        },
    )
    .unwrap();
    client.on_connect(|sock| {
        let _ = sock.write(b"ping");
    });
    {
        let echoed = echoed.clone();
        client.on_data(move |sock, chunk| {
            echoed.borrow_mut().extend_from_slice(chunk);
            sock.end().ok();
        });
    }
    {
        let closed_clean = closed_clean.clone();
        client.on_close(move |_, had_error| closed_clean.set(!had_error));
    }

    let ok = pump(&mut reactor, || closed_clean.get());
    server.close().ok();
    let _ = reactor.run();

    ok && echoed.borrow().as_slice() == b"ping" && client.state() == SocketState::Closed
}

fn scenario_local_echo() -> bool {
    let path = temp_sock("echo");
    let mut reactor = Reactor::new().unwrap();
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
        .unwrap();

    let echoed = Rc::new(RefCell::new(Vec::new()));
    let closed_clean = Rc::new(Cell::new(false));

    let client = connect(
        &handle,
        ConnectOptions {
            path: Some(path.clone()),
            ..ConnectOptions::default()
        },
    )
    .unwrap();
    client.on_connect(|sock| {
        let _ = sock.write(b"ping over ipc");
    });
    {
        let echoed = echoed.clone();
        client.on_data(move |sock, chunk| {
            echoed.borrow_mut().extend_from_slice(chunk);
            sock.end().ok();
        });
    }
    {
        let closed_clean = closed_clean.clone();
        client.on_close(move |_, had_error| closed_clean.set(!had_error));
    }

    let ok = pump(&mut reactor, || closed_clean.get());
    server.close().ok();
    let _ = reactor.run();

    // Path di-unlink saat server close
    ok && echoed.borrow().as_slice() == b"ping over ipc" && !path.exists()
}

fn scenario_admission() -> bool {
    const CEILING: usize = 2;
    const ATTEMPTS: usize = 4;

    let mut reactor = Reactor::new().unwrap();
    let handle = reactor.handle();

    let delivered = Rc::new(Cell::new(0usize));
    let server = create_server(
        &handle,
        ServerOptions {
            max_connections: Some(CEILING),
            ..ServerOptions::default()
        },
    );
    {
        let delivered = delivered.clone();
        server.on_connection(move |_, socket| {
            delivered.set(delivered.get() + 1);
            // Tahan koneksi tetap hidup selama skenario
            socket.on_data(|_, _| {});
        });
    }
    server
        .listen(ListenOptions {
            port: Some(0),
            host: Some("127.0.0.1".to_string()),
            ..ListenOptions::default()
        })
        .unwrap();
    let port = server.address().unwrap().port().unwrap();

    let settled = Rc::new(Cell::new(0usize));
    let mut clients = Vec::new();
    for _ in 0..ATTEMPTS {
        let client = connect(
            &handle,
            ConnectOptions {
                port: Some(port as u32),
                host: Some("127.0.0.1".to_string()),
                ..ConnectOptions::default()
            },
        )
        .unwrap();
        {
            let settled = settled.clone();
            client.on_connect(move |_| settled.set(settled.get() + 1));
        }
        {
            // Koneksi yang ditolak langsung ditutup server
            let settled = settled.clone();
            client.on_close(move |_, _| settled.set(settled.get() + 1));
        }
        clients.push(client);
    }

    // Semua attempt selesai connect (beberapa lalu ditutup paksa)
    let ok = pump(&mut reactor, || {
        settled.get() >= ATTEMPTS && delivered.get() >= CEILING
    });
    // Biarkan penolakan terproses
    for _ in 0..20 {
        let _ = reactor.turn(Some(Duration::from_millis(5)));
    }

    let result = ok && delivered.get() == CEILING && server.connection_count() <= CEILING;
    for client in &clients {
        client.destroy();
    }
    server.close().ok();
    let _ = reactor.run();
    result
}

fn scenario_timeout() -> bool {
    let path = temp_sock("timeout");
    let mut reactor = Reactor::new().unwrap();
    let handle = reactor.handle();

    let server = create_server(&handle, ServerOptions::default());
    server.on_connection(|_, socket| {
        socket.on_data(|_, _| {});
    });
    server
        .listen(ListenOptions {
            path: Some(path.clone()),
            ..ListenOptions::default()
        })
        .unwrap();

    let fired = Rc::new(Cell::new(false));
    let client = connect(
        &handle,
        ConnectOptions {
            path: Some(path.clone()),
            ..ConnectOptions::default()
        },
    )
    .unwrap();
    client.set_timeout(Some(Duration::from_millis(50)));
    {
        let fired = fired.clone();
        client.on_timeout(move |sock| {
            // Timeout murni notifikasi: socket masih hidup di sini
            fired.set(sock.state() == SocketState::Connected);
        });
    }

    let ok = pump(&mut reactor, || fired.get());
    let still_alive = client.state() == SocketState::Connected;

    client.destroy();
    server.close().ok();
    let _ = reactor.run();
    ok && still_alive
}

fn scenario_backpressure() -> bool {
    let path = temp_sock("bp");
    let mut reactor = Reactor::new().unwrap();
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
        .unwrap();

    let drained = Rc::new(Cell::new(false));
    let client = connect(
        &handle,
        ConnectOptions {
            path: Some(path.clone()),
            ..ConnectOptions::default()
        },
    )
    .unwrap();
    {
        let drained = drained.clone();
        client.on_drain(move |_| drained.set(true));
    }

    if !pump(&mut reactor, || !client.connecting()) {
        return false;
    }

    // Tulis sampai spill melewati high-water mark
    let chunk = vec![0x42u8; 64 * 1024];
    let mut sent = 0usize;
    let mut saw_backpressure = false;
    for _ in 0..256 {
        match client.write(&chunk) {
            Ok(true) => sent += chunk.len(),
            Ok(false) => {
                sent += chunk.len();
                saw_backpressure = true;
                break;
            }
            Err(_) => return false,
        }
    }

    // Spill terkuras: tepat satu notifikasi drain menyusul
    let ok = saw_backpressure
        && pump(&mut reactor, || drained.get())
        && pump(&mut reactor, || received.get() >= sent);

    client.destroy();
    server.close().ok();
    let _ = reactor.run();
    ok
}
