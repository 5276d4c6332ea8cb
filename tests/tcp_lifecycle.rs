//! TCP Lifecycle Integration Tests
//!
//! Menguji state machine Socket/Server end-to-end lewat transport TCP
//! di loopback: mirror endpoint, admission control, half-close,
//! idempotensi destroy, backpressure, dan jalur error.
//!
//! Usage:
//!   cargo test --test tcp_lifecycle

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};

use iris::{
    connect, create_server, ConnectOptions, Error, ListenOptions, Reactor, Server, ServerOptions,
    ServerState, Socket, SocketState,
};

/// Putar reactor sampai kondisi terpenuhi; panic saat lewat batas waktu
fn pump(reactor: &mut Reactor, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done() {
        if Instant::now() > deadline {
            panic!("pump timed out");
        }
        reactor.turn(Some(Duration::from_millis(10))).unwrap();
    }
}

/// Server echo di port ephemeral loopback; socket hasil accept
/// disimpan supaya test bisa memeriksa sisi server
fn echo_server(
    handle: &iris::Handle,
    options: ServerOptions,
) -> (Server, u16, Rc<RefCell<Vec<Socket>>>) {
    let accepted = Rc::new(RefCell::new(Vec::new()));
    let server = create_server(handle, options);
    {
        let accepted = accepted.clone();
        server.on_connection(move |_, socket| {
            socket.on_data(|sock, chunk| {
                let _ = sock.write(chunk);
            });
            accepted.borrow_mut().push(socket);
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
    (server, port, accepted)
}

fn tcp_client(handle: &iris::Handle, port: u16) -> Socket {
    connect(
        handle,
        ConnectOptions {
            port: Some(port as u32),
            host: Some("127.0.0.1".to_string()),
            ..ConnectOptions::default()
        },
    )
    .unwrap()
}

#[test]
fn test_connected_endpoints_are_mutual_mirrors() {
    let mut reactor = Reactor::new().unwrap();
    let handle = reactor.handle();
    let (server, port, accepted) = echo_server(&handle, ServerOptions::default());

    let client = tcp_client(&handle, port);
    pump(&mut reactor, || {
        !client.connecting() && !accepted.borrow().is_empty()
    });

    let peer = accepted.borrow()[0].clone();
    assert_eq!(client.state(), SocketState::Connected);
    assert_eq!(peer.state(), SocketState::Connected);

    assert_eq!(client.remote_endpoint(), peer.local_endpoint());
    assert_eq!(client.local_endpoint(), peer.remote_endpoint());
    assert_eq!(client.remote_port(), Some(port));
    assert_eq!(client.remote_family().unwrap().to_string(), "IPv4");

    client.destroy();
    server.close().unwrap();
    reactor.run().unwrap();
}

#[test]
fn test_conflicting_address_fails_before_any_connect() {
    let reactor = Reactor::new().unwrap();
    let handle = reactor.handle();

    let socket = Socket::new(&handle, Default::default()).unwrap();
    let err = socket
        .connect(ConnectOptions {
            port: Some(80),
            path: Some("/tmp/iris-test.sock".into()),
            ..ConnectOptions::default()
        })
        .unwrap_err();
    assert!(matches!(err, Error::ConflictingAddress));
    // Kegagalan validasi synchronous: belum ada transisi state
    assert_eq!(socket.state(), SocketState::Idle);

    let err = socket.connect(ConnectOptions::default()).unwrap_err();
    assert!(matches!(err, Error::MissingAddress));

    let err = socket
        .connect(ConnectOptions {
            port: Some(100_000),
            ..ConnectOptions::default()
        })
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
    assert_eq!(socket.state(), SocketState::Idle);
}

#[test]
fn test_max_connections_fail_fast_admission() {
    const CEILING: usize = 2;
    const ATTEMPTS: usize = 5;

    let mut reactor = Reactor::new().unwrap();
    let handle = reactor.handle();
    let (server, port, accepted) = echo_server(
        &handle,
        ServerOptions {
            max_connections: Some(CEILING),
            ..ServerOptions::default()
        },
    );

    let settled = Rc::new(Cell::new(0usize));
    let mut clients = Vec::new();
    for _ in 0..ATTEMPTS {
        let client = tcp_client(&handle, port);
        // Consumer kosong supaya EOF dari penolakan server terbaca
        client.on_data(|_, _| {});
        let settled_on_close = settled.clone();
        client.on_close(move |_, _| settled_on_close.set(settled_on_close.get() + 1));
        clients.push(client);
    }

    // Koneksi di atas plafon langsung ditutup server: client-nya
    // mengamati close tanpa pernah diantar lewat `connection`
    pump(&mut reactor, || {
        accepted.borrow().len() >= CEILING && settled.get() >= ATTEMPTS - CEILING
    });
    for _ in 0..20 {
        reactor.turn(Some(Duration::from_millis(5))).unwrap();
    }

    assert_eq!(accepted.borrow().len(), CEILING);
    assert_eq!(server.connection_count(), CEILING);

    for client in &clients {
        client.destroy();
    }
    server.close().unwrap();
    reactor.run().unwrap();
    assert_eq!(server.connection_count(), 0);
}

#[test]
fn test_graceful_end_emits_single_clean_close() {
    let mut reactor = Reactor::new().unwrap();
    let handle = reactor.handle();
    let (server, port, accepted) = echo_server(&handle, ServerOptions::default());

    let client = tcp_client(&handle, port);
    let closes = Rc::new(RefCell::new(Vec::new()));
    {
        let closes = closes.clone();
        client.on_close(move |_, had_error| closes.borrow_mut().push(had_error));
    }

    pump(&mut reactor, || {
        !client.connecting() && !accepted.borrow().is_empty()
    });

    client.end().unwrap();
    // end() idempotent begitu half-closed
    client.end().unwrap();

    // Peer (allow_half_open=false) membalas FIN dan auto-destroy;
    // kedua arah tertutup -> client mencapai Closed
    pump(&mut reactor, || client.state() == SocketState::Closed);
    pump(&mut reactor, || !closes.borrow().is_empty());

    assert_eq!(closes.borrow().as_slice(), &[false]);
    assert_eq!(accepted.borrow()[0].state(), SocketState::Closed);

    server.close().unwrap();
    reactor.run().unwrap();
}

#[test]
fn test_destroy_is_idempotent_single_close_notification() {
    let mut reactor = Reactor::new().unwrap();
    let handle = reactor.handle();
    let (server, port, _accepted) = echo_server(&handle, ServerOptions::default());

    let client = tcp_client(&handle, port);
    let close_count = Rc::new(Cell::new(0u32));
    {
        let close_count = close_count.clone();
        client.on_close(move |_, _| close_count.set(close_count.get() + 1));
    }

    pump(&mut reactor, || !client.connecting());

    client.destroy();
    client.destroy();
    assert_eq!(client.state(), SocketState::Closed);

    server.close().unwrap();
    reactor.run().unwrap();
    assert_eq!(close_count.get(), 1);
}

#[test]
fn test_write_on_closed_socket_fails_without_notification() {
    let mut reactor = Reactor::new().unwrap();
    let handle = reactor.handle();
    let (server, port, _accepted) = echo_server(&handle, ServerOptions::default());

    let client = tcp_client(&handle, port);
    let errors = Rc::new(Cell::new(0u32));
    {
        let errors = errors.clone();
        client.on_error(move |_, _| errors.set(errors.get() + 1));
    }

    pump(&mut reactor, || !client.connecting());
    client.destroy();

    let err = client.write(b"too late").unwrap_err();
    assert!(matches!(err, Error::SocketClosed));

    server.close().unwrap();
    reactor.run().unwrap();
    // write pada socket mati adalah error synchronous, bukan notifikasi
    assert_eq!(errors.get(), 0);
}

#[test]
fn test_ephemeral_listen_and_strict_double_close() {
    let mut reactor = Reactor::new().unwrap();
    let handle = reactor.handle();

    let server = create_server(&handle, ServerOptions::default());
    let listening = Rc::new(Cell::new(false));
    let closed = Rc::new(Cell::new(false));
    {
        let listening = listening.clone();
        server.on_listening(move |_| listening.set(true));
    }
    {
        let closed = closed.clone();
        server.on_close(move |_| closed.set(true));
    }

    server
        .listen(ListenOptions {
            port: Some(0),
            host: Some("127.0.0.1".to_string()),
            ..ListenOptions::default()
        })
        .unwrap();

    // Notifikasi listening diantar asynchronous, setelah listen() return
    assert!(!listening.get());
    pump(&mut reactor, || listening.get());

    let port = server.address().unwrap().port().unwrap();
    assert!(port > 0);

    server.close().unwrap();
    assert_eq!(server.state(), ServerState::Closed);
    assert!(matches!(server.close(), Err(Error::ServerNotRunning)));

    pump(&mut reactor, || closed.get());
}

#[test]
fn test_connect_refused_emits_error_then_close() {
    // Cari port yang dijamin kosong: bind lalu lepas
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let mut reactor = Reactor::new().unwrap();
    let handle = reactor.handle();

    let client = tcp_client(&handle, port);
    let events = Rc::new(RefCell::new(Vec::new()));
    {
        let events = events.clone();
        client.on_error(move |_, err| {
            let is_connection_failure = matches!(err, Error::ConnectionFailed(_));
            events.borrow_mut().push(format!("error:{}", is_connection_failure));
        });
    }
    {
        let events = events.clone();
        client.on_close(move |_, had_error| {
            events.borrow_mut().push(format!("close:{}", had_error));
        });
    }

    pump(&mut reactor, || events.borrow().len() >= 2);

    // error selalu diikuti closure, urutannya tetap
    assert_eq!(
        events.borrow().as_slice(),
        &["error:true".to_string(), "close:true".to_string()]
    );
    assert_eq!(client.state(), SocketState::Closed);
}

#[test]
fn test_backpressure_returns_false_then_single_drain() {
    let mut reactor = Reactor::new().unwrap();
    let handle = reactor.handle();

    // Server menguras tanpa echo supaya spill client bisa terflush
    let received = Rc::new(Cell::new(0usize));
    let server = create_server(&handle, ServerOptions::default());
    {
        let received = received.clone();
        server.on_connection(move |_, socket| {
            let received = received.clone();
            socket.on_data(move |_, chunk| received.set(received.get() + chunk.len()));
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

    let client = tcp_client(&handle, port);
    let drains = Rc::new(Cell::new(0u32));
    {
        let drains = drains.clone();
        client.on_drain(move |_| drains.set(drains.get() + 1));
    }
    pump(&mut reactor, || !client.connecting());

    let chunk = vec![0x42u8; 64 * 1024];
    let mut sent = 0usize;
    let mut saw_backpressure = false;
    for _ in 0..512 {
        match client.write(&chunk) {
            Ok(true) => sent += chunk.len(),
            Ok(false) => {
                sent += chunk.len();
                saw_backpressure = true;
                break;
            }
            Err(e) => panic!("write failed: {}", e),
        }
    }
    assert!(saw_backpressure, "high-water mark never reached");

    pump(&mut reactor, || client.buffer_size() == 0);
    pump(&mut reactor, || received.get() >= sent);
    // Tepat satu drain untuk satu episode backpressure
    assert_eq!(drains.get(), 1);

    client.destroy();
    server.close().unwrap();
    reactor.run().unwrap();
}

#[test]
fn test_destroy_soon_flushes_spill_before_teardown() {
    let mut reactor = Reactor::new().unwrap();
    let handle = reactor.handle();

    let received = Rc::new(Cell::new(0usize));
    let server = create_server(&handle, ServerOptions::default());
    {
        let received = received.clone();
        server.on_connection(move |_, socket| {
            let received = received.clone();
            socket.on_data(move |_, chunk| received.set(received.get() + chunk.len()));
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

    let client = tcp_client(&handle, port);
    pump(&mut reactor, || !client.connecting());

    // Isi spill sampai melewati high-water mark
    let chunk = vec![0x37u8; 64 * 1024];
    let mut sent = 0usize;
    for _ in 0..256 {
        match client.write(&chunk) {
            Ok(true) => sent += chunk.len(),
            Ok(false) => {
                sent += chunk.len();
                break;
            }
            Err(e) => panic!("write failed: {}", e),
        }
    }
    assert!(client.buffer_size() > 0, "spill never filled");

    // destroy_soon = end sekarang, destroy begitu spill terflush;
    // bytes yang sudah diterima write() tidak boleh hilang
    client.destroy_soon();
    assert_ne!(client.state(), SocketState::Closed);

    pump(&mut reactor, || client.state() == SocketState::Closed);
    pump(&mut reactor, || received.get() >= sent);
    assert_eq!(client.bytes_written() as usize, sent);
    assert_eq!(client.buffer_size(), 0);

    server.close().unwrap();
    reactor.run().unwrap();
}

#[test]
fn test_bind_failure_never_stays_idle() {
    let mut reactor = Reactor::new().unwrap();
    let handle = reactor.handle();

    let first = create_server(&handle, ServerOptions::default());
    first
        .listen(ListenOptions {
            port: Some(0),
            host: Some("127.0.0.1".to_string()),
            exclusive: true,
            ..ListenOptions::default()
        })
        .unwrap();
    let port = first.address().unwrap().port().unwrap();

    let second = create_server(&handle, ServerOptions::default());
    let errored = Rc::new(Cell::new(false));
    {
        let errored = errored.clone();
        second.on_error(move |_, err| {
            errored.set(matches!(err, Error::ConnectionFailed(_)));
        });
    }
    second
        .listen(ListenOptions {
            port: Some(port as u32),
            host: Some("127.0.0.1".to_string()),
            exclusive: true,
            ..ListenOptions::default()
        })
        .unwrap();

    // Bind gagal: bukan Idle, menuju Closed dengan notifikasi error
    assert_ne!(second.state(), ServerState::Idle);
    pump(&mut reactor, || errored.get());
    assert!(second.errored());
    assert_eq!(second.state(), ServerState::Closed);

    first.close().unwrap();
    reactor.run().unwrap();
}

#[test]
fn test_pinned_local_address() {
    let mut reactor = Reactor::new().unwrap();
    let handle = reactor.handle();
    let (server, port, _accepted) = echo_server(&handle, ServerOptions::default());

    let client = Socket::new(&handle, Default::default()).unwrap();
    client
        .connect(ConnectOptions {
            port: Some(port as u32),
            host: Some("127.0.0.1".to_string()),
            local_address: Some("127.0.0.1".to_string()),
            local_port: Some(0),
            ..ConnectOptions::default()
        })
        .unwrap();

    pump(&mut reactor, || !client.connecting());
    assert_eq!(client.state(), SocketState::Connected);
    assert_eq!(client.local_addr().unwrap().to_string(), "127.0.0.1");

    // Binding sisi klien wajib IP literal: validasi synchronous
    let bad = Socket::new(&handle, Default::default()).unwrap();
    let err = bad
        .connect(ConnectOptions {
            port: Some(port as u32),
            local_address: Some("localhost".to_string()),
            ..ConnectOptions::default()
        })
        .unwrap_err();
    assert!(matches!(err, Error::InvalidIpAddress(_)));

    // Family lokal dan remote harus cocok
    let mismatch = Socket::new(&handle, Default::default()).unwrap();
    let err = mismatch
        .connect(ConnectOptions {
            port: Some(port as u32),
            host: Some("127.0.0.1".to_string()),
            local_address: Some("::1".to_string()),
            ..ConnectOptions::default()
        })
        .unwrap_err();
    assert!(matches!(err, Error::InvalidAddressFamily));

    client.destroy();
    server.close().unwrap();
    reactor.run().unwrap();
}

#[test]
fn test_inactivity_timeout_is_notification_only() {
    let mut reactor = Reactor::new().unwrap();
    let handle = reactor.handle();
    let (server, port, _accepted) = echo_server(&handle, ServerOptions::default());

    let client = tcp_client(&handle, port);
    let fired = Rc::new(Cell::new(0u32));
    {
        let fired = fired.clone();
        client.on_timeout(move |_| fired.set(fired.get() + 1));
    }
    client.set_timeout(Some(Duration::from_millis(50)));

    pump(&mut reactor, || fired.get() >= 1);
    // Timer fire tidak menutup apa pun; keputusan milik caller
    assert_eq!(client.state(), SocketState::Connected);

    // Aktivitas tulis me-rearm timer; fire kedua menyusul
    client.write(b"still alive").unwrap();
    pump(&mut reactor, || fired.get() >= 2);
    assert_eq!(client.state(), SocketState::Connected);

    client.destroy();
    server.close().unwrap();
    reactor.run().unwrap();
}

#[test]
fn test_get_connections_answers_on_next_tick() {
    let mut reactor = Reactor::new().unwrap();
    let handle = reactor.handle();
    let (server, port, accepted) = echo_server(&handle, ServerOptions::default());

    let client = tcp_client(&handle, port);
    pump(&mut reactor, || !accepted.borrow().is_empty());

    let answer = Rc::new(Cell::new(None::<usize>));
    {
        let answer = answer.clone();
        server.get_connections(move |count| answer.set(Some(count)));
    }
    // Jawaban selalu snapshot asynchronous: belum ada sebelum tick
    assert!(answer.get().is_none());
    pump(&mut reactor, || answer.get().is_some());
    assert_eq!(answer.get(), Some(1));

    client.destroy();
    server.close().unwrap();
    reactor.run().unwrap();
}

#[test]
fn test_unrefed_server_does_not_hold_run() {
    let mut reactor = Reactor::new().unwrap();
    let handle = reactor.handle();

    let server = create_server(&handle, ServerOptions::default());
    server
        .listen(ListenOptions {
            port: Some(0),
            host: Some("127.0.0.1".to_string()),
            ..ListenOptions::default()
        })
        .unwrap();
    server.unref();

    // Tidak ada entry ref'd yang hidup: run() selesai, listener tetap ada
    reactor.run().unwrap();
    assert_eq!(server.state(), ServerState::Listening);

    server.ref_();
    server.close().unwrap();
    reactor.run().unwrap();
}
