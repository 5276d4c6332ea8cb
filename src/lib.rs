//! Iris - Transport-Agnostic Connection Abstraction
//!
//! Arsitektur:
//! - Satu API untuk dua transport: TCP (`host:port`) dan local socket
//!   / IPC (filesystem path)
//! - Event-driven: reactor single-thread di atas mio (epoll/kqueue)
//! - State machine eksplisit untuk lifecycle koneksi dan listener
//! - Backpressure: high-water mark di jalur tulis + notifikasi `drain`
//!
//! Pola pakai: buat satu [`Reactor`], bagikan [`Handle`]-nya ke
//! konstruktor [`connect`]/[`create_server`], daftarkan callback
//! `on_*`, lalu `reactor.run()`.

pub mod addr;
pub mod error;
pub mod network;
pub mod reactor;

pub use addr::{is_ip, is_ipv4, is_ipv6, Address, AddressFamily, Endpoint};
pub use error::{Error, Result};
pub use network::{
    connect, create_connection, create_server, ConnectOptions, ListenOptions, OnRead, Origin,
    Server, ServerOptions, ServerState, Socket, SocketOptions, SocketState,
    TransportCapabilities,
};
pub use reactor::{Handle, Platform, Reactor};
