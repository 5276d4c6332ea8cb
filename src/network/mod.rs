//! Network Layer: Socket + Server di atas reactor
//!
//! Dua transport di balik satu API:
//! - TCP (`host:port`)
//! - Local socket / IPC (filesystem path)
//!
//! Transport dipilih per call dari bentuk address yang disuplai
//! (`port` berarti TCP, `path` berarti local socket); kode penanganan
//! koneksi ditulis sekali dan berlaku untuk keduanya.

pub(crate) mod server;
pub(crate) mod socket;

pub use server::{ListenOptions, Server, ServerOptions, ServerState};
pub use socket::{
    ConnectOptions, OnRead, Origin, Socket, SocketOptions, SocketState, TransportCapabilities,
};

use crate::error::Result;
use crate::reactor::Handle;

/// Bangun socket baru dan langsung `connect()` dalam satu call
pub fn connect(handle: &Handle, options: ConnectOptions) -> Result<Socket> {
    let socket = Socket::new(handle, SocketOptions::default())?;
    socket.connect(options)?;
    Ok(socket)
}

/// Alias `connect`, nama factory yang sama lazimnya
pub fn create_connection(handle: &Handle, options: ConnectOptions) -> Result<Socket> {
    connect(handle, options)
}

/// Bangun server baru; `listen()` dipanggil terpisah
pub fn create_server(handle: &Handle, options: ServerOptions) -> Server {
    Server::new(handle, options)
}
