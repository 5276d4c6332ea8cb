//! Address Layer: deskriptor transport dan introspeksi endpoint
//!
//! Satu deskriptor untuk dua model addressing:
//! - TCP: `host:port` (IPv4/IPv6)
//! - Local socket (IPC): filesystem path, khusus komunikasi same-host
//!
//! Transport dipilih dari kehadiran field, bukan flag terpisah:
//! `port` berarti TCP, `path` berarti local socket. Keduanya sekaligus
//! atau tidak sama sekali adalah construction error.

mod address;
mod ip;

pub use address::{Address, AddressFamily, Endpoint};
pub use ip::{is_ip, is_ipv4, is_ipv6};

pub(crate) use address::{default_bind_host, default_connect_host};
