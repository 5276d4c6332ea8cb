//! Error taxonomy untuk seluruh crate
//!
//! Dua kelas error:
//! - Validation errors: dikembalikan langsung (synchronous) dari call site,
//!   sebelum ada pekerjaan asynchronous yang dimulai
//! - Runtime errors: hanya muncul lewat notifikasi `error`, diikuti transisi
//!   ke state terminal (tidak pernah ditelan diam-diam)

use std::io;
use thiserror::Error;

/// Error untuk operasi socket dan server
#[derive(Debug, Error)]
pub enum Error {
    /// Nilai option tidak valid (port di luar range, kombinasi salah)
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Options tidak menyuplai `port` maupun `path`
    #[error("options must supply either `port` or `path`")]
    MissingAddress,

    /// Options menyuplai `port` dan `path` sekaligus
    #[error("options supply both `port` and `path`")]
    ConflictingAddress,

    /// Address family tidak didukung oleh call ini
    #[error("invalid address family for this operation")]
    InvalidAddressFamily,

    /// String host bukan IP literal di tempat yang mewajibkan literal
    #[error("invalid IP address: {0}")]
    InvalidIpAddress(String),

    /// File descriptor yang diadopsi bukan stream socket
    #[error("file descriptor is not a stream socket")]
    InvalidFdType,

    /// `listen()` dipanggil saat server tidak dalam state `Idle`
    #[error("server is already listening")]
    AlreadyListening,

    /// Operasi server dipanggil saat server tidak `Listening`
    #[error("server is not running")]
    ServerNotRunning,

    /// Operasi I/O pada socket tanpa koneksi hidup
    #[error("socket has been closed")]
    SocketClosed,

    /// Kegagalan level transport saat connect/accept/bind
    #[error("connection failed: {0}")]
    ConnectionFailed(#[source] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Helper untuk membungkus io::Error sebagai runtime failure
    #[inline]
    pub(crate) fn from_io(err: io::Error) -> Self {
        Error::ConnectionFailed(err)
    }
}
