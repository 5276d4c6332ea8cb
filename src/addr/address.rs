//! Tagged union address descriptor plus hasil introspeksi endpoint

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Wildcard default saat listen tanpa host
pub(crate) const DEFAULT_IPV4_ADDR: &str = "0.0.0.0";
pub(crate) const DEFAULT_IPV6_ADDR: &str = "::";

/// Deskriptor address - immutable, dibangun sekali per call.
///
/// Tepat satu varian terisi. Menyuplai `port` dan `path` sekaligus
/// (atau tidak keduanya) ditolak saat konstruksi, sebelum ada
/// pekerjaan asynchronous apa pun.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Address {
    /// Endpoint TCP. Host disimpan apa adanya (tidak ada resolusi DNS);
    /// string yang bukan literal baru terlihat sebagai connection failure.
    Tcp { host: Option<String>, port: u16 },
    /// Endpoint local socket, diaddress lewat filesystem path.
    Local { path: PathBuf },
}

impl Address {
    /// Pilih transport dari kehadiran field.
    ///
    /// `port` di luar `[0, 65535]` gagal dengan `InvalidArgument`
    /// (0 berarti ephemeral port dipilih platform saat bind).
    pub fn from_parts(
        port: Option<u32>,
        host: Option<&str>,
        path: Option<&Path>,
    ) -> Result<Address> {
        match (port, path) {
            (Some(_), Some(_)) => Err(Error::ConflictingAddress),
            (None, None) => Err(Error::MissingAddress),
            (Some(port), None) => {
                if port > u16::MAX as u32 {
                    return Err(Error::InvalidArgument(format!(
                        "port must be in [0, 65535], got {}",
                        port
                    )));
                }
                Ok(Address::Tcp {
                    host: host.map(str::to_owned),
                    port: port as u16,
                })
            }
            (None, Some(path)) => {
                if path.as_os_str().is_empty() {
                    return Err(Error::InvalidArgument("path must not be empty".into()));
                }
                Ok(Address::Local {
                    path: path.to_owned(),
                })
            }
        }
    }

    /// Apakah deskriptor ini memilih transport TCP
    #[inline]
    pub fn is_tcp(&self) -> bool {
        matches!(self, Address::Tcp { .. })
    }

    /// Apakah deskriptor ini memilih local socket
    #[inline]
    pub fn is_local(&self) -> bool {
        matches!(self, Address::Local { .. })
    }
}

/// Host default saat listen: wildcard sesuai address family
pub(crate) fn default_bind_host(ipv6: bool) -> &'static str {
    if ipv6 {
        DEFAULT_IPV6_ADDR
    } else {
        DEFAULT_IPV4_ADDR
    }
}

/// Host default saat connect: loopback (connect ke wildcard tidak bermakna)
pub(crate) fn default_connect_host() -> &'static str {
    "127.0.0.1"
}

/// Address family untuk endpoint TCP yang sudah resolved
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Format string mengikuti konvensi `remoteFamily` yang umum
        match self {
            AddressFamily::Ipv4 => write!(f, "IPv4"),
            AddressFamily::Ipv6 => write!(f, "IPv6"),
        }
    }
}

/// Endpoint yang sudah resolved dari koneksi hidup.
///
/// Local socket tidak punya konsep port/family; sisi klien yang
/// unnamed juga tidak punya path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Endpoint {
    Tcp(SocketAddr),
    Local { path: Option<PathBuf> },
}

impl Endpoint {
    #[inline]
    pub fn family(&self) -> Option<AddressFamily> {
        match self {
            Endpoint::Tcp(addr) if addr.is_ipv4() => Some(AddressFamily::Ipv4),
            Endpoint::Tcp(_) => Some(AddressFamily::Ipv6),
            Endpoint::Local { .. } => None,
        }
    }

    #[inline]
    pub fn ip(&self) -> Option<IpAddr> {
        match self {
            Endpoint::Tcp(addr) => Some(addr.ip()),
            Endpoint::Local { .. } => None,
        }
    }

    #[inline]
    pub fn port(&self) -> Option<u16> {
        match self {
            Endpoint::Tcp(addr) => Some(addr.port()),
            Endpoint::Local { .. } => None,
        }
    }

    #[inline]
    pub fn path(&self) -> Option<&Path> {
        match self {
            Endpoint::Tcp(_) => None,
            Endpoint::Local { path } => path.as_deref(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp(addr) => write!(f, "{}", addr),
            Endpoint::Local { path: Some(path) } => write!(f, "{}", path.display()),
            Endpoint::Local { path: None } => write!(f, "<unnamed>"),
        }
    }
}
