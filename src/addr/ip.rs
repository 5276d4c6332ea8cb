//! Klasifikasi IP literal (tanpa resolusi DNS)

use std::net::{Ipv4Addr, Ipv6Addr};

/// `true` jika `input` adalah IPv4 literal yang valid
#[inline]
pub fn is_ipv4(input: &str) -> bool {
    input.parse::<Ipv4Addr>().is_ok()
}

/// `true` jika `input` adalah IPv6 literal yang valid
#[inline]
pub fn is_ipv6(input: &str) -> bool {
    input.parse::<Ipv6Addr>().is_ok()
}

/// Versi IP dari sebuah literal: 4, 6, atau 0 jika bukan keduanya
#[inline]
pub fn is_ip(input: &str) -> u8 {
    if is_ipv4(input) {
        4
    } else if is_ipv6(input) {
        6
    } else {
        0
    }
}
