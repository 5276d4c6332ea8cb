//! Reactor: single-threaded event loop di atas mio
//!
//! Satu `Reactor` menggerakkan semua `Socket` dan `Server`:
//! - Non-blocking I/O multiplexing (epoll/kqueue) lewat `mio::Poll`
//! - Dispatch readiness per `Token` ke entry yang terdaftar
//! - Sweep inactivity timer di setiap tick
//! - Antrian notifikasi deferred supaya event yang dipicu call site
//!   baru terlihat asynchronous, setelah call tersebut return
//!
//! Model penjadwalan: satu logical thread, suspensi kooperatif di
//! batas I/O. Tidak ada shared mutable state lintas thread.

mod event_loop;

pub use event_loop::{Handle, Platform, Reactor};

pub(crate) use event_loop::{Deferred, Entry};
