//! Event loop inti: Poll + token map + timer sweep + deferred queue

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::rc::Rc;
use std::time::{Duration, Instant};

use mio::event::Source;
use mio::{Events, Interest, Poll, Registry, Token};

use crate::error::Error;
use crate::network::server::{self, ServerInner};
use crate::network::socket::{self, SocketInner};

const EVENTS_CAPACITY: usize = 1024;

/// Kemampuan platform, di-resolve sekali saat startup dan diteruskan
/// eksplisit ke semua konstruktor. Tidak ada pembacaan ambient.
#[derive(Clone, Copy, Debug)]
pub struct Platform {
    /// Apakah transport local socket (unix domain) tersedia
    pub local_sockets: bool,
    /// Sockopt untuk keepalive idle time, berbeda per OS
    /// (TCP_KEEPIDLE di Linux, TCP_KEEPALIVE di macOS, absen di lainnya)
    pub keepalive_idle: Option<libc::c_int>,
}

impl Platform {
    pub fn detect() -> Self {
        Self {
            local_sockets: cfg!(unix),
            keepalive_idle: keepalive_idle_sockopt(),
        }
    }
}

#[cfg(target_os = "linux")]
fn keepalive_idle_sockopt() -> Option<libc::c_int> {
    Some(libc::TCP_KEEPIDLE)
}

#[cfg(any(target_os = "macos", target_os = "ios"))]
fn keepalive_idle_sockopt() -> Option<libc::c_int> {
    Some(libc::TCP_KEEPALIVE)
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "ios")))]
fn keepalive_idle_sockopt() -> Option<libc::c_int> {
    None
}

/// Entry hidup dalam token map milik reactor
#[derive(Clone)]
pub(crate) enum Entry {
    Socket(Rc<RefCell<SocketInner>>),
    Server(Rc<RefCell<ServerInner>>),
}

/// Notifikasi yang ditunda ke tick berikutnya.
///
/// Emisi yang dipicu langsung oleh user call (listen, close, destroy,
/// get_connections) lewat antrian ini; emisi yang dipicu I/O dispatch
/// langsung dipanggil inline.
pub(crate) enum Deferred {
    Listening(Rc<RefCell<ServerInner>>),
    ServerError(Rc<RefCell<ServerInner>>, Error),
    ServerClose(Rc<RefCell<ServerInner>>),
    Connections(Rc<RefCell<ServerInner>>, Box<dyn FnOnce(usize)>),
    SocketError(Rc<RefCell<SocketInner>>, Error),
    SocketClose(Rc<RefCell<SocketInner>>, bool),
    /// Re-attempt baca setelah resume(); readiness edge bisa sudah lewat
    SocketResume(Rc<RefCell<SocketInner>>),
}

struct Shared {
    registry: Registry,
    next_token: Cell<usize>,
    pending: RefCell<Vec<(Token, Entry)>>,
    deferred: RefCell<VecDeque<Deferred>>,
    platform: Platform,
}

/// Capability handle untuk mendaftarkan socket/server baru ke reactor.
///
/// Murah di-clone (Rc); semua konstruktor menerimanya secara eksplisit.
#[derive(Clone)]
pub struct Handle {
    shared: Rc<Shared>,
}

impl Handle {
    #[inline]
    pub fn platform(&self) -> Platform {
        self.shared.platform
    }

    /// Alokasi token baru dan daftarkan source ke poller
    pub(crate) fn register<S: Source>(
        &self,
        source: &mut S,
        interest: Interest,
    ) -> io::Result<Token> {
        let token = Token(self.shared.next_token.get());
        self.shared.next_token.set(token.0 + 1);
        self.shared.registry.register(source, token, interest)?;
        Ok(token)
    }

    /// Daftarkan ulang source yang sebelumnya di-deregister (token tetap)
    pub(crate) fn register_at<S: Source>(
        &self,
        source: &mut S,
        token: Token,
        interest: Interest,
    ) -> io::Result<()> {
        self.shared.registry.register(source, token, interest)
    }

    pub(crate) fn reregister<S: Source>(
        &self,
        source: &mut S,
        token: Token,
        interest: Interest,
    ) -> io::Result<()> {
        self.shared.registry.reregister(source, token, interest)
    }

    pub(crate) fn deregister<S: Source>(&self, source: &mut S) -> io::Result<()> {
        self.shared.registry.deregister(source)
    }

    /// Serahkan entry baru untuk diadopsi token map pada tick berikutnya
    pub(crate) fn adopt(&self, token: Token, entry: Entry) {
        self.shared.pending.borrow_mut().push((token, entry));
    }

    pub(crate) fn defer(&self, event: Deferred) {
        self.shared.deferred.borrow_mut().push_back(event);
    }
}

/// Event loop pemilik `mio::Poll` dan semua entry hidup
pub struct Reactor {
    poll: Poll,
    events: Events,
    handle: Handle,
    entries: HashMap<Token, Entry>,
}

impl Reactor {
    /// Membuat reactor baru dengan deteksi platform saat ini
    pub fn new() -> io::Result<Self> {
        Self::with_platform(Platform::detect())
    }

    /// Membuat reactor dengan konfigurasi platform eksplisit
    pub fn with_platform(platform: Platform) -> io::Result<Self> {
        let poll = Poll::new()?;
        let registry = poll.registry().try_clone()?;

        Ok(Self {
            poll,
            events: Events::with_capacity(EVENTS_CAPACITY),
            handle: Handle {
                shared: Rc::new(Shared {
                    registry,
                    next_token: Cell::new(0),
                    pending: RefCell::new(Vec::new()),
                    deferred: RefCell::new(VecDeque::new()),
                    platform,
                }),
            },
            entries: HashMap::new(),
        })
    }

    #[inline]
    pub fn handle(&self) -> Handle {
        self.handle.clone()
    }

    /// Jalankan loop sampai tidak ada lagi entry hidup yang di-ref.
    ///
    /// Server/socket yang `unref()` tidak menahan loop; menutup listener
    /// adalah satu-satunya mekanisme pembatalan accept loop.
    pub fn run(&mut self) -> io::Result<()> {
        while self.has_work() {
            self.turn(None)?;
        }
        Ok(())
    }

    /// Satu tick: adopsi registrasi baru, drain notifikasi deferred,
    /// sweep timer, poll readiness, dispatch, lalu buang entry Closed.
    ///
    /// `max_wait` membatasi lamanya blocking di poll (dipakai test dan
    /// caller yang meng-embed reactor di loop lain).
    pub fn turn(&mut self, max_wait: Option<Duration>) -> io::Result<()> {
        self.adopt_pending();
        self.drain_deferred();
        // Callback deferred boleh membuat koneksi baru
        self.adopt_pending();
        self.fire_timers();

        let timeout = self.poll_timeout(max_wait);
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e),
        }

        for event in self.events.iter() {
            let entry = self.entries.get(&event.token()).cloned();
            match entry {
                Some(Entry::Socket(sock)) => {
                    socket::handle_event(&sock, event.is_readable(), event.is_writable())
                }
                Some(Entry::Server(srv)) => server::handle_event(&srv),
                // Event untuk token yang sudah di-reap: stale, abaikan
                None => {}
            }
        }

        self.reap();
        Ok(())
    }

    /// Apakah masih ada pekerjaan yang menahan `run()`
    pub fn has_work(&self) -> bool {
        if !self.handle.shared.pending.borrow().is_empty() {
            return true;
        }
        if !self.handle.shared.deferred.borrow().is_empty() {
            return true;
        }
        self.entries.values().any(|entry| match entry {
            Entry::Socket(sock) => socket::is_live(sock),
            Entry::Server(srv) => server::is_live(srv),
        })
    }

    fn adopt_pending(&mut self) {
        let mut pending = self.handle.shared.pending.borrow_mut();
        for (token, entry) in pending.drain(..) {
            self.entries.insert(token, entry);
        }
    }

    fn drain_deferred(&mut self) {
        loop {
            let event = self.handle.shared.deferred.borrow_mut().pop_front();
            let Some(event) = event else { break };
            match event {
                Deferred::Listening(srv) => server::emit_listening(&srv),
                Deferred::ServerError(srv, err) => server::emit_error(&srv, &err),
                Deferred::ServerClose(srv) => server::emit_close(&srv),
                Deferred::Connections(srv, callback) => {
                    let count = srv.borrow().connection_count();
                    callback(count);
                }
                Deferred::SocketError(sock, err) => socket::emit_error(&sock, &err),
                Deferred::SocketClose(sock, had_error) => socket::emit_close(&sock, had_error),
                Deferred::SocketResume(sock) => socket::pump_reads(&sock),
            }
        }
    }

    fn fire_timers(&mut self) {
        let now = Instant::now();
        let due: Vec<_> = self
            .entries
            .values()
            .filter_map(|entry| match entry {
                Entry::Socket(sock) => match socket::next_deadline(sock) {
                    Some(deadline) if deadline <= now => Some(sock.clone()),
                    _ => None,
                },
                Entry::Server(_) => None,
            })
            .collect();

        for sock in due {
            socket::fire_timeout(&sock);
        }
    }

    fn poll_timeout(&self, max_wait: Option<Duration>) -> Option<Duration> {
        // Masih ada pekerjaan antri: jangan block sama sekali
        if !self.handle.shared.deferred.borrow().is_empty()
            || !self.handle.shared.pending.borrow().is_empty()
        {
            return Some(Duration::ZERO);
        }

        // Tidak ada lagi entry ref'd yang hidup: jangan block, supaya
        // `run()` bisa mengamati selesainya pekerjaan dan return
        let any_live = self.entries.values().any(|entry| match entry {
            Entry::Socket(sock) => socket::is_live(sock),
            Entry::Server(srv) => server::is_live(srv),
        });
        if !any_live {
            return Some(Duration::ZERO);
        }

        let now = Instant::now();
        let next_timer = self
            .entries
            .values()
            .filter_map(|entry| match entry {
                Entry::Socket(sock) => socket::next_deadline(sock),
                Entry::Server(_) => None,
            })
            .min()
            .map(|deadline| deadline.saturating_duration_since(now));

        match (next_timer, max_wait) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        }
    }

    fn reap(&mut self) {
        self.entries.retain(|_, entry| match entry {
            Entry::Socket(sock) => !socket::is_closed(sock),
            Entry::Server(srv) => !server::is_closed(srv),
        });
    }
}
