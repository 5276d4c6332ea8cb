//! Socket: duplex byte stream dengan lifecycle state machine
//!
//! Satu `Socket` membungkus tepat satu koneksi (TCP atau local socket)
//! sebagai stream dua arah yang stateful:
//!
//! ```text
//! Idle -> Connecting -> Connected -> {HalfClosedLocal, HalfClosedRemote} -> Closed
//! ```
//!
//! Flag `errored` orthogonal terhadap state dan memaksa transisi ke
//! `Closed`. Sumber koneksi (`Origin`) tidak mengubah kontrak publik:
//! fresh connect, fd yang diadopsi, dan hasil accept melewati state
//! machine yang sama.
//!
//! Backpressure: write yang kena `WouldBlock` tumpah ke spill buffer;
//! `write()` mengembalikan `false` begitu spill melewati high-water
//! mark, dan tepat satu notifikasi `drain` menyusul saat spill habis.

use std::cell::RefCell;
use std::fmt;
use std::io::{self, Read, Write};
use std::mem;
use std::net::{IpAddr, Shutdown, SocketAddr};
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::path::PathBuf;
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

use mio::event::Source;
use mio::net::{TcpStream, UnixStream};
use mio::{Interest, Registry, Token};
use socket2::{Domain, Socket as RawSocket, Type};

use crate::addr::{default_connect_host, Address, AddressFamily, Endpoint};
use crate::error::{Error, Result};
use crate::network::server::{self, ServerInner};
use crate::reactor::{Deferred, Entry, Handle, Platform};

/// Buffer sizes - scratch baca pre-allocated, spill tulis dengan
/// high-water mark untuk sinyal backpressure
const READ_BUFFER_SIZE: usize = 64 * 1024; // 64KB
const WRITE_HIGH_WATER_MARK: usize = 64 * 1024; // 64KB

/// State lifecycle sebuah socket
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SocketState {
    /// Belum ada koneksi; menunggu `connect()`
    Idle,
    /// Koneksi sedang dibangun secara asynchronous
    Connecting,
    /// Koneksi hidup, dua arah terbuka
    Connected,
    /// Arah tulis lokal sudah ditutup (`end()`), arah baca masih hidup
    HalfClosedLocal,
    /// Peer sudah menutup arah tulisnya; arah tulis lokal masih hidup
    HalfClosedRemote,
    /// Terminal; resource koneksi sudah dilepas
    Closed,
}

/// Asal koneksi yang dibungkus socket ini
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Origin {
    /// Dibuat lewat `connect()`
    Fresh,
    /// Mengadopsi file descriptor yang sudah ada
    Adopted,
    /// Diproduksi accept loop sebuah `Server`
    Accepted,
}

/// Kemampuan transport di balik socket, supaya no-op yang
/// transport-dependent bisa dideteksi caller (bukan fiksi diam-diam)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransportCapabilities {
    pub keepalive: bool,
    pub nodelay: bool,
    pub flow_control: bool,
}

/// Mode delivery alternatif: data masuk ditulis ke satu buffer milik
/// caller, melewati notifikasi `data` biasa (mutually exclusive).
/// Callback mengembalikan `false` untuk mem-pause socket secara implisit.
pub struct OnRead {
    pub buffer: Vec<u8>,
    pub callback: Box<dyn FnMut(usize, &[u8]) -> bool>,
}

/// Options untuk konstruksi `Socket` baru
pub struct SocketOptions {
    /// File descriptor yang diadopsi (harus stream socket)
    pub fd: Option<RawFd>,
    /// `false` (default): begitu remote menutup, socket otomatis
    /// di-destroy alih-alih bertahan di `HalfClosedRemote`
    pub allow_half_open: bool,
    /// Flag arah baca untuk handle yang diadopsi
    pub readable: bool,
    /// Flag arah tulis untuk handle yang diadopsi
    pub writable: bool,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            fd: None,
            allow_half_open: false,
            readable: true,
            writable: true,
        }
    }
}

/// Options untuk `connect()`: `port`+`host` memilih TCP, `path` memilih
/// local socket (tepat satu wajib ada)
pub struct ConnectOptions {
    pub port: Option<u32>,
    pub host: Option<String>,
    pub path: Option<PathBuf>,
    /// Pin alamat sisi klien (TCP saja); wajib IP literal
    pub local_address: Option<String>,
    /// Pin port sisi klien (TCP saja)
    pub local_port: Option<u32>,
    pub onread: Option<OnRead>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            port: None,
            host: None,
            path: None,
            local_address: None,
            local_port: None,
            onread: None,
        }
    }
}

type EventCb = Box<dyn FnMut(&Socket)>;
type DataCb = Box<dyn FnMut(&Socket, &[u8])>;
type CloseCb = Box<dyn FnMut(&Socket, bool)>;
type ErrorCb = Box<dyn FnMut(&Socket, &Error)>;

#[derive(Default)]
struct Callbacks {
    connect: Option<EventCb>,
    data: Option<DataCb>,
    drain: Option<EventCb>,
    timeout: Option<EventCb>,
    end: Option<EventCb>,
    close: Option<CloseCb>,
    error: Option<ErrorCb>,
}

#[derive(Clone, Copy)]
enum Slot {
    Connect,
    Drain,
    Timeout,
    End,
}

/// Stream transport di balik socket
pub(crate) enum StreamIo {
    Tcp(TcpStream),
    Local(UnixStream),
}

impl StreamIo {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            StreamIo::Tcp(s) => s.read(buf),
            StreamIo::Local(s) => s.read(buf),
        }
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            StreamIo::Tcp(s) => s.write(buf),
            StreamIo::Local(s) => s.write(buf),
        }
    }

    fn shutdown_write(&self) -> io::Result<()> {
        match self {
            StreamIo::Tcp(s) => s.shutdown(Shutdown::Write),
            StreamIo::Local(s) => s.shutdown(Shutdown::Write),
        }
    }

    fn take_error(&self) -> io::Result<Option<io::Error>> {
        match self {
            StreamIo::Tcp(s) => s.take_error(),
            StreamIo::Local(s) => s.take_error(),
        }
    }

    pub(crate) fn local_endpoint(&self) -> io::Result<Endpoint> {
        match self {
            StreamIo::Tcp(s) => s.local_addr().map(Endpoint::Tcp),
            StreamIo::Local(s) => s.local_addr().map(|addr| Endpoint::Local {
                path: addr.as_pathname().map(|p| p.to_owned()),
            }),
        }
    }

    pub(crate) fn remote_endpoint(&self) -> io::Result<Endpoint> {
        match self {
            StreamIo::Tcp(s) => s.peer_addr().map(Endpoint::Tcp),
            StreamIo::Local(s) => s.peer_addr().map(|addr| Endpoint::Local {
                path: addr.as_pathname().map(|p| p.to_owned()),
            }),
        }
    }
}

impl Source for StreamIo {
    fn register(&mut self, registry: &Registry, token: Token, interest: Interest) -> io::Result<()> {
        match self {
            StreamIo::Tcp(s) => s.register(registry, token, interest),
            StreamIo::Local(s) => s.register(registry, token, interest),
        }
    }

    fn reregister(
        &mut self,
        registry: &Registry,
        token: Token,
        interest: Interest,
    ) -> io::Result<()> {
        match self {
            StreamIo::Tcp(s) => s.reregister(registry, token, interest),
            StreamIo::Local(s) => s.reregister(registry, token, interest),
        }
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        match self {
            StreamIo::Tcp(s) => s.deregister(registry),
            StreamIo::Local(s) => s.deregister(registry),
        }
    }
}

pub(crate) struct SocketInner {
    handle: Handle,
    state: SocketState,
    origin: Origin,
    errored: bool,
    io: Option<StreamIo>,
    token: Option<Token>,
    registered: Option<Interest>,
    local_endpoint: Option<Endpoint>,
    remote_endpoint: Option<Endpoint>,
    read_scratch: Box<[u8]>,
    write_spill: Vec<u8>,
    need_drain: bool,
    fin_pending: bool,
    destroy_on_flush: bool,
    paused: bool,
    allow_half_open: bool,
    readable_allowed: bool,
    writable_allowed: bool,
    timeout: Option<Duration>,
    deadline: Option<Instant>,
    bytes_read: u64,
    bytes_written: u64,
    keepalive: Option<(bool, Duration)>,
    nodelay: Option<bool>,
    refed: bool,
    server: Option<Weak<RefCell<ServerInner>>>,
    close_queued: bool,
    callbacks: Callbacks,
    onread: Option<OnRead>,
}

impl SocketInner {
    fn new(handle: Handle, options: &SocketOptions) -> Self {
        Self {
            handle,
            state: SocketState::Idle,
            origin: Origin::Fresh,
            errored: false,
            io: None,
            token: None,
            registered: None,
            local_endpoint: None,
            remote_endpoint: None,
            read_scratch: vec![0u8; READ_BUFFER_SIZE].into_boxed_slice(),
            write_spill: Vec::new(),
            need_drain: false,
            fin_pending: false,
            destroy_on_flush: false,
            paused: false,
            allow_half_open: options.allow_half_open,
            readable_allowed: options.readable,
            writable_allowed: options.writable,
            timeout: None,
            deadline: None,
            bytes_read: 0,
            bytes_written: 0,
            keepalive: None,
            nodelay: None,
            refed: true,
            server: None,
            close_queued: false,
            callbacks: Callbacks::default(),
            onread: None,
        }
    }

    /// Aktivitas baca/tulis me-rearm inactivity timer
    #[inline]
    fn touch_activity(&mut self) {
        if let Some(dur) = self.timeout {
            self.deadline = Some(Instant::now() + dur);
        }
    }
}

/// Handle socket, murah di-clone. Semua method menerima `&self`;
/// state interior dijaga `RefCell` karena seluruh sistem single-threaded.
#[derive(Clone)]
pub struct Socket {
    inner: Rc<RefCell<SocketInner>>,
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct("Socket");
        match self.inner.try_borrow() {
            Ok(inner) => dbg.field("state", &inner.state),
            Err(_) => dbg.field("state", &"<borrowed>"),
        };
        dbg.finish()
    }
}

impl Socket {
    /// Membuat socket baru.
    ///
    /// Dengan `options.fd`, file descriptor tersebut diadopsi: divalidasi
    /// sebagai stream socket (`InvalidFdType` jika bukan), family-nya
    /// dibaca lewat `getsockname`, dan socket langsung `Connected`.
    /// Kepemilikan fd berpindah ke socket.
    pub fn new(handle: &Handle, options: SocketOptions) -> Result<Socket> {
        let inner = SocketInner::new(handle.clone(), &options);
        let rc = Rc::new(RefCell::new(inner));
        if let Some(fd) = options.fd {
            adopt_fd(&rc, fd)?;
        }
        Ok(Socket { inner: rc })
    }

    /// Transisi `Idle -> Connecting` dan mulai membangun koneksi.
    ///
    /// Validasi descriptor berjalan synchronous; kegagalan transport
    /// (host unreachable, refused, path tidak ada) muncul asynchronous
    /// lewat notifikasi `error` lalu `close(true)`. Tidak ada retry
    /// internal; kebijakan retry milik caller.
    pub fn connect(&self, options: ConnectOptions) -> Result<()> {
        match self.inner.borrow().state {
            SocketState::Idle => {}
            SocketState::Closed => return Err(Error::SocketClosed),
            _ => {
                return Err(Error::InvalidArgument(
                    "socket is already connecting or connected".into(),
                ))
            }
        }

        let ConnectOptions {
            port,
            host,
            path,
            local_address,
            local_port,
            onread,
        } = options;

        let address = Address::from_parts(port, host.as_deref(), path.as_deref())?;

        if let Some(onread) = onread {
            if onread.buffer.is_empty() {
                return Err(Error::InvalidArgument("onread buffer must not be empty".into()));
            }
            self.inner.borrow_mut().onread = Some(onread);
        }

        match address {
            Address::Tcp { host, port } => self.connect_tcp(host, port, local_address, local_port),
            Address::Local { path } => self.connect_local(path),
        }
    }

    fn connect_tcp(
        &self,
        host: Option<String>,
        port: u16,
        local_address: Option<String>,
        local_port: Option<u32>,
    ) -> Result<()> {
        // Binding sisi klien yang dipin wajib IP literal: ini validasi
        // synchronous, beda dengan host remote yang lolos apa adanya
        let pinned = match (local_address, local_port) {
            (None, None) => None,
            (addr, lport) => {
                let lport = match lport {
                    Some(p) if p > u16::MAX as u32 => {
                        return Err(Error::InvalidArgument(format!(
                            "local_port must be in [0, 65535], got {}",
                            p
                        )))
                    }
                    Some(p) => p as u16,
                    None => 0,
                };
                let ip: IpAddr = match addr {
                    Some(s) => s.parse().map_err(|_| Error::InvalidIpAddress(s))?,
                    None => IpAddr::from([0u8, 0, 0, 0]),
                };
                Some(SocketAddr::new(ip, lport))
            }
        };

        let host = host.unwrap_or_else(|| default_connect_host().to_string());
        let remote_ip: IpAddr = match host.parse() {
            Ok(ip) => ip,
            Err(_) => {
                // Tanpa resolusi DNS, host non-literal adalah kegagalan
                // koneksi (asynchronous), bukan error descriptor
                self.begin_failed_connect(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("cannot resolve host '{}': name lookup is not performed", host),
                ));
                return Ok(());
            }
        };
        let remote = SocketAddr::new(remote_ip, port);

        if let Some(local) = pinned {
            if local.is_ipv4() != remote.is_ipv4() {
                return Err(Error::InvalidAddressFamily);
            }
        }

        let stream = match pinned {
            None => TcpStream::connect(remote),
            Some(local) => pinned_connect(local, remote),
        };

        match stream {
            Ok(stream) => self.begin_connect(StreamIo::Tcp(stream)),
            Err(err) => {
                self.begin_failed_connect(err);
                Ok(())
            }
        }
    }

    fn connect_local(&self, path: PathBuf) -> Result<()> {
        if !self.inner.borrow().handle.platform().local_sockets {
            return Err(Error::InvalidArgument(
                "local sockets are not supported on this platform".into(),
            ));
        }
        match UnixStream::connect(&path) {
            Ok(stream) => self.begin_connect(StreamIo::Local(stream)),
            Err(err) => {
                self.begin_failed_connect(err);
                Ok(())
            }
        }
    }

    fn begin_connect(&self, io: StreamIo) -> Result<()> {
        self.inner.borrow_mut().state = SocketState::Connecting;
        if let Err(err) = attach(&self.inner, io, Interest::WRITABLE) {
            fail(&self.inner, Error::from_io(err));
        }
        Ok(())
    }

    /// Kegagalan sebelum stream terbentuk tetap lewat jalur notifikasi:
    /// Connecting -> Errored -> Closed, `error` lalu `close(true)`
    fn begin_failed_connect(&self, err: io::Error) {
        self.inner.borrow_mut().state = SocketState::Connecting;
        fail(&self.inner, Error::from_io(err));
    }

    /// Tulis bytes ke koneksi, urut sesuai urutan call.
    ///
    /// Return value adalah sinyal backpressure: `true` selama spill
    /// buffer masih di bawah high-water mark. Setelah `false`, caller
    /// sebaiknya berhenti memproduksi data sampai notifikasi `drain`.
    ///
    /// Valid hanya di `Connected`/`HalfClosedRemote`; di luar itu gagal
    /// `SocketClosed`. Error transport di tengah jalan muncul lewat
    /// notifikasi `error`, bukan dari return value ini.
    pub fn write(&self, data: &[u8]) -> Result<bool> {
        let outcome = {
            let mut guard = self.inner.borrow_mut();
            let inner = &mut *guard;
            let writable = matches!(
                inner.state,
                SocketState::Connected | SocketState::HalfClosedRemote
            ) && inner.writable_allowed
                && !inner.fin_pending
                && !inner.destroy_on_flush;
            if !writable {
                return Err(Error::SocketClosed);
            }
            match push_bytes(inner, data) {
                Ok(below) => {
                    inner.touch_activity();
                    if !below {
                        inner.need_drain = true;
                    }
                    Ok(below)
                }
                Err(err) => Err(err),
            }
        };
        match outcome {
            Ok(below) => {
                update_interest(&self.inner);
                Ok(below)
            }
            Err(err) => {
                fail(&self.inner, Error::from_io(err));
                Ok(false)
            }
        }
    }

    /// Tutup arah tulis lokal (half-close graceful).
    ///
    /// Spill yang tersisa diflush dulu, baru FIN dikirim. Idempotent
    /// begitu sudah half-closed-local atau closed.
    pub fn end(&self) -> Result<()> {
        let state = self.inner.borrow().state;
        match state {
            SocketState::Connected => {
                {
                    let mut guard = self.inner.borrow_mut();
                    let inner = &mut *guard;
                    inner.state = SocketState::HalfClosedLocal;
                    if inner.write_spill.is_empty() {
                        if let Some(io) = inner.io.as_ref() {
                            let _ = io.shutdown_write();
                        }
                    } else {
                        inner.fin_pending = true;
                    }
                }
                update_interest(&self.inner);
                Ok(())
            }
            // Remote sudah tutup duluan: selesaikan dua arah sekaligus
            SocketState::HalfClosedRemote => {
                finish_and_destroy(&self.inner);
                Ok(())
            }
            SocketState::HalfClosedLocal | SocketState::Closed => Ok(()),
            SocketState::Idle | SocketState::Connecting => Err(Error::SocketClosed),
        }
    }

    /// Teardown paksa dari state mana pun, idempotent.
    ///
    /// Melepas koneksi segera, membuang write yang belum terflush,
    /// membatalkan timer, dan menghasilkan tepat satu notifikasi
    /// `close(had_error)` seumur hidup socket.
    pub fn destroy(&self) {
        destroy(&self.inner);
    }

    /// `end()` sekarang, `destroy()` begitu spill terflush
    pub fn destroy_soon(&self) {
        let state = self.inner.borrow().state;
        match state {
            SocketState::Connected | SocketState::HalfClosedRemote => {
                finish_and_destroy(&self.inner);
            }
            SocketState::HalfClosedLocal => {
                let flushed = self.inner.borrow().write_spill.is_empty();
                if flushed {
                    destroy(&self.inner);
                } else {
                    self.inner.borrow_mut().destroy_on_flush = true;
                }
            }
            _ => destroy(&self.inner),
        }
    }

    /// Backpressure advisory arah baca: selama paused, bytes masuk tidak
    /// dideliver (flow control transport yang menahan). Aman di state
    /// mana pun.
    pub fn pause(&self) {
        self.inner.borrow_mut().paused = true;
        update_interest(&self.inner);
    }

    /// Lanjutkan delivery data setelah `pause()`. Aman di state mana pun.
    pub fn resume(&self) {
        let deferred = {
            let mut inner = self.inner.borrow_mut();
            if !inner.paused {
                return;
            }
            inner.paused = false;
            // Readiness edge bisa sudah lewat selama paused; jadwalkan
            // percobaan baca eksplisit
            matches!(
                inner.state,
                SocketState::Connected | SocketState::HalfClosedLocal
            )
        };
        update_interest(&self.inner);
        if deferred {
            let handle = self.inner.borrow().handle.clone();
            handle.defer(Deferred::SocketResume(self.inner.clone()));
        }
    }

    /// Pasang (atau ganti) inactivity timer. `None` atau durasi nol
    /// menonaktifkan. Timer yang fire hanya menghasilkan notifikasi
    /// `timeout`; keputusan menutup tetap di tangan caller.
    pub fn set_timeout(&self, timeout: Option<Duration>) {
        let mut inner = self.inner.borrow_mut();
        match timeout {
            Some(dur) if !dur.is_zero() => {
                inner.timeout = Some(dur);
                inner.deadline = Some(Instant::now() + dur);
            }
            _ => {
                inner.timeout = None;
                inner.deadline = None;
            }
        }
    }

    /// Aktifkan TCP keepalive dengan idle delay.
    ///
    /// Nyata hanya di transport TCP; di local socket nilainya dicatat
    /// tanpa efek (cek `capabilities()` untuk mendeteksi ini). Dicatat
    /// juga saat belum terkoneksi dan diterapkan begitu `Connected`.
    pub fn set_keepalive(&self, enable: bool, idle: Duration) {
        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;
        inner.keepalive = Some((enable, idle));
        if let Some(StreamIo::Tcp(stream)) = inner.io.as_ref() {
            apply_keepalive(stream.as_raw_fd(), enable, idle, inner.handle.platform());
        }
    }

    /// Matikan/nyalakan algoritma Nagle. Nyata hanya di TCP; di local
    /// socket dicatat tanpa efek.
    pub fn set_nodelay(&self, enable: bool) {
        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;
        inner.nodelay = Some(enable);
        if let Some(StreamIo::Tcp(stream)) = inner.io.as_ref() {
            // Tidak semua platform mendukung; abaikan kegagalan
            let _ = stream.set_nodelay(enable);
        }
    }

    /// Kemampuan transport di balik socket ini; `None` sebelum ada
    /// koneksi yang menentukan transportnya
    pub fn capabilities(&self) -> Option<TransportCapabilities> {
        self.inner.borrow().io.as_ref().map(|io| match io {
            StreamIo::Tcp(_) => TransportCapabilities {
                keepalive: true,
                nodelay: true,
                flow_control: true,
            },
            StreamIo::Local(_) => TransportCapabilities {
                keepalive: false,
                nodelay: false,
                flow_control: true,
            },
        })
    }

    // --- introspeksi state ---

    #[inline]
    pub fn state(&self) -> SocketState {
        self.inner.borrow().state
    }

    #[inline]
    pub fn origin(&self) -> Origin {
        self.inner.borrow().origin
    }

    #[inline]
    pub fn connecting(&self) -> bool {
        self.inner.borrow().state == SocketState::Connecting
    }

    /// Belum ada koneksi hidup di baliknya (`Idle` atau `Connecting`)
    #[inline]
    pub fn pending(&self) -> bool {
        matches!(
            self.inner.borrow().state,
            SocketState::Idle | SocketState::Connecting
        )
    }

    #[inline]
    pub fn readable(&self) -> bool {
        let inner = self.inner.borrow();
        matches!(
            inner.state,
            SocketState::Connected | SocketState::HalfClosedLocal
        ) && inner.readable_allowed
    }

    #[inline]
    pub fn writable(&self) -> bool {
        let inner = self.inner.borrow();
        matches!(
            inner.state,
            SocketState::Connected | SocketState::HalfClosedRemote
        ) && inner.writable_allowed
            && !inner.fin_pending
            && !inner.destroy_on_flush
    }

    // --- introspeksi address (valid setelah Connected; sebelum itu,
    //     atau untuk transport tanpa konsep port/family, `None`) ---

    pub fn local_endpoint(&self) -> Option<Endpoint> {
        self.inner.borrow().local_endpoint.clone()
    }

    pub fn remote_endpoint(&self) -> Option<Endpoint> {
        self.inner.borrow().remote_endpoint.clone()
    }

    pub fn local_addr(&self) -> Option<IpAddr> {
        self.inner.borrow().local_endpoint.as_ref().and_then(Endpoint::ip)
    }

    pub fn local_port(&self) -> Option<u16> {
        self.inner.borrow().local_endpoint.as_ref().and_then(Endpoint::port)
    }

    pub fn remote_addr(&self) -> Option<IpAddr> {
        self.inner.borrow().remote_endpoint.as_ref().and_then(Endpoint::ip)
    }

    pub fn remote_port(&self) -> Option<u16> {
        self.inner.borrow().remote_endpoint.as_ref().and_then(Endpoint::port)
    }

    pub fn remote_family(&self) -> Option<AddressFamily> {
        self.inner.borrow().remote_endpoint.as_ref().and_then(Endpoint::family)
    }

    // --- counters ---

    #[inline]
    pub fn bytes_read(&self) -> u64 {
        self.inner.borrow().bytes_read
    }

    #[inline]
    pub fn bytes_written(&self) -> u64 {
        self.inner.borrow().bytes_written
    }

    /// Bytes yang masih antri di spill buffer (belum sampai kernel)
    #[inline]
    pub fn buffer_size(&self) -> usize {
        self.inner.borrow().write_spill.len()
    }

    // --- scheduling hints ---

    /// Socket ini ikut menahan `Reactor::run()` tetap hidup (default)
    pub fn ref_(&self) {
        self.inner.borrow_mut().refed = true;
    }

    /// Socket ini tidak lagi menahan `Reactor::run()` tetap hidup
    pub fn unref(&self) {
        self.inner.borrow_mut().refed = false;
    }

    // --- registrasi notifikasi ---

    pub fn on_connect(&self, callback: impl FnMut(&Socket) + 'static) {
        self.inner.borrow_mut().callbacks.connect = Some(Box::new(callback));
    }

    /// Delivery data normal. Socket hanya membaca dari transport selama
    /// ada consumer (callback ini atau mode `onread`).
    pub fn on_data(&self, callback: impl FnMut(&Socket, &[u8]) + 'static) {
        self.inner.borrow_mut().callbacks.data = Some(Box::new(callback));
        update_interest(&self.inner);
        let live = matches!(
            self.inner.borrow().state,
            SocketState::Connected | SocketState::HalfClosedLocal
        );
        if live {
            let handle = self.inner.borrow().handle.clone();
            handle.defer(Deferred::SocketResume(self.inner.clone()));
        }
    }

    pub fn on_drain(&self, callback: impl FnMut(&Socket) + 'static) {
        self.inner.borrow_mut().callbacks.drain = Some(Box::new(callback));
    }

    pub fn on_timeout(&self, callback: impl FnMut(&Socket) + 'static) {
        self.inner.borrow_mut().callbacks.timeout = Some(Box::new(callback));
    }

    pub fn on_end(&self, callback: impl FnMut(&Socket) + 'static) {
        self.inner.borrow_mut().callbacks.end = Some(Box::new(callback));
    }

    pub fn on_close(&self, callback: impl FnMut(&Socket, bool) + 'static) {
        self.inner.borrow_mut().callbacks.close = Some(Box::new(callback));
    }

    pub fn on_error(&self, callback: impl FnMut(&Socket, &Error) + 'static) {
        self.inner.borrow_mut().callbacks.error = Some(Box::new(callback));
    }
}

/// Konstruksi socket hasil accept: langsung `Connected` (acceptance
/// berarti koneksi sudah terbentuk), tercatat ke server pemiliknya
pub(crate) fn accepted(
    handle: &Handle,
    io: StreamIo,
    owner: &Rc<RefCell<ServerInner>>,
    allow_half_open: bool,
) -> io::Result<Socket> {
    let options = SocketOptions {
        allow_half_open,
        ..SocketOptions::default()
    };
    let mut inner = SocketInner::new(handle.clone(), &options);
    inner.state = SocketState::Connected;
    inner.origin = Origin::Accepted;
    inner.local_endpoint = io.local_endpoint().ok();
    inner.remote_endpoint = io.remote_endpoint().ok();
    inner.server = Some(Rc::downgrade(owner));
    let rc = Rc::new(RefCell::new(inner));
    attach(&rc, io, Interest::READABLE)?;
    update_interest(&rc);
    Ok(Socket { inner: rc })
}

fn adopt_fd(rc: &Rc<RefCell<SocketInner>>, fd: RawFd) -> Result<()> {
    // Validasi tipe: hanya stream socket yang bisa diadopsi
    let sock_type = unsafe {
        let mut optval: libc::c_int = 0;
        let mut optlen = mem::size_of::<libc::c_int>() as libc::socklen_t;
        if libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_TYPE,
            &mut optval as *mut _ as *mut libc::c_void,
            &mut optlen,
        ) != 0
        {
            return Err(Error::InvalidFdType);
        }
        optval
    };
    if sock_type != libc::SOCK_STREAM {
        return Err(Error::InvalidFdType);
    }

    let family = unsafe {
        let mut storage: libc::sockaddr_storage = mem::zeroed();
        let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
        if libc::getsockname(fd, &mut storage as *mut _ as *mut libc::sockaddr, &mut len) != 0 {
            return Err(Error::InvalidFdType);
        }
        storage.ss_family as libc::c_int
    };

    let io = match family {
        f if f == libc::AF_INET || f == libc::AF_INET6 => {
            // SAFETY: kepemilikan fd berpindah ke stream; tipe socket
            // sudah divalidasi SOCK_STREAM di atas
            let stream = unsafe { std::net::TcpStream::from_raw_fd(fd) };
            stream.set_nonblocking(true).map_err(Error::from_io)?;
            StreamIo::Tcp(TcpStream::from_std(stream))
        }
        f if f == libc::AF_UNIX => {
            // SAFETY: sama seperti di atas, untuk unix domain stream
            let stream = unsafe { std::os::unix::net::UnixStream::from_raw_fd(fd) };
            stream.set_nonblocking(true).map_err(Error::from_io)?;
            StreamIo::Local(UnixStream::from_std(stream))
        }
        _ => return Err(Error::InvalidFdType),
    };

    {
        let mut inner = rc.borrow_mut();
        inner.state = SocketState::Connected;
        inner.origin = Origin::Adopted;
        // Endpoint bisa gagal resolve untuk fd aneh; biarkan None
        inner.local_endpoint = io.local_endpoint().ok();
        inner.remote_endpoint = io.remote_endpoint().ok();
    }
    attach(rc, io, Interest::READABLE).map_err(Error::from_io)?;
    update_interest(rc);
    Ok(())
}

/// Registrasi pertama stream ke reactor + adopsi ke token map
fn attach(rc: &Rc<RefCell<SocketInner>>, mut io: StreamIo, interest: Interest) -> io::Result<()> {
    let mut guard = rc.borrow_mut();
    let inner = &mut *guard;
    let token = inner.handle.register(&mut io, interest)?;
    inner.io = Some(io);
    inner.token = Some(token);
    inner.registered = Some(interest);
    inner.handle.adopt(token, Entry::Socket(rc.clone()));
    Ok(())
}

/// Nonblocking connect dengan binding sisi klien yang dipin
fn pinned_connect(local: SocketAddr, remote: SocketAddr) -> io::Result<TcpStream> {
    let domain = if remote.is_ipv6() {
        Domain::IPV6
    } else {
        Domain::IPV4
    };
    let sock = RawSocket::new(domain, Type::STREAM, None)?;
    sock.set_nonblocking(true)?;
    sock.bind(&local.into())?;
    match sock.connect(&remote.into()) {
        Ok(()) => {}
        // Connect nonblocking yang masih berjalan, bukan kegagalan
        Err(ref e) if e.raw_os_error() == Some(libc::EINPROGRESS) => {}
        Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {}
        Err(e) => return Err(e),
    }
    Ok(TcpStream::from_std(sock.into()))
}

fn apply_keepalive(fd: RawFd, enable: bool, idle: Duration, platform: Platform) {
    // Tidak semua platform mendukung semua opsi; kegagalan diabaikan
    unsafe {
        let optval: libc::c_int = enable as libc::c_int;
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_KEEPALIVE,
            &optval as *const _ as *const libc::c_void,
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        );
        if enable {
            if let Some(opt) = platform.keepalive_idle {
                let secs: libc::c_int = idle.as_secs().max(1) as libc::c_int;
                libc::setsockopt(
                    fd,
                    libc::IPPROTO_TCP,
                    opt,
                    &secs as *const _ as *const libc::c_void,
                    mem::size_of::<libc::c_int>() as libc::socklen_t,
                );
            }
        }
    }
}

/// Flush spill buffer ke socket; sisa partial write digeser ke depan
fn flush_spill(inner: &mut SocketInner) -> io::Result<()> {
    if inner.write_spill.is_empty() {
        return Ok(());
    }
    let Some(io) = inner.io.as_mut() else {
        return Ok(());
    };
    let mut written = 0;
    while written < inner.write_spill.len() {
        match io.write(&inner.write_spill[written..]) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "failed to write to socket",
                ))
            }
            Ok(n) => written += n,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    if written > 0 {
        inner.write_spill.drain(..written);
        inner.bytes_written += written as u64;
    }
    Ok(())
}

/// Jalur tulis: flush spill dulu (jaga urutan call), lalu tulis langsung,
/// sisanya yang kena WouldBlock masuk spill
fn push_bytes(inner: &mut SocketInner, data: &[u8]) -> io::Result<bool> {
    flush_spill(inner)?;
    let mut offset = 0;
    if inner.write_spill.is_empty() {
        let Some(io) = inner.io.as_mut() else {
            return Ok(false);
        };
        while offset < data.len() {
            match io.write(&data[offset..]) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "failed to write to socket",
                    ))
                }
                Ok(n) => {
                    offset += n;
                    inner.bytes_written += n as u64;
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
    if offset < data.len() {
        inner.write_spill.extend_from_slice(&data[offset..]);
    }
    Ok(inner.write_spill.len() < WRITE_HIGH_WATER_MARK)
}

/// Hitung interest yang diinginkan dari state sekarang dan sinkronkan
/// dengan registrasi poller
fn update_interest(rc: &Rc<RefCell<SocketInner>>) {
    let mut guard = rc.borrow_mut();
    let inner = &mut *guard;
    let (Some(token), Some(io)) = (inner.token, inner.io.as_mut()) else {
        return;
    };

    let has_consumer = inner.callbacks.data.is_some() || inner.onread.is_some();
    // Setelah end(), FIN dari peer tetap harus terbaca walau tanpa
    // consumer; tanpa ini socket tidak pernah menyelesaikan lifecycle
    let eof_watch = matches!(inner.state, SocketState::HalfClosedLocal);
    let want_read = matches!(
        inner.state,
        SocketState::Connected | SocketState::HalfClosedLocal
    ) && inner.readable_allowed
        && !inner.paused
        && (has_consumer || eof_watch);
    let want_write = matches!(inner.state, SocketState::Connecting)
        || (matches!(
            inner.state,
            SocketState::Connected | SocketState::HalfClosedLocal | SocketState::HalfClosedRemote
        ) && (!inner.write_spill.is_empty() || inner.fin_pending || inner.need_drain));

    let desired = match (want_read, want_write) {
        (true, true) => Some(Interest::READABLE.add(Interest::WRITABLE)),
        (true, false) => Some(Interest::READABLE),
        (false, true) => Some(Interest::WRITABLE),
        (false, false) => None,
    };

    if desired == inner.registered {
        return;
    }
    let result = match (inner.registered, desired) {
        (Some(_), Some(interest)) => inner.handle.reregister(io, token, interest),
        (None, Some(interest)) => inner.handle.register_at(io, token, interest),
        (Some(_), None) => inner.handle.deregister(io),
        (None, None) => Ok(()),
    };
    if result.is_ok() {
        inner.registered = desired;
    }
}

/// Penyelesaian nonblocking connect: `Ok(true)` terkoneksi, `Ok(false)`
/// masih berjalan (spurious wakeup), `Err` gagal
fn finish_connect(inner: &mut SocketInner) -> io::Result<bool> {
    let Some(io) = inner.io.as_mut() else {
        return Ok(false);
    };
    if let Some(err) = io.take_error()? {
        return Err(err);
    }
    match io.remote_endpoint() {
        Ok(remote) => {
            inner.remote_endpoint = Some(remote);
            inner.local_endpoint = io.local_endpoint().ok();
            inner.state = SocketState::Connected;
            inner.touch_activity();
            // Terapkan opsi transport yang dicatat sebelum terkoneksi
            if let Some(StreamIo::Tcp(stream)) = inner.io.as_ref() {
                if let Some((enable, idle)) = inner.keepalive {
                    apply_keepalive(stream.as_raw_fd(), enable, idle, inner.handle.platform());
                }
                if let Some(enable) = inner.nodelay {
                    let _ = stream.set_nodelay(enable);
                }
            }
            Ok(true)
        }
        Err(ref e)
            if e.kind() == io::ErrorKind::NotConnected
                || e.raw_os_error() == Some(libc::EINPROGRESS) =>
        {
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

/// Dispatch readiness dari reactor untuk satu socket
pub(crate) fn handle_event(rc: &Rc<RefCell<SocketInner>>, readable: bool, writable: bool) {
    if matches!(rc.borrow().state, SocketState::Connecting) {
        let result = {
            let mut inner = rc.borrow_mut();
            finish_connect(&mut inner)
        };
        match result {
            Ok(true) => {
                update_interest(rc);
                emit_simple(rc, Slot::Connect);
            }
            Ok(false) => return,
            Err(err) => {
                fail(rc, Error::from_io(err));
                return;
            }
        }
    }
    if writable {
        handle_writable(rc);
    }
    if readable {
        pump_reads(rc);
    }
}

fn handle_writable(rc: &Rc<RefCell<SocketInner>>) {
    let flush_result = {
        let mut inner = rc.borrow_mut();
        if inner.io.is_none() {
            return;
        }
        flush_spill(&mut inner)
    };
    if let Err(err) = flush_result {
        fail(rc, Error::from_io(err));
        return;
    }

    let (emit_drain, do_destroy) = {
        let mut guard = rc.borrow_mut();
        let inner = &mut *guard;
        let flushed = inner.write_spill.is_empty();
        let emit_drain = flushed && inner.need_drain;
        if emit_drain {
            inner.need_drain = false;
        }
        if flushed && inner.fin_pending {
            inner.fin_pending = false;
            if let Some(io) = inner.io.as_ref() {
                let _ = io.shutdown_write();
            }
        }
        inner.touch_activity();
        (emit_drain, flushed && inner.destroy_on_flush)
    };

    if emit_drain {
        emit_simple(rc, Slot::Drain);
    }
    if do_destroy {
        destroy(rc);
        return;
    }
    update_interest(rc);
}

enum ReadStep {
    Data(Vec<u8>),
    OnRead(usize),
    Eof,
    Idle,
    Retry,
    Failed(io::Error),
}

/// Loop baca sampai WouldBlock/EOF. Chunk disalin keluar sebelum
/// callback dipanggil supaya tidak ada borrow yang tertahan.
pub(crate) fn pump_reads(rc: &Rc<RefCell<SocketInner>>) {
    loop {
        let step = {
            let mut guard = rc.borrow_mut();
            let inner = &mut *guard;
            if !matches!(
                inner.state,
                SocketState::Connected | SocketState::HalfClosedLocal
            ) || inner.paused
                || !inner.readable_allowed
            {
                break;
            }
            let Some(io) = inner.io.as_mut() else { break };
            let onread_mode = inner.onread.is_some();
            let buf: &mut [u8] = match inner.onread.as_mut() {
                Some(onread) => &mut onread.buffer[..],
                None => &mut inner.read_scratch[..],
            };
            match io.read(buf) {
                Ok(0) => ReadStep::Eof,
                Ok(n) => {
                    let step = if onread_mode {
                        ReadStep::OnRead(n)
                    } else {
                        ReadStep::Data(buf[..n].to_vec())
                    };
                    inner.bytes_read += n as u64;
                    inner.touch_activity();
                    step
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => ReadStep::Idle,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => ReadStep::Retry,
                Err(e) => ReadStep::Failed(e),
            }
        };

        match step {
            ReadStep::Data(chunk) => emit_data(rc, &chunk),
            ReadStep::OnRead(n) => {
                let taken = rc.borrow_mut().onread.take();
                let Some(mut onread) = taken else { continue };
                let keep_going = (onread.callback)(n, &onread.buffer[..n]);
                {
                    let mut inner = rc.borrow_mut();
                    if inner.onread.is_none() && inner.state != SocketState::Closed {
                        inner.onread = Some(onread);
                    }
                    if !keep_going {
                        inner.paused = true;
                    }
                }
                if !keep_going {
                    update_interest(rc);
                    break;
                }
            }
            ReadStep::Eof => {
                handle_remote_eof(rc);
                break;
            }
            ReadStep::Idle => break,
            ReadStep::Retry => continue,
            ReadStep::Failed(err) => {
                fail(rc, Error::from_io(err));
                break;
            }
        }
    }
}

/// Peer menutup arah tulisnya (EOF terbaca)
fn handle_remote_eof(rc: &Rc<RefCell<SocketInner>>) {
    let state = rc.borrow().state;
    match state {
        SocketState::Connected => {
            rc.borrow_mut().state = SocketState::HalfClosedRemote;
            update_interest(rc);
            emit_simple(rc, Slot::End);
            let auto_close = !rc.borrow().allow_half_open;
            if auto_close {
                // Default: tidak mempertahankan half-open; balas FIN
                // lalu destroy, menghasilkan close(false)
                finish_and_destroy(rc);
            }
        }
        SocketState::HalfClosedLocal => {
            // Kedua arah kini tertutup
            emit_simple(rc, Slot::End);
            destroy(rc);
        }
        _ => {}
    }
}

/// Kirim FIN (setelah spill terflush) lalu destroy
fn finish_and_destroy(rc: &Rc<RefCell<SocketInner>>) {
    let immediate = {
        let mut guard = rc.borrow_mut();
        let inner = &mut *guard;
        if inner.write_spill.is_empty() {
            if let Some(io) = inner.io.as_ref() {
                let _ = io.shutdown_write();
            }
            true
        } else {
            inner.fin_pending = true;
            inner.destroy_on_flush = true;
            false
        }
    };
    if immediate {
        destroy(rc);
    } else {
        update_interest(rc);
    }
}

/// Teardown terminal. Idempotent: pemanggilan kedua dan seterusnya
/// tidak punya efek, notifikasi `close` tetap hanya satu.
pub(crate) fn destroy(rc: &Rc<RefCell<SocketInner>>) {
    let owner = {
        let mut guard = rc.borrow_mut();
        let inner = &mut *guard;
        if inner.state == SocketState::Closed {
            return;
        }
        // Timer milik socket selalu ikut dibatalkan
        inner.timeout = None;
        inner.deadline = None;
        inner.fin_pending = false;
        inner.destroy_on_flush = false;
        inner.need_drain = false;
        inner.write_spill.clear();
        if let Some(io) = inner.io.as_mut() {
            if inner.registered.is_some() {
                let _ = inner.handle.deregister(io);
            }
        }
        inner.registered = None;
        // Drop stream = pelepasan resource koneksi, tepat sekali
        inner.io = None;
        inner.state = SocketState::Closed;
        // Lepas callback supaya tidak ada cycle handle <-> closure;
        // close/error dipertahankan untuk emisi deferred yang tersisa
        inner.callbacks.connect = None;
        inner.callbacks.data = None;
        inner.callbacks.drain = None;
        inner.callbacks.timeout = None;
        inner.callbacks.end = None;
        inner.onread = None;
        if !inner.close_queued {
            inner.close_queued = true;
            inner
                .handle
                .defer(Deferred::SocketClose(rc.clone(), inner.errored));
        }
        inner.server.take()
    };
    if let Some(weak) = owner {
        if let Some(srv) = weak.upgrade() {
            server::release_connection(&srv);
        }
    }
}

/// Jalur runtime error: tandai errored, antri notifikasi `error`,
/// lalu paksa transisi terminal (urutan emisi: error dulu, close kemudian)
pub(crate) fn fail(rc: &Rc<RefCell<SocketInner>>, err: Error) {
    {
        let mut inner = rc.borrow_mut();
        if inner.state == SocketState::Closed {
            return;
        }
        inner.errored = true;
        inner
            .handle
            .defer(Deferred::SocketError(rc.clone(), err));
    }
    destroy(rc);
}

// --- hook untuk reactor ---

pub(crate) fn is_live(rc: &Rc<RefCell<SocketInner>>) -> bool {
    let inner = rc.borrow();
    inner.refed
        && matches!(
            inner.state,
            SocketState::Connecting
                | SocketState::Connected
                | SocketState::HalfClosedLocal
                | SocketState::HalfClosedRemote
        )
}

pub(crate) fn is_closed(rc: &Rc<RefCell<SocketInner>>) -> bool {
    rc.borrow().state == SocketState::Closed
}

pub(crate) fn next_deadline(rc: &Rc<RefCell<SocketInner>>) -> Option<Instant> {
    rc.borrow().deadline
}

/// Inactivity timer fire: hanya notifikasi, socket tidak ditutup.
/// Timer disarm sampai aktivitas berikutnya me-rearm.
pub(crate) fn fire_timeout(rc: &Rc<RefCell<SocketInner>>) {
    {
        let mut inner = rc.borrow_mut();
        if inner.state == SocketState::Closed {
            return;
        }
        inner.deadline = None;
    }
    emit_simple(rc, Slot::Timeout);
}

// --- emisi notifikasi ---
// Pola: ambil callback keluar dari slot, lepas borrow, panggil, kembalikan
// kalau slotnya masih kosong dan socket belum closed. Callback bebas
// memanggil method socket mana pun (termasuk mengganti dirinya sendiri).

fn emit_simple(rc: &Rc<RefCell<SocketInner>>, slot: Slot) {
    let taken = {
        let mut inner = rc.borrow_mut();
        match slot {
            Slot::Connect => inner.callbacks.connect.take(),
            Slot::Drain => inner.callbacks.drain.take(),
            Slot::Timeout => inner.callbacks.timeout.take(),
            Slot::End => inner.callbacks.end.take(),
        }
    };
    let Some(mut callback) = taken else { return };
    let socket = Socket { inner: rc.clone() };
    callback(&socket);
    let mut inner = rc.borrow_mut();
    if inner.state == SocketState::Closed {
        return;
    }
    let slot_ref = match slot {
        Slot::Connect => &mut inner.callbacks.connect,
        Slot::Drain => &mut inner.callbacks.drain,
        Slot::Timeout => &mut inner.callbacks.timeout,
        Slot::End => &mut inner.callbacks.end,
    };
    if slot_ref.is_none() {
        *slot_ref = Some(callback);
    }
}

fn emit_data(rc: &Rc<RefCell<SocketInner>>, chunk: &[u8]) {
    let taken = rc.borrow_mut().callbacks.data.take();
    let Some(mut callback) = taken else { return };
    let socket = Socket { inner: rc.clone() };
    callback(&socket, chunk);
    let mut inner = rc.borrow_mut();
    if inner.state != SocketState::Closed && inner.callbacks.data.is_none() {
        inner.callbacks.data = Some(callback);
    }
}

pub(crate) fn emit_error(rc: &Rc<RefCell<SocketInner>>, err: &Error) {
    let taken = rc.borrow_mut().callbacks.error.take();
    if let Some(mut callback) = taken {
        let socket = Socket { inner: rc.clone() };
        callback(&socket, err);
    }
    // Tidak direstore: emisi error selalu diikuti closure
}

pub(crate) fn emit_close(rc: &Rc<RefCell<SocketInner>>, had_error: bool) {
    let taken = rc.borrow_mut().callbacks.close.take();
    if let Some(mut callback) = taken {
        let socket = Socket { inner: rc.clone() };
        callback(&socket, had_error);
    }
    // Emisi terakhir seumur hidup socket; lepas sisa callback
    rc.borrow_mut().callbacks.error = None;
}
