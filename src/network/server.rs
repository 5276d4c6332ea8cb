//! Server: pemilik listener dan accept loop
//!
//! Satu `Server` memiliki tepat satu resource listener (TCP atau local
//! socket) dan menjalankan accept loop selama `Listening`:
//!
//! ```text
//! Idle -> Listening -> Closing -> Closed
//! ```
//!
//! Accept loop menguras koneksi masuk sampai `WouldBlock`, membungkus
//! tiap koneksi sebagai `Socket` yang sudah `Connected`, lalu
//! mengantarkannya lewat notifikasi `connection`. Saat plafon
//! `max_connections` tercapai, koneksi berlebih langsung ditutup tanpa
//! pernah diantar (fail-fast admission, listener tetap terbuka).
//! Menutup listener adalah satu-satunya mekanisme pembatalan loop.

use std::cell::RefCell;
use std::ffi::CString;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use mio::event::Source;
use mio::net::{TcpListener, UnixListener};
use mio::{Interest, Registry, Token};
use socket2::{Domain, SockAddr, Socket as RawSocket, Type};

use crate::addr::{default_bind_host, is_ipv4, Address, Endpoint};
use crate::error::{Error, Result};
use crate::network::socket::{self, Socket, StreamIo};
use crate::reactor::{Deferred, Entry, Handle};

/// Backlog default saat caller tidak menyuplai (konstanta libuv)
const DEFAULT_BACKLOG: u32 = 511;

/// State lifecycle sebuah server
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServerState {
    /// Belum ada listener; menunggu `listen()`
    Idle,
    /// Listener terikat, accept loop berjalan
    Listening,
    /// `close()` dipanggil; berhenti accept, resource sedang dilepas
    Closing,
    /// Terminal; listener sudah dilepas
    Closed,
}

/// Options konstruksi `Server`
pub struct ServerOptions {
    /// Diteruskan ke tiap socket hasil accept (default `false`:
    /// socket otomatis di-destroy begitu remote menutup)
    pub allow_half_open: bool,
    /// Plafon admission; `None` berarti tanpa batas
    pub max_connections: Option<usize>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            allow_half_open: false,
            max_connections: None,
        }
    }
}

/// Options untuk `listen()`: `port`+`host` memilih TCP, `path` memilih
/// local socket (tepat satu wajib ada)
pub struct ListenOptions {
    pub port: Option<u32>,
    pub host: Option<String>,
    pub path: Option<PathBuf>,
    /// Kedalaman antrian accept kernel (advisory)
    pub backlog: Option<u32>,
    /// `true` mematikan port sharing antar proses (advisory)
    pub exclusive: bool,
    /// Listener IPv6 tidak menerima koneksi IPv4-mapped
    pub ipv6_only: bool,
    /// Local socket: path bisa dibaca semua user
    pub readable_all: bool,
    /// Local socket: path bisa ditulis semua user
    pub writable_all: bool,
}

impl Default for ListenOptions {
    fn default() -> Self {
        Self {
            port: None,
            host: None,
            path: None,
            backlog: None,
            exclusive: false,
            ipv6_only: false,
            readable_all: false,
            writable_all: false,
        }
    }
}

type ServerCb = Box<dyn FnMut(&Server)>;
type ConnectionCb = Box<dyn FnMut(&Server, Socket)>;
type ServerErrorCb = Box<dyn FnMut(&Server, &Error)>;

#[derive(Default)]
struct Callbacks {
    listening: Option<ServerCb>,
    connection: Option<ConnectionCb>,
    close: Option<ServerCb>,
    error: Option<ServerErrorCb>,
}

/// Listener transport di balik server
pub(crate) enum ListenerIo {
    Tcp(TcpListener),
    Local(UnixListener),
}

impl ListenerIo {
    fn accept(&self) -> io::Result<StreamIo> {
        match self {
            ListenerIo::Tcp(l) => l.accept().map(|(stream, _)| StreamIo::Tcp(stream)),
            ListenerIo::Local(l) => l.accept().map(|(stream, _)| StreamIo::Local(stream)),
        }
    }

    fn local_endpoint(&self) -> io::Result<Endpoint> {
        match self {
            ListenerIo::Tcp(l) => l.local_addr().map(Endpoint::Tcp),
            ListenerIo::Local(l) => l.local_addr().map(|addr| Endpoint::Local {
                path: addr.as_pathname().map(|p| p.to_owned()),
            }),
        }
    }
}

impl Source for ListenerIo {
    fn register(&mut self, registry: &Registry, token: Token, interest: Interest) -> io::Result<()> {
        match self {
            ListenerIo::Tcp(l) => l.register(registry, token, interest),
            ListenerIo::Local(l) => l.register(registry, token, interest),
        }
    }

    fn reregister(
        &mut self,
        registry: &Registry,
        token: Token,
        interest: Interest,
    ) -> io::Result<()> {
        match self {
            ListenerIo::Tcp(l) => l.reregister(registry, token, interest),
            ListenerIo::Local(l) => l.reregister(registry, token, interest),
        }
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        match self {
            ListenerIo::Tcp(l) => l.deregister(registry),
            ListenerIo::Local(l) => l.deregister(registry),
        }
    }
}

pub(crate) struct ServerInner {
    handle: Handle,
    state: ServerState,
    errored: bool,
    listener: Option<ListenerIo>,
    bound: Option<Endpoint>,
    bound_path: Option<PathBuf>,
    connection_count: usize,
    max_connections: Option<usize>,
    allow_half_open: bool,
    refed: bool,
    callbacks: Callbacks,
}

impl ServerInner {
    #[inline]
    pub(crate) fn connection_count(&self) -> usize {
        self.connection_count
    }
}

/// Handle server, murah di-clone. Semua method menerima `&self`;
/// state interior dijaga `RefCell` karena seluruh sistem single-threaded.
#[derive(Clone)]
pub struct Server {
    inner: Rc<RefCell<ServerInner>>,
}

impl Server {
    pub fn new(handle: &Handle, options: ServerOptions) -> Server {
        Server {
            inner: Rc::new(RefCell::new(ServerInner {
                handle: handle.clone(),
                state: ServerState::Idle,
                errored: false,
                listener: None,
                bound: None,
                bound_path: None,
                connection_count: 0,
                max_connections: options.max_connections,
                allow_half_open: options.allow_half_open,
                refed: true,
                callbacks: Callbacks::default(),
            })),
        }
    }

    /// Ikat listener ke address dan mulai accept loop.
    ///
    /// Gagal `AlreadyListening` kecuali state `Idle`. Validasi options
    /// berjalan synchronous, sebelum pekerjaan asynchronous apa pun;
    /// kegagalan bind (address in use, permission denied, path tidak
    /// valid) muncul asynchronous lewat notifikasi `error` lalu `close`
    /// (server tidak pernah diam-diam bertahan `Idle`).
    pub fn listen(&self, options: ListenOptions) -> Result<()> {
        if self.inner.borrow().state != ServerState::Idle {
            return Err(Error::AlreadyListening);
        }

        let ListenOptions {
            port,
            host,
            path,
            backlog,
            exclusive,
            ipv6_only,
            readable_all,
            writable_all,
        } = options;

        let address = Address::from_parts(port, host.as_deref(), path.as_deref())?;
        let backlog = backlog.unwrap_or(DEFAULT_BACKLOG);

        let built = match &address {
            Address::Tcp { host, port } => {
                let host = host
                    .clone()
                    .unwrap_or_else(|| default_bind_host(ipv6_only).to_string());
                if ipv6_only && is_ipv4(&host) {
                    return Err(Error::InvalidAddressFamily);
                }
                build_tcp_listener(&host, *port, backlog, exclusive, ipv6_only)
                    .map(ListenerIo::Tcp)
            }
            Address::Local { path } => {
                if !self.inner.borrow().handle.platform().local_sockets {
                    return Err(Error::InvalidArgument(
                        "local sockets are not supported on this platform".into(),
                    ));
                }
                build_local_listener(path, backlog, readable_all, writable_all)
                    .map(ListenerIo::Local)
            }
        };

        let mut listener = match built {
            Ok(listener) => listener,
            Err(err) => {
                fail(&self.inner, Error::from_io(err));
                return Ok(());
            }
        };

        // Snapshot endpoint sekarang: port ephemeral sudah ter-resolve
        let bound = listener.local_endpoint().ok();
        let registered = {
            let mut guard = self.inner.borrow_mut();
            let inner = &mut *guard;
            match inner.handle.register(&mut listener, Interest::READABLE) {
                Ok(token) => {
                    inner.state = ServerState::Listening;
                    inner.bound = bound;
                    inner.bound_path = match &address {
                        Address::Local { path } => Some(path.clone()),
                        Address::Tcp { .. } => None,
                    };
                    inner.listener = Some(listener);
                    inner.handle.adopt(token, Entry::Server(self.inner.clone()));
                    inner.handle.defer(Deferred::Listening(self.inner.clone()));
                    Ok(())
                }
                Err(err) => Err(err),
            }
        };
        if let Err(err) = registered {
            fail(&self.inner, Error::from_io(err));
        }
        Ok(())
    }

    /// Berhenti accept dan lepas listener.
    ///
    /// Gagal `ServerNotRunning` kecuali state `Listening`. Socket yang
    /// sudah diantar tidak ikut ditutup; mereka drain sendiri-sendiri.
    /// State menjadi `Closed` begitu resource listener dilepas, tanpa
    /// menunggu koneksi yang masih hidup.
    pub fn close(&self) -> Result<()> {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.state != ServerState::Listening {
                return Err(Error::ServerNotRunning);
            }
            inner.state = ServerState::Closing;
        }
        teardown(&self.inner);
        Ok(())
    }

    /// Endpoint yang terikat; `Some` hanya selama `Listening`
    pub fn address(&self) -> Option<Endpoint> {
        let inner = self.inner.borrow();
        match inner.state {
            ServerState::Listening => inner.bound.clone(),
            _ => None,
        }
    }

    #[inline]
    pub fn state(&self) -> ServerState {
        self.inner.borrow().state
    }

    #[inline]
    pub fn listening(&self) -> bool {
        self.inner.borrow().state == ServerState::Listening
    }

    /// Apakah server pernah gagal (bind atau accept); sekali terpasang
    /// flag ini selalu disertai transisi ke `Closed`
    #[inline]
    pub fn errored(&self) -> bool {
        self.inner.borrow().errored
    }

    /// Snapshot synchronous jumlah koneksi hidup hasil accept
    #[inline]
    pub fn connection_count(&self) -> usize {
        self.inner.borrow().connection_count
    }

    /// Snapshot asynchronous jumlah koneksi: jawaban diantar dari tick
    /// reactor berikutnya, tidak pernah menunggu koneksi selesai
    pub fn get_connections(&self, callback: impl FnOnce(usize) + 'static) {
        let handle = self.inner.borrow().handle.clone();
        handle.defer(Deferred::Connections(self.inner.clone(), Box::new(callback)));
    }

    // --- scheduling hints ---

    /// Server ini ikut menahan `Reactor::run()` tetap hidup (default)
    pub fn ref_(&self) {
        self.inner.borrow_mut().refed = true;
    }

    /// Server ini tidak lagi menahan `Reactor::run()` tetap hidup.
    /// Murni hint penjadwalan, tidak menyentuh kebenaran accept loop.
    pub fn unref(&self) {
        self.inner.borrow_mut().refed = false;
    }

    // --- registrasi notifikasi ---

    /// One-shot: dipanggil sekali begitu listener terikat
    pub fn on_listening(&self, callback: impl FnMut(&Server) + 'static) {
        self.inner.borrow_mut().callbacks.listening = Some(Box::new(callback));
    }

    pub fn on_connection(&self, callback: impl FnMut(&Server, Socket) + 'static) {
        self.inner.borrow_mut().callbacks.connection = Some(Box::new(callback));
    }

    pub fn on_close(&self, callback: impl FnMut(&Server) + 'static) {
        self.inner.borrow_mut().callbacks.close = Some(Box::new(callback));
    }

    pub fn on_error(&self, callback: impl FnMut(&Server, &Error) + 'static) {
        self.inner.borrow_mut().callbacks.error = Some(Box::new(callback));
    }
}

fn build_tcp_listener(
    host: &str,
    port: u16,
    backlog: u32,
    exclusive: bool,
    ipv6_only: bool,
) -> io::Result<TcpListener> {
    // Tanpa resolusi DNS: host non-literal gagal di sini dan muncul
    // sebagai bind error asynchronous
    let ip: IpAddr = host.parse().map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("cannot resolve host '{}': name lookup is not performed", host),
        )
    })?;
    let addr = SocketAddr::new(ip, port);
    let domain = if addr.is_ipv6() {
        Domain::IPV6
    } else {
        Domain::IPV4
    };
    let sock = RawSocket::new(domain, Type::STREAM, None)?;
    if addr.is_ipv6() {
        sock.set_only_v6(ipv6_only)?;
    }
    sock.set_reuse_address(true)?;
    #[cfg(unix)]
    if !exclusive {
        sock.set_reuse_port(true)?;
    }
    sock.set_nonblocking(true)?;
    sock.bind(&addr.into())?;
    sock.listen(backlog as i32)?;
    Ok(TcpListener::from_std(sock.into()))
}

fn build_local_listener(
    path: &Path,
    backlog: u32,
    readable_all: bool,
    writable_all: bool,
) -> io::Result<UnixListener> {
    let sock = RawSocket::new(Domain::UNIX, Type::STREAM, None)?;
    sock.set_nonblocking(true)?;
    // Path yang sudah ada muncul sebagai EADDRINUSE; tidak pernah
    // dihapus dari bawah proses lain
    sock.bind(&SockAddr::unix(path)?)?;
    sock.listen(backlog as i32)?;
    apply_socket_mode(path, readable_all, writable_all);
    Ok(UnixListener::from_std(sock.into()))
}

/// Permission bits untuk path local socket; hanya diterapkan saat salah
/// satu flag diminta. Kegagalan chmod tidak fatal.
fn apply_socket_mode(path: &Path, readable_all: bool, writable_all: bool) {
    if !readable_all && !writable_all {
        return;
    }
    let mut mode: libc::mode_t = 0o600;
    if readable_all {
        mode |= 0o044;
    }
    if writable_all {
        mode |= 0o022;
    }
    if let Ok(cpath) = CString::new(path.as_os_str().as_bytes()) {
        unsafe {
            libc::chmod(cpath.as_ptr(), mode);
        }
    }
}

enum AcceptStep {
    Stream(StreamIo),
    Idle,
    Retry,
    Failed(io::Error),
}

/// Dispatch readiness dari reactor: kuras accept sampai WouldBlock
pub(crate) fn handle_event(rc: &Rc<RefCell<ServerInner>>) {
    loop {
        let step = {
            let inner = rc.borrow();
            if inner.state != ServerState::Listening {
                return;
            }
            let Some(listener) = inner.listener.as_ref() else {
                return;
            };
            match listener.accept() {
                Ok(io) => AcceptStep::Stream(io),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => AcceptStep::Idle,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => AcceptStep::Retry,
                Err(e) => AcceptStep::Failed(e),
            }
        };

        match step {
            AcceptStep::Stream(io) => deliver(rc, io),
            AcceptStep::Idle => break,
            AcceptStep::Retry => continue,
            AcceptStep::Failed(err) => {
                // Accept error yang tidak bisa dipulihkan menutup server:
                // `error` dulu, lalu transisi terminal
                fail(rc, Error::from_io(err));
                break;
            }
        }
    }
}

/// Satu koneksi hasil accept: admission check, bungkus jadi `Socket`
/// yang sudah `Connected`, hitung, antar lewat notifikasi `connection`
fn deliver(rc: &Rc<RefCell<ServerInner>>, io: StreamIo) {
    let (handle, allow_half_open, at_capacity) = {
        let inner = rc.borrow();
        let at_capacity = inner
            .max_connections
            .map_or(false, |max| inner.connection_count >= max);
        (inner.handle.clone(), inner.allow_half_open, at_capacity)
    };

    if at_capacity {
        // Plafon tercapai: drop stream = tutup segera, tanpa antri,
        // tanpa notifikasi; listener tetap terbuka
        drop(io);
        return;
    }

    let socket = match socket::accepted(&handle, io, rc, allow_half_open) {
        Ok(socket) => socket,
        // Registrasi gagal untuk stream ini saja; loop jalan terus
        Err(_) => return,
    };
    rc.borrow_mut().connection_count += 1;
    emit_connection(rc, socket);
}

/// Dipanggil jalur destroy socket hasil accept; count tidak pernah negatif
pub(crate) fn release_connection(rc: &Rc<RefCell<ServerInner>>) {
    let mut inner = rc.borrow_mut();
    inner.connection_count = inner.connection_count.saturating_sub(1);
}

/// Lepas listener dan jadikan terminal. Idempotent.
fn teardown(rc: &Rc<RefCell<ServerInner>>) {
    let unlink = {
        let mut guard = rc.borrow_mut();
        let inner = &mut *guard;
        if inner.state == ServerState::Closed {
            return;
        }
        if let Some(mut listener) = inner.listener.take() {
            let _ = inner.handle.deregister(&mut listener);
            // Drop listener = pelepasan resource; accept yang sedang
            // menunggu tidak akan pernah diantar lagi
        }
        inner.bound = None;
        inner.state = ServerState::Closed;
        inner.callbacks.listening = None;
        inner.callbacks.connection = None;
        inner.handle.defer(Deferred::ServerClose(rc.clone()));
        inner.bound_path.take()
    };
    if let Some(path) = unlink {
        // Listener tidak meng-unlink path-nya sendiri saat drop; path
        // basi membuat listen berikutnya gagal EADDRINUSE
        let _ = std::fs::remove_file(path);
    }
}

/// Jalur runtime error (bind gagal, accept gagal): tandai errored,
/// antri notifikasi `error`, lalu paksa transisi terminal
pub(crate) fn fail(rc: &Rc<RefCell<ServerInner>>, err: Error) {
    {
        let mut inner = rc.borrow_mut();
        if inner.state == ServerState::Closed {
            return;
        }
        inner.errored = true;
        inner.handle.defer(Deferred::ServerError(rc.clone(), err));
    }
    teardown(rc);
}

// --- hook untuk reactor ---

pub(crate) fn is_live(rc: &Rc<RefCell<ServerInner>>) -> bool {
    let inner = rc.borrow();
    inner.refed && inner.state == ServerState::Listening
}

pub(crate) fn is_closed(rc: &Rc<RefCell<ServerInner>>) -> bool {
    rc.borrow().state == ServerState::Closed
}

// --- emisi notifikasi ---
// Pola yang sama dengan socket: ambil callback keluar dari slot, lepas
// borrow, panggil, kembalikan kalau slot masih kosong.

pub(crate) fn emit_listening(rc: &Rc<RefCell<ServerInner>>) {
    let taken = rc.borrow_mut().callbacks.listening.take();
    if let Some(mut callback) = taken {
        let server = Server { inner: rc.clone() };
        callback(&server);
    }
    // One-shot: tidak direstore
}

fn emit_connection(rc: &Rc<RefCell<ServerInner>>, socket: Socket) {
    let taken = rc.borrow_mut().callbacks.connection.take();
    let Some(mut callback) = taken else { return };
    let server = Server { inner: rc.clone() };
    callback(&server, socket);
    let mut inner = rc.borrow_mut();
    if inner.state == ServerState::Listening && inner.callbacks.connection.is_none() {
        inner.callbacks.connection = Some(callback);
    }
}

pub(crate) fn emit_error(rc: &Rc<RefCell<ServerInner>>, err: &Error) {
    let taken = rc.borrow_mut().callbacks.error.take();
    if let Some(mut callback) = taken {
        let server = Server { inner: rc.clone() };
        callback(&server, err);
    }
    // Tidak direstore: emisi error selalu diikuti closure
}

pub(crate) fn emit_close(rc: &Rc<RefCell<ServerInner>>) {
    let taken = rc.borrow_mut().callbacks.close.take();
    if let Some(mut callback) = taken {
        let server = Server { inner: rc.clone() };
        callback(&server);
    }
    // Emisi terakhir seumur hidup server; lepas sisa callback
    rc.borrow_mut().callbacks.error = None;
}
