//! Endpoint abstraction: a uniform byte stream over TCP, UDP, UNIX, FIFO, or an
//! already-accepted connection.
//!
//! Every endpoint advertises read/write [`Capability`] independent of its kind,
//! and a stable [`Endpoint::info`] label used in logs (`TCP:<ip>:<port>`,
//! `UNIX:<path>`, `CONN:TCP:<ip>:<port>`, ...).
//!
//! Read and write sides use independently cloned handles (`try_clone`) so a
//! blocking read on one thread never stalls a write on another.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, UdpSocket};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};

#[cfg(unix)]
use std::os::unix::net::UnixStream;

use parking_lot::Mutex;
use socket2::SockRef;

use crate::error::EndpointError;

/// Read/write capability advertised by an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Readable only; writes are rejected by the owning handler before they reach here.
    ReadOnly,
    /// Writable only.
    WriteOnly,
    /// Both readable and writable. The default when a resource spec omits a mode.
    ReadWrite,
}

impl Capability {
    /// True for `ReadOnly` and `ReadWrite`.
    #[must_use]
    pub const fn is_readable(self) -> bool {
        matches!(self, Self::ReadOnly | Self::ReadWrite)
    }

    /// True for `WriteOnly` and `ReadWrite`.
    #[must_use]
    pub const fn is_writable(self) -> bool {
        matches!(self, Self::WriteOnly | Self::ReadWrite)
    }
}

impl Default for Capability {
    fn default() -> Self {
        Self::ReadWrite
    }
}

impl FromStr for Capability {
    type Err = EndpointError;

    /// Parses the mode suffix of a resource spec: `R`, `W`, `RW`, or `WR`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "R" => Ok(Self::ReadOnly),
            "W" => Ok(Self::WriteOnly),
            "RW" | "WR" => Ok(Self::ReadWrite),
            other => Err(EndpointError::WrongResourceMode(other.to_string())),
        }
    }
}

/// Which transport an accepted connection arrived over, for label formatting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteKind {
    Tcp,
    #[cfg(unix)]
    Unix,
}

#[derive(Debug)]
enum Kind {
    Tcp(SocketAddr),
    Udp(SocketAddr),
    #[cfg(unix)]
    Unix(PathBuf),
    Fifo(PathBuf),
    Conn { remote_kind: RemoteKind, label: String },
}

impl Kind {
    fn dial(&self) -> io::Result<(Stream, Stream)> {
        match self {
            Kind::Tcp(addr) => {
                let stream = TcpStream::connect(addr)?;
                SockRef::from(&stream).set_nodelay(true)?;
                let write = stream.try_clone()?;
                Ok((Stream::Tcp(stream), Stream::Tcp(write)))
            }
            Kind::Udp(addr) => {
                let socket = UdpSocket::bind((std::net::Ipv4Addr::UNSPECIFIED, 0))?;
                socket.connect(addr)?;
                let write = socket.try_clone()?;
                Ok((Stream::Udp(socket), Stream::Udp(write)))
            }
            #[cfg(unix)]
            Kind::Unix(path) => {
                let stream = UnixStream::connect(path)?;
                let write = stream.try_clone()?;
                Ok((Stream::Unix(stream), Stream::Unix(write)))
            }
            Kind::Fifo(path) => {
                let file = OpenOptions::new().read(true).write(true).open(path)?;
                let write = file.try_clone()?;
                Ok((Stream::File(file), Stream::File(write)))
            }
            Kind::Conn { .. } => unreachable!("accepted connections never dial"),
        }
    }
}

enum Stream {
    Tcp(TcpStream),
    Udp(UdpSocket),
    #[cfg(unix)]
    Unix(UnixStream),
    File(File),
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Stream::Tcp(s) => s.read(buf),
            Stream::Udp(s) => s.recv(buf),
            #[cfg(unix)]
            Stream::Unix(s) => s.read(buf),
            Stream::File(f) => f.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Stream::Tcp(s) => s.write(buf),
            Stream::Udp(s) => s.send(buf),
            #[cfg(unix)]
            Stream::Unix(s) => s.write(buf),
            Stream::File(f) => f.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Stream::Tcp(s) => s.flush(),
            Stream::Udp(_) => Ok(()),
            #[cfg(unix)]
            Stream::Unix(s) => s.flush(),
            Stream::File(f) => f.flush(),
        }
    }
}

/// A single byte-stream endpoint: one of TCP, UDP, UNIX, FIFO, or an accepted
/// downstream connection.
pub struct Endpoint {
    kind: Kind,
    capability: Capability,
    open: AtomicBool,
    transition: Mutex<()>,
    read_half: Mutex<Option<Stream>>,
    write_half: Mutex<Option<Stream>>,
}

impl Endpoint {
    /// A TCP upstream, dialed on [`Endpoint::open`].
    #[must_use]
    pub fn tcp(addr: SocketAddr, capability: Capability) -> Self {
        Self::new(Kind::Tcp(addr), capability, false)
    }

    /// A UDP upstream, connected on [`Endpoint::open`].
    #[must_use]
    pub fn udp(addr: SocketAddr, capability: Capability) -> Self {
        Self::new(Kind::Udp(addr), capability, false)
    }

    /// A UNIX-domain socket upstream.
    #[cfg(unix)]
    #[must_use]
    pub fn unix(path: PathBuf, capability: Capability) -> Self {
        Self::new(Kind::Unix(path), capability, false)
    }

    /// A named pipe upstream. The path must already exist as a FIFO.
    #[must_use]
    pub fn fifo(path: PathBuf, capability: Capability) -> Self {
        Self::new(Kind::Fifo(path), capability, false)
    }

    /// Wraps a just-accepted TCP connection. Always read-write, always open.
    pub fn from_accepted_tcp(stream: TcpStream) -> io::Result<Self> {
        SockRef::from(&stream).set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        let label = format!("CONN:TCP:{}:{}", peer.ip(), peer.port());
        let write = stream.try_clone()?;
        Ok(Self::open_with(
            Kind::Conn { remote_kind: RemoteKind::Tcp, label },
            Stream::Tcp(stream),
            Stream::Tcp(write),
        ))
    }

    /// Wraps a just-accepted UNIX connection. Always read-write, always open.
    #[cfg(unix)]
    pub fn from_accepted_unix(stream: UnixStream) -> io::Result<Self> {
        let label = match stream.peer_addr()?.as_pathname() {
            Some(path) => format!("CONN:UNIX:{}", path.display()),
            None => "CONN:UNIX:<unbound>".to_string(),
        };
        let write = stream.try_clone()?;
        Ok(Self::open_with(
            Kind::Conn { remote_kind: RemoteKind::Unix, label },
            Stream::Unix(stream),
            Stream::Unix(write),
        ))
    }

    fn new(kind: Kind, capability: Capability, open: bool) -> Self {
        Self {
            kind,
            capability,
            open: AtomicBool::new(open),
            transition: Mutex::new(()),
            read_half: Mutex::new(None),
            write_half: Mutex::new(None),
        }
    }

    fn open_with(kind: Kind, read: Stream, write: Stream) -> Self {
        let endpoint = Self::new(kind, Capability::ReadWrite, true);
        *endpoint.read_half.lock() = Some(read);
        *endpoint.write_half.lock() = Some(write);
        endpoint
    }

    /// Establishes the underlying stream. Idempotent: a second call returns
    /// [`EndpointError::AlreadyOpen`]. Accepted connections reject this call
    /// with [`EndpointError::OpenNotSupported`] since they start open.
    pub fn open(&self) -> Result<(), EndpointError> {
        let _guard = self.transition.lock();
        if matches!(self.kind, Kind::Conn { .. }) {
            return Err(EndpointError::OpenNotSupported);
        }
        if self.open.load(Ordering::Acquire) {
            return Err(EndpointError::AlreadyOpen);
        }
        let (read, write) = self.kind.dial()?;
        *self.read_half.lock() = Some(read);
        *self.write_half.lock() = Some(write);
        self.open.store(true, Ordering::Release);
        Ok(())
    }

    /// Tears down the stream. Idempotent: a second call returns
    /// [`EndpointError::AlreadyClosed`].
    pub fn close(&self) -> Result<(), EndpointError> {
        let _guard = self.transition.lock();
        if !self.open.load(Ordering::Acquire) {
            return Err(EndpointError::AlreadyClosed);
        }
        self.read_half.lock().take();
        self.write_half.lock().take();
        self.open.store(false, Ordering::Release);
        Ok(())
    }

    /// Whether the endpoint currently has a live stream.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Whether this endpoint may be read from.
    #[must_use]
    pub const fn is_readable(&self) -> bool {
        self.capability.is_readable()
    }

    /// Whether this endpoint may be written to.
    #[must_use]
    pub const fn is_writable(&self) -> bool {
        self.capability.is_writable()
    }

    /// True for transports where a successful zero-length read is an
    /// ordinary message, not a peer-closed signal. UDP datagrams may
    /// legitimately carry no payload; TCP, UNIX, and FIFO streams treat
    /// `Ok(0)` as EOF.
    #[must_use]
    pub const fn is_datagram(&self) -> bool {
        matches!(self.kind, Kind::Udp(_))
    }

    /// Stable diagnostic label, e.g. `TCP:127.0.0.1:6060` or `CONN:UNIX:/tmp/s`.
    #[must_use]
    pub fn info(&self) -> String {
        match &self.kind {
            Kind::Tcp(addr) => format!("TCP:{}:{}", addr.ip(), addr.port()),
            Kind::Udp(addr) => format!("UDP:{}:{}", addr.ip(), addr.port()),
            #[cfg(unix)]
            Kind::Unix(path) => format!("UNIX:{}", path.display()),
            Kind::Fifo(path) => format!("FIFO:{}", path.display()),
            Kind::Conn { label, .. } => label.clone(),
        }
    }

    /// Reads into `buf`. Returns `Ok(0)` on EOF, matching `std::io::Read`.
    pub fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut guard = self.read_half.lock();
        let stream = guard
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "endpoint not open"))?;
        stream.read(buf)
    }

    /// Writes `buf`, returning the number of bytes accepted. Short writes are
    /// not retried at this layer.
    pub fn write(&self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self.write_half.lock();
        let stream = guard
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "endpoint not open"))?;
        stream.write(buf)
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("info", &self.info())
            .field("open", &self.is_open())
            .field("capability", &self.capability)
            .finish()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.info())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, TcpListener};

    #[test]
    fn capability_parses_mode_letters() {
        assert_eq!(Capability::from_str("R").unwrap(), Capability::ReadOnly);
        assert_eq!(Capability::from_str("W").unwrap(), Capability::WriteOnly);
        assert_eq!(Capability::from_str("RW").unwrap(), Capability::ReadWrite);
        assert_eq!(Capability::from_str("WR").unwrap(), Capability::ReadWrite);
        assert!(Capability::from_str("X").is_err());
    }

    #[test]
    fn capability_default_is_read_write() {
        assert_eq!(Capability::default(), Capability::ReadWrite);
    }

    #[test]
    fn tcp_label_matches_info_format() {
        let addr: SocketAddr = (Ipv4Addr::LOCALHOST, 6060).into();
        let endpoint = Endpoint::tcp(addr, Capability::ReadWrite);
        assert_eq!(endpoint.info(), "TCP:127.0.0.1:6060");
        assert!(!endpoint.is_open());
    }

    #[test]
    fn tcp_open_close_roundtrip() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let addr = listener.local_addr().unwrap();

        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 5];
            stream.read_exact(&mut buf).unwrap();
            assert_eq!(&buf, b"hello");
        });

        let endpoint = Endpoint::tcp(addr, Capability::ReadWrite);
        endpoint.open().unwrap();
        assert!(endpoint.is_open());
        assert!(matches!(endpoint.open(), Err(EndpointError::AlreadyOpen)));

        let n = endpoint.write(b"hello").unwrap();
        assert_eq!(n, 5);

        server.join().unwrap();
        endpoint.close().unwrap();
        assert!(!endpoint.is_open());
        assert!(matches!(endpoint.close(), Err(EndpointError::AlreadyClosed)));
    }

    #[test]
    fn accepted_tcp_starts_open_and_rejects_open() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let addr = listener.local_addr().unwrap();
        let client = std::thread::spawn(move || TcpStream::connect(addr).unwrap());
        let (accepted, _) = listener.accept().unwrap();
        let _client_stream = client.join().unwrap();

        let endpoint = Endpoint::from_accepted_tcp(accepted).unwrap();
        assert!(endpoint.is_open());
        assert!(endpoint.info().starts_with("CONN:TCP:"));
        assert!(matches!(endpoint.open(), Err(EndpointError::OpenNotSupported)));
    }

    #[cfg(unix)]
    #[test]
    fn unix_label_matches_info_format() {
        let path = PathBuf::from("/tmp/fanrelay-test.sock");
        let endpoint = Endpoint::unix(path.clone(), Capability::ReadOnly);
        assert_eq!(endpoint.info(), format!("UNIX:{}", path.display()));
        assert!(endpoint.is_readable());
        assert!(!endpoint.is_writable());
    }

    #[test]
    fn fifo_label_matches_info_format() {
        let path = PathBuf::from("/tmp/fanrelay-test.fifo");
        let endpoint = Endpoint::fifo(path.clone(), Capability::WriteOnly);
        assert_eq!(endpoint.info(), format!("FIFO:{}", path.display()));
        assert!(!endpoint.is_readable());
        assert!(endpoint.is_writable());
    }
}
