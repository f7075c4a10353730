//! Listener: binds the downstream-facing socket and accepts client
//! connections, wrapping each into an [`Endpoint`].
//!
//! `accept()` is polled with a short read timeout (rather than relying on a
//! platform-specific close-unblocks-accept guarantee) so the acceptor thread
//! can check the coordinator's running flag between attempts.

use std::net::{Ipv4Addr, TcpListener};
use std::time::Duration;

#[cfg(unix)]
use std::os::unix::net::UnixListener;

use fanrelay_core::endpoint::Endpoint;
use socket2::SockRef;

use crate::resource::ListenSpec;

/// How often a blocked `accept()` call is polled for the running flag.
pub const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// The downstream-facing listening socket.
pub enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

impl Listener {
    /// Binds according to `spec`. For `UNIX`, a stale socket file at the
    /// target path is removed first.
    pub fn bind(spec: &ListenSpec) -> std::io::Result<Self> {
        match spec {
            ListenSpec::Tcp(port) => {
                let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, *port))?;
                SockRef::from(&listener).set_read_timeout(Some(ACCEPT_POLL_INTERVAL))?;
                Ok(Self::Tcp(listener))
            }
            #[cfg(unix)]
            ListenSpec::Unix(path) => {
                if path.exists() {
                    std::fs::remove_file(path)?;
                }
                let listener = UnixListener::bind(path)?;
                SockRef::from(&listener).set_read_timeout(Some(ACCEPT_POLL_INTERVAL))?;
                Ok(Self::Unix(listener))
            }
            #[cfg(not(unix))]
            ListenSpec::Unix(_) => Err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "UNIX listeners require a unix target",
            )),
        }
    }

    /// Blocks (up to [`ACCEPT_POLL_INTERVAL`]) for the next client
    /// connection, wrapping it as an always-open, read-write [`Endpoint`].
    pub fn accept(&self) -> std::io::Result<Endpoint> {
        match self {
            Self::Tcp(listener) => {
                let (stream, _) = listener.accept()?;
                Endpoint::from_accepted_tcp(stream)
            }
            #[cfg(unix)]
            Self::Unix(listener) => {
                let (stream, _) = listener.accept()?;
                Endpoint::from_accepted_unix(stream)
            }
        }
    }

    /// True if `err` is the expected poll-timeout rather than a real failure.
    #[must_use]
    pub fn is_poll_timeout(err: &std::io::Error) -> bool {
        matches!(
            err.kind(),
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binds_tcp_and_accepts_one_connection() {
        let listener = Listener::bind(&ListenSpec::Tcp(0)).unwrap();
        let addr = match &listener {
            Listener::Tcp(l) => l.local_addr().unwrap(),
            #[cfg(unix)]
            Listener::Unix(_) => unreachable!(),
        };

        let client = std::thread::spawn(move || std::net::TcpStream::connect(addr).unwrap());
        let endpoint = listener.accept().unwrap();
        assert!(endpoint.info().starts_with("CONN:TCP:"));
        assert!(endpoint.is_open());
        client.join().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn binds_unix_and_removes_stale_socket_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fanrelay.sock");
        std::fs::write(&path, b"stale").unwrap();

        let listener = Listener::bind(&ListenSpec::Unix(path.clone())).unwrap();
        let path_clone = path.clone();
        let client = std::thread::spawn(move || std::os::unix::net::UnixStream::connect(path_clone).unwrap());
        let endpoint = listener.accept().unwrap();
        assert!(endpoint.info().starts_with("CONN:UNIX:"));
        client.join().unwrap();
    }
}
