//! Handler: owns one [`Endpoint`] plus a reader thread that broadcasts reads
//! to a peer set, and a writer thread that serializes writes back onto the
//! endpoint via a synchronous rendezvous.
//!
//! Responsibilities:
//! - Own the endpoint (open, read, write, close)
//! - Drive a reader/writer thread pair (split-pump design)
//! - Fan reads out to the current write-target set
//! - Emit a close notification when the endpoint reaches EOF
//! - Never know about the bipartite graph; that lives in the coordinator

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};

use crate::endpoint::Endpoint;
use crate::error::HandlerError;

/// Size of each read performed by a handler's reader thread.
const READ_BUF_SIZE: usize = 4096;

/// Stable identity for a handler, independent of its endpoint's address.
/// Peer sets key on this rather than on `Arc` pointer equality so handlers
/// remain `Send`/`Clone`-friendly without relying on pointer stability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

static NEXT_HANDLER_ID: AtomicU64 = AtomicU64::new(1);

impl HandlerId {
    fn next() -> Self {
        Self(NEXT_HANDLER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

struct RunState {
    running: bool,
    closed: bool,
    write_tx: Option<flume::Sender<Bytes>>,
    write_result_rx: Option<flume::Receiver<io::Result<usize>>>,
    reader_stop: Option<flume::Sender<()>>,
    writer_stop: Option<flume::Sender<()>>,
}

impl RunState {
    fn new() -> Self {
        Self {
            running: false,
            closed: false,
            write_tx: None,
            write_result_rx: None,
            reader_stop: None,
            writer_stop: None,
        }
    }
}

/// Owns one endpoint and the reader/writer threads that pump it.
pub struct Handler {
    id: HandlerId,
    endpoint: Arc<Endpoint>,
    info: String,
    state: RwLock<RunState>,
    /// Serializes the full send-then-await-result round trip of `write()` so
    /// concurrent callers cannot cross-receive each other's results on the
    /// shared rendezvous channel.
    write_serialize: Mutex<()>,
    write_targets: Mutex<HashMap<HandlerId, Arc<Handler>>>,
    close_noti: Option<flume::Sender<Arc<Handler>>>,
}

impl Handler {
    /// Creates a handler around `endpoint`, Stopped. `close_noti`, if given,
    /// receives this handler once its reader hits EOF and self-stops.
    pub fn new(endpoint: Endpoint, close_noti: Option<flume::Sender<Arc<Handler>>>) -> Arc<Self> {
        let info = endpoint.info();
        Arc::new(Self {
            id: HandlerId::next(),
            endpoint: Arc::new(endpoint),
            info,
            state: RwLock::new(RunState::new()),
            write_serialize: Mutex::new(()),
            write_targets: Mutex::new(HashMap::new()),
            close_noti,
        })
    }

    /// This handler's stable identity, used as the write-target set key.
    #[must_use]
    pub const fn id(&self) -> HandlerId {
        self.id
    }

    /// The wrapped endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &Arc<Endpoint> {
        &self.endpoint
    }

    /// The endpoint's diagnostic label.
    #[must_use]
    pub fn info(&self) -> &str {
        &self.info
    }

    /// Whether the reader/writer threads are currently running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state.read().running
    }

    /// Starts the reader and writer threads. Idempotent: a no-op if already
    /// running. Terminal: a no-op once [`Handler::close`] has run, since a
    /// closed handler's endpoint has been torn down and cannot be restarted.
    pub fn run(self: &Arc<Self>) {
        let mut guard = self.state.write();
        if guard.closed {
            tracing::debug!(handler = %self.info, "run() on a closed handler is a no-op");
            return;
        }
        if guard.running {
            return;
        }

        let (reader_stop_tx, reader_stop_rx) = flume::bounded(1);
        let (writer_stop_tx, writer_stop_rx) = flume::bounded(1);
        let (data_tx, data_rx) = flume::bounded(0);
        let (result_tx, result_rx) = flume::bounded(0);

        let reader_handler = Arc::clone(self);
        let reader_name = format!("fanrelay-reader-{}", self.info);
        std::thread::Builder::new()
            .name(reader_name)
            .spawn(move || reader_handler.reader_loop(reader_stop_rx))
            .expect("failed to spawn reader thread");

        let writer_endpoint = Arc::clone(&self.endpoint);
        let writer_name = format!("fanrelay-writer-{}", self.info);
        std::thread::Builder::new()
            .name(writer_name)
            .spawn(move || writer_loop(writer_endpoint, writer_stop_rx, data_rx, result_tx))
            .expect("failed to spawn writer thread");

        guard.running = true;
        guard.write_tx = Some(data_tx);
        guard.write_result_rx = Some(result_rx);
        guard.reader_stop = Some(reader_stop_tx);
        guard.writer_stop = Some(writer_stop_tx);
    }

    /// Signals the reader and writer threads to exit. Idempotent; does not
    /// close the endpoint or clear the write-target set.
    pub fn stop(&self) {
        let mut guard = self.state.write();
        if !guard.running {
            return;
        }
        if let Some(tx) = guard.reader_stop.take() {
            let _ = tx.send(());
        }
        if let Some(tx) = guard.writer_stop.take() {
            let _ = tx.send(());
        }
        guard.running = false;
    }

    /// Terminal teardown: stops the threads if running, drops the rendezvous
    /// channels, and empties the write-target set.
    pub fn close(&self) {
        {
            let mut guard = self.state.write();
            if guard.running {
                if let Some(tx) = guard.reader_stop.take() {
                    let _ = tx.send(());
                }
                if let Some(tx) = guard.writer_stop.take() {
                    let _ = tx.send(());
                }
                guard.running = false;
            }
            guard.write_tx = None;
            guard.write_result_rx = None;
            guard.closed = true;
        }
        self.write_targets.lock().clear();
    }

    /// Sends `data` to the writer thread and blocks for its single result.
    /// Returns [`HandlerError::NotRunning`] immediately, without touching any
    /// channel, if the handler is not Running.
    pub fn write(&self, data: Bytes) -> Result<usize, HandlerError> {
        let _serialize = self.write_serialize.lock();
        let guard = self.state.read();
        if !guard.running {
            return Err(HandlerError::NotRunning);
        }
        let tx = guard.write_tx.as_ref().expect("running handler always has a write channel");
        let rx = guard.write_result_rx.as_ref().expect("running handler always has a result channel");
        tx.send(data).map_err(|_| HandlerError::NotRunning)?;
        match rx.recv() {
            Ok(result) => result.map_err(HandlerError::Io),
            Err(_) => Err(HandlerError::NotRunning),
        }
    }

    /// Adds `peer` to the write-target set. Idempotent.
    pub fn add_write_target(&self, peer: Arc<Handler>) {
        tracing::debug!(handler = %self.info, peer = %peer.info, "adding write target");
        self.write_targets.lock().insert(peer.id(), peer);
    }

    /// Removes the peer with the given id. Idempotent.
    pub fn remove_write_target(&self, peer_id: HandlerId) {
        if self.write_targets.lock().remove(&peer_id).is_some() {
            tracing::debug!(handler = %self.info, "removed write target");
        }
    }

    /// Current write-target count. Exposed for tests and diagnostics.
    #[must_use]
    pub fn write_target_count(&self) -> usize {
        self.write_targets.lock().len()
    }

    fn reader_loop(self: Arc<Self>, stop_rx: flume::Receiver<()>) {
        let mut buf = [0u8; READ_BUF_SIZE];
        loop {
            if stop_rx.try_recv().is_ok() {
                return;
            }

            match self.endpoint.read(&mut buf) {
                Ok(0) if !self.endpoint.is_datagram() => {
                    let _ = self.endpoint.close();
                    self.stop();
                    if let Some(tx) = &self.close_noti {
                        let _ = tx.send(Arc::clone(&self));
                    }
                    return;
                }
                Err(e) => {
                    tracing::warn!(endpoint = %self.info, error = %e, "transient read error, continuing");
                    continue;
                }
                Ok(n) => {
                    let chunk = Bytes::copy_from_slice(&buf[..n]);
                    let targets: Vec<Arc<Handler>> =
                        self.write_targets.lock().values().cloned().collect();
                    for target in targets {
                        match target.write(chunk.clone()) {
                            Ok(_) => {}
                            Err(HandlerError::NotRunning) => {
                                self.remove_write_target(target.id());
                            }
                            Err(e) => {
                                tracing::warn!(
                                    source = %self.info,
                                    target = %target.info,
                                    error = %e,
                                    "broadcast write to peer failed"
                                );
                            }
                        }
                    }
                }
            }
        }
    }
}

enum WriterEvent {
    Stop,
    Data(Bytes),
}

fn writer_loop(
    endpoint: Arc<Endpoint>,
    stop_rx: flume::Receiver<()>,
    data_rx: flume::Receiver<Bytes>,
    result_tx: flume::Sender<io::Result<usize>>,
) {
    loop {
        let event = flume::Selector::new()
            .recv(&stop_rx, |_| WriterEvent::Stop)
            .recv(&data_rx, |res| res.map_or(WriterEvent::Stop, WriterEvent::Data))
            .wait();

        match event {
            WriterEvent::Stop => return,
            WriterEvent::Data(data) => {
                let result = endpoint.write(&data);
                if result_tx.send(result).is_err() {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Capability;
    use std::net::{Ipv4Addr, TcpListener, TcpStream};
    use std::time::Duration;

    fn connected_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let addr = listener.local_addr().unwrap();
        let client = std::thread::spawn(move || TcpStream::connect(addr).unwrap());
        let (server, _) = listener.accept().unwrap();
        (server, client.join().unwrap())
    }

    #[test]
    fn write_rejected_when_not_running() {
        let (server, _client) = connected_pair();
        let endpoint = Endpoint::from_accepted_tcp(server).unwrap();
        let handler = Handler::new(endpoint, None);
        let err = handler.write(Bytes::from_static(b"x")).unwrap_err();
        assert!(matches!(err, HandlerError::NotRunning));
    }

    #[test]
    fn run_is_idempotent_and_write_succeeds() {
        let (server, mut client) = connected_pair();
        let endpoint = Endpoint::from_accepted_tcp(server).unwrap();
        let handler = Handler::new(endpoint, None);

        handler.run();
        handler.run(); // no-op, does not panic or double-spawn

        let n = handler.write(Bytes::from_static(b"hello")).unwrap();
        assert_eq!(n, 5);

        let mut buf = [0u8; 5];
        std::io::Read::read_exact(&mut client, &mut buf).unwrap();
        assert_eq!(&buf, b"hello");

        handler.stop();
        let err = handler.write(Bytes::from_static(b"x")).unwrap_err();
        assert!(matches!(err, HandlerError::NotRunning));
    }

    #[test]
    fn broadcast_fans_out_and_prunes_dead_targets() {
        let (server_a, mut client_a) = connected_pair();
        let (server_b, mut client_b) = connected_pair();

        let upstream = Endpoint::from_accepted_tcp(server_a).unwrap();
        let upstream_handler = Handler::new(upstream, None);

        let downstream = Endpoint::from_accepted_tcp(server_b).unwrap();
        let downstream_handler = Handler::new(downstream, None);

        upstream_handler.run();
        downstream_handler.run();
        upstream_handler.add_write_target(Arc::clone(&downstream_handler));

        std::io::Write::write_all(&mut client_a, b"payload").unwrap();

        let mut buf = [0u8; 7];
        client_b.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        std::io::Read::read_exact(&mut client_b, &mut buf).unwrap();
        assert_eq!(&buf, b"payload");

        downstream_handler.stop();
        std::io::Write::write_all(&mut client_a, b"more").unwrap();
        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(upstream_handler.write_target_count(), 0);
    }

    #[test]
    fn eof_self_stops_and_notifies() {
        let (server, client) = connected_pair();
        let (noti_tx, noti_rx) = flume::bounded(1);

        let endpoint = Endpoint::from_accepted_tcp(server).unwrap();
        let handler = Handler::new(endpoint, Some(noti_tx));
        handler.run();

        drop(client);

        let notified = noti_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(notified.id(), handler.id());
        assert!(!handler.is_running());
    }

    #[test]
    fn capability_default_matches_read_write_round_trip() {
        assert_eq!(Capability::ReadWrite.is_readable(), true);
        assert_eq!(Capability::ReadWrite.is_writable(), true);
    }

    #[test]
    fn run_after_close_is_a_no_op() {
        let (server, _client) = connected_pair();
        let endpoint = Endpoint::from_accepted_tcp(server).unwrap();
        let handler = Handler::new(endpoint, None);

        handler.run();
        handler.close();
        assert!(!handler.is_running());

        handler.run();
        assert!(!handler.is_running());
        let err = handler.write(Bytes::from_static(b"x")).unwrap_err();
        assert!(matches!(err, HandlerError::NotRunning));
    }

    #[test]
    fn udp_is_datagram_but_tcp_is_not() {
        use crate::endpoint::Capability;

        let udp = Endpoint::udp((Ipv4Addr::LOCALHOST, 9999).into(), Capability::ReadWrite);
        assert!(udp.is_datagram());

        let (server, _client) = connected_pair();
        let tcp = Endpoint::from_accepted_tcp(server).unwrap();
        assert!(!tcp.is_datagram());
    }

    #[test]
    fn eof_self_stop_requires_non_datagram_endpoint() {
        // The reader loop's `Ok(0)` EOF arm is gated on `!is_datagram()`; a
        // plain TCP close (read returning Ok(0)) still self-stops and notifies.
        let (server, client) = connected_pair();
        let (noti_tx, noti_rx) = flume::bounded(1);
        let endpoint = Endpoint::from_accepted_tcp(server).unwrap();
        assert!(!endpoint.is_datagram());
        let handler = Handler::new(endpoint, Some(noti_tx));
        handler.run();
        drop(client);
        let notified = noti_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(notified.id(), handler.id());
        assert!(!handler.is_running());
    }
}
