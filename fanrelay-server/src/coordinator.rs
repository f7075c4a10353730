//! Coordinator: owns the listener and the bipartite upstream/downstream
//! handler graph, accepts new clients, and periodically retries closed
//! upstreams.
//!
//! Three long-lived threads once `run()` is called:
//! - **acceptor** — polls the listener, wraps each client as a downstream
//!   handler, links it against every live upstream.
//! - **coordinator** — drains the upstream- and downstream-close
//!   notification queues and updates the graph accordingly.
//! - **reopener** — ticks at the configured interval, retrying every
//!   upstream currently in the closed set (only spawned if retries are
//!   enabled).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fanrelay_core::error::EndpointError;
use fanrelay_core::handler::{Handler, HandlerId};
use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::config::Config;
use crate::error::ConfigError;
use crate::listener::Listener;

/// Why the coordinator stopped running on its own, without an external
/// signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// All upstream resources closed and retries are disabled.
    UpstreamsExhausted,
}

struct Graph {
    upstream: HashMap<HandlerId, Arc<Handler>>,
    closed: HashMap<HandlerId, Arc<Handler>>,
    downstream: HashMap<HandlerId, Arc<Handler>>,
}

impl Graph {
    fn new() -> Self {
        Self {
            upstream: HashMap::new(),
            closed: HashMap::new(),
            downstream: HashMap::new(),
        }
    }
}

enum CoordinatorEvent {
    Terminate,
    UpstreamClosed(Arc<Handler>),
    DownstreamClosed(Arc<Handler>),
}

/// Owns the listener, the handler graph, and the coordinator/acceptor/
/// reopener threads.
pub struct Server {
    listener: Listener,
    graph: Mutex<Graph>,
    running: AtomicBool,
    retry_interval: Duration,
    retries_enabled: bool,

    upstream_close_tx: flume::Sender<Arc<Handler>>,
    upstream_close_rx: flume::Receiver<Arc<Handler>>,
    downstream_close_tx: flume::Sender<Arc<Handler>>,
    downstream_close_rx: flume::Receiver<Arc<Handler>>,

    term_coordinator_tx: flume::Sender<()>,
    term_coordinator_rx: flume::Receiver<()>,
    term_reopener_tx: flume::Sender<()>,
    term_reopener_rx: flume::Receiver<()>,

    exit_tx: flume::Sender<ExitReason>,
    exit_rx: flume::Receiver<ExitReason>,
}

impl Server {
    /// Binds the listener and builds an (unstarted) coordinator. Each
    /// resource in `config` is opened; a resource that fails to open at
    /// startup is still registered, already in the closed set, so it joins
    /// the reopen loop from the first tick (rather than failing hard).
    pub fn build(config: &Config) -> Result<Arc<Self>, ConfigError> {
        let listener = Listener::bind(&config.listen)?;

        let (upstream_close_tx, upstream_close_rx) = flume::unbounded();
        let (downstream_close_tx, downstream_close_rx) = flume::unbounded();
        let (term_coordinator_tx, term_coordinator_rx) = flume::bounded(1);
        let (term_reopener_tx, term_reopener_rx) = flume::bounded(1);
        let (exit_tx, exit_rx) = flume::bounded(1);

        let server = Arc::new(Self {
            listener,
            graph: Mutex::new(Graph::new()),
            running: AtomicBool::new(false),
            retry_interval: config.retry_interval,
            retries_enabled: config.retries_enabled(),
            upstream_close_tx,
            upstream_close_rx,
            downstream_close_tx,
            downstream_close_rx,
            term_coordinator_tx,
            term_coordinator_rx,
            term_reopener_tx,
            term_reopener_rx,
            exit_tx,
            exit_rx,
        });

        for spec in config.resources.clone() {
            let endpoint = spec.into_endpoint();
            let open_result = endpoint.open();
            let handler = Handler::new(endpoint, Some(server.upstream_close_tx.clone()));
            server.add_upstream_handler(Arc::clone(&handler));
            match open_result {
                Ok(()) => {}
                Err(e) if server.retries_enabled => {
                    tracing::warn!(endpoint = %handler.info(), error = %e, "upstream failed to open at startup, queued for reopen");
                    server.add_upstream_closed(handler.id());
                }
                Err(e) => {
                    tracing::warn!(endpoint = %handler.info(), error = %e, "upstream failed to open at startup, retries disabled, dropping it");
                    server.remove_upstream_handler(handler.id());
                }
            }
        }

        Ok(server)
    }

    /// A clonable handle to the queue upstream handlers report EOF on.
    #[must_use]
    pub fn upstream_close_sender(&self) -> flume::Sender<Arc<Handler>> {
        self.upstream_close_tx.clone()
    }

    /// A clonable handle to the queue downstream handlers report EOF on.
    #[must_use]
    pub fn downstream_close_sender(&self) -> flume::Sender<Arc<Handler>> {
        self.downstream_close_tx.clone()
    }

    /// A receiver that fires once if the coordinator decides to exit on its
    /// own (all upstreams exhausted with retries disabled).
    #[must_use]
    pub fn exit_receiver(&self) -> flume::Receiver<ExitReason> {
        self.exit_rx.clone()
    }

    fn link(a: &Arc<Handler>, b: &Arc<Handler>) {
        if a.endpoint().is_readable() && b.endpoint().is_writable() {
            a.add_write_target(Arc::clone(b));
        }
        if b.endpoint().is_readable() && a.endpoint().is_writable() {
            b.add_write_target(Arc::clone(a));
        }
    }

    /// Registers an upstream handler, idempotently, and links it against
    /// every currently-registered downstream handler.
    pub fn add_upstream_handler(&self, h: Arc<Handler>) {
        let mut graph = self.graph.lock();
        if graph.upstream.contains_key(&h.id()) {
            return;
        }
        let downstream: Vec<Arc<Handler>> = graph.downstream.values().cloned().collect();
        graph.upstream.insert(h.id(), Arc::clone(&h));
        drop(graph);
        for d in &downstream {
            Self::link(&h, d);
        }
    }

    /// Removes an upstream handler from both the upstream set and the closed
    /// set. Peer cross-links are not eagerly torn down; peers discover
    /// staleness lazily via `HandlerNotRunning` on their next write.
    pub fn remove_upstream_handler(&self, id: HandlerId) {
        let mut graph = self.graph.lock();
        graph.upstream.remove(&id);
        graph.closed.remove(&id);
    }

    fn add_upstream_closed(&self, id: HandlerId) {
        let mut graph = self.graph.lock();
        if let Some(h) = graph.upstream.get(&id).cloned() {
            graph.closed.entry(id).or_insert(h);
        }
    }

    /// Registers a downstream (accepted) handler and links it against every
    /// currently-live (not closed) upstream handler.
    pub fn add_downstream_handler(&self, h: Arc<Handler>) {
        let mut graph = self.graph.lock();
        if graph.downstream.contains_key(&h.id()) {
            return;
        }
        let live_upstream: Vec<Arc<Handler>> = graph
            .upstream
            .iter()
            .filter(|(id, _)| !graph.closed.contains_key(id))
            .map(|(_, u)| Arc::clone(u))
            .collect();
        graph.downstream.insert(h.id(), Arc::clone(&h));
        drop(graph);
        for u in &live_upstream {
            Self::link(u, &h);
        }
    }

    fn remove_downstream_handler(&self, id: HandlerId) {
        self.graph.lock().downstream.remove(&id);
    }

    /// Number of currently-registered upstream handlers (open or closed).
    #[must_use]
    pub fn upstream_count(&self) -> usize {
        self.graph.lock().upstream.len()
    }

    /// Starts the acceptor, coordinator, and (if retries are enabled)
    /// reopener threads, and runs every upstream handler not already in the
    /// closed set.
    pub fn run(self: &Arc<Self>) -> Result<(), ConfigError> {
        if self.graph.lock().upstream.is_empty() {
            return Err(ConfigError::NoUpstreams);
        }
        self.running.store(true, Ordering::Release);

        let acceptor = Arc::clone(self);
        std::thread::Builder::new()
            .name("fanrelay-acceptor".to_string())
            .spawn(move || acceptor.acceptor_loop())
            .expect("failed to spawn acceptor thread");

        let coordinator = Arc::clone(self);
        std::thread::Builder::new()
            .name("fanrelay-coordinator".to_string())
            .spawn(move || coordinator.coordinator_loop())
            .expect("failed to spawn coordinator thread");

        if self.retries_enabled {
            let reopener = Arc::clone(self);
            std::thread::Builder::new()
                .name("fanrelay-reopener".to_string())
                .spawn(move || reopener.reopener_loop())
                .expect("failed to spawn reopener thread");
        }

        let runnable: Vec<Arc<Handler>> = {
            let graph = self.graph.lock();
            graph
                .upstream
                .iter()
                .filter(|(id, _)| !graph.closed.contains_key(id))
                .map(|(_, h)| Arc::clone(h))
                .collect()
        };
        for h in runnable {
            h.run();
        }

        Ok(())
    }

    /// Signals all coordinator threads to stop and marks the server as no
    /// longer running (the acceptor notices on its next poll).
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        let _ = self.term_coordinator_tx.send(());
        let _ = self.term_reopener_tx.send(());
    }

    /// Stops every registered handler. Called after `stop()` during shutdown.
    pub fn close(&self) {
        self.stop();
        let graph = self.graph.lock();
        for h in graph.upstream.values() {
            h.close();
        }
        for h in graph.downstream.values() {
            h.close();
        }
    }

    fn acceptor_loop(self: Arc<Self>) {
        loop {
            if !self.running.load(Ordering::Acquire) {
                return;
            }
            match self.listener.accept() {
                Ok(endpoint) => {
                    let handler = Handler::new(endpoint, Some(self.downstream_close_tx.clone()));
                    tracing::info!(endpoint = %handler.info(), "accepted downstream connection");
                    self.add_downstream_handler(Arc::clone(&handler));
                    handler.run();
                }
                Err(e) if Listener::is_poll_timeout(&e) => continue,
                Err(e) => {
                    if self.running.load(Ordering::Acquire) {
                        tracing::error!(error = %e, "accept failed");
                    } else {
                        tracing::info!("listener closed, acceptor exiting");
                    }
                }
            }
        }
    }

    fn coordinator_loop(self: Arc<Self>) {
        loop {
            let event = flume::Selector::new()
                .recv(&self.term_coordinator_rx, |_| CoordinatorEvent::Terminate)
                .recv(&self.upstream_close_rx, |res| {
                    res.map_or(CoordinatorEvent::Terminate, CoordinatorEvent::UpstreamClosed)
                })
                .recv(&self.downstream_close_rx, |res| {
                    res.map_or(CoordinatorEvent::Terminate, CoordinatorEvent::DownstreamClosed)
                })
                .wait();

            match event {
                CoordinatorEvent::Terminate => return,
                CoordinatorEvent::UpstreamClosed(h) => {
                    if self.retries_enabled {
                        self.add_upstream_closed(h.id());
                    } else {
                        self.remove_upstream_handler(h.id());
                        if self.graph.lock().upstream.is_empty() {
                            let _ = self.exit_tx.send(ExitReason::UpstreamsExhausted);
                            return;
                        }
                    }
                }
                CoordinatorEvent::DownstreamClosed(h) => {
                    self.remove_downstream_handler(h.id());
                }
            }
        }
    }

    fn reopener_loop(self: Arc<Self>) {
        loop {
            match self.term_reopener_rx.recv_timeout(self.retry_interval) {
                Ok(()) => return,
                Err(flume::RecvTimeoutError::Timeout) => self.reopen_closed(),
                Err(flume::RecvTimeoutError::Disconnected) => return,
            }
        }
    }

    fn reopen_closed(&self) {
        let closed: Vec<Arc<Handler>> = self.graph.lock().closed.values().cloned().collect();
        for h in closed {
            match h.endpoint().open() {
                Ok(()) | Err(EndpointError::AlreadyOpen) => {
                    let downstream: Vec<Arc<Handler>> = {
                        let mut graph = self.graph.lock();
                        graph.closed.remove(&h.id());
                        graph.downstream.values().cloned().collect()
                    };
                    for d in &downstream {
                        Self::link(&h, d);
                    }
                    h.run();
                    tracing::info!(endpoint = %h.info(), "upstream reopened");
                }
                Err(e) => {
                    tracing::debug!(endpoint = %h.info(), error = %e, "reopen attempt failed, retrying next tick");
                }
            }
        }
    }
}
