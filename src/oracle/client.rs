// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Oracle client: batched timestamp requests over a single worker.
//!
//! Callers enqueue a one-slot reply channel on a bounded queue and block on
//! it. One worker thread owns the connection to the leader. It waits for a
//! request, drains whatever else is queued, issues a single RPC for the
//! whole batch and hands `first + i` to the i-th request in FIFO order.
//!
//! The worker follows the coordinator's leader watch. After each call it
//! re-checks the leader and, if leadership moved while the call was in
//! flight, reconnects and reissues the batch. A change that lands after that
//! check is not caught; closing that window needs a fencing token from the
//! store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use rand::Rng;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::coord::Coordinator;

use super::signal::ShutdownSignal;
use super::{OracleConnection, OracleConnector, OracleError};

/// Longest pause between "still waiting" log lines for unbounded waits.
const MAX_ORACLE_WAIT: Duration = Duration::from_secs(60);

/// How often an idle worker wakes to follow leader changes and shutdown.
const IDLE_POLL: Duration = Duration::from_millis(100);

/// Pause between attempts to enqueue into a full request queue.
const QUEUE_POLL: Duration = Duration::from_millis(5);

struct Request {
    reply: SyncSender<Result<u64, OracleError>>,
}

#[derive(Default)]
struct ClientStats {
    batches: AtomicU64,
    timestamps: AtomicU64,
}

/// Client side of the timestamp oracle.
pub struct OracleClient {
    queue: Mutex<Option<SyncSender<Request>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    shutdown: Arc<ShutdownSignal>,
    current: Arc<RwLock<Option<String>>>,
    stats: Arc<ClientStats>,
    timeout: Option<Duration>,
}

impl OracleClient {
    /// Starts the worker thread. Connection to the leader happens lazily on
    /// the first request.
    pub fn start(
        config: &Config,
        coordinator: Arc<dyn Coordinator>,
        connector: Arc<dyn OracleConnector>,
    ) -> Result<Self, OracleError> {
        let (queue_tx, queue_rx) = mpsc::sync_channel(config.oracle_queue_capacity.max(1));

        // Subscribe before reading so no change is missed in between.
        let leader_watch = coordinator.watch_oracle_leader()?;
        let watched_leader = coordinator.oracle_leader()?;

        let shutdown = Arc::new(ShutdownSignal::new());
        let current = Arc::new(RwLock::new(None));
        let stats = Arc::new(ClientStats::default());

        let worker = Worker {
            instance_id: config.instance_id.clone(),
            coordinator,
            connector,
            requests: queue_rx,
            leader_watch,
            watched_leader,
            shutdown: Arc::clone(&shutdown),
            current: Arc::clone(&current),
            stats: Arc::clone(&stats),
            connection: None,
            connected_to: None,
        };

        let handle = std::thread::Builder::new()
            .name("oracle-client".into())
            .spawn(move || worker.run())
            .map_err(|e| OracleError::Spawn(e.to_string()))?;

        Ok(Self {
            queue: Mutex::new(Some(queue_tx)),
            worker: Mutex::new(Some(handle)),
            shutdown,
            current,
            stats,
            timeout: config.client_retry_timeout(),
        })
    }

    /// Retrieves one timestamp from the oracle.
    ///
    /// Fails with [`OracleError::Timeout`] once the configured wait elapses,
    /// counting time spent waiting for room in the request queue, or
    /// [`OracleError::Closed`] if the client is closed first. With an
    /// unbounded wait this only returns once a timestamp arrives or the
    /// client closes.
    pub fn get_timestamp(&self) -> Result<u64, OracleError> {
        let queue = self.queue.lock().clone().ok_or(OracleError::Closed)?;
        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        let request = Request { reply: reply_tx };

        let timeout = match self.timeout {
            Some(timeout) => timeout,
            None => {
                queue.send(request).map_err(|_| OracleError::Closed)?;
                return Self::wait_forever(&reply_rx);
            }
        };
        let deadline = Instant::now() + timeout;
        let timed_out = OracleError::Timeout {
            after_ms: timeout.as_millis() as u64,
        };

        Self::enqueue_until(&queue, request, deadline, &timed_out)?;
        match reply_rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(timed_out),
            Err(RecvTimeoutError::Disconnected) => Err(OracleError::Closed),
        }
    }

    /// Puts `request` on the queue, waiting for room until `deadline`.
    fn enqueue_until(
        queue: &SyncSender<Request>,
        mut request: Request,
        deadline: Instant,
        timed_out: &OracleError,
    ) -> Result<(), OracleError> {
        loop {
            match queue.try_send(request) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Disconnected(_)) => return Err(OracleError::Closed),
                Err(TrySendError::Full(returned)) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(timed_out.clone());
                    }
                    request = returned;
                    std::thread::sleep(QUEUE_POLL.min(deadline - now));
                }
            }
        }
    }

    fn wait_forever(reply_rx: &Receiver<Result<u64, OracleError>>) -> Result<u64, OracleError> {
        let started = Instant::now();
        let mut wait = Duration::from_secs(1);
        loop {
            match reply_rx.recv_timeout(wait) {
                Ok(result) => return result,
                Err(RecvTimeoutError::Timeout) => {
                    warn!(
                        waited_secs = started.elapsed().as_secs(),
                        "Waiting for timestamp from oracle"
                    );
                    wait = (wait * 2).min(MAX_ORACLE_WAIT);
                }
                Err(RecvTimeoutError::Disconnected) => return Err(OracleError::Closed),
            }
        }
    }

    /// Address of the oracle the worker is connected to.
    pub fn get_oracle(&self) -> Option<String> {
        self.current.read().clone()
    }

    /// Number of RPCs issued so far.
    pub fn batches_issued(&self) -> u64 {
        self.stats.batches.load(Ordering::Relaxed)
    }

    /// Number of timestamps handed out so far.
    pub fn timestamps_issued(&self) -> u64 {
        self.stats.timestamps.load(Ordering::Relaxed)
    }

    /// Stops the worker and drops the connection. Unserved requests fail
    /// with [`OracleError::Closed`].
    pub fn close(&self) {
        self.shutdown.raise();
        self.queue.lock().take();
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for OracleClient {
    fn drop(&mut self) {
        self.close();
    }
}

enum Outcome {
    Served(u64),
    Failed(OracleError),
    Shutdown,
}

struct Worker {
    instance_id: String,
    coordinator: Arc<dyn Coordinator>,
    connector: Arc<dyn OracleConnector>,
    requests: Receiver<Request>,
    leader_watch: Receiver<Option<String>>,
    watched_leader: Option<String>,
    shutdown: Arc<ShutdownSignal>,
    current: Arc<RwLock<Option<String>>>,
    stats: Arc<ClientStats>,
    connection: Option<Box<dyn OracleConnection>>,
    connected_to: Option<String>,
}

impl Worker {
    fn run(mut self) {
        loop {
            let first = match self.requests.recv_timeout(IDLE_POLL) {
                Ok(request) => request,
                Err(RecvTimeoutError::Timeout) => {
                    if self.shutdown.is_raised() {
                        break;
                    }
                    self.follow_leader();
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            };
            if self.shutdown.is_raised() {
                break;
            }

            let mut batch = vec![first];
            while let Ok(request) = self.requests.try_recv() {
                batch.push(request);
            }

            match self.issue(batch.len() as u64) {
                Outcome::Served(start) => {
                    for (i, request) in batch.into_iter().enumerate() {
                        // The caller may have timed out and gone away.
                        let _ = request.reply.send(Ok(start + i as u64));
                    }
                }
                Outcome::Failed(e) => {
                    warn!(error = %e, size = batch.len(), "Oracle rejected timestamp batch");
                    for request in batch {
                        let _ = request.reply.send(Err(e.clone()));
                    }
                }
                Outcome::Shutdown => break,
            }
        }

        self.disconnect();
        debug!("Oracle client worker stopped");
    }

    /// Applies queued leader change events.
    fn follow_leader(&mut self) {
        while let Ok(leader) = self.leader_watch.try_recv() {
            if leader != self.watched_leader {
                info!(leader = ?leader, "Oracle leader changed");
            }
            self.watched_leader = leader;
        }
    }

    fn issue(&mut self, count: u64) -> Outcome {
        loop {
            if self.shutdown.is_raised() {
                return Outcome::Shutdown;
            }
            self.follow_leader();

            let leader = match self.ensure_connected() {
                Some(leader) => leader,
                None => {
                    if self.backoff() {
                        return Outcome::Shutdown;
                    }
                    continue;
                }
            };
            let connection = match self.connection.as_mut() {
                Some(connection) => connection,
                None => continue,
            };

            match connection.get_timestamps(&self.instance_id, count) {
                Ok(start) => {
                    self.follow_leader();
                    if self.watched_leader.is_some() && self.watched_leader.as_deref() != Some(leader.as_str()) {
                        info!(used = %leader, "Oracle leader changed during request, reissuing");
                        self.disconnect();
                        continue;
                    }
                    self.stats.batches.fetch_add(1, Ordering::Relaxed);
                    self.stats.timestamps.fetch_add(count, Ordering::Relaxed);
                    debug!(start, count, "Received timestamps");
                    return Outcome::Served(start);
                }
                Err(e) if e.is_transient() => {
                    info!(leader = %leader, error = %e, "Oracle connection lost. Retrying...");
                    self.disconnect();
                    if self.backoff() {
                        return Outcome::Shutdown;
                    }
                }
                Err(e) => return Outcome::Failed(e),
            }
        }
    }

    /// Makes sure the connection points at the current leader. Returns the
    /// leader address on success.
    fn ensure_connected(&mut self) -> Option<String> {
        if self.watched_leader.is_none() {
            match self.coordinator.oracle_leader() {
                Ok(leader) => self.watched_leader = leader,
                Err(e) => debug!(error = %e, "Failed to look up oracle leader"),
            }
        }
        let leader = self.watched_leader.clone()?;

        if self.connection.is_some() && self.connected_to.as_deref() == Some(leader.as_str()) {
            return Some(leader);
        }
        self.disconnect();

        debug!(leader = %leader, "Connecting to oracle");
        match self.connector.connect(&leader) {
            Ok(connection) => {
                self.connection = Some(connection);
                self.connected_to = Some(leader.clone());
                *self.current.write() = Some(leader.clone());
                info!(leader = %leader, "Connected to oracle");
                Some(leader)
            }
            Err(e) => {
                debug!(leader = %leader, error = %e, "Failed to connect to oracle");
                // The leader may have moved; look it up again next attempt.
                self.watched_leader = None;
                None
            }
        }
    }

    fn disconnect(&mut self) {
        self.connection = None;
        self.connected_to = None;
        *self.current.write() = None;
    }

    /// Sleeps 100ms to 1s. Returns true if shutdown was raised.
    fn backoff(&self) -> bool {
        let millis = rand::thread_rng().gen_range(100..1000);
        self.shutdown.wait(Duration::from_millis(millis))
    }
}
