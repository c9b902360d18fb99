// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! The shared context every transaction runs in.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::config::Config;
use crate::coord::Coordinator;
use crate::observer::{ObserverRegistry, Observers};
use crate::oracle::{OracleClient, OracleConnector};
use crate::storage::Store;
use crate::txn::{TimestampTracker, TransactorCache, TransactorNode, TxStats, TxnError};

/// Store, coordinator, oracle client and per-process transaction state.
///
/// Built once per process and shared by transactions through an `Arc`.
/// Nothing in here points back at a transaction.
pub struct Environment {
    config: Config,
    store: Arc<dyn Store>,
    coordinator: Arc<dyn Coordinator>,
    oracle: OracleClient,
    transactor: Arc<TransactorNode>,
    tracker: TimestampTracker,
    cache: TransactorCache,
    observers: Observers,
    stats: Mutex<TxStats>,
    closed: AtomicBool,
}

impl Environment {
    /// Validates `config`, resolves its observers, registers a transactor
    /// and starts the oracle client.
    pub fn new(
        config: Config,
        store: Arc<dyn Store>,
        coordinator: Arc<dyn Coordinator>,
        connector: Arc<dyn OracleConnector>,
        registry: &ObserverRegistry,
    ) -> Result<Self, TxnError> {
        config.validate()?;
        let observers = registry.resolve(&config.observers)?;
        let oracle = OracleClient::start(&config, Arc::clone(&coordinator), connector)?;
        let transactor = Arc::new(TransactorNode::new(Arc::clone(&coordinator))?);
        let tracker = TimestampTracker::new(Arc::clone(&coordinator), transactor.id());
        let cache = TransactorCache::new(config.rollback_timeout());

        info!(
            instance = %config.instance_id,
            transactor = transactor.id(),
            observers = observers.len(),
            "Environment started"
        );
        Ok(Self {
            config,
            store,
            coordinator,
            oracle,
            transactor,
            tracker,
            cache,
            observers,
            stats: Mutex::new(TxStats::default()),
            closed: AtomicBool::new(false),
        })
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    #[inline]
    pub fn coordinator(&self) -> &Arc<dyn Coordinator> {
        &self.coordinator
    }

    #[inline]
    pub fn oracle(&self) -> &OracleClient {
        &self.oracle
    }

    /// The transactor used by transactions that do not bring their own.
    #[inline]
    pub fn transactor(&self) -> &Arc<TransactorNode> {
        &self.transactor
    }

    #[inline]
    pub fn tracker(&self) -> &TimestampTracker {
        &self.tracker
    }

    #[inline]
    pub fn transactor_cache(&self) -> &TransactorCache {
        &self.cache
    }

    #[inline]
    pub fn observers(&self) -> &Observers {
        &self.observers
    }

    /// Lock resolution counters summed over closed transactions.
    pub fn stats(&self) -> TxStats {
        *self.stats.lock()
    }

    pub(crate) fn record_stats(&self, stats: &TxStats) {
        self.stats.lock().merge(stats);
    }

    /// Stops the oracle client, withdraws the published floor and
    /// deregisters the transactor. Open transactions become unable to
    /// commit.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.oracle.close();
        if let Err(e) = self.coordinator.publish_floor(self.transactor.id(), None) {
            warn!(error = %e, "Failed to clear oldest active timestamp");
        }
        self.transactor.close();
        info!(instance = %self.config.instance_id, "Environment closed");
    }
}

impl Drop for Environment {
    fn drop(&mut self) {
        self.close();
    }
}
