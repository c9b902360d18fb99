// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Observers and notifications.
//!
//! An observer is registered for one column. Committing a value to a
//! strongly observed column writes a notification for every writing
//! transaction; weakly observed columns are notified explicitly with
//! [`Transaction::weak_notify`] and concurrent notifications coalesce.
//! Observers are compiled into the binary and looked up by the identifier
//! given in [`Config::observers`](crate::config::Config::observers).

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::codec::{decode_notify_qualifier, NOTIFY_FAMILY};
use crate::config::ObserverConfig;
use crate::env::Environment;
use crate::storage::{Bytes, Column, Span, Store};
use crate::txn::{Transaction, TxnError};

/// How a column's changes reach its observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationType {
    /// Notified on explicit request; pending requests coalesce.
    Weak,
    /// Notified by every committed write of a value.
    Strong,
}

/// The column an observer watches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedColumn {
    pub column: Column,
    pub kind: NotificationType,
}

impl ObservedColumn {
    pub fn new(column: Column, kind: NotificationType) -> Self {
        Self { column, kind }
    }
}

/// Reacts to notifications on its observed column.
pub trait Observer: Send + Sync {
    /// Processes a notification inside `tx`. The engine commits `tx`
    /// afterwards, which also removes the notification.
    fn process(&self, tx: &mut Transaction, row: &Bytes, column: &Column) -> Result<(), TxnError>;

    fn observed_column(&self) -> ObservedColumn;
}

/// Builds an observer from its configuration.
pub type ObserverFactory =
    Box<dyn Fn(&ObserverConfig) -> Result<Arc<dyn Observer>, TxnError> + Send + Sync>;

/// Maps configuration identifiers to observer factories.
#[derive(Default)]
pub struct ObserverRegistry {
    factories: HashMap<String, ObserverFactory>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory under `id`, replacing any previous one.
    pub fn register<F>(&mut self, id: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&ObserverConfig) -> Result<Arc<dyn Observer>, TxnError> + Send + Sync + 'static,
    {
        self.factories.insert(id.into(), Box::new(factory));
        self
    }

    /// Instantiates every configured observer.
    ///
    /// Fails on an unknown identifier or on two observers claiming the same
    /// column.
    pub fn resolve(&self, configs: &[ObserverConfig]) -> Result<Observers, TxnError> {
        let mut observers = Observers::default();
        for config in configs {
            let factory = self.factories.get(&config.id).ok_or_else(|| {
                TxnError::InvalidArgument(format!("no observer registered as {:?}", config.id))
            })?;
            let observer = factory(config)?;
            let observed = observer.observed_column();
            if observers.by_column.contains_key(&observed.column) {
                return Err(TxnError::InvalidArgument(format!(
                    "column {} observed twice",
                    observed.column
                )));
            }
            info!(id = %config.id, column = %observed.column, kind = ?observed.kind, "Loaded observer");
            observers
                .by_column
                .insert(observed.column, (observed.kind, observer));
        }
        Ok(observers)
    }
}

/// The resolved observers of an environment, keyed by column.
#[derive(Default, Clone)]
pub struct Observers {
    by_column: HashMap<Column, (NotificationType, Arc<dyn Observer>)>,
}

impl Observers {
    pub fn notification_type(&self, column: &Column) -> Option<NotificationType> {
        self.by_column.get(column).map(|(kind, _)| *kind)
    }

    #[inline]
    pub fn is_strong(&self, column: &Column) -> bool {
        self.notification_type(column) == Some(NotificationType::Strong)
    }

    #[inline]
    pub fn is_weak(&self, column: &Column) -> bool {
        self.notification_type(column) == Some(NotificationType::Weak)
    }

    pub fn get(&self, column: &Column) -> Option<Arc<dyn Observer>> {
        self.by_column.get(column).map(|(_, o)| Arc::clone(o))
    }

    pub fn len(&self) -> usize {
        self.by_column.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_column.is_empty()
    }
}

impl fmt::Debug for Observers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.by_column.iter().map(|(col, (kind, _))| (col, kind)))
            .finish()
    }
}

/// A pending notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub row: Bytes,
    /// The observed column, not the notification cell's column.
    pub column: Column,
    /// Commit timestamp of the newest notifying transaction.
    pub timestamp: u64,
}

impl Notification {
    pub fn new(row: impl Into<Bytes>, column: Column, timestamp: u64) -> Self {
        Self {
            row: row.into(),
            column,
            timestamp,
        }
    }
}

/// Lists pending notifications, one per observed cell, newest timestamp.
pub fn scan_notifications(store: &dyn Store) -> Result<Vec<Notification>, TxnError> {
    let cells = store.scan(&Span::all().with_family(NOTIFY_FAMILY), None)?;
    let mut pending: Vec<Notification> = Vec::new();
    for cell in cells {
        let column = decode_notify_qualifier(&cell.column)?;
        // Newest first within a column.
        if let Some(last) = pending.last() {
            if last.row == cell.row && last.column == column {
                continue;
            }
        }
        pending.push(Notification {
            row: cell.row,
            column,
            timestamp: cell.sort_key,
        });
    }
    Ok(pending)
}

/// Runs the observer of `notification` in a trigger transaction and commits
/// it.
///
/// Losing the race to another transaction that acknowledged the same
/// notification is not an error.
pub fn process_notification(
    env: &Arc<Environment>,
    notification: &Notification,
) -> Result<(), TxnError> {
    let observer = env.observers().get(&notification.column).ok_or_else(|| {
        TxnError::InvalidArgument(format!("column {} is not observed", notification.column))
    })?;

    let mut tx = Transaction::with_trigger(env, notification.clone())?;
    observer.process(&mut tx, &notification.row, &notification.column)?;
    match tx.commit() {
        Ok(()) => Ok(()),
        Err(TxnError::AlreadyAcknowledged { row, column }) => {
            debug!(row = %row, column = %column, "Notification already processed");
            Ok(())
        }
        Err(e) => Err(e),
    }
}
