// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Transaction scenarios against an in-process oracle, coordinator and store.

use std::sync::Arc;
use std::time::Duration;

use crate::codec::{timestamp_of, ColumnType, WriteValue};
use crate::config::{Config, ObserverConfig};
use crate::coord::{Coordinator, MemoryCoordinator};
use crate::env::Environment;
use crate::observer::{
    process_notification, scan_notifications, NotificationType, ObservedColumn, Observer,
    ObserverRegistry,
};
use crate::oracle::{LocalConnector, OracleServer};
use crate::storage::{collect_garbage, Bytes, Column, MemoryStore, Span, Store};

use super::{Transaction, TransactorNode, TxStatus, TxnError};

const ROLLBACK_TIMEOUT: Duration = Duration::from_millis(300);

struct Cluster {
    env: Arc<Environment>,
    server: Arc<OracleServer>,
    store: Arc<MemoryStore>,
    coordinator: Arc<dyn Coordinator>,
}

impl Cluster {
    fn start(registry: ObserverRegistry, observers: &[&str]) -> Self {
        let coordinator: Arc<dyn Coordinator> = Arc::new(MemoryCoordinator::new());
        let mut config = Config::default()
            .with_rollback_timeout(ROLLBACK_TIMEOUT)
            .with_oracle_reservation_block(1000)
            .with_oracle_floor_interval(Duration::from_secs(3600));
        for id in observers {
            config = config.with_observer(ObserverConfig::new(*id));
        }

        let server =
            Arc::new(OracleServer::start("oracle-1", Arc::clone(&coordinator), &config).unwrap());
        let connector = Arc::new(LocalConnector::new());
        connector.register(Arc::clone(&server));

        let store = Arc::new(MemoryStore::new());
        let shared: Arc<dyn Store> = store.clone();
        let env = Environment::new(
            config,
            shared,
            Arc::clone(&coordinator),
            connector,
            &registry,
        )
        .unwrap();

        Self {
            env: Arc::new(env),
            server,
            store,
            coordinator,
        }
    }

    /// Cluster with a no-op strong observer on `attr:lastupdate`.
    fn with_strong_observer() -> Self {
        let mut registry = ObserverRegistry::new();
        registry.register("null", |_cfg: &ObserverConfig| {
            Ok(Arc::new(NullObserver) as Arc<dyn Observer>)
        });
        Self::start(registry, &["null"])
    }

    /// Cluster with the summing weak observer on `stat:check`.
    fn with_weak_observer() -> Self {
        let mut registry = ObserverRegistry::new();
        registry.register("sum", |_cfg: &ObserverConfig| {
            Ok(Arc::new(SumObserver) as Arc<dyn Observer>)
        });
        Self::start(registry, &["sum"])
    }

    fn tx(&self) -> Transaction {
        Transaction::new(&self.env)
    }

    fn timestamp(&self) -> u64 {
        self.env.oracle().get_timestamp().unwrap()
    }

    /// Processes notifications until none are left.
    fn wait_for_observers(&self) {
        for _ in 0..100 {
            let pending = scan_notifications(self.store.as_ref()).unwrap();
            if pending.is_empty() {
                return;
            }
            for n in &pending {
                process_notification(&self.env, n).unwrap();
            }
        }
        panic!("notifications never drained");
    }
}

struct NullObserver;

impl Observer for NullObserver {
    fn process(&self, _tx: &mut Transaction, _row: &Bytes, _column: &Column) -> Result<(), TxnError> {
        Ok(())
    }

    fn observed_column(&self) -> ObservedColumn {
        ObservedColumn::new(lastupdate(), NotificationType::Strong)
    }
}

/// Folds every `stats` family cell of the row into `stat:count`.
struct SumObserver;

impl Observer for SumObserver {
    fn process(&self, tx: &mut Transaction, row: &Bytes, _column: &Column) -> Result<(), TxnError> {
        let stats = tx.scan(&Span::row_family(row.clone(), "stats"))?;
        let mut sum = 0;
        for ((_, column), value) in &stats {
            sum += parse(value);
            tx.delete(row.clone(), column)?;
        }
        if sum != 0 {
            sum += tx.get(row.clone(), &count())?.map(|v| parse(&v)).unwrap_or(0);
            tx.set(row.clone(), &count(), sum.to_string())?;
        }
        Ok(())
    }

    fn observed_column(&self) -> ObservedColumn {
        ObservedColumn::new(check(), NotificationType::Weak)
    }
}

fn balance() -> Column {
    Column::new("account", "balance")
}

fn lastupdate() -> Column {
    Column::new("attr", "lastupdate")
}

fn count() -> Column {
    Column::new("stat", "count")
}

fn check() -> Column {
    Column::new("stat", "check")
}

fn url() -> Column {
    Column::new("doc", "url")
}

fn parse(value: &Bytes) -> i64 {
    value.to_string_lossy().parse().unwrap()
}

fn get_str(tx: &mut Transaction, row: &str, column: &Column) -> Option<String> {
    tx.get(row, column).unwrap().map(|v| v.to_string_lossy())
}

fn get_int(tx: &mut Transaction, row: &str) -> i64 {
    tx.get(row, &balance()).unwrap().map(|v| parse(&v)).unwrap_or(0)
}

fn open_accounts(c: &Cluster) {
    let mut tx = c.tx();
    tx.set("bob", &balance(), "10").unwrap();
    tx.set("joe", &balance(), "20").unwrap();
    tx.set("jill", &balance(), "60").unwrap();
    tx.commit().unwrap();
}

fn transfer(c: &Cluster, from: &str, to: &str, amount: i64) {
    loop {
        let mut tx = c.tx();
        let from_balance = get_int(&mut tx, from);
        let to_balance = get_int(&mut tx, to);
        tx.set(from, &balance(), (from_balance - amount).to_string()).unwrap();
        tx.set(to, &balance(), (to_balance + amount).to_string()).unwrap();
        match tx.commit() {
            Ok(()) => return,
            Err(TxnError::CommitConflict { .. }) => continue,
            Err(e) => panic!("transfer failed: {}", e),
        }
    }
}

/// Same as [`transfer`], for threads that only hold the environment.
fn transfer_in(env: &Arc<Environment>, from: &str, to: &str, amount: i64) {
    loop {
        let mut tx = Transaction::new(env);
        let from_balance = get_int(&mut tx, from);
        let to_balance = get_int(&mut tx, to);
        tx.set(from, &balance(), (from_balance - amount).to_string()).unwrap();
        tx.set(to, &balance(), (to_balance + amount).to_string()).unwrap();
        match tx.commit() {
            Ok(()) => return,
            Err(e) if e.is_retryable() => continue,
            Err(e) => panic!("transfer failed: {}", e),
        }
    }
}

fn write_many(tx: &mut Transaction, prefix: char) {
    let (col1, col2) = (Column::new("fam1", "q1"), Column::new("fam1", "q2"));
    for r in 0..10 {
        tx.set(r.to_string(), &col1, format!("{}{}0", prefix, r)).unwrap();
        tx.set(r.to_string(), &col2, format!("{}{}1", prefix, r)).unwrap();
    }
}

fn assert_many(c: &Cluster, prefix: char) {
    let (col1, col2) = (Column::new("fam1", "q1"), Column::new("fam1", "q2"));
    let mut tx = c.tx();
    for r in 0..10 {
        let row = r.to_string();
        assert_eq!(get_str(&mut tx, &row, &col1), Some(format!("{}{}0", prefix, r)));
        assert_eq!(get_str(&mut tx, &row, &col2), Some(format!("{}{}1", prefix, r)));
    }
}

#[test]
fn test_read_own_writes_and_commit() {
    let c = Cluster::with_strong_observer();
    let mut tx = c.tx();
    assert_eq!(get_str(&mut tx, "bob", &balance()), None);
    tx.set("bob", &balance(), "10").unwrap();
    assert_eq!(get_str(&mut tx, "bob", &balance()), Some("10".to_string()));
    tx.commit().unwrap();
    assert_eq!(tx.status(), TxStatus::Done);
    assert!(matches!(tx.commit(), Err(TxnError::AlreadyCommitted)));

    let mut tx = c.tx();
    assert_eq!(get_int(&mut tx, "bob"), 10);
}

#[test]
fn test_snapshot_isolation() {
    let c = Cluster::with_strong_observer();
    open_accounts(&c);

    let mut old = c.tx();
    old.start_ts().unwrap();
    transfer(&c, "bob", "joe", 5);

    assert_eq!(get_int(&mut old, "bob"), 10);
    assert_eq!(get_int(&mut old, "joe"), 20);
    let mut new = c.tx();
    assert_eq!(get_int(&mut new, "bob"), 5);
    assert_eq!(get_int(&mut new, "joe"), 25);
}

#[test]
fn test_write_write_conflict() {
    let c = Cluster::with_strong_observer();
    open_accounts(&c);

    let mut tx1 = c.tx();
    let mut tx2 = c.tx();
    let b1 = get_int(&mut tx1, "bob");
    let b2 = get_int(&mut tx2, "bob");
    tx1.set("bob", &balance(), (b1 + 1).to_string()).unwrap();
    tx2.set("bob", &balance(), (b2 + 2).to_string()).unwrap();

    tx1.commit().unwrap();
    assert!(matches!(tx2.commit(), Err(TxnError::CommitConflict { .. })));
    assert_eq!(tx2.status(), TxStatus::RolledBack);

    let mut tx3 = c.tx();
    assert_eq!(get_int(&mut tx3, "bob"), 11);
}

#[test]
fn test_concurrent_transfers() {
    const THREADS: usize = 4;
    const TRANSFERS: usize = 15;
    let accounts = ["bob", "joe", "jill"];

    let c = Cluster::with_strong_observer();
    open_accounts(&c);

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let env = Arc::clone(&c.env);
            std::thread::spawn(move || {
                for i in 0..TRANSFERS {
                    let from = accounts[(t + i) % 3];
                    let to = accounts[(t + i + 1) % 3];
                    transfer_in(&env, from, to, 1 + (i % 3) as i64);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let mut tx = c.tx();
    let total: i64 = accounts.iter().map(|a| get_int(&mut tx, a)).sum();
    assert_eq!(total, 90);

    // Every account was written once on opening plus once per transfer
    // touching it.
    let mut expected = [1usize; 3];
    for t in 0..THREADS {
        for i in 0..TRANSFERS {
            expected[(t + i) % 3] += 1;
            expected[(t + i + 1) % 3] += 1;
        }
    }

    for (account, expected) in accounts.iter().zip(expected) {
        let cells = c.store.scan(&Span::exact(*account, &balance()), None).unwrap();
        // (commit_ts, start_ts), newest first.
        let writes: Vec<(u64, u64)> = cells
            .iter()
            .filter(|cell| ColumnType::Write.matches(cell.sort_key))
            .map(|cell| {
                let value = WriteValue::decode(cell.value.as_bytes()).unwrap();
                (timestamp_of(cell.sort_key), value.start_ts)
            })
            .collect();
        assert_eq!(writes.len(), expected, "writes of {}", account);
        for pair in writes.windows(2) {
            let (newer, older) = (pair[0], pair[1]);
            assert!(newer.0 > older.0, "commit timestamps of {} repeat", account);
            // No two committed writers of a column overlap.
            assert!(newer.1 > older.0, "overlapping writers of {}", account);
        }
        for (commit_ts, start_ts) in &writes {
            assert!(start_ts < commit_ts);
        }
    }
}

#[test]
fn test_waited_lock_clocks_are_released() {
    let c = Cluster::with_strong_observer();
    open_accounts(&c);

    for round in 0..5 {
        let mut owner = c.tx();
        let before = get_int(&mut owner, "bob");
        assert_eq!(before, 10 + round);
        owner.set("bob", &balance(), (before + 1).to_string()).unwrap();
        let mut cd = owner.create_commit_data().unwrap();
        owner.pre_commit(&mut cd).unwrap();

        let reader = {
            let env = Arc::clone(&c.env);
            std::thread::spawn(move || {
                let mut tx = Transaction::new(&env);
                get_int(&mut tx, "bob")
            })
        };
        std::thread::sleep(Duration::from_millis(50));
        let commit_ts = c.timestamp();
        assert!(owner.commit_primary_column(&cd, commit_ts).unwrap());
        owner.finish_commit(&cd, commit_ts).unwrap();

        let seen = reader.join().unwrap();
        assert!(seen == before || seen == before + 1);
    }

    assert!(c.env.stats().lock_waits >= 1);
    assert_eq!(c.env.transactor_cache().tracked_locks(), 0);
}

#[test]
fn test_delete_and_get_columns() {
    let c = Cluster::with_strong_observer();
    let name = Column::new("account", "name");

    let mut tx = c.tx();
    tx.set("bob", &balance(), "10").unwrap();
    tx.set("bob", &name, "Bob").unwrap();
    tx.commit().unwrap();

    let mut tx = c.tx();
    let cols = tx.get_columns("bob", &[balance(), name.clone()]).unwrap();
    assert_eq!(cols.len(), 2);
    assert_eq!(cols.get(&name), Some(&Bytes::from("Bob")));
    tx.delete("bob", &name).unwrap();
    assert_eq!(get_str(&mut tx, "bob", &name), None);
    tx.commit().unwrap();

    let mut tx = c.tx();
    let cols = tx.get_columns("bob", &[balance(), name.clone()]).unwrap();
    assert_eq!(cols.len(), 1);
    assert_eq!(cols.get(&balance()), Some(&Bytes::from("10")));
}

#[test]
fn test_notification_family_is_not_writable() {
    let c = Cluster::with_strong_observer();
    let mut tx = c.tx();
    assert!(matches!(
        tx.set("bob", &Column::new("ntfy", "x"), "1"),
        Err(TxnError::InvalidArgument(_))
    ));
}

fn rollback_many(kill_transactor: bool) {
    let c = Cluster::with_strong_observer();
    let mut tx = c.tx();
    write_many(&mut tx, '0');
    tx.commit().unwrap();

    let t2 = Arc::new(TransactorNode::new(Arc::clone(&c.coordinator)).unwrap());
    let mut tx2 = Transaction::with_transactor(&c.env, Arc::clone(&t2));
    write_many(&mut tx2, '1');
    let mut cd = tx2.create_commit_data().unwrap();
    tx2.pre_commit(&mut cd).unwrap();

    if kill_transactor {
        t2.close();
    }

    assert_many(&c, '0');

    let commit_ts = c.timestamp();
    if kill_transactor {
        assert!(matches!(
            tx2.commit_primary_column(&cd, commit_ts),
            Err(TxnError::Fatal(_))
        ));
    } else {
        assert!(!tx2.commit_primary_column(&cd, commit_ts).unwrap());
        assert_eq!(tx2.status(), TxStatus::RolledBack);
        t2.close();
    }

    assert_many(&c, '0');
}

#[test]
fn test_rollback_many() {
    rollback_many(true);
}

#[test]
fn test_rollback_many_timeout() {
    rollback_many(false);
}

fn rollforward_many(kill_transactor: bool) {
    let c = Cluster::with_strong_observer();
    let mut tx = c.tx();
    write_many(&mut tx, '0');
    tx.commit().unwrap();

    let t2 = Arc::new(TransactorNode::new(Arc::clone(&c.coordinator)).unwrap());
    let mut tx2 = Transaction::with_transactor(&c.env, Arc::clone(&t2));
    write_many(&mut tx2, '1');
    let mut cd = tx2.create_commit_data().unwrap();
    tx2.pre_commit(&mut cd).unwrap();
    let commit_ts = c.timestamp();
    assert!(tx2.commit_primary_column(&cd, commit_ts).unwrap());

    if kill_transactor {
        t2.close();
    }

    assert_many(&c, '1');
    tx2.finish_commit(&cd, commit_ts).unwrap();
    assert_many(&c, '1');

    if !kill_transactor {
        t2.close();
    }
}

#[test]
fn test_rollforward_many() {
    rollforward_many(true);
}

#[test]
fn test_rollforward_many_timeout() {
    rollforward_many(false);
}

#[test]
fn test_rollback() {
    let c = Cluster::with_strong_observer();
    open_accounts(&c);

    let mut tx2 = c.tx();
    let bal1 = get_int(&mut tx2, "bob");
    let bal2 = get_int(&mut tx2, "joe");
    tx2.set("bob", &balance(), (bal1 - 7).to_string()).unwrap();
    tx2.set("joe", &balance(), (bal2 + 7).to_string()).unwrap();
    let mut cd = tx2.create_commit_data().unwrap();
    tx2.pre_commit(&mut cd).unwrap();

    // Transfer through the secondary column; the primary is rolled back
    // while resolving it.
    transfer(&c, "joe", "jill", 7);
    let (mut bob, mut joe) = (10, 13);

    let mut tx4 = c.tx();
    assert_eq!(get_int(&mut tx4, "bob"), bob);
    assert_eq!(get_int(&mut tx4, "joe"), joe);
    assert_eq!(get_int(&mut tx4, "jill"), 67);

    let commit_ts = c.timestamp();
    assert!(!tx2.commit_primary_column(&cd, commit_ts).unwrap());

    transfer(&c, "bob", "joe", 2);
    bob -= 2;
    joe += 2;

    let mut tx6 = c.tx();
    assert_eq!(get_int(&mut tx6, "bob"), bob);
    assert_eq!(get_int(&mut tx6, "joe"), joe);
    assert_eq!(get_int(&mut tx6, "jill"), 67);
}

#[test]
fn test_rollback_through_primary() {
    let c = Cluster::with_strong_observer();
    open_accounts(&c);

    let mut tx2 = c.tx();
    tx2.set("bob", &balance(), "3").unwrap();
    tx2.set("joe", &balance(), "27").unwrap();
    let mut cd = tx2.create_commit_data().unwrap();
    tx2.pre_commit(&mut cd).unwrap();
    assert_eq!(cd.primary().map(|(r, _)| r.clone()), Some(Bytes::from("bob")));

    transfer(&c, "bob", "jill", 7);

    let mut tx4 = c.tx();
    assert_eq!(get_int(&mut tx4, "bob"), 3);
    assert_eq!(get_int(&mut tx4, "joe"), 20);
    assert_eq!(get_int(&mut tx4, "jill"), 67);

    let commit_ts = c.timestamp();
    assert!(!tx2.commit_primary_column(&cd, commit_ts).unwrap());
}

fn rollback_stats(kill_transactor: bool) {
    let c = Cluster::with_strong_observer();
    let t1 = Arc::new(TransactorNode::new(Arc::clone(&c.coordinator)).unwrap());
    open_accounts(&c);

    let mut tx2 = Transaction::with_transactor(&c.env, Arc::clone(&t1));
    let bal1 = get_int(&mut tx2, "bob");
    let bal2 = get_int(&mut tx2, "joe");
    tx2.set("bob", &balance(), (bal1 - 7).to_string()).unwrap();
    tx2.set("joe", &balance(), (bal2 + 7).to_string()).unwrap();
    let mut cd = tx2.create_commit_data().unwrap();
    tx2.pre_commit(&mut cd).unwrap();

    if kill_transactor {
        t1.close();
    }

    let mut tx3 = c.tx();
    assert_eq!(tx3.stats().dead_locks, 0);
    assert_eq!(tx3.stats().timed_out_locks, 0);
    assert_eq!(get_int(&mut tx3, "bob"), 10);

    if kill_transactor {
        assert_eq!(tx3.stats().dead_locks, 1);
        assert_eq!(tx3.stats().timed_out_locks, 0);
    } else {
        assert_eq!(tx3.stats().dead_locks, 0);
        assert_eq!(tx3.stats().timed_out_locks, 1);
        assert!(tx3.stats().lock_waits > 0);
    }

    let commit_ts = c.timestamp();
    if kill_transactor {
        assert!(matches!(
            tx2.commit_primary_column(&cd, commit_ts),
            Err(TxnError::Fatal(_))
        ));
    } else {
        assert!(!tx2.commit_primary_column(&cd, commit_ts).unwrap());
        t1.close();
    }

    tx3.close();
    let totals = c.env.stats();
    assert_eq!(totals.dead_locks + totals.timed_out_locks, 1);
    assert!(totals.rollbacks >= 1);
}

#[test]
fn test_dead_rollback() {
    rollback_stats(true);
}

#[test]
fn test_timeout_rollback() {
    rollback_stats(false);
}

#[test]
fn test_rollforward() {
    let c = Cluster::with_strong_observer();
    open_accounts(&c);

    let mut tx2 = c.tx();
    let bal1 = get_int(&mut tx2, "bob");
    let bal2 = get_int(&mut tx2, "joe");
    tx2.set("bob", &balance(), (bal1 - 7).to_string()).unwrap();
    tx2.set("joe", &balance(), (bal2 + 7).to_string()).unwrap();
    let mut cd = tx2.create_commit_data().unwrap();
    tx2.pre_commit(&mut cd).unwrap();
    let commit_ts = c.timestamp();
    assert!(tx2.commit_primary_column(&cd, commit_ts).unwrap());

    // Reading the secondary rolls it forward.
    transfer(&c, "joe", "jill", 2);

    let mut tx4 = c.tx();
    assert_eq!(get_int(&mut tx4, "bob"), 3);
    assert_eq!(get_int(&mut tx4, "joe"), 25);
    assert_eq!(get_int(&mut tx4, "jill"), 62);

    tx2.finish_commit(&cd, commit_ts).unwrap();
    assert_eq!(tx2.status(), TxStatus::Done);

    let mut tx5 = c.tx();
    assert_eq!(get_int(&mut tx5, "bob"), 3);
    assert_eq!(get_int(&mut tx5, "joe"), 25);
    assert_eq!(get_int(&mut tx5, "jill"), 62);
    assert!(c.env.stats().rollforwards >= 1);
}

#[test]
fn test_rolled_forward_primary_survives_cleanup_until_done() {
    let c = Cluster::with_strong_observer();
    open_accounts(&c);

    let mut tx2 = c.tx();
    tx2.set("bob", &balance(), "3").unwrap();
    tx2.set("joe", &balance(), "27").unwrap();
    let mut cd = tx2.create_commit_data().unwrap();
    tx2.pre_commit(&mut cd).unwrap();
    let commit_ts = c.timestamp();
    assert!(tx2.commit_primary_column(&cd, commit_ts).unwrap());

    // Others roll joe forward and write bob on top of the primary.
    transfer(&c, "joe", "jill", 2);
    transfer(&c, "bob", "jill", 1);

    let primary_write = ColumnType::Write.encode(commit_ts).unwrap();
    let has_primary_write = |c: &Cluster| {
        c.store
            .scan(&Span::exact("bob", &balance()), None)
            .unwrap()
            .iter()
            .any(|cell| cell.sort_key == primary_write)
    };

    collect_garbage(c.store.as_ref(), c.timestamp()).unwrap();
    assert!(has_primary_write(&c));

    tx2.finish_commit(&cd, commit_ts).unwrap();
    collect_garbage(c.store.as_ref(), c.timestamp()).unwrap();
    assert!(!has_primary_write(&c));

    let mut tx3 = c.tx();
    assert_eq!(get_int(&mut tx3, "bob"), 2);
    assert_eq!(get_int(&mut tx3, "joe"), 25);
    assert_eq!(get_int(&mut tx3, "jill"), 63);
}

#[test]
fn test_acks() {
    let c = Cluster::with_strong_observer();

    let mut tx = c.tx();
    tx.set("url0000", &lastupdate(), "3").unwrap();
    tx.set("url0000", &Column::new("doc", "content"), "abc def").unwrap();
    tx.commit().unwrap();

    let pending = scan_notifications(c.store.as_ref()).unwrap();
    assert_eq!(pending.len(), 1);
    let notification = pending[0].clone();
    assert_eq!(notification.row, Bytes::from("url0000"));

    let mut tx2 = Transaction::with_trigger(&c.env, notification.clone()).unwrap();
    tx2.set("idx:abc", &url(), "url0000").unwrap();
    tx2.set("idx:def", &url(), "url0000").unwrap();
    let mut cd = tx2.create_commit_data().unwrap();
    tx2.pre_commit(&mut cd).unwrap();

    // tx2 stalls; its locks time out and are rolled back.
    let mut tx3 = c.tx();
    assert_eq!(get_str(&mut tx3, "idx:abc", &url()), None);
    assert_eq!(get_str(&mut tx3, "idx:def", &url()), None);
    assert_eq!(get_str(&mut tx3, "url0000", &lastupdate()), Some("3".to_string()));
    assert_eq!(scan_notifications(c.store.as_ref()).unwrap().len(), 1);

    let mut tx5 = Transaction::with_trigger(&c.env, notification.clone()).unwrap();
    tx5.set("idx:abc", &url(), "url0000").unwrap();
    tx5.set("idx:def", &url(), "url0000").unwrap();
    let mut cd = tx5.create_commit_data().unwrap();
    tx5.pre_commit_with_primary(&mut cd, &Bytes::from("idx:abc"), &url())
        .unwrap();
    let commit_ts = c.timestamp();
    assert!(tx5.commit_primary_column(&cd, commit_ts).unwrap());

    // Reading rolls tx5 forward, acknowledging the notification.
    let mut tx6 = c.tx();
    assert_eq!(get_str(&mut tx6, "url0000", &lastupdate()), Some("3".to_string()));
    assert_eq!(get_str(&mut tx6, "idx:abc", &url()), Some("url0000".to_string()));
    assert_eq!(get_str(&mut tx6, "idx:def", &url()), Some("url0000".to_string()));
    assert!(scan_notifications(c.store.as_ref()).unwrap().is_empty());

    let mut tx4 = Transaction::with_trigger(&c.env, notification).unwrap();
    tx4.set("idx:abc", &url(), "url0000").unwrap();
    tx4.set("idx:def", &url(), "url0000").unwrap();
    assert!(matches!(
        tx4.commit(),
        Err(TxnError::AlreadyAcknowledged { .. })
    ));
}

#[test]
fn test_stale_scan_prevention() {
    let c = Cluster::with_strong_observer();
    open_accounts(&c);

    let mut tx2 = c.tx();
    assert_eq!(get_int(&mut tx2, "bob"), 10);

    transfer(&c, "joe", "jill", 1);
    transfer(&c, "joe", "bob", 1);
    transfer(&c, "bob", "joe", 2);
    transfer(&c, "jill", "joe", 2);

    // tx2 is still open, so the marker stops at its start timestamp.
    let marker = c.server.update_oldest_active().unwrap().unwrap();
    assert_eq!(marker, tx2.start_ts().unwrap());
    collect_garbage(c.store.as_ref(), c.coordinator.oldest_active().unwrap()).unwrap();

    assert_eq!(get_int(&mut tx2, "joe"), 20);

    let mut tx3 = c.tx();
    assert_eq!(get_int(&mut tx3, "bob"), 9);
    assert_eq!(get_int(&mut tx3, "joe"), 22);
    assert_eq!(get_int(&mut tx3, "jill"), 59);
}

#[test]
fn test_forced_stale_scan() {
    let c = Cluster::with_strong_observer();
    open_accounts(&c);

    let mut tx2 = c.tx();
    assert_eq!(get_int(&mut tx2, "bob"), 10);

    transfer(&c, "joe", "jill", 1);
    transfer(&c, "joe", "bob", 1);
    transfer(&c, "bob", "joe", 2);
    transfer(&c, "jill", "joe", 2);

    // Push the marker past tx2 behind the tracker's back.
    let next = c.tx().start_ts().unwrap();
    c.coordinator.advance_oldest_active(next).unwrap();
    collect_garbage(c.store.as_ref(), next).unwrap();

    assert!(matches!(
        tx2.get("joe", &balance()),
        Err(TxnError::StaleScan { .. })
    ));
    assert_eq!(tx2.status(), TxStatus::Stale);
    assert!(matches!(tx2.get("joe", &balance()), Err(TxnError::Unusable)));

    let mut tx3 = c.tx();
    assert_eq!(get_int(&mut tx3, "bob"), 9);
    assert_eq!(get_int(&mut tx3, "joe"), 22);
    assert_eq!(get_int(&mut tx3, "jill"), 59);
}

#[test]
fn test_commit_rolls_back_unread_locks() {
    let c = Cluster::with_strong_observer();

    let mut tx1 = c.tx();
    tx1.set("bob", &balance(), "10").unwrap();
    tx1.set("joe", &balance(), "20").unwrap();
    tx1.set("jill", &balance(), "60").unwrap();
    let mut cd = tx1.create_commit_data().unwrap();
    tx1.pre_commit(&mut cd).unwrap();

    // tx1 is rolled back even though tx2 never reads what it locked.
    loop {
        let mut tx2 = c.tx();
        tx2.set("bob", &balance(), "11").unwrap();
        tx2.set("jill", &balance(), "61").unwrap();
        match tx2.commit() {
            Ok(()) => break,
            Err(TxnError::CommitConflict { .. }) => std::thread::sleep(Duration::from_millis(10)),
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    let mut tx4 = c.tx();
    assert_eq!(get_int(&mut tx4, "bob"), 11);
    assert_eq!(tx4.get("joe", &balance()).unwrap(), None);
    assert_eq!(get_int(&mut tx4, "jill"), 61);
}

#[test]
fn test_weak_notification() {
    let c = Cluster::with_weak_observer();

    let mut tx1 = c.tx();
    tx1.set("r1", &count(), "3").unwrap();
    tx1.commit().unwrap();

    let mut tx2 = c.tx();
    tx2.set("r1", &Column::new("stats", "af89"), "5").unwrap();
    tx2.weak_notify("r1", &check()).unwrap();
    tx2.commit().unwrap();

    let mut tx3 = c.tx();
    tx3.set("r1", &Column::new("stats", "af99"), "7").unwrap();
    tx3.weak_notify("r1", &check()).unwrap();
    tx3.commit().unwrap();

    c.wait_for_observers();

    let mut tx4 = c.tx();
    assert_eq!(get_str(&mut tx4, "r1", &count()), Some("15".to_string()));

    // Overlapping weak notifications do not conflict.
    let mut tx5 = c.tx();
    tx5.set("r1", &Column::new("stats", "bff7"), "11").unwrap();
    tx5.weak_notify("r1", &check()).unwrap();
    let mut cd5 = tx5.create_commit_data().unwrap();
    tx5.pre_commit(&mut cd5).unwrap();

    let mut tx6 = c.tx();
    tx6.set("r1", &Column::new("stats", "bff0"), "13").unwrap();
    tx6.weak_notify("r1", &check()).unwrap();
    let mut cd6 = tx6.create_commit_data().unwrap();
    tx6.pre_commit(&mut cd6).unwrap();

    let commit_ts5 = c.timestamp();
    assert!(tx5.commit_primary_column(&cd5, commit_ts5).unwrap());
    let commit_ts6 = c.timestamp();
    assert!(tx6.commit_primary_column(&cd6, commit_ts6).unwrap());

    tx6.finish_commit(&cd6, commit_ts6).unwrap();
    tx5.finish_commit(&cd5, commit_ts5).unwrap();

    c.wait_for_observers();

    let mut tx7 = c.tx();
    assert_eq!(get_str(&mut tx7, "r1", &count()), Some("39".to_string()));
}

#[test]
fn test_weak_notification_without_updates_is_removed() {
    let c = Cluster::with_weak_observer();

    let mut tx1 = c.tx();
    tx1.set("r1", &count(), "3").unwrap();
    tx1.weak_notify("r1", &check()).unwrap();
    tx1.commit().unwrap();
    assert_eq!(scan_notifications(c.store.as_ref()).unwrap().len(), 1);

    // The observer writes nothing, yet the notification must go away.
    c.wait_for_observers();
    assert!(scan_notifications(c.store.as_ref()).unwrap().is_empty());
}

#[test]
fn test_weak_notify_requires_weak_observer() {
    let c = Cluster::with_weak_observer();
    let mut tx = c.tx();
    tx.set("r1", &count(), "3").unwrap();
    assert!(matches!(
        tx.weak_notify("r1", &Column::new("stat", "foo")),
        Err(TxnError::InvalidArgument(_))
    ));
}

#[test]
fn test_strong_write_notifies() {
    let c = Cluster::with_strong_observer();
    let mut tx = c.tx();
    tx.set("url0001", &lastupdate(), "1").unwrap();
    tx.commit().unwrap();

    let pending = scan_notifications(c.store.as_ref()).unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].column, lastupdate());

    c.wait_for_observers();
    assert!(scan_notifications(c.store.as_ref()).unwrap().is_empty());
}
