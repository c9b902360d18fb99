// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! RocksDB-backed cell store implementation.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;

use parking_lot::Mutex;
use rocksdb::{DBWithThreadMode, Direction, IteratorMode, MultiThreaded, Options, WriteBatch, WriteOptions};

use super::{
    check_same_row, column_prefix, decode_store_key, encode_store_key, row_prefix,
    validate_mutation, Bytes, Cell, CellFilter, Column, Condition, ConditionalStatus, MutationOp,
    RowMutation, Span, StorageError, Store,
};

/// Number of row lock stripes.
const NUM_STRIPES: usize = 64;

/// Durability mode for write operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DurabilityMode {
    /// Writes are synced to WAL but not fsynced to disk.
    /// Durable against process crashes but not power failures.
    #[default]
    WalOnly,
    /// Writes are fsynced to disk on every operation.
    FsyncEveryWrite,
}

/// RocksDB-backed cell store.
///
/// Each cell is one RocksDB entry keyed by [`encode_store_key`]. RocksDB has
/// no conditional write, so every mutation of a row is serialized through a
/// striped row lock; a conditional mutation reads the column and writes its
/// batch while holding the stripe.
pub struct RocksStore {
    db: DBWithThreadMode<MultiThreaded>,
    write_opts: WriteOptions,
    stripes: [Mutex<()>; NUM_STRIPES],
}

impl RocksStore {
    /// Opens or creates a RocksDB database at the given path.
    ///
    /// Uses `DurabilityMode::WalOnly` by default.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        Self::open_with_durability(path, DurabilityMode::default())
    }

    /// Opens or creates a RocksDB database with specified durability mode.
    pub fn open_with_durability(path: &Path, durability: DurabilityMode) -> Result<Self, StorageError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);

        opts.set_write_buffer_size(64 * 1024 * 1024); // 64MB
        opts.set_max_write_buffer_number(4);
        opts.set_target_file_size_base(64 * 1024 * 1024);
        opts.set_level_compaction_dynamic_level_bytes(true);

        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);

        Self::open_with_options(path, opts, durability)
    }

    /// Opens a database with custom RocksDB options.
    pub fn open_with_options(path: &Path, opts: Options, durability: DurabilityMode) -> Result<Self, StorageError> {
        let db = DBWithThreadMode::open(&opts, path)?;

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(durability == DurabilityMode::FsyncEveryWrite);

        Ok(Self {
            db,
            write_opts,
            stripes: std::array::from_fn(|_| Mutex::new(())),
        })
    }

    /// Forces a flush of memtables to disk.
    pub fn sync(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }

    #[inline]
    fn stripe(&self, row: &Bytes) -> &Mutex<()> {
        let mut hasher = DefaultHasher::new();
        row.hash(&mut hasher);
        &self.stripes[hasher.finish() as usize % NUM_STRIPES]
    }

    fn column_cells(&self, row: &Bytes, column: &Column) -> Result<Vec<Cell>, StorageError> {
        let prefix = column_prefix(row, column);
        let mut cells = Vec::new();
        for item in self.db.iterator(IteratorMode::From(&prefix, Direction::Forward)) {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            let (_, _, sort_key) = decode_store_key(&key)?;
            cells.push(Cell::new(row.clone(), column.clone(), sort_key, Bytes::from(&value[..])));
        }
        Ok(cells)
    }

    /// Builds the write batch for a mutation. Must run under the row stripe
    /// since `DeleteUpTo` reads the current cells.
    fn build_batch(&self, mutation: &RowMutation) -> Result<WriteBatch, StorageError> {
        let mut batch = WriteBatch::default();
        for op in &mutation.ops {
            match op {
                MutationOp::Put {
                    column,
                    sort_key,
                    value,
                } => batch.put(encode_store_key(&mutation.row, column, *sort_key), value.as_bytes()),
                MutationOp::Delete { column, sort_key } => {
                    batch.delete(encode_store_key(&mutation.row, column, *sort_key))
                }
                MutationOp::DeleteUpTo { column, sort_key } => {
                    let prefix = column_prefix(&mutation.row, column);
                    let from = encode_store_key(&mutation.row, column, *sort_key);
                    for item in self.db.iterator(IteratorMode::From(&from, Direction::Forward)) {
                        let (key, _) = item?;
                        if !key.starts_with(&prefix) {
                            break;
                        }
                        batch.delete(&key);
                    }
                }
            }
        }
        Ok(batch)
    }
}

impl Store for RocksStore {
    fn scan(&self, span: &Span, filter: Option<&dyn CellFilter>) -> Result<Vec<Cell>, StorageError> {
        let start = match span.column {
            Some(ref column) => column_prefix(&span.start_row, column),
            None => row_prefix(&span.start_row),
        };

        let mut out = Vec::new();
        for item in self.db.iterator(IteratorMode::From(&start, Direction::Forward)) {
            let (key, value) = item?;
            let (row, column, sort_key) = decode_store_key(&key)?;

            if !span.contains_row(&row) {
                break;
            }
            if !span.matches_column(&column) {
                continue;
            }
            let cell = Cell::new(row, column, sort_key, Bytes::from(&value[..]));
            if filter.map_or(true, |f| f.accept(&cell)) {
                out.push(cell);
            }
        }
        Ok(out)
    }

    fn apply(&self, mutation: RowMutation) -> Result<(), StorageError> {
        validate_mutation(&mutation)?;

        let _guard = self.stripe(&mutation.row).lock();
        let batch = self.build_batch(&mutation)?;
        self.db.write_opt(batch, &self.write_opts)?;
        Ok(())
    }

    fn apply_if(
        &self,
        condition: &Condition<'_>,
        mutation: RowMutation,
    ) -> Result<ConditionalStatus, StorageError> {
        check_same_row(condition, &mutation)?;
        validate_mutation(&mutation)?;

        let _guard = self.stripe(&mutation.row).lock();
        let current = self.column_cells(condition.row, condition.column)?;
        if let Err(conflicts) = condition.evaluate(&current) {
            return Ok(ConditionalStatus::Rejected { conflicts });
        }

        let batch = self.build_batch(&mutation)?;
        self.db.write_opt(batch, &self.write_opts)?;
        Ok(ConditionalStatus::Accepted)
    }
}
