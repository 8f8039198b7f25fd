//! Transactional store over redb.
//!
//! Each transaction handle remembers the first failed operation. Every
//! later operation on the same handle returns [`DbError::Aborted`] without
//! touching storage, and [`Store::update`] returns the remembered error
//! instead of the closure's result and rolls the transaction back. A write
//! transaction therefore commits all of its writes or none of them, even if
//! a caller drops an intermediate `Result`.

use std::ops::{Bound, ControlFlow, RangeBounds};
use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadTransaction, ReadableTable, TableError, WriteTransaction};
use tracing::warn;

use crate::schema::{Bucket, Namespace, SEQUENCES, key_seq};
use crate::{DbError, DbResult};

/// Direction of a cursor walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Ascending,
    Descending,
}

/// Handle to the database file.
#[derive(Clone)]
pub struct Store {
    db: Arc<Database>,
}

impl Store {
    /// Create or open the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> DbResult<Self> {
        let db = Database::create(path.as_ref())?;
        Ok(Self { db: Arc::new(db) })
    }

    /// Run `f` in a read-write transaction, committing if it succeeds.
    pub fn update<T>(&self, f: impl FnOnce(&mut WriteTx) -> DbResult<T>) -> DbResult<T> {
        let mut tx = WriteTx {
            txn: self.db.begin_write()?,
            failure: Failure::default(),
        };
        let result = f(&mut tx);

        let WriteTx { txn, failure } = tx;
        let outcome = match failure.into_error() {
            Some(err) => Err(err),
            None => result,
        };
        match outcome {
            Ok(value) => {
                txn.commit()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(abort_err) = txn.abort() {
                    warn!(error = %abort_err, "Failed to abort transaction");
                }
                Err(err)
            }
        }
    }

    /// Run `f` in a read-only snapshot transaction.
    pub fn view<T>(&self, f: impl FnOnce(&mut ReadTx) -> DbResult<T>) -> DbResult<T> {
        let mut tx = ReadTx {
            txn: self.db.begin_read()?,
            failure: Failure::default(),
        };
        let result = f(&mut tx);
        match tx.failure.into_error() {
            Some(err) => Err(err),
            None => result,
        }
    }
}

/// First error seen by a transaction handle.
#[derive(Default)]
struct Failure(Option<DbError>);

impl Failure {
    fn run<T>(&mut self, op: impl FnOnce() -> DbResult<T>) -> DbResult<T> {
        if let Some(err) = &self.0 {
            return Err(DbError::Aborted(err.to_string()));
        }
        match op() {
            Ok(value) => Ok(value),
            Err(err) => {
                let message = err.to_string();
                self.0 = Some(err);
                Err(DbError::Aborted(message))
            }
        }
    }

    fn into_error(self) -> Option<DbError> {
        self.0
    }
}

/// A read-write transaction.
pub struct WriteTx {
    txn: WriteTransaction,
    failure: Failure,
}

impl WriteTx {
    /// Store `value` under entry `seq` of `bucket`, creating the bucket if needed.
    pub fn put(&mut self, bucket: &Bucket<'_>, seq: u64, value: &[u8]) -> DbResult<()> {
        let txn = &self.txn;
        self.failure.run(|| {
            let mut table = txn.open_table(bucket.namespace().definition())?;
            table.insert(bucket.key(seq).as_slice(), value)?;
            Ok(())
        })
    }

    pub fn get(&mut self, bucket: &Bucket<'_>, seq: u64) -> DbResult<Option<Vec<u8>>> {
        let txn = &self.txn;
        self.failure.run(|| {
            let table = txn.open_table(bucket.namespace().definition())?;
            let value = table.get(bucket.key(seq).as_slice())?;
            Ok(value.map(|v| v.value().to_vec()))
        })
    }

    /// Remove entry `seq`; returns whether it existed.
    pub fn delete(&mut self, bucket: &Bucket<'_>, seq: u64) -> DbResult<bool> {
        let txn = &self.txn;
        self.failure.run(|| {
            let mut table = txn.open_table(bucket.namespace().definition())?;
            let removed = table.remove(bucket.key(seq).as_slice())?;
            Ok(removed.is_some())
        })
    }

    /// Allocate the next sequence number of `bucket`, starting at 1.
    pub fn next_sequence(&mut self, bucket: &Bucket<'_>) -> DbResult<u64> {
        let txn = &self.txn;
        self.failure.run(|| {
            let mut table = txn.open_table(SEQUENCES)?;
            let key = bucket.sequence_key();
            let current = table.get(key.as_slice())?.map(|v| v.value()).unwrap_or(0);
            let next = current
                .checked_add(1)
                .ok_or_else(|| DbError::Corrupt("sequence overflow".to_string()))?;
            table.insert(key.as_slice(), next)?;
            Ok(next)
        })
    }

    /// Walk the entries of `bucket` whose sequence falls in `range`.
    pub fn cursor(
        &mut self,
        bucket: &Bucket<'_>,
        range: impl RangeBounds<u64>,
        order: Order,
        mut visit: impl FnMut(u64, &[u8]) -> DbResult<ControlFlow<()>>,
    ) -> DbResult<()> {
        let txn = &self.txn;
        let (lower, upper) = bucket_range(bucket, range);
        let prefix_len = bucket.prefix().len();
        self.failure.run(|| {
            let table = txn.open_table(bucket.namespace().definition())?;
            scan(&table, lower, upper, order, &mut |key: &[u8], value: &[u8]| {
                visit(key_seq(&key[prefix_len..])?, value)
            })
        })
    }
}

/// A read-only snapshot transaction.
///
/// Reading a namespace that was never written yields nothing.
pub struct ReadTx {
    txn: ReadTransaction,
    failure: Failure,
}

impl ReadTx {
    pub fn get(&mut self, bucket: &Bucket<'_>, seq: u64) -> DbResult<Option<Vec<u8>>> {
        let txn = &self.txn;
        self.failure.run(|| {
            let table = match txn.open_table(bucket.namespace().definition()) {
                Ok(table) => table,
                Err(TableError::TableDoesNotExist(_)) => return Ok(None),
                Err(err) => return Err(err.into()),
            };
            let value = table.get(bucket.key(seq).as_slice())?;
            Ok(value.map(|v| v.value().to_vec()))
        })
    }

    /// Walk the entries of `bucket` whose sequence falls in `range`.
    pub fn cursor(
        &mut self,
        bucket: &Bucket<'_>,
        range: impl RangeBounds<u64>,
        order: Order,
        mut visit: impl FnMut(u64, &[u8]) -> DbResult<ControlFlow<()>>,
    ) -> DbResult<()> {
        let (lower, upper) = bucket_range(bucket, range);
        let prefix_len = bucket.prefix().len();
        self.scan_namespace(
            bucket.namespace(),
            lower,
            upper,
            order,
            |key: &[u8], value: &[u8]| visit(key_seq(&key[prefix_len..])?, value),
        )
    }

    /// Walk raw keys of `namespace` starting with `prefix`.
    pub fn cursor_prefix(
        &mut self,
        namespace: Namespace,
        prefix: &[u8],
        order: Order,
        visit: impl FnMut(&[u8], &[u8]) -> DbResult<ControlFlow<()>>,
    ) -> DbResult<()> {
        let lower = Bound::Included(prefix.to_vec());
        let upper = match prefix_successor(prefix) {
            Some(end) => Bound::Excluded(end),
            None => Bound::Unbounded,
        };
        self.scan_namespace(namespace, lower, upper, order, visit)
    }

    fn scan_namespace(
        &mut self,
        namespace: Namespace,
        lower: Bound<Vec<u8>>,
        upper: Bound<Vec<u8>>,
        order: Order,
        mut visit: impl FnMut(&[u8], &[u8]) -> DbResult<ControlFlow<()>>,
    ) -> DbResult<()> {
        let txn = &self.txn;
        self.failure.run(|| {
            let table = match txn.open_table(namespace.definition()) {
                Ok(table) => table,
                Err(TableError::TableDoesNotExist(_)) => return Ok(()),
                Err(err) => return Err(err.into()),
            };
            scan(&table, lower, upper, order, &mut visit)
        })
    }
}

fn bucket_range(
    bucket: &Bucket<'_>,
    range: impl RangeBounds<u64>,
) -> (Bound<Vec<u8>>, Bound<Vec<u8>>) {
    let (first, last) = bucket.key_bounds();
    let lower = match range.start_bound() {
        Bound::Included(seq) => Bound::Included(bucket.key(*seq)),
        Bound::Excluded(seq) => Bound::Excluded(bucket.key(*seq)),
        Bound::Unbounded => Bound::Included(first),
    };
    let upper = match range.end_bound() {
        Bound::Included(seq) => Bound::Included(bucket.key(*seq)),
        Bound::Excluded(seq) => Bound::Excluded(bucket.key(*seq)),
        Bound::Unbounded => Bound::Included(last),
    };
    (lower, upper)
}

/// Smallest key greater than every key starting with `prefix`.
fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}

fn scan<T>(
    table: &T,
    lower: Bound<Vec<u8>>,
    upper: Bound<Vec<u8>>,
    order: Order,
    visit: &mut dyn FnMut(&[u8], &[u8]) -> DbResult<ControlFlow<()>>,
) -> DbResult<()>
where
    T: ReadableTable<&'static [u8], &'static [u8]>,
{
    let bounds = (
        lower.as_ref().map(Vec::as_slice),
        upper.as_ref().map(Vec::as_slice),
    );
    let mut entries = table.range::<&[u8]>(bounds)?;
    loop {
        let next = match order {
            Order::Ascending => entries.next(),
            Order::Descending => entries.next_back(),
        };
        let Some(entry) = next else {
            break;
        };
        let (key, value) = entry?;
        if visit(key.value(), value.value())?.is_break() {
            break;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use runway_core::BuildId;
    use tempfile::TempDir;

    fn open_store() -> (TempDir, Store) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path().join("test.redb")).unwrap();
        (dir, store)
    }

    fn collect(store: &Store, bucket: &Bucket<'_>, order: Order) -> Vec<(u64, Vec<u8>)> {
        store
            .view(|tx| {
                let mut out = Vec::new();
                tx.cursor(bucket, .., order, |seq, value| {
                    out.push((seq, value.to_vec()));
                    Ok(ControlFlow::Continue(()))
                })?;
                Ok(out)
            })
            .unwrap()
    }

    #[test]
    fn test_sequences_are_per_bucket_and_increasing() {
        let (_dir, store) = open_store();
        let seqs = store
            .update(|tx| {
                Ok((
                    tx.next_sequence(&Bucket::Builds)?,
                    tx.next_sequence(&Bucket::Builds)?,
                    tx.next_sequence(&Bucket::Sha("abc"))?,
                ))
            })
            .unwrap();
        assert_eq!(seqs, (1, 2, 1));

        let next = store.update(|tx| tx.next_sequence(&Bucket::Builds)).unwrap();
        assert_eq!(next, 3);
    }

    #[test]
    fn test_sequence_not_reused_after_delete() {
        let (_dir, store) = open_store();
        store
            .update(|tx| {
                let seq = tx.next_sequence(&Bucket::Pending)?;
                tx.put(&Bucket::Pending, seq, &[])?;
                tx.delete(&Bucket::Pending, seq)?;
                Ok(())
            })
            .unwrap();
        let next = store.update(|tx| tx.next_sequence(&Bucket::Pending)).unwrap();
        assert_eq!(next, 2);
    }

    #[test]
    fn test_cursor_orders_numerically() {
        let (_dir, store) = open_store();
        store
            .update(|tx| {
                for seq in [300u64, 2, 256, 1] {
                    tx.put(&Bucket::Builds, seq, &seq.to_le_bytes())?;
                }
                Ok(())
            })
            .unwrap();

        let forward: Vec<u64> = collect(&store, &Bucket::Builds, Order::Ascending)
            .into_iter()
            .map(|(seq, _)| seq)
            .collect();
        assert_eq!(forward, vec![1, 2, 256, 300]);

        let backward: Vec<u64> = collect(&store, &Bucket::Builds, Order::Descending)
            .into_iter()
            .map(|(seq, _)| seq)
            .collect();
        assert_eq!(backward, vec![300, 256, 2, 1]);
    }

    #[test]
    fn test_cursor_stays_inside_bucket() {
        let (_dir, store) = open_store();
        store
            .update(|tx| {
                tx.put(&Bucket::Output(BuildId::new(1)), 0, b"a")?;
                tx.put(&Bucket::Output(BuildId::new(2)), 0, b"b")?;
                tx.put(&Bucket::Output(BuildId::new(2)), 1, b"c")?;
                Ok(())
            })
            .unwrap();

        let lines = collect(&store, &Bucket::Output(BuildId::new(2)), Order::Ascending);
        assert_eq!(lines, vec![(0, b"b".to_vec()), (1, b"c".to_vec())]);
    }

    #[test]
    fn test_cursor_range_and_early_stop() {
        let (_dir, store) = open_store();
        store
            .update(|tx| {
                for seq in 0..10 {
                    tx.put(&Bucket::Pending, seq, &[])?;
                }
                Ok(())
            })
            .unwrap();

        let seen = store
            .view(|tx| {
                let mut seen = Vec::new();
                tx.cursor(&Bucket::Pending, 4.., Order::Ascending, |seq, _| {
                    seen.push(seq);
                    Ok(if seen.len() == 3 {
                        ControlFlow::Break(())
                    } else {
                        ControlFlow::Continue(())
                    })
                })?;
                Ok(seen)
            })
            .unwrap();
        assert_eq!(seen, vec![4, 5, 6]);
    }

    #[test]
    fn test_view_on_empty_database() {
        let (_dir, store) = open_store();
        assert!(collect(&store, &Bucket::Pending, Order::Ascending).is_empty());
        let value = store.view(|tx| tx.get(&Bucket::Builds, 1)).unwrap();
        assert!(value.is_none());
    }

    #[test]
    fn test_closure_error_rolls_back() {
        let (_dir, store) = open_store();
        let result: DbResult<()> = store.update(|tx| {
            tx.put(&Bucket::Builds, 1, b"x")?;
            Err(DbError::NotFound("simulated".to_string()))
        });
        assert!(matches!(result, Err(DbError::NotFound(_))));
        assert!(store.view(|tx| tx.get(&Bucket::Builds, 1)).unwrap().is_none());
    }

    #[test]
    fn test_first_error_short_circuits_and_overrides() {
        let (_dir, store) = open_store();
        let result = store.update(|tx| {
            tx.put(&Bucket::Builds, 1, b"before")?;
            // Ignored failure: the handle must still refuse later writes.
            let _ = tx.cursor(&Bucket::Builds, .., Order::Ascending, |_, _| {
                Err(DbError::Corrupt("boom".to_string()))
            });
            let later = tx.put(&Bucket::Builds, 2, b"after");
            assert!(matches!(later, Err(DbError::Aborted(_))));
            Ok(())
        });

        assert!(matches!(result, Err(DbError::Corrupt(msg)) if msg == "boom"));
        assert!(collect(&store, &Bucket::Builds, Order::Ascending).is_empty());
    }

    #[test]
    fn test_prefix_successor() {
        assert_eq!(prefix_successor(&[1, 2]), Some(vec![1, 3]));
        assert_eq!(prefix_successor(&[1, 0xff]), Some(vec![2]));
        assert_eq!(prefix_successor(&[0xff, 0xff]), None);
        assert_eq!(prefix_successor(&[]), None);
    }
}
