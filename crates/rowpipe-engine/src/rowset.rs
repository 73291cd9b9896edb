//! Bounded row queue between one producer step and one consumer step
//!
//! A [`RowSet`] wraps a bounded tokio channel. The producer side is kept in
//! an `Option` so that [`RowSet::set_done`] can drop it: once the buffered
//! rows are drained the consumer observes end-of-stream. Both blocking
//! operations race against the engine's shutdown token.

use crate::error::RowSetError;
use crate::row::Row;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Identifies one running copy of a step
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StepCopy {
    pub step: String,
    pub copy: usize,
}

impl StepCopy {
    pub fn new(step: impl Into<String>, copy: usize) -> Self {
        Self {
            step: step.into(),
            copy,
        }
    }
}

impl fmt::Display for StepCopy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.step, self.copy)
    }
}

pub struct RowSet {
    name: String,
    origin: StepCopy,
    destination: StepCopy,
    capacity: usize,
    sender: Mutex<Option<mpsc::Sender<Row>>>,
    receiver: tokio::sync::Mutex<mpsc::Receiver<Row>>,
    done: AtomicBool,
    buffered: AtomicUsize,
    shutdown: CancellationToken,
}

impl RowSet {
    /// Create a row set holding at most `capacity` rows (minimum 1).
    pub fn new(
        origin: StepCopy,
        destination: StepCopy,
        capacity: usize,
        shutdown: CancellationToken,
    ) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            name: format!("{origin} - {destination}"),
            origin,
            destination,
            capacity,
            sender: Mutex::new(Some(tx)),
            receiver: tokio::sync::Mutex::new(rx),
            done: AtomicBool::new(false),
            buffered: AtomicUsize::new(0),
            shutdown,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn origin(&self) -> &StepCopy {
        &self.origin
    }

    pub fn destination(&self) -> &StepCopy {
        &self.destination
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Rows currently buffered
    pub fn size(&self) -> usize {
        self.buffered.load(Ordering::Acquire)
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Append a row, waiting while the buffer is full.
    pub async fn put(&self, row: Row) -> Result<(), RowSetError> {
        if self.is_done() {
            return Err(RowSetError::Done(self.name.clone()));
        }
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(sender) = sender else {
            return Err(RowSetError::Done(self.name.clone()));
        };

        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(RowSetError::Interrupted(self.name.clone())),
            reserved = sender.reserve() => {
                let permit = reserved.map_err(|_| RowSetError::Done(self.name.clone()))?;
                // counted before the row becomes visible to the consumer
                self.buffered.fetch_add(1, Ordering::AcqRel);
                permit.send(row);
                Ok(())
            }
        }
    }

    /// Take the oldest row, waiting while the buffer is empty.
    ///
    /// Returns `Ok(None)` once the producer marked the row set done and
    /// every buffered row has been delivered.
    pub async fn get(&self) -> Result<Option<Row>, RowSetError> {
        let mut receiver = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => {
                return Err(RowSetError::Interrupted(self.name.clone()));
            }
            guard = self.receiver.lock() => guard,
        };

        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(RowSetError::Interrupted(self.name.clone())),
            row = receiver.recv() => {
                if row.is_some() {
                    self.release_one();
                }
                Ok(row)
            }
        }
    }

    /// Take a buffered row without waiting.
    pub fn try_get(&self) -> Option<Row> {
        let mut receiver = self.receiver.try_lock().ok()?;
        let row = receiver.try_recv().ok()?;
        self.release_one();
        Some(row)
    }

    fn release_one(&self) {
        self.buffered.fetch_sub(1, Ordering::AcqRel);
    }

    /// Mark the end of the stream. Idempotent; rows already buffered are
    /// still delivered.
    pub fn set_done(&self) {
        if !self.done.swap(true, Ordering::AcqRel) {
            tracing::trace!(rowset = %self.name, "row set done");
        }
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

impl fmt::Debug for RowSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowSet")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("size", &self.size())
            .field("done", &self.is_done())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::row::{RowMeta, Value, ValueMeta, ValueType};
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn rowset(capacity: usize, shutdown: CancellationToken) -> Arc<RowSet> {
        Arc::new(RowSet::new(
            StepCopy::new("producer", 0),
            StepCopy::new("consumer", 0),
            capacity,
            shutdown,
        ))
    }

    fn int_row(v: i64) -> Row {
        let meta = Arc::new(RowMeta::new(vec![ValueMeta::new("n", ValueType::Integer)]));
        Row::new(meta, vec![Value::Integer(v)]).unwrap()
    }

    fn as_int(row: &Row) -> i64 {
        match row.get(0) {
            Some(Value::Integer(v)) => *v,
            other => panic!("unexpected value {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_done_then_drain_yields_end_of_stream() {
        let rs = rowset(4, CancellationToken::new());
        rs.put(int_row(1)).await.unwrap();
        rs.put(int_row(2)).await.unwrap();
        rs.set_done();
        rs.set_done();

        assert!(rs.is_done());
        assert_eq!(as_int(&rs.get().await.unwrap().unwrap()), 1);
        assert_eq!(as_int(&rs.get().await.unwrap().unwrap()), 2);
        assert!(rs.get().await.unwrap().is_none());
        assert!(rs.get().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_after_done_is_rejected() {
        let rs = rowset(4, CancellationToken::new());
        rs.set_done();
        assert!(matches!(
            rs.put(int_row(1)).await,
            Err(RowSetError::Done(_))
        ));
    }

    #[tokio::test]
    async fn test_put_blocks_when_full_until_shutdown() {
        let shutdown = CancellationToken::new();
        let rs = rowset(1, shutdown.clone());
        rs.put(int_row(1)).await.unwrap();
        assert_eq!(rs.size(), 1);

        let blocked = tokio::time::timeout(Duration::from_millis(50), rs.put(int_row(2))).await;
        assert!(blocked.is_err(), "put should wait while the buffer is full");

        shutdown.cancel();
        assert!(matches!(
            rs.put(int_row(2)).await,
            Err(RowSetError::Interrupted(_))
        ));
    }

    #[tokio::test]
    async fn test_get_is_interrupted_by_shutdown() {
        let shutdown = CancellationToken::new();
        let rs = rowset(2, shutdown.clone());
        let waiter = {
            let rs = rs.clone();
            tokio::spawn(async move { rs.get().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.cancel();
        let outcome = waiter.await.unwrap();
        assert!(matches!(outcome, Err(RowSetError::Interrupted(_))));
    }

    #[tokio::test]
    async fn test_try_get_does_not_wait() {
        let rs = rowset(2, CancellationToken::new());
        assert!(rs.try_get().is_none());
        rs.put(int_row(9)).await.unwrap();
        assert_eq!(as_int(&rs.try_get().unwrap()), 9);
        assert_eq!(rs.size(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_size_settles_at_zero_with_fast_consumer() {
        let rs = rowset(1, CancellationToken::new());
        let producer = {
            let rs = rs.clone();
            tokio::spawn(async move {
                for v in 0..2_000 {
                    rs.put(int_row(v)).await.unwrap();
                }
                rs.set_done();
            })
        };
        let mut count = 0;
        while let Some(_row) = rs.get().await.unwrap() {
            assert!(rs.size() <= rs.capacity());
            count += 1;
        }
        producer.await.unwrap();
        assert_eq!(count, 2_000);
        assert_eq!(rs.size(), 0);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_rows_arrive_in_order_without_loss(
            values in proptest::collection::vec(any::<i64>(), 0..200),
            capacity in 1usize..16,
        ) {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .enable_all()
                .build()
                .unwrap();
            let received = runtime.block_on(async {
                let rs = rowset(capacity, CancellationToken::new());
                let producer = {
                    let rs = rs.clone();
                    let values = values.clone();
                    tokio::spawn(async move {
                        for v in values {
                            rs.put(int_row(v)).await.unwrap();
                        }
                        rs.set_done();
                    })
                };
                let mut received = Vec::new();
                while let Some(row) = rs.get().await.unwrap() {
                    received.push(as_int(&row));
                }
                producer.await.unwrap();
                received
            });
            prop_assert_eq!(received, values);
        }
    }
}
