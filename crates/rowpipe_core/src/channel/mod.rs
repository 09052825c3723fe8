//! Bounded single-producer single-consumer row queue.
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::graph::StageCopyId;
use crate::row::Row;

/// How long `pop` waits for a row by default.
pub const DEFAULT_POP_TIMEOUT: Duration = Duration::from_millis(1);

/// A bounded FIFO of rows between one producing stage copy and one
/// consuming stage copy.
///
/// Backpressure is expressed through push returning the row back to the
/// caller and pop returning `None`. Once the producer marks the channel done
/// it no longer accepts rows. The consumer drops the channel from its active
/// set once done and drained.
pub struct RowChannel {
    origin: StageCopyId,
    destination: StageCopyId,
    /// Slave the other end lives on when this channel is fed by, or feeds, a
    /// remote transport.
    remote_slave: Option<String>,
    capacity: usize,
    rows: Mutex<VecDeque<Row>>,
    not_empty: Condvar,
    not_full: Condvar,
    done: AtomicBool,
}

impl RowChannel {
    pub fn new(origin: StageCopyId, destination: StageCopyId, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        RowChannel {
            origin,
            destination,
            remote_slave: None,
            capacity,
            rows: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            done: AtomicBool::new(false),
        }
    }

    pub fn with_remote_slave(mut self, slave: impl Into<String>) -> Self {
        self.remote_slave = Some(slave.into());
        self
    }

    pub fn origin(&self) -> &StageCopyId {
        &self.origin
    }

    pub fn destination(&self) -> &StageCopyId {
        &self.destination
    }

    pub fn remote_slave(&self) -> Option<&str> {
        self.remote_slave.as_deref()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Try to push a row without blocking.
    ///
    /// Returns the row back if the channel is full or already done.
    pub fn push(&self, row: Row) -> Result<(), Row> {
        if self.is_done() {
            return Err(row);
        }

        let mut rows = self.rows.lock();
        if rows.len() >= self.capacity {
            return Err(row);
        }
        rows.push_back(row);
        self.not_empty.notify_one();

        Ok(())
    }

    /// Push a row, waiting up to `timeout` for space to become available.
    pub fn push_wait(&self, row: Row, timeout: Duration) -> Result<(), Row> {
        let deadline = Instant::now() + timeout;

        let mut rows = self.rows.lock();
        loop {
            if self.is_done() {
                return Err(row);
            }
            if rows.len() < self.capacity {
                rows.push_back(row);
                self.not_empty.notify_one();
                return Ok(());
            }
            if self.not_full.wait_until(&mut rows, deadline).timed_out() {
                if rows.len() < self.capacity && !self.is_done() {
                    rows.push_back(row);
                    self.not_empty.notify_one();
                    return Ok(());
                }
                return Err(row);
            }
        }
    }

    /// Pop a row, waiting a short while if the channel is empty.
    pub fn pop(&self) -> Option<Row> {
        self.pop_wait(DEFAULT_POP_TIMEOUT)
    }

    /// Pop a row, waiting up to `timeout` for one to arrive.
    ///
    /// Returns immediately with `None` if the channel is empty and done.
    pub fn pop_wait(&self, timeout: Duration) -> Option<Row> {
        let deadline = Instant::now() + timeout;

        let mut rows = self.rows.lock();
        loop {
            if let Some(row) = rows.pop_front() {
                self.not_full.notify_one();
                return Some(row);
            }
            if self.is_done() {
                return None;
            }
            if self.not_empty.wait_until(&mut rows, deadline).timed_out() {
                let row = rows.pop_front();
                if row.is_some() {
                    self.not_full.notify_one();
                }
                return row;
            }
        }
    }

    /// Pop a row if one is immediately available.
    pub fn pop_immediate(&self) -> Option<Row> {
        let mut rows = self.rows.lock();
        let row = rows.pop_front();
        if row.is_some() {
            self.not_full.notify_one();
        }
        row
    }

    /// Signal that no more rows will be pushed.
    pub fn mark_done(&self) {
        // Store under the lock so a consumer waiting on `not_empty` can't
        // miss the wakeup.
        let _rows = self.rows.lock();
        self.done.store(true, Ordering::Release);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    pub fn size(&self) -> usize {
        self.rows.lock().len()
    }

    /// If this channel has been marked done and all its rows were consumed.
    pub fn is_drained(&self) -> bool {
        self.is_done() && self.size() == 0
    }
}

impl fmt::Debug for RowChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowChannel")
            .field("origin", &self.origin)
            .field("destination", &self.destination)
            .field("remote_slave", &self.remote_slave)
            .field("capacity", &self.capacity)
            .field("size", &self.size())
            .field("done", &self.is_done())
            .finish()
    }
}

impl fmt::Display for RowChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.origin, self.destination)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;
    use crate::row::{DataType, Field, RowLayout, Value};

    fn channel(capacity: usize) -> RowChannel {
        RowChannel::new(StageCopyId::new("a", 0), StageCopyId::new("b", 0), capacity)
    }

    fn row(v: i64) -> Row {
        let layout = Arc::new(RowLayout::new([Field::new("id", DataType::Integer)]));
        Row::try_new(layout, vec![Value::Integer(v)]).unwrap()
    }

    fn id(row: &Row) -> i64 {
        match row.value(0) {
            Some(Value::Integer(v)) => *v,
            other => panic!("unexpected value: {other:?}"),
        }
    }

    #[test]
    fn fifo_order() {
        let ch = channel(10);
        for i in 0..5 {
            ch.push(row(i)).unwrap();
        }
        assert_eq!(5, ch.size());

        let got: Vec<_> = std::iter::from_fn(|| ch.pop_immediate()).map(|r| id(&r)).collect();
        assert_eq!(vec![0, 1, 2, 3, 4], got);
    }

    #[test]
    fn push_full_returns_row() {
        let ch = channel(2);
        ch.push(row(1)).unwrap();
        ch.push(row(2)).unwrap();

        let rejected = ch.push(row(3)).unwrap_err();
        assert_eq!(3, id(&rejected));

        let rejected = ch.push_wait(row(4), Duration::from_millis(5)).unwrap_err();
        assert_eq!(4, id(&rejected));
        assert_eq!(2, ch.size());
    }

    #[test]
    fn pop_empty_times_out() {
        let ch = channel(2);
        assert!(ch.pop_wait(Duration::from_millis(5)).is_none());
        assert!(ch.pop_immediate().is_none());
        assert!(!ch.is_done());
    }

    #[test]
    fn done_drains_then_returns_none() {
        let ch = channel(4);
        ch.push(row(1)).unwrap();
        ch.mark_done();

        assert!(!ch.is_drained());
        assert_eq!(1, id(&ch.pop().unwrap()));
        assert!(ch.pop().is_none());
        assert!(ch.is_drained());

        // No pushes accepted after done.
        assert!(ch.push(row(2)).is_err());
        assert_eq!(0, ch.size());
    }

    #[test]
    fn mark_done_wakes_waiting_consumer() {
        let ch = Arc::new(channel(4));
        let consumer = {
            let ch = ch.clone();
            thread::spawn(move || ch.pop_wait(Duration::from_secs(10)))
        };

        thread::sleep(Duration::from_millis(10));
        ch.mark_done();

        let got = consumer.join().unwrap();
        assert!(got.is_none());
    }

    #[test]
    fn blocked_producer_resumes_after_pop() {
        let ch = Arc::new(channel(1));
        ch.push(row(1)).unwrap();

        let producer = {
            let ch = ch.clone();
            thread::spawn(move || ch.push_wait(row(2), Duration::from_secs(10)).is_ok())
        };

        thread::sleep(Duration::from_millis(10));
        assert_eq!(1, id(&ch.pop_immediate().unwrap()));
        assert!(producer.join().unwrap());
        assert_eq!(2, id(&ch.pop_wait(Duration::from_secs(1)).unwrap()));
    }
}
