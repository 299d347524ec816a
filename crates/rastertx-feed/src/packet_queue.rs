//! Bounded compressed-packet queues
//!
//! One queue per elementary stream between the demux thread and its
//! decoder. Bounded by payload bytes: the writer blocks when the queue
//! is full, the reader blocks when it is empty and the stream has not
//! ended. Each queue owns its own mutex/condvar pair so a wakeup on the
//! video queue never disturbs the audio reader.

use rastertx_core::types::{TvError, TvResult};
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

/// Default queue bound in bytes.
pub const MAX_QUEUE_SIZE: usize = 15 * 1024 * 1024;

/// Accounting overhead charged per queued packet.
const ITEM_OVERHEAD: usize = std::mem::size_of::<Packet>();

/// An opaque compressed packet from the demuxer.
#[derive(Debug, Clone)]
pub struct Packet {
    pub data: Vec<u8>,
    /// Presentation timestamp in the stream's own time base;
    /// `i64::MIN` marks an unknown timestamp.
    pub pts: i64,
}

impl Packet {
    pub const NO_PTS: i64 = i64::MIN;

    pub fn new(data: Vec<u8>, pts: i64) -> Self {
        Self { data, pts }
    }
}

#[derive(Debug)]
struct Inner {
    queue: VecDeque<Packet>,
    bytes: usize,
    eof: bool,
    abort: bool,
}

/// A bounded FIFO of compressed packets.
#[derive(Debug)]
pub struct PacketQueue {
    inner: Mutex<Inner>,
    cond: Condvar,
    capacity: usize,
}

impl PacketQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                bytes: 0,
                eof: false,
                abort: false,
            }),
            cond: Condvar::new(),
            capacity,
        }
    }

    /// Queue a packet, blocking while the queue is at capacity.
    /// `None` marks the end of the stream.
    pub fn write(&self, packet: Option<Packet>) -> TvResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let Some(packet) = packet else {
            inner.eof = true;
            self.cond.notify_all();
            return Ok(());
        };

        let cost = packet.data.len() + ITEM_OVERHEAD;
        while !inner.abort && inner.bytes + cost > self.capacity {
            inner = self.cond.wait(inner).unwrap();
        }
        if inner.abort {
            return Err(TvError::Aborted);
        }

        inner.bytes += cost;
        inner.queue.push_back(packet);
        self.cond.notify_all();
        Ok(())
    }

    /// Dequeue the next packet, blocking while empty. Returns `None`
    /// once the stream has ended and the queue has drained.
    pub fn read(&self) -> TvResult<Option<Packet>> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if inner.abort {
                return Err(TvError::Aborted);
            }
            if let Some(packet) = inner.queue.pop_front() {
                inner.bytes -= packet.data.len() + ITEM_OVERHEAD;
                self.cond.notify_all();
                return Ok(Some(packet));
            }
            if inner.eof {
                return Ok(None);
            }
            inner = self.cond.wait(inner).unwrap();
        }
    }

    /// Wake every waiter with `Aborted` and drop queued packets.
    pub fn abort(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.abort = true;
        inner.queue.clear();
        inner.bytes = 0;
        self.cond.notify_all();
    }

    /// Bytes currently held, including per-item overhead.
    pub fn bytes(&self) -> usize {
        self.inner.lock().unwrap().bytes
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_fifo_order() {
        let q = PacketQueue::new(MAX_QUEUE_SIZE);
        q.write(Some(Packet::new(vec![1], 10))).unwrap();
        q.write(Some(Packet::new(vec![2], 20))).unwrap();
        q.write(None).unwrap();
        assert_eq!(q.read().unwrap().unwrap().pts, 10);
        assert_eq!(q.read().unwrap().unwrap().pts, 20);
        assert!(q.read().unwrap().is_none());
    }

    #[test]
    fn test_bound_is_enforced() {
        let q = Arc::new(PacketQueue::new(4096));
        q.write(Some(Packet::new(vec![0; 3000], 0))).unwrap();

        let q2 = q.clone();
        let writer = thread::spawn(move || {
            // Blocks until the reader drains the first packet
            q2.write(Some(Packet::new(vec![0; 3000], 1))).unwrap();
        });

        thread::sleep(Duration::from_millis(50));
        assert_eq!(q.len(), 1, "second write should be blocked at capacity");
        assert!(q.bytes() <= 4096);

        q.read().unwrap();
        writer.join().unwrap();
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn test_reader_blocks_until_write() {
        let q = Arc::new(PacketQueue::new(MAX_QUEUE_SIZE));
        let q2 = q.clone();
        let reader = thread::spawn(move || q2.read().unwrap().unwrap().pts);
        thread::sleep(Duration::from_millis(20));
        q.write(Some(Packet::new(vec![9], 99))).unwrap();
        assert_eq!(reader.join().unwrap(), 99);
    }

    #[test]
    fn test_abort_wakes_blocked_reader() {
        let q = Arc::new(PacketQueue::new(MAX_QUEUE_SIZE));
        let q2 = q.clone();
        let reader = thread::spawn(move || q2.read());
        thread::sleep(Duration::from_millis(20));
        q.abort();
        assert!(matches!(reader.join().unwrap(), Err(TvError::Aborted)));
    }

    #[test]
    fn test_eof_after_drain() {
        let q = PacketQueue::new(MAX_QUEUE_SIZE);
        q.write(Some(Packet::new(vec![5; 5], 1))).unwrap();
        q.write(None).unwrap();
        assert!(q.read().unwrap().is_some());
        assert!(q.read().unwrap().is_none());
        // EOF is sticky
        assert!(q.read().unwrap().is_none());
    }
}
