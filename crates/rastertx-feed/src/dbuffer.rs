//! Frame double-buffers
//!
//! A two-slot hand-off between exactly one producer and one consumer.
//! The producer publishes into the back slot and blocks while the
//! previous publication is unconsumed; the consumer flips, which swaps
//! the slots unless the producer asked for a repeat of the front frame.
//!
//! The `Repeat` state is what keeps the composer fed at exactly one
//! frame per TV frame period: when a source frame is late, the scaler
//! publishes repeat ticks instead of new frames.

use rastertx_core::types::{TvError, TvResult};
use std::sync::{Arc, Condvar, Mutex};

/// Publication state of the back slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Ready {
    #[default]
    Empty,
    New,
    Repeat,
}

#[derive(Debug)]
struct State<T> {
    front: Option<Arc<T>>,
    back: Option<Arc<T>>,
    ready: Ready,
    eof: bool,
    abort: bool,
}

/// Two-slot double buffer carrying `Arc<T>` frames.
#[derive(Debug)]
pub struct FrameDbuffer<T> {
    state: Mutex<State<T>>,
    cond: Condvar,
}

impl<T> FrameDbuffer<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                front: None,
                back: None,
                ready: Ready::Empty,
                eof: false,
                abort: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// Producer: publish a new frame. Blocks until the consumer has
    /// taken the previous publication.
    pub fn publish(&self, frame: T) -> TvResult<()> {
        let mut s = self.state.lock().unwrap();
        while s.ready != Ready::Empty && !s.abort {
            s = self.cond.wait(s).unwrap();
        }
        if s.abort {
            return Err(TvError::Aborted);
        }
        s.back = Some(Arc::new(frame));
        s.ready = Ready::New;
        self.cond.notify_all();
        Ok(())
    }

    /// Producer: publish a repeat tick — the consumer sees the front
    /// frame again. Blocks like `publish`.
    pub fn publish_repeat(&self) -> TvResult<()> {
        let mut s = self.state.lock().unwrap();
        while s.ready != Ready::Empty && !s.abort {
            s = self.cond.wait(s).unwrap();
        }
        if s.abort {
            return Err(TvError::Aborted);
        }
        s.ready = Ready::Repeat;
        self.cond.notify_all();
        Ok(())
    }

    /// Producer: mark the stream finished. Consumers drain and then see
    /// `None`.
    pub fn finish(&self) {
        let mut s = self.state.lock().unwrap();
        s.eof = true;
        self.cond.notify_all();
    }

    /// Consumer: wait for a publication and take it. Returns the front
    /// frame (swapped in unless repeating), or `None` at end of stream.
    pub fn flip(&self) -> TvResult<Option<Arc<T>>> {
        let mut s = self.state.lock().unwrap();
        while s.ready == Ready::Empty && !s.abort && !s.eof {
            s = self.cond.wait(s).unwrap();
        }
        if s.abort {
            return Err(TvError::Aborted);
        }
        if s.ready == Ready::Empty {
            // EOF with nothing pending
            return Ok(None);
        }
        if s.ready == Ready::New {
            s.front = s.back.take();
        }
        s.ready = Ready::Empty;
        self.cond.notify_all();
        Ok(s.front.clone())
    }

    /// Wake both sides with `Aborted`.
    pub fn abort(&self) {
        let mut s = self.state.lock().unwrap();
        s.abort = true;
        self.cond.notify_all();
    }

    /// Number of frames currently held (front + unconsumed back).
    pub fn held(&self) -> usize {
        let s = self.state.lock().unwrap();
        s.front.is_some() as usize + s.back.is_some() as usize
    }
}

impl<T> Default for FrameDbuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}
