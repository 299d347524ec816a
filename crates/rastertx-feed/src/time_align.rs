//! PTS time alignment
//!
//! The policy that keeps the composer supplied with exactly one video
//! frame per TV frame period and one audio block per tick, regardless of
//! how ragged the source timestamps are:
//!
//! - a frame whose rescaled PTS lands before the current output tick is
//!   dropped;
//! - a frame landing after it forces repeat ticks of the previous frame
//!   until the raster catches up;
//! - audio tolerates ±20 ms of drift before trimming input or injecting
//!   silence.
//!
//! Both policies are pure state machines, unit-testable without threads.

use rastertx_core::types::Rational;

/// Decision for one decoded video frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoAction {
    /// Frame is in the past: discard it
    Drop,
    /// Emit this many repeat ticks of the previous frame, then this one
    Emit { repeats_before: u32 },
}

/// Video PTS alignment state.
#[derive(Debug, Clone)]
pub struct TimeAlign {
    stream_tb: Rational,
    mode_tb: Rational,
    /// Next output tick to be covered
    start_time: i64,
    last_pts: Option<i64>,
}

impl TimeAlign {
    /// `start_offset` pre-advances the clock, implementing the
    /// start-position configuration (in mode ticks).
    pub fn new(stream_tb: Rational, mode_tb: Rational, start_offset: i64) -> Self {
        Self {
            stream_tb,
            mode_tb,
            start_time: start_offset,
            last_pts: None,
        }
    }

    /// Decide what to do with a frame. `pts` is in the stream time base;
    /// `None` (unknown) inherits the previous frame's tick plus one.
    pub fn video_frame(&mut self, pts: Option<i64>) -> VideoAction {
        let ticks = match pts {
            Some(p) => Rational::rescale(p, self.stream_tb, self.mode_tb),
            None => self.last_pts.map(|t| t + 1).unwrap_or(self.start_time),
        };
        self.last_pts = Some(ticks);

        let rel = ticks - self.start_time;
        if rel < 0 {
            return VideoAction::Drop;
        }
        // The repeats and the fresh frame each advance one tick
        self.start_time += rel + 1;
        VideoAction::Emit {
            repeats_before: rel as u32,
        }
    }

    pub fn next_tick(&self) -> i64 {
        self.start_time
    }
}

/// Decision for one decoded audio frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioAction {
    /// Entirely in the past: discard
    Drop,
    /// Trim this many leading samples, keep the rest
    Trim(u32),
    /// Inject this many samples of silence before the frame
    InjectSilence(u32),
    /// Within tolerance: pass through
    Pass,
}

/// Audio sample-clock alignment. Timestamps are in samples of the
/// output audio rate (one tick per sample).
#[derive(Debug, Clone)]
pub struct AudioAlign {
    stream_tb: Rational,
    audio_tb: Rational,
    start_time: i64,
    /// Drift tolerance in samples (±20 ms at 32 kHz = 640)
    allowed_error: i64,
}

impl AudioAlign {
    pub fn new(stream_tb: Rational, audio_tb: Rational, start_offset: i64, allowed_error: i64) -> Self {
        Self {
            stream_tb,
            audio_tb,
            start_time: start_offset,
            allowed_error,
        }
    }

    /// Decide what to do with a frame starting at `pts` (stream time
    /// base) covering `nb_samples` output-rate samples. Unknown PTS
    /// frames pass through.
    pub fn audio_frame(&mut self, pts: Option<i64>, nb_samples: i64) -> AudioAction {
        let Some(p) = pts else { return AudioAction::Pass };
        let start = Rational::rescale(p, self.stream_tb, self.audio_tb) - self.start_time;
        let end = start + nb_samples;

        if end <= 0 {
            return AudioAction::Drop;
        }
        if start < -self.allowed_error {
            return AudioAction::Trim((-start) as u32);
        }
        if start > self.allowed_error {
            self.start_time += start;
            return AudioAction::InjectSilence(start as u32);
        }
        AudioAction::Pass
    }

    /// Account for samples actually delivered downstream.
    pub fn consumed(&mut self, nb_samples: i64) {
        self.start_time += nb_samples;
    }
}
