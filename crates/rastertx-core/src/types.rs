//! Core types for analogue television synthesis
//!
//! This module defines the fundamental types used throughout rastertx:
//! complex I/Q samples, exact rational arithmetic for timing, and the
//! crate-wide error type.
//!
//! ## Why rationals?
//!
//! Analogue TV timing is unforgiving: a PAL frame is exactly 625 lines at
//! exactly 25 Hz, and the number of samples per line must be an integer or
//! sync drifts off the raster within seconds. Floating point cannot hold
//! `30000/1001` exactly, so every frame rate, sample rate and subcarrier
//! frequency is carried as a reduced `Rational` until the moment a DSP
//! stage needs an `f64`.

use num_complex::Complex64;
use serde::{Deserialize, Serialize};

/// A single I/Q sample point
pub type IQSample = Complex64;

/// A real-valued baseband sample
pub type Sample = f64;

/// Result type for television synthesis operations
pub type TvResult<T> = Result<T, TvError>;

/// Errors that can occur while opening or running a pipeline
#[derive(Debug, Clone, thiserror::Error)]
pub enum TvError {
    #[error("out of memory: {0}")]
    OutOfMemory(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("device error: {0}")]
    DeviceError(String),

    #[error("decode error: {0}")]
    DecodeError(String),

    #[error("i/o error: {0}")]
    IoError(String),

    #[error("end of stream")]
    EndOfStream,

    #[error("aborted")]
    Aborted,
}

impl From<std::io::Error> for TvError {
    fn from(e: std::io::Error) -> Self {
        TvError::IoError(e.to_string())
    }
}

impl TvError {
    /// Process exit code for this error, matching the documented contract:
    /// 0 success, 1 open/config failure, 2 clean end-of-stream, 3 device error.
    pub fn exit_code(&self) -> i32 {
        match self {
            TvError::EndOfStream => 2,
            TvError::DeviceError(_) => 3,
            _ => 1,
        }
    }
}

/// An exact ratio of two signed 64-bit integers.
///
/// Always stored reduced, with a positive denominator. Used for sample
/// rates, frame rates, time bases, pixel aspect ratios and subcarrier
/// frequencies.
///
/// # Example
///
/// ```rust
/// use rastertx_core::types::Rational;
///
/// let ntsc_fps = Rational::new(30_000, 1001);
/// assert_eq!(ntsc_fps, Rational::new(60_000, 2002));
/// assert!((ntsc_fps.to_f64() - 29.97).abs() < 0.01);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rational {
    num: i64,
    den: i64,
}

fn gcd(mut a: i64, mut b: i64) -> i64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a.abs()
}

impl Rational {
    /// Create a reduced rational. Panics if `den == 0`.
    pub fn new(num: i64, den: i64) -> Self {
        assert!(den != 0, "rational denominator must be non-zero");
        let sign = if den < 0 { -1 } else { 1 };
        let g = gcd(num, den).max(1);
        Self {
            num: sign * num / g,
            den: sign * den / g,
        }
    }

    /// An integer value as a rational.
    pub const fn from_int(v: i64) -> Self {
        Self { num: v, den: 1 }
    }

    pub fn num(&self) -> i64 {
        self.num
    }

    pub fn den(&self) -> i64 {
        self.den
    }

    pub fn to_f64(&self) -> f64 {
        self.num as f64 / self.den as f64
    }

    /// Reciprocal. Panics if the value is zero.
    pub fn recip(&self) -> Self {
        Self::new(self.den, self.num)
    }

    pub fn mul(&self, other: Rational) -> Self {
        // Cross-reduce before multiplying to keep intermediates small
        let g1 = gcd(self.num, other.den).max(1);
        let g2 = gcd(other.num, self.den).max(1);
        Self::new(
            (self.num / g1) * (other.num / g2),
            (self.den / g2) * (other.den / g1),
        )
    }

    pub fn div(&self, other: Rational) -> Self {
        self.mul(other.recip())
    }

    pub fn add(&self, other: Rational) -> Self {
        Self::new(
            self.num * other.den + other.num * self.den,
            self.den * other.den,
        )
    }

    /// True if this rational divides into an exact integer.
    pub fn is_integer(&self) -> bool {
        self.den == 1
    }

    /// Rescale a tick count from one time base to another, rounding to
    /// nearest with ties away from zero. This matches the rounding the
    /// upstream demuxer applies to presentation timestamps.
    pub fn rescale(value: i64, from: Rational, to: Rational) -> i64 {
        let num = (value as i128) * from.num as i128 * to.den as i128;
        let den = from.den as i128 * to.num as i128;
        let half = den.abs() / 2;
        let adj = if num < 0 { -half } else { half };
        ((num + adj) / den) as i64
    }
}

impl std::fmt::Display for Rational {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// Convert a gain in decibels to a linear amplitude factor.
#[inline]
pub fn db_to_gain(db: f64) -> f64 {
    10.0_f64.powf(db / 20.0)
}
