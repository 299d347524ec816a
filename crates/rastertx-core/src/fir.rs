//! FIR filtering and rational resampling
//!
//! Windowed-sinc and raised-cosine filter design, a direct-form real FIR,
//! a Hilbert transformer for single-sideband output, and a polyphase
//! rational resampler used to bring 32 kHz audio up to the video sample
//! rate and to shape NICAM symbols.
//!
//! All coefficients are designed once at open time; the per-sample paths
//! allocate nothing.

use crate::types::IQSample;
use num_complex::Complex64;
use std::f64::consts::PI;

/// Design a lowpass filter using the windowed sinc method with a
/// Blackman window. `num_taps` is forced odd for linear phase.
pub fn design_lowpass(cutoff_hz: f64, sample_rate: f64, num_taps: usize) -> Vec<f64> {
    let num_taps = if num_taps % 2 == 0 { num_taps + 1 } else { num_taps };
    let fc = cutoff_hz / sample_rate;
    let m = (num_taps - 1) as f64;
    let mid = m / 2.0;

    let mut coeffs = Vec::with_capacity(num_taps);
    for i in 0..num_taps {
        let n = i as f64;
        let sinc = if (n - mid).abs() < 1e-10 {
            2.0 * PI * fc
        } else {
            (2.0 * PI * fc * (n - mid)).sin() / (n - mid)
        };
        let window = 0.42 - 0.5 * (2.0 * PI * n / m).cos() + 0.08 * (4.0 * PI * n / m).cos();
        coeffs.push(sinc * window);
    }

    let sum: f64 = coeffs.iter().sum();
    if sum.abs() > 1e-10 {
        for c in coeffs.iter_mut() {
            *c /= sum;
        }
    }
    coeffs
}

/// Design a raised-cosine pulse, used for NICAM symbol shaping and as the
/// prototype for the vestigial-sideband response.
///
/// `beta` is the roll-off factor in 0..=1, `sps` the samples per symbol
/// period, `num_taps` the filter length (forced odd).
pub fn design_raised_cosine(beta: f64, sps: f64, num_taps: usize) -> Vec<f64> {
    let num_taps = if num_taps % 2 == 0 { num_taps + 1 } else { num_taps };
    let mid = (num_taps / 2) as f64;
    let mut coeffs = Vec::with_capacity(num_taps);

    for i in 0..num_taps {
        let t = (i as f64 - mid) / sps;
        let denom = 1.0 - (2.0 * beta * t) * (2.0 * beta * t);
        let h = if t.abs() < 1e-10 {
            1.0
        } else if denom.abs() < 1e-10 {
            // Singularity at t = ±1/(2β)
            beta / 2.0 * (PI / (2.0 * beta)).sin()
        } else {
            let sinc = (PI * t).sin() / (PI * t);
            sinc * (PI * beta * t).cos() / denom
        };
        coeffs.push(h);
    }

    let sum: f64 = coeffs.iter().sum();
    if sum.abs() > 1e-10 {
        for c in coeffs.iter_mut() {
            *c /= sum;
        }
    }
    coeffs
}

/// Direct-form real-valued FIR filter with a circular delay line.
#[derive(Debug, Clone)]
pub struct FirFilter {
    coeffs: Vec<f64>,
    delay_line: Vec<f64>,
    delay_idx: usize,
}

impl FirFilter {
    pub fn new(coeffs: Vec<f64>) -> Self {
        let len = coeffs.len().max(1);
        Self {
            coeffs,
            delay_line: vec![0.0; len],
            delay_idx: 0,
        }
    }

    /// Windowed-sinc lowpass constructor.
    pub fn lowpass(cutoff_hz: f64, sample_rate: f64, num_taps: usize) -> Self {
        Self::new(design_lowpass(cutoff_hz, sample_rate, num_taps))
    }

    /// Process a single sample.
    #[inline]
    pub fn process_sample(&mut self, input: f64) -> f64 {
        let len = self.coeffs.len();
        self.delay_line[self.delay_idx] = input;
        let mut acc = 0.0;
        for (i, &c) in self.coeffs.iter().enumerate() {
            let pos = (self.delay_idx + len - i) % len;
            acc += self.delay_line[pos] * c;
        }
        self.delay_idx = (self.delay_idx + 1) % len;
        acc
    }

    /// Process a block in place.
    pub fn process_inplace(&mut self, samples: &mut [f64]) {
        for s in samples.iter_mut() {
            *s = self.process_sample(*s);
        }
    }

    pub fn num_taps(&self) -> usize {
        self.coeffs.len()
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coeffs
    }

    pub fn reset(&mut self) {
        self.delay_line.iter_mut().for_each(|s| *s = 0.0);
        self.delay_idx = 0;
    }
}

/// Hilbert transform FIR for real-to-analytic conversion, used by the
/// SSB output mode. The real path is delayed to match the filter's group
/// delay; odd-indexed taps carry `2/(π·n)` under a Hamming window.
#[derive(Debug, Clone)]
pub struct HilbertTransform {
    taps: Vec<f64>,
    delay: usize,
    delay_line: Vec<f64>,
    write_idx: usize,
}

impl HilbertTransform {
    /// `num_taps` is forced odd, minimum 3.
    pub fn new(num_taps: usize) -> Self {
        let num_taps = if num_taps % 2 == 0 { num_taps + 1 } else { num_taps };
        let num_taps = num_taps.max(3);
        let m = num_taps / 2;
        let mut taps = vec![0.0; num_taps];
        for (i, tap) in taps.iter_mut().enumerate() {
            let n = i as f64 - m as f64;
            if n.abs() < 1e-10 || (i + m) % 2 == 0 {
                continue;
            }
            let h = 2.0 / (PI * n);
            let w = 0.54 - 0.46 * (2.0 * PI * i as f64 / (num_taps - 1) as f64).cos();
            *tap = h * w;
        }
        Self {
            taps,
            delay: m,
            delay_line: vec![0.0; num_taps],
            write_idx: 0,
        }
    }

    /// Produce the analytic sample for one real input sample.
    #[inline]
    pub fn process_sample(&mut self, input: f64) -> IQSample {
        let len = self.taps.len();
        self.delay_line[self.write_idx] = input;

        let mut q = 0.0;
        for (i, &t) in self.taps.iter().enumerate() {
            if t != 0.0 {
                let pos = (self.write_idx + len - i) % len;
                q += self.delay_line[pos] * t;
            }
        }
        let i_pos = (self.write_idx + len - self.delay) % len;
        let i = self.delay_line[i_pos];

        self.write_idx = (self.write_idx + 1) % len;
        Complex64::new(i, q)
    }
}

/// Polyphase rational resampler: upsample by `up`, filter, downsample by
/// `down`. The prototype lowpass cuts at the narrower of the two Nyquist
/// limits. Operates on real samples.
///
/// The phase sequence visits branch `(n·down) mod up` for output `n`, so
/// each output costs one branch dot product regardless of the ratio.
#[derive(Debug, Clone)]
pub struct RationalResampler {
    up: usize,
    down: usize,
    /// Polyphase branches: `up` rows of `taps_per_branch` coefficients,
    /// pre-scaled by `up` to preserve amplitude through zero insertion.
    branches: Vec<Vec<f64>>,
    history: Vec<f64>,
    /// Accumulated upsampled-domain phase.
    phase: usize,
}

impl RationalResampler {
    /// Create a resampler with `taps_per_branch` taps per polyphase arm.
    pub fn new(up: usize, down: usize, taps_per_branch: usize) -> Self {
        assert!(up > 0 && down > 0, "resampling ratio must be positive");
        let num_taps = up * taps_per_branch;
        let cutoff = 0.5 / up.max(down) as f64;
        let proto = design_lowpass(cutoff, 1.0, num_taps);

        let mut branches = vec![vec![0.0; taps_per_branch]; up];
        for (i, &c) in proto.iter().enumerate() {
            if i / up < taps_per_branch {
                branches[i % up][i / up] = c * up as f64;
            }
        }

        Self {
            up,
            down,
            branches,
            history: vec![0.0; taps_per_branch],
            phase: 0,
        }
    }

    pub fn ratio(&self) -> (usize, usize) {
        (self.up, self.down)
    }

    /// Feed input samples, appending resampled output to `out`.
    ///
    /// Output `y[k]` at upsampled position `k·down` is
    /// `Σ_i h[phase + i·up] · x[n − i]`, so the branch index is the
    /// upsampled phase within the current input period.
    pub fn process(&mut self, input: &[f64], out: &mut Vec<f64>) {
        let tpb = self.history.len();
        for &x in input {
            self.history.rotate_right(1);
            self.history[0] = x;

            while self.phase < self.up {
                let b = &self.branches[self.phase];
                let mut acc = 0.0;
                for i in 0..tpb {
                    acc += self.history[i] * b[i];
                }
                out.push(acc);
                self.phase += self.down;
            }
            self.phase -= self.up;
        }
    }

    pub fn reset(&mut self) {
        self.history.iter_mut().for_each(|s| *s = 0.0);
        self.phase = 0;
    }
}
