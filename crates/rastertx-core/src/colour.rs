//! Colour encoding
//!
//! RGB to luma/chroma conversion and subcarrier modulation for the three
//! colour-under-carrier families:
//!
//! - **PAL**: quadrature AM of U and V on a 4.43361875 MHz subcarrier,
//!   with the V axis inverted on alternate lines and a swinging burst.
//! - **NTSC**: quadrature AM on 315/88 MHz with a fixed-phase burst.
//! - **SECAM**: frequency modulation of Dr and Db on alternate lines,
//!   two distinct rest frequencies, no burst.
//!
//! The chroma oscillator phase is *absolute to line 1 field 1* — it is a
//! [`RationalNco`] advanced once per output sample by the composer, never
//! reset between lines, so a receiver's burst-locked reference stays valid
//! across the whole transmission.

use crate::mode::{ChromaCarrier, SecamChroma};
use crate::nco::RationalNco;
use crate::types::Rational;
use std::f64::consts::PI;

/// Gamma-correction lookup for 8-bit RGB components.
///
/// Built once at open; maps 0..=255 to 0.0..=1.0 through `x^(1/gamma)`.
#[derive(Debug, Clone)]
pub struct GammaLut {
    table: [f64; 256],
}

impl GammaLut {
    pub fn new(gamma: f64) -> Self {
        let mut table = [0.0; 256];
        for (i, v) in table.iter_mut().enumerate() {
            *v = (i as f64 / 255.0).powf(1.0 / gamma);
        }
        Self { table }
    }

    #[inline]
    pub fn lookup(&self, v: u8) -> f64 {
        self.table[v as usize]
    }
}

/// Rec. 601 luma from gamma-corrected RGB in 0..1.
#[inline]
pub fn luma(r: f64, g: f64, b: f64) -> f64 {
    0.299 * r + 0.587 * g + 0.114 * b
}

/// PAL/NTSC colour-difference pair: `U = 0.493(B−Y)`, `V = 0.877(R−Y)`.
#[inline]
pub fn rgb_to_yuv(r: f64, g: f64, b: f64) -> (f64, f64, f64) {
    let y = luma(r, g, b);
    (y, 0.493 * (b - y), 0.877 * (r - y))
}

/// SECAM colour-difference pair: `Dr = −1.902(R−Y)`, `Db = 1.505(B−Y)`.
#[inline]
pub fn rgb_to_secam(r: f64, g: f64, b: f64) -> (f64, f64, f64) {
    let y = luma(r, g, b);
    (y, -1.902 * (r - y), 1.505 * (b - y))
}

/// Quadrature chroma modulator for PAL and NTSC.
#[derive(Debug, Clone)]
pub struct QamChroma {
    nco: RationalNco,
    /// PAL line-alternating V switch; always +1 for NTSC
    pal: bool,
    v_sign: f64,
    burst_amplitude: f64,
    /// Burst phase relative to the +U (sine) axis, radians
    burst_phase: f64,
}

impl QamChroma {
    /// `sample_rate` must be the composer's output rate; the subcarrier
    /// ratio is reduced exactly from the mode's rational frequency.
    pub fn new(carrier: &ChromaCarrier, sample_rate: Rational, pal: bool) -> Self {
        let ratio = carrier.frequency.div(sample_rate);
        Self {
            nco: RationalNco::new(ratio),
            pal,
            v_sign: 1.0,
            burst_amplitude: carrier.burst_amplitude,
            burst_phase: PI,
        }
    }

    /// Called at the start of every line with the absolute line index
    /// (line 1 field 1 = 0). Sets the PAL V-switch state for this line.
    pub fn begin_line(&mut self, absolute_line: u64) {
        if self.pal {
            self.v_sign = if absolute_line % 2 == 0 { 1.0 } else { -1.0 };
            // Swinging burst: ±135° from the +U axis
            self.burst_phase = PI - self.v_sign * PI / 4.0;
        }
    }

    /// Modulated chroma for one active sample. Advances the oscillator.
    #[inline]
    pub fn modulate(&mut self, u: f64, v: f64) -> f64 {
        let ph = self.nco.phase();
        let s = u * ph.sin() + self.v_sign * v * ph.cos();
        self.nco.advance();
        s
    }

    /// Burst waveform for one sample. Advances the oscillator.
    #[inline]
    pub fn burst(&mut self) -> f64 {
        let s = self.burst_amplitude * (self.nco.phase() + self.burst_phase).sin();
        self.nco.advance();
        s
    }

    /// Advance the oscillator through a sample that carries no chroma.
    /// The phase accumulator must tick on every output sample to stay
    /// absolute to the frame origin.
    #[inline]
    pub fn idle(&mut self) {
        self.nco.advance();
    }

    /// Jump the oscillator to the phase of an absolute output sample
    /// (sample 0 = first sample of line 1, field 1).
    #[inline]
    pub fn seek(&mut self, absolute_sample: u64) {
        self.nco.seek(absolute_sample);
    }

    pub fn v_sign(&self) -> f64 {
        self.v_sign
    }
}

/// SECAM FM chroma modulator.
///
/// Dr and Db are sent on alternate lines, each on its own rest frequency.
/// The colour-difference signal passes through a single-pole low-frequency
/// pre-emphasis before modulating the carrier.
#[derive(Debug, Clone)]
pub struct SecamFmChroma {
    params: SecamChroma,
    sample_rate: f64,
    /// True when the current line carries Dr
    dr_line: bool,
    phase: f64,
    /// Pre-emphasis filter state
    emph: f64,
}

impl SecamFmChroma {
    pub fn new(params: SecamChroma, sample_rate: f64) -> Self {
        Self {
            params,
            sample_rate,
            dr_line: false,
            phase: 0.0,
            emph: 0.0,
        }
    }

    /// Select Dr or Db for this line from the absolute line index.
    pub fn begin_line(&mut self, absolute_line: u64) {
        self.dr_line = absolute_line % 2 == 0;
        self.emph = 0.0;
    }

    /// True when this line carries the Dr signal.
    pub fn is_dr_line(&self) -> bool {
        self.dr_line
    }

    /// Modulate one sample. `dr` and `db` are the colour-difference
    /// values for the current pixel; the line parity picks which is sent.
    #[inline]
    pub fn modulate(&mut self, dr: f64, db: f64) -> f64 {
        let (d, f0, dev) = if self.dr_line {
            (dr, self.params.dr_frequency, self.params.dr_deviation)
        } else {
            (db, self.params.db_frequency, self.params.db_deviation)
        };

        // Single-pole high-boost pre-emphasis (85 kHz corner)
        let alpha = 1.0 / (1.0 + self.sample_rate / (2.0 * PI * 85_000.0));
        self.emph += alpha * (d - self.emph);
        let d = d + 2.0 * (d - self.emph);

        self.phase += 2.0 * PI * (f0 + dev * d) / self.sample_rate;
        if self.phase > PI {
            self.phase -= 2.0 * PI;
        }
        self.params.amplitude * self.phase.cos()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::{Mode, ModeId};
    use approx::assert_relative_eq;

    #[test]
    fn test_gamma_lut_endpoints() {
        let lut = GammaLut::new(2.2);
        assert_relative_eq!(lut.lookup(0), 0.0, epsilon = 1e-12);
        assert_relative_eq!(lut.lookup(255), 1.0, epsilon = 1e-12);
        assert!(lut.lookup(128) > 128.0 / 255.0);
    }

    #[test]
    fn test_luma_weights() {
        assert_relative_eq!(luma(1.0, 1.0, 1.0), 1.0, epsilon = 1e-12);
        assert_relative_eq!(luma(1.0, 0.0, 0.0), 0.299, epsilon = 1e-12);
    }

    #[test]
    fn test_yuv_grey_has_no_chroma() {
        let (_, u, v) = rgb_to_yuv(0.5, 0.5, 0.5);
        assert_relative_eq!(u, 0.0, epsilon = 1e-12);
        assert_relative_eq!(v, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_pal_v_switch_alternates() {
        let mode = Mode::new(ModeId::PalI, 20_250_000).unwrap();
        let mut qam = QamChroma::new(mode.chroma().unwrap(), mode.sample_rate(), true);
        qam.begin_line(0);
        let s0 = qam.v_sign();
        qam.begin_line(1);
        let s1 = qam.v_sign();
        assert_relative_eq!(s0, -s1, epsilon = 1e-12);
    }

    #[test]
    fn test_ntsc_no_v_switch() {
        let mode = Mode::new(ModeId::NtscM, 13_500_000).unwrap();
        let mut qam = QamChroma::new(mode.chroma().unwrap(), mode.sample_rate(), false);
        qam.begin_line(0);
        let s0 = qam.v_sign();
        qam.begin_line(1);
        assert_relative_eq!(s0, qam.v_sign(), epsilon = 1e-12);
    }

    #[test]
    fn test_chroma_amplitude_bounded() {
        let mode = Mode::new(ModeId::PalI, 20_250_000).unwrap();
        let mut qam = QamChroma::new(mode.chroma().unwrap(), mode.sample_rate(), true);
        qam.begin_line(0);
        for _ in 0..5000 {
            let s = qam.modulate(0.3, 0.3);
            assert!(s.abs() <= 0.3 * 2.0_f64.sqrt() + 1e-9);
        }
    }

    #[test]
    fn test_secam_line_alternation() {
        let params = *Mode::new(ModeId::SecamL, 20_250_000)
            .unwrap()
            .secam()
            .unwrap();
        let mut fm = SecamFmChroma::new(params, 20_250_000.0);
        fm.begin_line(0);
        assert!(fm.is_dr_line());
        fm.begin_line(1);
        assert!(!fm.is_dr_line());
    }
}
