//! IQ modulation and output shaping
//!
//! Consumes the composer's real baseband and produces what the sink
//! wants: plain real samples (baseband mode), or interleaved I/Q pairs
//! after AM with vestigial-sideband filtering (the terrestrial systems),
//! wideband FM (MAC), or SSB. The VSB FIR coefficients are designed once
//! at open; the per-sample path is a delay line, an oscillator and a
//! couple of multiplies.
//!
//! Levels: the composer works in volts. The shaper normalises so the
//! sync tip maps to the lowest output level and peak white to the
//! highest, then applies the configured gain and converts to 16- or
//! 8-bit integers.

use crate::config::SampleFormat;
use crate::fir::{design_lowpass, HilbertTransform};
use crate::mode::{ColourSystem, Levels, Mode};
use crate::source::SampleSink;
use crate::types::{db_to_gain, IQSample, TvResult};
use num_complex::Complex64;
use std::f64::consts::PI;
use std::io::Write;

/// How the baseband reaches the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Real composite samples, no carrier
    BasebandReal,
    /// Negative-modulation AM with vestigial sideband
    AmVsb,
    /// Wideband FM (MAC on satellite)
    FmWide,
    /// Single sideband
    Ssb,
}

impl OutputMode {
    /// Pick the natural output mode for a configuration: baseband when
    /// no frequency is set, FM for the MAC family, AM-VSB otherwise.
    pub fn for_mode(mode: &Mode, frequency: u64) -> Self {
        if frequency == 0 {
            OutputMode::BasebandReal
        } else if mode.colour() == ColourSystem::Mac {
            OutputMode::FmWide
        } else {
            OutputMode::AmVsb
        }
    }
}

/// Complex FIR used for the vestigial-sideband shaping.
#[derive(Debug, Clone)]
struct ComplexFir {
    taps: Vec<Complex64>,
    delay: Vec<Complex64>,
    idx: usize,
}

impl ComplexFir {
    /// Band-pass from `-vestige` to `+upper` Hz: a lowpass prototype
    /// shifted up by the band centre.
    fn vsb(vestige: f64, upper: f64, sample_rate: f64, num_taps: usize) -> Self {
        let centre = (upper - vestige) / 2.0;
        let half_bw = (upper + vestige) / 2.0;
        let lp = design_lowpass(half_bw, sample_rate, num_taps);
        let mid = (lp.len() / 2) as f64;
        let taps: Vec<Complex64> = lp
            .iter()
            .enumerate()
            .map(|(n, &h)| {
                let ph = 2.0 * PI * centre * (n as f64 - mid) / sample_rate;
                Complex64::new(h * ph.cos(), h * ph.sin())
            })
            .collect();
        let len = taps.len();
        Self {
            taps,
            delay: vec![Complex64::new(0.0, 0.0); len],
            idx: 0,
        }
    }

    #[inline]
    fn process(&mut self, input: Complex64) -> Complex64 {
        let len = self.taps.len();
        self.delay[self.idx] = input;
        let mut acc = Complex64::new(0.0, 0.0);
        for (i, t) in self.taps.iter().enumerate() {
            let pos = (self.idx + len - i) % len;
            acc += self.delay[pos] * t;
        }
        self.idx = (self.idx + 1) % len;
        acc
    }
}

/// The output shaper.
pub struct IqModulator {
    output: OutputMode,
    levels: Levels,
    gain: f64,
    format: SampleFormat,
    /// IF oscillator phase and increment
    phase: f64,
    phase_inc: f64,
    vsb: Option<ComplexFir>,
    hilbert: Option<HilbertTransform>,
    /// FM phase accumulator and sensitivity
    fm_phase: f64,
    fm_sensitivity: f64,
    buf_i16: Vec<i16>,
    buf_i8: Vec<i8>,
}

impl IqModulator {
    /// `if_frequency` is the carrier offset within the output passband;
    /// 0 centres the signal.
    pub fn new(
        mode: &Mode,
        output: OutputMode,
        if_frequency: f64,
        gain_db: f64,
        format: SampleFormat,
    ) -> Self {
        let fs = mode.sample_rate().to_f64();
        let top_audio = mode
            .audio_carriers()
            .iter()
            .map(|c| c.frequency)
            .chain(mode.nicam().map(|n| n.frequency))
            .fold(5.5e6, f64::max);

        let vsb = match output {
            OutputMode::AmVsb => Some(ComplexFir::vsb(1.75e6, top_audio + 0.5e6, fs, 129)),
            _ => None,
        };
        let hilbert = match output {
            OutputMode::Ssb => Some(HilbertTransform::new(129)),
            _ => None,
        };

        tracing::info!(
            "modulator: {:?} at {:.3} MHz IF, gain {:+.1} dB",
            output,
            if_frequency / 1e6,
            gain_db
        );

        Self {
            output,
            levels: mode.levels(),
            gain: db_to_gain(gain_db),
            format,
            phase: 0.0,
            phase_inc: 2.0 * PI * if_frequency / fs,
            vsb,
            hilbert,
            fm_phase: 0.0,
            fm_sensitivity: 2.0 * PI * 8.0e6 / fs,
            buf_i16: Vec::new(),
            buf_i8: Vec::new(),
        }
    }

    /// Normalised modulation depth: 0 at sync tip, 1 at peak white.
    #[inline]
    fn depth(&self, v: f64) -> f64 {
        (v - self.levels.sync) / (self.levels.white - self.levels.sync)
    }

    #[inline]
    fn carrier(&mut self) -> Complex64 {
        let c = Complex64::new(self.phase.cos(), self.phase.sin());
        self.phase += self.phase_inc;
        if self.phase > PI {
            self.phase -= 2.0 * PI;
        }
        c
    }

    fn modulate_sample(&mut self, v: f64) -> IQSample {
        match self.output {
            OutputMode::BasebandReal => {
                // Mapped below; unreachable through process()
                Complex64::new(2.0 * self.depth(v) - 1.0, 0.0)
            }
            OutputMode::AmVsb => {
                // Negative modulation: sync tip at full carrier, peak
                // white at 20%
                let envelope = 1.0 - 0.8 * self.depth(v).clamp(0.0, 1.25);
                let shaped = self
                    .vsb
                    .as_mut()
                    .map(|f| f.process(Complex64::new(envelope, 0.0)))
                    .unwrap_or_else(|| Complex64::new(envelope, 0.0));
                let c = self.carrier();
                shaped * c
            }
            OutputMode::FmWide => {
                let m = 2.0 * self.depth(v) - 1.0;
                self.fm_phase += self.fm_sensitivity * m;
                if self.fm_phase > PI {
                    self.fm_phase -= 2.0 * PI;
                } else if self.fm_phase < -PI {
                    self.fm_phase += 2.0 * PI;
                }
                let c = self.carrier();
                Complex64::new(self.fm_phase.cos(), self.fm_phase.sin()) * c
            }
            OutputMode::Ssb => {
                let m = 2.0 * self.depth(v) - 1.0;
                let analytic = self.hilbert.as_mut().unwrap().process_sample(m);
                let c = self.carrier();
                analytic * c
            }
        }
    }

    /// Shape a block of composed baseband and hand it to the sink.
    pub fn process(&mut self, baseband: &[f64], sink: &mut dyn SampleSink) -> TvResult<()> {
        self.buf_i16.clear();
        self.buf_i8.clear();

        if self.output == OutputMode::BasebandReal {
            for &v in baseband {
                let s = (2.0 * self.depth(v) - 1.0) * self.gain;
                self.push_real(s);
            }
        } else {
            for &v in baseband {
                let iq = self.modulate_sample(v) * self.gain;
                self.push_real(iq.re);
                self.push_real(iq.im);
            }
        }

        match self.format {
            SampleFormat::I16 => sink.write_i16(&self.buf_i16),
            SampleFormat::I8 => sink.write_i8(&self.buf_i8),
        }
    }

    #[inline]
    fn push_real(&mut self, s: f64) {
        match self.format {
            SampleFormat::I16 => {
                self.buf_i16.push((s.clamp(-1.0, 1.0) * 32767.0) as i16);
            }
            SampleFormat::I8 => {
                self.buf_i8.push((s.clamp(-1.0, 1.0) * 127.0) as i8);
            }
        }
    }
}

/// A sink writing interleaved little-endian samples to any `Write`.
#[derive(Debug)]
pub struct WriterSink<W: Write> {
    writer: W,
    pub samples_written: u64,
}

impl<W: Write> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, samples_written: 0 }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> SampleSink for WriterSink<W> {
    fn write_i16(&mut self, samples: &[i16]) -> TvResult<()> {
        for &s in samples {
            self.writer.write_all(&s.to_le_bytes())?;
        }
        self.samples_written += samples.len() as u64;
        Ok(())
    }

    fn write_i8(&mut self, samples: &[i8]) -> TvResult<()> {
        for &s in samples {
            self.writer.write_all(&s.to_le_bytes())?;
        }
        self.samples_written += samples.len() as u64;
        Ok(())
    }
}
