//! Analogue sound subcarriers
//!
//! Mixes every sound service of the selected mode into the composed
//! line: FM mono, the second FM carrier of an A2/Zweiton pair, AM sound
//! (System L) and the NICAM-728 DQPSK carrier. Input audio arrives as
//! 32 kHz interleaved stereo from the feed pipeline; each analogue path
//! pre-emphasises at 32 kHz, then a polyphase resampler raises the
//! programme to the video sample rate where the carrier is generated.
//!
//! All oscillators are phase continuous across line boundaries — the
//! composer calls [`SoundMixer::mix_into`] once per line and the carrier
//! state simply carries over.

use crate::fir::RationalResampler;
use crate::mode::{CarrierKind, Mode};
use crate::nco::FmSubcarrier;
use crate::nicam::NicamModulator;
use crate::types::Rational;
use std::collections::VecDeque;
use std::f64::consts::PI;

/// Audio input rate fixed by the upstream resampler.
pub const AUDIO_RATE: i64 = 32_000;

/// Single-pole 50/75 µs pre-emphasis at the audio rate.
#[derive(Debug, Clone)]
struct Preemphasis {
    lp: f64,
    alpha: f64,
    enabled: bool,
}

impl Preemphasis {
    fn new(tau_us: f64, sample_rate: f64) -> Self {
        if tau_us <= 0.0 {
            return Self { lp: 0.0, alpha: 0.0, enabled: false };
        }
        let rc = tau_us * 1e-6;
        let alpha = 1.0 / (1.0 + rc * sample_rate);
        Self { lp: 0.0, alpha, enabled: true }
    }

    #[inline]
    fn process(&mut self, x: f64) -> f64 {
        if !self.enabled {
            return x;
        }
        self.lp += self.alpha * (x - self.lp);
        // Boost everything above the corner, unity at DC
        x + (x - self.lp)
    }
}

/// One analogue carrier path: programme selection, pre-emphasis,
/// resampling and the carrier itself.
#[derive(Debug)]
struct CarrierPath {
    kind: CarrierKind,
    amplitude: f64,
    fm: Option<FmSubcarrier>,
    /// AM carrier phase increment, when `kind` is AM
    am_phase: f64,
    am_inc: f64,
    preemph: Preemphasis,
    resampler: RationalResampler,
    /// Programme at the video rate, pending mixing
    pending: VecDeque<f64>,
    /// Programme at 32 kHz awaiting resampling
    input: Vec<f64>,
}

impl CarrierPath {
    #[inline]
    fn carrier_sample(&mut self, programme: f64) -> f64 {
        if let Some(fm) = self.fm.as_mut() {
            fm.step(programme)
        } else {
            // AM with 85% depth, positive modulation
            let s = self.amplitude * (1.0 + 0.85 * programme) * self.am_phase.cos();
            self.am_phase += self.am_inc;
            if self.am_phase > PI {
                self.am_phase -= 2.0 * PI;
            }
            s
        }
    }
}

/// The per-mode sound subsystem.
#[derive(Debug)]
pub struct SoundMixer {
    paths: Vec<CarrierPath>,
    nicam: Option<NicamModulator>,
    volume: f64,
    downmix: bool,
}

impl SoundMixer {
    /// Build every carrier of `mode` for the given output sample rate.
    pub fn new(mode: &Mode, volume: f64, downmix: bool) -> Self {
        let fs = mode.sample_rate().to_f64();
        let ratio = mode.sample_rate().div(Rational::from_int(AUDIO_RATE));
        let (up, down) = (ratio.num() as usize, ratio.den() as usize);

        let paths = mode
            .audio_carriers()
            .iter()
            .map(|c| CarrierPath {
                kind: c.kind,
                amplitude: c.amplitude,
                fm: match c.kind {
                    CarrierKind::AmMono => None,
                    _ => Some(FmSubcarrier::new(c.frequency, c.deviation, fs, c.amplitude)),
                },
                am_phase: 0.0,
                am_inc: 2.0 * PI * c.frequency / fs,
                preemph: Preemphasis::new(c.preemphasis_us, AUDIO_RATE as f64),
                resampler: RationalResampler::new(up, down, 8),
                pending: VecDeque::new(),
                input: Vec::new(),
            })
            .collect();

        let nicam = mode
            .nicam()
            .map(|carrier| NicamModulator::new(carrier, fs));

        Self {
            paths,
            nicam,
            volume,
            downmix,
        }
    }

    /// True when the mode carries any sound service at all.
    pub fn is_active(&self) -> bool {
        !self.paths.is_empty() || self.nicam.is_some()
    }

    /// Queue a block of decoded 32 kHz interleaved stereo audio.
    pub fn push_audio(&mut self, samples: &[i16]) {
        for path in self.paths.iter_mut() {
            for pair in samples.chunks_exact(2) {
                let l = pair[0] as f64 / 32768.0 * self.volume;
                let r = pair[1] as f64 / 32768.0 * self.volume;
                let programme = match path.kind {
                    CarrierKind::FmA2Right if !self.downmix => r,
                    _ => (l + r) * 0.5,
                };
                let p = path.preemph.process(programme);
                path.input.push(p.clamp(-1.0, 1.0));
            }
        }
        if let Some(nicam) = self.nicam.as_mut() {
            nicam.push_audio(samples);
        }
    }

    /// Add every carrier's contribution over the next `line.len()`
    /// output samples.
    pub fn mix_into(&mut self, line: &mut [f64]) {
        let n = line.len();
        for path in self.paths.iter_mut() {
            // Resample whatever input we hold; top up with silence if the
            // feed has fallen behind so the carrier never stops.
            if !path.input.is_empty() {
                let input = std::mem::take(&mut path.input);
                let mut out = Vec::new();
                path.resampler.process(&input, &mut out);
                path.pending.extend(out);
            }
            for s in line.iter_mut().take(n) {
                let programme = path.pending.pop_front().unwrap_or(0.0);
                *s += path.carrier_sample(programme);
            }
        }
        if let Some(nicam) = self.nicam.as_mut() {
            for s in line.iter_mut() {
                *s += nicam.next_sample();
            }
        }
    }

    /// Queued audio at the video rate, smallest of all paths, in samples.
    pub fn buffered(&self) -> usize {
        self.paths
            .iter()
            .map(|p| p.pending.len())
            .min()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::{Mode, ModeId};

    fn mode() -> Mode {
        Mode::new(ModeId::PalI, 20_250_000).unwrap()
    }

    #[test]
    fn test_mixer_builds_mode_carriers() {
        let m = SoundMixer::new(&mode(), 1.0, false);
        assert!(m.is_active());
        assert_eq!(m.paths.len(), 1); // System I: one FM carrier
        assert!(m.nicam.is_some());
    }

    #[test]
    fn test_mix_into_is_additive() {
        let mut m = SoundMixer::new(&mode(), 1.0, false);
        m.push_audio(&[8000i16; 256]);
        let mut line = vec![0.5f64; 1296];
        m.mix_into(&mut line);
        // Video level survives; sound is a small superimposed carrier
        let avg: f64 = line.iter().sum::<f64>() / line.len() as f64;
        assert!((avg - 0.5).abs() < 0.1, "carriers shifted the DC level: {avg}");
        assert!(line.iter().any(|&s| (s - 0.5).abs() > 1e-4));
    }

    #[test]
    fn test_silence_keeps_carrier_running() {
        let mut m = SoundMixer::new(&mode(), 1.0, false);
        let mut line = vec![0.0f64; 1296];
        m.mix_into(&mut line);
        // Unmodulated FM carrier is still present
        let power: f64 = line.iter().map(|s| s * s).sum::<f64>() / line.len() as f64;
        assert!(power > 1e-4, "carrier missing on silence: {power}");
    }

    #[test]
    fn test_a2_pair_on_pal_bg() {
        let mode = Mode::new(ModeId::PalBg, 20_250_000).unwrap();
        let m = SoundMixer::new(&mode, 1.0, false);
        assert_eq!(m.paths.len(), 2);
        assert!(m.paths.iter().any(|p| p.kind == CarrierKind::FmA2Right));
    }

    #[test]
    fn test_am_sound_on_secam_l() {
        let mode = Mode::new(ModeId::SecamL, 20_250_000).unwrap();
        let mut m = SoundMixer::new(&mode, 1.0, false);
        assert!(m.paths.iter().all(|p| p.fm.is_none()));
        let mut line = vec![0.0f64; 1296];
        m.mix_into(&mut line);
        let peak = line.iter().fold(0.0f64, |a, &b| a.max(b.abs()));
        assert!(peak > 0.05 && peak < 0.25, "AM carrier peak out of range: {peak}");
    }
}
