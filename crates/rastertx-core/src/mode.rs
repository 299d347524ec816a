//! Television mode descriptors
//!
//! One immutable [`Mode`] per supported broadcast standard, created at
//! open time and shared (`Arc`) by the composer, the feed pipeline and
//! the modulator. A mode carries every timing, level and carrier constant
//! the rest of the pipeline needs, all derived exactly from rationals so
//! that the emitted sample count never drifts from the nominal raster.
//!
//! ## Line plans
//!
//! The composer holds no standard-specific code: [`Mode::line_plan`]
//! produces one [`LinePlan`] entry per line of the full frame, and the
//! composer simply executes the plan. Sync shapes are described by
//! [`SyncKind`] (what pulses the line carries) and [`ContentKind`]
//! (what fills the rest of the line).
//!
//! ## Example
//!
//! ```rust
//! use rastertx_core::mode::{Mode, ModeId};
//!
//! let mode = Mode::new(ModeId::PalI, 20_250_000).unwrap();
//! assert_eq!(mode.samples_per_line(), 1296);
//! assert_eq!(mode.lines_per_frame(), 625);
//! assert_eq!(mode.samples_per_frame(), 810_000);
//! ```

use crate::types::{Rational, TvError, TvResult};
use serde::{Deserialize, Serialize};

/// Supported television standards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModeId {
    /// 625-line PAL, System I (UK/Ireland): 6.0 MHz FM sound, NICAM
    PalI,
    /// 625-line PAL, System B/G (continental Europe): 5.5 MHz FM, A2, NICAM
    PalBg,
    /// 525-line NTSC, System M: 4.5 MHz FM sound
    NtscM,
    /// 625-line SECAM, System L (France): 6.5 MHz AM sound, NICAM
    SecamL,
    /// D-MAC: time-multiplexed components, duobinary data burst
    MacD,
    /// D2-MAC: as D-MAC with half-rate data burst
    MacD2,
}

impl ModeId {
    /// Parse the configuration string form (`pal-i`, `ntsc-m`, ...).
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pal-i" | "i" => Some(ModeId::PalI),
            "pal-b" | "pal-g" | "pal-bg" | "b" | "g" => Some(ModeId::PalBg),
            "ntsc-m" | "ntsc" | "m" => Some(ModeId::NtscM),
            "secam-l" | "secam" | "l" => Some(ModeId::SecamL),
            "mac-d" | "d-mac" => Some(ModeId::MacD),
            "mac-d2" | "d2-mac" => Some(ModeId::MacD2),
            _ => None,
        }
    }
}

/// Colour encoding family used on the active lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColourSystem {
    Pal,
    Ntsc,
    Secam,
    /// Time-multiplexed components; no subcarrier
    Mac,
}

/// Sync pulses carried by one line, at half-line resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncKind {
    /// One normal 4.7 µs pulse at the line start
    Normal,
    /// Equalising pulses at 0 and half-line
    EqEq,
    /// Equalising pulse, then broad pulse
    EqBroad,
    /// Broad pulse, then equalising pulse
    BroadEq,
    /// Two broad (field sync) pulses
    BroadBroad,
    /// Equalising pulse in the first half only
    EqNone,
}

/// What fills the line after sync and blanking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    /// Blanking level only
    Blank,
    /// Active picture
    Active,
    /// Active picture in the second half of the line only
    ActiveHalfEnd,
    /// Active picture in the first half, equalising pulse at half-line
    ActiveHalfEq,
    /// Teletext packet slot
    Teletext,
    /// Wide screen signalling
    Wss,
    /// Closed-caption data
    ClosedCaption,
    /// Conditional-access VBI data slot
    CaData,
}

/// One entry of the frame's line plan. `active_row`, when present, is the
/// frame-buffer row this line displays (already interleaved by field).
#[derive(Debug, Clone, Copy)]
pub struct LinePlan {
    pub sync: SyncKind,
    pub content: ContentKind,
    pub active_row: Option<u32>,
    /// Field index (0 or 1) this line belongs to
    pub field: u8,
}

/// Video levels in volts relative to blanking.
#[derive(Debug, Clone, Copy)]
pub struct Levels {
    pub sync: f64,
    pub blank: f64,
    pub black: f64,
    pub white: f64,
}

/// How a sound carrier modulates its programme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CarrierKind {
    /// FM mono: (L+R)/2
    FmMono,
    /// FM second carrier of an A2/Zweiton pair: R channel
    FmA2Right,
    /// AM mono (System L)
    AmMono,
}

/// One analogue sound subcarrier.
#[derive(Debug, Clone, Copy)]
pub struct AudioCarrier {
    pub frequency: f64,
    /// Peak deviation in Hz; unused for AM
    pub deviation: f64,
    /// Carrier amplitude relative to peak video
    pub amplitude: f64,
    pub kind: CarrierKind,
    /// Pre-emphasis time constant in microseconds (0 = none)
    pub preemphasis_us: f64,
}

/// NICAM-728 digital sound carrier placement.
#[derive(Debug, Clone, Copy)]
pub struct NicamCarrier {
    pub frequency: f64,
    pub amplitude: f64,
}

/// Chroma subcarrier constants for the QAM systems.
#[derive(Debug, Clone, Copy)]
pub struct ChromaCarrier {
    /// Subcarrier frequency as an exact rational in Hz
    pub frequency: Rational,
    /// Burst amplitude in volts (peak)
    pub burst_amplitude: f64,
    /// Burst start after sync leading edge, seconds
    pub burst_start: f64,
    /// Burst duration, seconds
    pub burst_width: f64,
}

/// SECAM FM chroma constants.
#[derive(Debug, Clone, Copy)]
pub struct SecamChroma {
    pub db_frequency: f64,
    pub dr_frequency: f64,
    pub db_deviation: f64,
    pub dr_deviation: f64,
    pub amplitude: f64,
}

/// An immutable television mode descriptor.
#[derive(Debug, Clone)]
pub struct Mode {
    id: ModeId,
    sample_rate: Rational,
    frame_rate: Rational,
    lines_per_frame: u32,
    samples_per_line: usize,
    colour: ColourSystem,
    levels: Levels,

    /* Timings in seconds, from the standards */
    sync_width: f64,
    eq_width: f64,
    broad_width: f64,
    active_left: f64,
    active_width: f64,
    /// Transition rise time for all pulse edges
    rise_time: f64,

    chroma: Option<ChromaCarrier>,
    secam: Option<SecamChroma>,
    audio: Vec<AudioCarrier>,
    nicam: Option<NicamCarrier>,

    /* VBI assignments, frame line numbers (1-based) */
    teletext_lines: Vec<u32>,
    wss_line: Option<u32>,
    cc_lines: Vec<u32>,
    ca_data_lines: Vec<u32>,
}

impl Mode {
    /// Build the descriptor for `id` at `sample_rate` Hz.
    ///
    /// Fails with `InvalidConfig` when the sample rate does not divide
    /// into an integer number of samples per line.
    pub fn new(id: ModeId, sample_rate: i64) -> TvResult<Self> {
        if sample_rate <= 0 {
            return Err(TvError::InvalidConfig(format!(
                "sample rate must be positive, got {sample_rate}"
            )));
        }
        let sample_rate = Rational::from_int(sample_rate);

        let (frame_rate, lines) = match id {
            ModeId::NtscM => (Rational::new(30_000, 1001), 525u32),
            _ => (Rational::new(25, 1), 625u32),
        };

        let spl = sample_rate
            .div(frame_rate)
            .div(Rational::from_int(lines as i64));
        if !spl.is_integer() {
            return Err(TvError::InvalidConfig(format!(
                "sample rate {sample_rate} does not give an integer number of \
                 samples per line ({spl} for {lines} lines at {frame_rate} fps)"
            )));
        }
        let samples_per_line = spl.num() as usize;

        let mut mode = match id {
            ModeId::PalI | ModeId::PalBg => Self {
                id,
                sample_rate,
                frame_rate,
                lines_per_frame: lines,
                samples_per_line,
                colour: ColourSystem::Pal,
                levels: Levels { sync: -0.3, blank: 0.0, black: 0.0, white: 0.7 },
                sync_width: 4.7e-6,
                eq_width: 2.35e-6,
                broad_width: 27.3e-6,
                active_left: 10.5e-6,
                active_width: 52.0e-6,
                rise_time: 0.2e-6,
                chroma: Some(ChromaCarrier {
                    frequency: Rational::new(17_734_475, 4),
                    burst_amplitude: 0.15,
                    burst_start: 5.6e-6,
                    burst_width: 2.26e-6,
                }),
                secam: None,
                audio: vec![],
                nicam: None,
                teletext_lines: ((7..=22).chain(320..=335)).collect(),
                wss_line: Some(23),
                cc_lines: vec![],
                ca_data_lines: vec![15, 16, 328, 329],
            },
            ModeId::SecamL => Self {
                id,
                sample_rate,
                frame_rate,
                lines_per_frame: lines,
                samples_per_line,
                colour: ColourSystem::Secam,
                levels: Levels { sync: -0.3, blank: 0.0, black: 0.0, white: 0.7 },
                sync_width: 4.7e-6,
                eq_width: 2.35e-6,
                broad_width: 27.3e-6,
                active_left: 10.5e-6,
                active_width: 52.0e-6,
                rise_time: 0.2e-6,
                chroma: None,
                secam: Some(SecamChroma {
                    db_frequency: 4_250_000.0,
                    dr_frequency: 4_406_250.0,
                    db_deviation: 230_000.0,
                    dr_deviation: 280_000.0,
                    amplitude: 0.115,
                }),
                audio: vec![],
                nicam: None,
                teletext_lines: ((7..=22).chain(320..=335)).collect(),
                wss_line: Some(23),
                cc_lines: vec![],
                ca_data_lines: vec![15, 16, 328, 329],
            },
            ModeId::NtscM => Self {
                id,
                sample_rate,
                frame_rate,
                lines_per_frame: lines,
                samples_per_line,
                colour: ColourSystem::Ntsc,
                levels: Levels { sync: -0.286, blank: 0.0, black: 0.0536, white: 0.714 },
                sync_width: 4.7e-6,
                eq_width: 2.3e-6,
                broad_width: 27.1e-6,
                active_left: 9.45e-6,
                active_width: 52.66e-6,
                rise_time: 0.14e-6,
                chroma: Some(ChromaCarrier {
                    frequency: Rational::new(39_375_000, 11),
                    burst_amplitude: 0.143,
                    burst_start: 5.3e-6,
                    burst_width: 2.51e-6,
                }),
                secam: None,
                audio: vec![],
                nicam: None,
                teletext_lines: vec![],
                wss_line: None,
                cc_lines: vec![21, 284],
                ca_data_lines: vec![],
            },
            ModeId::MacD | ModeId::MacD2 => Self {
                id,
                sample_rate,
                frame_rate,
                lines_per_frame: lines,
                samples_per_line,
                colour: ColourSystem::Mac,
                // MAC has no composite sync; levels bound the signal range
                levels: Levels { sync: -0.5, blank: 0.0, black: 0.0, white: 0.5 },
                sync_width: 0.0,
                eq_width: 0.0,
                broad_width: 0.0,
                active_left: 10.3e-6,
                active_width: 52.0e-6,
                rise_time: 0.1e-6,
                chroma: None,
                secam: None,
                audio: vec![],
                nicam: None,
                teletext_lines: vec![],
                wss_line: None,
                cc_lines: vec![],
                ca_data_lines: vec![],
            },
        };

        mode.audio = match id {
            ModeId::PalI => vec![AudioCarrier {
                frequency: 6.0e6,
                deviation: 50_000.0,
                amplitude: 0.19,
                kind: CarrierKind::FmMono,
                preemphasis_us: 50.0,
            }],
            ModeId::PalBg => vec![
                AudioCarrier {
                    frequency: 5.5e6,
                    deviation: 50_000.0,
                    amplitude: 0.19,
                    kind: CarrierKind::FmMono,
                    preemphasis_us: 50.0,
                },
                AudioCarrier {
                    frequency: 5.742_187_5e6,
                    deviation: 50_000.0,
                    amplitude: 0.095,
                    kind: CarrierKind::FmA2Right,
                    preemphasis_us: 50.0,
                },
            ],
            ModeId::NtscM => vec![AudioCarrier {
                frequency: 4.5e6,
                deviation: 25_000.0,
                amplitude: 0.15,
                kind: CarrierKind::FmMono,
                preemphasis_us: 75.0,
            }],
            ModeId::SecamL => vec![AudioCarrier {
                frequency: 6.5e6,
                deviation: 0.0,
                amplitude: 0.10,
                kind: CarrierKind::AmMono,
                preemphasis_us: 0.0,
            }],
            ModeId::MacD | ModeId::MacD2 => vec![],
        };

        mode.nicam = match id {
            ModeId::PalI => Some(NicamCarrier { frequency: 6.552e6, amplitude: 0.06 }),
            ModeId::PalBg | ModeId::SecamL => {
                Some(NicamCarrier { frequency: 5.85e6, amplitude: 0.06 })
            }
            _ => None,
        };

        Ok(mode)
    }

    pub fn id(&self) -> ModeId {
        self.id
    }

    pub fn sample_rate(&self) -> Rational {
        self.sample_rate
    }

    pub fn frame_rate(&self) -> Rational {
        self.frame_rate
    }

    pub fn lines_per_frame(&self) -> u32 {
        self.lines_per_frame
    }

    pub fn samples_per_line(&self) -> usize {
        self.samples_per_line
    }

    pub fn samples_per_frame(&self) -> usize {
        self.samples_per_line * self.lines_per_frame as usize
    }

    pub fn colour(&self) -> ColourSystem {
        self.colour
    }

    pub fn levels(&self) -> Levels {
        self.levels
    }

    pub fn chroma(&self) -> Option<&ChromaCarrier> {
        self.chroma.as_ref()
    }

    pub fn secam(&self) -> Option<&SecamChroma> {
        self.secam.as_ref()
    }

    pub fn audio_carriers(&self) -> &[AudioCarrier] {
        &self.audio
    }

    pub fn nicam(&self) -> Option<&NicamCarrier> {
        self.nicam.as_ref()
    }

    pub fn teletext_lines(&self) -> &[u32] {
        &self.teletext_lines
    }

    pub fn wss_line(&self) -> Option<u32> {
        self.wss_line
    }

    pub fn cc_lines(&self) -> &[u32] {
        &self.cc_lines
    }

    pub fn ca_data_lines(&self) -> &[u32] {
        &self.ca_data_lines
    }

    /// Convert a duration in seconds to a sample count at this mode's rate.
    pub fn seconds_to_samples(&self, t: f64) -> usize {
        (t * self.sample_rate.to_f64()).round() as usize
    }

    /// Number of frame-buffer rows carried by the active region.
    pub fn active_lines(&self) -> u32 {
        match self.lines_per_frame {
            625 => 576,
            _ => 480,
        }
    }

    /// Active region width in samples.
    pub fn active_width_samples(&self) -> usize {
        self.seconds_to_samples(self.active_width)
    }

    /// Active region start offset in samples from the sync leading edge.
    pub fn active_left_samples(&self) -> usize {
        self.seconds_to_samples(self.active_left)
    }

    pub fn sync_width_samples(&self) -> usize {
        self.seconds_to_samples(self.sync_width)
    }

    pub fn eq_width_samples(&self) -> usize {
        self.seconds_to_samples(self.eq_width)
    }

    pub fn broad_width_samples(&self) -> usize {
        self.seconds_to_samples(self.broad_width)
    }

    pub fn rise_samples(&self) -> usize {
        self.seconds_to_samples(self.rise_time).max(1)
    }

    /// Lines in the first field (the larger half for odd line counts).
    pub fn lines_per_field(&self) -> u32 {
        self.lines_per_frame.div_ceil(2)
    }

    /// Build the per-line plan for one full frame.
    ///
    /// Index 0 of the result is frame line 1. Active rows interleave the
    /// two fields: field 1 carries even frame-buffer rows, field 2 odd.
    pub fn line_plan(&self) -> Vec<LinePlan> {
        match self.lines_per_frame {
            625 => self.line_plan_625(),
            _ => self.line_plan_525(),
        }
    }

    fn classify_vbi(&self, line: u32) -> Option<ContentKind> {
        if self.ca_data_lines.contains(&line) {
            Some(ContentKind::CaData)
        } else if self.teletext_lines.contains(&line) {
            Some(ContentKind::Teletext)
        } else if self.wss_line == Some(line) {
            Some(ContentKind::Wss)
        } else if self.cc_lines.contains(&line) {
            Some(ContentKind::ClosedCaption)
        } else {
            None
        }
    }

    fn line_plan_625(&self) -> Vec<LinePlan> {
        let mut plan = Vec::with_capacity(625);
        let mut f1_row = 0u32;
        let mut f2_row = 1u32;
        for line in 1..=625u32 {
            let field = u8::from(line > 313);
            let (sync, mut content) = match line {
                1..=2 => (SyncKind::BroadBroad, ContentKind::Blank),
                3 => (SyncKind::BroadEq, ContentKind::Blank),
                4..=5 => (SyncKind::EqEq, ContentKind::Blank),
                6..=22 => (SyncKind::Normal, ContentKind::Blank),
                23 => (SyncKind::Normal, ContentKind::ActiveHalfEnd),
                24..=310 => (SyncKind::Normal, ContentKind::Active),
                311..=312 => (SyncKind::EqEq, ContentKind::Blank),
                313 => (SyncKind::EqBroad, ContentKind::Blank),
                314..=315 => (SyncKind::BroadBroad, ContentKind::Blank),
                316..=317 => (SyncKind::EqEq, ContentKind::Blank),
                318 => (SyncKind::EqNone, ContentKind::Blank),
                319..=335 => (SyncKind::Normal, ContentKind::Blank),
                336..=622 => (SyncKind::Normal, ContentKind::Active),
                623 => (SyncKind::Normal, ContentKind::ActiveHalfEq),
                _ => (SyncKind::EqEq, ContentKind::Blank),
            };
            if let Some(vbi) = self.classify_vbi(line) {
                content = vbi;
            }
            let active_row = match content {
                ContentKind::Active | ContentKind::ActiveHalfEnd | ContentKind::ActiveHalfEq => {
                    if field == 0 {
                        let r = f1_row;
                        f1_row += 2;
                        Some(r)
                    } else {
                        let r = f2_row;
                        f2_row += 2;
                        Some(r)
                    }
                }
                _ => None,
            };
            plan.push(LinePlan { sync, content, active_row, field });
        }
        plan
    }

    fn line_plan_525(&self) -> Vec<LinePlan> {
        let mut plan = Vec::with_capacity(525);
        let mut f1_row = 0u32;
        let mut f2_row = 1u32;
        for line in 1..=525u32 {
            let field = u8::from(line > 263);
            let (sync, mut content) = match line {
                1..=3 => (SyncKind::EqEq, ContentKind::Blank),
                4..=6 => (SyncKind::BroadBroad, ContentKind::Blank),
                7..=9 => (SyncKind::EqEq, ContentKind::Blank),
                10..=21 => (SyncKind::Normal, ContentKind::Blank),
                22..=262 => (SyncKind::Normal, ContentKind::Active),
                263 => (SyncKind::Normal, ContentKind::ActiveHalfEq),
                264..=265 => (SyncKind::EqEq, ContentKind::Blank),
                266 => (SyncKind::EqBroad, ContentKind::Blank),
                267..=268 => (SyncKind::BroadBroad, ContentKind::Blank),
                269..=270 => (SyncKind::EqEq, ContentKind::Blank),
                271 => (SyncKind::EqNone, ContentKind::Blank),
                272..=284 => (SyncKind::Normal, ContentKind::Blank),
                _ => (SyncKind::Normal, ContentKind::Active),
            };
            if let Some(vbi) = self.classify_vbi(line) {
                content = vbi;
            }
            let active_row = match content {
                ContentKind::Active | ContentKind::ActiveHalfEnd | ContentKind::ActiveHalfEq => {
                    if field == 0 {
                        let r = f1_row;
                        f1_row += 2;
                        Some(r)
                    } else {
                        let r = f2_row;
                        f2_row += 2;
                        Some(r)
                    }
                }
                _ => None,
            };
            plan.push(LinePlan { sync, content, active_row, field });
        }
        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_pal_i_frame_timing() {
        let mode = Mode::new(ModeId::PalI, 20_250_000).unwrap();
        assert_eq!(mode.samples_per_line(), 1296);
        assert_eq!(mode.lines_per_frame(), 625);
        assert_eq!(mode.samples_per_frame(), 810_000);
        // Exactly 20_250_000 samples per second
        let per_sec = mode.samples_per_frame() as i64 * mode.frame_rate().num()
            / mode.frame_rate().den();
        assert_eq!(per_sec, 20_250_000);
    }

    #[test]
    fn test_ntsc_rec601_rate() {
        let mode = Mode::new(ModeId::NtscM, 13_500_000).unwrap();
        assert_eq!(mode.samples_per_line(), 858);
        assert_eq!(mode.lines_per_frame(), 525);
    }

    #[test]
    fn test_non_integer_line_rejected() {
        // 1 MHz over 625 lines at 25 fps gives 64 samples/line: fine
        assert!(Mode::new(ModeId::PalI, 1_000_000).is_ok());
        // 1.0001 MHz does not divide
        assert!(matches!(
            Mode::new(ModeId::PalI, 1_000_100),
            Err(TvError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_pal_subcarrier_exact() {
        let mode = Mode::new(ModeId::PalI, 20_250_000).unwrap();
        let fsc = mode.chroma().unwrap().frequency;
        assert_relative_eq!(fsc.to_f64(), 4_433_618.75, epsilon = 1e-6);
    }

    #[test]
    fn test_line_plan_625_structure() {
        let mode = Mode::new(ModeId::PalI, 20_250_000).unwrap();
        let plan = mode.line_plan();
        assert_eq!(plan.len(), 625);
        // Field sync at the frame start
        assert_eq!(plan[0].sync, SyncKind::BroadBroad);
        assert_eq!(plan[2].sync, SyncKind::BroadEq);
        // Teletext appears on the assigned lines
        assert_eq!(plan[6].content, ContentKind::Teletext);
        // Line 23 carries WSS
        assert_eq!(plan[22].content, ContentKind::Wss);
        // CA data slots
        assert_eq!(plan[14].content, ContentKind::CaData);

        // 287 full active lines per field plus the two half lines
        let f1_active = plan
            .iter()
            .filter(|p| p.field == 0 && p.content == ContentKind::Active)
            .count();
        let f2_active = plan
            .iter()
            .filter(|p| p.field == 1 && p.content == ContentKind::Active)
            .count();
        assert_eq!(f1_active, 287);
        assert_eq!(f2_active, 287);
    }

    #[test]
    fn test_line_plan_rows_interleave() {
        let mode = Mode::new(ModeId::PalI, 20_250_000).unwrap();
        let plan = mode.line_plan();
        // Field 1 displays even rows, field 2 odd rows, both increasing
        let f1: Vec<u32> = plan
            .iter()
            .filter(|p| p.field == 0)
            .filter_map(|p| p.active_row)
            .collect();
        let f2: Vec<u32> = plan
            .iter()
            .filter(|p| p.field == 1)
            .filter_map(|p| p.active_row)
            .collect();
        assert!(f1.iter().all(|r| r % 2 == 0));
        assert!(f2.iter().all(|r| r % 2 == 1));
        assert!(f1.windows(2).all(|w| w[1] == w[0] + 2));
        assert_eq!(f2[0], 1);
    }

    #[test]
    fn test_mode_id_parse() {
        assert_eq!(ModeId::parse("pal-i"), Some(ModeId::PalI));
        assert_eq!(ModeId::parse("ntsc"), Some(ModeId::NtscM));
        assert_eq!(ModeId::parse("mac-d2"), Some(ModeId::MacD2));
        assert_eq!(ModeId::parse("atsc"), None);
    }
}
