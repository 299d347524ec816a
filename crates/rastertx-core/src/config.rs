//! Pipeline configuration
//!
//! Every knob of a transmission, as a plain serde struct. The binary
//! front-end (out of scope here) maps command-line flags onto this; the
//! library validates it once at open and the pieces read what they need.

use crate::mode::ModeId;
use crate::types::{TvError, TvResult};
use crate::vbi::WssMode;
use serde::{Deserialize, Serialize};

/// Where the finished samples go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputType {
    #[default]
    File,
    HackRf,
    Fl2k,
}

/// Output sample width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SampleFormat {
    #[default]
    I16,
    I8,
}

/// Full transmission configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Television standard
    pub mode: ModeId,
    /// RF centre frequency in Hz; 0 selects baseband output
    pub frequency: u64,
    /// Output sample rate in Hz
    pub sample_rate: i64,
    /// Output gain in dB
    pub gain: f64,
    pub output_type: OutputType,
    pub sample_format: SampleFormat,
    /// Directory of `.tti` teletext pages
    pub teletext: Option<String>,
    /// Render subtitles onto the picture (stream index, -1 = first)
    pub subtitles: Option<i32>,
    /// Transmit subtitles as teletext page 888 (stream index)
    pub tx_subtitles: Option<i32>,
    /// Path of a pre-rasterized logo overlay
    pub logo: Option<String>,
    /// Overlay the source timestamp
    pub timestamp: bool,
    /// Start position in minutes
    pub position: u32,
    pub letterbox: bool,
    pub pillarbox: bool,
    /// Mix stereo down to mono
    pub downmix: bool,
    /// Audio volume multiplier
    pub volume: f64,
    pub wss: WssMode,
    /// Scrambler selector: none, vc-sky-07, vc-xtea, syster, d11, ...
    pub scrambler: String,
    /// Opaque mode-specific key selector
    pub key: Option<String>,
    /// Encoding gamma applied to the source picture
    pub gamma: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: ModeId::PalI,
            frequency: 0,
            sample_rate: 20_250_000,
            gain: 0.0,
            output_type: OutputType::File,
            sample_format: SampleFormat::I16,
            teletext: None,
            subtitles: None,
            tx_subtitles: None,
            logo: None,
            timestamp: false,
            position: 0,
            letterbox: false,
            pillarbox: false,
            downmix: false,
            volume: 1.0,
            wss: WssMode::Auto,
            scrambler: "none".into(),
            key: None,
            gamma: 1.2,
        }
    }
}

impl Config {
    pub fn with_mode(mut self, mode: ModeId) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_sample_rate(mut self, rate: i64) -> Self {
        self.sample_rate = rate;
        self
    }

    pub fn with_frequency(mut self, frequency: u64) -> Self {
        self.frequency = frequency;
        self
    }

    pub fn with_scrambler(mut self, selector: &str) -> Self {
        self.scrambler = selector.into();
        self
    }

    /// Sanity-check the combination before anything is allocated.
    pub fn validate(&self) -> TvResult<()> {
        if self.sample_rate <= 0 {
            return Err(TvError::InvalidConfig("sample rate must be positive".into()));
        }
        if !(0.0..=10.0).contains(&self.volume) {
            return Err(TvError::InvalidConfig(format!(
                "volume {} out of range 0..10",
                self.volume
            )));
        }
        if self.letterbox && self.pillarbox {
            return Err(TvError::InvalidConfig(
                "letterbox and pillarbox are mutually exclusive".into(),
            ));
        }
        if self.gamma <= 0.0 {
            return Err(TvError::InvalidConfig("gamma must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_builder_chain() {
        let cfg = Config::default()
            .with_mode(ModeId::NtscM)
            .with_sample_rate(13_500_000)
            .with_scrambler("vc-sky-07");
        assert_eq!(cfg.mode, ModeId::NtscM);
        assert_eq!(cfg.scrambler, "vc-sky-07");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_conflicting_framing_rejected() {
        let cfg = Config {
            letterbox: true,
            pillarbox: true,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_bad_volume_rejected() {
        let cfg = Config { volume: -1.0, ..Default::default() };
        assert!(cfg.validate().is_err());
    }
}
