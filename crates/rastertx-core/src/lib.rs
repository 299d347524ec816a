//! # rastertx core
//!
//! Baseband synthesis of analogue television: a frame-rate-locked line
//! composer walks every scanline of every field, multiplexing sync,
//! colour burst, active picture, teletext, VBI data, conditional-access
//! scrambling and sound subcarriers into a continuous sample stream,
//! which the output shaper converts to real or I/Q samples for an SDR
//! sink.
//!
//! ## Signal flow
//!
//! ```text
//! MediaSource ──▶ Composer ──▶ IqModulator ──▶ SampleSink
//!  (frames,        (lines,       (VSB / FM /     (file, SDR)
//!   audio)          carriers)     SSB, i16/i8)
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rastertx_core::config::Config;
//! use rastertx_core::composer::Composer;
//! use rastertx_core::mode::{Mode, ModeId};
//! use rastertx_core::modulator::{IqModulator, OutputMode, WriterSink};
//! use rastertx_core::scramble::Scrambler;
//!
//! # fn open_source() -> Box<dyn rastertx_core::source::MediaSource> { unimplemented!() }
//! let config = Config::default().with_mode(ModeId::PalI);
//! let mode = Arc::new(Mode::new(config.mode, config.sample_rate)?);
//! let scrambler = Scrambler::from_config(&config.scrambler, config.key.as_deref(),
//!     config.sample_rate as f64)?;
//! let mut composer = Composer::new(mode.clone(), open_source(), &config, None, scrambler)?;
//! let mut modulator = IqModulator::new(&mode, OutputMode::BasebandReal, 0.0,
//!     config.gain, config.sample_format);
//! let mut sink = WriterSink::new(std::fs::File::create("out.raw")?);
//!
//! let mut buf = vec![0.0f64; 16384];
//! loop {
//!     let n = composer.fill(&mut buf)?;
//!     modulator.process(&buf[..n], &mut sink)?;
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod colour;
pub mod composer;
pub mod config;
pub mod fir;
pub mod mac;
pub mod mode;
pub mod modulator;
pub mod nco;
pub mod nicam;
pub mod overlay;
pub mod scramble;
pub mod sound;
pub mod source;
pub mod teletext;
pub mod types;
pub mod vbi;

pub use composer::Composer;
pub use config::Config;
pub use mode::{Mode, ModeId};
pub use types::{IQSample, Rational, Sample, TvError, TvResult};
