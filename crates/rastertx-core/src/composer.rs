//! Line composer and field scheduler
//!
//! The master state machine of the transmitter. The sample sink pulls;
//! the composer fills from its current line buffer and, whenever that
//! runs dry, composes the next line of the raster according to the
//! mode's line plan:
//!
//! 1. at the top of each frame, fetch the next video frame and one
//!    frame period's worth of audio from the media source,
//! 2. draw the line's sync pulses with shaped edges,
//! 3. project the frame row into sample space, matrix to luma and
//!    chroma, modulate the colour subcarrier (phase absolute to line 1
//!    field 1),
//! 4. override with VBI payloads (teletext, WSS, closed captions,
//!    conditional-access data) where the plan says so,
//! 5. hand the active region to the scrambler,
//! 6. superimpose the sound subcarriers.
//!
//! The composer runs on the caller's thread and holds no locks; its only
//! suspension points are inside the media source's double-buffer flips.

use crate::colour::{rgb_to_secam, rgb_to_yuv, GammaLut, QamChroma, SecamFmChroma};
use crate::config::Config;
use crate::mac::MacEncoder;
use crate::mode::{ColourSystem, ContentKind, LinePlan, Mode, SyncKind};
use crate::scramble::Scrambler;
use crate::sound::SoundMixer;
use crate::source::{MediaSource, VideoFrame};
use crate::teletext::TeletextService;
use crate::types::{TvError, TvResult};
use crate::vbi::{self, WssAspect, WssMode};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::f64::consts::PI;
use std::sync::Arc;

/// Teletext bit rate for 625-line systems.
const TELETEXT_RATE_625: f64 = 6_937_500.0;
/// Teletext data start after the sync leading edge.
const TELETEXT_START: f64 = 12.0e-6;
/// WSS waveform start.
const WSS_START: f64 = 11.0e-6;
/// Closed-caption waveform start.
const CC_START: f64 = 10.5e-6;

pub struct Composer {
    mode: Arc<Mode>,
    plan: Vec<LinePlan>,
    source: Box<dyn MediaSource>,
    sound: SoundMixer,
    teletext: Option<TeletextService>,
    scrambler: Scrambler,
    qam: Option<QamChroma>,
    secam: Option<SecamFmChroma>,
    mac: Option<MacEncoder>,
    gamma: GammaLut,
    wss_mode: WssMode,
    tx_subtitles: bool,
    last_subtitle: String,
    rng: StdRng,

    /* Raster state: the composer's resume point */
    line_index: usize,
    sample_pos: usize,
    absolute_line: u64,
    frame_count: u64,
    current_field: u8,

    line_buf: Vec<f64>,
    /// Cosine edge ramp, 0..1 over the mode's rise time
    ramp: Vec<f64>,

    frame: Option<Arc<VideoFrame>>,
    video_eof: bool,
    audio_eof: bool,
    finished: bool,
}

impl Composer {
    /// Open a composer for `mode`, pulling media from `source`.
    pub fn new(
        mode: Arc<Mode>,
        source: Box<dyn MediaSource>,
        config: &Config,
        teletext: Option<TeletextService>,
        scrambler: Scrambler,
    ) -> TvResult<Self> {
        config.validate()?;
        let spl = mode.samples_per_line();
        let plan = mode.line_plan();

        let qam = match mode.colour() {
            ColourSystem::Pal => mode
                .chroma()
                .map(|c| QamChroma::new(c, mode.sample_rate(), true)),
            ColourSystem::Ntsc => mode
                .chroma()
                .map(|c| QamChroma::new(c, mode.sample_rate(), false)),
            _ => None,
        };
        let secam = mode
            .secam()
            .map(|p| SecamFmChroma::new(*p, mode.sample_rate().to_f64()));
        let mac = match mode.colour() {
            ColourSystem::Mac => Some(MacEncoder::new(
                mode.id() == crate::mode::ModeId::MacD2,
            )),
            _ => None,
        };

        let rise = mode.rise_samples();
        let ramp: Vec<f64> = (0..rise)
            .map(|i| 0.5 - 0.5 * (PI * (i as f64 + 0.5) / rise as f64).cos())
            .collect();

        let sound = SoundMixer::new(&mode, config.volume, config.downmix);

        tracing::info!(
            "composer: {:?}, {} samples/line, {} lines/frame",
            mode.id(),
            spl,
            mode.lines_per_frame()
        );

        Ok(Self {
            plan,
            source,
            sound,
            teletext,
            scrambler,
            qam,
            secam,
            mac,
            gamma: GammaLut::new(config.gamma),
            wss_mode: config.wss,
            tx_subtitles: config.tx_subtitles.is_some(),
            last_subtitle: String::new(),
            rng: StdRng::from_entropy(),
            line_index: 0,
            sample_pos: spl, // force a line generation on first fill
            absolute_line: 0,
            frame_count: 0,
            current_field: u8::MAX,
            line_buf: vec![0.0; spl],
            ramp,
            frame: None,
            video_eof: false,
            audio_eof: false,
            finished: false,
            mode,
        })
    }

    pub fn mode(&self) -> &Mode {
        &self.mode
    }

    pub fn frames_composed(&self) -> u64 {
        self.frame_count
    }

    /// Pull interface: fill `out` with baseband samples. Returns the
    /// number written, or `EndOfStream` once both media streams have
    /// ended and the last line has drained.
    pub fn fill(&mut self, out: &mut [f64]) -> TvResult<usize> {
        let mut written = 0;
        while written < out.len() {
            if self.sample_pos >= self.line_buf.len() {
                match self.generate_line() {
                    Ok(()) => {}
                    Err(TvError::EndOfStream) if written > 0 => {
                        self.finished = true;
                        return Ok(written);
                    }
                    Err(e) => return Err(e),
                }
            }
            let n = (out.len() - written).min(self.line_buf.len() - self.sample_pos);
            out[written..written + n]
                .copy_from_slice(&self.line_buf[self.sample_pos..self.sample_pos + n]);
            self.sample_pos += n;
            written += n;
        }
        Ok(written)
    }

    fn begin_frame(&mut self) -> TvResult<()> {
        self.scrambler.begin_frame(&mut self.rng);
        if let Some(tt) = self.teletext.as_mut() {
            tt.tick_frame();
        }

        // Refresh the teletext subtitle page only when the text changes
        if self.tx_subtitles && self.teletext.is_some() {
            if let Some(text) = self.source.subtitle_text() {
                if text != self.last_subtitle {
                    self.teletext.as_mut().unwrap().update_subtitle(&text);
                    self.last_subtitle = text;
                }
            }
        }

        if !self.video_eof {
            match self.source.read_video()? {
                Some(f) => self.frame = Some(f),
                None => {
                    tracing::debug!("composer: video stream ended");
                    self.video_eof = true;
                }
            }
        }
        if !self.audio_eof {
            match self.source.read_audio()? {
                Some(block) => {
                    self.sound.push_audio(&block.samples);
                    if let Some(mac) = self.mac.as_mut() {
                        mac.push_audio(&block.samples);
                    }
                }
                None => {
                    tracing::debug!("composer: audio stream ended");
                    self.audio_eof = true;
                }
            }
        }

        if self.video_eof && self.audio_eof {
            return Err(TvError::EndOfStream);
        }
        self.frame_count += 1;
        Ok(())
    }

    fn generate_line(&mut self) -> TvResult<()> {
        if self.finished {
            return Err(TvError::EndOfStream);
        }
        if self.line_index == 0 {
            self.begin_frame()?;
        }
        let plan = self.plan[self.line_index];
        if plan.field != self.current_field {
            self.current_field = plan.field;
            self.scrambler.begin_field();
        }
        self.scrambler.begin_line();

        let blank = self.mode.levels().blank;
        self.line_buf.iter_mut().for_each(|s| *s = blank);

        if self.mac.is_some() {
            self.render_mac_line(plan);
        } else {
            self.draw_sync(plan.sync);
            match plan.content {
                ContentKind::Blank => {}
                ContentKind::Active
                | ContentKind::ActiveHalfEnd
                | ContentKind::ActiveHalfEq => self.render_active(plan),
                ContentKind::Teletext => self.render_teletext(),
                ContentKind::Wss => self.render_wss(),
                ContentKind::ClosedCaption => self.render_cc(),
                ContentKind::CaData => self.render_ca_data(),
            }
            self.draw_burst(plan);

            if matches!(
                plan.content,
                ContentKind::Active | ContentKind::ActiveHalfEnd | ContentKind::ActiveHalfEq
            ) {
                let start = self.mode.active_left_samples();
                let end = start + self.mode.active_width_samples();
                self.scrambler
                    .apply(&mut self.line_buf, start, end, self.absolute_line);
            }
        }

        self.sound.mix_into(&mut self.line_buf);

        self.absolute_line += 1;
        self.line_index += 1;
        if self.line_index >= self.plan.len() {
            self.line_index = 0;
        }
        self.sample_pos = 0;
        Ok(())
    }

    /* ---- sync shaping ---- */

    fn draw_pulse(&mut self, start: usize, width: usize) {
        let spl = self.line_buf.len();
        let level = self.mode.levels().sync;
        let blank = self.mode.levels().blank;
        let r = self.ramp.len();
        let end = (start + width).min(spl);
        for x in start..end {
            self.line_buf[x] = level;
        }
        // Shaped edges riding over the plateau boundaries
        for i in 0..r {
            let lead = start + i;
            if lead < spl {
                self.line_buf[lead] = blank + (level - blank) * self.ramp[i];
            }
            let trail = end.saturating_sub(r) + i;
            if trail < end {
                self.line_buf[trail] = level + (blank - level) * self.ramp[i];
            }
        }
    }

    fn draw_sync(&mut self, kind: SyncKind) {
        let half = self.line_buf.len() / 2;
        let sync = self.mode.sync_width_samples();
        let eq = self.mode.eq_width_samples();
        let broad = self.mode.broad_width_samples();
        match kind {
            SyncKind::Normal => self.draw_pulse(0, sync),
            SyncKind::EqEq => {
                self.draw_pulse(0, eq);
                self.draw_pulse(half, eq);
            }
            SyncKind::EqBroad => {
                self.draw_pulse(0, eq);
                self.draw_pulse(half, broad);
            }
            SyncKind::BroadEq => {
                self.draw_pulse(0, broad);
                self.draw_pulse(half, eq);
            }
            SyncKind::BroadBroad => {
                self.draw_pulse(0, broad);
                self.draw_pulse(half, broad);
            }
            SyncKind::EqNone => self.draw_pulse(0, eq),
        }
    }

    fn draw_burst(&mut self, plan: LinePlan) {
        if plan.sync != SyncKind::Normal {
            return;
        }
        let (start, width) = match self.mode.chroma() {
            Some(c) => (
                self.mode.seconds_to_samples(c.burst_start),
                self.mode.seconds_to_samples(c.burst_width),
            ),
            None => return,
        };
        let Some(qam) = self.qam.as_mut() else { return };

        qam.begin_line(self.absolute_line);
        qam.seek(self.absolute_line * self.line_buf.len() as u64 + start as u64);
        for x in start..(start + width).min(self.line_buf.len()) {
            self.line_buf[x] += qam.burst();
        }
    }

    /* ---- active picture ---- */

    /// Sample range of this line's picture content, relative to the line.
    fn active_range(&self, content: ContentKind) -> (usize, usize) {
        let start = self.mode.active_left_samples();
        let end = start + self.mode.active_width_samples();
        let half = self.line_buf.len() / 2;
        match content {
            ContentKind::ActiveHalfEnd => (start.max(half), end),
            ContentKind::ActiveHalfEq => (start, end.min(half)),
            _ => (start, end),
        }
    }

    /// Resolve the frame-buffer row for a plan entry, letting the
    /// scrambler redirect the fetch within the field.
    fn resolve_row(&self, plan: LinePlan) -> Option<u32> {
        let row = plan.active_row?;
        let field = plan.field as u32;
        let index_in_field = ((row - field) / 2) as usize;
        let remapped = self.scrambler.remap_field_line(index_in_field) as u32;
        Some(remapped * 2 + field)
    }

    fn render_active(&mut self, plan: LinePlan) {
        let Some(frame) = self.frame.clone() else { return };
        let Some(row) = self.resolve_row(plan) else { return };
        if row >= frame.height || frame.width < 2 {
            return;
        }

        if plan.content == ContentKind::ActiveHalfEq {
            let half = self.line_buf.len() / 2;
            let eq = self.mode.eq_width_samples();
            self.draw_pulse(half, eq);
        }

        let levels = self.mode.levels();
        let full_start = self.mode.active_left_samples();
        let full_width = self.mode.active_width_samples();
        let (start, end) = self.active_range(plan.content);
        let end = end.min(self.line_buf.len());

        let src = frame.row(row);
        let w = src.len();

        if let Some(qam) = self.qam.as_mut() {
            qam.begin_line(self.absolute_line);
            qam.seek(self.absolute_line * self.line_buf.len() as u64 + start as u64);
        }
        if let Some(secam) = self.secam.as_mut() {
            secam.begin_line(self.absolute_line);
        }

        let chroma_scale = levels.white - levels.black;
        for x in start..end {
            // Project sample position into pixel space, linear interp
            let fx = (x - full_start) as f64 * (w - 1) as f64 / (full_width - 1) as f64;
            let x0 = fx.floor() as usize;
            let x1 = (x0 + 1).min(w - 1);
            let t = fx - x0 as f64;

            let (r0, g0, b0) = self.split_gamma(src[x0]);
            let (r1, g1, b1) = self.split_gamma(src[x1]);
            let r = r0 + (r1 - r0) * t;
            let g = g0 + (g1 - g0) * t;
            let b = b0 + (b1 - b0) * t;

            let sample = match self.mode.colour() {
                ColourSystem::Secam => {
                    let (y, dr, db) = rgb_to_secam(r, g, b);
                    let luma = levels.black + y * (levels.white - levels.black);
                    luma + self.secam.as_mut().unwrap().modulate(dr, db)
                }
                _ => {
                    let (y, u, v) = rgb_to_yuv(r, g, b);
                    let luma = levels.black + y * (levels.white - levels.black);
                    match self.qam.as_mut() {
                        Some(qam) => luma + qam.modulate(u * chroma_scale, v * chroma_scale),
                        None => luma,
                    }
                }
            };
            self.line_buf[x] = sample;
        }
    }

    #[inline]
    fn split_gamma(&self, px: u32) -> (f64, f64, f64) {
        (
            self.gamma.lookup(((px >> 16) & 0xFF) as u8),
            self.gamma.lookup(((px >> 8) & 0xFF) as u8),
            self.gamma.lookup((px & 0xFF) as u8),
        )
    }

    fn render_mac_line(&mut self, plan: LinePlan) {
        let frame = self.frame.clone();
        let row = self.resolve_row(plan);
        let parity = self.absolute_line % 2 == 0;
        if let Some(mac) = self.mac.as_mut() {
            mac.render_line(
                &mut self.line_buf,
                frame.as_deref(),
                row,
                parity,
                0.4,
            );
        }
    }

    /* ---- VBI payloads ---- */

    /// Render a byte string as NRZ bits, LSB first per byte.
    fn render_bits(&mut self, bytes: &[u8], start_s: f64, bit_rate: f64, level: f64) {
        let fs = self.mode.sample_rate().to_f64();
        let start = self.mode.seconds_to_samples(start_s);
        let total_bits = bytes.len() * 8;
        let samples = (total_bits as f64 * fs / bit_rate) as usize;
        let blank = self.mode.levels().blank;
        for i in 0..samples {
            let x = start + i;
            if x >= self.line_buf.len() {
                break;
            }
            let bit_idx = (i as f64 * bit_rate / fs) as usize;
            if bit_idx >= total_bits {
                break;
            }
            let byte = bytes[bit_idx / 8];
            let on = (byte >> (bit_idx % 8)) & 1 == 1;
            self.line_buf[x] = if on { level } else { blank };
        }
    }

    fn render_teletext(&mut self) {
        let Some(packet) = self.teletext.as_mut().and_then(|tt| tt.next_packet()) else {
            return;
        };
        let level = self.mode.levels().blank
            + 0.66 * (self.mode.levels().white - self.mode.levels().blank);
        self.render_bits(&packet, TELETEXT_START, TELETEXT_RATE_625, level);
    }

    fn render_ca_data(&mut self) {
        let Some(payload) = self.scrambler.vbi_payload() else { return };
        let mut bytes = vec![0x55, 0x55, 0x27];
        bytes.extend_from_slice(&payload);
        let level = self.mode.levels().blank
            + 0.66 * (self.mode.levels().white - self.mode.levels().blank);
        self.render_bits(&bytes, TELETEXT_START, TELETEXT_RATE_625, level);
    }

    fn render_wss(&mut self) {
        let aspect = match self.wss_mode {
            WssMode::Off => return,
            WssMode::FourThree => WssAspect::FourThreeFull,
            WssMode::SixteenNine => WssAspect::SixteenNineFull,
            WssMode::Auto => {
                let wide = self.frame.as_ref().is_some_and(|f| {
                    f.pixel_aspect.to_f64() * f.width as f64 / f.height.max(1) as f64 > 1.55
                });
                if wide {
                    WssAspect::SixteenNineFull
                } else {
                    WssAspect::FourThreeFull
                }
            }
        };
        let elements = vbi::wss_elements(vbi::wss_word(aspect));
        let fs = self.mode.sample_rate().to_f64();
        let start = self.mode.seconds_to_samples(WSS_START);
        let level = 0.5 * self.mode.levels().white;
        let blank = self.mode.levels().blank;
        let total = (elements.len() as f64 * fs / vbi::WSS_ELEMENT_RATE) as usize;
        for i in 0..total {
            let x = start + i;
            if x >= self.line_buf.len() {
                break;
            }
            let e = (i as f64 * vbi::WSS_ELEMENT_RATE / fs) as usize;
            if e >= elements.len() {
                break;
            }
            self.line_buf[x] = if elements[e] { level } else { blank };
        }
    }

    fn render_cc(&mut self) {
        let fs = self.mode.sample_rate().to_f64();
        let start = self.mode.seconds_to_samples(CC_START);
        let level = 0.5 * self.mode.levels().white;

        // Sine clock run-in at the bit rate
        let run_in = (vbi::CC_RUN_IN_CYCLES as f64 * fs / vbi::CC_BIT_RATE) as usize;
        for i in 0..run_in {
            let x = start + i;
            if x >= self.line_buf.len() {
                break;
            }
            let ph = 2.0 * PI * vbi::CC_BIT_RATE * i as f64 / fs;
            self.line_buf[x] = level * 0.5 * (1.0 - ph.cos());
        }

        // Null caption bytes when no caption stream is wired in
        let bits = vbi::cc_bits(0x00, 0x00);
        let blank = self.mode.levels().blank;
        let bit_start = start + run_in;
        let total = (bits.len() as f64 * fs / vbi::CC_BIT_RATE) as usize;
        for i in 0..total {
            let x = bit_start + i;
            if x >= self.line_buf.len() {
                break;
            }
            let b = (i as f64 * vbi::CC_BIT_RATE / fs) as usize;
            if b >= bits.len() {
                break;
            }
            self.line_buf[x] = if bits[b] { level } else { blank };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::ModeId;
    use crate::source::{AudioBlock, Interlace, MediaSource};
    use crate::types::Rational;

    /// A deterministic source: solid-colour frames and silent audio.
    struct FlatSource {
        frame: Arc<VideoFrame>,
        audio: Arc<AudioBlock>,
        frames_left: u32,
        audio_left: u32,
    }

    impl FlatSource {
        fn new(rgb: u32, frames: u32) -> Self {
            let mut frame = VideoFrame::black(384, 288);
            frame.data.iter_mut().for_each(|p| *p = rgb);
            frame.pixel_aspect = Rational::new(1, 1);
            frame.interlace = Interlace::Progressive;
            Self {
                frame: Arc::new(frame),
                audio: Arc::new(AudioBlock { samples: vec![0i16; 2560], pts: 0 }),
                frames_left: frames,
                audio_left: frames,
            }
        }
    }

    impl MediaSource for FlatSource {
        fn read_video(&mut self) -> TvResult<Option<Arc<VideoFrame>>> {
            if self.frames_left == 0 {
                return Ok(None);
            }
            self.frames_left -= 1;
            Ok(Some(self.frame.clone()))
        }

        fn read_audio(&mut self) -> TvResult<Option<Arc<AudioBlock>>> {
            if self.audio_left == 0 {
                return Ok(None);
            }
            self.audio_left -= 1;
            Ok(Some(self.audio.clone()))
        }

        fn eof(&self) -> bool {
            self.frames_left == 0 && self.audio_left == 0
        }

        fn close(&mut self) -> TvResult<()> {
            Ok(())
        }
    }

    fn make_composer(scrambler: Scrambler, frames: u32) -> Composer {
        let config = Config::default();
        let mode = Arc::new(Mode::new(ModeId::PalI, 20_250_000).unwrap());
        Composer::new(
            mode,
            Box::new(FlatSource::new(0x00_80_80_80, frames)),
            &config,
            None,
            scrambler,
        )
        .unwrap()
    }

    #[test]
    fn test_frame_sample_count_exact() {
        let mut c = make_composer(Scrambler::None, 4);
        let mut buf = vec![0.0f64; 810_000];
        let n = c.fill(&mut buf).unwrap();
        assert_eq!(n, 810_000);
        assert_eq!(c.frames_composed(), 1);
        // Second frame starts exactly at the next sample
        let n = c.fill(&mut buf).unwrap();
        assert_eq!(n, 810_000);
        assert_eq!(c.frames_composed(), 2);
    }

    #[test]
    fn test_sync_aligned_to_line_starts() {
        let mut c = make_composer(Scrambler::None, 2);
        let spl = 1296;
        let mut buf = vec![0.0f64; spl * 50];
        c.fill(&mut buf).unwrap();
        // Every line starts inside a pulse. The sound subcarriers ride
        // on top of the tip, so average a window past the shaped edge.
        for line in 0..50 {
            let x = line * spl;
            let mean: f64 = buf[x + 8..x + 40].iter().sum::<f64>() / 32.0;
            assert!(
                mean < -0.2,
                "line {line}: expected sync tip at sample {x}, mean {mean}"
            );
        }
    }

    #[test]
    fn test_active_line_sits_between_black_and_white() {
        let mut c = make_composer(Scrambler::None, 2);
        let spl = 1296;
        // Line 100 of field 1 is active; skip to it and inspect
        let mut buf = vec![0.0f64; spl * 100];
        c.fill(&mut buf).unwrap();
        let line = 99;
        let active_start = line * spl + c.mode().active_left_samples() + 10;
        let v = buf[active_start];
        assert!(
            v > 0.1 && v < 0.75,
            "mid-grey active sample out of range: {v}"
        );
    }

    #[test]
    fn test_end_of_stream_after_sources_dry() {
        let mut c = make_composer(Scrambler::None, 2);
        let mut buf = vec![0.0f64; 810_000];
        c.fill(&mut buf).unwrap();
        c.fill(&mut buf).unwrap();
        // Third frame: sources exhausted
        let r = c.fill(&mut buf);
        match r {
            Err(TvError::EndOfStream) => {}
            Ok(n) => {
                // Partial fill allowed; the next call must error
                assert!(n < buf.len());
                assert!(matches!(c.fill(&mut buf), Err(TvError::EndOfStream)));
            }
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    #[test]
    fn test_videocrypt_rotates_active_content() {
        let spl = 1296usize;
        let mut plain = make_composer(Scrambler::None, 2);
        let vc = Scrambler::from_config("vc-sky-07", None, 20.25e6).unwrap();
        let mut scrambled = make_composer(vc, 2);

        let mut a = vec![0.0f64; spl * 120];
        let mut b = vec![0.0f64; spl * 120];
        plain.fill(&mut a).unwrap();
        scrambled.fill(&mut b).unwrap();

        let line = 60; // active line in field 1
        let s = line * spl;
        let astart = plain.mode().active_left_samples();
        let aend = astart + plain.mode().active_width_samples();
        // Sync and blanking identical (modulo the sound carriers, which
        // are phase-identical between the two runs)
        for x in 0..astart {
            assert!((a[s + x] - b[s + x]).abs() < 1e-9, "sync differs at {x}");
        }
        // For a flat grey frame the luma is constant, so rotation leaves
        // the multiset of active samples intact
        let mut av: Vec<i64> = a[s + astart..s + aend].iter().map(|v| (v * 1e6) as i64).collect();
        let mut bv: Vec<i64> = b[s + astart..s + aend].iter().map(|v| (v * 1e6) as i64).collect();
        av.sort_unstable();
        bv.sort_unstable();
        // Chroma phase differs across the cut, so compare only coarsely:
        // same length, same level span
        assert_eq!(av.len(), bv.len());
        assert!((av[0] - bv[0]).abs() < 50_000);
    }

    #[test]
    fn test_teletext_line_carries_data() {
        let config = Config::default();
        let mode = Arc::new(Mode::new(ModeId::PalI, 20_250_000).unwrap());
        let mut tt = TeletextService::new();
        let mut page = crate::teletext::Page::new(0x100, 0);
        page.rows[0][..4].copy_from_slice(b"TEST");
        page.row_used[0] = true;
        tt.insert(page);

        let mut c = Composer::new(
            mode,
            Box::new(FlatSource::new(0, 2)),
            &config,
            Some(tt),
            Scrambler::None,
        )
        .unwrap();

        let spl = 1296;
        let mut buf = vec![0.0f64; spl * 10];
        c.fill(&mut buf).unwrap();
        // Line 7 (index 6) is a teletext slot; its data region must rise
        // well above blanking
        let line = 6;
        let data_start = line * spl + c.mode().seconds_to_samples(TELETEXT_START);
        let peak = buf[data_start..data_start + 400]
            .iter()
            .fold(0.0f64, |m, &v| m.max(v));
        assert!(peak > 0.3, "teletext data region flat: peak {peak}");
    }
}
