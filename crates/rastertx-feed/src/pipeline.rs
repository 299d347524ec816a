//! The decoder feed pipeline
//!
//! Five long-lived worker threads keep the composer supplied:
//!
//! ```text
//! demux ──▶ video queue ──▶ video decode ──▶ in_video ──▶ video scale ──▶ out_video ─┐
//!   │                                                                               ├──▶ composer
//!   └─────▶ audio queue ──▶ audio decode ──▶ in_audio ──▶ audio resample ─▶ out_audio ┘
//! ```
//!
//! Subtitle packets are decoded inline on the demux thread, as the
//! original input thread does. The composer runs on the caller's thread
//! and consumes the two output double-buffers through [`MediaSource`].
//!
//! Every queue and buffer carries its own abort flag; a graceful close
//! aborts them all, joins the five threads, then drops the buffers.

use crate::dbuffer::FrameDbuffer;
use crate::packet_queue::{Packet, PacketQueue, MAX_QUEUE_SIZE};
use crate::scale::{Framing, Scaler};
use crate::subtitles::{SubContent, SubtitleStore};
use crate::time_align::{AudioAction, AudioAlign, TimeAlign, VideoAction};
use rastertx_core::fir::RationalResampler;
use rastertx_core::overlay::{overlay_image, Image, Position};
use rastertx_core::source::{AudioBlock, MediaSource, VideoFrame};
use rastertx_core::types::{Rational, TvError, TvResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// Output audio rate delivered to the composer.
pub const OUT_AUDIO_RATE: i64 = 32_000;

/// Which elementary stream a packet belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Video,
    Audio,
    Subtitle,
}

/// A decoded subtitle event.
#[derive(Debug, Clone)]
pub struct SubEvent {
    pub start_ms: i64,
    pub end_ms: i64,
    pub content: SubContent,
}

/// The upstream demultiplexer, provided by the external media layer.
pub trait Demuxer: Send {
    /// Next packet in source order, or `None` at end of input.
    fn read_packet(&mut self) -> TvResult<Option<(StreamKind, Packet)>>;

    fn has_video(&self) -> bool;
    fn has_audio(&self) -> bool;

    /// Time base of video packet timestamps.
    fn video_time_base(&self) -> Rational;
    /// Time base of audio packet timestamps.
    fn audio_time_base(&self) -> Rational;

    /// Decode a subtitle packet inline.
    fn decode_subtitle(&mut self, _packet: &Packet) -> TvResult<Option<SubEvent>> {
        Ok(None)
    }
}

/// Decoded audio before resampling.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub samples: Vec<i16>,
    pub channels: u8,
    pub sample_rate: u32,
    pub pts: i64,
}

/// The external video decoder.
pub trait VideoDecoder: Send {
    fn decode(&mut self, packet: Packet) -> TvResult<Vec<VideoFrame>>;
    fn flush(&mut self) -> TvResult<Vec<VideoFrame>>;
}

/// The external audio decoder.
pub trait AudioDecoder: Send {
    fn decode(&mut self, packet: Packet) -> TvResult<Vec<DecodedAudio>>;
    fn flush(&mut self) -> TvResult<Vec<DecodedAudio>>;
}

/// Text rasterizer callback for the timestamp and subtitle overlays;
/// font rendering stays outside the pipeline.
pub type TextRasterizer = Box<dyn Fn(&str) -> Image + Send>;

/// Pipeline construction options.
pub struct PipelineOptions {
    /// Active-region geometry of the TV mode
    pub out_width: u32,
    pub out_height: u32,
    pub framing: Framing,
    pub frame_rate: Rational,
    /// Start offset in frames (pre-roll is dropped)
    pub start_offset: i64,
    pub logo: Option<Image>,
    pub timestamp: bool,
    pub rasterizer: Option<TextRasterizer>,
    /// Paint subtitles onto the picture
    pub render_subtitles: bool,
    /// Subtitles loaded from a file at open
    pub subtitles: Option<SubtitleStore>,
}

impl PipelineOptions {
    /// Map the start-position configuration (minutes) onto the frame
    /// clock: pre-roll frames are dropped by the time-align policy.
    pub fn with_start_minutes(mut self, minutes: u32) -> Self {
        self.start_offset =
            minutes as i64 * 60 * self.frame_rate.num() / self.frame_rate.den();
        self
    }

    pub fn new(out_width: u32, out_height: u32, frame_rate: Rational) -> Self {
        Self {
            out_width,
            out_height,
            framing: Framing::Fill,
            frame_rate,
            start_offset: 0,
            logo: None,
            timestamp: false,
            rasterizer: None,
            render_subtitles: false,
            subtitles: None,
        }
    }
}

/// The assembled pipeline; implements [`MediaSource`] for the composer.
pub struct FeedPipeline {
    out_video: Arc<FrameDbuffer<VideoFrame>>,
    out_audio: Arc<FrameDbuffer<AudioBlock>>,
    video_queue: Arc<PacketQueue>,
    audio_queue: Arc<PacketQueue>,
    in_video: Arc<FrameDbuffer<VideoFrame>>,
    in_audio: Arc<FrameDbuffer<DecodedAudio>>,
    subtitle_text: Arc<Mutex<String>>,
    abort: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
    has_video: bool,
    has_audio: bool,
    video_eof: bool,
    audio_eof: bool,
}

impl FeedPipeline {
    pub fn open(
        mut demuxer: Box<dyn Demuxer>,
        video_decoder: Option<Box<dyn VideoDecoder>>,
        audio_decoder: Option<Box<dyn AudioDecoder>>,
        options: PipelineOptions,
    ) -> TvResult<Self> {
        let has_video = demuxer.has_video();
        let has_audio = demuxer.has_audio();
        if has_video && video_decoder.is_none() {
            return Err(TvError::InvalidConfig(
                "source has video but no video decoder was provided".into(),
            ));
        }
        if has_audio && audio_decoder.is_none() {
            return Err(TvError::InvalidConfig(
                "source has audio but no audio decoder was provided".into(),
            ));
        }

        let video_queue = Arc::new(PacketQueue::new(MAX_QUEUE_SIZE));
        let audio_queue = Arc::new(PacketQueue::new(MAX_QUEUE_SIZE));
        let in_video = Arc::new(FrameDbuffer::new());
        let in_audio = Arc::new(FrameDbuffer::new());
        let out_video = Arc::new(FrameDbuffer::new());
        let out_audio = Arc::new(FrameDbuffer::new());
        let subtitles = Arc::new(Mutex::new(options.subtitles.unwrap_or_default()));
        let subtitle_text = Arc::new(Mutex::new(String::new()));
        let abort = Arc::new(AtomicBool::new(false));
        let video_tb = demuxer.video_time_base();
        let audio_tb = demuxer.audio_time_base();

        let mut threads = Vec::new();

        /* Demux thread */
        {
            let vq = video_queue.clone();
            let aq = audio_queue.clone();
            let subs = subtitles.clone();
            let abort = abort.clone();
            threads.push(spawn("feed-demux", move || {
                while !abort.load(Ordering::Relaxed) {
                    match demuxer.read_packet() {
                        Ok(Some((StreamKind::Video, pkt))) => {
                            if vq.write(Some(pkt)).is_err() {
                                break;
                            }
                        }
                        Ok(Some((StreamKind::Audio, pkt))) => {
                            if aq.write(Some(pkt)).is_err() {
                                break;
                            }
                        }
                        Ok(Some((StreamKind::Subtitle, pkt))) => {
                            if let Ok(Some(ev)) = demuxer.decode_subtitle(&pkt) {
                                let mut s = subs.lock().unwrap();
                                match ev.content {
                                    SubContent::Text(t) => {
                                        s.push_text(ev.start_ms, ev.end_ms, &t)
                                    }
                                    SubContent::Bitmap { width, height, pixels } => {
                                        s.push_bitmap(ev.start_ms, ev.end_ms, width, height, pixels)
                                    }
                                }
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            tracing::warn!("demux error, treating as end of input: {e}");
                            break;
                        }
                    }
                }
                let _ = vq.write(None);
                let _ = aq.write(None);
            }));
        }

        /* Video decode thread */
        if let Some(mut decoder) = video_decoder {
            let vq = video_queue.clone();
            let inv = in_video.clone();
            threads.push(spawn("feed-video-decode", move || {
                loop {
                    match vq.read() {
                        Ok(Some(pkt)) => match decoder.decode(pkt) {
                            Ok(frames) => {
                                for f in frames {
                                    if inv.publish(f).is_err() {
                                        return;
                                    }
                                }
                            }
                            Err(e) => {
                                tracing::warn!("video decode error, soft EOF: {e}");
                                break;
                            }
                        },
                        Ok(None) => {
                            for f in decoder.flush().unwrap_or_default() {
                                if inv.publish(f).is_err() {
                                    return;
                                }
                            }
                            break;
                        }
                        Err(_) => return,
                    }
                }
                inv.finish();
            }));
        } else {
            in_video.finish();
        }

        /* Video scaler thread */
        if has_video {
            let inv = in_video.clone();
            let outv = out_video.clone();
            let subs = subtitles.clone();
            let text_out = subtitle_text.clone();
            let frame_rate = options.frame_rate;
            let mode_tb = frame_rate.recip();
            let scaler = Scaler::new(options.out_width, options.out_height, options.framing);
            let logo = options.logo;
            let rasterizer = options.rasterizer;
            let want_timestamp = options.timestamp;
            let render_subs = options.render_subtitles;
            let mut align = TimeAlign::new(video_tb, mode_tb, options.start_offset);
            threads.push(spawn("feed-video-scale", move || {
                let mut published_any = false;
                loop {
                    let frame = match inv.flip() {
                        Ok(Some(f)) => f,
                        Ok(None) => break,
                        Err(_) => return,
                    };
                    let pts = (frame.pts != Packet::NO_PTS).then_some(frame.pts);
                    let repeats = match align.video_frame(pts) {
                        VideoAction::Drop => continue,
                        VideoAction::Emit { repeats_before } => repeats_before,
                    };
                    // A repeat needs a previous frame; before the first
                    // publication the raster simply starts here
                    for _ in 0..repeats {
                        if published_any && outv.publish_repeat().is_err() {
                            return;
                        }
                    }

                    let mut scaled = scaler.scale(&frame);

                    let tick = align.next_tick() - 1;
                    let ms = tick * 1000 * frame_rate.den() / frame_rate.num();
                    let current = {
                        let mut s = subs.lock().unwrap();
                        s.current(ms).cloned()
                    };
                    let text = match &current {
                        Some(e) => match &e.content {
                            SubContent::Text(t) => t.clone(),
                            SubContent::Bitmap { .. } => String::new(),
                        },
                        None => String::new(),
                    };
                    *text_out.lock().unwrap() = text.clone();

                    if let Some(logo) = logo.as_ref() {
                        overlay_image(
                            &mut scaled.data,
                            scaled.width,
                            scaled.height,
                            scaled.width,
                            logo,
                        );
                    }
                    if want_timestamp {
                        if let Some(raster) = rasterizer.as_ref() {
                            let sec = tick * frame_rate.den() / frame_rate.num();
                            let label = format!(
                                "{:02}:{:02}:{:02}",
                                sec / 3600,
                                (sec / 60) % 60,
                                sec % 60
                            );
                            let mut img = raster(&label);
                            img.position = Position::At(10, 90);
                            overlay_image(
                                &mut scaled.data,
                                scaled.width,
                                scaled.height,
                                scaled.width,
                                &img,
                            );
                        }
                    }
                    if render_subs {
                        match current.as_ref().map(|e| &e.content) {
                            Some(SubContent::Bitmap { width, height, pixels }) => {
                                let img = Image::new(
                                    *width,
                                    *height,
                                    pixels.clone(),
                                    Position::BottomLeft,
                                );
                                overlay_image(
                                    &mut scaled.data,
                                    scaled.width,
                                    scaled.height,
                                    scaled.width,
                                    &img,
                                );
                            }
                            Some(SubContent::Text(_)) if !text.is_empty() => {
                                if let Some(raster) = rasterizer.as_ref() {
                                    let mut img = raster(&text);
                                    img.position = Position::BottomLeft;
                                    overlay_image(
                                        &mut scaled.data,
                                        scaled.width,
                                        scaled.height,
                                        scaled.width,
                                        &img,
                                    );
                                }
                            }
                            _ => {}
                        }
                    }

                    if outv.publish(scaled).is_err() {
                        return;
                    }
                    published_any = true;
                }
                outv.finish();
            }));
        } else {
            out_video.finish();
        }

        /* Audio decode thread */
        if let Some(mut decoder) = audio_decoder {
            let aq = audio_queue.clone();
            let ina = in_audio.clone();
            threads.push(spawn("feed-audio-decode", move || {
                loop {
                    match aq.read() {
                        Ok(Some(pkt)) => match decoder.decode(pkt) {
                            Ok(blocks) => {
                                for b in blocks {
                                    if ina.publish(b).is_err() {
                                        return;
                                    }
                                }
                            }
                            Err(e) => {
                                tracing::warn!("audio decode error, soft EOF: {e}");
                                break;
                            }
                        },
                        Ok(None) => {
                            for b in decoder.flush().unwrap_or_default() {
                                if ina.publish(b).is_err() {
                                    return;
                                }
                            }
                            break;
                        }
                        Err(_) => return,
                    }
                }
                ina.finish();
            }));
        } else {
            in_audio.finish();
        }

        /* Audio resampler thread */
        if has_audio {
            let ina = in_audio.clone();
            let outa = out_audio.clone();
            let frame_rate = options.frame_rate;
            // Exactly one block per video frame period
            let block_samples = ((OUT_AUDIO_RATE * frame_rate.den()) as f64
                / frame_rate.num() as f64)
                .ceil() as usize;
            let out_tb = Rational::new(1, OUT_AUDIO_RATE);
            // ±20 ms drift window
            let mut align = AudioAlign::new(audio_tb, out_tb, 0, OUT_AUDIO_RATE / 50);
            threads.push(spawn("feed-audio-resample", move || {
                let mut resamplers: Option<(RationalResampler, RationalResampler, u32)> = None;
                let mut pending: Vec<i16> = Vec::new();
                let mut out_pts: i64 = 0;
                loop {
                    let decoded = match ina.flip() {
                        Ok(Some(d)) => d,
                        Ok(None) => break,
                        Err(_) => return,
                    };
                    let nb = decoded.samples.len() as i64
                        / decoded.channels.max(1) as i64;
                    // The alignment clock runs at the output rate
                    let src_tb = Rational::new(1, decoded.sample_rate.max(1) as i64);
                    let nb_out = Rational::rescale(nb, src_tb, out_tb);
                    let pts = (decoded.pts != Packet::NO_PTS).then_some(decoded.pts);
                    // Overlap trims the leading source samples before
                    // they reach the resampler
                    let mut trim_out: i64 = 0;
                    match align.audio_frame(pts, nb_out) {
                        AudioAction::Drop => continue,
                        AudioAction::Trim(n) => {
                            trim_out = (n as i64).min(nb_out);
                        }
                        AudioAction::InjectSilence(n) => {
                            pending.extend(std::iter::repeat(0i16).take(n as usize * 2));
                        }
                        AudioAction::Pass => {}
                    }
                    align.consumed(nb_out - trim_out);

                    // (Re)build resamplers when the source rate changes
                    let src_rate = decoded.sample_rate.max(1);
                    if resamplers.as_ref().map(|r| r.2) != Some(src_rate) {
                        let ratio = Rational::new(OUT_AUDIO_RATE, src_rate as i64);
                        let (up, down) = (ratio.num() as usize, ratio.den() as usize);
                        resamplers = Some((
                            RationalResampler::new(up, down, 8),
                            RationalResampler::new(up, down, 8),
                            src_rate,
                        ));
                    }
                    let (rl, rr, _) = resamplers.as_mut().unwrap();

                    let ch = decoded.channels.max(1) as usize;
                    let skip = Rational::rescale(trim_out, out_tb, src_tb)
                        .clamp(0, nb) as usize
                        * ch;
                    let samples = &decoded.samples[skip..];
                    let left: Vec<f64> = samples
                        .chunks(ch)
                        .map(|c| c[0] as f64 / 32768.0)
                        .collect();
                    let right: Vec<f64> = samples
                        .chunks(ch)
                        .map(|c| c[ch.min(2) - 1] as f64 / 32768.0)
                        .collect();
                    let mut ol = Vec::new();
                    let mut or = Vec::new();
                    rl.process(&left, &mut ol);
                    rr.process(&right, &mut or);
                    for (l, r) in ol.iter().zip(or.iter()) {
                        pending.push((l.clamp(-1.0, 1.0) * 32767.0) as i16);
                        pending.push((r.clamp(-1.0, 1.0) * 32767.0) as i16);
                    }

                    while pending.len() >= block_samples * 2 {
                        let rest = pending.split_off(block_samples * 2);
                        let block = AudioBlock { samples: pending, pts: out_pts };
                        out_pts += block_samples as i64;
                        pending = rest;
                        if outa.publish(block).is_err() {
                            return;
                        }
                    }
                }
                if !pending.is_empty() {
                    pending.resize(block_samples * 2, 0);
                    let _ = outa.publish(AudioBlock { samples: pending, pts: out_pts });
                }
                outa.finish();
            }));
        } else {
            out_audio.finish();
        }

        tracing::info!(
            "feed pipeline open: video={has_video} audio={has_audio}, {} threads",
            threads.len()
        );

        Ok(Self {
            out_video,
            out_audio,
            video_queue,
            audio_queue,
            in_video,
            in_audio,
            subtitle_text,
            abort,
            threads,
            has_video,
            has_audio,
            video_eof: !has_video,
            audio_eof: !has_audio,
        })
    }
}

fn spawn<F: FnOnce() + Send + 'static>(name: &str, f: F) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name(name.into())
        .spawn(f)
        .expect("failed to spawn pipeline thread")
}

impl MediaSource for FeedPipeline {
    fn read_video(&mut self) -> TvResult<Option<Arc<VideoFrame>>> {
        if self.video_eof {
            return Ok(None);
        }
        match self.out_video.flip() {
            Ok(Some(f)) => Ok(Some(f)),
            Ok(None) => {
                self.video_eof = true;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn read_audio(&mut self) -> TvResult<Option<Arc<AudioBlock>>> {
        if self.audio_eof {
            return Ok(None);
        }
        match self.out_audio.flip() {
            Ok(Some(b)) => Ok(Some(b)),
            Ok(None) => {
                self.audio_eof = true;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn eof(&self) -> bool {
        self.video_eof && self.audio_eof
    }

    fn close(&mut self) -> TvResult<()> {
        self.abort.store(true, Ordering::Relaxed);
        self.video_queue.abort();
        self.audio_queue.abort();
        self.in_video.abort();
        self.in_audio.abort();
        self.out_video.abort();
        self.out_audio.abort();
        for t in self.threads.drain(..) {
            let _ = t.join();
        }
        tracing::info!("feed pipeline closed");
        Ok(())
    }

    fn subtitle_text(&mut self) -> Option<String> {
        let text = self.subtitle_text.lock().unwrap().clone();
        (self.has_video || self.has_audio).then_some(text)
    }
}

impl Drop for FeedPipeline {
    fn drop(&mut self) {
        if !self.threads.is_empty() {
            let _ = self.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Produces `frames` video packets at 25 fps and matching audio
    /// packets of 48 kHz stereo.
    struct StubDemuxer {
        frame: u32,
        frames: u32,
    }

    impl Demuxer for StubDemuxer {
        fn read_packet(&mut self) -> TvResult<Option<(StreamKind, Packet)>> {
            if self.frame >= self.frames * 2 {
                return Ok(None);
            }
            let i = self.frame;
            self.frame += 1;
            // Alternate video and audio packets
            if i % 2 == 0 {
                Ok(Some((
                    StreamKind::Video,
                    Packet::new(vec![(i / 2) as u8], (i / 2) as i64 * 40),
                )))
            } else {
                Ok(Some((
                    StreamKind::Audio,
                    Packet::new(vec![(i / 2) as u8], (i / 2) as i64 * 1920),
                )))
            }
        }

        fn has_video(&self) -> bool {
            true
        }

        fn has_audio(&self) -> bool {
            true
        }

        fn video_time_base(&self) -> Rational {
            Rational::new(1, 1000)
        }

        fn audio_time_base(&self) -> Rational {
            Rational::new(1, 48_000)
        }
    }

    struct StubVideoDecoder;

    impl VideoDecoder for StubVideoDecoder {
        fn decode(&mut self, packet: Packet) -> TvResult<Vec<VideoFrame>> {
            let shade = packet.data[0] as u32 * 10;
            let mut f = VideoFrame::black(64, 48);
            f.data.iter_mut().for_each(|p| *p = shade << 16 | shade << 8 | shade);
            f.pts = packet.pts;
            Ok(vec![f])
        }

        fn flush(&mut self) -> TvResult<Vec<VideoFrame>> {
            Ok(vec![])
        }
    }

    struct StubAudioDecoder;

    impl AudioDecoder for StubAudioDecoder {
        fn decode(&mut self, packet: Packet) -> TvResult<Vec<DecodedAudio>> {
            Ok(vec![DecodedAudio {
                samples: vec![100i16; 1920 * 2],
                channels: 2,
                sample_rate: 48_000,
                pts: packet.pts,
            }])
        }

        fn flush(&mut self) -> TvResult<Vec<DecodedAudio>> {
            Ok(vec![])
        }
    }

    fn open_pipeline(frames: u32) -> FeedPipeline {
        FeedPipeline::open(
            Box::new(StubDemuxer { frame: 0, frames }),
            Some(Box::new(StubVideoDecoder)),
            Some(Box::new(StubAudioDecoder)),
            PipelineOptions::new(64, 48, Rational::new(25, 1)),
        )
        .unwrap()
    }

    #[test]
    fn test_frames_flow_in_order() {
        let mut p = open_pipeline(6);
        let mut shades = Vec::new();
        while let Some(f) = p.read_video().unwrap() {
            shades.push(f.data[0] & 0xFF);
        }
        assert_eq!(shades, vec![0, 10, 20, 30, 40, 50]);
        p.close().unwrap();
    }

    #[test]
    fn test_audio_blocks_are_frame_sized() {
        let mut p = open_pipeline(6);
        // 25 fps -> 1280 stereo pairs per block
        let b = p.read_audio().unwrap().unwrap();
        assert_eq!(b.samples.len(), 2560);
        p.close().unwrap();
    }

    #[test]
    fn test_eof_reached() {
        let mut p = open_pipeline(2);
        while p.read_video().unwrap().is_some() {}
        while p.read_audio().unwrap().is_some() {}
        assert!(p.eof());
        p.close().unwrap();
    }

    #[test]
    fn test_close_is_idempotent_and_joins() {
        let mut p = open_pipeline(100);
        // Consume a little then shut down mid-stream
        let _ = p.read_video().unwrap();
        p.close().unwrap();
        p.close().unwrap();
    }

    #[test]
    fn test_missing_decoder_rejected() {
        let r = FeedPipeline::open(
            Box::new(StubDemuxer { frame: 0, frames: 1 }),
            None,
            Some(Box::new(StubAudioDecoder)),
            PipelineOptions::new(64, 48, Rational::new(25, 1)),
        );
        assert!(matches!(r, Err(TvError::InvalidConfig(_))));
    }
}
