//! # rastertx feed
//!
//! The decoder feed pipeline: keeps the line composer in `rastertx-core`
//! supplied with exactly one scaled video frame per TV frame period and
//! one resampled audio block per tick, from any external demuxer/decoder
//! pair.
//!
//! ## Stages
//!
//! - [`packet_queue`]: bounded byte FIFOs between the demux thread and
//!   the decoders
//! - [`dbuffer`]: two-slot frame hand-offs with repeat semantics
//! - [`time_align`]: the PTS drop/repeat and audio drift policies
//! - [`scale`]: bilinear scaling with letterbox/pillarbox framing
//! - [`subtitles`]: the timed subtitle store
//! - [`pipeline`]: the five worker threads, assembled into a
//!   [`MediaSource`](rastertx_core::source::MediaSource)
//! - [`test_source`]: built-in colour bars and test tone
//!
//! The external media layer provides implementations of
//! [`pipeline::Demuxer`], [`pipeline::VideoDecoder`] and
//! [`pipeline::AudioDecoder`]; everything downstream of those is here.

pub mod dbuffer;
pub mod packet_queue;
pub mod pipeline;
pub mod scale;
pub mod subtitles;
pub mod test_source;
pub mod time_align;

pub use dbuffer::FrameDbuffer;
pub use packet_queue::{Packet, PacketQueue};
pub use pipeline::{FeedPipeline, PipelineOptions};
pub use test_source::TestSource;
