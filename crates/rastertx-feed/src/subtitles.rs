//! Subtitle store
//!
//! An ordered list of timed subtitle entries with a monotonic read
//! cursor. Entries arrive either inline from the demuxer's subtitle
//! stream (text or pre-rendered bitmaps) or from an SRT file loaded at
//! open. Text is normalised: HTML-ish and ASS override tags are
//! stripped and `\N` breaks become newlines.

use rastertx_core::types::{TvError, TvResult};
use std::collections::VecDeque;

/// One subtitle payload.
#[derive(Debug, Clone, PartialEq)]
pub enum SubContent {
    Text(String),
    Bitmap {
        width: u32,
        height: u32,
        pixels: Vec<u32>,
    },
}

/// A timed subtitle entry.
#[derive(Debug, Clone)]
pub struct SubEntry {
    pub start_ms: i64,
    pub end_ms: i64,
    pub content: SubContent,
}

/// Strip `<...>` and `{...}` tag runs and convert `\N` to newlines.
pub fn strip_tags(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_tag = false;
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '<' | '{' => in_tag = true,
            '>' | '}' => in_tag = false,
            '\\' if !in_tag && chars.peek() == Some(&'N') => {
                chars.next();
                out.push('\n');
            }
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

/// Parse an `hh:mm:ss,mmm` timestamp to milliseconds.
fn parse_srt_time(s: &str) -> Option<i64> {
    let s = s.trim();
    let (hms, millis) = s.split_once(',')?;
    let mut parts = hms.split(':');
    let h: i64 = parts.next()?.trim().parse().ok()?;
    let m: i64 = parts.next()?.trim().parse().ok()?;
    let sec: i64 = parts.next()?.trim().parse().ok()?;
    let ms: i64 = millis.trim().parse().ok()?;
    Some(((h * 60 + m) * 60 + sec) * 1000 + ms)
}

/// The subtitle list with its cursor.
#[derive(Debug, Default)]
pub struct SubtitleStore {
    entries: VecDeque<SubEntry>,
}

impl SubtitleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load an SRT file: blocks of index, `start --> end`, text lines.
    pub fn load_srt(text: &str) -> TvResult<Self> {
        let mut store = Self::new();
        for block in text.replace('\r', "").split("\n\n") {
            let mut lines = block.lines().filter(|l| !l.trim().is_empty());
            let Some(_index) = lines.next() else { continue };
            let Some(timing) = lines.next() else { continue };
            let Some((start_s, end_s)) = timing.split_once("-->") else {
                return Err(TvError::DecodeError(format!("bad srt timing: {timing}")));
            };
            let (Some(start_ms), Some(end_ms)) =
                (parse_srt_time(start_s), parse_srt_time(end_s))
            else {
                return Err(TvError::DecodeError(format!("bad srt time in: {timing}")));
            };
            let body: Vec<&str> = lines.collect();
            store.push_text(start_ms, end_ms, &body.join("\n"));
        }
        tracing::info!("subtitles: {} entries loaded", store.entries.len());
        Ok(store)
    }

    /// Append a text entry (stripping markup); entries must arrive in
    /// start order.
    pub fn push_text(&mut self, start_ms: i64, end_ms: i64, raw: &str) {
        let text = strip_tags(raw);
        if text.trim().is_empty() {
            return;
        }
        self.entries.push_back(SubEntry {
            start_ms,
            end_ms,
            content: SubContent::Text(text),
        });
    }

    /// Append a pre-rendered bitmap entry.
    pub fn push_bitmap(
        &mut self,
        start_ms: i64,
        end_ms: i64,
        width: u32,
        height: u32,
        pixels: Vec<u32>,
    ) {
        self.entries.push_back(SubEntry {
            start_ms,
            end_ms,
            content: SubContent::Bitmap { width, height, pixels },
        });
    }

    /// Entry in force at `ms`, expiring everything that ended earlier.
    /// The cursor is monotonic: asking for an earlier time after an
    /// expiry returns nothing.
    pub fn current(&mut self, ms: i64) -> Option<&SubEntry> {
        while let Some(front) = self.entries.front() {
            if front.end_ms <= ms {
                self.entries.pop_front();
            } else {
                break;
            }
        }
        let front = self.entries.front()?;
        (front.start_ms <= ms).then_some(front)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_tags() {
        assert_eq!(strip_tags("<i>Hello</i> {\\an8}world"), "Hello world");
        assert_eq!(strip_tags("line one\\Nline two"), "line one\nline two");
        assert_eq!(strip_tags("plain"), "plain");
    }

    #[test]
    fn test_parse_srt_time() {
        assert_eq!(parse_srt_time("00:00:01,500"), Some(1500));
        assert_eq!(parse_srt_time("01:02:03,004"), Some(3_723_004));
        assert_eq!(parse_srt_time("garbage"), None);
    }

    #[test]
    fn test_load_srt() {
        let srt = "1\n00:00:00,000 --> 00:00:02,000\nFirst line\n\n\
                   2\n00:00:03,000 --> 00:00:04,000\n<b>Second</b>\n";
        let mut store = SubtitleStore::load_srt(srt).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(
            store.current(1000).unwrap().content,
            SubContent::Text("First line".into())
        );
        // Between entries: nothing showing
        assert!(store.current(2500).is_none());
        assert_eq!(
            store.current(3500).unwrap().content,
            SubContent::Text("Second".into())
        );
    }

    #[test]
    fn test_cursor_expires_entries() {
        let mut store = SubtitleStore::new();
        store.push_text(0, 1000, "a");
        store.push_text(2000, 3000, "b");
        assert!(store.current(500).is_some());
        assert!(store.current(1500).is_none());
        assert_eq!(store.len(), 1, "expired entry must be dropped");
        // Monotonic: the first entry is gone for good
        assert!(store.current(500).is_none());
    }

    #[test]
    fn test_bad_srt_rejected() {
        assert!(SubtitleStore::load_srt("1\nnot a timing\ntext\n").is_err());
    }

    #[test]
    fn test_empty_text_skipped() {
        let mut store = SubtitleStore::new();
        store.push_text(0, 100, "{\\an8}");
        assert!(store.is_empty());
    }
}
