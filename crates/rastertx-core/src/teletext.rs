//! World System Teletext generation
//!
//! Level-1 teletext packet encoding: clock run-in and framing code,
//! Hamming 8/4 protection of control bytes, odd parity on display bytes,
//! a page store filled from EP1 `.tti` files, a rolling header clock and
//! a live subtitle page.
//!
//! A transmitted teletext line is 360 bits at 6.9375 Mbit/s: two clock
//! run-in bytes, the framing code, the magazine/row address group and 40
//! payload bytes. This module produces the 45-byte packets; the composer
//! shapes them onto the raster.

use crate::types::{TvError, TvResult};
use std::collections::BTreeMap;
use std::path::Path;

/// Hamming 8/4 code table (tx order, LSB first on air).
const HAMMING_8_4: [u8; 16] = [
    0x15, 0x02, 0x49, 0x5E, 0x64, 0x73, 0x38, 0x2F,
    0xD0, 0xC7, 0x8C, 0x9B, 0xA1, 0xB6, 0xFD, 0xEA,
];

/// Protect a 4-bit value with Hamming 8/4.
#[inline]
pub fn hamming_8_4(value: u8) -> u8 {
    HAMMING_8_4[(value & 0x0F) as usize]
}

/// Verify a Hamming 8/4 protected byte, returning the data nibble if the
/// codeword is one of the sixteen valid ones.
pub fn hamming_8_4_check(byte: u8) -> Option<u8> {
    HAMMING_8_4.iter().position(|&c| c == byte).map(|p| p as u8)
}

/// Apply odd parity to a 7-bit character (bit 7 becomes the parity bit).
#[inline]
pub fn odd_parity(ch: u8) -> u8 {
    let ch = ch & 0x7F;
    if ch.count_ones() % 2 == 0 {
        ch | 0x80
    } else {
        ch
    }
}

/// Clock run-in and framing code values.
pub const CRI: [u8; 2] = [0x55, 0x55];
pub const FRAMING_CODE: u8 = 0x27;

/// A full teletext transmission packet: CRI + framing + MRAG + payload.
pub type Packet = [u8; 45];

/// Build a packet for `magazine` (1..=8, sent as 0 for magazine 8) and
/// `row` (0..=24) with a 40-byte payload.
pub fn make_packet(magazine: u8, row: u8, payload: &[u8; 40]) -> Packet {
    let mag = magazine & 0x07;
    let mut pkt = [0u8; 45];
    pkt[0] = CRI[0];
    pkt[1] = CRI[1];
    pkt[2] = FRAMING_CODE;
    pkt[3] = hamming_8_4(mag | ((row & 0x01) << 3));
    pkt[4] = hamming_8_4(row >> 1);
    pkt[5..45].copy_from_slice(payload);
    pkt
}

/// One teletext page: 24 visible rows of 40 characters.
#[derive(Debug, Clone)]
pub struct Page {
    /// Page number, hex 0x100..=0x8FF
    pub number: u16,
    /// Subpage, 0 for single-subpage pages
    pub subpage: u16,
    /// Erase-page control bit
    pub erase: bool,
    /// Row data, raw 7-bit characters without parity
    pub rows: [[u8; 40]; 24],
    /// Which rows actually carry content
    pub row_used: [bool; 24],
}

impl Page {
    pub fn new(number: u16, subpage: u16) -> Self {
        Self {
            number,
            subpage,
            erase: false,
            rows: [[b' '; 40]; 24],
            row_used: [false; 24],
        }
    }

    /// Magazine digit of the page number (page 0x1xx → magazine 1).
    pub fn magazine(&self) -> u8 {
        ((self.number >> 8) & 0x07) as u8
    }

    /// Header packet payload (row 0): page address, subcode and control
    /// bits, all Hamming protected, followed by the 32-character header.
    fn header_payload(&self, header_text: &[u8; 32]) -> [u8; 40] {
        let mut p = [0u8; 40];
        p[0] = hamming_8_4((self.number & 0x0F) as u8);
        p[1] = hamming_8_4(((self.number >> 4) & 0x0F) as u8);
        p[2] = hamming_8_4((self.subpage & 0x0F) as u8);
        p[3] = hamming_8_4(((self.subpage >> 4) & 0x07) as u8 | if self.erase { 0x08 } else { 0 });
        p[4] = hamming_8_4(((self.subpage >> 8) & 0x0F) as u8);
        p[5] = hamming_8_4(((self.subpage >> 12) & 0x03) as u8);
        p[6] = hamming_8_4(0); // C7..C10
        p[7] = hamming_8_4(0); // C11..C14
        for i in 0..32 {
            p[8 + i] = odd_parity(header_text[i]);
        }
        p
    }

    fn row_payload(&self, row: usize) -> [u8; 40] {
        let mut p = [0u8; 40];
        for i in 0..40 {
            p[i] = odd_parity(self.rows[row][i]);
        }
        p
    }
}

/// Parse one EP1 `.tti` file into a page.
///
/// Recognised tags: `PN` (page number, 3 or 5 hex digits), `SP`
/// (description, ignored), `CY` (cycle time, ignored), `OL,<row>,<text>`
/// (output line). Escape sequences `<ESC>c` store `c & 0x3F` as a
/// control character, as EP1 specifies.
pub fn parse_tti(text: &str) -> TvResult<Page> {
    let mut number = 0x100u16;
    let mut subpage = 0u16;
    let mut rows: Vec<(usize, Vec<u8>)> = Vec::new();

    for line in text.lines() {
        let line = line.trim_end_matches(['\r', '\n']);
        if let Some(v) = line.strip_prefix("PN,") {
            let v = v.trim();
            let digits = u32::from_str_radix(v, 16)
                .map_err(|_| TvError::InvalidConfig(format!("bad PN value: {v}")))?;
            if v.len() > 3 {
                number = (digits >> 8) as u16;
                subpage = (digits & 0xFF) as u16;
            } else {
                number = digits as u16;
            }
        } else if let Some(v) = line.strip_prefix("OL,") {
            let (row_s, content) = v
                .split_once(',')
                .ok_or_else(|| TvError::InvalidConfig("OL without row".into()))?;
            let row: usize = row_s
                .trim()
                .parse()
                .map_err(|_| TvError::InvalidConfig(format!("bad OL row: {row_s}")))?;
            if row == 0 || row > 24 {
                continue;
            }
            let mut bytes = Vec::with_capacity(40);
            let mut esc = false;
            for &b in content.as_bytes() {
                if esc {
                    bytes.push(b & 0x3F);
                    esc = false;
                } else if b == 0x1B {
                    esc = true;
                } else {
                    bytes.push(b & 0x7F);
                }
            }
            rows.push((row, bytes));
        }
        // SP, CY, DE and the other EP1 tags carry no on-air data
    }

    if !(0x100..=0x8FF).contains(&number) {
        return Err(TvError::InvalidConfig(format!(
            "page number {number:03X} out of range 100..8FF"
        )));
    }

    let mut page = Page::new(number, subpage);
    for (row, bytes) in rows {
        let r = row - 1;
        let n = bytes.len().min(40);
        page.rows[r][..n].copy_from_slice(&bytes[..n]);
        page.row_used[r] = true;
    }
    Ok(page)
}

/// Page number used for live subtitles.
pub const SUBTITLE_PAGE: u16 = 0x888;

/// The teletext service: a page cache with an insertion cursor.
///
/// `next_packet` walks the cache emitting a header packet followed by the
/// page's used rows, then moves to the next page, so every VBI teletext
/// slot is filled and the whole carousel repeats continuously.
#[derive(Debug)]
pub struct TeletextService {
    pages: BTreeMap<(u16, u16), Page>,
    /// Carousel position: index into `pages`, and the next row to send
    /// (None = header next)
    cursor_page: usize,
    cursor_row: Option<usize>,
    /// Header clock, seconds since midnight
    clock_seconds: u32,
    frames: u32,
    frame_rate_num: u32,
}

impl TeletextService {
    pub fn new() -> Self {
        Self {
            pages: BTreeMap::new(),
            cursor_page: 0,
            cursor_row: None,
            clock_seconds: 0,
            frames: 0,
            frame_rate_num: 25,
        }
    }

    /// Load every `.tti` file in a directory.
    pub fn load_dir<P: AsRef<Path>>(&mut self, dir: P) -> TvResult<usize> {
        let mut count = 0;
        let mut entries: Vec<_> = std::fs::read_dir(dir.as_ref())?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.extension()
                    .map(|e| e.eq_ignore_ascii_case("tti"))
                    .unwrap_or(false)
            })
            .collect();
        entries.sort();
        for path in entries {
            let text = std::fs::read_to_string(&path)?;
            let page = parse_tti(&text)?;
            tracing::debug!(
                "teletext: loaded page {:03X}:{:02X} from {}",
                page.number,
                page.subpage,
                path.display()
            );
            self.insert(page);
            count += 1;
        }
        tracing::info!("teletext: {count} pages in service");
        Ok(count)
    }

    pub fn insert(&mut self, page: Page) {
        self.pages.insert((page.number, page.subpage), page);
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Advance the header clock by one frame.
    pub fn tick_frame(&mut self) {
        self.frames += 1;
        if self.frames >= self.frame_rate_num {
            self.frames = 0;
            self.clock_seconds = (self.clock_seconds + 1) % 86_400;
        }
    }

    /// Replace the subtitle page with `text` (split over two rows),
    /// or remove it when `text` is empty.
    pub fn update_subtitle(&mut self, text: &str) {
        if text.is_empty() {
            self.pages.retain(|&(n, _), _| n != SUBTITLE_PAGE);
            return;
        }
        let mut page = Page::new(SUBTITLE_PAGE, 0);
        page.erase = true;
        for (i, chunk) in text.as_bytes().chunks(38).take(2).enumerate() {
            let row = 20 + i * 2;
            // Double-height white text on a black box
            page.rows[row][0] = 0x0D;
            for (j, &b) in chunk.iter().enumerate() {
                page.rows[row][1 + j] = b & 0x7F;
            }
            page.row_used[row] = true;
        }
        self.insert(page);
    }

    fn header_text(&self, number: u16) -> [u8; 32] {
        let mut text = [b' '; 32];
        let label = format!("RASTERTX {number:03X}");
        for (i, &b) in label.as_bytes().iter().take(12).enumerate() {
            text[i] = b;
        }
        let h = self.clock_seconds / 3600;
        let m = (self.clock_seconds / 60) % 60;
        let s = self.clock_seconds % 60;
        let clock = format!("{h:02}:{m:02}:{s:02}");
        text[24..32].copy_from_slice(clock.as_bytes());
        text
    }

    /// Produce the next packet of the carousel, or None when no pages
    /// are loaded.
    pub fn next_packet(&mut self) -> Option<Packet> {
        if self.pages.is_empty() {
            return None;
        }
        if self.cursor_page >= self.pages.len() {
            self.cursor_page = 0;
        }
        let page = self.pages.values().nth(self.cursor_page)?;
        let mag = page.magazine();

        match self.cursor_row {
            None => {
                let payload = page.header_payload(&self.header_text(page.number));
                let pkt = make_packet(mag, 0, &payload);
                self.cursor_row = Some(0);
                Some(pkt)
            }
            Some(mut row) => {
                while row < 24 && !page.row_used[row] {
                    row += 1;
                }
                if row >= 24 {
                    // Page finished; next slot gets the next page's header
                    self.cursor_row = None;
                    self.cursor_page = (self.cursor_page + 1) % self.pages.len();
                    return self.next_packet();
                }
                let payload = page.row_payload(row);
                let pkt = make_packet(mag, (row + 1) as u8, &payload);
                self.cursor_row = Some(row + 1);
                Some(pkt)
            }
        }
    }
}

impl Default for TeletextService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hamming_all_codewords_protected() {
        // Every codeword differs from every other in at least 2 bits,
        // and the data nibble round-trips
        for v in 0..16u8 {
            assert_eq!(hamming_8_4_check(hamming_8_4(v)), Some(v));
        }
        for a in 0..16 {
            for b in (a + 1)..16 {
                let d = (HAMMING_8_4[a] ^ HAMMING_8_4[b]).count_ones();
                assert!(d >= 2, "codewords {a} and {b} differ in {d} bit(s)");
            }
        }
    }

    #[test]
    fn test_odd_parity() {
        for ch in 0u8..=127 {
            assert_eq!(odd_parity(ch).count_ones() % 2, 1);
            assert_eq!(odd_parity(ch) & 0x7F, ch);
        }
    }

    #[test]
    fn test_packet_header_page_100_row_0() {
        // Page 100: magazine 1, row 0
        let payload = [b' '; 40];
        let pkt = make_packet(1, 0, &payload);
        assert_eq!(&pkt[0..2], &[0x55, 0x55]);
        assert_eq!(pkt[2], 0x27);
        assert_eq!(pkt[3], 0x02); // hamming(magazine 1, row LSB 0)
        assert_eq!(pkt[4], 0x15); // hamming(row >> 1 = 0)
    }

    #[test]
    fn test_packet_payload_parity() {
        let mut page = Page::new(0x100, 0);
        let text = b"HELLO";
        page.rows[0][..5].copy_from_slice(text);
        page.row_used[0] = true;
        let payload = page.row_payload(0);
        for (i, &b) in text.iter().enumerate() {
            assert_eq!(payload[i], odd_parity(b));
        }
    }

    #[test]
    fn test_parse_tti_basic() {
        let src = "PN,10001\r\nSP,Test page\r\nCY,5\r\nOL,1,HELLO WORLD\r\nOL,3,SECOND ROW\r\n";
        let page = parse_tti(src).unwrap();
        assert_eq!(page.number, 0x100);
        assert_eq!(page.subpage, 0x01);
        assert!(page.row_used[0]);
        assert!(!page.row_used[1]);
        assert_eq!(&page.rows[0][..11], b"HELLO WORLD");
    }

    #[test]
    fn test_parse_tti_escapes() {
        let src = "PN,20000\nOL,1,\x1bARED TEXT\n";
        let page = parse_tti(src).unwrap();
        // ESC-A encodes alpha-red (0x01)
        assert_eq!(page.rows[0][0], 0x01);
        assert_eq!(&page.rows[0][1..9], b"RED TEXT");
    }

    #[test]
    fn test_parse_tti_bad_page_rejected() {
        assert!(parse_tti("PN,00F00\n").is_err());
    }

    #[test]
    fn test_carousel_emits_header_then_rows() {
        let mut svc = TeletextService::new();
        let mut page = Page::new(0x100, 0);
        page.rows[0][..2].copy_from_slice(b"AB");
        page.row_used[0] = true;
        svc.insert(page);

        let header = svc.next_packet().unwrap();
        assert_eq!(hamming_8_4_check(header[3]), Some(0x01)); // mag 1, row 0
        let row = svc.next_packet().unwrap();
        assert_eq!(hamming_8_4_check(row[3]), Some(0x09)); // mag 1, row 1 LSB
        assert_eq!(row[5], odd_parity(b'A'));

        // Carousel wraps back to the header
        let next = svc.next_packet().unwrap();
        assert_eq!(hamming_8_4_check(next[3]), Some(0x01));
    }

    #[test]
    fn test_subtitle_page_update() {
        let mut svc = TeletextService::new();
        svc.update_subtitle("HELLO");
        assert_eq!(svc.len(), 1);
        svc.update_subtitle("");
        assert!(svc.is_empty());
    }
}
