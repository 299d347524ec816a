//! VBI data services: Wide Screen Signalling and closed captions
//!
//! WSS (625-line systems, line 23) is a 14-bit group word carried as
//! biphase elements at 5 MHz after a run-in and start code. Closed
//! captions (525-line systems, line 21) are two odd-parity 7-bit
//! characters at 503.5 kbit/s after a sine clock run-in.
//!
//! Both encoders produce element/bit streams; the composer maps them to
//! samples using the mode's timing tables.

use serde::{Deserialize, Serialize};

/// WSS aspect-ratio signalling selected by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WssMode {
    /// Follow the source frame's aspect ratio
    #[default]
    Auto,
    FourThree,
    SixteenNine,
    Off,
}

/// Group 1 aspect-ratio codes (b3..b0) from the signalling standard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WssAspect {
    FourThreeFull,
    FourteenNineLetterbox,
    SixteenNineFull,
}

impl WssAspect {
    fn group1(self) -> u16 {
        match self {
            WssAspect::FourThreeFull => 0b1000,
            WssAspect::FourteenNineLetterbox => 0b0001,
            WssAspect::SixteenNineFull => 0b0111,
        }
    }
}

/// Element rate of the WSS waveform in Hz.
pub const WSS_ELEMENT_RATE: f64 = 5.0e6;

/// WSS run-in sequence, 29 elements.
const WSS_RUN_IN: &[u8; 29] = b"11111000111000111000111000111";

/// WSS start code, 24 elements.
const WSS_START_CODE: &[u8; 24] = b"000111100011110011100111";

/// Build the 14-bit WSS group word: group 1 aspect ratio, groups 2–4
/// (enhanced services, subtitles, reserved) all zero.
pub fn wss_word(aspect: WssAspect) -> u16 {
    aspect.group1()
}

/// Expand the group word into the full element stream: run-in, start
/// code, then each data bit as six biphase elements ('1' = 000111,
/// '0' = 111000, LSB first).
pub fn wss_elements(word: u16) -> Vec<bool> {
    let mut out = Vec::with_capacity(29 + 24 + 14 * 6);
    out.extend(WSS_RUN_IN.iter().map(|&c| c == b'1'));
    out.extend(WSS_START_CODE.iter().map(|&c| c == b'1'));
    for bit in 0..14 {
        let one = (word >> bit) & 1 == 1;
        let pattern: [bool; 6] = if one {
            [false, false, false, true, true, true]
        } else {
            [true, true, true, false, false, false]
        };
        out.extend_from_slice(&pattern);
    }
    out
}

/// Closed-caption bit rate in Hz.
pub const CC_BIT_RATE: f64 = 503_493.0;

/// Closed-caption clock run-in frequency (equals the bit rate).
pub const CC_RUN_IN_CYCLES: usize = 7;

/// Apply odd parity to a caption character.
#[inline]
pub fn cc_parity(ch: u8) -> u8 {
    let ch = ch & 0x7F;
    if ch.count_ones() % 2 == 0 {
        ch | 0x80
    } else {
        ch
    }
}

/// Produce the 19 data bits of a caption line: three start bits `001`
/// then two parity-protected characters, LSB first.
pub fn cc_bits(ch1: u8, ch2: u8) -> Vec<bool> {
    let mut out = Vec::with_capacity(3 + 16);
    out.extend_from_slice(&[false, false, true]);
    for byte in [cc_parity(ch1), cc_parity(ch2)] {
        for bit in 0..8 {
            out.push((byte >> bit) & 1 == 1);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wss_element_count() {
        let e = wss_elements(wss_word(WssAspect::FourThreeFull));
        assert_eq!(e.len(), 29 + 24 + 84);
    }

    #[test]
    fn test_wss_biphase_halves_balance() {
        // Each data bit contributes exactly three high elements
        let e = wss_elements(wss_word(WssAspect::SixteenNineFull));
        let data = &e[53..];
        for bit in data.chunks(6) {
            assert_eq!(bit.iter().filter(|&&b| b).count(), 3);
        }
    }

    #[test]
    fn test_wss_aspect_codes_distinct() {
        assert_ne!(
            wss_word(WssAspect::FourThreeFull),
            wss_word(WssAspect::SixteenNineFull)
        );
    }

    #[test]
    fn test_cc_parity_odd() {
        for ch in 0u8..=127 {
            assert_eq!(cc_parity(ch).count_ones() % 2, 1);
        }
    }

    #[test]
    fn test_cc_bits_layout() {
        let bits = cc_bits(b'H', b'I');
        assert_eq!(bits.len(), 19);
        // Start bits 001
        assert_eq!(&bits[..3], &[false, false, true]);
        // First data bit is the LSB of 'H' (0x48 -> 0)
        assert!(!bits[3]);
    }
}
