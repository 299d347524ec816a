//! Nagravision Syster line shuffling
//!
//! Syster permutes the 287 active lines of every field. The permutation
//! is derived from a 60-bit seed that is also published in a VBI data
//! line, so a decoder holding the same generator can rebuild the table
//! and restore the original line order.
//!
//! The permutation is a Fisher–Yates shuffle driven by a Galois LFSR over
//! the seed; the seed itself advances once per field.

/// Active lines per field in the 625-line systems.
pub const LINES_PER_FIELD: usize = 287;

/// 60-bit LFSR feedback mask (x^60 + x^59 + x^45 + x^44 + 1 family).
const LFSR_MASK: u64 = (1 << 59) | (1 << 44) | (1 << 43) | 1;

/// Seed mask: only the low 60 bits are significant.
const SEED_MASK: u64 = (1 << 60) - 1;

/// Galois LFSR step over the 60-bit state.
#[inline]
fn lfsr_step(state: u64) -> u64 {
    let out = state & 1;
    let mut next = state >> 1;
    if out == 1 {
        next ^= LFSR_MASK;
    }
    next & SEED_MASK
}

/// Derive the 287-entry field permutation from a seed.
///
/// Entry `i` is the source line displayed at position `i`.
pub fn derive_permutation(seed: u64) -> [u16; LINES_PER_FIELD] {
    let mut perm = [0u16; LINES_PER_FIELD];
    for (i, p) in perm.iter_mut().enumerate() {
        *p = i as u16;
    }

    let mut state = (seed & SEED_MASK) | 1;
    for i in (1..LINES_PER_FIELD).rev() {
        state = lfsr_step(state);
        let j = (state % (i as u64 + 1)) as usize;
        perm.swap(i, j);
    }
    perm
}

/// Transmitter-side Syster state.
#[derive(Debug, Clone)]
pub struct SysterState {
    seed: u64,
    permutation: [u16; LINES_PER_FIELD],
}

impl SysterState {
    pub fn new(seed: u64) -> Self {
        let seed = (seed & SEED_MASK) | 1;
        Self {
            seed,
            permutation: derive_permutation(seed),
        }
    }

    /// Advance to the next field: step the seed and rebuild the table.
    pub fn begin_field(&mut self) {
        self.seed = lfsr_step(self.seed).max(1);
        self.permutation = derive_permutation(self.seed);
    }

    /// Source line for display position `i` within the field.
    #[inline]
    pub fn remap(&self, i: usize) -> usize {
        if i < LINES_PER_FIELD {
            self.permutation[i] as usize
        } else {
            i
        }
    }

    /// Current seed, for publication in the VBI data line.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// VBI payload: the 60-bit seed, low byte first.
    pub fn vbi_payload(&self) -> Vec<u8> {
        self.seed.to_le_bytes()[..8].to_vec()
    }
}
