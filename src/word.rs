//! 256-bit memory words carrying 16 Q8.8 elements.
//!
//! Element `i` occupies bits `[i·16+15 : i·16]`, little-element-first, so
//! lane 0 is the lowest 16 bits and the first two bytes of the LE byte view.
//! Raw integers never cross this boundary; everything goes through
//! [`Word256::lane`] / [`Word256::set_lane`].

use crate::fixed::I8F8;

/// Q8.8 elements per 256-bit word.
pub const WORD_LANES: usize = 16;

/// Bytes per 256-bit word.
pub const WORD_BYTES: usize = 32;

/// One 256-bit backing-store word viewed as 16 Q8.8 lanes.
#[repr(transparent)]
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct Word256 {
    lanes: [i16; WORD_LANES],
}

impl Word256 {
    pub const ZERO: Self = Self {
        lanes: [0; WORD_LANES],
    };

    /// Read lane `i`.
    #[inline(always)]
    pub fn lane(self, i: usize) -> I8F8 {
        I8F8::from_raw(self.lanes[i])
    }

    /// Overwrite lane `i`.
    #[inline(always)]
    pub fn set_lane(&mut self, i: usize, v: I8F8) {
        self.lanes[i] = v.to_raw();
    }

    /// Pack 16 elements, element 0 into the lowest bits.
    #[inline]
    pub fn pack(vals: &[I8F8; WORD_LANES]) -> Self {
        let mut w = Self::ZERO;
        for (i, &v) in vals.iter().enumerate() {
            w.lanes[i] = v.to_raw();
        }
        w
    }

    /// Unpack all 16 lanes.
    #[inline]
    pub fn unpack(self) -> [I8F8; WORD_LANES] {
        let mut out = [I8F8::ZERO; WORD_LANES];
        for (i, v) in out.iter_mut().enumerate() {
            *v = I8F8::from_raw(self.lanes[i]);
        }
        out
    }

    /// Bit-exact little-endian byte view (lane `i` at bytes `2i..2i+2`).
    pub fn to_le_bytes(self) -> [u8; WORD_BYTES] {
        let mut bytes = [0u8; WORD_BYTES];
        for (i, &raw) in self.lanes.iter().enumerate() {
            bytes[i * 2..i * 2 + 2].copy_from_slice(&raw.to_le_bytes());
        }
        bytes
    }

    pub fn from_le_bytes(bytes: &[u8; WORD_BYTES]) -> Self {
        let mut w = Self::ZERO;
        for i in 0..WORD_LANES {
            w.lanes[i] = i16::from_le_bytes([bytes[i * 2], bytes[i * 2 + 1]]);
        }
        w
    }
}

/// Words needed to hold `elems` elements (lengths round up to whole words).
#[inline(always)]
pub const fn words_for(elems: usize) -> usize {
    (elems + WORD_LANES - 1) / WORD_LANES
}

/// Read the element at flat index `idx` from a word region.
#[inline(always)]
pub fn read_elem(words: &[Word256], idx: usize) -> I8F8 {
    words[idx / WORD_LANES].lane(idx % WORD_LANES)
}

/// Write the element at flat index `idx` into a word region.
#[inline(always)]
pub fn write_elem(words: &mut [Word256], idx: usize, v: I8F8) {
    words[idx / WORD_LANES].set_lane(idx % WORD_LANES, v);
}

/// Pack a flat element slice into words, zero-padding the trailing slots.
pub fn pack_elements(elems: &[I8F8]) -> Vec<Word256> {
    let mut words = vec![Word256::ZERO; words_for(elems.len())];
    for (idx, &v) in elems.iter().enumerate() {
        write_elem(&mut words, idx, v);
    }
    words
}

/// Unpack the first `count` elements of a word region.
pub fn unpack_elements(words: &[Word256], count: usize) -> Vec<I8F8> {
    (0..count).map(|idx| read_elem(words, idx)).collect()
}
