//! Unpacking of synchronized records into calibrated samples
//!
//! An 18 byte record is two blocks, the first on an even counter:
//!
//! ```text
//! [C0 Q35h Q35h I35h I35h Q22v Q22v I22v I22v]
//! [C1 Q35v Q35v I35v I35v Q22h Q22h I22h I22h]
//! ```
//!
//! Each sample is two bytes: the low nibble of the first byte holds bits
//! 0..4, the second byte holds bits 4..12.

use crate::{
    burst::SampleBurst,
    config::CalibrationOffsets,
    protocol::{Band, Polarization},
    BLOCK_LEN, RECORD_LEN,
};

/// Byte offset of each (I, Q) pair inside a record
const LAYOUT: [(Polarization, Band, usize, usize); 4] = [
    (Polarization::H, Band::Ghz35, 3, 1),
    (Polarization::V, Band::Ghz22, 7, 5),
    (Polarization::V, Band::Ghz35, 12, 10),
    (Polarization::H, Band::Ghz22, 16, 14),
];

/// 12 bit two's complement sample from its two stream bytes
pub fn unpack_sample(lo: u8, hi: u8) -> i16 {
    let raw = (lo & 0x0F) as i16 + 16 * hi as i16;
    if raw > 2047 {
        raw - 4096
    } else {
        raw
    }
}

/// Inverse of [`unpack_sample`]; the unused upper nibble is left clear
pub fn encode_sample(value: i16) -> [u8; 2] {
    let raw = (value as u16) & 0x0FFF;
    [(raw & 0x0F) as u8, (raw >> 4) as u8]
}

/// Decode every complete record between the counter bytes `first` and `last`
pub fn decode(raw: &[u8], first: usize, last: usize, offsets: &CalibrationOffsets) -> SampleBurst {
    let end = (last + BLOCK_LEN).min(raw.len());
    let bytes = raw.get(first..end).unwrap_or(&[]);
    let mut burst = SampleBurst::with_capacity(bytes.len() / RECORD_LEN);
    for record in bytes.chunks_exact(RECORD_LEN) {
        for (pol, band, i_at, q_at) in LAYOUT {
            let (i_off, q_off) = match band {
                Band::Ghz22 => (offsets.i22, offsets.q22),
                Band::Ghz35 => (offsets.i35, offsets.q35),
            };
            let i = unpack_sample(record[i_at], record[i_at + 1]).saturating_sub(i_off);
            let q = unpack_sample(record[q_at], record[q_at + 1]).saturating_sub(q_off);
            burst.channels_mut(pol, band).push(i, q);
        }
    }
    burst
}
