//! Block boundary recovery for the raw USB stream
//!
//! The device emits 9 byte blocks: a counter byte followed by four 12 bit
//! samples. There is no delimiter. The counter advances by 3 (mod 256) per
//! block, so its wraparound never lines up with a FIFO-full condition, and
//! that step is the only synchronization signal we have. A single matching
//! pair can be chance, so a run of blocks is required before we trust it.

use crate::{burst::SampleBurst, config::CalibrationOffsets, decode, BLOCK_LEN, RECORD_LEN};

const COUNTER_STEP: u8 = 3;
/// Blocks a run must exceed before the scan stops looking
const CONFIRMING_BLOCKS: usize = 10;

/// Whether `raw[i]` and `raw[i + 9]` are consecutive counter bytes
fn counter_follows(raw: &[u8], i: usize) -> bool {
    match (raw.get(i), raw.get(i + BLOCK_LEN)) {
        (Some(a), Some(b)) => *b == a.wrapping_add(COUNTER_STEP),
        _ => false,
    }
}

/// Offsets of the first and last counter byte of the synchronized run
pub fn synchronize(raw: &[u8]) -> (usize, usize) {
    let n = raw.len();
    let mut first = 0;
    let mut last = 0;
    for i in 0..n.saturating_sub(BLOCK_LEN) {
        if counter_follows(raw, i) {
            first = i;
            last = i;
            let mut j = i;
            while j + BLOCK_LEN < n && counter_follows(raw, j) {
                last = j;
                j += BLOCK_LEN;
            }
        }
        if last - first > CONFIRMING_BLOCKS * BLOCK_LEN {
            break;
        }
    }
    // The walk stops on the last block that still has a successor; pick up
    // that successor if it is complete
    if n - last > (BLOCK_LEN - 1) + BLOCK_LEN && counter_follows(raw, last) {
        last += BLOCK_LEN;
    }
    (first, last)
}

/// Records must start on an even counter, which fixes the H/V phase
pub fn align_even(raw: &[u8], first: usize) -> usize {
    match raw.get(first) {
        Some(counter) if counter % 2 != 0 => first + BLOCK_LEN,
        _ => first,
    }
}

/// One transport read together with its recovered block boundaries
#[derive(Clone, Debug)]
pub struct RawFrame {
    pub bytes: Vec<u8>,
    pub first: usize,
    pub last: usize,
}

impl RawFrame {
    /// Synchronize and align `bytes`
    pub fn recover(bytes: Vec<u8>) -> Self {
        let (first, last) = synchronize(&bytes);
        let first = align_even(&bytes, first);
        Self { bytes, first, last }
    }

    /// Bytes covered from the first counter to the end of the last block
    pub fn span(&self) -> usize {
        (self.last + BLOCK_LEN).saturating_sub(self.first)
    }

    /// Whether the span holds only whole H/V records
    pub fn is_whole_records(&self) -> bool {
        self.span() > 0 && self.span() % RECORD_LEN == 0
    }

    pub fn decode(&self, offsets: &CalibrationOffsets) -> SampleBurst {
        decode::decode(&self.bytes, self.first, self.last, offsets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ramp, stream};
    use rand::{rngs::StdRng, Rng, SeedableRng};

    /// `k` random bytes that cannot chain into the counter run behind them
    fn garbage(k: usize, first_counter: u8, rng: &mut StdRng) -> Vec<u8> {
        let mut out: Vec<u8> = (0..k).map(|_| rng.gen()).collect();
        if k >= BLOCK_LEN {
            let pos = k - BLOCK_LEN;
            if out[pos].wrapping_add(COUNTER_STEP) == first_counter {
                out[pos] = first_counter;
            }
        }
        out
    }

    #[test]
    fn test_clean_stream() {
        let raw = stream(0, &ramp(16, 5));
        let (first, last) = synchronize(&raw);
        assert_eq!(first, 0);
        assert_eq!(last, raw.len() - BLOCK_LEN);
    }

    #[test]
    fn test_finds_start_after_garbage() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for k in [1, 5, 9, 13, 40, 127] {
            let mut raw = garbage(k, 0, &mut rng);
            raw.extend(stream(0, &ramp(16, 3)));
            let (first, _) = synchronize(&raw);
            assert_eq!(first, k, "garbage prefix of {k} bytes");
        }
    }

    #[test]
    fn test_counter_wraparound() {
        let mut rng = StdRng::seed_from_u64(7);
        // 253 -> 0, 254 -> 1 and 255 -> 2 each appear in one of these runs
        for start in [250u8, 251, 252] {
            let mut raw = garbage(11, start, &mut rng);
            raw.extend(stream(start, &ramp(12, 1)));
            let (first, last) = synchronize(&raw);
            assert_eq!(first, 11);
            assert_eq!(last, raw.len() - BLOCK_LEN);
        }
    }

    #[test]
    fn test_trailing_block_is_kept() {
        let mut raw = stream(0, &ramp(12, 1));
        raw.truncate(raw.len() - BLOCK_LEN);
        let (_, last) = synchronize(&raw);
        assert_eq!(last, raw.len() - BLOCK_LEN);
    }

    #[test]
    fn test_partial_trailing_block_is_dropped() {
        let mut raw = stream(0, &ramp(12, 1));
        raw.truncate(raw.len() - 4);
        let (_, last) = synchronize(&raw);
        assert_eq!(last, raw.len() + 4 - 2 * BLOCK_LEN);
    }

    #[test]
    fn test_no_counter_pattern() {
        assert_eq!(synchronize(&[0x11; 64]), (0, 0));
        assert_eq!(synchronize(&[]), (0, 0));
        assert_eq!(synchronize(&[1, 2, 3]), (0, 0));
    }

    #[test]
    fn test_odd_counter_is_skipped() {
        let records = ramp(12, 1);
        let raw = stream(0, &records);
        // Start reading one block in, on counter 3
        let frame = RawFrame::recover(raw[BLOCK_LEN..].to_vec());
        assert_eq!(frame.first, BLOCK_LEN);
        assert_eq!(frame.span(), 11 * RECORD_LEN);
        assert!(frame.is_whole_records());
        let burst = frame.decode(&CalibrationOffsets::zero());
        assert_eq!(burst.len(), 11);
        assert_eq!(burst.iq_row(0), records[1]);
    }

    #[test]
    fn test_odd_block_count_is_not_whole() {
        let raw = stream(0, &ramp(12, 1));
        let frame = RawFrame::recover(raw[..raw.len() - BLOCK_LEN].to_vec());
        assert_eq!(frame.span(), 23 * BLOCK_LEN);
        assert!(!frame.is_whole_records());
    }

    #[test]
    fn test_whole_records() {
        let frame = RawFrame::recover(stream(0, &ramp(12, 1)));
        assert_eq!(frame.span(), 12 * RECORD_LEN);
        assert!(frame.is_whole_records());
    }
}
