//! Scripted transport and stream builders shared by the unit tests

use std::{
    collections::{HashMap, VecDeque},
    io,
    time::Duration,
};

use crate::{
    decode::encode_sample,
    protocol::{DONE, OK},
    transport::Transport,
    BLOCK_LEN, RECORD_LEN,
};

/// In-memory device: replies are queued as chunks and a read never crosses a
/// chunk boundary, so one chunk stands for one device transmission.
#[derive(Default)]
pub struct MockTransport {
    pub written: Vec<u8>,
    pub purges: usize,
    pub timeouts: Vec<(Duration, Duration)>,
    /// Make `set_timeouts` fail, as a port that has gone away does
    pub fail_timeouts: bool,
    echo: bool,
    corrupt: HashMap<usize, u8>,
    replies: VecDeque<VecDeque<u8>>,
}

impl MockTransport {
    /// Device that echoes every written byte back, as the firmware does
    pub fn echoing() -> Self {
        Self {
            echo: true,
            ..Default::default()
        }
    }

    /// Device that only answers with the scripted replies
    pub fn silent() -> Self {
        Self::default()
    }

    pub fn reply(&mut self, bytes: &[u8]) -> &mut Self {
        self.replies.push_back(bytes.iter().copied().collect());
        self
    }

    /// Queue the OK/DONE acknowledgment of a set command
    pub fn ack(&mut self) -> &mut Self {
        self.reply(&[OK]).reply(&[DONE])
    }

    /// Echo `value` instead of the `nth` byte ever written
    pub fn corrupt_echo(&mut self, nth: usize, value: u8) -> &mut Self {
        self.corrupt.insert(nth, value);
        self
    }

    pub fn pending_replies(&self) -> usize {
        self.replies.len()
    }
}

impl Transport for MockTransport {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        let start = self.written.len();
        self.written.extend_from_slice(bytes);
        if self.echo {
            let echo = bytes
                .iter()
                .enumerate()
                .map(|(k, b)| *self.corrupt.get(&(start + k)).unwrap_or(b))
                .collect();
            self.replies.push_front(echo);
        }
        Ok(())
    }

    fn read(&mut self, n: usize) -> io::Result<Vec<u8>> {
        let Some(front) = self.replies.front_mut() else {
            return Ok(Vec::new());
        };
        let take = n.min(front.len());
        let out: Vec<u8> = front.drain(..take).collect();
        if front.is_empty() {
            self.replies.pop_front();
        }
        Ok(out)
    }

    fn purge(&mut self) -> io::Result<()> {
        // Scripted replies survive so later attempts can be queued up front
        self.purges += 1;
        Ok(())
    }

    fn set_timeouts(&mut self, read: Duration, write: Duration) -> io::Result<()> {
        if self.fail_timeouts {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "port closed"));
        }
        self.timeouts.push((read, write));
        Ok(())
    }
}

/// Channel values of one record in output column order:
/// H I35, H Q35, H I22, H Q22, V I35, V Q35, V I22, V Q22
pub type RecordValues = [i16; 8];

/// Byte offsets of each column inside an 18 byte record
const COLUMN_OFFSETS: [usize; 8] = [3, 1, 16, 14, 12, 10, 7, 5];

/// Encode `records` into a device stream whose first counter is `first_counter`
pub fn stream(first_counter: u8, records: &[RecordValues]) -> Vec<u8> {
    let mut out = Vec::with_capacity(records.len() * RECORD_LEN);
    for (r, values) in records.iter().enumerate() {
        let mut record = [0u8; RECORD_LEN];
        record[0] = first_counter.wrapping_add((6 * r) as u8);
        record[BLOCK_LEN] = record[0].wrapping_add(3);
        for (value, offset) in values.iter().zip(COLUMN_OFFSETS) {
            let [lo, hi] = encode_sample(*value);
            // Upper nibble of the low byte carries no data
            record[offset] = lo | 0xA0;
            record[offset + 1] = hi;
        }
        out.extend_from_slice(&record);
    }
    out
}

/// `n` records with distinct, recognizable values
pub fn ramp(n: usize, seed: i16) -> Vec<RecordValues> {
    (0..n)
        .map(|k| {
            let k = k as i16;
            [
                seed + k,
                seed - k,
                2 * seed + k,
                -seed,
                k,
                -k,
                seed,
                3 * k - seed,
            ]
        })
        .collect()
}
