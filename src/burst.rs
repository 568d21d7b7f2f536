//! Per-channel sample arrays of one acquisition

use crate::protocol::{Band, Polarization};

/// Order of the polarization/band pairs in every output file
pub const CHANNEL_ORDER: [(Polarization, Band); 4] = [
    (Polarization::H, Band::Ghz35),
    (Polarization::H, Band::Ghz22),
    (Polarization::V, Band::Ghz35),
    (Polarization::V, Band::Ghz22),
];

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Channel<T> {
    pub values: Vec<T>,
    pub mean: f64,
    pub std_dev: f64,
}

impl<T> Channel<T> {
    fn with_capacity(n: usize) -> Self {
        Self {
            values: Vec::with_capacity(n),
            mean: f64::NAN,
            std_dev: f64::NAN,
        }
    }
}

/// Raw I/Q plus derived amplitude and phase of one polarization and band
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChannelSet {
    pub i: Channel<i16>,
    pub q: Channel<i16>,
    pub amplitude: Channel<f64>,
    /// Phase in degrees
    pub phase: Channel<f64>,
}

impl ChannelSet {
    fn with_capacity(n: usize) -> Self {
        Self {
            i: Channel::with_capacity(n),
            q: Channel::with_capacity(n),
            amplitude: Channel::with_capacity(n),
            phase: Channel::with_capacity(n),
        }
    }

    /// Append one I/Q sample together with its derived values
    pub fn push(&mut self, i: i16, q: i16) {
        let (fi, fq) = (i as f64, q as f64);
        self.i.values.push(i);
        self.q.values.push(q);
        self.amplitude.values.push(crate::stats::amplitude(fi, fq));
        self.phase.values.push(crate::stats::phase(fi, fq));
    }

    pub fn len(&self) -> usize {
        self.i.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One burst: 16 channels (8 raw I/Q, 8 derived) of identical length
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SampleBurst {
    sets: [ChannelSet; 4],
}

fn slot(pol: Polarization, band: Band) -> usize {
    match (pol, band) {
        (Polarization::H, Band::Ghz35) => 0,
        (Polarization::H, Band::Ghz22) => 1,
        (Polarization::V, Band::Ghz35) => 2,
        (Polarization::V, Band::Ghz22) => 3,
    }
}

impl SampleBurst {
    pub fn with_capacity(n: usize) -> Self {
        Self {
            sets: [
                ChannelSet::with_capacity(n),
                ChannelSet::with_capacity(n),
                ChannelSet::with_capacity(n),
                ChannelSet::with_capacity(n),
            ],
        }
    }

    /// Samples per channel
    pub fn len(&self) -> usize {
        self.sets[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn channels(&self, pol: Polarization, band: Band) -> &ChannelSet {
        &self.sets[slot(pol, band)]
    }

    pub fn channels_mut(&mut self, pol: Polarization, band: Band) -> &mut ChannelSet {
        &mut self.sets[slot(pol, band)]
    }

    /// All four channel sets in [`CHANNEL_ORDER`]
    pub fn sets(&self) -> &[ChannelSet; 4] {
        &self.sets
    }

    pub fn sets_mut(&mut self) -> &mut [ChannelSet; 4] {
        &mut self.sets
    }

    /// Raw I/Q of sample `k` in output column order
    pub fn iq_row(&self, k: usize) -> [i16; 8] {
        let mut row = [0i16; 8];
        for (n, set) in self.sets.iter().enumerate() {
            row[2 * n] = set.i.values[k];
            row[2 * n + 1] = set.q.values[k];
        }
        row
    }

    /// Mean I and Q of every set in output column order
    pub fn iq_means(&self) -> [f64; 8] {
        let mut out = [0.0; 8];
        for (n, set) in self.sets.iter().enumerate() {
            out[2 * n] = set.i.mean;
            out[2 * n + 1] = set.q.mean;
        }
        out
    }

    /// Mean amplitude and phase of every set in output column order
    pub fn amp_phase_means(&self) -> [f64; 8] {
        let mut out = [0.0; 8];
        for (n, set) in self.sets.iter().enumerate() {
            out[2 * n] = set.amplitude.mean;
            out[2 * n + 1] = set.phase.mean;
        }
        out
    }

    pub fn amp_phase_std_devs(&self) -> [f64; 8] {
        let mut out = [0.0; 8];
        for (n, set) in self.sets.iter().enumerate() {
            out[2 * n] = set.amplitude.std_dev;
            out[2 * n + 1] = set.phase.std_dev;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slots_follow_channel_order() {
        for (n, (pol, band)) in CHANNEL_ORDER.iter().enumerate() {
            assert_eq!(slot(*pol, *band), n);
        }
    }

    #[test]
    fn test_push_keeps_all_arrays_in_step() {
        let mut burst = SampleBurst::with_capacity(2);
        for set in burst.sets_mut() {
            set.push(3, 4);
        }
        let set = burst.channels(Polarization::V, Band::Ghz22);
        assert_eq!(set.amplitude.values, vec![5.0]);
        assert_eq!(set.phase.values.len(), 1);
        assert_eq!(burst.len(), 1);
        assert_eq!(burst.iq_row(0), [3, 4, 3, 4, 3, 4, 3, 4]);
    }
}
