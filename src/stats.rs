//! Means, standard deviations, amplitude and phase of a burst

use crate::burst::{ChannelSet, SampleBurst};

pub fn amplitude(i: f64, q: f64) -> f64 {
    (i * i + q * q).sqrt()
}

/// Phase in degrees in the range (-90, 270]
pub fn phase(i: f64, q: f64) -> f64 {
    if i > 0.0 {
        (q / i).atan().to_degrees()
    } else if i < 0.0 {
        (q / i).atan().to_degrees() + 180.0
    } else if q > 0.0 {
        90.0
    } else if q < 0.0 {
        270.0
    } else {
        0.0
    }
}

fn after_skip<T>(values: &[T], skip: usize) -> &[T] {
    values.get(skip..).unwrap_or(&[])
}

fn average<T: Copy + Into<f64>>(values: &[T]) -> f64 {
    values.iter().map(|v| (*v).into()).sum::<f64>() / values.len() as f64
}

fn squared_deviations<T: Copy + Into<f64>>(values: &[T], mean: f64) -> f64 {
    values
        .iter()
        .map(|v| {
            let d = (*v).into() - mean;
            d * d
        })
        .sum()
}

/// Sample standard deviation from a sum of squared deviations over `n` samples
fn deviation(sum: f64, n: usize) -> f64 {
    if n < 2 {
        f64::NAN
    } else {
        (sum / (n - 1) as f64).sqrt()
    }
}

fn set_mean(set: &mut ChannelSet, skip: usize) {
    set.i.mean = average(after_skip(&set.i.values, skip));
    set.q.mean = average(after_skip(&set.q.values, skip));
    set.amplitude.mean = average(after_skip(&set.amplitude.values, skip));
    // From the mean vector, not the average of the per-sample phases
    set.phase.mean = phase(set.i.mean, set.q.mean);
}

fn set_std_dev(set: &mut ChannelSet, skip: usize) {
    let i = after_skip(&set.i.values, skip);
    let q = after_skip(&set.q.values, skip);
    let n = i.len();
    let di = squared_deviations(i, set.i.mean);
    let dq = squared_deviations(q, set.q.mean);
    let da = squared_deviations(after_skip(&set.amplitude.values, skip), set.amplitude.mean);
    set.i.std_dev = deviation(di, n);
    set.q.std_dev = deviation(dq, n);
    set.amplitude.std_dev = deviation(da, n);
    // Not a circular statistic: the phase spread is approximated by the
    // mean of the I and Q spreads
    set.phase.std_dev = deviation(di / 2.0 + dq / 2.0, n);
}

/// Means of every channel over samples `[skip, N)`
pub fn mean(burst: &mut SampleBurst, skip: usize) {
    for set in burst.sets_mut() {
        set_mean(set, skip);
    }
}

/// Standard deviations over samples `[skip, N)`, with divisor `N - skip - 1`.
/// Uses the means stored by [`mean`], which must run first with the same skip.
pub fn std_dev(burst: &mut SampleBurst, skip: usize) {
    for set in burst.sets_mut() {
        set_std_dev(set, skip);
    }
}

/// [`mean`] followed by [`std_dev`]
pub fn summarize(burst: &mut SampleBurst, skip: usize) {
    mean(burst, skip);
    std_dev(burst, skip);
}
