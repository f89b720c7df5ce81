use super::event::EventStruct;
use super::metrics::LowBwSummary;

/// Common interface of the channel statistics engines.
///
/// An engine accumulates running statistics one event at a time, and writes its finished
/// per-channel values into a [`LowBwSummary`] on demand. Accumulated state is only ever reset
/// by an explicit call to `clear`.
pub trait StatsEngine {
    /// Update the running statistics with one event
    fn ingest(&mut self, event: &EventStruct);

    /// Write the finished statistics into the summary
    fn finalize(&self, summary: &mut LowBwSummary);

    /// Zero all accumulators and counters
    fn clear(&mut self);

    /// Number of events ingested since the last clear
    fn num_events(&self) -> usize;
}

/// Mean and variance (mean squared deviation) of the first `window` samples.
///
/// Uses fewer samples if the waveform is shorter. Returns None for an empty waveform.
pub fn baseline_variance(samples: &[u16], window: usize) -> Option<(f64, f64)> {
    let samples = &samples[..samples.len().min(window)];
    if samples.is_empty() {
        return None;
    }
    let n = samples.len() as f64;
    let baseline = samples.iter().map(|s| *s as f64).sum::<f64>() / n;
    let variance = samples
        .iter()
        .map(|s| (*s as f64 - baseline).powi(2))
        .sum::<f64>()
        / n;
    Some((baseline, variance))
}

/// Convert a finished RMS, multiplied by `scale`, to its telemetry word.
///
/// A negative variance sum can only come from floating point error; report the sentinel
/// instead of a NaN.
pub fn rms_word(variance_sum: f64, norm: f64, scale: f64) -> i32 {
    if variance_sum < 0.0 {
        i32::MAX
    } else {
        (scale * (variance_sum / norm).sqrt()) as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_baseline_variance_window() {
        let (baseline, variance) = baseline_variance(&[10, 10, 10, 10, 10, 100], 5).unwrap();
        assert_relative_eq!(baseline, 10.0);
        assert_relative_eq!(variance, 0.0);

        let (baseline, variance) = baseline_variance(&[1, 3], 8).unwrap();
        assert_relative_eq!(baseline, 2.0);
        assert_relative_eq!(variance, 1.0);

        assert!(baseline_variance(&[], 5).is_none());
    }

    #[test]
    fn test_rms_word_guard() {
        assert_eq!(rms_word(-1e-9, 1.0, 1.0), i32::MAX);
        assert_eq!(rms_word(-1e-9, 1.0, 8.0), i32::MAX);
        assert_eq!(rms_word(16.0, 4.0, 1.0), 2);
        assert_eq!(rms_word(16.0, 4.0, 8.0), 16);
        assert_eq!(rms_word(0.0, 1.0, 8.0), 0);
    }
}
