use bit_set::BitSet;
use rand::Rng;

use super::constants::*;
use super::engine::{baseline_variance, rms_word, StatsEngine};
use super::error::HistogramError;
use super::event::EventStruct;
use super::histogram::Histogram;
use super::metrics::{ChargeEventDump, FullSummary, LowBwSummary};

/// Running statistics of the charge (TPC wire) channels.
///
/// Per event, each channel's baseline and variance are taken from its first
/// [`CHARGE_BASELINE_SAMPLES`] samples. The sums over events are kept, and the averages are
/// only formed in `finalize`. Hits are counted against the same event's baseline & variance.
#[derive(Debug, Clone)]
pub struct ChargeStats {
    hit_threshold: f64,
    baseline: [f64; NUM_CHARGE_CHANNELS],
    variance: [f64; NUM_CHARGE_CHANNELS],
    hits: [u64; NUM_CHARGE_CHANNELS],
    num_events: usize,
    num_fems: usize,
    num_channels: usize,
    histograms: Vec<Histogram>,
    waveforms: Vec<ChargeEventDump>,
    populated: BitSet,
}

impl ChargeStats {
    /// Create a new engine with hit threshold multiplier `hit_threshold`
    pub fn new(hit_threshold: f64) -> Result<Self, HistogramError> {
        let histogram = Histogram::new(CHARGE_HIST_MIN, CHARGE_HIST_MAX, CHARGE_HIST_BINS)?;
        Ok(Self {
            hit_threshold,
            baseline: [0.0; NUM_CHARGE_CHANNELS],
            variance: [0.0; NUM_CHARGE_CHANNELS],
            hits: [0; NUM_CHARGE_CHANNELS],
            num_events: 0,
            num_fems: 0,
            num_channels: 0,
            histograms: vec![histogram; NUM_CHARGE_CHANNELS],
            waveforms: (0..NUM_CHARGE_CHANNELS)
                .map(|ch| ChargeEventDump::from_waveform(ch, &[], 0))
                .collect(),
            populated: BitSet::with_capacity(NUM_CHARGE_CHANNELS),
        })
    }

    /// Count the samples above `baseline + k * rms + 1`
    fn count_hits(&self, waveform: &[u16], baseline: f64, variance: f64) -> u64 {
        let threshold = baseline + self.hit_threshold * variance.abs().sqrt() + 1.0;
        waveform
            .iter()
            .filter(|adc| **adc as f64 > threshold)
            .count() as u64
    }

    /// Fill the per-channel sample distributions with every sample of the event
    pub fn fill_histograms(&mut self, event: &EventStruct) {
        for (channel, waveform) in event.charge_waveforms() {
            if let Some(hist) = self.histograms.get_mut(channel) {
                waveform.iter().for_each(|adc| hist.fill(*adc as i32));
            }
        }
    }

    /// Copy the charge distributions into the full summary
    pub fn finalize_histograms(&self, summary: &mut FullSummary) {
        summary.num_fems = self.num_fems as i32;
        summary.num_charge_channels = self.num_channels as i32;
        summary.charge_histograms.clone_from(&self.histograms);
    }

    /// Store the dump window of every in-range channel of the event
    pub fn capture_event(&mut self, event: &EventStruct) {
        self.num_fems = event.slot_number.len();
        self.num_channels = event.charge_channel.len();
        for (channel, waveform) in event.charge_waveforms() {
            if channel >= NUM_CHARGE_CHANNELS {
                spdlog::trace!("Skipping charge channel {channel} in dump; out of range");
                continue;
            }
            self.waveforms[channel] =
                ChargeEventDump::from_waveform(channel, waveform, CHARGE_DUMP_OFFSET);
            self.populated.insert(channel);
        }
    }

    /// The captured dump of a channel, if that channel was present in the captured event
    pub fn dump(&self, channel: usize) -> Option<&ChargeEventDump> {
        if self.populated.contains(channel) {
            self.waveforms.get(channel)
        } else {
            None
        }
    }

    /// All captured dumps in ascending channel order
    pub fn dumps(&self) -> impl Iterator<Item = &ChargeEventDump> {
        self.populated.iter().map(|ch| &self.waveforms[ch])
    }

    /// One captured dump drawn uniformly from the populated channels
    pub fn random_dump<R: Rng>(&self, rng: &mut R) -> Option<&ChargeEventDump> {
        if self.populated.is_empty() {
            return None;
        }
        let pick = rng.random_range(0..self.populated.len());
        self.populated.iter().nth(pick).map(|ch| &self.waveforms[ch])
    }

    pub fn populated_channels(&self) -> &BitSet {
        &self.populated
    }

    pub fn baseline_sum(&self, channel: usize) -> f64 {
        self.baseline[channel]
    }

    pub fn variance_sum(&self, channel: usize) -> f64 {
        self.variance[channel]
    }

    pub fn hit_count(&self, channel: usize) -> u64 {
        self.hits[channel]
    }
}

impl StatsEngine for ChargeStats {
    fn ingest(&mut self, event: &EventStruct) {
        self.num_fems = event.slot_number.len();
        self.num_channels = event.charge_channel.len();
        for (channel, waveform) in event.charge_waveforms() {
            if channel >= NUM_CHARGE_CHANNELS {
                spdlog::trace!("Skipping charge channel {channel}; out of range");
                continue;
            }
            let Some((baseline, variance)) =
                baseline_variance(waveform, CHARGE_BASELINE_SAMPLES)
            else {
                spdlog::trace!("Skipping charge channel {channel}; empty waveform");
                continue;
            };
            self.baseline[channel] += baseline;
            self.variance[channel] += variance;
            self.hits[channel] += self.count_hits(waveform, baseline, variance);
        }
        self.num_events += 1;
    }

    fn finalize(&self, summary: &mut LowBwSummary) {
        let n = self.num_events.max(1) as f64;
        summary.num_fems = self.num_fems as i32;
        summary.num_charge_channels = self.num_channels as i32;
        for ch in 0..NUM_CHARGE_CHANNELS {
            summary.charge_baseline[ch] = (self.baseline[ch] / n) as i32;
            summary.charge_rms[ch] = rms_word(self.variance[ch], n, 1.0);
            summary.charge_avg_hits[ch] = (self.hits[ch] as f64 / n) as i32;
        }
    }

    fn clear(&mut self) {
        self.baseline = [0.0; NUM_CHARGE_CHANNELS];
        self.variance = [0.0; NUM_CHARGE_CHANNELS];
        self.hits = [0; NUM_CHARGE_CHANNELS];
        self.num_events = 0;
        self.num_fems = 0;
        self.num_channels = 0;
        self.histograms.iter_mut().for_each(Histogram::reset);
        self.populated.clear();
    }

    fn num_events(&self) -> usize {
        self.num_events
    }
}
