use rand::Rng;

use super::constants::*;
use super::engine::{baseline_variance, rms_word, StatsEngine};
use super::error::HistogramError;
use super::event::EventStruct;
use super::histogram::Histogram;
use super::metrics::{FullSummary, LightEventDump, LowBwSummary};

/// Running statistics of the light (SiPM) channels.
///
/// Only ROIs from the unbiased beam gate readout ([`BEAM_GATE_DISC_ID`]) give a baseline & RMS
/// sample. Not every event has a beam gate ROI on every channel, so those sums are normalized
/// per channel. All other ROIs only count towards the ROI rate.
#[derive(Debug, Clone)]
pub struct LightStats {
    readout_scale: f64,
    baseline: [f64; NUM_LIGHT_CHANNELS],
    variance: [f64; NUM_LIGHT_CHANNELS],
    baseline_norm: [u64; NUM_LIGHT_CHANNELS],
    rois: [u64; NUM_LIGHT_CHANNELS],
    num_events: usize,
    num_channels: usize,
    histograms: Vec<Histogram>,
    cosmic_rois: Vec<LightEventDump>,
}

impl LightStats {
    /// Create a new engine. The unbiased readout runs at a fraction of the full rate, so the RMS
    /// and the ROI rate are multiplied by `readout_scale`.
    pub fn new(readout_scale: f64) -> Result<Self, HistogramError> {
        let histogram = Histogram::new(LIGHT_HIST_MIN, LIGHT_HIST_MAX, LIGHT_HIST_BINS)?;
        Ok(Self {
            readout_scale,
            baseline: [0.0; NUM_LIGHT_CHANNELS],
            variance: [0.0; NUM_LIGHT_CHANNELS],
            baseline_norm: [0; NUM_LIGHT_CHANNELS],
            rois: [0; NUM_LIGHT_CHANNELS],
            num_events: 0,
            num_channels: 0,
            histograms: vec![histogram; NUM_LIGHT_CHANNELS],
            cosmic_rois: Vec::new(),
        })
    }

    pub fn fill_histograms(&mut self, event: &EventStruct) {
        for (channel, _, roi) in event.light_rois() {
            if let Some(hist) = self.histograms.get_mut(channel) {
                roi.iter().for_each(|adc| hist.fill(*adc as i32));
            }
        }
    }

    pub fn finalize_histograms(&self, summary: &mut FullSummary) {
        summary.num_light_channels = self.num_channels as i32;
        summary.light_histograms.clone_from(&self.histograms);
    }

    /// Store every cosmic ROI of the event along with its channel
    pub fn capture_event(&mut self, event: &EventStruct) {
        self.num_channels = event.light_channel.len();
        for (channel, trigger_id, roi) in event.light_rois() {
            if trigger_id != COSMIC_DISC_ID {
                continue;
            }
            if channel >= NUM_LIGHT_CHANNELS {
                spdlog::trace!("Skipping light channel {channel} in dump; out of range");
                continue;
            }
            self.cosmic_rois
                .push(LightEventDump::from_waveform(channel, roi, 0));
        }
    }

    /// The first captured cosmic ROI of a channel
    pub fn dump(&self, channel: usize) -> Option<&LightEventDump> {
        self.cosmic_rois
            .iter()
            .find(|roi| roi.channel == channel as i32)
    }

    /// All captured cosmic ROIs in readout order
    pub fn dumps(&self) -> impl Iterator<Item = &LightEventDump> {
        self.cosmic_rois.iter()
    }

    /// One captured cosmic ROI drawn uniformly
    pub fn random_dump<R: Rng>(&self, rng: &mut R) -> Option<&LightEventDump> {
        if self.cosmic_rois.is_empty() {
            return None;
        }
        self.cosmic_rois
            .get(rng.random_range(0..self.cosmic_rois.len()))
    }

    pub fn baseline_sum(&self, channel: usize) -> f64 {
        self.baseline[channel]
    }

    pub fn baseline_norm(&self, channel: usize) -> u64 {
        self.baseline_norm[channel]
    }

    pub fn roi_count(&self, channel: usize) -> u64 {
        self.rois[channel]
    }
}

impl StatsEngine for LightStats {
    fn ingest(&mut self, event: &EventStruct) {
        self.num_channels = event.light_channel.len();
        for (channel, trigger_id, roi) in event.light_rois() {
            if channel >= NUM_LIGHT_CHANNELS {
                spdlog::trace!("Skipping light channel {channel}; out of range");
                continue;
            }
            if trigger_id != BEAM_GATE_DISC_ID {
                self.rois[channel] += 1;
                continue;
            }
            if let Some((baseline, variance)) = baseline_variance(roi, LIGHT_BASELINE_SAMPLES) {
                self.baseline_norm[channel] += 1;
                self.baseline[channel] += baseline;
                self.variance[channel] += variance;
            }
        }
        self.num_events += 1;
    }

    fn finalize(&self, summary: &mut LowBwSummary) {
        let n = self.num_events.max(1) as f64;
        summary.num_light_channels = self.num_channels as i32;
        for ch in 0..NUM_LIGHT_CHANNELS {
            let norm = self.baseline_norm[ch].max(1) as f64;
            summary.light_baseline[ch] = (self.baseline[ch] / norm) as i32;
            summary.light_rms[ch] = rms_word(self.variance[ch], norm, self.readout_scale);
            summary.light_avg_rois[ch] = (self.readout_scale * self.rois[ch] as f64 / n) as i32;
        }
    }

    fn clear(&mut self) {
        self.baseline = [0.0; NUM_LIGHT_CHANNELS];
        self.variance = [0.0; NUM_LIGHT_CHANNELS];
        self.baseline_norm = [0; NUM_LIGHT_CHANNELS];
        self.rois = [0; NUM_LIGHT_CHANNELS];
        self.num_events = 0;
        self.num_channels = 0;
        self.histograms.iter_mut().for_each(Histogram::reset);
        self.cosmic_rois.clear();
    }

    fn num_events(&self) -> usize {
        self.num_events
    }
}
