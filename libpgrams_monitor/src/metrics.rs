//! Metric aggregates sent to the ground station.
//!
//! Every metric flattens to a sequence of i32 words. On the wire the sequence is carried as the
//! arguments of a [`Command`] whose opcode is the [`MetricKind`] of the payload.
use super::command::Command;
use super::constants::*;
use super::error::MetricError;
use super::histogram::{Histogram, HISTOGRAM_HEADER_LEN};

/// Reserved telemetry identifiers, one per metric kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum MetricKind {
    LowBwSummary = 0x24,
    FullSummary = 0x25,
    ChargeEvent = 0x26,
    LightEvent = 0x27,
}

impl MetricKind {
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            0x24 => Some(Self::LowBwSummary),
            0x25 => Some(Self::FullSummary),
            0x26 => Some(Self::ChargeEvent),
            0x27 => Some(Self::LightEvent),
            _ => None,
        }
    }

    /// Wrap a serialized payload into an outbound telemetry command
    pub fn to_command(self, payload: Vec<i32>) -> Command {
        Command::new(self as u16, payload)
    }
}

const LOW_BW_HEADER_LEN: usize = 3;
const LOW_BW_LEN: usize = LOW_BW_HEADER_LEN + 3 * NUM_CHARGE_CHANNELS + 3 * NUM_LIGHT_CHANNELS;

/// The reduced per-channel summary sized for the constrained downlink.
///
/// Layout:
///
/// ```text
/// [num_fems, num_charge_channels, num_light_channels,
///  charge_baseline[64], charge_rms[64], charge_avg_hits[64],
///  light_baseline[32], light_rms[32], light_avg_rois[32]]
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LowBwSummary {
    pub num_fems: i32,
    pub num_charge_channels: i32,
    pub num_light_channels: i32,
    pub charge_baseline: [i32; NUM_CHARGE_CHANNELS],
    pub charge_rms: [i32; NUM_CHARGE_CHANNELS],
    pub charge_avg_hits: [i32; NUM_CHARGE_CHANNELS],
    pub light_baseline: [i32; NUM_LIGHT_CHANNELS],
    pub light_rms: [i32; NUM_LIGHT_CHANNELS],
    pub light_avg_rois: [i32; NUM_LIGHT_CHANNELS],
}

impl Default for LowBwSummary {
    fn default() -> Self {
        Self {
            num_fems: 0,
            num_charge_channels: 0,
            num_light_channels: 0,
            charge_baseline: [0; NUM_CHARGE_CHANNELS],
            charge_rms: [0; NUM_CHARGE_CHANNELS],
            charge_avg_hits: [0; NUM_CHARGE_CHANNELS],
            light_baseline: [0; NUM_LIGHT_CHANNELS],
            light_rms: [0; NUM_LIGHT_CHANNELS],
            light_avg_rois: [0; NUM_LIGHT_CHANNELS],
        }
    }
}

impl LowBwSummary {
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn serialize(&self) -> Vec<i32> {
        let mut data = Vec::with_capacity(LOW_BW_LEN);
        data.extend_from_slice(&[
            self.num_fems,
            self.num_charge_channels,
            self.num_light_channels,
        ]);
        data.extend_from_slice(&self.charge_baseline);
        data.extend_from_slice(&self.charge_rms);
        data.extend_from_slice(&self.charge_avg_hits);
        data.extend_from_slice(&self.light_baseline);
        data.extend_from_slice(&self.light_rms);
        data.extend_from_slice(&self.light_avg_rois);
        data
    }

    pub fn deserialize(data: &[i32]) -> Result<Self, MetricError> {
        if data.len() != LOW_BW_LEN {
            return Err(MetricError::SizeMismatch {
                expected: LOW_BW_LEN,
                found: data.len(),
            });
        }
        let mut summary = Self {
            num_fems: data[0],
            num_charge_channels: data[1],
            num_light_channels: data[2],
            ..Default::default()
        };
        let mut chunks = data[LOW_BW_HEADER_LEN..].chunks_exact(NUM_CHARGE_CHANNELS);
        for dest in [
            &mut summary.charge_baseline,
            &mut summary.charge_rms,
            &mut summary.charge_avg_hits,
        ] {
            if let Some(chunk) = chunks.next() {
                dest.copy_from_slice(chunk);
            }
        }
        let light_start = LOW_BW_HEADER_LEN + 3 * NUM_CHARGE_CHANNELS;
        let mut chunks = data[light_start..].chunks_exact(NUM_LIGHT_CHANNELS);
        for dest in [
            &mut summary.light_baseline,
            &mut summary.light_rms,
            &mut summary.light_avg_rois,
        ] {
            if let Some(chunk) = chunks.next() {
                dest.copy_from_slice(chunk);
            }
        }
        Ok(summary)
    }
}

/// The histogram based summary, one distribution per channel.
///
/// Layout is the three counts followed by every charge histogram and then every light
/// histogram, each in the [`Histogram`] serialized form.
#[derive(Debug, Clone, PartialEq)]
pub struct FullSummary {
    pub num_fems: i32,
    pub num_charge_channels: i32,
    pub num_light_channels: i32,
    pub charge_histograms: Vec<Histogram>,
    pub light_histograms: Vec<Histogram>,
}

impl FullSummary {
    /// Create a FullSummary with empty flight-configuration histograms
    pub fn new() -> Result<Self, MetricError> {
        Ok(Self {
            num_fems: 0,
            num_charge_channels: 0,
            num_light_channels: 0,
            charge_histograms: vec![
                Histogram::new(CHARGE_HIST_MIN, CHARGE_HIST_MAX, CHARGE_HIST_BINS)?;
                NUM_CHARGE_CHANNELS
            ],
            light_histograms: vec![
                Histogram::new(LIGHT_HIST_MIN, LIGHT_HIST_MAX, LIGHT_HIST_BINS)?;
                NUM_LIGHT_CHANNELS
            ],
        })
    }

    pub fn clear(&mut self) {
        self.num_fems = 0;
        self.num_charge_channels = 0;
        self.num_light_channels = 0;
        self.charge_histograms.iter_mut().for_each(Histogram::reset);
        self.light_histograms.iter_mut().for_each(Histogram::reset);
    }

    pub fn serialize(&self) -> Vec<i32> {
        let mut data = vec![
            self.num_fems,
            self.num_charge_channels,
            self.num_light_channels,
        ];
        for hist in self
            .charge_histograms
            .iter()
            .chain(self.light_histograms.iter())
        {
            hist.serialize_into(&mut data);
        }
        data
    }

    pub fn deserialize(data: &[i32]) -> Result<Self, MetricError> {
        if data.len() < 3 {
            return Err(MetricError::DataTooShort(data.len()));
        }
        let mut rest = &data[3..];
        let charge_histograms = Self::take_histograms(&mut rest, NUM_CHARGE_CHANNELS)?;
        let light_histograms = Self::take_histograms(&mut rest, NUM_LIGHT_CHANNELS)?;
        if !rest.is_empty() {
            return Err(MetricError::SizeMismatch {
                expected: data.len() - rest.len(),
                found: data.len(),
            });
        }
        Ok(Self {
            num_fems: data[0],
            num_charge_channels: data[1],
            num_light_channels: data[2],
            charge_histograms,
            light_histograms,
        })
    }

    /// Peel `count` histograms off the front of the buffer
    fn take_histograms(data: &mut &[i32], count: usize) -> Result<Vec<Histogram>, MetricError> {
        let mut histograms = Vec::with_capacity(count);
        for _ in 0..count {
            if data.len() < HISTOGRAM_HEADER_LEN {
                return Err(MetricError::DataTooShort(data.len()));
            }
            let len = HISTOGRAM_HEADER_LEN + data[2].max(0) as usize;
            if data.len() < len {
                return Err(MetricError::DataTooShort(data.len()));
            }
            let (hist_data, remaining) = data.split_at(len);
            histograms.push(Histogram::deserialize(hist_data)?);
            *data = remaining;
        }
        Ok(histograms)
    }
}

/// A raw waveform snapshot of one channel, with a fixed sample window of length N.
///
/// Layout is `[channel, sample_0, ..., sample_{N-1}]`. Waveforms shorter than the window are
/// zero padded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaveformDump<const N: usize> {
    pub channel: i32,
    pub samples: [u16; N],
}

pub type ChargeEventDump = WaveformDump<CHARGE_DUMP_SAMPLES>;
pub type LightEventDump = WaveformDump<LIGHT_DUMP_SAMPLES>;

impl<const N: usize> WaveformDump<N> {
    /// Copy the window starting at `offset` out of a waveform
    pub fn from_waveform(channel: usize, waveform: &[u16], offset: usize) -> Self {
        let mut samples = [0u16; N];
        let window = waveform.get(offset..).unwrap_or(&[]);
        let n = window.len().min(N);
        samples[..n].copy_from_slice(&window[..n]);
        Self {
            channel: channel as i32,
            samples,
        }
    }

    pub fn serialize(&self) -> Vec<i32> {
        let mut data = Vec::with_capacity(N + 1);
        data.push(self.channel);
        data.extend(self.samples.iter().map(|s| *s as i32));
        data
    }

    pub fn deserialize(data: &[i32]) -> Result<Self, MetricError> {
        if data.len() != N + 1 {
            return Err(MetricError::SizeMismatch {
                expected: N + 1,
                found: data.len(),
            });
        }
        let mut samples = [0u16; N];
        for (dest, word) in samples.iter_mut().zip(&data[1..]) {
            *dest = (*word).clamp(0, u16::MAX as i32) as u16;
        }
        Ok(Self {
            channel: data[0],
            samples,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_low_bw_layout() {
        let mut summary = LowBwSummary::default();
        summary.num_fems = 2;
        summary.num_charge_channels = 64;
        summary.num_light_channels = 32;
        summary.charge_baseline[0] = 2048;
        summary.charge_avg_hits[63] = 7;
        summary.light_avg_rois[31] = 16;
        let data = summary.serialize();
        assert_eq!(data.len(), 3 + 3 * 64 + 3 * 32);
        assert_eq!(&data[..4], &[2, 64, 32, 2048]);
        assert_eq!(data[3 + 3 * 64 - 1], 7);
        assert_eq!(*data.last().unwrap(), 16);
        assert_eq!(LowBwSummary::deserialize(&data).unwrap(), summary);
    }

    #[test]
    fn test_low_bw_bad_length() {
        assert_eq!(
            LowBwSummary::deserialize(&[0; 10]),
            Err(MetricError::SizeMismatch {
                expected: LOW_BW_LEN,
                found: 10
            })
        );
    }

    #[test]
    fn test_full_summary_layout() {
        let mut summary = FullSummary::new().unwrap();
        summary.num_fems = 1;
        summary.charge_histograms[3].fill(2000);
        summary.light_histograms[31].fill(-1);
        let data = summary.serialize();
        let expected_len = 3
            + NUM_CHARGE_CHANNELS * (5 + CHARGE_HIST_BINS as usize)
            + NUM_LIGHT_CHANNELS * (5 + LIGHT_HIST_BINS as usize);
        assert_eq!(data.len(), expected_len);
        let restored = FullSummary::deserialize(&data).unwrap();
        assert_eq!(restored.charge_histograms[3].entries(), 1);
        assert_eq!(restored.light_histograms[31].below_range_count(), 1);

        assert!(FullSummary::deserialize(&data[..data.len() - 1]).is_err());
        let mut extended = data.clone();
        extended.push(0);
        assert!(FullSummary::deserialize(&extended).is_err());
    }

    #[test]
    fn test_full_summary_clear() {
        let mut summary = FullSummary::new().unwrap();
        summary.num_charge_channels = 5;
        summary.charge_histograms[0].fill(1500);
        summary.clear();
        assert_eq!(summary, FullSummary::new().unwrap());
    }

    #[test]
    fn test_waveform_dump_window() {
        let waveform: Vec<u16> = (0..10).collect();
        let dump = WaveformDump::<4>::from_waveform(3, &waveform, 2);
        assert_eq!(dump.samples, [2, 3, 4, 5]);
        assert_eq!(dump.serialize(), vec![3, 2, 3, 4, 5]);

        let short = WaveformDump::<4>::from_waveform(1, &waveform[5..6], 0);
        assert_eq!(short.samples, [5, 0, 0, 0]);
        let empty = WaveformDump::<4>::from_waveform(1, &waveform, 20);
        assert_eq!(empty.samples, [0; 4]);

        assert!(WaveformDump::<4>::deserialize(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_metric_kind_codes() {
        for kind in [
            MetricKind::LowBwSummary,
            MetricKind::FullSummary,
            MetricKind::ChargeEvent,
            MetricKind::LightEvent,
        ] {
            assert_eq!(MetricKind::from_code(kind as u16), Some(kind));
        }
        let cmd = MetricKind::ChargeEvent.to_command(vec![1, 2]);
        assert_eq!(cmd.opcode, 0x26);
        assert_eq!(cmd.arguments, vec![1, 2]);
    }
}
