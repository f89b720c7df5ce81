use std::fmt;

use super::error::HistogramError;

/// Number of metadata words leading a serialized Histogram
pub const HISTOGRAM_HEADER_LEN: usize = 5;

/// A histogram over a fixed half-open range [min, max) with a fixed number of bins.
///
/// Values outside the range are not dropped; they are tallied in the below/above range counters.
/// The serialized form is the downlink wire contract:
///
/// ```text
/// [min, max, num_bins, below_range_count, above_range_count, bin_0, ..., bin_{n-1}]
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    min_value: i32,
    max_value: i32,
    num_bins: i32,
    bin_width: f64,
    bins: Vec<i32>,
    below_range_count: i32,
    above_range_count: i32,
}

impl Histogram {
    /// Create a new, empty Histogram
    ///
    /// Fails if the range is empty or the bin count is not positive.
    pub fn new(min: i32, max: i32, num_bins: i32) -> Result<Self, HistogramError> {
        if max <= min {
            return Err(HistogramError::InvalidRange { min, max });
        }
        if num_bins <= 0 {
            return Err(HistogramError::InvalidBinCount(num_bins));
        }
        Ok(Self {
            min_value: min,
            max_value: max,
            num_bins,
            bin_width: (max as f64 - min as f64) / num_bins as f64,
            bins: vec![0; num_bins as usize],
            below_range_count: 0,
            above_range_count: 0,
        })
    }

    /// Add a value to the histogram
    pub fn fill(&mut self, value: i32) {
        if value < self.min_value {
            self.below_range_count += 1;
        } else if value >= self.max_value {
            self.above_range_count += 1;
        } else {
            let bin = ((value as f64 - self.min_value as f64) / self.bin_width).floor() as usize;
            // Floating point rounding at the upper edge can land one past the last bin
            let bin = bin.min(self.bins.len() - 1);
            self.bins[bin] += 1;
        }
    }

    /// Zero all counts, keeping the binning
    pub fn reset(&mut self) {
        self.bins.iter_mut().for_each(|b| *b = 0);
        self.below_range_count = 0;
        self.above_range_count = 0;
    }

    pub fn min(&self) -> i32 {
        self.min_value
    }

    pub fn max(&self) -> i32 {
        self.max_value
    }

    pub fn num_bins(&self) -> i32 {
        self.num_bins
    }

    pub fn bin_width(&self) -> f64 {
        self.bin_width
    }

    pub fn bins(&self) -> &[i32] {
        &self.bins
    }

    pub fn below_range_count(&self) -> i32 {
        self.below_range_count
    }

    pub fn above_range_count(&self) -> i32 {
        self.above_range_count
    }

    /// Total number of fills, including the overflow counters
    pub fn entries(&self) -> i64 {
        self.bins.iter().map(|b| *b as i64).sum::<i64>()
            + self.below_range_count as i64
            + self.above_range_count as i64
    }

    /// Length of the serialized form
    pub fn serialized_len(&self) -> usize {
        HISTOGRAM_HEADER_LEN + self.bins.len()
    }

    /// Flatten the histogram into the downlink layout
    pub fn serialize(&self) -> Vec<i32> {
        let mut data = Vec::with_capacity(self.serialized_len());
        self.serialize_into(&mut data);
        data
    }

    /// Append the downlink layout to an existing buffer
    pub fn serialize_into(&self, data: &mut Vec<i32>) {
        data.extend_from_slice(&[
            self.min_value,
            self.max_value,
            self.num_bins,
            self.below_range_count,
            self.above_range_count,
        ]);
        data.extend_from_slice(&self.bins);
    }

    /// Rebuild a histogram from the downlink layout
    pub fn deserialize(data: &[i32]) -> Result<Self, HistogramError> {
        if data.len() < HISTOGRAM_HEADER_LEN {
            return Err(HistogramError::DataTooShort(data.len()));
        }
        let num_bins = data[2];
        if num_bins <= 0 {
            return Err(HistogramError::InvalidBinCount(num_bins));
        }
        let expected = HISTOGRAM_HEADER_LEN + num_bins as usize;
        if data.len() != expected {
            return Err(HistogramError::SizeMismatch {
                expected,
                found: data.len(),
            });
        }

        let mut hist = Self::new(data[0], data[1], num_bins)?;
        hist.below_range_count = data[3];
        hist.above_range_count = data[4];
        hist.bins.copy_from_slice(&data[HISTOGRAM_HEADER_LEN..]);
        Ok(hist)
    }
}

impl fmt::Display for Histogram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Range: [{}, {}), Bins: {}",
            self.min_value, self.max_value, self.num_bins
        )?;
        writeln!(
            f,
            "Values below range (<{}): {}",
            self.min_value, self.below_range_count
        )?;
        for (idx, count) in self.bins.iter().enumerate() {
            let start = self.min_value as f64 + idx as f64 * self.bin_width;
            let stop = start + self.bin_width;
            writeln!(
                f,
                "Bin {idx} [{start}, {stop}): {} ({count})",
                "*".repeat((*count).max(0) as usize)
            )?;
        }
        write!(
            f,
            "Values above range (>={}): {}",
            self.max_value, self.above_range_count
        )
    }
}
