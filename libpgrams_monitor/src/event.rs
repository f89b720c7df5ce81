use std::path::Path;

use super::error::DecoderError;

/// One decoded detector event.
///
/// The charge and light lists are parallel: `charge_adc[i]` is the waveform of channel
/// `charge_channel[i]`, and `light_adc[i]` is an ROI of channel `light_channel[i]` read out
/// by discriminator `light_trigger_id[i]`. Channel indices come straight from the readout and
/// are not guaranteed to be in range.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventStruct {
    pub event_number: u32,
    pub slot_number: Vec<u16>,
    pub charge_channel: Vec<u16>,
    pub charge_adc: Vec<Vec<u16>>,
    pub light_channel: Vec<u16>,
    pub light_trigger_id: Vec<u16>,
    pub light_adc: Vec<Vec<u16>>,
}

impl EventStruct {
    pub fn clear(&mut self) {
        self.event_number = 0;
        self.slot_number.clear();
        self.charge_channel.clear();
        self.charge_adc.clear();
        self.light_channel.clear();
        self.light_trigger_id.clear();
        self.light_adc.clear();
    }

    /// Iterate over (channel, waveform) pairs of the charge readout
    pub fn charge_waveforms(&self) -> impl Iterator<Item = (usize, &[u16])> {
        self.charge_channel
            .iter()
            .zip(self.charge_adc.iter())
            .map(|(ch, adc)| (*ch as usize, adc.as_slice()))
    }

    /// Iterate over (channel, trigger id, ROI) triplets of the light readout
    pub fn light_rois(&self) -> impl Iterator<Item = (usize, u16, &[u16])> {
        self.light_channel
            .iter()
            .zip(self.light_trigger_id.iter())
            .zip(self.light_adc.iter())
            .map(|((ch, id), adc)| (*ch as usize, *id, adc.as_slice()))
    }
}

/// A source of decoded events, typically a readout file decoder.
///
/// Events are yielded in file order. The returned reference is only valid until the next call.
pub trait EventSource {
    /// Open a readout file, rewinding to its first event
    fn open(&mut self, path: &Path) -> Result<(), DecoderError>;

    /// Only yield every Nth event of the file. Skipped events are still read.
    fn set_stride(&mut self, stride: usize);

    /// Get the next event in the file
    ///
    /// Returns a `Result<Option<&EventStruct>>`. The Option is None at the end of the file.
    fn get_next_event(&mut self) -> Result<Option<&EventStruct>, DecoderError>;
}
