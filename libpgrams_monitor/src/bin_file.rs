use byteorder::{LittleEndian, ReadBytesExt};
use std::fs::File;
use std::io::{BufReader, ErrorKind};
use std::path::{Path, PathBuf};

use super::error::DecoderError;
use super::event::{EventSource, EventStruct};

/// Marks the start of every event record ("EVNT")
pub const EVENT_MAGIC: u32 = 0x4556_4E54;

/// Decoder for the monitor replay layout of a pGRAMS readout file.
///
/// All words are little-endian. Each event is laid out as:
///
/// ```text
/// u32 magic, u32 event number
/// u16 n_slots,  n_slots * u16 slot
/// u16 n_charge, n_charge * (u16 channel, u16 n_samples, n_samples * u16 adc)
/// u16 n_light,  n_light * (u16 channel, u16 trigger id, u16 n_samples, n_samples * u16 adc)
/// ```
#[derive(Debug, Default)]
pub struct BinFile {
    reader: Option<BufReader<File>>,
    file_path: PathBuf,
    stride: usize,
    events_read: u64,
    event: EventStruct,
}

impl BinFile {
    pub fn new() -> Self {
        Self {
            stride: 1,
            ..Default::default()
        }
    }

    pub fn get_filename(&self) -> &Path {
        &self.file_path
    }

    /// Number of event records consumed from the file, including skipped ones
    pub fn events_read(&self) -> u64 {
        self.events_read
    }

    /// Read the next record into the event buffer
    ///
    /// Returns false at a clean end of file.
    fn read_event(&mut self) -> Result<bool, DecoderError> {
        let reader = self.reader.as_mut().ok_or(DecoderError::NoFileOpen)?;
        let magic = match reader.read_u32::<LittleEndian>() {
            Ok(word) => word,
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        if magic != EVENT_MAGIC {
            return Err(DecoderError::BadEventHeader(magic));
        }
        let event_number = reader.read_u32::<LittleEndian>()?;
        match Self::read_body(reader, &mut self.event) {
            Ok(()) => {
                self.event.event_number = event_number;
                self.events_read += 1;
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                Err(DecoderError::TruncatedEvent(event_number))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn read_body(reader: &mut BufReader<File>, event: &mut EventStruct) -> std::io::Result<()> {
        event.clear();
        let n_slots = reader.read_u16::<LittleEndian>()?;
        for _ in 0..n_slots {
            event.slot_number.push(reader.read_u16::<LittleEndian>()?);
        }

        let n_charge = reader.read_u16::<LittleEndian>()?;
        for _ in 0..n_charge {
            event.charge_channel.push(reader.read_u16::<LittleEndian>()?);
            event.charge_adc.push(Self::read_waveform(reader)?);
        }

        let n_light = reader.read_u16::<LittleEndian>()?;
        for _ in 0..n_light {
            event.light_channel.push(reader.read_u16::<LittleEndian>()?);
            event.light_trigger_id.push(reader.read_u16::<LittleEndian>()?);
            event.light_adc.push(Self::read_waveform(reader)?);
        }
        Ok(())
    }

    fn read_waveform(reader: &mut BufReader<File>) -> std::io::Result<Vec<u16>> {
        let n_samples = reader.read_u16::<LittleEndian>()? as usize;
        let mut waveform = vec![0u16; n_samples];
        reader.read_u16_into::<LittleEndian>(&mut waveform)?;
        Ok(waveform)
    }
}

impl EventSource for BinFile {
    fn open(&mut self, path: &Path) -> Result<(), DecoderError> {
        if !path.exists() {
            return Err(DecoderError::BadFilePath(path.to_path_buf()));
        }
        let file = File::open(path)?;
        let size_bytes = file.metadata()?.len();
        spdlog::info!(
            "Opened readout file {} with size {}",
            path.to_string_lossy(),
            human_bytes::human_bytes(size_bytes as f64)
        );
        self.reader = Some(BufReader::new(file));
        self.file_path = path.to_path_buf();
        self.events_read = 0;
        self.event.clear();
        Ok(())
    }

    fn set_stride(&mut self, stride: usize) {
        self.stride = stride.max(1);
    }

    fn get_next_event(&mut self) -> Result<Option<&EventStruct>, DecoderError> {
        // The first event of the file is always yielded, then every stride-th after it
        if self.events_read > 0 {
            for _ in 1..self.stride {
                if !self.read_event()? {
                    return Ok(None);
                }
            }
        }
        if self.read_event()? {
            Ok(Some(&self.event))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use byteorder::WriteBytesExt;
    use std::io::Write;

    /// Encode events in the replay layout
    pub(crate) fn encode_events(events: &[EventStruct]) -> Vec<u8> {
        let mut bytes = Vec::new();
        for event in events {
            bytes.write_u32::<LittleEndian>(EVENT_MAGIC).unwrap();
            bytes.write_u32::<LittleEndian>(event.event_number).unwrap();
            bytes
                .write_u16::<LittleEndian>(event.slot_number.len() as u16)
                .unwrap();
            for slot in event.slot_number.iter() {
                bytes.write_u16::<LittleEndian>(*slot).unwrap();
            }
            bytes
                .write_u16::<LittleEndian>(event.charge_channel.len() as u16)
                .unwrap();
            for (ch, adc) in event.charge_waveforms() {
                bytes.write_u16::<LittleEndian>(ch as u16).unwrap();
                bytes.write_u16::<LittleEndian>(adc.len() as u16).unwrap();
                for word in adc {
                    bytes.write_u16::<LittleEndian>(*word).unwrap();
                }
            }
            bytes
                .write_u16::<LittleEndian>(event.light_channel.len() as u16)
                .unwrap();
            for (ch, id, adc) in event.light_rois() {
                bytes.write_u16::<LittleEndian>(ch as u16).unwrap();
                bytes.write_u16::<LittleEndian>(id).unwrap();
                bytes.write_u16::<LittleEndian>(adc.len() as u16).unwrap();
                for word in adc {
                    bytes.write_u16::<LittleEndian>(*word).unwrap();
                }
            }
        }
        bytes
    }

    fn make_event(number: u32) -> EventStruct {
        EventStruct {
            event_number: number,
            slot_number: vec![16, 17],
            charge_channel: vec![0, 5],
            charge_adc: vec![vec![2048; 10], vec![number as u16; 3]],
            light_channel: vec![2],
            light_trigger_id: vec![4],
            light_adc: vec![vec![100, 101, 102]],
        }
    }

    fn write_file(dir: &Path, bytes: &[u8]) -> PathBuf {
        let path = dir.join("pGRAMS_bin_1_0.dat");
        let mut file = File::create(&path).unwrap();
        file.write_all(bytes).unwrap();
        path
    }

    #[test]
    fn test_read_all_events() {
        let dir = tempfile::tempdir().unwrap();
        let events: Vec<EventStruct> = (0..4).map(make_event).collect();
        let path = write_file(dir.path(), &encode_events(&events));

        let mut file = BinFile::new();
        file.open(&path).unwrap();
        let mut decoded = Vec::new();
        while let Some(event) = file.get_next_event().unwrap() {
            decoded.push(event.clone());
        }
        assert_eq!(decoded, events);
        assert_eq!(file.events_read(), 4);
    }

    #[test]
    fn test_stride_consumes_skipped_events() {
        let dir = tempfile::tempdir().unwrap();
        let events: Vec<EventStruct> = (0..7).map(make_event).collect();
        let path = write_file(dir.path(), &encode_events(&events));

        let mut file = BinFile::new();
        file.open(&path).unwrap();
        file.set_stride(3);
        let mut numbers = Vec::new();
        while let Some(event) = file.get_next_event().unwrap() {
            numbers.push(event.event_number);
        }
        assert_eq!(numbers, vec![0, 3, 6]);
        assert_eq!(file.events_read(), 7);
    }

    #[test]
    fn test_missing_file() {
        let mut file = BinFile::new();
        let result = file.open(Path::new("/definitely/not/here/pGRAMS_bin_0_0.dat"));
        assert!(matches!(result, Err(DecoderError::BadFilePath(_))));
        assert!(matches!(file.get_next_event(), Err(DecoderError::NoFileOpen)));
    }

    #[test]
    fn test_truncated_and_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = encode_events(&[make_event(9)]);
        let path = write_file(dir.path(), &bytes[..bytes.len() - 1]);
        let mut file = BinFile::new();
        file.open(&path).unwrap();
        assert!(matches!(
            file.get_next_event(),
            Err(DecoderError::TruncatedEvent(9))
        ));

        let path = write_file(dir.path(), &[0xFF; 16]);
        file.open(&path).unwrap();
        assert!(matches!(
            file.get_next_event(),
            Err(DecoderError::BadEventHeader(0xFFFF_FFFF))
        ));
    }
}
