use byteorder::{ByteOrder, LittleEndian};

use super::constants::{
    MAX_COMMAND_ARGS, MAX_PROCESS_EVENTS, NUM_CHARGE_CHANNELS, NUM_LIGHT_CHANNELS,
};
use super::error::ProtocolError;

/// Bytes in a frame header: u16 opcode + u16 argument count
pub const FRAME_HEADER_LEN: usize = 4;

/// A command/telemetry message: an opcode and its positional arguments.
///
/// On the wire a Command is a little-endian frame:
///
/// ```text
/// u16 opcode, u16 n_args, n_args * i32 argument
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Command {
    pub opcode: u16,
    pub arguments: Vec<i32>,
}

impl Command {
    pub fn new(opcode: u16, arguments: Vec<i32>) -> Self {
        Self { opcode, arguments }
    }

    /// Encode the command as a single wire frame
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        if self.arguments.len() > MAX_COMMAND_ARGS {
            return Err(ProtocolError::FrameTooLarge(self.arguments.len()));
        }
        let mut frame = vec![0u8; FRAME_HEADER_LEN + 4 * self.arguments.len()];
        LittleEndian::write_u16(&mut frame[0..2], self.opcode);
        LittleEndian::write_u16(&mut frame[2..4], self.arguments.len() as u16);
        LittleEndian::write_i32_into(&self.arguments, &mut frame[FRAME_HEADER_LEN..]);
        Ok(frame)
    }

    /// Try to decode one frame from the front of a buffer
    ///
    /// Returns the command and the number of bytes it used, or None if the buffer does not
    /// yet hold a complete frame.
    pub fn decode(buffer: &[u8]) -> Option<(Self, usize)> {
        if buffer.len() < FRAME_HEADER_LEN {
            return None;
        }
        let opcode = LittleEndian::read_u16(&buffer[0..2]);
        let n_args = LittleEndian::read_u16(&buffer[2..4]) as usize;
        let frame_len = FRAME_HEADER_LEN + 4 * n_args;
        if buffer.len() < frame_len {
            return None;
        }
        let mut arguments = vec![0i32; n_args];
        LittleEndian::read_i32_into(&buffer[FRAME_HEADER_LEN..frame_len], &mut arguments);
        Some((Self { opcode, arguments }, frame_len))
    }
}

/// Command opcodes understood by the monitor. Values are part of the ground protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Opcode {
    QuerySummary = 0x1,
    StopDecoder = 0x2,
    DecodeEvent = 0x3,
    RunDecoder = 0x4,
    QueryEvent = 0x5,
    QueryFullSummary = 0x6,
}

impl TryFrom<u16> for Opcode {
    type Error = ProtocolError;
    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0x1 => Ok(Self::QuerySummary),
            0x2 => Ok(Self::StopDecoder),
            0x3 => Ok(Self::DecodeEvent),
            0x4 => Ok(Self::RunDecoder),
            0x5 => Ok(Self::QueryEvent),
            0x6 => Ok(Self::QueryFullSummary),
            _ => Err(ProtocolError::UnknownOpcode(value)),
        }
    }
}

impl Opcode {
    /// Minimum number of arguments the opcode needs
    pub fn arity(&self) -> usize {
        match self {
            Self::QuerySummary | Self::QueryFullSummary => 4,
            Self::QueryEvent => 5,
            Self::DecodeEvent => 3,
            Self::RunDecoder | Self::StopDecoder => 0,
        }
    }

    /// Check the argument count of a command against the opcode
    pub fn check_arguments(&self, arguments: &[i32]) -> Result<(), ProtocolError> {
        if arguments.len() < self.arity() {
            Err(ProtocolError::MissingArguments {
                opcode: *self as u16,
                expected: self.arity(),
                found: arguments.len(),
            })
        } else {
            Ok(())
        }
    }
}

/// The arguments of a command, once they are known to satisfy its opcode
fn checked_arguments(cmd: &Command) -> Result<&[i32], ProtocolError> {
    Opcode::try_from(cmd.opcode)?.check_arguments(&cmd.arguments)?;
    Ok(&cmd.arguments)
}

fn non_negative(name: &'static str, value: i32) -> Result<i32, ProtocolError> {
    if value < 0 {
        Err(ProtocolError::InvalidArgument { name, value })
    } else {
        Ok(value)
    }
}

fn positive(name: &'static str, value: i32) -> Result<i32, ProtocolError> {
    if value < 1 {
        Err(ProtocolError::InvalidArgument { name, value })
    } else {
        Ok(value)
    }
}

fn channel(value: i32, limit: usize) -> Result<usize, ProtocolError> {
    match usize::try_from(value) {
        Ok(ch) if ch < limit => Ok(ch),
        _ => Err(ProtocolError::ChannelOutOfRange {
            channel: value,
            limit,
        }),
    }
}

/// Arguments of a Query-Summary or Query-Full-Summary command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SummaryQuery {
    pub run_number: i32,
    pub file_number: i32,
    pub num_events: i32,
    pub event_stride: i32,
}

impl SummaryQuery {
    /// Arguments: `[run_number, file_number, num_events, event_stride]`
    pub fn from_command(cmd: &Command) -> Result<Self, ProtocolError> {
        let args = checked_arguments(cmd)?;
        Ok(Self {
            run_number: non_negative("run_number", args[0])?,
            file_number: non_negative("file_number", args[1])?,
            num_events: positive("num_events", args[2])?,
            event_stride: positive("event_stride", args[3])?,
        })
    }

    /// Number of file events to scan, capped at [`MAX_PROCESS_EVENTS`]
    pub fn process_num_events(&self) -> usize {
        (self.num_events as usize)
            .saturating_mul(self.event_stride as usize)
            .min(MAX_PROCESS_EVENTS)
    }
}

/// Arguments of a Query-Single-Event command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventQuery {
    pub run_number: i32,
    pub file_number: i32,
    pub event_offset: usize,
    pub random: bool,
}

impl EventQuery {
    /// Arguments: `[run_number, file_number, event_count, event_offset, random_flag]`
    ///
    /// At most a single event can be dumped per query; a count of 0 or 1 dumps the event at
    /// `event_offset`.
    pub fn from_command(cmd: &Command) -> Result<Self, ProtocolError> {
        let args = checked_arguments(cmd)?;
        let event_count = non_negative("event_count", args[2])?;
        if event_count > 1 {
            return Err(ProtocolError::TooManyEvents(event_count));
        }
        let event_offset = non_negative("event_offset", args[3])?;
        if event_offset as usize >= MAX_PROCESS_EVENTS {
            return Err(ProtocolError::InvalidArgument {
                name: "event_offset",
                value: event_offset,
            });
        }
        Ok(Self {
            run_number: non_negative("run_number", args[0])?,
            file_number: non_negative("file_number", args[1])?,
            event_offset: event_offset as usize,
            random: args[4] != 0,
        })
    }
}

/// Arguments of a Decode-Single-Event command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeEventRequest {
    pub event_index: usize,
    pub charge_channel: usize,
    pub light_channel: usize,
}

impl DecodeEventRequest {
    /// Arguments: `[event_index, charge_channel, light_channel]`
    pub fn from_command(cmd: &Command) -> Result<Self, ProtocolError> {
        let args = checked_arguments(cmd)?;
        let event_index = non_negative("event_index", args[0])?;
        if event_index as usize >= MAX_PROCESS_EVENTS {
            return Err(ProtocolError::InvalidArgument {
                name: "event_index",
                value: event_index,
            });
        }
        Ok(Self {
            event_index: event_index as usize,
            charge_channel: channel(args[1], NUM_CHARGE_CHANNELS)?,
            light_channel: channel(args[2], NUM_LIGHT_CHANNELS)?,
        })
    }
}
