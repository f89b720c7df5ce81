use std::path::PathBuf;
use thiserror::Error;

use super::constants::MAX_COMMAND_ARGS;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HistogramError {
    #[error("Invalid histogram range [{min}, {max}); max must be greater than min")]
    InvalidRange { min: i32, max: i32 },
    #[error("Invalid histogram bin count {0}; must be positive")]
    InvalidBinCount(i32),
    #[error("Histogram deserialization failed: data of length {0} is too short for metadata")]
    DataTooShort(usize),
    #[error("Histogram deserialization failed: data has length {found} but expected {expected}")]
    SizeMismatch { expected: usize, found: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetricError {
    #[error("Metric failed due to histogram error: {0}")]
    Histogram(#[from] HistogramError),
    #[error("Metric deserialization failed: data has length {found} but expected {expected}")]
    SizeMismatch { expected: usize, found: usize },
    #[error("Metric deserialization failed: data of length {0} is too short")]
    DataTooShort(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Unknown command opcode {0:#06x}")]
    UnknownOpcode(u16),
    #[error("Command {opcode:#06x} requires {expected} arguments but {found} were given")]
    MissingArguments {
        opcode: u16,
        expected: usize,
        found: usize,
    },
    #[error("Command argument {name} has invalid value {value}")]
    InvalidArgument { name: &'static str, value: i32 },
    #[error("Single event query requested {0} events; at most 1 is allowed")]
    TooManyEvents(i32),
    #[error("Channel {channel} is out of range; there are only {limit} channels")]
    ChannelOutOfRange { channel: i32, limit: usize },
    #[error("Command frame with {0} arguments exceeds the limit of {max}", max=MAX_COMMAND_ARGS)]
    FrameTooLarge(usize),
}

#[derive(Debug, Error)]
pub enum DecoderError {
    #[error("Could not open readout file because file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Decoder was asked for an event before a file was opened")]
    NoFileOpen,
    #[error("Incorrect event header {0:#010x} found in readout file")]
    BadEventHeader(u32),
    #[error("Readout file ended in the middle of event {0}")]
    TruncatedEvent(u32),
    #[error("Decoder failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Transport failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Transport received a bad frame: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("Transport connection was closed by the peer")]
    Closed,
    #[error("Transport lock was poisoned by a panicking thread")]
    LockPoisoned,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
    #[error("Config has invalid calibration constant {name} = {value}")]
    InvalidCalibration { name: &'static str, value: f64 },
}

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Monitor failed due to protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("Monitor failed due to decoder error: {0}")]
    Decoder(#[from] DecoderError),
    #[error("Monitor failed due to transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Monitor failed due to configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Monitor failed due to histogram error: {0}")]
    Histogram(#[from] HistogramError),
    #[error("Monitor failed due to metric error: {0}")]
    Metric(#[from] MetricError),
    #[error("Monitor is busy running the continuous decoder; stop it before querying")]
    DecoderBusy,
    #[error("Monitor was stopped before the command finished")]
    Cancelled,
    #[error("Monitor has no file selected; run a query first")]
    NoMonitorFile,
    #[error("Event {0} was not found in the readout file")]
    EventNotFound(usize),
    #[error("Monitor state lock was poisoned by a panicking thread")]
    StatePoisoned,
    #[error("Monitor failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
}
