// Flight configuration of the pGRAMS TPC readout.

/// Number of charge (TPC wire) channels read out per event
pub const NUM_CHARGE_CHANNELS: usize = 64;
/// Number of light (SiPM) channels read out per event
pub const NUM_LIGHT_CHANNELS: usize = 32;
/// Number of samples in a full charge waveform
pub const NUM_CHARGE_SAMPLES: usize = 763;

/// Leading charge samples used for the per-event baseline & variance
pub const CHARGE_BASELINE_SAMPLES: usize = 5;
/// Leading light ROI samples used for the per-event baseline & variance
pub const LIGHT_BASELINE_SAMPLES: usize = 8;

/// Light discriminator id of the unbiased (beam gate) readout
pub const BEAM_GATE_DISC_ID: u16 = 0x4;
/// Light discriminator id of a cosmic trigger ROI
pub const COSMIC_DISC_ID: u16 = 0x1;

/// Default hit threshold multiplier, in units of the per-event RMS
pub const DEFAULT_HIT_THRESHOLD: f64 = 3.0;
/// Default light readout multiplier. The unbiased readout is taken at 1/8 of the full rate.
pub const DEFAULT_LIGHT_READOUT_SCALE: f64 = 8.0;

/// Hard upper limit on events scanned for one query
pub const MAX_PROCESS_EVENTS: usize = 5000;

/// Events sampled per file by the continuous decoder
pub const CONTINUOUS_EVENTS_PER_FILE: usize = 5;
/// Largest event index the continuous decoder will sample
pub const CONTINUOUS_EVENT_MAX: usize = 5000;

/// First charge sample copied into a single event dump
pub const CHARGE_DUMP_OFFSET: usize = 0;
/// Number of charge samples in a single event dump
pub const CHARGE_DUMP_SAMPLES: usize = 256;
/// Number of light ROI samples in a single event dump
pub const LIGHT_DUMP_SAMPLES: usize = 64;

pub const CHARGE_HIST_MIN: i32 = 1024;
pub const CHARGE_HIST_MAX: i32 = 4096;
pub const CHARGE_HIST_BINS: i32 = 16;
pub const LIGHT_HIST_MIN: i32 = 0;
pub const LIGHT_HIST_MAX: i32 = 4096;
pub const LIGHT_HIST_BINS: i32 = 32;

/// Largest argument list accepted in a single command frame
pub const MAX_COMMAND_ARGS: usize = u16::MAX as usize;

/// Deployment location of the readout files
pub const DEFAULT_DATA_PATH: &str = "/home/pgrams/data/readout_data";
pub const DEFAULT_IP_ADDRESS: &str = "127.0.0.1";
pub const DEFAULT_COMMAND_PORT: u16 = 1753;
pub const DEFAULT_STATUS_PORT: u16 = 1752;
pub const DEFAULT_DECODER_INTERVAL_MS: u64 = 1000;
