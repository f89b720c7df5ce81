//! # pgrams_monitor
//!
//! pgrams_monitor is the online data monitor of the pGRAMS balloon payload, written in Rust.
//! It runs next to the data acquisition, reads the readout files written by the DAQ, and
//! reduces them to compact per-channel statistics that fit through the constrained
//! downlink to the ground station.
//!
//! The monitor is command driven. The ground station sends a command over the command
//! link, the monitor processes the requested slice of a readout file, and the resulting
//! metrics are sent back over the status link.
//!
//! ## Building & Install
//!
//! To build and install the monitor use `cargo install --path ./pgrams_monitor_cli` from
//! the top level repository. See the `pgrams_monitor_cli` README for usage.
//!
//! ## Configuration
//!
//! The monitor is configured by a YAML file. A template can be generated with
//! `pgrams_monitor_cli new -p <path>`. The format is as follows:
//!
//! ```yml
//! data_path: /home/pgrams/data/readout_data
//! ip_address: 127.0.0.1
//! command_port: 1753
//! status_port: 1752
//! is_server: false
//! hit_threshold: 3.0
//! light_readout_scale: 8.0
//! decoder_interval_ms: 1000
//! default_run_number: 0
//! default_file_number: 0
//! log_path: ./pgrams_monitor.log
//! ```
//!
//! - `data_path`: directory holding the readout files, named
//! `pGRAMS_bin_<run_number>_<file_number>.dat`
//! - `is_server`: if true the monitor listens on both ports, otherwise it connects to them
//! - `hit_threshold`: a charge sample is a hit if it exceeds
//! `baseline + hit_threshold * rms + 1`
//! - `light_readout_scale`: multiplier applied to the light RMS and ROI rate
//! - `decoder_interval_ms`: pause between files of the continuous decoder
//! - `default_run_number`, `default_file_number`: file used by the continuous decoder
//! before any query has selected one
//!
//! ## Commands
//!
//! Commands are little-endian frames: `u16 opcode, u16 n_args, n_args * i32`.
//!
//! | Opcode | Command             | Arguments                                              |
//! |--------|---------------------|--------------------------------------------------------|
//! | 0x1    | Query Summary       | run, file, num_events, event_stride                    |
//! | 0x2    | Stop Decoder        |                                                        |
//! | 0x3    | Decode Single Event | event_index, charge_channel, light_channel             |
//! | 0x4    | Run Decoder         |                                                        |
//! | 0x5    | Query Single Event  | run, file, event_count (at most 1), event_offset, random |
//! | 0x6    | Query Full Summary  | run, file, num_events, event_stride                    |
//!
//! ## Telemetry
//!
//! Metrics are sent in the same frame format, with the opcode identifying the metric and the
//! arguments holding its flattened payload.
//!
//! | Id   | Metric                |
//! |------|-----------------------|
//! | 0x24 | Low Bandwidth Summary |
//! | 0x25 | Full Summary          |
//! | 0x26 | Charge Event Dump     |
//! | 0x27 | Light Event Dump      |
//!
//! A query that fails sends nothing.
pub mod bin_file;
pub mod charge_stats;
pub mod command;
pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod event;
pub mod histogram;
pub mod light_stats;
pub mod metrics;
pub mod monitor;
pub mod transport;
