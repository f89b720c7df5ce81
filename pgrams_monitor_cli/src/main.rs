//! # pgrams_monitor_cli
//!
//! Part of the pgrams_monitor crate family.
//!
//! Command line application running the pGRAMS online data monitor.
//!
//! ## Use
//!
//! ```bash
//! pgrams_monitor_cli -p monitor.yml new
//! pgrams_monitor_cli -p monitor.yml run
//! pgrams_monitor_cli -p monitor.yml query -r 12 -f 0 -n 100 -s 2 --full
//! ```
//!
//! `new` writes a template configuration. `run` connects the command and status links and
//! serves ground commands until `quit` is typed (or stdin is closed). `query` runs a single
//! summary query against a local readout file and prints the result.
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use libpgrams_monitor::bin_file::BinFile;
use libpgrams_monitor::command::{Command as MonitorCommand, Opcode};
use libpgrams_monitor::config::Config;
use libpgrams_monitor::error::MonitorError;
use libpgrams_monitor::metrics::{
    ChargeEventDump, FullSummary, LightEventDump, LowBwSummary, MetricKind,
};
use libpgrams_monitor::monitor::DataMonitor;
use libpgrams_monitor::transport::{CommandLink, MemoryLink, TcpLink};

/// Log to both the log file and the terminal
fn setup_logging(log_path: &Path) -> Result<(), spdlog::Error> {
    let file_sink = Arc::new(
        spdlog::sink::FileSink::builder()
            .path(log_path)
            .formatter(Box::new(spdlog::formatter::PatternFormatter::new(
                spdlog::formatter::pattern!(
                    "[{date_short} {time_short}] - [thread: {tid}] - [{^{level}}] - {payload}{eol}"
                ),
            )))
            .truncate(true)
            .build()?,
    );
    let stdout_sink = Arc::new(
        spdlog::sink::StdStreamSink::builder()
            .std_stream(spdlog::sink::StdStream::Stdout)
            .formatter(Box::new(spdlog::formatter::PatternFormatter::new(
                spdlog::formatter::pattern!(
                    "[{date_short} {time_short}] - [thread: {tid}] - [{^{level}}] - {payload}{eol}"
                ),
            )))
            .build()?,
    );
    let logger = Arc::new(
        spdlog::Logger::builder()
            .flush_level_filter(spdlog::LevelFilter::All)
            .sink(file_sink)
            .sink(stdout_sink)
            .build()?,
    );
    spdlog::set_default_logger(logger);
    Ok(())
}

/// Serve ground commands over TCP until quit
fn run_monitor(config: Config) -> Result<(), MonitorError> {
    let command_address = (config.ip_address.as_str(), config.command_port);
    let status_address = (config.ip_address.as_str(), config.status_port);
    let (command_link, status_link) = if config.is_server {
        (
            TcpLink::accept(command_address)?,
            TcpLink::accept(status_address)?,
        )
    } else {
        (
            TcpLink::connect(command_address)?,
            TcpLink::connect(status_address)?,
        )
    };
    let command_link: Arc<dyn CommandLink> = Arc::new(command_link);
    let status_link: Arc<dyn CommandLink> = Arc::new(status_link);

    let monitor = Arc::new(DataMonitor::new(
        config,
        BinFile::new(),
        command_link,
        status_link,
    )?);
    monitor.set_running(true);
    let receiver = {
        let monitor = Arc::clone(&monitor);
        std::thread::Builder::new()
            .name(String::from("command_receiver"))
            .spawn(move || monitor.receive_commands())?
    };

    spdlog::info!("Monitor is running. Type quit to stop.");
    for line in std::io::stdin().lock().lines() {
        if line?.trim() == "quit" {
            break;
        }
    }

    spdlog::info!("Stopping monitor...");
    monitor.set_running(false);
    if receiver.join().is_err() {
        spdlog::error!("Command receiver thread panicked");
    }
    monitor.stop_decoder()?;
    Ok(())
}

fn print_metric(msg: &MonitorCommand) -> Result<(), MonitorError> {
    match MetricKind::from_code(msg.opcode) {
        Some(MetricKind::LowBwSummary) => {
            let summary = LowBwSummary::deserialize(&msg.arguments)?;
            println!(
                "Low bandwidth summary: {} FEMs, {} charge channels, {} light channels",
                summary.num_fems, summary.num_charge_channels, summary.num_light_channels
            );
            println!("charge channel | baseline | rms | avg hits");
            for ch in 0..summary.charge_baseline.len() {
                println!(
                    "{ch:>14} | {:>8} | {:>3} | {:>8}",
                    summary.charge_baseline[ch], summary.charge_rms[ch], summary.charge_avg_hits[ch]
                );
            }
            println!("light channel | baseline | rms | avg rois");
            for ch in 0..summary.light_baseline.len() {
                println!(
                    "{ch:>13} | {:>8} | {:>3} | {:>8}",
                    summary.light_baseline[ch], summary.light_rms[ch], summary.light_avg_rois[ch]
                );
            }
        }
        Some(MetricKind::FullSummary) => {
            let summary = FullSummary::deserialize(&msg.arguments)?;
            for (ch, hist) in summary.charge_histograms.iter().enumerate() {
                if hist.entries() > 0 {
                    println!("Charge channel {ch}\n{hist}");
                }
            }
            for (ch, hist) in summary.light_histograms.iter().enumerate() {
                if hist.entries() > 0 {
                    println!("Light channel {ch}\n{hist}");
                }
            }
        }
        Some(MetricKind::ChargeEvent) => {
            let dump = ChargeEventDump::deserialize(&msg.arguments)?;
            println!("Charge channel {}: {:?}", dump.channel, dump.samples);
        }
        Some(MetricKind::LightEvent) => {
            let dump = LightEventDump::deserialize(&msg.arguments)?;
            println!("Light channel {}: {:?}", dump.channel, dump.samples);
        }
        None => spdlog::warn!("Unknown telemetry id {:#06x}", msg.opcode),
    }
    Ok(())
}

/// Run one summary query against a local readout file
fn run_query(config: Config, args: &ArgMatches) -> Result<(), MonitorError> {
    let opcode = if args.get_flag("full") {
        Opcode::QueryFullSummary
    } else {
        Opcode::QuerySummary
    };
    let arguments = ["run", "file", "events", "stride"]
        .iter()
        .map(|name| args.get_one::<i32>(name).copied().unwrap_or_default())
        .collect();
    let query = MonitorCommand::new(opcode as u16, arguments);

    let command_link: Arc<dyn CommandLink> = Arc::new(MemoryLink::new());
    let status_link = Arc::new(MemoryLink::new());
    let monitor = Arc::new(DataMonitor::new(
        config,
        BinFile::new(),
        command_link,
        status_link.clone(),
    )?);
    monitor.handle_command(&query)?;
    for msg in status_link.take_sent()? {
        print_metric(&msg)?;
    }
    Ok(())
}

fn main() {
    // Create a cli
    let matches = Command::new("pgrams_monitor_cli")
        .arg_required_else_help(true)
        .subcommand(Command::new("new").about("Make a template configuration yaml file"))
        .subcommand(Command::new("run").about("Run the monitor on the configured links"))
        .subcommand(
            Command::new("query")
                .about("Summarize a readout file and print the result")
                .arg(
                    Arg::new("run")
                        .short('r')
                        .long("run")
                        .value_parser(clap::value_parser!(i32))
                        .required(true)
                        .help("Run number"),
                )
                .arg(
                    Arg::new("file")
                        .short('f')
                        .long("file")
                        .value_parser(clap::value_parser!(i32))
                        .default_value("0")
                        .help("File number within the run"),
                )
                .arg(
                    Arg::new("events")
                        .short('n')
                        .long("events")
                        .value_parser(clap::value_parser!(i32))
                        .default_value("100")
                        .help("Number of events to process"),
                )
                .arg(
                    Arg::new("stride")
                        .short('s')
                        .long("stride")
                        .value_parser(clap::value_parser!(i32))
                        .default_value("1")
                        .help("Process every Nth event"),
                )
                .arg(
                    Arg::new("full")
                        .long("full")
                        .action(ArgAction::SetTrue)
                        .help("Also fill and print the channel histograms"),
                ),
        )
        .arg(
            Arg::new("path")
                .short('p')
                .long("path")
                .global(true)
                .required(true)
                .help("Path to the configuration file"),
        )
        .get_matches();

    let config_path = PathBuf::from(matches.get_one::<String>("path").expect("We require args"));

    if let Some(("new", _)) = matches.subcommand() {
        println!(
            "Making a template config at {}...",
            config_path.to_string_lossy()
        );
        match Config::default().write_config_file(&config_path) {
            Ok(()) => println!("Done."),
            Err(e) => eprintln!("{e}"),
        }
        return;
    }

    // Load our config
    let config = match Config::read_config_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{e}");
            return;
        }
    };

    if let Err(e) = setup_logging(&config.log_path) {
        eprintln!("Could not create logging: {e}");
        return;
    }
    spdlog::info!("Config loaded from {}", config_path.to_string_lossy());
    spdlog::info!("Data Path: {}", config.data_path.to_string_lossy());
    spdlog::info!(
        "Address: {} Command Port: {} Status Port: {} Server: {}",
        config.ip_address,
        config.command_port,
        config.status_port,
        config.is_server
    );
    spdlog::info!(
        "Hit Threshold: {} Light Readout Scale: {}",
        config.hit_threshold,
        config.light_readout_scale
    );

    let result = match matches.subcommand() {
        Some(("run", _)) => run_monitor(config),
        Some(("query", args)) => run_query(config, args),
        _ => {
            spdlog::error!("No subcommand given");
            return;
        }
    };
    match result {
        Ok(()) => spdlog::info!("Done."),
        Err(e) => spdlog::error!("Monitor failed with error: {e}"),
    }
}
