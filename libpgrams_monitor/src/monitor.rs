use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::charge_stats::ChargeStats;
use super::command::{Command, DecodeEventRequest, EventQuery, Opcode, SummaryQuery};
use super::config::Config;
use super::constants::*;
use super::engine::StatsEngine;
use super::error::{DecoderError, MonitorError, TransportError};
use super::event::{EventSource, EventStruct};
use super::light_stats::LightStats;
use super::metrics::{FullSummary, LowBwSummary, MetricKind};
use super::transport::{CommandLink, POLL_INTERVAL};

/// The two channel statistics engines
#[derive(Debug, Clone)]
struct Engines {
    charge: ChargeStats,
    light: LightStats,
}

impl Engines {
    fn new(config: &Config) -> Result<Self, MonitorError> {
        Ok(Self {
            charge: ChargeStats::new(config.hit_threshold)?,
            light: LightStats::new(config.light_readout_scale)?,
        })
    }

    fn clear(&mut self) {
        self.charge.clear();
        self.light.clear();
    }
}

/// What to do with each selected event of a command. Chosen once per command.
type ProcessFn = fn(&mut Engines, &EventStruct);

fn accumulate(engines: &mut Engines, event: &EventStruct) {
    engines.charge.ingest(event);
    engines.light.ingest(event);
}

fn accumulate_with_histograms(engines: &mut Engines, event: &EventStruct) {
    accumulate(engines, event);
    engines.charge.fill_histograms(event);
    engines.light.fill_histograms(event);
}

fn capture(engines: &mut Engines, event: &EventStruct) {
    engines.charge.capture_event(event);
    engines.light.capture_event(event);
}

/// Everything a command handler may touch, guarded by one lock.
///
/// Handlers work on `scratch` and only swap it into `engines` once they have succeeded, so a
/// failed command leaves the published statistics untouched.
struct MonitorState<D: EventSource> {
    decoder: D,
    engines: Engines,
    scratch: Engines,
    lbw_summary: LowBwSummary,
    full_summary: FullSummary,
    monitor_file: Option<PathBuf>,
    rng: StdRng,
}

impl<D: EventSource> MonitorState<D> {
    /// Feed every stride-th event of the first `max_events` file events into the scratch engines.
    /// Returns the number of events fed.
    ///
    /// `keep_going` is checked once per event; the scan is abandoned as soon as it is false.
    fn scan(
        &mut self,
        max_events: usize,
        stride: usize,
        process: ProcessFn,
        keep_going: &dyn Fn() -> bool,
    ) -> Result<usize, MonitorError> {
        // Striding is done here, the decoder yields every event
        self.decoder.set_stride(1);
        let stride = stride.max(1);
        let mut fed = 0;
        for idx in 0..max_events {
            if !keep_going() {
                return Err(MonitorError::Cancelled);
            }
            let Some(event) = self.decoder.get_next_event()? else {
                spdlog::debug!("Readout file ended after {idx} events");
                break;
            };
            if idx % stride == 0 {
                process(&mut self.scratch, event);
                fed += 1;
            }
        }
        Ok(fed)
    }

    /// Read forward to the event at `index` and feed only that event into the scratch engines
    fn seek_event(
        &mut self,
        index: usize,
        process: ProcessFn,
        keep_going: &dyn Fn() -> bool,
    ) -> Result<(), MonitorError> {
        self.decoder.set_stride(1);
        for idx in 0..=index {
            if !keep_going() {
                return Err(MonitorError::Cancelled);
            }
            match self.decoder.get_next_event()? {
                Some(event) if idx == index => {
                    process(&mut self.scratch, event);
                    return Ok(());
                }
                Some(_) => continue,
                None => break,
            }
        }
        Err(MonitorError::EventNotFound(index))
    }

    fn commit(&mut self) {
        std::mem::swap(&mut self.engines, &mut self.scratch);
    }

    fn low_bw_message(&mut self) -> Command {
        self.lbw_summary.clear();
        self.engines.charge.finalize(&mut self.lbw_summary);
        self.engines.light.finalize(&mut self.lbw_summary);
        MetricKind::LowBwSummary.to_command(self.lbw_summary.serialize())
    }

    fn full_summary_message(&mut self) -> Command {
        self.full_summary.clear();
        self.engines.charge.finalize_histograms(&mut self.full_summary);
        self.engines.light.finalize_histograms(&mut self.full_summary);
        MetricKind::FullSummary.to_command(self.full_summary.serialize())
    }

    /// Dumps of the captured event; charge first, then light
    fn dump_messages(&mut self, random: bool) -> Vec<Command> {
        let mut messages = Vec::new();
        if random {
            if let Some(dump) = self.engines.charge.random_dump(&mut self.rng) {
                messages.push(MetricKind::ChargeEvent.to_command(dump.serialize()));
            }
            if let Some(dump) = self.engines.light.random_dump(&mut self.rng) {
                messages.push(MetricKind::LightEvent.to_command(dump.serialize()));
            }
        } else {
            for dump in self.engines.charge.dumps() {
                messages.push(MetricKind::ChargeEvent.to_command(dump.serialize()));
            }
            for dump in self.engines.light.dumps() {
                messages.push(MetricKind::LightEvent.to_command(dump.serialize()));
            }
        }
        messages
    }

    /// Dump one random charge and one random light channel from a handful of random events of
    /// the open file. Uses only the scratch engines.
    fn sample_events(
        &mut self,
        keep_going: &dyn Fn() -> bool,
    ) -> Result<Vec<Command>, MonitorError> {
        let charge_channel = self.rng.random_range(0..NUM_CHARGE_CHANNELS);
        let light_channel = self.rng.random_range(0..NUM_LIGHT_CHANNELS);
        let mut selected: Vec<usize> = (0..CONTINUOUS_EVENTS_PER_FILE)
            .map(|_| self.rng.random_range(0..=CONTINUOUS_EVENT_MAX))
            .collect();
        // Ascending so the file is read once
        selected.sort_unstable();
        selected.dedup();
        spdlog::debug!(
            "Sampling events {selected:?} on charge channel {charge_channel}, light channel {}",
            light_channel
        );

        self.decoder.set_stride(1);
        let mut messages = Vec::new();
        let mut targets = selected.into_iter().peekable();
        let mut idx = 0;
        while let Some(&target) = targets.peek() {
            if !keep_going() {
                self.scratch.clear();
                return Err(MonitorError::Cancelled);
            }
            let Some(event) = self.decoder.get_next_event()? else {
                break;
            };
            if idx == target {
                self.scratch.clear();
                capture(&mut self.scratch, event);
                if let Some(dump) = self.scratch.charge.dump(charge_channel) {
                    messages.push(MetricKind::ChargeEvent.to_command(dump.serialize()));
                }
                if let Some(dump) = self.scratch.light.dump(light_channel) {
                    messages.push(MetricKind::LightEvent.to_command(dump.serialize()));
                }
                targets.next();
            }
            idx += 1;
        }
        self.scratch.clear();
        Ok(messages)
    }
}

/// The online data monitor.
///
/// Receives commands on the command link, runs them against readout files through the event
/// source, and answers with telemetry on the status link. Queries run synchronously on the
/// receiving thread. The legacy continuous decoder runs on its own thread, and queries are
/// rejected while it is active.
pub struct DataMonitor<D: EventSource + Send + 'static> {
    config: Config,
    command_link: Arc<dyn CommandLink>,
    status_link: Arc<dyn CommandLink>,
    state: Mutex<MonitorState<D>>,
    is_running: AtomicBool,
    is_decoding: AtomicBool,
    decode_thread: Mutex<Option<JoinHandle<()>>>,
}

impl<D: EventSource + Send + 'static> DataMonitor<D> {
    pub fn new(
        config: Config,
        decoder: D,
        command_link: Arc<dyn CommandLink>,
        status_link: Arc<dyn CommandLink>,
    ) -> Result<Self, MonitorError> {
        config.validate()?;
        let state = MonitorState {
            decoder,
            engines: Engines::new(&config)?,
            scratch: Engines::new(&config)?,
            lbw_summary: LowBwSummary::default(),
            full_summary: FullSummary::new()?,
            monitor_file: None,
            rng: StdRng::from_os_rng(),
        };
        Ok(Self {
            config,
            command_link,
            status_link,
            state: Mutex::new(state),
            is_running: AtomicBool::new(true),
            is_decoding: AtomicBool::new(false),
            decode_thread: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Start or stop the monitor. A new monitor is running.
    ///
    /// Stopping releases a pending read, and the command loop, a query in progress and the
    /// continuous decoder all return within one iteration. An interrupted query sends nothing.
    pub fn set_running(&self, run: bool) {
        self.is_running.store(run, Ordering::SeqCst);
        self.command_link.set_stop(!run);
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    pub fn is_decoding(&self) -> bool {
        self.is_decoding.load(Ordering::SeqCst)
    }

    /// Receive and handle commands until the monitor is stopped or the link closes.
    ///
    /// A failing command is logged and dropped; it never ends the loop.
    pub fn receive_commands(self: &Arc<Self>) {
        spdlog::info!("Command loop started");
        while self.is_running() {
            match self.command_link.read_command() {
                Ok(Some(cmd)) => {
                    if let Err(e) = self.handle_command(&cmd) {
                        spdlog::error!("Dropped command {:#06x}: {e}", cmd.opcode);
                    }
                }
                Ok(None) => continue,
                Err(TransportError::Closed) => {
                    spdlog::warn!("Command link was closed by the peer, leaving command loop");
                    break;
                }
                Err(e) => {
                    spdlog::error!("Failed to read command: {e}");
                    std::thread::sleep(POLL_INTERVAL);
                }
            }
        }
        spdlog::info!("Command loop stopped");
    }

    /// Dispatch a single command
    pub fn handle_command(self: &Arc<Self>, cmd: &Command) -> Result<(), MonitorError> {
        spdlog::info!(
            "Received command {:#06x} with {} arguments",
            cmd.opcode,
            cmd.arguments.len()
        );
        match Opcode::try_from(cmd.opcode)? {
            Opcode::QuerySummary => self.query_summary(cmd, false),
            Opcode::QueryFullSummary => self.query_summary(cmd, true),
            Opcode::QueryEvent => self.query_event(cmd),
            Opcode::DecodeEvent => self.decode_event(cmd),
            Opcode::RunDecoder => self.run_decoder(),
            Opcode::StopDecoder => self.stop_decoder(),
        }
    }

    fn query_summary(&self, cmd: &Command, full: bool) -> Result<(), MonitorError> {
        let query = SummaryQuery::from_command(cmd)?;
        self.ensure_idle()?;
        let path = self
            .config
            .get_data_file_name(query.run_number, query.file_number);
        let process: ProcessFn = if full {
            accumulate_with_histograms
        } else {
            accumulate
        };

        let start = Instant::now();
        let messages = {
            let mut state = self.lock_state()?;
            state.decoder.open(&path)?;
            state.scratch.clear();
            let fed = state.scan(
                query.process_num_events(),
                query.event_stride as usize,
                process,
                &|| self.is_running(),
            )?;
            state.commit();
            state.monitor_file = Some(path);

            let mut messages = vec![state.low_bw_message()];
            if full {
                messages.push(state.full_summary_message());
            }
            spdlog::info!(
                "Summary of run {} file {} done: processed {fed} events in {:?}",
                query.run_number,
                query.file_number,
                start.elapsed()
            );
            messages
        };
        self.send_all(&messages)
    }

    fn query_event(&self, cmd: &Command) -> Result<(), MonitorError> {
        let query = EventQuery::from_command(cmd)?;
        self.ensure_idle()?;
        let path = self
            .config
            .get_data_file_name(query.run_number, query.file_number);

        let messages = {
            let mut state = self.lock_state()?;
            state.decoder.open(&path)?;
            state.scratch.clear();
            state.seek_event(query.event_offset, capture, &|| self.is_running())?;
            state.commit();
            state.monitor_file = Some(path);
            state.dump_messages(query.random)
        };
        spdlog::info!(
            "Dumping event {} of run {} file {} as {} messages",
            query.event_offset,
            query.run_number,
            query.file_number,
            messages.len()
        );
        self.send_all(&messages)
    }

    fn decode_event(&self, cmd: &Command) -> Result<(), MonitorError> {
        let request = DecodeEventRequest::from_command(cmd)?;
        self.ensure_idle()?;

        let messages = {
            let mut state = self.lock_state()?;
            let path = state
                .monitor_file
                .clone()
                .ok_or(MonitorError::NoMonitorFile)?;
            state.decoder.open(&path)?;
            state.scratch.clear();
            state.seek_event(request.event_index, capture, &|| self.is_running())?;
            state.commit();

            let mut messages = Vec::new();
            if let Some(dump) = state.engines.charge.dump(request.charge_channel) {
                messages.push(MetricKind::ChargeEvent.to_command(dump.serialize()));
            }
            if let Some(dump) = state.engines.light.dump(request.light_channel) {
                messages.push(MetricKind::LightEvent.to_command(dump.serialize()));
            }
            messages
        };
        if messages.is_empty() {
            spdlog::warn!(
                "Event {} has neither charge channel {} nor light channel {}",
                request.event_index,
                request.charge_channel,
                request.light_channel
            );
        }
        self.send_all(&messages)
    }

    /// Start the continuous decoder thread
    pub fn run_decoder(self: &Arc<Self>) -> Result<(), MonitorError> {
        let mut thread = self
            .decode_thread
            .lock()
            .map_err(|_| MonitorError::StatePoisoned)?;
        if self.is_decoding() {
            spdlog::warn!("Continuous decoder is already running");
            return Ok(());
        }
        // A decoder that left its loop on a monitor stop has already cleared its flag
        if let Some(handle) = thread.take() {
            if handle.join().is_err() {
                spdlog::error!("Continuous decoder thread panicked");
            }
        }
        self.is_decoding.store(true, Ordering::SeqCst);
        let monitor = Arc::clone(self);
        match std::thread::Builder::new()
            .name(String::from("continuous_decoder"))
            .spawn(move || monitor.run_metrics())
        {
            Ok(handle) => {
                *thread = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.is_decoding.store(false, Ordering::SeqCst);
                Err(e.into())
            }
        }
    }

    /// Stop the continuous decoder and wait for its thread
    pub fn stop_decoder(&self) -> Result<(), MonitorError> {
        self.is_decoding.store(false, Ordering::SeqCst);
        let handle = self
            .decode_thread
            .lock()
            .map_err(|_| MonitorError::StatePoisoned)?
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                spdlog::error!("Continuous decoder thread panicked");
            }
            spdlog::info!("Continuous decoder stopped");
        }
        Ok(())
    }

    fn decoder_active(&self) -> bool {
        self.is_decoding() && self.is_running()
    }

    fn run_metrics(&self) {
        spdlog::info!("Continuous decoder started");
        while self.decoder_active() {
            match self.sample_file() {
                Ok(()) | Err(MonitorError::Cancelled) => (),
                Err(e) => spdlog::error!("Continuous decoder failed to sample file: {e}"),
            }
            self.wait_interval();
        }
        self.is_decoding.store(false, Ordering::SeqCst);
        spdlog::info!("Continuous decoder left its loop");
    }

    fn sample_file(&self) -> Result<(), MonitorError> {
        let messages = {
            let mut state = self.lock_state()?;
            let path = state
                .monitor_file
                .clone()
                .unwrap_or_else(|| self.config.get_default_file_name());
            state.decoder.open(&path)?;
            state.sample_events(&|| self.decoder_active())?
        };
        spdlog::debug!("Continuous decoder sending {} dumps", messages.len());
        self.send_all(&messages)
    }

    /// Sleep for the decoder interval, waking early if the decoder or the monitor is stopped
    fn wait_interval(&self) {
        let start = Instant::now();
        let interval = self.config.decoder_interval();
        while self.decoder_active() {
            let elapsed = start.elapsed();
            if elapsed >= interval {
                break;
            }
            std::thread::sleep((interval - elapsed).min(Duration::from_millis(50)));
        }
    }

    fn ensure_idle(&self) -> Result<(), MonitorError> {
        if self.is_decoding() {
            Err(MonitorError::DecoderBusy)
        } else {
            Ok(())
        }
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, MonitorState<D>>, MonitorError> {
        self.state.lock().map_err(|_| MonitorError::StatePoisoned)
    }

    fn send_all(&self, messages: &[Command]) -> Result<(), MonitorError> {
        for msg in messages {
            self.status_link.write_command(msg)?;
        }
        Ok(())
    }

    /// Number of charge events behind the current statistics
    pub fn charge_event_count(&self) -> Result<usize, MonitorError> {
        Ok(self.lock_state()?.engines.charge.num_events())
    }

    pub fn light_event_count(&self) -> Result<usize, MonitorError> {
        Ok(self.lock_state()?.engines.light.num_events())
    }

    /// The file of the last successful query
    pub fn monitor_file(&self) -> Result<Option<PathBuf>, MonitorError> {
        Ok(self.lock_state()?.monitor_file.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProtocolError;
    use crate::metrics::{ChargeEventDump, LightEventDump};
    use crate::transport::MemoryLink;
    use std::collections::HashMap;
    use std::path::Path;

    /// Serves events from memory, keyed by file path
    struct VecSource {
        files: HashMap<PathBuf, Vec<EventStruct>>,
        events: Vec<EventStruct>,
        position: usize,
        stride: usize,
    }

    impl VecSource {
        fn new(files: HashMap<PathBuf, Vec<EventStruct>>) -> Self {
            Self {
                files,
                events: Vec::new(),
                position: 0,
                stride: 1,
            }
        }
    }

    impl EventSource for VecSource {
        fn open(&mut self, path: &Path) -> Result<(), DecoderError> {
            match self.files.get(path) {
                Some(events) => {
                    self.events = events.clone();
                    self.position = 0;
                    Ok(())
                }
                None => Err(DecoderError::BadFilePath(path.to_path_buf())),
            }
        }

        fn set_stride(&mut self, stride: usize) {
            self.stride = stride.max(1);
        }

        fn get_next_event(&mut self) -> Result<Option<&EventStruct>, DecoderError> {
            let event = self.events.get(self.position);
            self.position += self.stride;
            Ok(event)
        }
    }

    /// Charge channels 0 & 1 flat at 10 * i, a cosmic ROI on light channel 3 and a beam gate ROI
    /// on light channel 5
    fn test_event(i: u16) -> EventStruct {
        EventStruct {
            event_number: i as u32,
            slot_number: vec![16],
            charge_channel: vec![0, 1],
            charge_adc: vec![vec![10 * i; NUM_CHARGE_SAMPLES]; 2],
            light_channel: vec![3, 5],
            light_trigger_id: vec![COSMIC_DISC_ID, BEAM_GATE_DISC_ID],
            light_adc: vec![vec![100 + i; 40], vec![50; 16]],
        }
    }

    fn test_config() -> Config {
        Config {
            data_path: PathBuf::from("/data"),
            decoder_interval_ms: 10,
            default_run_number: 1,
            ..Default::default()
        }
    }

    fn test_monitor() -> (Arc<DataMonitor<VecSource>>, Arc<MemoryLink>, Arc<MemoryLink>) {
        let config = test_config();
        let mut files = HashMap::new();
        files.insert(
            config.get_data_file_name(1, 0),
            (0..10).map(test_event).collect::<Vec<_>>(),
        );
        let inbound = Arc::new(MemoryLink::new());
        let outbound = Arc::new(MemoryLink::new());
        let monitor = DataMonitor::new(
            config,
            VecSource::new(files),
            inbound.clone(),
            outbound.clone(),
        )
        .unwrap();
        (Arc::new(monitor), inbound, outbound)
    }

    fn opcodes(sent: &[Command]) -> Vec<u16> {
        sent.iter().map(|cmd| cmd.opcode).collect()
    }

    #[test]
    fn test_unknown_opcode() {
        let (monitor, _, outbound) = test_monitor();
        let result = monitor.handle_command(&Command::new(0x7, vec![1, 0, 5, 1]));
        assert!(matches!(
            result,
            Err(MonitorError::Protocol(ProtocolError::UnknownOpcode(0x7)))
        ));
        assert!(outbound.take_sent().unwrap().is_empty());
        assert_eq!(monitor.charge_event_count().unwrap(), 0);
        assert!(monitor.monitor_file().unwrap().is_none());
    }

    #[test]
    fn test_malformed_command() {
        let (monitor, _, outbound) = test_monitor();
        let result = monitor.handle_command(&Command::new(0x1, vec![1, 0]));
        assert!(matches!(
            result,
            Err(MonitorError::Protocol(ProtocolError::MissingArguments { .. }))
        ));
        assert!(outbound.take_sent().unwrap().is_empty());
    }

    #[test]
    fn test_single_event_count_rejected() {
        let (monitor, _, outbound) = test_monitor();
        let result = monitor.handle_command(&Command::new(0x5, vec![1, 0, 2, 0, 0]));
        assert!(matches!(
            result,
            Err(MonitorError::Protocol(ProtocolError::TooManyEvents(2)))
        ));
        assert!(outbound.take_sent().unwrap().is_empty());
    }

    #[test]
    fn test_summary_with_stride() {
        let (monitor, _, outbound) = test_monitor();
        monitor
            .handle_command(&Command::new(0x1, vec![1, 0, 5, 2]))
            .unwrap();
        // Events 0, 2, 4, 6, 8
        assert_eq!(monitor.charge_event_count().unwrap(), 5);
        assert_eq!(monitor.light_event_count().unwrap(), 5);
        assert_eq!(
            monitor.monitor_file().unwrap(),
            Some(PathBuf::from("/data/pGRAMS_bin_1_0.dat"))
        );

        let sent = outbound.take_sent().unwrap();
        assert_eq!(opcodes(&sent), vec![0x24]);
        let summary = LowBwSummary::deserialize(&sent[0].arguments).unwrap();
        assert_eq!(summary.num_fems, 1);
        assert_eq!(summary.num_charge_channels, 2);
        assert_eq!(summary.num_light_channels, 2);
        // (0 + 20 + 40 + 60 + 80) / 5
        assert_eq!(summary.charge_baseline[0], 40);
        assert_eq!(summary.charge_baseline[1], 40);
        assert_eq!(summary.charge_rms[0], 0);
        assert_eq!(summary.charge_avg_hits[0], 0);
        assert_eq!(summary.light_baseline[5], 50);
        // 8 * 5 cosmic ROIs / 5 events
        assert_eq!(summary.light_avg_rois[3], 8);
    }

    #[test]
    fn test_full_summary_order() {
        let (monitor, _, outbound) = test_monitor();
        monitor
            .handle_command(&Command::new(0x6, vec![1, 0, 5, 2]))
            .unwrap();
        let sent = outbound.take_sent().unwrap();
        assert_eq!(opcodes(&sent), vec![0x24, 0x25]);
        let full = FullSummary::deserialize(&sent[1].arguments).unwrap();
        assert_eq!(full.num_charge_channels, 2);
        // All charge samples sit below the histogram range
        assert_eq!(
            full.charge_histograms[0].below_range_count(),
            5 * NUM_CHARGE_SAMPLES as i32
        );
        assert_eq!(full.light_histograms[3].bins()[0], 5 * 40);
    }

    #[test]
    fn test_missing_file() {
        let (monitor, _, outbound) = test_monitor();
        monitor
            .handle_command(&Command::new(0x1, vec![1, 0, 5, 2]))
            .unwrap();
        outbound.take_sent().unwrap();

        let result = monitor.handle_command(&Command::new(0x1, vec![9, 0, 5, 1]));
        assert!(matches!(
            result,
            Err(MonitorError::Decoder(DecoderError::BadFilePath(_)))
        ));
        assert!(outbound.take_sent().unwrap().is_empty());
        // Previous statistics survive the failed query
        assert_eq!(monitor.charge_event_count().unwrap(), 5);
        assert_eq!(
            monitor.monitor_file().unwrap(),
            Some(PathBuf::from("/data/pGRAMS_bin_1_0.dat"))
        );
    }

    #[test]
    fn test_query_event_sweep() {
        let (monitor, _, outbound) = test_monitor();
        monitor
            .handle_command(&Command::new(0x5, vec![1, 0, 1, 1, 0]))
            .unwrap();
        let sent = outbound.take_sent().unwrap();
        assert_eq!(opcodes(&sent), vec![0x26, 0x26, 0x27]);

        let first = ChargeEventDump::deserialize(&sent[0].arguments).unwrap();
        let second = ChargeEventDump::deserialize(&sent[1].arguments).unwrap();
        assert_eq!((first.channel, second.channel), (0, 1));
        assert!(first.samples.iter().all(|s| *s == 10));

        let light = LightEventDump::deserialize(&sent[2].arguments).unwrap();
        assert_eq!(light.channel, 3);
        assert_eq!(light.samples[39], 101);
        assert_eq!(light.samples[40], 0);
    }

    #[test]
    fn test_query_event_random() {
        let (monitor, _, outbound) = test_monitor();
        monitor
            .handle_command(&Command::new(0x5, vec![1, 0, 1, 4, 1]))
            .unwrap();
        let sent = outbound.take_sent().unwrap();
        assert_eq!(opcodes(&sent), vec![0x26, 0x27]);
        let charge = ChargeEventDump::deserialize(&sent[0].arguments).unwrap();
        assert!(charge.channel == 0 || charge.channel == 1);
        assert_eq!(charge.samples[0], 40);
    }

    #[test]
    fn test_query_event_past_end() {
        let (monitor, _, outbound) = test_monitor();
        let result = monitor.handle_command(&Command::new(0x5, vec![1, 0, 1, 20, 0]));
        assert!(matches!(result, Err(MonitorError::EventNotFound(20))));
        assert!(outbound.take_sent().unwrap().is_empty());
        assert!(monitor.monitor_file().unwrap().is_none());
    }

    #[test]
    fn test_decode_event() {
        let (monitor, _, outbound) = test_monitor();
        let decode = Command::new(0x3, vec![3, 0, 31]);
        assert!(matches!(
            monitor.handle_command(&decode),
            Err(MonitorError::NoMonitorFile)
        ));

        monitor
            .handle_command(&Command::new(0x1, vec![1, 0, 10, 1]))
            .unwrap();
        outbound.take_sent().unwrap();

        monitor.handle_command(&decode).unwrap();
        let sent = outbound.take_sent().unwrap();
        // Light channel 31 is not in the event
        assert_eq!(opcodes(&sent), vec![0x26]);
        let dump = ChargeEventDump::deserialize(&sent[0].arguments).unwrap();
        assert_eq!(dump.channel, 0);
        assert_eq!(dump.samples[0], 30);

        monitor
            .handle_command(&Command::new(0x3, vec![2, 1, 3]))
            .unwrap();
        assert_eq!(opcodes(&outbound.take_sent().unwrap()), vec![0x26, 0x27]);

        assert!(matches!(
            monitor.handle_command(&Command::new(0x3, vec![50, 0, 0])),
            Err(MonitorError::EventNotFound(50))
        ));
    }

    #[test]
    fn test_continuous_decoder_lifecycle() {
        let (monitor, _, outbound) = test_monitor();
        monitor.handle_command(&Command::new(0x4, vec![])).unwrap();
        assert!(monitor.is_decoding());
        // Starting twice is harmless
        monitor.handle_command(&Command::new(0x4, vec![])).unwrap();

        let result = monitor.handle_command(&Command::new(0x1, vec![1, 0, 5, 1]));
        assert!(matches!(result, Err(MonitorError::DecoderBusy)));

        std::thread::sleep(Duration::from_millis(30));
        monitor.handle_command(&Command::new(0x2, vec![])).unwrap();
        assert!(!monitor.is_decoding());
        for msg in outbound.take_sent().unwrap() {
            assert!(msg.opcode == 0x26 || msg.opcode == 0x27);
        }

        monitor
            .handle_command(&Command::new(0x1, vec![1, 0, 5, 1]))
            .unwrap();
        assert_eq!(opcodes(&outbound.take_sent().unwrap()), vec![0x24]);
    }

    #[test]
    fn test_single_event_count_zero() {
        let (monitor, _, outbound) = test_monitor();
        monitor
            .handle_command(&Command::new(0x5, vec![1, 0, 0, 1, 0]))
            .unwrap();
        let sent = outbound.take_sent().unwrap();
        assert_eq!(opcodes(&sent), vec![0x26, 0x26, 0x27]);
        let dump = ChargeEventDump::deserialize(&sent[0].arguments).unwrap();
        assert_eq!(dump.samples[0], 10);
    }

    #[test]
    fn test_stopped_monitor_ends_decoder() {
        let (monitor, _, _) = test_monitor();
        monitor.handle_command(&Command::new(0x4, vec![])).unwrap();
        assert!(monitor.is_decoding());
        monitor.set_running(false);

        let start = Instant::now();
        let finished = || {
            monitor
                .decode_thread
                .lock()
                .unwrap()
                .as_ref()
                .map(|handle| handle.is_finished())
        };
        while finished() != Some(true) && start.elapsed() < Duration::from_secs(5) {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(finished(), Some(true));
        assert!(!monitor.is_decoding());
        monitor.stop_decoder().unwrap();

        // A restarted monitor can run the decoder again
        monitor.set_running(true);
        monitor.handle_command(&Command::new(0x4, vec![])).unwrap();
        assert!(monitor.is_decoding());
        monitor.handle_command(&Command::new(0x2, vec![])).unwrap();
        assert!(!monitor.is_decoding());
    }

    #[test]
    fn test_stopped_monitor_cancels_query() {
        let (monitor, _, outbound) = test_monitor();
        monitor.set_running(false);
        let result = monitor.handle_command(&Command::new(0x1, vec![1, 0, 5, 1]));
        assert!(matches!(result, Err(MonitorError::Cancelled)));
        let result = monitor.handle_command(&Command::new(0x5, vec![1, 0, 1, 2, 0]));
        assert!(matches!(result, Err(MonitorError::Cancelled)));
        assert!(outbound.take_sent().unwrap().is_empty());
        assert_eq!(monitor.charge_event_count().unwrap(), 0);
        assert!(monitor.monitor_file().unwrap().is_none());
    }

    #[test]
    fn test_receive_loop() {
        let (monitor, inbound, outbound) = test_monitor();
        monitor.set_running(true);
        let receiver = {
            let monitor = Arc::clone(&monitor);
            std::thread::spawn(move || monitor.receive_commands())
        };
        inbound.push_command(Command::new(0x99, vec![])).unwrap();
        inbound
            .push_command(Command::new(0x1, vec![1, 0, 2, 1]))
            .unwrap();

        let start = Instant::now();
        let mut sent = Vec::new();
        while sent.is_empty() && start.elapsed() < Duration::from_secs(5) {
            sent = outbound.take_sent().unwrap();
            std::thread::sleep(Duration::from_millis(10));
        }
        monitor.set_running(false);
        receiver.join().unwrap();

        // The bad command did not stop the loop
        assert_eq!(opcodes(&sent), vec![0x24]);
        assert_eq!(monitor.charge_event_count().unwrap(), 2);
    }
}
