//! Board controller
//!
//! [`ControllerBoard`] owns one serial connection and runs the protocol
//! around it:
//! - a listener task reads lines, feeds them to the board's
//!   [`ResponseParser`] and publishes the resulting events
//! - a default sender streams G-code, gated by the board's flow reports
//! - a control sender writes real-time commands (stop, resume, reset)
//!   without waiting behind the default queue
//!
//! The controller reacts to its own events where the protocol needs it:
//! the connect and config echoes drive the start-up handshake, reset
//! reports advance limit back-off recovery and queue reports throttle the
//! default sender.
//!
//! Everything that happens is published on the controller's [`EventBus`].

mod backoff;
mod progress;

pub use backoff::{BackoffStage, BackoffStep, LimitBackoff};
pub use progress::{FileTimer, ProgressCounter, TIMER_TICK};

use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;

use cender_core::{
    Axis, AxisDirection, BoardEvent, BoardType, CommunicationEvent, ConnectionError,
    ConnectionEvent, ConnectionState, DistanceMode, EventBus, MachineEvent, MovementGcode,
    ProgrammeEvent, Result, SpindleDirection, UnitMode,
};
use cender_settings::SharedConfig;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::communication::{
    count_all, CommandFilter, CommandSender, FlowSignal, LineTransport, RealSerialPort,
    ReadLoopExit, SenderSlot, SerialPort,
};
use crate::firmware::{
    formatter_for, parser_for, BoardConfigMap, CommandFormatter, EchoCorrelator, ParseContext,
    ResponseParser, SystemCommand,
};

/// Poll period while waiting for the previous file to drain
const SENDER_POLL: Duration = Duration::from_millis(300);

/// Pause between a back-off move and the reset that follows it
const BACKOFF_SETTLE: Duration = Duration::from_secs(1);

/// Planner slots kept free before the default sender is held
const QUEUE_HEADROOM: i64 = 4;

/// Controller-side view of the machine
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoardState {
    /// Connection lifecycle
    pub connection: ConnectionState,
    /// Axes with a motor mapped, in discovery order
    pub installed_axes: Vec<Axis>,
    /// Axes with a home switch
    pub installed_homes: Vec<Axis>,
    /// Last known distance mode
    pub distance_mode: Option<DistanceMode>,
    /// Motion word for jog and back-off moves
    pub movement: MovementGcode,
    /// Feed hold requested
    pub paused: bool,
    /// Soft reset sent, `SYSTEM READY` not yet seen
    pub reset_pending: bool,
    /// A file is streaming
    pub tracking_progress: bool,
    /// Persist reported positions into the settings
    pub track_coordinates: bool,
    /// Last reported planner queue occupancy
    pub queue_size: i64,
}

#[derive(Default)]
struct Tasks {
    listener: Option<JoinHandle<ReadLoopExit>>,
    ticker: Option<JoinHandle<()>>,
    settle: Option<JoinHandle<()>>,
}

struct Inner {
    config: SharedConfig,
    bus: Arc<EventBus>,
    transport: Arc<LineTransport>,
    parser: Box<dyn ResponseParser>,
    formatter: Box<dyn CommandFormatter>,
    session: EchoCorrelator,
    default_sender: SenderSlot,
    control_sender: SenderSlot,
    state: RwLock<BoardState>,
    board_config: RwLock<BoardConfigMap>,
    progress: Mutex<ProgressCounter>,
    timer: Arc<FileTimer>,
    backoff: Mutex<LimitBackoff>,
    tasks: Mutex<Tasks>,
}

/// Protocol controller for one board
///
/// Cheap to clone; clones share the connection. Background tasks hold weak
/// references, so dropping the last clone winds them down.
#[derive(Clone)]
pub struct ControllerBoard {
    inner: Arc<Inner>,
}

impl ControllerBoard {
    /// Create a controller with its own event bus
    ///
    /// The board variant is taken from `common.board_type`.
    pub fn new(config: SharedConfig) -> Self {
        Self::with_bus(config, Arc::new(EventBus::new()))
    }

    /// Create a controller publishing on `bus`
    pub fn with_bus(config: SharedConfig, bus: Arc<EventBus>) -> Self {
        let board_type = config.read().common.board_type;
        let session = EchoCorrelator::new();
        tracing::debug!(
            "Created {} controller, session {}",
            board_type,
            session.session_id()
        );

        Self {
            inner: Arc::new(Inner {
                transport: Arc::new(LineTransport::new(Arc::clone(&bus))),
                parser: parser_for(board_type),
                formatter: formatter_for(board_type),
                session,
                default_sender: SenderSlot::new("default"),
                control_sender: SenderSlot::new("control"),
                state: RwLock::new(BoardState::default()),
                board_config: RwLock::new(BoardConfigMap::new()),
                progress: Mutex::new(ProgressCounter::new()),
                timer: FileTimer::new(),
                backoff: Mutex::new(LimitBackoff::new()),
                tasks: Mutex::new(Tasks::default()),
                config,
                bus,
            }),
        }
    }

    fn upgrade(inner: &Weak<Inner>) -> Option<Self> {
        inner.upgrade().map(|inner| Self { inner })
    }

    /// Event bus the controller publishes on
    pub fn bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.inner.bus)
    }

    /// Settings shared with the caller
    pub fn config(&self) -> SharedConfig {
        Arc::clone(&self.inner.config)
    }

    /// Board variant in use
    pub fn board_type(&self) -> BoardType {
        self.inner.parser.board_type()
    }

    /// Tag identifying this controller's sentinels
    pub fn session_id(&self) -> &str {
        self.inner.session.session_id()
    }

    /// Snapshot of the controller state
    pub fn state(&self) -> BoardState {
        self.inner.state.read().clone()
    }

    /// Current connection lifecycle state
    pub fn connection_state(&self) -> ConnectionState {
        self.inner.state.read().connection
    }

    /// Check if a feed hold is in effect
    pub fn is_paused(&self) -> bool {
        self.inner.state.read().paused
    }

    /// Snapshot of the discovered board configuration
    pub fn board_config(&self) -> BoardConfigMap {
        self.inner.board_config.read().clone()
    }

    /// Completion percentage of the streaming file
    pub fn progress(&self) -> u32 {
        self.inner.progress.lock().percent()
    }

    /// Streaming time so far, excluding pauses
    pub fn elapsed(&self) -> Option<Duration> {
        self.inner.timer.elapsed()
    }

    /// Board status report interval, also the sender pacing interval
    pub fn status_interval(&self) -> Duration {
        self.inner.board_config.read().status_interval()
    }

    /// State of the current limit back-off recovery
    pub fn backoff_stage(&self) -> BackoffStage {
        self.inner.backoff.lock().stage()
    }

    fn publish(&self, event: impl Into<BoardEvent>) {
        self.inner.bus.publish(event.into());
    }

    fn comments_enabled(&self) -> bool {
        self.inner
            .config
            .read()
            .common
            .add_gcode_comments_for_system_commands
    }

    fn render(&self, command: SystemCommand) -> String {
        command.render(self.comments_enabled())
    }

    fn with_comment(&self, command: String, comment: &str) -> String {
        if self.comments_enabled() {
            format!("{} ({})", command, comment)
        } else {
            command
        }
    }

    fn command_filter(&self) -> CommandFilter {
        let config = self.inner.config.read();
        let precision = config
            .common
            .restrict_file_precision
            .then_some(config.machine.file_precision);
        CommandFilter::new(precision)
    }

    fn set_connection_state(&self, connection: ConnectionState) {
        let changed = {
            let mut state = self.inner.state.write();
            let changed = state.connection != connection;
            state.connection = connection;
            changed
        };
        if changed {
            tracing::debug!("Connection state: {}", connection);
            self.publish(ConnectionEvent::StateChanged { state: connection });
        }
    }

    // Connection lifecycle

    /// Open the configured serial port and run the connect handshake
    ///
    /// On failure `disconnect-received` is published as well as returning
    /// the error.
    pub async fn connect(&self) -> Result<()> {
        let settings = self.inner.config.read().connection.clone();
        tracing::info!(
            "Connecting to {} on {} @ {} baud",
            self.board_type(),
            settings.port,
            settings.baud_rate
        );
        self.set_connection_state(ConnectionState::Connecting);

        match RealSerialPort::open(&settings) {
            Ok(port) => self.connect_with_port(Box::new(port)).await,
            Err(e) => {
                tracing::warn!("Connection to {} failed: {}", settings.port, e);
                self.connection_failed();
                Err(e)
            }
        }
    }

    /// Run the connect handshake over an already open port
    ///
    /// Clears the board queue, disables echo and waits up to
    /// `connection.connect_timeout_ms` for the connect sentinel to come back.
    /// Configuration discovery continues in the background and ends with
    /// [`ConnectionEvent::ConfigFetched`].
    pub async fn connect_with_port(&self, port: Box<dyn SerialPort>) -> Result<()> {
        let timeout_ms = self.inner.config.read().connection.connect_timeout_ms;
        self.set_connection_state(ConnectionState::Connecting);
        self.inner.transport.attach(port);

        self.clear_command_queue();
        self.send(&self.render(self.inner.formatter.echo_off()));

        let mut events = self.inner.bus.receiver();
        self.echo_back("connect");

        let echoed = async {
            loop {
                match events.recv().await {
                    Ok(event) if event.is_echo("connect") => return true,
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Connect handshake skipped {} events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => return false,
                }
            }
        };

        match tokio::time::timeout(Duration::from_millis(timeout_ms), echoed).await {
            Ok(true) => Ok(()),
            _ => {
                tracing::warn!("Connection to {} failed", self.board_type());
                self.connection_failed();
                Err(ConnectionError::ConnectionTimeout { timeout_ms }.into())
            }
        }
    }

    fn connection_failed(&self) {
        self.stop_io();
        self.set_connection_state(ConnectionState::Disconnected);
        self.publish(ConnectionEvent::DisconnectReceived);
    }

    fn stop_io(&self) {
        self.inner.transport.request_stop();
        {
            let mut tasks = self.inner.tasks.lock();
            if let Some(listener) = tasks.listener.take() {
                listener.abort();
            }
            if let Some(ticker) = tasks.ticker.take() {
                ticker.abort();
            }
            if let Some(settle) = tasks.settle.take() {
                settle.abort();
            }
        }
        self.inner.transport.detach();
        self.inner.default_sender.reset();
        self.inner.control_sender.reset();
        self.inner.timer.reset();
        self.inner.backoff.lock().cancel();

        let mut state = self.inner.state.write();
        state.paused = false;
        state.reset_pending = false;
        state.tracking_progress = false;
    }

    /// Stop all I/O, close the port and publish `disconnect-received`
    pub fn disconnect(&self) {
        tracing::info!("Disconnecting from {}", self.board_type());
        self.connection_failed();
    }

    // Sending

    /// Queue commands on the default sender
    ///
    /// Lines are trimmed, filtered and counted toward progress; empty lines
    /// are dropped.
    pub fn send(&self, commands: &str) {
        self.enqueue(commands, false, false);
    }

    /// Queue commands ahead of anything waiting on the default sender
    pub fn send_prepend(&self, commands: &str) {
        self.enqueue(commands, true, false);
    }

    /// Queue commands on the control sender, bypassing flow control
    pub fn send_control(&self, commands: &str) {
        self.enqueue(commands, false, true);
    }

    fn enqueue(&self, commands: &str, prepend: bool, control: bool) {
        tracing::trace!("Sending: {:?}", commands);
        self.ensure_listener();

        let (slot, lines) = if control {
            let lines: Vec<String> = commands.split('\n').map(str::to_string).collect();
            (&self.inner.control_sender, lines)
        } else {
            let filter = self.command_filter();
            let lines: Vec<String> = commands
                .split('\n')
                .map(|line| filter.filter_request(line.trim()))
                .filter(|line| !line.is_empty())
                .collect();
            self.inner.progress.lock().add_expected(count_all(&lines));
            (&self.inner.default_sender, lines)
        };

        if let Some(sender) = slot.enqueue(lines, prepend) {
            self.spawn_sender(sender);
        }
    }

    fn spawn_sender(&self, sender: Arc<CommandSender>) {
        let interval = self.status_interval();
        let transport = Arc::clone(&self.inner.transport);
        let inner = Arc::downgrade(&self.inner);
        tokio::spawn(sender.drain(transport, interval, move |line| {
            if let Some(board) = Self::upgrade(&inner) {
                board.handle_sent(line);
            }
        }));
    }

    fn ensure_listener(&self) {
        if !self.inner.transport.is_open() {
            return;
        }
        let delay = self.status_interval() / 10;
        let mut tasks = self.inner.tasks.lock();
        if tasks
            .listener
            .as_ref()
            .is_some_and(|listener| !listener.is_finished())
        {
            return;
        }

        tracing::debug!("Starting listener");
        let transport = Arc::clone(&self.inner.transport);
        let inner = Arc::downgrade(&self.inner);
        tasks.listener = Some(tokio::spawn(async move {
            let exit = transport
                .read_loop(delay, move |line| {
                    if let Some(board) = Self::upgrade(&inner) {
                        board.handle_line(line);
                    }
                })
                .await;
            tracing::debug!("Listener stopped: {:?}", exit);
            exit
        }));
    }

    fn ensure_ticker(&self) {
        let mut tasks = self.inner.tasks.lock();
        if tasks
            .ticker
            .as_ref()
            .is_some_and(|ticker| !ticker.is_finished())
        {
            return;
        }
        tasks.ticker = Some(self.inner.timer.spawn_ticker(self.bus()));
    }

    /// Ask the board to echo a session-tagged sentinel back
    ///
    /// The echo is published as `<flag>-received` once the board has
    /// processed everything queued before it.
    pub fn echo_back(&self, flag: &str) {
        self.send(&self.inner.session.tag_sentinel(flag));
    }

    fn handle_sent(&self, line: &str) {
        let line = self.command_filter().filter_request(line.trim());
        let outcome = self.inner.parser.inspect_request(&line, &self.inner.session);

        if let Some(mode) = outcome.distance_mode {
            self.inner.state.write().distance_mode = Some(mode);
        }
        for event in outcome.events {
            self.publish(event);
        }
        self.publish(CommunicationEvent::LineSent {
            line,
            loggable: outcome.loggable,
        });
    }

    // Receiving

    fn handle_line(&self, raw: String) {
        let line = self.inner.parser.filter_response(&raw);
        let (reset_pending, tracking_progress) = {
            let state = self.inner.state.read();
            (state.reset_pending, state.tracking_progress)
        };
        let ctx = ParseContext {
            session: &self.inner.session,
            reset_pending,
            tracking_progress,
        };
        let outcome = self.inner.parser.parse(&line, &ctx);

        if let Some(setting) = outcome.setting {
            tracing::trace!("Board setting {} = {}", setting.id, setting.value);
            self.inner.board_config.write().insert(setting);
        }
        if let Some(flow) = outcome.flow {
            self.inner.default_sender.apply_flow(flow);
        }
        if let Some(increment) = outcome.progress_increment {
            let progress = self.inner.progress.lock().record(increment);
            self.publish(ProgrammeEvent::Progress { progress });
        }
        for event in outcome.events {
            self.publish(event.clone());
            self.react(&event);
        }

        self.publish(CommunicationEvent::LineReceived {
            line,
            loggable: outcome.loggable,
        });
    }

    fn react(&self, event: &BoardEvent) {
        match event {
            BoardEvent::Connection(ConnectionEvent::ResetReceived) => self.on_reset(),
            BoardEvent::Connection(ConnectionEvent::Echo { flag }) => match flag.as_str() {
                "connect" => self.on_connect_echo(),
                "config" => self.on_config_echo(),
                "start-of-file" => self.publish(ProgrammeEvent::StartOfFile),
                "end-of-file" => self.publish(ProgrammeEvent::EndOfFile),
                other => tracing::debug!("Echo {} received", other),
            },
            BoardEvent::Programme(ProgrammeEvent::QueueSize { size }) => {
                self.on_queue_size(*size)
            }
            BoardEvent::Machine(MachineEvent::PositionReceived { axis, position }) => {
                let track = self.inner.state.read().track_coordinates;
                if track {
                    self.inner.config.write().set_last_position(*axis, *position);
                }
            }
            BoardEvent::Machine(MachineEvent::LimitHit { axis, direction }) => {
                self.on_limit_hit(*axis, *direction)
            }
            BoardEvent::Machine(MachineEvent::UnknownLimitHit { .. }) => {
                tracing::warn!("Limit hit, switch unknown");
                self.inner.backoff.lock().forget_limit();
                self.pause();
            }
            BoardEvent::Machine(MachineEvent::Idle) => {
                let finished = self.inner.backoff.lock().on_idle();
                if finished {
                    self.finish_back_off();
                }
            }
            _ => {}
        }
    }

    fn on_connect_echo(&self) {
        tracing::info!("Connection to {} succeeded", self.board_type());
        self.set_connection_state(ConnectionState::FetchingConfig);
        self.enable_flow_control();
        self.fetch_board_config();
    }

    /// Request a full configuration dump
    ///
    /// Settings are collected as they arrive; discovery runs when the
    /// trailing `config` sentinel comes back.
    pub fn fetch_board_config(&self) {
        self.send(self.inner.formatter.status_poll());
        self.send(&self.render(self.inner.formatter.config_dump()));
        self.echo_back("config");
    }

    fn on_config_echo(&self) {
        let (motor_axes, units, distance_mode, homes) = {
            let config = self.inner.board_config.read();
            (
                config.motor_axes(),
                config.units(),
                config.distance_mode(),
                config.home_switches(),
            )
        };

        for axis in motor_axes {
            {
                let mut state = self.inner.state.write();
                if !state.installed_axes.contains(&axis) {
                    state.installed_axes.push(axis);
                }
            }
            tracing::debug!("Found axis {}", axis);
            self.publish(MachineEvent::AxisReceived { axis });
        }

        if let Some(mode) = units {
            self.publish(MachineEvent::UnitsReceived { mode });
            self.set_units(mode);
        }

        if let Some(mode) = distance_mode {
            let seeded = {
                let mut state = self.inner.state.write();
                let seeded = state.distance_mode.is_none();
                if seeded {
                    state.distance_mode = Some(mode);
                }
                seeded
            };
            if seeded {
                self.publish(MachineEvent::DistModeReceived { mode });
            }
        }

        for (axis, switch_type) in homes {
            let added = {
                let mut state = self.inner.state.write();
                let added = !state.installed_homes.contains(&axis);
                if added {
                    state.installed_homes.push(axis);
                }
                added
            };
            if added {
                tracing::debug!("Found home switch on {}", axis);
                self.publish(MachineEvent::HomeReceived { axis, switch_type });
            }
        }

        self.set_connection_state(ConnectionState::Connected);
        self.publish(ConnectionEvent::ConfigFetched);
    }

    fn on_queue_size(&self, size: i64) {
        self.inner.state.write().queue_size = size;
        if let Some(sender) = self.inner.default_sender.running() {
            let slots = self.inner.formatter.command_queue_slots();
            if size < slots - QUEUE_HEADROOM {
                sender.apply_flow(FlowSignal::Ready);
            } else {
                tracing::trace!("Planner queue full ({}), holding", size);
                sender.apply_flow(FlowSignal::Block);
            }
        }
    }

    fn on_limit_hit(&self, axis: Axis, direction: AxisDirection) {
        tracing::warn!("Limit hit on {}{}", axis, direction);
        self.inner.backoff.lock().record_limit(axis, direction);
        self.pause();

        let auto = self.inner.config.read().common.auto_limit_back_off;
        if auto {
            self.limit_back_off();
        }
    }

    fn on_reset(&self) {
        self.inner.state.write().reset_pending = false;
        let step = {
            let config = self.inner.board_config.read();
            self.inner.backoff.lock().on_reset(&config)
        };

        match step {
            Some(BackoffStep::BackOff { axis, distance }) => {
                self.set_distance_mode(DistanceMode::Relative);
                self.send(&self.move_command(&format!("{}{}", axis, distance)));

                let inner = Arc::downgrade(&self.inner);
                let settle = tokio::spawn(async move {
                    tokio::time::sleep(BACKOFF_SETTLE).await;
                    let Some(board) = Self::upgrade(&inner) else {
                        return;
                    };
                    if board.backoff_stage() == BackoffStage::AwaitingSecondReset {
                        board.soft_reset();
                    } else {
                        tracing::debug!("Latch backoff abandoned before second reset");
                    }
                });
                if let Some(previous) = self.inner.tasks.lock().settle.replace(settle) {
                    previous.abort();
                }
            }
            Some(BackoffStep::ZeroBackoff { axis, distance }) => {
                if let Some(distance) = distance {
                    self.send(&self.move_command(&format!("{}{}", axis, distance)));
                }
                self.set_distance_mode(DistanceMode::Absolute);
            }
            None => {}
        }
    }

    fn finish_back_off(&self) {
        tracing::info!("Limit back-off complete");
        {
            let mut state = self.inner.state.write();
            state.reset_pending = false;
            state.paused = false;
        }
        self.inner.default_sender.resume();
        self.inner.timer.resume();
        self.publish(ConnectionEvent::ResetReceived);
    }

    // Real-time commands

    /// Soft reset the board (Ctrl-X)
    ///
    /// The reset drops the board's queue and settings that do not persist,
    /// so queue reports, flow control and JSON mode are enabled again.
    pub fn soft_reset(&self) {
        self.inner.state.write().reset_pending = true;
        self.send_control(&self.render(self.inner.formatter.soft_reset()));
        self.clear_command_queue();
        self.enable_queue_reports();
        self.enable_flow_control();
        self.enable_json_mode();
    }

    /// Drop everything queued on the board
    pub fn clear_command_queue(&self) {
        self.send_control(&self.render(self.inner.formatter.clear_queue()));
    }

    /// Feed hold: stop motion and hold the default sender
    pub fn pause(&self) {
        tracing::debug!("Pausing");
        self.send_control(&self.render(self.inner.formatter.stop()));
        self.inner.state.write().paused = true;
        self.inner.timer.pause();
        self.inner.default_sender.pause();
    }

    /// Continue after [`ControllerBoard::pause`]
    pub fn resume(&self) {
        tracing::debug!("Resuming");
        self.send_control(&self.render(self.inner.formatter.resume()));
        self.inner.state.write().paused = false;
        self.inner.timer.resume();
        self.inner.default_sender.resume();
    }

    /// Abort the running programme
    ///
    /// Drops the default queue, stops the machine and clears the board's
    /// planner.
    pub fn clear(&self) {
        tracing::debug!("Clearing");
        self.inner.default_sender.reset();
        self.send_control(&self.render(self.inner.formatter.stop_and_clear()));
        {
            let mut state = self.inner.state.write();
            state.paused = false;
            state.tracking_progress = false;
        }
        self.inner.timer.reset();
    }

    /// Start limit back-off recovery from the last limit hit
    ///
    /// Returns `false` if recovery cannot start, see [`LimitBackoff::start`].
    pub fn limit_back_off(&self) -> bool {
        let installed = self.inner.state.read().installed_axes.clone();
        let started = {
            let config = self.inner.board_config.read();
            self.inner.backoff.lock().start(&installed, &config)
        };
        if started {
            tracing::info!("Starting limit back-off");
            self.inner.default_sender.reset();
            self.soft_reset();
        }
        started
    }

    /// Request a queue report, on boards that answer one
    pub fn request_queue_size(&self) {
        if let Some(command) = self.inner.formatter.queue_size_request() {
            self.send(&self.render(command));
        }
    }

    /// Ask the board for its firmware version
    pub fn request_firmware_version(&self) {
        self.send(self.inner.formatter.firmware_version_query());
    }

    /// Enable verbose queue reports
    pub fn enable_queue_reports(&self) {
        self.send(&self.render(self.inner.formatter.queue_reports()));
    }

    /// Enable hardware flow control
    pub fn enable_flow_control(&self) {
        self.send(&self.render(self.inner.formatter.flow_control()));
    }

    /// Switch the board to JSON mode
    pub fn enable_json_mode(&self) {
        self.send(&self.render(self.inner.formatter.json_mode()));
    }

    // Programmes

    /// Stream a G-code file
    ///
    /// Waits for any previous file to drain, then queues the file between
    /// `start-of-file` and `end-of-file` sentinels. Progress and the file
    /// timer restart from zero.
    pub async fn send_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await?;
        tracing::info!("Streaming {}", path.display());

        self.inner.state.write().paused = false;
        self.publish(ProgrammeEvent::Progress { progress: 0 });
        self.publish(ProgrammeEvent::QueueSize { size: 0 });

        let filter_file = self.inner.config.read().common.filter_file_commands;
        let content = if filter_file {
            self.command_filter().filter_file(&content)
        } else {
            content
        };
        if content.trim().is_empty() {
            tracing::warn!("{} has no commands", path.display());
            return Ok(());
        }

        self.inner.progress.lock().reset();
        self.inner.state.write().queue_size = 0;
        self.clear_command_queue();

        while self.inner.default_sender.is_running() {
            tokio::time::sleep(SENDER_POLL).await;
        }

        self.inner.state.write().tracking_progress = true;
        self.inner.timer.restart();
        self.ensure_ticker();

        self.echo_back("start-of-file");
        self.send(&content);
        self.echo_back("end-of-file");
        Ok(())
    }

    // Machine helpers

    fn move_command(&self, words: &str) -> String {
        let movement = self.inner.state.read().movement;
        match movement {
            MovementGcode::Rapid => format!("{} {}", movement.gcode(), words),
            MovementGcode::Feed => {
                let feed = self.inner.config.read().machine.feed_rate;
                format!("{} {} F{}", movement.gcode(), words, feed)
            }
        }
    }

    /// Switch the spindle on at `speed` or off
    ///
    /// Jog moves use G1 while the spindle turns and G0 otherwise.
    pub fn set_spindle(&self, on: bool, speed: u32, direction: SpindleDirection) {
        let command = if on && speed > 0 {
            self.inner.state.write().movement = MovementGcode::Feed;
            let code = match direction {
                SpindleDirection::Clockwise => "M3",
                SpindleDirection::CounterClockwise => "M4",
            };
            self.with_comment(format!("{} S{}", code, speed), "spindle on")
        } else {
            self.inner.state.write().movement = MovementGcode::Rapid;
            self.with_comment("M5".to_string(), "spindle off")
        };
        self.send(&command);
    }

    /// Switch mist and flood coolant together
    pub fn toggle_coolant(&self, on: bool) {
        let command = if on {
            self.with_comment("M7\nM8".to_string(), "coolant on")
        } else {
            self.with_comment("M9".to_string(), "coolant off")
        };
        self.send(&command);
    }

    /// Select absolute or relative distances
    pub fn set_distance_mode(&self, mode: DistanceMode) {
        let comment = match mode {
            DistanceMode::Absolute => "absolute",
            DistanceMode::Relative => "relative",
        };
        self.send(&self.with_comment(mode.gcode().to_string(), comment));
    }

    /// Select inches or millimetres
    pub fn set_units(&self, mode: UnitMode) {
        let comment = match mode {
            UnitMode::Metric => "metric",
            UnitMode::Imperial => "imperial",
        };
        self.send(&self.with_comment(mode.gcode().to_string(), comment));
    }

    /// Set the work coordinate of one axis
    pub fn reset_axis(&self, axis: Axis, position: f64) {
        self.send(&self.with_comment(
            format!("G92 {}{}", axis, position),
            "set axis coordinate",
        ));
    }

    /// Make the current position the work zero of one axis
    pub fn zero_axis(&self, axis: Axis) {
        self.send(&self.with_comment(format!("G92 {}0", axis), "zero axis"));
    }

    /// Make the current position the work zero of every installed axis
    pub fn zero_all_axis(&self) {
        let words = self.installed_words(|_| Some("0".to_string()));
        if !words.is_empty() {
            self.send(&format!("G92 {}", words));
        }
    }

    /// Move one axis
    ///
    /// `absolute` selects the distance mode for this move only; the
    /// previous mode is restored afterwards.
    pub fn move_axis(&self, axis: Axis, position: f64, absolute: bool) {
        self.move_words(&format!("{}{}", axis, position), absolute);
    }

    /// Move several axes in one motion
    ///
    /// Axes that are not installed are skipped.
    pub fn move_multi_axis(&self, positions: &[(Axis, f64)], absolute: bool) {
        let installed = self.inner.state.read().installed_axes.clone();
        let words: Vec<String> = positions
            .iter()
            .filter(|(axis, _)| installed.contains(axis))
            .map(|(axis, position)| format!("{}{}", axis, position))
            .collect();
        if !words.is_empty() {
            self.move_words(&words.join(" "), absolute);
        }
    }

    fn move_words(&self, words: &str, absolute: bool) {
        let mode = if absolute {
            DistanceMode::Absolute
        } else {
            DistanceMode::Relative
        };
        let previous = self.inner.state.read().distance_mode;

        self.set_distance_mode(mode);
        self.send(&self.move_command(words));
        if let Some(previous) = previous.filter(|previous| *previous != mode) {
            self.set_distance_mode(previous);
        }
    }

    /// Home every axis with a home switch
    pub fn find_home(&self) {
        if self.inner.config.read().common.disable_homing {
            tracing::warn!("Homing is disabled");
            return;
        }
        let words = {
            let homes = self.inner.state.read().installed_homes.clone();
            homes
                .iter()
                .map(|axis| format!("{}0", axis))
                .collect::<Vec<_>>()
                .join(" ")
        };
        if words.is_empty() {
            tracing::warn!("No home switches installed");
            return;
        }
        self.send(&self.with_comment(format!("G28.2 {}", words), "homing"));
    }

    /// Home one axis, if it has a home switch
    pub fn find_axis_home(&self, axis: Axis) {
        tracing::debug!("Find home for {}", axis);
        let installed = self.inner.state.read().installed_homes.contains(&axis);
        if installed {
            self.send(&self.with_comment(
                format!("G28.2 {}0", axis),
                &format!("homing {} axis", axis),
            ));
        }
    }

    /// Move every installed axis to its work zero
    pub fn go_home(&self) {
        let installed = self.inner.state.read().installed_axes.clone();
        let positions: Vec<(Axis, f64)> = installed.into_iter().map(|axis| (axis, 0.0)).collect();
        self.move_multi_axis(&positions, true);
    }

    /// Set work coordinates to the positions persisted last session
    ///
    /// Returns `false` if no installed axis has a stored position.
    pub fn restore_last_positions(&self) -> bool {
        let installed = self.inner.state.read().installed_axes.clone();
        let positions: Vec<(Axis, f64)> = {
            let config = self.inner.config.read();
            installed
                .into_iter()
                .filter_map(|axis| config.last_position(axis).map(|position| (axis, position)))
                .collect()
        };
        for (axis, position) in &positions {
            self.reset_axis(*axis, *position);
        }
        !positions.is_empty()
    }

    /// Persist reported positions into the settings
    pub fn set_track_coordinates(&self, track: bool) {
        self.inner.state.write().track_coordinates = track;
    }

    fn installed_words<F>(&self, value: F) -> String
    where
        F: Fn(Axis) -> Option<String>,
    {
        let installed = self.inner.state.read().installed_axes.clone();
        installed
            .into_iter()
            .filter_map(|axis| value(axis).map(|value| format!("{}{}", axis, value)))
            .collect::<Vec<_>>()
            .join(" ")
    }

    // Export

    /// Writable settings as `$<id>=<value>` lines
    pub fn export_settings(&self) -> Vec<String> {
        self.inner.board_config.read().export_settings()
    }

    /// Suggested export file name for the current time
    pub fn export_file_name(&self) -> Result<String> {
        let now = chrono::Local::now().naive_local();
        Ok(self.inner.board_config.read().export_file_name(&now)?)
    }

    /// Write the exported settings into `dir` and return the file path
    pub async fn export_settings_to(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(self.export_file_name()?);
        let mut content = self.export_settings().join("\n");
        content.push('\n');
        tokio::fs::write(&path, content).await?;
        tracing::info!("Exported board settings to {}", path.display());
        Ok(path)
    }
}
