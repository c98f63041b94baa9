//! Event type definitions for the event bus.
//!
//! Events are organised by category and carry the payloads a presentation
//! layer needs to render board state. Every event also has a stable
//! kebab-case name (`position-received`, `queue-size`, ...) used in logs.

use serde::{Deserialize, Serialize};

use crate::data::{
    Axis, AxisDirection, ConnectionState, DistanceMode, HomeSwitchType, SpindleDirection, UnitMode,
};

/// Root event enum for everything a controller publishes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BoardEvent {
    /// Connection lifecycle and handshake events
    Connection(ConnectionEvent),
    /// Machine state reported by the board
    Machine(MachineEvent),
    /// Programme streaming progress
    Programme(ProgrammeEvent),
    /// Raw line traffic and request inspection
    Communication(CommunicationEvent),
    /// Board and transport errors
    Error(ErrorEvent),
}

impl BoardEvent {
    /// Get the category of this event
    pub fn category(&self) -> EventCategory {
        match self {
            BoardEvent::Connection(_) => EventCategory::Connection,
            BoardEvent::Machine(_) => EventCategory::Machine,
            BoardEvent::Programme(_) => EventCategory::Programme,
            BoardEvent::Communication(_) => EventCategory::Communication,
            BoardEvent::Error(_) => EventCategory::Error,
        }
    }

    /// Stable event name, e.g. `position-received` or `config-received`
    pub fn name(&self) -> String {
        match self {
            BoardEvent::Connection(e) => e.name(),
            BoardEvent::Machine(e) => e.name().to_string(),
            BoardEvent::Programme(e) => e.name().to_string(),
            BoardEvent::Communication(e) => e.name().to_string(),
            BoardEvent::Error(e) => e.name().to_string(),
        }
    }

    /// Get a short description of this event for logging
    pub fn description(&self) -> String {
        match self {
            BoardEvent::Connection(e) => e.description(),
            BoardEvent::Machine(e) => e.description(),
            BoardEvent::Programme(e) => e.description(),
            BoardEvent::Communication(e) => e.description(),
            BoardEvent::Error(e) => e.description(),
        }
    }

    /// Shorthand for an echo correlation event
    pub fn echo(flag: impl Into<String>) -> Self {
        BoardEvent::Connection(ConnectionEvent::Echo { flag: flag.into() })
    }

    /// Check if this is the echo event for `flag`
    pub fn is_echo(&self, flag: &str) -> bool {
        matches!(self, BoardEvent::Connection(ConnectionEvent::Echo { flag: f }) if f == flag)
    }
}

impl From<ConnectionEvent> for BoardEvent {
    fn from(event: ConnectionEvent) -> Self {
        BoardEvent::Connection(event)
    }
}

impl From<MachineEvent> for BoardEvent {
    fn from(event: MachineEvent) -> Self {
        BoardEvent::Machine(event)
    }
}

impl From<ProgrammeEvent> for BoardEvent {
    fn from(event: ProgrammeEvent) -> Self {
        BoardEvent::Programme(event)
    }
}

impl From<CommunicationEvent> for BoardEvent {
    fn from(event: CommunicationEvent) -> Self {
        BoardEvent::Communication(event)
    }
}

impl From<ErrorEvent> for BoardEvent {
    fn from(event: ErrorEvent) -> Self {
        BoardEvent::Error(event)
    }
}

/// Event category for filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventCategory {
    /// Connection lifecycle and handshake events.
    Connection,
    /// Machine state events.
    Machine,
    /// Programme progress events.
    Programme,
    /// Line traffic events.
    Communication,
    /// Error events.
    Error,
}

impl std::fmt::Display for EventCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventCategory::Connection => write!(f, "Connection"),
            EventCategory::Machine => write!(f, "Machine"),
            EventCategory::Programme => write!(f, "Programme"),
            EventCategory::Communication => write!(f, "Communication"),
            EventCategory::Error => write!(f, "Error"),
        }
    }
}

/// Connection-related events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConnectionEvent {
    /// The controller moved to a new lifecycle state.
    StateChanged {
        /// The state entered.
        state: ConnectionState,
    },
    /// A session-tagged sentinel came back from the board.
    ///
    /// Published as `<flag>-received`, e.g. `connect-received`.
    Echo {
        /// The flag carried by the sentinel.
        flag: String,
    },
    /// Configuration dump processed and discovery complete.
    ConfigFetched,
    /// The board finished a soft reset, or a back-off recovery completed.
    ResetReceived,
    /// The connection failed or was closed.
    DisconnectReceived,
}

impl ConnectionEvent {
    fn name(&self) -> String {
        match self {
            ConnectionEvent::StateChanged { .. } => "state-changed".to_string(),
            ConnectionEvent::Echo { flag } => format!("{}-received", flag),
            ConnectionEvent::ConfigFetched => "config-fetched".to_string(),
            ConnectionEvent::ResetReceived => "reset-received".to_string(),
            ConnectionEvent::DisconnectReceived => "disconnect-received".to_string(),
        }
    }

    fn description(&self) -> String {
        match self {
            ConnectionEvent::StateChanged { state } => format!("Connection state: {}", state),
            ConnectionEvent::Echo { flag } => format!("Echo received: {}", flag),
            ConnectionEvent::ConfigFetched => "Board configuration fetched".to_string(),
            ConnectionEvent::ResetReceived => "Board reset".to_string(),
            ConnectionEvent::DisconnectReceived => "Disconnected".to_string(),
        }
    }
}

/// Machine state events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MachineEvent {
    /// Reported coordinate of one axis.
    PositionReceived {
        /// The axis reported.
        axis: Axis,
        /// Its coordinate in board units.
        position: f64,
    },
    /// Reported velocity.
    VelocityReceived {
        /// Current velocity in board units per minute.
        velocity: f64,
    },
    /// The board reported an idle machine state.
    Idle,
    /// The board reported a running machine state.
    Busy,
    /// A limit switch tripped.
    LimitHit {
        /// The axis whose switch tripped.
        axis: Axis,
        /// The end of the axis the switch sits on.
        direction: AxisDirection,
    },
    /// A limit switch tripped but the report did not say which one.
    UnknownLimitHit {
        /// Switch index, if the report carried one.
        value: Option<i64>,
    },
    /// An installed axis was discovered in the board configuration.
    AxisReceived {
        /// The installed axis.
        axis: Axis,
    },
    /// A home switch was discovered in the board configuration.
    HomeReceived {
        /// Axis carrying the switch.
        axis: Axis,
        /// How the switch is configured.
        switch_type: HomeSwitchType,
    },
    /// Board unit mode.
    UnitsReceived {
        /// Units in effect.
        mode: UnitMode,
    },
    /// Distance mode, from the board configuration or a sent G90/G91.
    DistModeReceived {
        /// Mode in effect.
        mode: DistanceMode,
    },
}

impl MachineEvent {
    fn name(&self) -> &'static str {
        match self {
            MachineEvent::PositionReceived { .. } => "position-received",
            MachineEvent::VelocityReceived { .. } => "velocity-received",
            MachineEvent::Idle => "idle",
            MachineEvent::Busy => "busy",
            MachineEvent::LimitHit { .. } => "limit-hit",
            MachineEvent::UnknownLimitHit { .. } => "unknown-limit-hit",
            MachineEvent::AxisReceived { .. } => "axis-received",
            MachineEvent::HomeReceived { .. } => "home-received",
            MachineEvent::UnitsReceived { .. } => "units-received",
            MachineEvent::DistModeReceived { .. } => "dist-mode-received",
        }
    }

    fn description(&self) -> String {
        match self {
            MachineEvent::PositionReceived { axis, position } => {
                format!("Position {}: {:.3}", axis, position)
            }
            MachineEvent::VelocityReceived { velocity } => format!("Velocity: {}", velocity),
            MachineEvent::Idle => "Idle".to_string(),
            MachineEvent::Busy => "Busy".to_string(),
            MachineEvent::LimitHit { axis, direction } => {
                format!("{}{} limit hit", axis, direction)
            }
            MachineEvent::UnknownLimitHit { value } => match value {
                Some(value) => format!("Limit hit on unknown switch {}", value),
                None => "Limit hit on unknown switch".to_string(),
            },
            MachineEvent::AxisReceived { axis } => format!("Axis installed: {}", axis),
            MachineEvent::HomeReceived { axis, switch_type } => {
                format!("Home switch on {}: {:?}", axis, switch_type)
            }
            MachineEvent::UnitsReceived { mode } => format!("Units: {:?}", mode),
            MachineEvent::DistModeReceived { mode } => format!("Distance mode: {:?}", mode),
        }
    }
}

/// Programme streaming events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProgrammeEvent {
    /// Board planner queue occupancy.
    QueueSize {
        /// Occupied planner slots.
        size: i64,
    },
    /// Percent of the current programme executed.
    Progress {
        /// 0 to 100.
        progress: u32,
    },
    /// The board reached the start of a streamed file.
    StartOfFile,
    /// The board reached the end of a streamed file.
    EndOfFile,
    /// Elapsed streaming time.
    TimerTick {
        /// Seconds spent streaming, excluding paused time.
        total_seconds: f64,
    },
}

impl ProgrammeEvent {
    fn name(&self) -> &'static str {
        match self {
            ProgrammeEvent::QueueSize { .. } => "queue-size",
            ProgrammeEvent::Progress { .. } => "programme-progress",
            ProgrammeEvent::StartOfFile => "start-of-file",
            ProgrammeEvent::EndOfFile => "end-of-file",
            ProgrammeEvent::TimerTick { .. } => "timer-tick",
        }
    }

    fn description(&self) -> String {
        match self {
            ProgrammeEvent::QueueSize { size } => format!("Queue size: {}", size),
            ProgrammeEvent::Progress { progress } => format!("Progress: {}%", progress),
            ProgrammeEvent::StartOfFile => "Start of file".to_string(),
            ProgrammeEvent::EndOfFile => "End of file".to_string(),
            ProgrammeEvent::TimerTick { total_seconds } => {
                format!("Elapsed: {:.1}s", total_seconds)
            }
        }
    }
}

/// Line traffic events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CommunicationEvent {
    /// A line arrived from the board.
    LineReceived {
        /// The line after prompt filtering.
        line: String,
        /// Whether the line is worth showing in a console.
        loggable: bool,
    },
    /// A line was written to the board.
    LineSent {
        /// The line as written.
        line: String,
        /// Whether the line is worth showing in a console.
        loggable: bool,
    },
    /// A sent line changed the feed rate.
    FeedRateSent {
        /// The rate as written, e.g. `500` or `12.5`.
        rate: String,
    },
    /// A sent line switched coolant.
    CoolantSent {
        /// Coolant on (M7/M8) or off (M9).
        on: bool,
    },
    /// A sent line switched the spindle.
    SpindleSent {
        /// Spindle on (M3/M4) or off (M5).
        on: bool,
        /// Rotation direction when switched on.
        direction: Option<SpindleDirection>,
    },
    /// A sent line set the spindle speed.
    SpindleSpeedSent {
        /// Speed as written.
        speed: u32,
    },
}

impl CommunicationEvent {
    fn name(&self) -> &'static str {
        match self {
            CommunicationEvent::LineReceived { .. } => "line-received",
            CommunicationEvent::LineSent { .. } => "line-sent",
            CommunicationEvent::FeedRateSent { .. } => "feed-rate-sent",
            CommunicationEvent::CoolantSent { .. } => "coolant-sent",
            CommunicationEvent::SpindleSent { .. } => "spindle-sent",
            CommunicationEvent::SpindleSpeedSent { .. } => "spindle-speed-sent",
        }
    }

    fn description(&self) -> String {
        match self {
            CommunicationEvent::LineReceived { line, .. } => format!("<< {}", line),
            CommunicationEvent::LineSent { line, .. } => format!(">> {}", line),
            CommunicationEvent::FeedRateSent { rate } => format!("Feed rate: {}", rate),
            CommunicationEvent::CoolantSent { on } => {
                format!("Coolant {}", if *on { "on" } else { "off" })
            }
            CommunicationEvent::SpindleSent { on, direction } => match (on, direction) {
                (true, Some(direction)) => format!("Spindle on ({:?})", direction),
                (true, None) => "Spindle on".to_string(),
                (false, _) => "Spindle off".to_string(),
            },
            CommunicationEvent::SpindleSpeedSent { speed } => format!("Spindle speed: {}", speed),
        }
    }
}

/// Error events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ErrorEvent {
    /// Error report from the board.
    ErrorReceived {
        /// Board status code.
        code: i64,
        /// Board message.
        message: String,
        /// Optional value, e.g. the switch index of a limit hit.
        value: Option<i64>,
    },
    /// The line transport failed to read or write.
    TransportFailed {
        /// What went wrong.
        reason: String,
    },
}

impl ErrorEvent {
    fn name(&self) -> &'static str {
        match self {
            ErrorEvent::ErrorReceived { .. } => "error-received",
            ErrorEvent::TransportFailed { .. } => "transport-error",
        }
    }

    fn description(&self) -> String {
        match self {
            ErrorEvent::ErrorReceived {
                code,
                message,
                value,
            } => match value {
                Some(value) => format!("Error {}: {} ({})", code, message, value),
                None => format!("Error {}: {}", code, message),
            },
            ErrorEvent::TransportFailed { reason } => format!("Transport error: {}", reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        assert_eq!(BoardEvent::echo("config").name(), "config-received");
        assert_eq!(
            BoardEvent::Machine(MachineEvent::PositionReceived {
                axis: Axis::X,
                position: 1.0
            })
            .name(),
            "position-received"
        );
        assert_eq!(
            BoardEvent::Programme(ProgrammeEvent::Progress { progress: 50 }).name(),
            "programme-progress"
        );
    }

    #[test]
    fn test_is_echo() {
        let event = BoardEvent::echo("connect");
        assert!(event.is_echo("connect"));
        assert!(!event.is_echo("config"));
        assert_eq!(event.category(), EventCategory::Connection);
    }

    #[test]
    fn test_limit_description() {
        let event = BoardEvent::Machine(MachineEvent::LimitHit {
            axis: Axis::Y,
            direction: AxisDirection::Max,
        });
        assert_eq!(event.description(), "Ymax limit hit");
    }
}
