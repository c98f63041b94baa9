//! Firmware protocol support
//!
//! A board variant is described by two capability traits:
//! - [`ResponseParser`] turns received lines into [`BoardEvent`]s
//! - [`CommandFormatter`] produces the board's set-up and control commands
//!
//! Supported boards:
//! - TinyG 0.96: free-slot queue reports
//! - TinyG 0.97: queue reports with in/out counts
//!
//! [`parser_for`] and [`formatter_for`] select the implementation for a
//! configured [`BoardType`].

pub mod board_config;
pub mod echo;
pub mod tinyg;

pub use board_config::{parse_config_line, BoardConfigMap, BoardSetting, DEFAULT_STATUS_INTERVAL};
pub use echo::EchoCorrelator;
pub use tinyg::{TinyG096, TinyG097, TinyGCommandFormatter, TinyGResponseParser, TinyGVariant};

pub use crate::communication::sender::FlowSignal;

use cender_core::{
    BoardEvent, BoardType, CommunicationEvent, DistanceMode, MachineEvent, SpindleDirection,
};
use regex::Regex;
use std::sync::OnceLock;

/// Controller state a parser needs to interpret a line
#[derive(Debug, Clone, Copy)]
pub struct ParseContext<'a> {
    /// Session tag source for echo correlation
    pub session: &'a EchoCorrelator,
    /// A soft reset was sent and `SYSTEM READY` is expected
    pub reset_pending: bool,
    /// A file is streaming and progress is being tracked
    pub tracking_progress: bool,
}

/// What a received line means
#[derive(Debug, Clone, PartialEq)]
pub struct ParseOutcome {
    /// Whether the line is worth showing in a console
    pub loggable: bool,
    /// Events to publish, in order
    pub events: Vec<BoardEvent>,
    /// Flow decision for the bulk sender
    pub flow: Option<FlowSignal>,
    /// Commands the board reports as completed since the last report
    pub progress_increment: Option<u32>,
    /// A configuration dump line
    pub setting: Option<BoardSetting>,
}

impl ParseOutcome {
    /// Outcome of a line nothing recognised
    pub fn plain() -> Self {
        Self {
            loggable: true,
            events: Vec::new(),
            flow: None,
            progress_increment: None,
            setting: None,
        }
    }

    /// Mark the line as handled, so it is not logged as plain text
    pub fn consume(&mut self) {
        self.loggable = false;
    }
}

/// What a transmitted line means
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOutcome {
    /// Whether the line is worth showing in a console
    pub loggable: bool,
    /// Events to publish, in order
    pub events: Vec<BoardEvent>,
    /// Distance mode selected by the line
    pub distance_mode: Option<DistanceMode>,
}

/// Decodes lines received from a board
pub trait ResponseParser: Send + Sync {
    /// The board variant this parser speaks
    fn board_type(&self) -> BoardType;

    /// Strip prompts and whitespace before parsing
    fn filter_response(&self, line: &str) -> String {
        line.trim().to_string()
    }

    /// Interpret one received line
    fn parse(&self, line: &str, ctx: &ParseContext<'_>) -> ParseOutcome;

    /// Interpret one transmitted line
    fn inspect_request(&self, line: &str, session: &EchoCorrelator) -> RequestOutcome {
        inspect_request(line, session)
    }
}

/// A board command and the comment shown next to it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemCommand {
    /// The command itself
    pub code: &'static str,
    /// Human readable description
    pub comment: &'static str,
    always_annotated: bool,
}

impl SystemCommand {
    /// Command annotated only when comments are enabled
    pub const fn new(code: &'static str, comment: &'static str) -> Self {
        Self {
            code,
            comment,
            always_annotated: false,
        }
    }

    /// Command that always carries its comment
    pub const fn annotated(code: &'static str, comment: &'static str) -> Self {
        Self {
            code,
            comment,
            always_annotated: true,
        }
    }

    /// Render the line to send
    pub fn render(&self, comments: bool) -> String {
        if comments || self.always_annotated {
            format!("{} ({})", self.code, self.comment)
        } else {
            self.code.to_string()
        }
    }
}

/// Produces board set-up and control commands
pub trait CommandFormatter: Send + Sync {
    /// Disable character echo
    fn echo_off(&self) -> SystemCommand;
    /// Switch responses to JSON
    fn json_mode(&self) -> SystemCommand;
    /// Enable hardware flow control
    fn flow_control(&self) -> SystemCommand;
    /// Enable verbose queue reports
    fn queue_reports(&self) -> SystemCommand;
    /// Ask for a queue report, if the board needs asking
    fn queue_size_request(&self) -> Option<SystemCommand>;
    /// Drop everything the board has queued
    fn clear_queue(&self) -> SystemCommand;
    /// Reset the board
    fn soft_reset(&self) -> SystemCommand;
    /// Feed hold
    fn stop(&self) -> SystemCommand;
    /// Cycle start after a feed hold
    fn resume(&self) -> SystemCommand;
    /// Feed hold, flush and resume in one line
    fn stop_and_clear(&self) -> SystemCommand;
    /// Dump every setting
    fn config_dump(&self) -> SystemCommand;
    /// Request a status report
    fn status_poll(&self) -> &'static str;
    /// Ask for the firmware version
    fn firmware_version_query(&self) -> &'static str;
    /// Planner queue capacity
    fn command_queue_slots(&self) -> i64;
}

/// Parser for the configured board
pub fn parser_for(board_type: BoardType) -> Box<dyn ResponseParser> {
    match board_type {
        BoardType::TinyG096 => Box::new(TinyGResponseParser::<TinyG096>::new()),
        BoardType::TinyG097 => Box::new(TinyGResponseParser::<TinyG097>::new()),
    }
}

/// Command formatter for the configured board
pub fn formatter_for(board_type: BoardType) -> Box<dyn CommandFormatter> {
    match board_type {
        BoardType::TinyG096 => Box::new(TinyGCommandFormatter::<TinyG096>::new()),
        BoardType::TinyG097 => Box::new(TinyGCommandFormatter::<TinyG097>::new()),
    }
}

fn feed_rate_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)F([\d.]+)").expect("invalid regex pattern"))
}

fn spindle_on_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^M([34])").expect("invalid regex pattern"))
}

fn spindle_speed_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?:M[34] )?S(\d+)").expect("invalid regex pattern"))
}

fn distance_mode_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^(G9[01])").expect("invalid regex pattern"))
}

/// Inspect a transmitted line for state changes the board will not report
///
/// Feed rate, coolant, spindle and distance mode changes are published as
/// events. Feed rate lines and session sentinels are not loggable.
pub fn inspect_request(line: &str, session: &EchoCorrelator) -> RequestOutcome {
    let mut outcome = RequestOutcome {
        loggable: true,
        events: Vec::new(),
        distance_mode: None,
    };

    // Sentinels are JSON, their random tag may contain anything
    if session.is_tagged(line) {
        outcome.loggable = false;
        return outcome;
    }

    if let Some(caps) = feed_rate_regex().captures(line) {
        tracing::debug!("Switching feed rate");
        outcome.events.push(BoardEvent::Communication(CommunicationEvent::FeedRateSent {
            rate: caps[1].to_string(),
        }));
        outcome.loggable = false;
    }

    if line.starts_with("M7") || line.starts_with("M8") {
        outcome
            .events
            .push(BoardEvent::Communication(CommunicationEvent::CoolantSent { on: true }));
    }
    if line.starts_with("M9") {
        outcome
            .events
            .push(BoardEvent::Communication(CommunicationEvent::CoolantSent { on: false }));
    }

    if let Some(caps) = spindle_on_regex().captures(line) {
        let direction = if &caps[1] == "3" {
            SpindleDirection::Clockwise
        } else {
            SpindleDirection::CounterClockwise
        };
        outcome.events.push(BoardEvent::Communication(CommunicationEvent::SpindleSent {
            on: true,
            direction: Some(direction),
        }));
    }

    if let Some(speed) = spindle_speed_regex()
        .captures(line)
        .and_then(|caps| caps[1].parse::<u32>().ok())
    {
        outcome
            .events
            .push(BoardEvent::Communication(CommunicationEvent::SpindleSpeedSent { speed }));
    }

    if line.starts_with("M5") {
        outcome.events.push(BoardEvent::Communication(CommunicationEvent::SpindleSent {
            on: false,
            direction: None,
        }));
    }

    if let Some(caps) = distance_mode_regex().captures(line) {
        tracing::debug!("Switching distance mode");
        let mode = if caps[1].eq_ignore_ascii_case("G90") {
            DistanceMode::Absolute
        } else {
            DistanceMode::Relative
        };
        outcome.distance_mode = Some(mode);
        outcome
            .events
            .push(BoardEvent::Machine(MachineEvent::DistModeReceived { mode }));
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(outcome: &RequestOutcome) -> Vec<String> {
        outcome.events.iter().map(|e| e.name()).collect()
    }

    #[test]
    fn test_system_command_render() {
        let clear = SystemCommand::new("%", "clear command queue");
        assert_eq!(clear.render(false), "%");
        assert_eq!(clear.render(true), "% (clear command queue)");

        let stop = SystemCommand::annotated("!", "stop");
        assert_eq!(stop.render(false), "! (stop)");
    }

    #[test]
    fn test_inspect_feed_rate() {
        let session = EchoCorrelator::with_session_id("s1");
        let outcome = inspect_request("G1 X10 F500.5", &session);
        assert!(!outcome.loggable);
        assert_eq!(
            outcome.events,
            vec![BoardEvent::Communication(CommunicationEvent::FeedRateSent {
                rate: "500.5".to_string()
            })]
        );
    }

    #[test]
    fn test_inspect_spindle_and_coolant() {
        let session = EchoCorrelator::with_session_id("s1");

        let outcome = inspect_request("M4 S12000 (spindle on)", &session);
        assert!(outcome.loggable);
        assert_eq!(names(&outcome), vec!["spindle-sent", "spindle-speed-sent"]);

        let outcome = inspect_request("M5", &session);
        assert_eq!(
            outcome.events,
            vec![BoardEvent::Communication(CommunicationEvent::SpindleSent {
                on: false,
                direction: None
            })]
        );

        assert_eq!(names(&inspect_request("M8", &session)), vec!["coolant-sent"]);
        assert_eq!(names(&inspect_request("M9 (coolant off)", &session)), vec!["coolant-sent"]);
    }

    #[test]
    fn test_inspect_distance_mode() {
        let session = EchoCorrelator::with_session_id("s1");
        let outcome = inspect_request("g91", &session);
        assert_eq!(outcome.distance_mode, Some(DistanceMode::Relative));
        let outcome = inspect_request("G90 (absolute)", &session);
        assert_eq!(outcome.distance_mode, Some(DistanceMode::Absolute));
    }

    #[test]
    fn test_inspect_sentinel_not_loggable() {
        let session = EchoCorrelator::with_session_id("s1");
        let outcome = inspect_request(&session.tag_sentinel("config"), &session);
        assert!(!outcome.loggable);
        assert!(outcome.events.is_empty());
    }

    #[test]
    fn test_factories() {
        assert_eq!(parser_for(BoardType::TinyG096).board_type(), BoardType::TinyG096);
        assert_eq!(formatter_for(BoardType::TinyG097).queue_reports().code, "$qv=2");
        assert!(formatter_for(BoardType::TinyG097).queue_size_request().is_none());
        assert_eq!(formatter_for(BoardType::TinyG096).command_queue_slots(), 28);
    }
}
