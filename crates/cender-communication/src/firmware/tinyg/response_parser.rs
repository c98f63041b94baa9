//! TinyG Response Parser
//!
//! This module provides parsing of TinyG JSON responses and status reports.
//!
//! Checks run in a fixed order and most of them consume the line, so a
//! report produces at most one primary event:
//! 1. `SYSTEM READY` while a soft reset is pending
//! 2. queue reports (variant specific)
//! 3. positions and velocity from `sr`, which does not stop the checks
//! 4. `er` error reports, including limit switch hits
//! 5. `sr.stat` machine state
//! 6. session sentinel echoes in `msg`
//!
//! Configuration dump lines are matched independently of JSON decoding.

use cender_core::{
    Axis, AxisDirection, BoardEvent, BoardType, ConnectionEvent, ErrorEvent, MachineEvent,
    ProgrammeEvent, ProtocolError,
};
use regex::Regex;
use serde_json::{Map, Value};
use std::marker::PhantomData;
use std::sync::OnceLock;

use super::{TinyGVariant, COMMAND_QUEUE_SLOTS};
use crate::firmware::board_config::parse_config_line;
use crate::firmware::{EchoCorrelator, FlowSignal, ParseContext, ParseOutcome, RequestOutcome, ResponseParser};

/// Status code of a limit switch hit
pub const LIMIT_HIT_CODE: i64 = 27;

/// Error text for a move the planner dropped as too short
const MIN_LENGTH_MOVE: &str = "Move less than minimum length";

fn prompt_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^tinyg \[[^\]]+\] ok>\s*").expect("invalid regex pattern"))
}

/// TinyG response parser
#[derive(Debug, Default)]
pub struct TinyGResponseParser<V> {
    variant: PhantomData<V>,
}

impl<V: TinyGVariant> TinyGResponseParser<V> {
    /// Create a new parser
    pub fn new() -> Self {
        Self {
            variant: PhantomData,
        }
    }

    fn parse_report(&self, report: &Map<String, Value>, ctx: &ParseContext<'_>, outcome: &mut ParseOutcome) {
        if report.is_empty() || report.contains_key("rx") || report.contains_key("") {
            outcome.consume();
        }

        if parse_reset(report, ctx, outcome) {
            return;
        }
        if V::parse_queue_report(report, ctx, outcome) {
            outcome.consume();
            return;
        }
        parse_position(report, outcome);
        if parse_error(report, outcome) {
            return;
        }
        if parse_status(report, outcome) {
            return;
        }
        parse_echo(report, ctx.session, outcome);
    }
}

impl<V: TinyGVariant> ResponseParser for TinyGResponseParser<V> {
    fn board_type(&self) -> BoardType {
        V::BOARD_TYPE
    }

    fn filter_response(&self, line: &str) -> String {
        prompt_regex().replace(line.trim(), "").into_owned()
    }

    fn parse(&self, line: &str, ctx: &ParseContext<'_>) -> ParseOutcome {
        tracing::trace!("Parsing response: {}", line);
        let mut outcome = ParseOutcome::plain();

        match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(map)) => {
                let report = match map.get("r") {
                    Some(Value::Object(inner)) => inner,
                    _ => &map,
                };
                self.parse_report(report, ctx, &mut outcome);
            }
            Ok(_) => {}
            Err(_) => tracing::trace!("Response wasn't JSON"),
        }

        if let Some(setting) = parse_config_line(line) {
            outcome.setting = Some(setting);
            outcome.consume();
        }

        outcome
    }

    fn inspect_request(&self, line: &str, session: &EchoCorrelator) -> RequestOutcome {
        let mut outcome = crate::firmware::inspect_request(line, session);
        if line == r#"{"sr":""}"# {
            outcome.loggable = false;
        }
        outcome
    }
}

/// Integer field that may arrive as a number or a string
fn int_field(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn float_field(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn parse_reset(report: &Map<String, Value>, ctx: &ParseContext<'_>, outcome: &mut ParseOutcome) -> bool {
    let ready = report.get("msg").and_then(Value::as_str) == Some("SYSTEM READY");
    if ctx.reset_pending && ready {
        tracing::debug!("Reset received");
        outcome
            .events
            .push(BoardEvent::Connection(ConnectionEvent::ResetReceived));
        outcome.consume();
        return true;
    }
    false
}

fn queue_size_event(size: i64) -> BoardEvent {
    BoardEvent::Programme(ProgrammeEvent::QueueSize { size })
}

/// `{"qr":n}` where n is the number of free planner slots
pub(super) fn parse_free_slot_report(report: &Map<String, Value>, outcome: &mut ParseOutcome) -> bool {
    let Some(free) = report.get("qr").and_then(int_field) else {
        return false;
    };

    let size = COMMAND_QUEUE_SLOTS - free;
    tracing::debug!("queue_size: {}", size);
    outcome.flow = Some(if free > 1 {
        FlowSignal::Ready
    } else {
        FlowSignal::Block
    });
    outcome.events.push(queue_size_event(size));
    true
}

/// `{"qr":n,"qi":i,"qo":o}` where o is the number of commands completed
pub(super) fn parse_in_out_report(
    report: &Map<String, Value>,
    ctx: &ParseContext<'_>,
    outcome: &mut ParseOutcome,
) -> bool {
    let free = report.get("qr").and_then(int_field);
    let queued_in = report.get("qi").and_then(int_field);
    let queued_out = report.get("qo").and_then(int_field);

    if let (Some(free), Some(_), Some(queued_out)) = (free, queued_in, queued_out) {
        let size = COMMAND_QUEUE_SLOTS - free.min(COMMAND_QUEUE_SLOTS);
        tracing::debug!("queue_size: {}", size);
        if ctx.tracking_progress {
            outcome.progress_increment = Some(queued_out.max(0) as u32);
        }
        outcome.events.push(queue_size_event(size));
        return true;
    }

    // A dropped move still counts as executed
    if report.get("err").and_then(Value::as_str) == Some(MIN_LENGTH_MOVE) {
        if ctx.tracking_progress {
            outcome.progress_increment = Some(1);
        }
        return true;
    }

    false
}

fn parse_position(report: &Map<String, Value>, outcome: &mut ParseOutcome) {
    let Some(status) = report.get("sr").and_then(Value::as_object) else {
        return;
    };

    for axis in Axis::ALL {
        let key = format!("pos{}", axis.letter());
        if let Some(position) = status.get(&key).and_then(float_field) {
            tracing::debug!("Stat: {}:{}", axis, position);
            outcome
                .events
                .push(BoardEvent::Machine(MachineEvent::PositionReceived { axis, position }));
        }
    }

    if let Some(velocity) = status.get("vel").and_then(float_field) {
        outcome
            .events
            .push(BoardEvent::Machine(MachineEvent::VelocityReceived { velocity }));
    }

    outcome.consume();
}

/// Axis and end of a limit switch from the `val` of a limit error
///
/// Switches are numbered two per axis in X, Y, Z, A order, minimum first.
pub fn limit_switch(value: i64) -> Option<(Axis, AxisDirection)> {
    let index = usize::try_from(value).ok()?;
    let axis = Axis::from_index(index / 2)?;
    let direction = if index % 2 == 0 {
        AxisDirection::Min
    } else {
        AxisDirection::Max
    };
    Some((axis, direction))
}

fn parse_error(report: &Map<String, Value>, outcome: &mut ParseOutcome) -> bool {
    let Some(error) = report.get("er") else {
        return false;
    };

    let code = error.get("st").and_then(int_field);
    let Some(code) = code else {
        let e = ProtocolError::MalformedReport {
            line: error.to_string(),
            reason: "error report without status code".to_string(),
        };
        tracing::warn!("{}", e);
        return false;
    };
    let message = error
        .get("msg")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let value = error.get("val").and_then(int_field);

    tracing::debug!("Error: {} {}", message, code);

    if code == LIMIT_HIT_CODE {
        match value.and_then(limit_switch) {
            Some((axis, direction)) => {
                tracing::info!("{}{} limit hit", axis, direction);
                outcome
                    .events
                    .push(BoardEvent::Machine(MachineEvent::LimitHit { axis, direction }));
            }
            None => {
                tracing::warn!("Limit hit on unknown switch {:?}", value);
                outcome
                    .events
                    .push(BoardEvent::Machine(MachineEvent::UnknownLimitHit { value }));
            }
        }
    }

    outcome.events.push(BoardEvent::Error(ErrorEvent::ErrorReceived {
        code,
        message,
        value,
    }));
    outcome.consume();
    true
}

fn parse_status(report: &Map<String, Value>, outcome: &mut ParseOutcome) -> bool {
    let Some(stat) = report
        .get("sr")
        .and_then(|sr| sr.get("stat"))
    else {
        return false;
    };

    match int_field(stat) {
        Some(3) | Some(4) => outcome.events.push(BoardEvent::Machine(MachineEvent::Idle)),
        Some(5) => outcome.events.push(BoardEvent::Machine(MachineEvent::Busy)),
        _ => {}
    }
    outcome.consume();
    true
}

fn parse_echo(report: &Map<String, Value>, session: &EchoCorrelator, outcome: &mut ParseOutcome) -> bool {
    let Some(flag) = report
        .get("msg")
        .and_then(Value::as_str)
        .and_then(|msg| session.flag_of(msg))
    else {
        return false;
    };

    tracing::debug!("Echo received: {}", flag);
    outcome.events.push(BoardEvent::echo(flag));
    outcome.consume();
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firmware::tinyg::{TinyG096, TinyG097};

    fn ctx(session: &EchoCorrelator) -> ParseContext<'_> {
        ParseContext {
            session,
            reset_pending: false,
            tracking_progress: false,
        }
    }

    #[test]
    fn test_filter_prompt() {
        let parser = TinyGResponseParser::<TinyG097>::new();
        assert_eq!(parser.filter_response("tinyg [mm] ok> {\"qr\":28}\r"), "{\"qr\":28}");
        assert_eq!(parser.filter_response("  plain  "), "plain");
    }

    #[test]
    fn test_reset_only_when_pending() {
        let parser = TinyGResponseParser::<TinyG096>::new();
        let session = EchoCorrelator::with_session_id("s1");
        let line = r#"{"r":{"msg":"SYSTEM READY"}}"#;

        let outcome = parser.parse(line, &ctx(&session));
        assert!(outcome.events.is_empty());
        assert!(outcome.loggable);

        let pending = ParseContext {
            reset_pending: true,
            ..ctx(&session)
        };
        let outcome = parser.parse(line, &pending);
        assert_eq!(
            outcome.events,
            vec![BoardEvent::Connection(ConnectionEvent::ResetReceived)]
        );
        assert!(!outcome.loggable);
    }

    #[test]
    fn test_free_slot_flow() {
        let parser = TinyGResponseParser::<TinyG096>::new();
        let session = EchoCorrelator::with_session_id("s1");

        let outcome = parser.parse(r#"{"qr":20}"#, &ctx(&session));
        assert_eq!(outcome.flow, Some(FlowSignal::Ready));
        assert_eq!(outcome.events, vec![queue_size_event(8)]);

        let outcome = parser.parse(r#"{"qr":1}"#, &ctx(&session));
        assert_eq!(outcome.flow, Some(FlowSignal::Block));
        assert_eq!(outcome.events, vec![queue_size_event(27)]);
    }

    #[test]
    fn test_in_out_report_needs_all_keys() {
        let parser = TinyGResponseParser::<TinyG097>::new();
        let session = EchoCorrelator::with_session_id("s1");

        let outcome = parser.parse(r#"{"qr":20}"#, &ctx(&session));
        assert!(outcome.events.is_empty());

        let outcome = parser.parse(r#"{"qr":40,"qi":1,"qo":0}"#, &ctx(&session));
        assert_eq!(outcome.events, vec![queue_size_event(0)]);
        assert_eq!(outcome.flow, None);
        assert_eq!(outcome.progress_increment, None);
    }

    #[test]
    fn test_status_report() {
        let parser = TinyGResponseParser::<TinyG097>::new();
        let session = EchoCorrelator::with_session_id("s1");

        let outcome = parser.parse(
            r#"{"sr":{"posx":1.5,"posy":-2,"posz":0.25,"vel":120.5,"stat":3}}"#,
            &ctx(&session),
        );
        assert!(!outcome.loggable);
        let names: Vec<String> = outcome.events.iter().map(|e| e.name()).collect();
        assert_eq!(
            names,
            vec![
                "position-received",
                "position-received",
                "position-received",
                "velocity-received",
                "idle"
            ]
        );
    }

    #[test]
    fn test_limit_table() {
        assert_eq!(limit_switch(0), Some((Axis::X, AxisDirection::Min)));
        assert_eq!(limit_switch(1), Some((Axis::X, AxisDirection::Max)));
        assert_eq!(limit_switch(4), Some((Axis::Z, AxisDirection::Min)));
        assert_eq!(limit_switch(7), Some((Axis::A, AxisDirection::Max)));
        assert_eq!(limit_switch(8), None);
        assert_eq!(limit_switch(-1), None);
    }

    #[test]
    fn test_plain_text_loggable() {
        let parser = TinyGResponseParser::<TinyG097>::new();
        let session = EchoCorrelator::with_session_id("s1");
        let outcome = parser.parse("ok", &ctx(&session));
        assert!(outcome.loggable);
        assert!(outcome.events.is_empty());
    }

    #[test]
    fn test_empty_object_not_loggable() {
        let parser = TinyGResponseParser::<TinyG097>::new();
        let session = EchoCorrelator::with_session_id("s1");
        assert!(!parser.parse("{}", &ctx(&session)).loggable);
        assert!(!parser.parse(r#"{"r":{"rx":254}}"#, &ctx(&session)).loggable);
        assert!(parser.parse(r#"{"fb":440.2}"#, &ctx(&session)).loggable);
    }

    #[test]
    fn test_status_poll_request_not_loggable() {
        let parser = TinyGResponseParser::<TinyG097>::new();
        let session = EchoCorrelator::with_session_id("s1");
        assert!(!parser.inspect_request(r#"{"sr":""}"#, &session).loggable);
        assert!(parser.inspect_request("G0 X1", &session).loggable);
    }
}
