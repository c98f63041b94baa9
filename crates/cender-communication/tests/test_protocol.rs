use cender_communication::communication::{count_all, CommandFilter};
use cender_communication::firmware::{
    formatter_for, parser_for, EchoCorrelator, FlowSignal, ParseContext,
};
use cender_core::{BoardEvent, BoardType, ProgrammeEvent};

fn ctx(session: &EchoCorrelator, tracking_progress: bool) -> ParseContext<'_> {
    ParseContext {
        session,
        reset_pending: false,
        tracking_progress,
    }
}

#[test]
fn test_arc_commands_count_extra() {
    let lines = ["G1 X10", "G2 X20 Y20 I5 J5", "G0 X0"];
    assert_eq!(count_all(&lines), 6);
}

#[test]
fn test_queue_report_wins_over_echo() {
    let parser = parser_for(BoardType::TinyG096);
    let session = EchoCorrelator::new();
    let line = format!(
        r#"{{"qr":24,"msg":"_{}_config"}}"#,
        session.session_id()
    );

    let outcome = parser.parse(&line, &ctx(&session, false));
    assert_eq!(
        outcome.events,
        vec![BoardEvent::Programme(ProgrammeEvent::QueueSize { size: 4 })]
    );
    assert_eq!(outcome.flow, Some(FlowSignal::Ready));
    assert!(!outcome.loggable);
}

#[test]
fn test_config_echo_round_trip() {
    let parser = parser_for(BoardType::TinyG097);
    let session = EchoCorrelator::new();
    let sentinel = session.tag_sentinel("config");
    let echoed = format!(r#"{{"r":{},"f":[1,0,8]}}"#, sentinel);

    let outcome = parser.parse(&echoed, &ctx(&session, false));
    assert_eq!(outcome.events, vec![BoardEvent::echo("config")]);
    assert_eq!(outcome.events[0].name(), "config-received");
    assert!(!outcome.loggable);
    assert!(session.is_sentinel_echo(&echoed, "config"));

    // Another session's sentinel is just a message
    let other = EchoCorrelator::new();
    let outcome = parser.parse(&echoed, &ctx(&other, false));
    assert!(outcome.events.is_empty());
}

#[test]
fn test_config_line_recorded_and_hidden() {
    let parser = parser_for(BoardType::TinyG097);
    let session = EchoCorrelator::new();

    let outcome = parser.parse(
        "[xvm] x velocity maximum  800.000 mm/min",
        &ctx(&session, false),
    );
    let setting = outcome.setting.expect("config line");
    assert_eq!(setting.id, "xvm");
    assert_eq!(setting.message, "x velocity maximum");
    assert_eq!(setting.value, "800.000");
    assert_eq!(setting.units.as_deref(), Some("mm/min"));
    assert!(!outcome.loggable);
}

#[test]
fn test_progress_only_while_tracking() {
    let parser = parser_for(BoardType::TinyG097);
    let session = EchoCorrelator::new();
    let report = r#"{"r":{"qr":26,"qi":1,"qo":2}}"#;

    assert_eq!(parser.parse(report, &ctx(&session, false)).progress_increment, None);
    assert_eq!(parser.parse(report, &ctx(&session, true)).progress_increment, Some(2));

    let skipped = r#"{"r":{"err":"Move less than minimum length"}}"#;
    let outcome = parser.parse(skipped, &ctx(&session, true));
    assert_eq!(outcome.progress_increment, Some(1));
    assert!(outcome.events.is_empty());
}

#[test]
fn test_limit_error() {
    let parser = parser_for(BoardType::TinyG097);
    let session = EchoCorrelator::new();
    let outcome = parser.parse(
        r#"{"er":{"fb":440.20,"st":27,"msg":"Limit switch hit - Shutdown occurred","val":1}}"#,
        &ctx(&session, false),
    );
    let names: Vec<String> = outcome.events.iter().map(|e| e.name()).collect();
    assert_eq!(names, vec!["limit-hit", "error-received"]);
    assert!(!outcome.loggable);
}

#[test]
fn test_limit_error_without_switch() {
    let parser = parser_for(BoardType::TinyG097);
    let session = EchoCorrelator::new();

    for line in [
        r#"{"er":{"st":27,"msg":"Limit switch hit"}}"#,
        r#"{"er":{"st":27,"msg":"Limit switch hit","val":99}}"#,
    ] {
        let outcome = parser.parse(line, &ctx(&session, false));
        let names: Vec<String> = outcome.events.iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["unknown-limit-hit", "error-received"]);
    }
}

#[test]
fn test_filtered_file_keeps_commands() {
    let filter = CommandFilter::new(Some(3));
    let content = filter.filter_file("G21 G90\n(setup)\nG1 X1.23456 Y2 F300 M3\n");
    let lines: Vec<String> = content
        .lines()
        .map(|line| filter.filter_request(line.trim()))
        .filter(|line| !line.is_empty())
        .collect();
    assert_eq!(lines, vec!["G21", "G90", "G1 X1.234 Y2 F300", "M3"]);
}

#[test]
fn test_variants_differ_only_in_queue_handling() {
    let old = formatter_for(BoardType::TinyG096);
    let new = formatter_for(BoardType::TinyG097);
    assert!(old.queue_size_request().is_some());
    assert!(new.queue_size_request().is_none());
    assert_eq!(old.config_dump(), new.config_dump());
    assert_eq!(old.command_queue_slots(), new.command_queue_slots());
}
