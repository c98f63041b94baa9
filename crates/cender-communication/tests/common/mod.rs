//! Shared helpers for controller tests

#![allow(dead_code)]

use std::time::Duration;

use cender_communication::communication::MockSerialPort;
use cender_communication::ControllerBoard;
use cender_core::{BoardEvent, CommunicationEvent};
use cender_settings::Config;
use tokio::sync::broadcast::{self, error::RecvError};

/// Configuration dump of a three axis machine with X homing and back-off
pub const CONFIG_DUMP: &[&str] = &[
    "[fb]  firmware build            440.20",
    "[id]  TinyG ID                    2X2660-FHZ",
    "[1ma] m1 map to axis         0 [0=X,1=Y,2=Z...]",
    "[2ma] m2 map to axis         1 [0=X,1=Y,2=Z...]",
    "[3ma] m3 map to axis         1 [0=X,1=Y,2=Z...]",
    "[4ma] m4 map to axis         2 [0=X,1=Y,2=Z...]",
    "[gun] default gcode units mode  1 [0=inch,1=mm]",
    "[gdi] default gcode distance mode  0 [0=G90,1=G91]",
    "[xsn] x switch min           3 [0=off,1=homing,2=limit,3=limit+homing]",
    "[xvm] x velocity maximum  800.000 mm/min",
    "[xlb] x latch backoff           20.000 mm",
    "[xzb] x zero backoff             3.000 mm",
];

/// Scripted TinyG: echoes messages, answers `$$` and soft resets
pub fn tinyg(port: &MockSerialPort) {
    port.set_responder(|line| {
        if line.starts_with(r#"{"msg":"#) {
            vec![format!(r#"{{"r":{},"f":[1,0,8]}}"#, line)]
        } else if line.starts_with("$$") {
            CONFIG_DUMP.iter().map(|l| l.to_string()).collect()
        } else if line.starts_with('\x18') {
            vec![r#"{"r":{"fv":0.970,"fb":440.20,"msg":"SYSTEM READY"}}"#.to_string()]
        } else {
            Vec::new()
        }
    });
}

/// Controller with default settings and a scripted port
pub fn board() -> (ControllerBoard, MockSerialPort) {
    let board = ControllerBoard::new(Config::default().shared());
    let port = MockSerialPort::new();
    tinyg(&port);
    (board, port)
}

/// Connect and wait for configuration discovery to finish
pub async fn connected() -> (ControllerBoard, MockSerialPort, broadcast::Receiver<BoardEvent>) {
    let (board, port) = board();
    let mut rx = board.bus().receiver();
    board
        .connect_with_port(Box::new(port.clone()))
        .await
        .expect("connect handshake");
    wait_for(&mut rx, "config-fetched").await;
    (board, port, rx)
}

/// Receive events until one matches, returning everything seen
pub async fn wait_until<P>(rx: &mut broadcast::Receiver<BoardEvent>, mut matches: P) -> Vec<BoardEvent>
where
    P: FnMut(&BoardEvent) -> bool,
{
    let mut seen = Vec::new();
    let found = tokio::time::timeout(Duration::from_secs(60), async {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let done = matches(&event);
                    seen.push(event);
                    if done {
                        break;
                    }
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await;
    assert!(found.is_ok(), "event not published, saw {:?}", seen);
    seen
}

/// Receive events until one with `name` arrives
pub async fn wait_for(rx: &mut broadcast::Receiver<BoardEvent>, name: &str) -> Vec<BoardEvent> {
    wait_until(rx, |event| event.name() == name).await
}

/// Receive events until `line` has been written
pub async fn wait_sent(rx: &mut broadcast::Receiver<BoardEvent>, line: &str) -> Vec<BoardEvent> {
    wait_until(rx, |event| {
        matches!(event, BoardEvent::Communication(CommunicationEvent::LineSent { line: sent, .. }) if sent == line)
    })
    .await
}

/// Names of `events`, in order
pub fn names(events: &[BoardEvent]) -> Vec<String> {
    events.iter().map(BoardEvent::name).collect()
}
