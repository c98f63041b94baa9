use std::sync::Arc;
use std::time::Duration;

use cender_communication::communication::{LineTransport, MockSerialPort, ReadLoopExit};
use cender_core::{BoardEvent, ErrorEvent, EventBus};
use parking_lot::Mutex;
use tokio::time::Instant;

fn transport() -> (Arc<LineTransport>, MockSerialPort, Arc<EventBus>) {
    let bus = Arc::new(EventBus::new());
    let transport = Arc::new(LineTransport::new(Arc::clone(&bus)));
    let port = MockSerialPort::new();
    transport.attach(Box::new(port.clone()));
    (transport, port, bus)
}

#[tokio::test(start_paused = true)]
async fn test_idle_timeout() {
    let (transport, _port, _bus) = transport();
    let started = Instant::now();

    let exit = transport
        .read_loop(Duration::from_millis(50), |_| panic!("no data expected"))
        .await;

    assert_eq!(exit, ReadLoopExit::IdleTimeout);
    // 2000 polls of 50 ms
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(100), "{:?}", elapsed);
    assert!(elapsed < Duration::from_secs(101), "{:?}", elapsed);
}

#[tokio::test(start_paused = true)]
async fn test_lines_split_on_cr_and_lf() {
    let (transport, port, _bus) = transport();
    port.push_bytes(b"tinyg [mm] ok> \r\n{\"r\":{}}\r");
    port.push_bytes(b"\n\n[si]  status interval          100 ms\n");

    let lines = Arc::new(Mutex::new(Vec::new()));
    let collected = Arc::clone(&lines);
    let stopper = Arc::clone(&transport);
    let exit = transport
        .read_loop(Duration::from_millis(10), move |line| {
            let mut lines = collected.lock();
            lines.push(line);
            if lines.len() == 3 {
                stopper.request_stop();
            }
        })
        .await;

    assert_eq!(exit, ReadLoopExit::Stopped);
    assert_eq!(
        *lines.lock(),
        vec![
            "tinyg [mm] ok> ".to_string(),
            "{\"r\":{}}".to_string(),
            "[si]  status interval          100 ms".to_string(),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_partial_line_resets_idle_timer() {
    let (transport, port, _bus) = transport();
    let feeder = port.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(15)).await;
        feeder.push_bytes(b"partial");
    });

    let started = Instant::now();
    let exit = transport
        .read_loop(Duration::from_millis(10), |_| {})
        .await;

    assert_eq!(exit, ReadLoopExit::IdleTimeout);
    assert!(started.elapsed() >= Duration::from_secs(35));
}

#[tokio::test(start_paused = true)]
async fn test_read_error_ends_loop() {
    let (transport, port, bus) = transport();
    let mut rx = bus.receiver();
    port.set_fail_reads(true);

    let exit = transport
        .read_loop(Duration::from_millis(10), |_| {})
        .await;
    assert_eq!(exit, ReadLoopExit::IoError);

    match rx.try_recv() {
        Ok(BoardEvent::Error(ErrorEvent::TransportFailed { reason })) => {
            assert!(reason.contains("read failed"), "{}", reason)
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_write_failure_is_reported() {
    let (transport, port, bus) = transport();
    let mut rx = bus.receiver();
    port.set_fail_writes(true);

    assert!(transport.write_line("G0 X1").is_err());
    assert!(matches!(
        rx.try_recv(),
        Ok(BoardEvent::Error(ErrorEvent::TransportFailed { .. }))
    ));
    assert!(port.written_lines().is_empty());
}
