//! Programme progress and elapsed time
//!
//! - [`ProgressCounter`] compares commands the board reports as executed with
//!   the number of commands queued since the last reset
//! - [`FileTimer`] measures streaming time, excluding paused periods, and
//!   publishes a tick every half second while running

use cender_core::{BoardEvent, EventBus, ProgrammeEvent};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Interval between timer ticks
pub const TIMER_TICK: Duration = Duration::from_millis(500);

/// Executed versus expected command counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressCounter {
    total: u32,
    executed: u32,
}

impl ProgressCounter {
    /// Create a zeroed counter
    pub fn new() -> Self {
        Self::default()
    }

    /// Zero both counts
    pub fn reset(&mut self) {
        self.total = 0;
        self.executed = 0;
    }

    /// Add commands expected to be reported back
    pub fn add_expected(&mut self, count: u32) {
        self.total = self.total.saturating_add(count);
        if count > 0 {
            tracing::trace!("command counter now at {}", self.total);
        }
    }

    /// Record executed commands and return the percentage
    ///
    /// Nothing is recorded while no commands are expected.
    pub fn record(&mut self, increment: u32) -> u32 {
        if self.total == 0 {
            return 0;
        }
        self.executed = self.executed.saturating_add(increment);
        tracing::debug!("progress: {}/{}", self.executed, self.total);
        self.percent()
    }

    /// Completion percentage, 0 to 100
    ///
    /// Halves round to even, so 1 of 8 is 12%.
    pub fn percent(&self) -> u32 {
        if self.total == 0 {
            return 0;
        }
        let ratio = f64::from(self.executed) / f64::from(self.total);
        ((ratio * 100.0).round_ties_even() as u32).min(100)
    }

    /// Commands expected
    pub fn total(&self) -> u32 {
        self.total
    }

    /// Commands reported as executed
    pub fn executed(&self) -> u32 {
        self.executed
    }
}

#[derive(Debug, Default)]
struct TimerState {
    active: bool,
    paused: bool,
    last_start: Option<Instant>,
    total: Duration,
}

/// Streaming stopwatch
#[derive(Debug, Default)]
pub struct FileTimer {
    state: Mutex<TimerState>,
}

impl FileTimer {
    /// Create a stopped timer
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Start from zero
    pub fn restart(&self) {
        let mut state = self.state.lock();
        state.active = true;
        state.paused = false;
        state.last_start = Some(Instant::now());
        state.total = Duration::ZERO;
    }

    /// Stop counting, keeping the time so far
    pub fn pause(&self) {
        tracing::debug!("pause timer");
        let mut state = self.state.lock();
        state.paused = true;
        if let Some(start) = state.last_start.take() {
            state.total += start.elapsed();
        }
    }

    /// Continue counting after [`FileTimer::pause`]
    pub fn resume(&self) {
        let mut state = self.state.lock();
        if !state.active {
            return;
        }
        state.paused = false;
        if state.last_start.is_none() {
            state.last_start = Some(Instant::now());
        }
    }

    /// Stop and zero
    pub fn reset(&self) {
        *self.state.lock() = TimerState::default();
    }

    /// Time spent running, or `None` while stopped or paused
    pub fn elapsed(&self) -> Option<Duration> {
        let state = self.state.lock();
        match (state.paused, state.last_start) {
            (false, Some(start)) => Some(state.total + start.elapsed()),
            _ => None,
        }
    }

    /// Publish a [`ProgrammeEvent::TimerTick`] every [`TIMER_TICK`] while running
    ///
    /// The task ends once the timer is dropped.
    pub fn spawn_ticker(self: &Arc<Self>, bus: Arc<EventBus>) -> JoinHandle<()> {
        let timer: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticks = tokio::time::interval(TIMER_TICK);
            loop {
                ticks.tick().await;
                let Some(timer) = timer.upgrade() else {
                    break;
                };
                if let Some(elapsed) = timer.elapsed() {
                    bus.publish(BoardEvent::Programme(ProgrammeEvent::TimerTick {
                        total_seconds: elapsed.as_secs_f64(),
                    }));
                }
            }
            tracing::debug!("File timer stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_percent() {
        let mut counter = ProgressCounter::new();
        assert_eq!(counter.record(5), 0);
        assert_eq!(counter.executed(), 0);

        counter.add_expected(6);
        assert_eq!(counter.record(1), 17);
        assert_eq!(counter.record(2), 50);
        assert_eq!(counter.record(10), 100);
    }

    #[test]
    fn test_progress_halves_round_to_even() {
        let mut counter = ProgressCounter::new();
        counter.add_expected(8);
        assert_eq!(counter.record(1), 12);
        assert_eq!(counter.record(2), 38);
        assert_eq!(counter.record(2), 62);
        assert_eq!(counter.record(2), 88);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_excludes_pauses() {
        let timer = FileTimer::new();
        assert_eq!(timer.elapsed(), None);

        timer.restart();
        tokio::time::advance(Duration::from_secs(3)).await;
        timer.pause();
        assert_eq!(timer.elapsed(), None);

        tokio::time::advance(Duration::from_secs(10)).await;
        timer.resume();
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(timer.elapsed(), Some(Duration::from_secs(5)));

        timer.reset();
        assert_eq!(timer.elapsed(), None);
        timer.resume();
        assert_eq!(timer.elapsed(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_publishes_while_running() {
        let bus = Arc::new(EventBus::new());
        let mut rx = bus.receiver();
        let timer = FileTimer::new();
        let handle = timer.spawn_ticker(Arc::clone(&bus));

        timer.restart();
        tokio::time::sleep(Duration::from_millis(1100)).await;

        let mut ticks = 0;
        while let Ok(event) = rx.try_recv() {
            assert_eq!(event.name(), "timer-tick");
            ticks += 1;
        }
        assert!(ticks >= 2);

        drop(timer);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(handle.is_finished());
    }
}
