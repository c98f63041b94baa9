//! Command queue senders
//!
//! A [`CommandSender`] drains a FIFO of lines onto the [`LineTransport`],
//! gated by two flags:
//! - `paused`, controlled by the operator
//! - `clear_to_send`, controlled by board queue reports
//!
//! A sender lives only while it has work: once its queue empties the drain
//! loop exits and the owning [`SenderSlot`] replaces it with a fresh sender
//! on the next enqueue.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::transport::LineTransport;

/// Protocol flow decision derived from a queue report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowSignal {
    /// Board has room, sending may continue
    Ready,
    /// Board queue is full, hold
    Block,
}

/// FIFO of lines drained onto the transport
pub struct CommandSender {
    name: &'static str,
    queue: Mutex<VecDeque<String>>,
    paused: AtomicBool,
    clear_to_send: AtomicBool,
    running: AtomicBool,
}

impl CommandSender {
    /// Create an idle sender
    pub fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            queue: Mutex::new(VecDeque::new()),
            paused: AtomicBool::new(false),
            clear_to_send: AtomicBool::new(true),
            running: AtomicBool::new(true),
        })
    }

    /// Queue name, `default` or `control`
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Add lines to the back of the queue
    ///
    /// Returns the lines back if this sender has already finished draining.
    pub fn append(&self, commands: Vec<String>) -> Result<(), Vec<String>> {
        let mut queue = self.queue.lock();
        if !self.running.load(Ordering::SeqCst) {
            return Err(commands);
        }
        tracing::debug!(queue = self.name, "appending {} commands", commands.len());
        queue.extend(commands.into_iter().filter(|c| !c.is_empty()));
        Ok(())
    }

    /// Add lines to the front of the queue, keeping their relative order
    ///
    /// Returns the lines back if this sender has already finished draining.
    pub fn prepend(&self, commands: Vec<String>) -> Result<(), Vec<String>> {
        let mut queue = self.queue.lock();
        if !self.running.load(Ordering::SeqCst) {
            return Err(commands);
        }
        tracing::debug!(queue = self.name, "prepending {} commands", commands.len());
        for command in commands.into_iter().rev().filter(|c| !c.is_empty()) {
            queue.push_front(command);
        }
        Ok(())
    }

    /// Stop transmitting without dropping queued lines
    pub fn pause(&self) {
        tracing::debug!(queue = self.name, "pausing sender");
        self.paused.store(true, Ordering::SeqCst);
    }

    /// Continue transmitting
    pub fn resume(&self) {
        tracing::debug!(queue = self.name, "resuming sender");
        self.paused.store(false, Ordering::SeqCst);
    }

    /// Pause, drop every queued line, resume
    pub fn reset(&self) {
        tracing::debug!(queue = self.name, "resetting sender");
        self.pause();
        self.queue.lock().clear();
        self.resume();
    }

    /// Apply a flow decision from a queue report
    pub fn apply_flow(&self, signal: FlowSignal) {
        let ready = signal == FlowSignal::Ready;
        if self.clear_to_send.swap(ready, Ordering::SeqCst) != ready {
            tracing::debug!(queue = self.name, "flow {:?}", signal);
        }
    }

    /// Check if the sender is paused
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Check if the board allows sending
    pub fn is_clear_to_send(&self) -> bool {
        self.clear_to_send.load(Ordering::SeqCst)
    }

    /// Check if the drain loop is still alive
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Number of queued lines
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Check if nothing is queued
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Drain the queue onto `transport`
    ///
    /// Sleeps `interval` after every iteration whether or not a line was
    /// sent, so the board's input buffer is never flooded. `on_sent` is
    /// called with each line after it was written. Returns once the queue is
    /// empty; the sender then refuses further lines.
    pub async fn drain<F>(self: Arc<Self>, transport: Arc<LineTransport>, interval: Duration, on_sent: F)
    where
        F: Fn(&str) + Send + Sync,
    {
        tracing::debug!(queue = self.name, "sender started");
        self.clear_to_send.store(true, Ordering::SeqCst);

        loop {
            let next = {
                let mut queue = self.queue.lock();
                if queue.is_empty() {
                    self.running.store(false, Ordering::SeqCst);
                    break;
                }
                if self.is_paused() || !self.is_clear_to_send() {
                    None
                } else {
                    queue.pop_front()
                }
            };

            match next {
                Some(command) => {
                    tracing::debug!(queue = self.name, "sending {}", command);
                    if transport.write_line(&command).is_ok() {
                        on_sent(&command);
                    }
                }
                None => tracing::trace!(queue = self.name, "sender is blocked/paused"),
            }

            tokio::time::sleep(interval).await;
        }

        tracing::debug!(queue = self.name, "sender finished");
    }
}

/// Holder for the single live sender of one logical queue
pub struct SenderSlot {
    name: &'static str,
    current: Mutex<Option<Arc<CommandSender>>>,
}

impl SenderSlot {
    /// Create an empty slot
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            current: Mutex::new(None),
        }
    }

    /// Queue lines on the live sender, or on a fresh one if it finished
    ///
    /// Returns the new sender when one was created; the caller must spawn
    /// its [`CommandSender::drain`] loop.
    pub fn enqueue(&self, commands: Vec<String>, prepend: bool) -> Option<Arc<CommandSender>> {
        let mut current = self.current.lock();

        let commands = match current.as_ref() {
            Some(sender) => {
                let queued = if prepend {
                    sender.prepend(commands)
                } else {
                    sender.append(commands)
                };
                match queued {
                    Ok(()) => return None,
                    Err(commands) => commands,
                }
            }
            None => commands,
        };

        tracing::debug!(queue = self.name, "new sender");
        let sender = CommandSender::new(self.name);
        // A fresh sender is running, so neither call can refuse
        let _ = sender.append(commands);
        *current = Some(Arc::clone(&sender));
        Some(sender)
    }

    /// The live sender, if it is still draining
    pub fn running(&self) -> Option<Arc<CommandSender>> {
        self.current
            .lock()
            .as_ref()
            .filter(|sender| sender.is_running())
            .cloned()
    }

    /// Check if a sender is still draining
    pub fn is_running(&self) -> bool {
        self.running().is_some()
    }

    /// Pause the live sender
    pub fn pause(&self) {
        if let Some(sender) = self.current.lock().as_ref() {
            sender.pause();
        }
    }

    /// Resume the live sender
    pub fn resume(&self) {
        if let Some(sender) = self.current.lock().as_ref() {
            sender.resume();
        }
    }

    /// Empty the live sender's queue
    pub fn reset(&self) {
        if let Some(sender) = self.current.lock().as_ref() {
            sender.reset();
        }
    }

    /// Apply a flow decision to the live sender
    pub fn apply_flow(&self, signal: FlowSignal) {
        if let Some(sender) = self.running() {
            sender.apply_flow(signal);
        }
    }
}
