//! TinyG Command Creator
//!
//! Set-up and real-time commands for TinyG. Real-time characters (`!`, `~`,
//! `%`, 0x18) are sent as their own lines through the control queue.

use std::marker::PhantomData;

use super::{TinyGVariant, COMMAND_QUEUE_SLOTS};
use crate::firmware::{CommandFormatter, SystemCommand};

/// Ctrl-X
const SOFT_RESET: &str = "\x18";

/// TinyG command formatter
#[derive(Debug, Default)]
pub struct TinyGCommandFormatter<V> {
    variant: PhantomData<V>,
}

impl<V: TinyGVariant> TinyGCommandFormatter<V> {
    /// Create a new formatter
    pub fn new() -> Self {
        Self {
            variant: PhantomData,
        }
    }
}

impl<V: TinyGVariant> CommandFormatter for TinyGCommandFormatter<V> {
    fn echo_off(&self) -> SystemCommand {
        SystemCommand::new("$ee=0", "echo off")
    }

    fn json_mode(&self) -> SystemCommand {
        SystemCommand::new("$ej=1", "json mode")
    }

    fn flow_control(&self) -> SystemCommand {
        SystemCommand::new("$ex=2", "hardware flow control")
    }

    fn queue_reports(&self) -> SystemCommand {
        match V::QUEUE_REPORT_VERBOSITY {
            1 => SystemCommand::new("$qv=1", "enable verbose queue reports"),
            _ => SystemCommand::new("$qv=2", "enable verbose queue reports"),
        }
    }

    fn queue_size_request(&self) -> Option<SystemCommand> {
        V::QUEUE_SIZE_REQUEST.then(|| SystemCommand::new("$qr", "queue report"))
    }

    fn clear_queue(&self) -> SystemCommand {
        SystemCommand::new("%", "clear command queue")
    }

    fn soft_reset(&self) -> SystemCommand {
        SystemCommand::annotated(SOFT_RESET, "reset")
    }

    fn stop(&self) -> SystemCommand {
        SystemCommand::annotated("!", "stop")
    }

    fn resume(&self) -> SystemCommand {
        SystemCommand::annotated("~", "resume")
    }

    fn stop_and_clear(&self) -> SystemCommand {
        SystemCommand::annotated("!%~", "stop and clear")
    }

    fn config_dump(&self) -> SystemCommand {
        SystemCommand::new("$$", "config")
    }

    fn status_poll(&self) -> &'static str {
        r#"{"sr":""}"#
    }

    fn firmware_version_query(&self) -> &'static str {
        "$fv"
    }

    fn command_queue_slots(&self) -> i64 {
        COMMAND_QUEUE_SLOTS
    }
}
