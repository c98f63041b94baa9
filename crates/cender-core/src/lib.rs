//! # Cender Core
//!
//! Core types shared by the Cender crates.
//! Provides the axis and mode data model, the error taxonomy and the typed
//! event bus a controller publishes on.

pub mod data;
pub mod error;
pub mod event_bus;

pub use data::{
    Axis, AxisDirection, AxisMap, BoardType, ConnectionState, DistanceMode, HomeSwitchType,
    MovementGcode, SpindleDirection, UnitMode,
};

pub use error::{
    ConfigError, ConnectionError, Error, ProtocolError, Result, TransportError,
};

pub use event_bus::{
    BoardEvent, CommunicationEvent, ConnectionEvent, ErrorEvent, EventBus, EventBusConfig,
    EventCategory, EventFilter, MachineEvent, ProgrammeEvent, SubscriptionId,
};
