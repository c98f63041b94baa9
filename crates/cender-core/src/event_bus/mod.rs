//! # Event Bus Module
//!
//! Typed publish/subscribe between the protocol engine and whatever presents
//! its state.
//!
//! ## Overview
//!
//! - Publishers emit [`BoardEvent`]s without knowing subscribers
//! - Subscribers filter by [`EventCategory`]
//! - Both synchronous handlers and async broadcast receivers are supported
//!
//! ## Usage
//!
//! ```rust,ignore
//! use cender_core::event_bus::{BoardEvent, EventBus, EventCategory, EventFilter, MachineEvent};
//!
//! let bus = EventBus::new();
//! let subscription = bus.subscribe(
//!     EventFilter::Categories(vec![EventCategory::Machine]),
//!     |event| {
//!         if let BoardEvent::Machine(MachineEvent::PositionReceived { axis, position }) = event {
//!             println!("{} = {}", axis, position);
//!         }
//!     },
//! );
//!
//! bus.unsubscribe(subscription);
//! ```

mod bus;
mod events;

pub use bus::*;
pub use events::*;
