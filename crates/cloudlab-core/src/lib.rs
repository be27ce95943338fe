#![warn(missing_docs)]
//! Discrete-event simulation kernel.
//!
//! Components register in a [`Simulation`], exchange timestamped [`Event`]s through their
//! [`SimulationContext`] and process them in [`EventHandler::on()`]. Events are delivered in non-decreasing
//! time order, events with equal time are delivered in the order they were scheduled.

pub mod component;
pub mod context;
pub mod event;
pub mod handler;
pub mod log;
pub mod simulation;
mod state;

pub use colored;
pub use component::Id;
pub use context::SimulationContext;
pub use event::{Event, EventData, EventId};
pub use handler::{EventCancellationPolicy, EventHandler};
pub use simulation::Simulation;
pub use state::EPSILON;
