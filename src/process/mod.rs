//! Subprocess lifecycle and streaming output.
//!
//! - [`controller`] owns the single subprocess slot and sequences each run.
//! - [`pump`] reads one pipe and reports chunks on the run's event channel.
//! - [`sink`] accumulates a stream's bytes for the whole run.
//! - [`events`] holds the run event enum and exit classification.

mod controller;
mod events;
mod pump;
mod sink;

pub use controller::*;
pub use events::*;
pub use pump::*;
pub use sink::*;
