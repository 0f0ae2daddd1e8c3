//! CLI Driver - typed façade for driving an external executable as a subprocess.

pub mod command;
pub mod config;
pub mod display;
pub mod interface;
pub mod process;

pub use command::{Command, CommandDescriptor};
pub use interface::{Completion, Handlers, Interface, InterfaceError};
pub use process::{ProcessExit, TerminationReason};
