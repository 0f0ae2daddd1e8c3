//! Typed façade over the process controller.

mod driver;
mod error;

pub use driver::*;
pub use error::*;
