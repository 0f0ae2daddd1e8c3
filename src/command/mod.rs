//! Command descriptors and the decoders that turn stdout into typed responses.

mod decoder;
mod descriptor;

pub use decoder::*;
pub use descriptor::*;
