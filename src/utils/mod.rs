//! Injectable identity and time sources.
//!
//! - `id_generator`: instance/session ID generation.
//! - `clock`: time source for instance timestamps.

pub mod clock;
pub mod id_generator;
