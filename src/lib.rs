// Public API - engine, requests and the event stream it publishes
pub mod config;
pub mod engine;
pub mod error;
pub mod state;

// Building blocks, public for embedding and tests
pub mod lookup;
pub mod portspec;
pub mod probe;

pub use engine::ProbeEngine;
pub use error::{ErrorKind, ProbeError};
