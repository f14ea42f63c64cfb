pub mod event;
pub mod session;
pub mod stats;

pub use event::*;
pub use session::*;
pub use stats::*;
