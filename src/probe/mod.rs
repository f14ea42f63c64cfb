pub mod correlate;
pub mod echo;
pub mod icmp;
pub mod socket;

pub use correlate::*;
pub use echo::*;
pub use icmp::*;
pub use socket::*;
