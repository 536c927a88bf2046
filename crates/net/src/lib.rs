#![forbid(unsafe_code)]

pub mod fault;
pub mod loopback;

pub use fault::FaultPlan;
pub use loopback::{LoopbackNetwork, LoopbackTransport, TamHost};
