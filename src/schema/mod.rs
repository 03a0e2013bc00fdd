//! Schema module - Configuration and value types for the evolutionary driver.

mod config;
mod fitness;
mod scheduler;

pub use config::*;
pub use fitness::*;
pub use scheduler::*;
