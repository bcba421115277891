//! Worker process: pulls run handoffs off the queue and drives each one
//! through pack execution and the 2-phase finalize protocol.

pub mod error;
pub mod worker;

pub use error::WorkerError;
pub use worker::Worker;
