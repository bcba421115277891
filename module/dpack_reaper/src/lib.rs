//! Reaper process: reclaims expired leases and reconciles runs stuck
//! mid-finalize, independent of any worker's own liveness.

pub mod error;
pub mod reaper;

pub use error::ReaperError;
pub use reaper::Reaper;
