//! Redis-backed hot-path primitives: the atomic rate limiter, the
//! reservation index, and the idempotency accounting cells written
//! alongside each ledger insert.
//!
//! Nothing here is the source of truth — the ledger is. Every structure in
//! this crate is a cache or a lock, disposable and reconstructable from
//! ledger state if lost; that's why correctness in the reaper's reconcile
//! loop never trusts a KV read in isolation, only in combination with the
//! object store and the ledger.

pub mod client;
pub mod error;
pub mod idempotency;
pub mod rate_limiter;
pub mod reservation;

pub use client::KvClient;
pub use error::KvError;
pub use idempotency::IdempotencyCells;
pub use rate_limiter::{ Admission, RateLimiter };
pub use reservation::{ ReleaseOutcome, ReservationIndex };
