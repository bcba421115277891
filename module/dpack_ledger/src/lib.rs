//! The ledger of record: `tenants`, `api_keys`, `runs`, `settlements`, and
//! `usage_daily`, backed by a pooled `sqlx` SQLite connection.
//!
//! Every mutating operation on a `runs` row is compare-and-swap guarded —
//! see [`runs::RunRepo`] — because the run's owner changes hands across
//! process boundaries (API → Worker → Reaper) with no other coordination
//! mechanism. A zero-row-affected update is a retriable conflict, never an
//! error; callers match on [`error::LedgerError::CasConflict`] accordingly.
//!
//! Connections are cheap to clone and `Send + Sync`; every concurrent task
//! — including a worker's heartbeat tick — must acquire its own clone of
//! the pool rather than share one borrowed across an await point.

pub mod error;
pub mod migrations;
pub mod runs;
pub mod storage;
pub mod tenants;
pub mod usage;

pub use error::{ LedgerError, Result };
pub use runs::RunRepo;
pub use storage::connect;
pub use tenants::TenantRepo;
pub use usage::{ DailyUsage, UsageRepo };
