//! Shared domain types for the Decision Pack execution platform.
//!
//! This crate has no I/O of its own: every other module crate depends on
//! it for the vocabulary — identifiers, money, run lifecycle, tenants,
//! settlements — that flows through the ledger, the queue, and the wire.

pub mod ids;
pub mod money;
pub mod run;
pub mod settlement;
pub mod tenant;

pub use ids::{ ApiKeyId, FinalizeToken, LeaseToken, RunId, TenantId, TraceId };
pub use money::{ MicroUnits, MoneyError, MICROS_PER_UNIT };
pub use run::{ FinalizeStage, MoneyState, Run, RunStatus };
pub use settlement::{ Settlement, SettlementOutcome };
pub use tenant::{ ApiKey, PlanTier, Tenant };
