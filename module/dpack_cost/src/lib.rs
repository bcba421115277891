//! Micro-unit budget arithmetic, the minimum-fee settlement rule, and
//! embedded plan/pack pricing tables.
//!
//! All money in and out of this crate is [`dpack_types::MicroUnits`] — no
//! floating point ever enters the calculation.

pub mod budget;
pub mod error;
pub mod pricing;

pub use budget::{ available, check_reservation, monthly_allowance, settlement_amount };
pub use error::CostError;
pub use pricing::{ PlanLimits, PricingTable };
