//! Error types for budget arithmetic.

use dpack_types::MicroUnits;

/// Errors raised while checking or reserving budget.
#[ derive( Debug, thiserror::Error ) ]
pub enum CostError
{
  /// The requested reservation exceeds what remains available to the tenant.
  #[ error( "insufficient budget: requested {requested}, only {available} available" ) ]
  InsufficientBudget
  {
    /// Amount actually available (`allowance - open_reservations - settled`).
    available: MicroUnits,
    /// Amount the caller tried to reserve.
    requested: MicroUnits,
  },
}
