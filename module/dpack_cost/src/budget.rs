//! Pure budget arithmetic.
//!
//! Every function here is a pure calculation over [`MicroUnits`] snapshots
//! pulled from the KV cache or ledger by the caller. This crate holds no
//! state of its own — the authoritative counters live in `dpack_kv` and
//! `dpack_ledger`; this module only knows how to combine them.

use crate::error::CostError;
use dpack_types::MicroUnits;

/// Combine a tenant's monthly quota and overage cap into the hard ceiling
/// against which admission is checked.
#[ must_use ]
pub fn monthly_allowance( monthly_quota: MicroUnits, overage_cap: MicroUnits ) -> MicroUnits
{
  monthly_quota.saturating_add( overage_cap )
}

/// Remaining budget: allowance minus everything already held or spent.
///
/// Floored at zero — a tenant can never have negative available budget from
/// the caller's point of view, even transiently.
#[ must_use ]
pub fn available( allowance: MicroUnits, open_reservations: MicroUnits, settled_this_period: MicroUnits ) -> MicroUnits
{
  allowance
    .saturating_sub( open_reservations )
    .saturating_sub( settled_this_period )
}

/// Check whether `requested` can be reserved given the current snapshot,
/// returning the available amount on success.
///
/// # Errors
///
/// Returns [`CostError::InsufficientBudget`] if `requested` exceeds what is
/// currently available.
pub fn check_reservation
(
  allowance: MicroUnits,
  open_reservations: MicroUnits,
  settled_this_period: MicroUnits,
  requested: MicroUnits,
) -> Result< MicroUnits, CostError >
{
  let available = available( allowance, open_reservations, settled_this_period );
  if requested.as_micros() > available.as_micros()
  {
    return Err( CostError::InsufficientBudget { available, requested } );
  }
  Ok( available )
}

/// The settlement rule applied at phase-3 commit: a tenant is never charged
/// less than the pack type's minimum fee, even if actual cost came in lower
/// (or the pack reported zero cost on early failure).
#[ must_use ]
pub fn settlement_amount( actual_cost: MicroUnits, minimum_fee: MicroUnits ) -> MicroUnits
{
  actual_cost.max( minimum_fee )
}

#[ cfg( test ) ]
mod tests
{
  use super::*;

  fn m( units: i64 ) -> MicroUnits
  {
    MicroUnits::from_micros( units )
  }

  #[ test ]
  fn allowance_adds_quota_and_overage()
  {
    assert_eq!( monthly_allowance( m( 1_000_000 ), m( 200_000 ) ), m( 1_200_000 ) );
  }

  #[ test ]
  fn available_subtracts_reservations_and_settled()
  {
    let allowance = m( 1_000_000 );
    assert_eq!( available( allowance, m( 300_000 ), m( 100_000 ) ), m( 600_000 ) );
  }

  #[ test ]
  fn available_floors_at_zero_when_overcommitted()
  {
    let allowance = m( 100 );
    assert_eq!( available( allowance, m( 50 ), m( 100 ) ), m( 0 ) );
  }

  #[ test ]
  fn check_reservation_passes_when_within_budget()
  {
    let allowance = m( 1_000_000 );
    let result = check_reservation( allowance, m( 0 ), m( 0 ), m( 500_000 ) );
    assert_eq!( result.unwrap(), m( 1_000_000 ) );
  }

  #[ test ]
  fn check_reservation_fails_when_exceeding_available()
  {
    let allowance = m( 1_000_000 );
    let err = check_reservation( allowance, m( 900_000 ), m( 0 ), m( 200_000 ) ).unwrap_err();
    match err
    {
      CostError::InsufficientBudget { available, requested } =>
      {
        assert_eq!( available, m( 100_000 ) );
        assert_eq!( requested, m( 200_000 ) );
      }
    }
  }

  #[ test ]
  fn check_reservation_allows_exact_available_amount()
  {
    let allowance = m( 1_000_000 );
    assert!( check_reservation( allowance, m( 700_000 ), m( 0 ), m( 300_000 ) ).is_ok() );
  }

  #[ test ]
  fn settlement_floors_to_minimum_fee()
  {
    assert_eq!( settlement_amount( m( 0 ), m( 50_000 ) ), m( 50_000 ) );
    assert_eq!( settlement_amount( m( 10_000 ), m( 50_000 ) ), m( 50_000 ) );
  }

  #[ test ]
  fn settlement_uses_actual_cost_when_above_minimum()
  {
    assert_eq!( settlement_amount( m( 120_000 ), m( 50_000 ) ), m( 120_000 ) );
  }
}
