//! Plan and pack pricing tables.
//!
//! Per-tier rate allowances and per-pack minimum fees are embedded at
//! build time (operators needing different numbers ship a patched build,
//! mirroring how the rest of this pipeline treats pricing data as a
//! deploy-time artifact rather than a runtime-mutable one).

use dpack_types::{ MicroUnits, PlanTier };
use serde::Deserialize;
use std::collections::HashMap;

const PRICING_JSON: &str = include_str!( "../asset/pricing.json" );

#[ derive( Debug, Deserialize ) ]
struct RawPricing
{
  plans: HashMap< String, RawPlanLimits >,
  pack_minimum_fee_micros: HashMap< String, i64 >,
}

#[ derive( Debug, Deserialize ) ]
struct RawPlanLimits
{
  requests_per_minute: u32,
  monthly_quota_micros: i64,
  overage_cap_micros: i64,
}

/// Per-tier rate and budget defaults applied at tenant creation and
/// referenced by the rate limiter for the per-window allowance.
#[ derive( Debug, Clone, Copy ) ]
pub struct PlanLimits
{
  /// Admission requests allowed per one-minute rolling window.
  pub requests_per_minute: u32,
  /// Default monthly quota assigned at tenant creation.
  pub default_monthly_quota: MicroUnits,
  /// Default overage cap assigned at tenant creation.
  pub default_overage_cap: MicroUnits,
}

/// Resolves plan tiers and pack types to their pricing numbers.
///
/// Holds parsed, immutable data for the lifetime of the process; there is
/// no reload path because pricing changes ship as a new build.
#[ derive( Debug ) ]
pub struct PricingTable
{
  plans: HashMap< &'static str, PlanLimits >,
  pack_minimum_fee: HashMap< String, MicroUnits >,
  default_minimum_fee: MicroUnits,
}

impl PricingTable
{
  /// Parse the embedded pricing JSON. Fails only if the embedded asset
  /// itself is malformed, which would be a build-time defect.
  ///
  /// # Panics
  ///
  /// Panics if the embedded pricing asset fails to parse — this indicates
  /// a corrupt build artifact, not a runtime condition callers can recover
  /// from.
  #[ must_use ]
  pub fn embedded() -> Self
  {
    let raw: RawPricing = serde_json::from_str( PRICING_JSON )
      .expect( "embedded pricing.json must parse" );

    let mut plans = HashMap::new();
    for ( tier_name, limits ) in &[ ( "basic", PlanTier::Basic ), ( "growth", PlanTier::Growth ), ( "enterprise", PlanTier::Enterprise ) ]
    {
      if let Some( raw_limits ) = raw.plans.get( *tier_name )
      {
        plans.insert(
          plan_key( *limits ),
          PlanLimits
          {
            requests_per_minute: raw_limits.requests_per_minute,
            default_monthly_quota: MicroUnits::from_micros( raw_limits.monthly_quota_micros ),
            default_overage_cap: MicroUnits::from_micros( raw_limits.overage_cap_micros ),
          },
        );
      }
    }

    let default_minimum_fee = raw
      .pack_minimum_fee_micros
      .get( "default" )
      .copied()
      .map_or( MicroUnits::ZERO, MicroUnits::from_micros );

    let pack_minimum_fee = raw
      .pack_minimum_fee_micros
      .into_iter()
      .filter( | ( key, _ ) | key != "default" )
      .map( | ( key, micros ) | ( key, MicroUnits::from_micros( micros ) ) )
      .collect();

    Self { plans, pack_minimum_fee, default_minimum_fee }
  }

  /// Look up the rate/quota defaults for a plan tier.
  #[ must_use ]
  pub fn limits_for( &self, tier: PlanTier ) -> PlanLimits
  {
    self.plans.get( plan_key( tier ) ).copied().unwrap_or( PlanLimits
    {
      requests_per_minute: 10,
      default_monthly_quota: MicroUnits::ZERO,
      default_overage_cap: MicroUnits::ZERO,
    } )
  }

  /// Minimum fee charged for a given pack type, falling back to the
  /// table-wide default when the pack type has no specific entry.
  #[ must_use ]
  pub fn minimum_fee_for( &self, pack_type: &str ) -> MicroUnits
  {
    self.pack_minimum_fee.get( pack_type ).copied().unwrap_or( self.default_minimum_fee )
  }
}

const fn plan_key( tier: PlanTier ) -> &'static str
{
  match tier
  {
    PlanTier::Basic => "basic",
    PlanTier::Growth => "growth",
    PlanTier::Enterprise => "enterprise",
  }
}

#[ cfg( test ) ]
mod tests
{
  use super::*;

  #[ test ]
  fn embedded_table_parses()
  {
    let table = PricingTable::embedded();
    let basic = table.limits_for( PlanTier::Basic );
    assert_eq!( basic.requests_per_minute, 10 );
  }

  #[ test ]
  fn unknown_pack_type_uses_default_fee()
  {
    let table = PricingTable::embedded();
    assert_eq!( table.minimum_fee_for( "never-heard-of-this-pack" ), MicroUnits::from_micros( 10_000 ) );
  }

  #[ test ]
  fn enterprise_has_larger_allowance_than_basic()
  {
    let table = PricingTable::embedded();
    let basic = table.limits_for( PlanTier::Basic );
    let enterprise = table.limits_for( PlanTier::Enterprise );
    assert!( enterprise.requests_per_minute > basic.requests_per_minute );
  }
}
