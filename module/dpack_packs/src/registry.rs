//! Maps a run's `pack_type` string to the [`DecisionPack`] implementation
//! that executes it, and enforces the caller's overall time budget around
//! the call.

use crate::error::{ PackError, Result };
use crate::pack::{ DecisionPack, PackOutput, PackRequest };
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// A registry of packs, keyed on [`DecisionPack::pack_type`].
#[ derive( Default ) ]
pub struct PackRegistry
{
  packs: HashMap< String, Arc< dyn DecisionPack > >,
}

impl std::fmt::Debug for PackRegistry
{
  fn fmt( &self, f: &mut std::fmt::Formatter< '_ > ) -> std::fmt::Result
  {
    f.debug_struct( "PackRegistry" )
      .field( "pack_types", &self.packs.keys().collect::< Vec< _ > >() )
      .finish()
  }
}

impl PackRegistry
{
  /// An empty registry.
  #[ must_use ]
  pub fn new() -> Self
  {
    Self::default()
  }

  /// Register `pack` under its own [`DecisionPack::pack_type`]. Replaces
  /// any pack previously registered under the same type.
  pub fn register( &mut self, pack: Arc< dyn DecisionPack > )
  {
    self.packs.insert( pack.pack_type().to_string(), pack );
  }

  /// Whether a pack is registered for `pack_type`.
  #[ must_use ]
  pub fn contains( &self, pack_type: &str ) -> bool
  {
    self.packs.contains_key( pack_type )
  }

  /// Invoke the pack registered under `pack_type`, cancelling it if it
  /// runs past `time_budget`. The worker calls this once per run, after
  /// acquiring the lease and before starting phase 1 of finalize.
  pub async fn execute( &self, pack_type: &str, request: PackRequest, time_budget: Duration ) -> Result< PackOutput >
  {
    let pack = self.packs.get( pack_type ).ok_or_else( || PackError::UnknownPackType( pack_type.to_string() ) )?;
    let reservation = request.reservation;

    let outcome = match tokio::time::timeout( time_budget, pack.execute( request ) ).await
    {
      Ok( result ) => result,
      Err( _elapsed ) =>
      {
        tracing::warn!( pack_type, ?time_budget, "pack execution timed out" );
        return Err( PackError::Timeout( time_budget ) );
      }
    }?;

    if outcome.actual_cost > reservation
    {
      tracing::warn!( pack_type, actual = ?outcome.actual_cost, reservation = ?reservation, "pack reported cost above reservation" );
      return Err( PackError::CostExceedsReservation { actual: outcome.actual_cost, reservation } );
    }

    Ok( outcome )
  }
}

#[ cfg( test ) ]
mod tests
{
  use super::*;
  use crate::builtin::EchoPack;
  use dpack_types::MicroUnits;

  #[ tokio::test ]
  async fn dispatches_to_the_registered_pack()
  {
    let mut registry = PackRegistry::new();
    registry.register( Arc::new( EchoPack::new( MicroUnits::from_micros( 10 ) ) ) );

    let request = PackRequest { payload: b"hello".to_vec(), reservation: MicroUnits::from_micros( 1_000 ) };
    let output = registry.execute( "echo", request, Duration::from_secs( 1 ) ).await.unwrap();

    assert_eq!( output.body, b"hello" );
  }

  #[ tokio::test ]
  async fn unknown_pack_type_is_rejected()
  {
    let registry = PackRegistry::new();
    let request = PackRequest { payload: Vec::new(), reservation: MicroUnits::ZERO };
    let err = registry.execute( "nonexistent", request, Duration::from_secs( 1 ) ).await.unwrap_err();
    assert!( matches!( err, PackError::UnknownPackType( _ ) ) );
  }

  #[ tokio::test ]
  async fn cost_above_reservation_is_rejected()
  {
    let mut registry = PackRegistry::new();
    registry.register( Arc::new( EchoPack::new( MicroUnits::from_micros( 5_000 ) ) ) );

    let request = PackRequest { payload: b"x".to_vec(), reservation: MicroUnits::from_micros( 1 ) };
    let err = registry.execute( "echo", request, Duration::from_secs( 1 ) ).await.unwrap_err();
    assert!( matches!( err, PackError::CostExceedsReservation { .. } ) );
  }

  #[ tokio::test ]
  async fn slow_pack_is_cancelled_at_the_time_budget()
  {
    use crate::builtin::SleepPack;

    let mut registry = PackRegistry::new();
    registry.register( Arc::new( SleepPack::new( Duration::from_millis( 200 ) ) ) );

    let request = PackRequest { payload: Vec::new(), reservation: MicroUnits::from_micros( 1 ) };
    let err = registry.execute( "sleep", request, Duration::from_millis( 10 ) ).await.unwrap_err();
    assert!( matches!( err, PackError::Timeout( _ ) ) );
  }
}
