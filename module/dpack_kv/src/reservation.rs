//! The reservation index: `reservation:{run}` → amount, plus a per-tenant
//! running total used as the `open_reservations` term of the admission
//! balance equation.
//!
//! The index is the primary read path for reconciliation when the ledger
//! row is ambiguous: its TTL upper-bounds how long a reservation can stay
//! open without a worker ever reporting back, which is what lets the
//! reaper treat an expired index entry as meaningful rather than merely
//! absent.

use crate::client::KvClient;
use crate::error::Result;
use dpack_types::{ MicroUnits, RunId, TenantId };
use redis::Script;

fn reservation_key( run_id: RunId ) -> String
{
  format!( "reservation:{}", run_id.to_prefixed_string() )
}

fn open_reservations_key( tenant_id: TenantId ) -> String
{
  format!( "open_reservations:{}", tenant_id.to_prefixed_string() )
}

/// Atomically write the reservation entry and add its amount to the
/// tenant's running total, in one round trip.
const RESERVE: &str = r"
redis.call('SET', KEYS[1], ARGV[1], 'EX', ARGV[2])
return redis.call('INCRBY', KEYS[2], ARGV[1])
";

/// Atomically read-and-delete the reservation entry, subtracting its
/// amount from the tenant's running total. Returns the released amount,
/// or a sentinel of `-1` if the entry had already expired or been
/// released — the caller must not subtract twice.
const RELEASE: &str = r"
local amount = redis.call('GET', KEYS[1])
if amount == false then
  return -1
end
redis.call('DEL', KEYS[1])
redis.call('DECRBY', KEYS[2], amount)
return tonumber(amount)
";

/// Whether [`ReservationIndex::release`] found a live entry to release.
#[ derive( Debug, Clone, Copy, PartialEq, Eq ) ]
pub enum ReleaseOutcome
{
  /// The entry existed and was released; carries the released amount.
  Released( MicroUnits ),
  /// No entry existed — already released, or its TTL had elapsed.
  AlreadyGone,
}

/// The reservation index and its per-tenant aggregate.
#[ derive( Debug, Clone ) ]
pub struct ReservationIndex
{
  client: KvClient,
}

impl ReservationIndex
{
  /// Wrap an existing client.
  #[ must_use ]
  pub fn new( client: KvClient ) -> Self
  {
    Self { client }
  }

  /// Open a reservation for `run_id` against `tenant_id`'s running total,
  /// with a TTL bounded above by the retention horizon.
  ///
  /// # Errors
  ///
  /// Returns [`crate::error::KvError`] if the Redis round-trip fails.
  pub async fn reserve( &mut self, tenant_id: TenantId, run_id: RunId, amount: MicroUnits, ttl_secs: u64 ) -> Result< () >
  {
    let _: i64 = Script::new( RESERVE )
      .key( reservation_key( run_id ) )
      .key( open_reservations_key( tenant_id ) )
      .arg( amount.as_micros() )
      .arg( ttl_secs )
      .invoke_async( &mut self.client.conn )
      .await?;
    Ok( () )
  }

  /// Release `run_id`'s reservation, if one still exists, subtracting it
  /// from `tenant_id`'s running total.
  ///
  /// # Errors
  ///
  /// Returns [`crate::error::KvError`] if the Redis round-trip fails.
  pub async fn release( &mut self, tenant_id: TenantId, run_id: RunId ) -> Result< ReleaseOutcome >
  {
    let released: i64 = Script::new( RELEASE )
      .key( reservation_key( run_id ) )
      .key( open_reservations_key( tenant_id ) )
      .invoke_async( &mut self.client.conn )
      .await?;

    Ok( if released < 0
    {
      ReleaseOutcome::AlreadyGone
    }
    else
    {
      ReleaseOutcome::Released( MicroUnits::from_micros( released ) )
    } )
  }

  /// Whether a live reservation entry still exists for `run_id` — used by
  /// the reaper's reconcile decision table.
  ///
  /// # Errors
  ///
  /// Returns [`crate::error::KvError`] if the Redis round-trip fails.
  pub async fn exists( &mut self, run_id: RunId ) -> Result< bool >
  {
    let exists: bool = redis::cmd( "EXISTS" )
      .arg( reservation_key( run_id ) )
      .query_async( &mut self.client.conn )
      .await?;
    Ok( exists )
  }

  /// Sum of all open reservations currently held by `tenant_id`.
  ///
  /// # Errors
  ///
  /// Returns [`crate::error::KvError`] if the Redis round-trip fails.
  pub async fn open_reservations_total( &mut self, tenant_id: TenantId ) -> Result< MicroUnits >
  {
    let total: Option< i64 > = redis::cmd( "GET" )
      .arg( open_reservations_key( tenant_id ) )
      .query_async( &mut self.client.conn )
      .await?;
    Ok( MicroUnits::from_micros( total.unwrap_or( 0 ) ) )
  }
}

#[ cfg( test ) ]
mod tests
{
  use super::*;

  #[ test ]
  fn key_shapes_are_namespaced_by_entity()
  {
    let run_id = RunId::new();
    let tenant_id = TenantId::new();
    assert!( reservation_key( run_id ).starts_with( "reservation:run_" ) );
    assert!( open_reservations_key( tenant_id ).starts_with( "open_reservations:tenant_" ) );
  }

  /// Requires a live Redis instance reachable at `REDIS_TEST_URL`.
  #[ tokio::test ]
  #[ ignore ]
  async fn reserve_then_release_round_trips()
  {
    let url = std::env::var( "REDIS_TEST_URL" ).unwrap_or_else( | _ | "redis://127.0.0.1:6379".to_string() );
    let client = KvClient::connect( &url ).await.unwrap();
    let mut index = ReservationIndex::new( client );
    let tenant_id = TenantId::new();
    let run_id = RunId::new();

    index.reserve( tenant_id, run_id, MicroUnits::from_micros( 100_000 ), 60 ).await.unwrap();
    assert_eq!( index.open_reservations_total( tenant_id ).await.unwrap(), MicroUnits::from_micros( 100_000 ) );

    let outcome = index.release( tenant_id, run_id ).await.unwrap();
    assert_eq!( outcome, ReleaseOutcome::Released( MicroUnits::from_micros( 100_000 ) ) );
    assert_eq!( index.open_reservations_total( tenant_id ).await.unwrap(), MicroUnits::ZERO );

    let second = index.release( tenant_id, run_id ).await.unwrap();
    assert_eq!( second, ReleaseOutcome::AlreadyGone );
  }
}
