//! Two independent interval loops that keep the ledger honest once a
//! worker stops heartbeating or crashes mid-finalize.
//!
//! The lease-expiry sweep reclaims runs a worker abandoned before it ever
//! reached phase 1 of finalize. The reconcile loop resolves runs stuck in
//! `finalize_stage=CLAIMED` — a worker that crashed between phase 1 and
//! phase 3 — by reading the result object's metadata instead of trusting
//! the worker's own (possibly lost) outcome. Neither loop ever touches the
//! queue: deleting the run's message is the worker's exclusive
//! responsibility, and a reaped run's message is left to expire its own
//! visibility timeout and redeliver.

use crate::error::Result;
use chrono::{ Duration as ChronoDuration, Utc };
use dpack_config::AppConfig;
use dpack_kv::{ KvClient, ReservationIndex };
use dpack_ledger::{ LedgerError, RunRepo };
use dpack_objectstore::{
  result_object_key, ObjectStore, ObjectStoreError, ACTUAL_COST_MICROS_METADATA_KEY, RESULT_FINGERPRINT_METADATA_KEY,
};
use dpack_reliability::{ Admission, CircuitBreaker };
use dpack_types::{ MicroUnits, Run, SettlementOutcome };
use std::sync::Arc;
use std::time::Duration;

const SWEEP_PAGE_SIZE: i64 = 100;
const RECONCILE_PAGE_SIZE: i64 = 100;

/// A single reaper process. Cheap to clone — every field is a shared
/// connection or handle, same convention as [`dpack_worker::Worker`].
#[ derive( Clone ) ]
pub struct Reaper
{
  config: Arc< AppConfig >,
  runs: RunRepo,
  kv: KvClient,
  object_store: Arc< dyn ObjectStore >,
  circuit_breaker: Arc< CircuitBreaker >,
}

impl Reaper
{
  /// Assemble a reaper from its backing connections.
  #[ must_use ]
  pub fn new(
    config: Arc< AppConfig >,
    runs: RunRepo,
    kv: KvClient,
    object_store: Arc< dyn ObjectStore >,
    circuit_breaker: Arc< CircuitBreaker >,
  ) -> Self
  {
    Self { config, runs, kv, object_store, circuit_breaker }
  }

  /// Run both loops concurrently. Never returns under normal operation.
  pub async fn run_forever( &self )
  {
    tokio::join!( self.lease_sweep_loop(), self.reconcile_loop() );
  }

  async fn lease_sweep_loop( &self )
  {
    let interval = Duration::from_secs( self.config.reaper.interval_sec );
    loop
    {
      if let Err( err ) = self.sweep_expired_leases().await
      {
        tracing::warn!( error = %err, "lease-expiry sweep pass failed" );
      }
      tokio::time::sleep( interval ).await;
    }
  }

  async fn reconcile_loop( &self )
  {
    let interval = Duration::from_secs( self.config.reaper.reconcile_interval_sec );
    loop
    {
      if let Err( err ) = self.reconcile_stuck_claims().await
      {
        tracing::warn!( error = %err, "reconcile pass failed" );
      }
      tokio::time::sleep( interval ).await;
    }
  }

  /// One pass of the lease-expiry sweep: every `PROCESSING` run whose
  /// lease has expired is rolled back to `FAILED` and its reservation
  /// released. A worker that is merely slow (not dead) will lose this
  /// race to a `CasConflict`, which is not an error — it means the
  /// worker's own heartbeat or finalize got there first.
  async fn sweep_expired_leases( &self ) -> Result< () >
  {
    let expired = self.runs.find_expired_leases( Utc::now(), SWEEP_PAGE_SIZE ).await?;
    let mut reservations = ReservationIndex::new( self.kv.clone() );

    for run in expired
    {
      match self.runs.mark_failed_with_settlement( run.id, run.version, "lease_expired" ).await
      {
        Ok( _ ) =>
        {
          reservations.release( run.tenant_id, run.id ).await.ok();
          dpack_telemetry::log_lease_reclaimed( run.id, "failed" );
        }
        Err( LedgerError::CasConflict ) =>
        {
          tracing::debug!( run_id = %run.id, "lease sweep lost its compare-and-swap, run already progressed" );
        }
        Err( err ) =>
        {
          tracing::warn!( run_id = %run.id, error = %err, "failed to mark expired-lease run as failed" );
        }
      }
    }

    Ok( () )
  }

  /// One pass of the reconcile loop: every run stuck in
  /// `finalize_stage=CLAIMED` older than the configured threshold is
  /// resolved from the result object's presence and metadata, never from
  /// trusting a worker's unconfirmed outcome.
  async fn reconcile_stuck_claims( &self ) -> Result< () >
  {
    let threshold = Utc::now() - ChronoDuration::minutes( i64::try_from( self.config.reaper.reconcile_threshold_min ).unwrap_or( 5 ) );
    let stuck = self.runs.find_stuck_claims( threshold, RECONCILE_PAGE_SIZE ).await?;

    for run in stuck
    {
      if let Err( err ) = self.reconcile_one( &run ).await
      {
        tracing::warn!( run_id = %run.id, error = %err, "failed to reconcile stuck claim" );
      }
    }

    Ok( () )
  }

  async fn reconcile_one( &self, run: &Run ) -> Result< () >
  {
    if self.circuit_breaker.admit( "object_store" ) == Admission::Rejected
    {
      tracing::debug!( run_id = %run.id, "object store circuit open, deferring stuck claim to next pass" );
      return Ok( () );
    }

    let bucket = self.config.objectstore.s3_result_bucket.clone();
    let key = result_object_key( run.id );

    match self.object_store.head( &bucket, &key ).await
    {
      Ok( metadata ) =>
      {
        self.circuit_breaker.record_success( "object_store" );
        self.roll_forward( run, &bucket, &key, &metadata ).await
      }
      Err( ObjectStoreError::NotFound ) =>
      {
        self.circuit_breaker.record_success( "object_store" );
        self.roll_back_or_audit( run ).await
      }
      Err( err ) =>
      {
        self.circuit_breaker.record_failure( "object_store" );
        tracing::warn!( run_id = %run.id, error = %err, "result object head failed, deferring stuck claim to next pass" );
        Ok( () )
      }
    }
  }

  /// Result object exists: commit from its metadata if it is readable,
  /// otherwise route to audit rather than guess at the cost.
  async fn roll_forward( &self, run: &Run, bucket: &str, key: &str, metadata: &std::collections::HashMap< String, String > ) -> Result< () >
  {
    let parsed = metadata
      .get( ACTUAL_COST_MICROS_METADATA_KEY )
      .and_then( | v | v.parse::< i64 >().ok() )
      .map( MicroUnits::from_micros )
      .zip( metadata.get( RESULT_FINGERPRINT_METADATA_KEY ) );

    let Some( ( actual_cost, result_fingerprint ) ) = parsed else
    {
      self.runs.mark_audit_required( run.id, run.version, "result_object_metadata_unreadable" ).await.ok();
      dpack_telemetry::log_audit_required( run.id, "result_object_metadata_unreadable" );
      return Ok( () );
    };

    let Some( finalize_token ) = run.finalize_token else
    {
      self.runs.mark_audit_required( run.id, run.version, "stuck_claim_missing_finalize_token" ).await.ok();
      dpack_telemetry::log_audit_required( run.id, "stuck_claim_missing_finalize_token" );
      return Ok( () );
    };

    match self
      .runs
      .finalize_commit( run.id, finalize_token, actual_cost, bucket, key, result_fingerprint, SettlementOutcome::ReaperRolledForward )
      .await
    {
      Ok( committed ) =>
      {
        let mut reservations = ReservationIndex::new( self.kv.clone() );
        reservations.release( run.tenant_id, run.id ).await.ok();
        dpack_telemetry::log_run_settled( run.id, run.tenant_id, committed.actual_cost.unwrap_or( MicroUnits::ZERO ).as_micros(), result_fingerprint );
      }
      Err( LedgerError::CasConflict ) =>
      {
        tracing::debug!( run_id = %run.id, "roll-forward lost its compare-and-swap, run already committed" );
      }
      Err( err ) => tracing::warn!( run_id = %run.id, error = %err, "roll-forward commit failed" ),
    }

    Ok( () )
  }

  /// Result object absent: roll back to `FAILED` if a reservation is
  /// still open (the worker never finished phase 2), otherwise there is
  /// nothing left to infer from and the run requires an operator.
  async fn roll_back_or_audit( &self, run: &Run ) -> Result< () >
  {
    let mut reservations = ReservationIndex::new( self.kv.clone() );
    let reservation_open = reservations.exists( run.id ).await?;

    let Some( finalize_token ) = run.finalize_token else
    {
      self.runs.mark_audit_required( run.id, run.version, "stuck_claim_missing_finalize_token" ).await.ok();
      dpack_telemetry::log_audit_required( run.id, "stuck_claim_missing_finalize_token" );
      return Ok( () );
    };

    if reservation_open
    {
      match self.runs.fail_commit( run.id, finalize_token, "reaper_rolled_back_missing_result" ).await
      {
        Ok( _ ) =>
        {
          reservations.release( run.tenant_id, run.id ).await.ok();
          dpack_telemetry::log_lease_reclaimed( run.id, "rolled_back" );
        }
        Err( LedgerError::CasConflict ) =>
        {
          tracing::debug!( run_id = %run.id, "roll-back lost its compare-and-swap, run already progressed" );
        }
        Err( err ) => tracing::warn!( run_id = %run.id, error = %err, "roll-back to failed did not apply" ),
      }
    }
    else
    {
      // An expired KV reservation with no result object is indistinguishable
      // from one already rolled forward and cleaned up — never guess.
      self.runs.mark_audit_required( run.id, run.version, "stuck_claim_no_object_no_reservation" ).await.ok();
      dpack_telemetry::log_audit_required( run.id, "stuck_claim_no_object_no_reservation" );
    }

    Ok( () )
  }
}

#[ cfg( test ) ]
mod tests
{
  use super::*;
  use dpack_objectstore::ACTUAL_COST_MICROS_METADATA_KEY as COST_KEY;
  use dpack_types::{ PlanTier, RunId, TraceId };

  async fn test_reaper() -> ( Reaper, dpack_ledger::TenantRepo )
  {
    let pool = dpack_ledger::storage::connect( "sqlite::memory:", 1 ).await.unwrap();
    let tenants = dpack_ledger::TenantRepo::new( pool.clone() );
    let url = std::env::var( "REDIS_TEST_URL" ).unwrap_or_else( | _ | "redis://127.0.0.1:6379".to_string() );

    let reaper = Reaper::new(
      Arc::new( AppConfig::default_test() ),
      RunRepo::new( pool ),
      KvClient::connect( &url ).await.unwrap(),
      Arc::new( dpack_objectstore::InMemoryObjectStore::new() ),
      Arc::new( CircuitBreaker::new( 3, 30 ) ),
    );

    ( reaper, tenants )
  }

  /// A run stuck in CLAIMED with a readable result object rolls forward
  /// to COMPLETED without any worker involvement. Requires a live Redis
  /// instance reachable at `REDIS_TEST_URL`.
  #[ tokio::test ]
  #[ ignore ]
  async fn rolls_forward_a_stuck_claim_with_a_readable_result_object()
  {
    let ( reaper, tenants ) = test_reaper().await;
    let tenant = tenants
      .create_tenant( PlanTier::Basic, MicroUnits::from_micros( 20_000_000 ), MicroUnits::ZERO, "USD" )
      .await
      .unwrap();

    let run = reaper
      .runs
      .insert_queued(
        RunId::new(), tenant.id, "K1", "fp", "echo", TraceId::new(),
        MicroUnits::from_micros( 100_000 ), MicroUnits::from_micros( 10_000 ), ChronoDuration::days( 30 ),
      )
      .await
      .unwrap();

    let leased = reaper.runs.acquire_lease( run.id, ChronoDuration::seconds( 120 ) ).await.unwrap();
    let ( _claimed, _finalize_token ) = reaper
      .runs
      .finalize_claim( run.id, leased.lease_token.unwrap(), leased.version )
      .await
      .unwrap();

    let mut metadata = std::collections::HashMap::new();
    metadata.insert( COST_KEY.to_string(), "1000".to_string() );
    metadata.insert( RESULT_FINGERPRINT_METADATA_KEY.to_string(), "deadbeef".to_string() );
    reaper
      .object_store
      .put( &reaper.config.objectstore.s3_result_bucket, &result_object_key( run.id ), b"result".to_vec(), metadata )
      .await
      .unwrap();

    reaper.reconcile_stuck_claims().await.unwrap();

    let settled = reaper.runs.get( run.id ).await.unwrap();
    assert_eq!( settled.status, dpack_types::RunStatus::Completed );
    assert_eq!( settled.actual_cost, Some( MicroUnits::from_micros( 1_000 ) ) );
  }

  /// A run stuck in CLAIMED whose result object never showed up rolls
  /// back to FAILED once its reservation is gone. Requires a live Redis
  /// instance reachable at `REDIS_TEST_URL`.
  #[ tokio::test ]
  #[ ignore ]
  async fn audits_a_stuck_claim_with_no_object_and_no_reservation()
  {
    let ( reaper, tenants ) = test_reaper().await;
    let tenant = tenants
      .create_tenant( PlanTier::Basic, MicroUnits::from_micros( 20_000_000 ), MicroUnits::ZERO, "USD" )
      .await
      .unwrap();

    let run = reaper
      .runs
      .insert_queued(
        RunId::new(), tenant.id, "K2", "fp2", "echo", TraceId::new(),
        MicroUnits::from_micros( 100_000 ), MicroUnits::from_micros( 10_000 ), ChronoDuration::days( 30 ),
      )
      .await
      .unwrap();

    let leased = reaper.runs.acquire_lease( run.id, ChronoDuration::seconds( 120 ) ).await.unwrap();
    reaper.runs.finalize_claim( run.id, leased.lease_token.unwrap(), leased.version ).await.unwrap();

    reaper.reconcile_stuck_claims().await.unwrap();

    let audited = reaper.runs.get( run.id ).await.unwrap();
    assert_eq!( audited.status, dpack_types::RunStatus::AuditRequired );
  }

  /// A stuck claim whose reservation is still open (the worker crashed
  /// before ever writing the result object) rolls back to FAILED rather
  /// than being audited. Requires a live Redis instance reachable at
  /// `REDIS_TEST_URL`.
  #[ tokio::test ]
  #[ ignore ]
  async fn rolls_back_a_stuck_claim_with_an_open_reservation_and_no_object()
  {
    let ( reaper, tenants ) = test_reaper().await;
    let tenant = tenants
      .create_tenant( PlanTier::Basic, MicroUnits::from_micros( 20_000_000 ), MicroUnits::ZERO, "USD" )
      .await
      .unwrap();

    let run = reaper
      .runs
      .insert_queued(
        RunId::new(), tenant.id, "K3", "fp3", "echo", TraceId::new(),
        MicroUnits::from_micros( 100_000 ), MicroUnits::from_micros( 10_000 ), ChronoDuration::days( 30 ),
      )
      .await
      .unwrap();

    let mut reservations = ReservationIndex::new( reaper.kv.clone() );
    reservations.reserve( tenant.id, run.id, MicroUnits::from_micros( 100_000 ), 3600 ).await.unwrap();

    let leased = reaper.runs.acquire_lease( run.id, ChronoDuration::seconds( 120 ) ).await.unwrap();
    reaper.runs.finalize_claim( run.id, leased.lease_token.unwrap(), leased.version ).await.unwrap();

    reaper.reconcile_stuck_claims().await.unwrap();

    let rolled_back = reaper.runs.get( run.id ).await.unwrap();
    assert_eq!( rolled_back.status, dpack_types::RunStatus::Failed );
    assert_eq!( rolled_back.failure_reason.as_deref(), Some( "reaper_rolled_back_missing_result" ) );
    assert!( !reservations.exists( run.id ).await.unwrap() );
  }

  /// A run whose lease expired before the worker ever reached phase 1
  /// is swept to FAILED and its reservation released at the minimum
  /// fee. Requires a live Redis instance reachable at `REDIS_TEST_URL`.
  #[ tokio::test ]
  #[ ignore ]
  async fn sweeps_an_expired_lease_to_failed_and_releases_the_reservation()
  {
    let ( reaper, tenants ) = test_reaper().await;
    let tenant = tenants
      .create_tenant( PlanTier::Basic, MicroUnits::from_micros( 20_000_000 ), MicroUnits::ZERO, "USD" )
      .await
      .unwrap();

    let run = reaper
      .runs
      .insert_queued(
        RunId::new(), tenant.id, "K4", "fp4", "echo", TraceId::new(),
        MicroUnits::from_micros( 100_000 ), MicroUnits::from_micros( 10_000 ), ChronoDuration::days( 30 ),
      )
      .await
      .unwrap();

    let mut reservations = ReservationIndex::new( reaper.kv.clone() );
    reservations.reserve( tenant.id, run.id, MicroUnits::from_micros( 100_000 ), 3600 ).await.unwrap();

    // Lease already expired: acquire with a negative window.
    reaper.runs.acquire_lease( run.id, ChronoDuration::seconds( -1 ) ).await.unwrap();

    reaper.sweep_expired_leases().await.unwrap();

    let failed = reaper.runs.get( run.id ).await.unwrap();
    assert_eq!( failed.status, dpack_types::RunStatus::Failed );
    assert_eq!( failed.failure_reason.as_deref(), Some( "lease_expired" ) );
    assert!( !reservations.exists( run.id ).await.unwrap() );
  }
}
