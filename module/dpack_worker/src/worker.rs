//! The worker loop: pull a run handoff off the queue, execute its pack,
//! and drive the 2-phase finalize protocol to a terminal outcome.
//!
//! The heartbeat is the one piece of concurrency inside a single run's
//! processing — it extends the ledger lease and the queue message's
//! invisibility in lockstep while the pack runs, and is always stopped
//! (and joined) before phase 1 of finalize starts. Racing the heartbeat
//! against `finalize_claim`'s own compare-and-swap would make the two
//! indistinguishable from a stolen lease.

use crate::error::{ Result, WorkerError };
use chrono::Duration as ChronoDuration;
use dpack_config::AppConfig;
use dpack_kv::{ KvClient, ReservationIndex };
use dpack_ledger::{ LedgerError, RunRepo };
use dpack_objectstore::{
  input_object_key, result_object_key, ObjectStore, ACTUAL_COST_MICROS_METADATA_KEY, REQUESTED_TIMEBOX_SEC_METADATA_KEY,
  RESULT_FINGERPRINT_METADATA_KEY,
};
use dpack_packs::{ PackRegistry, PackRequest };
use dpack_queue::{ MessageQueue, ReceivedMessage, RunMessage };
use dpack_reliability::{ Admission, CircuitBreaker };
use dpack_types::{ MicroUnits, RunId, SettlementOutcome };
use sha2::{ Digest, Sha256 };
use std::collections::HashMap;
use std::sync::atomic::{ AtomicBool, Ordering };
use std::sync::Arc;
use std::time::Duration;

fn fingerprint( bytes: &[ u8 ] ) -> String
{
  let mut hasher = Sha256::new();
  hasher.update( bytes );
  hasher.finalize().iter().map( | b | format!( "{b:02x}" ) ).collect()
}

fn timebox_from_metadata( metadata: &HashMap< String, String >, default_sec: u64 ) -> Duration
{
  let secs = metadata
    .get( REQUESTED_TIMEBOX_SEC_METADATA_KEY )
    .and_then( | v | v.parse::< u64 >().ok() )
    .unwrap_or( default_sec );
  Duration::from_secs( secs )
}

/// A single worker process. Cloning shares every backing connection —
/// safe and intended, since each receive loop iteration processes its
/// batch of messages concurrently via its own clone.
#[ derive( Clone ) ]
pub struct Worker
{
  config: Arc< AppConfig >,
  runs: RunRepo,
  kv: KvClient,
  queue: Arc< dyn MessageQueue >,
  object_store: Arc< dyn ObjectStore >,
  packs: Arc< PackRegistry >,
  circuit_breaker: Arc< CircuitBreaker >,
}

impl Worker
{
  /// Assemble a worker from its backing connections.
  #[ must_use ]
  pub fn new(
    config: Arc< AppConfig >,
    runs: RunRepo,
    kv: KvClient,
    queue: Arc< dyn MessageQueue >,
    object_store: Arc< dyn ObjectStore >,
    packs: Arc< PackRegistry >,
    circuit_breaker: Arc< CircuitBreaker >,
  ) -> Self
  {
    Self { config, runs, kv, queue, object_store, packs, circuit_breaker }
  }

  fn lease_window( &self ) -> ChronoDuration
  {
    ChronoDuration::seconds( i64::try_from( self.config.worker.lease_ttl_sec ).unwrap_or( i64::MAX ) )
  }

  /// Poll the queue forever, spawning one task per received message.
  ///
  /// Never returns under normal operation; a queue receive failure is
  /// logged and retried after a short backoff rather than propagated,
  /// since a single transient outage must not take the process down.
  pub async fn run_forever( &self )
  {
    loop
    {
      match self.queue.receive( 10 ).await
      {
        Ok( messages ) if messages.is_empty() =>
        {
          tokio::time::sleep( Duration::from_millis( 500 ) ).await;
        }
        Ok( messages ) =>
        {
          for message in messages
          {
            let worker = self.clone();
            tokio::spawn( async move { worker.handle_message( message ).await } );
          }
        }
        Err( err ) =>
        {
          tracing::warn!( error = %err, "queue receive failed, backing off" );
          tokio::time::sleep( Duration::from_secs( 1 ) ).await;
        }
      }
    }
  }

  async fn handle_message( &self, received: ReceivedMessage )
  {
    let run_id = received.body.run_id;
    if let Err( err ) = self.run_one( received ).await
    {
      tracing::error!( run_id = %run_id, error = %err, "run processing failed" );
    }
  }

  async fn run_one( &self, received: ReceivedMessage ) -> Result< () >
  {
    let RunMessage { run_id, tenant_id, trace_id, .. } = received.body;

    let run = match self.runs.acquire_lease( run_id, self.lease_window() ).await
    {
      Ok( run ) => run,
      Err( LedgerError::CasConflict ) =>
      {
        tracing::debug!( run_id = %run_id, "lease unavailable, another worker or a prior attempt holds this run" );
        return Ok( () );
      }
      Err( other ) => return Err( other.into() ),
    };

    let lease_token = run.lease_token.ok_or( LedgerError::CasConflict )?;
    dpack_telemetry::log_lease_acquired( run_id, trace_id, i64::try_from( self.config.worker.lease_ttl_sec ).unwrap_or( 0 ) );

    let lease_lost = Arc::new( AtomicBool::new( false ) );
    let ( stop_tx, mut stop_rx ) = tokio::sync::oneshot::channel::< () >();

    let heartbeat_handle =
    {
      let runs = self.runs.clone();
      let queue = Arc::clone( &self.queue );
      let receipt_handle = received.receipt_handle.clone();
      let heartbeat_interval = Duration::from_secs( self.config.worker.heartbeat_interval_sec );
      let lease_window = self.lease_window();
      let lease_lost = Arc::clone( &lease_lost );
      let mut version = run.version;

      tokio::spawn( async move
      {
        loop
        {
          tokio::select!
          {
            () = tokio::time::sleep( heartbeat_interval ) => {}
            _ = &mut stop_rx => break,
          }

          match runs.extend_lease( run_id, lease_token, version, lease_window ).await
          {
            Ok( new_version ) =>
            {
              version = new_version;
              let visibility_secs = i32::try_from( lease_window.num_seconds() ).unwrap_or( i32::MAX );
              if let Err( err ) = queue.extend_visibility( &receipt_handle, visibility_secs ).await
              {
                tracing::warn!( run_id = %run_id, error = %err, "failed to extend queue message visibility" );
              }
            }
            Err( err ) =>
            {
              tracing::warn!( run_id = %run_id, error = %err, "heartbeat failed to extend lease, stopping" );
              lease_lost.store( true, Ordering::SeqCst );
              break;
            }
          }
        }
      } )
    };

    let exec_result = self.execute_pack( run_id, &run.pack_type, run.reservation ).await;

    // Heartbeat must be fully stopped before phase 1 — its CAS and
    // `finalize_claim`'s would otherwise race on the same version.
    drop( stop_tx );
    let _ = heartbeat_handle.await;

    if lease_lost.load( Ordering::SeqCst )
    {
      tracing::warn!( run_id = %run_id, "lease lost during pack execution, leaving run for the reaper" );
      return Ok( () );
    }

    let mut reservations = ReservationIndex::new( self.kv.clone() );

    // Phase 1 — CLAIM happens for both outcomes: a pack failure still
    // settles through the same claimed/committed path, at the minimum
    // fee, so the ledger and the reaper never have to special-case it.
    let current = self.runs.get( run_id ).await?;
    let ( _claimed, finalize_token ) = match self.runs.finalize_claim( run_id, lease_token, current.version ).await
    {
      Ok( pair ) => pair,
      Err( LedgerError::CasConflict ) =>
      {
        tracing::warn!( run_id = %run_id, "phase-1 claim lost its compare-and-swap, leaving run for the reaper" );
        return Ok( () );
      }
      Err( other ) => return Err( other.into() ),
    };

    let output = match exec_result
    {
      Ok( output ) => output,
      Err( err ) =>
      {
        match self.runs.fail_commit( run_id, finalize_token, &err.to_string() ).await
        {
          Ok( _ ) =>
          {
            reservations.release( tenant_id, run_id ).await.ok();
            dpack_telemetry::log_run_failed( run_id, trace_id, &err.to_string() );
            self.queue.delete( &received.receipt_handle ).await?;
          }
          Err( conflict_or_err ) =>
          {
            tracing::error!( run_id = %run_id, error = %conflict_or_err, "failure commit did not apply, leaving claimed run for the reaper" );
          }
        }
        return Ok( () );
      }
    };

    self.finalize( run_id, tenant_id, trace_id, finalize_token, output, &received.receipt_handle, &mut reservations ).await
  }

  async fn execute_pack( &self, run_id: RunId, pack_type: &str, reservation: MicroUnits ) -> Result< dpack_packs::PackOutput >
  {
    let fetched = self
      .object_store
      .get( &self.config.objectstore.s3_result_bucket, &input_object_key( run_id ) )
      .await
      .map_err( WorkerError::from )?;

    let time_budget = timebox_from_metadata( &fetched.metadata, self.config.worker.default_timebox_sec );
    let request = PackRequest { payload: fetched.body, reservation };

    self.packs.execute( pack_type, request, time_budget ).await.map_err( WorkerError::from )
  }

  /// Phases 2 and 3 of finalize. Phase 1 has already minted
  /// `finalize_token` by the time this runs — shared with the
  /// pack-failure path in [`Self::run_one`], since both settle through
  /// the same claimed/committed transition.
  #[ allow( clippy::too_many_arguments ) ]
  async fn finalize(
    &self,
    run_id: RunId,
    tenant_id: dpack_types::TenantId,
    trace_id: dpack_types::TraceId,
    finalize_token: dpack_types::FinalizeToken,
    output: dpack_packs::PackOutput,
    receipt_handle: &str,
    reservations: &mut ReservationIndex,
  ) -> Result< () >
  {
    if self.circuit_breaker.admit( "object_store" ) == Admission::Rejected
    {
      tracing::warn!( run_id = %run_id, "object store circuit open, leaving claimed run for the reaper" );
      return Ok( () );
    }

    let result_fingerprint = fingerprint( &output.body );
    let mut metadata = HashMap::new();
    metadata.insert( ACTUAL_COST_MICROS_METADATA_KEY.to_string(), output.actual_cost.as_micros().to_string() );
    metadata.insert( RESULT_FINGERPRINT_METADATA_KEY.to_string(), result_fingerprint.clone() );
    let bucket = self.config.objectstore.s3_result_bucket.clone();
    let key = result_object_key( run_id );

    match self.object_store.put( &bucket, &key, output.body, metadata ).await
    {
      Ok( () ) => self.circuit_breaker.record_success( "object_store" ),
      Err( err ) =>
      {
        self.circuit_breaker.record_failure( "object_store" );
        tracing::warn!( run_id = %run_id, error = %err, "result upload failed, leaving claimed run for the reaper" );
        return Ok( () );
      }
    }

    match self
      .runs
      .finalize_commit( run_id, finalize_token, output.actual_cost, &bucket, &key, &result_fingerprint, SettlementOutcome::WorkerCommitted )
      .await
    {
      Ok( committed ) =>
      {
        reservations.release( tenant_id, run_id ).await.ok();
        dpack_telemetry::log_run_settled(
          run_id, tenant_id, committed.actual_cost.unwrap_or( MicroUnits::ZERO ).as_micros(), &result_fingerprint,
        );
        self.queue.delete( receipt_handle ).await?;
      }
      Err( err ) =>
      {
        tracing::error!( run_id = %run_id, trace_id = %trace_id, error = %err, "phase-3 commit failed after result upload, leaving claimed run for the reaper" );
      }
    }

    Ok( () )
  }
}

#[ cfg( test ) ]
mod tests
{
  use super::*;

  #[ test ]
  fn timebox_falls_back_to_default_when_metadata_absent()
  {
    let metadata = HashMap::new();
    assert_eq!( timebox_from_metadata( &metadata, 45 ), Duration::from_secs( 45 ) );
  }

  #[ test ]
  fn timebox_reads_the_requested_value_from_metadata()
  {
    let mut metadata = HashMap::new();
    metadata.insert( REQUESTED_TIMEBOX_SEC_METADATA_KEY.to_string(), "12".to_string() );
    assert_eq!( timebox_from_metadata( &metadata, 45 ), Duration::from_secs( 12 ) );
  }

  #[ test ]
  fn garbage_metadata_value_falls_back_to_default()
  {
    let mut metadata = HashMap::new();
    metadata.insert( REQUESTED_TIMEBOX_SEC_METADATA_KEY.to_string(), "not-a-number".to_string() );
    assert_eq!( timebox_from_metadata( &metadata, 45 ), Duration::from_secs( 45 ) );
  }

  #[ test ]
  fn fingerprint_is_deterministic()
  {
    assert_eq!( fingerprint( b"hello" ), fingerprint( b"hello" ) );
    assert_ne!( fingerprint( b"hello" ), fingerprint( b"world" ) );
  }

  async fn test_worker() -> ( Worker, dpack_ledger::TenantRepo )
  {
    let pool = dpack_ledger::storage::connect( "sqlite::memory:", 1 ).await.unwrap();
    let tenants = dpack_ledger::TenantRepo::new( pool.clone() );
    let url = std::env::var( "REDIS_TEST_URL" ).unwrap_or_else( | _ | "redis://127.0.0.1:6379".to_string() );

    let mut packs = PackRegistry::new();
    packs.register( Arc::new( dpack_packs::builtin::EchoPack::new( MicroUnits::from_micros( 1_000 ) ) ) );
    packs.register( Arc::new( dpack_packs::builtin::FailingPack::new( "pack_execution_failed" ) ) );

    let worker = Worker::new(
      Arc::new( AppConfig::default_test() ),
      RunRepo::new( pool ),
      KvClient::connect( &url ).await.unwrap(),
      Arc::new( dpack_queue::InMemoryQueue::new() ),
      Arc::new( dpack_objectstore::InMemoryObjectStore::new() ),
      Arc::new( packs ),
      Arc::new( CircuitBreaker::new( 3, 30 ) ),
    );

    ( worker, tenants )
  }

  /// Exercises the full handoff: admit a run through the same upload
  /// convention `dpack_api`'s admission pipeline uses, enqueue it, then
  /// drive it through the worker end to end. Requires a live Redis
  /// instance reachable at `REDIS_TEST_URL`.
  #[ tokio::test ]
  #[ ignore ]
  async fn processes_a_queued_run_to_completion()
  {
    let ( worker, tenants ) = test_worker().await;
    let tenant = tenants
      .create_tenant( dpack_types::PlanTier::Basic, MicroUnits::from_micros( 20_000_000 ), MicroUnits::ZERO, "USD" )
      .await
      .unwrap();

    let run = worker
      .runs
      .insert_queued(
        RunId::new(), tenant.id, "K1", "fp", "echo", dpack_types::TraceId::new(),
        MicroUnits::from_micros( 100_000 ), MicroUnits::from_micros( 10_000 ), ChronoDuration::days( 30 ),
      )
      .await
      .unwrap();

    worker
      .object_store
      .put( &worker.config.objectstore.s3_result_bucket, &input_object_key( run.id ), b"hello".to_vec(), HashMap::new() )
      .await
      .unwrap();

    worker.queue.send( &RunMessage {
      run_id: run.id,
      tenant_id: tenant.id,
      pack_type: run.pack_type.clone(),
      enqueued_at: chrono::Utc::now(),
      schema_version: dpack_queue::RUN_MESSAGE_SCHEMA_VERSION,
      trace_id: run.trace_id,
    } ).await.unwrap();
    let received = worker.queue.receive( 1 ).await.unwrap().into_iter().next().unwrap();

    worker.run_one( received ).await.unwrap();

    let settled = worker.runs.get( run.id ).await.unwrap();
    assert_eq!( settled.status, dpack_types::RunStatus::Completed );
    assert_eq!( settled.actual_cost, Some( MicroUnits::from_micros( 1_000 ) ) );
  }

  /// A pack failure still claims and settles at the minimum fee, rather
  /// than refunding in full — the run went through phase 1, so the
  /// ledger and the reaper see a normal claimed/committed transition, not
  /// an abandoned one. Requires a live Redis instance reachable at
  /// `REDIS_TEST_URL`.
  #[ tokio::test ]
  #[ ignore ]
  async fn pack_failure_settles_at_the_minimum_fee()
  {
    let ( worker, tenants ) = test_worker().await;
    let tenant = tenants
      .create_tenant( dpack_types::PlanTier::Basic, MicroUnits::from_micros( 20_000_000 ), MicroUnits::ZERO, "USD" )
      .await
      .unwrap();

    let run = worker
      .runs
      .insert_queued(
        RunId::new(), tenant.id, "K2", "fp2", "failing", dpack_types::TraceId::new(),
        MicroUnits::from_micros( 100_000 ), MicroUnits::from_micros( 10_000 ), ChronoDuration::days( 30 ),
      )
      .await
      .unwrap();

    worker
      .object_store
      .put( &worker.config.objectstore.s3_result_bucket, &input_object_key( run.id ), b"hello".to_vec(), HashMap::new() )
      .await
      .unwrap();

    worker.queue.send( &RunMessage {
      run_id: run.id,
      tenant_id: tenant.id,
      pack_type: run.pack_type.clone(),
      enqueued_at: chrono::Utc::now(),
      schema_version: dpack_queue::RUN_MESSAGE_SCHEMA_VERSION,
      trace_id: run.trace_id,
    } ).await.unwrap();
    let received = worker.queue.receive( 1 ).await.unwrap().into_iter().next().unwrap();

    worker.run_one( received ).await.unwrap();

    let settled = worker.runs.get( run.id ).await.unwrap();
    assert_eq!( settled.status, dpack_types::RunStatus::Failed );
    assert_eq!( settled.finalize_stage, dpack_types::FinalizeStage::Committed );
  }
}
