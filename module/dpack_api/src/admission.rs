//! The admission pipeline: the one path every mutating submission runs
//! through before a run ever reaches the queue.
//!
//! Ordering is load-bearing and must not be reshuffled: rate check strictly
//! precedes the reservation write, which strictly precedes the ledger
//! insert, which strictly precedes the enqueue. Any step that fails after
//! the reservation has been written must release it before returning.

use crate::error::ApiError;
use crate::state::AppState;
use chrono::{ Datelike, Duration, Utc };
use dpack_cost::CostError;
use dpack_kv::{ Admission as RateAdmission, IdempotencyCells, RateLimiter, ReservationIndex };
use dpack_ledger::LedgerError;
use dpack_objectstore::{ input_object_key, REQUESTED_TIMEBOX_SEC_METADATA_KEY };
use dpack_queue::RunMessage;
use dpack_types::{ MicroUnits, Run, RunId, Tenant, TraceId };
use sha2::{ Digest, Sha256 };
use std::collections::HashMap;

/// Result window a completed run's ledger row stays queryable for. Mirrors
/// the retention window exercised throughout `dpack_ledger`'s own tests.
pub const RESULT_RETENTION: Duration = Duration::days( 30 );

/// What a submission was admitted into — either a freshly queued run, or
/// the original run from an idempotency replay.
#[ derive( Debug, Clone ) ]
pub struct AdmissionReceipt
{
  pub run: Run,
  /// Whether `run` is a replay of an earlier submission rather than new.
  pub replay: bool,
  /// Remaining requests in the current rate-limit window, after this one.
  pub rate_remaining: u64,
  /// Unix time the current rate-limit window resets.
  pub rate_reset_unix_secs: u64,
}

fn fingerprint( bytes: &[ u8 ] ) -> String
{
  let mut hasher = Sha256::new();
  hasher.update( bytes );
  hasher.finalize().iter().map( | b | format!( "{b:02x}" ) ).collect()
}

fn infra< E: std::fmt::Display >( err: E ) -> ApiError
{
  ApiError::Infrastructure( err.to_string() )
}

/// Run a submission through the full admission pipeline.
///
/// # Errors
///
/// Returns [`ApiError::RateLimited`] if the tenant's per-window ceiling is
/// exceeded, [`ApiError::InsufficientBudget`] if the requested reservation
/// exceeds the tenant's remaining balance, [`ApiError::IdempotencyConflict`]
/// if the idempotency key is reused with a different payload, and
/// [`ApiError::Infrastructure`] for any downstream failure — in which case
/// every reservation or ledger side effect already performed is rolled back
/// before returning.
pub async fn admit(
  state: &AppState,
  tenant: &Tenant,
  idempotency_key: &str,
  pack_type: &str,
  payload_bytes: &[ u8 ],
  requested_amount: MicroUnits,
  timebox_sec: Option< u64 >,
) -> Result< AdmissionReceipt, ApiError >
{
  let limits = state.pricing.limits_for( tenant.plan );
  let mut limiter = RateLimiter::new( state.kv.clone(), 60 );
  let now_unix_secs = u64::try_from( Utc::now().timestamp() ).unwrap_or( 0 );

  let ( rate_remaining, rate_reset_unix_secs ) = match limiter
    .check( tenant.id, u64::from( limits.requests_per_minute ), now_unix_secs )
    .await
    .map_err( infra )?
  {
    RateAdmission::Allowed { remaining, reset_unix_secs } => ( remaining, reset_unix_secs ),
    RateAdmission::Denied { retry_after_secs, .. } =>
    {
      dpack_telemetry::log_rate_limited( tenant.id, "requests_per_minute", retry_after_secs );
      return Err( ApiError::RateLimited { retry_after_secs, policy: "requests_per_minute".to_string() } );
    }
  };

  let mut reservations = ReservationIndex::new( state.kv.clone() );
  let allowance = dpack_cost::budget::monthly_allowance( tenant.monthly_quota, tenant.overage_cap );
  let open = reservations.open_reservations_total( tenant.id ).await.map_err( infra )?;
  let today = Utc::now().date_naive();
  let month_start = today.with_day( 1 ).unwrap_or( today );
  let settled = state.usage.settled_total( tenant.id, month_start, today ).await.map_err( infra )?;

  dpack_cost::budget::check_reservation( allowance, open, settled, requested_amount ).map_err(
    | CostError::InsufficientBudget { available, requested } | ApiError::InsufficientBudget { available, requested },
  )?;

  let run_id = RunId::new();
  let ttl_secs = u64::try_from( RESULT_RETENTION.num_seconds() ).unwrap_or( 0 );
  reservations.reserve( tenant.id, run_id, requested_amount, ttl_secs ).await.map_err( infra )?;

  let trace_id = TraceId::new();
  let minimum_fee = state.pricing.minimum_fee_for( pack_type );
  let payload_fingerprint = fingerprint( payload_bytes );

  let run = match state
    .runs
    .insert_queued(
      run_id, tenant.id, idempotency_key, &payload_fingerprint, pack_type, trace_id,
      requested_amount, minimum_fee, RESULT_RETENTION,
    )
    .await
  {
    Ok( run ) => run,
    Err( LedgerError::IdempotencyConflict ) =>
    {
      reservations.release( tenant.id, run_id ).await.map_err( infra )?;
      let existing = state.runs.find_by_idempotency_key( tenant.id, idempotency_key ).await.map_err( infra )?;

      return if existing.payload_fingerprint == payload_fingerprint
      {
        Ok( AdmissionReceipt { run: existing, replay: true, rate_remaining, rate_reset_unix_secs } )
      }
      else
      {
        Err( ApiError::IdempotencyConflict )
      };
    }
    Err( other ) =>
    {
      reservations.release( tenant.id, run_id ).await.ok();
      return Err( infra( other ) );
    }
  };

  let mut idempotency_cells = IdempotencyCells::new( state.kv.clone() );
  if let Err( err ) = idempotency_cells.mark_accounted( tenant.id, run_id ).await
  {
    // Defense in depth only — the ledger's own unique constraint is the
    // authority on (tenant, idempotency_key). A failed KV mirror write
    // never blocks admission.
    tracing::warn!( run_id = %run_id, error = %err, "failed to write idempotency accounting cell" );
  }

  let mut input_metadata = HashMap::new();
  if let Some( timebox ) = timebox_sec
  {
    input_metadata.insert( REQUESTED_TIMEBOX_SEC_METADATA_KEY.to_string(), timebox.to_string() );
  }
  if let Err( err ) = state
    .object_store
    .put( &state.config.objectstore.s3_result_bucket, &input_object_key( run_id ), payload_bytes.to_vec(), input_metadata )
    .await
  {
    reservations.release( tenant.id, run_id ).await.ok();
    state.runs.mark_failed( run_id, run.version, "input_upload_failed" ).await.ok();
    return Err( infra( err ) );
  }

  let message = RunMessage
  {
    run_id,
    tenant_id: tenant.id,
    pack_type: pack_type.to_string(),
    enqueued_at: Utc::now(),
    schema_version: dpack_queue::RUN_MESSAGE_SCHEMA_VERSION,
    trace_id,
  };
  if let Err( err ) = state.queue.send( &message ).await
  {
    reservations.release( tenant.id, run_id ).await.ok();
    state.runs.mark_failed( run_id, run.version, "enqueue_failed" ).await.ok();
    return Err( infra( err ) );
  }

  dpack_telemetry::log_run_submitted( run_id, tenant.id, trace_id, &payload_fingerprint, payload_bytes.len() );

  Ok( AdmissionReceipt { run, replay: false, rate_remaining, rate_reset_unix_secs } )
}

#[ cfg( test ) ]
mod tests
{
  use super::*;
  use crate::state::AppState;
  use dpack_ledger::{ RunRepo, TenantRepo, UsageRepo };
  use dpack_objectstore::InMemoryObjectStore;
  use dpack_packs::PackRegistry;
  use dpack_queue::InMemoryQueue;
  use dpack_reliability::CircuitBreaker;
  use dpack_types::PlanTier;
  use std::sync::Arc;

  async fn test_state() -> ( AppState, Tenant )
  {
    let pool = dpack_ledger::storage::connect( "sqlite::memory:", 1 ).await.unwrap();
    let tenants = TenantRepo::new( pool.clone() );
    let tenant = tenants
      .create_tenant( PlanTier::Basic, MicroUnits::from_micros( 20_000_000 ), MicroUnits::ZERO, "USD" )
      .await
      .unwrap();

    let state = AppState
    {
      config: Arc::new( dpack_config::AppConfig::default_test() ),
      tenants,
      runs: RunRepo::new( pool.clone() ),
      usage: UsageRepo::new( pool ),
      kv: test_kv_client().await,
      queue: Arc::new( InMemoryQueue::new() ),
      object_store: Arc::new( InMemoryObjectStore::new() ),
      packs: Arc::new( PackRegistry::new() ),
      pricing: Arc::new( dpack_cost::PricingTable::embedded() ),
      circuit_breaker: Arc::new( CircuitBreaker::new( 3, 30 ) ),
    };

    ( state, tenant )
  }

  /// Requires a live Redis instance reachable at `REDIS_TEST_URL` — the
  /// same convention `dpack_kv`'s own ignored tests use, since the
  /// reservation index and rate limiter have no in-memory double.
  async fn test_kv_client() -> dpack_kv::KvClient
  {
    let url = std::env::var( "REDIS_TEST_URL" ).unwrap_or_else( | _ | "redis://127.0.0.1:6379".to_string() );
    dpack_kv::KvClient::connect( &url ).await.unwrap()
  }

  #[ tokio::test ]
  #[ ignore ]
  async fn replay_with_same_fingerprint_returns_original_run()
  {
    let ( state, tenant ) = test_state().await;
    let payload = br#"{"q":"A?"}"#;
    let amount = MicroUnits::parse_decimal( "0.1000" ).unwrap();

    let first = admit( &state, &tenant, "K1", "decision", payload, amount, None ).await.unwrap();
    assert!( !first.replay );

    let second = admit( &state, &tenant, "K1", "decision", payload, amount, None ).await.unwrap();
    assert!( second.replay );
    assert_eq!( second.run.id, first.run.id );
  }

  #[ tokio::test ]
  #[ ignore ]
  async fn replay_with_different_fingerprint_conflicts()
  {
    let ( state, tenant ) = test_state().await;
    let amount = MicroUnits::parse_decimal( "0.1000" ).unwrap();

    admit( &state, &tenant, "K2", "decision", br#"{"q":"A?"}"#, amount, None ).await.unwrap();
    let err = admit( &state, &tenant, "K2", "decision", br#"{"q":"B?"}"#, amount, None ).await.unwrap_err();
    assert!( matches!( err, ApiError::IdempotencyConflict ) );
  }

  #[ tokio::test ]
  #[ ignore ]
  async fn request_above_available_budget_is_rejected()
  {
    let ( state, tenant ) = test_state().await;
    let amount = MicroUnits::from_micros( 1_000_000_000 );
    let err = admit( &state, &tenant, "K3", "decision", b"{}", amount, None ).await.unwrap_err();
    assert!( matches!( err, ApiError::InsufficientBudget { .. } ) );
  }
}
