//! `POST /v1/runs` (submit) and `GET /v1/runs/{id}` (poll).

use crate::admission::admit;
use crate::auth::{ hash_key, AuthenticatedTenant };
use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{ OriginalUri, Path, State };
use axum::http::{ HeaderMap, HeaderValue, StatusCode };
use axum::response::{ IntoResponse, Response };
use axum::Json;
use chrono::{ DateTime, Duration, Utc };
use dpack_types::{ MicroUnits, Run, RunId, RunStatus, Tenant };
use serde::{ Deserialize, Serialize };

/// Recommended poll cadence handed back with every receipt. Cheap enough
/// on the server side that this is a fixed constant rather than a
/// per-tenant tunable.
const RECOMMENDED_POLL_INTERVAL_SEC: u64 = 2;

/// A signed download reference stays valid for this long once minted,
/// regardless of how much longer the run's own retention window has left.
const DOWNLOAD_REFERENCE_TTL: Duration = Duration::minutes( 15 );

#[ derive( Debug, Deserialize ) ]
pub struct ReservationRequest
{
  pub max_cost_usd: String,
  #[ serde( default ) ]
  pub timebox_sec: Option< u64 >,
  #[ serde( default ) ]
  pub min_reliability_score: Option< f64 >,
}

#[ derive( Debug, Deserialize ) ]
pub struct SubmitRequest
{
  pub pack_type: String,
  pub inputs: serde_json::Value,
  pub reservation: ReservationRequest,
}

#[ derive( Debug, Serialize ) ]
pub struct PollHint
{
  pub path: String,
  pub recommended_interval_sec: u64,
}

#[ derive( Debug, Serialize ) ]
pub struct ReservationReceipt
{
  pub reserved_usd: String,
}

#[ derive( Debug, Serialize ) ]
pub struct SubmitResponse
{
  pub run_id: String,
  pub status: &'static str,
  pub poll: PollHint,
  pub reservation: ReservationReceipt,
  pub trace_id: String,
}

fn idempotency_key( headers: &HeaderMap ) -> Result< &str, ApiError >
{
  headers
    .get( "idempotency-key" )
    .and_then( | v | v.to_str().ok() )
    .filter( | v | !v.is_empty() )
    .ok_or_else( || ApiError::InvalidPayload( "missing idempotency-key header".to_string() ) )
}

/// `POST /v1/runs`.
pub async fn submit(
  State( state ): State< AppState >,
  AuthenticatedTenant { tenant, .. }: AuthenticatedTenant,
  OriginalUri( uri ): OriginalUri,
  headers: HeaderMap,
  body: axum::body::Bytes,
) -> Response
{
  let instance = uri.path().to_string();
  match submit_inner( &state, &tenant, &headers, &body ).await
  {
    Ok( response ) => response,
    Err( err ) => err.into_response_with_context( &instance, None ),
  }
}

async fn submit_inner( state: &AppState, tenant: &Tenant, headers: &HeaderMap, body: &[ u8 ] ) -> Result< Response, ApiError >
{
  let key = idempotency_key( headers )?;
  let request: SubmitRequest =
    serde_json::from_slice( body ).map_err( | e | ApiError::InvalidPayload( e.to_string() ) )?;

  if !state.packs.contains( &request.pack_type )
  {
    return Err( ApiError::UnknownPackType( request.pack_type ) );
  }

  let amount = MicroUnits::parse_decimal( &request.reservation.max_cost_usd )
    .map_err( | e | ApiError::InvalidPayload( e.to_string() ) )?;

  let receipt = admit( state, tenant, key, &request.pack_type, body, amount, request.reservation.timebox_sec ).await?;

  let status_code = if receipt.replay { StatusCode::OK } else { StatusCode::ACCEPTED };
  let run_id = receipt.run.id.to_prefixed_string();
  let body = SubmitResponse
  {
    run_id: run_id.clone(),
    status: receipt.run.status.as_wire_str(),
    poll: PollHint { path: format!( "/v1/runs/{run_id}" ), recommended_interval_sec: RECOMMENDED_POLL_INTERVAL_SEC },
    reservation: ReservationReceipt { reserved_usd: receipt.run.reservation.to_decimal_string() },
    trace_id: receipt.run.trace_id.to_prefixed_string(),
  };

  let mut response = ( status_code, Json( body ) ).into_response();
  attach_rate_limit_headers( &mut response, receipt.rate_remaining, receipt.rate_reset_unix_secs );
  Ok( response )
}

fn attach_rate_limit_headers( response: &mut Response, remaining: u64, reset_unix_secs: u64 )
{
  let headers = response.headers_mut();
  if let Ok( value ) = HeaderValue::from_str( "requests_per_minute" )
  {
    headers.insert( "x-ratelimit-policy", value );
  }
  if let Ok( value ) = HeaderValue::from_str( &remaining.to_string() )
  {
    headers.insert( "x-ratelimit-remaining", value );
  }
  if let Ok( value ) = HeaderValue::from_str( &reset_unix_secs.to_string() )
  {
    headers.insert( "x-ratelimit-reset", value );
  }
}

#[ derive( Debug, Serialize ) ]
pub struct CostBreakdown
{
  pub reserved_usd: String,
  pub minimum_fee_usd: String,
  #[ serde( skip_serializing_if = "Option::is_none" ) ]
  pub actual_cost_usd: Option< String >,
}

#[ derive( Debug, Serialize ) ]
pub struct DownloadReference
{
  pub url: String,
  pub expires_at: DateTime< Utc >,
}

#[ derive( Debug, Serialize ) ]
pub struct PollResponse
{
  pub run_id: String,
  pub status: &'static str,
  pub money_state: &'static str,
  pub cost: CostBreakdown,
  #[ serde( skip_serializing_if = "Option::is_none" ) ]
  pub result: Option< DownloadReference >,
  pub created_at: DateTime< Utc >,
  #[ serde( skip_serializing_if = "Option::is_none" ) ]
  pub completed_at: Option< DateTime< Utc > >,
}

fn money_state_str( run: &Run ) -> &'static str
{
  match run.money_state()
  {
    dpack_types::MoneyState::Reserved => "reserved",
    dpack_types::MoneyState::Settled => "settled",
    dpack_types::MoneyState::Refunded => "refunded",
  }
}

fn download_reference( state: &AppState, run: &Run ) -> Option< DownloadReference >
{
  let ( bucket, key ) = ( run.result_bucket.as_deref()?, run.result_key.as_deref()? );
  let expires_at = ( Utc::now() + DOWNLOAD_REFERENCE_TTL ).min( run.retention_expires_at );
  let signature = hash_key(
    &state.config.auth.api_key_pepper,
    &format!( "{}:{bucket}:{key}:{}", run.id.to_prefixed_string(), expires_at.to_rfc3339() ),
  );
  Some( DownloadReference
  {
    url: format!( "/v1/runs/{}/result?expires={}&sig={signature}", run.id.to_prefixed_string(), expires_at.timestamp() ),
    expires_at,
  } )
}

/// `GET /v1/runs/{id}`.
pub async fn poll(
  State( state ): State< AppState >,
  AuthenticatedTenant { tenant, .. }: AuthenticatedTenant,
  OriginalUri( uri ): OriginalUri,
  Path( run_id ): Path< String >,
) -> Response
{
  let instance = uri.path().to_string();
  match poll_inner( &state, &tenant, &run_id ).await
  {
    Ok( body ) => Json( body ).into_response(),
    Err( err ) => err.into_response_with_context( &instance, None ),
  }
}

async fn poll_inner( state: &AppState, tenant: &Tenant, run_id: &str ) -> Result< PollResponse, ApiError >
{
  // Every lookup failure — malformed id, nonexistent run, or a run owned by
  // a different tenant — collapses to the same `not_found` response. A
  // distinguishable error here would let a caller enumerate other tenants'
  // run identifiers.
  let run_id = RunId::parse( run_id ).map_err( | _ | ApiError::NotFound )?;
  let run = state.runs.get( run_id ).await.map_err( | _ | ApiError::NotFound )?;

  if run.tenant_id != tenant.id
  {
    return Err( ApiError::NotFound );
  }

  if Utc::now() > run.retention_expires_at && run.status != RunStatus::Queued && run.status != RunStatus::Processing
  {
    return Err( ApiError::Gone );
  }

  let result = if run.status == RunStatus::Completed { download_reference( state, &run ) } else { None };

  Ok( PollResponse
  {
    run_id: run.id.to_prefixed_string(),
    status: run.status.as_wire_str(),
    money_state: money_state_str( &run ),
    cost: CostBreakdown
    {
      reserved_usd: run.reservation.to_decimal_string(),
      minimum_fee_usd: run.minimum_fee.to_decimal_string(),
      actual_cost_usd: run.actual_cost.map( MicroUnits::to_decimal_string ),
    },
    result,
    created_at: run.created_at,
    completed_at: run.completed_at,
  } )
}

#[ cfg( test ) ]
mod tests
{
  use super::*;
  use crate::admission::admit;
  use dpack_ledger::{ RunRepo, TenantRepo, UsageRepo };
  use dpack_objectstore::InMemoryObjectStore;
  use dpack_packs::PackRegistry;
  use dpack_queue::InMemoryQueue;
  use dpack_reliability::CircuitBreaker;
  use dpack_types::PlanTier;

  async fn test_state() -> AppState
  {
    let pool = dpack_ledger::storage::connect( "sqlite::memory:", 1 ).await.unwrap();
    AppState
    {
      config: std::sync::Arc::new( dpack_config::AppConfig::default_test() ),
      tenants: TenantRepo::new( pool.clone() ),
      runs: RunRepo::new( pool.clone() ),
      usage: UsageRepo::new( pool ),
      kv: test_kv_client().await,
      queue: std::sync::Arc::new( InMemoryQueue::new() ),
      object_store: std::sync::Arc::new( InMemoryObjectStore::new() ),
      packs: std::sync::Arc::new( PackRegistry::new() ),
      pricing: std::sync::Arc::new( dpack_cost::PricingTable::embedded() ),
      circuit_breaker: std::sync::Arc::new( CircuitBreaker::new( 3, 30 ) ),
    }
  }

  /// Requires a live Redis instance reachable at `REDIS_TEST_URL`, same as
  /// `dpack_kv`'s own ignored tests and `admission`'s.
  async fn test_kv_client() -> dpack_kv::KvClient
  {
    let url = std::env::var( "REDIS_TEST_URL" ).unwrap_or_else( | _ | "redis://127.0.0.1:6379".to_string() );
    dpack_kv::KvClient::connect( &url ).await.unwrap()
  }

  #[ tokio::test ]
  #[ ignore ]
  async fn poll_by_owning_tenant_returns_queued_status()
  {
    let state = test_state().await;
    let tenant = state
      .tenants
      .create_tenant( PlanTier::Basic, MicroUnits::from_micros( 20_000_000 ), MicroUnits::ZERO, "USD" )
      .await
      .unwrap();

    let receipt = admit( &state, &tenant, "K1", "decision", b"{}", MicroUnits::from_micros( 10_000 ), None ).await.unwrap();
    let response = poll_inner( &state, &tenant, &receipt.run.id.to_prefixed_string() ).await.unwrap();

    assert_eq!( response.status, "queued" );
    assert!( response.result.is_none() );
  }

  #[ tokio::test ]
  #[ ignore ]
  async fn poll_by_non_owning_tenant_is_not_found()
  {
    let state = test_state().await;
    let owner = state
      .tenants
      .create_tenant( PlanTier::Basic, MicroUnits::from_micros( 20_000_000 ), MicroUnits::ZERO, "USD" )
      .await
      .unwrap();
    let stranger = state
      .tenants
      .create_tenant( PlanTier::Basic, MicroUnits::from_micros( 20_000_000 ), MicroUnits::ZERO, "USD" )
      .await
      .unwrap();

    let receipt = admit( &state, &owner, "K1", "decision", b"{}", MicroUnits::from_micros( 10_000 ), None ).await.unwrap();
    let err = poll_inner( &state, &stranger, &receipt.run.id.to_prefixed_string() ).await.unwrap_err();

    assert!( matches!( err, ApiError::NotFound ) );
  }

  #[ tokio::test ]
  #[ ignore ]
  async fn poll_with_garbage_id_is_not_found()
  {
    let state = test_state().await;
    let tenant = state
      .tenants
      .create_tenant( PlanTier::Basic, MicroUnits::from_micros( 20_000_000 ), MicroUnits::ZERO, "USD" )
      .await
      .unwrap();

    let err = poll_inner( &state, &tenant, "not-a-run-id" ).await.unwrap_err();
    assert!( matches!( err, ApiError::NotFound ) );
  }

  #[ tokio::test ]
  #[ ignore ]
  async fn poll_of_expired_terminal_run_by_owner_is_gone()
  {
    let state = test_state().await;
    let tenant = state
      .tenants
      .create_tenant( PlanTier::Basic, MicroUnits::from_micros( 20_000_000 ), MicroUnits::ZERO, "USD" )
      .await
      .unwrap();

    let run = state
      .runs
      .insert_queued(
        RunId::new(), tenant.id, "K-expired", "fp", "decision", dpack_types::TraceId::new(),
        MicroUnits::from_micros( 10_000 ), MicroUnits::ZERO, Duration::seconds( -1 ),
      )
      .await
      .unwrap();
    state.runs.mark_failed( run.id, run.version, "pack_execution_failed" ).await.unwrap();

    let err = poll_inner( &state, &tenant, &run.id.to_prefixed_string() ).await.unwrap_err();
    assert!( matches!( err, ApiError::Gone ) );
  }

  #[ tokio::test ]
  #[ ignore ]
  async fn poll_of_expired_run_by_non_owner_is_still_not_found()
  {
    let state = test_state().await;
    let owner = state
      .tenants
      .create_tenant( PlanTier::Basic, MicroUnits::from_micros( 20_000_000 ), MicroUnits::ZERO, "USD" )
      .await
      .unwrap();
    let stranger = state
      .tenants
      .create_tenant( PlanTier::Basic, MicroUnits::from_micros( 20_000_000 ), MicroUnits::ZERO, "USD" )
      .await
      .unwrap();

    let run = state
      .runs
      .insert_queued(
        RunId::new(), owner.id, "K-expired2", "fp", "decision", dpack_types::TraceId::new(),
        MicroUnits::from_micros( 10_000 ), MicroUnits::ZERO, Duration::seconds( -1 ),
      )
      .await
      .unwrap();
    state.runs.mark_failed( run.id, run.version, "pack_execution_failed" ).await.unwrap();

    let err = poll_inner( &state, &stranger, &run.id.to_prefixed_string() ).await.unwrap_err();
    assert!( matches!( err, ApiError::NotFound ) );
  }

  #[ test ]
  fn idempotency_key_rejects_missing_header()
  {
    let headers = HeaderMap::new();
    assert!( idempotency_key( &headers ).is_err() );
  }

  #[ test ]
  fn idempotency_key_accepts_present_header()
  {
    let mut headers = HeaderMap::new();
    headers.insert( "idempotency-key", HeaderValue::from_static( "abc-123" ) );
    assert_eq!( idempotency_key( &headers ).unwrap(), "abc-123" );
  }
}
