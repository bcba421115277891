//! `GET /v1/usage?start_date&end_date`.

use crate::auth::AuthenticatedTenant;
use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{ OriginalUri, Query, State };
use axum::response::{ IntoResponse, Response };
use axum::Json;
use chrono::NaiveDate;
use serde::{ Deserialize, Serialize };

#[ derive( Debug, Deserialize ) ]
pub struct UsageQuery
{
  pub start_date: NaiveDate,
  pub end_date: NaiveDate,
}

#[ derive( Debug, Serialize ) ]
pub struct DailyUsageEntry
{
  pub date: NaiveDate,
  pub settled_usd: String,
  pub run_count: i64,
}

#[ derive( Debug, Serialize ) ]
pub struct UsageResponse
{
  pub tenant_id: String,
  pub start_date: NaiveDate,
  pub end_date: NaiveDate,
  pub total_settled_usd: String,
  pub daily: Vec< DailyUsageEntry >,
}

/// `GET /v1/usage`.
pub async fn usage(
  State( state ): State< AppState >,
  AuthenticatedTenant { tenant, .. }: AuthenticatedTenant,
  OriginalUri( uri ): OriginalUri,
  Query( query ): Query< UsageQuery >,
) -> Response
{
  let instance = uri.path().to_string();
  match usage_inner( &state, tenant.id, query ).await
  {
    Ok( body ) => Json( body ).into_response(),
    Err( err ) => err.into_response_with_context( &instance, None ),
  }
}

async fn usage_inner(
  state: &AppState,
  tenant_id: dpack_types::TenantId,
  query: UsageQuery,
) -> Result< UsageResponse, ApiError >
{
  if query.start_date > query.end_date
  {
    return Err( ApiError::InvalidPayload( "start_date must not be after end_date".to_string() ) );
  }

  let infra = | e: dpack_ledger::LedgerError | ApiError::Infrastructure( e.to_string() );
  let rows = state.usage.range( tenant_id, query.start_date, query.end_date ).await.map_err( infra )?;
  let total = state.usage.settled_total( tenant_id, query.start_date, query.end_date ).await.map_err( infra )?;

  Ok( UsageResponse
  {
    tenant_id: tenant_id.to_prefixed_string(),
    start_date: query.start_date,
    end_date: query.end_date,
    total_settled_usd: total.to_decimal_string(),
    daily: rows
      .into_iter()
      .map( | row | DailyUsageEntry { date: row.date, settled_usd: row.settled.to_decimal_string(), run_count: row.run_count } )
      .collect(),
  } )
}

#[ cfg( test ) ]
mod tests
{
  use super::*;
  use dpack_ledger::{ RunRepo, TenantRepo };
  use dpack_types::{ MicroUnits, PlanTier, RunId, SettlementOutcome, TraceId };

  /// `AppState` has no optional fields, so exercising `usage_inner` still
  /// needs a live Redis instance reachable at `REDIS_TEST_URL` even though
  /// this handler never touches it — same convention as `admission`'s and
  /// `runs`'s own ignored tests.
  async fn test_state() -> ( AppState, TenantRepo, RunRepo )
  {
    let pool = dpack_ledger::storage::connect( "sqlite::memory:", 1 ).await.unwrap();
    let tenants = TenantRepo::new( pool.clone() );
    let runs = RunRepo::new( pool.clone() );
    let url = std::env::var( "REDIS_TEST_URL" ).unwrap_or_else( | _ | "redis://127.0.0.1:6379".to_string() );

    let state = AppState
    {
      config: std::sync::Arc::new( dpack_config::AppConfig::default_test() ),
      tenants: tenants.clone(),
      runs: runs.clone(),
      usage: UsageRepo::new( pool ),
      kv: dpack_kv::KvClient::connect( &url ).await.unwrap(),
      queue: std::sync::Arc::new( dpack_queue::InMemoryQueue::new() ),
      object_store: std::sync::Arc::new( dpack_objectstore::InMemoryObjectStore::new() ),
      packs: std::sync::Arc::new( dpack_packs::PackRegistry::new() ),
      pricing: std::sync::Arc::new( dpack_cost::PricingTable::embedded() ),
      circuit_breaker: std::sync::Arc::new( dpack_reliability::CircuitBreaker::new( 3, 30 ) ),
    };

    ( state, tenants, runs )
  }

  #[ tokio::test ]
  #[ ignore ]
  async fn rejects_inverted_date_range()
  {
    let ( state, tenants, _runs ) = test_state().await;
    let tenant = tenants
      .create_tenant( PlanTier::Basic, MicroUnits::from_micros( 20_000_000 ), MicroUnits::ZERO, "USD" )
      .await
      .unwrap();

    let today = Utc::now().date_naive();
    let yesterday = today - chrono::Duration::days( 1 );

    let err = usage_inner( &state, tenant.id, UsageQuery { start_date: today, end_date: yesterday } ).await.unwrap_err();
    assert!( matches!( err, ApiError::InvalidPayload( _ ) ) );
  }

  #[ tokio::test ]
  #[ ignore ]
  async fn totals_reflect_settled_runs_in_range()
  {
    let ( state, tenants, runs ) = test_state().await;
    let tenant = tenants
      .create_tenant( PlanTier::Basic, MicroUnits::from_micros( 20_000_000 ), MicroUnits::ZERO, "USD" )
      .await
      .unwrap();

    let run = runs
      .insert_queued(
        RunId::new(), tenant.id, "K1", "fp", "decision", TraceId::new(),
        MicroUnits::from_micros( 100_000 ), MicroUnits::from_micros( 10_000 ), chrono::Duration::days( 30 ),
      )
      .await
      .unwrap();
    let leased = runs.acquire_lease( run.id, chrono::Duration::minutes( 2 ) ).await.unwrap();
    let ( claimed, token ) = runs.finalize_claim( run.id, leased.lease_token.unwrap(), leased.version ).await.unwrap();
    assert_eq!( claimed.status, dpack_types::RunStatus::Claimed );
    runs
      .finalize_commit( run.id, token, MicroUnits::from_micros( 87_000 ), "b", "k", "fp", SettlementOutcome::WorkerCommitted )
      .await
      .unwrap();

    let today = Utc::now().date_naive();
    let response = usage_inner( &state, tenant.id, UsageQuery { start_date: today, end_date: today } ).await.unwrap();

    assert_eq!( response.total_settled_usd, "0.0870" );
  }
}
