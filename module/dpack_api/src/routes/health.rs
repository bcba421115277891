//! `GET /healthz` and `GET /readyz`.

use crate::state::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Serialize;

/// Always 200 — process is up and accepting connections. Distinct from
/// `/readyz`, which reflects whether downstream subsystems answer.
pub async fn healthz() -> StatusCode
{
  StatusCode::OK
}

#[ derive( Debug, Serialize ) ]
struct ReadyResponse
{
  ready: bool,
  #[ serde( skip_serializing_if = "Option::is_none" ) ]
  failing_subsystem: Option< &'static str >,
}

/// Probes each subsystem with the cheapest call available and reports the
/// first one that fails, by name, so an operator doesn't have to guess
/// which backing service is down from a bare 503.
pub async fn readyz( State( state ): State< AppState > ) -> ( StatusCode, Json< ReadyResponse > )
{
  if let Err( failing ) = probe( &state ).await
  {
    return ( StatusCode::SERVICE_UNAVAILABLE, Json( ReadyResponse { ready: false, failing_subsystem: Some( failing ) } ) );
  }

  ( StatusCode::OK, Json( ReadyResponse { ready: true, failing_subsystem: None } ) )
}

async fn probe( state: &AppState ) -> Result< (), &'static str >
{
  state.runs.find_expired_leases( Utc::now(), 1 ).await.map_err( | _ | "ledger" )?;

  let mut kv = state.kv.clone();
  kv.ping().await.map_err( | _ | "kv" )?;

  state.queue.receive( 0 ).await.map_err( | _ | "queue" )?;

  state.object_store.exists( &state.config.objectstore.s3_result_bucket, "_healthcheck" ).await.map_err( | _ | "object_store" )?;

  Ok( () )
}

#[ cfg( test ) ]
mod tests
{
  use super::*;
  use dpack_ledger::{ RunRepo, TenantRepo, UsageRepo };

  /// Exercises every leg of `probe` except the Redis `PING`, since `kv` has
  /// no in-memory double — requires a live Redis at `REDIS_TEST_URL`, same
  /// convention as the rest of the crate's ignored tests.
  #[ tokio::test ]
  #[ ignore ]
  async fn probe_passes_against_in_memory_backing_services()
  {
    let pool = dpack_ledger::storage::connect( "sqlite::memory:", 1 ).await.unwrap();
    let url = std::env::var( "REDIS_TEST_URL" ).unwrap_or_else( | _ | "redis://127.0.0.1:6379".to_string() );

    let state = AppState
    {
      config: std::sync::Arc::new( dpack_config::AppConfig::default_test() ),
      tenants: TenantRepo::new( pool.clone() ),
      runs: RunRepo::new( pool.clone() ),
      usage: UsageRepo::new( pool ),
      kv: dpack_kv::KvClient::connect( &url ).await.unwrap(),
      queue: std::sync::Arc::new( dpack_queue::InMemoryQueue::new() ),
      object_store: std::sync::Arc::new( dpack_objectstore::InMemoryObjectStore::new() ),
      packs: std::sync::Arc::new( dpack_packs::PackRegistry::new() ),
      pricing: std::sync::Arc::new( dpack_cost::PricingTable::embedded() ),
      circuit_breaker: std::sync::Arc::new( dpack_reliability::CircuitBreaker::new( 3, 30 ) ),
    };

    assert!( probe( &state ).await.is_ok() );
  }

  #[ tokio::test ]
  async fn healthz_is_always_ok()
  {
    assert_eq!( healthz().await, StatusCode::OK );
  }
}
