//! Idempotency cells: `idem:{tenant}:{run_id}` sentinels with a long TTL,
//! written once a run is durably inserted into the ledger. This is a KV-side
//! mirror of the ledger's own `(tenant, idempotency_key)` uniqueness
//! constraint — defense in depth so at-most-once accounting for a
//! client-declared operation id survives even a ledger read that raced a
//! write, not a replacement for the ledger's own authority.

use crate::client::KvClient;
use crate::error::Result;
use dpack_types::{ RunId, TenantId };
use redis::{ AsyncCommands, SetExpiry, SetOptions };

/// Three weeks, in seconds — long enough to outlive any plausible client
/// retry window without growing Redis memory unbounded.
pub const DEFAULT_TTL_SECS: u64 = 21 * 24 * 60 * 60;

fn cell_key( tenant_id: TenantId, run_id: RunId ) -> String
{
  format!( "idem:{}:{}", tenant_id.to_prefixed_string(), run_id.to_prefixed_string() )
}

/// Accounting sentinels over `(tenant, run)` pairs.
#[ derive( Debug, Clone ) ]
pub struct IdempotencyCells
{
  client: KvClient,
}

impl IdempotencyCells
{
  /// Wrap an existing client.
  #[ must_use ]
  pub fn new( client: KvClient ) -> Self
  {
    Self { client }
  }

  /// Mark `run_id` as accounted for, with [`DEFAULT_TTL_SECS`]. Called once,
  /// after the ledger insert that created the run has committed.
  ///
  /// # Errors
  ///
  /// Returns [`crate::error::KvError`] if the Redis round-trip fails.
  pub async fn mark_accounted( &mut self, tenant_id: TenantId, run_id: RunId ) -> Result< () >
  {
    self.mark_accounted_with_ttl( tenant_id, run_id, DEFAULT_TTL_SECS ).await
  }

  /// Same as [`Self::mark_accounted`] with an explicit TTL, for tests.
  ///
  /// # Errors
  ///
  /// Returns [`crate::error::KvError`] if the Redis round-trip fails.
  pub async fn mark_accounted_with_ttl( &mut self, tenant_id: TenantId, run_id: RunId, ttl_secs: u64 ) -> Result< () >
  {
    let opts = SetOptions::default().with_expiration( SetExpiry::EX( ttl_secs ) );
    self.client.conn.set_options::< _, _, () >( cell_key( tenant_id, run_id ), "1", opts ).await?;
    Ok( () )
  }

  /// Whether `run_id` has already been accounted for.
  ///
  /// # Errors
  ///
  /// Returns [`crate::error::KvError`] if the Redis round-trip fails.
  pub async fn is_accounted( &mut self, tenant_id: TenantId, run_id: RunId ) -> Result< bool >
  {
    let exists: bool = self.client.conn.exists( cell_key( tenant_id, run_id ) ).await?;
    Ok( exists )
  }
}

#[ cfg( test ) ]
mod tests
{
  use super::*;

  #[ test ]
  fn cell_key_is_namespaced_per_tenant_and_run()
  {
    let tenant_id = TenantId::new();
    let run_id = RunId::new();
    let key = cell_key( tenant_id, run_id );
    assert!( key.starts_with( "idem:tenant_" ) );
    assert!( key.ends_with( &run_id.to_prefixed_string() ) );
  }

  /// Requires a live Redis instance reachable at `REDIS_TEST_URL`.
  #[ tokio::test ]
  #[ ignore ]
  async fn mark_accounted_is_then_observable()
  {
    let url = std::env::var( "REDIS_TEST_URL" ).unwrap_or_else( | _ | "redis://127.0.0.1:6379".to_string() );
    let client = KvClient::connect( &url ).await.unwrap();
    let mut cells = IdempotencyCells::new( client );
    let tenant_id = TenantId::new();
    let run_id = RunId::new();

    assert!( !cells.is_accounted( tenant_id, run_id ).await.unwrap() );
    cells.mark_accounted_with_ttl( tenant_id, run_id, 30 ).await.unwrap();
    assert!( cells.is_accounted( tenant_id, run_id ).await.unwrap() );
  }
}
