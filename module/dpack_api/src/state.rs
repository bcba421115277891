//! Shared application state handed to every route.

use dpack_cost::PricingTable;
use dpack_kv::KvClient;
use dpack_ledger::{ RunRepo, TenantRepo, UsageRepo };
use dpack_objectstore::ObjectStore;
use dpack_packs::PackRegistry;
use dpack_queue::MessageQueue;
use dpack_reliability::CircuitBreaker;
use std::sync::Arc;

/// Everything a route handler needs to admit, poll, or report on a run.
///
/// Cheap to clone: every field is itself a handle (pool, connection
/// manager, or `Arc`), never owned heap state duplicated per clone.
#[ derive( Clone ) ]
pub struct AppState
{
  pub config: Arc< dpack_config::AppConfig >,
  pub tenants: TenantRepo,
  pub runs: RunRepo,
  pub usage: UsageRepo,
  pub kv: KvClient,
  pub queue: Arc< dyn MessageQueue >,
  pub object_store: Arc< dyn ObjectStore >,
  pub packs: Arc< PackRegistry >,
  pub pricing: Arc< PricingTable >,
  pub circuit_breaker: Arc< CircuitBreaker >,
}

impl std::fmt::Debug for AppState
{
  fn fmt( &self, f: &mut std::fmt::Formatter< '_ > ) -> std::fmt::Result
  {
    f.debug_struct( "AppState" ).field( "env", &self.config.env ).finish_non_exhaustive()
  }
}
