//! Shared connection handle.

use crate::error::Result;
use redis::aio::ConnectionManager;

/// A cheap-to-clone handle over a managed Redis connection. `ConnectionManager`
/// reconnects transparently on drop, so every caller — including a
/// concurrently-running rate check and reservation write — shares the same
/// handle without coordinating connection lifetime.
#[ derive( Debug, Clone ) ]
pub struct KvClient
{
  pub( crate ) conn: ConnectionManager,
}

impl KvClient
{
  /// Connect to `redis_url` and establish the managed connection.
  ///
  /// # Errors
  ///
  /// Returns [`crate::error::KvError`] if the initial connection fails.
  pub async fn connect( redis_url: &str ) -> Result< Self >
  {
    let client = redis::Client::open( redis_url )?;
    let conn = client.get_connection_manager().await?;
    Ok( Self { conn } )
  }

  /// Trivial liveness probe, used by the API's `/readyz` check.
  ///
  /// # Errors
  ///
  /// Returns [`crate::error::KvError`] if Redis does not respond.
  pub async fn ping( &mut self ) -> Result< () >
  {
    let _: String = redis::cmd( "PING" ).query_async( &mut self.conn ).await?;
    Ok( () )
  }
}
