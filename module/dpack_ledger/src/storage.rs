//! Connection pool construction and startup bootstrap.

use crate::migrations::apply_all_migrations;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

/// Open a connection pool against `database_url` and apply every pending
/// migration. Call once at process startup; the returned pool is cheap to
/// clone and `Send + Sync`, so every concurrent task — including a
/// worker's heartbeat tick — should hold its own clone rather than share a
/// borrowed connection.
///
/// # Errors
///
/// Returns the underlying `sqlx::Error` if the pool cannot be opened or a
/// migration fails.
pub async fn connect( database_url: &str, max_connections: u32 ) -> Result< SqlitePool, sqlx::Error >
{
  let pool = SqlitePoolOptions::new()
    .max_connections( max_connections )
    .connect( database_url )
    .await?;

  apply_all_migrations( &pool ).await?;

  Ok( pool )
}

#[ cfg( test ) ]
mod tests
{
  use super::*;

  #[ tokio::test ]
  async fn connect_bootstraps_schema()
  {
    let pool = connect( "sqlite::memory:", 1 ).await.unwrap();
    let exists: ( i64, ) = sqlx::query_as( "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'runs'" )
      .fetch_one( &pool )
      .await
      .unwrap();
    assert_eq!( exists.0, 1 );
  }
}
