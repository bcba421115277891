//! Schema migrations.
//!
//! Migration 001 runs unconditionally (it is the bootstrap: an empty
//! database has nothing to guard against). Every later migration is
//! wrapped in a `_migration_NNN_completed` guard table so re-running
//! [`apply_all_migrations`] against an already-migrated database is a
//! cheap no-op rather than a duplicate-table error.

use sqlx::SqlitePool;

async fn already_applied( pool: &SqlitePool, guard_table: &str ) -> Result< bool, sqlx::Error >
{
  let row: Option< ( i64, ) > = sqlx::query_as(
    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?"
  )
  .bind( guard_table )
  .fetch_optional( pool )
  .await?;

  Ok( row.map( | ( count, ) | count > 0 ).unwrap_or( false ) )
}

async fn mark_applied( pool: &SqlitePool, guard_table: &str ) -> Result< (), sqlx::Error >
{
  sqlx::query( &format!( "CREATE TABLE {guard_table} ( completed_at TEXT NOT NULL DEFAULT ( datetime('now') ) )" ) )
    .execute( pool )
    .await?;
  Ok( () )
}

/// Apply every migration that has not already run against this pool, in
/// order. Safe to call on every process startup.
pub async fn apply_all_migrations( pool: &SqlitePool ) -> Result< (), sqlx::Error >
{
  sqlx::query( "PRAGMA foreign_keys = ON" ).execute( pool ).await?;

  migration_001_tenants_and_api_keys( pool ).await?;
  migration_002_runs( pool ).await?;
  migration_003_settlements( pool ).await?;
  migration_004_usage_daily( pool ).await?;
  migration_005_indexes( pool ).await?;

  Ok( () )
}

async fn migration_001_tenants_and_api_keys( pool: &SqlitePool ) -> Result< (), sqlx::Error >
{
  sqlx::query(
    "CREATE TABLE IF NOT EXISTS tenants
    (
      id TEXT PRIMARY KEY,
      plan TEXT NOT NULL,
      monthly_quota_micros INTEGER NOT NULL,
      overage_cap_micros INTEGER NOT NULL,
      currency TEXT NOT NULL,
      created_at TEXT NOT NULL
    )"
  )
  .execute( pool )
  .await?;

  sqlx::query(
    "CREATE TABLE IF NOT EXISTS api_keys
    (
      id TEXT PRIMARY KEY,
      tenant_id TEXT NOT NULL REFERENCES tenants( id ),
      key_hash TEXT NOT NULL UNIQUE,
      created_at TEXT NOT NULL,
      active INTEGER NOT NULL DEFAULT 1
    )"
  )
  .execute( pool )
  .await?;

  Ok( () )
}

async fn migration_002_runs( pool: &SqlitePool ) -> Result< (), sqlx::Error >
{
  let guard = "_migration_002_completed";
  if already_applied( pool, guard ).await?
  {
    return Ok( () );
  }

  sqlx::query(
    "CREATE TABLE runs
    (
      id TEXT PRIMARY KEY,
      tenant_id TEXT NOT NULL REFERENCES tenants( id ),
      idempotency_key TEXT NOT NULL,
      payload_fingerprint TEXT NOT NULL,
      status TEXT NOT NULL,
      finalize_stage TEXT NOT NULL,
      version INTEGER NOT NULL DEFAULT 0,
      reservation_micros INTEGER NOT NULL,
      actual_cost_micros INTEGER,
      minimum_fee_micros INTEGER NOT NULL,
      lease_token TEXT,
      lease_expires_at TEXT,
      finalize_token TEXT,
      result_bucket TEXT,
      result_key TEXT,
      result_fingerprint TEXT,
      trace_id TEXT NOT NULL,
      pack_type TEXT NOT NULL,
      failure_reason TEXT,
      created_at TEXT NOT NULL,
      started_at TEXT,
      completed_at TEXT,
      retention_expires_at TEXT NOT NULL,
      UNIQUE( tenant_id, idempotency_key )
    )"
  )
  .execute( pool )
  .await?;

  mark_applied( pool, guard ).await
}

async fn migration_003_settlements( pool: &SqlitePool ) -> Result< (), sqlx::Error >
{
  let guard = "_migration_003_completed";
  if already_applied( pool, guard ).await?
  {
    return Ok( () );
  }

  sqlx::query(
    "CREATE TABLE settlements
    (
      run_id TEXT PRIMARY KEY REFERENCES runs( id ),
      tenant_id TEXT NOT NULL,
      settled_amount_micros INTEGER NOT NULL,
      released_reservation_micros INTEGER NOT NULL,
      outcome TEXT NOT NULL,
      created_at TEXT NOT NULL
    )"
  )
  .execute( pool )
  .await?;

  mark_applied( pool, guard ).await
}

async fn migration_004_usage_daily( pool: &SqlitePool ) -> Result< (), sqlx::Error >
{
  let guard = "_migration_004_completed";
  if already_applied( pool, guard ).await?
  {
    return Ok( () );
  }

  sqlx::query(
    "CREATE TABLE usage_daily
    (
      tenant_id TEXT NOT NULL,
      usage_date TEXT NOT NULL,
      settled_micros INTEGER NOT NULL DEFAULT 0,
      run_count INTEGER NOT NULL DEFAULT 0,
      PRIMARY KEY ( tenant_id, usage_date )
    )"
  )
  .execute( pool )
  .await?;

  mark_applied( pool, guard ).await
}

async fn migration_005_indexes( pool: &SqlitePool ) -> Result< (), sqlx::Error >
{
  let guard = "_migration_005_completed";
  if already_applied( pool, guard ).await?
  {
    return Ok( () );
  }

  sqlx::query( "CREATE INDEX idx_runs_tenant_status ON runs( tenant_id, status )" ).execute( pool ).await?;
  sqlx::query( "CREATE INDEX idx_runs_lease_sweep ON runs( status, lease_expires_at )" ).execute( pool ).await?;
  sqlx::query( "CREATE INDEX idx_runs_finalize_stage ON runs( finalize_stage, started_at )" ).execute( pool ).await?;

  mark_applied( pool, guard ).await
}

#[ cfg( test ) ]
mod tests
{
  use super::*;
  use sqlx::sqlite::SqlitePoolOptions;

  async fn memory_pool() -> SqlitePool
  {
    SqlitePoolOptions::new().max_connections( 1 ).connect( "sqlite::memory:" ).await.unwrap()
  }

  #[ tokio::test ]
  async fn creates_all_tables()
  {
    let pool = memory_pool().await;
    apply_all_migrations( &pool ).await.unwrap();

    for table in [ "tenants", "api_keys", "runs", "settlements", "usage_daily" ]
    {
      let exists: ( i64, ) = sqlx::query_as( "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?" )
        .bind( table )
        .fetch_one( &pool )
        .await
        .unwrap();
      assert_eq!( exists.0, 1, "expected table {table} to exist" );
    }
  }

  #[ tokio::test ]
  async fn idempotent_reapplication()
  {
    let pool = memory_pool().await;
    apply_all_migrations( &pool ).await.unwrap();
    apply_all_migrations( &pool ).await.unwrap();
  }
}
