//! Tenant and API-key repository.
//!
//! Key hashing itself is not this crate's concern — `dpack_api::auth`
//! computes the salted SHA-256 digest from the bearer token presented on
//! the wire and hands this repository the resulting `key_hash` to store
//! and look up. This crate only ever sees digests, never plaintext keys.

use crate::error::{ classify_insert_error, LedgerError, Result };
use chrono::Utc;
use dpack_types::{ ApiKey, ApiKeyId, MicroUnits, PlanTier, Tenant, TenantId };
use sqlx::SqlitePool;

fn plan_to_column( plan: PlanTier ) -> &'static str
{
  match plan
  {
    PlanTier::Basic => "basic",
    PlanTier::Growth => "growth",
    PlanTier::Enterprise => "enterprise",
  }
}

fn plan_from_column( s: &str ) -> Option< PlanTier >
{
  Some( match s
  {
    "basic" => PlanTier::Basic,
    "growth" => PlanTier::Growth,
    "enterprise" => PlanTier::Enterprise,
    _ => return None,
  } )
}

/// Repository for `tenants` and `api_keys`.
#[ derive( Debug, Clone ) ]
pub struct TenantRepo
{
  pool: SqlitePool,
}

impl TenantRepo
{
  /// Wrap an existing pool. Cheap — `SqlitePool` is a handle, not a
  /// connection.
  #[ must_use ]
  pub fn new( pool: SqlitePool ) -> Self
  {
    Self { pool }
  }

  /// Create a new tenant with the plan's default quota/overage.
  pub async fn create_tenant(
    &self,
    plan: PlanTier,
    monthly_quota: MicroUnits,
    overage_cap: MicroUnits,
    currency: &str,
  ) -> Result< Tenant >
  {
    let tenant = Tenant
    {
      id: TenantId::new(),
      plan,
      monthly_quota,
      overage_cap,
      currency: currency.to_string(),
      created_at: Utc::now(),
    };

    sqlx::query(
      "INSERT INTO tenants ( id, plan, monthly_quota_micros, overage_cap_micros, currency, created_at )
       VALUES ( ?, ?, ?, ?, ?, ? )"
    )
    .bind( tenant.id.to_prefixed_string() )
    .bind( plan_to_column( tenant.plan ) )
    .bind( tenant.monthly_quota.as_micros() )
    .bind( tenant.overage_cap.as_micros() )
    .bind( &tenant.currency )
    .bind( tenant.created_at.to_rfc3339() )
    .execute( &self.pool )
    .await?;

    Ok( tenant )
  }

  /// Look up a tenant by identifier.
  pub async fn get_tenant( &self, tenant_id: TenantId ) -> Result< Tenant >
  {
    let row: Option< ( String, String, i64, i64, String, String ) > = sqlx::query_as(
      "SELECT id, plan, monthly_quota_micros, overage_cap_micros, currency, created_at FROM tenants WHERE id = ?"
    )
    .bind( tenant_id.to_prefixed_string() )
    .fetch_optional( &self.pool )
    .await?;

    let ( id, plan, quota, overage, currency, created_at ) = row.ok_or( LedgerError::NotFound )?;

    Ok( Tenant
    {
      id: TenantId::parse( &id ).map_err( | _ | LedgerError::NotFound )?,
      plan: plan_from_column( &plan ).ok_or( LedgerError::NotFound )?,
      monthly_quota: MicroUnits::from_micros( quota ),
      overage_cap: MicroUnits::from_micros( overage ),
      currency,
      created_at: created_at.parse().map_err( | _ | LedgerError::NotFound )?,
    } )
  }

  /// Mint a new API key row from an already-computed digest. Returns the
  /// stored [`ApiKey`]; the caller already holds the plaintext token, this
  /// repository never will.
  pub async fn create_api_key( &self, tenant_id: TenantId, key_hash: &str ) -> Result< ApiKey >
  {
    let key = ApiKey
    {
      id: ApiKeyId::new(),
      tenant_id,
      key_hash: key_hash.to_string(),
      created_at: Utc::now(),
      active: true,
    };

    sqlx::query(
      "INSERT INTO api_keys ( id, tenant_id, key_hash, created_at, active ) VALUES ( ?, ?, ?, ?, ? )"
    )
    .bind( key.id.to_prefixed_string() )
    .bind( key.tenant_id.to_prefixed_string() )
    .bind( &key.key_hash )
    .bind( key.created_at.to_rfc3339() )
    .bind( key.active )
    .execute( &self.pool )
    .await
    .map_err( classify_insert_error )?;

    Ok( key )
  }

  /// Resolve an active API key by its digest, together with the owning
  /// tenant. Returns [`LedgerError::NotFound`] if the digest is unknown or
  /// the key has been deactivated.
  pub async fn find_active_key( &self, key_hash: &str ) -> Result< ( ApiKey, Tenant ) >
  {
    let row: Option< ( String, String, String, String, bool ) > = sqlx::query_as(
      "SELECT id, tenant_id, key_hash, created_at, active FROM api_keys WHERE key_hash = ? AND active = 1"
    )
    .bind( key_hash )
    .fetch_optional( &self.pool )
    .await?;

    let ( id, tenant_id, key_hash, created_at, active ) = row.ok_or( LedgerError::NotFound )?;

    let tenant_id = TenantId::parse( &tenant_id ).map_err( | _ | LedgerError::NotFound )?;
    let tenant = self.get_tenant( tenant_id ).await?;

    let key = ApiKey
    {
      id: ApiKeyId::parse( &id ).map_err( | _ | LedgerError::NotFound )?,
      tenant_id,
      key_hash,
      created_at: created_at.parse().map_err( | _ | LedgerError::NotFound )?,
      active,
    };

    Ok( ( key, tenant ) )
  }

  /// Deactivate a key so it can no longer authenticate.
  pub async fn revoke_key( &self, key_id: ApiKeyId ) -> Result< () >
  {
    let result = sqlx::query( "UPDATE api_keys SET active = 0 WHERE id = ?" )
      .bind( key_id.to_prefixed_string() )
      .execute( &self.pool )
      .await?;

    if result.rows_affected() == 0
    {
      return Err( LedgerError::NotFound );
    }
    Ok( () )
  }
}

#[ cfg( test ) ]
mod tests
{
  use super::*;
  use crate::storage::connect;

  async fn repo() -> TenantRepo
  {
    let pool = connect( "sqlite::memory:", 1 ).await.unwrap();
    TenantRepo::new( pool )
  }

  #[ tokio::test ]
  async fn create_and_fetch_tenant()
  {
    let repo = repo().await;
    let tenant = repo
      .create_tenant( PlanTier::Growth, MicroUnits::from_micros( 200_000_000 ), MicroUnits::from_micros( 50_000_000 ), "USD" )
      .await
      .unwrap();

    let fetched = repo.get_tenant( tenant.id ).await.unwrap();
    assert_eq!( fetched.id, tenant.id );
    assert_eq!( fetched.plan, PlanTier::Growth );
  }

  #[ tokio::test ]
  async fn key_lookup_round_trips()
  {
    let repo = repo().await;
    let tenant = repo
      .create_tenant( PlanTier::Basic, MicroUnits::from_micros( 20_000_000 ), MicroUnits::ZERO, "USD" )
      .await
      .unwrap();

    let key = repo.create_api_key( tenant.id, "deadbeef" ).await.unwrap();
    let ( found, found_tenant ) = repo.find_active_key( "deadbeef" ).await.unwrap();
    assert_eq!( found.id, key.id );
    assert_eq!( found_tenant.id, tenant.id );
  }

  #[ tokio::test ]
  async fn revoked_key_is_not_found()
  {
    let repo = repo().await;
    let tenant = repo
      .create_tenant( PlanTier::Basic, MicroUnits::from_micros( 20_000_000 ), MicroUnits::ZERO, "USD" )
      .await
      .unwrap();
    let key = repo.create_api_key( tenant.id, "cafef00d" ).await.unwrap();
    repo.revoke_key( key.id ).await.unwrap();
    assert!( repo.find_active_key( "cafef00d" ).await.is_err() );
  }

  #[ tokio::test ]
  async fn duplicate_key_hash_is_rejected()
  {
    let repo = repo().await;
    let tenant = repo
      .create_tenant( PlanTier::Basic, MicroUnits::from_micros( 20_000_000 ), MicroUnits::ZERO, "USD" )
      .await
      .unwrap();
    repo.create_api_key( tenant.id, "same-hash" ).await.unwrap();
    let err = repo.create_api_key( tenant.id, "same-hash" ).await.unwrap_err();
    assert!( matches!( err, LedgerError::IdempotencyConflict ) );
  }
}
