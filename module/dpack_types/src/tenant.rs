//! Tenant and API-key entities.

use crate::ids::{ ApiKeyId, TenantId };
use crate::money::MicroUnits;
use chrono::{ DateTime, Utc };
use serde::{ Deserialize, Serialize };

/// Numeric plan tier, each carrying distinct rate/budget limits. The
/// concrete per-tier numbers live in `dpack_cost::pricing`, not here —
/// this type is just the tenant-facing label.
#[ derive( Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize ) ]
#[ serde( rename_all = "snake_case" ) ]
pub enum PlanTier
{
  /// Entry-level tier.
  Basic,
  /// Mid-size tier.
  Growth,
  /// Top tier, highest allowances.
  Enterprise,
}

/// A customer account. Identifier is immutable once created; `plan`
/// is the only administratively mutable field.
#[ derive( Debug, Clone, Serialize, Deserialize ) ]
pub struct Tenant
{
  /// Immutable identifier.
  pub id: TenantId,
  /// Current plan tier.
  pub plan: PlanTier,
  /// Monthly quota, in micro-units of `currency`.
  pub monthly_quota: MicroUnits,
  /// Hard ceiling above the quota the tenant may never cross.
  pub overage_cap: MicroUnits,
  /// ISO 4217 currency code (e.g. `"USD"`).
  pub currency: String,
  /// Administrative creation time.
  pub created_at: DateTime< Utc >,
}

/// A bearer credential owned by a tenant. The plaintext key is never
/// stored or logged — only `key_hash`, a salted SHA-256 digest computed by
/// `dpack_api::auth`.
#[ derive( Debug, Clone, Serialize, Deserialize ) ]
pub struct ApiKey
{
  /// Identifier of this credential (not the tenant).
  pub id: ApiKeyId,
  /// Owning tenant.
  pub tenant_id: TenantId,
  /// Salted SHA-256 hex digest of the presented bearer token.
  pub key_hash: String,
  /// Creation time.
  pub created_at: DateTime< Utc >,
  /// Whether the key may currently be used to authenticate.
  pub active: bool,
}
