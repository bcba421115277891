//! The `Settlement` audit row.
//!
//! One settlement row exists per run, regardless of how many times phase-3
//! commit or reaper roll-forward is attempted — the uniqueness of
//! `run_id` is what makes settlement idempotent under concurrent retries.

use crate::ids::{ RunId, TenantId };
use crate::money::MicroUnits;
use chrono::{ DateTime, Utc };
use serde::{ Deserialize, Serialize };

/// How a settlement came to be recorded.
#[ derive( Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize ) ]
#[ serde( rename_all = "snake_case" ) ]
pub enum SettlementOutcome
{
  /// Worker's own phase-3 commit settled the run.
  WorkerCommitted,
  /// Reaper reconciliation rolled the commit forward from object-store metadata.
  ReaperRolledForward,
  /// Reaper (or worker failure path) settled at the minimum fee with no actual cost.
  MinimumFeeOnly,
}

/// A single settlement audit row.
#[ derive( Debug, Clone, Serialize, Deserialize ) ]
pub struct Settlement
{
  /// The run this settlement is keyed by (unique).
  pub run_id: RunId,
  /// Owning tenant, denormalized for usage aggregation queries.
  pub tenant_id: TenantId,
  /// Amount actually settled against the tenant's period balance.
  pub settled_amount: MicroUnits,
  /// Reservation amount released back to the tenant's open-reservations.
  pub released_reservation: MicroUnits,
  /// How this settlement came to be recorded.
  pub outcome: SettlementOutcome,
  /// When the settlement was recorded.
  pub created_at: DateTime< Utc >,
}
