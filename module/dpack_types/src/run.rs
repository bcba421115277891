//! The `Run` entity and its lifecycle states.

use crate::ids::{ FinalizeToken, LeaseToken, RunId, TenantId, TraceId };
use crate::money::MicroUnits;
use chrono::{ DateTime, Utc };
use serde::{ Deserialize, Serialize };

/// Ordered status set a run moves through. Terminal variants are
/// `Completed`, `Failed`, `AuditRequired`.
#[ derive( Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize ) ]
#[ serde( rename_all = "SCREAMING_SNAKE_CASE" ) ]
pub enum RunStatus
{
  /// Admitted, reserved, enqueued; no worker has taken it yet.
  Queued,
  /// A worker holds the lease and is executing the pack.
  Processing,
  /// Phase 1 of finalize has committed; phase 2/3 are in flight or stuck.
  Claimed,
  /// Phase 3 committed successfully.
  Completed,
  /// Terminal failure: pack error, or reaper lease-expiry/reconcile roll-back.
  Failed,
  /// Terminal: reconciliation could not safely settle; operator required.
  AuditRequired,
}

impl RunStatus
{
  /// `true` for any of the three terminal states.
  #[ must_use ]
  pub const fn is_terminal( self ) -> bool
  {
    matches!( self, Self::Completed | Self::Failed | Self::AuditRequired )
  }

  /// Lowercase wire representation used in HTTP responses (`queued`,
  /// `completed`, ...), distinct from the `SCREAMING_SNAKE_CASE` used for
  /// the ledger column and internal logging.
  #[ must_use ]
  pub const fn as_wire_str( self ) -> &'static str
  {
    match self
    {
      Self::Queued => "queued",
      Self::Processing => "processing",
      Self::Claimed => "claimed",
      Self::Completed => "completed",
      Self::Failed => "failed",
      Self::AuditRequired => "audit_required",
    }
  }

  /// Parse the ledger's stored column text back into a status.
  #[ must_use ]
  pub fn from_column( s: &str ) -> Option< Self >
  {
    Some( match s
    {
      "QUEUED" => Self::Queued,
      "PROCESSING" => Self::Processing,
      "CLAIMED" => Self::Claimed,
      "COMPLETED" => Self::Completed,
      "FAILED" => Self::Failed,
      "AUDIT_REQUIRED" => Self::AuditRequired,
      _ => return None,
    } )
  }

  /// Render as the ledger's stored column text.
  #[ must_use ]
  pub const fn as_column_str( self ) -> &'static str
  {
    match self
    {
      Self::Queued => "QUEUED",
      Self::Processing => "PROCESSING",
      Self::Claimed => "CLAIMED",
      Self::Completed => "COMPLETED",
      Self::Failed => "FAILED",
      Self::AuditRequired => "AUDIT_REQUIRED",
    }
  }
}

/// The 2-phase finalize protocol's own stage, orthogonal to `RunStatus`
/// (a run can be `Claimed` in status while its finalize stage is still
/// `Claimed`, waiting on phase 2/3 — or stuck there forever until the
/// reaper reconciles it).
#[ derive( Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize ) ]
#[ serde( rename_all = "SCREAMING_SNAKE_CASE" ) ]
pub enum FinalizeStage
{
  /// No finalize attempt has started.
  None,
  /// Phase 1 (CLAIM) committed.
  Claimed,
  /// Phase 3 (COMMIT) committed. Implies a settlement row exists.
  Committed,
}

impl FinalizeStage
{
  /// Parse the ledger's stored column text.
  #[ must_use ]
  pub fn from_column( s: &str ) -> Option< Self >
  {
    Some( match s
    {
      "NONE" => Self::None,
      "CLAIMED" => Self::Claimed,
      "COMMITTED" => Self::Committed,
      _ => return None,
    } )
  }

  /// Render as the ledger's stored column text.
  #[ must_use ]
  pub const fn as_column_str( self ) -> &'static str
  {
    match self
    {
      Self::None => "NONE",
      Self::Claimed => "CLAIMED",
      Self::Committed => "COMMITTED",
    }
  }
}

/// The central `Run` entity. Mirrors the `runs` table row shape; money
/// columns are always [`MicroUnits`], never floating point.
#[ derive( Debug, Clone, Serialize, Deserialize ) ]
pub struct Run
{
  /// Opaque, client-visible identifier.
  pub id: RunId,
  /// Owning tenant.
  pub tenant_id: TenantId,
  /// Client-supplied idempotency key; unique together with `tenant_id`.
  pub idempotency_key: String,
  /// SHA-256 hex digest of the submitted request payload.
  pub payload_fingerprint: String,
  /// Current lifecycle status.
  pub status: RunStatus,
  /// Current finalize-protocol stage.
  pub finalize_stage: FinalizeStage,
  /// Optimistic concurrency counter, incremented on every mutating transition.
  pub version: i64,
  /// Amount reserved against the tenant's budget at submission time.
  pub reservation: MicroUnits,
  /// Actual cost reported by the pack, once known.
  pub actual_cost: Option< MicroUnits >,
  /// Floor applied to the settled amount (`max(actual_cost, minimum_fee)`).
  pub minimum_fee: MicroUnits,
  /// Opaque token identifying the current lease holder, if any.
  pub lease_token: Option< LeaseToken >,
  /// Lease expiry; past this instant the reaper may reclaim the run.
  pub lease_expires_at: Option< DateTime< Utc > >,
  /// One-shot token minted at phase 1, required to authorize phase 3.
  pub finalize_token: Option< FinalizeToken >,
  /// Object-store bucket holding the result, once uploaded.
  pub result_bucket: Option< String >,
  /// Object-store key holding the result, once uploaded.
  pub result_key: Option< String >,
  /// SHA-256 hex digest of the uploaded result body.
  pub result_fingerprint: Option< String >,
  /// Correlation identifier threaded through queue message and logs.
  pub trace_id: TraceId,
  /// Pack type requested at submission (opaque to the core).
  pub pack_type: String,
  /// Human-readable reason recorded when a run fails (`lease_expired`, ...).
  pub failure_reason: Option< String >,
  /// Submission time.
  pub created_at: DateTime< Utc >,
  /// Time the worker began processing, if it ever did.
  pub started_at: Option< DateTime< Utc > >,
  /// Time the run reached a terminal state, if it has.
  pub completed_at: Option< DateTime< Utc > >,
  /// Past this instant, poll requests receive `410 Gone` for the owner.
  pub retention_expires_at: DateTime< Utc >,
}

/// Money state surfaced on the poll response.
#[ derive( Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize ) ]
#[ serde( rename_all = "snake_case" ) ]
pub enum MoneyState
{
  /// Budget is held but not yet settled.
  Reserved,
  /// Budget has been settled against actual cost.
  Settled,
  /// Reservation was released without a settlement (failed run).
  Refunded,
}

impl Run
{
  /// Derive the poll-response money state from status/finalize stage.
  #[ must_use ]
  pub const fn money_state( &self ) -> MoneyState
  {
    match self.finalize_stage
    {
      FinalizeStage::Committed => MoneyState::Settled,
      _ if matches!( self.status, RunStatus::Failed ) => MoneyState::Refunded,
      _ => MoneyState::Reserved,
    }
  }
}
