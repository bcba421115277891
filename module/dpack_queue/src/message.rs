//! The wire shape of a queue message: just enough to let the worker pull
//! the full run out of the ledger. The queue carries a handoff, not the
//! payload — the ledger and the submitted request body are the sources of
//! truth for everything else.

use chrono::{ DateTime, Utc };
use dpack_types::{ RunId, TenantId, TraceId };
use serde::{ Deserialize, Serialize };

/// Current wire shape of [`RunMessage`]. Carried on every message so a
/// worker fleet mid-rollout can tell an old-shape message apart from a
/// new one; unknown fields are ignored on decode to let the schema grow
/// without a coordinated deploy.
pub const RUN_MESSAGE_SCHEMA_VERSION: u32 = 1;

/// A work handoff enqueued by the API on successful admission.
#[ derive( Debug, Clone, PartialEq, Eq, Serialize, Deserialize ) ]
pub struct RunMessage
{
  pub run_id: RunId,
  pub tenant_id: TenantId,
  pub pack_type: String,
  /// When the API enqueued this message, per the admission clock — not
  /// sourced from `Utc::now()` here, so replaying a captured message in a
  /// test carries a stable, caller-chosen timestamp.
  pub enqueued_at: DateTime< Utc >,
  pub schema_version: u32,
  pub trace_id: TraceId,
}

/// A message pulled off the queue, still holding the transport's receipt
/// handle — the token required to delete or extend the message's
/// invisibility.
#[ derive( Debug, Clone ) ]
pub struct ReceivedMessage
{
  pub receipt_handle: String,
  pub body: RunMessage,
}
