//! The [`DecisionPack`] trait: an opaque function from a request payload
//! to an output blob and an authoritative actual cost. The platform never
//! looks inside a pack's payload or output — it only enforces that the
//! reported cost stays within the caller's reservation.

use crate::error::Result;
use async_trait::async_trait;
use dpack_types::MicroUnits;

/// Input handed to a pack invocation.
#[ derive( Debug, Clone ) ]
pub struct PackRequest
{
  /// Raw request payload, opaque to everything outside the pack itself.
  pub payload: Vec< u8 >,
  /// Upper bound the pack's reported cost must not exceed.
  pub reservation: MicroUnits,
}

/// Output of a successful pack invocation.
#[ derive( Debug, Clone ) ]
pub struct PackOutput
{
  /// Raw output payload, opaque to everything outside the pack itself.
  pub body: Vec< u8 >,
  /// Authoritative actual cost of this execution, in micro-units.
  pub actual_cost: MicroUnits,
}

/// An opaque, pluggable unit of billable compute.
///
/// Implementations must be side-effect-free with respect to the platform's
/// own money-safety protocol: a pack reports its actual cost once, at the
/// end of a successful `execute`, and never mutates ledger state itself.
#[ async_trait ]
pub trait DecisionPack: Send + Sync
{
  /// Stable identifier this pack is registered under (`"summarize-v1"`,
  /// and so on). Matched against a run's `pack_type` at dispatch time.
  fn pack_type( &self ) -> &str;

  /// Run the pack against `request`, producing an output blob and the
  /// actual cost. Implementations are responsible for enforcing their own
  /// internal timeouts where that makes sense; the caller additionally
  /// enforces the run's overall time budget via [`crate::registry::PackRegistry::execute`].
  async fn execute( &self, request: PackRequest ) -> Result< PackOutput >;
}
