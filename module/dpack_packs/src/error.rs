//! Pack execution errors.

/// Failure modes for a [`crate::DecisionPack`] invocation.
#[ derive( Debug, thiserror::Error ) ]
pub enum PackError
{
  /// No pack is registered under the requested pack type.
  #[ error( "unknown pack type: {0}" ) ]
  UnknownPackType( String ),

  /// Execution ran past its time budget and was cancelled.
  #[ error( "pack execution timed out after {0:?}" ) ]
  Timeout( std::time::Duration ),

  /// The pack itself reported a failure executing the payload.
  #[ error( "pack execution failed: {0}" ) ]
  ExecutionFailed( String ),

  /// The pack reported an actual cost exceeding the caller's reservation —
  /// a pack bug, since packs are contracted to stay within it.
  #[ error( "pack reported actual cost {actual} exceeding reservation {reservation}" ) ]
  CostExceedsReservation
  {
    actual: dpack_types::MicroUnits,
    reservation: dpack_types::MicroUnits,
  },
}

pub type Result< T > = core::result::Result< T, PackError >;
