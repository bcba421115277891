//! Queue errors.

/// Failure modes for [`crate::MessageQueue`] operations.
#[ derive( Debug, thiserror::Error ) ]
pub enum QueueError
{
  /// The message body could not be serialized or a received body could
  /// not be parsed back into [`crate::RunMessage`].
  #[ error( "queue message serialization error: {0}" ) ]
  Serialization( #[ from ] serde_json::Error ),

  /// The receipt handle did not correspond to any in-flight message —
  /// it already expired, was already deleted, or never existed.
  #[ error( "unknown receipt handle" ) ]
  UnknownReceipt,

  /// The underlying transport (SQS, or the in-memory double) failed.
  #[ error( "queue transport error: {0}" ) ]
  Transport( String ),
}

pub type Result< T > = core::result::Result< T, QueueError >;
