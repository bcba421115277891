//! Object store errors.

/// Failure modes for [`crate::ObjectStore`] operations.
#[ derive( Debug, thiserror::Error ) ]
pub enum ObjectStoreError
{
  /// No object exists at the given bucket/key.
  #[ error( "object not found" ) ]
  NotFound,

  /// The underlying transport (S3, or the in-memory double) failed.
  #[ error( "object store transport error: {0}" ) ]
  Transport( String ),
}

pub type Result< T > = core::result::Result< T, ObjectStoreError >;
