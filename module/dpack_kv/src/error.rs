//! Errors surfaced by this crate's Redis-backed primitives.

/// Failure modes for KV operations.
#[ derive( Debug, thiserror::Error ) ]
pub enum KvError
{
  /// The underlying Redis command failed or the connection dropped.
  #[ error( "redis error: {0}" ) ]
  Redis( #[ from ] redis::RedisError ),
}

pub type Result< T > = core::result::Result< T, KvError >;
