//! Worker-local error aggregation.
//!
//! Every variant here is caught and logged inside a single run's
//! processing — nothing propagates out of [`crate::worker::Worker::run_forever`]
//! on account of one run misbehaving.

/// Failures that can surface while driving a single run through the
/// finalize protocol.
#[ derive( Debug, thiserror::Error ) ]
pub enum WorkerError
{
  /// A ledger round-trip failed outright (not a CAS conflict, which
  /// callers handle inline).
  #[ error( "ledger error: {0}" ) ]
  Ledger( #[ from ] dpack_ledger::LedgerError ),

  /// The reservation index or rate limiter's Redis round-trip failed.
  #[ error( "kv error: {0}" ) ]
  Kv( #[ from ] dpack_kv::KvError ),

  /// The queue transport failed.
  #[ error( "queue error: {0}" ) ]
  Queue( #[ from ] dpack_queue::QueueError ),

  /// The object store transport failed.
  #[ error( "object store error: {0}" ) ]
  ObjectStore( #[ from ] dpack_objectstore::ObjectStoreError ),

  /// Pack dispatch, timeout, or cost-ceiling failure.
  #[ error( "pack error: {0}" ) ]
  Pack( #[ from ] dpack_packs::PackError ),
}

pub type Result< T > = core::result::Result< T, WorkerError >;
