//! Reaper-local error aggregation.
//!
//! A single run failing to reconcile is caught and logged inline — it
//! never stops the sweep or reconcile loop from moving on to the next run.

/// Failures that can surface while sweeping expired leases or reconciling
/// stuck claims.
#[ derive( Debug, thiserror::Error ) ]
pub enum ReaperError
{
  /// A ledger round-trip failed outright (not a CAS conflict, which
  /// callers handle inline).
  #[ error( "ledger error: {0}" ) ]
  Ledger( #[ from ] dpack_ledger::LedgerError ),

  /// The reservation index's Redis round-trip failed.
  #[ error( "kv error: {0}" ) ]
  Kv( #[ from ] dpack_kv::KvError ),

  /// The object store transport failed.
  #[ error( "object store error: {0}" ) ]
  ObjectStore( #[ from ] dpack_objectstore::ObjectStoreError ),
}

pub type Result< T > = core::result::Result< T, ReaperError >;
