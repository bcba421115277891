//! Errors surfaced by every repository in this crate.

/// Failure modes for ledger operations.
#[ derive( Debug, thiserror::Error ) ]
pub enum LedgerError
{
  /// No row matched the lookup.
  #[ error( "not found" ) ]
  NotFound,

  /// A compare-and-swap update touched zero rows: the row moved out from
  /// under the caller (lease stolen, status already advanced, stale
  /// version) between the read and the write.
  #[ error( "compare-and-swap conflict: expected state no longer holds" ) ]
  CasConflict,

  /// A `(tenant_id, idempotency_key)` pair was already claimed by another
  /// row. Callers should look up and return the existing run rather than
  /// treating this as a hard failure.
  #[ error( "idempotency key already used" ) ]
  IdempotencyConflict,

  /// Any other database failure, passed through unchanged.
  #[ error( "database error: {0}" ) ]
  Database( #[ from ] sqlx::Error ),
}

pub type Result< T > = core::result::Result< T, LedgerError >;

/// Map a `sqlx::Error` to [`LedgerError::IdempotencyConflict`] when it is a
/// unique-constraint violation, otherwise to [`LedgerError::Database`].
///
/// Centralizing the `is_unique_violation` check here keeps every insert
/// path from having to repeat the database-error downcast.
pub fn classify_insert_error( err: sqlx::Error ) -> LedgerError
{
  if let sqlx::Error::Database( ref db_err ) = err
  {
    if db_err.is_unique_violation()
    {
      return LedgerError::IdempotencyConflict;
    }
  }
  LedgerError::Database( err )
}
