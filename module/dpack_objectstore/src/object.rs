//! The [`ObjectStore`] trait and the result-object shapes built on top of
//! it.

use crate::error::Result;
use async_trait::async_trait;
use dpack_types::RunId;
use std::collections::HashMap;

/// User-defined metadata key carrying the authoritative actual cost, in
/// micro-units, for a completed pack execution. The reaper's reconcile
/// loop reads this key exclusively — it never re-parses the result body
/// to derive cost, which is what makes roll-forward idempotent.
pub const ACTUAL_COST_MICROS_METADATA_KEY: &str = "actual-cost-usd-micros";

/// User-defined metadata key carrying the caller's requested time budget,
/// in seconds, attached to the input object at submission time. Lets the
/// worker derive the pack's execution timeout without the ledger schema
/// carrying a field for it.
pub const REQUESTED_TIMEBOX_SEC_METADATA_KEY: &str = "requested-timebox-sec";

/// User-defined metadata key carrying the SHA-256 fingerprint of the result
/// body, attached alongside the actual cost at upload time. Lets the
/// reaper's reconcile loop roll a stuck claim forward from `head()` alone.
pub const RESULT_FINGERPRINT_METADATA_KEY: &str = "result-fingerprint-sha256";

/// Deterministic key under which a run's submitted payload is stored. The
/// queue carries only the run id; this is how the worker finds the bytes
/// to hand the pack.
#[ must_use ]
pub fn input_object_key( run_id: RunId ) -> String
{
  format!( "inputs/{}", run_id.to_prefixed_string() )
}

/// Deterministic key under which a run's pack output is stored once phase
/// 2 of finalize uploads it.
#[ must_use ]
pub fn result_object_key( run_id: RunId ) -> String
{
  format!( "results/{}", run_id.to_prefixed_string() )
}

/// An object fetched from the store: its bytes and the metadata map
/// attached at upload time.
#[ derive( Debug, Clone ) ]
pub struct FetchedObject
{
  pub body: Vec< u8 >,
  pub metadata: HashMap< String, String >,
}

/// Object storage carrying pack results and, in their metadata, the
/// authoritative actual cost used for stuck-run reconciliation.
#[ async_trait ]
pub trait ObjectStore: Send + Sync
{
  /// Upload `body` to `bucket`/`key` with the given metadata, overwriting
  /// any existing object at that key.
  async fn put( &self, bucket: &str, key: &str, body: Vec< u8 >, metadata: HashMap< String, String > ) -> Result< () >;

  /// Fetch an object's body and metadata.
  async fn get( &self, bucket: &str, key: &str ) -> Result< FetchedObject >;

  /// Fetch only an object's metadata, without downloading its body — the
  /// reaper's reconcile loop uses this exclusively, to read actual cost
  /// without paying for (or trusting) the full result payload.
  async fn head( &self, bucket: &str, key: &str ) -> Result< HashMap< String, String > >;

  /// Whether an object exists at `bucket`/`key`.
  async fn exists( &self, bucket: &str, key: &str ) -> Result< bool >;
}
