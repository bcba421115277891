//! Centralized tracing setup shared by the API, worker, and reaper binaries.
//!
//! Every component calls [`init`] exactly once at startup. Output format is
//! chosen by `DPACK_LOG_FORMAT` (`text` in development, `json` in
//! production); verbosity is driven entirely by the `RUST_LOG` env-filter
//! directive, not by an argument here — operators tune log level without a
//! restart-requiring code change.

use dpack_types::{ RunId, TenantId, TraceId };
use tracing_subscriber::EnvFilter;

/// Output format for the process's log stream.
#[ derive( Debug, Clone, Copy, PartialEq, Eq ) ]
pub enum LogFormat
{
  /// Human-readable text, for local development.
  Text,
  /// Newline-delimited JSON, for production log aggregation.
  Json,
}

impl LogFormat
{
  /// Read the format from `DPACK_LOG_FORMAT`, defaulting to [`LogFormat::Text`].
  #[ must_use ]
  pub fn from_env() -> Self
  {
    match std::env::var( "DPACK_LOG_FORMAT" ).as_deref()
    {
      Ok( "json" ) => Self::Json,
      _ => Self::Text,
    }
  }
}

/// Install the global tracing subscriber. Call once per process.
///
/// # Panics
///
/// Panics if a global subscriber has already been installed — this is a
/// startup-ordering bug in the calling binary, not a recoverable condition.
pub fn init( format: LogFormat )
{
  let filter = EnvFilter::try_from_default_env().unwrap_or_else( | _ | EnvFilter::new( "info" ) );

  let builder = tracing_subscriber::fmt().with_env_filter( filter ).with_target( true );

  match format
  {
    LogFormat::Json => builder.json().init(),
    LogFormat::Text => builder.init(),
  }
}

/// Record a run's admission into the system. Never logs the payload itself
/// — only the fingerprint and size computed by the caller.
pub fn log_run_submitted( run_id: RunId, tenant_id: TenantId, trace_id: TraceId, payload_fingerprint: &str, payload_len: usize )
{
  tracing::info!(
    run_id = %run_id,
    tenant_id = %tenant_id,
    trace_id = %trace_id,
    payload_fingerprint = %payload_fingerprint,
    payload_len,
    "run submitted"
  );
}

/// Record an admission rejected by the rate limiter.
pub fn log_rate_limited( tenant_id: TenantId, window: &str, retry_after_secs: u64 )
{
  tracing::warn!(
    tenant_id = %tenant_id,
    window = %window,
    retry_after_secs,
    "admission rejected: rate limit exceeded"
  );
}

/// Record a worker taking exclusive ownership of a run.
pub fn log_lease_acquired( run_id: RunId, trace_id: TraceId, lease_expires_in_secs: i64 )
{
  tracing::info!(
    run_id = %run_id,
    trace_id = %trace_id,
    lease_expires_in_secs,
    "lease acquired"
  );
}

/// Record a settled run at the end of phase-3 commit.
pub fn log_run_settled( run_id: RunId, tenant_id: TenantId, settled_micros: i64, result_fingerprint: &str )
{
  tracing::info!(
    run_id = %run_id,
    tenant_id = %tenant_id,
    settled_micros,
    result_fingerprint = %result_fingerprint,
    "run settled"
  );
}

/// Record a run settling as a terminal failure — pack error, cost
/// ceiling breach, or an infrastructure failure along the finalize path.
pub fn log_run_failed( run_id: RunId, trace_id: TraceId, reason: &str )
{
  tracing::warn!( run_id = %run_id, trace_id = %trace_id, reason = %reason, "run failed" );
}

/// Record the reaper reclaiming an expired lease.
pub fn log_lease_reclaimed( run_id: RunId, outcome: &str )
{
  tracing::warn!( run_id = %run_id, outcome = %outcome, "lease expired, reclaimed by reaper" );
}

/// Record a run that could not be safely reconciled and now requires
/// operator attention.
pub fn log_audit_required( run_id: RunId, reason: &str )
{
  tracing::error!( run_id = %run_id, reason = %reason, "run marked audit_required" );
}

#[ cfg( test ) ]
mod tests
{
  use super::*;

  #[ test ]
  fn log_format_defaults_to_text_without_env_var()
  {
    std::env::remove_var( "DPACK_LOG_FORMAT" );
    assert_eq!( LogFormat::from_env(), LogFormat::Text );
  }

  #[ test ]
  fn log_format_reads_json_from_env()
  {
    std::env::set_var( "DPACK_LOG_FORMAT", "json" );
    assert_eq!( LogFormat::from_env(), LogFormat::Json );
    std::env::remove_var( "DPACK_LOG_FORMAT" );
  }
}
