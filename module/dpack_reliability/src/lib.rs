//! Circuit breaker guarding outbound calls to the object store and message
//! queue, so a degraded dependency fails fast instead of piling up retries
//! against it.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{ Duration, Instant };

/// The three states of a single circuit.
#[ derive( Debug, Clone, Copy, PartialEq, Eq ) ]
pub enum CircuitState
{
  /// Calls pass through normally.
  Closed,
  /// Calls are rejected without attempting the underlying operation.
  Open,
  /// One trial call is permitted to decide whether to close or reopen.
  HalfOpen,
}

#[ derive( Debug, Clone ) ]
struct Circuit
{
  state: CircuitState,
  consecutive_failures: u32,
  opened_at: Instant,
  half_open_probe_in_flight: bool,
}

impl Circuit
{
  fn closed() -> Self
  {
    Self { state: CircuitState::Closed, consecutive_failures: 0, opened_at: Instant::now(), half_open_probe_in_flight: false }
  }
}

/// Whether a caller should attempt the guarded operation.
#[ derive( Debug, Clone, Copy, PartialEq, Eq ) ]
pub enum Admission
{
  /// Proceed normally.
  Allowed,
  /// Proceed as the single half-open probe; report the outcome promptly.
  Probe,
  /// Do not attempt the call; fail fast.
  Rejected,
}

/// Per-service circuit breaker. One instance is shared (behind an `Arc`)
/// across all callers of a given downstream dependency.
#[ derive( Debug ) ]
pub struct CircuitBreaker
{
  circuits: Mutex< HashMap< String, Circuit > >,
  failure_threshold: u32,
  open_timeout: Duration,
}

impl CircuitBreaker
{
  /// Build a breaker that opens after `failure_threshold` consecutive
  /// failures and stays open for `open_timeout_secs` before allowing a
  /// half-open probe.
  #[ must_use ]
  pub fn new( failure_threshold: u32, open_timeout_secs: u64 ) -> Self
  {
    Self
    {
      circuits: Mutex::new( HashMap::new() ),
      failure_threshold,
      open_timeout: Duration::from_secs( open_timeout_secs ),
    }
  }

  /// Decide whether `service` may be called right now.
  #[ must_use ]
  pub fn admit( &self, service: &str ) -> Admission
  {
    let mut circuits = self.circuits.lock().unwrap_or_else( std::sync::PoisonError::into_inner );
    let circuit = circuits.entry( service.to_string() ).or_insert_with( Circuit::closed );

    match circuit.state
    {
      CircuitState::Closed => Admission::Allowed,
      CircuitState::HalfOpen =>
      {
        if circuit.half_open_probe_in_flight
        {
          Admission::Rejected
        }
        else
        {
          circuit.half_open_probe_in_flight = true;
          Admission::Probe
        }
      }
      CircuitState::Open =>
      {
        if circuit.opened_at.elapsed() >= self.open_timeout
        {
          circuit.state = CircuitState::HalfOpen;
          circuit.half_open_probe_in_flight = true;
          Admission::Probe
        }
        else
        {
          Admission::Rejected
        }
      }
    }
  }

  /// Record a successful call. Closes the circuit unconditionally.
  pub fn record_success( &self, service: &str )
  {
    let mut circuits = self.circuits.lock().unwrap_or_else( std::sync::PoisonError::into_inner );
    circuits.insert( service.to_string(), Circuit::closed() );
  }

  /// Record a failed call. Trips the circuit open once
  /// `failure_threshold` consecutive failures accumulate, or immediately
  /// reopens a half-open probe that failed.
  pub fn record_failure( &self, service: &str )
  {
    let mut circuits = self.circuits.lock().unwrap_or_else( std::sync::PoisonError::into_inner );
    let circuit = circuits.entry( service.to_string() ).or_insert_with( Circuit::closed );

    circuit.half_open_probe_in_flight = false;
    circuit.consecutive_failures += 1;

    if circuit.state == CircuitState::HalfOpen || circuit.consecutive_failures >= self.failure_threshold
    {
      circuit.state = CircuitState::Open;
      circuit.opened_at = Instant::now();
      tracing::warn!( service, consecutive_failures = circuit.consecutive_failures, "circuit opened" );
    }
  }

  /// Current state, for health/readiness reporting.
  #[ must_use ]
  pub fn state_of( &self, service: &str ) -> CircuitState
  {
    let circuits = self.circuits.lock().unwrap_or_else( std::sync::PoisonError::into_inner );
    circuits.get( service ).map_or( CircuitState::Closed, | c | c.state )
  }
}

#[ cfg( test ) ]
mod tests
{
  use super::*;

  #[ test ]
  fn closed_by_default()
  {
    let cb = CircuitBreaker::new( 3, 60 );
    assert_eq!( cb.admit( "s3" ), Admission::Allowed );
  }

  #[ test ]
  fn opens_after_threshold_failures()
  {
    let cb = CircuitBreaker::new( 3, 60 );
    cb.record_failure( "s3" );
    cb.record_failure( "s3" );
    assert_eq!( cb.admit( "s3" ), Admission::Allowed );
    cb.record_failure( "s3" );
    assert_eq!( cb.admit( "s3" ), Admission::Rejected );
  }

  #[ test ]
  fn half_open_probe_after_timeout()
  {
    let cb = CircuitBreaker::new( 1, 0 );
    cb.record_failure( "s3" );
    assert_eq!( cb.admit( "s3" ), Admission::Probe );
    assert_eq!( cb.admit( "s3" ), Admission::Rejected, "second caller must not also probe" );
  }

  #[ test ]
  fn successful_probe_closes_circuit()
  {
    let cb = CircuitBreaker::new( 1, 0 );
    cb.record_failure( "s3" );
    assert_eq!( cb.admit( "s3" ), Admission::Probe );
    cb.record_success( "s3" );
    assert_eq!( cb.state_of( "s3" ), CircuitState::Closed );
    assert_eq!( cb.admit( "s3" ), Admission::Allowed );
  }

  #[ test ]
  fn failed_probe_reopens_circuit()
  {
    let cb = CircuitBreaker::new( 1, 0 );
    cb.record_failure( "s3" );
    assert_eq!( cb.admit( "s3" ), Admission::Probe );
    cb.record_failure( "s3" );
    assert_eq!( cb.state_of( "s3" ), CircuitState::Open );
  }

  #[ test ]
  fn circuits_are_independent_per_service()
  {
    let cb = CircuitBreaker::new( 1, 60 );
    cb.record_failure( "s3" );
    assert_eq!( cb.admit( "s3" ), Admission::Rejected );
    assert_eq!( cb.admit( "sqs" ), Admission::Allowed );
  }
}
