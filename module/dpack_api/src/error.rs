//! `application/problem+json` error responses.
//!
//! Every non-2xx response carries the same document shape regardless of
//! which stage of the admission pipeline rejected the request, so a client
//! never has to special-case the rate limiter's error body against the
//! ledger's.

use axum::http::{ HeaderValue, StatusCode };
use axum::response::{ IntoResponse, Response };
use axum::Json;
use dpack_types::{ MicroUnits, TraceId };
use serde::Serialize;

/// RFC 7807 problem document.
#[ derive( Debug, Clone, Serialize ) ]
pub struct Problem
{
  #[ serde( rename = "type" ) ]
  pub problem_type: String,
  pub title: String,
  pub status: u16,
  pub detail: String,
  pub instance: String,
  pub reason_code: String,
  #[ serde( skip_serializing_if = "Option::is_none" ) ]
  pub trace_id: Option< String >,
  #[ serde( skip_serializing_if = "Option::is_none" ) ]
  pub violated_policies: Option< Vec< String > >,
}

/// Every way a request can be rejected, from malformed input through
/// downstream infrastructure failure.
#[ derive( Debug, thiserror::Error ) ]
pub enum ApiError
{
  /// The request body or a required field failed validation.
  #[ error( "invalid request: {0}" ) ]
  InvalidPayload( String ),

  /// No bearer credential was presented, or it does not resolve to an
  /// active key.
  #[ error( "missing or invalid bearer credential" ) ]
  Unauthenticated,

  /// The run does not exist, or exists but is owned by a different
  /// tenant — the two cases are indistinguishable on the wire by design.
  #[ error( "run not found" ) ]
  NotFound,

  /// The run existed but its retention window has elapsed.
  #[ error( "run result retention window has elapsed" ) ]
  Gone,

  /// The tenant's requests-per-minute ceiling was exceeded.
  #[ error( "rate limit exceeded" ) ]
  RateLimited
  {
    /// Seconds the client should wait before retrying.
    retry_after_secs: u64,
    /// Name of the exceeded policy, surfaced in `x-ratelimit-policy`.
    policy: String,
  },

  /// The requested reservation exceeds the tenant's remaining budget.
  #[ error( "insufficient budget: requested {requested}, {available} available" ) ]
  InsufficientBudget
  {
    /// Amount remaining after open reservations and settlements.
    available: MicroUnits,
    /// Amount the request asked to reserve.
    requested: MicroUnits,
  },

  /// The `(tenant, idempotency_key)` pair is already in use by a request
  /// whose fingerprint does not match this one.
  #[ error( "idempotency key reused with a different payload" ) ]
  IdempotencyConflict,

  /// `pack_type` has no registered implementation.
  #[ error( "unknown pack type: {0}" ) ]
  UnknownPackType( String ),

  /// The ledger, KV store, queue, or object store failed in a way the
  /// caller cannot resolve by changing the request.
  #[ error( "downstream infrastructure failure: {0}" ) ]
  Infrastructure( String ),
}

impl ApiError
{
  #[ must_use ]
  pub fn status_code( &self ) -> StatusCode
  {
    match self
    {
      Self::InvalidPayload( _ ) | Self::UnknownPackType( _ ) => StatusCode::BAD_REQUEST,
      Self::Unauthenticated => StatusCode::UNAUTHORIZED,
      Self::NotFound => StatusCode::NOT_FOUND,
      Self::Gone => StatusCode::GONE,
      Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
      Self::InsufficientBudget { .. } => StatusCode::PAYMENT_REQUIRED,
      Self::IdempotencyConflict => StatusCode::CONFLICT,
      Self::Infrastructure( _ ) => StatusCode::SERVICE_UNAVAILABLE,
    }
  }

  #[ must_use ]
  pub fn reason_code( &self ) -> &'static str
  {
    match self
    {
      Self::InvalidPayload( _ ) => "invalid_payload",
      Self::Unauthenticated => "unauthenticated",
      Self::NotFound => "not_found",
      Self::Gone => "retention_expired",
      Self::RateLimited { .. } => "rate_limited",
      Self::InsufficientBudget { .. } => "insufficient_budget",
      Self::IdempotencyConflict => "idempotency_conflict",
      Self::UnknownPackType( _ ) => "unknown_pack_type",
      Self::Infrastructure( _ ) => "infrastructure_error",
    }
  }

  #[ must_use ]
  pub fn title( &self ) -> &'static str
  {
    match self
    {
      Self::InvalidPayload( _ ) => "Invalid Request",
      Self::Unauthenticated => "Unauthenticated",
      Self::NotFound => "Not Found",
      Self::Gone => "Gone",
      Self::RateLimited { .. } => "Rate Limit Exceeded",
      Self::InsufficientBudget { .. } => "Insufficient Budget",
      Self::IdempotencyConflict => "Idempotency Conflict",
      Self::UnknownPackType( _ ) => "Unknown Pack Type",
      Self::Infrastructure( _ ) => "Infrastructure Failure",
    }
  }

  /// Policies this error names, if any — surfaced in the problem
  /// document's `violated_policies` array.
  #[ must_use ]
  pub fn violated_policies( &self ) -> Option< Vec< String > >
  {
    match self
    {
      Self::RateLimited { policy, .. } => Some( vec![ policy.clone() ] ),
      Self::InsufficientBudget { .. } => Some( vec![ "monthly_quota_plus_overage".to_string() ] ),
      _ => None,
    }
  }

  /// Render into a full `application/problem+json` response, tagged with
  /// the request path and (if known) the trace identifier.
  #[ must_use ]
  pub fn into_response_with_context( self, instance: &str, trace_id: Option< TraceId > ) -> Response
  {
    let status = self.status_code();
    let problem = Problem
    {
      problem_type: format!( "https://dpack.dev/problems/{}", self.reason_code() ),
      title: self.title().to_string(),
      status: status.as_u16(),
      detail: self.to_string(),
      instance: instance.to_string(),
      reason_code: self.reason_code().to_string(),
      trace_id: trace_id.map( TraceId::to_prefixed_string ),
      violated_policies: self.violated_policies(),
    };

    let mut response = ( status, Json( problem ) ).into_response();

    if let Self::RateLimited { retry_after_secs, policy } = &self
    {
      let headers = response.headers_mut();
      if let Ok( value ) = HeaderValue::from_str( &retry_after_secs.to_string() )
      {
        headers.insert( "retry-after", value );
      }
      if let Ok( value ) = HeaderValue::from_str( policy )
      {
        headers.insert( "x-ratelimit-policy", value );
      }
    }

    response
  }
}

impl IntoResponse for ApiError
{
  fn into_response( self ) -> Response
  {
    self.into_response_with_context( "about:blank", None )
  }
}
