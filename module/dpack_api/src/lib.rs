//! Admission-gated HTTP API for submitting and polling Decision Pack runs.
//!
//! The crate is split the same way the admission pipeline is reasoned
//! about: [`auth`] resolves a bearer credential to a tenant, [`admission`]
//! runs the rate/budget/reservation/ledger/enqueue sequence, and [`routes`]
//! exposes both as HTTP handlers over the shared [`state::AppState`].

pub mod admission;
pub mod auth;
pub mod error;
pub mod routes;
pub mod state;

use axum::http::HeaderValue;
use tower_http::cors::CorsLayer;

/// Build the `CorsLayer` from the configured allow-list.
///
/// A missing or empty `cors.allowed_origins` falls back to permissive
/// access — fine for local development, where there is no cookie-based
/// session to protect. A non-empty list restricts to exactly those
/// origins; entries that fail to parse as header values are dropped
/// rather than rejected, so one typo in the list doesn't take down CORS
/// entirely.
#[ must_use ]
pub fn cors_layer( allowed_origins: &[ String ] ) -> CorsLayer
{
  if allowed_origins.is_empty()
  {
    return CorsLayer::permissive();
  }

  let origins: Vec< HeaderValue > = allowed_origins.iter().filter_map( | origin | origin.parse().ok() ).collect();

  CorsLayer::new()
    .allow_origin( origins )
    .allow_methods( [ axum::http::Method::GET, axum::http::Method::POST ] )
    .allow_headers( [ axum::http::header::CONTENT_TYPE, axum::http::header::AUTHORIZATION, "idempotency-key".parse().unwrap() ] )
}

/// Build the full router, including the CORS layer.
#[ must_use ]
pub fn build_router( state: state::AppState ) -> axum::Router
{
  let cors = cors_layer( &state.config.cors.allowed_origins );
  routes::router( state ).layer( cors ).layer( tower_http::trace::TraceLayer::new_for_http() )
}
