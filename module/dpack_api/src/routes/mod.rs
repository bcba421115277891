//! Route handlers, grouped by resource.

pub mod health;
pub mod runs;
pub mod usage;

use crate::state::AppState;
use axum::routing::{ get, post };
use axum::Router;

/// Assemble the full router. CORS and tracing layers are applied by the
/// caller, which also owns the listener and graceful-shutdown signal.
#[ must_use ]
pub fn router( state: AppState ) -> Router
{
  Router::new()
    .route( "/healthz", get( health::healthz ) )
    .route( "/readyz", get( health::readyz ) )
    .route( "/v1/runs", post( runs::submit ) )
    .route( "/v1/runs/:id", get( runs::poll ) )
    .route( "/v1/usage", get( usage::usage ) )
    .with_state( state )
}
