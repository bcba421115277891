//! Bearer-key hashing and the authenticated-tenant extractor.
//!
//! This is the one place in the platform that ever sees a plaintext API
//! key. `dpack_ledger::TenantRepo` stores and looks up only the digest
//! this module computes — see [`dpack_types::ApiKey`]'s own doc comment.

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use dpack_types::{ ApiKey, Tenant };
use sha2::{ Digest, Sha256 };

/// Compute the salted digest stored in `api_keys.key_hash`.
///
/// The pepper is a server-side secret, not derived from the key itself —
/// an attacker who steals the `api_keys` table still cannot brute-force
/// plaintext keys without also holding the pepper.
#[ must_use ]
pub fn hash_key( pepper: &str, plaintext: &str ) -> String
{
  let mut hasher = Sha256::new();
  hasher.update( pepper.as_bytes() );
  hasher.update( b":" );
  hasher.update( plaintext.as_bytes() );
  hex_encode( &hasher.finalize() )
}

fn hex_encode( bytes: &[ u8 ] ) -> String
{
  bytes.iter().map( | b | format!( "{b:02x}" ) ).collect()
}

/// Bearer token extracted from the `authorization` header, not yet
/// resolved against the ledger.
fn bearer_token( parts: &Parts ) -> Option< &str >
{
  parts
    .headers
    .get( axum::http::header::AUTHORIZATION )
    .and_then( | value | value.to_str().ok() )
    .and_then( | value | value.strip_prefix( "Bearer " ) )
}

/// The tenant and API key resolved from a request's bearer credential.
#[ derive( Debug, Clone ) ]
pub struct AuthenticatedTenant
{
  pub tenant: Tenant,
  pub api_key: ApiKey,
}

#[ async_trait::async_trait ]
impl FromRequestParts< AppState > for AuthenticatedTenant
{
  type Rejection = ApiError;

  async fn from_request_parts( parts: &mut Parts, state: &AppState ) -> Result< Self, Self::Rejection >
  {
    let token = bearer_token( parts ).ok_or( ApiError::Unauthenticated )?;
    let key_hash = hash_key( &state.config.auth.api_key_pepper, token );

    let ( api_key, tenant ) = state
      .tenants
      .find_active_key( &key_hash )
      .await
      .map_err( | _ | ApiError::Unauthenticated )?;

    Ok( Self { tenant, api_key } )
  }
}

#[ cfg( test ) ]
mod tests
{
  use super::*;

  #[ test ]
  fn same_pepper_and_key_hash_identically()
  {
    assert_eq!( hash_key( "pepper", "plaintext" ), hash_key( "pepper", "plaintext" ) );
  }

  #[ test ]
  fn different_peppers_hash_differently()
  {
    assert_ne!( hash_key( "pepper-a", "plaintext" ), hash_key( "pepper-b", "plaintext" ) );
  }

  #[ test ]
  fn hash_is_64_hex_characters()
  {
    let digest = hash_key( "pepper", "plaintext" );
    assert_eq!( digest.len(), 64 );
    assert!( digest.chars().all( | c | c.is_ascii_hexdigit() ) );
  }
}
