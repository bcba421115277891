//! Opaque, client-visible identifiers.
//!
//! Every identifier wraps a UUIDv4 so that run/tenant/lease/finalize tokens
//! are unguessable and free of sequential-enumeration leakage (important
//! for the tenant-isolation stealth rule in the poll endpoint).

use serde::{ Deserialize, Serialize };
use std::fmt;
use uuid::Uuid;

macro_rules! opaque_id
{
  ( $name:ident, $prefix:literal ) =>
  {
    #[ derive( Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize ) ]
    #[ serde( transparent ) ]
    pub struct $name( pub Uuid );

    impl $name
    {
      /// Generate a fresh random identifier.
      #[ must_use ]
      pub fn new() -> Self
      {
        Self( Uuid::new_v4() )
      }

      /// Client-facing rendering, prefixed so identifiers are
      /// self-describing in logs (`run_...`, `tenant_...`, ...).
      #[ must_use ]
      pub fn to_prefixed_string( self ) -> String
      {
        format!( "{}_{}", $prefix, self.0 )
      }

      /// Parse back a prefixed or bare UUID string.
      ///
      /// # Errors
      ///
      /// Returns an error if the suffix isn't a valid UUID.
      pub fn parse( input: &str ) -> Result< Self, uuid::Error >
      {
        let tail = input.strip_prefix( concat!( $prefix, "_" ) ).unwrap_or( input );
        Uuid::parse_str( tail ).map( Self )
      }
    }

    impl Default for $name
    {
      fn default() -> Self
      {
        Self::new()
      }
    }

    impl fmt::Display for $name
    {
      fn fmt( &self, f: &mut fmt::Formatter< '_ > ) -> fmt::Result
      {
        write!( f, "{}", self.to_prefixed_string() )
      }
    }
  };
}

opaque_id!( RunId, "run" );
opaque_id!( TenantId, "tenant" );
opaque_id!( ApiKeyId, "key" );
opaque_id!( TraceId, "trace" );
opaque_id!( LeaseToken, "lease" );
opaque_id!( FinalizeToken, "finalize" );

#[ cfg( test ) ]
mod tests
{
  use super::*;

  #[ test ]
  fn prefixed_round_trips()
  {
    let id = RunId::new();
    let rendered = id.to_prefixed_string();
    assert!( rendered.starts_with( "run_" ) );
    assert_eq!( RunId::parse( &rendered ).unwrap(), id );
  }

  #[ test ]
  fn bare_uuid_also_parses()
  {
    let id = RunId::new();
    let bare = id.0.to_string();
    assert_eq!( RunId::parse( &bare ).unwrap(), id );
  }
}
