//! A pack that always fails — exercises the worker's failure-marker path
//! without needing a timeout or a cost-exceeded case.

use crate::error::{ PackError, Result };
use crate::pack::{ DecisionPack, PackOutput, PackRequest };
use async_trait::async_trait;

/// Always returns [`PackError::ExecutionFailed`].
#[ derive( Debug, Clone, Default ) ]
pub struct FailingPack
{
  reason: String,
}

impl FailingPack
{
  /// Build a pack that fails every invocation with `reason`.
  #[ must_use ]
  pub fn new( reason: impl Into< String > ) -> Self
  {
    Self { reason: reason.into() }
  }
}

#[ async_trait ]
impl DecisionPack for FailingPack
{
  fn pack_type( &self ) -> &str
  {
    "failing"
  }

  async fn execute( &self, _request: PackRequest ) -> Result< PackOutput >
  {
    Err( PackError::ExecutionFailed( self.reason.clone() ) )
  }
}

#[ cfg( test ) ]
mod tests
{
  use super::*;
  use dpack_types::MicroUnits;

  #[ tokio::test ]
  async fn always_fails_with_the_configured_reason()
  {
    let pack = FailingPack::new( "boom" );
    let request = PackRequest { payload: Vec::new(), reservation: MicroUnits::ZERO };
    let err = pack.execute( request ).await.unwrap_err();
    assert!( matches!( err, PackError::ExecutionFailed( reason ) if reason == "boom" ) );
  }
}
