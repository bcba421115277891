//! A pack that sleeps for a fixed duration before completing — exercises
//! the registry's time-budget cancellation path.

use crate::error::Result;
use crate::pack::{ DecisionPack, PackOutput, PackRequest };
use async_trait::async_trait;
use dpack_types::MicroUnits;
use std::time::Duration;

/// Sleeps for `delay` then echoes the payload at zero cost.
#[ derive( Debug, Clone ) ]
pub struct SleepPack
{
  delay: Duration,
}

impl SleepPack
{
  /// Build a pack that sleeps for `delay` before returning.
  #[ must_use ]
  pub fn new( delay: Duration ) -> Self
  {
    Self { delay }
  }
}

#[ async_trait ]
impl DecisionPack for SleepPack
{
  fn pack_type( &self ) -> &str
  {
    "sleep"
  }

  async fn execute( &self, request: PackRequest ) -> Result< PackOutput >
  {
    tokio::time::sleep( self.delay ).await;
    Ok( PackOutput { body: request.payload, actual_cost: MicroUnits::ZERO } )
  }
}
