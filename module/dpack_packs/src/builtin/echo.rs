//! A pack that returns its input unchanged at a fixed cost. The simplest
//! possible concrete [`crate::DecisionPack`].

use crate::error::Result;
use crate::pack::{ DecisionPack, PackOutput, PackRequest };
use async_trait::async_trait;
use dpack_types::MicroUnits;

/// Echoes the request payload back as the output body.
#[ derive( Debug, Clone ) ]
pub struct EchoPack
{
  cost: MicroUnits,
}

impl EchoPack
{
  /// Build an echo pack that always reports `cost` as its actual cost.
  #[ must_use ]
  pub fn new( cost: MicroUnits ) -> Self
  {
    Self { cost }
  }
}

#[ async_trait ]
impl DecisionPack for EchoPack
{
  fn pack_type( &self ) -> &str
  {
    "echo"
  }

  async fn execute( &self, request: PackRequest ) -> Result< PackOutput >
  {
    Ok( PackOutput { body: request.payload, actual_cost: self.cost } )
  }
}

#[ cfg( test ) ]
mod tests
{
  use super::*;

  #[ tokio::test ]
  async fn echoes_payload_and_reports_fixed_cost()
  {
    let pack = EchoPack::new( MicroUnits::from_micros( 42 ) );
    let request = PackRequest { payload: b"ping".to_vec(), reservation: MicroUnits::from_micros( 1_000 ) };
    let output = pack.execute( request ).await.unwrap();

    assert_eq!( output.body, b"ping" );
    assert_eq!( output.actual_cost, MicroUnits::from_micros( 42 ) );
  }
}
