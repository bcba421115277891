//! Micro-unit money type
//!
//! All monetary arithmetic in the platform happens in integer micro-units
//! (one-millionth of the billing currency). Floating-point money is never
//! allowed past the HTTP boundary: a decimal-string USD amount is converted
//! to `MicroUnits` exactly once, on the way in.

use serde::{ Deserialize, Serialize };
use std::fmt;

/// Number of micro-units per whole currency unit (e.g. per USD).
pub const MICROS_PER_UNIT: i64 = 1_000_000;

/// An exact monetary amount expressed in micro-units (1/1,000,000 of the
/// billing currency). Backed by `i64`, per the ledger contract's 63-bit
/// column width.
#[ derive( Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize ) ]
#[ serde( transparent ) ]
pub struct MicroUnits( pub i64 );

impl MicroUnits
{
  /// The zero amount.
  pub const ZERO: Self = Self( 0 );

  /// Construct from a raw micro-unit count.
  #[ must_use ]
  pub const fn from_micros( micros: i64 ) -> Self
  {
    Self( micros )
  }

  /// Raw micro-unit count.
  #[ must_use ]
  pub const fn as_micros( self ) -> i64
  {
    self.0
  }

  /// Parse a decimal-string amount (at most four fractional digits) into
  /// exact micro-units. Rejects more than four fractional digits so that
  /// the conversion never silently rounds client-specified money.
  ///
  /// # Errors
  ///
  /// Returns [`MoneyError::Precision`] if the string carries more than four
  /// fractional digits, and [`MoneyError::Malformed`] if it isn't a plain
  /// non-negative decimal number.
  pub fn parse_decimal( input: &str ) -> Result< Self, MoneyError >
  {
    let input = input.trim();
    if input.is_empty() || !input.bytes().all( | b | b.is_ascii_digit() || b == b'.' )
    {
      return Err( MoneyError::Malformed( input.to_string() ) );
    }

    let ( whole, frac ) = match input.split_once( '.' )
    {
      Some( ( w, f ) ) => ( w, f ),
      None => ( input, "" ),
    };

    if frac.len() > 4
    {
      return Err( MoneyError::Precision { fractional_digits: frac.len() } );
    }

    let whole: i64 = if whole.is_empty() { 0 } else {
      whole.parse().map_err( | _ | MoneyError::Malformed( input.to_string() ) )?
    };

    let mut frac_micros: i64 = 0;
    for ( idx, scale ) in [ 100_000_i64, 10_000, 1_000, 100 ].into_iter().enumerate()
    {
      if let Some( digit ) = frac.as_bytes().get( idx )
      {
        frac_micros += i64::from( digit - b'0' ) * scale;
      }
    }

    whole
      .checked_mul( MICROS_PER_UNIT )
      .and_then( | w | w.checked_add( frac_micros ) )
      .map( Self )
      .ok_or( MoneyError::Overflow )
  }

  /// Render as a decimal string with exactly four fractional digits.
  #[ must_use ]
  pub fn to_decimal_string( self ) -> String
  {
    let whole = self.0 / MICROS_PER_UNIT;
    let frac = ( self.0 % MICROS_PER_UNIT ).abs();
    format!( "{whole}.{frac:04}", frac = frac / 100 )
  }

  /// Saturating addition; used for cache aggregates where overflow should
  /// clamp rather than panic or wrap.
  #[ must_use ]
  pub fn saturating_add( self, rhs: Self ) -> Self
  {
    Self( self.0.saturating_add( rhs.0 ) )
  }

  /// Saturating subtraction, floored at zero — used for display-only
  /// balance computations where a negative balance is a caller bug, not a
  /// value we want to propagate.
  #[ must_use ]
  pub fn saturating_sub( self, rhs: Self ) -> Self
  {
    Self( ( self.0 - rhs.0 ).max( 0 ) )
  }

  /// Checked addition.
  #[ must_use ]
  pub fn checked_add( self, rhs: Self ) -> Option< Self >
  {
    self.0.checked_add( rhs.0 ).map( Self )
  }

  /// The greater of two amounts — used for the `max(actual_cost,
  /// minimum_fee)` settlement rule.
  #[ must_use ]
  pub fn max( self, rhs: Self ) -> Self
  {
    if self.0 >= rhs.0 { self } else { rhs }
  }
}

impl fmt::Display for MicroUnits
{
  fn fmt( &self, f: &mut fmt::Formatter< '_ > ) -> fmt::Result
  {
    write!( f, "{}", self.to_decimal_string() )
  }
}

/// Errors raised while parsing or converting monetary amounts.
#[ derive( Debug, thiserror::Error ) ]
pub enum MoneyError
{
  /// Input carried more fractional digits than the platform supports.
  #[ error( "amount has {fractional_digits} fractional digits, at most 4 are allowed" ) ]
  Precision
  {
    /// Number of fractional digits observed in the offending input.
    fractional_digits: usize,
  },

  /// Input was not a plain non-negative decimal number.
  #[ error( "malformed monetary amount: {0:?}" ) ]
  Malformed( String ),

  /// Conversion would overflow the 63-bit micro-unit representation.
  #[ error( "monetary amount overflows 63-bit micro-unit representation" ) ]
  Overflow,
}

#[ cfg( test ) ]
mod tests
{
  use super::*;

  #[ test ]
  fn parses_four_fractional_digits()
  {
    let amount = MicroUnits::parse_decimal( "0.1000" ).unwrap();
    assert_eq!( amount.as_micros(), 100_000 );
  }

  #[ test ]
  fn rejects_five_fractional_digits()
  {
    let err = MicroUnits::parse_decimal( "0.10001" ).unwrap_err();
    assert!( matches!( err, MoneyError::Precision { fractional_digits: 5 } ) );
  }

  #[ test ]
  fn round_trips_whole_and_fraction()
  {
    let amount = MicroUnits::parse_decimal( "12.3400" ).unwrap();
    assert_eq!( amount.as_micros(), 12_340_000 );
    assert_eq!( amount.to_decimal_string(), "12.3400" );
  }

  #[ test ]
  fn rejects_negative_and_garbage()
  {
    assert!( MicroUnits::parse_decimal( "-1.00" ).is_err() );
    assert!( MicroUnits::parse_decimal( "abc" ).is_err() );
    assert!( MicroUnits::parse_decimal( "" ).is_err() );
  }

  #[ test ]
  fn max_picks_larger()
  {
    let a = MicroUnits::from_micros( 100 );
    let b = MicroUnits::from_micros( 200 );
    assert_eq!( a.max( b ), b );
  }
}
