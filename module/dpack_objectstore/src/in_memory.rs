//! In-memory [`ObjectStore`] test double. Not behind a test-only guard —
//! `dpack_worker`'s and `dpack_reaper`'s own integration tests construct
//! one directly, the same way they'd wire up `S3ObjectStore` in production.

use crate::error::{ ObjectStoreError, Result };
use crate::object::{ FetchedObject, ObjectStore };
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// An object store backed by an in-process map, keyed on `bucket/key`.
#[ derive( Debug, Default ) ]
pub struct InMemoryObjectStore
{
  objects: Mutex< HashMap< String, FetchedObject > >,
}

impl InMemoryObjectStore
{
  /// An empty store.
  #[ must_use ]
  pub fn new() -> Self
  {
    Self::default()
  }

  fn object_id( bucket: &str, key: &str ) -> String
  {
    format!( "{bucket}/{key}" )
  }
}

#[ async_trait ]
impl ObjectStore for InMemoryObjectStore
{
  async fn put( &self, bucket: &str, key: &str, body: Vec< u8 >, metadata: HashMap< String, String > ) -> Result< () >
  {
    self.objects
      .lock()
      .unwrap_or_else( std::sync::PoisonError::into_inner )
      .insert( Self::object_id( bucket, key ), FetchedObject { body, metadata } );
    Ok( () )
  }

  async fn get( &self, bucket: &str, key: &str ) -> Result< FetchedObject >
  {
    self.objects
      .lock()
      .unwrap_or_else( std::sync::PoisonError::into_inner )
      .get( &Self::object_id( bucket, key ) )
      .cloned()
      .ok_or( ObjectStoreError::NotFound )
  }

  async fn head( &self, bucket: &str, key: &str ) -> Result< HashMap< String, String > >
  {
    self.get( bucket, key ).await.map( | object | object.metadata )
  }

  async fn exists( &self, bucket: &str, key: &str ) -> Result< bool >
  {
    Ok(
      self.objects
        .lock()
        .unwrap_or_else( std::sync::PoisonError::into_inner )
        .contains_key( &Self::object_id( bucket, key ) )
    )
  }
}

#[ cfg( test ) ]
mod tests
{
  use super::*;
  use crate::object::ACTUAL_COST_MICROS_METADATA_KEY;

  #[ tokio::test ]
  async fn put_then_get_round_trips_body_and_metadata()
  {
    let store = InMemoryObjectStore::new();
    let mut metadata = HashMap::new();
    metadata.insert( ACTUAL_COST_MICROS_METADATA_KEY.to_string(), "870000".to_string() );

    store.put( "results", "run-1/output.json", b"{}".to_vec(), metadata ).await.unwrap();

    let fetched = store.get( "results", "run-1/output.json" ).await.unwrap();
    assert_eq!( fetched.body, b"{}" );
    assert_eq!( fetched.metadata.get( ACTUAL_COST_MICROS_METADATA_KEY ), Some( &"870000".to_string() ) );
  }

  #[ tokio::test ]
  async fn head_returns_metadata_without_requiring_body_inspection()
  {
    let store = InMemoryObjectStore::new();
    let mut metadata = HashMap::new();
    metadata.insert( ACTUAL_COST_MICROS_METADATA_KEY.to_string(), "123".to_string() );
    store.put( "results", "run-2/output.json", b"payload".to_vec(), metadata ).await.unwrap();

    let head = store.head( "results", "run-2/output.json" ).await.unwrap();
    assert_eq!( head.get( ACTUAL_COST_MICROS_METADATA_KEY ), Some( &"123".to_string() ) );
  }

  #[ tokio::test ]
  async fn missing_object_is_not_found()
  {
    let store = InMemoryObjectStore::new();
    let err = store.get( "results", "nonexistent" ).await.unwrap_err();
    assert!( matches!( err, ObjectStoreError::NotFound ) );
  }

  #[ tokio::test ]
  async fn exists_reflects_put_objects_only()
  {
    let store = InMemoryObjectStore::new();
    assert!( !store.exists( "results", "run-3/output.json" ).await.unwrap() );

    store.put( "results", "run-3/output.json", Vec::new(), HashMap::new() ).await.unwrap();
    assert!( store.exists( "results", "run-3/output.json" ).await.unwrap() );
  }
}
