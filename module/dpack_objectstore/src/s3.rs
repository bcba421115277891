//! S3-backed [`ObjectStore`].
//!
//! Credentials are never hardcoded in the production path: `aws-config`
//! resolves them from the ambient runtime environment, the same way
//! `dpack_queue`'s SQS client does. The carve-out is a configured bucket
//! value that resolves to a localhost-shaped endpoint (MinIO, LocalStack)
//! — there, `connect` targets that endpoint directly with static
//! local-dev credentials, and path-style addressing, since a virtual-host
//! bucket URL has nothing to resolve against on localhost.

use crate::error::{ ObjectStoreError, Result };
use crate::object::{ FetchedObject, ObjectStore };
use async_trait::async_trait;
use aws_sdk_s3::config::{ Builder, Credentials, Region };
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use std::collections::HashMap;

/// Object store backed by a real S3 bucket (or an S3-compatible endpoint).
#[ derive( Debug, Clone ) ]
pub struct S3ObjectStore
{
  client: Client,
}

fn is_localhost_shaped( target: &str ) -> bool
{
  let lower = target.to_ascii_lowercase();
  lower.contains( "localhost" ) || lower.contains( "127.0.0.1" ) || lower.contains( "[::1]" )
}

/// Splits a configured bucket value into the bare bucket name S3 API calls
/// address and, when the value points at a localhost-shaped endpoint, the
/// endpoint to dial instead of the ambient AWS one.
///
/// `raw` is a plain `my-bucket` name in production. For a local
/// S3-compatible target it takes the form
/// `http://localhost:9000/my-bucket`; any other shape passes through
/// unchanged as the bucket name with no endpoint override.
#[ must_use ]
pub fn resolve_bucket_target( raw: &str ) -> ( String, Option< String > )
{
  if !raw.contains( "://" ) || !is_localhost_shaped( raw )
  {
    return ( raw.to_string(), None );
  }

  let Some( ( scheme, rest ) ) = raw.split_once( "://" ) else { return ( raw.to_string(), None ) };
  match rest.split_once( '/' )
  {
    Some( ( host, path ) ) if !path.is_empty() => ( path.to_string(), Some( format!( "{scheme}://{host}" ) ) ),
    _ => ( raw.to_string(), None ),
  }
}

impl S3ObjectStore
{
  /// Build a client. When `endpoint` is `Some`, the client dials that
  /// endpoint directly with static local-dev credentials and path-style
  /// addressing; otherwise credentials and endpoint resolution both come
  /// from the ambient AWS configuration. Pair with [`resolve_bucket_target`]
  /// to derive `endpoint` from a configured bucket value.
  pub async fn connect( endpoint: Option< &str > ) -> Self
  {
    if let Some( url ) = endpoint
    {
      let credentials = Credentials::new( "local", "local", None, None, "dpack-local-dev" );
      let config = Builder::new()
        .behavior_version( aws_config::BehaviorVersion::latest() )
        .region( Region::new( "us-east-1" ) )
        .endpoint_url( url )
        .credentials_provider( credentials )
        .force_path_style( true )
        .build();
      return Self { client: Client::from_conf( config ) };
    }

    let config = aws_config::load_defaults( aws_config::BehaviorVersion::latest() ).await;
    Self { client: Client::new( &config ) }
  }
}

#[ cfg( test ) ]
mod connect_tests
{
  use super::*;

  #[ test ]
  fn plain_bucket_name_has_no_endpoint_override()
  {
    assert_eq!( resolve_bucket_target( "dpack-results" ), ( "dpack-results".to_string(), None ) );
  }

  #[ test ]
  fn localhost_url_splits_into_bucket_and_endpoint()
  {
    assert_eq!(
      resolve_bucket_target( "http://localhost:9000/dpack-results" ),
      ( "dpack-results".to_string(), Some( "http://localhost:9000".to_string() ) ),
    );
  }

  #[ test ]
  fn production_bucket_url_without_localhost_is_passed_through()
  {
    let raw = "https://dpack-results.s3.us-east-1.amazonaws.com/dpack-results";
    assert_eq!( resolve_bucket_target( raw ), ( raw.to_string(), None ) );
  }
}

#[ async_trait ]
impl ObjectStore for S3ObjectStore
{
  async fn put( &self, bucket: &str, key: &str, body: Vec< u8 >, metadata: HashMap< String, String > ) -> Result< () >
  {
    let mut request = self.client
      .put_object()
      .bucket( bucket )
      .key( key )
      .body( ByteStream::from( body ) );
    for ( meta_key, meta_value ) in metadata
    {
      request = request.metadata( meta_key, meta_value );
    }
    request.send().await.map_err( | e | ObjectStoreError::Transport( e.to_string() ) )?;
    Ok( () )
  }

  async fn get( &self, bucket: &str, key: &str ) -> Result< FetchedObject >
  {
    let response = self.client
      .get_object()
      .bucket( bucket )
      .key( key )
      .send()
      .await
      .map_err( | e | map_get_error( e ) )?;

    let metadata = response.metadata().cloned().unwrap_or_default();
    let body = response
      .body
      .collect()
      .await
      .map_err( | e | ObjectStoreError::Transport( e.to_string() ) )?
      .into_bytes()
      .to_vec();

    Ok( FetchedObject { body, metadata } )
  }

  async fn head( &self, bucket: &str, key: &str ) -> Result< HashMap< String, String > >
  {
    let response = self.client
      .head_object()
      .bucket( bucket )
      .key( key )
      .send()
      .await
      .map_err( | e | map_head_error( e ) )?;

    Ok( response.metadata().cloned().unwrap_or_default() )
  }

  async fn exists( &self, bucket: &str, key: &str ) -> Result< bool >
  {
    match self.head( bucket, key ).await
    {
      Ok( _ ) => Ok( true ),
      Err( ObjectStoreError::NotFound ) => Ok( false ),
      Err( other ) => Err( other ),
    }
  }
}

fn map_get_error( err: aws_sdk_s3::error::SdkError< aws_sdk_s3::operation::get_object::GetObjectError > ) -> ObjectStoreError
{
  if let aws_sdk_s3::error::SdkError::ServiceError( service_err ) = &err
  {
    if service_err.err().is_no_such_key()
    {
      return ObjectStoreError::NotFound;
    }
  }
  ObjectStoreError::Transport( err.to_string() )
}

fn map_head_error( err: aws_sdk_s3::error::SdkError< aws_sdk_s3::operation::head_object::HeadObjectError > ) -> ObjectStoreError
{
  if let aws_sdk_s3::error::SdkError::ServiceError( service_err ) = &err
  {
    if service_err.err().is_not_found()
    {
      return ObjectStoreError::NotFound;
    }
  }
  ObjectStoreError::Transport( err.to_string() )
}
