//! SQS-backed [`MessageQueue`].
//!
//! Credentials are never hardcoded in the production path: `aws-config`
//! resolves them from the ambient runtime environment (instance role, env
//! vars, SSO profile — whatever the deployment provides). The one carve-out
//! is a `queue_url` that resolves to localhost — there, `connect` targets
//! that endpoint directly with static local-dev credentials, since no
//! instance role or SSO profile exists to resolve against a LocalStack or
//! ElasticMQ container.

use crate::error::{ QueueError, Result };
use crate::message::{ ReceivedMessage, RunMessage };
use crate::queue::MessageQueue;
use async_trait::async_trait;
use aws_sdk_sqs::config::{ Builder, Credentials, Region };
use aws_sdk_sqs::Client;

/// Queue backed by a real SQS queue.
#[ derive( Debug, Clone ) ]
pub struct SqsMessageQueue
{
  client: Client,
  queue_url: String,
}

fn is_localhost_shaped( target: &str ) -> bool
{
  let lower = target.to_ascii_lowercase();
  lower.contains( "localhost" ) || lower.contains( "127.0.0.1" ) || lower.contains( "[::1]" )
}

/// Scheme and host:port a full queue URL resolves to, with the queue's own
/// path stripped — the part an SDK client config's `endpoint_url` wants.
fn endpoint_origin( url: &str ) -> Option< String >
{
  let ( scheme, rest ) = url.split_once( "://" )?;
  let host = rest.split( '/' ).next()?;
  if host.is_empty() { None } else { Some( format!( "{scheme}://{host}" ) ) }
}

impl SqsMessageQueue
{
  /// Build a client bound to `queue_url`. When `queue_url` is
  /// localhost-shaped, the client dials that endpoint directly with static
  /// local-dev credentials; otherwise credentials and endpoint resolution
  /// both come from the ambient AWS configuration.
  pub async fn connect( queue_url: &str ) -> Self
  {
    if is_localhost_shaped( queue_url )
    {
      if let Some( endpoint ) = endpoint_origin( queue_url )
      {
        let credentials = Credentials::new( "local", "local", None, None, "dpack-local-dev" );
        let config = Builder::new()
          .behavior_version( aws_config::BehaviorVersion::latest() )
          .region( Region::new( "us-east-1" ) )
          .endpoint_url( endpoint )
          .credentials_provider( credentials )
          .build();
        return Self { client: Client::from_conf( config ), queue_url: queue_url.to_string() };
      }
    }

    let config = aws_config::load_defaults( aws_config::BehaviorVersion::latest() ).await;
    let client = Client::new( &config );
    Self { client, queue_url: queue_url.to_string() }
  }
}

#[ cfg( test ) ]
mod connect_tests
{
  use super::*;

  #[ test ]
  fn localhost_queue_url_resolves_an_origin()
  {
    assert_eq!(
      endpoint_origin( "http://localhost:4566/000000000000/dpack-runs" ),
      Some( "http://localhost:4566".to_string() ),
    );
  }

  #[ test ]
  fn production_queue_url_is_still_localhost_detection_negative()
  {
    assert!( !is_localhost_shaped( "https://sqs.us-east-1.amazonaws.com/123456789012/dpack-runs" ) );
  }

  #[ test ]
  fn loopback_ip_and_ipv6_forms_are_recognized()
  {
    assert!( is_localhost_shaped( "http://127.0.0.1:4566/000000000000/dpack-runs" ) );
    assert!( is_localhost_shaped( "http://[::1]:4566/000000000000/dpack-runs" ) );
  }
}

#[ async_trait ]
impl MessageQueue for SqsMessageQueue
{
  async fn send( &self, message: &RunMessage ) -> Result< () >
  {
    let body = serde_json::to_string( message )?;
    self.client
      .send_message()
      .queue_url( &self.queue_url )
      .message_body( body )
      .send()
      .await
      .map_err( | e | QueueError::Transport( e.to_string() ) )?;
    Ok( () )
  }

  async fn receive( &self, max_messages: i32 ) -> Result< Vec< ReceivedMessage > >
  {
    let response = self.client
      .receive_message()
      .queue_url( &self.queue_url )
      .max_number_of_messages( max_messages )
      .send()
      .await
      .map_err( | e | QueueError::Transport( e.to_string() ) )?;

    response
      .messages
      .unwrap_or_default()
      .into_iter()
      .filter_map( | m |
      {
        let receipt_handle = m.receipt_handle?;
        let raw_body = m.body?;
        Some( ( receipt_handle, raw_body ) )
      } )
      .map( | ( receipt_handle, raw_body ) |
      {
        let body: RunMessage = serde_json::from_str( &raw_body )?;
        Ok( ReceivedMessage { receipt_handle, body } )
      } )
      .collect()
  }

  async fn delete( &self, receipt_handle: &str ) -> Result< () >
  {
    self.client
      .delete_message()
      .queue_url( &self.queue_url )
      .receipt_handle( receipt_handle )
      .send()
      .await
      .map_err( | e | QueueError::Transport( e.to_string() ) )?;
    Ok( () )
  }

  async fn extend_visibility( &self, receipt_handle: &str, timeout_secs: i32 ) -> Result< () >
  {
    self.client
      .change_message_visibility()
      .queue_url( &self.queue_url )
      .receipt_handle( receipt_handle )
      .visibility_timeout( timeout_secs )
      .send()
      .await
      .map_err( | e | QueueError::Transport( e.to_string() ) )?;
    Ok( () )
  }
}
