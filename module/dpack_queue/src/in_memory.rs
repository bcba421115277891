//! In-memory [`MessageQueue`] test double. Not behind a test-only guard —
//! `dpack_worker`'s and `dpack_api`'s own integration tests construct one
//! directly, the same way they'd wire up `SqsMessageQueue` in production.

use crate::error::{ QueueError, Result };
use crate::message::{ ReceivedMessage, RunMessage };
use crate::queue::MessageQueue;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use uuid::Uuid;

/// A queue backed by an in-process `VecDeque`. Visibility timeouts are not
/// enforced — `receive` always returns whatever is queued, regardless of
/// how recently it was last received — since the fault this crate's tests
/// exercise is worker/reaper logic, not transport-level redelivery timing.
#[ derive( Debug, Default ) ]
pub struct InMemoryQueue
{
  queued: Mutex< VecDeque< ( String, RunMessage ) > >,
}

impl InMemoryQueue
{
  /// An empty queue.
  #[ must_use ]
  pub fn new() -> Self
  {
    Self::default()
  }

  /// Number of messages still queued or in-flight (not yet deleted).
  #[ must_use ]
  pub fn len( &self ) -> usize
  {
    self.queued.lock().unwrap_or_else( std::sync::PoisonError::into_inner ).len()
  }

  /// Whether the queue holds no messages.
  #[ must_use ]
  pub fn is_empty( &self ) -> bool
  {
    self.len() == 0
  }
}

#[ async_trait ]
impl MessageQueue for InMemoryQueue
{
  async fn send( &self, message: &RunMessage ) -> Result< () >
  {
    let receipt_handle = Uuid::new_v4().to_string();
    self.queued
      .lock()
      .unwrap_or_else( std::sync::PoisonError::into_inner )
      .push_back( ( receipt_handle, message.clone() ) );
    Ok( () )
  }

  async fn receive( &self, max_messages: i32 ) -> Result< Vec< ReceivedMessage > >
  {
    let queued = self.queued.lock().unwrap_or_else( std::sync::PoisonError::into_inner );
    Ok(
      queued
        .iter()
        .take( max_messages.max( 0 ) as usize )
        .map( | ( receipt_handle, body ) | ReceivedMessage { receipt_handle: receipt_handle.clone(), body: body.clone() } )
        .collect()
    )
  }

  async fn delete( &self, receipt_handle: &str ) -> Result< () >
  {
    let mut queued = self.queued.lock().unwrap_or_else( std::sync::PoisonError::into_inner );
    let before = queued.len();
    queued.retain( | ( rh, _ ) | rh != receipt_handle );
    if queued.len() == before
    {
      return Err( QueueError::UnknownReceipt );
    }
    Ok( () )
  }

  async fn extend_visibility( &self, receipt_handle: &str, _timeout_secs: i32 ) -> Result< () >
  {
    let queued = self.queued.lock().unwrap_or_else( std::sync::PoisonError::into_inner );
    if queued.iter().any( | ( rh, _ ) | rh == receipt_handle )
    {
      Ok( () )
    }
    else
    {
      Err( QueueError::UnknownReceipt )
    }
  }
}

#[ cfg( test ) ]
mod tests
{
  use super::*;
  use crate::message::RUN_MESSAGE_SCHEMA_VERSION;
  use chrono::Utc;
  use dpack_types::{ RunId, TenantId, TraceId };

  fn sample_message() -> RunMessage
  {
    RunMessage {
      run_id: RunId::new(),
      tenant_id: TenantId::new(),
      pack_type: "echo".to_string(),
      enqueued_at: Utc::now(),
      schema_version: RUN_MESSAGE_SCHEMA_VERSION,
      trace_id: TraceId::new(),
    }
  }

  #[ tokio::test ]
  async fn send_then_receive_round_trips()
  {
    let queue = InMemoryQueue::new();
    let message = sample_message();
    queue.send( &message ).await.unwrap();

    let received = queue.receive( 10 ).await.unwrap();
    assert_eq!( received.len(), 1 );
    assert_eq!( received[ 0 ].body, message );
  }

  #[ tokio::test ]
  async fn delete_removes_the_message()
  {
    let queue = InMemoryQueue::new();
    queue.send( &sample_message() ).await.unwrap();
    let received = queue.receive( 1 ).await.unwrap();

    queue.delete( &received[ 0 ].receipt_handle ).await.unwrap();
    assert!( queue.is_empty() );
  }

  #[ tokio::test ]
  async fn deleting_unknown_receipt_fails()
  {
    let queue = InMemoryQueue::new();
    let err = queue.delete( "nonexistent" ).await.unwrap_err();
    assert!( matches!( err, QueueError::UnknownReceipt ) );
  }

  #[ tokio::test ]
  async fn max_messages_bounds_the_batch()
  {
    let queue = InMemoryQueue::new();
    for _ in 0..5
    {
      queue.send( &sample_message() ).await.unwrap();
    }
    let received = queue.receive( 2 ).await.unwrap();
    assert_eq!( received.len(), 2 );
  }
}
