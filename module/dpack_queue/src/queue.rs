//! The [`MessageQueue`] trait: the one seam the Worker depends on, so the
//! SQS-backed implementation and the in-memory test double are
//! interchangeable behind a trait object.

use crate::error::Result;
use crate::message::{ ReceivedMessage, RunMessage };
use async_trait::async_trait;

/// A message queue carrying run handoffs from the API to the Worker.
///
/// Messages are the physical lock on a run: only one worker holds a
/// receipt handle for a given message at a time, enforced by the
/// transport's own visibility/invisibility mechanism, not by this trait.
#[ async_trait ]
pub trait MessageQueue: Send + Sync
{
  /// Enqueue a handoff for a newly admitted run.
  async fn send( &self, message: &RunMessage ) -> Result< () >;

  /// Pull up to `max_messages` messages, each becoming invisible to other
  /// receivers for the transport's default visibility window.
  async fn receive( &self, max_messages: i32 ) -> Result< Vec< ReceivedMessage > >;

  /// Permanently remove a message — call only after the run has reached a
  /// terminal state (or a terminal-equivalent negative acknowledgment).
  async fn delete( &self, receipt_handle: &str ) -> Result< () >;

  /// Extend a message's invisibility window, in lockstep with the
  /// ledger's own lease extension during a heartbeat tick.
  async fn extend_visibility( &self, receipt_handle: &str, timeout_secs: i32 ) -> Result< () >;
}
