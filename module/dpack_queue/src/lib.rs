//! Message queue abstraction carrying run handoffs from the API to the
//! Worker: the [`MessageQueue`] trait, an SQS-backed implementation, and
//! an in-memory test double.

pub mod error;
pub mod in_memory;
pub mod message;
pub mod queue;
pub mod sqs;

pub use error::QueueError;
pub use in_memory::InMemoryQueue;
pub use message::{ ReceivedMessage, RunMessage, RUN_MESSAGE_SCHEMA_VERSION };
pub use queue::MessageQueue;
pub use sqs::SqsMessageQueue;
