//! Object store abstraction carrying pack execution results: the
//! [`ObjectStore`] trait, an S3-backed implementation, and an in-memory
//! test double.

pub mod error;
pub mod in_memory;
pub mod object;
pub mod s3;

pub use error::ObjectStoreError;
pub use in_memory::InMemoryObjectStore;
pub use object::{
  input_object_key, result_object_key, FetchedObject, ObjectStore, ACTUAL_COST_MICROS_METADATA_KEY,
  REQUESTED_TIMEBOX_SEC_METADATA_KEY, RESULT_FINGERPRINT_METADATA_KEY,
};
pub use s3::{ resolve_bucket_target, S3ObjectStore };
