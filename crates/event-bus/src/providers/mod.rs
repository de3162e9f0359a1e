//! Queue transport implementations.
//!
//! Concrete [`QueueTransport`](crate::transport::QueueTransport) backends:
//! an in-process broker and an HTTP client for AWS SQS.

pub mod aws;
pub mod memory;

pub use aws::SqsTransport;
pub use memory::InMemoryTransport;
