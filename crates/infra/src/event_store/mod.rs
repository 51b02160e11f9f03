//! Append-only event store boundary.
//!
//! Streams are keyed by aggregate id. Single-stream appends and multi-stream
//! batches share one optimistic-concurrency contract.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, StreamAppend, UncommittedEvent};
