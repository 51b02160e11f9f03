//! Command execution pipeline for event-sourced aggregates.
//!
//! ```text
//! Command
//!   ↓
//! 1. Load the stream from the store
//!   ↓
//! 2. Rehydrate the aggregate (apply history in sequence order)
//!   ↓
//! 3. Handle the command (pure decision, produces events)
//!   ↓
//! 4. Append with an optimistic version check (one or many streams)
//!   ↓
//! 5. Publish committed events on the bus
//! ```
//!
//! [`CommandDispatcher::open`] stages commands against one stream without
//! writing; [`CommandDispatcher::commit`] appends any number of staged
//! streams in one store transaction. Billing generation uses this to create
//! every invoice and mark the billing in a single commit.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use levy_core::{Aggregate, AggregateId, DomainError, ExpectedVersion};
use levy_events::{EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, StreamAppend, UncommittedEvent};

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Another writer committed to the stream first.
    #[error("concurrent modification: {0}")]
    Concurrency(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("illegal state transition: {0}")]
    State(String),
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unauthorized")]
    Unauthorized,
    /// Stored payload no longer matches the aggregate event type.
    #[error("failed to deserialize stored event: {0}")]
    Deserialize(String),
    #[error(transparent)]
    Store(EventStoreError),
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency(msg) => DispatchError::Concurrency(msg),
            other => DispatchError::Store(other),
        }
    }
}

impl From<DomainError> for DispatchError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => DispatchError::Validation(msg),
            DomainError::State(msg) => DispatchError::State(msg),
            DomainError::InvariantViolation(msg) => DispatchError::InvariantViolation(msg),
            DomainError::Conflict(msg) => DispatchError::Conflict(msg),
            DomainError::Unauthorized => DispatchError::Unauthorized,
            DomainError::NotFound(what) => DispatchError::NotFound(what),
            DomainError::InvalidId(msg) => DispatchError::Validation(msg),
        }
    }
}

/// Staged changes for one stream, ready to be appended.
#[derive(Debug, Clone)]
pub struct StreamCommit {
    aggregate_id: AggregateId,
    expected: ExpectedVersion,
    events: Vec<UncommittedEvent>,
}

impl StreamCommit {
    pub fn aggregate_id(&self) -> AggregateId {
        self.aggregate_id
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// A rehydrated aggregate plus the events staged against it.
///
/// Staged events are already folded into [`PendingStream::aggregate`], so a
/// later command sees the effect of earlier ones.
#[derive(Debug)]
pub struct PendingStream<A> {
    aggregate_id: AggregateId,
    aggregate_type: String,
    aggregate: A,
    expected: ExpectedVersion,
    staged: Vec<UncommittedEvent>,
}

impl<A> PendingStream<A>
where
    A: Aggregate<Error = DomainError>,
    A::Event: levy_events::Event + Serialize,
{
    pub fn execute(&mut self, command: &A::Command) -> Result<Vec<A::Event>, DispatchError> {
        let events = levy_events::execute(&mut self.aggregate, command)?;
        for ev in &events {
            self.staged.push(UncommittedEvent::from_typed(
                self.aggregate_id,
                self.aggregate_type.clone(),
                Uuid::now_v7(),
                ev,
            )?);
        }
        Ok(events)
    }

    pub fn aggregate(&self) -> &A {
        &self.aggregate
    }

    pub fn into_commit(self) -> StreamCommit {
        StreamCommit {
            aggregate_id: self.aggregate_id,
            expected: self.expected,
            events: self.staged,
        }
    }
}

/// Reusable command execution engine over an [`EventStore`] and an [`EventBus`].
///
/// Events are appended before they are published; a failed append publishes
/// nothing. A publish failure after a successful append is logged and does not
/// fail the command, since the store already holds the truth.
#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Rehydrate an aggregate for reading. Nothing is written.
    pub fn load<A>(&self, aggregate_id: AggregateId, make_aggregate: impl FnOnce(AggregateId) -> A) -> Result<A, DispatchError>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        let history = self.store.load_stream(aggregate_id)?;
        validate_loaded_stream(aggregate_id, &history)?;
        let mut aggregate = make_aggregate(aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;
        Ok(aggregate)
    }

    pub fn open<A>(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<PendingStream<A>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: levy_events::Event + Serialize + DeserializeOwned,
    {
        let aggregate = self.load(aggregate_id, make_aggregate)?;
        Ok(PendingStream {
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            expected: ExpectedVersion::Exact(aggregate.version()),
            aggregate,
            staged: Vec::new(),
        })
    }

    /// Append every staged stream in one transaction, then publish.
    pub fn commit(&self, commits: Vec<StreamCommit>) -> Result<Vec<StoredEvent>, DispatchError> {
        let batch: Vec<StreamAppend> = commits
            .into_iter()
            .filter(|c| !c.is_empty())
            .map(|c| StreamAppend {
                events: c.events,
                expected_version: c.expected,
            })
            .collect();
        if batch.is_empty() {
            return Ok(vec![]);
        }

        let committed = self.store.append_batch(batch)?;
        for stored in &committed {
            if let Err(err) = self.bus.publish(stored.to_envelope()) {
                tracing::warn!(
                    aggregate_id = %stored.aggregate_id,
                    sequence_number = stored.sequence_number,
                    error = ?err,
                    "failed to publish committed event"
                );
            }
        }
        Ok(committed)
    }

    /// Load, decide, append and publish a single command.
    pub fn dispatch<A>(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        command: A::Command,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: levy_events::Event + Serialize + DeserializeOwned,
    {
        let mut pending = self.open(aggregate_id, aggregate_type, make_aggregate)?;
        pending.execute(&command)?;
        self.commit(vec![pending.into_commit()])
    }
}

fn validate_loaded_stream(aggregate_id: AggregateId, stream: &[StoredEvent]) -> Result<(), DispatchError> {
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            ))));
        }
        if e.sequence_number == 0 || e.sequence_number <= last {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                e.sequence_number
            ))));
        }
        last = e.sequence_number;
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), DispatchError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    for stored in history {
        let ev: A::Event = serde_json::from_value(stored.payload.clone())
            .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
        aggregate.apply(&ev);
    }
    Ok(())
}
