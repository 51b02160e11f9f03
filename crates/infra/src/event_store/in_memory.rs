use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use levy_core::AggregateId;

use super::r#trait::{EventStore, EventStoreError, StoredEvent, StreamAppend};

#[derive(Debug, Default)]
struct Inner {
    streams: HashMap<AggregateId, Vec<StoredEvent>>,
    /// Commit order across streams.
    log: Vec<StoredEvent>,
}

/// In-memory append-only event store for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    inner: RwLock<Inner>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn current_version(stream: &[StoredEvent]) -> u64 {
        stream.last().map(|e| e.sequence_number).unwrap_or(0)
    }
}

fn check_append(
    streams: &HashMap<AggregateId, Vec<StoredEvent>>,
    append: &StreamAppend,
) -> Result<(), EventStoreError> {
    let Some(first) = append.events.first() else {
        return Ok(());
    };
    let aggregate_id = first.aggregate_id;
    let aggregate_type = &first.aggregate_type;

    for (idx, e) in append.events.iter().enumerate() {
        if e.aggregate_id != aggregate_id {
            return Err(EventStoreError::InvalidAppend(format!(
                "stream append mixes aggregate_ids (index {idx})"
            )));
        }
        if &e.aggregate_type != aggregate_type {
            return Err(EventStoreError::AggregateTypeMismatch(format!(
                "stream append mixes aggregate_types (index {idx})"
            )));
        }
    }

    let stream = streams.get(&aggregate_id).map(Vec::as_slice).unwrap_or(&[]);
    let current = InMemoryEventStore::current_version(stream);
    if !append.expected_version.matches(current) {
        return Err(EventStoreError::Concurrency(format!(
            "stream {aggregate_id}: expected {:?}, found {current}",
            append.expected_version
        )));
    }

    if let Some(existing) = stream.first() {
        if &existing.aggregate_type != aggregate_type {
            return Err(EventStoreError::AggregateTypeMismatch(format!(
                "stream aggregate_type is '{}', attempted append with '{}'",
                existing.aggregate_type, aggregate_type
            )));
        }
    }
    Ok(())
}

impl EventStore for InMemoryEventStore {
    fn append_batch(&self, batch: Vec<StreamAppend>) -> Result<Vec<StoredEvent>, EventStoreError> {
        let batch: Vec<StreamAppend> = batch.into_iter().filter(|a| !a.events.is_empty()).collect();
        if batch.is_empty() {
            return Ok(vec![]);
        }

        let mut seen = HashSet::new();
        for append in &batch {
            if !seen.insert(append.events[0].aggregate_id) {
                return Err(EventStoreError::InvalidAppend(format!(
                    "stream {} appears twice in one batch",
                    append.events[0].aggregate_id
                )));
            }
        }

        let mut inner = self
            .inner
            .write()
            .map_err(|_| EventStoreError::Unavailable("lock poisoned".to_string()))?;

        // Validate everything before touching any stream.
        for append in &batch {
            check_append(&inner.streams, append)?;
        }

        let mut committed = Vec::new();
        for append in batch {
            let aggregate_id = append.events[0].aggregate_id;
            let stream = inner.streams.entry(aggregate_id).or_default();
            let mut next = Self::current_version(stream) + 1;
            let mut stored_batch = Vec::with_capacity(append.events.len());
            for e in append.events {
                let stored = StoredEvent {
                    event_id: e.event_id,
                    aggregate_id: e.aggregate_id,
                    aggregate_type: e.aggregate_type,
                    sequence_number: next,
                    event_type: e.event_type,
                    event_version: e.event_version,
                    occurred_at: e.occurred_at,
                    payload: e.payload,
                };
                next += 1;
                stream.push(stored.clone());
                stored_batch.push(stored);
            }
            inner.log.extend(stored_batch.iter().cloned());
            committed.extend(stored_batch);
        }

        Ok(committed)
    }

    fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| EventStoreError::Unavailable("lock poisoned".to_string()))?;

        Ok(inner.streams.get(&aggregate_id).cloned().unwrap_or_default())
    }

    fn load_all(&self) -> Result<Vec<StoredEvent>, EventStoreError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| EventStoreError::Unavailable("lock poisoned".to_string()))?;

        Ok(inner.log.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::UncommittedEvent;
    use chrono::Utc;
    use levy_core::ExpectedVersion;
    use uuid::Uuid;

    fn event(aggregate_id: AggregateId, aggregate_type: &str) -> UncommittedEvent {
        UncommittedEvent {
            event_id: Uuid::now_v7(),
            aggregate_id,
            aggregate_type: aggregate_type.to_string(),
            event_type: "test.happened".to_string(),
            event_version: 1,
            occurred_at: Utc::now(),
            payload: serde_json::json!({}),
        }
    }

    #[test]
    fn sequence_numbers_start_at_one_and_increase() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();
        let first = store
            .append(vec![event(id, "billing.invoice"), event(id, "billing.invoice")], ExpectedVersion::Exact(0))
            .unwrap();
        assert_eq!(first.iter().map(|e| e.sequence_number).collect::<Vec<_>>(), vec![1, 2]);

        let stale = store.append(vec![event(id, "billing.invoice")], ExpectedVersion::Exact(1));
        assert!(matches!(stale, Err(EventStoreError::Concurrency(_))));
        assert_eq!(store.load_stream(id).unwrap().len(), 2);
    }

    #[test]
    fn batch_is_all_or_nothing() {
        let store = InMemoryEventStore::new();
        let taken = AggregateId::new();
        store.append(vec![event(taken, "billing.invoice")], ExpectedVersion::Exact(0)).unwrap();

        let fresh = AggregateId::new();
        let result = store.append_batch(vec![
            StreamAppend { events: vec![event(fresh, "billing.invoice")], expected_version: ExpectedVersion::Exact(0) },
            StreamAppend { events: vec![event(taken, "billing.invoice")], expected_version: ExpectedVersion::Exact(0) },
        ]);

        assert!(matches!(result, Err(EventStoreError::Concurrency(_))));
        assert!(store.load_stream(fresh).unwrap().is_empty());
        assert_eq!(store.load_all().unwrap().len(), 1);
    }

    #[test]
    fn stream_type_is_stable() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();
        store.append(vec![event(id, "billing.invoice")], ExpectedVersion::Any).unwrap();
        let err = store.append(vec![event(id, "billing.billing")], ExpectedVersion::Any).unwrap_err();
        assert!(matches!(err, EventStoreError::AggregateTypeMismatch(_)));
    }

    #[test]
    fn load_all_preserves_commit_order() {
        let store = InMemoryEventStore::new();
        let a = AggregateId::new();
        let b = AggregateId::new();
        store.append(vec![event(a, "billing.invoice")], ExpectedVersion::Any).unwrap();
        store.append(vec![event(b, "billing.invoice")], ExpectedVersion::Any).unwrap();
        store.append(vec![event(a, "billing.invoice")], ExpectedVersion::Any).unwrap();

        let order: Vec<_> = store.load_all().unwrap().iter().map(|e| (e.aggregate_id, e.sequence_number)).collect();
        assert_eq!(order, vec![(a, 1), (b, 1), (a, 2)]);
    }
}
