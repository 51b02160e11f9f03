//! Service wiring shared by every handler, plus the background tasks the API
//! process runs: the bus → SSE bridge and the optional overdue sweep.

use std::{convert::Infallible, sync::Arc, time::Duration};

use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use chrono::Utc;
use serde_json::Value as JsonValue;
use tokio::sync::broadcast;
use tokio_stream::{StreamExt, wrappers::BroadcastStream};

use levy_events::{EventBus, EventEnvelope};
use levy_infra::BillingServices;

/// Realtime message broadcast to SSE subscribers.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RealtimeMessage {
    pub topic: String,
    pub payload: JsonValue,
}

impl RealtimeMessage {
    fn from_envelope(envelope: &EventEnvelope<JsonValue>) -> Self {
        Self {
            topic: envelope.aggregate_type().to_string(),
            payload: serde_json::json!({
                "event_id": envelope.event_id().to_string(),
                "aggregate_id": envelope.aggregate_id().to_string(),
                "sequence_number": envelope.sequence_number(),
                "event_type": event_type(envelope.payload()),
            }),
        }
    }
}

/// Externally tagged events serialize as `{"PaymentRegistered": {...}}`.
fn event_type(payload: &JsonValue) -> Option<&str> {
    payload.as_object()?.keys().next().map(String::as_str)
}

#[derive(Debug, Clone)]
pub struct AppServices {
    pub billing: Arc<BillingServices>,
    realtime_tx: broadcast::Sender<RealtimeMessage>,
}

impl AppServices {
    /// Wire the services and start forwarding committed events to SSE
    /// subscribers.
    pub fn new(billing: Arc<BillingServices>) -> Self {
        let (realtime_tx, _) = broadcast::channel(1024);
        spawn_realtime_bridge(&billing, realtime_tx.clone());
        Self { billing, realtime_tx }
    }

    pub fn realtime_tx(&self) -> &broadcast::Sender<RealtimeMessage> {
        &self.realtime_tx
    }
}

/// The bus hands out blocking receivers, so the bridge runs on its own
/// thread. It ends when the bus is dropped.
fn spawn_realtime_bridge(billing: &BillingServices, tx: broadcast::Sender<RealtimeMessage>) {
    let subscription = billing.event_bus().subscribe();
    let spawned = std::thread::Builder::new()
        .name("levy-realtime".to_string())
        .spawn(move || {
            while let Ok(envelope) = subscription.recv() {
                // Lossy: no subscribers, or a lagging one, never blocks commits.
                let _ = tx.send(RealtimeMessage::from_envelope(&envelope));
            }
            tracing::debug!("event bus closed; realtime bridge stopped");
        });
    if let Err(e) = spawned {
        tracing::error!(error = %e, "failed to start realtime bridge; SSE stream will stay silent");
    }
}

pub fn realtime_sse_stream(
    services: Arc<AppServices>,
) -> Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = services.realtime_tx().subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|msg| match msg {
        Ok(m) => {
            let data = serde_json::to_string(&m.payload).unwrap_or_else(|_| "{}".to_string());
            Some(Ok(SseEvent::default().event(m.topic).data(data)))
        }
        Err(_lagged) => None,
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

/// Run the overdue sweep every `interval`, using the UTC date at each tick.
pub fn spawn_overdue_sweep(billing: Arc<BillingServices>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let sweep = billing.mark_overdue_invoices(Utc::now().date_naive());
            if !sweep.failed.is_empty() {
                tracing::warn!(failed = sweep.failed.len(), "scheduled overdue sweep had failures");
            }
        }
    })
}
