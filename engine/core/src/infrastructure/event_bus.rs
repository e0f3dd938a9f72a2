// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Event Bus Implementation - Routed Block Events
//
// Delivers events between blocks. Each publish drains a FIFO queue:
// an event is handed to every handler its route resolves to, and whatever the
// handlers emit is appended to the back of the same queue. Events from one
// source therefore reach their targets in emission order.
//
// Routing:
// - explicit `target_block_id` goes straight to that block's handlers
// - otherwise the wiring table maps (source, output type) to targets,
//   possibly renaming the event type on the hop
//
// A failing or panicking handler never escapes the bus; it becomes an
// ErrorEvent published back on the queue. Every processed event is also
// broadcast to observers (CLI, tests) over a tokio broadcast channel.

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

use crate::domain::block::BlockId;
use crate::domain::events::{ErrorEventData, ErrorKind, Event, EventType};

const DEFAULT_MAX_HOPS: usize = 1024;
const MAX_RETAINED_DIAGNOSTICS: usize = 256;

/// Failure reported by an [`EventHandler`]
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct HandlerError {
    pub kind: ErrorKind,
    pub message: String,
}

impl HandlerError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for HandlerError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(ErrorKind::BlockError, format!("{:#}", err))
    }
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Process one delivered event and return the events it emits
    async fn handle(&self, event: Event) -> Result<Vec<Event>, HandlerError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

struct Subscription {
    handle: SubscriptionHandle,
    block_id: BlockId,
    event_type: EventType,
    handler: Arc<dyn EventHandler>,
}

/// One resolved hop: deliver to `target` as `input`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WireRoute {
    pub target: BlockId,
    pub input: EventType,
}

/// `(source block, output type) -> [(target block, input type)]`
#[derive(Debug, Clone, Default)]
pub struct WiringTable {
    routes: HashMap<(BlockId, EventType), Vec<WireRoute>>,
}

impl WiringTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a route; duplicates are ignored. Returns whether it was new.
    pub fn add(&mut self, source: BlockId, output: EventType, target: BlockId, input: EventType) -> bool {
        let routes = self.routes.entry((source, output)).or_default();
        let route = WireRoute { target, input };
        if routes.contains(&route) {
            return false;
        }
        routes.push(route);
        true
    }

    pub fn routes(&self, source: &BlockId, output: &EventType) -> &[WireRoute] {
        self.routes
            .get(&(source.clone(), output.clone()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Whether any route delivers to `target` as `input`
    pub fn has_inbound(&self, target: &BlockId, input: &EventType) -> bool {
        self.routes
            .values()
            .flatten()
            .any(|r| &r.target == target && &r.input == input)
    }

    pub fn len(&self) -> usize {
        self.routes.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// An event that could not be delivered to any handler
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize)]
#[serde(rename_all = "camelCase")]
#[error("Unroutable {event_type} from '{source_block_id}': {reason}")]
pub struct RoutingError {
    pub event_type: EventType,
    pub source_block_id: BlockId,
    pub target_block_id: Option<BlockId>,
    pub reason: String,
}

impl RoutingError {
    pub fn for_event(event: &Event, reason: impl Into<String>) -> Self {
        Self {
            event_type: event.event_type.clone(),
            source_block_id: event.source_block_id.clone(),
            target_block_id: event.target_block_id.clone(),
            reason: reason.into(),
        }
    }
}

/// Result of draining one publish
#[derive(Debug, Clone, Default)]
pub struct PublishReport {
    /// Every event processed, in processing order
    pub events: Vec<Event>,
    pub diagnostics: Vec<RoutingError>,
    /// The drain stopped at `max_hops` with events still queued
    pub truncated: bool,
}

impl PublishReport {
    pub fn errors(&self) -> impl Iterator<Item = &Event> {
        self.events.iter().filter(|e| e.is_error())
    }

    pub fn error_data(&self) -> Vec<ErrorEventData> {
        self.errors().filter_map(Event::error_data).collect()
    }

    pub fn events_of<'a>(&'a self, event_type: &'a EventType) -> impl Iterator<Item = &'a Event> {
        self.events.iter().filter(move |e| &e.event_type == event_type)
    }

    /// Events emitted by `block_id`
    pub fn emitted_by<'a>(&'a self, block_id: &'a BlockId) -> impl Iterator<Item = &'a Event> {
        self.events.iter().filter(move |e| &e.source_block_id == block_id)
    }
}

/// Event bus routing block events to subscribed handlers
pub struct EventBus {
    subscriptions: RwLock<Vec<Subscription>>,
    wiring: RwLock<WiringTable>,
    next_handle: AtomicU64,
    observers: broadcast::Sender<Event>,
    diagnostics: Mutex<VecDeque<RoutingError>>,
    max_hops: usize,
}

impl EventBus {
    /// Create a new event bus; `capacity` bounds the observer channel
    pub fn new(capacity: usize) -> Self {
        let (observers, _) = broadcast::channel(capacity.max(1));
        Self {
            subscriptions: RwLock::new(Vec::new()),
            wiring: RwLock::new(WiringTable::new()),
            next_handle: AtomicU64::new(1),
            observers,
            diagnostics: Mutex::new(VecDeque::new()),
            max_hops: DEFAULT_MAX_HOPS,
        }
    }

    /// Create event bus with default capacity (1000)
    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    /// Bound the number of events one publish may process, so a cyclic
    /// wiring cannot spin forever
    pub fn with_max_hops(mut self, max_hops: usize) -> Self {
        self.max_hops = max_hops.max(1);
        self
    }

    /// Register `handler` for events of `event_type` delivered to `block_id`
    pub fn subscribe(
        &self,
        event_type: EventType,
        block_id: BlockId,
        handler: Arc<dyn EventHandler>,
    ) -> SubscriptionHandle {
        let handle = SubscriptionHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        debug!(event_type = %event_type, block_id = %block_id, "Handler subscribed");
        self.subscriptions.write().push(Subscription {
            handle,
            block_id,
            event_type,
            handler,
        });
        handle
    }

    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        let mut subscriptions = self.subscriptions.write();
        let before = subscriptions.len();
        subscriptions.retain(|s| s.handle != handle);
        subscriptions.len() != before
    }

    /// Add one wiring route
    pub fn wire(&self, source: BlockId, output: EventType, target: BlockId, input: EventType) -> bool {
        self.wiring.write().add(source, output, target, input)
    }

    /// Merge a prebuilt table into the bus wiring
    pub fn extend_wiring(&self, table: WiringTable) {
        let mut wiring = self.wiring.write();
        for ((source, output), routes) in table.routes {
            for route in routes {
                wiring.add(source.clone(), output.clone(), route.target, route.input);
            }
        }
    }

    pub fn routes(&self, source: &BlockId, output: &EventType) -> Vec<WireRoute> {
        self.wiring.read().routes(source, output).to_vec()
    }

    pub fn has_inbound(&self, target: &BlockId, input: &EventType) -> bool {
        self.wiring.read().has_inbound(target, input)
    }

    /// Subscribe to every processed event
    pub fn subscribe_observer(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.observers.subscribe(),
        }
    }

    /// Recent routing diagnostics, oldest first
    pub fn diagnostics(&self) -> Vec<RoutingError> {
        self.diagnostics.lock().iter().cloned().collect()
    }

    /// Publish one event and drain everything it causes
    pub async fn publish(&self, event: Event) -> PublishReport {
        self.publish_all(vec![event]).await
    }

    /// Publish several events, in order, through one drain
    pub async fn publish_all(&self, events: Vec<Event>) -> PublishReport {
        let mut queue: VecDeque<Event> = events.into();
        let mut report = PublishReport::default();

        while let Some(event) = queue.pop_front() {
            if report.events.len() >= self.max_hops {
                warn!(
                    max_hops = self.max_hops,
                    pending = queue.len() + 1,
                    "Event drain stopped at hop limit"
                );
                let diagnostic = RoutingError::for_event(&event, "hop limit reached");
                self.record(&mut report, diagnostic);
                report.truncated = true;
                break;
            }

            metrics::counter!("guardian_events_published_total", "type" => event.event_type.to_string())
                .increment(1);
            // Observers are optional; a send with no receivers is not an error
            let _ = self.observers.send(event.clone());
            report.events.push(event.clone());

            let (deliveries, unroutable) = self.resolve(&event);
            for diagnostic in unroutable {
                self.record(&mut report, diagnostic);
            }

            for (delivered, handler) in deliveries {
                let target = delivered
                    .target_block_id
                    .clone()
                    .unwrap_or_else(|| delivered.source_block_id.clone());
                let actor = delivered.actor.clone();
                let event_type = delivered.event_type.clone();

                let outcome = AssertUnwindSafe(handler.handle(delivered)).catch_unwind().await;
                let failure = match outcome {
                    Ok(Ok(emitted)) => {
                        debug!(
                            block_id = %target,
                            event_type = %event_type,
                            emitted = emitted.len(),
                            "Handler completed"
                        );
                        queue.extend(emitted);
                        continue;
                    }
                    Ok(Err(err)) => err,
                    Err(panic) => HandlerError::new(ErrorKind::BlockError, panic_message(panic)),
                };

                error!(
                    block_id = %target,
                    event_type = %event_type,
                    kind = %failure.kind,
                    "Handler failed: {}",
                    failure.message
                );
                metrics::counter!("guardian_handler_failures_total", "block" => target.to_string())
                    .increment(1);
                let data = ErrorEventData::new(failure.kind, target.clone(), failure.message);
                queue.push_back(Event::error(target, actor, data));
            }
        }

        report
    }

    /// Resolve handlers for one event. Returns the per-target copies of the
    /// event (type renamed and target set) and any routing diagnostics.
    fn resolve(&self, event: &Event) -> (Vec<(Event, Arc<dyn EventHandler>)>, Vec<RoutingError>) {
        let routes = match &event.target_block_id {
            Some(target) => vec![WireRoute {
                target: target.clone(),
                input: event.event_type.clone(),
            }],
            None => self.routes(&event.source_block_id, &event.event_type),
        };

        let mut deliveries = Vec::new();
        let mut unroutable = Vec::new();

        if routes.is_empty() {
            if !event.event_type.is_signal() {
                unroutable.push(RoutingError::for_event(event, "no wiring for this output"));
            }
            return (deliveries, unroutable);
        }

        let subscriptions = self.subscriptions.read();
        for route in routes {
            let mut matched = false;
            for subscription in subscriptions
                .iter()
                .filter(|s| s.block_id == route.target && s.event_type == route.input)
            {
                matched = true;
                let mut delivered = event.clone();
                delivered.event_type = route.input.clone();
                delivered.target_block_id = Some(route.target.clone());
                deliveries.push((delivered, subscription.handler.clone()));
            }
            if !matched && !event.event_type.is_signal() {
                unroutable.push(RoutingError::for_event(
                    event,
                    format!("block '{}' has no handler for {}", route.target, route.input),
                ));
            }
        }

        (deliveries, unroutable)
    }

    fn record(&self, report: &mut PublishReport, diagnostic: RoutingError) {
        warn!(
            event_type = %diagnostic.event_type,
            source_block_id = %diagnostic.source_block_id,
            "{}",
            diagnostic.reason
        );
        metrics::counter!("guardian_events_unroutable_total", "type" => diagnostic.event_type.to_string())
            .increment(1);

        let mut retained = self.diagnostics.lock();
        if retained.len() == MAX_RETAINED_DIAGNOSTICS {
            retained.pop_front();
        }
        retained.push_back(diagnostic.clone());
        report.diagnostics.push(diagnostic);
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {}", message)
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("handler panicked: {}", message)
    } else {
        "handler panicked".to_string()
    }
}

/// Receiver for all bus events
pub struct EventReceiver {
    receiver: broadcast::Receiver<Event>,
}

impl EventReceiver {
    /// Receive the next event (blocks until event is available)
    pub async fn recv(&mut self) -> Result<Event, EventBusError> {
        self.receiver.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => EventBusError::Closed,
            broadcast::error::RecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<Event, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events")]
    Lagged(u64),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::Actor;
    use serde_json::json;

    /// Records deliveries and re-emits a fixed list
    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        emit: Vec<(EventType, serde_json::Value)>,
    }

    #[async_trait]
    impl EventHandler for Recorder {
        async fn handle(&self, event: Event) -> Result<Vec<Event>, HandlerError> {
            self.log
                .lock()
                .push(format!("{}:{}:{}", self.name, event.event_type, event.data));
            Ok(self
                .emit
                .iter()
                .map(|(t, d)| Event::new(t.clone(), BlockId::new(self.name), event.actor.clone(), d.clone()))
                .collect())
        }
    }

    struct Failing;

    #[async_trait]
    impl EventHandler for Failing {
        async fn handle(&self, _event: Event) -> Result<Vec<Event>, HandlerError> {
            Err(anyhow::anyhow!("store exploded").into())
        }
    }

    struct Panicking;

    #[async_trait]
    impl EventHandler for Panicking {
        async fn handle(&self, _event: Event) -> Result<Vec<Event>, HandlerError> {
            panic!("boom");
        }
    }

    fn recorder(
        name: &'static str,
        log: &Arc<Mutex<Vec<String>>>,
        emit: Vec<(EventType, serde_json::Value)>,
    ) -> Arc<dyn EventHandler> {
        Arc::new(Recorder {
            name,
            log: log.clone(),
            emit,
        })
    }

    fn run_event(source: &str, target: Option<&str>, data: serde_json::Value) -> Event {
        let event = Event::new(EventType::run(), BlockId::new(source), Actor::new("user-1"), data);
        match target {
            Some(t) => event.with_target(BlockId::new(t)),
            None => event,
        }
    }

    #[tokio::test]
    async fn test_targeted_delivery_and_fifo_fan_out() {
        let bus = EventBus::with_default_capacity();
        let log = Arc::new(Mutex::new(Vec::new()));

        bus.subscribe(
            EventType::run(),
            BlockId::new("a"),
            recorder("a", &log, vec![(EventType::run(), json!(1)), (EventType::run(), json!(2))]),
        );
        bus.subscribe(EventType::run(), BlockId::new("b"), recorder("b", &log, vec![]));
        bus.subscribe(EventType::run(), BlockId::new("c"), recorder("c", &log, vec![]));
        bus.wire(BlockId::new("a"), EventType::run(), BlockId::new("b"), EventType::run());
        bus.wire(BlockId::new("a"), EventType::run(), BlockId::new("c"), EventType::run());

        let report = bus.publish(run_event("external", Some("a"), json!(0))).await;

        assert_eq!(
            *log.lock(),
            vec!["a:RunEvent:0", "b:RunEvent:1", "c:RunEvent:1", "b:RunEvent:2", "c:RunEvent:2"]
        );
        assert_eq!(report.events.len(), 3);
        assert!(report.diagnostics.is_empty());
    }

    #[tokio::test]
    async fn test_link_renames_event_type() {
        let bus = EventBus::with_default_capacity();
        let log = Arc::new(Mutex::new(Vec::new()));
        let approve = EventType::new("ApproveEvent");

        bus.subscribe(approve.clone(), BlockId::new("b"), recorder("b", &log, vec![]));
        bus.wire(BlockId::new("a"), EventType::run(), BlockId::new("b"), approve);

        bus.publish(run_event("a", None, json!("x"))).await;
        assert_eq!(*log.lock(), vec!["b:ApproveEvent:\"x\""]);
    }

    #[tokio::test]
    async fn test_handler_failure_becomes_error_event() {
        let bus = EventBus::with_default_capacity();
        bus.subscribe(EventType::run(), BlockId::new("a"), Arc::new(Failing));

        let report = bus.publish(run_event("external", Some("a"), json!({}))).await;
        let errors = report.error_data();

        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, ErrorKind::BlockError);
        assert_eq!(errors[0].block_id, BlockId::new("a"));
        assert!(errors[0].reason.contains("store exploded"));
        // The error event itself is a signal and is not reported as unroutable
        assert!(report.diagnostics.is_empty());
    }

    #[tokio::test]
    async fn test_panicking_handler_is_contained() {
        let bus = EventBus::with_default_capacity();
        bus.subscribe(EventType::run(), BlockId::new("a"), Arc::new(Panicking));

        let report = bus.publish(run_event("external", Some("a"), json!({}))).await;
        let errors = report.error_data();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].reason.contains("boom"));
    }

    #[tokio::test]
    async fn test_unroutable_event_is_diagnosed() {
        let bus = EventBus::with_default_capacity();
        let report = bus.publish(run_event("a", None, json!({}))).await;

        assert_eq!(report.diagnostics.len(), 1);
        assert_eq!(report.diagnostics[0].source_block_id, BlockId::new("a"));
        assert_eq!(bus.diagnostics().len(), 1);

        let report = bus
            .publish(Event::new(EventType::refresh(), BlockId::new("a"), Actor::new("u"), json!({})))
            .await;
        assert!(report.diagnostics.is_empty());
    }

    #[tokio::test]
    async fn test_hop_limit_stops_cycles() {
        let bus = EventBus::with_default_capacity().with_max_hops(10);
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe(
            EventType::run(),
            BlockId::new("loop"),
            recorder("loop", &log, vec![(EventType::run(), json!(null))]),
        );
        bus.wire(BlockId::new("loop"), EventType::run(), BlockId::new("loop"), EventType::run());

        let report = bus.publish(run_event("external", Some("loop"), json!(null))).await;
        assert!(report.truncated);
        assert_eq!(report.events.len(), 10);
    }

    #[tokio::test]
    async fn test_unsubscribe_and_observers() {
        let bus = EventBus::with_default_capacity();
        let log = Arc::new(Mutex::new(Vec::new()));
        let handle = bus.subscribe(EventType::run(), BlockId::new("a"), recorder("a", &log, vec![]));
        let mut observer = bus.subscribe_observer();

        assert!(bus.unsubscribe(handle));
        assert!(!bus.unsubscribe(handle));

        let report = bus.publish(run_event("external", Some("a"), json!({}))).await;
        assert!(log.lock().is_empty());
        assert_eq!(report.diagnostics.len(), 1);
        assert_eq!(observer.try_recv().unwrap().event_type, EventType::run());
        assert!(matches!(observer.try_recv(), Err(EventBusError::Empty)));
    }
}
