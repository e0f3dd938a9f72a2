// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Workflow Engine Application Service
//!
//! Loads a static block graph and exposes [`WorkflowEngine::dispatch`] as the
//! single entry point for external events.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Instantiate blocks, wire them on the event bus, route
//!   external events to entry blocks
//! - **Dependencies:** Domain (WorkflowDefinition), Infrastructure (EventBus, Parser)
//!
//! # Load
//!
//! ```text
//! for block in workflow.blocks:
//!     registry.build(block)              // unknown type / bad options fail here
//!     bus.subscribe(input, block)        // every declared input + ReleaseEvent
//! wiring  = implicit edges (output type == input type, no self-loops)
//!         + enabled explicit links (may rename the type)
//! ```
//!
//! # Dispatch
//!
//! An external event with a `target_block_id` goes to that block. Otherwise
//! the wiring for its (source, type) is used, and failing that it enters at
//! every block that accepts the type and is not already fed that type by
//! another block. Everything downstream is drained by the bus before
//! `dispatch` returns.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::application::block::{Block, BlockRegistry, BlockServices, ExecutionContext};
use crate::application::runtime_state::{RuntimeStateCache, StateKey};
use crate::domain::block::BlockId;
use crate::domain::events::{Actor, Event, EventType, RELEASE_EVENT};
use crate::domain::workflow::{ConfigError, WorkflowDefinition};
use crate::infrastructure::event_bus::{
    EventBus, EventHandler, HandlerError, PublishReport, RoutingError, SubscriptionHandle, WiringTable,
};
use crate::infrastructure::workflow_parser::{WorkflowParseError, WorkflowParser};

pub type DispatchReport = PublishReport;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Parse(#[from] WorkflowParseError),

    #[error(transparent)]
    Routing(#[from] RoutingError),
}

/// Bus handler running one block
struct BlockHandler {
    block: Arc<dyn Block>,
    state: Arc<RuntimeStateCache>,
}

#[async_trait]
impl EventHandler for BlockHandler {
    async fn handle(&self, event: Event) -> Result<Vec<Event>, HandlerError> {
        let block_id = self.block.definition().id.clone();

        if event.event_type.as_str() == RELEASE_EVENT {
            let key = StateKey::new(block_id, event.actor.id.clone());
            self.state.release(&key).await;
            return Ok(Vec::new());
        }

        let ctx = ExecutionContext::new(block_id, event, self.state.clone());
        let outcome = self.block.run(ctx).await?;
        Ok(outcome.events)
    }
}

/// Workflow Engine (Application Service)
pub struct WorkflowEngine {
    workflow: WorkflowDefinition,
    blocks: HashMap<BlockId, Arc<dyn Block>>,
    event_bus: Arc<EventBus>,
    state: Arc<RuntimeStateCache>,
    subscriptions: Vec<SubscriptionHandle>,
}

impl WorkflowEngine {
    /// Build every block and wire them on a new event bus
    pub fn load(
        workflow: WorkflowDefinition,
        registry: &BlockRegistry,
        services: BlockServices,
    ) -> Result<Self, EngineError> {
        let event_bus = Arc::new(
            EventBus::new(services.settings.event_bus_capacity).with_max_hops(services.settings.max_hops),
        );
        Self::load_on_bus(workflow, registry, services, event_bus)
    }

    /// Parse a YAML manifest and load it
    pub fn load_from_yaml(
        yaml: &str,
        registry: &BlockRegistry,
        services: BlockServices,
    ) -> Result<Self, EngineError> {
        let workflow = WorkflowParser::parse_yaml(yaml)?;
        Self::load(workflow, registry, services)
    }

    /// Load onto an existing bus, e.g. one shared with other workflows
    pub fn load_on_bus(
        workflow: WorkflowDefinition,
        registry: &BlockRegistry,
        services: BlockServices,
        event_bus: Arc<EventBus>,
    ) -> Result<Self, EngineError> {
        // Build everything first so a bad block leaves the bus untouched
        let mut blocks = HashMap::new();
        for definition in &workflow.blocks {
            let block = registry.build(definition.clone(), &services)?;
            blocks.insert(definition.id.clone(), block);
        }

        let wiring = Self::build_wiring(&workflow);
        let routes = wiring.len();
        event_bus.extend_wiring(wiring);

        let mut subscriptions = Vec::new();
        for definition in &workflow.blocks {
            let Some(block) = blocks.get(&definition.id) else {
                continue;
            };
            let handler: Arc<dyn EventHandler> = Arc::new(BlockHandler {
                block: block.clone(),
                state: services.state.clone(),
            });

            let mut inputs = definition.inputs.clone();
            if !inputs.contains(&EventType::release()) {
                inputs.push(EventType::release());
            }
            for input in inputs {
                subscriptions.push(event_bus.subscribe(input, definition.id.clone(), handler.clone()));
            }
        }

        info!(
            workflow = %workflow.metadata.name,
            blocks = blocks.len(),
            routes,
            "Workflow loaded"
        );

        Ok(Self {
            workflow,
            blocks,
            event_bus,
            state: services.state,
            subscriptions,
        })
    }

    /// Implicit edges from matching port types plus enabled explicit links
    pub fn build_wiring(workflow: &WorkflowDefinition) -> WiringTable {
        let mut wiring = WiringTable::new();

        for source in &workflow.blocks {
            for output in &source.outputs {
                for target in workflow.blocks.iter().filter(|b| b.id != source.id) {
                    if target.accepts(output) {
                        wiring.add(source.id.clone(), output.clone(), target.id.clone(), output.clone());
                    }
                }
            }
        }

        for link in workflow.enabled_links() {
            wiring.add(
                link.source.clone(),
                link.output.clone(),
                link.target.clone(),
                link.input.clone(),
            );
        }

        wiring
    }

    /// Route an external event into the workflow and drain everything it
    /// causes. Errors only when the event cannot enter the workflow at all;
    /// failures inside blocks come back as error events in the report.
    pub async fn dispatch(&self, event: Event) -> Result<DispatchReport, EngineError> {
        info!(
            workflow = %self.workflow.metadata.name,
            event_type = %event.event_type,
            source = %event.source_block_id,
            actor = %event.actor.id,
            "Dispatching event"
        );

        let entries = self.resolve_entries(event)?;
        let report = self.event_bus.publish_all(entries).await;

        debug!(
            events = report.events.len(),
            errors = report.errors().count(),
            unroutable = report.diagnostics.len(),
            "Dispatch drained"
        );
        if report.truncated {
            warn!(workflow = %self.workflow.metadata.name, "Dispatch stopped at hop limit");
        }
        Ok(report)
    }

    fn resolve_entries(&self, event: Event) -> Result<Vec<Event>, RoutingError> {
        let is_release = event.event_type.as_str() == RELEASE_EVENT;

        if let Some(target) = &event.target_block_id {
            let block = self
                .blocks
                .get(target)
                .ok_or_else(|| RoutingError::for_event(&event, format!("unknown block '{}'", target)))?;
            if !is_release && !block.definition().accepts(&event.event_type) {
                return Err(RoutingError::for_event(
                    &event,
                    format!("block '{}' does not accept {}", target, event.event_type),
                ));
            }
            return Ok(vec![event]);
        }

        if !self
            .event_bus
            .routes(&event.source_block_id, &event.event_type)
            .is_empty()
        {
            return Ok(vec![event]);
        }

        let accepting: Vec<&BlockId> = self
            .workflow
            .blocks
            .iter()
            .filter(|b| is_release || b.accepts(&event.event_type))
            .map(|b| &b.id)
            .collect();
        let roots: Vec<&BlockId> = accepting
            .iter()
            .copied()
            .filter(|id| is_release || !self.event_bus.has_inbound(id, &event.event_type))
            .collect();
        // A graph where every acceptor is also fed internally has no root
        let entries = if roots.is_empty() { accepting } else { roots };

        if entries.is_empty() {
            return Err(RoutingError::for_event(&event, "no block accepts this event type"));
        }

        Ok(entries
            .into_iter()
            .map(|id| event.clone().with_target(id.clone()))
            .collect())
    }

    /// Drop one block's runtime state for an actor
    pub async fn release(&self, block_id: &BlockId, actor: Actor) -> Result<DispatchReport, EngineError> {
        let event = Event::new(EventType::release(), BlockId::external(), actor, serde_json::Value::Null)
            .with_target(block_id.clone());
        self.dispatch(event).await
    }

    /// Discard idle runtime state past its TTL
    pub fn purge_expired_state(&self) -> usize {
        self.state.purge_expired()
    }

    pub fn workflow(&self) -> &WorkflowDefinition {
        &self.workflow
    }

    pub fn block(&self, id: &BlockId) -> Option<&Arc<dyn Block>> {
        self.blocks.get(id)
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub fn runtime_state(&self) -> &Arc<RuntimeStateCache> {
        &self.state
    }
}

impl Drop for WorkflowEngine {
    fn drop(&mut self) {
        for handle in self.subscriptions.drain(..) {
            self.event_bus.unsubscribe(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::block::{BlockError, BlockOutcome, EngineSettings};
    use crate::domain::block::{BlockDefinition, SEND_TO_STORE_BLOCK};
    use crate::domain::workflow::{EventLink, WorkflowMetadata};
    use crate::infrastructure::ledger::InMemoryLedger;
    use crate::infrastructure::repositories::InMemoryDocumentStore;
    use serde_json::json;

    fn services() -> BlockServices {
        BlockServices::new(
            Arc::new(InMemoryDocumentStore::new()),
            Arc::new(InMemoryLedger::new()),
            EngineSettings::default(),
        )
    }

    fn workflow(blocks: Vec<BlockDefinition>, links: Vec<EventLink>) -> WorkflowDefinition {
        WorkflowDefinition::new(WorkflowMetadata::new("test"), blocks, links).unwrap()
    }

    /// Passes its input through unchanged
    struct Echo(BlockDefinition);

    #[async_trait]
    impl Block for Echo {
        fn definition(&self) -> &BlockDefinition {
            &self.0
        }

        async fn run(&self, ctx: ExecutionContext) -> Result<BlockOutcome, BlockError> {
            Ok(BlockOutcome::new(vec![ctx.emit(EventType::run(), ctx.event.data.clone())]))
        }
    }

    fn registry() -> BlockRegistry {
        let mut registry = BlockRegistry::with_defaults();
        registry.register("echo", |definition, _services| Ok(Arc::new(Echo(definition)) as Arc<dyn Block>));
        registry
    }

    #[test]
    fn test_wiring_skips_self_loops_and_disabled_links() {
        let a = BlockDefinition::new("a", "echo")
            .with_inputs([EventType::run()])
            .with_outputs([EventType::run()]);
        let b = BlockDefinition::new("b", "echo").with_inputs([EventType::run()]);
        let disabled = EventLink {
            source: BlockId::new("b"),
            target: BlockId::new("a"),
            output: EventType::refresh(),
            input: EventType::run(),
            disabled: true,
        };

        let wiring = WorkflowEngine::build_wiring(&workflow(vec![a, b], vec![disabled]));
        assert_eq!(wiring.len(), 1);
        assert_eq!(wiring.routes(&BlockId::new("a"), &EventType::run())[0].target, BlockId::new("b"));
        assert!(wiring.routes(&BlockId::new("b"), &EventType::refresh()).is_empty());
    }

    #[test]
    fn test_load_rejects_unknown_block_type() {
        let wf = workflow(vec![BlockDefinition::new("a", "mint-token")], vec![]);
        let err = WorkflowEngine::load(wf, &registry(), services()).err().unwrap();
        assert!(matches!(err, EngineError::Config(ConfigError::UnknownBlockType { .. })));
    }

    #[tokio::test]
    async fn test_untargeted_event_enters_at_root() {
        let a = BlockDefinition::new("a", "echo")
            .with_inputs([EventType::run()])
            .with_outputs([EventType::run()]);
        let b = BlockDefinition::new("b", "echo").with_inputs([EventType::run()]);
        let engine = WorkflowEngine::load(workflow(vec![a, b], vec![]), &registry(), services()).unwrap();

        let report = engine
            .dispatch(Event::new(EventType::run(), BlockId::external(), Actor::new("u"), json!(7)))
            .await
            .unwrap();

        // external -> a -> b -> (b's output is unwired)
        let sources: Vec<&str> = report.events.iter().map(|e| e.source_block_id.as_str()).collect();
        assert_eq!(sources, vec!["external", "a", "b"]);
        assert_eq!(report.diagnostics.len(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_without_any_acceptor_is_routing_error() {
        let a = BlockDefinition::new("a", "echo").with_inputs([EventType::run()]);
        let engine = WorkflowEngine::load(workflow(vec![a], vec![]), &registry(), services()).unwrap();

        let err = engine
            .dispatch(Event::new(EventType::new("MintEvent"), BlockId::external(), Actor::new("u"), json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Routing(_)));

        let err = engine
            .dispatch(
                Event::new(EventType::run(), BlockId::external(), Actor::new("u"), json!({}))
                    .with_target(BlockId::new("nope")),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Routing(_)));
    }

    #[tokio::test]
    async fn test_drop_unsubscribes_from_shared_bus() {
        let bus = Arc::new(EventBus::with_default_capacity());
        let save = BlockDefinition::new("save", SEND_TO_STORE_BLOCK).with_inputs([EventType::run()]);
        let engine =
            WorkflowEngine::load_on_bus(workflow(vec![save], vec![]), &registry(), services(), bus.clone())
                .unwrap();
        drop(engine);

        let report = bus
            .publish(
                Event::new(EventType::run(), BlockId::external(), Actor::new("u"), json!({}))
                    .with_target(BlockId::new("save")),
            )
            .await;
        assert_eq!(report.events.len(), 1);
        assert_eq!(report.diagnostics.len(), 1);
    }
}
