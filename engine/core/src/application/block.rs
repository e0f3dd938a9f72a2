// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Block Runtime Contract
//!
//! A [`Block`] is a stateless unit that reacts to one delivered event and
//! returns the events it emits. Anything it needs across deliveries lives in
//! the per-(block, actor) runtime state reachable from the
//! [`ExecutionContext`]; collaborators are injected once through
//! [`BlockServices`] when the [`BlockRegistry`] builds the block.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;

use crate::application::runtime_state::{BlockRuntimeState, RuntimeStateCache, StateKey};
use crate::application::send_to_store::SendToStoreBlock;
use crate::domain::block::{BlockDefinition, BlockId, SEND_TO_STORE_BLOCK};
use crate::domain::engine_config::EngineConfigManifest;
use crate::domain::events::{Actor, ErrorKind, Event, EventType};
use crate::domain::ledger::{LedgerPublisher, PublishError};
use crate::domain::repository::{DocumentStore, StoreError};
use crate::domain::workflow::ConfigError;
use crate::infrastructure::event_bus::HandlerError;

/// Everything a block sees while handling one event
pub struct ExecutionContext {
    pub block_id: BlockId,
    pub event: Event,
    state: Arc<RuntimeStateCache>,
}

impl ExecutionContext {
    pub fn new(block_id: BlockId, event: Event, state: Arc<RuntimeStateCache>) -> Self {
        Self {
            block_id,
            event,
            state,
        }
    }

    pub fn actor(&self) -> &Actor {
        &self.event.actor
    }

    pub fn state_key(&self) -> StateKey {
        StateKey::new(self.block_id.clone(), self.event.actor.id.clone())
    }

    /// Lock this block's runtime state for the event's actor. Holding the
    /// guard excludes other dispatches for the same (block, actor).
    pub async fn state(&self) -> OwnedMutexGuard<BlockRuntimeState> {
        self.state.lock(&self.state_key()).await
    }

    /// Build an event emitted by this block on behalf of the same actor
    pub fn emit(&self, event_type: EventType, data: serde_json::Value) -> Event {
        Event::new(event_type, self.block_id.clone(), self.event.actor.clone(), data)
    }
}

#[derive(Debug, Default)]
pub struct BlockOutcome {
    pub events: Vec<Event>,
}

impl BlockOutcome {
    pub fn new(events: Vec<Event>) -> Self {
        Self { events }
    }
}

#[async_trait]
pub trait Block: Send + Sync {
    fn definition(&self) -> &BlockDefinition;

    async fn run(&self, ctx: ExecutionContext) -> Result<BlockOutcome, BlockError>;
}

/// Failure of a whole block invocation. Per-document failures inside a block
/// are reported as error events instead.
#[derive(Debug, thiserror::Error)]
pub enum BlockError {
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BlockError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BlockError::InvalidPayload(_) => ErrorKind::InvalidPayload,
            BlockError::Store(_) => ErrorKind::StoreError,
            BlockError::Publish(_) => ErrorKind::PublishError,
            BlockError::Other(_) => ErrorKind::BlockError,
        }
    }
}

impl From<BlockError> for HandlerError {
    fn from(err: BlockError) -> Self {
        HandlerError::new(err.kind(), err.to_string())
    }
}

/// Runtime knobs blocks read, flattened from [`EngineConfigManifest`]
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub publish_timeout: Duration,
    pub publish_retries: u32,
    pub store_retries: u32,
    pub issuer_topic: String,
    pub state_ttl: Duration,
    pub event_bus_capacity: usize,
    pub max_hops: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from(&EngineConfigManifest::default())
    }
}

impl From<&EngineConfigManifest> for EngineSettings {
    fn from(config: &EngineConfigManifest) -> Self {
        let spec = &config.spec;
        Self {
            publish_timeout: spec.ledger.publish_timeout,
            publish_retries: spec.ledger.publish_retries,
            store_retries: spec.store.retries,
            issuer_topic: spec.ledger.issuer_topic.clone(),
            state_ttl: spec.runtime.state_ttl,
            event_bus_capacity: spec.runtime.event_bus_capacity,
            max_hops: spec.runtime.max_hops,
        }
    }
}

/// Collaborators shared by every block of an engine
#[derive(Clone)]
pub struct BlockServices {
    pub store: Arc<dyn DocumentStore>,
    pub ledger: Arc<dyn LedgerPublisher>,
    pub state: Arc<RuntimeStateCache>,
    pub settings: EngineSettings,
}

impl BlockServices {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        ledger: Arc<dyn LedgerPublisher>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            ledger,
            state: Arc::new(RuntimeStateCache::new(settings.state_ttl)),
            settings,
        }
    }
}

pub type BlockFactory =
    Arc<dyn Fn(BlockDefinition, &BlockServices) -> Result<Arc<dyn Block>, ConfigError> + Send + Sync>;

/// Block type name -> factory
#[derive(Clone)]
pub struct BlockRegistry {
    factories: HashMap<String, BlockFactory>,
}

impl BlockRegistry {
    /// Registry with no block types
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with the built-in block types
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(SEND_TO_STORE_BLOCK, |definition, services| {
            Ok(Arc::new(SendToStoreBlock::new(definition, services)?) as Arc<dyn Block>)
        });
        registry
    }

    pub fn register<F>(&mut self, block_type: impl Into<String>, factory: F)
    where
        F: Fn(BlockDefinition, &BlockServices) -> Result<Arc<dyn Block>, ConfigError> + Send + Sync + 'static,
    {
        self.factories.insert(block_type.into(), Arc::new(factory));
    }

    /// Instantiate a block; fails on an unknown type or invalid options
    pub fn build(
        &self,
        definition: BlockDefinition,
        services: &BlockServices,
    ) -> Result<Arc<dyn Block>, ConfigError> {
        let factory = self
            .factories
            .get(&definition.block_type)
            .ok_or_else(|| ConfigError::UnknownBlockType {
                block_id: definition.id.clone(),
                block_type: definition.block_type.clone(),
            })?;
        factory(definition, services)
    }
}

impl Default for BlockRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
