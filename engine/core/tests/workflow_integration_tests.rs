// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Integration tests for loading workflows and dispatching events through
//! multi-block graphs.

use async_trait::async_trait;
use guardian_engine_core::application::block::{
    Block, BlockError, BlockOutcome, BlockRegistry, BlockServices, EngineSettings, ExecutionContext,
};
use guardian_engine_core::application::runtime_state::StateKey;
use guardian_engine_core::application::send_to_store::STATE_LAST_DOCUMENT_ID;
use guardian_engine_core::application::workflow_engine::{EngineError, WorkflowEngine};
use guardian_engine_core::domain::block::{BlockDefinition, BlockId, BlockOptions};
use guardian_engine_core::domain::engine_config::EngineConfigManifest;
use guardian_engine_core::domain::events::{Actor, ErrorKind, Event, EventType};
use guardian_engine_core::domain::ledger::MessageAction;
use guardian_engine_core::domain::workflow::{ConfigError, WorkflowDefinition, WorkflowMetadata};
use guardian_engine_core::infrastructure::event_bus::EventBusError;
use guardian_engine_core::infrastructure::ledger::InMemoryLedger;
use guardian_engine_core::infrastructure::repositories::InMemoryDocumentStore;
use guardian_engine_core::infrastructure::workflow_parser::{WorkflowParseError, WorkflowParser};
use serde_json::json;
use std::sync::Arc;

const VC_ISSUANCE: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/../../demos/workflows/vc-issuance.yaml");
const DEMO_CONFIG: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/../../demos/config/guardian-config.yaml");
const ISSUE_VC_EVENT: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/../../demos/events/issue-vc.json");

struct Fixture {
    store: InMemoryDocumentStore,
    ledger: InMemoryLedger,
    services: BlockServices,
}

fn fixture() -> Fixture {
    let store = InMemoryDocumentStore::new();
    let ledger = InMemoryLedger::new();
    let services = BlockServices::new(
        Arc::new(store.clone()),
        Arc::new(ledger.clone()),
        EngineSettings::default(),
    );
    Fixture {
        store,
        ledger,
        services,
    }
}

fn run_event(data: serde_json::Value) -> Event {
    Event::new(EventType::run(), BlockId::external(), Actor::new("issuer-1"), data)
}

/// Always fails
struct Broken(BlockDefinition);

#[async_trait]
impl Block for Broken {
    fn definition(&self) -> &BlockDefinition {
        &self.0
    }

    async fn run(&self, _ctx: ExecutionContext) -> Result<BlockOutcome, BlockError> {
        Err(BlockError::Other(anyhow::anyhow!("downstream service unavailable")))
    }
}

/// Emits the same RunEvent twice
struct Splitter(BlockDefinition);

#[async_trait]
impl Block for Splitter {
    fn definition(&self) -> &BlockDefinition {
        &self.0
    }

    async fn run(&self, ctx: ExecutionContext) -> Result<BlockOutcome, BlockError> {
        let first = ctx.emit(EventType::run(), json!({ "owner": "did:1", "document": { "part": 1 } }));
        let second = ctx.emit(EventType::run(), json!({ "owner": "did:1", "document": { "part": 2 } }));
        Ok(BlockOutcome::new(vec![first, second]))
    }
}

fn registry() -> BlockRegistry {
    let mut registry = BlockRegistry::with_defaults();
    registry.register("broken", |definition, _| Ok(Arc::new(Broken(definition)) as Arc<dyn Block>));
    registry.register("splitter", |definition, _| Ok(Arc::new(Splitter(definition)) as Arc<dyn Block>));
    registry
}

#[tokio::test]
async fn test_demo_pipeline_saves_then_anchors() {
    let f = fixture();
    let workflow = WorkflowParser::parse_file(VC_ISSUANCE).unwrap();
    let engine = WorkflowEngine::load(workflow, &registry(), f.services.clone()).unwrap();

    let raw = std::fs::read_to_string(ISSUE_VC_EVENT).unwrap();
    let event: Event = serde_json::from_str(&raw).unwrap();
    let report = engine.dispatch(event).await.unwrap();

    assert!(report.error_data().is_empty(), "{:?}", report.error_data());
    // anchor is the last block; its RunEvent has nowhere to go
    assert_eq!(report.diagnostics.len(), 1);
    assert_eq!(report.diagnostics[0].source_block_id, BlockId::new("anchor"));

    // One row: created by `save`, then updated in place by `anchor`
    let stored = f.store.list_all();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].version, 2);
    assert_eq!(stored[0].owner, "did:example:holder");

    let messages = f.ledger.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].message.action, MessageAction::UpdateDocument);
    assert_eq!(
        stored[0].external_message_id.as_deref(),
        Some(messages[0].receipt.external_message_id.as_str())
    );
    assert_eq!(stored[0].message_hash.as_deref(), Some(stored[0].content_hash.as_str()));

    assert_eq!(report.events_of(&EventType::refresh()).count(), 2);
}

#[tokio::test]
async fn test_fan_out_preserves_emission_order() {
    let f = fixture();
    let split = BlockDefinition::new("split", "splitter")
        .with_inputs([EventType::new("StartEvent")])
        .with_outputs([EventType::run()]);
    let save = BlockDefinition::new("save", "send-to-store")
        .with_inputs([EventType::run()])
        .with_outputs([EventType::refresh()])
        .with_options(BlockOptions::default().data_source("database").operation("create"));
    let workflow = WorkflowDefinition::new(WorkflowMetadata::new("split"), vec![split, save], vec![]).unwrap();
    let engine = WorkflowEngine::load(workflow, &registry(), f.services.clone()).unwrap();

    let report = engine
        .dispatch(Event::new(EventType::new("StartEvent"), BlockId::external(), Actor::new("u"), json!({})))
        .await
        .unwrap();

    assert!(report.error_data().is_empty());
    let stored = f.store.list_all();
    assert_eq!(stored.len(), 2);
    let parts: Vec<_> = report
        .emitted_by(&BlockId::new("save"))
        .filter(|e| e.event_type == EventType::run())
        .map(|e| e.data["document"]["part"].clone())
        .collect();
    assert_eq!(parts, vec![json!(1), json!(2)]);
}

#[tokio::test]
async fn test_block_failure_is_contained_as_error_event() {
    let f = fixture();
    let broken = BlockDefinition::new("broken", "broken").with_inputs([EventType::run()]);
    let workflow = WorkflowDefinition::new(WorkflowMetadata::new("broken"), vec![broken], vec![]).unwrap();
    let engine = WorkflowEngine::load(workflow, &registry(), f.services.clone()).unwrap();
    let mut observer = engine.event_bus().subscribe_observer();

    let report = engine.dispatch(run_event(json!({}))).await.unwrap();

    let errors = report.error_data();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind, ErrorKind::BlockError);
    assert_eq!(errors[0].block_id, BlockId::new("broken"));
    assert!(errors[0].reason.contains("downstream service unavailable"));

    assert_eq!(observer.try_recv().unwrap().event_type, EventType::run());
    assert!(observer.try_recv().unwrap().is_error());
    assert!(matches!(observer.try_recv(), Err(EventBusError::Empty)));
}

#[tokio::test]
async fn test_invalid_payload_stops_the_pipeline() {
    let f = fixture();
    let workflow = WorkflowParser::parse_file(VC_ISSUANCE).unwrap();
    let engine = WorkflowEngine::load(workflow, &registry(), f.services.clone()).unwrap();

    let report = engine.dispatch(run_event(json!({ "owner": "did:1" }))).await.unwrap();

    let errors = report.error_data();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind, ErrorKind::InvalidPayload);
    assert_eq!(errors[0].block_id, BlockId::new("save"));
    assert!(f.store.is_empty());
    assert!(f.ledger.messages().is_empty());
}

#[tokio::test]
async fn test_release_event_clears_runtime_state() {
    let f = fixture();
    let workflow = WorkflowParser::parse_file(VC_ISSUANCE).unwrap();
    let engine = WorkflowEngine::load(workflow, &registry(), f.services.clone()).unwrap();
    let save = BlockId::new("save");
    let key = StateKey::new(save.clone(), "issuer-1");

    engine
        .dispatch(run_event(json!({ "owner": "did:1", "document": { "n": 1 } })))
        .await
        .unwrap();
    assert!(engine.runtime_state().lock(&key).await.get(STATE_LAST_DOCUMENT_ID).is_some());

    let report = engine.release(&save, Actor::new("issuer-1")).await.unwrap();
    assert!(report.diagnostics.is_empty());
    assert!(engine.runtime_state().lock(&key).await.is_empty());
}

#[test]
fn test_invalid_option_combination_fails_load() {
    let yaml = r#"
apiVersion: guardian/v1
kind: Workflow
metadata:
  name: bad-update
spec:
  blocks:
    - id: save
      type: send-to-store
      inputs: [RunEvent]
      options:
        dataSource: database
        operation: update
"#;
    let f = fixture();
    let err = WorkflowEngine::load_from_yaml(yaml, &registry(), f.services).err().unwrap();
    match err {
        EngineError::Config(ConfigError::InvalidCombination { block_id, .. }) => {
            assert_eq!(block_id, BlockId::new("save"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_manifest_errors_surface_as_parse_errors() {
    let f = fixture();
    let yaml = "apiVersion: guardian/v1\nkind: Pipeline\nmetadata:\n  name: x\nspec:\n  blocks: []\n";
    let err = WorkflowEngine::load_from_yaml(yaml, &registry(), f.services.clone()).err().unwrap();
    assert!(matches!(err, EngineError::Parse(WorkflowParseError::InvalidKind { .. })));

    let yaml = "apiVersion: guardian/v1\nkind: Workflow\nmetadata:\n  name: x\nspec:\n  blocks: []\n";
    let err = WorkflowEngine::load_from_yaml(yaml, &registry(), f.services).err().unwrap();
    assert!(matches!(
        err,
        EngineError::Parse(WorkflowParseError::ValidationError(ConfigError::NoBlocks))
    ));
}

#[test]
fn test_demo_config_is_valid() {
    let config = EngineConfigManifest::from_yaml_file(DEMO_CONFIG).unwrap();
    config.validate().unwrap();
    let settings = EngineSettings::from(&config);
    assert_eq!(settings.publish_timeout, std::time::Duration::from_secs(10));
}
