// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Send-to-Store Block
//!
//! Takes one document (or an array of documents) from the triggering event,
//! decides per document whether to persist it, publish it to the ledger, or
//! both, and reconciles it against the row it should update.
//!
//! # State Machine
//!
//! ```text
//! Start -> ComputeContentHash -+-> ExplicitRoute -> DatabaseRoute --------+-> End
//!                              +-> DatabaseRoute ------------------------+
//!                              +-> LedgerRoute -> DatabaseRoute ---------+
//!                              +-> LedgerRoute (publish only) -----------+
//!                              +-> AutoRoute -+-> LedgerRoute -> DatabaseRoute
//!                                             +-> DatabaseRoute
//! any state -> Failed
//! ```
//!
//! `End` contributes the stored document to one `RunEvent` (plus a
//! `RefreshEvent`); `Failed` produces exactly one `ErrorEvent` for that
//! document. Documents in a batch are independent.
//!
//! Ledger I/O never happens under the per-(block, actor) state lock; only the
//! reconciliation lookup and the store writes do.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

use crate::application::block::{
    Block, BlockError, BlockOutcome, BlockServices, EngineSettings, ExecutionContext,
};
use crate::application::runtime_state::BlockRuntimeState;
use crate::domain::block::{BlockDefinition, TopicOwner};
use crate::domain::document::{
    content_hash, Document, DocumentId, DocumentKind, DocumentStatus, DocumentWire, NewDocument,
};
use crate::domain::events::{Actor, ErrorEventData, ErrorKind, Event, EventType};
use crate::domain::ledger::{LedgerPublisher, MessageAction, PublishError, PublishReceipt, TopicRef, WireMessage};
use crate::domain::reconciliation::{LookupPlan, LookupStep, ReconciliationDecision, ReconciliationPolicy, Route};
use crate::domain::repository::{DocumentStore, StoreError};
use crate::domain::workflow::ConfigError;

pub const STATE_LAST_DOCUMENT_ID: &str = "last_document_id";
pub const STATE_LAST_CONTENT_HASH: &str = "last_content_hash";
pub const STATE_LAST_MESSAGE_ID: &str = "last_message_id";

pub struct SendToStoreBlock {
    definition: BlockDefinition,
    policy: ReconciliationPolicy,
    store: Arc<dyn DocumentStore>,
    ledger: Arc<dyn LedgerPublisher>,
    settings: EngineSettings,
}

/// Inbound document after hashing and normalization
#[derive(Debug, Clone)]
struct PendingDocument {
    /// Lookup keys exactly as received; publishing must not change them
    inbound_id: Option<String>,
    inbound_message_id: Option<String>,

    content_hash: String,
    message_id: Option<String>,
    message_hash: Option<String>,
    topic_id: Option<String>,
    owner: String,
    status: Option<DocumentStatus>,
    kind: DocumentKind,
    relationships: Vec<DocumentId>,
    document: Value,
}

impl PendingDocument {
    fn from_wire(wire: DocumentWire, actor: &Actor) -> Result<Self, String> {
        if wire.document.is_null() {
            return Err("document body is missing".to_string());
        }

        let status = wire
            .status
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(str::parse::<DocumentStatus>)
            .transpose()
            .map_err(|e| e.to_string())?;
        let kind = wire
            .document_type
            .as_deref()
            .filter(|t| !t.is_empty())
            .map(str::parse::<DocumentKind>)
            .transpose()
            .map_err(|e| e.to_string())?
            .unwrap_or_default();

        let content_hash = wire
            .hash()
            .map(str::to_string)
            .unwrap_or_else(|| content_hash(&wire.document));
        let owner = if wire.owner.is_empty() {
            actor.identity().to_string()
        } else {
            wire.owner.clone()
        };

        Ok(Self {
            inbound_id: wire.id().map(str::to_string),
            inbound_message_id: wire.message_id().map(str::to_string),
            message_id: wire.message_id().map(str::to_string),
            message_hash: wire.message_hash().map(str::to_string),
            topic_id: wire.topic_id().map(str::to_string),
            content_hash,
            owner,
            status,
            kind,
            relationships: wire.relationships.into_iter().map(DocumentId::new).collect(),
            document: wire.document,
        })
    }

    fn wire_message(&self, action: MessageAction) -> WireMessage {
        WireMessage {
            action,
            kind: self.kind,
            owner: self.owner.clone(),
            content_hash: self.content_hash.clone(),
            document: self.document.clone(),
            relationships: self.relationships.clone(),
        }
    }

    fn record_publish(&mut self, receipt: PublishReceipt) {
        self.message_id = Some(receipt.external_message_id);
        self.topic_id = Some(receipt.topic_id);
        self.message_hash = Some(self.content_hash.clone());
    }

    fn to_new_document(&self) -> NewDocument {
        let mut new = NewDocument::new(self.kind, self.owner.clone(), self.document.clone())
            .with_content_hash(self.content_hash.clone())
            .with_status(self.status.unwrap_or_default());
        new.external_message_id = self.message_id.clone();
        new.topic_id = self.topic_id.clone();
        new.message_hash = self.message_hash.clone();
        new.relationships = self.relationships.clone();
        new
    }

    /// Merge mutable fields into the row being updated
    fn apply_to(&self, existing: &mut Document) {
        existing.payload = self.document.clone();
        existing.content_hash = self.content_hash.clone();
        existing.kind = self.kind;
        existing.owner = self.owner.clone();
        if let Some(status) = self.status {
            existing.status = status;
        }
        if self.message_id.is_some() {
            existing.external_message_id = self.message_id.clone();
        }
        if self.topic_id.is_some() {
            existing.topic_id = self.topic_id.clone();
        }
        if self.message_hash.is_some() {
            existing.message_hash = self.message_hash.clone();
        }
        if !self.relationships.is_empty() {
            existing.relationships = self.relationships.clone();
        }
    }

    /// Wire shape for the publish-only route, which never touches the store
    fn to_wire(&self) -> DocumentWire {
        DocumentWire {
            id: self.inbound_id.clone(),
            hash: Some(self.content_hash.clone()),
            message_id: self.message_id.clone(),
            message_hash: self.message_hash.clone(),
            topic_id: self.topic_id.clone(),
            owner: self.owner.clone(),
            status: self.status.map(|s| s.to_string()),
            document_type: Some(self.kind.to_string()),
            relationships: self.relationships.iter().map(ToString::to_string).collect(),
            document: self.document.clone(),
        }
    }
}

/// Whether the row a ledger publish relates to has been looked up yet
#[derive(Debug)]
enum Probe {
    NotNeeded,
    Pending,
    Done(Option<Document>),
}

#[derive(Debug)]
enum SendState {
    Start(Value),
    ComputeContentHash(DocumentWire),
    ExplicitRoute(PendingDocument, DocumentKind),
    AutoRoute(PendingDocument),
    LedgerRoute {
        document: PendingDocument,
        existing: Probe,
        persist: bool,
    },
    DatabaseRoute(PendingDocument),
    End(DocumentWire),
    Failed(ErrorEventData),
}

impl SendState {
    fn name(&self) -> &'static str {
        match self {
            SendState::Start(_) => "Start",
            SendState::ComputeContentHash(_) => "ComputeContentHash",
            SendState::ExplicitRoute(..) => "ExplicitRoute",
            SendState::AutoRoute(_) => "AutoRoute",
            SendState::LedgerRoute { .. } => "LedgerRoute",
            SendState::DatabaseRoute(_) => "DatabaseRoute",
            SendState::End(_) => "End",
            SendState::Failed(_) => "Failed",
        }
    }
}

impl SendToStoreBlock {
    pub fn new(definition: BlockDefinition, services: &BlockServices) -> Result<Self, ConfigError> {
        let policy = ReconciliationPolicy::from_definition(&definition)?;
        debug!(
            block_id = %definition.id,
            route = ?policy.route,
            lookup = ?policy.lookup,
            "send-to-store block configured"
        );
        Ok(Self {
            definition,
            policy,
            store: services.store.clone(),
            ledger: services.ledger.clone(),
            settings: services.settings.clone(),
        })
    }

    async fn send_one(&self, ctx: &ExecutionContext, item: Value) -> Result<DocumentWire, ErrorEventData> {
        let mut state = SendState::Start(item);
        loop {
            trace!(block_id = %self.definition.id, state = state.name(), "send-to-store transition");
            state = match state {
                SendState::End(wire) => return Ok(wire),
                SendState::Failed(data) => return Err(data),
                other => self.step(ctx, other).await,
            };
        }
    }

    async fn step(&self, ctx: &ExecutionContext, state: SendState) -> SendState {
        match state {
            SendState::Start(item) => match serde_json::from_value::<DocumentWire>(item) {
                Ok(wire) => SendState::ComputeContentHash(wire),
                Err(e) => SendState::Failed(self.failure(
                    ErrorKind::InvalidPayload,
                    format!("not a document: {}", e),
                    None,
                )),
            },
            SendState::ComputeContentHash(wire) => match PendingDocument::from_wire(wire, ctx.actor()) {
                Ok(document) => self.select_route(document),
                Err(reason) => SendState::Failed(self.failure(ErrorKind::InvalidPayload, reason, None)),
            },
            SendState::ExplicitRoute(mut document, kind) => {
                document.kind = kind;
                SendState::DatabaseRoute(document)
            }
            SendState::AutoRoute(document) => self.auto_route(document).await,
            SendState::LedgerRoute {
                document,
                existing,
                persist,
            } => self.ledger_route(ctx, document, existing, persist).await,
            SendState::DatabaseRoute(document) => self.database_route(ctx, document).await,
            terminal @ (SendState::End(_) | SendState::Failed(_)) => terminal,
        }
    }

    fn select_route(&self, document: PendingDocument) -> SendState {
        match self.policy.route {
            Route::Explicit(kind) => SendState::ExplicitRoute(document, kind),
            Route::LedgerOnly => SendState::LedgerRoute {
                document,
                existing: Probe::NotNeeded,
                persist: false,
            },
            Route::Database => SendState::DatabaseRoute(document),
            Route::Ledger => SendState::LedgerRoute {
                document,
                existing: Probe::Pending,
                persist: true,
            },
            Route::Auto => SendState::AutoRoute(document),
        }
    }

    /// Publish only when the content differs from what the ledger last saw
    async fn auto_route(&self, document: PendingDocument) -> SendState {
        let existing = match self.probe(&document).await {
            Ok(existing) => existing,
            Err(e) => return SendState::Failed(self.store_failure(&document, e)),
        };

        let stored_message_hash = document.message_hash.clone().or_else(|| {
            existing
                .as_ref()
                .map(|d| d.message_hash.clone().unwrap_or_else(|| d.content_hash.clone()))
        });

        if stored_message_hash.as_deref() == Some(document.content_hash.as_str()) {
            debug!(
                block_id = %self.definition.id,
                hash = %document.content_hash,
                "Message hash unchanged, skipping ledger"
            );
            SendState::DatabaseRoute(document)
        } else {
            SendState::LedgerRoute {
                document,
                existing: Probe::Done(existing),
                persist: true,
            }
        }
    }

    async fn ledger_route(
        &self,
        ctx: &ExecutionContext,
        mut document: PendingDocument,
        existing: Probe,
        persist: bool,
    ) -> SendState {
        let existing = match existing {
            Probe::Done(existing) => existing,
            Probe::Pending => match self.probe(&document).await {
                Ok(existing) => existing,
                Err(e) => return SendState::Failed(self.store_failure(&document, e)),
            },
            Probe::NotNeeded => None,
        };

        let action = if existing.is_some() || document.inbound_message_id.is_some() {
            MessageAction::UpdateDocument
        } else {
            MessageAction::CreateDocument
        };

        match self.publish(ctx.actor(), &document, action).await {
            Ok(receipt) => {
                document.record_publish(receipt);
                if persist {
                    SendState::DatabaseRoute(document)
                } else {
                    let wire = document.to_wire();
                    let mut state = ctx.state().await;
                    record_state(&mut state, &wire);
                    SendState::End(wire)
                }
            }
            Err(e) => SendState::Failed(self.failure(
                ErrorKind::PublishError,
                e.to_string(),
                Some(&document.content_hash),
            )),
        }
    }

    async fn database_route(&self, ctx: &ExecutionContext, document: PendingDocument) -> SendState {
        let pending = &document;
        match self
            .with_store_retry("persist", move || self.persist_once(ctx, pending))
            .await
        {
            Ok(Ok(stored)) => {
                info!(
                    block_id = %self.definition.id,
                    document_id = %stored.id,
                    version = stored.version,
                    status = %stored.status,
                    "Document stored"
                );
                SendState::End(stored.to_wire())
            }
            Ok(Err(reason)) => SendState::Failed(self.failure(
                ErrorKind::ReconciliationAmbiguity,
                reason,
                Some(&document.content_hash),
            )),
            Err(e) => SendState::Failed(self.store_failure(&document, e)),
        }
    }

    /// One reconcile-and-write attempt under the state lock. The inner
    /// `Err` is a reconciliation miss that no retry can fix.
    async fn persist_once(
        &self,
        ctx: &ExecutionContext,
        document: &PendingDocument,
    ) -> Result<Result<Document, String>, StoreError> {
        let mut state = ctx.state().await;

        let plan = self.plan(document);
        let decision = match self.lookup(&plan, document).await? {
            Some(decision) => decision,
            None if plan.allow_create => ReconciliationDecision::CreateNew,
            None => return Ok(Err(miss_reason(&plan, document))),
        };

        let label = decision.label();
        debug!(block_id = %self.definition.id, decision = label, "Reconciled document");
        metrics::counter!("guardian_documents_persisted_total", "decision" => label).increment(1);

        let (superseded, written) = match decision.into_existing() {
            None => {
                let superseded = if document.status != Some(DocumentStatus::Revoked) {
                    self.supersede(&document.owner, &document.content_hash, None).await?
                } else {
                    Vec::new()
                };
                (superseded, self.store.create(document.to_new_document()).await)
            }
            Some(mut existing) => {
                document.apply_to(&mut existing);
                let superseded = if existing.is_active() {
                    self.supersede(&existing.owner, &existing.content_hash, Some(&existing.id))
                        .await?
                } else {
                    Vec::new()
                };
                (superseded, self.store.update(&existing).await)
            }
        };

        let stored = match written {
            Ok(stored) => stored,
            Err(e) => {
                self.restore(superseded).await;
                return Err(e);
            }
        };

        record_state(&mut state, &stored.to_wire());
        Ok(Ok(stored))
    }

    fn plan(&self, document: &PendingDocument) -> LookupPlan {
        self.policy.lookup_plan(
            document.inbound_id.as_deref(),
            document.inbound_message_id.as_deref(),
        )
    }

    /// Walk the lookup plan; the first active hit wins
    async fn lookup(
        &self,
        plan: &LookupPlan,
        document: &PendingDocument,
    ) -> Result<Option<ReconciliationDecision>, StoreError> {
        for step in &plan.steps {
            match step {
                LookupStep::ById(id) => match self.store.find_by_id(id).await? {
                    Some(found) if found.is_active() => {
                        return Ok(Some(ReconciliationDecision::UpdateById(found)));
                    }
                    Some(_) => debug!(document_id = %id, "Ignoring revoked document"),
                    None => {}
                },
                LookupStep::ByExternalMessageId(message_id) => {
                    if let Some(found) = self
                        .store
                        .find_by_external_message_id(message_id, Some(DocumentStatus::Revoked))
                        .await?
                    {
                        return Ok(Some(ReconciliationDecision::UpdateByExternalMessageId(found)));
                    }
                }
                LookupStep::ByHash => {
                    if let Some(found) = self.find_active_by_hash(document).await? {
                        return Ok(Some(ReconciliationDecision::UpdateByHash(found)));
                    }
                }
            }
        }
        Ok(None)
    }

    async fn find_active_by_hash(&self, document: &PendingDocument) -> Result<Option<Document>, StoreError> {
        Ok(self
            .store
            .find_by_hash(
                &document.content_hash,
                Some(&document.owner),
                Some(DocumentStatus::Revoked),
            )
            .await?
            .into_iter()
            .next())
    }

    /// Read-only lookup of the row this document relates to
    async fn probe(&self, document: &PendingDocument) -> Result<Option<Document>, StoreError> {
        self.with_store_retry("lookup", move || async move {
            let plan = self.plan(document);
            if let Some(decision) = self.lookup(&plan, document).await? {
                return Ok(decision.into_existing());
            }
            if plan.steps.contains(&LookupStep::ByHash) {
                return Ok(None);
            }
            self.find_active_by_hash(document).await
        })
        .await
    }

    /// Revoke other active rows holding `(owner, hash)`. Returns each revoked
    /// row as stored, paired with the status it had before.
    async fn supersede(
        &self,
        owner: &str,
        hash: &str,
        keep: Option<&DocumentId>,
    ) -> Result<Vec<(Document, DocumentStatus)>, StoreError> {
        let active = self
            .store
            .find_by_hash(hash, Some(owner), Some(DocumentStatus::Revoked))
            .await?;
        let mut revoked = Vec::new();
        for mut previous in active.into_iter().filter(|d| Some(&d.id) != keep) {
            info!(
                block_id = %self.definition.id,
                document_id = %previous.id,
                hash = %hash,
                "Revoking superseded document"
            );
            let status = previous.status;
            previous.revoke();
            match self.store.update(&previous).await {
                Ok(stored) => revoked.push((stored, status)),
                Err(e) => {
                    self.restore(revoked).await;
                    return Err(e);
                }
            }
        }
        Ok(revoked)
    }

    /// Put superseded rows back after the write that replaced them failed
    async fn restore(&self, superseded: Vec<(Document, DocumentStatus)>) {
        for (mut document, status) in superseded {
            document.status = status;
            match self.store.update(&document).await {
                Ok(_) => warn!(
                    block_id = %self.definition.id,
                    document_id = %document.id,
                    "Restored superseded document after failed write"
                ),
                Err(e) => error!(
                    block_id = %self.definition.id,
                    document_id = %document.id,
                    "Failed to restore superseded document: {}",
                    e
                ),
            }
        }
    }

    async fn publish(
        &self,
        actor: &Actor,
        document: &PendingDocument,
        action: MessageAction,
    ) -> Result<PublishReceipt, PublishError> {
        let topic = match self.policy.topic_owner {
            TopicOwner::User => TopicRef::user(actor.identity()),
            TopicOwner::Issuer => TopicRef::issuer(self.settings.issuer_topic.clone()),
        };
        let message = document.wire_message(action);
        let timeout = self.settings.publish_timeout;
        let attempts = 1 + self.settings.publish_retries;

        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = match tokio::time::timeout(timeout, self.ledger.send(&topic, &message)).await {
                Ok(result) => result,
                Err(_) => Err(PublishError::Timeout(timeout)),
            };

            match result {
                Ok(receipt) => {
                    metrics::counter!("guardian_ledger_publish_total", "outcome" => "ok").increment(1);
                    info!(
                        block_id = %self.definition.id,
                        topic = %topic,
                        message_id = %receipt.external_message_id,
                        attempt,
                        "Document published"
                    );
                    return Ok(receipt);
                }
                Err(e) if e.is_transient() && attempt < attempts => {
                    warn!(
                        block_id = %self.definition.id,
                        topic = %topic,
                        attempt,
                        "Ledger publish failed, retrying: {}",
                        e
                    );
                }
                Err(e) => {
                    metrics::counter!("guardian_ledger_publish_total", "outcome" => "failed").increment(1);
                    return Err(e);
                }
            }
        }
    }

    async fn with_store_retry<T, F, Fut>(&self, operation: &'static str, mut attempt_fn: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut retries = 0;
        loop {
            match attempt_fn().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && retries < self.settings.store_retries => {
                    retries += 1;
                    warn!(
                        block_id = %self.definition.id,
                        operation,
                        retry = retries,
                        "Store operation failed, retrying: {}",
                        e
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn failure(&self, kind: ErrorKind, reason: impl Into<String>, hash: Option<&str>) -> ErrorEventData {
        let data = ErrorEventData::new(kind, self.definition.id.clone(), reason);
        match hash {
            Some(hash) => data.with_document_hash(hash),
            None => data,
        }
    }

    fn store_failure(&self, document: &PendingDocument, err: StoreError) -> ErrorEventData {
        self.failure(ErrorKind::StoreError, err.to_string(), Some(&document.content_hash))
    }
}

fn record_state(state: &mut BlockRuntimeState, wire: &DocumentWire) {
    if let Some(id) = &wire.id {
        state.set(STATE_LAST_DOCUMENT_ID, json!(id));
    }
    if let Some(hash) = &wire.hash {
        state.set(STATE_LAST_CONTENT_HASH, json!(hash));
    }
    if let Some(message_id) = &wire.message_id {
        state.set(STATE_LAST_MESSAGE_ID, json!(message_id));
    }
}

fn miss_reason(plan: &LookupPlan, document: &PendingDocument) -> String {
    if plan.steps.is_empty() {
        return "operation 'update' needs a lookup key the payload does not carry".to_string();
    }
    let keys: Vec<&str> = plan
        .steps
        .iter()
        .map(|step| match step {
            LookupStep::ById(_) => "id",
            LookupStep::ByExternalMessageId(_) => "messageId",
            LookupStep::ByHash => "hash",
        })
        .collect();
    format!(
        "no active document to update (looked up by {}) for hash {}",
        keys.join(", "),
        document.content_hash
    )
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[async_trait]
impl Block for SendToStoreBlock {
    fn definition(&self) -> &BlockDefinition {
        &self.definition
    }

    async fn run(&self, ctx: ExecutionContext) -> Result<BlockOutcome, BlockError> {
        let (items, batch) = match &ctx.event.data {
            Value::Array(items) => (items.clone(), true),
            Value::Object(_) => (vec![ctx.event.data.clone()], false),
            other => {
                return Err(BlockError::InvalidPayload(format!(
                    "expected a document or an array of documents, got {}",
                    json_kind(other)
                )));
            }
        };

        let mut stored = Vec::new();
        let mut events = Vec::new();
        for item in items {
            match self.send_one(&ctx, item).await {
                Ok(wire) => stored.push(wire),
                Err(failure) => {
                    error!(
                        block_id = %self.definition.id,
                        kind = %failure.kind,
                        hash = failure.document_hash.as_deref().unwrap_or(""),
                        "Document send failed: {}",
                        failure.reason
                    );
                    events.push(Event::error(
                        self.definition.id.clone(),
                        ctx.actor().clone(),
                        failure,
                    ));
                }
            }
        }

        if stored.is_empty() {
            return Ok(BlockOutcome::new(events));
        }

        let count = stored.len();
        let data = if batch {
            serde_json::to_value(&stored)
        } else {
            serde_json::to_value(&stored[0])
        }
        .map_err(|e| BlockError::Other(e.into()))?;

        events.push(ctx.emit(EventType::run(), data));
        events.push(ctx.emit(
            EventType::refresh(),
            json!({
                "blockId": self.definition.id,
                "actorId": ctx.actor().id,
                "documents": count,
            }),
        ));
        Ok(BlockOutcome::new(events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::runtime_state::StateKey;
    use crate::domain::block::{BlockOptions, SEND_TO_STORE_BLOCK};
    use crate::infrastructure::ledger::InMemoryLedger;
    use crate::infrastructure::repositories::InMemoryDocumentStore;
    use std::time::Duration;

    struct Fixture {
        store: InMemoryDocumentStore,
        ledger: InMemoryLedger,
        services: BlockServices,
    }

    fn fixture() -> Fixture {
        let store = InMemoryDocumentStore::new();
        let ledger = InMemoryLedger::new();
        let settings = EngineSettings {
            publish_timeout: Duration::from_secs(1),
            ..EngineSettings::default()
        };
        let services = BlockServices::new(Arc::new(store.clone()), Arc::new(ledger.clone()), settings);
        Fixture {
            store,
            ledger,
            services,
        }
    }

    fn block(fixture: &Fixture, options: BlockOptions) -> SendToStoreBlock {
        let definition = BlockDefinition::new("save", SEND_TO_STORE_BLOCK).with_options(options);
        SendToStoreBlock::new(definition, &fixture.services).unwrap()
    }

    fn ctx(fixture: &Fixture, data: Value) -> ExecutionContext {
        let event = Event::new(EventType::run(), "external".into(), Actor::new("user-1").with_did("did:1"), data);
        ExecutionContext::new("save".into(), event, fixture.services.state.clone())
    }

    fn run_events(outcome: &BlockOutcome) -> Vec<&Event> {
        outcome
            .events
            .iter()
            .filter(|e| e.event_type == EventType::run())
            .collect()
    }

    #[tokio::test]
    async fn test_database_create_emits_run_and_refresh() {
        let f = fixture();
        let block = block(&f, BlockOptions::default().data_source("database").operation("create"));

        let outcome = block
            .run(ctx(&f, json!({ "owner": "did:1", "document": { "name": "alice" } })))
            .await
            .unwrap();

        assert_eq!(outcome.events.len(), 2);
        assert_eq!(outcome.events[0].event_type, EventType::run());
        assert_eq!(outcome.events[1].event_type, EventType::refresh());
        assert_eq!(outcome.events[0].data["status"], "NEW");
        assert_eq!(outcome.events[0].data["hash"], content_hash(&json!({ "name": "alice" })));
        assert_eq!(f.store.len(), 1);
        assert_eq!(f.ledger.attempts(), 0);
    }

    #[tokio::test]
    async fn test_explicit_data_type_sets_kind_and_skips_ledger() {
        let f = fixture();
        let block = block(&f, BlockOptions::default().data_type("did"));

        let outcome = block
            .run(ctx(&f, json!({ "owner": "did:1", "type": "vc", "document": { "id": "did:1" } })))
            .await
            .unwrap();

        assert_eq!(run_events(&outcome)[0].data["type"], "did");
        assert_eq!(f.ledger.attempts(), 0);
    }

    #[tokio::test]
    async fn test_ledger_only_does_not_persist() {
        let f = fixture();
        let block = block(&f, BlockOptions::default().data_type("hedera").topic_owner("user"));

        let outcome = block
            .run(ctx(&f, json!({ "owner": "did:1", "document": { "a": 1 } })))
            .await
            .unwrap();

        let published = f.ledger.messages();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].topic, TopicRef::user("did:1"));
        assert!(f.store.is_empty());
        assert_eq!(
            run_events(&outcome)[0].data["messageId"],
            json!(published[0].receipt.external_message_id)
        );
    }

    #[tokio::test]
    async fn test_update_by_message_id_miss_is_ambiguity() {
        let f = fixture();
        let block = block(
            &f,
            BlockOptions::default()
                .data_source("database")
                .operation("update")
                .update_by("messageId"),
        );

        let outcome = block
            .run(ctx(
                &f,
                json!({ "owner": "did:1", "messageId": "1.000000001", "document": { "a": 1 } }),
            ))
            .await
            .unwrap();

        assert_eq!(outcome.events.len(), 1);
        let error = outcome.events[0].error_data().unwrap();
        assert_eq!(error.kind, ErrorKind::ReconciliationAmbiguity);
        assert!(error.document_hash.is_some());
        assert!(f.store.is_empty());
    }

    #[tokio::test]
    async fn test_batch_reports_each_failure() {
        let f = fixture();
        let block = block(&f, BlockOptions::default().data_source("database"));

        let outcome = block
            .run(ctx(
                &f,
                json!([
                    { "owner": "did:1", "document": { "n": 1 } },
                    { "owner": "did:1" },
                    { "owner": "did:1", "status": "ARCHIVED", "document": { "n": 3 } },
                    { "owner": "did:1", "document": { "n": 4 } }
                ]),
            ))
            .await
            .unwrap();

        let errors: Vec<_> = outcome.events.iter().filter_map(Event::error_data).collect();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|e| e.kind == ErrorKind::InvalidPayload));

        let runs = run_events(&outcome);
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].data.as_array().map(Vec::len), Some(2));
        assert_eq!(f.store.len(), 2);
    }

    #[tokio::test]
    async fn test_non_document_payload_fails_block() {
        let f = fixture();
        let block = block(&f, BlockOptions::default());
        let err = block.run(ctx(&f, json!("hello"))).await.unwrap_err();
        assert!(matches!(err, BlockError::InvalidPayload(_)));
    }

    #[tokio::test]
    async fn test_runtime_state_records_last_document() {
        let f = fixture();
        let block = block(&f, BlockOptions::default());

        block
            .run(ctx(&f, json!({ "owner": "did:1", "document": { "a": 1 } })))
            .await
            .unwrap();

        let stored = f.store.list_all();
        let state = f
            .services
            .state
            .lock(&StateKey::new("save".into(), "user-1"))
            .await;
        assert_eq!(state.get(STATE_LAST_DOCUMENT_ID), Some(&json!(stored[0].id.to_string())));
        assert_eq!(
            state.get(STATE_LAST_MESSAGE_ID),
            Some(&json!(f.ledger.messages()[0].receipt.external_message_id))
        );
    }
}
