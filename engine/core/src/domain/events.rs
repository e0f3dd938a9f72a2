// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use serde::{Deserialize, Serialize};

use crate::domain::block::BlockId;

pub const RUN_EVENT: &str = "RunEvent";
pub const REFRESH_EVENT: &str = "RefreshEvent";
pub const ERROR_EVENT: &str = "ErrorEvent";
pub const RELEASE_EVENT: &str = "ReleaseEvent";

/// Named event type (e.g. "RunEvent"). Block ports are declared in terms of these.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventType(String);

impl EventType {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Continue the pipeline with the block's result
    pub fn run() -> Self {
        Self::new(RUN_EVENT)
    }

    /// State/UI refresh signal
    pub fn refresh() -> Self {
        Self::new(REFRESH_EVENT)
    }

    pub fn error() -> Self {
        Self::new(ERROR_EVENT)
    }

    /// Drops the target block's runtime state for the event's actor
    pub fn release() -> Self {
        Self::new(RELEASE_EVENT)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Signals are always delivered to observers and never reported as unroutable
    pub fn is_signal(&self) -> bool {
        self.0 == ERROR_EVENT || self.0 == REFRESH_EVENT
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EventType {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// The user (or service identity) on whose behalf an event travels
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub did: Option<String>,
}

impl Actor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            did: None,
        }
    }

    pub fn with_did(mut self, did: impl Into<String>) -> Self {
        self.did = Some(did.into());
        self
    }

    /// DID if known, otherwise the plain id
    pub fn identity(&self) -> &str {
        self.did.as_deref().unwrap_or(&self.id)
    }
}

/// A directed, single-hop event between blocks.
///
/// When `target_block_id` is absent the bus resolves targets through the
/// wiring table built at workflow load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub source_block_id: BlockId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_block_id: Option<BlockId>,
    pub actor: Actor,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Event {
    pub fn new(
        event_type: EventType,
        source_block_id: BlockId,
        actor: Actor,
        data: serde_json::Value,
    ) -> Self {
        Self {
            event_type,
            source_block_id,
            target_block_id: None,
            actor,
            data,
        }
    }

    pub fn with_target(mut self, target: BlockId) -> Self {
        self.target_block_id = Some(target);
        self
    }

    pub fn error(source_block_id: BlockId, actor: Actor, data: ErrorEventData) -> Self {
        let data = serde_json::to_value(&data).unwrap_or(serde_json::Value::Null);
        Self::new(EventType::error(), source_block_id, actor, data)
    }

    pub fn is_error(&self) -> bool {
        self.event_type.as_str() == ERROR_EVENT
    }

    /// Decoded payload of an error event
    pub fn error_data(&self) -> Option<ErrorEventData> {
        if !self.is_error() {
            return None;
        }
        serde_json::from_value(self.data.clone()).ok()
    }
}

/// Failure classes reported through error events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    ConfigError,
    StoreError,
    PublishError,
    RoutingError,
    ReconciliationAmbiguity,
    InvalidPayload,
    BlockError,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::ConfigError => "ConfigError",
            ErrorKind::StoreError => "StoreError",
            ErrorKind::PublishError => "PublishError",
            ErrorKind::RoutingError => "RoutingError",
            ErrorKind::ReconciliationAmbiguity => "ReconciliationAmbiguity",
            ErrorKind::InvalidPayload => "InvalidPayload",
            ErrorKind::BlockError => "BlockError",
        };
        write!(f, "{}", name)
    }
}

/// Payload carried by an `ErrorEvent`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEventData {
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    pub reason: String,
    pub block_id: BlockId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_hash: Option<String>,
}

impl ErrorEventData {
    pub fn new(kind: ErrorKind, block_id: BlockId, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
            block_id,
            document_hash: None,
        }
    }

    pub fn with_document_hash(mut self, hash: impl Into<String>) -> Self {
        self.document_hash = Some(hash.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_wire_shape() {
        let raw = json!({
            "type": "RunEvent",
            "sourceBlockId": "external",
            "actor": { "id": "user-1", "did": "did:1" },
            "data": { "owner": "did:1", "document": {} }
        });
        let event: Event = serde_json::from_value(raw).unwrap();
        assert_eq!(event.event_type, EventType::run());
        assert!(event.target_block_id.is_none());
        assert_eq!(event.actor.identity(), "did:1");
    }

    #[test]
    fn test_error_event_roundtrip() {
        let data = ErrorEventData::new(ErrorKind::PublishError, BlockId::new("save"), "timed out")
            .with_document_hash("H1");
        let event = Event::error(BlockId::new("save"), Actor::new("user-1"), data.clone());

        assert!(event.is_error());
        assert_eq!(event.data["type"], "PublishError");
        assert_eq!(event.error_data(), Some(data));
    }

    #[test]
    fn test_signals() {
        assert!(EventType::error().is_signal());
        assert!(EventType::refresh().is_signal());
        assert!(!EventType::run().is_signal());
    }
}
