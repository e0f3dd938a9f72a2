// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Block Definitions
//!
//! Static configuration for a block: identity, type, declared input/output
//! event ports and the raw `options` bag. Definitions are immutable once a
//! workflow is loaded; anything derived from the options (see
//! [`crate::domain::reconciliation::ReconciliationPolicy`]) is computed once at
//! load time.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

use crate::domain::events::EventType;
use crate::domain::workflow::ConfigError;

/// Block type handled by the built-in document send/reconciliation block.
pub const SEND_TO_STORE_BLOCK: &str = "send-to-store";

// ============================================================================
// Value Objects: Identifiers
// ============================================================================

/// Unique identifier of a block within a workflow (e.g. "save-vc")
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(String);

impl BlockId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Source id used for events entering the engine from outside the graph
    pub fn external() -> Self {
        Self("external".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for BlockId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

// ============================================================================
// Block Definition
// ============================================================================

/// Immutable block configuration loaded from a workflow manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockDefinition {
    pub id: BlockId,

    #[serde(rename = "type")]
    pub block_type: String,

    /// Event types this block consumes
    #[serde(default)]
    pub inputs: Vec<EventType>,

    /// Event types this block may emit
    #[serde(default)]
    pub outputs: Vec<EventType>,

    #[serde(default)]
    pub options: BlockOptions,
}

impl BlockDefinition {
    pub fn new(id: impl Into<String>, block_type: impl Into<String>) -> Self {
        Self {
            id: BlockId::new(id),
            block_type: block_type.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            options: BlockOptions::default(),
        }
    }

    pub fn with_inputs(mut self, inputs: impl IntoIterator<Item = EventType>) -> Self {
        self.inputs = inputs.into_iter().collect();
        self
    }

    pub fn with_outputs(mut self, outputs: impl IntoIterator<Item = EventType>) -> Self {
        self.outputs = outputs.into_iter().collect();
        self
    }

    pub fn with_options(mut self, options: BlockOptions) -> Self {
        self.options = options;
        self
    }

    pub fn accepts(&self, event_type: &EventType) -> bool {
        self.inputs.iter().any(|input| input == event_type)
    }

    pub fn emits(&self, event_type: &EventType) -> bool {
        self.outputs.iter().any(|output| output == event_type)
    }
}

/// Raw options bag as written in the manifest.
///
/// Values stay as strings here so that an unknown value is reported as a
/// [`ConfigError`] naming the block, rather than as an opaque YAML error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_source: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_by: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_owner: Option<String>,

    /// Options understood by other block types
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl BlockOptions {
    pub fn data_source(mut self, value: impl Into<String>) -> Self {
        self.data_source = Some(value.into());
        self
    }

    pub fn data_type(mut self, value: impl Into<String>) -> Self {
        self.data_type = Some(value.into());
        self
    }

    pub fn operation(mut self, value: impl Into<String>) -> Self {
        self.operation = Some(value.into());
        self
    }

    pub fn update_by(mut self, value: impl Into<String>) -> Self {
        self.update_by = Some(value.into());
        self
    }

    pub fn topic_owner(mut self, value: impl Into<String>) -> Self {
        self.topic_owner = Some(value.into());
        self
    }
}

// ============================================================================
// Closed option enums
// ============================================================================

/// Where a document is sent: the database, the ledger, or decided per document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    Auto,
    Database,
    Hedera,
}

/// Explicit document type override; `Hedera` means publish-only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Vc,
    Did,
    Approval,
    Hedera,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Update,
}

/// Key used to find the row an update applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UpdateBy {
    Id,
    Hash,
    MessageId,
}

/// Whose ledger topic receives published documents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopicOwner {
    User,
    #[default]
    Issuer,
}

fn invalid(option: &'static str, value: &str) -> ConfigError {
    ConfigError::InvalidOption {
        block_id: None,
        option,
        value: value.to_string(),
    }
}

impl FromStr for DataSource {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Self::Auto),
            "database" => Ok(Self::Database),
            "hedera" => Ok(Self::Hedera),
            other => Err(invalid("dataSource", other)),
        }
    }
}

impl FromStr for DataType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vc" => Ok(Self::Vc),
            "did" => Ok(Self::Did),
            "approval" => Ok(Self::Approval),
            "hedera" => Ok(Self::Hedera),
            other => Err(invalid("dataType", other)),
        }
    }
}

impl FromStr for Operation {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            other => Err(invalid("operation", other)),
        }
    }
}

impl FromStr for UpdateBy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "id" => Ok(Self::Id),
            "hash" => Ok(Self::Hash),
            "messageId" => Ok(Self::MessageId),
            other => Err(invalid("updateBy", other)),
        }
    }
}

impl FromStr for TopicOwner {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "issuer" => Ok(Self::Issuer),
            other => Err(invalid("topicOwner", other)),
        }
    }
}
