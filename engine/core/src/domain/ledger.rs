// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Ledger Publisher Interface
//!
//! Contract for sending a document to an external append-only topic and
//! getting back the canonical message id. Retry policy belongs to the caller;
//! implementations report every failure as a [`PublishError`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::block::TopicOwner;
use crate::domain::document::{DocumentId, DocumentKind};

/// Topic a message is published to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TopicRef {
    pub owner: TopicOwner,
    /// Topic name: the issuer topic, or the owning user's identity
    pub name: String,
}

impl TopicRef {
    pub fn issuer(name: impl Into<String>) -> Self {
        Self {
            owner: TopicOwner::Issuer,
            name: name.into(),
        }
    }

    pub fn user(identity: impl Into<String>) -> Self {
        Self {
            owner: TopicOwner::User,
            name: identity.into(),
        }
    }
}

impl std::fmt::Display for TopicRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.owner {
            TopicOwner::Issuer => write!(f, "issuer:{}", self.name),
            TopicOwner::User => write!(f, "user:{}", self.name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageAction {
    CreateDocument,
    UpdateDocument,
}

/// Message body sent to the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    pub action: MessageAction,
    pub kind: DocumentKind,
    pub owner: String,
    pub content_hash: String,
    pub document: serde_json::Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relationships: Vec<DocumentId>,
}

/// Acknowledgement returned by the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishReceipt {
    pub external_message_id: String,
    pub topic_id: String,
}

#[async_trait]
pub trait LedgerPublisher: Send + Sync {
    /// Send a message and wait for the ledger acknowledgement
    async fn send(&self, topic: &TopicRef, message: &WireMessage) -> Result<PublishReceipt, PublishError>;
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum PublishError {
    #[error("Ledger rejected message: {0}")]
    Rejected(String),

    #[error("Ledger did not acknowledge within {0:?}")]
    Timeout(Duration),

    #[error("Ledger network error: {0}")]
    Network(String),
}

impl PublishError {
    /// Network failures and timeouts may succeed on a second attempt
    pub fn is_transient(&self) -> bool {
        matches!(self, PublishError::Timeout(_) | PublishError::Network(_))
    }
}
