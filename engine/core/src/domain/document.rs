// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Document Domain Model
//!
//! The versioned business record the engine creates, updates and reconciles.
//!
//! # Invariants
//! - At most one active (non-Revoked) document per `(owner, content_hash)`
//! - Documents are never deleted, only marked [`DocumentStatus::Revoked`]
//! - `version` increases by one on every successful update

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Value Objects
// ============================================================================

/// Storage key, assigned by the store on first save
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    #[default]
    New,
    Issued,
    Revoked,
    Failed,
}

impl FromStr for DocumentStatus {
    type Err = DocumentError;

    /// Accepts both the engine's names and the legacy verb forms ("ISSUE", "REVOKE")
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "new" => Ok(Self::New),
            "issued" | "issue" => Ok(Self::Issued),
            "revoked" | "revoke" => Ok(Self::Revoked),
            "failed" => Ok(Self::Failed),
            _ => Err(DocumentError::UnknownStatus(s.to_string())),
        }
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DocumentStatus::New => "NEW",
            DocumentStatus::Issued => "ISSUED",
            DocumentStatus::Revoked => "REVOKED",
            DocumentStatus::Failed => "FAILED",
        };
        write!(f, "{}", name)
    }
}

/// Document family; selects the wire action and the persisted `type`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    #[default]
    Vc,
    Did,
    Approval,
}

impl FromStr for DocumentKind {
    type Err = DocumentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "vc" | "vc-document" => Ok(Self::Vc),
            "did" | "did-document" => Ok(Self::Did),
            "approval" | "approve" => Ok(Self::Approval),
            _ => Err(DocumentError::UnknownKind(s.to_string())),
        }
    }
}

impl std::fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DocumentKind::Vc => "vc",
            DocumentKind::Did => "did",
            DocumentKind::Approval => "approval",
        };
        write!(f, "{}", name)
    }
}

/// Deterministic SHA-256 (hex) of a payload's canonical JSON form.
///
/// Object keys are sorted at every depth before serializing, so equal
/// payloads hash equally whatever key order they arrived with.
pub fn content_hash(payload: &serde_json::Value) -> String {
    hex::encode(Sha256::digest(canonical_json(payload).as_bytes()))
}

/// Compact JSON with object keys in byte order
fn canonical_json(payload: &serde_json::Value) -> String {
    canonicalize(payload).to_string()
}

fn canonicalize(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            serde_json::Value::Object(
                entries
                    .into_iter()
                    .map(|(key, value)| (key.clone(), canonicalize(value)))
                    .collect(),
            )
        }
        serde_json::Value::Array(items) => serde_json::Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

// ============================================================================
// Wire shape
// ============================================================================

/// Minimum shape an external payload must have to enter the engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentWire {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_id: Option<String>,
    pub owner: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub document_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relationships: Vec<String>,
    pub document: serde_json::Value,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

impl DocumentWire {
    pub fn id(&self) -> Option<&str> {
        non_empty(&self.id)
    }

    pub fn hash(&self) -> Option<&str> {
        non_empty(&self.hash)
    }

    pub fn message_id(&self) -> Option<&str> {
        non_empty(&self.message_id)
    }

    pub fn message_hash(&self) -> Option<&str> {
        non_empty(&self.message_hash)
    }

    pub fn topic_id(&self) -> Option<&str> {
        non_empty(&self.topic_id)
    }
}

// ============================================================================
// Aggregate: Document
// ============================================================================

/// Persisted document row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub external_message_id: Option<String>,
    pub topic_id: Option<String>,
    /// Content hash at the time of the last successful ledger publish
    pub message_hash: Option<String>,
    pub content_hash: String,
    pub status: DocumentStatus,
    pub kind: DocumentKind,
    pub owner: String,
    pub payload: serde_json::Value,
    pub relationships: Vec<DocumentId>,
    /// Optimistic concurrency token
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn is_active(&self) -> bool {
        self.status != DocumentStatus::Revoked
    }

    pub fn revoke(&mut self) {
        self.status = DocumentStatus::Revoked;
    }

    pub fn to_wire(&self) -> DocumentWire {
        DocumentWire {
            id: Some(self.id.to_string()),
            hash: Some(self.content_hash.clone()),
            message_id: self.external_message_id.clone(),
            message_hash: self.message_hash.clone(),
            topic_id: self.topic_id.clone(),
            owner: self.owner.clone(),
            status: Some(self.status.to_string()),
            document_type: Some(self.kind.to_string()),
            relationships: self.relationships.iter().map(|r| r.to_string()).collect(),
            document: self.payload.clone(),
        }
    }
}

/// Fields for a document that has not been saved yet; the store assigns
/// `id`, `version` and timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct NewDocument {
    pub external_message_id: Option<String>,
    pub topic_id: Option<String>,
    pub message_hash: Option<String>,
    pub content_hash: String,
    pub status: DocumentStatus,
    pub kind: DocumentKind,
    pub owner: String,
    pub payload: serde_json::Value,
    pub relationships: Vec<DocumentId>,
}

impl NewDocument {
    pub fn new(kind: DocumentKind, owner: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            external_message_id: None,
            topic_id: None,
            message_hash: None,
            content_hash: content_hash(&payload),
            status: DocumentStatus::New,
            kind,
            owner: owner.into(),
            payload,
            relationships: Vec::new(),
        }
    }

    pub fn with_content_hash(mut self, hash: impl Into<String>) -> Self {
        self.content_hash = hash.into();
        self
    }

    pub fn with_status(mut self, status: DocumentStatus) -> Self {
        self.status = status;
        self
    }

    pub fn into_document(self, id: DocumentId, now: DateTime<Utc>) -> Document {
        Document {
            id,
            external_message_id: self.external_message_id,
            topic_id: self.topic_id,
            message_hash: self.message_hash,
            content_hash: self.content_hash,
            status: self.status,
            kind: self.kind,
            owner: self.owner,
            payload: self.payload,
            relationships: self.relationships,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DocumentError {
    #[error("Unknown document status: {0}")]
    UnknownStatus(String),

    #[error("Unknown document type: {0}")]
    UnknownKind(String),
}
