// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Document Store Interface
//!
//! Persistence contract consumed by blocks. Blocks never perform disk or
//! network I/O of their own; every read and write of a [`Document`] goes
//! through this trait.
//!
//! | Trait | Aggregate | Implementations |
//! |-------|-----------|----------------|
//! | `DocumentStore` | `Document` | `InMemoryDocumentStore` |
//!
//! Implementations must enforce two rules:
//! - `update` rejects a writer whose `version` is stale ([`StoreError::Conflict`])
//! - no write may leave two active documents for the same `(owner, content_hash)`

use async_trait::async_trait;

use crate::domain::document::{Document, DocumentId, DocumentStatus, NewDocument};

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Documents with the given content hash, optionally restricted to one
    /// owner and excluding one status (typically `Revoked`)
    async fn find_by_hash(
        &self,
        hash: &str,
        owner: Option<&str>,
        exclude_status: Option<DocumentStatus>,
    ) -> Result<Vec<Document>, StoreError>;

    /// Find document by storage id (any status)
    async fn find_by_id(&self, id: &DocumentId) -> Result<Option<Document>, StoreError>;

    /// Find document by ledger-assigned message id
    async fn find_by_external_message_id(
        &self,
        message_id: &str,
        exclude_status: Option<DocumentStatus>,
    ) -> Result<Option<Document>, StoreError>;

    /// Insert a new row; the store assigns id, version and timestamps
    async fn create(&self, document: NewDocument) -> Result<Document, StoreError>;

    /// Replace an existing row. `document.version` must match the stored
    /// version; the returned row carries the incremented version.
    async fn update(&self, document: &Document) -> Result<Document, StoreError>;
}

/// Store errors
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Write conflict: {0}")]
    Conflict(String),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Whether re-reading and retrying the operation can succeed
    pub fn is_retryable(&self) -> bool {
        !matches!(self, StoreError::NotFound(_))
    }
}
