// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! Infrastructure implementations of the domain's [`DocumentStore`] port.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Persist and retrieve documents
//! - **Pattern:** Repository (DDD), Adapter (Hexagonal Architecture)
//!
//! # Available Implementations
//!
//! - **InMemoryDocumentStore** - Thread-safe HashMap-backed storage for
//!   tests, the CLI and embedding hosts that bring no database
//!
//! The in-memory store enforces the same write rules a database-backed store
//! must: optimistic version checks on update and at most one active document
//! per `(owner, content_hash)`.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::document::{Document, DocumentId, DocumentStatus, NewDocument};
use crate::domain::repository::{DocumentStore, StoreError};

#[derive(Clone, Default)]
pub struct InMemoryDocumentStore {
    documents: Arc<RwLock<HashMap<DocumentId, Document>>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored row, oldest first
    pub fn list_all(&self) -> Vec<Document> {
        let mut documents: Vec<Document> = self.documents.read().values().cloned().collect();
        documents.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        documents
    }

    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.read().is_empty()
    }
}

fn active_duplicate<'a>(
    documents: &'a HashMap<DocumentId, Document>,
    owner: &str,
    content_hash: &str,
    except: Option<&DocumentId>,
) -> Option<&'a Document> {
    documents.values().find(|d| {
        d.is_active() && d.owner == owner && d.content_hash == content_hash && Some(&d.id) != except
    })
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn find_by_hash(
        &self,
        hash: &str,
        owner: Option<&str>,
        exclude_status: Option<DocumentStatus>,
    ) -> Result<Vec<Document>, StoreError> {
        let documents = self.documents.read();
        let mut found: Vec<Document> = documents
            .values()
            .filter(|d| d.content_hash == hash)
            .filter(|d| owner.map(|o| d.owner == o).unwrap_or(true))
            .filter(|d| Some(d.status) != exclude_status)
            .cloned()
            .collect();
        // Most recently written first
        found.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| b.version.cmp(&a.version)));
        Ok(found)
    }

    async fn find_by_id(&self, id: &DocumentId) -> Result<Option<Document>, StoreError> {
        Ok(self.documents.read().get(id).cloned())
    }

    async fn find_by_external_message_id(
        &self,
        message_id: &str,
        exclude_status: Option<DocumentStatus>,
    ) -> Result<Option<Document>, StoreError> {
        let documents = self.documents.read();
        Ok(documents
            .values()
            .find(|d| {
                d.external_message_id.as_deref() == Some(message_id) && Some(d.status) != exclude_status
            })
            .cloned())
    }

    async fn create(&self, document: NewDocument) -> Result<Document, StoreError> {
        let mut documents = self.documents.write();

        if document.status != DocumentStatus::Revoked {
            if let Some(existing) =
                active_duplicate(&documents, &document.owner, &document.content_hash, None)
            {
                return Err(StoreError::Conflict(format!(
                    "document {} is already active for hash {}",
                    existing.id, document.content_hash
                )));
            }
        }

        let stored = document.into_document(DocumentId::generate(), Utc::now());
        documents.insert(stored.id.clone(), stored.clone());
        Ok(stored)
    }

    async fn update(&self, document: &Document) -> Result<Document, StoreError> {
        let mut documents = self.documents.write();

        let current = documents
            .get(&document.id)
            .ok_or_else(|| StoreError::NotFound(document.id.to_string()))?;

        if current.version != document.version {
            return Err(StoreError::Conflict(format!(
                "document {} is at version {}, write was based on {}",
                document.id, current.version, document.version
            )));
        }

        if document.is_active() {
            if let Some(existing) = active_duplicate(
                &documents,
                &document.owner,
                &document.content_hash,
                Some(&document.id),
            ) {
                return Err(StoreError::Conflict(format!(
                    "document {} is already active for hash {}",
                    existing.id, document.content_hash
                )));
            }
        }

        let mut stored = document.clone();
        stored.version += 1;
        stored.updated_at = Utc::now();
        documents.insert(stored.id.clone(), stored.clone());
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::document::DocumentKind;
    use serde_json::json;

    fn new_doc(owner: &str, payload: serde_json::Value) -> NewDocument {
        NewDocument::new(DocumentKind::Vc, owner, payload)
    }

    #[tokio::test]
    async fn test_create_and_find() {
        let store = InMemoryDocumentStore::new();
        let created = store.create(new_doc("did:1", json!({ "a": 1 }))).await.unwrap();

        assert_eq!(created.version, 1);
        assert_eq!(store.find_by_id(&created.id).await.unwrap(), Some(created.clone()));

        let by_hash = store
            .find_by_hash(&created.content_hash, Some("did:1"), Some(DocumentStatus::Revoked))
            .await
            .unwrap();
        assert_eq!(by_hash, vec![created.clone()]);

        let other_owner = store
            .find_by_hash(&created.content_hash, Some("did:2"), None)
            .await
            .unwrap();
        assert!(other_owner.is_empty());
    }

    #[tokio::test]
    async fn test_rejects_second_active_document_for_hash() {
        let store = InMemoryDocumentStore::new();
        store.create(new_doc("did:1", json!({ "a": 1 }))).await.unwrap();

        let err = store.create(new_doc("did:1", json!({ "a": 1 }))).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        // Same content under another owner is a different document
        store.create(new_doc("did:2", json!({ "a": 1 }))).await.unwrap();
        // A revoked row never blocks
        store
            .create(new_doc("did:1", json!({ "a": 1 })).with_status(DocumentStatus::Revoked))
            .await
            .unwrap();
        assert_eq!(store.len(), 3);
    }

    #[tokio::test]
    async fn test_update_checks_version() {
        let store = InMemoryDocumentStore::new();
        let created = store.create(new_doc("did:1", json!({ "a": 1 }))).await.unwrap();

        let mut first = created.clone();
        first.status = DocumentStatus::Issued;
        let updated = store.update(&first).await.unwrap();
        assert_eq!(updated.version, 2);

        let mut stale = created.clone();
        stale.status = DocumentStatus::Failed;
        let err = store.update(&stale).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_update_unknown_document() {
        let store = InMemoryDocumentStore::new();
        let ghost = new_doc("did:1", json!({})).into_document(DocumentId::new("ghost"), Utc::now());
        let err = store.update(&ghost).await.unwrap_err();
        assert_eq!(err, StoreError::NotFound("ghost".to_string()));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_find_by_message_id_excludes_status() {
        let store = InMemoryDocumentStore::new();
        let mut doc = new_doc("did:1", json!({ "a": 1 }));
        doc.external_message_id = Some("1700000000.000000001".to_string());
        let created = store.create(doc).await.unwrap();

        let found = store
            .find_by_external_message_id("1700000000.000000001", Some(DocumentStatus::Revoked))
            .await
            .unwrap();
        assert_eq!(found.map(|d| d.id), Some(created.id.clone()));

        let mut revoked = created.clone();
        revoked.revoke();
        store.update(&revoked).await.unwrap();
        let found = store
            .find_by_external_message_id("1700000000.000000001", Some(DocumentStatus::Revoked))
            .await
            .unwrap();
        assert!(found.is_none());
    }
}
