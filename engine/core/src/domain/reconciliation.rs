// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Reconciliation Policy
//!
//! Resolves a `send-to-store` block's string options into closed enums once,
//! at workflow load, and answers two questions per inbound document:
//!
//! 1. **Route**: persist only, publish only, or both (and whether the
//!    message-hash gate decides).
//! 2. **Lookup plan**: which keys to try, in order, when looking for the row
//!    an inbound document should update, and whether a miss may create.
//!
//! ```text
//! dataType set        -> Explicit(kind) | LedgerOnly
//! dataSource=database -> Database
//! dataSource=hedera   -> Ledger   (publish, then persist)
//! dataSource=auto     -> Auto     (publish only if the message hash changed)
//! ```

use serde::{Deserialize, Serialize};

use crate::domain::block::{
    BlockDefinition, DataSource, DataType, Operation, TopicOwner, UpdateBy,
};
use crate::domain::document::{Document, DocumentId, DocumentKind};
use crate::domain::workflow::ConfigError;

/// Which path an inbound document takes through the send block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Route {
    /// `dataType` = vc|did|approval: persist only, as that kind
    Explicit(DocumentKind),
    /// `dataType` = hedera: publish only
    LedgerOnly,
    Database,
    Ledger,
    Auto,
}

impl Route {
    pub fn publishes(&self) -> bool {
        matches!(self, Route::LedgerOnly | Route::Ledger | Route::Auto)
    }
}

/// How the existing row is located
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LookupStrategy {
    /// Always insert a new row
    Create,
    /// Update the row found by the given key (or by id-then-hash when unset);
    /// a miss is an error
    Update(Option<UpdateBy>),
    /// Id first, then hash; a miss creates
    Auto,
}

/// One lookup attempt in a plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupStep {
    ById(DocumentId),
    ByExternalMessageId(String),
    ByHash,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupPlan {
    pub steps: Vec<LookupStep>,
    pub allow_create: bool,
}

/// Outcome of reconciling an inbound document against the store
#[derive(Debug, Clone, PartialEq)]
pub enum ReconciliationDecision {
    CreateNew,
    UpdateById(Document),
    UpdateByExternalMessageId(Document),
    UpdateByHash(Document),
}

impl ReconciliationDecision {
    pub fn into_existing(self) -> Option<Document> {
        match self {
            ReconciliationDecision::CreateNew => None,
            ReconciliationDecision::UpdateById(doc)
            | ReconciliationDecision::UpdateByExternalMessageId(doc)
            | ReconciliationDecision::UpdateByHash(doc) => Some(doc),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ReconciliationDecision::CreateNew => "create-new",
            ReconciliationDecision::UpdateById(_) => "update-by-id",
            ReconciliationDecision::UpdateByExternalMessageId(_) => "update-by-message-id",
            ReconciliationDecision::UpdateByHash(_) => "update-by-hash",
        }
    }
}

/// Precomputed send-block policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationPolicy {
    pub route: Route,
    pub lookup: LookupStrategy,
    pub topic_owner: TopicOwner,
}

impl ReconciliationPolicy {
    /// Parse and validate a block's options. Every invalid combination is
    /// reported here so that a bad workflow fails to load instead of failing
    /// at run time.
    pub fn from_definition(definition: &BlockDefinition) -> Result<Self, ConfigError> {
        let id = &definition.id;
        let options = &definition.options;

        let data_type = options
            .data_type
            .as_deref()
            .map(str::parse::<DataType>)
            .transpose()
            .map_err(|e| e.for_block(id))?;
        let data_source = options
            .data_source
            .as_deref()
            .map(str::parse::<DataSource>)
            .transpose()
            .map_err(|e| e.for_block(id))?;
        let operation = options
            .operation
            .as_deref()
            .map(str::parse::<Operation>)
            .transpose()
            .map_err(|e| e.for_block(id))?;
        let update_by = options
            .update_by
            .as_deref()
            .map(str::parse::<UpdateBy>)
            .transpose()
            .map_err(|e| e.for_block(id))?;
        let topic_owner = options
            .topic_owner
            .as_deref()
            .map(str::parse::<TopicOwner>)
            .transpose()
            .map_err(|e| e.for_block(id))?;

        let combination = |reason: &str| ConfigError::InvalidCombination {
            block_id: id.clone(),
            reason: reason.to_string(),
        };

        let route = match (data_type, data_source) {
            (Some(DataType::Hedera), Some(DataSource::Database)) => {
                return Err(combination(
                    "dataType 'hedera' publishes only and cannot be combined with dataSource 'database'",
                ));
            }
            (Some(DataType::Hedera), _) => Route::LedgerOnly,
            (Some(DataType::Vc), _) => Route::Explicit(DocumentKind::Vc),
            (Some(DataType::Did), _) => Route::Explicit(DocumentKind::Did),
            (Some(DataType::Approval), _) => Route::Explicit(DocumentKind::Approval),
            (None, Some(DataSource::Database)) => Route::Database,
            (None, Some(DataSource::Hedera)) => Route::Ledger,
            (None, Some(DataSource::Auto)) | (None, None) => Route::Auto,
        };

        let lookup = match (operation, update_by) {
            (Some(Operation::Create), Some(_)) => {
                return Err(combination("updateBy requires operation 'update'"));
            }
            (None, Some(_)) => {
                return Err(combination("updateBy requires operation 'update'"));
            }
            (Some(Operation::Update), None) if route == Route::Database => {
                return Err(combination(
                    "dataSource 'database' with operation 'update' must set updateBy",
                ));
            }
            (Some(Operation::Create), None) => LookupStrategy::Create,
            (Some(Operation::Update), key) => LookupStrategy::Update(key),
            (None, None) => LookupStrategy::Auto,
        };

        if route == Route::LedgerOnly && operation.is_some() {
            return Err(combination("dataType 'hedera' does not persist; operation has no effect"));
        }

        if topic_owner.is_some() && !route.publishes() {
            return Err(combination("topicOwner is only meaningful on routes that publish"));
        }

        Ok(Self {
            route,
            lookup,
            topic_owner: topic_owner.unwrap_or_default(),
        })
    }

    /// Lookup plan for one inbound document.
    ///
    /// A non-empty inbound id takes precedence over the hash; an id miss
    /// falls back to the hash unless `updateBy` pins the key.
    pub fn lookup_plan(&self, inbound_id: Option<&str>, inbound_message_id: Option<&str>) -> LookupPlan {
        let by_id = inbound_id.map(|id| LookupStep::ById(DocumentId::new(id)));

        match self.lookup {
            LookupStrategy::Create => LookupPlan {
                steps: Vec::new(),
                allow_create: true,
            },
            LookupStrategy::Auto => LookupPlan {
                steps: by_id.into_iter().chain([LookupStep::ByHash]).collect(),
                allow_create: true,
            },
            LookupStrategy::Update(None) => LookupPlan {
                steps: by_id.into_iter().chain([LookupStep::ByHash]).collect(),
                allow_create: false,
            },
            LookupStrategy::Update(Some(UpdateBy::Id)) => LookupPlan {
                steps: by_id.into_iter().collect(),
                allow_create: false,
            },
            LookupStrategy::Update(Some(UpdateBy::MessageId)) => LookupPlan {
                steps: inbound_message_id
                    .map(|m| LookupStep::ByExternalMessageId(m.to_string()))
                    .into_iter()
                    .collect(),
                allow_create: false,
            },
            LookupStrategy::Update(Some(UpdateBy::Hash)) => LookupPlan {
                steps: vec![LookupStep::ByHash],
                allow_create: false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::block::{BlockOptions, SEND_TO_STORE_BLOCK};

    fn policy(options: BlockOptions) -> Result<ReconciliationPolicy, ConfigError> {
        let def = BlockDefinition::new("save", SEND_TO_STORE_BLOCK).with_options(options);
        ReconciliationPolicy::from_definition(&def)
    }

    #[test]
    fn test_defaults_to_auto_route_and_lookup() {
        let p = policy(BlockOptions::default()).unwrap();
        assert_eq!(p.route, Route::Auto);
        assert_eq!(p.lookup, LookupStrategy::Auto);
        assert_eq!(p.topic_owner, TopicOwner::Issuer);
    }

    #[test]
    fn test_data_type_overrides_data_source() {
        let p = policy(BlockOptions::default().data_type("did").data_source("hedera")).unwrap();
        assert_eq!(p.route, Route::Explicit(DocumentKind::Did));

        let p = policy(BlockOptions::default().data_type("hedera")).unwrap();
        assert_eq!(p.route, Route::LedgerOnly);
    }

    #[test]
    fn test_database_update_requires_update_by() {
        let err = policy(BlockOptions::default().data_source("database").operation("update")).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidCombination { .. }));

        let p = policy(
            BlockOptions::default()
                .data_source("database")
                .operation("update")
                .update_by("messageId"),
        )
        .unwrap();
        assert_eq!(p.lookup, LookupStrategy::Update(Some(UpdateBy::MessageId)));
    }

    #[test]
    fn test_update_without_key_allowed_outside_database_route() {
        let p = policy(BlockOptions::default().operation("update")).unwrap();
        assert_eq!(p.lookup, LookupStrategy::Update(None));
    }

    #[test]
    fn test_invalid_combinations() {
        assert!(policy(BlockOptions::default().operation("create").update_by("id")).is_err());
        assert!(policy(BlockOptions::default().update_by("hash")).is_err());
        assert!(policy(BlockOptions::default().data_type("hedera").data_source("database")).is_err());
        assert!(policy(BlockOptions::default().data_source("database").topic_owner("user")).is_err());
        assert!(policy(BlockOptions::default().data_type("vc").topic_owner("user")).is_err());
        assert!(policy(BlockOptions::default().operation("delete")).is_err());
    }

    #[test]
    fn test_lookup_plan_prefers_id() {
        let p = policy(BlockOptions::default()).unwrap();
        let plan = p.lookup_plan(Some("doc-1"), None);
        assert_eq!(
            plan.steps,
            vec![LookupStep::ById(DocumentId::new("doc-1")), LookupStep::ByHash]
        );
        assert!(plan.allow_create);

        let plan = p.lookup_plan(None, None);
        assert_eq!(plan.steps, vec![LookupStep::ByHash]);
    }

    #[test]
    fn test_pinned_update_key_has_no_fallback() {
        let p = policy(
            BlockOptions::default()
                .data_source("database")
                .operation("update")
                .update_by("id"),
        )
        .unwrap();
        let plan = p.lookup_plan(None, Some("1700000000.000000001"));
        assert!(plan.steps.is_empty());
        assert!(!plan.allow_create);

        let p = policy(BlockOptions::default().operation("create")).unwrap();
        let plan = p.lookup_plan(Some("doc-1"), None);
        assert!(plan.steps.is_empty());
        assert!(plan.allow_create);
    }
}
