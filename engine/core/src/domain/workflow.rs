// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Workflow Domain Model
//!
//! A workflow is a static graph of blocks. Edges are derived from the event
//! types blocks declare (an output type feeds every block declaring the same
//! input type) plus explicit [`EventLink`]s, which may also rename the event
//! type on the hop.
//!
//! # Invariants
//! - At least one block
//! - Block ids are unique
//! - Every enabled link references existing blocks

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::domain::block::{BlockDefinition, BlockId};
use crate::domain::events::EventType;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowMetadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl WorkflowMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Lowercase letters, digits and hyphens; must start with a letter
    pub fn validate_name(name: &str) -> Result<(), ConfigError> {
        let valid = name
            .chars()
            .next()
            .map(|c| c.is_ascii_lowercase())
            .unwrap_or(false)
            && name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
        if valid {
            Ok(())
        } else {
            Err(ConfigError::InvalidWorkflowName(name.to_string()))
        }
    }
}

/// Explicit edge: `source` emitting `output` delivers to `target` as `input`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLink {
    pub source: BlockId,
    pub target: BlockId,
    pub output: EventType,
    pub input: EventType,
    #[serde(default)]
    pub disabled: bool,
}

/// Validated block graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub metadata: WorkflowMetadata,
    pub blocks: Vec<BlockDefinition>,
    #[serde(default)]
    pub links: Vec<EventLink>,
}

impl WorkflowDefinition {
    pub fn new(
        metadata: WorkflowMetadata,
        blocks: Vec<BlockDefinition>,
        links: Vec<EventLink>,
    ) -> Result<Self, ConfigError> {
        if blocks.is_empty() {
            return Err(ConfigError::NoBlocks);
        }

        let mut seen = HashSet::new();
        for block in &blocks {
            if !seen.insert(block.id.clone()) {
                return Err(ConfigError::DuplicateBlock(block.id.clone()));
            }
        }

        for link in links.iter().filter(|l| !l.disabled) {
            for end in [&link.source, &link.target] {
                if !seen.contains(end) {
                    return Err(ConfigError::UnknownLinkBlock(end.clone()));
                }
            }
        }

        Ok(Self {
            metadata,
            blocks,
            links,
        })
    }

    pub fn block(&self, id: &BlockId) -> Option<&BlockDefinition> {
        self.blocks.iter().find(|b| &b.id == id)
    }

    pub fn enabled_links(&self) -> impl Iterator<Item = &EventLink> {
        self.links.iter().filter(|l| !l.disabled)
    }
}

/// Load-time configuration errors. Any of these stops the workflow from
/// starting.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Workflow must contain at least one block")]
    NoBlocks,

    #[error("Invalid workflow name '{0}': use lowercase letters, digits and hyphens")]
    InvalidWorkflowName(String),

    #[error("Duplicate block id: {0}")]
    DuplicateBlock(BlockId),

    #[error("Event link references unknown block: {0}")]
    UnknownLinkBlock(BlockId),

    #[error("Block '{block_id}' has unknown type '{block_type}'")]
    UnknownBlockType { block_id: BlockId, block_type: String },

    #[error("Invalid value '{value}' for option '{option}'{}", block_suffix(.block_id))]
    InvalidOption {
        block_id: Option<BlockId>,
        option: &'static str,
        value: String,
    },

    #[error("Block '{block_id}': {reason}")]
    InvalidCombination { block_id: BlockId, reason: String },
}

fn block_suffix(block_id: &Option<BlockId>) -> String {
    block_id
        .as_ref()
        .map(|id| format!(" on block '{}'", id))
        .unwrap_or_default()
}

impl ConfigError {
    /// Attach the offending block id to an option error raised while parsing
    pub fn for_block(self, id: &BlockId) -> Self {
        match self {
            ConfigError::InvalidOption { option, value, .. } => ConfigError::InvalidOption {
                block_id: Some(id.clone()),
                option,
                value,
            },
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::block::SEND_TO_STORE_BLOCK;

    fn block(id: &str) -> BlockDefinition {
        BlockDefinition::new(id, SEND_TO_STORE_BLOCK)
    }

    #[test]
    fn test_rejects_duplicate_block_ids() {
        let err = WorkflowDefinition::new(
            WorkflowMetadata::new("dup"),
            vec![block("save"), block("save")],
            vec![],
        )
        .unwrap_err();
        assert_eq!(err, ConfigError::DuplicateBlock(BlockId::new("save")));
    }

    #[test]
    fn test_disabled_links_are_not_validated() {
        let link = EventLink {
            source: BlockId::new("save"),
            target: BlockId::new("missing"),
            output: EventType::run(),
            input: EventType::run(),
            disabled: true,
        };
        let workflow =
            WorkflowDefinition::new(WorkflowMetadata::new("ok"), vec![block("save")], vec![link.clone()])
                .unwrap();
        assert_eq!(workflow.enabled_links().count(), 0);

        let err = WorkflowDefinition::new(
            WorkflowMetadata::new("bad"),
            vec![block("save")],
            vec![EventLink { disabled: false, ..link }],
        )
        .unwrap_err();
        assert_eq!(err, ConfigError::UnknownLinkBlock(BlockId::new("missing")));
    }

    #[test]
    fn test_workflow_name_validation() {
        assert!(WorkflowMetadata::validate_name("vc-issuance-2").is_ok());
        assert!(WorkflowMetadata::validate_name("VC Issuance").is_err());
        assert!(WorkflowMetadata::validate_name("").is_err());
    }

    #[test]
    fn test_option_error_names_block() {
        let err = "ipfs"
            .parse::<crate::domain::block::DataSource>()
            .unwrap_err()
            .for_block(&BlockId::new("save"));
        assert_eq!(
            err.to_string(),
            "Invalid value 'ipfs' for option 'dataSource' on block 'save'"
        );
    }
}
