// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Workflow YAML Parser
//!
//! Parses workflow YAML manifests into validated [`WorkflowDefinition`]s.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Parse external YAML → Domain objects
//! - **Anti-Corruption:** Translates YAML schema to domain model
//!
//! # Manifest Format
//!
//! ```yaml
//! apiVersion: guardian/v1
//! kind: Workflow
//! metadata:
//!   name: vc-issuance
//!   version: "1.0.0"
//! spec:
//!   blocks:
//!     - id: save
//!       type: send-to-store
//!       inputs: [RunEvent]
//!       outputs: [RunEvent, RefreshEvent]
//!       options:
//!         dataSource: auto
//!   events:
//!     - source: save
//!       output: RunEvent
//!       target: notify
//!       input: RunEvent
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::domain::block::{BlockDefinition, BlockId, BlockOptions};
use crate::domain::events::EventType;
use crate::domain::workflow::{ConfigError, EventLink, WorkflowDefinition, WorkflowMetadata};

pub const WORKFLOW_API_VERSION: &str = "guardian/v1";
pub const WORKFLOW_KIND: &str = "Workflow";

// ============================================================================
// YAML Schema (External Representation)
// ============================================================================

/// External YAML representation of a workflow manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowManifest {
    pub api_version: String,
    pub kind: String,
    pub metadata: WorkflowMetadataYaml,
    pub spec: WorkflowSpecYaml,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowMetadataYaml {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSpecYaml {
    pub blocks: Vec<BlockYaml>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<EventLinkYaml>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockYaml {
    pub id: String,
    #[serde(rename = "type")]
    pub block_type: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub options: BlockOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLinkYaml {
    pub source: String,
    pub target: String,
    pub output: String,
    pub input: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub disabled: bool,
}

// ============================================================================
// Parser
// ============================================================================

/// Workflow parser (Infrastructure service)
pub struct WorkflowParser;

impl WorkflowParser {
    /// Parse a workflow manifest from YAML file
    pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<WorkflowDefinition, WorkflowParseError> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| WorkflowParseError::IoError {
            path: path.as_ref().display().to_string(),
            error: e.to_string(),
        })?;

        Self::parse_yaml(&content)
    }

    /// Parse a workflow manifest from YAML string
    pub fn parse_yaml(yaml: &str) -> Result<WorkflowDefinition, WorkflowParseError> {
        let manifest: WorkflowManifest =
            serde_yaml::from_str(yaml).map_err(|e| WorkflowParseError::YamlError(e.to_string()))?;

        Self::validate_and_convert(manifest)
    }

    /// Validate manifest and convert to domain object
    fn validate_and_convert(manifest: WorkflowManifest) -> Result<WorkflowDefinition, WorkflowParseError> {
        if manifest.api_version != WORKFLOW_API_VERSION {
            return Err(WorkflowParseError::InvalidApiVersion {
                expected: WORKFLOW_API_VERSION.to_string(),
                got: manifest.api_version,
            });
        }

        if manifest.kind != WORKFLOW_KIND {
            return Err(WorkflowParseError::InvalidKind {
                expected: WORKFLOW_KIND.to_string(),
                got: manifest.kind,
            });
        }

        WorkflowMetadata::validate_name(&manifest.metadata.name)?;
        let metadata = WorkflowMetadata {
            name: manifest.metadata.name,
            version: manifest.metadata.version,
            description: manifest.metadata.description,
        };

        let blocks = manifest
            .spec
            .blocks
            .into_iter()
            .map(|b| {
                BlockDefinition::new(b.id, b.block_type)
                    .with_inputs(b.inputs.into_iter().map(EventType::new))
                    .with_outputs(b.outputs.into_iter().map(EventType::new))
                    .with_options(b.options)
            })
            .collect();

        let links = manifest
            .spec
            .events
            .into_iter()
            .map(|e| EventLink {
                source: BlockId::new(e.source),
                target: BlockId::new(e.target),
                output: EventType::new(e.output),
                input: EventType::new(e.input),
                disabled: e.disabled,
            })
            .collect();

        Ok(WorkflowDefinition::new(metadata, blocks, links)?)
    }

    /// Serialize a workflow back to its manifest form
    pub fn to_yaml(workflow: &WorkflowDefinition) -> Result<String, WorkflowParseError> {
        let manifest = Self::workflow_to_manifest(workflow);
        serde_yaml::to_string(&manifest).map_err(|e| WorkflowParseError::YamlError(e.to_string()))
    }

    fn workflow_to_manifest(workflow: &WorkflowDefinition) -> WorkflowManifest {
        WorkflowManifest {
            api_version: WORKFLOW_API_VERSION.to_string(),
            kind: WORKFLOW_KIND.to_string(),
            metadata: WorkflowMetadataYaml {
                name: workflow.metadata.name.clone(),
                version: workflow.metadata.version.clone(),
                description: workflow.metadata.description.clone(),
            },
            spec: WorkflowSpecYaml {
                blocks: workflow
                    .blocks
                    .iter()
                    .map(|b| BlockYaml {
                        id: b.id.to_string(),
                        block_type: b.block_type.clone(),
                        inputs: b.inputs.iter().map(ToString::to_string).collect(),
                        outputs: b.outputs.iter().map(ToString::to_string).collect(),
                        options: b.options.clone(),
                    })
                    .collect(),
                events: workflow
                    .links
                    .iter()
                    .map(|l| EventLinkYaml {
                        source: l.source.to_string(),
                        target: l.target.to_string(),
                        output: l.output.to_string(),
                        input: l.input.to_string(),
                        disabled: l.disabled,
                    })
                    .collect(),
            },
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorkflowParseError {
    #[error("IO error reading {path}: {error}")]
    IoError { path: String, error: String },

    #[error("YAML parse error: {0}")]
    YamlError(String),

    #[error("Invalid API version: expected '{expected}', got '{got}'")]
    InvalidApiVersion { expected: String, got: String },

    #[error("Invalid kind: expected '{expected}', got '{got}'")]
    InvalidKind { expected: String, got: String },

    #[error("Validation error: {0}")]
    ValidationError(#[from] ConfigError),
}
