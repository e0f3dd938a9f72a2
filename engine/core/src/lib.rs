// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Guardian workflow engine core
//!
//! A block-oriented document workflow engine. Blocks are wired together by
//! the event types they declare, an in-process [`EventBus`] routes events
//! between them, and the `send-to-store` block reconciles inbound documents
//! against a [`DocumentStore`] and an external ledger.
//!
//! # Architecture
//!
//! - **domain:** documents, events, block definitions, reconciliation policy,
//!   collaborator traits (`DocumentStore`, `LedgerPublisher`), configuration
//! - **application:** block runtime, block registry, `WorkflowEngine`
//! - **infrastructure:** event bus, in-memory store and ledger, manifest parser
//!
//! [`EventBus`]: infrastructure::event_bus::EventBus
//! [`DocumentStore`]: domain::repository::DocumentStore

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use domain::*;
