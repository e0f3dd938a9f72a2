// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain layer
//!
//! Value objects, aggregates and collaborator contracts. Nothing in here
//! performs I/O.

pub mod block;
pub mod document;
pub mod engine_config;
pub mod events;
pub mod ledger;
pub mod reconciliation;
pub mod repository;
pub mod workflow;
