// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod repositories;
pub mod event_bus;
pub mod ledger;
pub mod workflow_parser;

pub use event_bus::{EventBus, EventHandler, HandlerError, PublishReport, RoutingError, WiringTable};
pub use ledger::InMemoryLedger;
pub use repositories::InMemoryDocumentStore;
pub use workflow_parser::{WorkflowParseError, WorkflowParser};
