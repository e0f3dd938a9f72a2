// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod block;
pub mod runtime_state;
pub mod send_to_store;
pub mod workflow_engine;

pub use block::{Block, BlockError, BlockOutcome, BlockRegistry, BlockServices, EngineSettings, ExecutionContext};
pub use runtime_state::{RuntimeStateCache, StateKey};
pub use send_to_store::SendToStoreBlock;
pub use workflow_engine::{DispatchReport, EngineError, WorkflowEngine};
