// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Block Runtime State
//!
//! Per-(block, actor) key/value cache for data a block needs across several
//! event deliveries. Each key owns an async mutex, so holding the state guard
//! also serializes concurrent dispatches for the same block and actor.
//!
//! State is discarded when a `ReleaseEvent` reaches the block, or lazily once
//! it has been idle for longer than the configured TTL.

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::debug;

use crate::domain::block::BlockId;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StateKey {
    pub block_id: BlockId,
    pub actor_id: String,
}

impl StateKey {
    pub fn new(block_id: BlockId, actor_id: impl Into<String>) -> Self {
        Self {
            block_id,
            actor_id: actor_id.into(),
        }
    }
}

impl std::fmt::Display for StateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.block_id, self.actor_id)
    }
}

#[derive(Debug)]
pub struct BlockRuntimeState {
    values: HashMap<String, serde_json::Value>,
    touched_at: Instant,
}

impl BlockRuntimeState {
    fn new() -> Self {
        Self {
            values: HashMap::new(),
            touched_at: Instant::now(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.values.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.values.insert(key.into(), value);
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.touched_at.elapsed() > ttl
    }
}

pub struct RuntimeStateCache {
    entries: DashMap<StateKey, Arc<Mutex<BlockRuntimeState>>>,
    ttl: Duration,
}

impl RuntimeStateCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Lock the state for `key`, creating it on first use. Expired state is
    /// cleared before the guard is handed out.
    pub async fn lock(&self, key: &StateKey) -> OwnedMutexGuard<BlockRuntimeState> {
        // Clone the slot out so the map shard is not held across the await
        let slot = self
            .entries
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(BlockRuntimeState::new())))
            .clone();

        let mut state = slot.lock_owned().await;
        if state.is_expired(self.ttl) && !state.is_empty() {
            debug!(key = %key, "Runtime state expired");
            state.clear();
        }
        state.touched_at = Instant::now();
        state
    }

    /// Clear the state for `key`. Waits for any dispatch currently holding it.
    pub async fn release(&self, key: &StateKey) -> bool {
        let slot = self.entries.get(key).map(|entry| entry.value().clone());
        match slot {
            Some(slot) => {
                slot.lock().await.clear();
                debug!(key = %key, "Runtime state released");
                true
            }
            None => false,
        }
    }

    /// Drop idle entries nobody is holding or waiting on
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl;
        self.entries.retain(|_, slot| {
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            match slot.try_lock() {
                Ok(state) => !state.is_expired(ttl),
                Err(_) => true,
            }
        });
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
