// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// In-Memory Ledger
//
// LedgerPublisher that keeps messages in process. Each topic gets an id on
// first use ("0.0.<n>") and each message a consensus-style id
// ("<unix seconds>.<sequence, 9 digits>"). Scripted failures and artificial
// latency let tests drive the retry and timeout paths.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::domain::ledger::{LedgerPublisher, PublishError, PublishReceipt, TopicRef, WireMessage};

const FIRST_TOPIC_NUMBER: u64 = 1001;

/// A message accepted by the ledger
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishedMessage {
    pub topic: TopicRef,
    pub receipt: PublishReceipt,
    pub message: WireMessage,
}

#[derive(Default)]
struct LedgerState {
    topics: HashMap<TopicRef, String>,
    messages: Vec<PublishedMessage>,
    failures: VecDeque<PublishError>,
    attempts: usize,
    sequence: u64,
}

#[derive(Clone, Default)]
pub struct InMemoryLedger {
    state: Arc<Mutex<LedgerState>>,
    latency: Option<Duration>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every send by `latency` before answering
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Queue errors returned by the next sends, in order
    pub fn fail_next(&self, errors: impl IntoIterator<Item = PublishError>) {
        self.state.lock().failures.extend(errors);
    }

    pub fn messages(&self) -> Vec<PublishedMessage> {
        self.state.lock().messages.clone()
    }

    /// Number of send calls, successful or not
    pub fn attempts(&self) -> usize {
        self.state.lock().attempts
    }
}

#[async_trait]
impl LedgerPublisher for InMemoryLedger {
    async fn send(&self, topic: &TopicRef, message: &WireMessage) -> Result<PublishReceipt, PublishError> {
        let scripted = {
            let mut state = self.state.lock();
            state.attempts += 1;
            state.failures.pop_front()
        };

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(err) = scripted {
            debug!(topic = %topic, "Scripted ledger failure: {}", err);
            return Err(err);
        }

        let mut state = self.state.lock();
        let next_topic = FIRST_TOPIC_NUMBER + state.topics.len() as u64;
        let topic_id = state
            .topics
            .entry(topic.clone())
            .or_insert_with(|| format!("0.0.{}", next_topic))
            .clone();

        state.sequence += 1;
        let receipt = PublishReceipt {
            external_message_id: format!("{}.{:09}", Utc::now().timestamp(), state.sequence),
            topic_id,
        };
        state.messages.push(PublishedMessage {
            topic: topic.clone(),
            receipt: receipt.clone(),
            message: message.clone(),
        });

        debug!(
            topic = %topic,
            message_id = %receipt.external_message_id,
            "Message published"
        );
        Ok(receipt)
    }
}
