//! Message-bus boundary: inbound prompt requests, outbound progress and
//! result events.

pub mod consumer;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::config::BusTopics;
use crate::pipeline::{
    CompletionEvent, FailureEvent, FailureKind, PipelineObserver, StepEvent, TaskRequest,
};
use crate::services::BilingualPair;

pub use consumer::PromptConsumer;

/// Opaque send/receive primitive over whatever broker is deployed.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Next raw inbound message, or `None` once the bus is closed.
    async fn receive(&self) -> Result<Option<Vec<u8>>>;
    async fn publish(&self, topic: &str, message: &Value) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    pub task_id: String,
    pub account_id: String,
    pub payload: PromptPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptPayload {
    pub prompt: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl InboundMessage {
    pub fn into_request(self) -> TaskRequest {
        TaskRequest {
            task_id: self.task_id,
            account_id: self.account_id,
            prompt: self.payload.prompt,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressMessage {
    pub parent_task_id: String,
    pub current_step: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalMessage {
    pub downloads: Vec<String>,
    pub content: Vec<BilingualPair>,
    pub task_id: String,
    pub account_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureMessage {
    pub task_id: String,
    pub account_id: String,
    pub error: FailureKind,
    pub message: String,
}

/// Publishes pipeline events to the bus: every step to the progress topic,
/// completions and failures to the result topic.
pub struct BusObserver {
    bus: Arc<dyn MessageBus>,
    topics: BusTopics,
}

impl BusObserver {
    pub fn new(bus: Arc<dyn MessageBus>, topics: BusTopics) -> Self {
        Self { bus, topics }
    }
}

#[async_trait]
impl PipelineObserver for BusObserver {
    async fn on_step(&self, event: &StepEvent) -> Result<()> {
        let message = ProgressMessage {
            parent_task_id: event.task_id.clone(),
            current_step: event.label.clone(),
        };
        self.bus
            .publish(&self.topics.progress, &serde_json::to_value(message)?)
            .await
    }

    async fn on_failure(&self, event: &FailureEvent) -> Result<()> {
        let message = FailureMessage {
            task_id: event.task_id.clone(),
            account_id: event.account_id.clone(),
            error: event.kind,
            message: event.message.clone(),
        };
        self.bus
            .publish(&self.topics.result, &serde_json::to_value(message)?)
            .await
    }

    async fn on_complete(&self, event: &CompletionEvent) -> Result<()> {
        let message = FinalMessage {
            downloads: event.downloads.clone(),
            content: event.content.clone(),
            task_id: event.task_id.clone(),
            account_id: event.account_id.clone(),
        };
        self.bus
            .publish(&self.topics.result, &serde_json::to_value(message)?)
            .await
    }

    fn name(&self) -> &str {
        "bus"
    }
}

/// In-process bus over tokio channels.
pub struct ChannelBus {
    inbound: Mutex<mpsc::Receiver<Vec<u8>>>,
    outbound: mpsc::UnboundedSender<(String, Value)>,
}

/// The other side of a [`ChannelBus`]: feeds inbound messages and sees
/// everything published. Dropping `sender` closes the bus.
pub struct ChannelBusHandle {
    pub sender: mpsc::Sender<Vec<u8>>,
    pub published: mpsc::UnboundedReceiver<(String, Value)>,
}

impl ChannelBus {
    pub fn new(capacity: usize) -> (Self, ChannelBusHandle) {
        let (sender, inbound) = mpsc::channel(capacity);
        let (outbound, published) = mpsc::unbounded_channel();
        (
            Self {
                inbound: Mutex::new(inbound),
                outbound,
            },
            ChannelBusHandle { sender, published },
        )
    }
}

#[async_trait]
impl MessageBus for ChannelBus {
    async fn receive(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.inbound.lock().await.recv().await)
    }

    async fn publish(&self, topic: &str, message: &Value) -> Result<()> {
        debug!("Publishing to {}: {}", topic, message);
        self.outbound
            .send((topic.to_string(), message.clone()))
            .map_err(|_| anyhow::anyhow!("bus consumer side is closed"))?;
        Ok(())
    }
}
