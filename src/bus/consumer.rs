use std::sync::Arc;

use anyhow::Result;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

use super::{BusObserver, InboundMessage, MessageBus};
use crate::pipeline::PipelineOrchestrator;

/// Runs one pipeline per inbound bus message, one message at a time.
pub struct PromptConsumer {
    bus: Arc<dyn MessageBus>,
    orchestrator: PipelineOrchestrator,
    // wait after a failed receive
    retry_interval: Duration,
}

impl PromptConsumer {
    /// Wire `orchestrator` to `bus`: progress and results are published on
    /// the topics from the orchestrator's config.
    pub fn new(bus: Arc<dyn MessageBus>, mut orchestrator: PipelineOrchestrator) -> Self {
        let topics = orchestrator.config().topics.clone();
        orchestrator.register_observer(Arc::new(BusObserver::new(bus.clone(), topics)));
        Self {
            bus,
            orchestrator,
            retry_interval: Duration::from_secs(1),
        }
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Consume until the bus is closed.
    pub async fn run(&self) {
        loop {
            match self.process_next_message().await {
                Ok(true) => continue,
                Ok(false) => {
                    info!("Message bus closed, stopping consumer");
                    return;
                }
                Err(e) => {
                    error!("Error receiving message: {:#}", e);
                    sleep(self.retry_interval).await;
                }
            }
        }
    }

    /// Returns `false` once there is nothing more to consume.
    async fn process_next_message(&self) -> Result<bool> {
        let Some(raw) = self.bus.receive().await? else {
            return Ok(false);
        };

        let message: InboundMessage = match serde_json::from_slice(&raw) {
            Ok(message) => message,
            Err(e) => {
                warn!("Skipping malformed message ({} bytes): {}", raw.len(), e);
                return Ok(true);
            }
        };

        info!(task_id = %message.task_id, "Processing prompt request");
        let task_id = message.task_id.clone();
        match self.orchestrator.run(message.into_request()).await {
            Some(output) => info!(task_id = %task_id, "Task finished: {:?}", output.downloads),
            None => warn!(task_id = %task_id, "Task failed"),
        }
        Ok(true)
    }
}
