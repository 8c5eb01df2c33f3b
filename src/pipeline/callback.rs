use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::broadcast;

use super::types::{CompletionEvent, FailureEvent, PipelineEvent, StepEvent};

/// Receives pipeline notifications. Errors are logged by the orchestrator
/// and never abort a run.
#[async_trait]
pub trait PipelineObserver: Send + Sync {
    async fn on_step(&self, event: &StepEvent) -> Result<()>;
    async fn on_failure(&self, event: &FailureEvent) -> Result<()>;
    async fn on_complete(&self, event: &CompletionEvent) -> Result<()>;

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

// HTTP webhook observer
pub struct HttpObserver {
    client: reqwest::Client,
    callback_url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CallbackPayload<'a, T> {
    task_id: &'a str,
    event: &'static str,
    data: &'a T,
}

impl HttpObserver {
    pub fn new(callback_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            callback_url,
        }
    }

    pub fn with_client(client: reqwest::Client, callback_url: String) -> Self {
        Self { client, callback_url }
    }

    async fn send_callback<T: Serialize + Sync>(&self, payload: CallbackPayload<'_, T>) -> Result<()> {
        self.client
            .post(&self.callback_url)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl PipelineObserver for HttpObserver {
    async fn on_step(&self, event: &StepEvent) -> Result<()> {
        self.send_callback(CallbackPayload {
            task_id: &event.task_id,
            event: "step",
            data: event,
        })
        .await
    }

    async fn on_failure(&self, event: &FailureEvent) -> Result<()> {
        self.send_callback(CallbackPayload {
            task_id: &event.task_id,
            event: "failed",
            data: event,
        })
        .await
    }

    async fn on_complete(&self, event: &CompletionEvent) -> Result<()> {
        self.send_callback(CallbackPayload {
            task_id: &event.task_id,
            event: "completed",
            data: event,
        })
        .await
    }

    fn name(&self) -> &str {
        "http"
    }
}

// Function observer
pub struct FunctionObserver<F> {
    callback: F,
}

impl<F> FunctionObserver<F>
where
    F: Fn(&PipelineEvent) -> Result<()> + Send + Sync + 'static,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

#[async_trait]
impl<F> PipelineObserver for FunctionObserver<F>
where
    F: Fn(&PipelineEvent) -> Result<()> + Send + Sync + 'static,
{
    async fn on_step(&self, event: &StepEvent) -> Result<()> {
        (self.callback)(&PipelineEvent::Step(event.clone()))
    }

    async fn on_failure(&self, event: &FailureEvent) -> Result<()> {
        (self.callback)(&PipelineEvent::Failed(event.clone()))
    }

    async fn on_complete(&self, event: &CompletionEvent) -> Result<()> {
        (self.callback)(&PipelineEvent::Completed(event.clone()))
    }

    fn name(&self) -> &str {
        "function"
    }
}

// In-process broadcast observer
#[derive(Clone)]
pub struct EventObserver {
    pub sender: broadcast::Sender<PipelineEvent>,
}

impl EventObserver {
    pub fn new(capacity: usize) -> (Self, broadcast::Receiver<PipelineEvent>) {
        let (sender, receiver) = broadcast::channel(capacity);
        (Self { sender }, receiver)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl PipelineObserver for EventObserver {
    async fn on_step(&self, event: &StepEvent) -> Result<()> {
        self.sender.send(PipelineEvent::Step(event.clone()))?;
        Ok(())
    }

    async fn on_failure(&self, event: &FailureEvent) -> Result<()> {
        self.sender.send(PipelineEvent::Failed(event.clone()))?;
        Ok(())
    }

    async fn on_complete(&self, event: &CompletionEvent) -> Result<()> {
        self.sender.send(PipelineEvent::Completed(event.clone()))?;
        Ok(())
    }

    fn name(&self) -> &str {
        "event"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::{FailureKind, Stage};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn step() -> StepEvent {
        StepEvent {
            task_id: "t1".to_string(),
            step: Stage::HealthCheck,
            label: Stage::HealthCheck.label().to_string(),
            elapsed: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn test_event_observer_broadcasts() {
        let (observer, mut receiver) = EventObserver::new(8);
        observer.on_step(&step()).await.unwrap();

        match receiver.recv().await.unwrap() {
            PipelineEvent::Step(event) => assert_eq!(event.step, Stage::HealthCheck),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_event_observer_without_receivers_errors() {
        let (observer, receiver) = EventObserver::new(8);
        drop(receiver);
        assert!(observer.on_step(&step()).await.is_err());
    }

    #[tokio::test]
    async fn test_function_observer_wraps_events() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let observer = FunctionObserver::new(move |event: &PipelineEvent| {
            sink.lock().unwrap().push(event.task_id().to_string());
            Ok(())
        });

        observer.on_step(&step()).await.unwrap();
        observer
            .on_failure(&FailureEvent {
                task_id: "t2".to_string(),
                account_id: "a".to_string(),
                kind: FailureKind::UploadFailed,
                message: "m".to_string(),
                technical_detail: "d".to_string(),
                debug_payload: None,
            })
            .await
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["t1", "t2"]);
    }
}
