//! Interval scheduler: fires configured prompts into the bus.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sophia_core::config::ScheduledJob;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::bus::EventBus;
use crate::error::Result;
use crate::source::EventSource;
use crate::types::{Event, EventPayload, EventPriority, EventType};

/// Enqueues a `CronTrigger` event for each configured job at its interval.
/// The first firing waits one full interval so the system can warm up.
pub struct SchedulerAdapter {
    bus: Arc<EventBus>,
    jobs: Vec<ScheduledJob>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SchedulerAdapter {
    pub fn new(bus: Arc<EventBus>, jobs: Vec<ScheduledJob>) -> Self {
        Self {
            bus,
            jobs,
            tasks: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl EventSource for SchedulerAdapter {
    fn name(&self) -> &str {
        "cron"
    }

    async fn start(&self) -> Result<()> {
        let mut tasks = self.tasks.lock().unwrap();
        for job in &self.jobs {
            if job.prompt.is_empty() {
                warn!(job_id = %job.id, "skipping job with no prompt");
                continue;
            }
            info!(job_id = %job.id, interval = job.interval_seconds, "scheduled job");

            let bus = Arc::clone(&self.bus);
            let job = job.clone();
            tasks.push(tokio::spawn(async move {
                let interval = Duration::from_secs(job.interval_seconds);
                tokio::time::sleep(interval).await;
                loop {
                    let mut event = Event::new(
                        EventType::CronTrigger,
                        EventPayload {
                            session_id: "autonomous".to_string(),
                            content: job.prompt.clone(),
                            goal_description: None,
                        },
                        EventPriority::Scheduled,
                        "cron",
                    );
                    event.metadata.insert("job_id".to_string(), job.id.clone());
                    bus.put(event).await;
                    info!(job_id = %job.id, "fired scheduled job");
                    tokio::time::sleep(interval).await;
                }
            }));
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let mut tasks = self.tasks.lock().unwrap();
        for task in tasks.drain(..) {
            task.abort();
        }
        info!("scheduler adapter stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fires_job_after_interval() {
        let bus = Arc::new(EventBus::new());
        let adapter = SchedulerAdapter::new(
            Arc::clone(&bus),
            vec![ScheduledJob {
                id: "heartbeat".to_string(),
                prompt: "check in".to_string(),
                interval_seconds: 1,
            }],
        );
        adapter.start().await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(3), bus.get())
            .await
            .expect("job should fire within the interval");
        assert_eq!(event.event_type, EventType::CronTrigger);
        assert_eq!(event.priority, EventPriority::Scheduled);
        assert_eq!(event.payload.content, "check in");
        assert_eq!(event.payload.session_id, "autonomous");
        assert_eq!(event.metadata.get("job_id").map(String::as_str), Some("heartbeat"));

        adapter.stop().await.unwrap();
    }

    #[tokio::test]
    async fn jobs_without_prompt_are_skipped() {
        let bus = Arc::new(EventBus::new());
        let adapter = SchedulerAdapter::new(
            Arc::clone(&bus),
            vec![ScheduledJob {
                id: "empty".to_string(),
                prompt: String::new(),
                interval_seconds: 1,
            }],
        );
        adapter.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert!(bus.empty());
        adapter.stop().await.unwrap();
    }
}
