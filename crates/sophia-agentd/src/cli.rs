//! Minimal interactive channel: stdin lines in, stdout responses out.

use std::sync::Arc;

use async_trait::async_trait;
use sophia_events::processor::ChatError;
use sophia_events::{Event, EventBus, EventPriority, ResponseHandler};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

const CLI_SESSION: &str = "cli";

/// Read stdin lines and enqueue each as a direct user event.
pub fn spawn_stdin_channel(bus: Arc<EventBus>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let text = line.trim();
            if text.is_empty() {
                continue;
            }
            bus.put(Event::chat_message(
                CLI_SESSION,
                text,
                EventPriority::UserDirect,
                "cli",
            ))
            .await;
        }
        info!("stdin channel closed");
    })
}

/// Prints agent responses to stdout.
pub struct CliResponder;

#[async_trait]
impl ResponseHandler for CliResponder {
    async fn handle(&self, _event: &Event, response: &str) -> Result<(), ChatError> {
        println!("{response}");
        Ok(())
    }
}
