use async_trait::async_trait;

use crate::error::Result;

/// Common interface for anything that produces events onto the bus
/// (scheduler, Telegram, goal engine, web channels).
///
/// Implementations must be `Send + Sync` so they can be started from the
/// runtime and driven for the lifetime of the process.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Stable lowercase identifier, also used as the response channel key.
    fn name(&self) -> &str;

    /// Start producing events (called once at boot).
    async fn start(&self) -> Result<()>;

    /// Gracefully stop producing events.
    async fn stop(&self) -> Result<()>;
}
