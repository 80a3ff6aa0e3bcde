//! Message Bus Trait
//!
//! The outgoing half of the bus the agent needs: publishing announcements and
//! answering RPC callers.

use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish `payload` on a pub/sub channel
    async fn publish(&self, channel: &str, payload: &str) -> Result<()>;

    /// Deliver an RPC response to the caller's reply queue
    async fn reply(&self, reply_to: &str, payload: &str) -> Result<()>;
}
