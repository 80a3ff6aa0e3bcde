//! Redis Transport
//!
//! Announcements go out with `PUBLISH`. RPC calls are pushed by the
//! controller onto a list named after this agent's RPC endpoint; the listener
//! pops them with `BLPOP` and queues them for the command loop. Responses are
//! `RPUSH`ed onto the caller's reply list.
//!
//! The blocking listener gets its own connection so a pending `BLPOP` never
//! holds up publishes or replies.

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::connection::bus::MessageBus;
use crate::connection::protocol::RpcCall;

/// Seconds a single `BLPOP` waits before the listener re-checks for shutdown
const POLL_TIMEOUT_SECS: f64 = 1.0;

/// Build a `redis://` URL from its parts
pub fn connection_url(host: &str, port: u16, db: i64) -> String {
    format!("redis://{}:{}/{}", host, port, db)
}

/// Open a connection and label it with the agent's node name
async fn connect(client: &Client, node_name: &str) -> Result<MultiplexedConnection> {
    let mut conn = client
        .get_multiplexed_async_connection()
        .await
        .context("Failed to connect to Redis")?;

    if let Err(e) = redis::cmd("CLIENT")
        .arg("SETNAME")
        .arg(node_name)
        .query_async::<()>(&mut conn)
        .await
    {
        warn!(node_name = %node_name, error = %e, "Failed to set Redis client name");
    }

    Ok(conn)
}

/// Publishing and reply side of the bus
#[derive(Clone)]
pub struct RedisBus {
    conn: MultiplexedConnection,
}

impl RedisBus {
    /// Connect to Redis
    pub async fn connect(client: &Client, node_name: &str) -> Result<Self> {
        let conn = connect(client, node_name).await?;
        info!(node_name = %node_name, "Message bus connected");
        Ok(Self { conn })
    }
}

#[async_trait]
impl MessageBus for RedisBus {
    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let receivers: i64 = conn
            .publish(channel, payload)
            .await
            .with_context(|| format!("Failed to publish on channel {}", channel))?;

        debug!(channel = %channel, receivers, "Message published");
        Ok(())
    }

    async fn reply(&self, reply_to: &str, payload: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .rpush(reply_to, payload)
            .await
            .with_context(|| format!("Failed to push reply to {}", reply_to))?;

        debug!(reply_to = %reply_to, "Reply delivered");
        Ok(())
    }
}

/// Pops RPC calls off the agent's request list and hands them to the
/// command loop, reconnecting when the connection drops
pub struct RpcListener {
    client: Client,
    node_name: String,
    rpc_name: String,
    reconnect_interval: Duration,
}

impl RpcListener {
    pub fn new(client: Client, node_name: &str, rpc_name: &str, reconnect_interval: Duration) -> Self {
        Self {
            client,
            node_name: node_name.to_string(),
            rpc_name: rpc_name.to_string(),
            reconnect_interval,
        }
    }

    /// Run until shutdown is signalled or the command loop goes away
    pub async fn run(self, calls: mpsc::Sender<RpcCall>, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(rpc_name = %self.rpc_name, "RPC listener started");

        while !*shutdown.borrow() {
            match self.listen(&calls, &shutdown).await {
                Ok(()) => break,
                Err(e) => {
                    error!(error = %e, "RPC listener connection error");
                }
            }

            if *shutdown.borrow() {
                break;
            }

            info!(
                interval_ms = self.reconnect_interval.as_millis() as u64,
                "Waiting before reconnection attempt"
            );
            tokio::select! {
                _ = tokio::time::sleep(self.reconnect_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!(rpc_name = %self.rpc_name, "RPC listener stopped");
        Ok(())
    }

    async fn listen(
        &self,
        calls: &mpsc::Sender<RpcCall>,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<()> {
        let mut conn = connect(&self.client, &self.node_name).await?;
        debug!(rpc_name = %self.rpc_name, "Waiting for RPC calls");

        loop {
            if *shutdown.borrow() {
                return Ok(());
            }

            let popped: Option<(String, String)> = conn
                .blpop(&self.rpc_name, POLL_TIMEOUT_SECS)
                .await
                .context("BLPOP on RPC queue failed")?;

            let Some((_, raw)) = popped else {
                continue;
            };

            let call = RpcCall::decode(&raw);
            debug!(reply_to = ?call.reply_to, "RPC call received");

            // Bounded: a busy command loop holds further calls back in Redis
            if calls.send(call).await.is_err() {
                // Put the call back at the head of the list for the next run
                let _: i64 = conn
                    .lpush(&self.rpc_name, &raw)
                    .await
                    .context("Failed to return RPC call to its queue")?;
                warn!("Command queue closed, RPC call returned to the bus");
                return Ok(());
            }
        }
    }
}
