//! Agent Runtime
//!
//! Owns the command loop: announces the workload at startup, then takes RPC
//! calls off the queue one at a time, answers them and re-announces after
//! every completed update. Optionally re-announces on a fixed interval.
//!
//! Calls are never processed concurrently. The compose file and the workload
//! are only ever touched from this loop.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::agent::handler::{CommandHandler, CommandReport};
use crate::agent::reporter::VersionReporter;
use crate::connection::bus::MessageBus;
use crate::connection::protocol::{encode_reply, RpcCall, UpdateResult, VersionAnnouncement};
use crate::error::{AgentError, AgentResult};
use crate::runtime::adapter::WorkloadRuntime;
use crate::workload::store::ComposeStore;

/// Response to calls still queued when the agent stops
const SHUTTING_DOWN: &str = "Agent shutting down";

/// Ticker period used when periodic announcements are disabled
const DISABLED_PERIOD: Duration = Duration::from_secs(3600);

/// Agent runtime settings
#[derive(Debug, Clone)]
pub struct AgentSettings {
    /// Directory of the managed workload
    pub directory: PathBuf,
    /// Pub/sub channel for version announcements
    pub version_channel: String,
    /// Re-announce interval; `None` or zero disables
    pub announce_interval: Option<Duration>,
}

pub struct Agent<R: WorkloadRuntime, B: MessageBus> {
    handler: CommandHandler<R>,
    reporter: VersionReporter<B>,
    bus: Arc<B>,
    settings: AgentSettings,
}

impl<R: WorkloadRuntime, B: MessageBus> Agent<R, B> {
    pub fn new(store: ComposeStore, runtime: Arc<R>, bus: Arc<B>, settings: AgentSettings) -> Self {
        Self {
            handler: CommandHandler::new(store.clone(), runtime, settings.directory.clone()),
            reporter: VersionReporter::new(store, bus.clone()),
            bus,
            settings,
        }
    }

    /// Announce the managed workload
    pub async fn announce(&self) -> AgentResult<VersionAnnouncement> {
        self.reporter
            .report(&self.settings.version_channel, &self.settings.directory)
            .await
    }

    /// Announce once, then serve calls until the queue closes or shutdown is
    /// signalled. A failed startup announcement aborts before any call is
    /// taken off the queue.
    pub async fn run(
        &self,
        calls: mpsc::Receiver<RpcCall>,
        shutdown: watch::Receiver<bool>,
    ) -> AgentResult<()> {
        let announcement = self.announce().await?;
        info!(
            app = %announcement.appname,
            version = %announcement.version_number,
            "Agent ready"
        );

        self.serve(calls, shutdown).await;
        Ok(())
    }

    /// Serve calls until the queue closes or shutdown is signalled
    pub async fn serve(&self, mut calls: mpsc::Receiver<RpcCall>, mut shutdown: watch::Receiver<bool>) {
        let periodic = self.settings.announce_interval.filter(|d| !d.is_zero());
        let period = periodic.unwrap_or(DISABLED_PERIOD);
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Shutdown requested, command loop stopping");
                        break;
                    }
                }

                call = calls.recv() => match call {
                    Some(call) => {
                        self.process(call).await;
                    }
                    None => {
                        info!("Command queue closed");
                        break;
                    }
                },

                _ = ticker.tick(), if periodic.is_some() => {
                    if let Err(e) = self.announce().await {
                        warn!(code = e.code(), error = %e, "Periodic version announcement failed");
                    }
                }
            }
        }

        self.reject_pending(&mut calls).await;
    }

    /// Close the queue and answer every call still waiting in it; those calls
    /// are already off the bus
    async fn reject_pending(&self, calls: &mut mpsc::Receiver<RpcCall>) {
        calls.close();

        let mut rejected = 0usize;
        while let Some(call) = calls.recv().await {
            rejected += 1;
            if let Some(reply_to) = call.reply_to.as_deref() {
                self.respond(reply_to, &UpdateResult::failed(SHUTTING_DOWN)).await;
            }
        }

        if rejected > 0 {
            warn!(count = rejected, "Rejected queued calls on shutdown");
        }
    }

    /// Handle one call: execute, reply, and re-announce after an update
    pub async fn process(&self, call: RpcCall) -> CommandReport {
        let report = match call.request {
            Ok(request) => self.handler.handle(request).await,
            Err(reason) => {
                warn!(reason = %reason, "Malformed RPC request");
                CommandReport::rejected(AgentError::ValidationFailed(format!(
                    "Malformed request: {}",
                    reason
                )))
            }
        };

        match call.reply_to.as_deref() {
            Some(reply_to) => self.respond(reply_to, &report.result).await,
            None => debug!("Call carries no reply address, response dropped"),
        }

        if let (Some(_), Some(directory)) = (&report.updated, &report.directory) {
            if same_directory(directory, &self.settings.directory) {
                // The update stands even if the controller misses this
                if let Err(e) = self.announce().await {
                    warn!(code = e.code(), error = %e, "Failed to announce updated version");
                }
            } else {
                debug!(
                    directory = %directory.display(),
                    "Updated workload is not the managed one, not announced"
                );
            }
        }

        report
    }

    async fn respond(&self, reply_to: &str, result: &UpdateResult) {
        let payload = match encode_reply(result) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Failed to encode RPC response");
                return;
            }
        };

        if let Err(e) = self.bus.reply(reply_to, &payload).await {
            warn!(reply_to = %reply_to, error = %e, "Failed to deliver RPC response");
        }
    }
}

/// Whether both paths name the same directory on disk
fn same_directory(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
