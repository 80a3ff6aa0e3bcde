//! Version Reporter
//!
//! Reads the workload reference fresh from the compose file and publishes it
//! as a version announcement.

use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::connection::bus::MessageBus;
use crate::connection::protocol::VersionAnnouncement;
use crate::error::{AgentError, AgentResult};
use crate::workload::store::ComposeStore;

pub struct VersionReporter<B: MessageBus> {
    store: ComposeStore,
    bus: Arc<B>,
}

impl<B: MessageBus> VersionReporter<B> {
    pub fn new(store: ComposeStore, bus: Arc<B>) -> Self {
        Self { store, bus }
    }

    /// Announce the workload in `directory` on `channel`
    pub async fn report(&self, channel: &str, directory: &Path) -> AgentResult<VersionAnnouncement> {
        let reference = self.store.load(directory)?;
        let announcement = VersionAnnouncement::from_reference(&reference);

        let payload = announcement.to_json()?;
        self.bus
            .publish(channel, &payload)
            .await
            .map_err(|e| AgentError::TransportUnavailable(format!("{:#}", e)))?;

        info!(
            channel = %channel,
            app = %announcement.appname,
            version = %announcement.version_number,
            "Published version"
        );

        Ok(announcement)
    }
}
