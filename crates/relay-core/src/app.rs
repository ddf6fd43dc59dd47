// Copyright 2026 Northern.tech AS
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The facade the HTTP surface is built against: one entry point combining
//! presence, the session table, the bus, and the terminal/file-transfer
//! orchestrators. Keeping this as a single `App` struct (rather than
//! exposing each component separately) means `relay-service` only ever
//! depends on this one type plus the request/response shapes its handlers
//! need.

use std::sync::Arc;

use relay_protocol::FileInfo;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::bus::Bus;
use crate::config::Config;
use crate::datastore::DataStore;
use crate::error::Result;
use crate::filetransfer::{Download, FileTransfer, Timing};
use crate::presence::PresenceTracker;
use crate::recording::RecordingSink;
use crate::session::{ConcurrencyPolicy, Session, SessionKind, SessionState, SessionTable};
use crate::subject;
use crate::terminal::TerminalRelay;

pub struct App {
    pub config: Config,
    pub bus: Arc<dyn Bus>,
    pub store: Arc<dyn DataStore>,
    pub sessions: Arc<SessionTable>,
    pub presence: PresenceTracker,
    pub concurrency: Arc<dyn ConcurrencyPolicy>,
    terminal: TerminalRelay,
    file_transfer: FileTransfer,
}

impl App {
    pub fn new(config: Config, bus: Arc<dyn Bus>, store: Arc<dyn DataStore>) -> Self {
        let sessions = SessionTable::new();
        App {
            presence: PresenceTracker::new(store.clone()),
            terminal: TerminalRelay::new(bus.clone(), sessions.clone()),
            file_transfer: FileTransfer::new(bus.clone()),
            concurrency: Arc::new(crate::session::AllowAll),
            config,
            bus,
            store,
            sessions,
        }
    }

    fn timing(&self) -> Timing {
        Timing { ping_interval: self.config.file_transfer_ping_interval, idle_timeout: self.config.file_transfer_idle_timeout }
    }

    /// Propose and immediately accept a session against a connected device,
    /// returning its id. Callers are responsible for driving the session's
    /// remaining lifecycle (`terminal_session` or `download`/`upload`).
    pub async fn open_session(
        &self,
        tenant_id: Option<&str>,
        user_id: &str,
        device_id: &str,
        kind: SessionKind,
    ) -> Result<Uuid> {
        self.presence.require_connected(tenant_id, device_id).await?;

        if !self.concurrency.allow(&self.sessions, user_id, device_id, kind) {
            return Err(crate::error::RelayError::BadRequest(format!(
                "too many concurrent {kind:?} sessions for device {device_id}"
            )));
        }

        let session = Session::new(tenant_id.map(str::to_string), user_id, device_id, kind);
        let id = self.sessions.insert(session);
        self.sessions.transition(&id, SessionState::Accepted).ok();
        self.sessions.transition(&id, SessionState::Active).ok();
        Ok(id)
    }

    /// Run a terminal session's bidirectional pump to completion. Blocks
    /// until the session ends; callers typically spawn this onto its own
    /// task.
    pub async fn terminal_session(
        &self,
        tenant_id: Option<&str>,
        session_id: Uuid,
        operator_rx: mpsc::Receiver<Vec<u8>>,
        operator_tx: mpsc::Sender<Vec<u8>>,
        record: bool,
    ) -> Result<()> {
        let session = self
            .sessions
            .get(&session_id)
            .ok_or_else(|| crate::error::RelayError::SessionNotFound(session_id.to_string()))?;

        let recording = record.then(|| {
            RecordingSink::new(session_id.to_string(), tenant_id.map(str::to_string), 64 * 1024, self.store.clone())
        });

        let subject = subject::session_subject(tenant_id, &session_id.to_string());
        self.terminal
            .run(session_id, subject, operator_rx, operator_tx, recording, self.config.ping_interval, self.config.idle_timeout)
            .await?;
        self.sessions.remove(&session_id);
        Ok(())
    }

    /// Open a download session against `device_id` and begin streaming
    /// `path`'s contents.
    pub async fn download(&self, tenant_id: Option<&str>, device_id: &str, session_id: Uuid, path: String) -> Result<Download> {
        let subject = subject::device_subject(tenant_id, device_id);
        self.file_transfer.download(session_id, subject, path, self.timing()).await
    }

    /// Open an upload session against `device_id`, offering `info` and then
    /// draining `body_rx` as chunk frames.
    pub async fn upload(
        &self,
        tenant_id: Option<&str>,
        device_id: &str,
        session_id: Uuid,
        info: FileInfo,
        body_rx: mpsc::Receiver<bytes::Bytes>,
    ) -> Result<()> {
        let subject = subject::device_subject(tenant_id, device_id);
        self.file_transfer.upload(session_id, subject, info, body_rx, self.timing()).await
    }

    /// Mark a device connected. Called by the device-facing transport
    /// handler once a device's persistent connection is established.
    /// Returns the new presence version, which the same connection must
    /// later report back via `device_disconnected`.
    pub async fn device_connected(&self, tenant_id: Option<&str>, device_id: &str) -> Result<u64> {
        self.presence.set_connected(tenant_id, device_id).await
    }

    /// Mark a device disconnected. `version` must be the value returned by
    /// the `device_connected` call for this same connection.
    pub async fn device_disconnected(&self, tenant_id: Option<&str>, device_id: &str, version: u64) -> Result<()> {
        self.presence.set_disconnected(tenant_id, device_id, version).await
    }

    /// Provision a tenant. Idempotent: provisioning the same tenant twice
    /// is not an error.
    pub async fn provision_tenant(&self, tenant_id: &str) -> Result<()> {
        if tenant_id.is_empty() {
            return Err(crate::error::RelayError::BadRequest("tenant_id must not be empty".into()));
        }
        self.store.insert_tenant(tenant_id).await.map_err(crate::error::RelayError::Bus)?;
        Ok(())
    }

    /// Ask a connected device to check for a pending update. Fails with
    /// `DeviceNotConnected` rather than publishing if presence says the
    /// device is currently offline.
    pub async fn check_update(&self, tenant_id: &str, device_id: &str) -> Result<()> {
        self.send_control_command(tenant_id, device_id, relay_protocol::msg_type::CHECK_UPDATE).await
    }

    /// Ask a connected device to report its inventory.
    pub async fn send_inventory(&self, tenant_id: &str, device_id: &str) -> Result<()> {
        self.send_control_command(tenant_id, device_id, relay_protocol::msg_type::SEND_INVENTORY).await
    }

    async fn send_control_command(&self, tenant_id: &str, device_id: &str, msg_type: &str) -> Result<()> {
        self.presence.require_connected(Some(tenant_id), device_id).await?;
        let subject = subject::device_subject(Some(tenant_id), device_id);
        let frame = relay_protocol::ProtoMsg::new(relay_protocol::Proto::MenderClient, msg_type, Uuid::new_v4().to_string());
        self.bus.publish(&subject, frame).await.map_err(crate::error::RelayError::Bus)?;
        Ok(())
    }
}
