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

//! Session bookkeeping: the state machine every terminal or file-transfer
//! session moves through, and the table the rest of the crate uses to look
//! sessions up by id.
//!
//! `Proposed -> Accepted -> Active -> Closing -> Closed` is the happy path;
//! `Failed` is reachable from any state short of `Closed`, which is
//! terminal in both directions.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

/// What kind of session this is. Distinct kinds may be subject to distinct
/// concurrency policy (see `ConcurrencyPolicy`), even though they share the
/// same state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionKind {
    Terminal,
    FileTransferDownload,
    FileTransferUpload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Proposed,
    Accepted,
    Active,
    Closing,
    Closed,
    Failed,
}

impl SessionState {
    fn can_transition_to(self, to: SessionState) -> bool {
        use SessionState::*;
        match (self, to) {
            (Proposed, Accepted) => true,
            (Accepted, Active) => true,
            (Active, Closing) => true,
            (Closing, Closed) => true,
            (from, Failed) if from != Closed && from != Failed => true,
            _ => false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("cannot transition session {session_id} from {from:?} to {to:?}")]
pub struct InvalidTransition {
    pub session_id: Uuid,
    pub from: SessionState,
    pub to: SessionState,
}

/// A single terminal or file-transfer session brokered by the relay.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub tenant_id: Option<String>,
    pub user_id: String,
    pub device_id: String,
    pub kind: SessionKind,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(tenant_id: Option<String>, user_id: impl Into<String>, device_id: impl Into<String>, kind: SessionKind) -> Self {
        Session {
            id: Uuid::new_v4(),
            tenant_id,
            user_id: user_id.into(),
            device_id: device_id.into(),
            kind,
            state: SessionState::Proposed,
            created_at: Utc::now(),
        }
    }

    fn transition(&mut self, to: SessionState) -> Result<(), InvalidTransition> {
        if !self.state.can_transition_to(to) {
            return Err(InvalidTransition { session_id: self.id, from: self.state, to });
        }
        self.state = to;
        Ok(())
    }
}

/// The set of live sessions, keyed by id. Shared between the HTTP surface
/// (which looks sessions up to validate requests) and the relay tasks
/// (which drive sessions through their state machine and remove them once
/// closed).
#[derive(Default)]
pub struct SessionTable {
    sessions: DashMap<Uuid, Session>,
}

impl SessionTable {
    pub fn new() -> Arc<Self> {
        Arc::new(SessionTable::default())
    }

    pub fn insert(&self, session: Session) -> Uuid {
        let id = session.id;
        self.sessions.insert(id, session);
        id
    }

    pub fn get(&self, id: &Uuid) -> Option<Session> {
        self.sessions.get(id).map(|s| s.clone())
    }

    pub fn transition(&self, id: &Uuid, to: SessionState) -> Result<(), InvalidTransition> {
        let mut entry = self
            .sessions
            .get_mut(id)
            .ok_or(InvalidTransition { session_id: *id, from: SessionState::Closed, to })?;
        entry.transition(to)
    }

    pub fn remove(&self, id: &Uuid) -> Option<Session> {
        self.sessions.remove(id).map(|(_, s)| s)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Hook point for per-kind concurrency limits. The relay core itself does
/// not enforce any limit; `AllowAll` is the default policy and deployments
/// that need, say, "one terminal session per user per device" supply their
/// own implementation.
pub trait ConcurrencyPolicy: Send + Sync {
    fn allow(&self, table: &SessionTable, user_id: &str, device_id: &str, kind: SessionKind) -> bool;
}

pub struct AllowAll;

impl ConcurrencyPolicy for AllowAll {
    fn allow(&self, _table: &SessionTable, _user_id: &str, _device_id: &str, _kind: SessionKind) -> bool {
        true
    }
}
