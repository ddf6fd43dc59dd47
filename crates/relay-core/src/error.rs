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

//! Domain errors shared across the relay core. Kept as a flat `thiserror`
//! enum rather than per-module error types because every public operation
//! eventually has to answer the same question an HTTP handler asks: "what
//! status code does this map to?" (see `relay_core::error::RelayError::status_hint`).

use thiserror::Error;

/// Errors produced by the relay core's public operations.
///
/// Variants are deliberately coarse: callers at the HTTP boundary map these
/// onto status codes (see the table in the top-level design notes), they do
/// not need to distinguish, say, "bus unavailable" from "bus serialization
/// failed".
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("no user identity attached to the request")]
    AuthMissing,

    #[error("device {0} is not connected")]
    DeviceNotConnected(String),

    #[error("device {0} not found")]
    DeviceNotFound(String),

    #[error("session {0} not found")]
    SessionNotFound(String),

    #[error("remote endpoint rejected the request: {0}")]
    Remote(String),

    #[error("timed out waiting for a response from the device")]
    Timeout,

    #[error("request is malformed: {0}")]
    BadRequest(String),

    #[error("bus error: {0}")]
    Bus(#[from] anyhow::Error),

    #[error("failed to decode peer message: {0}")]
    Decode(#[from] relay_protocol::DecodeError),

    #[error("datastore error: {0}")]
    Store(String),
}

/// A coarse status-hint used by HTTP bindings; kept here rather than in the
/// service crate so the mapping travels with the error variants it describes
/// instead of drifting out of sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusHint {
    Unauthorized,
    BadRequest,
    NotFound,
    Conflict,
    RequestTimeout,
    Internal,
}

impl RelayError {
    pub fn status_hint(&self) -> StatusHint {
        match self {
            RelayError::AuthMissing => StatusHint::Unauthorized,
            RelayError::DeviceNotConnected(_) => StatusHint::Conflict,
            RelayError::DeviceNotFound(_) => StatusHint::NotFound,
            RelayError::SessionNotFound(_) => StatusHint::NotFound,
            RelayError::Remote(_) => StatusHint::BadRequest,
            RelayError::Timeout => StatusHint::RequestTimeout,
            RelayError::BadRequest(_) => StatusHint::BadRequest,
            RelayError::Bus(_) => StatusHint::Internal,
            RelayError::Decode(_) => StatusHint::Internal,
            RelayError::Store(_) => StatusHint::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
