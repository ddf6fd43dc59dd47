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

//! Device presence tracking. A thin layer over `DataStore` that the rest of
//! the crate goes through rather than touching device status records
//! directly, so the "is this device connected" question and the
//! compare-on-version update rule stay in one place.

use std::sync::Arc;

use crate::datastore::{DataStore, DeviceStatus};
use crate::error::{RelayError, Result};

pub struct PresenceTracker {
    store: Arc<dyn DataStore>,
}

impl PresenceTracker {
    pub fn new(store: Arc<dyn DataStore>) -> Self {
        PresenceTracker { store }
    }

    /// Record that a device connected. The store owns version generation;
    /// the returned version is what a disconnect for this same connection
    /// must later be reported against.
    pub async fn set_connected(&self, tenant_id: Option<&str>, device_id: &str) -> Result<u64> {
        self.store.set_device_connected(tenant_id, device_id).await.map_err(RelayError::Bus)
    }

    /// Record that a device disconnected. `version` must be the value
    /// returned by the `set_connected` call it corresponds to; stale
    /// disconnects (superseded by a later reconnect) are silently dropped by
    /// the underlying store.
    pub async fn set_disconnected(&self, tenant_id: Option<&str>, device_id: &str, version: u64) -> Result<()> {
        self.store.set_device_disconnected(tenant_id, device_id, version).await.map_err(RelayError::Bus)?;
        Ok(())
    }

    /// Returns an error if the device is unknown or not currently
    /// connected; returns `Ok(())` if it is safe to open a session against
    /// it. Every session-opening operation (terminal attach, file-transfer
    /// download/upload) calls this before publishing to the device.
    pub async fn require_connected(&self, tenant_id: Option<&str>, device_id: &str) -> Result<()> {
        let device = self.store.get_device(tenant_id, device_id).await.map_err(RelayError::Bus)?;
        match device {
            None => Err(RelayError::DeviceNotFound(device_id.to_string())),
            Some(d) if d.status != DeviceStatus::Connected => {
                Err(RelayError::DeviceNotConnected(device_id.to_string()))
            }
            Some(_) => Ok(()),
        }
    }
}
