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

//! Persistence capability the relay core depends on. Mirrors the shape of
//! the original service's `DataStore` interface: device presence records and
//! session recordings, both addressed by tenant. `InMemoryDataStore` is a
//! `dashmap`-backed implementation suitable for tests and for single-node
//! deployments that don't need durability across restarts.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use uuid::Uuid;

/// Connection status of a device, as last reported to the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    Connected,
    Disconnected,
}

/// A device's last-known presence record.
#[derive(Debug, Clone)]
pub struct Device {
    pub tenant_id: Option<String>,
    pub device_id: String,
    pub status: DeviceStatus,
    /// Monotonically increasing version used to order presence updates that
    /// may arrive out of order (see `DataStore::set_device_connected`/
    /// `set_device_disconnected`).
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

/// A recorded session transcript, written by the recording sink
/// (`relay_core::recording`) and retrievable by session id.
#[derive(Debug, Clone)]
pub struct Recording {
    pub id: Uuid,
    pub session_id: String,
    pub tenant_id: Option<String>,
    pub data: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// The persistence capability the relay core depends on.
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Mark a device connected, creating its presence record if this is the
    /// first time it's been seen. Owns version generation: bumps the
    /// device's version counter and returns the new value, which the caller
    /// (the connect handler) has no other way to know in advance.
    async fn set_device_connected(&self, tenant_id: Option<&str>, device_id: &str) -> anyhow::Result<u64>;

    /// Apply a disconnect if `version` is not older than the stored version
    /// for this device. Returns `true` if the update was applied, `false`
    /// if it was stale and ignored. This compare-on-version guard is what
    /// lets a disconnect notification delayed behind a later reconnect
    /// arrive out of order without flapping the device's status backwards.
    async fn set_device_disconnected(
        &self,
        tenant_id: Option<&str>,
        device_id: &str,
        version: u64,
    ) -> anyhow::Result<bool>;

    async fn get_device(&self, tenant_id: Option<&str>, device_id: &str) -> anyhow::Result<Option<Device>>;

    async fn insert_recording(&self, recording: Recording) -> anyhow::Result<()>;

    async fn get_recording(&self, tenant_id: Option<&str>, session_id: &str) -> anyhow::Result<Option<Recording>>;

    /// Record a newly provisioned tenant. Returns `false` if the tenant
    /// already existed (provisioning is idempotent, not an error).
    async fn insert_tenant(&self, tenant_id: &str) -> anyhow::Result<bool>;
}

fn device_key(tenant_id: Option<&str>, device_id: &str) -> String {
    match tenant_id {
        Some(tenant_id) => format!("{tenant_id}/{device_id}"),
        None => device_id.to_string(),
    }
}

/// An in-process `DataStore`. Devices and recordings live in `dashmap`
/// tables; nothing is persisted across process restarts.
#[derive(Default)]
pub struct InMemoryDataStore {
    devices: DashMap<String, Device>,
    recordings: DashMap<String, Recording>,
    tenants: DashSet<String>,
}

impl InMemoryDataStore {
    pub fn new() -> Arc<Self> {
        Arc::new(InMemoryDataStore::default())
    }
}

#[async_trait]
impl DataStore for InMemoryDataStore {
    async fn set_device_connected(&self, tenant_id: Option<&str>, device_id: &str) -> anyhow::Result<u64> {
        let key = device_key(tenant_id, device_id);
        let mut entry = self.devices.entry(key).or_insert_with(|| Device {
            tenant_id: tenant_id.map(str::to_string),
            device_id: device_id.to_string(),
            status: DeviceStatus::Disconnected,
            version: 0,
            updated_at: Utc::now(),
        });
        entry.version += 1;
        entry.status = DeviceStatus::Connected;
        entry.updated_at = Utc::now();
        Ok(entry.version)
    }

    async fn set_device_disconnected(
        &self,
        tenant_id: Option<&str>,
        device_id: &str,
        version: u64,
    ) -> anyhow::Result<bool> {
        let key = device_key(tenant_id, device_id);
        let mut applied = false;
        self.devices
            .entry(key)
            .and_modify(|existing| {
                if version >= existing.version {
                    existing.status = DeviceStatus::Disconnected;
                    existing.version = version;
                    existing.updated_at = Utc::now();
                    applied = true;
                }
            })
            .or_insert_with(|| {
                applied = true;
                Device {
                    tenant_id: tenant_id.map(str::to_string),
                    device_id: device_id.to_string(),
                    status: DeviceStatus::Disconnected,
                    version,
                    updated_at: Utc::now(),
                }
            });
        Ok(applied)
    }

    async fn get_device(&self, tenant_id: Option<&str>, device_id: &str) -> anyhow::Result<Option<Device>> {
        Ok(self.devices.get(&device_key(tenant_id, device_id)).map(|d| d.clone()))
    }

    async fn insert_recording(&self, recording: Recording) -> anyhow::Result<()> {
        let key = device_key(recording.tenant_id.as_deref(), &recording.session_id);
        self.recordings.insert(key, recording);
        Ok(())
    }

    async fn get_recording(&self, tenant_id: Option<&str>, session_id: &str) -> anyhow::Result<Option<Recording>> {
        Ok(self.recordings.get(&device_key(tenant_id, session_id)).map(|r| r.clone()))
    }

    async fn insert_tenant(&self, tenant_id: &str) -> anyhow::Result<bool> {
        Ok(self.tenants.insert(tenant_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connecting_bumps_the_version_and_reports_it() {
        let store = InMemoryDataStore::new();
        let first = store.set_device_connected(None, "dev-1").await.unwrap();
        let second = store.set_device_connected(None, "dev-1").await.unwrap();
        assert!(second > first);

        let device = store.get_device(None, "dev-1").await.unwrap().unwrap();
        assert_eq!(device.version, second);
        assert_eq!(device.status, DeviceStatus::Connected);
    }

    #[tokio::test]
    async fn stale_disconnect_is_ignored() {
        let store = InMemoryDataStore::new();
        let version = store.set_device_connected(None, "dev-1").await.unwrap();

        let applied = store.set_device_disconnected(None, "dev-1", version - 1).await.unwrap();
        assert!(!applied);

        let device = store.get_device(None, "dev-1").await.unwrap().unwrap();
        assert_eq!(device.status, DeviceStatus::Connected);
        assert_eq!(device.version, version);
    }

    #[tokio::test]
    async fn newer_or_equal_disconnect_is_applied() {
        let store = InMemoryDataStore::new();
        let version = store.set_device_connected(None, "dev-1").await.unwrap();

        let applied = store.set_device_disconnected(None, "dev-1", version + 1).await.unwrap();
        assert!(applied);

        let device = store.get_device(None, "dev-1").await.unwrap().unwrap();
        assert_eq!(device.status, DeviceStatus::Disconnected);
    }

    #[tokio::test]
    async fn tenants_do_not_share_device_records() {
        let store = InMemoryDataStore::new();
        store.set_device_connected(Some("acme"), "dev-1").await.unwrap();
        assert!(store.get_device(Some("other"), "dev-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn tenant_provisioning_is_idempotent() {
        let store = InMemoryDataStore::new();
        assert!(store.insert_tenant("acme").await.unwrap());
        assert!(!store.insert_tenant("acme").await.unwrap());
    }
}
