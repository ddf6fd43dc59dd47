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

//! Session recording sink. Batches frames from a terminal or file-transfer
//! session in memory and periodically persists them through `DataStore`.
//! A flush failure is logged and swallowed: losing a recording is never a
//! reason to tear down the session it is shadowing.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::datastore::{DataStore, Recording};

/// Accumulates session bytes and flushes them to the store on close or once
/// `flush_threshold` bytes have been buffered.
pub struct RecordingSink {
    session_id: String,
    tenant_id: Option<String>,
    buffer: Vec<u8>,
    flush_threshold: usize,
    store: Arc<dyn DataStore>,
}

impl RecordingSink {
    pub fn new(
        session_id: impl Into<String>,
        tenant_id: Option<String>,
        flush_threshold: usize,
        store: Arc<dyn DataStore>,
    ) -> Self {
        RecordingSink {
            session_id: session_id.into(),
            tenant_id,
            buffer: Vec::new(),
            flush_threshold,
            store,
        }
    }

    /// Append a frame's payload to the in-memory buffer, flushing if the
    /// threshold has been crossed.
    pub async fn append(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
        if self.buffer.len() >= self.flush_threshold {
            self.flush().await;
        }
    }

    /// Persist the buffered bytes accumulated so far. A no-op if nothing
    /// has been appended since the last flush.
    pub async fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let recording = Recording {
            id: Uuid::new_v4(),
            session_id: self.session_id.clone(),
            tenant_id: self.tenant_id.clone(),
            data: self.buffer.clone(),
            created_at: Utc::now(),
            expires_at: None,
        };
        if let Err(err) = self.store.insert_recording(recording).await {
            tracing::warn!(session_id = %self.session_id, error = %err, "failed to flush session recording");
        }
    }

    /// Flush any remaining bytes and consume the sink. Called when the
    /// owning session transitions to `Closed`.
    pub async fn close(mut self) {
        self.flush().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::InMemoryDataStore;

    #[tokio::test]
    fn flush_persists_buffered_bytes_and_clears_buffer() {
        let store = InMemoryDataStore::new();
        let mut sink = RecordingSink::new("sess-1", None, 1024, store.clone());

        sink.append(b"hello ").await;
        sink.append(b"world").await;
        sink.flush().await;

        let recording = store.get_recording(None, "sess-1").await.unwrap().unwrap();
        assert_eq!(recording.data, b"hello world");
    }

    #[tokio::test]
    async fn threshold_triggers_automatic_flush() {
        let store = InMemoryDataStore::new();
        let mut sink = RecordingSink::new("sess-2", None, 4, store.clone());

        sink.append(b"12345").await;

        let recording = store.get_recording(None, "sess-2").await.unwrap().unwrap();
        assert_eq!(recording.data, b"12345");
    }

    #[tokio::test]
    async fn close_flushes_trailing_bytes() {
        let store = InMemoryDataStore::new();
        let mut sink = RecordingSink::new("sess-3", None, 1024, store.clone());
        sink.append(b"tail").await;
        sink.close().await;

        let recording = store.get_recording(None, "sess-3").await.unwrap().unwrap();
        assert_eq!(recording.data, b"tail");
    }
}
