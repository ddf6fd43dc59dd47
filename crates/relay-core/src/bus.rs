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

//! The pub/sub bus abstraction that decouples the relay core from any
//! particular message-bus product. Production deployments are expected to
//! bind this trait to a real broker; `InMemoryBus` is the implementation
//! used by tests and by single-process deployments that don't need a
//! standalone broker.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use relay_protocol::ProtoMsg;
use tokio::sync::broadcast;

/// A subscription handle. Each call to `Bus::subscribe` gets its own
/// receiver; all receivers for a subject get every message published to it
/// after they subscribed.
pub struct Subscription {
    subject: String,
    rx: broadcast::Receiver<ProtoMsg>,
}

/// Why a `Subscription::recv` call failed.
#[derive(Debug, thiserror::Error)]
pub enum RecvError {
    /// The subscriber fell behind and the bus dropped messages to make
    /// room. The spec treats this as fatal for the affected session rather
    /// than silently skipping ahead: a gap in a terminal or file-transfer
    /// stream cannot be reconciled after the fact.
    #[error("lagged behind on subject {subject}, {skipped} message(s) dropped")]
    Lagged { subject: String, skipped: u64 },

    #[error("no publishers remain for subject {subject}")]
    Closed { subject: String },
}

impl Subscription {
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Receive the next message published to this subject. Returns
    /// `RecvError::Lagged` if this subscriber fell behind the publisher, in
    /// which case the caller should treat the session as failed rather than
    /// continue consuming (see spec discussion of slow-consumer handling).
    pub async fn recv(&mut self) -> Result<ProtoMsg, RecvError> {
        match self.rx.recv().await {
            Ok(msg) => Ok(msg),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                Err(RecvError::Lagged { subject: self.subject.clone(), skipped })
            }
            Err(broadcast::error::RecvError::Closed) => Err(RecvError::Closed { subject: self.subject.clone() }),
        }
    }
}

/// The bus capability the relay core depends on: publish an envelope to a
/// subject, and subscribe to receive envelopes published to a subject.
/// Subjects are opaque strings; see `relay_core::subject` for the naming
/// convention the rest of the crate uses.
#[async_trait]
pub trait Bus: Send + Sync {
    async fn publish(&self, subject: &str, msg: ProtoMsg) -> anyhow::Result<()>;
    async fn subscribe(&self, subject: &str) -> anyhow::Result<Subscription>;
}

/// An in-process bus backed by one `tokio::sync::broadcast` channel per
/// subject, created lazily on first use. Messages published before any
/// subscriber exists are lost, same as a real broker without durable
/// subscriptions.
pub struct InMemoryBus {
    channel_size: usize,
    channels: DashMap<String, broadcast::Sender<ProtoMsg>>,
}

impl InMemoryBus {
    pub fn new(channel_size: usize) -> Arc<Self> {
        Arc::new(InMemoryBus { channel_size, channels: DashMap::new() })
    }

    fn sender_for(&self, subject: &str) -> broadcast::Sender<ProtoMsg> {
        self.channels
            .entry(subject.to_string())
            .or_insert_with(|| broadcast::channel(self.channel_size).0)
            .clone()
    }
}

#[async_trait]
impl Bus for InMemoryBus {
    async fn publish(&self, subject: &str, msg: ProtoMsg) -> anyhow::Result<()> {
        // No receivers is not an error: a device may publish a status frame
        // before any operator has subscribed to its session subject.
        let _ = self.sender_for(subject).send(msg);
        Ok(())
    }

    async fn subscribe(&self, subject: &str) -> anyhow::Result<Subscription> {
        let rx = self.sender_for(subject).subscribe();
        Ok(Subscription { subject: subject.to_string(), rx })
    }
}

#[cfg(test)]
mod tests {
    use relay_protocol::{msg_type, Proto};

    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_message() {
        let bus = InMemoryBus::new(8);
        let mut sub = bus.subscribe("session.dev-1").await.unwrap();

        let msg = ProtoMsg::new(Proto::Shell, msg_type::PING, "sess-1");
        bus.publish("session.dev-1", msg.clone()).await.unwrap();

        let received = sub.recv().await.unwrap();
        assert_eq!(received.session_id(), "sess-1");
    }

    #[tokio::test]
    async fn slow_subscriber_observes_lag_as_an_error() {
        let bus = InMemoryBus::new(2);
        let mut sub = bus.subscribe("session.dev-1").await.unwrap();

        for i in 0..5 {
            let msg = ProtoMsg::new(Proto::Shell, msg_type::CHUNK, format!("sess-{i}"));
            bus.publish("session.dev-1", msg).await.unwrap();
        }

        let result = sub.recv().await;
        assert!(matches!(result, Err(RecvError::Lagged { .. })));
    }

    #[tokio::test]
    async fn distinct_subjects_do_not_cross_talk() {
        let bus = InMemoryBus::new(8);
        let mut sub_a = bus.subscribe("session.dev-a").await.unwrap();
        let sub_b_subject = "session.dev-b";
        let _sub_b = bus.subscribe(sub_b_subject).await.unwrap();

        bus.publish(sub_b_subject, ProtoMsg::new(Proto::Shell, msg_type::PING, "s")).await.unwrap();

        let result = tokio::time::timeout(std::time::Duration::from_millis(50), sub_a.recv()).await;
        assert!(result.is_err(), "subscriber on a different subject should not see the message");
    }
}
