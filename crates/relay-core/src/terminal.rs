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

//! The terminal relay: bridges an operator-facing byte channel (wired to a
//! websocket upgrade by the embedding HTTP service) and a device's bus
//! session subject, pumping bytes in both directions. Also responsible for
//! liveness pings and idle-timeout teardown of the session it owns.

use std::sync::Arc;
use std::time::{Duration, Instant};

use relay_protocol::{msg_type, Proto, ProtoMsg};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::bus::{Bus, RecvError as BusRecvError};
use crate::error::{RelayError, Result};
use crate::recording::RecordingSink;
use crate::session::{SessionState, SessionTable};

/// Drives a single terminal session to completion: pumps bytes between the
/// operator channel and the bus, answers device pings, emits its own pings,
/// and tears the session down on idle timeout or peer close.
pub struct TerminalRelay {
    bus: Arc<dyn Bus>,
    table: Arc<SessionTable>,
}

impl TerminalRelay {
    pub fn new(bus: Arc<dyn Bus>, table: Arc<SessionTable>) -> Self {
        TerminalRelay { bus, table }
    }

    /// Run the pump loop until the session closes, fails, or the operator
    /// side hangs up. `operator_rx`/`operator_tx` carry raw terminal bytes
    /// to and from the HTTP-facing transport; `subject` is the bus subject
    /// shared with the device for this session.
    pub async fn run(
        &self,
        session_id: Uuid,
        subject: String,
        mut operator_rx: mpsc::Receiver<Vec<u8>>,
        operator_tx: mpsc::Sender<Vec<u8>>,
        mut recording: Option<RecordingSink>,
        ping_interval: Duration,
        idle_timeout: Duration,
    ) -> Result<()> {
        let mut bus_sub = self.bus.subscribe(&subject).await.map_err(RelayError::Bus)?;
        let mut ping_ticker = tokio::time::interval(ping_interval);
        ping_ticker.tick().await; // first tick fires immediately; consume it
        let session_id_str = session_id.to_string();
        let mut last_activity = Instant::now();

        let result = loop {
            // Only genuine received frames push the deadline out; the
            // ticker's own keepalive pings below must not.
            let remaining = idle_timeout.saturating_sub(last_activity.elapsed());
            tokio::select! {
                frame = bus_sub.recv() => {
                    match frame {
                        Ok(frame) => {
                            if frame.session_id() != session_id_str {
                                continue;
                            }
                            last_activity = Instant::now();
                            match frame.msg_type() {
                                msg_type::PING => {
                                    let pong = ProtoMsg::new(Proto::Control, msg_type::PONG, session_id_str.clone());
                                    self.bus.publish(&subject, pong).await.map_err(RelayError::Bus)?;
                                }
                                msg_type::PONG => {}
                                msg_type::CLOSE => break Ok(()),
                                _ => {
                                    if let Some(sink) = recording.as_mut() {
                                        sink.append(&frame.body).await;
                                    }
                                    if operator_tx.send(frame.body).await.is_err() {
                                        break Ok(());
                                    }
                                }
                            }
                        }
                        Err(BusRecvError::Lagged { skipped, .. }) => {
                            tracing::warn!(session_id = %session_id, skipped, "terminal session lagged behind the bus, failing session");
                            break Err(RelayError::Remote("session fell behind and cannot be recovered".into()));
                        }
                        Err(BusRecvError::Closed { .. }) => break Ok(()),
                    }
                }
                data = operator_rx.recv() => {
                    match data {
                        Some(bytes) => {
                            last_activity = Instant::now();
                            if let Some(sink) = recording.as_mut() {
                                sink.append(&bytes).await;
                            }
                            let frame = ProtoMsg::new(Proto::Shell, msg_type::CHUNK, session_id_str.clone()).with_body(bytes);
                            self.bus.publish(&subject, frame).await.map_err(RelayError::Bus)?;
                        }
                        None => break Ok(()),
                    }
                }
                _ = ping_ticker.tick() => {
                    let ping = ProtoMsg::new(Proto::Control, msg_type::PING, session_id_str.clone());
                    self.bus.publish(&subject, ping).await.map_err(RelayError::Bus)?;
                }
                // Fresh future every iteration (so losing branches cancel
                // cleanly), but armed against the last real frame's
                // timestamp rather than restarted at full length.
                _ = tokio::time::sleep(remaining) => {
                    tracing::info!(session_id = %session_id, "terminal session idle timeout");
                    break Err(RelayError::Timeout);
                }
            }
        };

        if let Some(sink) = recording {
            sink.close().await;
        }

        match &result {
            Ok(()) => {
                let _ = self.table.transition(&session_id, SessionState::Closing);
                let _ = self.table.transition(&session_id, SessionState::Closed);
            }
            Err(_) => {
                let _ = self.table.transition(&session_id, SessionState::Failed);
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use relay_protocol::Proto;

    use super::*;
    use crate::bus::InMemoryBus;
    use crate::session::{Session, SessionKind};

    #[tokio::test]
    async fn pumps_device_frames_to_the_operator_channel() {
        let bus = InMemoryBus::new(16);
        let table = SessionTable::new();
        let session = Session::new(None, "alice", "dev-1", SessionKind::Terminal);
        let session_id = table.insert(session);
        table.transition(&session_id, SessionState::Accepted).unwrap();
        table.transition(&session_id, SessionState::Active).unwrap();

        let relay = TerminalRelay::new(bus.clone(), table.clone());
        let (op_tx, mut op_rx) = mpsc::channel(8);
        let (_user_in_tx, user_in_rx) = mpsc::channel(8);

        let subject = "session.sess-test".to_string();
        let bus_for_device = bus.clone();
        let subject_for_device = subject.clone();
        let sid = session_id.to_string();
        tokio::spawn(async move {
            let frame = ProtoMsg::new(Proto::Shell, msg_type::CHUNK, sid).with_body(b"hello".to_vec());
            bus_for_device.publish(&subject_for_device, frame).await.unwrap();
        });

        let handle = tokio::spawn(async move {
            relay
                .run(session_id, subject, user_in_rx, op_tx, None, Duration::from_secs(30), Duration::from_millis(200))
                .await
        });

        let received = op_rx.recv().await.unwrap();
        assert_eq!(received, b"hello");

        drop(op_rx);
        let _ = handle.await;
    }

    #[tokio::test]
    async fn idle_timeout_fails_the_session() {
        let bus = InMemoryBus::new(16);
        let table = SessionTable::new();
        let session = Session::new(None, "alice", "dev-1", SessionKind::Terminal);
        let session_id = table.insert(session);
        table.transition(&session_id, SessionState::Accepted).unwrap();
        table.transition(&session_id, SessionState::Active).unwrap();

        let relay = TerminalRelay::new(bus, table.clone());
        let (op_tx, _op_rx) = mpsc::channel(8);
        let (_user_in_tx, user_in_rx) = mpsc::channel(8);

        let result = relay
            .run(session_id, "session.idle-test".into(), user_in_rx, op_tx, None, Duration::from_secs(30), Duration::from_millis(20))
            .await;

        assert!(matches!(result, Err(RelayError::Timeout)));
        assert_eq!(table.get(&session_id).unwrap().state, SessionState::Failed);
    }

    #[tokio::test]
    async fn self_emitted_pings_do_not_postpone_the_idle_deadline() {
        let bus = InMemoryBus::new(16);
        let table = SessionTable::new();
        let session = Session::new(None, "alice", "dev-1", SessionKind::Terminal);
        let session_id = table.insert(session);
        table.transition(&session_id, SessionState::Accepted).unwrap();
        table.transition(&session_id, SessionState::Active).unwrap();

        let relay = TerminalRelay::new(bus, table.clone());
        let (op_tx, _op_rx) = mpsc::channel(8);
        let (_user_in_tx, user_in_rx) = mpsc::channel(8);

        let start = Instant::now();
        let result = relay
            .run(
                session_id,
                "session.idle-ping-test".into(),
                user_in_rx,
                op_tx,
                None,
                Duration::from_millis(10),
                Duration::from_millis(50),
            )
            .await;
        let elapsed = start.elapsed();

        assert!(matches!(result, Err(RelayError::Timeout)));
        // A handful of self-emitted pings fire well before the 50ms idle
        // deadline; none of them should push the deadline out further.
        assert!(elapsed < Duration::from_millis(150), "idle timeout took {elapsed:?}, pings must be postponing it");
    }
}
