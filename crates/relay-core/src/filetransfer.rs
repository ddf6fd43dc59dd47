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

//! The file-transfer orchestrator: drives the `STAT -> GET -> CHUNK*`
//! download flow and the `PUT -> CONTINUE -> CHUNK*` upload flow against a
//! device over its bus subject, translating the request/response exchange
//! into a byte stream the HTTP surface can forward to (or read from) an
//! operator.
//!
//! A chunk with an empty body marks end-of-stream in both directions; this
//! mirrors how the rest of the envelope protocol signals completion without
//! a dedicated message type.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use relay_protocol::{decode_payload, encode_payload, msg_type, Continue, FileInfo, GetFile, Proto, ProtoMsg, StatFile};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::bus::{Bus, RecvError as BusRecvError};
use crate::error::{RelayError, Result};

/// Tunables for a single file-transfer session. Distinct from the terminal
/// relay's timings because file transfers default to a shorter idle window
/// (see `relay_core::config`).
#[derive(Debug, Clone, Copy)]
pub struct Timing {
    pub ping_interval: Duration,
    pub idle_timeout: Duration,
}

/// A download in progress: the metadata the device reported in its `STAT`
/// reply, plus a channel yielding body chunks as they arrive.
pub struct Download {
    pub info: FileInfo,
    pub body_rx: mpsc::Receiver<Result<Bytes>>,
}

pub struct FileTransfer {
    bus: Arc<dyn Bus>,
}

impl FileTransfer {
    pub fn new(bus: Arc<dyn Bus>) -> Self {
        FileTransfer { bus }
    }

    /// Start a download: stat the remote path, then begin streaming its
    /// contents. Returns once the device's `file_info` reply has been
    /// received; the returned `Download::body_rx` is fed by a background
    /// task for the remainder of the transfer.
    pub async fn download(&self, session_id: Uuid, subject: String, path: String, timing: Timing) -> Result<Download> {
        let mut sub = self.bus.subscribe(&subject).await.map_err(RelayError::Bus)?;
        let sid = session_id.to_string();

        let stat = ProtoMsg::new(Proto::FileTransfer, msg_type::STAT, sid.clone())
            .with_body(encode_payload(&StatFile { path: path.clone() }).map_err(RelayError::Bus)?);
        self.bus.publish(&subject, stat).await.map_err(RelayError::Bus)?;

        let info = await_file_info(&mut sub, &sid, timing.idle_timeout).await?;

        let get = ProtoMsg::new(Proto::FileTransfer, msg_type::GET, sid.clone())
            .with_body(encode_payload(&GetFile { path }).map_err(RelayError::Bus)?);
        self.bus.publish(&subject, get).await.map_err(RelayError::Bus)?;

        let (body_tx, body_rx) = mpsc::channel(16);
        let bus = self.bus.clone();
        tokio::spawn(async move {
            pump_download_chunks(bus, sub, subject, sid, body_tx, timing).await;
        });

        Ok(Download { info, body_rx })
    }

    /// Start an upload: offer the remote file metadata, wait for the
    /// device's `continue` reply, then drain `body_rx` onto the bus as a
    /// sequence of `chunk` frames terminated by one with an empty body.
    pub async fn upload(
        &self,
        session_id: Uuid,
        subject: String,
        info: FileInfo,
        mut body_rx: mpsc::Receiver<Bytes>,
        timing: Timing,
    ) -> Result<()> {
        let mut sub = self.bus.subscribe(&subject).await.map_err(RelayError::Bus)?;
        let sid = session_id.to_string();

        let put = ProtoMsg::new(Proto::FileTransfer, msg_type::PUT, sid.clone())
            .with_body(encode_payload(&info).map_err(RelayError::Bus)?);
        self.bus.publish(&subject, put).await.map_err(RelayError::Bus)?;

        await_continue(&mut sub, &sid, timing.idle_timeout).await?;

        let mut ping_ticker = tokio::time::interval(timing.ping_interval);
        ping_ticker.tick().await;
        let mut offset: u64 = 0;
        let mut last_activity = Instant::now();

        loop {
            let remaining = timing.idle_timeout.saturating_sub(last_activity.elapsed());
            tokio::select! {
                chunk = body_rx.recv() => {
                    last_activity = Instant::now();
                    let body = chunk.map(|b| b.to_vec()).unwrap_or_default();
                    let is_last = body.is_empty();
                    let frame = ProtoMsg::new(Proto::FileTransfer, msg_type::CHUNK, sid.clone())
                        .with_property(relay_protocol::PROPERTY_OFFSET, offset as i64)
                        .with_body(body.clone());
                    offset += body.len() as u64;
                    self.bus.publish(&subject, frame).await.map_err(RelayError::Bus)?;
                    if is_last {
                        return Ok(());
                    }
                }
                frame = sub.recv() => {
                    match frame {
                        Ok(frame) if frame.session_id() == sid && frame.msg_type() == msg_type::ERROR => {
                            last_activity = Instant::now();
                            let err: relay_protocol::Error = decode_payload(&frame.body).map_err(RelayError::Decode)?;
                            return Err(RelayError::Remote(err.error.unwrap_or_else(|| "upload rejected by device".into())));
                        }
                        Ok(frame) if frame.session_id() == sid => {
                            last_activity = Instant::now();
                        }
                        Ok(_) => continue,
                        Err(BusRecvError::Lagged { .. }) => {
                            return Err(RelayError::Remote("upload session fell behind and cannot be recovered".into()));
                        }
                        Err(BusRecvError::Closed { .. }) => {
                            return Err(RelayError::DeviceNotConnected(subject.clone()));
                        }
                    }
                }
                _ = ping_ticker.tick() => {
                    let ping = ProtoMsg::new(Proto::Control, msg_type::PING, sid.clone());
                    self.bus.publish(&subject, ping).await.map_err(RelayError::Bus)?;
                }
                _ = tokio::time::sleep(remaining) => {
                    return Err(RelayError::Timeout);
                }
            }
        }
    }
}

async fn await_file_info(sub: &mut crate::bus::Subscription, session_id: &str, timeout: Duration) -> Result<FileInfo> {
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            frame = sub.recv() => {
                let frame = frame.map_err(|e| recv_err_to_relay_err(e, session_id))?;
                if frame.session_id() != session_id {
                    continue;
                }
                match frame.msg_type() {
                    msg_type::FILE_INFO => return decode_payload(&frame.body).map_err(RelayError::Decode),
                    msg_type::ERROR => {
                        let err: relay_protocol::Error = decode_payload(&frame.body).map_err(RelayError::Decode)?;
                        return Err(RelayError::Remote(err.error.unwrap_or_else(|| "stat failed".into())));
                    }
                    _ => continue,
                }
            }
            _ = &mut deadline => return Err(RelayError::Timeout),
        }
    }
}

async fn await_continue(sub: &mut crate::bus::Subscription, session_id: &str, timeout: Duration) -> Result<()> {
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            frame = sub.recv() => {
                let frame = frame.map_err(|e| recv_err_to_relay_err(e, session_id))?;
                if frame.session_id() != session_id {
                    continue;
                }
                match frame.msg_type() {
                    msg_type::CONTINUE => return Ok(()),
                    msg_type::ERROR => {
                        let err: relay_protocol::Error = decode_payload(&frame.body).map_err(RelayError::Decode)?;
                        return Err(RelayError::Remote(err.error.unwrap_or_else(|| "put rejected".into())));
                    }
                    _ => continue,
                }
            }
            _ = &mut deadline => return Err(RelayError::Timeout),
        }
    }
}

fn recv_err_to_relay_err(err: BusRecvError, _session_id: &str) -> RelayError {
    match err {
        BusRecvError::Lagged { .. } => RelayError::Remote("fell behind on the device's reply stream".into()),
        BusRecvError::Closed { subject } => RelayError::DeviceNotConnected(subject),
    }
}

async fn pump_download_chunks(
    bus: Arc<dyn Bus>,
    mut sub: crate::bus::Subscription,
    subject: String,
    session_id: String,
    body_tx: mpsc::Sender<Result<Bytes>>,
    timing: Timing,
) {
    let mut ping_ticker = tokio::time::interval(timing.ping_interval);
    ping_ticker.tick().await;
    let mut last_activity = Instant::now();

    loop {
        let remaining = timing.idle_timeout.saturating_sub(last_activity.elapsed());
        tokio::select! {
            frame = sub.recv() => {
                match frame {
                    Ok(frame) => {
                        if frame.session_id() != session_id {
                            continue;
                        }
                        last_activity = Instant::now();
                        match frame.msg_type() {
                            msg_type::CHUNK => {
                                let is_last = frame.body.is_empty();
                                if !is_last && body_tx.send(Ok(Bytes::from(frame.body))).await.is_err() {
                                    return;
                                }
                                if is_last {
                                    return;
                                }
                            }
                            msg_type::ERROR => {
                                let err: Result<relay_protocol::Error> =
                                    decode_payload(&frame.body).map_err(RelayError::Decode);
                                let message = match err {
                                    Ok(e) => e.error.unwrap_or_else(|| "download failed".into()),
                                    Err(e) => e.to_string(),
                                };
                                let _ = body_tx.send(Err(RelayError::Remote(message))).await;
                                return;
                            }
                            _ => continue,
                        }
                    }
                    Err(BusRecvError::Lagged { .. }) => {
                        let _ = body_tx.send(Err(RelayError::Remote("download fell behind and cannot be recovered".into()))).await;
                        return;
                    }
                    Err(BusRecvError::Closed { subject }) => {
                        let _ = body_tx.send(Err(RelayError::DeviceNotConnected(subject))).await;
                        return;
                    }
                }
            }
            _ = ping_ticker.tick() => {
                let ping = ProtoMsg::new(Proto::Control, msg_type::PING, session_id.clone());
                if bus.publish(&subject, ping).await.is_err() {
                    return;
                }
            }
            _ = tokio::time::sleep(remaining) => {
                let _ = body_tx.send(Err(RelayError::Timeout)).await;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use relay_protocol::{encode_payload, FileInfo};

    use super::*;
    use crate::bus::InMemoryBus;

    fn timing() -> Timing {
        Timing { ping_interval: Duration::from_secs(30), idle_timeout: Duration::from_millis(300) }
    }

    #[tokio::test]
    async fn download_streams_chunks_until_empty_terminator() {
        let bus = InMemoryBus::new(16);
        let ft = FileTransfer::new(bus.clone());
        let session_id = Uuid::new_v4();
        let subject = "session.ft-test".to_string();

        let device_bus = bus.clone();
        let device_subject = subject.clone();
        let sid = session_id.to_string();
        tokio::spawn(async move {
            let mut sub = device_bus.subscribe(&device_subject).await.unwrap();
            // STAT
            let stat_req = sub.recv().await.unwrap();
            assert_eq!(stat_req.msg_type(), msg_type::STAT);

            let info = FileInfo { path: Some("/etc/hostname".into()), uid: Some(0), gid: Some(0), mode: Some(0o644), size: Some(4) };
            let reply = ProtoMsg::new(Proto::FileTransfer, msg_type::FILE_INFO, sid.clone())
                .with_body(encode_payload(&info).unwrap());
            device_bus.publish(&device_subject, reply).await.unwrap();

            // GET
            let get_req = sub.recv().await.unwrap();
            assert_eq!(get_req.msg_type(), msg_type::GET);

            for chunk in [b"abcd".to_vec(), Vec::new()] {
                let frame = ProtoMsg::new(Proto::FileTransfer, msg_type::CHUNK, sid.clone()).with_body(chunk);
                device_bus.publish(&device_subject, frame).await.unwrap();
            }
        });

        let mut download = ft.download(session_id, subject, "/etc/hostname".into(), timing()).await.unwrap();
        assert_eq!(download.info.size, Some(4));

        let first = download.body_rx.recv().await.unwrap().unwrap();
        assert_eq!(first, Bytes::from_static(b"abcd"));
        assert!(download.body_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn download_stat_error_is_surfaced() {
        let bus = InMemoryBus::new(16);
        let ft = FileTransfer::new(bus.clone());
        let session_id = Uuid::new_v4();
        let subject = "session.ft-error".to_string();

        let device_bus = bus.clone();
        let device_subject = subject.clone();
        let sid = session_id.to_string();
        tokio::spawn(async move {
            let mut sub = device_bus.subscribe(&device_subject).await.unwrap();
            let _stat_req = sub.recv().await.unwrap();
            let err_payload = relay_protocol::Error { message_type: Some("stat".into()), error: Some("no such file".into()) };
            let reply = ProtoMsg::new(Proto::FileTransfer, msg_type::ERROR, sid)
                .with_body(encode_payload(&err_payload).unwrap());
            device_bus.publish(&device_subject, reply).await.unwrap();
        });

        let result = ft.download(session_id, subject, "/missing".into(), timing()).await;
        assert!(matches!(result, Err(RelayError::Remote(_))));
    }

    #[tokio::test]
    async fn upload_sends_chunks_and_awaits_continue() {
        let bus = InMemoryBus::new(16);
        let ft = FileTransfer::new(bus.clone());
        let session_id = Uuid::new_v4();
        let subject = "session.ft-upload".to_string();

        let device_bus = bus.clone();
        let device_subject = subject.clone();
        let sid = session_id.to_string();
        let collected = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let collected_task = collected.clone();
        tokio::spawn(async move {
            let mut sub = device_bus.subscribe(&device_subject).await.unwrap();
            let _put_req = sub.recv().await.unwrap();
            let cont = ProtoMsg::new(Proto::FileTransfer, msg_type::CONTINUE, sid.clone())
                .with_body(encode_payload(&relay_protocol::Continue {}).unwrap());
            device_bus.publish(&device_subject, cont).await.unwrap();

            loop {
                let frame = sub.recv().await.unwrap();
                if frame.msg_type() != msg_type::CHUNK {
                    continue;
                }
                let done = frame.body.is_empty();
                collected_task.lock().await.push(frame.body);
                if done {
                    break;
                }
            }
        });

        let (body_tx, body_rx) = mpsc::channel(8);
        body_tx.send(Bytes::from_static(b"xyz")).await.unwrap();
        body_tx.send(Bytes::new()).await.unwrap();

        let info = FileInfo { path: Some("/tmp/out".into()), uid: Some(0), gid: Some(0), mode: Some(0o644), size: Some(3) };
        ft.upload(session_id, subject, info, body_rx, timing()).await.unwrap();

        let chunks = collected.lock().await;
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], b"xyz");
        assert!(chunks[1].is_empty());
    }

    #[tokio::test]
    async fn self_emitted_pings_do_not_postpone_download_idle_deadline() {
        let bus = InMemoryBus::new(16);
        let ft = FileTransfer::new(bus.clone());
        let session_id = Uuid::new_v4();
        let subject = "session.ft-idle-ping".to_string();

        let device_bus = bus.clone();
        let device_subject = subject.clone();
        let sid = session_id.to_string();
        tokio::spawn(async move {
            let mut sub = device_bus.subscribe(&device_subject).await.unwrap();
            let _stat_req = sub.recv().await.unwrap();
            let info = FileInfo { path: Some("/dev/null".into()), uid: Some(0), gid: Some(0), mode: Some(0o644), size: Some(0) };
            let reply = ProtoMsg::new(Proto::FileTransfer, msg_type::FILE_INFO, sid.clone())
                .with_body(encode_payload(&info).unwrap());
            device_bus.publish(&device_subject, reply).await.unwrap();
            let _get_req = sub.recv().await.unwrap();
            // Device never sends a chunk; the download pump must time out on
            // its own idle deadline rather than waiting forever because the
            // relay's self-emitted keepalive pings keep the deadline alive.
        });

        let fast_timing = Timing { ping_interval: Duration::from_millis(10), idle_timeout: Duration::from_millis(50) };
        let start = Instant::now();
        let mut download = ft.download(session_id, subject, "/dev/null".into(), fast_timing).await.unwrap();
        let result = download.body_rx.recv().await;
        let elapsed = start.elapsed();

        assert!(matches!(result, Some(Err(RelayError::Timeout))));
        assert!(elapsed < Duration::from_millis(150), "idle timeout took {elapsed:?}, pings must be postponing it");
    }
}
