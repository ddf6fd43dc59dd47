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

//! Operator-facing HTTP handlers: a websocket upgrade for interactive
//! terminal sessions, plain HTTP endpoints for file download/upload, and
//! the internal tenant-provisioning / device-command endpoints.
//!
//! Identity (tenant id, user id) is expected to already have been verified
//! by an upstream gateway and forwarded as headers; this service trusts
//! them rather than re-validating a credential, same as the rest of the
//! management API it sits behind.

use std::collections::HashMap;

use axum::{
    body::Body,
    extract::{ws::Message, ws::WebSocket, Json, Multipart, Path, State, WebSocketUpgrade},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use relay_core::{bus::Bus, error::RelayError, session::SessionKind, subject};
use relay_protocol::FileInfo;
use serde_derive::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use crate::http::error::ApiError;
use crate::state::AppState;

const TENANT_HEADER: &str = "X-Tenant-Id";
const USER_HEADER: &str = "X-User-Id";

/// Resolve the tenant and user identity an upstream gateway attached to the
/// request. Missing user identity is `401 Unauthorized` (see §6); missing
/// tenant is allowed, producing a single-tenant-style subject.
fn tenant_and_user(headers: &HeaderMap) -> Result<(Option<String>, String), ApiError> {
    let tenant = headers.get(TENANT_HEADER).and_then(|v| v.to_str().ok()).map(str::to_string);
    let user = headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| ApiError(RelayError::AuthMissing))?;
    Ok((tenant, user))
}

/// Upgrade an operator's HTTP connection to a websocket and bridge it to
/// the device's bus session subject for the lifetime of the terminal
/// session.
pub async fn connect(
    State(app): State<AppState>,
    Path(device_id): Path<String>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let (tenant, user) = tenant_and_user(&headers)?;
    let session_id = app.open_session(tenant.as_deref(), &user, &device_id, SessionKind::Terminal).await?;

    Ok(ws.on_upgrade(move |socket| async move {
        if let Err(err) = drive_terminal(app, tenant, session_id, socket).await {
            tracing::warn!(%session_id, error = %err, "terminal session ended with an error");
        }
    }))
}

async fn drive_terminal(
    app: AppState,
    tenant: Option<String>,
    session_id: Uuid,
    socket: WebSocket,
) -> anyhow::Result<()> {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (to_operator_tx, mut to_operator_rx) = mpsc::channel::<Vec<u8>>(32);
    let (from_operator_tx, from_operator_rx) = mpsc::channel::<Vec<u8>>(32);

    let forward_out = tokio::spawn(async move {
        while let Some(bytes) = to_operator_rx.recv().await {
            if ws_tx.send(Message::Binary(bytes)).await.is_err() {
                break;
            }
        }
    });

    let forward_in = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                Message::Binary(data) => {
                    if from_operator_tx.send(data).await.is_err() {
                        break;
                    }
                }
                Message::Text(text) => {
                    if from_operator_tx.send(text.into_bytes()).await.is_err() {
                        break;
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    let result = app.terminal_session(tenant.as_deref(), session_id, from_operator_rx, to_operator_tx, true).await;

    forward_out.abort();
    forward_in.abort();
    result.map_err(Into::into)
}

/// Upgrade a device's persistent connection to a websocket, record its
/// presence as connected, and bridge encoded envelope frames between the
/// socket and its bus subject for the connection's lifetime. This is the
/// only production code path that ever marks a device connected; without
/// it presence never leaves its default `disconnected` state and every
/// session-opening operation against the device fails with `409 Conflict`.
pub async fn device_connect(
    State(app): State<AppState>,
    Path(device_id): Path<String>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let tenant = headers.get(TENANT_HEADER).and_then(|v| v.to_str().ok()).map(str::to_string);
    let version = app.device_connected(tenant.as_deref(), &device_id).await?;

    Ok(ws.on_upgrade(move |socket| async move {
        drive_device(app, tenant, device_id, version, socket).await;
    }))
}

async fn drive_device(app: AppState, tenant: Option<String>, device_id: String, version: u64, socket: WebSocket) {
    let subject = subject::device_subject(tenant.as_deref(), &device_id);
    let (mut ws_tx, mut ws_rx) = socket.split();

    let sub = match app.bus.subscribe(&subject).await {
        Ok(sub) => sub,
        Err(err) => {
            tracing::warn!(%device_id, error = %err, "device connection could not subscribe to its bus subject");
            if let Err(err) = app.device_disconnected(tenant.as_deref(), &device_id, version).await {
                tracing::warn!(%device_id, error = %err, "failed to record device disconnect");
            }
            return;
        }
    };

    let forward_out = tokio::spawn(async move {
        let mut sub = sub;
        while let Ok(frame) = sub.recv().await {
            match relay_protocol::encode(&frame) {
                Ok(bytes) => {
                    if ws_tx.send(Message::Binary(bytes)).await.is_err() {
                        break;
                    }
                }
                Err(err) => tracing::warn!(error = %err, "failed to encode outbound device frame"),
            }
        }
    });

    let bus = app.bus.clone();
    let publish_subject = subject.clone();
    let forward_in = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                Message::Binary(data) => match relay_protocol::decode(&data) {
                    Ok(frame) => {
                        let _ = bus.publish(&publish_subject, frame).await;
                    }
                    Err(err) => tracing::warn!(error = %err, "dropping undecodable frame from device"),
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    let _ = forward_in.await;
    forward_out.abort();

    if let Err(err) = app.device_disconnected(tenant.as_deref(), &device_id, version).await {
        tracing::warn!(%device_id, error = %err, "failed to record device disconnect");
    }
}

#[derive(Deserialize)]
pub struct DownloadRequest {
    pub path: String,
}

/// Stream a file's contents off a device. Mirrors the `stat -> get -> chunk*`
/// bus exchange as a single chunked HTTP response. Per the invariant that
/// headers are sent at most once, the status is locked to 200 as soon as
/// `FileInfo` arrives; any later error truncates the body rather than
/// changing the status.
pub async fn download(
    State(app): State<AppState>,
    Path(device_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<DownloadRequest>,
) -> Result<Response, ApiError> {
    let (tenant, user) = tenant_and_user(&headers)?;
    let session_id = app.open_session(tenant.as_deref(), &user, &device_id, SessionKind::FileTransferDownload).await?;

    let download = app.download(tenant.as_deref(), &device_id, session_id, req.path.clone()).await?;

    let mut resp_headers = HeaderMap::new();
    let path = download.info.path.clone().unwrap_or(req.path);
    resp_headers.insert(header::CONTENT_TYPE, "application/octet-stream".parse().unwrap());
    resp_headers.insert(
        header::CONTENT_DISPOSITION,
        format!("attachment; filename=\"{}\"", sanitize_filename(&path)).parse().unwrap(),
    );
    resp_headers.insert("X-Men-File-Path", path.parse().unwrap());
    if let Some(uid) = download.info.uid {
        resp_headers.insert("X-Men-File-UID", uid.into());
    }
    if let Some(gid) = download.info.gid {
        resp_headers.insert("X-Men-File-GID", gid.into());
    }
    if let Some(mode) = download.info.mode {
        resp_headers.insert("X-Men-File-Mode", format!("{mode:o}").parse().unwrap());
    }
    if let Some(size) = download.info.size {
        resp_headers.insert("X-Men-File-Size", size.into());
        resp_headers.insert(header::CONTENT_LENGTH, size.into());
    }

    let stream = ReceiverStream::new(download.body_rx)
        .map(|chunk| chunk.map(Bytes::from).map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string())));
    let body = Body::from_stream(stream);

    Ok((StatusCode::OK, resp_headers, body).into_response())
}

fn sanitize_filename(path: &str) -> String {
    path.rsplit('/').next().unwrap_or(path).replace('"', "")
}

/// Accept an uploaded file and relay it to a device as a `put -> continue ->
/// chunk*` exchange. Expects multipart fields `path`, `uid`, `gid`, `mode`,
/// and `file`.
pub async fn upload(
    State(app): State<AppState>,
    Path(device_id): Path<String>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<StatusCode, ApiError> {
    let (tenant, user) = tenant_and_user(&headers)?;

    let buffer_size = app.config.file_transfer_buffer_size;
    let mut fields: HashMap<String, String> = HashMap::new();
    let (body_tx, body_rx) = mpsc::channel::<Bytes>(16);

    // Scalar fields are expected ahead of `file` in the multipart body (the
    // usual form field order); collect them until `file` is reached so
    // `FileInfo` is complete before the device session opens.
    let mut file_field = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError(RelayError::BadRequest(format!("invalid multipart body: {e}"))))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name == "file" {
            file_field = Some(field);
            break;
        }
        let text = field.text().await.unwrap_or_default();
        fields.insert(name, text);
    }

    let info = FileInfo {
        path: fields.get("path").cloned(),
        uid: fields.get("uid").and_then(|v| v.parse().ok()),
        gid: fields.get("gid").and_then(|v| v.parse().ok()),
        mode: fields.get("mode").and_then(|v| v.parse().ok()),
        size: None,
    };

    if info.path.is_none() {
        return Err(ApiError(RelayError::BadRequest("missing required field 'path'".into())));
    }

    let session_id = app.open_session(tenant.as_deref(), &user, &device_id, SessionKind::FileTransferUpload).await?;

    // Drain the `file` field's chunks and drive the orchestrator's
    // `body_rx` consumer concurrently: `body_tx` only has room for a
    // handful of buffer-sized chunks, so reading the whole body first
    // (before anything drains it) would deadlock on anything but a tiny
    // upload.
    let read_body = async move {
        if let Some(mut field) = file_field {
            // Multipart yields whatever chunk sizes the underlying stream
            // happens to produce; re-buffer to `file_transfer_buffer_size`
            // so the orchestrator's chunk frames land on the offsets the
            // device side expects.
            let mut buf = Vec::with_capacity(buffer_size);
            loop {
                let chunk = field
                    .chunk()
                    .await
                    .map_err(|e| ApiError(RelayError::BadRequest(format!("reading upload body: {e}"))))?;
                let Some(chunk) = chunk else { break };
                buf.extend_from_slice(&chunk);
                while buf.len() >= buffer_size {
                    let rest = buf.split_off(buffer_size);
                    let full = std::mem::replace(&mut buf, rest);
                    if body_tx.send(Bytes::from(full)).await.is_err() {
                        return Ok(());
                    }
                }
            }
            if !buf.is_empty() {
                let _ = body_tx.send(Bytes::from(buf)).await;
            }
        }
        let _ = body_tx.send(Bytes::new()).await;
        Ok::<(), ApiError>(())
    };

    let (read_result, upload_result) =
        tokio::join!(read_body, app.upload(tenant.as_deref(), &device_id, session_id, info, body_rx));
    read_result?;
    upload_result?;

    Ok(StatusCode::CREATED)
}

#[derive(Deserialize)]
pub struct ProvisionTenantRequest {
    pub tenant_id: String,
}

pub async fn provision_tenant(
    State(app): State<AppState>,
    Json(req): Json<ProvisionTenantRequest>,
) -> Result<StatusCode, ApiError> {
    app.provision_tenant(&req.tenant_id).await?;
    Ok(StatusCode::CREATED)
}

pub async fn check_update(
    State(app): State<AppState>,
    Path((tenant_id, device_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    app.check_update(&tenant_id, &device_id).await?;
    Ok(StatusCode::ACCEPTED)
}

pub async fn send_inventory(
    State(app): State<AppState>,
    Path((tenant_id, device_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    app.send_inventory(&tenant_id, &device_id).await?;
    Ok(StatusCode::ACCEPTED)
}
