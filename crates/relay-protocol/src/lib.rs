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

//! The wire envelope (`ProtoMsg`) and sub-protocol payloads carried between
//! devices and operators across the message bus.
//!
//! Everything in this crate is a bare, serde-derived struct; behavior lives
//! in `relay-core`. The encoding is a self-describing binary map (MessagePack
//! via `rmp-serde`), which tolerates unknown fields on decode so older and
//! newer peers can exchange envelopes without a lockstep upgrade.

use std::{collections::HashMap, io};

use anyhow::Context;
use serde_derive::{Deserialize, Serialize};

pub mod msg_type {
    pub const STAT: &str = "stat";
    pub const GET: &str = "get";
    pub const PUT: &str = "put";
    pub const CHUNK: &str = "chunk";
    pub const CONTINUE: &str = "continue";
    pub const ERROR: &str = "error";
    pub const FILE_INFO: &str = "file_info";
    pub const PING: &str = "ping";
    pub const PONG: &str = "pong";
    pub const CLOSE: &str = "close";
    pub const ACCEPT: &str = "accept";
    pub const OPEN: &str = "open";
    pub const CHECK_UPDATE: &str = "check-update";
    pub const SEND_INVENTORY: &str = "send-inventory";
}

pub const PROPERTY_USER_ID: &str = "user_id";
pub const PROPERTY_OFFSET: &str = "offset";
pub const PROPERTY_STATUS: &str = "status";

/// The sub-protocol a `ProtoMsg` belongs to, carried in the envelope header.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Proto {
    Shell,
    FileTransfer,
    Control,
    MenderClient,
}

/// A small scalar value that can ride along in the envelope's `properties`
/// map. Kept deliberately narrow: the bus plane never needs to carry
/// structured data outside of `body`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum PropertyValue {
    String(String),
    Integer(i64),
    Bool(bool),
}

impl PropertyValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PropertyValue::Integer(n) => Some(*n),
            _ => None,
        }
    }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        PropertyValue::String(s)
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        PropertyValue::String(s.to_string())
    }
}

impl From<i64> for PropertyValue {
    fn from(n: i64) -> Self {
        PropertyValue::Integer(n)
    }
}

/// The header of a `ProtoMsg`: everything except the raw body bytes.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ProtoHdr {
    #[serde(default)]
    pub proto: Option<Proto>,
    #[serde(default)]
    pub typ: String,
    #[serde(default)]
    pub sid: String,
    #[serde(default)]
    pub props: HashMap<String, PropertyValue>,
}

/// The envelope exchanged on the bus. Every envelope on a session-subject
/// carries a `session_id` (`hdr.sid`); recipients must drop frames whose
/// `session_id` does not match their session (see `relay_core::session`).
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ProtoMsg {
    pub hdr: ProtoHdr,
    #[serde(with = "serde_bytes_body", default)]
    pub body: Vec<u8>,
}

// rmp-serde happily serializes Vec<u8> as an array of integers, which is
// wire-correct but wasteful; route it through `serde_bytes` so it becomes a
// msgpack bin value instead.
mod serde_bytes_body {
    use serde::{Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serde_bytes::serialize(bytes, s)
    }

    pub fn deserialize<'de, D>(d: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        serde_bytes::deserialize(d)
    }
}

impl ProtoMsg {
    pub fn new(proto: Proto, typ: impl Into<String>, session_id: impl Into<String>) -> Self {
        ProtoMsg {
            hdr: ProtoHdr { proto: Some(proto), typ: typ.into(), sid: session_id.into(), props: HashMap::new() },
            body: Vec::new(),
        }
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.hdr.props.insert(key.into(), value.into());
        self
    }

    pub fn session_id(&self) -> &str {
        &self.hdr.sid
    }

    pub fn msg_type(&self) -> &str {
        &self.hdr.typ
    }
}

/// The centralized encoding function that should be used for all envelope
/// serialization. All fields serialize with struct-map encoding so unknown
/// keys are skipped (not positionally misaligned) on decode.
pub fn encode(msg: &ProtoMsg) -> anyhow::Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut serializer = rmp_serde::Serializer::new(&mut buf).with_struct_map();
    serde::Serialize::serialize(msg, &mut serializer).context("encoding envelope")?;
    Ok(buf)
}

/// The centralized decoding function for all envelope deserialization.
/// Returns a `DecodeError` (never panics) on truncated or malformed input.
pub fn decode(data: &[u8]) -> Result<ProtoMsg, DecodeError> {
    rmp_serde::from_slice(data).map_err(|e| DecodeError(e.to_string()))
}

#[derive(Debug, thiserror::Error)]
#[error("failed to decode envelope: {0}")]
pub struct DecodeError(pub String);

/// Encode a payload struct (e.g. a file-transfer message body) using the
/// same struct-map msgpack convention as the envelope itself.
pub fn encode_payload<T: serde::Serialize>(v: &T) -> anyhow::Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut serializer = rmp_serde::Serializer::new(&mut buf).with_struct_map();
    v.serialize(&mut serializer).context("encoding payload")?;
    Ok(buf)
}

/// Decode a payload struct from an envelope body.
pub fn decode_payload<T: for<'de> serde::Deserialize<'de>>(data: &[u8]) -> Result<T, DecodeError> {
    rmp_serde::from_slice(data).map_err(|e| DecodeError(e.to_string()))
}

/// `stat` request: ask the device to describe a file before transfer.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StatFile {
    pub path: String,
}

/// `get` request: ask the device to begin streaming file contents.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct GetFile {
    pub path: String,
}

/// `put` request / `file_info` response: metadata describing a file, used
/// both to kick off an upload and to describe the result of a `stat`.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct FileInfo {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub uid: Option<u32>,
    #[serde(default)]
    pub gid: Option<u32>,
    #[serde(default)]
    pub mode: Option<u32>,
    #[serde(default)]
    pub size: Option<u64>,
}

/// `continue` reply: the device is ready to receive upload chunks.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Continue {}

/// `error` reply: the device rejected or failed a file-transfer request.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Error {
    #[serde(default)]
    pub message_type: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trips() {
        let msg = ProtoMsg::new(Proto::FileTransfer, msg_type::CHUNK, "sess-1")
            .with_property(PROPERTY_OFFSET, 4096i64)
            .with_body(b"hello world".to_vec());

        let encoded = encode(&msg).expect("encode");
        let decoded = decode(&encoded).expect("decode");

        assert_eq!(decoded.session_id(), "sess-1");
        assert_eq!(decoded.msg_type(), msg_type::CHUNK);
        assert_eq!(decoded.body, b"hello world");
        assert_eq!(decoded.hdr.props.get(PROPERTY_OFFSET).and_then(|v| v.as_i64()), Some(4096));
    }

    #[test]
    fn truncated_input_does_not_panic() {
        let msg = ProtoMsg::new(Proto::Control, msg_type::PING, "sess-2");
        let mut encoded = encode(&msg).expect("encode");
        encoded.truncate(encoded.len() / 2);

        assert!(decode(&encoded).is_err());
    }

    #[test]
    fn file_info_payload_round_trips() {
        let info = FileInfo {
            path: Some("/etc/hostname".into()),
            uid: Some(0),
            gid: Some(0),
            mode: Some(0o644),
            size: Some(5),
        };
        let body = encode_payload(&info).expect("encode payload");
        let decoded: FileInfo = decode_payload(&body).expect("decode payload");
        assert_eq!(decoded.path.as_deref(), Some("/etc/hostname"));
        assert_eq!(decoded.size, Some(5));
    }

    #[test]
    fn unknown_fields_are_ignored_on_decode() {
        // hand-roll a map with an extra field; struct-map decoding must skip it.
        use serde::Serialize;

        let mut buf = Vec::new();
        let mut ser = rmp_serde::Serializer::new(&mut buf).with_struct_map();
        #[derive(Serialize)]
        struct WithExtra {
            path: Option<String>,
            uid: Option<u32>,
            gid: Option<u32>,
            mode: Option<u32>,
            size: Option<u64>,
            totally_new_field: String,
        }
        WithExtra {
            path: Some("/tmp/x".into()),
            uid: None,
            gid: None,
            mode: None,
            size: None,
            totally_new_field: "from the future".into(),
        }
        .serialize(&mut ser)
        .unwrap();

        let decoded: FileInfo = decode_payload(&buf).expect("decode with unknown field");
        assert_eq!(decoded.path.as_deref(), Some("/tmp/x"));
    }
}
