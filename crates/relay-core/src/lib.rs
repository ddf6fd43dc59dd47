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

//! Protocol engine and session orchestrator for the device-to-user
//! remote-access relay.
//!
//! This crate is the part of the relay that knows nothing about HTTP: it
//! consumes a [`Bus`](bus::Bus) for pub/sub transport and a
//! [`DataStore`](datastore::DataStore) for persistence, and exposes
//! [`App`](app::App) as the single entry point an HTTP or other ingress
//! layer drives.

pub mod app;
pub mod bus;
pub mod config;
pub mod datastore;
pub mod error;
pub mod filetransfer;
pub mod presence;
pub mod recording;
pub mod session;
pub mod subject;
pub mod terminal;

pub use app::App;
pub use error::{RelayError, Result};
