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

pub mod error;
pub mod handlers;

use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the HTTP router: internal provisioning/command endpoints, the
/// management-facing terminal websocket and file download/upload endpoints,
/// and the device-facing connect endpoint devices use to register their
/// presence and exchange protocol frames.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/internal/v1/deviceconnect/tenants", post(handlers::provision_tenant))
        .route(
            "/api/internal/v1/deviceconnect/tenants/:tenant_id/devices/:device_id/check-update",
            post(handlers::check_update),
        )
        .route(
            "/api/internal/v1/deviceconnect/tenants/:tenant_id/devices/:device_id/send-inventory",
            post(handlers::send_inventory),
        )
        .route("/api/management/v1/deviceconnect/devices/:device_id/connect", get(handlers::connect))
        .route("/api/management/v1/deviceconnect/devices/:device_id/download", get(handlers::download))
        .route("/api/management/v1/deviceconnect/devices/:device_id/upload", put(handlers::upload))
        .route("/api/devices/v1/deviceconnect/devices/:device_id/connect", get(handlers::device_connect))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
