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

//! Maps `relay_core::RelayError` onto HTTP status codes. Kept as a newtype
//! wrapper rather than implementing `IntoResponse` on the foreign error type
//! directly, since orphan rules would forbid that anyway.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use relay_core::error::{RelayError, StatusHint};
use serde_derive::Serialize;

pub struct ApiError(pub RelayError);

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        ApiError(err)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.status_hint() {
            StatusHint::Unauthorized => StatusCode::UNAUTHORIZED,
            StatusHint::BadRequest => StatusCode::BAD_REQUEST,
            StatusHint::NotFound => StatusCode::NOT_FOUND,
            StatusHint::Conflict => StatusCode::CONFLICT,
            StatusHint::RequestTimeout => StatusCode::REQUEST_TIMEOUT,
            StatusHint::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(ErrorBody { error: self.0.to_string() })).into_response()
    }
}
