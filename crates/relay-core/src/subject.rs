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

//! Bus subject naming. A subject addresses either a device's inbox or a
//! session's inbox, optionally scoped to a tenant. Centralizing the naming
//! here means the bus adapter, presence tracker, and session orchestrators
//! never hand-format a subject string themselves.

/// Build the subject a device listens on for inbound requests.
pub fn device_subject(tenant_id: Option<&str>, device_id: &str) -> String {
    match tenant_id {
        Some(tenant_id) => format!("session.{tenant_id}.device.{device_id}"),
        None => format!("session.{device_id}"),
    }
}

/// Build the subject a session's participants exchange frames on.
pub fn session_subject(tenant_id: Option<&str>, session_id: &str) -> String {
    match tenant_id {
        Some(tenant_id) => format!("session.{tenant_id}.session.{session_id}"),
        None => format!("session.{session_id}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_subject_is_tenant_scoped_when_tenant_present() {
        assert_eq!(device_subject(Some("acme"), "dev-1"), "session.acme.device.dev-1");
    }

    #[test]
    fn device_subject_drops_tenant_segment_in_single_tenant_mode() {
        assert_eq!(device_subject(None, "dev-1"), "session.dev-1");
    }

    #[test]
    fn session_subject_is_tenant_scoped_when_tenant_present() {
        assert_eq!(session_subject(Some("acme"), "sess-1"), "session.acme.session.sess-1");
    }
}
