// Wire types for the OpenShock REST API.
//
// Every JSON body uses camelCase keys. Successful responses are wrapped in
// `{ "message": ..., "data": ... }`; failures use RFC 7807 problem details.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Standard success envelope.
#[derive(Debug, Deserialize)]
pub(crate) struct BaseResponse<T> {
    #[serde(default)]
    #[allow(dead_code)]
    pub message: Option<String>,
    pub data: Option<T>,
}

/// RFC 7807 problem body returned on 4xx responses.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ProblemDetails {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
}

impl ProblemDetails {
    pub(crate) fn describe(&self) -> String {
        self.detail
            .clone()
            .or_else(|| self.title.clone())
            .or_else(|| self.kind.clone())
            .unwrap_or_default()
    }
}

/// Problem type sent when the device is not online.
pub(crate) const PROBLEM_DEVICE_OFFLINE: &str = "Device.NotOnline";
/// Problem type sent when the device is online but has no gateway.
pub(crate) const PROBLEM_DEVICE_NO_GATEWAY: &str = "Device.NotConnectedToGateway";

/// A hub device the token owner controls, with its shockers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceWithShockers {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub created_on: Option<DateTime<Utc>>,
    #[serde(default)]
    pub shockers: Vec<ShockerResponse>,
}

/// A shocker attached to a hub device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShockerResponse {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub is_paused: bool,
    #[serde(default)]
    pub created_on: Option<DateTime<Utc>>,
    #[serde(default)]
    pub rf_id: u16,
    #[serde(default)]
    pub model: String,
}

/// Live-control gateway assignment for a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LcgResponse {
    /// Gateway host, e.g. `de1-gateway.openshock.app`.
    pub gateway: String,
    #[serde(default)]
    pub country: Option<String>,
}

/// The account behind the token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelfResponse {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_device_with_shockers() {
        let json = r#"{
            "id": "6f0b0f0e-49a5-4ab6-a1b6-6ad0d3c8e3a1",
            "name": "Living room hub",
            "createdOn": "2025-11-02T10:00:00Z",
            "shockers": [{
                "id": "0c4e7a58-8ee4-4f38-b2d8-9a1bfe9bd2a2",
                "name": "Left",
                "isPaused": true,
                "rfId": 4242,
                "model": "CaiXianlin"
            }]
        }"#;

        let device: DeviceWithShockers = serde_json::from_str(json).unwrap();
        assert_eq!(device.name, "Living room hub");
        assert_eq!(device.shockers.len(), 1);
        assert!(device.shockers[0].is_paused);
        assert_eq!(device.shockers[0].rf_id, 4242);
    }

    #[test]
    fn problem_description_prefers_detail() {
        let problem: ProblemDetails = serde_json::from_str(
            r#"{"type":"Device.NotOnline","title":"Device is not online","detail":"offline since 5m"}"#,
        )
        .unwrap();
        assert_eq!(problem.kind.as_deref(), Some(PROBLEM_DEVICE_OFFLINE));
        assert_eq!(problem.describe(), "offline since 5m");
    }
}
