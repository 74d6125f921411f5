//! Service names, capability advertisement, and subscription event frames.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Protocol version advertised in every `ServerInfo`.
pub const API_VERSION: i32 = 15;

/// Service (capability) names as they appear in `capabilities` and in
/// `ServiceEvent::service`.
pub struct Services;

impl Services {
    /// Pseudo-service carrying capability updates to subscribers.
    pub const SERVER: &str = "server";
    /// Literal that selects every available service in `subscribe`.
    pub const ALL: &str = "all";

    pub const PLUGINS: &str = "plugins";
    pub const NETWORK: &str = "network";
    pub const NETWORK_CREDENTIALS: &str = "network.credentials";
    pub const LOGINCTL: &str = "loginctl";
    pub const FREEDESKTOP: &str = "freedesktop";
    pub const GAMMA: &str = "gamma";
    pub const BLUETOOTH: &str = "bluetooth";
    pub const BLUETOOTH_PAIRING: &str = "bluetooth.pairing";
    pub const CUPS: &str = "cups";
    pub const DWL: &str = "dwl";
    pub const BRIGHTNESS: &str = "brightness";
    pub const BRIGHTNESS_UPDATE: &str = "brightness.update";
}

/// Sent unsolicited as the first line of every connection, and as the
/// `data` of `server` subscription events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    pub api_version: i32,
    pub capabilities: Vec<String>,
}

impl ServerInfo {
    pub fn new(capabilities: Vec<String>) -> Self {
        Self {
            api_version: API_VERSION,
            capabilities,
        }
    }

    pub fn has(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }
}

/// One item of a subscription stream: which service changed, and its payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceEvent {
    pub service: String,
    pub data: Value,
}

impl ServiceEvent {
    pub fn new(service: impl Into<String>, data: Value) -> Self {
        Self {
            service: service.into(),
            data,
        }
    }

    /// The `result` payload of a subscription frame.
    pub fn into_value(self) -> Value {
        json!({ "service": self.service, "data": self.data })
    }
}
