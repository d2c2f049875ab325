use serde::{Deserialize, Serialize};

/// Body of `POST /scan`.
#[derive(Debug, Clone, Deserialize)]
pub struct ScanRequest {
    pub id: String,
}

/// Text frame sent by a WebSocket client, e.g. `{"scan": "04A1B2C3"}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientMessage {
    pub scan: Option<String>,
}

/// Reply frame for a WebSocket request that could not be served. Successful
/// scans need no reply: the `scanned` event reaches every subscriber.
#[derive(Debug, Clone, Serialize)]
pub struct ServerMessage {
    pub r#type: String,
    pub error_type: String,
    pub message: String,
}

impl ServerMessage {
    pub fn error(error_type: &str, message: impl Into<String>) -> Self {
        Self {
            r#type: "error".to_string(),
            error_type: error_type.to_string(),
            message: message.into(),
        }
    }
}
