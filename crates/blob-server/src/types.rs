//! Response payloads

use response_cache::CacheStats;
use serde::{Deserialize, Serialize};

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub backend: String,
    pub cache: CacheStats,
}

/// `{ success: true, message }` body for successful writes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiMessage {
    pub success: bool,
    pub message: String,
}

impl ApiMessage {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}

/// Body of `POST /auth/sign-in`
#[derive(Debug, Deserialize)]
pub struct SignInRequest {
    #[serde(default)]
    pub passcode: Option<String>,
}
