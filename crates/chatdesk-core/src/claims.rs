//! Unverified JWT claim decoding for diagnostics
//!
//! Signatures are not checked; the server stays the only authority on token
//! validity. This is used to log expiry times and to render `status` output.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;

use crate::error::ProtocolError;

/// Claims carried by access and refresh tokens
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenClaims {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    /// Expiry in seconds since the Unix epoch
    #[serde(default)]
    pub exp: Option<u64>,
}

impl TokenClaims {
    /// Decode the payload segment of a compact JWT
    pub fn decode(token: &str) -> Result<Self, ProtocolError> {
        let payload = token
            .split('.')
            .nth(1)
            .ok_or_else(|| ProtocolError::InvalidPayload("token has no payload segment".into()))?;

        // Some issuers pad the segment even though JWT forbids it
        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|e| ProtocolError::InvalidPayload(e.to_string()))?;

        serde_json::from_slice(&bytes).map_err(|e| ProtocolError::InvalidPayload(e.to_string()))
    }

    /// Expiry as a system time
    pub fn expires_at(&self) -> Option<SystemTime> {
        self.exp.map(|secs| UNIX_EPOCH + Duration::from_secs(secs))
    }

    /// Whether the token is expired at `now`; tokens without `exp` never expire
    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        match self.expires_at() {
            Some(expiry) => now >= expiry,
            None => false,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(SystemTime::now())
    }

    /// Time left before expiry at `now`, zero once expired
    pub fn remaining_at(&self, now: SystemTime) -> Option<Duration> {
        self.expires_at()
            .map(|expiry| expiry.duration_since(now).unwrap_or(Duration::ZERO))
    }
}
