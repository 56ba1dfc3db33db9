//! Response envelopes
//!
//! Both cloud drives wrap every JSON response in an envelope carrying a
//! success indicator, a numeric code and a message:
//!
//! - boolean state: `{"state": true, "code": 0, "message": "", "data": ...}`
//! - numeric code: `{"code": 200, "message": "success", "data": ...}`
//!
//! [`Envelope::parse`] tries the boolean shape first, then the numeric one.
//! [`CodeTable`] maps backend codes onto the error classes the executor acts
//! on.

use std::ops::RangeInclusive;

use serde::Deserialize;
use serde_json::Value;

use crate::ClientError;

// ============================================================================
// Wire shapes
// ============================================================================

/// Envelope with a boolean `state` field
#[derive(Debug, Deserialize)]
struct BoolStateEnvelope {
    state: bool,
    #[serde(default)]
    code: Option<i64>,
    /// Some endpoints report the code as `errno`
    #[serde(default)]
    errno: Option<i64>,
    #[serde(default)]
    message: Option<String>,
    /// Some endpoints report the message as `error`
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    data: Value,
}

/// Envelope with a numeric `code` field (and optional numeric state)
#[derive(Debug, Deserialize)]
struct NumericStateEnvelope {
    code: i64,
    #[serde(default)]
    state: Option<i64>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Value,
}

// ============================================================================
// Envelope
// ============================================================================

/// Parsed response envelope
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Whether the backend reported success
    pub success: bool,
    /// Backend status code (0 when absent)
    pub code: i64,
    pub message: String,
    /// Payload, `Value::Null` when absent
    pub data: Value,
}

impl Envelope {
    /// Parses a response body, boolean-state shape first.
    pub fn parse(body: &[u8]) -> Result<Self, ClientError> {
        if let Ok(env) = serde_json::from_slice::<BoolStateEnvelope>(body) {
            let code = env.code.or(env.errno).unwrap_or(0);
            let message = env
                .message
                .filter(|m| !m.is_empty())
                .or(env.error)
                .unwrap_or_default();
            return Ok(Self {
                success: env.state,
                code,
                message,
                data: env.data,
            });
        }

        match serde_json::from_slice::<NumericStateEnvelope>(body) {
            Ok(env) => Ok(Self {
                success: (env.code == 0 || env.code == 200) && env.state.map_or(true, |s| s != 0),
                code: env.code,
                message: env.message.unwrap_or_default(),
                data: env.data,
            }),
            Err(err) => Err(ClientError::Envelope(format!(
                "{err} (body starts with {:?})",
                String::from_utf8_lossy(&body[..body.len().min(120)])
            ))),
        }
    }

    /// Deserializes the payload into a typed value.
    pub fn data_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, ClientError> {
        serde_json::from_value(self.data.clone())
            .map_err(|e| ClientError::Envelope(format!("unexpected payload: {e}")))
    }
}

// ============================================================================
// CodeTable
// ============================================================================

/// Backend-specific code classification
#[derive(Debug, Clone, Default)]
pub struct CodeTable {
    credential: Vec<RangeInclusive<i64>>,
    rate_limited: Vec<i64>,
}

impl CodeTable {
    pub fn new(credential: Vec<RangeInclusive<i64>>, rate_limited: Vec<i64>) -> Self {
        Self {
            credential,
            rate_limited,
        }
    }

    /// Codes used by the pick-code drive open API
    pub fn drive115() -> Self {
        Self::new(vec![40140123..=40140126], vec![770004])
    }

    /// Codes used by the path-addressed drive API
    pub fn openlist() -> Self {
        Self::new(vec![401..=401], vec![429])
    }

    pub fn is_credential(&self, code: i64) -> bool {
        self.credential.iter().any(|r| r.contains(&code))
    }

    pub fn is_rate_limited(&self, code: i64) -> bool {
        self.rate_limited.contains(&code)
    }
}
