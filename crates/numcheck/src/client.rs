//! Verification Client: one remote lookup per candidate.
//!
//! The remote service answers `GET /open/whatsapp/check-number/{source}/{number}`
//! with a JSON object carrying an `on_whatsapp` flag and two opaque info
//! objects. Error statuses are classified here; the scheduler only acts on the
//! classification.

use crate::source::Candidate;
use numcheck_sinks::OutputRecord;
use reqwest::{Client, Url};
use serde_json::Value;
use std::future::Future;
use thiserror::Error;
use tracing::info;

/// Default API endpoint.
pub const DEFAULT_API_BASE_URL: &str = "https://api.p.2chat.io";

/// Header carrying the account credential.
pub const API_KEY_HEADER: &str = "X-User-API-Key";

/// Statuses that mean the account itself cannot continue this run.
const FATAL_STATUSES: [u16; 3] = [401, 402, 404];

/// How the scheduler must react to a failed verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Stop the whole run.
    Fatal,
    /// Skip this candidate and carry on.
    Transient,
}

#[derive(Debug, Error)]
pub enum VerifyError {
    /// The service answered with a non-success status.
    #[error("API error: status=[{status}] reason=[{reason}]: {body}")]
    Service {
        status: u16,
        reason: String,
        body: String,
    },
    /// No response at all (connection refused, TLS failure, reset, ...).
    #[error("No response from verification service: {0}")]
    Network(String),
    /// The service answered but the payload could not be interpreted.
    #[error("Malformed verification payload: {0}")]
    Payload(String),
}

impl VerifyError {
    pub fn classification(&self) -> Classification {
        match self {
            VerifyError::Service { status, .. } if FATAL_STATUSES.contains(status) => {
                Classification::Fatal
            }
            _ => Classification::Transient,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.classification() == Classification::Fatal
    }
}

/// Outcome of one successful verification.
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationResult {
    pub phone_number: Candidate,
    /// `None` when the service omitted the flag.
    pub on_whatsapp: Option<bool>,
    pub number_info: Option<Value>,
    pub whatsapp_info: Option<Value>,
}

impl VerificationResult {
    /// Interpret a service payload. Missing fields degrade to `None`; only a
    /// body that is not a JSON object is rejected.
    pub fn from_payload(phone_number: Candidate, payload: Value) -> Result<Self, VerifyError> {
        let mut fields = match payload {
            Value::Object(fields) => fields,
            other => {
                return Err(VerifyError::Payload(format!(
                    "expected a JSON object for {}, got {}",
                    phone_number,
                    json_kind(&other)
                )))
            }
        };

        let on_whatsapp = fields.get("on_whatsapp").and_then(parse_flag);
        let number_info = fields.remove("number").filter(|v| !v.is_null());
        let whatsapp_info = fields.remove("whatsapp_info").filter(|v| !v.is_null());

        Ok(Self {
            phone_number,
            on_whatsapp,
            number_info,
            whatsapp_info,
        })
    }

    /// Row representation; info payloads are serialized verbatim as JSON text.
    pub fn to_output_record(&self) -> OutputRecord {
        OutputRecord {
            phone_number: self.phone_number.to_string(),
            on_whatsapp: self.on_whatsapp,
            json_number_information: self.number_info.as_ref().map(Value::to_string),
            json_whatsapp_information: self.whatsapp_info.as_ref().map(Value::to_string),
        }
    }
}

fn parse_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(flag) => Some(*flag),
        Value::String(s) if s.eq_ignore_ascii_case("true") => Some(true),
        Value::String(s) if s.eq_ignore_ascii_case("false") => Some(false),
        _ => None,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// A remote lookup that can tell whether a number is registered.
///
/// Implementations must be shareable across the tasks the scheduler spawns.
pub trait NumberChecker: Send + Sync + 'static {
    /// Identifier of the account performing the checks, for diagnostics.
    fn source_id(&self) -> &str;

    fn check(
        &self,
        candidate: &Candidate,
    ) -> impl Future<Output = Result<VerificationResult, VerifyError>> + Send;
}

/// reqwest-backed client for the check-number endpoint.
pub struct TwoChatClient {
    http_client: Client,
    base_url: Url,
    source_number: String,
    api_key: String,
}

impl TwoChatClient {
    pub fn new(
        http_client: Client,
        base_url: Url,
        source_number: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            http_client,
            base_url,
            source_number: source_number.into(),
            api_key: api_key.into(),
        }
    }

    /// `{base}/open/whatsapp/check-number/{source}/{number}`
    pub fn endpoint(&self, candidate: &Candidate) -> Result<Url, VerifyError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                VerifyError::Payload(format!("base URL {} cannot hold a path", self.base_url))
            })?
            .pop_if_empty()
            .extend([
                "open",
                "whatsapp",
                "check-number",
                self.source_number.as_str(),
                candidate.as_str(),
            ]);
        Ok(url)
    }

    async fn lookup(&self, candidate: &Candidate) -> Result<VerificationResult, VerifyError> {
        let url = self.endpoint(candidate)?;

        let response = self
            .http_client
            .get(url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(|e| VerifyError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VerifyError::Service {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("unknown").to_string(),
                body,
            });
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| VerifyError::Payload(e.to_string()))?;

        info!(number = %candidate, "{}: {}", candidate, payload);

        VerificationResult::from_payload(candidate.clone(), payload)
    }
}

impl NumberChecker for TwoChatClient {
    fn source_id(&self) -> &str {
        &self.source_number
    }

    fn check(
        &self,
        candidate: &Candidate,
    ) -> impl Future<Output = Result<VerificationResult, VerifyError>> + Send {
        self.lookup(candidate)
    }
}
