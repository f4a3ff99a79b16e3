//! JSON envelope protocol between the client and the analysis service.
//!
//! Every message is a text frame `{"type": TAG, "payload": {...}}`.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};

use crate::error::{ClientError, ClientResult};
use crate::pose::Landmark;

pub const JPEG_DATA_URI_PREFIX: &str = "data:image/jpeg;base64,";

// --- Server -> client payloads ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedbackPayload {
    #[serde(default)]
    pub rep_count: u32,
    /// Chronological, most recent last.
    #[serde(default, rename = "feedback")]
    pub feedback_codes: Vec<String>,
    /// Current exercise phase label (e.g. "UP", "DOWN").
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub has_landmarks: bool,
    #[serde(default, rename = "debug_data")]
    pub debug_metrics: Option<BTreeMap<String, f64>>,
    #[serde(default)]
    pub landmarks: Option<Vec<Landmark>>,
}

impl FeedbackPayload {
    /// Landmarks to draw; empty when the service found no person.
    pub fn landmarks(&self) -> &[Landmark] {
        self.landmarks.as_deref().unwrap_or(&[])
    }

    pub fn latest_code(&self) -> Option<&str> {
        self.feedback_codes.last().map(String::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportPayload {
    pub total_reps: u32,
    pub good_reps: u32,
    #[serde(default, rename = "errors")]
    pub error_counts: BTreeMap<String, u32>,
}

// --- Envelopes ---

/// Client -> server.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboundEnvelope {
    PoseData { frame: String },
    StartSession {},
    EndSession {},
}

impl OutboundEnvelope {
    pub fn pose_data(frame: String) -> Self {
        Self::PoseData { frame }
    }

    pub fn end_session() -> Self {
        Self::EndSession {}
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Self::PoseData { .. } => "POSE_DATA",
            Self::StartSession {} => "START_SESSION",
            Self::EndSession {} => "END_SESSION",
        }
    }
}

/// Server -> client. Unknown tags decode to `Unrecognized` and are ignored.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEnvelope {
    Feedback(FeedbackPayload),
    Report(ReportPayload),
    ServerError { message: String },
    Info { payload: serde_json::Value },
    Unrecognized { kind: String },
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: serde_json::Value,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

pub fn encode_outbound(envelope: &OutboundEnvelope) -> ClientResult<String> {
    serde_json::to_string(envelope).map_err(|e| ClientError::EncodeError(e.to_string()))
}

/// Decodes one inbound text frame.
///
/// The tag is read first so that an unknown tag never fails on a payload shape
/// this client doesn't know about.
pub fn decode_inbound(text: &str) -> ClientResult<InboundEnvelope> {
    let RawEnvelope { kind, payload } =
        serde_json::from_str(text).map_err(|e| ClientError::MalformedInboundEnvelope(e.to_string()))?;

    match kind.as_str() {
        "FEEDBACK" => {
            let payload: FeedbackPayload =
                serde_json::from_value(payload).map_err(|e| malformed(&kind, e))?;
            Ok(InboundEnvelope::Feedback(payload))
        }
        "REPORT" => {
            let payload: ReportPayload = serde_json::from_value(payload).map_err(|e| malformed(&kind, e))?;
            if payload.good_reps > payload.total_reps {
                return Err(ClientError::MalformedInboundEnvelope(format!(
                    "REPORT good_reps {} exceeds total_reps {}",
                    payload.good_reps, payload.total_reps
                )));
            }
            Ok(InboundEnvelope::Report(payload))
        }
        "ERROR" => {
            let body: ErrorBody = serde_json::from_value(payload).map_err(|e| malformed(&kind, e))?;
            Ok(InboundEnvelope::ServerError { message: body.message })
        }
        "INFO" => Ok(InboundEnvelope::Info { payload }),
        _ => Ok(InboundEnvelope::Unrecognized { kind: kind.clone() }),
    }
}

fn malformed(kind: &str, e: serde_json::Error) -> ClientError {
    ClientError::MalformedInboundEnvelope(format!("{kind} payload: {e}"))
}

/// Wraps encoded JPEG bytes as a self-describing data URI.
pub fn jpeg_data_uri(jpeg: &[u8]) -> String {
    let mut uri = String::with_capacity(JPEG_DATA_URI_PREFIX.len() + jpeg.len().div_ceil(3) * 4);
    uri.push_str(JPEG_DATA_URI_PREFIX);
    STANDARD.encode_string(jpeg, &mut uri);
    uri
}
