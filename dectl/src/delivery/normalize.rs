//! Provider webhook normalization.
//!
//! Each recognized provider has an adapter that maps its native payload into
//! a [`NormalizedResponse`]; unknown providers fall through a generic
//! normalizer that probes common field names in declared order.

use serde_json::Value;
use uuid::Uuid;

use crate::types::ContentKind;

/// A provider payload reduced to the shape `deliver` expects.
#[derive(Debug, Clone)]
pub struct NormalizedResponse {
    /// The correlator back to our request; delivery rejects payloads where
    /// none can be recovered.
    pub request_id: Option<Uuid>,
    pub success: bool,
    pub content_kind: ContentKind,
    pub content: Value,
    pub error: Option<String>,
}

/// Field names probed for the request correlator, in order.
const REQUEST_ID_FIELDS: &[&str] = &["request_id", "requestId", "reference_id", "correlation_id", "id"];

/// Field names probed for the content, in order.
const CONTENT_FIELDS: &[&str] = &["content", "text", "output", "result", "data"];

/// Normalize a provider-native webhook body.
pub fn normalize(provider: &str, body: &Value) -> NormalizedResponse {
    match provider {
        "openai" => normalize_openai(body),
        "stability" => normalize_stability(body),
        "elevenlabs" => normalize_elevenlabs(body),
        "runway" => normalize_runway(body),
        _ => normalize_generic(body),
    }
}

fn probe<'a>(body: &'a Value, fields: &[&str]) -> Option<&'a Value> {
    fields.iter().find_map(|field| body.get(*field))
}

fn uuid_from(value: Option<&Value>) -> Option<Uuid> {
    value.and_then(Value::as_str).and_then(|raw| Uuid::parse_str(raw).ok())
}

fn error_from(body: &Value) -> Option<String> {
    body.get("error").map(|error| match error {
        Value::String(message) => message.clone(),
        other => other
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| other.to_string()),
    })
}

fn normalize_openai(body: &Value) -> NormalizedResponse {
    let request_id = uuid_from(body.get("metadata").and_then(|m| m.get("request_id")))
        .or_else(|| uuid_from(body.get("request_id")));
    let content = body
        .pointer("/choices/0/message/content")
        .cloned()
        .unwrap_or(Value::Null);
    let error = error_from(body);
    NormalizedResponse {
        request_id,
        success: error.is_none() && !content.is_null(),
        content_kind: ContentKind::Text,
        content,
        error,
    }
}

fn normalize_stability(body: &Value) -> NormalizedResponse {
    let request_id = uuid_from(body.get("request_id"));
    let content = body.pointer("/artifacts/0/url").cloned().unwrap_or(Value::Null);
    let error = error_from(body);
    NormalizedResponse {
        request_id,
        success: error.is_none() && !content.is_null(),
        content_kind: ContentKind::ImageUrl,
        content,
        error,
    }
}

fn normalize_elevenlabs(body: &Value) -> NormalizedResponse {
    let request_id = uuid_from(body.get("request_id"));
    let content = body.get("audio_url").cloned().unwrap_or(Value::Null);
    let error = error_from(body);
    NormalizedResponse {
        request_id,
        success: error.is_none() && !content.is_null(),
        content_kind: ContentKind::AudioUrl,
        content,
        error,
    }
}

fn normalize_runway(body: &Value) -> NormalizedResponse {
    let request_id = uuid_from(body.get("request_id"));
    let content = body
        .pointer("/output/video_url")
        .or_else(|| body.get("video_url"))
        .cloned()
        .unwrap_or(Value::Null);
    let error = error_from(body);
    NormalizedResponse {
        request_id,
        success: error.is_none() && !content.is_null(),
        content_kind: ContentKind::VideoUrl,
        content,
        error,
    }
}

fn normalize_generic(body: &Value) -> NormalizedResponse {
    let request_id = uuid_from(probe(body, REQUEST_ID_FIELDS));
    let content = probe(body, CONTENT_FIELDS).cloned().unwrap_or(Value::Null);
    let error = error_from(body);
    let content_kind = match &content {
        Value::Object(_) | Value::Array(_) => ContentKind::Structured,
        _ => ContentKind::Text,
    };
    NormalizedResponse {
        request_id,
        success: error.is_none() && !content.is_null(),
        content_kind,
        content,
        error,
    }
}
