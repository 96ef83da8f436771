//! Quality assessment of backend responses.
//!
//! `assess` is a pure function over (content kind, content); the gate in the
//! delivery service applies the configured thresholds to its score. Scores
//! land in [0, 1].

use std::collections::HashMap;

use serde_json::Value;
use url::Url;

use crate::types::ContentKind;

/// Result of scoring one piece of content.
#[derive(Debug, Clone, PartialEq)]
pub struct QualityAssessment {
    pub score: f64,
    /// Informational pass mark at 0.5; approval decisions use configuration.
    pub passed: bool,
    pub issues: Vec<String>,
    /// Numeric sub-scores by dimension.
    pub metadata: HashMap<String, f64>,
}

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "gif", "svg"];
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "ogg", "flac", "m4a"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "webm", "mov", "mkv"];

/// Score a backend response.
pub fn assess(kind: ContentKind, content: &Value) -> QualityAssessment {
    match kind {
        ContentKind::Text => assess_text(content),
        ContentKind::ImageUrl => assess_url(content, IMAGE_EXTENSIONS),
        ContentKind::AudioUrl => assess_url(content, AUDIO_EXTENSIONS),
        ContentKind::VideoUrl => assess_url(content, VIDEO_EXTENSIONS),
        ContentKind::Structured => assess_structured(content),
    }
}

fn assess_text(content: &Value) -> QualityAssessment {
    let mut issues = Vec::new();
    let mut metadata = HashMap::new();

    let text = content.as_str().unwrap_or_default().trim();
    if text.is_empty() {
        issues.push("empty content".to_string());
        return QualityAssessment {
            score: 0.0,
            passed: false,
            issues,
            metadata,
        };
    }

    let mut score: f64 = 0.55;

    let length_score = if text.len() >= 20 {
        score += 0.15;
        1.0
    } else {
        issues.push("content too short".to_string());
        text.len() as f64 / 20.0
    };
    metadata.insert("length".to_string(), length_score);

    let line_count = text.lines().filter(|line| !line.trim().is_empty()).count();
    if line_count > 1 {
        score += 0.1;
    }
    metadata.insert("structure".to_string(), (line_count.min(5)) as f64 / 5.0);

    if text.ends_with(['.', '!', '?', '"', '\'']) || line_count > 1 {
        score += 0.1;
    } else {
        issues.push("possible truncation".to_string());
    }

    let score = score.min(0.95);
    QualityAssessment {
        score,
        passed: score >= 0.5,
        issues,
        metadata,
    }
}

fn assess_url(content: &Value, extensions: &[&str]) -> QualityAssessment {
    let mut issues = Vec::new();
    let mut metadata = HashMap::new();

    let raw = content.as_str().unwrap_or_default();
    let parsed = match Url::parse(raw) {
        Ok(parsed) if parsed.scheme() == "https" || parsed.scheme() == "http" => parsed,
        _ => {
            issues.push("invalid url".to_string());
            return QualityAssessment {
                score: 0.1,
                passed: false,
                issues,
                metadata,
            };
        }
    };

    let mut score: f64 = if parsed.scheme() == "https" {
        0.9
    } else {
        issues.push("insecure url".to_string());
        0.6
    };
    metadata.insert("transport".to_string(), if parsed.scheme() == "https" { 1.0 } else { 0.5 });

    let extension_known = parsed
        .path()
        .rsplit('.')
        .next()
        .map(|ext| extensions.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false);
    if !extension_known {
        issues.push("unrecognized extension".to_string());
        score -= 0.2;
    }
    metadata.insert("extension".to_string(), if extension_known { 1.0 } else { 0.0 });

    QualityAssessment {
        score,
        passed: score >= 0.5,
        issues,
        metadata,
    }
}

fn assess_structured(content: &Value) -> QualityAssessment {
    let mut metadata = HashMap::new();
    let structured = matches!(content, Value::Object(_) | Value::Array(_));
    metadata.insert("structure".to_string(), if structured { 1.0 } else { 0.0 });

    if structured {
        QualityAssessment {
            score: 0.9,
            passed: true,
            issues: vec![],
            metadata,
        }
    } else {
        QualityAssessment {
            score: 0.3,
            passed: false,
            issues: vec!["not structured".to_string()],
            metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn multi_line_text_scores_above_half() {
        let haiku = json!("An old silent pond\nA frog jumps into the pond\nSplash! Silence again.");
        let result = assess(ContentKind::Text, &haiku);
        assert!(result.score > 0.5);
        assert!(result.issues.is_empty());
        assert!(result.passed);
    }

    #[test]
    fn empty_text_scores_zero() {
        let result = assess(ContentKind::Text, &json!("   "));
        assert_eq!(result.score, 0.0);
        assert_eq!(result.issues, vec!["empty content".to_string()]);
    }

    #[test]
    fn short_text_flags_an_issue() {
        let result = assess(ContentKind::Text, &json!("ok."));
        assert!(result.issues.contains(&"content too short".to_string()));
        assert!(result.score < 0.75);
    }

    #[test]
    fn https_image_url_with_extension_passes() {
        let result = assess(ContentKind::ImageUrl, &json!("https://cdn.example.com/out/fox.png"));
        assert_eq!(result.score, 0.9);
        assert!(result.issues.is_empty());
    }

    #[test]
    fn http_url_is_penalized() {
        let result = assess(ContentKind::AudioUrl, &json!("http://cdn.example.com/voice.mp3"));
        assert!(result.issues.contains(&"insecure url".to_string()));
        assert!(result.score < 0.9);
    }

    #[test]
    fn garbage_url_fails() {
        let result = assess(ContentKind::VideoUrl, &json!("not a url"));
        assert_eq!(result.score, 0.1);
        assert!(!result.passed);
    }

    #[test]
    fn structured_objects_pass_strings_fail() {
        assert!(assess(ContentKind::Structured, &json!({"rows": []})).passed);
        assert!(!assess(ContentKind::Structured, &json!("plain")).passed);
    }

    #[test]
    fn assessment_is_deterministic() {
        let content = json!("Write once, assess twice.");
        assert_eq!(assess(ContentKind::Text, &content), assess(ContentKind::Text, &content));
    }
}
