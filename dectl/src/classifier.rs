//! Task classification: a pure, deterministic mapping from (query, hints)
//! to (task type, provider, model, confidence).
//!
//! Rule order:
//! 1. An explicit task type always wins (confidence 1.0).
//! 2. A repository URL (explicit or recognized in the query) or code-intent
//!    vocabulary classifies as `code`.
//! 3. Otherwise each candidate type is scored against its pattern set; the
//!    highest non-zero score wins, ties broken in declaration order.
//! 4. All-zero scores default to `text` at confidence 0.5.
//! 5. The routing table maps (task type, subtask) to (provider, model), with
//!    the subtask override winning when one exists.

use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;

use crate::types::TaskType;

/// Classification inputs beyond the query itself.
#[derive(Debug, Clone, Default)]
pub struct ClassifyHints {
    /// Client-pinned task type; always honored.
    pub task_type: Option<TaskType>,
    /// Preferred executor/provider; overrides the routing table's provider.
    pub executor: Option<String>,
    /// Preferred model; overrides the routing table's model.
    pub model: Option<String>,
    /// Repository the work applies to; forces `code`.
    pub repo_url: Option<String>,
}

/// Classification output.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub task_type: TaskType,
    pub subtask: Option<&'static str>,
    pub provider: String,
    pub model: String,
    pub confidence: f64,
}

// Pattern sets, scored by substring match count. Declaration order is the
// tie-break order: text, image, audio, video, context.
const TEXT_PATTERNS: &[&str] = &[
    "write", "summarize", "summary", "essay", "story", "haiku", "poem", "article", "blog",
    "translate", "rewrite", "draft", "explain", "headline",
];

const IMAGE_PATTERNS: &[&str] = &[
    "image", "picture", "photo", "draw", "illustration", "logo", "render", "sketch", "painting",
    "wallpaper", "icon",
];

const AUDIO_PATTERNS: &[&str] = &[
    "audio", "speech", "voice", "narrate", "voiceover", "podcast", "song", "music", "jingle",
    "sound effect",
];

const VIDEO_PATTERNS: &[&str] = &[
    "video", "animate", "animation", "clip", "film", "trailer", "footage", "b-roll",
];

const CONTEXT_PATTERNS: &[&str] = &[
    "context", "remember", "recall", "knowledge base", "ingest", "index", "memorize",
];

/// Code-intent vocabulary (rule 2).
const CODE_KEYWORDS: &[&str] = &[
    "code", "function", "script", "debug", "refactor", "compile", "unit test", "stack trace",
    "pull request", "repository", "endpoint", "regex",
];

/// Subtask vocabularies per type; first match wins within a type.
const TEXT_SUBTASKS: &[(&str, &str)] = &[("summar", "summary"), ("translat", "translation")];
const IMAGE_SUBTASKS: &[(&str, &str)] = &[("logo", "logo"), ("icon", "icon")];
const AUDIO_SUBTASKS: &[(&str, &str)] = &[("music", "music"), ("song", "music"), ("jingle", "music")];

fn repo_host_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"https?://(www\.)?github\.com/[\w.-]+/[\w.-]+",
            r"https?://(www\.)?gitlab\.com/[\w.-]+/[\w.-]+",
            r"https?://(www\.)?bitbucket\.org/[\w.-]+/[\w.-]+",
        ]
        .iter()
        .map(|pattern| Regex::new(pattern).expect("repo host pattern must compile"))
        .collect()
    })
}

fn score(query: &str, patterns: &[&str]) -> usize {
    patterns.iter().filter(|pattern| query.contains(*pattern)).count()
}

fn subtask_for(task_type: TaskType, query: &str) -> Option<&'static str> {
    let table = match task_type {
        TaskType::Text => TEXT_SUBTASKS,
        TaskType::Image => IMAGE_SUBTASKS,
        TaskType::Audio => AUDIO_SUBTASKS,
        _ => return None,
    };
    table
        .iter()
        .find(|(needle, _)| query.contains(needle))
        .map(|(_, subtask)| *subtask)
}

/// The fixed routing table. The subtask override wins when it exists.
fn route(task_type: TaskType, subtask: Option<&str>) -> (&'static str, &'static str) {
    match (task_type, subtask) {
        (TaskType::Text, Some("translation")) => ("openai", "gpt-4o-mini"),
        (TaskType::Text, _) => ("openai", "gpt-4o"),
        (TaskType::Image, Some("logo" | "icon")) => ("stability", "sdxl-turbo"),
        (TaskType::Image, _) => ("stability", "sd3-large"),
        (TaskType::Audio, Some("music")) => ("suno", "chirp-v3"),
        (TaskType::Audio, _) => ("elevenlabs", "eleven-multilingual-v2"),
        (TaskType::Video, _) => ("runway", "gen-3"),
        (TaskType::Context, _) => ("anthropic", "claude-3-5-sonnet"),
        (TaskType::Code, _) => ("code-runner", "sandbox"),
        (TaskType::Unknown, _) => ("openai", "gpt-4o"),
    }
}

/// Classify a query. Pure: the same inputs always produce the same output.
pub fn classify(query: &str, hints: &ClassifyHints) -> Classification {
    let lowered = query.to_lowercase();

    let (task_type, subtask, confidence) = if let Some(explicit) = hints.task_type {
        // Rule 1: an explicit type wins, even over a repo URL in the query.
        (explicit, subtask_for(explicit, &lowered), 1.0)
    } else if hints.repo_url.is_some()
        || repo_host_patterns().iter().any(|pattern| pattern.is_match(query))
        || score(&lowered, CODE_KEYWORDS) > 0
    {
        (TaskType::Code, None, 0.9)
    } else {
        let scored = [
            (TaskType::Text, score(&lowered, TEXT_PATTERNS)),
            (TaskType::Image, score(&lowered, IMAGE_PATTERNS)),
            (TaskType::Audio, score(&lowered, AUDIO_PATTERNS)),
            (TaskType::Video, score(&lowered, VIDEO_PATTERNS)),
            (TaskType::Context, score(&lowered, CONTEXT_PATTERNS)),
        ];
        // Strictly-greater comparison keeps declaration order on ties.
        let (best_type, best_score) = scored
            .iter()
            .fold((TaskType::Text, 0usize), |(best_type, best_score), (candidate, candidate_score)| {
                if *candidate_score > best_score {
                    (*candidate, *candidate_score)
                } else {
                    (best_type, best_score)
                }
            });

        if best_score == 0 {
            (TaskType::Text, None, 0.5)
        } else {
            let confidence = (0.5 + 0.1 * best_score as f64).min(0.9);
            (best_type, subtask_for(best_type, &lowered), confidence)
        }
    };

    let (provider, model) = route(task_type, subtask);
    Classification {
        task_type,
        subtask,
        provider: hints.executor.clone().unwrap_or_else(|| provider.to_string()),
        model: hints.model.clone().unwrap_or_else(|| model.to_string()),
        confidence,
    }
}

/// Parse a client-supplied task type string, surfacing unknown values.
pub fn parse_task_type(value: &str) -> Result<TaskType, String> {
    TaskType::from_str(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify_plain(query: &str) -> Classification {
        classify(query, &ClassifyHints::default())
    }

    #[test]
    fn explicit_task_type_wins_over_repo_url() {
        let hints = ClassifyHints {
            task_type: Some(TaskType::Text),
            ..Default::default()
        };
        let result = classify("summarize https://github.com/acme/widget for me", &hints);
        assert_eq!(result.task_type, TaskType::Text);
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn repo_url_in_query_classifies_as_code() {
        let result = classify_plain("look at https://github.com/acme/widget please");
        assert_eq!(result.task_type, TaskType::Code);
        assert_eq!(result.provider, "code-runner");
    }

    #[test]
    fn repo_url_hint_classifies_as_code() {
        let hints = ClassifyHints {
            repo_url: Some("https://gitlab.com/acme/widget".to_string()),
            ..Default::default()
        };
        let result = classify("make it faster", &hints);
        assert_eq!(result.task_type, TaskType::Code);
    }

    #[test]
    fn code_keywords_classify_as_code() {
        let result = classify_plain("please refactor this function and add a unit test");
        assert_eq!(result.task_type, TaskType::Code);
    }

    #[test]
    fn scored_types_pick_the_best_match() {
        assert_eq!(classify_plain("draw me a picture of a fox").task_type, TaskType::Image);
        assert_eq!(classify_plain("narrate this in a deep voice").task_type, TaskType::Audio);
        assert_eq!(classify_plain("a short video clip of rain").task_type, TaskType::Video);
    }

    #[test]
    fn ties_break_in_declaration_order() {
        // "render" is an image pattern, "clip" a video pattern: one match each
        let result = classify_plain("render a clip");
        assert_eq!(result.task_type, TaskType::Image);
    }

    #[test]
    fn zero_scores_default_to_text() {
        let result = classify_plain("qwertyuiop");
        assert_eq!(result.task_type, TaskType::Text);
        assert_eq!(result.confidence, 0.5);
        assert_eq!(result.provider, "openai");
    }

    #[test]
    fn subtask_override_wins_in_routing() {
        let result = classify_plain("design a logo image for my shop");
        assert_eq!(result.task_type, TaskType::Image);
        assert_eq!(result.subtask, Some("logo"));
        assert_eq!(result.model, "sdxl-turbo");

        let result = classify_plain("compose a song with upbeat music");
        assert_eq!(result.task_type, TaskType::Audio);
        assert_eq!(result.provider, "suno");
    }

    #[test]
    fn executor_and_model_hints_override_routing() {
        let hints = ClassifyHints {
            executor: Some("azure-openai".to_string()),
            model: Some("gpt-4o-eu".to_string()),
            ..Default::default()
        };
        let result = classify("write a story", &hints);
        assert_eq!(result.provider, "azure-openai");
        assert_eq!(result.model, "gpt-4o-eu");
    }

    #[test]
    fn classification_is_deterministic() {
        let hints = ClassifyHints::default();
        let first = classify("write a haiku about rust", &hints);
        for _ in 0..10 {
            assert_eq!(classify("write a haiku about rust", &hints), first);
        }
    }
}
