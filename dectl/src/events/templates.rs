//! Feed templates: the closed map from action to feed-item rendering.
//!
//! An event produces a feed item iff its action appears here; call sites
//! must not rely on side effects for actions outside the map.

use serde_json::Map;

/// Rendering recipe for one action.
#[derive(Debug, Clone, Copy)]
pub struct FeedTemplate {
    pub title: &'static str,
    pub description: &'static str,
    pub icon: &'static str,
}

const TEMPLATES: &[(&str, FeedTemplate)] = &[
    (
        "request.created",
        FeedTemplate {
            title: "Request received",
            description: "New {task_type} request for {provider}",
            icon: "inbox",
        },
    ),
    (
        "request.queued",
        FeedTemplate {
            title: "Request queued",
            description: "Waiting for {provider}",
            icon: "clock",
        },
    ),
    (
        "request.processing",
        FeedTemplate {
            title: "Request started",
            description: "{provider} is generating",
            icon: "play",
        },
    ),
    (
        "request.completed",
        FeedTemplate {
            title: "Request completed",
            description: "{provider} finished the {task_type} request",
            icon: "check",
        },
    ),
    (
        "request.failed",
        FeedTemplate {
            title: "Request failed",
            description: "{error}",
            icon: "alert",
        },
    ),
    (
        "request.cancelled",
        FeedTemplate {
            title: "Request cancelled",
            description: "Cancelled before dispatch",
            icon: "x",
        },
    ),
    (
        "deliverable.created",
        FeedTemplate {
            title: "Result received",
            description: "Quality score {quality_score}",
            icon: "package",
        },
    ),
    (
        "deliverable.delivered",
        FeedTemplate {
            title: "Result delivered",
            description: "Approved with score {quality_score}",
            icon: "check",
        },
    ),
    (
        "deliverable.rejected",
        FeedTemplate {
            title: "Result rejected",
            description: "{reason}",
            icon: "thumbs-down",
        },
    ),
    (
        "deliverable.pending_review",
        FeedTemplate {
            title: "Result needs review",
            description: "Score {quality_score} requires manual review",
            icon: "eye",
        },
    ),
];

/// Look up the template for an action.
pub fn template_for(action: &str) -> Option<&'static FeedTemplate> {
    TEMPLATES
        .iter()
        .find(|(name, _)| *name == action)
        .map(|(_, template)| template)
}

/// Interpolate `{key}` placeholders from the particulars. Values render
/// without JSON quoting; keys missing from the particulars are left as-is.
pub fn interpolate(template: &str, particulars: &Map<String, serde_json::Value>) -> String {
    let mut rendered = template.to_string();
    for (key, value) in particulars {
        let placeholder = format!("{{{}}}", key);
        if rendered.contains(&placeholder) {
            let text = match value {
                serde_json::Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            rendered = rendered.replace(&placeholder, &text);
        }
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn known_actions_have_templates_unknown_do_not() {
        assert!(template_for("request.completed").is_some());
        assert!(template_for("subscription.created").is_none());
        assert!(template_for("oauth.expired").is_none());
    }

    #[test]
    fn interpolation_substitutes_particulars() {
        let mut particulars = Map::new();
        particulars.insert("provider".to_string(), json!("openai"));
        particulars.insert("task_type".to_string(), json!("text"));

        let template = template_for("request.created").unwrap();
        let rendered = interpolate(template.description, &particulars);
        assert_eq!(rendered, "New text request for openai");
    }

    #[test]
    fn numbers_render_without_quotes() {
        let mut particulars = Map::new();
        particulars.insert("quality_score".to_string(), json!(0.82));
        let rendered = interpolate("Quality score {quality_score}", &particulars);
        assert_eq!(rendered, "Quality score 0.82");
    }

    #[test]
    fn missing_keys_are_left_in_place() {
        let rendered = interpolate("{provider} is generating", &Map::new());
        assert_eq!(rendered, "{provider} is generating");
    }
}
