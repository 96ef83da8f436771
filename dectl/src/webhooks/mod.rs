//! Webhook subscriptions: matching and payload shapes.
//!
//! Two outbound payload shapes exist. Generic subscribers get the event
//! envelope `{event_id, action, eventable_type, eventable_id, particulars,
//! timestamp}`, optionally signed. Notification-service subscribers
//! (recognized by URL host) get a templated `{topic, title, message,
//! priority, tags, actions}` push message, unsigned.

use serde_json::json;
use url::Url;

use crate::events::templates;
use crate::store::{Event, Subscription};
use crate::types::deep_link;

pub mod fanout;
pub mod signing;

/// Whether a subscription wants this event.
pub fn matches(subscription: &Subscription, event: &Event) -> bool {
    if !subscription.active || subscription.tenant != event.tenant {
        return false;
    }
    let action_match = subscription
        .actions
        .iter()
        .any(|action| action == "*" || action == &event.action);
    if !action_match {
        return false;
    }
    if let Some(user) = &subscription.user_filter {
        if event.user_id.as_deref() != Some(user.as_str()) {
            return false;
        }
    }
    if let Some(kind) = subscription.eventable_kind_filter {
        if event.eventable.kind != kind {
            return false;
        }
    }
    if let Some(id) = &subscription.eventable_id_filter {
        if &event.eventable.id != id {
            return false;
        }
    }
    true
}

/// Whether a target URL belongs to a notification service.
pub fn is_notification_service(url: &str, notification_hosts: &[String]) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    let Some(host) = parsed.host_str() else {
        return false;
    };
    notification_hosts
        .iter()
        .any(|candidate| host == candidate || host.ends_with(&format!(".{}", candidate)))
}

/// The generic subscriber payload.
pub fn generic_payload(event: &Event) -> serde_json::Value {
    json!({
        "event_id": event.id,
        "action": event.action,
        "eventable_type": event.eventable.kind.as_str(),
        "eventable_id": event.eventable.id,
        "particulars": event.particulars,
        "timestamp": event.created_at,
    })
}

/// The notification-service payload: topic from the URL's last path segment,
/// title and message from the action's feed template when one exists.
pub fn notification_payload(event: &Event, url: &str) -> serde_json::Value {
    let topic = Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed
                .path_segments()
                .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
                .map(str::to_string)
        })
        .unwrap_or_else(|| "events".to_string());

    let (title, message) = match templates::template_for(&event.action) {
        Some(template) => (
            templates::interpolate(template.title, &event.particulars),
            templates::interpolate(template.description, &event.particulars),
        ),
        None => (event.action.clone(), format!("{} {}", event.eventable.kind, event.eventable.id)),
    };

    json!({
        "topic": topic,
        "title": title,
        "message": message,
        "priority": 3,
        "tags": [event.eventable.kind.as_str()],
        "actions": [{
            "action": "view",
            "label": "Open",
            "url": deep_link(event.eventable.kind, &event.eventable.id),
        }],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventPointer, EventableKind};
    use chrono::Utc;
    use uuid::Uuid;

    fn subscription() -> Subscription {
        Subscription {
            id: Uuid::new_v4(),
            tenant: "acme".to_string(),
            url: "https://example.test/hook".to_string(),
            secret: None,
            actions: vec!["request.completed".to_string()],
            user_filter: None,
            eventable_kind_filter: None,
            eventable_id_filter: None,
            active: true,
            failure_count: 0,
            last_failure: None,
            created_at: Utc::now(),
        }
    }

    fn event(action: &str) -> Event {
        Event {
            id: Uuid::new_v4(),
            tenant: "acme".to_string(),
            user_id: None,
            action: action.to_string(),
            eventable: EventPointer::new(EventableKind::Request, "r1"),
            particulars: serde_json::Map::new(),
            client_ip: None,
            user_agent: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn action_matching_explicit_and_wildcard() {
        let sub = subscription();
        assert!(matches(&sub, &event("request.completed")));
        assert!(!matches(&sub, &event("request.failed")));

        let mut wildcard = subscription();
        wildcard.actions = vec!["*".to_string()];
        assert!(matches(&wildcard, &event("anything.at.all")));
    }

    #[test]
    fn inactive_or_cross_tenant_never_matches() {
        let mut sub = subscription();
        sub.active = false;
        assert!(!matches(&sub, &event("request.completed")));

        let mut other_tenant = event("request.completed");
        other_tenant.tenant = "globex".to_string();
        assert!(!matches(&subscription(), &other_tenant));
    }

    #[test]
    fn filters_narrow_the_match() {
        let mut sub = subscription();
        sub.user_filter = Some("user-1".to_string());
        assert!(!matches(&sub, &event("request.completed")));

        let mut user_event = event("request.completed");
        user_event.user_id = Some("user-1".to_string());
        assert!(matches(&sub, &user_event));

        let mut sub = subscription();
        sub.eventable_kind_filter = Some(EventableKind::Deliverable);
        assert!(!matches(&sub, &event("request.completed")));

        let mut sub = subscription();
        sub.eventable_id_filter = Some("r2".to_string());
        assert!(!matches(&sub, &event("request.completed")));
        sub.eventable_id_filter = Some("r1".to_string());
        assert!(matches(&sub, &event("request.completed")));
    }

    #[test]
    fn notification_hosts_recognized_by_suffix() {
        let hosts = vec!["ntfy.sh".to_string()];
        assert!(is_notification_service("https://ntfy.sh/builds", &hosts));
        assert!(is_notification_service("https://push.ntfy.sh/builds", &hosts));
        assert!(!is_notification_service("https://example.test/hook", &hosts));
        assert!(!is_notification_service("not a url", &hosts));
    }

    #[test]
    fn generic_payload_carries_the_envelope() {
        let event = event("request.completed");
        let payload = generic_payload(&event);
        assert_eq!(payload["action"], "request.completed");
        assert_eq!(payload["eventable_type"], "request");
        assert_eq!(payload["eventable_id"], "r1");
        assert!(payload["event_id"].is_string());
        assert!(payload["timestamp"].is_string());
    }

    #[test]
    fn notification_payload_uses_topic_and_template() {
        let mut event = event("request.completed");
        event
            .particulars
            .insert("provider".to_string(), serde_json::json!("openai"));
        event
            .particulars
            .insert("task_type".to_string(), serde_json::json!("text"));

        let payload = notification_payload(&event, "https://ntfy.sh/my-builds");
        assert_eq!(payload["topic"], "my-builds");
        assert_eq!(payload["title"], "Request completed");
        assert_eq!(payload["message"], "openai finished the text request");
        assert_eq!(payload["priority"], 3);
    }
}
