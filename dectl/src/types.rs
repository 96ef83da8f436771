//! Shared domain types: task kinds, content kinds, and eventable pointers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

/// The kind of work a request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Text,
    Image,
    Audio,
    Video,
    Context,
    Code,
    Unknown,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Context => "context",
            Self::Code => "code",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "image" => Ok(Self::Image),
            "audio" => Ok(Self::Audio),
            "video" => Ok(Self::Video),
            "context" => Ok(Self::Context),
            "code" => Ok(Self::Code),
            "unknown" => Ok(Self::Unknown),
            other => Err(format!("unknown task type: {}", other)),
        }
    }
}

/// The shape of a deliverable's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Text,
    ImageUrl,
    AudioUrl,
    VideoUrl,
    Structured,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::ImageUrl => "image_url",
            Self::AudioUrl => "audio_url",
            Self::VideoUrl => "video_url",
            Self::Structured => "structured",
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ContentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "image_url" => Ok(Self::ImageUrl),
            "audio_url" => Ok(Self::AudioUrl),
            "video_url" => Ok(Self::VideoUrl),
            "structured" => Ok(Self::Structured),
            other => Err(format!("unknown content kind: {}", other)),
        }
    }
}

/// The kinds of domain entities an event can point at.
///
/// The set is closed: unknown strings deserialize to an error rather than a
/// catch-all, and `deep_link` is total over the enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum EventableKind {
    Request,
    Deliverable,
    Subscription,
    Instance,
    Project,
}

impl EventableKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Deliverable => "deliverable",
            Self::Subscription => "subscription",
            Self::Instance => "instance",
            Self::Project => "project",
        }
    }
}

impl fmt::Display for EventableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EventableKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "request" => Ok(Self::Request),
            "deliverable" => Ok(Self::Deliverable),
            "subscription" => Ok(Self::Subscription),
            "instance" => Ok(Self::Instance),
            "project" => Ok(Self::Project),
            other => Err(format!("unknown eventable kind: {}", other)),
        }
    }
}

/// Polymorphic pointer from an event into the domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct EventPointer {
    pub kind: EventableKind,
    pub id: String,
}

impl EventPointer {
    pub fn new(kind: EventableKind, id: impl Into<String>) -> Self {
        Self { kind, id: id.into() }
    }

    pub fn request(id: uuid::Uuid) -> Self {
        Self::new(EventableKind::Request, id.to_string())
    }

    pub fn deliverable(id: uuid::Uuid) -> Self {
        Self::new(EventableKind::Deliverable, id.to_string())
    }
}

/// UI deep link for an eventable. Total over the closed kind set.
pub fn deep_link(kind: EventableKind, id: &str) -> String {
    match kind {
        EventableKind::Request => format!("/requests/{}", id),
        EventableKind::Deliverable => format!("/deliverables/{}", id),
        EventableKind::Subscription => format!("/subscriptions/{}", id),
        EventableKind::Instance => format!("/instances/{}", id),
        EventableKind::Project => format!("/projects/{}", id),
    }
}
