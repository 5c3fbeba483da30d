//! Comment and session-note models

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;

/// Lowest and highest session rating
pub const MIN_SESSION_RATING: i32 = 1;
pub const MAX_SESSION_RATING: i32 = 5;

/// Kind of comment logged against an animal
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CommentKind {
    /// Free-form note
    #[default]
    Note,
    /// Structured session note with goal, outcome and rating
    Session,
}

impl CommentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommentKind::Note => "note",
            CommentKind::Session => "session",
        }
    }
}

impl FromStr for CommentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "note" => Ok(CommentKind::Note),
            "session" => Ok(CommentKind::Session),
            other => Err(format!("unknown comment kind '{}'", other)),
        }
    }
}

/// Structured session metadata attached to a session comment
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionNote {
    pub goal: Option<String>,
    pub outcome: Option<String>,
    pub rating: Option<i32>,
    pub behavior_notes: Option<String>,
}

impl SessionNote {
    pub fn is_empty(&self) -> bool {
        self.goal.is_none()
            && self.outcome.is_none()
            && self.rating.is_none()
            && self.behavior_notes.is_none()
    }
}

/// Input for logging a comment
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateCommentInput {
    #[validate(length(min = 1, max = 10000))]
    pub content: String,
    #[serde(default)]
    pub kind: CommentKind,
    #[serde(default)]
    pub session: Option<SessionNote>,
    #[serde(default)]
    pub tag_ids: Vec<Uuid>,
    pub image_id: Option<Uuid>,
}

/// Input for editing a comment
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct UpdateCommentInput {
    #[validate(length(min = 1, max = 10000))]
    pub content: Option<String>,
    pub session: Option<SessionNote>,
    pub tag_ids: Option<Vec<Uuid>>,
}
