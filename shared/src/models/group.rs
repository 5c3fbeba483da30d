//! Volunteer group models

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Input for creating a group
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateGroupInput {
    #[validate(length(min = 2, max = 80))]
    pub name: String,
    #[validate(length(max = 2000))]
    pub description: Option<String>,
    #[validate(length(max = 64))]
    pub groupme_bot_id: Option<String>,
    #[validate(url)]
    pub image_url: Option<String>,
}

/// Input for updating a group
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct UpdateGroupInput {
    #[validate(length(min = 2, max = 80))]
    pub name: Option<String>,
    #[validate(length(max = 2000))]
    pub description: Option<String>,
    #[validate(length(max = 64))]
    pub groupme_bot_id: Option<String>,
    #[validate(url)]
    pub image_url: Option<String>,
}

/// Tag definition input, shared by animal tags and comment tags
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TagInput {
    #[validate(length(min = 1, max = 40))]
    pub name: String,
    pub color: Option<String>,
}

/// Default color for tags created without one
pub const DEFAULT_TAG_COLOR: &str = "#6B7280";
