//! User account models

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Input for creating a user (admin only)
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateUserInput {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1, max = 120))]
    pub name: String,
    #[validate(length(min = 8, max = 128))]
    pub password: String,
    #[validate(length(max = 32))]
    pub phone: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default = "default_true")]
    pub email_notifications: bool,
    #[serde(default)]
    pub group_ids: Vec<Uuid>,
}

/// Input for updating a user; absent fields are left unchanged
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct UpdateUserInput {
    #[validate(email)]
    pub email: Option<String>,
    #[validate(length(min = 1, max = 120))]
    pub name: Option<String>,
    #[validate(length(max = 32))]
    pub phone: Option<String>,
    pub is_admin: Option<bool>,
    pub is_active: Option<bool>,
    pub email_notifications: Option<bool>,
    #[validate(length(min = 8, max = 128))]
    pub password: Option<String>,
}

/// Self-registration input
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RegisterInput {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1, max = 120))]
    pub name: String,
    #[validate(length(min = 8, max = 128))]
    pub password: String,
    #[validate(length(max = 32))]
    pub phone: Option<String>,
}

/// One entry when replacing a user's group memberships
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupMembershipInput {
    pub group_id: Uuid,
    #[serde(default)]
    pub is_group_admin: bool,
}

fn default_true() -> bool {
    true
}
