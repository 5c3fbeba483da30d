//! Site-wide settings stored as key/value JSON

use serde_json::{json, Value};

pub const SETTING_SITE_NAME: &str = "site_name";
pub const SETTING_ANNOUNCEMENT: &str = "announcement";
pub const SETTING_DEFAULT_GROUP_ID: &str = "default_group_id";
pub const SETTING_ALLOW_SELF_REGISTRATION: &str = "allow_self_registration";
pub const SETTING_COMMENT_EDIT_WINDOW_MINUTES: &str = "comment_edit_window_minutes";

/// One year
pub const MAX_COMMENT_EDIT_WINDOW_MINUTES: i64 = 525_600;

/// A known setting and its default value
#[derive(Debug, Clone)]
pub struct SettingDefinition {
    pub key: &'static str,
    pub description: &'static str,
    /// Visible to unauthenticated clients
    pub public: bool,
    pub default: Value,
    /// Inclusive upper bound for numeric settings
    pub max: Option<i64>,
}

/// All settings the platform understands
pub fn setting_definitions() -> Vec<SettingDefinition> {
    vec![
        SettingDefinition {
            key: SETTING_SITE_NAME,
            description: "Name shown in the page header",
            public: true,
            default: json!("Shelter Volunteers"),
            max: None,
        },
        SettingDefinition {
            key: SETTING_ANNOUNCEMENT,
            description: "Banner shown on the dashboard; empty hides it",
            public: true,
            default: json!(""),
            max: None,
        },
        SettingDefinition {
            key: SETTING_DEFAULT_GROUP_ID,
            description: "Group new self-registered volunteers join",
            public: false,
            default: Value::Null,
            max: None,
        },
        SettingDefinition {
            key: SETTING_ALLOW_SELF_REGISTRATION,
            description: "Whether the sign-up form is enabled",
            public: true,
            default: json!(false),
            max: None,
        },
        SettingDefinition {
            key: SETTING_COMMENT_EDIT_WINDOW_MINUTES,
            description: "Minutes an author may edit their comment; 0 disables edits",
            public: false,
            default: json!(60),
            max: Some(MAX_COMMENT_EDIT_WINDOW_MINUTES),
        },
    ]
}

pub fn find_setting(key: &str) -> Option<SettingDefinition> {
    setting_definitions().into_iter().find(|d| d.key == key)
}

/// Check that `value` has the same JSON shape as the setting's default.
/// Settings defaulting to null accept a string or null; numbers must be
/// non-negative integers within `max`.
pub fn setting_value_matches(definition: &SettingDefinition, value: &Value) -> bool {
    match (&definition.default, value) {
        (Value::Null, Value::Null | Value::String(_)) => true,
        (Value::String(_), Value::String(_)) => true,
        (Value::Bool(_), Value::Bool(_)) => true,
        (Value::Number(_), Value::Number(n)) => n
            .as_i64()
            .map(|v| v >= 0 && definition.max.map_or(true, |max| v <= max))
            .unwrap_or(false),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_unique() {
        let defs = setting_definitions();
        let mut keys: Vec<_> = defs.iter().map(|d| d.key).collect();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), defs.len());
    }

    #[test]
    fn test_value_shape_checks() {
        let flag = find_setting(SETTING_ALLOW_SELF_REGISTRATION).unwrap();
        assert!(setting_value_matches(&flag, &json!(true)));
        assert!(!setting_value_matches(&flag, &json!("yes")));

        let window = find_setting(SETTING_COMMENT_EDIT_WINDOW_MINUTES).unwrap();
        assert!(setting_value_matches(&window, &json!(15)));
        assert!(!setting_value_matches(&window, &json!(-1)));
        assert!(setting_value_matches(&window, &json!(MAX_COMMENT_EDIT_WINDOW_MINUTES)));
        assert!(!setting_value_matches(&window, &json!(MAX_COMMENT_EDIT_WINDOW_MINUTES + 1)));
        assert!(!setting_value_matches(&window, &json!(1_000_000_000_000_000i64)));
        assert!(!setting_value_matches(&window, &json!(2.5)));

        let group = find_setting(SETTING_DEFAULT_GROUP_ID).unwrap();
        assert!(setting_value_matches(&group, &Value::Null));
        assert!(setting_value_matches(&group, &json!("1b4e28ba-2fa1-11d2-883f-0016d3cca427")));
    }

    #[test]
    fn test_unknown_setting() {
        assert!(find_setting("theme").is_none());
    }
}
