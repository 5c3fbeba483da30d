//! Business logic services for the Shelter Volunteers platform

pub mod animal;
pub mod auth;
pub mod comment;
pub mod csv_io;
pub mod group;
pub mod image;
pub mod notification;
pub mod protocol;
pub mod schema;
pub mod settings;
pub mod tag;
pub mod user;

pub use animal::AnimalService;
pub use auth::AuthService;
pub use comment::CommentService;
pub use csv_io::CsvService;
pub use group::GroupService;
pub use image::ImageService;
pub use notification::NotificationService;
pub use protocol::ProtocolService;
pub use settings::SettingsService;
pub use user::UserService;

/// Turn a free-text search into an ILIKE pattern, escaping wildcards
pub(crate) fn search_pattern(search: Option<&str>) -> Option<String> {
    let search = search.map(str::trim).filter(|s| !s.is_empty())?;
    let mut escaped = String::with_capacity(search.len() + 2);
    escaped.push('%');
    for c in search.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    Some(escaped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_pattern() {
        assert_eq!(search_pattern(None), None);
        assert_eq!(search_pattern(Some("   ")), None);
        assert_eq!(search_pattern(Some(" rex ")).as_deref(), Some("%rex%"));
        assert_eq!(search_pattern(Some("50%_off")).as_deref(), Some("%50\\%\\_off%"));
    }
}
