//! Validation utilities for the Shelter Volunteers platform

use rust_decimal::{Decimal, RoundingStrategy};

use crate::models::{
    CommentKind, DocumentKind, ImageType, SessionNote, MAX_SESSION_RATING, MIN_SESSION_RATING,
};

// ============================================================================
// Account Validations
// ============================================================================

/// Validate email format (basic check)
pub fn validate_email(email: &str) -> Result<(), &'static str> {
    let email = email.trim();
    let Some((local, domain)) = email.split_once('@') else {
        return Err("Invalid email format");
    };
    if local.is_empty() || domain.len() < 3 || !domain.contains('.') || email.contains(' ') {
        return Err("Invalid email format");
    }
    if domain.starts_with('.') || domain.ends_with('.') {
        return Err("Invalid email format");
    }
    Ok(())
}

/// Normalize an email for storage and lookup
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Validate password strength: at least 8 characters with a letter and a digit
pub fn validate_password(password: &str) -> Result<(), &'static str> {
    if password.chars().count() < 8 {
        return Err("Password must be at least 8 characters");
    }
    if !password.chars().any(|c| c.is_alphabetic()) {
        return Err("Password must contain a letter");
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err("Password must contain a digit");
    }
    Ok(())
}

// ============================================================================
// Group and Tag Validations
// ============================================================================

/// Validate a group name
pub fn validate_group_name(name: &str) -> Result<(), &'static str> {
    let trimmed = name.trim();
    if trimmed.chars().count() < 2 {
        return Err("Group name must be at least 2 characters");
    }
    if trimmed.chars().count() > 80 {
        return Err("Group name must be at most 80 characters");
    }
    Ok(())
}

/// Validate a tag color in `#RRGGBB` form
pub fn validate_tag_color(color: &str) -> Result<(), &'static str> {
    let bytes = color.as_bytes();
    if bytes.len() != 7 || bytes[0] != b'#' {
        return Err("Color must be in #RRGGBB format");
    }
    if !bytes[1..].iter().all(|b| b.is_ascii_hexdigit()) {
        return Err("Color must be in #RRGGBB format");
    }
    Ok(())
}

// ============================================================================
// Animal Validations
// ============================================================================

/// Largest weight the roster stores (`NUMERIC(6, 2)`)
pub const MAX_WEIGHT_LBS: Decimal = Decimal::from_parts(999_999, 0, 0, false, 2);

/// Validate an animal weight in pounds
pub fn validate_weight(weight: Decimal) -> Result<(), &'static str> {
    if weight.is_sign_negative() && !weight.is_zero() {
        return Err("Weight cannot be negative");
    }
    if weight.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero) > MAX_WEIGHT_LBS {
        return Err("Weight must be below 10000 lbs");
    }
    Ok(())
}

// ============================================================================
// Session Note Validations
// ============================================================================

/// Validate a session rating
pub fn validate_session_rating(rating: i32) -> Result<(), &'static str> {
    if !(MIN_SESSION_RATING..=MAX_SESSION_RATING).contains(&rating) {
        return Err("Session rating must be between 1 and 5");
    }
    Ok(())
}

/// Error from session-note validation, naming the offending field
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct SessionNoteError {
    pub field: &'static str,
    pub message: &'static str,
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map(str::trim).map_or(true, str::is_empty)
}

/// Validate the session payload for a comment of the given kind.
///
/// Session comments require a goal, an outcome and a rating. Plain notes
/// must not carry session data.
pub fn validate_session_note(
    kind: CommentKind,
    session: Option<&SessionNote>,
) -> Result<(), SessionNoteError> {
    match kind {
        CommentKind::Note => match session {
            Some(s) if !s.is_empty() => Err(SessionNoteError {
                field: "session",
                message: "Only session comments may include session details",
            }),
            _ => Ok(()),
        },
        CommentKind::Session => {
            let session = session.ok_or(SessionNoteError {
                field: "session",
                message: "Session details are required",
            })?;
            if is_blank(&session.goal) {
                return Err(SessionNoteError {
                    field: "session.goal",
                    message: "Session goal is required",
                });
            }
            if is_blank(&session.outcome) {
                return Err(SessionNoteError {
                    field: "session.outcome",
                    message: "Session outcome is required",
                });
            }
            let rating = session.rating.ok_or(SessionNoteError {
                field: "session.rating",
                message: "Session rating is required",
            })?;
            validate_session_rating(rating).map_err(|message| SessionNoteError {
                field: "session.rating",
                message,
            })
        }
    }
}

// ============================================================================
// File Type Detection
// ============================================================================

const PDF_MAGIC: &[u8] = b"%PDF-";
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

fn contains_subslice(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// Detect whether an upload is a PDF or a DOCX document.
///
/// PDFs are recognised by their header. DOCX files are ZIP archives, so a
/// ZIP header is accepted when the file name ends in `.docx` or the archive
/// lists a `word/` entry.
pub fn detect_document_kind(file_name: &str, bytes: &[u8]) -> Option<DocumentKind> {
    if bytes.starts_with(PDF_MAGIC) {
        return Some(DocumentKind::Pdf);
    }
    if bytes.starts_with(ZIP_MAGIC) {
        let named_docx = file_name.to_ascii_lowercase().ends_with(".docx");
        if named_docx || contains_subslice(bytes, b"word/") {
            return Some(DocumentKind::Docx);
        }
    }
    None
}

/// Detect an image type from its leading bytes
pub fn detect_image_type(bytes: &[u8]) -> Option<ImageType> {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some(ImageType::Jpeg)
    } else if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        Some(ImageType::Png)
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some(ImageType::Webp)
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        Some(ImageType::Gif)
    } else {
        None
    }
}

/// Scale `(width, height)` down to fit within `max` on the longest side,
/// preserving aspect ratio. Dimensions already within bounds are unchanged.
pub fn fit_within(width: u32, height: u32, max: u32) -> (u32, u32) {
    if (width <= max && height <= max) || width == 0 || height == 0 {
        return (width, height);
    }
    if width >= height {
        let h = (u64::from(height) * u64::from(max) / u64::from(width)).max(1) as u32;
        (max, h)
    } else {
        let w = (u64::from(width) * u64::from(max) / u64::from(height)).max(1) as u32;
        (w, max)
    }
}

/// Strip path components and unsafe characters from an uploaded file name
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_' | ' ') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim().trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    // ========================================================================
    // Animal Validation Tests
    // ========================================================================

    #[test]
    fn test_weight_bounds() {
        let w = |s: &str| Decimal::from_str(s).unwrap();
        assert!(validate_weight(w("0")).is_ok());
        assert!(validate_weight(w("62.5")).is_ok());
        assert!(validate_weight(w("9999.99")).is_ok());
        assert!(validate_weight(w("9999.995")).is_err());
        assert!(validate_weight(w("100000")).is_err());
        assert!(validate_weight(w("-3")).is_err());
    }

    // ========================================================================
    // Account Validation Tests
    // ========================================================================

    #[test]
    fn test_validate_email() {
        assert!(validate_email("volunteer@shelter.org").is_ok());
        assert!(validate_email(" a@b.co ").is_ok());
        assert!(validate_email("no-at-sign.org").is_err());
        assert!(validate_email("@shelter.org").is_err());
        assert!(validate_email("a@.org").is_err());
        assert!(validate_email("a b@shelter.org").is_err());
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  Jo.Smith@Shelter.ORG "), "jo.smith@shelter.org");
    }

    #[test]
    fn test_validate_password() {
        assert!(validate_password("walkies42").is_ok());
        assert!(validate_password("short1").is_err());
        assert!(validate_password("allletters").is_err());
        assert!(validate_password("12345678").is_err());
    }

    // ========================================================================
    // Group and Tag Validation Tests
    // ========================================================================

    #[test]
    fn test_validate_group_name() {
        assert!(validate_group_name("ModSquad").is_ok());
        assert!(validate_group_name(" x ").is_err());
        assert!(validate_group_name(&"g".repeat(81)).is_err());
    }

    #[test]
    fn test_validate_tag_color() {
        assert!(validate_tag_color("#1a2B3c").is_ok());
        assert!(validate_tag_color("1a2B3c").is_err());
        assert!(validate_tag_color("#12345").is_err());
        assert!(validate_tag_color("#GGGGGG").is_err());
    }

    // ========================================================================
    // Session Note Tests
    // ========================================================================

    fn full_session() -> SessionNote {
        SessionNote {
            goal: Some("Loose leash walking".to_string()),
            outcome: Some("Pulled twice, recovered quickly".to_string()),
            rating: Some(4),
            behavior_notes: None,
        }
    }

    #[test]
    fn test_session_requires_fields() {
        assert!(validate_session_note(CommentKind::Session, Some(&full_session())).is_ok());

        let err = validate_session_note(CommentKind::Session, None).unwrap_err();
        assert_eq!(err.field, "session");

        let mut missing_goal = full_session();
        missing_goal.goal = Some("   ".to_string());
        let err = validate_session_note(CommentKind::Session, Some(&missing_goal)).unwrap_err();
        assert_eq!(err.field, "session.goal");

        let mut missing_outcome = full_session();
        missing_outcome.outcome = None;
        let err = validate_session_note(CommentKind::Session, Some(&missing_outcome)).unwrap_err();
        assert_eq!(err.field, "session.outcome");
    }

    #[test]
    fn test_session_rating_bounds() {
        for rating in [0, 6, -1] {
            let mut s = full_session();
            s.rating = Some(rating);
            let err = validate_session_note(CommentKind::Session, Some(&s)).unwrap_err();
            assert_eq!(err.field, "session.rating");
        }
        assert!(validate_session_rating(1).is_ok());
        assert!(validate_session_rating(5).is_ok());
    }

    #[test]
    fn test_note_rejects_session_payload() {
        assert!(validate_session_note(CommentKind::Note, None).is_ok());
        assert!(validate_session_note(CommentKind::Note, Some(&SessionNote::default())).is_ok());
        assert!(validate_session_note(CommentKind::Note, Some(&full_session())).is_err());
    }

    // ========================================================================
    // File Detection Tests
    // ========================================================================

    #[test]
    fn test_detect_pdf() {
        assert_eq!(
            detect_document_kind("sop.bin", b"%PDF-1.7\n..."),
            Some(DocumentKind::Pdf)
        );
    }

    #[test]
    fn test_detect_docx() {
        let zip = b"PK\x03\x04\x14\x00\x06\x00[Content_Types].xml";
        assert_eq!(detect_document_kind("Walk SOP.DOCX", zip), Some(DocumentKind::Docx));
        let with_entry = b"PK\x03\x04\x14\x00word/document.xml";
        assert_eq!(detect_document_kind("sop", with_entry), Some(DocumentKind::Docx));
        assert_eq!(detect_document_kind("archive.zip", zip), None);
        assert_eq!(detect_document_kind("notes.docx", b"plain text"), None);
    }

    #[test]
    fn test_detect_image_type() {
        assert_eq!(detect_image_type(&[0xFF, 0xD8, 0xFF, 0xE0]), Some(ImageType::Jpeg));
        assert_eq!(detect_image_type(b"\x89PNG\r\n\x1a\n...."), Some(ImageType::Png));
        assert_eq!(detect_image_type(b"RIFF\x00\x00\x00\x00WEBPVP8 "), Some(ImageType::Webp));
        assert_eq!(detect_image_type(b"GIF89a..."), Some(ImageType::Gif));
        assert_eq!(detect_image_type(b"%PDF-1.4"), None);
    }

    #[test]
    fn test_fit_within() {
        assert_eq!(fit_within(800, 600, 1600), (800, 600));
        assert_eq!(fit_within(4000, 3000, 1600), (1600, 1200));
        assert_eq!(fit_within(3000, 4000, 1600), (1200, 1600));
        assert_eq!(fit_within(10000, 1, 100), (100, 1));
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\docs\\Walk SOP.pdf"), "Walk SOP.pdf");
        assert_eq!(sanitize_file_name("a<b>.pdf"), "a_b_.pdf");
        assert_eq!(sanitize_file_name(".hidden"), "hidden");
        assert_eq!(sanitize_file_name(""), "upload");
    }
}
