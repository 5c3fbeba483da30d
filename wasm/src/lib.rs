//! WebAssembly module for the Shelter Volunteers platform
//!
//! Provides client-side checks that mirror the server:
//! - Protocol document type detection before upload
//! - Session note validation for the comment form
//! - Rating display and image preview sizing

use serde::Deserialize;
use wasm_bindgen::prelude::*;

use shared::{CommentKind, SessionNote, MAX_SESSION_RATING, MIN_SESSION_RATING};

// Re-export shared types for use in JavaScript
pub use shared::models::*;
pub use shared::types::*;
pub use shared::validation::*;

/// Initialize the WASM module
#[wasm_bindgen(start)]
pub fn init() {
    // Set up panic hook for better error messages in browser console
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}

/// "pdf", "docx" or "unknown" for a file the user picked
#[wasm_bindgen]
pub fn detect_document_kind(file_name: &str, bytes: &[u8]) -> String {
    shared::detect_document_kind(file_name, bytes)
        .map(|kind| kind.as_str().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[derive(Deserialize)]
struct CommentDraft {
    #[serde(default)]
    kind: CommentKind,
    #[serde(default)]
    session: Option<SessionNote>,
}

/// Validate a comment draft `{ "kind": ..., "session": {...} }`.
///
/// Returns an empty string when valid, otherwise the message to show.
#[wasm_bindgen]
pub fn validate_session_note(draft_json: &str) -> String {
    let draft: CommentDraft = match serde_json::from_str(draft_json) {
        Ok(draft) => draft,
        Err(e) => {
            #[cfg(target_arch = "wasm32")]
            web_sys::console::warn_1(&JsValue::from_str(&format!("Invalid comment draft: {}", e)));
            return format!("Invalid comment draft: {}", e);
        }
    };

    match shared::validate_session_note(draft.kind, draft.session.as_ref()) {
        Ok(()) => String::new(),
        Err(e) => e.to_string(),
    }
}

/// Star rendering of a session rating, e.g. 3 -> "★★★☆☆"
#[wasm_bindgen]
pub fn format_rating(rating: i32) -> String {
    let filled = rating.clamp(0, MAX_SESSION_RATING) as usize;
    let empty = MAX_SESSION_RATING as usize - filled;
    format!("{}{}", "★".repeat(filled), "☆".repeat(empty))
}

/// Whether a rating is on the accepted scale
#[wasm_bindgen]
pub fn is_valid_rating(rating: i32) -> bool {
    (MIN_SESSION_RATING..=MAX_SESSION_RATING).contains(&rating)
}

/// Preview size `[width, height]` fitting inside `max` on the longest side
#[wasm_bindgen]
pub fn fit_dimensions(width: u32, height: u32, max: u32) -> Vec<u32> {
    let (w, h) = fit_within(width, height, max);
    vec![w, h]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_document_kind() {
        assert_eq!(detect_document_kind("sop.pdf", b"%PDF-1.7 rest"), "pdf");
        assert_eq!(detect_document_kind("sop.docx", b"PK\x03\x04 rest"), "docx");
        assert_eq!(detect_document_kind("sop.txt", b"plain text"), "unknown");
    }

    #[test]
    fn test_validate_session_note() {
        assert_eq!(validate_session_note(r#"{"kind":"note"}"#), "");
        assert_eq!(
            validate_session_note(
                r#"{"kind":"session","session":{"goal":"Loose leash","outcome":"Better","rating":4}}"#
            ),
            ""
        );
        assert!(validate_session_note(r#"{"kind":"session","session":{"goal":"Loose leash"}}"#)
            .contains("session.outcome"));
        assert!(validate_session_note("not json").starts_with("Invalid comment draft"));
    }

    #[test]
    fn test_format_rating() {
        assert_eq!(format_rating(3), "★★★☆☆");
        assert_eq!(format_rating(5), "★★★★★");
        assert_eq!(format_rating(9), "★★★★★");
        assert_eq!(format_rating(-1), "☆☆☆☆☆");
    }

    #[test]
    fn test_fit_dimensions() {
        assert_eq!(fit_dimensions(4000, 2000, 800), vec![800, 400]);
        assert_eq!(fit_dimensions(300, 200, 800), vec![300, 200]);
    }

    #[test]
    fn test_rating_bounds() {
        assert!(is_valid_rating(1));
        assert!(!is_valid_rating(0));
        assert!(!is_valid_rating(6));
    }
}
