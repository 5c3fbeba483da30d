//! Property tests for shared validation and pagination rules

use proptest::prelude::*;

use shared::{
    detect_document_kind, fit_within, normalize_email, sanitize_file_name, validate_email,
    validate_password, validate_session_note, validate_tag_color, CommentKind, DocumentKind,
    Pagination, PaginationMeta, SessionNote, MAX_PER_PAGE,
};

// ============================================================================
// Property Test Strategies
// ============================================================================

fn email_strategy() -> impl Strategy<Value = String> {
    "[a-z]{3,10}(\\.[a-z]{2,6})?@[a-z]{3,8}\\.(com|org|net|dog)"
}

fn session_strategy() -> impl Strategy<Value = SessionNote> {
    (
        prop::option::of("[A-Za-z ]{1,40}"),
        prop::option::of("[A-Za-z ]{1,40}"),
        prop::option::of(-2i32..8),
        prop::option::of("[A-Za-z ]{0,40}"),
    )
        .prop_map(|(goal, outcome, rating, behavior_notes)| SessionNote {
            goal,
            outcome,
            rating,
            behavior_notes,
        })
}

// ============================================================================
// Accounts
// ============================================================================

proptest! {
    #[test]
    fn prop_generated_emails_are_valid(email in email_strategy()) {
        prop_assert!(validate_email(&email).is_ok());
        prop_assert!(validate_email(&email.to_uppercase()).is_ok());
    }

    /// Normalizing is idempotent and case-insensitive
    #[test]
    fn prop_normalize_email(email in email_strategy()) {
        let padded = format!("  {}  ", email.to_uppercase());
        prop_assert_eq!(normalize_email(&padded), email.clone());
        prop_assert_eq!(normalize_email(&normalize_email(&padded)), email);
    }

    #[test]
    fn prop_passwords_need_letters_and_digits(letters in "[a-zA-Z]{8,20}", digits in "[0-9]{8,20}") {
        prop_assert!(validate_password(&letters).is_err());
        prop_assert!(validate_password(&digits).is_err());
        let mixed = format!("{}{}", letters, &digits[..1]);
        prop_assert!(validate_password(&mixed).is_ok());
    }

    #[test]
    fn prop_tag_colors(hex in "[0-9a-fA-F]{6}", junk in "[g-zG-Z]{6}") {
        let hex_color = format!("#{}", hex);
        let junk_color = format!("#{}", junk);
        prop_assert!(validate_tag_color(&hex_color).is_ok());
        prop_assert!(validate_tag_color(&junk_color).is_err());
    }
}

// ============================================================================
// Session Notes
// ============================================================================

proptest! {
    /// A session note is valid exactly when goal, outcome and a 1-5 rating are present
    #[test]
    fn prop_session_note_rules(session in session_strategy()) {
        let has_goal = session.goal.as_deref().map_or(false, |g| !g.trim().is_empty());
        let has_outcome = session.outcome.as_deref().map_or(false, |o| !o.trim().is_empty());
        let good_rating = session.rating.map_or(false, |r| (1..=5).contains(&r));

        let result = validate_session_note(CommentKind::Session, Some(&session));
        prop_assert_eq!(result.is_ok(), has_goal && has_outcome && good_rating);
    }

    /// Plain notes reject any session payload
    #[test]
    fn prop_notes_reject_session_data(session in session_strategy()) {
        let result = validate_session_note(CommentKind::Note, Some(&session));
        prop_assert_eq!(result.is_ok(), session.is_empty());
    }
}

#[test]
fn test_session_comment_without_payload() {
    let err = validate_session_note(CommentKind::Session, None).unwrap_err();
    assert_eq!(err.field, "session");
    assert!(validate_session_note(CommentKind::Note, None).is_ok());
}

// ============================================================================
// Uploads
// ============================================================================

proptest! {
    /// Resizing never exceeds the bound and never upscales
    #[test]
    fn prop_fit_within_bounds(w in 1u32..20_000, h in 1u32..20_000, max in 16u32..4_000) {
        let (fw, fh) = fit_within(w, h, max);
        prop_assert!(fw <= w && fh <= h);
        prop_assert!(fw >= 1 && fh >= 1);
        if w <= max && h <= max {
            prop_assert_eq!((fw, fh), (w, h));
        } else {
            prop_assert_eq!(fw.max(fh), max);
        }
    }

    /// Sanitized names never contain path separators or start with a dot
    #[test]
    fn prop_sanitize_file_name(name in ".{0,80}") {
        let clean = sanitize_file_name(&name);
        prop_assert!(!clean.is_empty());
        prop_assert!(!clean.contains('/') && !clean.contains('\\'));
        prop_assert!(!clean.starts_with('.'));
    }

    /// Anything without a PDF or ZIP header is not a protocol document
    #[test]
    fn prop_unknown_documents_rejected(body in prop::collection::vec(any::<u8>(), 0..256)) {
        prop_assume!(!body.starts_with(b"%PDF-") && !body.starts_with(b"PK\x03\x04"));
        prop_assert_eq!(detect_document_kind("protocol.pdf", &body), None);
        prop_assert_eq!(detect_document_kind("protocol.docx", &body), None);
    }
}

#[test]
fn test_detect_documents() {
    assert_eq!(
        detect_document_kind("Leash SOP.PDF", b"%PDF-1.4\n..."),
        Some(DocumentKind::Pdf)
    );
    assert_eq!(
        detect_document_kind("Leash SOP.docx", b"PK\x03\x04\x14\x00"),
        Some(DocumentKind::Docx)
    );
    // A zip that is not a Word document
    assert_eq!(detect_document_kind("photos.zip", b"PK\x03\x04\x14\x00"), None);
}

// ============================================================================
// Pagination
// ============================================================================

proptest! {
    #[test]
    fn prop_pagination_is_clamped(page in any::<u32>(), per_page in any::<u32>()) {
        let p = Pagination::new(Some(page), Some(per_page));
        prop_assert!(p.page >= 1);
        prop_assert!((1..=MAX_PER_PAGE).contains(&p.per_page));
        prop_assert_eq!(p.limit(), i64::from(p.per_page));
        prop_assert_eq!(p.offset(), i64::from(p.page - 1) * i64::from(p.per_page));
    }

    #[test]
    fn prop_total_pages_cover_all_items(per_page in 1u32..=100, total in 0i64..10_000) {
        let meta = PaginationMeta::new(Pagination::new(Some(1), Some(per_page)), total);
        prop_assert!(i64::from(meta.total_pages) * i64::from(per_page) >= total);
        if total > 0 {
            prop_assert!(i64::from(meta.total_pages - 1) * i64::from(per_page) < total);
        }
    }
}
