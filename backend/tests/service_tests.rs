//! Tests for the pure parts of the services: roster CSV, comment edit
//! windows, notification text and image processing

use std::io::Cursor;

use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;
use rust_decimal::Decimal;
use uuid::Uuid;

use shared::{AnimalSort, AnimalStatus, CommentKind, Sex, SortOrder, GROUPME_MAX_MESSAGE_LEN};
use svp_server::error::AppError;
use svp_server::middleware::AuthUser;
use svp_server::services::animal::order_clause;
use svp_server::services::comment::check_edit_window;
use svp_server::services::csv_io::{parse_row, read_roster, write_csv, AnimalCsvRow};
use svp_server::services::image::process_image;
use svp_server::services::notification::{comment_email, groupme_text, CommentNotice};

// ============================================================================
// Roster CSV
// ============================================================================

fn row(name: &str) -> AnimalCsvRow {
    AnimalCsvRow {
        name: Some(name.to_string()),
        ..Default::default()
    }
}

#[test]
fn test_parse_row_defaults() {
    let parsed = parse_row(row("Biscuit")).unwrap();
    assert_eq!(parsed.name, "Biscuit");
    assert_eq!(parsed.species, "dog");
    assert_eq!(parsed.sex, Sex::Unknown);
    assert_eq!(parsed.status, AnimalStatus::Available);
    assert!(parsed.tags.is_empty());
    assert_eq!(parsed.weight_lbs, None);
}

#[test]
fn test_parse_row_full() {
    let parsed = parse_row(AnimalCsvRow {
        species: Some("Cat".to_string()),
        sex: Some("F".to_string()),
        status: Some("Medical Hold".to_string()),
        birth_date: Some("2021-04-09".to_string()),
        weight_lbs: Some("12.5".to_string()),
        tags: Some("shy; cat-friendly ;Shy;".to_string()),
        ..row("Mittens")
    })
    .unwrap();

    assert_eq!(parsed.species, "cat");
    assert_eq!(parsed.sex, Sex::Female);
    assert_eq!(parsed.status, AnimalStatus::MedicalHold);
    assert_eq!(parsed.birth_date.unwrap().to_string(), "2021-04-09");
    assert_eq!(parsed.weight_lbs, Some(Decimal::new(125, 1)));
    assert_eq!(parsed.tags, vec!["shy", "cat-friendly"]);
}

#[test]
fn test_parse_row_rejects_bad_values() {
    assert!(parse_row(row("   ")).unwrap_err().contains("name"));
    assert!(parse_row(AnimalCsvRow {
        birth_date: Some("04/09/2021".to_string()),
        ..row("Rex")
    })
    .unwrap_err()
    .contains("birth_date"));
    assert!(parse_row(AnimalCsvRow {
        weight_lbs: Some("-3".to_string()),
        ..row("Rex")
    })
    .is_err());
    assert!(parse_row(AnimalCsvRow {
        status: Some("lost".to_string()),
        ..row("Rex")
    })
    .is_err());
}

#[test]
fn test_write_csv_header_and_rows() {
    let csv = write_csv(&[AnimalCsvRow {
        tags: Some("leash reactive;treat motivated".to_string()),
        ..row("Biscuit")
    }])
    .unwrap();
    let mut lines = csv.lines();
    assert_eq!(
        lines.next(),
        Some("id,name,species,breed,sex,birth_date,status,kennel,weight_lbs,tags,description")
    );
    assert_eq!(
        lines.next(),
        Some(",Biscuit,,,,,,,,leash reactive;treat motivated,")
    );
    assert_eq!(lines.next(), None);
}

#[test]
fn test_write_csv_quotes_commas() {
    let csv = write_csv(&[AnimalCsvRow {
        description: Some("Loves walks, hates cats".to_string()),
        ..row("Rex")
    }])
    .unwrap();
    assert!(csv.contains("\"Loves walks, hates cats\""));
}

#[test]
fn test_read_roster_skips_bad_rows_and_keeps_line_numbers() {
    let upload = "\
Name,Species,Weight_lbs,Status,Tags
Biscuit,dog,42.5,available,shy
,cat,,,
Mittens,cat,100000,,
Pepper,dog,,lost,
Juniper,cat,9.25,foster,indoor;Indoor
";
    let (rows, summary) = read_roster(upload.as_bytes()).unwrap();

    let kept: Vec<(usize, &str)> = rows.iter().map(|(n, a)| (*n, a.name.as_str())).collect();
    assert_eq!(kept, vec![(2, "Biscuit"), (6, "Juniper")]);
    assert_eq!(rows[1].1.tags, vec!["indoor"]);

    assert_eq!(summary.skipped, 3);
    assert_eq!(summary.created + summary.updated, 0);
    let failed: Vec<usize> = summary.errors.iter().map(|e| e.row).collect();
    assert_eq!(failed, vec![3, 4, 5]);
    assert!(summary.errors[1].message.contains("weight_lbs"));
}

#[test]
fn test_exported_roster_reimports_cleanly() {
    let roster = vec![
        AnimalCsvRow {
            id: Some(Uuid::new_v4().to_string()),
            species: Some("dog".to_string()),
            sex: Some("male".to_string()),
            status: Some("medical_hold".to_string()),
            birth_date: Some("2019-11-30".to_string()),
            weight_lbs: Some("61.40".to_string()),
            tags: Some("Leash Reactive;Treat Motivated".to_string()),
            description: Some("Pulls toward squirrels, \"loves\" peanut butter".to_string()),
            ..row("Biscuit")
        },
        row("Mittens"),
    ];
    let exported = write_csv(&roster).unwrap();

    let (rows, summary) = read_roster(exported.as_bytes()).unwrap();
    assert_eq!(summary.skipped, 0);
    assert_eq!(rows.len(), 2);
    for ((_, parsed), original) in rows.into_iter().zip(roster) {
        assert_eq!(Some(parsed), parse_row(original).ok());
    }
}

#[test]
fn test_empty_export_is_a_valid_template() {
    let (rows, summary) = read_roster(
        b"id,name,species,breed,sex,birth_date,status,kennel,weight_lbs,tags,description\n",
    )
    .unwrap();
    assert!(rows.is_empty());
    assert_eq!(summary.skipped, 0);
}

proptest! {
    /// Tag lists never contain blanks or case-insensitive duplicates
    #[test]
    fn prop_import_tags_are_deduplicated(tags in prop::collection::vec("[A-Za-z ]{0,12}", 0..8)) {
        let parsed = parse_row(AnimalCsvRow {
            tags: Some(tags.join(";")),
            ..row("Biscuit")
        })
        .unwrap();
        for (i, tag) in parsed.tags.iter().enumerate() {
            prop_assert!(!tag.trim().is_empty());
            prop_assert!(!parsed.tags[..i].iter().any(|t| t.eq_ignore_ascii_case(tag)));
        }
    }
}

// ============================================================================
// Animal Sorting
// ============================================================================

#[test]
fn test_order_clause_defaults() {
    assert_eq!(order_clause(AnimalSort::Name, None), "LOWER(a.name) ASC, a.id");
    assert_eq!(
        order_clause(AnimalSort::LastComment, None),
        "a.last_comment_at DESC NULLS LAST, LOWER(a.name) ASC, a.id"
    );
    assert_eq!(
        order_clause(AnimalSort::Updated, Some(SortOrder::Asc)),
        "a.updated_at ASC NULLS LAST, LOWER(a.name) ASC, a.id"
    );
}

// ============================================================================
// Comment Edit Window
// ============================================================================

fn volunteer(is_admin: bool) -> AuthUser {
    AuthUser {
        user_id: Uuid::new_v4(),
        email: "walker@example.org".to_string(),
        is_admin,
    }
}

#[test]
fn test_edit_window() {
    let author = volunteer(false);
    let created = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let window = Duration::minutes(30);

    assert!(check_edit_window(&author, author.user_id, created, created + Duration::minutes(10), window).is_ok());
    assert!(matches!(
        check_edit_window(&author, author.user_id, created, created + Duration::hours(2), window),
        Err(AppError::Forbidden(_))
    ));
    // Someone else's comment
    assert!(matches!(
        check_edit_window(&author, Uuid::new_v4(), created, created, window),
        Err(AppError::Forbidden(_))
    ));
    // Admins are not bound by the window
    let admin = volunteer(true);
    assert!(check_edit_window(&admin, author.user_id, created, created + Duration::days(30), window).is_ok());
}

#[test]
fn test_zero_edit_window_blocks_authors() {
    let author = volunteer(false);
    let created = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    assert!(check_edit_window(
        &author,
        author.user_id,
        created,
        created + Duration::seconds(1),
        Duration::zero()
    )
    .is_err());
}

// ============================================================================
// Numeric Settings
// ============================================================================

proptest! {
    /// Any accepted window value converts to a duration without overflow
    #[test]
    fn prop_edit_window_setting_is_bounded(minutes in any::<i64>()) {
        use shared::{find_setting, setting_value_matches, MAX_COMMENT_EDIT_WINDOW_MINUTES, SETTING_COMMENT_EDIT_WINDOW_MINUTES};
        use svp_server::services::settings::edit_window_from_value;

        let definition = find_setting(SETTING_COMMENT_EDIT_WINDOW_MINUTES).unwrap();
        let value = serde_json::json!(minutes);
        prop_assert_eq!(
            setting_value_matches(&definition, &value),
            (0..=MAX_COMMENT_EDIT_WINDOW_MINUTES).contains(&minutes)
        );

        let window = edit_window_from_value(&value);
        prop_assert!(window >= Duration::zero());
        prop_assert!(window <= Duration::minutes(MAX_COMMENT_EDIT_WINDOW_MINUTES));
    }
}

// ============================================================================
// Notification Text
// ============================================================================

fn notice(kind: CommentKind, rating: Option<i32>, content: &str) -> CommentNotice {
    CommentNotice {
        comment_id: Uuid::new_v4(),
        animal_id: Uuid::nil(),
        animal_name: "Biscuit".to_string(),
        group_id: Uuid::new_v4(),
        author_id: Uuid::new_v4(),
        author_name: "Dana".to_string(),
        kind,
        rating,
        content: content.to_string(),
    }
}

#[test]
fn test_comment_email() {
    let (subject, body) = comment_email(
        &notice(CommentKind::Session, Some(4), "Walked nicely on a loose leash."),
        "Dog Walkers",
        "https://volunteers.example.org",
    );
    assert_eq!(subject, "[Dog Walkers] New comment on Biscuit");
    assert!(body.starts_with("Dana left a comment on Biscuit (session rated 4/5):"));
    assert!(body.contains("Walked nicely on a loose leash."));
    assert!(body.contains(&format!(
        "https://volunteers.example.org/animals/{}",
        Uuid::nil()
    )));
}

#[test]
fn test_groupme_text_short() {
    let text = groupme_text(&notice(CommentKind::Note, None, "Ate breakfast"), "https://v.example.org");
    assert_eq!(
        text,
        format!("Dana on Biscuit: Ate breakfast\nhttps://v.example.org/animals/{}", Uuid::nil())
    );
}

proptest! {
    /// Long comments are cut so the message fits and the link survives
    #[test]
    fn prop_groupme_text_fits(len in 0usize..3000) {
        let content = "w".repeat(len);
        let text = groupme_text(&notice(CommentKind::Session, None, &content), "https://v.example.org");
        let link = format!("https://v.example.org/animals/{}", Uuid::nil());
        prop_assert!(text.chars().count() <= GROUPME_MAX_MESSAGE_LEN);
        prop_assert!(text.ends_with(&link));
    }
}

// ============================================================================
// Image Processing
// ============================================================================

fn png(width: u32, height: u32) -> Vec<u8> {
    let img = image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
        width,
        height,
        image::Rgb([180, 120, 60]),
    ));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
    buf.into_inner()
}

#[test]
fn test_process_image_downsizes_and_reencodes() {
    let processed = process_image(&png(1600, 800), 800, 200).unwrap();
    assert_eq!((processed.width, processed.height), (800, 400));
    // JPEG SOI marker
    assert!(processed.full.starts_with(&[0xFF, 0xD8]));
    assert!(processed.thumbnail.starts_with(&[0xFF, 0xD8]));

    let thumb = image::load_from_memory(&processed.thumbnail).unwrap();
    assert_eq!((thumb.width(), thumb.height()), (200, 100));
}

#[test]
fn test_process_image_keeps_small_images() {
    let processed = process_image(&png(300, 200), 800, 200).unwrap();
    assert_eq!((processed.width, processed.height), (300, 200));
}

#[test]
fn test_process_image_rejects_garbage() {
    assert!(matches!(
        process_image(b"definitely not an image", 800, 200),
        Err(AppError::Validation { .. })
    ));
}

// ============================================================================
// Email
// ============================================================================

#[test]
fn test_disabled_email_sender_drops_messages() {
    use svp_server::services::notification::{build_email_sender, EmailMessage, EmailSender};

    let config = svp_server::Config::for_tests();
    let sender = build_email_sender(&config.email).unwrap();
    assert_eq!(sender.provider(), "disabled");
    assert!(!sender.is_enabled());

    let message = EmailMessage {
        to: "walker@example.org".to_string(),
        subject: "Test".to_string(),
        body: "Hello".to_string(),
    };
    tokio_test::assert_ok!(tokio_test::block_on(sender.send(&message)));
}
