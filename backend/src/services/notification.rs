//! Notification service for email and GroupMe delivery
//!
//! Supports:
//! - Email through SMTP (lettre) or the Resend HTTP API
//! - GroupMe bot posts for group chats
//! - A delivery log for every attempt

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lettre::{
    message::header::ContentType, transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use shared::{
    truncate_for_groupme, CommentKind, DeliveryStatus, NotificationChannel, PaginatedResponse,
    Pagination,
};

use crate::config::{EmailConfig, EmailProvider, GroupMeConfig};
use crate::error::{AppError, AppResult};

// ============================================================================
// Email Senders
// ============================================================================

/// A plain-text email ready to send
#[derive(Debug, Clone)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Outbound email transport
#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Short provider name for logs
    fn provider(&self) -> &'static str;

    /// Whether messages are actually delivered
    fn is_enabled(&self) -> bool {
        true
    }

    async fn send(&self, message: &EmailMessage) -> AppResult<()>;
}

/// SMTP delivery with STARTTLS
pub struct SmtpEmailSender {
    from_address: String,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpEmailSender {
    pub fn new(config: &EmailConfig) -> AppResult<Self> {
        let host = config
            .smtp_host
            .as_deref()
            .ok_or_else(|| AppError::Configuration("email.smtp_host is not set".to_string()))?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
            .map_err(|e| AppError::Configuration(format!("Invalid SMTP relay: {}", e)))?
            .port(config.smtp_port);

        if let (Some(user), Some(pass)) = (&config.smtp_user, &config.smtp_password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Self {
            from_address: config.from_address.clone(),
            transport: builder.build(),
        })
    }
}

#[async_trait]
impl EmailSender for SmtpEmailSender {
    fn provider(&self) -> &'static str {
        "smtp"
    }

    async fn send(&self, message: &EmailMessage) -> AppResult<()> {
        let from = self
            .from_address
            .parse()
            .map_err(|e| AppError::Configuration(format!("Invalid from address: {}", e)))?;
        let to = message
            .to
            .parse()
            .map_err(|e| AppError::EmailError(format!("Invalid recipient: {}", e)))?;

        let email = Message::builder()
            .from(from)
            .to(to)
            .subject(message.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(message.body.clone())
            .map_err(|e| AppError::EmailError(e.to_string()))?;

        self.transport
            .send(email)
            .await
            .map_err(|e| AppError::EmailError(e.to_string()))?;
        Ok(())
    }
}

/// Delivery through the Resend HTTP API
pub struct ResendEmailSender {
    from_address: String,
    api_key: String,
    endpoint: String,
    http_client: reqwest::Client,
}

#[derive(Serialize)]
struct ResendRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    text: &'a str,
}

impl ResendEmailSender {
    pub fn new(config: &EmailConfig) -> AppResult<Self> {
        let api_key = config.resend_api_key.clone().ok_or_else(|| {
            AppError::Configuration("email.resend_api_key is not set".to_string())
        })?;
        Ok(Self {
            from_address: config.from_address.clone(),
            api_key,
            endpoint: config.resend_endpoint.clone(),
            http_client: reqwest::Client::new(),
        })
    }
}

#[async_trait]
impl EmailSender for ResendEmailSender {
    fn provider(&self) -> &'static str {
        "resend"
    }

    async fn send(&self, message: &EmailMessage) -> AppResult<()> {
        let request = ResendRequest {
            from: &self.from_address,
            to: [message.to.as_str()],
            subject: &message.subject,
            text: &message.body,
        };

        let response = self
            .http_client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::EmailError(format!("Resend request failed: {}", e)))?;

        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(AppError::EmailError(format!("Resend returned {}: {}", status, body)))
        }
    }
}

/// Used when no provider is configured; nothing leaves the server
pub struct DisabledEmailSender;

#[async_trait]
impl EmailSender for DisabledEmailSender {
    fn provider(&self) -> &'static str {
        "disabled"
    }

    fn is_enabled(&self) -> bool {
        false
    }

    async fn send(&self, message: &EmailMessage) -> AppResult<()> {
        tracing::debug!(to = %message.to, subject = %message.subject, "Email disabled; message dropped");
        Ok(())
    }
}

/// Build the sender selected by `email.provider`
pub fn build_email_sender(config: &EmailConfig) -> AppResult<Arc<dyn EmailSender>> {
    let sender: Arc<dyn EmailSender> = match config.provider {
        EmailProvider::Disabled => Arc::new(DisabledEmailSender),
        EmailProvider::Smtp => Arc::new(SmtpEmailSender::new(config)?),
        EmailProvider::Resend => Arc::new(ResendEmailSender::new(config)?),
    };
    tracing::info!(provider = sender.provider(), "Email sender configured");
    Ok(sender)
}

// ============================================================================
// GroupMe
// ============================================================================

/// GroupMe bot API client
#[derive(Clone)]
pub struct GroupMeClient {
    enabled: bool,
    api_url: String,
    http_client: reqwest::Client,
}

#[derive(Serialize)]
struct GroupMePostRequest<'a> {
    bot_id: &'a str,
    text: String,
}

impl GroupMeClient {
    pub fn new(config: &GroupMeConfig) -> Self {
        Self {
            enabled: config.enabled,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            http_client: reqwest::Client::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Post a message as the given bot
    pub async fn post_message(&self, bot_id: &str, text: &str) -> AppResult<()> {
        let request = GroupMePostRequest {
            bot_id,
            text: truncate_for_groupme(text),
        };

        let response = self
            .http_client
            .post(format!("{}/bots/post", self.api_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::GroupMeError(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(AppError::GroupMeError(format!(
                "GroupMe returned {}",
                response.status()
            )))
        }
    }
}

// ============================================================================
// Notification Service
// ============================================================================

/// Details of a freshly posted comment, captured for delivery
#[derive(Debug, Clone)]
pub struct CommentNotice {
    pub comment_id: Uuid,
    pub animal_id: Uuid,
    pub animal_name: String,
    pub group_id: Uuid,
    pub author_id: Uuid,
    pub author_name: String,
    pub kind: CommentKind,
    pub rating: Option<i32>,
    pub content: String,
}

/// Counts from one notification fan-out
#[derive(Debug, Default, Clone, Serialize)]
pub struct NotificationSummary {
    pub emails_sent: u32,
    pub emails_failed: u32,
    pub groupme_posted: bool,
}

/// One row of the delivery log
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct NotificationLogEntry {
    pub id: Uuid,
    pub channel: String,
    pub recipient: String,
    pub subject: Option<String>,
    pub status: String,
    pub error_message: Option<String>,
    pub entity_type: Option<String>,
    pub entity_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Filter for the delivery log
#[derive(Debug, Default, Deserialize)]
pub struct NotificationLogFilter {
    pub channel: Option<NotificationChannel>,
    pub status: Option<DeliveryStatus>,
}

#[derive(Debug, FromRow)]
struct Recipient {
    email: String,
    name: String,
}

#[derive(Debug, FromRow)]
struct GroupChannel {
    name: String,
    groupme_bot_id: Option<String>,
}

/// Notification service
#[derive(Clone)]
pub struct NotificationService {
    db: PgPool,
    mailer: Arc<dyn EmailSender>,
    groupme: GroupMeClient,
    frontend_url: String,
}

impl NotificationService {
    pub fn new(
        db: PgPool,
        mailer: Arc<dyn EmailSender>,
        groupme: GroupMeClient,
        frontend_url: &str,
    ) -> Self {
        Self {
            db,
            mailer,
            groupme,
            frontend_url: frontend_url.trim_end_matches('/').to_string(),
        }
    }

    /// Email opted-in group members and post to the group's bot.
    /// Individual delivery failures are logged, not returned.
    pub async fn notify_new_comment(&self, notice: &CommentNotice) -> AppResult<NotificationSummary> {
        let group = sqlx::query_as::<_, GroupChannel>(
            "SELECT name, groupme_bot_id FROM groups WHERE id = $1",
        )
        .bind(notice.group_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Group".to_string()))?;

        let mut summary = NotificationSummary::default();

        if self.mailer.is_enabled() {
            let recipients = sqlx::query_as::<_, Recipient>(
                r#"
                SELECT u.email, u.name
                FROM user_groups ug
                JOIN users u ON u.id = ug.user_id
                WHERE ug.group_id = $1
                  AND u.id <> $2
                  AND u.email_notifications
                  AND u.is_active
                  AND u.deleted_at IS NULL
                ORDER BY u.email
                "#,
            )
            .bind(notice.group_id)
            .bind(notice.author_id)
            .fetch_all(&self.db)
            .await?;

            let (subject, body) = comment_email(notice, &group.name, &self.frontend_url);

            for recipient in recipients {
                let message = EmailMessage {
                    to: recipient.email.clone(),
                    subject: subject.clone(),
                    body: format!("Hi {},\n\n{}", recipient.name, body),
                };
                match self.mailer.send(&message).await {
                    Ok(()) => {
                        summary.emails_sent += 1;
                        self.record_comment_delivery(
                            NotificationChannel::Email,
                            &recipient.email,
                            Some(&subject),
                            DeliveryStatus::Sent,
                            None,
                            notice.comment_id,
                        )
                        .await;
                    }
                    Err(e) => {
                        summary.emails_failed += 1;
                        tracing::warn!(to = %recipient.email, error = %e, "Comment email failed");
                        self.record_comment_delivery(
                            NotificationChannel::Email,
                            &recipient.email,
                            Some(&subject),
                            DeliveryStatus::Failed,
                            Some(&e.to_string()),
                            notice.comment_id,
                        )
                        .await;
                    }
                }
            }
        }

        if let Some(bot_id) = group.groupme_bot_id.as_deref().filter(|b| !b.is_empty()) {
            if self.groupme.is_enabled() {
                let text = groupme_text(notice, &self.frontend_url);
                match self.groupme.post_message(bot_id, &text).await {
                    Ok(()) => {
                        summary.groupme_posted = true;
                        self.record_comment_delivery(
                            NotificationChannel::Groupme,
                            bot_id,
                            None,
                            DeliveryStatus::Sent,
                            None,
                            notice.comment_id,
                        )
                        .await;
                    }
                    Err(e) => {
                        tracing::warn!(group_id = %notice.group_id, error = %e, "GroupMe post failed");
                        self.record_comment_delivery(
                            NotificationChannel::Groupme,
                            bot_id,
                            None,
                            DeliveryStatus::Failed,
                            Some(&e.to_string()),
                            notice.comment_id,
                        )
                        .await;
                    }
                }
            }
        }

        tracing::info!(
            comment_id = %notice.comment_id,
            emails_sent = summary.emails_sent,
            emails_failed = summary.emails_failed,
            groupme_posted = summary.groupme_posted,
            "Comment notifications delivered"
        );
        Ok(summary)
    }

    /// Send a password reset link
    pub async fn send_password_reset(&self, to: &str, name: &str, link: &str) -> AppResult<()> {
        let message = EmailMessage {
            to: to.to_string(),
            subject: "Reset your Shelter Volunteers password".to_string(),
            body: format!(
                "Hi {},\n\nSomeone asked to reset the password for this account. \
                 Use the link below to choose a new one:\n\n{}\n\n\
                 If you did not ask for this you can ignore this email.",
                name, link
            ),
        };

        if !self.mailer.is_enabled() {
            tracing::warn!(to, "Email disabled; password reset link not delivered");
            self.record(
                NotificationChannel::Email,
                to,
                Some(&message.subject),
                DeliveryStatus::Skipped,
                None,
                Some("password_reset"),
                None,
            )
            .await;
            return Ok(());
        }

        let result = self.mailer.send(&message).await;
        let (status, error) = match &result {
            Ok(()) => (DeliveryStatus::Sent, None),
            Err(e) => (DeliveryStatus::Failed, Some(e.to_string())),
        };
        self.record(
            NotificationChannel::Email,
            to,
            Some(&message.subject),
            status,
            error.as_deref(),
            Some("password_reset"),
            None,
        )
        .await;
        result
    }

    /// Send a test message so admins can verify the email setup
    pub async fn send_test_email(&self, to: &str) -> AppResult<()> {
        if !self.mailer.is_enabled() {
            return Err(AppError::BadRequest("Email delivery is disabled".to_string()));
        }
        shared::validate_email(to).map_err(|m| AppError::validation("to", m))?;

        let message = EmailMessage {
            to: to.to_string(),
            subject: "Shelter Volunteers test email".to_string(),
            body: format!(
                "This is a test message sent through the {} provider.",
                self.mailer.provider()
            ),
        };

        let result = self.mailer.send(&message).await;
        let (status, error) = match &result {
            Ok(()) => (DeliveryStatus::Sent, None),
            Err(e) => (DeliveryStatus::Failed, Some(e.to_string())),
        };
        self.record(
            NotificationChannel::Email,
            to,
            Some(&message.subject),
            status,
            error.as_deref(),
            Some("test"),
            None,
        )
        .await;
        result
    }

    /// Delivery log, newest first
    pub async fn list_log(
        &self,
        filter: NotificationLogFilter,
        pagination: Pagination,
    ) -> AppResult<PaginatedResponse<NotificationLogEntry>> {
        let channel = filter.channel.map(|c| c.as_str());
        let status = filter.status.map(|s| s.as_str());

        let total = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM notification_log
            WHERE ($1::text IS NULL OR channel = $1)
              AND ($2::text IS NULL OR status = $2)
            "#,
        )
        .bind(channel)
        .bind(status)
        .fetch_one(&self.db)
        .await?;

        let entries = sqlx::query_as::<_, NotificationLogEntry>(
            r#"
            SELECT id, channel, recipient, subject, status, error_message,
                   entity_type, entity_id, created_at
            FROM notification_log
            WHERE ($1::text IS NULL OR channel = $1)
              AND ($2::text IS NULL OR status = $2)
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(channel)
        .bind(status)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(&self.db)
        .await?;

        Ok(PaginatedResponse::new(entries, pagination, total))
    }

    async fn record_comment_delivery(
        &self,
        channel: NotificationChannel,
        recipient: &str,
        subject: Option<&str>,
        status: DeliveryStatus,
        error: Option<&str>,
        comment_id: Uuid,
    ) {
        self.record(
            channel,
            recipient,
            subject,
            status,
            error,
            Some("comment"),
            Some(comment_id),
        )
        .await;
    }

    #[allow(clippy::too_many_arguments)]
    async fn record(
        &self,
        channel: NotificationChannel,
        recipient: &str,
        subject: Option<&str>,
        status: DeliveryStatus,
        error: Option<&str>,
        entity_type: Option<&str>,
        entity_id: Option<Uuid>,
    ) {
        let result = sqlx::query(
            r#"
            INSERT INTO notification_log
                (channel, recipient, subject, status, error_message, entity_type, entity_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(channel.as_str())
        .bind(recipient)
        .bind(subject)
        .bind(status.as_str())
        .bind(error)
        .bind(entity_type)
        .bind(entity_id)
        .execute(&self.db)
        .await;

        if let Err(e) = result {
            tracing::warn!(error = %e, "Failed to write notification log");
        }
    }
}

fn animal_link(frontend_url: &str, animal_id: Uuid) -> String {
    format!("{}/animals/{}", frontend_url, animal_id)
}

fn rating_label(notice: &CommentNotice) -> String {
    match (notice.kind, notice.rating) {
        (CommentKind::Session, Some(rating)) => format!(" (session rated {}/5)", rating),
        (CommentKind::Session, None) => " (session)".to_string(),
        _ => String::new(),
    }
}

/// Subject and body of the new-comment email, without the greeting
pub fn comment_email(notice: &CommentNotice, group_name: &str, frontend_url: &str) -> (String, String) {
    let subject = format!("[{}] New comment on {}", group_name, notice.animal_name);
    let body = format!(
        "{} left a comment on {}{}:\n\n{}\n\nView it here: {}\n\n\
         You can turn off these emails from your profile.",
        notice.author_name,
        notice.animal_name,
        rating_label(notice),
        notice.content,
        animal_link(frontend_url, notice.animal_id)
    );
    (subject, body)
}

/// GroupMe message for a new comment
pub fn groupme_text(notice: &CommentNotice, frontend_url: &str) -> String {
    let link = animal_link(frontend_url, notice.animal_id);
    let head = format!(
        "{} on {}{}: ",
        notice.author_name,
        notice.animal_name,
        rating_label(notice)
    );
    // Keep the link intact when the comment itself is long
    let budget = shared::GROUPME_MAX_MESSAGE_LEN
        .saturating_sub(head.chars().count() + link.chars().count() + 2);
    let mut content: String = notice.content.chars().take(budget).collect();
    if content.chars().count() < notice.content.chars().count() && budget > 0 {
        content.pop();
        content.push('…');
    }
    format!("{}{}\n{}", head, content, link)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notice(kind: CommentKind, rating: Option<i32>, content: &str) -> CommentNotice {
        CommentNotice {
            comment_id: Uuid::nil(),
            animal_id: Uuid::nil(),
            animal_name: "Biscuit".to_string(),
            group_id: Uuid::nil(),
            author_id: Uuid::nil(),
            author_name: "Dana".to_string(),
            kind,
            rating,
            content: content.to_string(),
        }
    }

    #[test]
    fn test_comment_email_mentions_animal_and_link() {
        let (subject, body) = comment_email(
            &notice(CommentKind::Note, None, "Great walk today"),
            "ModSquad",
            "https://volunteers.example.org",
        );
        assert_eq!(subject, "[ModSquad] New comment on Biscuit");
        assert!(body.contains("Dana left a comment on Biscuit:"));
        assert!(body.contains("Great walk today"));
        assert!(body.contains(&format!(
            "https://volunteers.example.org/animals/{}",
            Uuid::nil()
        )));
    }

    #[test]
    fn test_session_rating_is_shown() {
        let (_, body) = comment_email(
            &notice(CommentKind::Session, Some(4), "Worked on sit"),
            "ModSquad",
            "http://localhost",
        );
        assert!(body.contains("(session rated 4/5)"));
    }

    #[test]
    fn test_groupme_text_fits_and_keeps_link() {
        let long = "x".repeat(5000);
        let text = groupme_text(&notice(CommentKind::Note, None, &long), "http://localhost");
        assert!(text.chars().count() <= shared::GROUPME_MAX_MESSAGE_LEN);
        assert!(text.ends_with(&format!("http://localhost/animals/{}", Uuid::nil())));
        assert!(text.contains('…'));
    }

    #[test]
    fn test_groupme_text_short_comment_untouched() {
        let text = groupme_text(&notice(CommentKind::Note, None, "Good boy"), "http://x");
        assert!(text.starts_with("Dana on Biscuit: Good boy\n"));
        assert!(!text.contains('…'));
    }

    #[tokio::test]
    async fn test_disabled_sender_accepts_messages() {
        let sender = DisabledEmailSender;
        assert!(!sender.is_enabled());
        let message = EmailMessage {
            to: "a@example.org".to_string(),
            subject: "s".to_string(),
            body: "b".to_string(),
        };
        assert!(sender.send(&message).await.is_ok());
    }

    #[test]
    fn test_build_email_sender_requires_smtp_host() {
        let config = EmailConfig {
            provider: EmailProvider::Smtp,
            from_address: "noreply@example.org".to_string(),
            smtp_host: None,
            smtp_port: 587,
            smtp_user: None,
            smtp_password: None,
            resend_api_key: None,
            resend_endpoint: "https://api.resend.com/emails".to_string(),
        };
        assert!(build_email_sender(&config).is_err());
    }
}
