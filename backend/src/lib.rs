//! Shelter Volunteers platform backend
//!
//! A coordination service for animal shelter volunteer groups: animal
//! profiles, session notes, photos, protocol documents and notifications.

use std::sync::Arc;
use std::time::Duration;

use axum::{extract::DefaultBodyLimit, http::HeaderValue, routing::get, Router};
use sqlx::PgPool;
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod services;

pub use config::Config;

use crate::error::AppResult;
use crate::services::image::{build_image_store, ImageStore};
use crate::services::notification::{build_email_sender, EmailSender, GroupMeClient};
use crate::services::settings::SettingsCache;
use crate::services::{
    AuthService, CommentService, ImageService, NotificationService, ProtocolService,
    SettingsService,
};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Arc<Config>,
    pub settings: Arc<SettingsCache>,
    pub mailer: Arc<dyn EmailSender>,
    pub groupme: GroupMeClient,
    pub image_store: Arc<dyn ImageStore>,
}

impl AppState {
    /// Build the long-lived clients described by the configuration
    pub fn new(db: PgPool, config: Config) -> AppResult<Self> {
        let mailer = build_email_sender(&config.email)?;
        let groupme = GroupMeClient::new(&config.groupme);
        let image_store = build_image_store(db.clone(), &config.storage)?;
        let settings = Arc::new(SettingsCache::new(Duration::from_secs(
            config.settings.cache_ttl_secs,
        )));

        Ok(Self {
            db,
            config: Arc::new(config),
            settings,
            mailer,
            groupme,
            image_store,
        })
    }

    pub fn auth_service(&self) -> AuthService {
        AuthService::new(self.db.clone(), &self.config)
    }

    pub fn settings_service(&self) -> SettingsService {
        SettingsService::new(self.db.clone(), self.settings.clone())
    }

    pub fn notification_service(&self) -> NotificationService {
        NotificationService::new(
            self.db.clone(),
            self.mailer.clone(),
            self.groupme.clone(),
            &self.config.frontend_url,
        )
    }

    pub fn comment_service(&self) -> CommentService {
        CommentService::new(
            self.db.clone(),
            self.settings_service(),
            self.notification_service(),
        )
    }

    pub fn image_service(&self) -> ImageService {
        ImageService::new(
            self.db.clone(),
            self.image_store.clone(),
            self.config.storage.clone(),
        )
    }

    pub fn protocol_service(&self) -> ProtocolService {
        ProtocolService::new(self.db.clone(), self.config.storage.max_document_bytes)
    }
}

/// Create the application router with all routes and middleware
pub fn create_app(state: AppState) -> Router {
    let origins = state
        .config
        .server
        .cors_origins
        .iter()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect::<Vec<_>>();

    let cors = if origins.is_empty() {
        CorsLayer::new().allow_origin(Any)
    } else {
        CorsLayer::new().allow_origin(origins)
    }
    .allow_methods(Any)
    .allow_headers(Any);

    let body_limit = state.config.server.max_upload_bytes;

    Router::new()
        .route("/", get(root))
        .nest("/api/v1", routes::api_routes(state.clone()))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Root endpoint
async fn root() -> &'static str {
    "Shelter Volunteers API v1"
}
