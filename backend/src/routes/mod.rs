//! Route definitions for the Shelter Volunteers platform

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};

use crate::{handlers, middleware::auth_middleware, AppState};

/// Create API routes
pub fn api_routes(state: AppState) -> Router<AppState> {
    Router::new()
        // Health check (public)
        .route("/health", get(handlers::health_check))
        // Auth routes (public)
        .nest("/auth", public_auth_routes())
        .route("/settings/public", get(handlers::public_settings))
        // Everything else requires a bearer token
        .merge(protected_routes(state))
}

/// Authentication routes (public)
fn public_auth_routes() -> Router<AppState> {
    Router::new()
        .route("/login", post(handlers::login))
        .route("/refresh", post(handlers::refresh))
        .route("/register", post(handlers::register))
        .route("/forgot-password", post(handlers::forgot_password))
        .route("/reset-password", post(handlers::reset_password))
}

fn protected_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/auth/logout", post(handlers::logout))
        .route("/auth/me", get(handlers::me))
        .route("/auth/password", put(handlers::change_password))
        .nest("/users", user_routes())
        .nest("/groups", group_routes())
        .nest("/animals", animal_routes())
        .route(
            "/comments/:comment_id",
            put(handlers::update_comment).delete(handlers::delete_comment),
        )
        .route(
            "/images/:image_id",
            get(handlers::get_image).delete(handlers::delete_image),
        )
        .nest("/protocols", protocol_routes())
        .route("/settings", get(handlers::list_settings))
        .route("/settings/:key", put(handlers::update_setting))
        .route("/notifications/log", get(handlers::list_notification_log))
        .route("/notifications/test-email", post(handlers::send_test_email))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}

/// User administration routes
fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_users).post(handlers::create_user))
        .route("/export", get(handlers::export_users))
        .route(
            "/:user_id",
            get(handlers::get_user)
                .put(handlers::update_user)
                .delete(handlers::delete_user),
        )
        .route("/:user_id/restore", post(handlers::restore_user))
        .route("/:user_id/groups", put(handlers::set_user_groups))
}

/// Group routes, including everything scoped to a group
fn group_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_groups).post(handlers::create_group))
        .route(
            "/:group_id",
            get(handlers::get_group)
                .put(handlers::update_group)
                .delete(handlers::delete_group),
        )
        .route(
            "/:group_id/members",
            get(handlers::list_members).post(handlers::add_member),
        )
        .route(
            "/:group_id/members/:user_id",
            put(handlers::update_member).delete(handlers::remove_member),
        )
        .route(
            "/:group_id/animals",
            get(handlers::list_animals).post(handlers::create_animal),
        )
        .route("/:group_id/animals/export", get(handlers::export_animals))
        .route("/:group_id/animals/import", post(handlers::import_animals))
        .route(
            "/:group_id/animal-tags",
            get(handlers::list_animal_tags).post(handlers::create_animal_tag),
        )
        .route(
            "/:group_id/animal-tags/:tag_id",
            put(handlers::update_animal_tag).delete(handlers::delete_animal_tag),
        )
        .route(
            "/:group_id/comment-tags",
            get(handlers::list_comment_tags).post(handlers::create_comment_tag),
        )
        .route(
            "/:group_id/comment-tags/:tag_id",
            put(handlers::update_comment_tag).delete(handlers::delete_comment_tag),
        )
        .route("/:group_id/feed", get(handlers::group_feed))
        .route(
            "/:group_id/protocols",
            get(handlers::list_protocols).post(handlers::upload_protocol),
        )
}

/// Animal profile routes
fn animal_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/:animal_id",
            get(handlers::get_animal)
                .put(handlers::update_animal)
                .delete(handlers::delete_animal),
        )
        .route("/:animal_id/restore", post(handlers::restore_animal))
        .route("/:animal_id/tags", put(handlers::set_animal_tags))
        .route(
            "/:animal_id/comments",
            get(handlers::list_comments).post(handlers::create_comment),
        )
        .route(
            "/:animal_id/images",
            get(handlers::list_images).post(handlers::upload_image),
        )
        .route("/:animal_id/profile-image", put(handlers::set_profile_image))
}

/// Protocol document routes
fn protocol_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/:protocol_id",
            get(handlers::get_protocol)
                .put(handlers::update_protocol)
                .delete(handlers::delete_protocol),
        )
        .route("/:protocol_id/download", get(handlers::download_protocol))
}
