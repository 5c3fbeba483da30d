//! Comment permission tests against a live database

use sqlx::PgPool;
use uuid::Uuid;

use svp_server::error::AppError;
use svp_server::middleware::AuthUser;
use svp_server::services::schema::prepare_database;
use svp_server::{AppState, Config};

struct Fixture {
    state: AppState,
    group_id: Uuid,
    animal_id: Uuid,
    author: AuthUser,
}

async fn fixture() -> Fixture {
    let url = std::env::var("DATABASE_URL").unwrap();
    let db = PgPool::connect(&url).await.unwrap();
    let config = Config::for_tests();
    prepare_database(&db, &config.bootstrap).await.unwrap();

    let suffix = Uuid::new_v4().simple().to_string();
    let email = format!("walker-{suffix}@example.org");
    let user_id = sqlx::query_scalar::<_, Uuid>(
        "INSERT INTO users (email, name, password_hash) VALUES ($1, 'Walker', 'x') RETURNING id",
    )
    .bind(&email)
    .fetch_one(&db)
    .await
    .unwrap();
    let group_id = sqlx::query_scalar::<_, Uuid>(
        "INSERT INTO groups (name) VALUES ($1) RETURNING id",
    )
    .bind(format!("Walkers {suffix}"))
    .fetch_one(&db)
    .await
    .unwrap();
    sqlx::query("INSERT INTO user_groups (user_id, group_id) VALUES ($1, $2)")
        .bind(user_id)
        .bind(group_id)
        .execute(&db)
        .await
        .unwrap();
    let animal_id = sqlx::query_scalar::<_, Uuid>(
        "INSERT INTO animals (group_id, name) VALUES ($1, 'Biscuit') RETURNING id",
    )
    .bind(group_id)
    .fetch_one(&db)
    .await
    .unwrap();

    Fixture {
        state: AppState::new(db, config).unwrap(),
        group_id,
        animal_id,
        author: AuthUser {
            user_id,
            email,
            is_admin: false,
        },
    }
}

async fn add_comment(f: &Fixture) -> Uuid {
    sqlx::query_scalar::<_, Uuid>(
        "INSERT INTO animal_comments (animal_id, user_id, content) VALUES ($1, $2, 'Good walk') RETURNING id",
    )
    .bind(f.animal_id)
    .bind(f.author.user_id)
    .fetch_one(&f.state.db)
    .await
    .unwrap()
}

#[tokio::test]
#[ignore] // Requires database connection
async fn test_former_member_cannot_delete_own_comment() {
    let f = fixture().await;
    let comment_id = add_comment(&f).await;

    sqlx::query("DELETE FROM user_groups WHERE user_id = $1 AND group_id = $2")
        .bind(f.author.user_id)
        .bind(f.group_id)
        .execute(&f.state.db)
        .await
        .unwrap();

    let result = f
        .state
        .comment_service()
        .delete_comment(&f.author, comment_id)
        .await;
    assert!(matches!(result, Err(AppError::Forbidden(_))));
}

#[tokio::test]
#[ignore] // Requires database connection
async fn test_member_deletes_own_comment() {
    let f = fixture().await;
    let comment_id = add_comment(&f).await;

    f.state
        .comment_service()
        .delete_comment(&f.author, comment_id)
        .await
        .unwrap();

    let deleted = sqlx::query_scalar::<_, bool>(
        "SELECT deleted_at IS NOT NULL FROM animal_comments WHERE id = $1",
    )
    .bind(comment_id)
    .fetch_one(&f.state.db)
    .await
    .unwrap();
    assert!(deleted);
}

#[tokio::test]
#[ignore] // Requires database connection
async fn test_comments_on_deleted_animals_are_hidden() {
    let f = fixture().await;
    let comment_id = add_comment(&f).await;

    sqlx::query("UPDATE animals SET deleted_at = NOW() WHERE id = $1")
        .bind(f.animal_id)
        .execute(&f.state.db)
        .await
        .unwrap();

    let result = f
        .state
        .comment_service()
        .delete_comment(&f.author, comment_id)
        .await;
    assert!(matches!(result, Err(AppError::NotFound(_))));
}
