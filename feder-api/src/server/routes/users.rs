use crate::server::{
    Db, Result, ServerError, ServerRouter,
    json::Json,
    query::{Query, SearchParams},
    routes::Created,
};
use axum::{extract::State, http::StatusCode};
use axum_extra::routing::{RouterExt, TypedPath};
use feder_common::model::{
    Id,
    page::Page,
    post::Post,
    user::{CreateUser, Email, UpdateUser, User, UserMarker},
};
use serde::Deserialize;

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .typed_get(list_users)
        .typed_post(create_user)
        .typed_get(get_user)
        .typed_put(update_user)
        .typed_delete(delete_user)
        .typed_get(list_user_posts)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/users", rejection(ServerError))]
struct UsersPath();

#[derive(TypedPath, Deserialize)]
#[typed_path("/users/{email}", rejection(ServerError))]
struct UserPath {
    email: Email,
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/users/{email}/posts", rejection(ServerError))]
struct UserPostsPath {
    email: Email,
}

async fn list_users(
    UsersPath(): UsersPath,
    State(db): State<Db>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Page<User>>> {
    let page = db
        .list_users(
            params.search,
            params.keyword.as_deref(),
            params.page,
            params.total,
        )
        .await?;

    Ok(Json(page))
}

async fn create_user(
    UsersPath(): UsersPath,
    State(db): State<Db>,
    Json(user): Json<CreateUser>,
) -> Result<(StatusCode, Json<Created<Id<UserMarker>>>)> {
    let id = db.create_user(&user).await?;

    Ok((StatusCode::CREATED, Json(Created { id })))
}

async fn get_user(UserPath { email }: UserPath, State(db): State<Db>) -> Result<Json<User>> {
    let user = db.get_user(&email).await?;

    Ok(Json(user))
}

async fn update_user(
    UserPath { email }: UserPath,
    State(db): State<Db>,
    Json(user): Json<UpdateUser>,
) -> Result<StatusCode> {
    db.update_user(&email, &user).await?;

    Ok(StatusCode::NO_CONTENT)
}

async fn delete_user(UserPath { email }: UserPath, State(db): State<Db>) -> Result<StatusCode> {
    db.delete_user(&email).await?;

    Ok(StatusCode::NO_CONTENT)
}

async fn list_user_posts(
    UserPostsPath { email }: UserPostsPath,
    State(db): State<Db>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Page<Post>>> {
    let page = db
        .list_posts_by_author(
            params.search,
            &email,
            params.keyword.as_deref(),
            params.page,
            params.total,
        )
        .await?;

    Ok(Json(page))
}
