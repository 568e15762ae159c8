use crate::server::{
    Db, Result, ServerError, ServerRouter,
    acting::ActingUser,
    json::Json,
    query::{PageParams, Query, SearchParams},
    routes::Created,
};
use axum::{extract::State, http::StatusCode};
use axum_extra::routing::{RouterExt, TypedPath};
use feder_common::model::{
    Id,
    comment::{Comment, CommentMarker, CreateComment},
    page::Page,
    post::{Post, PostContent, PostMarker},
};
use serde::Deserialize;

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .typed_get(list_posts)
        .typed_post(create_post)
        .typed_get(get_post)
        .typed_put(update_post)
        .typed_delete(delete_post)
        .typed_get(list_comments)
        .typed_post(create_comment)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/posts", rejection(ServerError))]
struct PostsPath();

#[derive(TypedPath, Deserialize)]
#[typed_path("/posts/{id}", rejection(ServerError))]
struct PostPath {
    id: Id<PostMarker>,
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/posts/{id}/comments", rejection(ServerError))]
struct PostCommentsPath {
    id: Id<PostMarker>,
}

async fn list_posts(
    PostsPath(): PostsPath,
    State(db): State<Db>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Page<Post>>> {
    let page = db
        .list_posts(
            params.search,
            params.keyword.as_deref(),
            params.page,
            params.total,
        )
        .await?;

    Ok(Json(page))
}

async fn create_post(
    PostsPath(): PostsPath,
    State(db): State<Db>,
    ActingUser(author): ActingUser,
    Json(post): Json<PostContent>,
) -> Result<(StatusCode, Json<Created<Id<PostMarker>>>)> {
    let id = db.create_post(&author, &post).await?;

    Ok((StatusCode::CREATED, Json(Created { id })))
}

async fn get_post(PostPath { id }: PostPath, State(db): State<Db>) -> Result<Json<Post>> {
    let post = db.get_post(id).await?;

    Ok(Json(post))
}

async fn update_post(
    PostPath { id }: PostPath,
    State(db): State<Db>,
    Json(post): Json<PostContent>,
) -> Result<StatusCode> {
    db.update_post(id, &post).await?;

    Ok(StatusCode::NO_CONTENT)
}

async fn delete_post(PostPath { id }: PostPath, State(db): State<Db>) -> Result<StatusCode> {
    db.delete_post(id).await?;

    Ok(StatusCode::NO_CONTENT)
}

async fn list_comments(
    PostCommentsPath { id }: PostCommentsPath,
    State(db): State<Db>,
    Query(params): Query<PageParams>,
) -> Result<Json<Page<Comment>>> {
    let page = db
        .list_top_level_comments(id, params.page, params.total)
        .await?;

    Ok(Json(page))
}

/// A comment on the post named by the path; `parent_id` makes it a reply.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize)]
struct NewComment {
    content: String,
    #[serde(default)]
    parent_id: Option<Id<CommentMarker>>,
}

async fn create_comment(
    PostCommentsPath { id }: PostCommentsPath,
    State(db): State<Db>,
    ActingUser(author): ActingUser,
    Json(comment): Json<NewComment>,
) -> Result<(StatusCode, Json<Created<Id<CommentMarker>>>)> {
    let comment = CreateComment {
        post_id: id,
        content: comment.content,
        parent_id: comment.parent_id,
    };
    let id = db.create_comment(&author, &comment).await?;

    Ok((StatusCode::CREATED, Json(Created { id })))
}
