use crate::server::{
    Db, Result, ServerError, ServerRouter,
    acting::ActingUser,
    json::Json,
    query::{PageParams, Query},
};
use axum::{extract::State, http::StatusCode};
use axum_extra::routing::{RouterExt, TypedPath};
use feder_common::model::{
    Id,
    comment::{Comment, CommentMarker},
    page::Page,
};
use serde::Deserialize;

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .typed_put(update_comment)
        .typed_delete(delete_comment)
        .typed_get(list_replies)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/comments/{id}", rejection(ServerError))]
struct CommentPath {
    id: Id<CommentMarker>,
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/comments/{id}/replies", rejection(ServerError))]
struct RepliesPath {
    id: Id<CommentMarker>,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize)]
struct CommentContent {
    content: String,
}

async fn update_comment(
    CommentPath { id }: CommentPath,
    State(db): State<Db>,
    ActingUser(acting): ActingUser,
    Json(comment): Json<CommentContent>,
) -> Result<StatusCode> {
    db.update_comment(id, &comment.content, &acting).await?;

    Ok(StatusCode::NO_CONTENT)
}

async fn delete_comment(
    CommentPath { id }: CommentPath,
    State(db): State<Db>,
    ActingUser(acting): ActingUser,
) -> Result<StatusCode> {
    db.delete_comment(id, &acting).await?;

    Ok(StatusCode::NO_CONTENT)
}

async fn list_replies(
    RepliesPath { id }: RepliesPath,
    State(db): State<Db>,
    Query(params): Query<PageParams>,
) -> Result<Json<Page<Comment>>> {
    let page = db.list_replies(id, params.page, params.total).await?;

    Ok(Json(page))
}
