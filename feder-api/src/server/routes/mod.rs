use crate::server::ServerRouter;
use axum::Router;
use serde::Serialize;

mod comments;
mod posts;
mod users;

pub fn routes() -> ServerRouter {
    Router::new()
        .merge(posts::routes())
        .merge(comments::routes())
        .merge(users::routes())
}

/// Body of `201 Created` replies.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, Serialize)]
struct Created<T> {
    id: T,
}
