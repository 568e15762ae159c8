use crate::server::ServerError;
use axum::extract::{FromRequestParts, Query as AxumQuery};
use serde::Deserialize;

#[derive(FromRequestParts, Debug, Clone, Copy, Default)]
#[from_request(via(AxumQuery), rejection(ServerError))]
pub struct Query<T>(pub T);

/// `?page=&total=` of comment listings.
#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, Deserialize)]
pub struct PageParams {
    #[serde(default)]
    pub page: i64,
    pub total: Option<i64>,
}

/// `?search=&keyword=&page=&total=` of post and user listings.
#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub search: bool,
    pub keyword: Option<String>,
    #[serde(default)]
    pub page: i64,
    pub total: Option<i64>,
}
