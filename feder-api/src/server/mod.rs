use axum::{
    Router,
    extract::{
        FromRef, Request,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
};
use axum_extra::typed_header::TypedHeaderRejection;
use feder_db::{
    client::{DbClient, DbError, ErrorKind},
    store::postgres::PgStore,
};
use json::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::error;

mod acting;
mod json;
mod query;
mod routes;

pub type ServerRouter = Router<ServerState>;

pub type Db = Arc<DbClient<PgStore>>;

#[derive(Clone, Debug, FromRef)]
pub struct ServerState {
    pub db_client: Db,
}

pub fn routes() -> ServerRouter {
    routes::routes().fallback(fallback)
}

pub async fn fallback(request: Request) -> ServerError {
    ServerError::UnknownRoute(request.into_parts().0.uri)
}

pub type Result<T, E = ServerError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Unknown route requested: {0}")]
    UnknownRoute(Uri),
    #[error("Path rejected: {0}")]
    PathRejection(#[from] PathRejection),
    #[error("Query string rejected: {0}")]
    QueryRejection(#[from] QueryRejection),
    #[error("Incoming JSON rejected: {0}")]
    JsonRejection(#[from] JsonRejection),
    #[error("JSON response could not be serialized: {0}")]
    JsonResponse(#[from] serde_json::Error),
    #[error("Acting user header was missing or invalid: {0}")]
    InvalidActingUser(TypedHeaderRejection),
    #[error(transparent)]
    Database(#[from] DbError),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::UnknownRoute(_) => StatusCode::NOT_FOUND,
            ServerError::InvalidActingUser(rejection) if rejection.is_missing() => {
                StatusCode::UNAUTHORIZED
            }
            ServerError::PathRejection(_)
            | ServerError::QueryRejection(_)
            | ServerError::JsonRejection(_)
            | ServerError::InvalidActingUser(_) => StatusCode::BAD_REQUEST,
            ServerError::JsonResponse(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServerError::Database(error) => match error.kind() {
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::NotAuthorized => StatusCode::FORBIDDEN,
                ErrorKind::Conflict => StatusCode::CONFLICT,
                ErrorKind::InvalidParameter => StatusCode::BAD_REQUEST,
                ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// A stable, machine-readable name for the failure.
    pub fn code(&self) -> &'static str {
        match self {
            ServerError::UnknownRoute(_) => "UNKNOWN_ROUTE",
            // Ids and emails are the only path parameters.
            ServerError::PathRejection(_) => "INVALID_PARAMETER",
            ServerError::QueryRejection(_) => "INVALID_QUERY",
            ServerError::JsonRejection(_) => "INVALID_BODY",
            ServerError::InvalidActingUser(_) => "INVALID_ACTING_USER",
            ServerError::JsonResponse(_) => "INTERNAL",
            ServerError::Database(error) => match error.kind() {
                ErrorKind::NotFound => "NOT_FOUND",
                ErrorKind::NotAuthorized => "NOT_AUTHORIZED",
                ErrorKind::Conflict => "CONFLICT",
                ErrorKind::InvalidParameter => "INVALID_PARAMETER",
                ErrorKind::Internal => "INTERNAL",
            },
        }
    }
}

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Serialize, Deserialize)]
struct ErrorResponse {
    status: u16,
    code: String,
    message: String,
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();

        error!(error = %self, %status, "Replying with error");

        // Internal details stay in the log.
        let message = if status.is_server_error() {
            "Internal server error".to_owned()
        } else {
            self.to_string()
        };
        let error_response = ErrorResponse {
            status: status.as_u16(),
            code: self.code().to_owned(),
            message,
        };
        (status, Json(error_response)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use crate::server::{ServerError, ServerState, routes};
    use axum::{
        body::Body,
        http::{Request, StatusCode, Uri},
    };
    use feder_common::{
        model::user::Email,
        snowflake::{ProcessId, WorkerId},
    };
    use feder_db::{
        client::{DbClient, DbError},
        filter::InvalidFilterError,
        store::{StoreError, postgres::PgStore},
    };
    use sqlx::postgres::PgPoolOptions;
    use std::sync::Arc;
    use tower::ServiceExt;

    /// The pool never connects; only requests rejected before a query are sent.
    fn unconnected_state() -> ServerState {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://feder@localhost/feder")
            .unwrap();
        let store = PgStore::new(pool, WorkerId::default(), ProcessId::default());
        ServerState {
            db_client: Arc::new(DbClient::new(store, 10)),
        }
    }

    #[test]
    fn database_errors_map_to_statuses() {
        let email = Email::new("a@x.io".to_owned()).unwrap();
        let cases = [
            (DbError::PostNotFound(1_u64.into()), StatusCode::NOT_FOUND, "NOT_FOUND"),
            (
                DbError::NotCommentAuthor {
                    comment: 2_u64.into(),
                    acting: email.clone(),
                },
                StatusCode::FORBIDDEN,
                "NOT_AUTHORIZED",
            ),
            (DbError::EmailTaken(email), StatusCode::CONFLICT, "CONFLICT"),
            (
                DbError::InvalidFilter(InvalidFilterError::KeywordTooLong(120)),
                StatusCode::BAD_REQUEST,
                "INVALID_PARAMETER",
            ),
            (
                DbError::from(StoreError::ReadOnly),
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL",
            ),
        ];

        for (error, status, code) in cases {
            let error = ServerError::Database(error);
            assert_eq!(error.status(), status);
            assert_eq!(error.code(), code);
        }
    }

    #[test]
    fn unknown_route_is_not_found() {
        let error = ServerError::UnknownRoute(Uri::from_static("/nope"));
        assert_eq!(error.status(), StatusCode::NOT_FOUND);
        assert_eq!(error.code(), "UNKNOWN_ROUTE");
    }

    #[tokio::test]
    async fn malformed_path_parameters_are_bad_requests() {
        let app = routes().with_state(unconnected_state());

        for uri in [
            "/posts/-1",
            "/posts/abc",
            "/posts/-3/comments",
            "/comments/x/replies",
            "/users/not-an-email",
        ] {
            let response = app
                .clone()
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
        }

        let response = app
            .oneshot(Request::builder().uri("/posts/1/likes").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
