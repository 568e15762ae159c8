//! The storage boundary: a [`Store`] opens [`Transaction`]s, and everything the
//! client does happens inside exactly one of them.

pub mod memory;
pub mod postgres;

use crate::filter::{EntityKind, Predicate};
use async_trait::async_trait;
use feder_common::model::{
    FederSnowflakeGenerator, Id, ModelValidationError, Version,
    comment::{Comment, CommentMarker, CreateComment},
    post::{Post, PostContent, PostMarker},
    user::{CreateUser, Email, UpdateUser, User, UserMarker},
};
use feder_common::snowflake::{ProcessId, WorkerId};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("The {entity} {id} no longer has version {expected}")]
    VersionConflict {
        entity: EntityKind,
        id: u64,
        expected: Version,
    },
    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),
    #[error("Referenced row does not exist: {0}")]
    MissingReference(String),
    #[error("Attempted to write in a read-only transaction")]
    ReadOnly,
    #[error("An object in the database was invalid: {0}")]
    Data(#[from] ModelValidationError),
    #[error(transparent)]
    Sqlx(sqlx::Error),
    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

impl From<sqlx::Error> for StoreError {
    fn from(error: sqlx::Error) -> Self {
        let Some(database_error) = error.as_database_error() else {
            return Self::Sqlx(error);
        };
        let constraint = database_error
            .constraint()
            .unwrap_or_else(|| database_error.message())
            .to_owned();

        if database_error.is_unique_violation() {
            Self::UniqueViolation(constraint)
        } else if database_error.is_foreign_key_violation() {
            Self::MissingReference(constraint)
        } else {
            Self::Sqlx(error)
        }
    }
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
pub enum AccessMode {
    /// Both pagination phases observe one snapshot.
    ReadOnly,
    ReadWrite,
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
pub enum OrderKey {
    Id,
    CreatedAt,
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
pub enum Direction {
    Ascending,
    Descending,
}

/// Primary ordering of a listing. Ties are always broken by id, descending.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
pub struct Order {
    pub key: OrderKey,
    pub direction: Direction,
}

impl Order {
    pub const NEWEST_FIRST: Order = Order {
        key: OrderKey::CreatedAt,
        direction: Direction::Descending,
    };
    pub const HIGHEST_ID_FIRST: Order = Order {
        key: OrderKey::Id,
        direction: Direction::Descending,
    };
}

/// Phase one of a listing: which ids, in which order, from where.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub struct KeyQuery<'a> {
    pub entity: EntityKind,
    pub predicates: &'a [Predicate],
    pub order: Order,
    pub limit: u32,
    pub offset: u64,
}

#[async_trait]
pub trait Store: Send + Sync {
    type Transaction: Transaction;

    async fn begin(&self, mode: AccessMode) -> Result<Self::Transaction>;
}

/// Dropping a transaction without calling [`Transaction::commit`] discards its
/// writes.
#[async_trait]
pub trait Transaction: Send {
    async fn select_keys(&mut self, query: &KeyQuery<'_>) -> Result<Vec<u64>>;

    async fn count(&mut self, entity: EntityKind, predicates: &[Predicate]) -> Result<u64>;

    /// Rows come back in no particular order; ids without a row are skipped.
    async fn hydrate_posts(&mut self, ids: &[Id<PostMarker>]) -> Result<Vec<Post>>;

    async fn hydrate_comments(&mut self, ids: &[Id<CommentMarker>]) -> Result<Vec<Comment>>;

    async fn hydrate_users(&mut self, ids: &[Id<UserMarker>]) -> Result<Vec<User>>;

    async fn fetch_post(&mut self, id: Id<PostMarker>) -> Result<Option<Post>>;

    async fn fetch_comment(&mut self, id: Id<CommentMarker>) -> Result<Option<Comment>>;

    async fn fetch_user_by_email(&mut self, email: &Email) -> Result<Option<User>>;

    async fn insert_user(&mut self, user: &CreateUser) -> Result<Id<UserMarker>>;

    async fn insert_post(
        &mut self,
        author: Id<UserMarker>,
        post: &PostContent,
    ) -> Result<Id<PostMarker>>;

    async fn insert_comment(
        &mut self,
        author: Id<UserMarker>,
        comment: &CreateComment,
    ) -> Result<Id<CommentMarker>>;

    /// Fails with [`StoreError::VersionConflict`] unless the stored version is `expected`.
    async fn update_post(
        &mut self,
        id: Id<PostMarker>,
        expected: Version,
        post: &PostContent,
    ) -> Result<()>;

    async fn update_comment(
        &mut self,
        id: Id<CommentMarker>,
        expected: Version,
        content: &str,
    ) -> Result<()>;

    async fn update_user(
        &mut self,
        id: Id<UserMarker>,
        expected: Version,
        user: &UpdateUser,
    ) -> Result<()>;

    /// Also deletes every comment on the post.
    async fn delete_post(&mut self, id: Id<PostMarker>) -> Result<()>;

    /// Also deletes the replies to the comment, transitively.
    async fn delete_comment(&mut self, id: Id<CommentMarker>) -> Result<()>;

    /// Also deletes the user's posts and comments.
    async fn delete_user(&mut self, id: Id<UserMarker>) -> Result<()>;

    async fn commit(self) -> Result<()>;
}

/// Generates ids client-side, shared by all transactions of a store.
#[derive(Clone, Debug)]
pub(crate) struct IdSource(Arc<Mutex<FederSnowflakeGenerator>>);

impl IdSource {
    pub(crate) fn new(worker_id: WorkerId, process_id: ProcessId) -> Self {
        Self(Arc::new(Mutex::new(FederSnowflakeGenerator::new(
            worker_id, process_id,
        ))))
    }

    pub(crate) fn next<Marker>(&self) -> Id<Marker> {
        let snowflake = self
            .0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .generate();
        snowflake.into()
    }
}
