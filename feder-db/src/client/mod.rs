mod comments;
mod posts;
mod users;

use crate::{
    filter::{EntityKind, Filter, InvalidFilterError},
    paginate::{Listing, PageQuery, paginate},
    store::{AccessMode, Order, Store, StoreError, Transaction},
};
use feder_common::model::{
    Id,
    comment::CommentMarker,
    page::{DEFAULT_PAGE_SIZE, InvalidPageRequestError, Page, PageRequest, known_total},
    post::PostMarker,
    user::{Email, UserMarker},
};
use thiserror::Error;

pub type Result<T, E = DbError> = std::result::Result<T, E>;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
pub enum ErrorKind {
    NotFound,
    NotAuthorized,
    Conflict,
    InvalidParameter,
    Internal,
}

#[derive(Debug, Error)]
pub enum DbError {
    #[error("Post {0} does not exist")]
    PostNotFound(Id<PostMarker>),
    #[error("Comment {0} does not exist")]
    CommentNotFound(Id<CommentMarker>),
    #[error("Comment {parent} does not exist on post {post}")]
    ParentNotFound {
        post: Id<PostMarker>,
        parent: Id<CommentMarker>,
    },
    #[error("No user is registered with {0}")]
    UserNotFound(Email),
    #[error("{acting} is not the author of comment {comment}")]
    NotCommentAuthor {
        comment: Id<CommentMarker>,
        acting: Email,
    },
    #[error("{0} is already registered")]
    EmailTaken(Email),
    #[error("The {entity} {id} was modified concurrently")]
    Modified { entity: EntityKind, id: u64 },
    #[error("Referenced row vanished: {0}")]
    MissingReference(String),
    #[error("Duplicate value: {0}")]
    Duplicate(String),
    #[error(transparent)]
    InvalidFilter(#[from] InvalidFilterError),
    #[error(transparent)]
    InvalidPage(#[from] InvalidPageRequestError),
    #[error(transparent)]
    Store(StoreError),
}

impl DbError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            DbError::PostNotFound(_)
            | DbError::CommentNotFound(_)
            | DbError::ParentNotFound { .. }
            | DbError::UserNotFound(_)
            | DbError::MissingReference(_) => ErrorKind::NotFound,
            DbError::NotCommentAuthor { .. } => ErrorKind::NotAuthorized,
            DbError::EmailTaken(_) | DbError::Modified { .. } | DbError::Duplicate(_) => {
                ErrorKind::Conflict
            }
            DbError::InvalidFilter(_) | DbError::InvalidPage(_) => ErrorKind::InvalidParameter,
            DbError::Store(_) => ErrorKind::Internal,
        }
    }
}

impl From<StoreError> for DbError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::VersionConflict { entity, id, .. } => Self::Modified { entity, id },
            StoreError::UniqueViolation(constraint) => Self::Duplicate(constraint),
            StoreError::MissingReference(constraint) => Self::MissingReference(constraint),
            error => Self::Store(error),
        }
    }
}

/// Runs every operation in exactly one transaction of the wrapped store.
#[derive(Debug)]
pub struct DbClient<S> {
    store: S,
    page_size: u32,
}

impl<S: Store> DbClient<S> {
    /// Page sizes outside `1..=100` are replaced by the default of 10.
    #[must_use]
    pub fn new(store: S, page_size: u32) -> Self {
        let page_size = if PageRequest::new(0, i64::from(page_size)).is_ok() {
            page_size
        } else {
            DEFAULT_PAGE_SIZE
        };

        Self { store, page_size }
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    #[must_use]
    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    async fn read(&self) -> Result<S::Transaction> {
        Ok(self.store.begin(AccessMode::ReadOnly).await?)
    }

    async fn write(&self) -> Result<S::Transaction> {
        Ok(self.store.begin(AccessMode::ReadWrite).await?)
    }

    async fn user_id(tx: &mut S::Transaction, email: &Email) -> Result<Id<UserMarker>> {
        tx.fetch_user_by_email(email)
            .await?
            .map(|user| user.id)
            .ok_or_else(|| DbError::UserNotFound(email.clone()))
    }

    /// Validates the raw paging arguments before any storage access.
    async fn list<V: Listing>(
        &self,
        filter: &Filter<V::Marker>,
        order: Order,
        page_index: i64,
        known: Option<i64>,
        search_mode: bool,
    ) -> Result<Page<V>> {
        let page = PageRequest::new(page_index, i64::from(self.page_size))?;
        let known_total = known_total(known)?;

        let mut tx = self.read().await?;
        let page = paginate(
            &mut tx,
            &PageQuery {
                filter,
                order,
                page,
                known_total,
                search_mode,
            },
        )
        .await?;
        tx.commit().await?;

        Ok(page)
    }
}
