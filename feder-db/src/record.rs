use feder_common::model::{
    Id, ModelValidationError, Version,
    comment::Comment,
    post::{Post, PostTitle},
    user::{Author, Email, User, Username},
};
use sqlx::FromRow;
use time::PrimitiveDateTime;

#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct UserRecord {
    pub user_id: i64,
    pub username: String,
    pub email: String,
    pub version: i64,
    pub created_at: PrimitiveDateTime,
    pub updated_at: PrimitiveDateTime,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct FullPostRecord {
    pub post_id: i64,
    pub title: String,
    pub content: String,
    pub version: i64,
    pub created_at: PrimitiveDateTime,
    pub updated_at: PrimitiveDateTime,
    pub user_id: i64,
    pub username: String,
    pub email: String,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct FullCommentRecord {
    pub comment_id: i64,
    pub post_id: i64,
    pub parent_id: Option<i64>,
    pub content: String,
    pub version: i64,
    pub created_at: PrimitiveDateTime,
    pub updated_at: PrimitiveDateTime,
    pub user_id: i64,
    pub username: String,
    pub email: String,
}

fn author(user_id: i64, username: String, email: String) -> Result<Author, ModelValidationError> {
    Ok(Author {
        id: Id::from_db(user_id),
        username: Username::new(username)?,
        email: Email::new(email)?,
    })
}

impl TryFrom<UserRecord> for User {
    type Error = ModelValidationError;

    fn try_from(value: UserRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: Id::from_db(value.user_id),
            username: Username::new(value.username)?,
            email: Email::new(value.email)?,
            version: Version::new(value.version.cast_unsigned()),
            created_at: value.created_at.as_utc(),
            updated_at: value.updated_at.as_utc(),
        })
    }
}

impl TryFrom<FullPostRecord> for Post {
    type Error = ModelValidationError;

    fn try_from(value: FullPostRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: Id::from_db(value.post_id),
            author: author(value.user_id, value.username, value.email)?,
            title: PostTitle::new(value.title)?,
            content: value.content,
            version: Version::new(value.version.cast_unsigned()),
            created_at: value.created_at.as_utc(),
            updated_at: value.updated_at.as_utc(),
        })
    }
}

impl TryFrom<FullCommentRecord> for Comment {
    type Error = ModelValidationError;

    fn try_from(value: FullCommentRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: Id::from_db(value.comment_id),
            post_id: Id::from_db(value.post_id),
            parent_id: value.parent_id.map(Id::from_db),
            author: author(value.user_id, value.username, value.email)?,
            content: value.content,
            version: Version::new(value.version.cast_unsigned()),
            created_at: value.created_at.as_utc(),
            updated_at: value.updated_at.as_utc(),
        })
    }
}
