use crate::{
    filter::{EntityKind, Predicate},
    record::{FullCommentRecord, FullPostRecord, UserRecord},
    store::{
        AccessMode, Direction, IdSource, KeyQuery, OrderKey, Result, Store, StoreError,
        Transaction,
    },
};
use async_trait::async_trait;
use feder_common::{
    model::{
        Id, Version,
        comment::{Comment, CommentMarker, CreateComment},
        post::{Post, PostContent, PostMarker},
        user::{CreateUser, Email, UpdateUser, User, UserMarker},
    },
    snowflake::{ProcessId, WorkerId},
};
use sqlx::{PgPool, Postgres, QueryBuilder, postgres::PgQueryResult, query, query_as};
use tracing::trace;

const SELECT_FULL_POST: &str = "
    SELECT
        posts.post_id,
        posts.title,
        posts.content,
        posts.version,
        posts.created_at,
        posts.updated_at,
        users.user_id,
        users.username,
        users.email
    FROM
        posts JOIN users ON users.user_id = posts.author_id
    ";

const SELECT_FULL_COMMENT: &str = "
    SELECT
        comments.comment_id,
        comments.post_id,
        comments.parent_id,
        comments.content,
        comments.version,
        comments.created_at,
        comments.updated_at,
        users.user_id,
        users.username,
        users.email
    FROM
        comments JOIN users ON users.user_id = comments.author_id
    ";

const SELECT_USER: &str = "
    SELECT
        users.user_id,
        users.username,
        users.email,
        users.version,
        users.created_at,
        users.updated_at
    FROM
        users
    ";

/// PostgreSQL backend. Cascading deletes are done by the schema's foreign keys.
#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
    ids: IdSource,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool, worker_id: WorkerId, process_id: ProcessId) -> Self {
        Self {
            pool,
            ids: IdSource::new(worker_id, process_id),
        }
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!().run(&self.pool).await?;
        Ok(())
    }
}

pub struct PgTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
    mode: AccessMode,
    ids: IdSource,
}

#[async_trait]
impl Store for PgStore {
    type Transaction = PgTransaction;

    async fn begin(&self, mode: AccessMode) -> Result<PgTransaction> {
        let mut tx = self.pool.begin().await?;

        let characteristics = match mode {
            AccessMode::ReadOnly => "SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY",
            AccessMode::ReadWrite => "SET TRANSACTION ISOLATION LEVEL READ COMMITTED, READ WRITE",
        };
        query(characteristics).execute(&mut *tx).await?;

        Ok(PgTransaction {
            tx,
            mode,
            ids: self.ids.clone(),
        })
    }
}

fn push_from(builder: &mut QueryBuilder<'_, Postgres>, entity: EntityKind) {
    builder.push(match entity {
        EntityKind::Post => " FROM posts JOIN users ON users.user_id = posts.author_id",
        EntityKind::Comment => " FROM comments JOIN users ON users.user_id = comments.author_id",
        EntityKind::User => " FROM users",
    });
}

fn push_predicate(
    builder: &mut QueryBuilder<'_, Postgres>,
    entity: EntityKind,
    predicate: &Predicate,
) {
    match predicate {
        Predicate::PostIs(post_id) => {
            builder.push("comments.post_id = ").push_bind(post_id.to_db());
        }
        Predicate::ParentIs(parent_id) => {
            builder
                .push("comments.parent_id = ")
                .push_bind(parent_id.to_db());
        }
        Predicate::ParentIsNull => {
            builder.push("comments.parent_id IS NULL");
        }
        Predicate::AuthorEmailIs(email) => {
            builder.push("users.email = ").push_bind(email.get().to_owned());
        }
        Predicate::KeywordContains(keyword) => {
            let pattern = keyword.like_pattern();
            match entity {
                EntityKind::Post => {
                    builder
                        .push("(posts.title ILIKE ")
                        .push_bind(pattern.clone())
                        .push(" ESCAPE '\\' OR posts.content ILIKE ")
                        .push_bind(pattern)
                        .push(" ESCAPE '\\')");
                }
                EntityKind::Comment => {
                    builder
                        .push("comments.content ILIKE ")
                        .push_bind(pattern)
                        .push(" ESCAPE '\\'");
                }
                EntityKind::User => {
                    builder
                        .push("users.username ILIKE ")
                        .push_bind(pattern)
                        .push(" ESCAPE '\\'");
                }
            }
        }
    }
}

fn push_where(
    builder: &mut QueryBuilder<'_, Postgres>,
    entity: EntityKind,
    predicates: &[Predicate],
) {
    for (i, predicate) in predicates.iter().enumerate() {
        builder.push(if i == 0 { " WHERE " } else { " AND " });
        push_predicate(builder, entity, predicate);
    }
}

fn columns(entity: EntityKind) -> (&'static str, &'static str) {
    match entity {
        EntityKind::Post => ("posts.post_id", "posts.created_at"),
        EntityKind::Comment => ("comments.comment_id", "comments.created_at"),
        EntityKind::User => ("users.user_id", "users.created_at"),
    }
}

fn db_ids<Marker>(ids: &[Id<Marker>]) -> Vec<i64> {
    ids.iter().map(|id| id.to_db()).collect()
}

fn expect_one_row(
    result: &PgQueryResult,
    entity: EntityKind,
    id: u64,
    expected: Version,
) -> Result<()> {
    if result.rows_affected() == 0 {
        Err(StoreError::VersionConflict {
            entity,
            id,
            expected,
        })
    } else {
        Ok(())
    }
}

impl PgTransaction {
    fn ensure_writable(&self) -> Result<()> {
        match self.mode {
            AccessMode::ReadOnly => Err(StoreError::ReadOnly),
            AccessMode::ReadWrite => Ok(()),
        }
    }
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn select_keys(&mut self, key_query: &KeyQuery<'_>) -> Result<Vec<u64>> {
        let (id_column, created_at_column) = columns(key_query.entity);

        let mut builder = QueryBuilder::new("SELECT ");
        builder.push(id_column);
        push_from(&mut builder, key_query.entity);
        push_where(&mut builder, key_query.entity, key_query.predicates);

        let direction = match key_query.order.direction {
            Direction::Ascending => " ASC",
            Direction::Descending => " DESC",
        };
        builder.push(" ORDER BY ");
        match key_query.order.key {
            OrderKey::Id => {
                builder.push(id_column).push(direction);
            }
            OrderKey::CreatedAt => {
                builder
                    .push(created_at_column)
                    .push(direction)
                    .push(", ")
                    .push(id_column)
                    .push(" DESC");
            }
        }
        builder
            .push(" LIMIT ")
            .push_bind(i64::from(key_query.limit))
            .push(" OFFSET ")
            .push_bind(i64::try_from(key_query.offset).unwrap_or(i64::MAX));

        trace!(sql = builder.sql(), "Selecting keys");
        let ids = builder
            .build_query_scalar::<i64>()
            .fetch_all(&mut *self.tx)
            .await?;

        Ok(ids.into_iter().map(i64::cast_unsigned).collect())
    }

    async fn count(&mut self, entity: EntityKind, predicates: &[Predicate]) -> Result<u64> {
        let mut builder = QueryBuilder::new("SELECT COUNT(*)");
        push_from(&mut builder, entity);
        push_where(&mut builder, entity, predicates);

        let count = builder
            .build_query_scalar::<i64>()
            .fetch_one(&mut *self.tx)
            .await?;

        Ok(count.cast_unsigned())
    }

    async fn hydrate_posts(&mut self, ids: &[Id<PostMarker>]) -> Result<Vec<Post>> {
        let records = query_as::<_, FullPostRecord>(&format!(
            "{SELECT_FULL_POST} WHERE posts.post_id = ANY($1)"
        ))
        .bind(db_ids(ids))
        .fetch_all(&mut *self.tx)
        .await?;

        let posts = records
            .into_iter()
            .map(Post::try_from)
            .collect::<Result<_, _>>()?;
        Ok(posts)
    }

    async fn hydrate_comments(&mut self, ids: &[Id<CommentMarker>]) -> Result<Vec<Comment>> {
        let records = query_as::<_, FullCommentRecord>(&format!(
            "{SELECT_FULL_COMMENT} WHERE comments.comment_id = ANY($1)"
        ))
        .bind(db_ids(ids))
        .fetch_all(&mut *self.tx)
        .await?;

        let comments = records
            .into_iter()
            .map(Comment::try_from)
            .collect::<Result<_, _>>()?;
        Ok(comments)
    }

    async fn hydrate_users(&mut self, ids: &[Id<UserMarker>]) -> Result<Vec<User>> {
        let records = query_as::<_, UserRecord>(&format!(
            "{SELECT_USER} WHERE users.user_id = ANY($1)"
        ))
        .bind(db_ids(ids))
        .fetch_all(&mut *self.tx)
        .await?;

        let users = records
            .into_iter()
            .map(User::try_from)
            .collect::<Result<_, _>>()?;
        Ok(users)
    }

    async fn fetch_post(&mut self, id: Id<PostMarker>) -> Result<Option<Post>> {
        let record = query_as::<_, FullPostRecord>(&format!(
            "{SELECT_FULL_POST} WHERE posts.post_id = $1"
        ))
        .bind(id.to_db())
        .fetch_optional(&mut *self.tx)
        .await?;

        let post = record.map(Post::try_from).transpose()?;
        Ok(post)
    }

    async fn fetch_comment(&mut self, id: Id<CommentMarker>) -> Result<Option<Comment>> {
        let record = query_as::<_, FullCommentRecord>(&format!(
            "{SELECT_FULL_COMMENT} WHERE comments.comment_id = $1"
        ))
        .bind(id.to_db())
        .fetch_optional(&mut *self.tx)
        .await?;

        let comment = record.map(Comment::try_from).transpose()?;
        Ok(comment)
    }

    async fn fetch_user_by_email(&mut self, email: &Email) -> Result<Option<User>> {
        let record = query_as::<_, UserRecord>(&format!("{SELECT_USER} WHERE users.email = $1"))
            .bind(email.get())
            .fetch_optional(&mut *self.tx)
            .await?;

        let user = record.map(User::try_from).transpose()?;
        Ok(user)
    }

    async fn insert_user(&mut self, user: &CreateUser) -> Result<Id<UserMarker>> {
        self.ensure_writable()?;
        let user_id: Id<UserMarker> = self.ids.next();

        query(
            "
            INSERT INTO users (user_id, username, email)
            VALUES ($1, $2, $3)
            ",
        )
        .bind(user_id.to_db())
        .bind(user.username.get())
        .bind(user.email.get())
        .execute(&mut *self.tx)
        .await?;

        Ok(user_id)
    }

    async fn insert_post(
        &mut self,
        author: Id<UserMarker>,
        post: &PostContent,
    ) -> Result<Id<PostMarker>> {
        self.ensure_writable()?;
        let post_id: Id<PostMarker> = self.ids.next();

        query(
            "
            INSERT INTO posts (post_id, author_id, title, content)
            VALUES ($1, $2, $3, $4)
            ",
        )
        .bind(post_id.to_db())
        .bind(author.to_db())
        .bind(post.title.get())
        .bind(&post.content)
        .execute(&mut *self.tx)
        .await?;

        Ok(post_id)
    }

    async fn insert_comment(
        &mut self,
        author: Id<UserMarker>,
        comment: &CreateComment,
    ) -> Result<Id<CommentMarker>> {
        self.ensure_writable()?;
        let comment_id: Id<CommentMarker> = self.ids.next();

        query(
            "
            INSERT INTO comments (comment_id, post_id, author_id, parent_id, content)
            VALUES ($1, $2, $3, $4, $5)
            ",
        )
        .bind(comment_id.to_db())
        .bind(comment.post_id.to_db())
        .bind(author.to_db())
        .bind(comment.parent_id.map(Id::to_db))
        .bind(&comment.content)
        .execute(&mut *self.tx)
        .await?;

        Ok(comment_id)
    }

    async fn update_post(
        &mut self,
        id: Id<PostMarker>,
        expected: Version,
        post: &PostContent,
    ) -> Result<()> {
        self.ensure_writable()?;

        let result = query(
            "
            UPDATE posts
            SET
                title = $1,
                content = $2,
                version = version + 1,
                updated_at = (now() AT TIME ZONE 'utc')
            WHERE
                post_id = $3 AND version = $4
            ",
        )
        .bind(post.title.get())
        .bind(&post.content)
        .bind(id.to_db())
        .bind(expected.get().cast_signed())
        .execute(&mut *self.tx)
        .await?;

        expect_one_row(&result, EntityKind::Post, id.into(), expected)
    }

    async fn update_comment(
        &mut self,
        id: Id<CommentMarker>,
        expected: Version,
        content: &str,
    ) -> Result<()> {
        self.ensure_writable()?;

        let result = query(
            "
            UPDATE comments
            SET
                content = $1,
                version = version + 1,
                updated_at = (now() AT TIME ZONE 'utc')
            WHERE
                comment_id = $2 AND version = $3
            ",
        )
        .bind(content)
        .bind(id.to_db())
        .bind(expected.get().cast_signed())
        .execute(&mut *self.tx)
        .await?;

        expect_one_row(&result, EntityKind::Comment, id.into(), expected)
    }

    async fn update_user(
        &mut self,
        id: Id<UserMarker>,
        expected: Version,
        user: &UpdateUser,
    ) -> Result<()> {
        self.ensure_writable()?;

        let result = query(
            "
            UPDATE users
            SET
                username = $1,
                email = $2,
                version = version + 1,
                updated_at = (now() AT TIME ZONE 'utc')
            WHERE
                user_id = $3 AND version = $4
            ",
        )
        .bind(user.username.get())
        .bind(user.email.get())
        .bind(id.to_db())
        .bind(expected.get().cast_signed())
        .execute(&mut *self.tx)
        .await?;

        expect_one_row(&result, EntityKind::User, id.into(), expected)
    }

    async fn delete_post(&mut self, id: Id<PostMarker>) -> Result<()> {
        self.ensure_writable()?;
        query("DELETE FROM posts WHERE post_id = $1")
            .bind(id.to_db())
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn delete_comment(&mut self, id: Id<CommentMarker>) -> Result<()> {
        self.ensure_writable()?;
        query("DELETE FROM comments WHERE comment_id = $1")
            .bind(id.to_db())
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn delete_user(&mut self, id: Id<UserMarker>) -> Result<()> {
        self.ensure_writable()?;
        query("DELETE FROM users WHERE user_id = $1")
            .bind(id.to_db())
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
