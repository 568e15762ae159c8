//! An in-process store for tests and local development.
//!
//! Every transaction works on a snapshot taken at `begin`. Writes are applied
//! to the snapshot right away and replayed against the shared state on commit,
//! where versions, unique emails and references are checked again; the first
//! committer wins.

use crate::{
    filter::{EntityKind, Predicate},
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
        post::{Post, PostContent, PostMarker, PostTitle},
        user::{Author, CreateUser, Email, UpdateUser, User, UserMarker, Username},
    },
    snowflake::{ProcessId, WorkerId},
};
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Arc, Mutex, PoisonError},
};
use time::UtcDateTime;

#[derive(Clone, Debug)]
struct UserRow {
    username: Username,
    email: Email,
    version: Version,
    created_at: UtcDateTime,
    updated_at: UtcDateTime,
}

#[derive(Clone, Debug)]
struct PostRow {
    author_id: u64,
    title: PostTitle,
    content: String,
    version: Version,
    created_at: UtcDateTime,
    updated_at: UtcDateTime,
}

#[derive(Clone, Debug)]
struct CommentRow {
    post_id: u64,
    author_id: u64,
    parent_id: Option<u64>,
    content: String,
    version: Version,
    created_at: UtcDateTime,
    updated_at: UtcDateTime,
}

#[derive(Clone, Debug)]
enum Write {
    InsertUser(u64, UserRow),
    InsertPost(u64, PostRow),
    InsertComment(u64, CommentRow),
    UpdatePost {
        id: u64,
        expected: Version,
        post: PostContent,
        at: UtcDateTime,
    },
    UpdateComment {
        id: u64,
        expected: Version,
        content: String,
        at: UtcDateTime,
    },
    UpdateUser {
        id: u64,
        expected: Version,
        user: UpdateUser,
        at: UtcDateTime,
    },
    DeletePost(u64),
    DeleteComment(u64),
    DeleteUser(u64),
}

#[derive(Clone, Debug, Default)]
struct MemoryState {
    users: BTreeMap<u64, UserRow>,
    posts: BTreeMap<u64, PostRow>,
    comments: BTreeMap<u64, CommentRow>,
}

fn conflict(entity: EntityKind, id: u64, expected: Version) -> StoreError {
    StoreError::VersionConflict {
        entity,
        id,
        expected,
    }
}

impl MemoryState {
    fn apply(&mut self, write: &Write) -> Result<()> {
        match write {
            Write::InsertUser(id, row) => {
                self.ensure_email_free(&row.email, None)?;
                self.users.insert(*id, row.clone());
            }
            Write::InsertPost(id, row) => {
                self.ensure_user(row.author_id)?;
                self.posts.insert(*id, row.clone());
            }
            Write::InsertComment(id, row) => {
                if !self.posts.contains_key(&row.post_id) {
                    return Err(StoreError::MissingReference(format!(
                        "posts.post_id = {}",
                        row.post_id
                    )));
                }
                self.ensure_user(row.author_id)?;
                if let Some(parent_id) = row.parent_id
                    && !self.comments.contains_key(&parent_id)
                {
                    return Err(StoreError::MissingReference(format!(
                        "comments.comment_id = {parent_id}"
                    )));
                }
                self.comments.insert(*id, row.clone());
            }
            Write::UpdatePost {
                id,
                expected,
                post,
                at,
            } => {
                let row = self
                    .posts
                    .get_mut(id)
                    .filter(|row| row.version == *expected)
                    .ok_or_else(|| conflict(EntityKind::Post, *id, *expected))?;
                row.title = post.title.clone();
                row.content.clone_from(&post.content);
                row.version = row.version.next();
                row.updated_at = *at;
            }
            Write::UpdateComment {
                id,
                expected,
                content,
                at,
            } => {
                let row = self
                    .comments
                    .get_mut(id)
                    .filter(|row| row.version == *expected)
                    .ok_or_else(|| conflict(EntityKind::Comment, *id, *expected))?;
                row.content.clone_from(content);
                row.version = row.version.next();
                row.updated_at = *at;
            }
            Write::UpdateUser {
                id,
                expected,
                user,
                at,
            } => {
                self.ensure_email_free(&user.email, Some(*id))?;
                let row = self
                    .users
                    .get_mut(id)
                    .filter(|row| row.version == *expected)
                    .ok_or_else(|| conflict(EntityKind::User, *id, *expected))?;
                row.username = user.username.clone();
                row.email = user.email.clone();
                row.version = row.version.next();
                row.updated_at = *at;
            }
            Write::DeletePost(id) => self.delete_posts(&BTreeSet::from([*id])),
            Write::DeleteComment(id) => self.delete_comments(BTreeSet::from([*id])),
            Write::DeleteUser(id) => {
                self.users.remove(id);
                let posts = self
                    .posts
                    .iter()
                    .filter(|(_, row)| row.author_id == *id)
                    .map(|(post_id, _)| *post_id)
                    .collect();
                self.delete_posts(&posts);
                let comments = self
                    .comments
                    .iter()
                    .filter(|(_, row)| row.author_id == *id)
                    .map(|(comment_id, _)| *comment_id)
                    .collect();
                self.delete_comments(comments);
            }
        }
        Ok(())
    }

    fn ensure_user(&self, id: u64) -> Result<()> {
        if self.users.contains_key(&id) {
            Ok(())
        } else {
            Err(StoreError::MissingReference(format!("users.user_id = {id}")))
        }
    }

    fn ensure_email_free(&self, email: &Email, owner: Option<u64>) -> Result<()> {
        let taken = self
            .users
            .iter()
            .any(|(id, row)| row.email == *email && Some(*id) != owner);
        if taken {
            Err(StoreError::UniqueViolation(format!("users.email = {email}")))
        } else {
            Ok(())
        }
    }

    fn delete_posts(&mut self, post_ids: &BTreeSet<u64>) {
        self.posts.retain(|id, _| !post_ids.contains(id));
        let comments = self
            .comments
            .iter()
            .filter(|(_, row)| post_ids.contains(&row.post_id))
            .map(|(id, _)| *id)
            .collect();
        self.delete_comments(comments);
    }

    /// Deletes the given comments and every reply below them.
    fn delete_comments(&mut self, mut doomed: BTreeSet<u64>) {
        loop {
            let replies: Vec<u64> = self
                .comments
                .iter()
                .filter(|(id, row)| {
                    !doomed.contains(id) && row.parent_id.is_some_and(|p| doomed.contains(&p))
                })
                .map(|(id, _)| *id)
                .collect();
            if replies.is_empty() {
                break;
            }
            doomed.extend(replies);
        }
        self.comments.retain(|id, _| !doomed.contains(id));
    }

    fn author(&self, id: u64) -> Option<Author> {
        self.users.get(&id).map(|row| Author {
            id: id.into(),
            username: row.username.clone(),
            email: row.email.clone(),
        })
    }

    fn post(&self, id: u64) -> Option<Post> {
        let row = self.posts.get(&id)?;
        Some(Post {
            id: id.into(),
            author: self.author(row.author_id)?,
            title: row.title.clone(),
            content: row.content.clone(),
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }

    fn comment(&self, id: u64) -> Option<Comment> {
        let row = self.comments.get(&id)?;
        Some(Comment {
            id: id.into(),
            post_id: row.post_id.into(),
            parent_id: row.parent_id.map(Id::from),
            author: self.author(row.author_id)?,
            content: row.content.clone(),
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }

    fn user(&self, id: u64) -> Option<User> {
        let row = self.users.get(&id)?;
        Some(User {
            id: id.into(),
            username: row.username.clone(),
            email: row.email.clone(),
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }

    fn author_has_email(&self, author_id: u64, email: &Email) -> bool {
        self.users
            .get(&author_id)
            .is_some_and(|row| row.email == *email)
    }

    fn post_matches(&self, row: &PostRow, predicate: &Predicate) -> bool {
        match predicate {
            Predicate::AuthorEmailIs(email) => self.author_has_email(row.author_id, email),
            Predicate::KeywordContains(keyword) => {
                keyword.matches(row.title.get()) || keyword.matches(&row.content)
            }
            Predicate::PostIs(_) | Predicate::ParentIs(_) | Predicate::ParentIsNull => false,
        }
    }

    fn comment_matches(&self, row: &CommentRow, predicate: &Predicate) -> bool {
        match predicate {
            Predicate::PostIs(post_id) => row.post_id == u64::from(*post_id),
            Predicate::ParentIs(parent_id) => row.parent_id == Some(u64::from(*parent_id)),
            Predicate::ParentIsNull => row.parent_id.is_none(),
            Predicate::AuthorEmailIs(email) => self.author_has_email(row.author_id, email),
            Predicate::KeywordContains(keyword) => keyword.matches(&row.content),
        }
    }

    fn user_matches(row: &UserRow, predicate: &Predicate) -> bool {
        match predicate {
            Predicate::KeywordContains(keyword) => keyword.matches(row.username.get()),
            _ => false,
        }
    }

    /// Ids and creation times of all rows matching every predicate.
    fn candidates(&self, entity: EntityKind, predicates: &[Predicate]) -> Vec<(u64, UtcDateTime)> {
        match entity {
            EntityKind::Post => self
                .posts
                .iter()
                .filter(|(_, row)| predicates.iter().all(|p| self.post_matches(row, p)))
                .map(|(id, row)| (*id, row.created_at))
                .collect(),
            EntityKind::Comment => self
                .comments
                .iter()
                .filter(|(_, row)| predicates.iter().all(|p| self.comment_matches(row, p)))
                .map(|(id, row)| (*id, row.created_at))
                .collect(),
            EntityKind::User => self
                .users
                .iter()
                .filter(|(_, row)| predicates.iter().all(|p| Self::user_matches(row, p)))
                .map(|(id, row)| (*id, row.created_at))
                .collect(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    ids: IdSource,
}

impl MemoryStore {
    #[must_use]
    pub fn new(worker_id: WorkerId, process_id: ProcessId) -> Self {
        Self {
            state: Arc::default(),
            ids: IdSource::new(worker_id, process_id),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(WorkerId::default(), ProcessId::default())
    }
}

pub struct MemoryTransaction {
    shared: Arc<Mutex<MemoryState>>,
    snapshot: MemoryState,
    pending: Vec<Write>,
    mode: AccessMode,
    ids: IdSource,
}

impl MemoryTransaction {
    fn stage(&mut self, write: Write) -> Result<()> {
        if self.mode == AccessMode::ReadOnly {
            return Err(StoreError::ReadOnly);
        }
        self.snapshot.apply(&write)?;
        self.pending.push(write);
        Ok(())
    }

    /// Drops vanished ids, like `WHERE id = ANY(...)` would.
    fn hydrate<Marker, T>(ids: &[Id<Marker>], row: impl Fn(u64) -> Option<T>) -> Vec<T> {
        ids.iter().filter_map(|id| row(u64::from(*id))).collect()
    }
}

#[async_trait]
impl Store for MemoryStore {
    type Transaction = MemoryTransaction;

    async fn begin(&self, mode: AccessMode) -> Result<MemoryTransaction> {
        let snapshot = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        Ok(MemoryTransaction {
            shared: Arc::clone(&self.state),
            snapshot,
            pending: Vec::new(),
            mode,
            ids: self.ids.clone(),
        })
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn select_keys(&mut self, query: &KeyQuery<'_>) -> Result<Vec<u64>> {
        let mut candidates = self.snapshot.candidates(query.entity, query.predicates);

        candidates.sort_by(|(id_a, created_a), (id_b, created_b)| {
            let primary = match query.order.key {
                OrderKey::Id => id_a.cmp(id_b),
                OrderKey::CreatedAt => created_a.cmp(created_b),
            };
            let primary = match query.order.direction {
                Direction::Ascending => primary,
                Direction::Descending => primary.reverse(),
            };
            primary.then_with(|| id_b.cmp(id_a))
        });

        let offset = usize::try_from(query.offset).unwrap_or(usize::MAX);
        let limit = usize::try_from(query.limit).unwrap_or(usize::MAX);
        Ok(candidates
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|(id, _)| id)
            .collect())
    }

    async fn count(&mut self, entity: EntityKind, predicates: &[Predicate]) -> Result<u64> {
        let count = self.snapshot.candidates(entity, predicates).len();
        Ok(u64::try_from(count).unwrap_or(u64::MAX))
    }

    async fn hydrate_posts(&mut self, ids: &[Id<PostMarker>]) -> Result<Vec<Post>> {
        Ok(Self::hydrate(ids, |id| self.snapshot.post(id)))
    }

    async fn hydrate_comments(&mut self, ids: &[Id<CommentMarker>]) -> Result<Vec<Comment>> {
        Ok(Self::hydrate(ids, |id| self.snapshot.comment(id)))
    }

    async fn hydrate_users(&mut self, ids: &[Id<UserMarker>]) -> Result<Vec<User>> {
        Ok(Self::hydrate(ids, |id| self.snapshot.user(id)))
    }

    async fn fetch_post(&mut self, id: Id<PostMarker>) -> Result<Option<Post>> {
        Ok(self.snapshot.post(id.into()))
    }

    async fn fetch_comment(&mut self, id: Id<CommentMarker>) -> Result<Option<Comment>> {
        Ok(self.snapshot.comment(id.into()))
    }

    async fn fetch_user_by_email(&mut self, email: &Email) -> Result<Option<User>> {
        let id = self
            .snapshot
            .users
            .iter()
            .find(|(_, row)| row.email == *email)
            .map(|(id, _)| *id);
        Ok(id.and_then(|id| self.snapshot.user(id)))
    }

    async fn insert_user(&mut self, user: &CreateUser) -> Result<Id<UserMarker>> {
        let id: Id<UserMarker> = self.ids.next();
        let now = UtcDateTime::now();
        self.stage(Write::InsertUser(
            id.into(),
            UserRow {
                username: user.username.clone(),
                email: user.email.clone(),
                version: Version::default(),
                created_at: now,
                updated_at: now,
            },
        ))?;
        Ok(id)
    }

    async fn insert_post(
        &mut self,
        author: Id<UserMarker>,
        post: &PostContent,
    ) -> Result<Id<PostMarker>> {
        let id: Id<PostMarker> = self.ids.next();
        let now = UtcDateTime::now();
        self.stage(Write::InsertPost(
            id.into(),
            PostRow {
                author_id: author.into(),
                title: post.title.clone(),
                content: post.content.clone(),
                version: Version::default(),
                created_at: now,
                updated_at: now,
            },
        ))?;
        Ok(id)
    }

    async fn insert_comment(
        &mut self,
        author: Id<UserMarker>,
        comment: &CreateComment,
    ) -> Result<Id<CommentMarker>> {
        let id: Id<CommentMarker> = self.ids.next();
        let now = UtcDateTime::now();
        self.stage(Write::InsertComment(
            id.into(),
            CommentRow {
                post_id: comment.post_id.into(),
                author_id: author.into(),
                parent_id: comment.parent_id.map(u64::from),
                content: comment.content.clone(),
                version: Version::default(),
                created_at: now,
                updated_at: now,
            },
        ))?;
        Ok(id)
    }

    async fn update_post(
        &mut self,
        id: Id<PostMarker>,
        expected: Version,
        post: &PostContent,
    ) -> Result<()> {
        self.stage(Write::UpdatePost {
            id: id.into(),
            expected,
            post: post.clone(),
            at: UtcDateTime::now(),
        })
    }

    async fn update_comment(
        &mut self,
        id: Id<CommentMarker>,
        expected: Version,
        content: &str,
    ) -> Result<()> {
        self.stage(Write::UpdateComment {
            id: id.into(),
            expected,
            content: content.to_owned(),
            at: UtcDateTime::now(),
        })
    }

    async fn update_user(
        &mut self,
        id: Id<UserMarker>,
        expected: Version,
        user: &UpdateUser,
    ) -> Result<()> {
        self.stage(Write::UpdateUser {
            id: id.into(),
            expected,
            user: user.clone(),
            at: UtcDateTime::now(),
        })
    }

    async fn delete_post(&mut self, id: Id<PostMarker>) -> Result<()> {
        self.stage(Write::DeletePost(id.into()))
    }

    async fn delete_comment(&mut self, id: Id<CommentMarker>) -> Result<()> {
        self.stage(Write::DeleteComment(id.into()))
    }

    async fn delete_user(&mut self, id: Id<UserMarker>) -> Result<()> {
        self.stage(Write::DeleteUser(id.into()))
    }

    async fn commit(self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let mut shared = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = shared.clone();
        for write in &self.pending {
            next.apply(write)?;
        }
        *shared = next;
        Ok(())
    }
}

