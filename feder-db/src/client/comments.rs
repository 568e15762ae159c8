use crate::{
    client::{DbClient, DbError, Result},
    filter::{EntityKind, Filter},
    store::{Order, Store, Transaction},
};
use feder_common::model::{
    Id,
    comment::{Comment, CommentMarker, CreateComment},
    page::Page,
    post::PostMarker,
    user::Email,
};
use tracing::{debug, instrument};

impl<S: Store> DbClient<S> {
    /// Loads a comment and checks that `acting_email` wrote it.
    async fn owned_comment(
        tx: &mut S::Transaction,
        comment_id: Id<CommentMarker>,
        acting_email: &Email,
    ) -> Result<Comment> {
        let comment = tx
            .fetch_comment(comment_id)
            .await?
            .ok_or(DbError::CommentNotFound(comment_id))?;

        if comment.author.email != *acting_email {
            return Err(DbError::NotCommentAuthor {
                comment: comment_id,
                acting: acting_email.clone(),
            });
        }
        Ok(comment)
    }

    /// A reply's parent has to be a comment on the same post.
    #[instrument(skip(self, comment), fields(post_id = %comment.post_id, parent_id = ?comment.parent_id))]
    pub async fn create_comment(
        &self,
        author_email: &Email,
        comment: &CreateComment,
    ) -> Result<Id<CommentMarker>> {
        let mut tx = self.write().await?;

        if tx.fetch_post(comment.post_id).await?.is_none() {
            return Err(DbError::PostNotFound(comment.post_id));
        }
        let author = Self::user_id(&mut tx, author_email).await?;

        if let Some(parent_id) = comment.parent_id {
            let parent = tx.fetch_comment(parent_id).await?;
            if parent.is_none_or(|parent| parent.post_id != comment.post_id) {
                return Err(DbError::ParentNotFound {
                    post: comment.post_id,
                    parent: parent_id,
                });
            }
        }

        let comment_id = tx.insert_comment(author, comment).await?;
        tx.commit().await?;

        debug!(%comment_id, "Created comment");
        Ok(comment_id)
    }

    #[instrument(skip(self, content))]
    pub async fn update_comment(
        &self,
        comment_id: Id<CommentMarker>,
        content: &str,
        acting_email: &Email,
    ) -> Result<()> {
        let mut tx = self.write().await?;
        let current = Self::owned_comment(&mut tx, comment_id, acting_email).await?;
        tx.update_comment(comment_id, current.version, content).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Removes the comment together with every reply below it.
    #[instrument(skip(self))]
    pub async fn delete_comment(
        &self,
        comment_id: Id<CommentMarker>,
        acting_email: &Email,
    ) -> Result<()> {
        let mut tx = self.write().await?;
        Self::owned_comment(&mut tx, comment_id, acting_email).await?;
        tx.delete_comment(comment_id).await?;
        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn list_top_level_comments(
        &self,
        post_id: Id<PostMarker>,
        page_index: i64,
        known_total: Option<i64>,
    ) -> Result<Page<Comment>> {
        let filter = Filter::top_level(post_id);
        self.list(&filter, Order::NEWEST_FIRST, page_index, known_total, false)
            .await
    }

    #[instrument(skip(self))]
    pub async fn list_replies(
        &self,
        parent_id: Id<CommentMarker>,
        page_index: i64,
        known_total: Option<i64>,
    ) -> Result<Page<Comment>> {
        let filter = Filter::replies(parent_id);
        self.list(&filter, Order::NEWEST_FIRST, page_index, known_total, false)
            .await
    }

    /// Zero for posts that do not exist.
    #[instrument(skip(self))]
    pub async fn count_top_level(&self, post_id: Id<PostMarker>) -> Result<u64> {
        self.count_comments(&Filter::top_level(post_id)).await
    }

    #[instrument(skip(self))]
    pub async fn count_replies(&self, parent_id: Id<CommentMarker>) -> Result<u64> {
        self.count_comments(&Filter::replies(parent_id)).await
    }

    async fn count_comments(&self, filter: &Filter<CommentMarker>) -> Result<u64> {
        let mut tx = self.read().await?;
        let count = tx.count(EntityKind::Comment, filter.predicates()).await?;
        tx.commit().await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        client::{
            DbClient, DbError, ErrorKind,
            tests::{client_with_users, email},
        },
        store::{AccessMode, Store, Transaction, memory::MemoryStore},
    };
    use feder_common::model::{
        Id,
        comment::{CommentMarker, CreateComment},
        post::{PostContent, PostMarker, PostTitle},
    };

    async fn post(client: &DbClient<MemoryStore>, author: &str) -> Id<PostMarker> {
        client
            .create_post(
                &email(author),
                &PostContent {
                    title: PostTitle::new("hello".to_owned()).unwrap(),
                    content: "world".to_owned(),
                },
            )
            .await
            .unwrap()
    }

    async fn comment(
        client: &DbClient<MemoryStore>,
        author: &str,
        post_id: Id<PostMarker>,
        parent_id: Option<Id<CommentMarker>>,
        content: &str,
    ) -> Id<CommentMarker> {
        client
            .create_comment(
                &email(author),
                &CreateComment {
                    post_id,
                    content: content.to_owned(),
                    parent_id,
                },
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn top_level_and_replies_are_separate() {
        let client = client_with_users(&["a@x.io", "b@x.io"]).await;
        let post_id = post(&client, "a@x.io").await;

        let c1 = comment(&client, "a@x.io", post_id, None, "first").await;
        let c2 = comment(&client, "b@x.io", post_id, None, "second").await;
        let r1 = comment(&client, "b@x.io", post_id, Some(c1), "reply").await;
        let r2 = comment(&client, "a@x.io", post_id, Some(r1), "nested").await;

        let top = client.list_top_level_comments(post_id, 0, None).await.unwrap();
        let top_ids: Vec<_> = top.items.iter().map(|comment| comment.id).collect();
        assert_eq!(top_ids, [c2, c1]);
        assert_eq!(top.total, 2);
        assert!(top.items.iter().all(|comment| !comment.is_reply()));

        let replies = client.list_replies(c1, 0, None).await.unwrap();
        assert_eq!(replies.items.len(), 1);
        assert_eq!(replies.items[0].id, r1);
        assert_eq!(replies.items[0].parent_id, Some(c1));
        assert_eq!(replies.items[0].author.email, email("b@x.io"));

        let nested = client.list_replies(r1, 0, None).await.unwrap();
        assert_eq!(nested.items[0].id, r2);

        assert!(client.list_replies(c2, 0, None).await.unwrap().items.is_empty());
        assert_eq!(client.count_top_level(post_id).await.unwrap(), 2);
        assert_eq!(client.count_replies(c1).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn newest_comments_and_replies_come_first() {
        let client = client_with_users(&["a@x.io"]).await;
        let post_id = post(&client, "a@x.io").await;

        let mut created = Vec::new();
        for content in ["c5", "c4", "c3", "c2", "c1"] {
            created.push(comment(&client, "a@x.io", post_id, None, content).await);
        }
        let first = client.list_top_level_comments(post_id, 0, None).await.unwrap();
        let contents: Vec<_> = first.items.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(contents, ["c1", "c2", "c3", "c4", "c5"]);

        let again = client.list_top_level_comments(post_id, 0, None).await.unwrap();
        assert_eq!(again, first);

        let c1 = created[4];
        for content in ["r1", "r2", "r3"] {
            comment(&client, "a@x.io", post_id, Some(c1), content).await;
        }
        let replies = client.list_replies(c1, 0, None).await.unwrap();
        let contents: Vec<_> = replies.items.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(contents, ["r3", "r2", "r1"]);
        assert_eq!(replies.total, 3);
    }

    #[tokio::test]
    async fn deleting_a_post_removes_its_comments() {
        let client = client_with_users(&["a@x.io"]).await;
        let post_id = post(&client, "a@x.io").await;
        for content in ["one", "two", "three"] {
            comment(&client, "a@x.io", post_id, None, content).await;
        }
        assert_eq!(client.count_top_level(post_id).await.unwrap(), 3);

        client.delete_post(post_id).await.unwrap();

        assert_eq!(client.count_top_level(post_id).await.unwrap(), 0);
        let page = client.list_top_level_comments(post_id, 0, None).await.unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.total, 0);
    }

    #[tokio::test]
    async fn comment_listing_uses_trusted_total_or_exact_count() {
        let client = client_with_users(&["a@x.io"]).await;
        let post_id = post(&client, "a@x.io").await;
        for n in 0..12 {
            comment(&client, "a@x.io", post_id, None, &format!("c{n}")).await;
        }

        let second = client.list_top_level_comments(post_id, 1, None).await.unwrap();
        assert_eq!(second.items.len(), 2);
        assert_eq!(second.total, 12);
        assert_eq!(second.items[1].content, "c0");

        let trusted = client
            .list_top_level_comments(post_id, 0, Some(99))
            .await
            .unwrap();
        assert_eq!(trusted.items.len(), 10);
        assert_eq!(trusted.total, 99);

        let beyond = client
            .list_top_level_comments(post_id, 5, Some(99))
            .await
            .unwrap();
        assert!(beyond.items.is_empty());
        assert_eq!(beyond.total, 0);
    }

    #[tokio::test]
    async fn missing_references_are_not_found() {
        let client = client_with_users(&["a@x.io"]).await;
        let post_id = post(&client, "a@x.io").await;
        let other_post = post(&client, "a@x.io").await;
        let foreign = comment(&client, "a@x.io", other_post, None, "elsewhere").await;

        let create = |author: &'static str,
                      post_id: Id<PostMarker>,
                      parent_id: Option<Id<CommentMarker>>| {
            let client = &client;
            async move {
                client
                    .create_comment(
                        &email(author),
                        &CreateComment {
                            post_id,
                            content: "x".to_owned(),
                            parent_id,
                        },
                    )
                    .await
            }
        };

        assert!(matches!(
            create("a@x.io", 1_u64.into(), None).await,
            Err(DbError::PostNotFound(_))
        ));
        assert!(matches!(
            create("ghost@x.io", post_id, None).await,
            Err(DbError::UserNotFound(_))
        ));
        assert!(matches!(
            create("a@x.io", post_id, Some(2_u64.into())).await,
            Err(DbError::ParentNotFound { .. })
        ));
        assert!(matches!(
            create("a@x.io", post_id, Some(foreign)).await,
            Err(DbError::ParentNotFound { parent, .. }) if parent == foreign
        ));
        assert_eq!(client.count_top_level(post_id).await.unwrap(), 0);
        assert_eq!(client.count_top_level(1_u64.into()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn only_the_author_may_change_a_comment() {
        let client = client_with_users(&["a@x.io", "b@x.io"]).await;
        let post_id = post(&client, "a@x.io").await;
        let comment_id = comment(&client, "a@x.io", post_id, None, "mine").await;

        let error = client
            .update_comment(comment_id, "hijacked", &email("b@x.io"))
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::NotAuthorized);
        assert!(matches!(
            client.delete_comment(comment_id, &email("b@x.io")).await,
            Err(DbError::NotCommentAuthor { .. })
        ));

        let page = client.list_top_level_comments(post_id, 0, None).await.unwrap();
        assert_eq!(page.items[0].content, "mine");
        assert_eq!(page.items[0].version.get(), 0);

        client
            .update_comment(comment_id, "edited", &email("a@x.io"))
            .await
            .unwrap();
        let page = client.list_top_level_comments(post_id, 0, None).await.unwrap();
        assert_eq!(page.items[0].content, "edited");
        assert_eq!(page.items[0].version.get(), 1);

        assert!(matches!(
            client.update_comment(2_u64.into(), "x", &email("a@x.io")).await,
            Err(DbError::CommentNotFound(_))
        ));
    }

    #[tokio::test]
    async fn deleting_cascades_to_replies() {
        let client = client_with_users(&["a@x.io", "b@x.io"]).await;
        let post_id = post(&client, "a@x.io").await;
        let root = comment(&client, "a@x.io", post_id, None, "root").await;
        let reply = comment(&client, "b@x.io", post_id, Some(root), "reply").await;
        comment(&client, "a@x.io", post_id, Some(reply), "deeper").await;
        let keep = comment(&client, "b@x.io", post_id, None, "keep").await;

        client.delete_comment(root, &email("a@x.io")).await.unwrap();

        assert_eq!(client.count_replies(root).await.unwrap(), 0);
        assert_eq!(client.count_replies(reply).await.unwrap(), 0);
        let top = client.list_top_level_comments(post_id, 0, None).await.unwrap();
        assert_eq!(top.items.len(), 1);
        assert_eq!(top.items[0].id, keep);

        client.delete_post(post_id).await.unwrap();
        assert_eq!(client.count_top_level(post_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn stale_version_is_a_conflict() {
        let client = client_with_users(&["a@x.io"]).await;
        let post_id = post(&client, "a@x.io").await;
        let comment_id = comment(&client, "a@x.io", post_id, None, "v0").await;
        let store = client.store();

        let mut first = store.begin(AccessMode::ReadWrite).await.unwrap();
        let mut second = store.begin(AccessMode::ReadWrite).await.unwrap();
        let seen = first.fetch_comment(comment_id).await.unwrap().unwrap().version;
        assert_eq!(second.fetch_comment(comment_id).await.unwrap().unwrap().version, seen);

        first.update_comment(comment_id, seen, "from first").await.unwrap();
        first.commit().await.unwrap();

        let error = match second.update_comment(comment_id, seen, "from second").await {
            Ok(()) => second.commit().await.unwrap_err(),
            Err(error) => error,
        };
        let error = DbError::from(error);
        assert_eq!(error.kind(), ErrorKind::Conflict);

        let page = client.list_top_level_comments(post_id, 0, None).await.unwrap();
        assert_eq!(page.items[0].content, "from first");
        assert_eq!(page.items[0].version.get(), 1);
    }
}
