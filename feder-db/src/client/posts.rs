use crate::{
    client::{DbClient, DbError, Result},
    filter::FilterRequest,
    store::{Order, Store, Transaction},
};
use feder_common::model::{
    Id,
    page::Page,
    post::{Post, PostContent, PostMarker},
    user::Email,
};
use tracing::{debug, instrument};

impl<S: Store> DbClient<S> {
    #[instrument(skip(self, post), fields(title = post.title.get()))]
    pub async fn create_post(
        &self,
        author_email: &Email,
        post: &PostContent,
    ) -> Result<Id<PostMarker>> {
        let mut tx = self.write().await?;
        let author = Self::user_id(&mut tx, author_email).await?;
        let post_id = tx.insert_post(author, post).await?;
        tx.commit().await?;

        debug!(%post_id, "Created post");
        Ok(post_id)
    }

    /// Replaces title and content, provided nobody else changed the post since it was read.
    #[instrument(skip(self, post))]
    pub async fn update_post(&self, post_id: Id<PostMarker>, post: &PostContent) -> Result<()> {
        let mut tx = self.write().await?;
        let current = tx
            .fetch_post(post_id)
            .await?
            .ok_or(DbError::PostNotFound(post_id))?;
        tx.update_post(post_id, current.version, post).await?;
        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn delete_post(&self, post_id: Id<PostMarker>) -> Result<()> {
        let mut tx = self.write().await?;
        if tx.fetch_post(post_id).await?.is_none() {
            return Err(DbError::PostNotFound(post_id));
        }
        tx.delete_post(post_id).await?;
        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn get_post(&self, post_id: Id<PostMarker>) -> Result<Post> {
        let mut tx = self.read().await?;
        let post = tx.fetch_post(post_id).await?;
        tx.commit().await?;
        post.ok_or(DbError::PostNotFound(post_id))
    }

    #[instrument(skip(self))]
    pub async fn list_posts(
        &self,
        search_mode: bool,
        keyword: Option<&str>,
        page_index: i64,
        known_total: Option<i64>,
    ) -> Result<Page<Post>> {
        let filter = FilterRequest {
            keyword: keyword.map(str::to_owned),
            ..FilterRequest::default()
        }
        .build::<PostMarker>()?;

        self.list(&filter, Order::HIGHEST_ID_FIRST, page_index, known_total, search_mode)
            .await
    }

    /// Posts of one author. An unknown email simply yields an empty page.
    #[instrument(skip(self))]
    pub async fn list_posts_by_author(
        &self,
        search_mode: bool,
        author_email: &Email,
        keyword: Option<&str>,
        page_index: i64,
        known_total: Option<i64>,
    ) -> Result<Page<Post>> {
        let filter = FilterRequest {
            author_email: Some(author_email.clone()),
            keyword: keyword.map(str::to_owned),
            ..FilterRequest::default()
        }
        .build::<PostMarker>()?;

        self.list(&filter, Order::HIGHEST_ID_FIRST, page_index, known_total, search_mode)
            .await
    }
}
