use crate::{
    client::{DbClient, DbError, Result},
    filter::FilterRequest,
    store::{Order, Store, Transaction},
};
use feder_common::model::{
    Id,
    page::Page,
    user::{CreateUser, Email, UpdateUser, User, UserMarker},
};
use tracing::{debug, instrument};

impl<S: Store> DbClient<S> {
    async fn existing_user(tx: &mut S::Transaction, email: &Email) -> Result<User> {
        tx.fetch_user_by_email(email)
            .await?
            .ok_or_else(|| DbError::UserNotFound(email.clone()))
    }

    #[instrument(skip(self, user), fields(email = %user.email))]
    pub async fn create_user(&self, user: &CreateUser) -> Result<Id<UserMarker>> {
        let mut tx = self.write().await?;
        if tx.fetch_user_by_email(&user.email).await?.is_some() {
            return Err(DbError::EmailTaken(user.email.clone()));
        }

        let user_id = tx.insert_user(user).await.map_err(|error| {
            match DbError::from(error) {
                DbError::Duplicate(_) => DbError::EmailTaken(user.email.clone()),
                error => error,
            }
        })?;
        tx.commit().await?;

        debug!(%user_id, "Created user");
        Ok(user_id)
    }

    /// Changing to an email that another user holds is a conflict; keeping
    /// one's own email is not.
    #[instrument(skip(self, user))]
    pub async fn update_user(&self, email: &Email, user: &UpdateUser) -> Result<()> {
        let mut tx = self.write().await?;
        let current = Self::existing_user(&mut tx, email).await?;

        if let Some(holder) = tx.fetch_user_by_email(&user.email).await?
            && holder.id != current.id
        {
            return Err(DbError::EmailTaken(user.email.clone()));
        }

        tx.update_user(current.id, current.version, user).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Also removes the user's posts and comments.
    #[instrument(skip(self))]
    pub async fn delete_user(&self, email: &Email) -> Result<()> {
        let mut tx = self.write().await?;
        let user = Self::existing_user(&mut tx, email).await?;
        tx.delete_user(user.id).await?;
        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn get_user(&self, email: &Email) -> Result<User> {
        let mut tx = self.read().await?;
        let user = Self::existing_user(&mut tx, email).await?;
        tx.commit().await?;
        Ok(user)
    }

    #[instrument(skip(self))]
    pub async fn list_users(
        &self,
        search_mode: bool,
        keyword: Option<&str>,
        page_index: i64,
        known_total: Option<i64>,
    ) -> Result<Page<User>> {
        let filter = FilterRequest {
            keyword: keyword.map(str::to_owned),
            ..FilterRequest::default()
        }
        .build::<UserMarker>()?;

        self.list(&filter, Order::HIGHEST_ID_FIRST, page_index, known_total, search_mode)
            .await
    }
}
