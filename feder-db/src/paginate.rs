//! The two-phase listing engine.
//!
//! Phase one selects only the ids of one page, phase two loads the full rows
//! for exactly those ids. Both run in the caller's transaction so a read-only
//! transaction sees a single snapshot.

use crate::{
    filter::{Entity, Filter},
    store::{KeyQuery, Order, StoreError, Transaction},
};
use async_trait::async_trait;
use feder_common::model::{
    Id,
    comment::{Comment, CommentMarker},
    page::{Page, PageRequest},
    post::{Post, PostMarker},
    user::{User, UserMarker},
};
use std::collections::HashMap;
use tracing::{debug, trace};

/// Search listings report `size * ESTIMATED_PAGES` instead of counting.
pub const ESTIMATED_PAGES: u64 = 10;

#[derive(Debug)]
pub struct PageQuery<'a, E> {
    pub filter: &'a Filter<E>,
    pub order: Order,
    pub page: PageRequest,
    pub known_total: Option<u64>,
    pub search_mode: bool,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
enum CountPolicy {
    Trusted(u64),
    Estimated(u64),
    Exact,
}

impl CountPolicy {
    fn choose(known_total: Option<u64>, search_mode: bool, page: PageRequest) -> Self {
        match known_total {
            Some(total) => Self::Trusted(total),
            None if search_mode => {
                Self::Estimated(u64::from(page.size()).saturating_mul(ESTIMATED_PAGES))
            }
            None => Self::Exact,
        }
    }
}

/// A full row that can be listed page by page.
#[async_trait]
pub trait Listing: Sized + Send {
    type Marker: Entity;

    fn id(&self) -> Id<Self::Marker>;

    /// Loads the rows for `ids` in any order.
    async fn hydrate<T: Transaction>(
        tx: &mut T,
        ids: &[Id<Self::Marker>],
    ) -> Result<Vec<Self>, StoreError>;
}

#[async_trait]
impl Listing for Post {
    type Marker = PostMarker;

    fn id(&self) -> Id<PostMarker> {
        self.id
    }

    async fn hydrate<T: Transaction>(
        tx: &mut T,
        ids: &[Id<PostMarker>],
    ) -> Result<Vec<Self>, StoreError> {
        tx.hydrate_posts(ids).await
    }
}

#[async_trait]
impl Listing for Comment {
    type Marker = CommentMarker;

    fn id(&self) -> Id<CommentMarker> {
        self.id
    }

    async fn hydrate<T: Transaction>(
        tx: &mut T,
        ids: &[Id<CommentMarker>],
    ) -> Result<Vec<Self>, StoreError> {
        tx.hydrate_comments(ids).await
    }
}

#[async_trait]
impl Listing for User {
    type Marker = UserMarker;

    fn id(&self) -> Id<UserMarker> {
        self.id
    }

    async fn hydrate<T: Transaction>(
        tx: &mut T,
        ids: &[Id<UserMarker>],
    ) -> Result<Vec<Self>, StoreError> {
        tx.hydrate_users(ids).await
    }
}

pub async fn paginate<V: Listing, T: Transaction>(
    tx: &mut T,
    query: &PageQuery<'_, V::Marker>,
) -> Result<Page<V>, StoreError> {
    let entity = <V::Marker as Entity>::KIND;
    let key_query = KeyQuery {
        entity,
        predicates: query.filter.predicates(),
        order: query.order,
        limit: query.page.size(),
        offset: query.page.offset(),
    };

    let keys = tx.select_keys(&key_query).await?;
    if keys.is_empty() {
        trace!(%entity, page = query.page.index(), "No keys selected, skipping hydration");
        return Ok(Page::empty(query.page));
    }

    let ids: Vec<Id<V::Marker>> = keys.iter().copied().map(Id::from).collect();
    let mut items = V::hydrate(tx, &ids).await?;

    let positions: HashMap<u64, usize> = keys
        .iter()
        .enumerate()
        .map(|(position, key)| (*key, position))
        .collect();
    items.sort_by_key(|item| {
        let id: u64 = item.id().into();
        positions.get(&id).copied()
    });
    if items.len() < keys.len() {
        debug!(
            %entity,
            selected = keys.len(),
            hydrated = items.len(),
            "Rows vanished between key selection and hydration"
        );
    }

    let total = match CountPolicy::choose(query.known_total, query.search_mode, query.page) {
        CountPolicy::Trusted(total) => total,
        CountPolicy::Estimated(estimate) => {
            debug!(%entity, estimate, "Estimating total for search listing");
            estimate
        }
        CountPolicy::Exact => tx.count(entity, query.filter.predicates()).await?,
    };

    Ok(Page {
        items,
        total,
        page_index: query.page.index(),
        page_size: query.page.size(),
    })
}

#[cfg(test)]
mod tests {
    use crate::{
        filter::{EntityKind, Filter, Keyword, Predicate},
        paginate::{CountPolicy, PageQuery, paginate},
        store::{
            AccessMode, KeyQuery, Order, Result, Store, Transaction,
            memory::{MemoryStore, MemoryTransaction},
        },
    };
    use async_trait::async_trait;
    use feder_common::model::{
        Id, Version,
        comment::{Comment, CommentMarker, CreateComment},
        page::{Page, PageRequest},
        post::{Post, PostContent, PostMarker, PostTitle},
        user::{CreateUser, Email, UpdateUser, User, UserMarker, Username},
    };

    /// Hydrates the way a database without `ORDER BY` may: rows come back
    /// reversed, and rows in `deleted` are gone as if removed after phase one.
    struct Unordered {
        inner: MemoryTransaction,
        deleted: Vec<u64>,
    }

    impl Unordered {
        fn surviving<Marker>(&self, ids: &[Id<Marker>]) -> Vec<Id<Marker>> {
            ids.iter()
                .copied()
                .filter(|id| !self.deleted.contains(&u64::from(*id)))
                .collect()
        }
    }

    #[async_trait]
    impl Transaction for Unordered {
        async fn select_keys(&mut self, query: &KeyQuery<'_>) -> Result<Vec<u64>> {
            self.inner.select_keys(query).await
        }

        async fn count(&mut self, entity: EntityKind, predicates: &[Predicate]) -> Result<u64> {
            self.inner.count(entity, predicates).await
        }

        async fn hydrate_posts(&mut self, ids: &[Id<PostMarker>]) -> Result<Vec<Post>> {
            let ids = self.surviving(ids);
            let mut rows = self.inner.hydrate_posts(&ids).await?;
            rows.reverse();
            Ok(rows)
        }

        async fn hydrate_comments(&mut self, ids: &[Id<CommentMarker>]) -> Result<Vec<Comment>> {
            let ids = self.surviving(ids);
            let mut rows = self.inner.hydrate_comments(&ids).await?;
            rows.reverse();
            Ok(rows)
        }

        async fn hydrate_users(&mut self, ids: &[Id<UserMarker>]) -> Result<Vec<User>> {
            let ids = self.surviving(ids);
            let mut rows = self.inner.hydrate_users(&ids).await?;
            rows.reverse();
            Ok(rows)
        }

        async fn fetch_post(&mut self, id: Id<PostMarker>) -> Result<Option<Post>> {
            self.inner.fetch_post(id).await
        }

        async fn fetch_comment(&mut self, id: Id<CommentMarker>) -> Result<Option<Comment>> {
            self.inner.fetch_comment(id).await
        }

        async fn fetch_user_by_email(&mut self, email: &Email) -> Result<Option<User>> {
            self.inner.fetch_user_by_email(email).await
        }

        async fn insert_user(&mut self, user: &CreateUser) -> Result<Id<UserMarker>> {
            self.inner.insert_user(user).await
        }

        async fn insert_post(
            &mut self,
            author: Id<UserMarker>,
            post: &PostContent,
        ) -> Result<Id<PostMarker>> {
            self.inner.insert_post(author, post).await
        }

        async fn insert_comment(
            &mut self,
            author: Id<UserMarker>,
            comment: &CreateComment,
        ) -> Result<Id<CommentMarker>> {
            self.inner.insert_comment(author, comment).await
        }

        async fn update_post(
            &mut self,
            id: Id<PostMarker>,
            expected: Version,
            post: &PostContent,
        ) -> Result<()> {
            self.inner.update_post(id, expected, post).await
        }

        async fn update_comment(
            &mut self,
            id: Id<CommentMarker>,
            expected: Version,
            content: &str,
        ) -> Result<()> {
            self.inner.update_comment(id, expected, content).await
        }

        async fn update_user(
            &mut self,
            id: Id<UserMarker>,
            expected: Version,
            user: &UpdateUser,
        ) -> Result<()> {
            self.inner.update_user(id, expected, user).await
        }

        async fn delete_post(&mut self, id: Id<PostMarker>) -> Result<()> {
            self.inner.delete_post(id).await
        }

        async fn delete_comment(&mut self, id: Id<CommentMarker>) -> Result<()> {
            self.inner.delete_comment(id).await
        }

        async fn delete_user(&mut self, id: Id<UserMarker>) -> Result<()> {
            self.inner.delete_user(id).await
        }

        async fn commit(self) -> Result<()> {
            self.inner.commit().await
        }
    }

    async fn seed(store: &MemoryStore, titles: &[&str]) -> Vec<Id<PostMarker>> {
        let mut tx = store.begin(AccessMode::ReadWrite).await.unwrap();
        let author: Id<UserMarker> = tx
            .insert_user(&CreateUser {
                email: Email::new("ada@example.com".to_owned()).unwrap(),
                username: Username::new("ada".to_owned()).unwrap(),
            })
            .await
            .unwrap();

        let mut ids = Vec::new();
        for title in titles {
            let post = PostContent {
                title: PostTitle::new((*title).to_owned()).unwrap(),
                content: format!("about {title}"),
            };
            ids.push(tx.insert_post(author, &post).await.unwrap());
        }
        tx.commit().await.unwrap();
        ids
    }

    fn query<'a>(
        filter: &'a Filter<PostMarker>,
        page: PageRequest,
        known_total: Option<u64>,
        search_mode: bool,
    ) -> PageQuery<'a, PostMarker> {
        PageQuery {
            filter,
            order: Order::HIGHEST_ID_FIRST,
            page,
            known_total,
            search_mode,
        }
    }

    #[test]
    fn count_policy_priority() {
        let page = PageRequest::first(5);
        assert_eq!(CountPolicy::choose(Some(3), true, page), CountPolicy::Trusted(3));
        assert_eq!(CountPolicy::choose(None, true, page), CountPolicy::Estimated(50));
        assert_eq!(CountPolicy::choose(None, false, page), CountPolicy::Exact);
    }

    #[tokio::test]
    async fn pages_are_bounded_and_ordered() {
        let store = MemoryStore::default();
        let ids = seed(&store, &["a", "b", "c", "d", "e", "f", "g"]).await;
        let filter = Filter::all();

        let mut tx = store.begin(AccessMode::ReadOnly).await.unwrap();
        let first: Page<Post> =
            paginate(&mut tx, &query(&filter, PageRequest::new(0, 3).unwrap(), None, false))
                .await
                .unwrap();
        let last: Page<Post> =
            paginate(&mut tx, &query(&filter, PageRequest::new(2, 3).unwrap(), None, false))
                .await
                .unwrap();

        let first_ids: Vec<_> = first.items.iter().map(|post| post.id).collect();
        assert_eq!(first_ids, vec![ids[6], ids[5], ids[4]]);
        assert_eq!(first.total, 7);
        assert_eq!(first.total_pages(), 3);
        assert_eq!(last.items.len(), 1);
        assert_eq!(last.items[0].id, ids[0]);
    }

    #[tokio::test]
    async fn empty_page_short_circuits_known_total() {
        let store = MemoryStore::default();
        seed(&store, &["a", "b"]).await;
        let filter = Filter::all();

        let mut tx = store.begin(AccessMode::ReadOnly).await.unwrap();
        let page = paginate::<Post, _>(
            &mut tx,
            &query(&filter, PageRequest::new(5, 10).unwrap(), Some(42), false),
        )
        .await
        .unwrap();

        assert!(page.items.is_empty());
        assert_eq!(page.total, 0);
        assert_eq!(page.page_index, 5);
    }

    #[tokio::test]
    async fn search_mode_estimates_total() {
        let store = MemoryStore::default();
        seed(&store, &["rust one", "go", "rust two", "Rust three"]).await;
        let filter = Filter::all()
            .and(Predicate::KeywordContains(
                Keyword::new("rust").unwrap().unwrap(),
            ))
            .unwrap();

        let mut tx = store.begin(AccessMode::ReadOnly).await.unwrap();
        let page = paginate::<Post, _>(&mut tx, &query(&filter, PageRequest::first(5), None, true))
            .await
            .unwrap();

        assert_eq!(page.items.len(), 3);
        assert_eq!(page.total, 50);
    }

    #[tokio::test]
    async fn trusted_total_is_returned_verbatim() {
        let store = MemoryStore::default();
        seed(&store, &["a", "b", "c"]).await;
        let filter = Filter::all();

        let mut tx = store.begin(AccessMode::ReadOnly).await.unwrap();
        let page = paginate::<Post, _>(
            &mut tx,
            &query(&filter, PageRequest::first(10), Some(1), true),
        )
        .await
        .unwrap();

        assert_eq!(page.items.len(), 3);
        assert_eq!(page.total, 1);
    }

    #[tokio::test]
    async fn exact_count_ignores_paging() {
        let store = MemoryStore::default();
        seed(&store, &["rust", "go", "rust again", "zig"]).await;
        let filter = Filter::all()
            .and(Predicate::KeywordContains(
                Keyword::new("RUST").unwrap().unwrap(),
            ))
            .unwrap();

        let mut tx = store.begin(AccessMode::ReadOnly).await.unwrap();
        let page = paginate::<Post, _>(&mut tx, &query(&filter, PageRequest::first(1), None, false))
            .await
            .unwrap();

        assert_eq!(page.items.len(), 1);
        assert_eq!(page.total, 2);
    }

    #[tokio::test]
    async fn rows_vanishing_between_phases_shorten_the_page() {
        let store = MemoryStore::default();
        let ids = seed(&store, &["a", "b", "c"]).await;

        let mut tx = store.begin(AccessMode::ReadWrite).await.unwrap();
        tx.delete_post(ids[1]).await.unwrap();
        let hydrated = tx.hydrate_posts(&ids).await.unwrap();
        assert_eq!(hydrated.len(), 2);
    }

    #[tokio::test]
    async fn pages_keep_key_order_whatever_order_rows_load_in() {
        let store = MemoryStore::default();
        let ids = seed(&store, &["a", "b", "c", "d", "e"]).await;
        let filter = Filter::all();
        let mut tx = Unordered {
            inner: store.begin(AccessMode::ReadOnly).await.unwrap(),
            deleted: vec![u64::from(ids[3])],
        };

        let exact: Page<Post> =
            paginate(&mut tx, &query(&filter, PageRequest::first(4), None, false))
                .await
                .unwrap();
        let exact_ids: Vec<_> = exact.items.iter().map(|post| post.id).collect();
        assert_eq!(exact_ids, vec![ids[4], ids[2], ids[1]]);
        assert_eq!(exact.total, 5);

        let second: Page<Post> = paginate(
            &mut tx,
            &query(&filter, PageRequest::new(1, 4).unwrap(), None, false),
        )
        .await
        .unwrap();
        let second_ids: Vec<_> = second.items.iter().map(|post| post.id).collect();
        assert_eq!(second_ids, vec![ids[0]]);

        let estimated: Page<Post> =
            paginate(&mut tx, &query(&filter, PageRequest::first(4), None, true))
                .await
                .unwrap();
        let estimated_ids: Vec<_> = estimated.items.iter().map(|post| post.id).collect();
        assert_eq!(estimated_ids, exact_ids);
        assert_eq!(estimated.total, 40);

        let trusted: Page<Post> =
            paginate(&mut tx, &query(&filter, PageRequest::first(4), Some(9), false))
                .await
                .unwrap();
        assert_eq!(trusted.items.len(), 3);
        assert_eq!(trusted.total, 9);
    }
}
