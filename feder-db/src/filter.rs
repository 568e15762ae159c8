//! Translation of listing filters into storage predicates.

use feder_common::model::{
    Id,
    comment::CommentMarker,
    post::PostMarker,
    user::{Email, UserMarker},
};
use std::{
    fmt::{Display, Formatter},
    marker::PhantomData,
};
use thiserror::Error;

pub const KEYWORD_MAX_LEN: usize = 100;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
pub enum EntityKind {
    Post,
    Comment,
    User,
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            EntityKind::Post => "post",
            EntityKind::Comment => "comment",
            EntityKind::User => "user",
        })
    }
}

/// Implemented by the id markers of every listable entity.
pub trait Entity: Send + Sync + 'static {
    const KIND: EntityKind;
}

impl Entity for PostMarker {
    const KIND: EntityKind = EntityKind::Post;
}

impl Entity for CommentMarker {
    const KIND: EntityKind = EntityKind::Comment;
}

impl Entity for UserMarker {
    const KIND: EntityKind = EntityKind::User;
}

/// A trimmed, non-empty search term matched case-insensitively as a substring.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct Keyword(String);

impl Keyword {
    /// Returns `None` for blank input, which means "no keyword filter".
    pub fn new(keyword: &str) -> Result<Option<Self>, InvalidFilterError> {
        let trimmed = keyword.trim();
        let length = trimmed.chars().count();
        if length > KEYWORD_MAX_LEN {
            return Err(InvalidFilterError::KeywordTooLong(length));
        }
        Ok((!trimmed.is_empty()).then(|| Self(trimmed.to_owned())))
    }

    #[must_use]
    pub fn get(&self) -> &str {
        &self.0
    }

    /// The keyword as an `ILIKE` pattern with `\` as escape character.
    #[must_use]
    pub fn like_pattern(&self) -> String {
        let mut pattern = String::with_capacity(self.0.len() + 2);
        pattern.push('%');
        for c in self.0.chars() {
            if matches!(c, '%' | '_' | '\\') {
                pattern.push('\\');
            }
            pattern.push(c);
        }
        pattern.push('%');
        pattern
    }

    #[must_use]
    pub fn matches(&self, haystack: &str) -> bool {
        haystack.to_lowercase().contains(&self.0.to_lowercase())
    }
}

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub enum Predicate {
    PostIs(Id<PostMarker>),
    ParentIs(Id<CommentMarker>),
    ParentIsNull,
    AuthorEmailIs(Email),
    KeywordContains(Keyword),
}

impl Predicate {
    fn field(&self) -> &'static str {
        match self {
            Predicate::PostIs(_) => "post_id",
            Predicate::ParentIs(_) | Predicate::ParentIsNull => "parent_id",
            Predicate::AuthorEmailIs(_) => "author_email",
            Predicate::KeywordContains(_) => "keyword",
        }
    }

    fn applies_to(&self, entity: EntityKind) -> bool {
        match self {
            Predicate::PostIs(_) | Predicate::ParentIs(_) | Predicate::ParentIsNull => {
                entity == EntityKind::Comment
            }
            Predicate::AuthorEmailIs(_) => entity != EntityKind::User,
            Predicate::KeywordContains(_) => true,
        }
    }
}

/// A conjunction of predicates over the entity `E`.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct Filter<E> {
    predicates: Vec<Predicate>,
    entity: PhantomData<E>,
}

impl<E: Entity> Filter<E> {
    #[must_use]
    pub fn all() -> Self {
        Self {
            predicates: Vec::new(),
            entity: PhantomData,
        }
    }

    pub fn and(mut self, predicate: Predicate) -> Result<Self, InvalidFilterError> {
        if !predicate.applies_to(E::KIND) {
            return Err(InvalidFilterError::NotApplicable {
                field: predicate.field(),
                entity: E::KIND,
            });
        }
        self.predicates.push(predicate);
        Ok(self)
    }

    #[must_use]
    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }
}

impl Filter<CommentMarker> {
    #[must_use]
    pub fn top_level(post_id: Id<PostMarker>) -> Self {
        Self {
            predicates: vec![Predicate::PostIs(post_id), Predicate::ParentIsNull],
            entity: PhantomData,
        }
    }

    #[must_use]
    pub fn replies(parent_id: Id<CommentMarker>) -> Self {
        Self {
            predicates: vec![Predicate::ParentIs(parent_id)],
            entity: PhantomData,
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum ParentFilter {
    Is(Id<CommentMarker>),
    IsNull,
}

/// The recognized filter fields of a listing request, before validation.
#[derive(Clone, Eq, PartialEq, Debug, Default, Hash)]
pub struct FilterRequest {
    pub post_id: Option<Id<PostMarker>>,
    pub parent: Option<ParentFilter>,
    pub author_email: Option<Email>,
    pub keyword: Option<String>,
}

impl FilterRequest {
    pub fn build<E: Entity>(self) -> Result<Filter<E>, InvalidFilterError> {
        let mut filter = Filter::all();

        if let Some(post_id) = self.post_id {
            filter = filter.and(Predicate::PostIs(post_id))?;
        }
        match self.parent {
            Some(ParentFilter::Is(parent_id)) => filter = filter.and(Predicate::ParentIs(parent_id))?,
            Some(ParentFilter::IsNull) => filter = filter.and(Predicate::ParentIsNull)?,
            None => {}
        }
        if let Some(email) = self.author_email {
            filter = filter.and(Predicate::AuthorEmailIs(email))?;
        }
        if let Some(keyword) = self.keyword.as_deref().map(Keyword::new).transpose()?.flatten() {
            filter = filter.and(Predicate::KeywordContains(keyword))?;
        }

        Ok(filter)
    }
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Error)]
pub enum InvalidFilterError {
    #[error("Filter field {field} does not apply to {entity} listings")]
    NotApplicable {
        field: &'static str,
        entity: EntityKind,
    },
    #[error("Keyword is {0} characters long, at most 100 are allowed")]
    KeywordTooLong(usize),
}
