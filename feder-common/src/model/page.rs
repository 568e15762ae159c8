use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 100;

/// A bounded, ordered slice of results plus the total it was cut from.
///
/// `total` is whatever the count policy produced: it may be an estimate or a
/// value handed in by the caller, so it is not guaranteed to be `>= items.len()`.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page_index: u64,
    pub page_size: u32,
}

impl<T> Page<T> {
    #[must_use]
    pub fn empty(request: PageRequest) -> Self {
        Self {
            items: Vec::new(),
            total: 0,
            page_index: request.index(),
            page_size: request.size(),
        }
    }

    #[must_use]
    pub fn total_pages(&self) -> u64 {
        self.total.div_ceil(u64::from(self.page_size))
    }
}

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Error)]
pub enum InvalidPageRequestError {
    #[error("Page index must not be negative, got {0}")]
    NegativeIndex(i64),
    #[error("Page size must be between 1 and 100, got {0}")]
    SizeOutOfRange(i64),
    #[error("Page {index} of size {size} is out of range")]
    OffsetOverflow { index: i64, size: i64 },
    #[error("Known total must not be negative, got {0}")]
    NegativeTotal(i64),
}

/// A validated page index and size; `offset()` always fits into an `i64`.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Serialize)]
pub struct PageRequest {
    index: u64,
    size: u32,
}

impl PageRequest {
    pub fn new(index: i64, size: i64) -> Result<Self, InvalidPageRequestError> {
        if index < 0 {
            return Err(InvalidPageRequestError::NegativeIndex(index));
        }
        let size_u32 = u32::try_from(size)
            .ok()
            .filter(|size| (1..=MAX_PAGE_SIZE).contains(size))
            .ok_or(InvalidPageRequestError::SizeOutOfRange(size))?;
        if index.checked_mul(size).is_none() {
            return Err(InvalidPageRequestError::OffsetOverflow { index, size });
        }

        Ok(Self {
            index: index.cast_unsigned(),
            size: size_u32,
        })
    }

    #[must_use]
    pub fn first(size: u32) -> Self {
        Self {
            index: 0,
            size: size.clamp(1, MAX_PAGE_SIZE),
        }
    }

    #[must_use]
    pub fn index(self) -> u64 {
        self.index
    }

    #[must_use]
    pub fn size(self) -> u32 {
        self.size
    }

    #[must_use]
    pub fn offset(self) -> u64 {
        self.index * u64::from(self.size)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::first(DEFAULT_PAGE_SIZE)
    }
}

/// Validates a caller-supplied total. The value itself is trusted as is.
pub fn known_total(total: Option<i64>) -> Result<Option<u64>, InvalidPageRequestError> {
    total
        .map(|total| u64::try_from(total).map_err(|_| InvalidPageRequestError::NegativeTotal(total)))
        .transpose()
}

#[cfg(test)]
mod tests {
    use crate::model::page::{
        InvalidPageRequestError, MAX_PAGE_SIZE, Page, PageRequest, known_total,
    };

    #[test]
    fn page_request_bounds() {
        let request = PageRequest::new(3, 10).unwrap();
        assert_eq!(request.index(), 3);
        assert_eq!(request.size(), 10);
        assert_eq!(request.offset(), 30);

        assert_eq!(
            PageRequest::new(-1, 10),
            Err(InvalidPageRequestError::NegativeIndex(-1))
        );
        assert_eq!(
            PageRequest::new(0, 0),
            Err(InvalidPageRequestError::SizeOutOfRange(0))
        );
        assert_eq!(
            PageRequest::new(0, i64::from(MAX_PAGE_SIZE) + 1),
            Err(InvalidPageRequestError::SizeOutOfRange(101))
        );
        assert!(matches!(
            PageRequest::new(i64::MAX, 10),
            Err(InvalidPageRequestError::OffsetOverflow { .. })
        ));
    }

    #[test]
    fn known_total_rejects_negative() {
        assert_eq!(known_total(None), Ok(None));
        assert_eq!(known_total(Some(12)), Ok(Some(12)));
        assert_eq!(
            known_total(Some(-3)),
            Err(InvalidPageRequestError::NegativeTotal(-3))
        );
    }

    #[test]
    fn total_pages_rounds_up() {
        let page = Page::<()> {
            items: Vec::new(),
            total: 21,
            page_index: 0,
            page_size: 10,
        };
        assert_eq!(page.total_pages(), 3);
    }
}
