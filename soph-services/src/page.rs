//! Cursor-paged results.

/// One page of a listing.
///
/// `items` is the post-filter set: rows the principal may not see are
/// silently dropped. `cursor` is the encoded resume point over the
/// pre-filter scan; empty means the scan is exhausted.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub cursor: String,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, cursor: String) -> Self {
        Self { items, cursor }
    }
}
